use actix_web::dev::Payload;
use actix_web::{Error as ActixError, FromRequest, HttpMessage, HttpRequest};
use std::future::{ready, Ready};

use crate::error::AuthError;
use crate::models::Principal;

/// The principal `AuthMiddleware` resolved for this request.
///
/// Only meaningful on routes behind `AuthMiddleware`. Without it there is nothing in
/// the extensions and extraction fails with `401 Not authenticated`.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub Principal);

impl FromRequest for CurrentUser {
    type Error = ActixError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        match req.extensions().get::<Principal>().cloned() {
            Some(principal) => ready(Ok(CurrentUser(principal))),
            None => ready(Err(AuthError::MissingCredential.into())),
        }
    }
}
