use actix_web::{get, web, HttpResponse, Responder};
use uuid::Uuid;

use crate::{
    auth::{Action, CurrentUser},
    error::{AppError, AuthError},
    models::UserProfile,
    state::AppState,
};

/// Fetch a user profile
///
/// Only the owner (or, with override enabled, an admin) may read it. Anyone else gets
/// the same 404 as for an id that does not exist.
#[get("/{id}")]
pub async fn get_user(
    state: web::Data<AppState>,
    user: CurrentUser,
    path: web::Path<Uuid>,
) -> Result<impl Responder, AppError> {
    let owner_id = path.into_inner();
    state
        .guard
        .authorize(&user.0, owner_id, Action::Read)
        .into_result()?;

    let principal = state
        .users
        .find_by_id(owner_id)
        .await?
        .ok_or(AuthError::OwnershipDenied)?;
    Ok(HttpResponse::Ok().json(UserProfile::from(&principal)))
}
