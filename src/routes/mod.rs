pub mod auth;
pub mod health;
pub mod users;

use actix_web::web;

/// Everything mounted under `/api`. The caller wraps the scope in `AuthMiddleware`.
pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/auth")
            .service(auth::login)
            .service(auth::register)
            .service(auth::refresh)
            .service(auth::me)
            .service(auth::change_password),
    )
    .service(web::scope("/users").service(users::get_user));
}
