use crate::{
    auth::{ChangePasswordRequest, CurrentUser, LoginRequest, RefreshRequest, RegisterRequest},
    error::AppError,
    models::UserProfile,
    state::AppState,
};
use actix_web::{get, post, put, web, HttpResponse, Responder};

/// Register a new user
///
/// Creates a new user account and returns its profile plus a token pair.
#[post("/register")]
pub async fn register(
    state: web::Data<AppState>,
    register_data: web::Json<RegisterRequest>,
) -> Result<impl Responder, AppError> {
    let response = state.accounts.register(register_data.into_inner()).await?;
    Ok(HttpResponse::Created().json(response))
}

/// Login user
///
/// Accepts an email or a username and returns a token pair.
#[post("/login")]
pub async fn login(
    state: web::Data<AppState>,
    login_data: web::Json<LoginRequest>,
) -> Result<impl Responder, AppError> {
    let tokens = state.accounts.login(login_data.into_inner()).await?;
    Ok(HttpResponse::Ok().json(tokens))
}

#[post("/refresh")]
pub async fn refresh(
    state: web::Data<AppState>,
    refresh_data: web::Json<RefreshRequest>,
) -> Result<impl Responder, AppError> {
    let tokens = state.accounts.refresh(&refresh_data.refresh_token).await?;
    Ok(HttpResponse::Ok().json(tokens))
}

/// The authenticated caller's own profile.
#[get("/me")]
pub async fn me(user: CurrentUser) -> impl Responder {
    HttpResponse::Ok().json(UserProfile::from(&user.0))
}

#[put("/password")]
pub async fn change_password(
    state: web::Data<AppState>,
    user: CurrentUser,
    password_data: web::Json<ChangePasswordRequest>,
) -> Result<impl Responder, AppError> {
    state
        .accounts
        .change_password(user.0.id, password_data.into_inner())
        .await?;
    Ok(HttpResponse::NoContent().finish())
}
