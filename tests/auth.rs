use actix_cors::Cors;
use actix_http::Request;
use actix_web::body::{to_bytes, MessageBody};
use actix_web::dev::{Service, ServiceResponse};
use actix_web::http::{header, StatusCode};
use actix_web::middleware::Logger;
use actix_web::{test, web, App};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::Arc;
use taskguard::auth::AuthMiddleware;
use taskguard::clock::SystemClock;
use taskguard::config::AuthConfig;
use taskguard::routes; // For routes::config
use taskguard::routes::health;
use taskguard::state::AppState;
use taskguard::store::MemoryUserStore;

const SECRET: &str = "integration_test_secret_0123456789abcdef";

fn test_state() -> (AppState, Arc<MemoryUserStore>) {
    let mut config = AuthConfig::with_secret(SECRET);
    config.bcrypt_cost = 4;
    let store = Arc::new(MemoryUserStore::new());
    let state = AppState::new(&config, store.clone(), Arc::new(SystemClock)).unwrap();
    (state, store)
}

macro_rules! test_app {
    ($state:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($state.clone()))
                .wrap(
                    Cors::default()
                        .allow_any_origin()
                        .allow_any_method()
                        .allow_any_header()
                        .max_age(3600),
                )
                .wrap(Logger::default())
                .service(health::health) // health is outside /api and AuthMiddleware
                .service(
                    web::scope("/api")
                        .wrap(AuthMiddleware::new($state.authenticator.clone()))
                        .configure(routes::config),
                ),
        )
        .await
    };
}

/// Middleware rejections surface as `Err` from the test service; render them the way
/// the server would.
async fn send<S, B>(app: &S, req: Request) -> (StatusCode, Value)
where
    S: Service<Request, Response = ServiceResponse<B>, Error = actix_web::Error>,
    B: MessageBody,
{
    let (status, body) = match app.call(req).await {
        Ok(resp) => {
            let status = resp.status();
            (status, test::read_body(resp).await)
        }
        Err(err) => {
            let resp = err.error_response();
            let status = resp.status();
            (status, to_bytes(resp.into_body()).await.unwrap())
        }
    };
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}

fn bearer(token: &str) -> (header::HeaderName, String) {
    (header::AUTHORIZATION, format!("Bearer {}", token))
}

async fn register<S, B>(app: &S, username: &str) -> Value
where
    S: Service<Request, Response = ServiceResponse<B>, Error = actix_web::Error>,
    B: MessageBody,
{
    let req = test::TestRequest::post()
        .uri("/api/auth/register")
        .set_json(json!({
            "username": username,
            "email": format!("{}@example.com", username),
            "password": "Password123!"
        }))
        .to_request();
    let (status, body) = send(app, req).await;
    assert_eq!(status, StatusCode::CREATED, "Registration failed. Body: {}", body);
    body
}

#[actix_rt::test]
async fn test_register_and_login_flow() {
    let (state, _) = test_state();
    let app = test_app!(state);

    let registered = register(&app, "integration_user").await;
    assert_eq!(registered["token_type"], "bearer");
    assert_eq!(registered["user"]["username"], "integration_user");
    assert!(registered["user"].get("password").is_none());

    // Try to register the same user again (should fail)
    let req = test::TestRequest::post()
        .uri("/api/auth/register")
        .set_json(json!({
            "username": "integration_user",
            "email": "integration_user@example.com",
            "password": "Password123!"
        }))
        .to_request();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "Body: {}", body);
    assert_eq!(body["error"], "Email already registered");

    // Login with email, then with username
    for login in ["integration_user@example.com", "integration_user"] {
        let req = test::TestRequest::post()
            .uri("/api/auth/login")
            .set_json(json!({ "username": login, "password": "Password123!" }))
            .to_request();
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK, "Login failed. Body: {}", body);
        assert_eq!(body["user_id"], registered["user"]["id"]);
    }

    // Use the access token on a protected route
    let access = registered["access_token"].as_str().unwrap();
    let req = test::TestRequest::get()
        .uri("/api/auth/me")
        .insert_header(bearer(access))
        .to_request();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["email"], "integration_user@example.com");
}

#[actix_rt::test]
async fn test_invalid_registration_inputs() {
    let (state, _) = test_state();
    let app = test_app!(state);

    let test_cases = vec![
        // Deserialization errors (expect 400 for missing fields)
        (
            json!({ "email": "test@example.com", "password": "Password123!" }),
            StatusCode::BAD_REQUEST,
            "missing username",
        ),
        (
            json!({ "username": "testuser", "email": "test@example.com" }),
            StatusCode::BAD_REQUEST,
            "missing password",
        ),
        // Validation errors (expect 422 after successful deserialization)
        (
            json!({ "username": "testuser", "email": "invalid-email", "password": "Password123!" }),
            StatusCode::UNPROCESSABLE_ENTITY,
            "invalid email format",
        ),
        (
            json!({ "username": "u", "email": "test@example.com", "password": "Password123!" }),
            StatusCode::UNPROCESSABLE_ENTITY,
            "username too short",
        ),
        (
            json!({ "username": "a".repeat(51), "email": "test@example.com", "password": "Password123!" }),
            StatusCode::UNPROCESSABLE_ENTITY,
            "username too long",
        ),
        (
            json!({ "username": "user name!", "email": "test@example.com", "password": "Password123!" }),
            StatusCode::UNPROCESSABLE_ENTITY,
            "username with invalid chars",
        ),
        (
            json!({ "username": "testuser", "email": "test@example.com", "password": "1234567" }),
            StatusCode::UNPROCESSABLE_ENTITY,
            "password too short",
        ),
    ];

    for (payload, expected_status, description) in test_cases {
        let req = test::TestRequest::post()
            .uri("/api/auth/register")
            .set_json(&payload)
            .to_request();
        let (status, body) = send(&app, req).await;
        assert_eq!(
            status, expected_status,
            "Test case failed: {}. Body: {}",
            description, body
        );
    }
}

#[actix_rt::test]
async fn test_invalid_login_inputs() {
    let (state, _) = test_state();
    let app = test_app!(state);
    register(&app, "login_test_user").await;

    let test_cases = vec![
        (
            json!({ "password": "Password123!" }),
            StatusCode::BAD_REQUEST,
            "missing username",
        ),
        (
            json!({ "username": "login_test_user", "password": "" }),
            StatusCode::UNPROCESSABLE_ENTITY,
            "empty password",
        ),
        (
            json!({ "username": "login_test_user", "password": "WrongPassword123!" }),
            StatusCode::UNAUTHORIZED,
            "incorrect password",
        ),
        (
            json!({ "username": "nonexistent@example.com", "password": "Password123!" }),
            StatusCode::UNAUTHORIZED,
            "non-existent user",
        ),
    ];

    for (payload, expected_status, description) in test_cases {
        let req = test::TestRequest::post()
            .uri("/api/auth/login")
            .set_json(&payload)
            .to_request();
        let (status, body) = send(&app, req).await;
        assert_eq!(
            status, expected_status,
            "Test case failed: {}. Body: {}",
            description, body
        );
    }
}

#[actix_rt::test]
async fn test_protected_routes_reject_bad_credentials() {
    let (state, _) = test_state();
    let app = test_app!(state);
    let registered = register(&app, "token_user").await;
    let refresh = registered["refresh_token"].as_str().unwrap();

    let req = test::TestRequest::get().uri("/api/auth/me").to_request();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Not authenticated");

    // A refresh token is not an access token, and says so no louder than garbage does.
    for token in [refresh, "not.a.token", "garbage"] {
        let req = test::TestRequest::get()
            .uri("/api/auth/me")
            .insert_header(bearer(token))
            .to_request();
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "token {:?}", token);
        assert_eq!(body["error"], "Could not validate credentials");
    }
}

#[actix_rt::test]
async fn test_refresh_flow() {
    let (state, _) = test_state();
    let app = test_app!(state);
    let registered = register(&app, "refresh_user").await;

    let req = test::TestRequest::post()
        .uri("/api/auth/refresh")
        .set_json(json!({ "refresh_token": registered["refresh_token"] }))
        .to_request();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK, "Body: {}", body);
    assert_eq!(body["user_id"], registered["user"]["id"]);

    let req = test::TestRequest::post()
        .uri("/api/auth/refresh")
        .set_json(json!({ "refresh_token": registered["access_token"] }))
        .to_request();
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[actix_rt::test]
async fn test_deactivated_user_is_locked_out() {
    let (state, _) = test_state();
    let app = test_app!(state);
    let registered = register(&app, "soon_inactive").await;
    let access = registered["access_token"].as_str().unwrap();
    let user_id = registered["user"]["id"].as_str().unwrap().parse().unwrap();

    state.accounts.set_active(user_id, false).await.unwrap();

    let req = test::TestRequest::get()
        .uri("/api/auth/me")
        .insert_header(bearer(access))
        .to_request();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Inactive user");
}

#[actix_rt::test]
async fn test_user_isolation() {
    let (state, store) = test_state();
    let app = test_app!(state);
    let alice = register(&app, "alice").await;
    let bob = register(&app, "bob").await;
    let alice_token = alice["access_token"].as_str().unwrap();

    let own = format!("/api/users/{}", alice["user"]["id"].as_str().unwrap());
    let req = test::TestRequest::get()
        .uri(&own)
        .insert_header(bearer(alice_token))
        .to_request();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["username"], "alice");

    // Someone else's profile looks exactly like a missing one.
    let other = format!("/api/users/{}", bob["user"]["id"].as_str().unwrap());
    let missing = format!("/api/users/{}", uuid::Uuid::new_v4());
    for uri in [other, missing] {
        let req = test::TestRequest::get()
            .uri(&uri)
            .insert_header(bearer(alice_token))
            .to_request();
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Not found");
    }

    // The default guard does not honour the admin flag.
    let alice_id = alice["user"]["id"].as_str().unwrap().parse().unwrap();
    store.set_admin(alice_id, true).await.unwrap();
    let req = test::TestRequest::get()
        .uri(&format!("/api/users/{}", bob["user"]["id"].as_str().unwrap()))
        .insert_header(bearer(alice_token))
        .to_request();
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[actix_rt::test]
async fn test_change_password() {
    let (state, _) = test_state();
    let app = test_app!(state);
    let registered = register(&app, "pw_user").await;
    let access = registered["access_token"].as_str().unwrap();

    let req = test::TestRequest::put()
        .uri("/api/auth/password")
        .insert_header(bearer(access))
        .set_json(json!({
            "current_password": "Password123!",
            "new_password": "NewPassword456!"
        }))
        .to_request();
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let req = test::TestRequest::post()
        .uri("/api/auth/login")
        .set_json(json!({ "username": "pw_user", "password": "NewPassword456!" }))
        .to_request();
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
}

#[actix_rt::test]
async fn test_health_needs_no_token() {
    let (state, _) = test_state();
    let app = test_app!(state);

    let req = test::TestRequest::get().uri("/health").to_request();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}
