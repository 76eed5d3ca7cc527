mod common;

use axum::http::{header, Method, StatusCode};
use bookstore_api::auth::AuthResponse;
use common::{response_json, TestApp};
use serde_json::json;

async fn register(app: &TestApp, email: &str) -> AuthResponse {
    let response = app
        .request(
            Method::POST,
            "/auth/register",
            Some(json!({ "name": "Meera", "email": email, "password": "correct-horse-battery" })),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert!(response.headers().get_all(header::SET_COOKIE).iter().count() >= 2);
    serde_json::from_value(response_json(response).await).unwrap()
}

#[tokio::test]
async fn registered_user_can_use_cart_with_issued_token() {
    let app = TestApp::new().await;
    let auth = register(&app, "meera@example.com").await;

    assert_eq!(auth.user.email, "meera@example.com");
    let response = app
        .request(Method::GET, "/cart", None, Some(&auth.tokens.access_token))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn duplicate_email_is_a_conflict() {
    let app = TestApp::new().await;
    register(&app, "dup@example.com").await;

    let response = app
        .request(
            Method::POST,
            "/auth/register",
            Some(json!({
                "name": "Other",
                "email": "DUP@example.com",
                "password": "another-password"
            })),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn login_checks_the_password() {
    let app = TestApp::new().await;
    register(&app, "login@example.com").await;

    let response = app
        .request(
            Method::POST,
            "/auth/login",
            Some(json!({ "email": "login@example.com", "password": "wrong-password" })),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .request(
            Method::POST,
            "/auth/login",
            Some(json!({ "email": "login@example.com", "password": "correct-horse-battery" })),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn refresh_tokens_rotate_and_die_on_logout() {
    let app = TestApp::new().await;
    let auth = register(&app, "rotate@example.com").await;
    let first_refresh = auth.tokens.refresh_token.clone();

    let response = app
        .request(
            Method::POST,
            "/auth/refresh",
            Some(json!({ "refreshToken": first_refresh })),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let rotated: AuthResponse = serde_json::from_value(response_json(response).await).unwrap();

    // The consumed refresh token cannot be replayed.
    let response = app
        .request(
            Method::POST,
            "/auth/refresh",
            Some(json!({ "refreshToken": first_refresh })),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .request(
            Method::POST,
            "/auth/logout",
            Some(json!({ "refreshToken": rotated.tokens.refresh_token })),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .request(
            Method::POST,
            "/auth/refresh",
            Some(json!({ "refreshToken": rotated.tokens.refresh_token })),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn weak_registration_input_is_rejected() {
    let app = TestApp::new().await;
    let response = app
        .request(
            Method::POST,
            "/auth/register",
            Some(json!({ "name": "", "email": "not-an-email", "password": "short" })),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
