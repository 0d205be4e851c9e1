use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
};
use serde_json::json;
use tower::ServiceExt;
use uuid::Uuid;

mod common;

#[tokio::test]
async fn test_register_returns_both_tokens_and_profile() {
    let app = common::create_test_app().await;

    let email = format!("register-{}@test.com", Uuid::new_v4());
    let body = json!({
        "email": email,
        "password": "Register123!@#",
        "name": "Register User",
    });

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/auth/register")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    if status != StatusCode::CREATED {
        panic!(
            "unexpected status {} body {}",
            status,
            String::from_utf8_lossy(&bytes)
        );
    }

    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert!(json["access_token"].as_str().is_some());
    assert!(json["refresh_token"].as_str().is_some());
    assert_eq!(json["user"]["email"], email.as_str());
    // Default role is student
    assert_eq!(json["user"]["role"], "student");
    // Password material never leaves the server
    assert!(json["user"].get("password_hash").is_none());
}

#[tokio::test]
async fn test_register_duplicate_email_rejected() {
    let app = common::create_test_app().await;

    let email = format!("dup-{}@test.com", Uuid::new_v4());
    let body = json!({
        "email": email,
        "password": "Duplicate123!",
        "name": "Dup User",
    });

    let (status, _) =
        common::request_json(&app, "POST", "/api/auth/register", None, Some(body.clone())).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) =
        common::request_json(&app, "POST", "/api/auth/register", None, Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_login_with_wrong_password_is_unauthorized() {
    let app = common::create_test_app().await;

    let email = format!("login-{}@test.com", Uuid::new_v4());
    let register = json!({
        "email": email,
        "password": "Correct123!@#",
        "name": "Login User",
    });
    let (status, _) =
        common::request_json(&app, "POST", "/api/auth/register", None, Some(register)).await;
    assert_eq!(status, StatusCode::CREATED);

    let login = json!({
        "email": email,
        "password": "Wrong123!@#",
    });
    let (status, _) = common::request_json(&app, "POST", "/api/auth/login", None, Some(login)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_me_requires_token_and_returns_profile() {
    let app = common::create_test_app().await;

    let (status, _) = common::request_json(&app, "GET", "/api/users/me", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (user_id, token) = common::register_user(&app, "student").await;
    let (status, profile) =
        common::request_json(&app, "GET", "/api/users/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(profile["id"], user_id.as_str());
    assert_eq!(profile["role"], "student");
}

#[tokio::test]
async fn test_update_profile_bio() {
    let app = common::create_test_app().await;
    let (_, token) = common::register_user(&app, "student").await;

    let (status, profile) = common::request_json(
        &app,
        "PATCH",
        "/api/users/me",
        Some(&token),
        Some(json!({ "bio": "Aiming for a 1500." })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(profile["bio"], "Aiming for a 1500.");
}

#[tokio::test]
async fn test_refresh_and_logout_lifecycle() {
    let app = common::create_test_app().await;

    let email = format!("lifecycle-{}@test.com", Uuid::new_v4());
    let register = json!({
        "email": email,
        "password": "Lifecycle123!",
        "name": "Lifecycle User",
    });
    let (status, auth) =
        common::request_json(&app, "POST", "/api/auth/register", None, Some(register)).await;
    assert_eq!(status, StatusCode::CREATED);

    let access_token = auth["access_token"].as_str().unwrap().to_string();
    let refresh_token = auth["refresh_token"].as_str().unwrap().to_string();

    // Refresh issues a fresh access token
    let (status, refreshed) = common::request_json(
        &app,
        "POST",
        "/api/auth/refresh",
        None,
        Some(json!({ "refresh_token": &refresh_token })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(refreshed["access_token"].as_str().is_some());

    // Logout revokes the refresh token server-side
    let (status, _) = common::request_json(
        &app,
        "POST",
        "/api/auth/logout",
        Some(&access_token),
        Some(json!({ "refresh_token": &refresh_token })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    // The revoked token no longer refreshes
    let (status, _) = common::request_json(
        &app,
        "POST",
        "/api/auth/refresh",
        None,
        Some(json!({ "refresh_token": refresh_token })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_invalid_token_rejected() {
    let app = common::create_test_app().await;

    let (status, _) =
        common::request_json(&app, "GET", "/api/users/me", Some("not-a-jwt"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
