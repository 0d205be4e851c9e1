use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use std::sync::Arc;
use validator::Validate;

use crate::{
    extractors::AppJson,
    middlewares::auth::{JwtClaims, JwtService},
    models::{
        refresh_token::{RefreshTokenRequest, RefreshTokenResponse},
        user::{ChangePasswordRequest, LoginRequest, RegisterRequest},
    },
    services::{auth_service::AuthService, AppState},
};

fn client_context(headers: &HeaderMap) -> (Option<String>, Option<String>) {
    let ip = headers
        .get("x-forwarded-for")
        .or_else(|| headers.get("x-real-ip"))
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    (ip, user_agent)
}

/// POST /api/auth/register - Register a new user
pub async fn register(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<RegisterRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    // Validate request
    if let Err(e) = req.validate() {
        return Err((StatusCode::BAD_REQUEST, format!("Validation error: {}", e)));
    }

    tracing::info!("Registering new user: {}", req.email);

    let jwt_service = JwtService::new(&state.config.jwt_secret);
    let service = AuthService::new(state.mongo.clone(), state.redis.clone(), jwt_service);

    match service.register(req).await {
        Ok(response) => {
            tracing::info!("User registered successfully");
            Ok((StatusCode::CREATED, Json(response)))
        }
        Err(e) => {
            tracing::error!("Failed to register user: {}", e);
            Err((StatusCode::BAD_REQUEST, e.to_string()))
        }
    }
}

/// POST /api/auth/login - Login with email and password
pub async fn login(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AppJson(req): AppJson<LoginRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    // Validate request
    if let Err(e) = req.validate() {
        return Err((StatusCode::BAD_REQUEST, format!("Validation error: {}", e)));
    }

    let (ip, user_agent) = client_context(&headers);

    tracing::info!("Login attempt for user: {}", req.email);

    let jwt_service = JwtService::new(&state.config.jwt_secret);
    let service = AuthService::new(state.mongo.clone(), state.redis.clone(), jwt_service);

    // Save email for lockout bookkeeping
    let email = req.email.clone();

    // Check if account is locked due to failed login attempts
    let is_locked = service.check_failed_attempts(&email).await.unwrap_or(false); // Default to unlocked if Redis check fails

    if is_locked {
        tracing::warn!("Login blocked for {}: too many failed attempts", email);
        return Err((
            StatusCode::TOO_MANY_REQUESTS,
            "Too many failed login attempts. Please try again later.".to_string(),
        ));
    }

    match service.login(req, ip, user_agent).await {
        Ok(response) => {
            tracing::info!("User logged in successfully");

            // Clear failed login attempts on successful login
            let _ = service.clear_failed_attempts(&email).await;

            Ok((StatusCode::OK, Json(response)))
        }
        Err(e) => {
            tracing::warn!("Failed login: {}", e);

            // Increment failed login attempts counter
            let count = service.increment_failed_attempts(&email).await.unwrap_or(0);
            tracing::warn!("Failed login attempts for {}: {}/5", email, count);

            Err((StatusCode::UNAUTHORIZED, e.to_string()))
        }
    }
}

/// POST /api/auth/refresh - Refresh access token
pub async fn refresh_token(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<RefreshTokenRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    tracing::debug!("Refreshing access token");

    let jwt_service = JwtService::new(&state.config.jwt_secret);
    let service = AuthService::new(state.mongo.clone(), state.redis.clone(), jwt_service);

    match service.refresh_token(&req.refresh_token).await {
        Ok(access_token) => {
            tracing::debug!("Access token refreshed successfully");
            Ok((StatusCode::OK, Json(RefreshTokenResponse { access_token })))
        }
        Err(e) => {
            tracing::warn!("Failed to refresh token: {}", e);
            Err((StatusCode::UNAUTHORIZED, e.to_string()))
        }
    }
}

/// POST /api/auth/logout - Logout (revoke refresh token)
pub async fn logout(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<RefreshTokenRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    tracing::info!("Logging out user");

    let jwt_service = JwtService::new(&state.config.jwt_secret);
    let service = AuthService::new(state.mongo.clone(), state.redis.clone(), jwt_service);

    match service.logout(&req.refresh_token).await {
        Ok(user_id) => {
            tracing::info!("User logged out successfully: {}", user_id);
            Ok(StatusCode::NO_CONTENT)
        }
        Err(e) => {
            tracing::warn!("Failed to logout: {}", e);
            Err((StatusCode::UNAUTHORIZED, e.to_string()))
        }
    }
}

/// POST /api/auth/change-password - Change password (protected)
pub async fn change_password(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    AppJson(req): AppJson<ChangePasswordRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    // Validate request
    if let Err(e) = req.validate() {
        return Err((StatusCode::BAD_REQUEST, format!("Validation error: {}", e)));
    }

    tracing::info!("Changing password for user_id: {}", claims.sub);

    let jwt_service = JwtService::new(&state.config.jwt_secret);
    let service = AuthService::new(state.mongo.clone(), state.redis.clone(), jwt_service);

    // Get current user
    let user = service
        .get_user_by_id(&claims.sub)
        .await
        .map_err(|e| (StatusCode::NOT_FOUND, e.to_string()))?;

    // Verify old password
    if !service
        .verify_password(&req.old_password, &user.password_hash)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
    {
        return Err((StatusCode::UNAUTHORIZED, "Invalid old password".to_string()));
    }

    // Hash new password
    let new_password_hash = service
        .hash_password(&req.new_password)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    // Update password in database
    use mongodb::bson::{doc, oid::ObjectId};
    let user_id = ObjectId::parse_str(&claims.sub)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let users_collection = state.mongo.collection::<mongodb::bson::Document>("users");
    users_collection
        .update_one(
            doc! { "_id": user_id },
            doc! {
                "$set": {
                    "password_hash": new_password_hash,
                    "updatedAt": mongodb::bson::DateTime::now()
                }
            },
        )
        .await
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to update password: {}", e),
            )
        })?;

    tracing::info!("Password changed successfully for user_id: {}", claims.sub);

    Ok((
        StatusCode::OK,
        Json(serde_json::json!({ "message": "Password changed successfully" })),
    ))
}
