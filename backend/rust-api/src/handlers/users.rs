use axum::{extract::State, http::StatusCode, response::IntoResponse, Extension, Json};
use mongodb::bson::{doc, oid::ObjectId, Document};
use std::sync::Arc;
use validator::Validate;

use crate::{
    extractors::AppJson,
    middlewares::auth::{JwtClaims, JwtService},
    models::user::{UpdateProfileRequest, UserProfile},
    services::{auth_service::AuthService, AppState},
};

/// GET /api/users/me - Get current user profile (protected)
pub async fn me(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    tracing::debug!("Getting current user profile for user_id: {}", claims.sub);

    let jwt_service = JwtService::new(&state.config.jwt_secret);
    let service = AuthService::new(state.mongo.clone(), state.redis.clone(), jwt_service);

    match service.get_user_by_id(&claims.sub).await {
        Ok(user) => {
            let profile = UserProfile::from(user);
            Ok((StatusCode::OK, Json(profile)))
        }
        Err(e) => {
            tracing::error!("Failed to get user: {}", e);
            Err((StatusCode::NOT_FOUND, e.to_string()))
        }
    }
}

/// PATCH /api/users/me - Update own name/bio (protected)
pub async fn update_me(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    AppJson(req): AppJson<UpdateProfileRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    if let Err(e) = req.validate() {
        return Err((StatusCode::BAD_REQUEST, format!("Validation error: {}", e)));
    }

    tracing::info!("Updating profile for user_id: {}", claims.sub);

    let user_id = ObjectId::parse_str(&claims.sub)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    // Build update document
    let mut update_fields = Document::new();

    if let Some(name) = &req.name {
        update_fields.insert("name", name);
    }

    if let Some(bio) = &req.bio {
        update_fields.insert("bio", bio);
    }

    update_fields.insert("updatedAt", mongodb::bson::DateTime::now());

    if update_fields.len() <= 1 {
        return Err((StatusCode::BAD_REQUEST, "No fields to update".to_string()));
    }

    let users_collection = state.mongo.collection::<Document>("users");
    let result = users_collection
        .update_one(doc! { "_id": user_id }, doc! { "$set": update_fields })
        .await
        .map_err(|e| {
            tracing::error!("Failed to update profile: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;

    if result.matched_count == 0 {
        return Err((StatusCode::NOT_FOUND, "User not found".to_string()));
    }

    // Fetch and return updated profile
    let jwt_service = JwtService::new(&state.config.jwt_secret);
    let service = AuthService::new(state.mongo.clone(), state.redis.clone(), jwt_service);

    let updated_user = service
        .get_user_by_id(&claims.sub)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok((StatusCode::OK, Json(UserProfile::from(updated_user))))
}
