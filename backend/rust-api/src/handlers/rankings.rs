use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use chrono::Utc;
use mongodb::bson::oid::ObjectId;
use std::sync::Arc;

use crate::{
    middlewares::auth::JwtClaims,
    models::ranking::{LeaderboardQuery, PeriodType, RecalculateResponse},
    services::{ranking_service::RankingService, AppState},
};

fn parse_period(query: &LeaderboardQuery) -> Result<PeriodType, (StatusCode, String)> {
    match query.period.as_deref() {
        None => Ok(PeriodType::Weekly),
        Some(raw) => PeriodType::parse(raw).ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                format!("Unknown period: {} (weekly|monthly|all_time)", raw),
            )
        }),
    }
}

/// GET /api/rankings/leaderboard/ - The precomputed leaderboard for a
/// period, optionally scoped to a class. Entries are ordered by rank
/// ascending; clients render them as-is.
pub async fn leaderboard(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let period = parse_period(&query)?;

    let class_id = match &query.class_id {
        None => None,
        Some(raw) => Some(
            ObjectId::parse_str(raw)
                .map_err(|_| (StatusCode::BAD_REQUEST, "Invalid class ID".to_string()))?,
        ),
    };

    let service = RankingService::new(state.mongo.clone());
    let document = service
        .load_leaderboard(period, class_id)
        .await
        .map_err(|e| {
            tracing::error!("Failed to load leaderboard: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;

    match document {
        Some(document) => {
            debug_assert!(crate::services::ranking_service::entries_sorted_by_rank(
                &document.entries
            ));
            Ok(Json(serde_json::json!({
                "period": document.period,
                "class_id": document.class_id.map(|id| id.to_hex()),
                "entries": document.entries,
                "generated_at": document.generated_at,
            })))
        }
        // Nothing computed yet for this scope: an empty board, not a 404
        None => Ok(Json(serde_json::json!({
            "period": period,
            "class_id": query.class_id,
            "entries": [],
            "generated_at": null,
        }))),
    }
}

/// GET /api/rankings/me - The caller's own standing for a period.
/// Fetched by clients in parallel with the leaderboard itself.
pub async fn personal_ranking(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let period = parse_period(&query)?;
    let student_id = ObjectId::parse_str(&claims.sub)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let service = RankingService::new(state.mongo.clone());
    let ranking = service
        .personal_ranking(period, student_id)
        .await
        .map_err(|e| {
            tracing::error!("Failed to load personal ranking: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;

    Ok(Json(ranking))
}

/// POST /api/rankings/update/ - Recompute all leaderboards now.
/// Routed behind the staff guard: students get 403 before reaching here.
pub async fn recalculate(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    tracing::info!(
        user_id = %claims.sub,
        role = %claims.role,
        "Manual leaderboard recalculation requested"
    );

    let service = RankingService::new(state.mongo.clone());
    let generated = service.recompute_all("manual").await.map_err(|e| {
        tracing::error!("Leaderboard recalculation failed: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;

    Ok(Json(RecalculateResponse {
        leaderboards_generated: generated,
        generated_at: Utc::now(),
    }))
}
