use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    Extension,
};
use chrono::Utc;
use futures::stream::{self, Stream};
use mongodb::bson::oid::ObjectId;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use crate::{
    middlewares::auth::JwtClaims,
    models::bluebook::{AttemptStatus, ModuleStatus},
    models::timer::{TimeExpired, TimerEvent, TimerTick},
    services::{exam_service::ExamService, AppState},
};

/// SSE countdown for the active module of an attempt.
/// GET /api/bluebook/attempts/{id}/stream
///
/// Ticks are derived from the module deadline stored with the attempt,
/// so every connected client (and every reconnect) sees the same clock.
pub async fn attempt_stream(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(attempt_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    tracing::info!("Client connected to SSE stream: attempt={}", attempt_id);

    let object_id = ObjectId::parse_str(&attempt_id)
        .map_err(|_| (StatusCode::NOT_FOUND, "Attempt not found".to_string()))?;
    let student_id = ObjectId::parse_str(&claims.sub)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let service = ExamService::new(state.mongo.clone());
    let (attempt, exam) = service
        .get_attempt(object_id, student_id)
        .await
        .map_err(|_| (StatusCode::NOT_FOUND, "Attempt not found".to_string()))?;

    if attempt.status != AttemptStatus::InProgress {
        return Err((
            StatusCode::CONFLICT,
            "Attempt is not in progress".to_string(),
        ));
    }

    let index = attempt.current_module;
    let (module_label, total_seconds, deadline) = match (
        exam.modules.get(index),
        attempt.module_states.get(index),
    ) {
        (Some(module), Some(state))
            if state.status == ModuleStatus::Active && state.deadline.is_some() =>
        {
            (
                module.label.clone(),
                module.duration_seconds,
                state.deadline.unwrap_or_else(Utc::now),
            )
        }
        _ => {
            return Err((
                StatusCode::CONFLICT,
                "No active module to stream".to_string(),
            ))
        }
    };

    let remaining = (deadline - Utc::now()).num_seconds().max(0) as u32;
    let tick_interval = tick_interval_ms();
    tracing::info!(
        "Starting SSE stream: attempt={}, module={}, remaining={}s, tick_interval={}ms",
        attempt_id,
        module_label,
        remaining,
        tick_interval
    );
    let stream = create_timer_stream(attempt_id, module_label, remaining, total_seconds, tick_interval);

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn tick_interval_ms() -> u64 {
    std::env::var("SSE_TICK_INTERVAL_MS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(1000)
}

/// Count down from the remaining time to zero, then emit one final
/// time-expired event and end the stream.
fn create_timer_stream(
    attempt_id: String,
    module_label: String,
    remaining_seconds: u32,
    total_seconds: u32,
    tick_interval_ms: u64,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(
        (attempt_id, module_label, remaining_seconds, false),
        move |(aid, label, remaining, final_sent)| async move {
            if final_sent {
                return None;
            }

            if remaining == 0 {
                // Send final time-expired event once
                let expired_event = TimerEvent::TimeExpired(TimeExpired {
                    attempt_id: aid.clone(),
                    module_label: label.clone(),
                    timestamp: Utc::now(),
                    message: "Module time limit exceeded".to_string(),
                });

                let event = Event::default()
                    .event(expired_event.event_name())
                    .data(expired_event.to_sse_data());

                tracing::info!("Timer expired: attempt={}, module={}", aid, label);
                return Some((Ok(event), (aid, label, remaining, true)));
            }

            // Send timer-tick event
            let tick_event = TimerEvent::TimerTick(TimerTick {
                attempt_id: aid.clone(),
                module_label: label.clone(),
                remaining_seconds: remaining,
                elapsed_seconds: total_seconds.saturating_sub(remaining),
                total_seconds,
                timestamp: Utc::now(),
            });

            let event = Event::default()
                .event(tick_event.event_name())
                .data(tick_event.to_sse_data());

            // Wait before the next tick
            sleep(Duration::from_millis(tick_interval_ms)).await;

            Some((Ok(event), (aid, label, remaining - 1, false)))
        },
    )
}
