use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use mongodb::bson::oid::ObjectId;
use std::sync::Arc;

use crate::{
    extractors::AppJson,
    middlewares::auth::JwtClaims,
    models::bluebook::{AttemptSnapshot, ExamView, RecordAnswerRequest, StartAttemptRequest},
    services::{
        exam_service::{ExamError, ExamService},
        AppState,
    },
};

/// ExamError carries the state-machine outcome; this is the single place
/// it turns into HTTP.
pub struct ExamApiError(ExamError);

impl From<ExamError> for ExamApiError {
    fn from(err: ExamError) -> Self {
        ExamApiError(err)
    }
}

impl IntoResponse for ExamApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ExamError::ExamNotFound | ExamError::AttemptNotFound => StatusCode::NOT_FOUND,
            ExamError::AlreadyInProgress
            | ExamError::AttemptCompleted
            | ExamError::ModuleLocked
            | ExamError::DeadlinePassed => StatusCode::CONFLICT,
            ExamError::UnknownQuestion => StatusCode::BAD_REQUEST,
            ExamError::Storage(err) => {
                tracing::error!("Exam storage error: {}", err);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, Json(self.0.to_string())).into_response()
    }
}

fn student_id(claims: &JwtClaims) -> Result<ObjectId, ExamApiError> {
    ObjectId::parse_str(&claims.sub)
        .map_err(|err| ExamApiError(ExamError::Storage(anyhow::anyhow!("Bad user id: {}", err))))
}

/// GET /api/bluebook/exams/
pub async fn list_exams(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ExamView>>, ExamApiError> {
    let service = ExamService::new(state.mongo.clone());
    let exams = service.list_exams().await?;
    Ok(Json(exams.into_iter().map(ExamView::from).collect()))
}

/// GET /api/bluebook/exams/{id}
pub async fn get_exam(
    State(state): State<Arc<AppState>>,
    Path(exam_id): Path<String>,
) -> Result<Json<ExamView>, ExamApiError> {
    let object_id =
        ObjectId::parse_str(&exam_id).map_err(|_| ExamApiError(ExamError::ExamNotFound))?;

    let service = ExamService::new(state.mongo.clone());
    let exam = service.get_exam(&object_id).await?;
    Ok(Json(ExamView::from(exam)))
}

/// POST /api/bluebook/attempts/ - Start an attempt; module 1's clock
/// starts on the server immediately.
pub async fn start_attempt(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    AppJson(req): AppJson<StartAttemptRequest>,
) -> Result<impl IntoResponse, ExamApiError> {
    let exam_id =
        ObjectId::parse_str(&req.exam_id).map_err(|_| ExamApiError(ExamError::ExamNotFound))?;
    let student = student_id(&claims)?;

    let service = ExamService::new(state.mongo.clone());
    let attempt = service.start_attempt(exam_id, student).await?;
    let exam = service.get_exam(&exam_id).await?;
    let snapshot = service.snapshot(&attempt, &exam).await?;

    Ok((StatusCode::CREATED, Json(snapshot)))
}

/// GET /api/bluebook/attempts/ - Own attempts (most recent first)
pub async fn list_attempts(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
) -> Result<Json<Vec<AttemptSnapshot>>, ExamApiError> {
    let student = student_id(&claims)?;

    let service = ExamService::new(state.mongo.clone());
    let attempts = service.list_attempts(student).await?;

    let mut snapshots = Vec::with_capacity(attempts.len());
    for attempt in attempts {
        let exam = service.get_exam(&attempt.exam_id).await?;
        snapshots.push(service.snapshot(&attempt, &exam).await?);
    }

    Ok(Json(snapshots))
}

/// GET /api/bluebook/attempts/{id} - Authoritative snapshot; reading
/// applies any deadline that has passed.
pub async fn get_attempt(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(attempt_id): Path<String>,
) -> Result<Json<AttemptSnapshot>, ExamApiError> {
    let object_id =
        ObjectId::parse_str(&attempt_id).map_err(|_| ExamApiError(ExamError::AttemptNotFound))?;
    let student = student_id(&claims)?;

    let service = ExamService::new(state.mongo.clone());
    let (attempt, exam) = service.get_attempt(object_id, student).await?;
    let snapshot = service.snapshot(&attempt, &exam).await?;

    Ok(Json(snapshot))
}

/// POST /api/bluebook/attempts/{id}/answers - Upsert an answer into the
/// active module
pub async fn record_answer(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(attempt_id): Path<String>,
    AppJson(req): AppJson<RecordAnswerRequest>,
) -> Result<Json<AttemptSnapshot>, ExamApiError> {
    let object_id =
        ObjectId::parse_str(&attempt_id).map_err(|_| ExamApiError(ExamError::AttemptNotFound))?;
    let student = student_id(&claims)?;

    let service = ExamService::new(state.mongo.clone());
    let attempt = service
        .record_answer(object_id, student, &req.question_id, &req.answer)
        .await?;
    let exam = service.get_exam(&attempt.exam_id).await?;
    let snapshot = service.snapshot(&attempt, &exam).await?;

    Ok(Json(snapshot))
}

/// POST /api/bluebook/attempts/{id}/modules/{index}/submit - Close a
/// module. Safe to call twice: the second call (or the loser of a race
/// with the deadline) gets the same state back.
pub async fn submit_module(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path((attempt_id, module_index)): Path<(String, usize)>,
) -> Result<Json<AttemptSnapshot>, ExamApiError> {
    let object_id =
        ObjectId::parse_str(&attempt_id).map_err(|_| ExamApiError(ExamError::AttemptNotFound))?;
    let student = student_id(&claims)?;

    let service = ExamService::new(state.mongo.clone());
    let attempt = service
        .submit_module(object_id, student, module_index)
        .await?;
    let exam = service.get_exam(&attempt.exam_id).await?;
    let snapshot = service.snapshot(&attempt, &exam).await?;

    Ok(Json(snapshot))
}
