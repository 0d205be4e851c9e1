use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::Utc;
use futures::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, Document};
use std::sync::Arc;
use validator::Validate;

use crate::{
    extractors::AppJson,
    middlewares::auth::JwtClaims,
    models::{
        homework::{
            derive_status, CreateHomeworkRequest, GradeSubmissionRequest, Homework,
            HomeworkDetail, HomeworkStatus, HomeworkSummary, ListHomeworkQuery,
            SubmitHomeworkRequest, SubmissionView, UpdateHomeworkRequest,
        },
        question::QuestionView,
    },
    services::{homework_service::HomeworkService, AppState},
};

#[derive(Debug)]
pub enum HomeworkApiError {
    BadRequest(String),
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl HomeworkApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        HomeworkApiError::BadRequest(message.into())
    }

    fn forbidden(message: impl Into<String>) -> Self {
        HomeworkApiError::Forbidden(message.into())
    }

    fn not_found(message: impl Into<String>) -> Self {
        HomeworkApiError::NotFound(message.into())
    }

    fn internal(message: impl Into<String>) -> Self {
        HomeworkApiError::Internal(message.into())
    }
}

impl IntoResponse for HomeworkApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            HomeworkApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            HomeworkApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            HomeworkApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            HomeworkApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            HomeworkApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        (status, Json(message)).into_response()
    }
}

fn parse_id(value: &str, what: &str) -> Result<ObjectId, HomeworkApiError> {
    ObjectId::parse_str(value)
        .map_err(|_| HomeworkApiError::bad_request(format!("Invalid {} ID", what)))
}

/// GET /api/homework/ - Assignment overview.
/// Students get derived status per assignment and can filter on it.
pub async fn list_homework(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Query(query): Query<ListHomeworkQuery>,
) -> Result<Json<Vec<HomeworkSummary>>, HomeworkApiError> {
    let user_id = parse_id(&claims.sub, "user")?;

    let mut filter = Document::new();
    if let Some(class_id) = &query.class_id {
        filter.insert("classId", parse_id(class_id, "class")?);
    }

    match claims.role.as_str() {
        "student" => {
            let class_ids = student_class_ids(&state, user_id).await?;
            match &query.class_id {
                Some(requested) => {
                    // Students can only narrow to classes they belong to
                    let requested = parse_id(requested, "class")?;
                    if !class_ids.contains(&requested) {
                        return Err(HomeworkApiError::forbidden(
                            "Not a member of this class",
                        ));
                    }
                }
                None => {
                    filter.insert("classId", doc! { "$in": class_ids });
                }
            }
        }
        "teacher" => {
            filter.insert("createdBy", user_id);
        }
        _ => {} // admin sees all
    }

    let homework_collection = state.mongo.collection::<Homework>("homework");
    let mut cursor = homework_collection
        .find(filter)
        .sort(doc! { "dueDate": 1 })
        .await
        .map_err(|err| HomeworkApiError::internal(format!("Failed to query homework: {}", err)))?;

    let mut assignments = Vec::new();
    while let Some(hw) = cursor
        .try_next()
        .await
        .map_err(|err| HomeworkApiError::internal(format!("Homework cursor error: {}", err)))?
    {
        assignments.push(hw);
    }

    if claims.role != "student" {
        let summaries = assignments
            .into_iter()
            .map(|hw| HomeworkSummary {
                id: hw.id.map(|id| id.to_hex()).unwrap_or_default(),
                title: hw.title,
                class_id: hw.class_id.to_hex(),
                due_date: hw.due_date,
                question_count: hw.question_ids.len(),
                status: None,
                score: None,
            })
            .collect();
        return Ok(Json(summaries));
    }

    // Student view: join with own submissions and derive status
    let homework_ids: Vec<ObjectId> = assignments.iter().filter_map(|hw| hw.id).collect();
    let service = HomeworkService::new(state.mongo.clone(), state.redis.clone());
    let submissions = service
        .submissions_by_homework(user_id, &homework_ids)
        .await
        .map_err(|err| HomeworkApiError::internal(err.to_string()))?;

    let status_filter = match query.status.as_deref() {
        None => None,
        Some("pending") => Some(HomeworkStatus::Pending),
        Some("submitted") => Some(HomeworkStatus::Submitted),
        Some("overdue") => Some(HomeworkStatus::Overdue),
        Some(other) => {
            return Err(HomeworkApiError::bad_request(format!(
                "Unknown status filter: {}",
                other
            )))
        }
    };

    let now = Utc::now();
    let summaries = assignments
        .into_iter()
        .filter_map(|hw| {
            let id = hw.id?;
            let submission = submissions.get(&id);
            let status = derive_status(hw.due_date, now, submission.is_some());

            if let Some(wanted) = status_filter {
                if status != wanted {
                    return None;
                }
            }

            Some(HomeworkSummary {
                id: id.to_hex(),
                title: hw.title,
                class_id: hw.class_id.to_hex(),
                due_date: hw.due_date,
                question_count: hw.question_ids.len(),
                status: Some(status),
                score: submission.map(|sub| sub.final_score()),
            })
        })
        .collect();

    Ok(Json(summaries))
}

/// POST /api/homework/ - Create an assignment (teacher/admin only)
pub async fn create_homework(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    AppJson(req): AppJson<CreateHomeworkRequest>,
) -> Result<impl IntoResponse, HomeworkApiError> {
    if !claims.is_staff() {
        return Err(HomeworkApiError::forbidden(
            "Teacher role required to assign homework",
        ));
    }

    req.validate()
        .map_err(|e| HomeworkApiError::bad_request(format!("Validation error: {}", e)))?;

    let created_by = parse_id(&claims.sub, "user")?;
    let class_id = parse_id(&req.class_id, "class")?;

    let mut question_ids = Vec::with_capacity(req.question_ids.len());
    for question_id in &req.question_ids {
        question_ids.push(parse_id(question_id, "question")?);
    }

    // All referenced questions must exist in the bank
    let questions_collection = state.mongo.collection::<Document>("questions");
    let found = questions_collection
        .count_documents(doc! { "_id": { "$in": question_ids.clone() } })
        .await
        .map_err(|err| HomeworkApiError::internal(format!("Failed to verify questions: {}", err)))?;
    if found as usize != question_ids.len() {
        return Err(HomeworkApiError::bad_request(
            "One or more questions do not exist",
        ));
    }

    let homework = Homework {
        id: None,
        title: req.title,
        description: req.description,
        class_id,
        question_ids,
        due_date: req.due_date,
        created_by,
        created_at: Utc::now(),
    };

    let homework_collection = state.mongo.collection::<Homework>("homework");
    let insert_result = homework_collection
        .insert_one(&homework)
        .await
        .map_err(|err| HomeworkApiError::internal(format!("Failed to create homework: {}", err)))?;

    let mut created = homework;
    created.id = insert_result.inserted_id.as_object_id();

    tracing::info!(
        homework_id = ?created.id.map(|id| id.to_hex()),
        class_id = %created.class_id.to_hex(),
        "Homework assigned"
    );

    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /api/homework/{id} - Assignment aggregate.
/// Students get redacted questions plus their own submission.
pub async fn get_homework(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(homework_id): Path<String>,
) -> Result<Json<HomeworkDetail>, HomeworkApiError> {
    let homework = load_homework(&state, &homework_id).await?;
    let user_id = parse_id(&claims.sub, "user")?;

    let service = HomeworkService::new(state.mongo.clone(), state.redis.clone());
    let questions = service
        .load_questions(&homework.question_ids)
        .await
        .map_err(|err| HomeworkApiError::internal(err.to_string()))?;

    let submission = if claims.role == "student" {
        service
            .find_submission(
                homework.id.ok_or_else(|| {
                    HomeworkApiError::internal("Homework record missing id")
                })?,
                user_id,
            )
            .await
            .map_err(|err| HomeworkApiError::internal(err.to_string()))?
    } else {
        None
    };

    Ok(Json(HomeworkDetail {
        id: homework.id.map(|id| id.to_hex()).unwrap_or_default(),
        title: homework.title,
        description: homework.description,
        class_id: homework.class_id.to_hex(),
        due_date: homework.due_date,
        questions: questions.into_iter().map(QuestionView::from).collect(),
        submission: submission.map(SubmissionView::from),
    }))
}

/// PATCH /api/homework/{id} - Update an assignment (creator or admin)
pub async fn update_homework(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(homework_id): Path<String>,
    AppJson(req): AppJson<UpdateHomeworkRequest>,
) -> Result<Json<Homework>, HomeworkApiError> {
    req.validate()
        .map_err(|e| HomeworkApiError::bad_request(format!("Validation error: {}", e)))?;

    let homework = load_homework(&state, &homework_id).await?;
    ensure_homework_ownership(&claims, &homework)?;

    let mut update_fields = Document::new();
    if let Some(title) = &req.title {
        update_fields.insert("title", title);
    }
    if let Some(description) = &req.description {
        update_fields.insert("description", description);
    }
    if let Some(due_date) = req.due_date {
        update_fields.insert(
            "dueDate",
            mongodb::bson::DateTime::from_millis(due_date.timestamp_millis()),
        );
    }

    if update_fields.is_empty() {
        return Err(HomeworkApiError::bad_request("No fields to update"));
    }

    let object_id = parse_id(&homework_id, "homework")?;
    let homework_collection = state.mongo.collection::<Homework>("homework");
    homework_collection
        .update_one(doc! { "_id": object_id }, doc! { "$set": update_fields })
        .await
        .map_err(|err| HomeworkApiError::internal(format!("Failed to update homework: {}", err)))?;

    let updated = load_homework(&state, &homework_id).await?;
    Ok(Json(updated))
}

/// DELETE /api/homework/{id} - Delete an assignment (creator or admin)
pub async fn delete_homework(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(homework_id): Path<String>,
) -> Result<StatusCode, HomeworkApiError> {
    let homework = load_homework(&state, &homework_id).await?;
    ensure_homework_ownership(&claims, &homework)?;

    let object_id = parse_id(&homework_id, "homework")?;
    let homework_collection = state.mongo.collection::<Homework>("homework");
    homework_collection
        .delete_one(doc! { "_id": object_id })
        .await
        .map_err(|err| HomeworkApiError::internal(format!("Failed to delete homework: {}", err)))?;

    tracing::info!(homework_id = %homework_id, "Homework deleted");

    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/homework/{id}/submit/ - Student submission: one payload
/// with the answer map and elapsed time, recorded at most once.
pub async fn submit_homework(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(homework_id): Path<String>,
    AppJson(req): AppJson<SubmitHomeworkRequest>,
) -> Result<impl IntoResponse, HomeworkApiError> {
    if claims.role != "student" {
        return Err(HomeworkApiError::forbidden(
            "Only students can submit homework",
        ));
    }

    let homework = load_homework(&state, &homework_id).await?;
    let student_id = parse_id(&claims.sub, "user")?;

    // The student must belong to the class the homework was assigned to
    let class_ids = student_class_ids(&state, student_id).await?;
    if !class_ids.contains(&homework.class_id) {
        return Err(HomeworkApiError::forbidden(
            "Homework is not assigned to you",
        ));
    }

    let service = HomeworkService::new(state.mongo.clone(), state.redis.clone());
    match service.submit(&homework, student_id, req).await {
        Ok(submission) => Ok((StatusCode::CREATED, Json(SubmissionView::from(submission)))),
        Err(err) => {
            let msg = err.to_string();
            if msg.contains("already submitted") {
                Err(HomeworkApiError::Conflict(msg))
            } else if msg.contains("out of range") || msg.contains("not in this assignment") {
                Err(HomeworkApiError::BadRequest(msg))
            } else {
                tracing::error!("Failed to record submission: {}", msg);
                Err(HomeworkApiError::Internal(msg))
            }
        }
    }
}

/// GET /api/homework/{id}/submissions - All submissions (teacher view)
pub async fn list_submissions(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(homework_id): Path<String>,
) -> Result<Json<Vec<SubmissionView>>, HomeworkApiError> {
    let homework = load_homework(&state, &homework_id).await?;
    ensure_homework_ownership(&claims, &homework)?;

    let service = HomeworkService::new(state.mongo.clone(), state.redis.clone());
    let submissions = service
        .list_submissions(homework.id.ok_or_else(|| {
            HomeworkApiError::internal("Homework record missing id")
        })?)
        .await
        .map_err(|err| HomeworkApiError::internal(err.to_string()))?;

    Ok(Json(
        submissions.into_iter().map(SubmissionView::from).collect(),
    ))
}

/// PUT /api/homework/{id}/submissions/{sid}/grade - Manual grading.
/// Overwrites any previous grade; last writer wins.
pub async fn grade_submission(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path((homework_id, submission_id)): Path<(String, String)>,
    AppJson(req): AppJson<GradeSubmissionRequest>,
) -> Result<Json<SubmissionView>, HomeworkApiError> {
    req.validate()
        .map_err(|e| HomeworkApiError::bad_request(format!("Validation error: {}", e)))?;

    let homework = load_homework(&state, &homework_id).await?;
    ensure_homework_ownership(&claims, &homework)?;

    let grader_id = parse_id(&claims.sub, "user")?;
    let submission_oid = parse_id(&submission_id, "submission")?;
    let homework_oid = parse_id(&homework_id, "homework")?;

    let service = HomeworkService::new(state.mongo.clone(), state.redis.clone());
    let graded = service
        .grade(homework_oid, submission_oid, grader_id, req)
        .await
        .map_err(|err| {
            let msg = err.to_string();
            if msg.contains("not found") {
                HomeworkApiError::NotFound(msg)
            } else {
                HomeworkApiError::Internal(msg)
            }
        })?;

    Ok(Json(SubmissionView::from(graded)))
}

async fn load_homework(
    state: &AppState,
    homework_id: &str,
) -> Result<Homework, HomeworkApiError> {
    let object_id = parse_id(homework_id, "homework")?;
    let homework_collection = state.mongo.collection::<Homework>("homework");
    homework_collection
        .find_one(doc! { "_id": object_id })
        .await
        .map_err(|err| HomeworkApiError::internal(format!("Failed to query homework: {}", err)))?
        .ok_or_else(|| HomeworkApiError::not_found("Homework not found"))
}

fn ensure_homework_ownership(
    claims: &JwtClaims,
    homework: &Homework,
) -> Result<(), HomeworkApiError> {
    if claims.role == "admin" {
        return Ok(());
    }
    if claims.role == "teacher" && homework.created_by.to_hex() == claims.sub {
        return Ok(());
    }
    Err(HomeworkApiError::forbidden(
        "Only the assigning teacher can manage this homework",
    ))
}

/// Classes the student belongs to, from the roster side (the user
/// document's class_ids mirror can lag behind roster edits)
async fn student_class_ids(
    state: &AppState,
    student_id: ObjectId,
) -> Result<Vec<ObjectId>, HomeworkApiError> {
    let classes_collection = state.mongo.collection::<Document>("classes");
    let mut cursor = classes_collection
        .find(doc! { "student_ids": student_id })
        .await
        .map_err(|err| HomeworkApiError::internal(format!("Failed to query classes: {}", err)))?;

    let mut ids = Vec::new();
    while let Some(class_doc) = cursor
        .try_next()
        .await
        .map_err(|err| HomeworkApiError::internal(format!("Class cursor error: {}", err)))?
    {
        if let Ok(id) = class_doc.get_object_id("_id") {
            ids.push(id);
        }
    }
    Ok(ids)
}
