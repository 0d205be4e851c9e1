use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
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
    models::question::{
        CreateQuestionRequest, ListQuestionsQuery, Question, QuestionView, UpdateQuestionRequest,
    },
    services::AppState,
};

/// GET /api/questionbank/ - List questions with filters.
/// Staff get full records; students get the redacted projection.
pub async fn list_questions(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Query(query): Query<ListQuestionsQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let mut filter = Document::new();

    if let Some(section) = &query.section {
        filter.insert("section", section);
    }
    if let Some(difficulty) = &query.difficulty {
        filter.insert("difficulty", difficulty);
    }
    if let Some(qtype) = &query.qtype {
        filter.insert("type", qtype);
    }
    if let Some(search) = &query.search {
        filter.insert("text", doc! { "$regex": search, "$options": "i" });
    }

    let limit = query.limit.unwrap_or(50).min(100) as i64;
    let offset = query.offset.unwrap_or(0) as u64;

    let questions_collection = state.mongo.collection::<Question>("questions");
    let mut cursor = questions_collection
        .find(filter)
        .limit(limit)
        .skip(offset)
        .await
        .map_err(|e| {
            tracing::error!("Failed to query questions: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;

    let mut questions = Vec::new();
    while let Some(question) = cursor.try_next().await.map_err(|e| {
        tracing::error!("Failed to read question from cursor: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })? {
        questions.push(question);
    }

    if claims.is_staff() {
        Ok(Json(serde_json::json!(questions)))
    } else {
        let views: Vec<QuestionView> = questions.into_iter().map(QuestionView::from).collect();
        Ok(Json(serde_json::json!(views)))
    }
}

/// POST /api/questionbank/ - Create a question (teacher/admin only)
pub async fn create_question(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    AppJson(req): AppJson<CreateQuestionRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    if !claims.is_staff() {
        return Err((
            StatusCode::FORBIDDEN,
            "Teacher role required to create questions".to_string(),
        ));
    }

    if let Err(e) = req.validate() {
        return Err((StatusCode::BAD_REQUEST, format!("Validation error: {}", e)));
    }
    if let Err(e) = req.check_consistency() {
        return Err((StatusCode::BAD_REQUEST, e));
    }

    let created_by = ObjectId::parse_str(&claims.sub)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let question = Question {
        id: None,
        text: req.text,
        qtype: req.qtype,
        options: req.options,
        correct_answer: req.correct_answer,
        section: req.section,
        difficulty: req.difficulty,
        explanation: req.explanation,
        created_by,
        created_at: Utc::now(),
    };

    let questions_collection = state.mongo.collection::<Question>("questions");
    let insert_result = questions_collection
        .insert_one(&question)
        .await
        .map_err(|e| {
            tracing::error!("Failed to create question: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;

    let mut created = question;
    created.id = insert_result.inserted_id.as_object_id();

    tracing::info!(
        question_id = ?created.id.map(|id| id.to_hex()),
        "Question created"
    );

    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /api/questionbank/{id}
pub async fn get_question(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(question_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let question = load_question(&state, &question_id).await?;

    if claims.is_staff() {
        Ok(Json(serde_json::json!(question)))
    } else {
        Ok(Json(serde_json::json!(QuestionView::from(question))))
    }
}

/// PATCH /api/questionbank/{id} - Update a question (teacher/admin only)
pub async fn update_question(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(question_id): Path<String>,
    AppJson(req): AppJson<UpdateQuestionRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    if !claims.is_staff() {
        return Err((
            StatusCode::FORBIDDEN,
            "Teacher role required to update questions".to_string(),
        ));
    }

    if let Err(e) = req.validate() {
        return Err((StatusCode::BAD_REQUEST, format!("Validation error: {}", e)));
    }

    let object_id = ObjectId::parse_str(&question_id)
        .map_err(|_| (StatusCode::BAD_REQUEST, "Invalid question ID".to_string()))?;

    let mut update_fields = Document::new();
    if let Some(text) = &req.text {
        update_fields.insert("text", text);
    }
    if let Some(options) = &req.options {
        update_fields.insert("options", options);
    }
    if let Some(correct_answer) = &req.correct_answer {
        update_fields.insert("correct_answer", correct_answer);
    }
    if let Some(difficulty) = &req.difficulty {
        update_fields.insert(
            "difficulty",
            mongodb::bson::to_bson(difficulty)
                .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?,
        );
    }
    if let Some(explanation) = &req.explanation {
        update_fields.insert("explanation", explanation);
    }

    if update_fields.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "No fields to update".to_string()));
    }

    let questions_collection = state.mongo.collection::<Question>("questions");
    let result = questions_collection
        .update_one(doc! { "_id": object_id }, doc! { "$set": update_fields })
        .await
        .map_err(|e| {
            tracing::error!("Failed to update question: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;

    if result.matched_count == 0 {
        return Err((StatusCode::NOT_FOUND, "Question not found".to_string()));
    }

    let updated = load_question(&state, &question_id).await?;
    Ok(Json(updated))
}

/// DELETE /api/questionbank/{id} - Delete a question (teacher/admin only)
pub async fn delete_question(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(question_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    if !claims.is_staff() {
        return Err((
            StatusCode::FORBIDDEN,
            "Teacher role required to delete questions".to_string(),
        ));
    }

    let object_id = ObjectId::parse_str(&question_id)
        .map_err(|_| (StatusCode::BAD_REQUEST, "Invalid question ID".to_string()))?;

    let questions_collection = state.mongo.collection::<Question>("questions");
    let result = questions_collection
        .delete_one(doc! { "_id": object_id })
        .await
        .map_err(|e| {
            tracing::error!("Failed to delete question: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;

    if result.deleted_count == 0 {
        return Err((StatusCode::NOT_FOUND, "Question not found".to_string()));
    }

    tracing::info!(question_id = %question_id, "Question deleted");

    Ok(StatusCode::NO_CONTENT)
}

async fn load_question(
    state: &AppState,
    question_id: &str,
) -> Result<Question, (StatusCode, String)> {
    let object_id = ObjectId::parse_str(question_id)
        .map_err(|_| (StatusCode::BAD_REQUEST, "Invalid question ID".to_string()))?;

    let questions_collection = state.mongo.collection::<Question>("questions");
    questions_collection
        .find_one(doc! { "_id": object_id })
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .ok_or_else(|| (StatusCode::NOT_FOUND, "Question not found".to_string()))
}
