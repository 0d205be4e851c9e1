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
    models::flashcard::{
        CreateFlashcardRequest, Flashcard, FlashcardView, ListFlashcardsQuery, ReviewBatchQuery,
        ReviewRequest, UpdateFlashcardRequest,
    },
    services::{flashcard_service::FlashcardService, AppState},
};

fn owner_id(claims: &JwtClaims) -> Result<ObjectId, (StatusCode, String)> {
    ObjectId::parse_str(&claims.sub)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

/// GET /api/flashcards/ - Own cards with filters
pub async fn list_flashcards(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Query(query): Query<ListFlashcardsQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let owner = owner_id(&claims)?;

    let mut filter = doc! { "ownerId": owner };
    if let Some(difficulty) = &query.difficulty {
        filter.insert("difficulty", difficulty);
    }
    if let Some(search) = &query.search {
        filter.insert("word", doc! { "$regex": search, "$options": "i" });
    }

    let limit = query.limit.unwrap_or(100).min(500) as i64;
    let offset = query.offset.unwrap_or(0) as u64;

    let collection = state.mongo.collection::<Flashcard>("flashcards");
    let mut cursor = collection
        .find(filter)
        .sort(doc! { "createdAt": -1 })
        .limit(limit)
        .skip(offset)
        .await
        .map_err(|e| {
            tracing::error!("Failed to query flashcards: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;

    let mut cards = Vec::new();
    while let Some(card) = cursor.try_next().await.map_err(|e| {
        tracing::error!("Failed to read flashcard from cursor: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })? {
        cards.push(FlashcardView::from(card));
    }

    Ok(Json(cards))
}

/// POST /api/flashcards/ - Create a card
pub async fn create_flashcard(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    AppJson(req): AppJson<CreateFlashcardRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    if let Err(e) = req.validate() {
        return Err((StatusCode::BAD_REQUEST, format!("Validation error: {}", e)));
    }

    let owner = owner_id(&claims)?;

    let card = Flashcard {
        id: None,
        word: req.word,
        definition: req.definition,
        part_of_speech: req.part_of_speech,
        difficulty: req.difficulty.unwrap_or_default(),
        example_sentence: req.example_sentence,
        owner_id: owner,
        times_reviewed: 0,
        last_reviewed_at: None,
        created_at: Utc::now(),
    };

    let collection = state.mongo.collection::<Flashcard>("flashcards");
    let insert_result = collection.insert_one(&card).await.map_err(|e| {
        tracing::error!("Failed to create flashcard: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;

    let mut created = card;
    created.id = insert_result.inserted_id.as_object_id();

    Ok((StatusCode::CREATED, Json(FlashcardView::from(created))))
}

/// GET /api/flashcards/review - A shuffled batch for a review round
pub async fn review_batch(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Query(query): Query<ReviewBatchQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let owner = owner_id(&claims)?;

    let service = FlashcardService::new(state.mongo.clone());
    let cards = service
        .review_batch(owner, query.count)
        .await
        .map_err(|e| {
            tracing::error!("Failed to build review batch: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;

    let views: Vec<FlashcardView> = cards.into_iter().map(FlashcardView::from).collect();
    Ok(Json(views))
}

/// GET /api/flashcards/{id}
pub async fn get_flashcard(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(card_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let card = load_owned_card(&state, &claims, &card_id).await?;
    Ok(Json(FlashcardView::from(card)))
}

/// PATCH /api/flashcards/{id}
pub async fn update_flashcard(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(card_id): Path<String>,
    AppJson(req): AppJson<UpdateFlashcardRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    if let Err(e) = req.validate() {
        return Err((StatusCode::BAD_REQUEST, format!("Validation error: {}", e)));
    }

    // Ownership check before touching anything
    let card = load_owned_card(&state, &claims, &card_id).await?;
    let object_id = card
        .id
        .ok_or_else(|| (StatusCode::INTERNAL_SERVER_ERROR, "Card missing id".to_string()))?;

    let mut update_fields = Document::new();
    if let Some(word) = &req.word {
        update_fields.insert("word", word);
    }
    if let Some(definition) = &req.definition {
        update_fields.insert("definition", definition);
    }
    if let Some(part_of_speech) = &req.part_of_speech {
        update_fields.insert("part_of_speech", part_of_speech);
    }
    if let Some(difficulty) = &req.difficulty {
        update_fields.insert("difficulty", difficulty.as_str());
    }
    if let Some(example) = &req.example_sentence {
        update_fields.insert("example_sentence", example);
    }

    if update_fields.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "No fields to update".to_string()));
    }

    let collection = state.mongo.collection::<Flashcard>("flashcards");
    collection
        .update_one(doc! { "_id": object_id }, doc! { "$set": update_fields })
        .await
        .map_err(|e| {
            tracing::error!("Failed to update flashcard: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;

    let updated = load_owned_card(&state, &claims, &card_id).await?;
    Ok(Json(FlashcardView::from(updated)))
}

/// DELETE /api/flashcards/{id}
pub async fn delete_flashcard(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(card_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let card = load_owned_card(&state, &claims, &card_id).await?;
    let object_id = card
        .id
        .ok_or_else(|| (StatusCode::INTERNAL_SERVER_ERROR, "Card missing id".to_string()))?;

    let collection = state.mongo.collection::<Flashcard>("flashcards");
    collection
        .delete_one(doc! { "_id": object_id })
        .await
        .map_err(|e| {
            tracing::error!("Failed to delete flashcard: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;

    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/flashcards/{id}/review - Record a review outcome
pub async fn review_flashcard(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(card_id): Path<String>,
    AppJson(req): AppJson<ReviewRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let owner = owner_id(&claims)?;
    let object_id = ObjectId::parse_str(&card_id)
        .map_err(|_| (StatusCode::BAD_REQUEST, "Invalid flashcard ID".to_string()))?;

    let service = FlashcardService::new(state.mongo.clone());
    match service.record_review(object_id, owner, req.outcome).await {
        Ok(card) => Ok(Json(FlashcardView::from(card))),
        Err(e) => {
            let msg = e.to_string();
            if msg.contains("not found") {
                Err((StatusCode::NOT_FOUND, msg))
            } else {
                tracing::error!("Failed to record review: {}", msg);
                Err((StatusCode::INTERNAL_SERVER_ERROR, msg))
            }
        }
    }
}

/// Cards are private: a card owned by someone else is indistinguishable
/// from a missing one.
async fn load_owned_card(
    state: &AppState,
    claims: &JwtClaims,
    card_id: &str,
) -> Result<Flashcard, (StatusCode, String)> {
    let owner = owner_id(claims)?;
    let object_id = ObjectId::parse_str(card_id)
        .map_err(|_| (StatusCode::BAD_REQUEST, "Invalid flashcard ID".to_string()))?;

    let collection = state.mongo.collection::<Flashcard>("flashcards");
    collection
        .find_one(doc! { "_id": object_id, "ownerId": owner })
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .ok_or_else(|| (StatusCode::NOT_FOUND, "Flashcard not found".to_string()))
}
