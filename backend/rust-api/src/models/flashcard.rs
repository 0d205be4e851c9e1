use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::user::{bson_datetime_as_chrono, bson_datetime_as_chrono_option};

/// Vocabulary flashcard stored in MongoDB "flashcards" collection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flashcard {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    pub word: String,

    pub definition: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part_of_speech: Option<String>,

    pub difficulty: CardDifficulty,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example_sentence: Option<String>,

    #[serde(rename = "ownerId")]
    pub owner_id: ObjectId,

    #[serde(default)]
    pub times_reviewed: u32,

    #[serde(
        rename = "lastReviewedAt",
        default,
        skip_serializing_if = "Option::is_none",
        with = "bson_datetime_as_chrono_option"
    )]
    pub last_reviewed_at: Option<DateTime<Utc>>,

    #[serde(rename = "createdAt", with = "bson_datetime_as_chrono")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CardDifficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl CardDifficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            CardDifficulty::Easy => "easy",
            CardDifficulty::Medium => "medium",
            CardDifficulty::Hard => "hard",
        }
    }

    /// Review outcomes nudge difficulty one step at a time: a missed card
    /// drifts toward Hard, an easy recall drifts toward Easy.
    pub fn apply_review(self, outcome: ReviewOutcome) -> CardDifficulty {
        match (self, outcome) {
            (CardDifficulty::Easy, ReviewOutcome::Again) => CardDifficulty::Medium,
            (CardDifficulty::Medium, ReviewOutcome::Again) => CardDifficulty::Hard,
            (CardDifficulty::Hard, ReviewOutcome::Again) => CardDifficulty::Hard,
            (CardDifficulty::Easy, ReviewOutcome::Easy) => CardDifficulty::Easy,
            (CardDifficulty::Medium, ReviewOutcome::Easy) => CardDifficulty::Easy,
            (CardDifficulty::Hard, ReviewOutcome::Easy) => CardDifficulty::Medium,
            (current, ReviewOutcome::Good) => current,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReviewOutcome {
    Again,
    Good,
    Easy,
}

/// Card as returned to clients
#[derive(Debug, Serialize)]
pub struct FlashcardView {
    pub id: String,
    pub word: String,
    pub definition: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub part_of_speech: Option<String>,
    pub difficulty: CardDifficulty,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub example_sentence: Option<String>,
    pub times_reviewed: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_reviewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<Flashcard> for FlashcardView {
    fn from(card: Flashcard) -> Self {
        FlashcardView {
            id: card.id.map(|id| id.to_hex()).unwrap_or_default(),
            word: card.word,
            definition: card.definition,
            part_of_speech: card.part_of_speech,
            difficulty: card.difficulty,
            example_sentence: card.example_sentence,
            times_reviewed: card.times_reviewed,
            last_reviewed_at: card.last_reviewed_at,
            created_at: card.created_at,
        }
    }
}

/// Request to create a flashcard
#[derive(Debug, Deserialize, Validate)]
pub struct CreateFlashcardRequest {
    #[validate(length(
        min = 1,
        max = 100,
        message = "Word must be between 1 and 100 characters"
    ))]
    pub word: String,

    #[validate(length(
        min = 1,
        max = 2000,
        message = "Definition must be between 1 and 2000 characters"
    ))]
    pub definition: String,

    #[validate(length(max = 50, message = "Part of speech must be at most 50 characters"))]
    pub part_of_speech: Option<String>,

    pub difficulty: Option<CardDifficulty>,

    #[validate(length(max = 1000, message = "Example must be at most 1000 characters"))]
    pub example_sentence: Option<String>,
}

/// Request to update a flashcard
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateFlashcardRequest {
    #[validate(length(
        min = 1,
        max = 100,
        message = "Word must be between 1 and 100 characters"
    ))]
    pub word: Option<String>,

    #[validate(length(
        min = 1,
        max = 2000,
        message = "Definition must be between 1 and 2000 characters"
    ))]
    pub definition: Option<String>,

    pub part_of_speech: Option<String>,

    pub difficulty: Option<CardDifficulty>,

    pub example_sentence: Option<String>,
}

/// Request to record a review outcome
#[derive(Debug, Deserialize)]
pub struct ReviewRequest {
    pub outcome: ReviewOutcome,
}

/// Query params for listing flashcards
#[derive(Debug, Deserialize)]
pub struct ListFlashcardsQuery {
    pub difficulty: Option<String>,
    /// Substring search on the word
    pub search: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// Query params for the review batch
#[derive(Debug, Deserialize)]
pub struct ReviewBatchQuery {
    pub count: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn again_drifts_toward_hard() {
        assert_eq!(
            CardDifficulty::Easy.apply_review(ReviewOutcome::Again),
            CardDifficulty::Medium
        );
        assert_eq!(
            CardDifficulty::Medium.apply_review(ReviewOutcome::Again),
            CardDifficulty::Hard
        );
        assert_eq!(
            CardDifficulty::Hard.apply_review(ReviewOutcome::Again),
            CardDifficulty::Hard
        );
    }

    #[test]
    fn easy_drifts_toward_easy() {
        assert_eq!(
            CardDifficulty::Hard.apply_review(ReviewOutcome::Easy),
            CardDifficulty::Medium
        );
        assert_eq!(
            CardDifficulty::Medium.apply_review(ReviewOutcome::Easy),
            CardDifficulty::Easy
        );
        assert_eq!(
            CardDifficulty::Easy.apply_review(ReviewOutcome::Easy),
            CardDifficulty::Easy
        );
    }

    #[test]
    fn good_keeps_difficulty() {
        for difficulty in [
            CardDifficulty::Easy,
            CardDifficulty::Medium,
            CardDifficulty::Hard,
        ] {
            assert_eq!(difficulty.apply_review(ReviewOutcome::Good), difficulty);
        }
    }
}
