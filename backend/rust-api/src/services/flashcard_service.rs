use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use futures::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId};
use mongodb::Database;
use rand::seq::SliceRandom;

use crate::metrics::FLASHCARD_REVIEWS_TOTAL;
use crate::models::flashcard::{CardDifficulty, Flashcard, ReviewOutcome};

const DEFAULT_REVIEW_BATCH: usize = 10;
const MAX_REVIEW_BATCH: usize = 50;

pub struct FlashcardService {
    mongo: Database,
}

impl FlashcardService {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    /// A shuffled batch of the owner's cards for a review round. Hard
    /// cards come first so the batch cap trims the easy end, then the
    /// kept set is shuffled so the round itself is unordered.
    pub async fn review_batch(
        &self,
        owner_id: ObjectId,
        count: Option<u32>,
    ) -> Result<Vec<Flashcard>> {
        let collection = self.mongo.collection::<Flashcard>("flashcards");
        let cursor = collection
            .find(doc! { "ownerId": owner_id })
            .await
            .context("Failed to query flashcards")?;

        let mut cards: Vec<Flashcard> = cursor
            .try_collect()
            .await
            .context("Failed to read flashcards")?;

        let batch_size = count
            .map(|c| c as usize)
            .unwrap_or(DEFAULT_REVIEW_BATCH)
            .clamp(1, MAX_REVIEW_BATCH);

        let mut rng = rand::rng();
        cards.shuffle(&mut rng);
        cards.sort_by_key(|card| match card.difficulty {
            CardDifficulty::Hard => 0,
            CardDifficulty::Medium => 1,
            CardDifficulty::Easy => 2,
        });
        cards.truncate(batch_size);
        cards.shuffle(&mut rng);

        Ok(cards)
    }

    /// Record a review outcome: difficulty drifts one step, counters and
    /// the last-reviewed timestamp move forward.
    pub async fn record_review(
        &self,
        card_id: ObjectId,
        owner_id: ObjectId,
        outcome: ReviewOutcome,
    ) -> Result<Flashcard> {
        let collection = self.mongo.collection::<Flashcard>("flashcards");

        let card = collection
            .find_one(doc! { "_id": card_id, "ownerId": owner_id })
            .await
            .context("Failed to query flashcard")?
            .ok_or_else(|| anyhow!("Flashcard not found"))?;

        let new_difficulty = card.difficulty.apply_review(outcome);

        collection
            .update_one(
                doc! { "_id": card_id, "ownerId": owner_id },
                doc! {
                    "$set": {
                        "difficulty": new_difficulty.as_str(),
                        "lastReviewedAt": mongodb::bson::DateTime::now(),
                    },
                    "$inc": { "times_reviewed": 1 }
                },
            )
            .await
            .context("Failed to record review")?;

        let outcome_label = match outcome {
            ReviewOutcome::Again => "again",
            ReviewOutcome::Good => "good",
            ReviewOutcome::Easy => "easy",
        };
        FLASHCARD_REVIEWS_TOTAL
            .with_label_values(&[outcome_label])
            .inc();

        tracing::debug!(
            card_id = %card_id.to_hex(),
            outcome = outcome_label,
            "Flashcard review recorded"
        );

        let mut updated = card;
        updated.difficulty = new_difficulty;
        updated.times_reviewed += 1;
        updated.last_reviewed_at = Some(Utc::now());
        Ok(updated)
    }
}
