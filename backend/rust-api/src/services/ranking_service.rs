use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::Utc;
use futures::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, Bson, Document};
use mongodb::Database;

use crate::metrics::RANKINGS_REBUILDS_TOTAL;
use crate::models::ranking::{
    derive_trend, percentile_for_rank, LeaderboardDocument, LeaderboardEntry, PeriodType,
    PersonalRanking,
};

/// Completed exam totals (400-1600) are scaled down so one exam weighs
/// like a very good homework, not like twelve of them.
const EXAM_POINTS_DIVISOR: i64 = 10;

/// Sanitize user names to prevent CSV injection and limit special characters
/// - Filters out dangerous characters
/// - Limits length to 100 characters
/// - Allows only alphanumeric, whitespace, and safe punctuation (-, _, .)
fn sanitize_student_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || "-_.".contains(*c))
        .take(100)
        .collect()
}

pub struct RankingService {
    mongo: Database,
}

impl RankingService {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    pub fn mongo(&self) -> Database {
        self.mongo.clone()
    }

    /// Recompute every leaderboard: the global document plus one per
    /// class, for all three periods. Returns how many documents were
    /// written. `trigger` labels the rebuild metric ("manual"/"worker").
    pub async fn recompute_all(&self, trigger: &str) -> Result<usize> {
        let classes = self.load_class_rosters().await?;
        let mut generated = 0;

        for period in PeriodType::all() {
            let points = self.collect_points(period).await?;
            let names = self.load_student_names(&points).await?;

            let global_entries = self.build_entries(period, None, &points, &names).await?;
            self.upsert_leaderboard(period, None, global_entries)
                .await?;
            generated += 1;

            for (class_id, student_ids) in &classes {
                let class_points: HashMap<ObjectId, i64> = points
                    .iter()
                    .filter(|(student_id, _)| student_ids.contains(student_id))
                    .map(|(id, pts)| (*id, *pts))
                    .collect();

                let entries = self
                    .build_entries(period, Some(*class_id), &class_points, &names)
                    .await?;
                self.upsert_leaderboard(period, Some(*class_id), entries)
                    .await?;
                generated += 1;
            }
        }

        RANKINGS_REBUILDS_TOTAL.with_label_values(&[trigger]).inc();
        tracing::info!(trigger, generated, "Leaderboards recomputed");

        Ok(generated)
    }

    /// Points per student for a period: homework final scores plus scaled
    /// exam totals, both windowed on their completion timestamps.
    async fn collect_points(&self, period: PeriodType) -> Result<HashMap<ObjectId, i64>> {
        let window_start = period.window_start(Utc::now());
        let mut points: HashMap<ObjectId, i64> = HashMap::new();

        // Homework: override wins over the computed score
        let mut match_stage = Document::new();
        if let Some(start) = window_start {
            match_stage.insert(
                "submittedAt",
                doc! { "$gte": mongodb::bson::DateTime::from_millis(start.timestamp_millis()) },
            );
        }

        let mut pipeline = Vec::new();
        if !match_stage.is_empty() {
            pipeline.push(doc! { "$match": match_stage });
        }
        pipeline.push(doc! {
            "$group": {
                "_id": "$studentId",
                "points": { "$sum": { "$ifNull": ["$score_override", "$auto_score"] } }
            }
        });

        let submissions = self.mongo.collection::<Document>("submissions");
        let mut cursor = submissions
            .aggregate(pipeline)
            .await
            .context("Failed to aggregate homework points")?;

        while let Some(row) = cursor.try_next().await? {
            if let Ok(student_id) = row.get_object_id("_id") {
                let score = row
                    .get_i64("points")
                    .or_else(|_| row.get_i32("points").map(i64::from))
                    .unwrap_or(0);
                *points.entry(student_id).or_insert(0) += score;
            }
        }

        // Completed exam attempts
        let mut match_stage = doc! { "status": "completed" };
        if let Some(start) = window_start {
            match_stage.insert(
                "completedAt",
                doc! { "$gte": mongodb::bson::DateTime::from_millis(start.timestamp_millis()) },
            );
        }

        let attempts = self.mongo.collection::<Document>("exam_attempts");
        let mut cursor = attempts
            .aggregate(vec![
                doc! { "$match": match_stage },
                doc! {
                    "$group": {
                        "_id": "$studentId",
                        "points": { "$sum": "$scores.total" }
                    }
                },
            ])
            .await
            .context("Failed to aggregate exam points")?;

        while let Some(row) = cursor.try_next().await? {
            if let Ok(student_id) = row.get_object_id("_id") {
                let score = row
                    .get_i64("points")
                    .or_else(|_| row.get_i32("points").map(i64::from))
                    .unwrap_or(0);
                *points.entry(student_id).or_insert(0) += score / EXAM_POINTS_DIVISOR;
            }
        }

        Ok(points)
    }

    /// Rank students by points descending. Order ties by name so two runs
    /// over the same data produce the same document.
    async fn build_entries(
        &self,
        period: PeriodType,
        class_id: Option<ObjectId>,
        points: &HashMap<ObjectId, i64>,
        names: &HashMap<ObjectId, String>,
    ) -> Result<Vec<LeaderboardEntry>> {
        let previous = self.load_leaderboard(period, class_id).await?;
        let previous_ranks: HashMap<ObjectId, u32> = previous
            .map(|doc| {
                doc.entries
                    .iter()
                    .map(|entry| (entry.student_id, entry.rank))
                    .collect()
            })
            .unwrap_or_default();

        let mut rows: Vec<(ObjectId, i64, String)> = points
            .iter()
            .map(|(student_id, pts)| {
                let name = names
                    .get(student_id)
                    .cloned()
                    .unwrap_or_else(|| "Unknown".to_string());
                (*student_id, *pts, name)
            })
            .collect();

        rows.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.2.cmp(&b.2)));

        let total = rows.len();
        let entries = rows
            .into_iter()
            .enumerate()
            .map(|(idx, (student_id, pts, name))| {
                let rank = (idx + 1) as u32;
                LeaderboardEntry {
                    student_id,
                    name,
                    points: pts,
                    rank,
                    trend: derive_trend(previous_ranks.get(&student_id).copied(), rank),
                    percentile: percentile_for_rank(rank, total),
                }
            })
            .collect();

        Ok(entries)
    }

    async fn upsert_leaderboard(
        &self,
        period: PeriodType,
        class_id: Option<ObjectId>,
        entries: Vec<LeaderboardEntry>,
    ) -> Result<()> {
        let document = LeaderboardDocument {
            id: None,
            period,
            class_id,
            entries,
            generated_at: Utc::now(),
        };

        let mut filter = doc! { "period": period.as_str() };
        match class_id {
            Some(id) => filter.insert("classId", id),
            None => filter.insert("classId", Bson::Null),
        };

        let collection = self.mongo.collection::<LeaderboardDocument>("leaderboards");
        collection
            .replace_one(filter, &document)
            .with_options(
                mongodb::options::ReplaceOptions::builder()
                    .upsert(true)
                    .build(),
            )
            .await
            .context("Failed to upsert leaderboard")?;

        Ok(())
    }

    pub async fn load_leaderboard(
        &self,
        period: PeriodType,
        class_id: Option<ObjectId>,
    ) -> Result<Option<LeaderboardDocument>> {
        let mut filter = doc! { "period": period.as_str() };
        match class_id {
            Some(id) => filter.insert("classId", id),
            None => filter.insert("classId", Bson::Null),
        };

        let collection = self.mongo.collection::<LeaderboardDocument>("leaderboards");
        collection
            .find_one(filter)
            .await
            .context("Failed to query leaderboard")
    }

    /// The caller's own standing, read from the global document for the
    /// period. Unranked students get their bare point count.
    pub async fn personal_ranking(
        &self,
        period: PeriodType,
        student_id: ObjectId,
    ) -> Result<PersonalRanking> {
        let document = self.load_leaderboard(period, None).await?;

        let (entry, total) = document
            .map(|doc| {
                let total = doc.entries.len();
                let entry = doc
                    .entries
                    .into_iter()
                    .find(|entry| entry.student_id == student_id);
                (entry, total)
            })
            .unwrap_or((None, 0));

        Ok(match entry {
            Some(entry) => PersonalRanking {
                period,
                points: entry.points,
                rank: Some(entry.rank),
                percentile: Some(entry.percentile),
                ranked_students: total,
            },
            None => PersonalRanking {
                period,
                points: 0,
                rank: None,
                percentile: None,
                ranked_students: total,
            },
        })
    }

    async fn load_class_rosters(&self) -> Result<Vec<(ObjectId, Vec<ObjectId>)>> {
        let classes = self.mongo.collection::<Document>("classes");
        let mut cursor = classes
            .find(doc! {})
            .await
            .context("Failed to query classes")?;

        let mut rosters = Vec::new();
        while let Some(class_doc) = cursor.try_next().await? {
            let Ok(class_id) = class_doc.get_object_id("_id") else {
                continue;
            };
            let student_ids = class_doc
                .get_array("student_ids")
                .map(|array| {
                    array
                        .iter()
                        .filter_map(|value| value.as_object_id())
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();

            if !student_ids.is_empty() {
                rosters.push((class_id, student_ids));
            }
        }

        Ok(rosters)
    }

    async fn load_student_names(
        &self,
        points: &HashMap<ObjectId, i64>,
    ) -> Result<HashMap<ObjectId, String>> {
        if points.is_empty() {
            return Ok(HashMap::new());
        }

        let user_ids: Vec<ObjectId> = points.keys().copied().collect();
        let users = self.mongo.collection::<Document>("users");
        let mut cursor = users
            .find(doc! { "_id": { "$in": user_ids } })
            .await
            .context("Failed to query users for leaderboard")?;

        let mut names = HashMap::new();
        while let Some(user_doc) = cursor.try_next().await? {
            if let Ok(user_id) = user_doc.get_object_id("_id") {
                if let Ok(name) = user_doc.get_str("name") {
                    names.insert(user_id, sanitize_student_name(name));
                }
            }
        }

        Ok(names)
    }
}

/// Entries sorted for the client; the rendered order must match `rank`
/// ascending, so the document is stored that way.
pub fn entries_sorted_by_rank(entries: &[LeaderboardEntry]) -> bool {
    entries.windows(2).all(|pair| pair[0].rank <= pair[1].rank)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ranking::Trend;

    #[test]
    fn test_sanitize_student_name_normal() {
        assert_eq!(sanitize_student_name("John Doe"), "John Doe");
        assert_eq!(sanitize_student_name("Anna-Maria"), "Anna-Maria");
        assert_eq!(sanitize_student_name("user_123"), "user_123");
    }

    #[test]
    fn test_sanitize_student_name_special_chars() {
        // CSV injection attempts should be stripped
        assert_eq!(sanitize_student_name("=1+1"), "11");
        assert_eq!(sanitize_student_name("+cmd"), "cmd");
        assert_eq!(sanitize_student_name("@SUM(A1)"), "SUMA1");
    }

    #[test]
    fn test_sanitize_student_name_length_limit() {
        let long_name = "a".repeat(150);
        let sanitized = sanitize_student_name(&long_name);
        assert_eq!(sanitized.len(), 100);
    }

    #[test]
    fn test_sanitize_student_name_unicode() {
        assert_eq!(sanitize_student_name("José García"), "José García");
        assert_eq!(sanitize_student_name("李明"), "李明");
    }

    fn entry(rank: u32, points: i64) -> LeaderboardEntry {
        LeaderboardEntry {
            student_id: ObjectId::new(),
            name: "Student".to_string(),
            points,
            rank,
            trend: Trend::New,
            percentile: 50,
        }
    }

    #[test]
    fn sorted_by_rank_detects_order() {
        assert!(entries_sorted_by_rank(&[
            entry(1, 300),
            entry(2, 200),
            entry(3, 100)
        ]));
        assert!(!entries_sorted_by_rank(&[entry(2, 200), entry(1, 300)]));
        assert!(entries_sorted_by_rank(&[]));
    }
}
