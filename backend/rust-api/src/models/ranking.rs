use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

use super::user::bson_datetime_as_chrono;

/// Precomputed leaderboard stored in MongoDB "leaderboards" collection,
/// one document per (period, scope). Clients are read-only views of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardDocument {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    pub period: PeriodType,

    /// None for the global leaderboard, Some for a per-class one
    #[serde(rename = "classId", default, skip_serializing_if = "Option::is_none")]
    pub class_id: Option<ObjectId>,

    /// Ordered by rank ascending; the order is part of the contract
    pub entries: Vec<LeaderboardEntry>,

    #[serde(rename = "generatedAt", with = "bson_datetime_as_chrono")]
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PeriodType {
    Weekly,
    Monthly,
    AllTime,
}

impl PeriodType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodType::Weekly => "weekly",
            PeriodType::Monthly => "monthly",
            PeriodType::AllTime => "all_time",
        }
    }

    pub fn parse(value: &str) -> Option<PeriodType> {
        match value {
            "weekly" => Some(PeriodType::Weekly),
            "monthly" => Some(PeriodType::Monthly),
            "all_time" | "alltime" => Some(PeriodType::AllTime),
            _ => None,
        }
    }

    /// Start of the scoring window; None means unbounded
    pub fn window_start(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            PeriodType::Weekly => Some(now - chrono::Duration::days(7)),
            PeriodType::Monthly => Some(now - chrono::Duration::days(30)),
            PeriodType::AllTime => None,
        }
    }

    pub fn all() -> [PeriodType; 3] {
        [PeriodType::Weekly, PeriodType::Monthly, PeriodType::AllTime]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    #[serde(rename = "studentId")]
    pub student_id: ObjectId,

    pub name: String,

    pub points: i64,

    /// 1-based position, dense over the entries
    pub rank: u32,

    pub trend: Trend,

    /// Share of ranked students at or below this entry, 0-100
    pub percentile: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Up,
    Down,
    Same,
    New,
}

/// The caller's own standing for a period
#[derive(Debug, Serialize)]
pub struct PersonalRanking {
    pub period: PeriodType,
    pub points: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percentile: Option<u32>,
    pub ranked_students: usize,
}

/// Query params for the leaderboard endpoints
#[derive(Debug, Deserialize)]
pub struct LeaderboardQuery {
    pub period: Option<String>,
    pub class_id: Option<String>,
}

/// Response for a manual recalculation trigger
#[derive(Debug, Serialize)]
pub struct RecalculateResponse {
    pub leaderboards_generated: usize,
    pub generated_at: DateTime<Utc>,
}

/// Trend of `rank` against the previous published document for the same
/// (period, scope). Students absent from the previous document are New.
pub fn derive_trend(previous_rank: Option<u32>, current_rank: u32) -> Trend {
    match previous_rank {
        None => Trend::New,
        Some(prev) if current_rank < prev => Trend::Up,
        Some(prev) if current_rank > prev => Trend::Down,
        Some(_) => Trend::Same,
    }
}

/// Percentile of a 1-based rank among `total` ranked students, 0-100.
pub fn percentile_for_rank(rank: u32, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    let below_or_at = total as u32 - (rank - 1).min(total as u32);
    ((f64::from(below_or_at) / total as f64) * 100.0).round() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trend_against_previous_document() {
        assert_eq!(derive_trend(None, 3), Trend::New);
        assert_eq!(derive_trend(Some(5), 3), Trend::Up);
        assert_eq!(derive_trend(Some(2), 3), Trend::Down);
        assert_eq!(derive_trend(Some(3), 3), Trend::Same);
    }

    #[test]
    fn percentile_spans_full_range() {
        assert_eq!(percentile_for_rank(1, 10), 100);
        assert_eq!(percentile_for_rank(10, 10), 10);
        assert_eq!(percentile_for_rank(1, 1), 100);
        assert_eq!(percentile_for_rank(1, 0), 0);
    }

    #[test]
    fn period_window_bounds() {
        let now = Utc::now();
        assert_eq!(
            PeriodType::Weekly.window_start(now),
            Some(now - chrono::Duration::days(7))
        );
        assert_eq!(
            PeriodType::Monthly.window_start(now),
            Some(now - chrono::Duration::days(30))
        );
        assert_eq!(PeriodType::AllTime.window_start(now), None);
    }

    #[test]
    fn period_parse_round_trip() {
        for period in PeriodType::all() {
            assert_eq!(PeriodType::parse(period.as_str()), Some(period));
        }
        assert_eq!(PeriodType::parse("daily"), None);
    }
}
