use std::collections::HashMap;

use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

use super::question::{QuestionView, Section};
use super::user::{bson_datetime_as_chrono, bson_datetime_as_chrono_option};

/// Digital SAT practice exam stored in MongoDB "bluebook_exams" collection.
/// Modeled after the official testing application's module structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BluebookExam {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub modules: Vec<ExamModule>,

    #[serde(rename = "createdAt", with = "bson_datetime_as_chrono")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamModule {
    /// "Module 1", "Module 2", ...
    pub label: String,

    pub section: Section,

    pub duration_seconds: u32,

    #[serde(default)]
    pub question_ids: Vec<ObjectId>,
}

/// Exam attempt stored in MongoDB "exam_attempts" collection.
/// The server is the single source of truth for timing: each module gets a
/// wall-clock deadline when it starts, so a client reload loses nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamAttempt {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    #[serde(rename = "examId")]
    pub exam_id: ObjectId,

    #[serde(rename = "studentId")]
    pub student_id: ObjectId,

    pub status: AttemptStatus,

    /// Index into module_states of the module currently active (meaningful
    /// only while status == InProgress)
    pub current_module: usize,

    pub module_states: Vec<ModuleState>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scores: Option<AttemptScores>,

    #[serde(rename = "startedAt", with = "bson_datetime_as_chrono")]
    pub started_at: DateTime<Utc>,

    #[serde(
        rename = "completedAt",
        default,
        skip_serializing_if = "Option::is_none",
        with = "bson_datetime_as_chrono_option"
    )]
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleState {
    pub status: ModuleStatus,

    #[serde(
        rename = "startedAt",
        default,
        skip_serializing_if = "Option::is_none",
        with = "bson_datetime_as_chrono_option"
    )]
    pub started_at: Option<DateTime<Utc>>,

    /// Authoritative end of the module: started_at + duration
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "bson_datetime_as_chrono_option"
    )]
    pub deadline: Option<DateTime<Utc>>,

    /// question id (hex string) -> submitted answer
    #[serde(default)]
    pub answers: HashMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_count: Option<u32>,
}

impl ModuleState {
    pub fn locked() -> Self {
        ModuleState {
            status: ModuleStatus::Locked,
            started_at: None,
            deadline: None,
            answers: HashMap::new(),
            correct_count: None,
        }
    }

    pub fn start(&mut self, now: DateTime<Utc>, duration_seconds: u32) {
        self.status = ModuleStatus::Active;
        self.started_at = Some(now);
        self.deadline = Some(now + chrono::Duration::seconds(i64::from(duration_seconds)));
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ModuleStatus {
    Locked,
    Active,
    Submitted,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AttemptScores {
    pub reading_writing: u32,
    pub math: u32,
    pub total: u32,
}

/// Map a raw section score onto the 200-800 scale, rounded to the
/// nearest 10 the way score reports present it.
pub fn scaled_section_score(correct: u32, total: u32) -> u32 {
    if total == 0 {
        return 200;
    }
    let fraction = f64::from(correct.min(total)) / f64::from(total);
    let raw = 200.0 + fraction * 600.0;
    ((raw / 10.0).round() as u32) * 10
}

/// Exam as returned to clients: question ids only, counts per module
#[derive(Debug, Serialize)]
pub struct ExamView {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub modules: Vec<ExamModuleView>,
}

#[derive(Debug, Serialize)]
pub struct ExamModuleView {
    pub label: String,
    pub section: Section,
    pub duration_seconds: u32,
    pub question_count: usize,
}

impl From<BluebookExam> for ExamView {
    fn from(exam: BluebookExam) -> Self {
        ExamView {
            id: exam.id.map(|id| id.to_hex()).unwrap_or_default(),
            title: exam.title,
            description: exam.description,
            modules: exam
                .modules
                .into_iter()
                .map(|module| ExamModuleView {
                    label: module.label,
                    section: module.section,
                    duration_seconds: module.duration_seconds,
                    question_count: module.question_ids.len(),
                })
                .collect(),
        }
    }
}

/// Attempt snapshot returned to clients. Remaining time is computed from
/// the stored deadline at serialization time; the client only renders it.
#[derive(Debug, Serialize)]
pub struct AttemptSnapshot {
    pub id: String,
    pub exam_id: String,
    pub status: AttemptStatus,
    pub current_module: usize,
    pub modules: Vec<ModuleSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scores: Option<AttemptScores>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct ModuleSnapshot {
    pub label: String,
    pub section: Section,
    pub status: ModuleStatus,
    pub duration_seconds: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_seconds: Option<u32>,
    /// Redacted questions for the active module only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub questions: Option<Vec<QuestionView>>,
    pub answered: usize,
}

/// Request to start an attempt
#[derive(Debug, Deserialize)]
pub struct StartAttemptRequest {
    pub exam_id: String,
}

/// Request to record an answer into the active module
#[derive(Debug, Deserialize)]
pub struct RecordAnswerRequest {
    pub question_id: String,
    pub answer: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaled_score_bounds() {
        assert_eq!(scaled_section_score(0, 27), 200);
        assert_eq!(scaled_section_score(27, 27), 800);
        // More correct than total is clamped, not overflowed
        assert_eq!(scaled_section_score(30, 27), 800);
    }

    #[test]
    fn scaled_score_rounds_to_nearest_ten() {
        let score = scaled_section_score(13, 27);
        assert_eq!(score % 10, 0);
        assert!((200..=800).contains(&score));
    }

    #[test]
    fn empty_module_scores_floor() {
        assert_eq!(scaled_section_score(0, 0), 200);
    }

    #[test]
    fn module_start_sets_deadline_from_duration() {
        let mut state = ModuleState::locked();
        let now = Utc::now();
        state.start(now, 1920);

        assert_eq!(state.status, ModuleStatus::Active);
        assert_eq!(state.started_at, Some(now));
        assert_eq!(state.deadline, Some(now + chrono::Duration::seconds(1920)));
    }
}
