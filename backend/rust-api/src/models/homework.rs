use std::collections::HashMap;

use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::question::QuestionView;
use super::user::bson_datetime_as_chrono;

/// Homework assignment stored in MongoDB "homework" collection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Homework {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(rename = "classId")]
    pub class_id: ObjectId,

    /// Questions assigned from the question bank
    #[serde(default)]
    pub question_ids: Vec<ObjectId>,

    #[serde(rename = "dueDate", with = "bson_datetime_as_chrono")]
    pub due_date: DateTime<Utc>,

    #[serde(rename = "createdBy")]
    pub created_by: ObjectId,

    #[serde(rename = "createdAt", with = "bson_datetime_as_chrono")]
    pub created_at: DateTime<Utc>,
}

/// A student's recorded submission for a homework assignment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    #[serde(rename = "homeworkId")]
    pub homework_id: ObjectId,

    #[serde(rename = "studentId")]
    pub student_id: ObjectId,

    /// Mapping from question id (hex string) to the submitted answer
    pub answers: HashMap<String, String>,

    pub elapsed_seconds: u64,

    #[serde(rename = "submittedAt", with = "bson_datetime_as_chrono")]
    pub submitted_at: DateTime<Utc>,

    pub late: bool,

    /// Percentage 0-100 computed on submit against the question bank
    pub auto_score: i32,

    /// Teacher override; wins over auto_score when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_override: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,

    #[serde(rename = "gradedBy", default, skip_serializing_if = "Option::is_none")]
    pub graded_by: Option<ObjectId>,

    #[serde(
        rename = "gradedAt",
        default,
        skip_serializing_if = "Option::is_none",
        with = "super::user::bson_datetime_as_chrono_option"
    )]
    pub graded_at: Option<DateTime<Utc>>,
}

impl Submission {
    pub fn final_score(&self) -> i32 {
        self.score_override.unwrap_or(self.auto_score)
    }
}

/// Status of an assignment from a single student's point of view.
/// Derived, never stored.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HomeworkStatus {
    Pending,
    Submitted,
    Overdue,
}

/// Submission present => submitted; due date passed and no submission =>
/// overdue; otherwise pending. Every (homework, student) pair lands in
/// exactly one bucket.
pub fn derive_status(
    due_date: DateTime<Utc>,
    now: DateTime<Utc>,
    has_submission: bool,
) -> HomeworkStatus {
    if has_submission {
        HomeworkStatus::Submitted
    } else if due_date < now {
        HomeworkStatus::Overdue
    } else {
        HomeworkStatus::Pending
    }
}

/// List item for the homework overview
#[derive(Debug, Serialize)]
pub struct HomeworkSummary {
    pub id: String,
    pub title: String,
    pub class_id: String,
    pub due_date: DateTime<Utc>,
    pub question_count: usize,
    /// Present for students; teachers see per-student status in the
    /// submissions listing instead
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<HomeworkStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<i32>,
}

/// Full assignment as fetched by a student: questions are redacted
#[derive(Debug, Serialize)]
pub struct HomeworkDetail {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub class_id: String,
    pub due_date: DateTime<Utc>,
    pub questions: Vec<QuestionView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submission: Option<SubmissionView>,
}

/// Submission as returned to clients
#[derive(Debug, Serialize)]
pub struct SubmissionView {
    pub id: String,
    pub homework_id: String,
    pub student_id: String,
    pub answers: HashMap<String, String>,
    pub elapsed_seconds: u64,
    pub submitted_at: DateTime<Utc>,
    pub late: bool,
    pub auto_score: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_override: Option<i32>,
    pub score: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    pub graded: bool,
}

impl From<Submission> for SubmissionView {
    fn from(sub: Submission) -> Self {
        let score = sub.final_score();
        SubmissionView {
            id: sub.id.map(|id| id.to_hex()).unwrap_or_default(),
            homework_id: sub.homework_id.to_hex(),
            student_id: sub.student_id.to_hex(),
            answers: sub.answers,
            elapsed_seconds: sub.elapsed_seconds,
            submitted_at: sub.submitted_at,
            late: sub.late,
            auto_score: sub.auto_score,
            score_override: sub.score_override,
            score,
            feedback: sub.feedback,
            graded: sub.graded_at.is_some(),
        }
    }
}

/// Request to create a homework assignment (teacher only)
#[derive(Debug, Deserialize, Validate)]
pub struct CreateHomeworkRequest {
    #[validate(length(
        min = 1,
        max = 200,
        message = "Title must be between 1 and 200 characters"
    ))]
    pub title: String,

    pub description: Option<String>,

    pub class_id: String,

    #[validate(length(min = 1, message = "At least one question is required"))]
    pub question_ids: Vec<String>,

    pub due_date: DateTime<Utc>,
}

/// Request to update a homework assignment
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateHomeworkRequest {
    #[validate(length(
        min = 1,
        max = 200,
        message = "Title must be between 1 and 200 characters"
    ))]
    pub title: Option<String>,

    pub description: Option<String>,

    pub due_date: Option<DateTime<Utc>>,
}

/// Student submission payload: one request carrying everything
#[derive(Debug, Deserialize)]
pub struct SubmitHomeworkRequest {
    /// question id (hex string) -> answer
    pub answers: HashMap<String, String>,

    /// Time the student spent, reported by the client. Non-negative by
    /// type; an upper bound is sanity-checked in the service.
    pub elapsed_seconds: u64,
}

/// Teacher grading payload. A second grading request overwrites the
/// first; there is no version check.
#[derive(Debug, Deserialize, Validate)]
pub struct GradeSubmissionRequest {
    #[validate(range(min = 0, max = 100, message = "Score must be between 0 and 100"))]
    pub score_override: Option<i32>,

    #[validate(length(max = 2000, message = "Feedback must be at most 2000 characters"))]
    pub feedback: Option<String>,
}

/// Query params for the homework overview
#[derive(Debug, Deserialize)]
pub struct ListHomeworkQuery {
    /// pending | submitted | overdue (students only)
    pub status: Option<String>,
    pub class_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn status_is_submitted_whenever_a_submission_exists() {
        let now = Utc::now();
        // Submission wins even past the due date
        assert_eq!(
            derive_status(now - Duration::days(1), now, true),
            HomeworkStatus::Submitted
        );
        assert_eq!(
            derive_status(now + Duration::days(1), now, true),
            HomeworkStatus::Submitted
        );
    }

    #[test]
    fn status_without_submission_depends_on_due_date() {
        let now = Utc::now();
        assert_eq!(
            derive_status(now + Duration::hours(1), now, false),
            HomeworkStatus::Pending
        );
        assert_eq!(
            derive_status(now - Duration::hours(1), now, false),
            HomeworkStatus::Overdue
        );
    }

    #[test]
    fn status_partition_has_no_overlap_and_no_omission() {
        let now = Utc::now();
        let due_dates = [
            now - Duration::days(3),
            now - Duration::seconds(1),
            now + Duration::seconds(1),
            now + Duration::days(3),
        ];

        for due in due_dates {
            for has_submission in [false, true] {
                let status = derive_status(due, now, has_submission);
                // Exactly one derivation rule applies per input
                let expected = if has_submission {
                    HomeworkStatus::Submitted
                } else if due < now {
                    HomeworkStatus::Overdue
                } else {
                    HomeworkStatus::Pending
                };
                assert_eq!(status, expected);
            }
        }
    }

    #[test]
    fn final_score_prefers_override() {
        let mut sub = Submission {
            id: None,
            homework_id: ObjectId::new(),
            student_id: ObjectId::new(),
            answers: HashMap::new(),
            elapsed_seconds: 600,
            submitted_at: Utc::now(),
            late: false,
            auto_score: 80,
            score_override: None,
            feedback: None,
            graded_by: None,
            graded_at: None,
        };
        assert_eq!(sub.final_score(), 80);

        sub.score_override = Some(95);
        assert_eq!(sub.final_score(), 95);
    }
}
