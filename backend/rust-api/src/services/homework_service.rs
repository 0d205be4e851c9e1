use std::collections::HashMap;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use futures::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, Bson};
use mongodb::Database;
use redis::aio::ConnectionManager;

use crate::metrics::{
    record_cache_hit, record_cache_miss, track_cache_operation, GRADES_RECORDED_TOTAL,
    HOMEWORK_SUBMISSIONS_TOTAL,
};
use crate::models::homework::{
    GradeSubmissionRequest, Homework, SubmitHomeworkRequest, Submission,
};
use crate::models::question::Question;
use crate::utils::retry::{retry_with_backoff, RetryConfig};

/// Reported elapsed time above a week is treated as a client bug
const MAX_ELAPSED_SECONDS: u64 = 604_800;

pub struct HomeworkService {
    mongo: Database,
    redis: ConnectionManager,
}

impl HomeworkService {
    pub fn new(mongo: Database, redis: ConnectionManager) -> Self {
        Self { mongo, redis }
    }

    /// Record a student submission: validate the answer map, compute the
    /// auto score against the question bank, persist exactly one record.
    ///
    /// The one-submission guarantee is structural: an atomic Redis SET NX
    /// marker serializes racing submits (the UI can fire the same payload
    /// twice through its time-up and manual paths), and a MongoDB lookup
    /// backstops the marker across Redis restarts.
    pub async fn submit(
        &self,
        homework: &Homework,
        student_id: ObjectId,
        req: SubmitHomeworkRequest,
    ) -> Result<Submission> {
        let homework_id = homework
            .id
            .ok_or_else(|| anyhow!("Homework record missing id"))?;

        if req.elapsed_seconds > MAX_ELAPSED_SECONDS {
            bail!("Elapsed time is out of range");
        }

        // Every answer must reference an assigned question
        let assigned: Vec<String> = homework
            .question_ids
            .iter()
            .map(|id| id.to_hex())
            .collect();
        for question_id in req.answers.keys() {
            if !assigned.contains(question_id) {
                bail!("Answer references a question not in this assignment");
            }
        }

        // Fast duplicate check via atomic marker; loser of a race gets the
        // same "already submitted" outcome as a late duplicate
        if !self.acquire_submission_marker(&homework_id, &student_id).await? {
            record_cache_hit();
            bail!("Homework already submitted");
        }
        record_cache_miss();

        // Backstop across Redis restarts
        let submissions = self.mongo.collection::<Submission>("submissions");
        let existing = retry_with_backoff(RetryConfig::default(), || async {
            submissions
                .find_one(doc! { "homeworkId": homework_id, "studentId": student_id })
                .await
                .context("Failed to check for existing submission")
        })
        .await?;
        if existing.is_some() {
            bail!("Homework already submitted");
        }

        let questions = self.load_questions(&homework.question_ids).await?;
        let auto_score = compute_auto_score(&questions, &req.answers);

        let now = Utc::now();
        let late = now > homework.due_date;

        let submission = Submission {
            id: None,
            homework_id,
            student_id,
            answers: req.answers,
            elapsed_seconds: req.elapsed_seconds,
            submitted_at: now,
            late,
            auto_score,
            score_override: None,
            feedback: None,
            graded_by: None,
            graded_at: None,
        };

        // Submissions must not be lost; retry the insert aggressively
        let insert_result = retry_with_backoff(RetryConfig::aggressive(), || async {
            submissions
                .insert_one(&submission)
                .await
                .context("Failed to insert submission")
        })
        .await?;

        HOMEWORK_SUBMISSIONS_TOTAL
            .with_label_values(&[if late { "true" } else { "false" }])
            .inc();

        tracing::info!(
            homework_id = %homework_id.to_hex(),
            student_id = %student_id.to_hex(),
            auto_score,
            late,
            "Homework submission recorded"
        );

        let mut stored = submission;
        stored.id = insert_result.inserted_id.as_object_id();
        Ok(stored)
    }

    /// Teacher grading: override the computed score and/or attach
    /// feedback. Overwrites any previous grading without a version check.
    pub async fn grade(
        &self,
        homework_id: ObjectId,
        submission_id: ObjectId,
        grader_id: ObjectId,
        req: GradeSubmissionRequest,
    ) -> Result<Submission> {
        let submissions = self.mongo.collection::<Submission>("submissions");

        let mut update = doc! {
            "gradedBy": grader_id,
            "gradedAt": mongodb::bson::DateTime::now(),
        };
        match req.score_override {
            Some(score) => update.insert("score_override", score),
            None => update.insert("score_override", Bson::Null),
        };
        match &req.feedback {
            Some(feedback) => update.insert("feedback", feedback),
            None => update.insert("feedback", Bson::Null),
        };

        let result = retry_with_backoff(RetryConfig::aggressive(), || async {
            submissions
                .update_one(
                    doc! { "_id": submission_id, "homeworkId": homework_id },
                    doc! { "$set": update.clone() },
                )
                .await
                .context("Failed to record grade")
        })
        .await?;

        if result.matched_count == 0 {
            bail!("Submission not found");
        }

        GRADES_RECORDED_TOTAL
            .with_label_values(&[if req.score_override.is_some() {
                "true"
            } else {
                "false"
            }])
            .inc();

        submissions
            .find_one(doc! { "_id": submission_id })
            .await
            .context("Failed to reload graded submission")?
            .ok_or_else(|| anyhow!("Submission disappeared after grading"))
    }

    /// Load the student's submission for an assignment, if any
    pub async fn find_submission(
        &self,
        homework_id: ObjectId,
        student_id: ObjectId,
    ) -> Result<Option<Submission>> {
        let submissions = self.mongo.collection::<Submission>("submissions");
        submissions
            .find_one(doc! { "homeworkId": homework_id, "studentId": student_id })
            .await
            .context("Failed to query submission")
    }

    /// All submissions for an assignment (teacher view)
    pub async fn list_submissions(&self, homework_id: ObjectId) -> Result<Vec<Submission>> {
        let submissions = self.mongo.collection::<Submission>("submissions");
        let cursor = submissions
            .find(doc! { "homeworkId": homework_id })
            .await
            .context("Failed to query submissions")?;

        cursor
            .try_collect()
            .await
            .context("Failed to read submissions")
    }

    /// The student's submissions across a set of assignments, keyed by
    /// homework id (drives status derivation on the overview page)
    pub async fn submissions_by_homework(
        &self,
        student_id: ObjectId,
        homework_ids: &[ObjectId],
    ) -> Result<HashMap<ObjectId, Submission>> {
        if homework_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let submissions = self.mongo.collection::<Submission>("submissions");
        let mut cursor = submissions
            .find(doc! {
                "studentId": student_id,
                "homeworkId": { "$in": homework_ids.to_vec() }
            })
            .await
            .context("Failed to query submissions")?;

        let mut map = HashMap::new();
        while let Some(submission) = cursor
            .try_next()
            .await
            .context("Failed to read submission")?
        {
            map.insert(submission.homework_id, submission);
        }
        Ok(map)
    }

    pub async fn load_questions(&self, question_ids: &[ObjectId]) -> Result<Vec<Question>> {
        if question_ids.is_empty() {
            return Ok(Vec::new());
        }

        let questions = self.mongo.collection::<Question>("questions");
        let cursor = questions
            .find(doc! { "_id": { "$in": question_ids.to_vec() } })
            .await
            .context("Failed to query questions")?;

        cursor
            .try_collect()
            .await
            .context("Failed to read questions")
    }

    /// SET NX with a 30-day TTL; returns false when the marker already
    /// exists (someone else won the submit)
    async fn acquire_submission_marker(
        &self,
        homework_id: &ObjectId,
        student_id: &ObjectId,
    ) -> Result<bool> {
        let mut conn = self.redis.clone();
        let key = format!(
            "submission:{}:{}",
            homework_id.to_hex(),
            student_id.to_hex()
        );

        let acquired: Option<String> = track_cache_operation("set_nx", async {
            redis::cmd("SET")
                .arg(&key)
                .arg(1)
                .arg("NX")
                .arg("EX")
                .arg(2_592_000)
                .query_async(&mut conn)
                .await
                .context("Failed to set submission marker")
        })
        .await?;

        Ok(acquired.is_some())
    }
}

/// Percentage of correct answers, rounded. Comparison is trimmed and
/// case-insensitive so "B" and " b " both match a stored "b".
pub fn compute_auto_score(questions: &[Question], answers: &HashMap<String, String>) -> i32 {
    if questions.is_empty() {
        return 0;
    }

    let correct = questions
        .iter()
        .filter(|question| {
            let Some(id) = question.id else { return false };
            answers
                .get(&id.to_hex())
                .map(|answer| answers_match(answer, &question.correct_answer))
                .unwrap_or(false)
        })
        .count();

    ((correct as f64 / questions.len() as f64) * 100.0).round() as i32
}

pub fn answers_match(submitted: &str, correct: &str) -> bool {
    submitted.trim().eq_ignore_ascii_case(correct.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::question::{QuestionDifficulty, QuestionType, Section};
    use chrono::Utc;

    fn question(id: ObjectId, correct: &str) -> Question {
        Question {
            id: Some(id),
            text: "placeholder".to_string(),
            qtype: QuestionType::MultipleChoice,
            options: vec!["A".to_string(), "B".to_string()],
            correct_answer: correct.to_string(),
            section: Section::Math,
            difficulty: QuestionDifficulty::Medium,
            explanation: None,
            created_by: ObjectId::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn answers_match_ignores_case_and_whitespace() {
        assert!(answers_match(" b ", "B"));
        assert!(answers_match("3/4", " 3/4"));
        assert!(!answers_match("A", "B"));
    }

    #[test]
    fn auto_score_counts_correct_fraction() {
        let q1 = ObjectId::new();
        let q2 = ObjectId::new();
        let q3 = ObjectId::new();
        let questions = vec![question(q1, "A"), question(q2, "B"), question(q3, "42")];

        let mut answers = HashMap::new();
        answers.insert(q1.to_hex(), "A".to_string());
        answers.insert(q2.to_hex(), "A".to_string());
        answers.insert(q3.to_hex(), "42".to_string());

        assert_eq!(compute_auto_score(&questions, &answers), 67);
    }

    #[test]
    fn auto_score_treats_missing_answers_as_wrong() {
        let q1 = ObjectId::new();
        let q2 = ObjectId::new();
        let questions = vec![question(q1, "A"), question(q2, "B")];

        let mut answers = HashMap::new();
        answers.insert(q1.to_hex(), "A".to_string());

        assert_eq!(compute_auto_score(&questions, &answers), 50);
    }

    #[test]
    fn auto_score_of_empty_assignment_is_zero() {
        assert_eq!(compute_auto_score(&[], &HashMap::new()), 0);
    }
}
