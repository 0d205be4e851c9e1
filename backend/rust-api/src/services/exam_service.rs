use std::collections::HashMap;

use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, to_bson};
use mongodb::Database;
use thiserror::Error;

use crate::metrics::{EXAM_ATTEMPTS_ACTIVE, EXAM_ATTEMPTS_TOTAL};
use crate::models::bluebook::{
    scaled_section_score, AttemptScores, AttemptSnapshot, AttemptStatus, BluebookExam, ExamAttempt,
    ModuleSnapshot, ModuleState, ModuleStatus,
};
use crate::models::question::{Question, QuestionView, Section};

/// Typed failures of the attempt state machine. Submitting an
/// already-submitted module is NOT an error: it returns the current
/// snapshot unchanged, which is what makes the double-fire of "time-up"
/// and manual submit harmless.
#[derive(Debug, Error)]
pub enum ExamError {
    #[error("Exam not found")]
    ExamNotFound,
    #[error("Attempt not found")]
    AttemptNotFound,
    #[error("An attempt for this exam is already in progress")]
    AlreadyInProgress,
    #[error("Attempt is already completed")]
    AttemptCompleted,
    #[error("Module is not active")]
    ModuleLocked,
    #[error("Module deadline has passed")]
    DeadlinePassed,
    #[error("Question does not belong to the active module")]
    UnknownQuestion,
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

pub struct ExamService {
    mongo: Database,
}

impl ExamService {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    pub async fn list_exams(&self) -> Result<Vec<BluebookExam>, ExamError> {
        let exams = self.mongo.collection::<BluebookExam>("bluebook_exams");
        let cursor = exams
            .find(doc! {})
            .sort(doc! { "createdAt": -1 })
            .await
            .map_err(|e| anyhow::anyhow!("Failed to query exams: {}", e))?;

        cursor
            .try_collect()
            .await
            .map_err(|e| ExamError::Storage(anyhow::anyhow!("Failed to read exams: {}", e)))
    }

    pub async fn get_exam(&self, exam_id: &ObjectId) -> Result<BluebookExam, ExamError> {
        let exams = self.mongo.collection::<BluebookExam>("bluebook_exams");
        exams
            .find_one(doc! { "_id": exam_id })
            .await
            .map_err(|e| anyhow::anyhow!("Failed to query exam: {}", e))?
            .ok_or(ExamError::ExamNotFound)
    }

    /// Start an attempt: one InProgress attempt per (exam, student).
    /// Module 0 becomes active immediately with a wall-clock deadline.
    pub async fn start_attempt(
        &self,
        exam_id: ObjectId,
        student_id: ObjectId,
    ) -> Result<ExamAttempt, ExamError> {
        let exam = self.get_exam(&exam_id).await?;

        let attempts = self.mongo.collection::<ExamAttempt>("exam_attempts");
        let existing = attempts
            .find_one(doc! {
                "examId": exam_id,
                "studentId": student_id,
                "status": "in_progress"
            })
            .await
            .map_err(|e| anyhow::anyhow!("Failed to check existing attempt: {}", e))?;

        if existing.is_some() {
            return Err(ExamError::AlreadyInProgress);
        }

        let now = Utc::now();
        let mut module_states: Vec<ModuleState> =
            exam.modules.iter().map(|_| ModuleState::locked()).collect();
        if let (Some(first_state), Some(first_module)) =
            (module_states.first_mut(), exam.modules.first())
        {
            first_state.start(now, first_module.duration_seconds);
        }

        let mut attempt = ExamAttempt {
            id: None,
            exam_id,
            student_id,
            status: AttemptStatus::InProgress,
            current_module: 0,
            module_states,
            scores: None,
            started_at: now,
            completed_at: None,
        };

        let insert_result = attempts
            .insert_one(&attempt)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to insert attempt: {}", e))?;
        attempt.id = insert_result.inserted_id.as_object_id();

        EXAM_ATTEMPTS_TOTAL.with_label_values(&["started"]).inc();
        EXAM_ATTEMPTS_ACTIVE.inc();

        tracing::info!(
            exam_id = %exam_id.to_hex(),
            student_id = %student_id.to_hex(),
            "Exam attempt started"
        );

        Ok(attempt)
    }

    pub async fn list_attempts(&self, student_id: ObjectId) -> Result<Vec<ExamAttempt>, ExamError> {
        let attempts = self.mongo.collection::<ExamAttempt>("exam_attempts");
        let cursor = attempts
            .find(doc! { "studentId": student_id })
            .sort(doc! { "startedAt": -1 })
            .await
            .map_err(|e| anyhow::anyhow!("Failed to query attempts: {}", e))?;

        cursor
            .try_collect()
            .await
            .map_err(|e| ExamError::Storage(anyhow::anyhow!("Failed to read attempts: {}", e)))
    }

    /// Load an attempt owned by the student and bring it up to date with
    /// the clock: a module whose deadline has passed is auto-submitted
    /// before the attempt is returned. Reading is what advances time, so
    /// a reloading client always sees the authoritative state.
    pub async fn get_attempt(
        &self,
        attempt_id: ObjectId,
        student_id: ObjectId,
    ) -> Result<(ExamAttempt, BluebookExam), ExamError> {
        let attempts = self.mongo.collection::<ExamAttempt>("exam_attempts");
        let attempt = attempts
            .find_one(doc! { "_id": attempt_id, "studentId": student_id })
            .await
            .map_err(|e| anyhow::anyhow!("Failed to query attempt: {}", e))?
            .ok_or(ExamError::AttemptNotFound)?;

        let exam = self.get_exam(&attempt.exam_id).await?;
        let attempt = self.apply_expiry(attempt, &exam).await?;
        Ok((attempt, exam))
    }

    async fn apply_expiry(
        &self,
        mut attempt: ExamAttempt,
        exam: &BluebookExam,
    ) -> Result<ExamAttempt, ExamError> {
        // Expired modules cascade at most once per read: the next module's
        // clock starts now, so it cannot be expired in the same pass.
        while attempt.status == AttemptStatus::InProgress {
            let index = attempt.current_module;
            let expired = attempt
                .module_states
                .get(index)
                .and_then(|state| {
                    state
                        .deadline
                        .filter(|_| state.status == ModuleStatus::Active)
                })
                .map(|deadline| deadline <= Utc::now())
                .unwrap_or(false);

            if !expired {
                break;
            }

            tracing::info!(
                attempt_id = ?attempt.id.map(|id| id.to_hex()),
                module = index,
                "Module deadline passed, auto-submitting"
            );
            attempt = self.finalize_module(attempt, exam, index, "expired").await?;
        }

        Ok(attempt)
    }

    /// Record an answer into the active module. Past the deadline the
    /// module is auto-submitted and the write is rejected.
    pub async fn record_answer(
        &self,
        attempt_id: ObjectId,
        student_id: ObjectId,
        question_id: &str,
        answer: &str,
    ) -> Result<ExamAttempt, ExamError> {
        let (attempt, exam) = self.get_attempt(attempt_id, student_id).await?;

        if attempt.status == AttemptStatus::Completed {
            return Err(ExamError::AttemptCompleted);
        }

        let index = attempt.current_module;
        let state = attempt
            .module_states
            .get(index)
            .ok_or(ExamError::ModuleLocked)?;
        if state.status != ModuleStatus::Active {
            return Err(ExamError::ModuleLocked);
        }

        let module = exam.modules.get(index).ok_or(ExamError::ModuleLocked)?;
        let belongs = module
            .question_ids
            .iter()
            .any(|id| id.to_hex() == question_id);
        if !belongs {
            return Err(ExamError::UnknownQuestion);
        }

        // Guard on active status so a concurrent submit can't resurrect
        // answers into a closed module
        let attempts = self.mongo.collection::<ExamAttempt>("exam_attempts");
        let field = format!("module_states.{}.answers.{}", index, question_id);
        let status_field = format!("module_states.{}.status", index);
        let result = attempts
            .update_one(
                doc! { "_id": attempt_id, &status_field: "active" },
                doc! { "$set": { &field: answer } },
            )
            .await
            .map_err(|e| anyhow::anyhow!("Failed to record answer: {}", e))?;

        if result.matched_count == 0 {
            return Err(ExamError::DeadlinePassed);
        }

        let (attempt, _) = self.get_attempt(attempt_id, student_id).await?;
        Ok(attempt)
    }

    /// Submit a module. Idempotent: a module that is already Submitted
    /// (manual submit racing auto-submit, or a retried request) returns
    /// the current attempt unchanged.
    pub async fn submit_module(
        &self,
        attempt_id: ObjectId,
        student_id: ObjectId,
        module_index: usize,
    ) -> Result<ExamAttempt, ExamError> {
        let (attempt, exam) = self.get_attempt(attempt_id, student_id).await?;

        match attempt.module_states.get(module_index) {
            None => return Err(ExamError::ModuleLocked),
            Some(state) if state.status == ModuleStatus::Submitted => return Ok(attempt),
            Some(state) if state.status == ModuleStatus::Locked => {
                return Err(ExamError::ModuleLocked)
            }
            Some(_) => {}
        }

        if attempt.status == AttemptStatus::Completed {
            return Ok(attempt);
        }

        self.finalize_module(attempt, &exam, module_index, "submitted")
            .await
    }

    /// Score and close the given active module, then either start the
    /// next module or complete the attempt. The transition is guarded by
    /// an atomic filter on the module status, so exactly one of several
    /// racing callers performs it; the others observe the result.
    async fn finalize_module(
        &self,
        attempt: ExamAttempt,
        exam: &BluebookExam,
        module_index: usize,
        event: &str,
    ) -> Result<ExamAttempt, ExamError> {
        let attempt_id = attempt
            .id
            .ok_or_else(|| anyhow::anyhow!("Attempt record missing id"))?;
        let module = exam
            .modules
            .get(module_index)
            .ok_or(ExamError::ModuleLocked)?;
        let state = attempt
            .module_states
            .get(module_index)
            .ok_or(ExamError::ModuleLocked)?;

        let questions = self.load_questions(&module.question_ids).await?;
        let correct_count = count_correct(&questions, &state.answers);

        let is_last = module_index + 1 >= exam.modules.len();
        let now = Utc::now();

        let status_field = format!("module_states.{}.status", module_index);
        let correct_field = format!("module_states.{}.correct_count", module_index);

        let mut update = doc! {
            &status_field: "submitted",
            &correct_field: i64::from(correct_count),
        };

        if is_last {
            let scores = compute_scores(exam, &attempt, module_index, correct_count);
            update.insert("status", "completed");
            update.insert(
                "scores",
                to_bson(&scores).map_err(|e| anyhow::anyhow!("Failed to encode scores: {}", e))?,
            );
            update.insert("completedAt", mongodb::bson::DateTime::now());
        } else {
            let next_index = module_index + 1;
            let next_module = &exam.modules[next_index];
            let deadline = now + chrono::Duration::seconds(i64::from(next_module.duration_seconds));
            update.insert("current_module", next_index as i64);
            update.insert(
                format!("module_states.{}.status", next_index),
                "active",
            );
            update.insert(
                format!("module_states.{}.startedAt", next_index),
                mongodb::bson::DateTime::from_millis(now.timestamp_millis()),
            );
            update.insert(
                format!("module_states.{}.deadline", next_index),
                mongodb::bson::DateTime::from_millis(deadline.timestamp_millis()),
            );
        }

        let attempts = self.mongo.collection::<ExamAttempt>("exam_attempts");
        let result = attempts
            .update_one(
                doc! { "_id": attempt_id, &status_field: "active" },
                doc! { "$set": update },
            )
            .await
            .map_err(|e| anyhow::anyhow!("Failed to finalize module: {}", e))?;

        if result.modified_count > 0 {
            EXAM_ATTEMPTS_TOTAL.with_label_values(&[event]).inc();
            if is_last {
                EXAM_ATTEMPTS_ACTIVE.dec();
                EXAM_ATTEMPTS_TOTAL.with_label_values(&["completed"]).inc();
                tracing::info!(
                    attempt_id = %attempt_id.to_hex(),
                    "Exam attempt completed"
                );
            }
        }
        // modified_count == 0 means a concurrent caller already closed the
        // module; the reload below returns whatever state won

        let reloaded = attempts
            .find_one(doc! { "_id": attempt_id })
            .await
            .map_err(|e| anyhow::anyhow!("Failed to reload attempt: {}", e))?
            .ok_or(ExamError::AttemptNotFound)?;

        Ok(reloaded)
    }

    pub async fn load_questions(
        &self,
        question_ids: &[ObjectId],
    ) -> Result<Vec<Question>, ExamError> {
        if question_ids.is_empty() {
            return Ok(Vec::new());
        }

        let questions = self.mongo.collection::<Question>("questions");
        let cursor = questions
            .find(doc! { "_id": { "$in": question_ids.to_vec() } })
            .await
            .map_err(|e| anyhow::anyhow!("Failed to query questions: {}", e))?;

        cursor
            .try_collect()
            .await
            .map_err(|e| ExamError::Storage(anyhow::anyhow!("Failed to read questions: {}", e)))
    }

    /// Client-facing snapshot: remaining time computed from the stored
    /// deadline, questions attached (redacted) for the active module only.
    pub async fn snapshot(
        &self,
        attempt: &ExamAttempt,
        exam: &BluebookExam,
    ) -> Result<AttemptSnapshot, ExamError> {
        let now = Utc::now();
        let mut modules = Vec::with_capacity(exam.modules.len());

        for (index, module) in exam.modules.iter().enumerate() {
            let state = attempt
                .module_states
                .get(index)
                .ok_or(ExamError::ModuleLocked)?;

            let is_active_now =
                attempt.status == AttemptStatus::InProgress && state.status == ModuleStatus::Active;

            let questions = if is_active_now {
                let loaded = self.load_questions(&module.question_ids).await?;
                Some(loaded.into_iter().map(QuestionView::from).collect())
            } else {
                None
            };

            modules.push(ModuleSnapshot {
                label: module.label.clone(),
                section: module.section,
                status: state.status,
                duration_seconds: module.duration_seconds,
                deadline: state.deadline,
                remaining_seconds: remaining_seconds(state, now),
                questions,
                answered: state.answers.len(),
            });
        }

        Ok(AttemptSnapshot {
            id: attempt.id.map(|id| id.to_hex()).unwrap_or_default(),
            exam_id: attempt.exam_id.to_hex(),
            status: attempt.status,
            current_module: attempt.current_module,
            modules,
            scores: attempt.scores,
            started_at: attempt.started_at,
            completed_at: attempt.completed_at,
        })
    }
}

fn remaining_seconds(state: &ModuleState, now: DateTime<Utc>) -> Option<u32> {
    if state.status != ModuleStatus::Active {
        return None;
    }
    state
        .deadline
        .map(|deadline| (deadline - now).num_seconds().max(0) as u32)
}

pub fn count_correct(questions: &[Question], answers: &HashMap<String, String>) -> u32 {
    questions
        .iter()
        .filter(|question| {
            let Some(id) = question.id else { return false };
            answers
                .get(&id.to_hex())
                .map(|answer| super::homework_service::answers_match(answer, &question.correct_answer))
                .unwrap_or(false)
        })
        .count() as u32
}

/// Section totals across all modules; the module being finalized supplies
/// its fresh correct count, earlier modules their stored ones.
fn compute_scores(
    exam: &BluebookExam,
    attempt: &ExamAttempt,
    finalized_index: usize,
    finalized_correct: u32,
) -> AttemptScores {
    let mut correct_by_section: HashMap<Section, u32> = HashMap::new();
    let mut total_by_section: HashMap<Section, u32> = HashMap::new();

    for (index, module) in exam.modules.iter().enumerate() {
        let correct = if index == finalized_index {
            finalized_correct
        } else {
            attempt
                .module_states
                .get(index)
                .and_then(|state| state.correct_count)
                .unwrap_or(0)
        };

        *correct_by_section.entry(module.section).or_insert(0) += correct;
        *total_by_section.entry(module.section).or_insert(0) +=
            module.question_ids.len() as u32;
    }

    let section_score = |section: Section| {
        scaled_section_score(
            correct_by_section.get(&section).copied().unwrap_or(0),
            total_by_section.get(&section).copied().unwrap_or(0),
        )
    };

    let reading_writing = section_score(Section::ReadingWriting);
    let math = section_score(Section::Math);

    AttemptScores {
        reading_writing,
        math,
        total: reading_writing + math,
    }
}
