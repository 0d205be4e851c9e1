use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::user::bson_datetime_as_chrono;

/// Question model stored in MongoDB "questions" collection.
/// Used both by the question bank pages and embedded (by id) in
/// homework assignments and bluebook exam modules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    pub text: String,

    #[serde(rename = "type")]
    pub qtype: QuestionType,

    /// Answer choices; empty for grid-in questions
    #[serde(default)]
    pub options: Vec<String>,

    pub correct_answer: String,

    pub section: Section,

    pub difficulty: QuestionDifficulty,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,

    #[serde(rename = "createdBy")]
    pub created_by: ObjectId,

    #[serde(rename = "createdAt", with = "bson_datetime_as_chrono")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    MultipleChoice,
    GridIn,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    Math,
    ReadingWriting,
}

impl Section {
    pub fn as_str(&self) -> &'static str {
        match self {
            Section::Math => "math",
            Section::ReadingWriting => "reading_writing",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QuestionDifficulty {
    Easy,
    Medium,
    Hard,
}

/// Student-facing projection: no correct answer, no explanation.
/// This is what gets embedded into homework and exam payloads.
#[derive(Debug, Clone, Serialize)]
pub struct QuestionView {
    pub id: String,
    pub text: String,
    #[serde(rename = "type")]
    pub qtype: QuestionType,
    pub options: Vec<String>,
    pub section: Section,
    pub difficulty: QuestionDifficulty,
}

impl From<Question> for QuestionView {
    fn from(q: Question) -> Self {
        QuestionView {
            id: q.id.map(|id| id.to_hex()).unwrap_or_default(),
            text: q.text,
            qtype: q.qtype,
            options: q.options,
            section: q.section,
            difficulty: q.difficulty,
        }
    }
}

/// Request to create a question (teacher/admin only)
#[derive(Debug, Deserialize, Validate)]
pub struct CreateQuestionRequest {
    #[validate(length(min = 1, max = 5000, message = "Question text is required"))]
    pub text: String,

    #[serde(rename = "type")]
    pub qtype: QuestionType,

    #[serde(default)]
    pub options: Vec<String>,

    #[validate(length(min = 1, max = 200, message = "Correct answer is required"))]
    pub correct_answer: String,

    pub section: Section,

    pub difficulty: QuestionDifficulty,

    pub explanation: Option<String>,
}

impl CreateQuestionRequest {
    /// Structural checks beyond field-level validation: a multiple-choice
    /// question needs at least two options and the correct answer must be
    /// one of them.
    pub fn check_consistency(&self) -> Result<(), String> {
        match self.qtype {
            QuestionType::MultipleChoice => {
                if self.options.len() < 2 {
                    return Err("Multiple-choice questions need at least 2 options".to_string());
                }
                if !self
                    .options
                    .iter()
                    .any(|opt| opt.trim() == self.correct_answer.trim())
                {
                    return Err("Correct answer must be one of the options".to_string());
                }
                Ok(())
            }
            QuestionType::GridIn => {
                if !self.options.is_empty() {
                    return Err("Grid-in questions must not have options".to_string());
                }
                Ok(())
            }
        }
    }
}

/// Request to update a question
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateQuestionRequest {
    #[validate(length(min = 1, max = 5000, message = "Question text must not be empty"))]
    pub text: Option<String>,

    pub options: Option<Vec<String>>,

    #[validate(length(min = 1, max = 200, message = "Correct answer must not be empty"))]
    pub correct_answer: Option<String>,

    pub difficulty: Option<QuestionDifficulty>,

    pub explanation: Option<String>,
}

/// Query params for listing questions
#[derive(Debug, Deserialize)]
pub struct ListQuestionsQuery {
    pub section: Option<String>,
    pub difficulty: Option<String>,
    #[serde(rename = "type")]
    pub qtype: Option<String>,
    /// Substring search on question text
    pub search: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(qtype: QuestionType, options: Vec<&str>, correct: &str) -> CreateQuestionRequest {
        CreateQuestionRequest {
            text: "If 2x + 3 = 11, what is x?".to_string(),
            qtype,
            options: options.into_iter().map(|s| s.to_string()).collect(),
            correct_answer: correct.to_string(),
            section: Section::Math,
            difficulty: QuestionDifficulty::Easy,
            explanation: None,
        }
    }

    #[test]
    fn multiple_choice_requires_correct_among_options() {
        let ok = request(QuestionType::MultipleChoice, vec!["2", "4", "6"], "4");
        assert!(ok.check_consistency().is_ok());

        let missing = request(QuestionType::MultipleChoice, vec!["2", "6"], "4");
        assert!(missing.check_consistency().is_err());

        let too_few = request(QuestionType::MultipleChoice, vec!["4"], "4");
        assert!(too_few.check_consistency().is_err());
    }

    #[test]
    fn grid_in_rejects_options() {
        let ok = request(QuestionType::GridIn, vec![], "4");
        assert!(ok.check_consistency().is_ok());

        let bad = request(QuestionType::GridIn, vec!["4"], "4");
        assert!(bad.check_consistency().is_err());
    }
}
