use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::user::bson_datetime_as_chrono;

/// Class model stored in MongoDB "classes" collection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassGroup {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    pub name: String,

    /// Focus of the class ("SAT Math", "SAT Reading & Writing", ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,

    /// Owning teacher (ref: users, role teacher)
    #[serde(rename = "teacherId")]
    pub teacher_id: ObjectId,

    #[serde(default)]
    pub student_ids: Vec<ObjectId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(rename = "createdAt", with = "bson_datetime_as_chrono")]
    pub created_at: DateTime<Utc>,

    #[serde(rename = "updatedAt", with = "bson_datetime_as_chrono")]
    pub updated_at: DateTime<Utc>,
}

/// Class response for the API (with populated data)
#[derive(Debug, Serialize)]
pub struct ClassResponse {
    pub id: String,
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,

    pub teacher_id: String,

    /// Teacher name (populated from users)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub teacher_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub student_count: usize,

    pub created_at: DateTime<Utc>,
}

impl From<ClassGroup> for ClassResponse {
    fn from(class: ClassGroup) -> Self {
        ClassResponse {
            id: class.id.map(|id| id.to_hex()).unwrap_or_default(),
            name: class.name,
            subject: class.subject,
            teacher_id: class.teacher_id.to_hex(),
            teacher_name: None, // populated by the handler
            description: class.description,
            student_count: class.student_ids.len(),
            created_at: class.created_at,
        }
    }
}

/// Request to create a class
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateClassRequest {
    #[validate(length(
        min = 1,
        max = 100,
        message = "Name must be between 1 and 100 characters"
    ))]
    pub name: String,

    #[validate(length(max = 100, message = "Subject must be at most 100 characters"))]
    pub subject: Option<String>,

    pub description: Option<String>,
}

/// Request to update a class
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpdateClassRequest {
    #[validate(length(
        min = 1,
        max = 100,
        message = "Name must be between 1 and 100 characters"
    ))]
    pub name: Option<String>,

    #[validate(length(max = 100, message = "Subject must be at most 100 characters"))]
    pub subject: Option<String>,

    pub description: Option<String>,
}

/// Request to add a student to the roster
#[derive(Debug, Deserialize)]
pub struct AddStudentRequest {
    /// Student user id (ObjectId as string)
    pub student_id: String,
}

/// Query params for listing classes
#[derive(Debug, Deserialize, Clone)]
pub struct ListClassesQuery {
    /// Search by name (case-insensitive)
    pub search: Option<String>,

    pub limit: Option<u32>,
    pub offset: Option<u32>,
}
