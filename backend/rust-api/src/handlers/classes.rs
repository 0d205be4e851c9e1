use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use chrono::Utc;
use futures::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, Document};
use std::sync::Arc;
use validator::Validate;

use crate::{
    extractors::AppJson,
    middlewares::auth::JwtClaims,
    models::class_group::{
        AddStudentRequest, ClassGroup, ClassResponse, CreateClassRequest, ListClassesQuery,
        UpdateClassRequest,
    },
    services::AppState,
};

fn parse_object_id(value: &str, what: &str) -> Result<ObjectId, (StatusCode, String)> {
    ObjectId::parse_str(value)
        .map_err(|_| (StatusCode::BAD_REQUEST, format!("Invalid {} ID", what)))
}

fn claims_user_id(claims: &JwtClaims) -> Result<ObjectId, (StatusCode, String)> {
    parse_object_id(&claims.sub, "user")
}

/// GET /api/classes/ - List classes visible to the caller
/// Teachers see classes they own, students classes they belong to,
/// admins everything.
pub async fn list_classes(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Query(query): Query<ListClassesQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let user_id = claims_user_id(&claims)?;

    let mut filter = Document::new();
    match claims.role.as_str() {
        "teacher" => {
            filter.insert("teacherId", user_id);
        }
        "student" => {
            filter.insert("student_ids", user_id);
        }
        _ => {} // admin sees all
    }

    if let Some(search) = &query.search {
        filter.insert("name", doc! { "$regex": search, "$options": "i" });
    }

    let limit = query.limit.unwrap_or(50).min(100) as i64;
    let offset = query.offset.unwrap_or(0) as u64;

    let classes_collection = state.mongo.collection::<ClassGroup>("classes");
    let mut cursor = classes_collection
        .find(filter)
        .limit(limit)
        .skip(offset)
        .await
        .map_err(|e| {
            tracing::error!("Failed to query classes: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;

    let mut classes = Vec::new();
    while let Some(class) = cursor.try_next().await.map_err(|e| {
        tracing::error!("Failed to read class from cursor: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })? {
        classes.push(populate_teacher_name(&state, class).await);
    }

    Ok(Json(classes))
}

/// POST /api/classes/ - Create a class (teacher/admin only)
pub async fn create_class(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    AppJson(req): AppJson<CreateClassRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    if !claims.is_staff() {
        return Err((
            StatusCode::FORBIDDEN,
            "Teacher role required to create classes".to_string(),
        ));
    }

    if let Err(e) = req.validate() {
        return Err((StatusCode::BAD_REQUEST, format!("Validation error: {}", e)));
    }

    let teacher_id = claims_user_id(&claims)?;
    let now = Utc::now();

    let class = ClassGroup {
        id: None,
        name: req.name,
        subject: req.subject,
        teacher_id,
        student_ids: Vec::new(),
        description: req.description,
        created_at: now,
        updated_at: now,
    };

    let classes_collection = state.mongo.collection::<ClassGroup>("classes");
    let insert_result = classes_collection.insert_one(&class).await.map_err(|e| {
        tracing::error!("Failed to create class: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;

    let mut created = class;
    created.id = insert_result.inserted_id.as_object_id();

    tracing::info!(
        class_id = ?created.id.map(|id| id.to_hex()),
        teacher_id = %claims.sub,
        "Class created"
    );

    Ok((
        StatusCode::CREATED,
        Json(populate_teacher_name(&state, created).await),
    ))
}

/// GET /api/classes/{id}
pub async fn get_class(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(class_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let class = load_class(&state, &class_id).await?;
    ensure_class_access(&claims, &class)?;
    Ok(Json(populate_teacher_name(&state, class).await))
}

/// PATCH /api/classes/{id} - Update class metadata (owner or admin)
pub async fn update_class(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(class_id): Path<String>,
    AppJson(req): AppJson<UpdateClassRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    if let Err(e) = req.validate() {
        return Err((StatusCode::BAD_REQUEST, format!("Validation error: {}", e)));
    }

    let class = load_class(&state, &class_id).await?;
    ensure_class_ownership(&claims, &class)?;

    let mut update_fields = Document::new();
    if let Some(name) = &req.name {
        update_fields.insert("name", name);
    }
    if let Some(subject) = &req.subject {
        update_fields.insert("subject", subject);
    }
    if let Some(description) = &req.description {
        update_fields.insert("description", description);
    }
    update_fields.insert("updatedAt", mongodb::bson::DateTime::now());

    if update_fields.len() <= 1 {
        return Err((StatusCode::BAD_REQUEST, "No fields to update".to_string()));
    }

    let object_id = parse_object_id(&class_id, "class")?;
    let classes_collection = state.mongo.collection::<ClassGroup>("classes");
    classes_collection
        .update_one(doc! { "_id": object_id }, doc! { "$set": update_fields })
        .await
        .map_err(|e| {
            tracing::error!("Failed to update class: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;

    let updated = load_class(&state, &class_id).await?;
    Ok(Json(populate_teacher_name(&state, updated).await))
}

/// DELETE /api/classes/{id} - Delete a class (owner or admin)
pub async fn delete_class(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(class_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let class = load_class(&state, &class_id).await?;
    ensure_class_ownership(&claims, &class)?;

    let object_id = parse_object_id(&class_id, "class")?;
    let classes_collection = state.mongo.collection::<ClassGroup>("classes");
    classes_collection
        .delete_one(doc! { "_id": object_id })
        .await
        .map_err(|e| {
            tracing::error!("Failed to delete class: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;

    tracing::info!(class_id = %class_id, "Class deleted");

    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/classes/{id}/students - Add a student to the roster
pub async fn add_student(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(class_id): Path<String>,
    AppJson(req): AppJson<AddStudentRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let class = load_class(&state, &class_id).await?;
    ensure_class_ownership(&claims, &class)?;

    let student_id = parse_object_id(&req.student_id, "student")?;

    // The student must exist and actually be a student
    let users_collection = state.mongo.collection::<Document>("users");
    let student = users_collection
        .find_one(doc! { "_id": student_id, "role": "student" })
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    if student.is_none() {
        return Err((StatusCode::NOT_FOUND, "Student not found".to_string()));
    }

    let object_id = parse_object_id(&class_id, "class")?;
    let classes_collection = state.mongo.collection::<ClassGroup>("classes");
    classes_collection
        .update_one(
            doc! { "_id": object_id },
            doc! {
                "$addToSet": { "student_ids": student_id },
                "$set": { "updatedAt": mongodb::bson::DateTime::now() }
            },
        )
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    // Mirror the membership on the user so JWT claims pick it up
    users_collection
        .update_one(
            doc! { "_id": student_id },
            doc! { "$addToSet": { "class_ids": object_id.to_hex() } },
        )
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let updated = load_class(&state, &class_id).await?;
    Ok(Json(populate_teacher_name(&state, updated).await))
}

/// DELETE /api/classes/{id}/students/{student_id} - Remove from roster
pub async fn remove_student(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path((class_id, student_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let class = load_class(&state, &class_id).await?;
    ensure_class_ownership(&claims, &class)?;

    let object_id = parse_object_id(&class_id, "class")?;
    let student_oid = parse_object_id(&student_id, "student")?;

    let classes_collection = state.mongo.collection::<ClassGroup>("classes");
    classes_collection
        .update_one(
            doc! { "_id": object_id },
            doc! {
                "$pull": { "student_ids": student_oid },
                "$set": { "updatedAt": mongodb::bson::DateTime::now() }
            },
        )
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let users_collection = state.mongo.collection::<Document>("users");
    users_collection
        .update_one(
            doc! { "_id": student_oid },
            doc! { "$pull": { "class_ids": object_id.to_hex() } },
        )
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(StatusCode::NO_CONTENT)
}

async fn load_class(
    state: &AppState,
    class_id: &str,
) -> Result<ClassGroup, (StatusCode, String)> {
    let object_id = parse_object_id(class_id, "class")?;
    let classes_collection = state.mongo.collection::<ClassGroup>("classes");
    classes_collection
        .find_one(doc! { "_id": object_id })
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .ok_or_else(|| (StatusCode::NOT_FOUND, "Class not found".to_string()))
}

/// Members and staff can read a class
fn ensure_class_access(
    claims: &JwtClaims,
    class: &ClassGroup,
) -> Result<(), (StatusCode, String)> {
    if claims.is_staff() {
        return Ok(());
    }
    let is_member = ObjectId::parse_str(&claims.sub)
        .map(|user_id| class.student_ids.contains(&user_id))
        .unwrap_or(false);
    if is_member {
        Ok(())
    } else {
        Err((StatusCode::FORBIDDEN, "Not a member of this class".to_string()))
    }
}

/// Only the owning teacher or an admin may change a class
fn ensure_class_ownership(
    claims: &JwtClaims,
    class: &ClassGroup,
) -> Result<(), (StatusCode, String)> {
    if claims.role == "admin" {
        return Ok(());
    }
    if claims.role == "teacher" && class.teacher_id.to_hex() == claims.sub {
        return Ok(());
    }
    Err((
        StatusCode::FORBIDDEN,
        "Only the owning teacher can modify this class".to_string(),
    ))
}

async fn populate_teacher_name(state: &AppState, class: ClassGroup) -> ClassResponse {
    let teacher_id = class.teacher_id;
    let mut response = ClassResponse::from(class);

    let users_collection = state.mongo.collection::<Document>("users");
    if let Ok(Some(user_doc)) = users_collection.find_one(doc! { "_id": teacher_id }).await {
        response.teacher_name = user_doc.get_str("name").ok().map(|s| s.to_string());
    }

    response
}
