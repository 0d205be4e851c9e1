use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use mongodb::bson::{doc, oid::ObjectId};
use serde_json::json;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

use satprep_api::{config::Config, create_router, services::AppState};

// Fixed ids for seeded fixtures, shared across test binaries
pub const MATH_QUESTION_1: &str = "65f0000000000000000000a1";
pub const MATH_QUESTION_2: &str = "65f0000000000000000000a2";
pub const RW_QUESTION_1: &str = "65f0000000000000000000b1";
pub const EXAM_ID: &str = "65f0000000000000000000e1";

pub async fn create_test_app() -> Router {
    // Initialize tracing for tests
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    // Rate limiting gets in the way of parallel test runs
    std::env::set_var("RATE_LIMIT_DISABLED", "1");

    // Load test environment from .env.test
    dotenvy::from_filename(".env.test").ok();

    // Load test configuration
    let config = Config::load().expect("Failed to load test configuration");

    // Connect to test databases
    let mongo_client = mongodb::Client::with_uri_str(&config.mongo_uri)
        .await
        .expect("Failed to connect to test MongoDB");

    let redis_client =
        redis::Client::open(config.redis_uri.clone()).expect("Failed to create test Redis client");

    // Create app state (connection is established inside)
    let app_state = Arc::new(
        AppState::new(config.clone(), mongo_client.clone(), redis_client)
            .await
            .expect("Failed to initialize test app state"),
    );

    // Seed test data
    seed_test_data(&mongo_client, &config.mongo_database).await;

    // Build test router (same as main app)
    create_router(app_state)
}

async fn seed_test_data(mongo_client: &mongodb::Client, db_name: &str) {
    let db = mongo_client.database(db_name);
    let questions = db.collection::<mongodb::bson::Document>("questions");

    let fixtures = [
        doc! {
            "_id": oid(MATH_QUESTION_1),
            "text": "If 2x + 3 = 11, what is the value of x?",
            "type": "multiple_choice",
            "options": ["2", "4", "6", "8"],
            "correct_answer": "4",
            "section": "math",
            "difficulty": "easy",
            "createdBy": ObjectId::new(),
            "createdAt": mongodb::bson::DateTime::now(),
        },
        doc! {
            "_id": oid(MATH_QUESTION_2),
            "text": "A line passes through (0, 2) and (4, 10). What is its slope?",
            "type": "grid_in",
            "options": [],
            "correct_answer": "2",
            "section": "math",
            "difficulty": "medium",
            "createdBy": ObjectId::new(),
            "createdAt": mongodb::bson::DateTime::now(),
        },
        doc! {
            "_id": oid(RW_QUESTION_1),
            "text": "Which choice best maintains the tone of the passage?",
            "type": "multiple_choice",
            "options": ["A", "B", "C", "D"],
            "correct_answer": "B",
            "section": "reading_writing",
            "difficulty": "medium",
            "createdBy": ObjectId::new(),
            "createdAt": mongodb::bson::DateTime::now(),
        },
    ];

    for fixture in fixtures {
        insert_ignoring_duplicates(&questions, fixture).await;
    }

    let exams = db.collection::<mongodb::bson::Document>("bluebook_exams");
    insert_ignoring_duplicates(
        &exams,
        doc! {
            "_id": oid(EXAM_ID),
            "title": "Practice Test 1",
            "description": "Seeded practice exam for integration tests",
            "modules": [
                {
                    "label": "Module 1",
                    "section": "reading_writing",
                    "duration_seconds": 60,
                    "question_ids": [oid(RW_QUESTION_1)],
                },
                {
                    "label": "Module 2",
                    "section": "math",
                    "duration_seconds": 60,
                    "question_ids": [oid(MATH_QUESTION_1), oid(MATH_QUESTION_2)],
                },
            ],
            "createdAt": mongodb::bson::DateTime::now(),
        },
    )
    .await;
}

async fn insert_ignoring_duplicates(
    collection: &mongodb::Collection<mongodb::bson::Document>,
    fixture: mongodb::bson::Document,
) {
    if let Err(e) = collection.insert_one(fixture).await {
        // Ignore duplicate key error (race condition with parallel tests)
        if let mongodb::error::ErrorKind::Write(mongodb::error::WriteFailure::WriteError(ref we)) =
            *e.kind
        {
            if we.code == 11000 {
                return;
            }
        }
        panic!("Failed to seed test fixture: {:?}", e);
    }
}

pub fn oid(hex: &str) -> ObjectId {
    ObjectId::parse_str(hex).expect("fixture id must be valid")
}

/// Register a fresh user with the given role; returns (user_id, access_token)
pub async fn register_user(app: &Router, role: &str) -> (String, String) {
    let email = format!("{}-{}@test.com", role, Uuid::new_v4());
    let body = json!({
        "email": email,
        "password": "Passw0rd!#%",
        "name": format!("Test {}", role),
        "role": role,
    });

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/auth/register")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    if status != StatusCode::CREATED {
        panic!(
            "registration failed with {} body {}",
            status,
            String::from_utf8_lossy(&bytes)
        );
    }

    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    let user_id = json["user"]["id"].as_str().unwrap().to_string();
    let token = json["access_token"].as_str().unwrap().to_string();

    (user_id, token)
}

/// Convenience wrapper for an authenticated JSON request
pub async fn request_json(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let mut builder = Request::builder().method(method).uri(uri);

    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }

    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();

    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };

    (status, json)
}
