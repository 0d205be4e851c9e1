use axum::{http::StatusCode, Router};
use chrono::{Duration, Utc};
use serde_json::json;

mod common;

/// teacher creates a class, enrolls the student, assigns homework over
/// the seeded questions; returns (class_id, homework_id)
async fn set_up_assignment(
    app: &Router,
    teacher_token: &str,
    student_id: &str,
    due_in: Duration,
) -> (String, String) {
    let (status, class) = common::request_json(
        app,
        "POST",
        "/api/classes/",
        Some(teacher_token),
        Some(json!({ "name": "SAT Prep A", "subject": "SAT Math" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "class creation failed: {class}");
    let class_id = class["id"].as_str().unwrap().to_string();

    let (status, _) = common::request_json(
        app,
        "POST",
        &format!("/api/classes/{}/students", class_id),
        Some(teacher_token),
        Some(json!({ "student_id": student_id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let due_date = (Utc::now() + due_in).to_rfc3339();
    let (status, homework) = common::request_json(
        app,
        "POST",
        "/api/homework/",
        Some(teacher_token),
        Some(json!({
            "title": "Linear equations drill",
            "class_id": class_id,
            "question_ids": [common::MATH_QUESTION_1, common::MATH_QUESTION_2],
            "due_date": due_date,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "homework creation failed: {homework}");
    let homework_id = homework["_id"]["$oid"]
        .as_str()
        .or_else(|| homework["_id"].as_str())
        .unwrap()
        .to_string();

    (class_id, homework_id)
}

#[tokio::test]
async fn test_submit_homework_computes_auto_score() {
    let app = common::create_test_app().await;
    let (_, teacher_token) = common::register_user(&app, "teacher").await;
    let (student_id, student_token) = common::register_user(&app, "student").await;

    let (_, homework_id) =
        set_up_assignment(&app, &teacher_token, &student_id, Duration::days(3)).await;

    // One request: the full answer map plus elapsed time
    let (status, submission) = common::request_json(
        &app,
        "POST",
        &format!("/api/homework/{}/submit", homework_id),
        Some(&student_token),
        Some(json!({
            "answers": {
                (common::MATH_QUESTION_1): "4",
                (common::MATH_QUESTION_2): "7",
            },
            "elapsed_seconds": 540,
        })),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED, "submit failed: {submission}");
    // One of two correct
    assert_eq!(submission["auto_score"], 50);
    assert_eq!(submission["score"], 50);
    assert_eq!(submission["late"], false);
    assert_eq!(submission["elapsed_seconds"], 540);
    assert_eq!(submission["graded"], false);
}

#[tokio::test]
async fn test_duplicate_submission_is_conflict() {
    let app = common::create_test_app().await;
    let (_, teacher_token) = common::register_user(&app, "teacher").await;
    let (student_id, student_token) = common::register_user(&app, "student").await;

    let (_, homework_id) =
        set_up_assignment(&app, &teacher_token, &student_id, Duration::days(3)).await;

    let payload = json!({
        "answers": { (common::MATH_QUESTION_1): "4" },
        "elapsed_seconds": 60,
    });

    let (status, _) = common::request_json(
        &app,
        "POST",
        &format!("/api/homework/{}/submit", homework_id),
        Some(&student_token),
        Some(payload.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    // The double-fire path: an identical second submit must not create a
    // second record
    let (status, _) = common::request_json(
        &app,
        "POST",
        &format!("/api/homework/{}/submit", homework_id),
        Some(&student_token),
        Some(payload),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_negative_elapsed_time_rejected() {
    let app = common::create_test_app().await;
    let (_, teacher_token) = common::register_user(&app, "teacher").await;
    let (student_id, student_token) = common::register_user(&app, "student").await;

    let (_, homework_id) =
        set_up_assignment(&app, &teacher_token, &student_id, Duration::days(3)).await;

    let (status, _) = common::request_json(
        &app,
        "POST",
        &format!("/api/homework/{}/submit", homework_id),
        Some(&student_token),
        Some(json!({
            "answers": { (common::MATH_QUESTION_1): "4" },
            "elapsed_seconds": -5,
        })),
    )
    .await;

    // elapsed time is non-negative by type; -5 fails deserialization
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_answers_must_reference_assigned_questions() {
    let app = common::create_test_app().await;
    let (_, teacher_token) = common::register_user(&app, "teacher").await;
    let (student_id, student_token) = common::register_user(&app, "student").await;

    let (_, homework_id) =
        set_up_assignment(&app, &teacher_token, &student_id, Duration::days(3)).await;

    let (status, _) = common::request_json(
        &app,
        "POST",
        &format!("/api/homework/{}/submit", homework_id),
        Some(&student_token),
        Some(json!({
            // RW question is not part of this assignment
            "answers": { (common::RW_QUESTION_1): "B" },
            "elapsed_seconds": 60,
        })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_status_derivation_in_listing() {
    let app = common::create_test_app().await;
    let (_, teacher_token) = common::register_user(&app, "teacher").await;
    let (student_id, student_token) = common::register_user(&app, "student").await;

    // One assignment still open, one already past due
    let (_, open_id) =
        set_up_assignment(&app, &teacher_token, &student_id, Duration::days(3)).await;
    let (_, overdue_id) =
        set_up_assignment(&app, &teacher_token, &student_id, Duration::days(-1)).await;

    let (status, list) =
        common::request_json(&app, "GET", "/api/homework/", Some(&student_token), None).await;
    assert_eq!(status, StatusCode::OK);

    let list = list.as_array().unwrap();
    let find = |id: &str| {
        list.iter()
            .find(|hw| hw["id"] == id)
            .unwrap_or_else(|| panic!("assignment {id} missing from listing"))
    };

    assert_eq!(find(&open_id)["status"], "pending");
    assert_eq!(find(&overdue_id)["status"], "overdue");

    // Submitting flips the open one to submitted
    let (status, _) = common::request_json(
        &app,
        "POST",
        &format!("/api/homework/{}/submit", open_id),
        Some(&student_token),
        Some(json!({
            "answers": { (common::MATH_QUESTION_1): "4" },
            "elapsed_seconds": 120,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, list) =
        common::request_json(&app, "GET", "/api/homework/", Some(&student_token), None).await;
    let list = list.as_array().unwrap();
    let submitted = list.iter().find(|hw| hw["id"] == open_id.as_str()).unwrap();
    assert_eq!(submitted["status"], "submitted");

    // The status filter partitions the same list
    let (status, pending_only) = common::request_json(
        &app,
        "GET",
        "/api/homework/?status=pending",
        Some(&student_token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    for hw in pending_only.as_array().unwrap() {
        assert_eq!(hw["status"], "pending");
    }
}

#[tokio::test]
async fn test_late_submission_is_flagged() {
    let app = common::create_test_app().await;
    let (_, teacher_token) = common::register_user(&app, "teacher").await;
    let (student_id, student_token) = common::register_user(&app, "student").await;

    let (_, homework_id) =
        set_up_assignment(&app, &teacher_token, &student_id, Duration::hours(-2)).await;

    let (status, submission) = common::request_json(
        &app,
        "POST",
        &format!("/api/homework/{}/submit", homework_id),
        Some(&student_token),
        Some(json!({
            "answers": { (common::MATH_QUESTION_1): "4" },
            "elapsed_seconds": 30,
        })),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(submission["late"], true);
}

#[tokio::test]
async fn test_grading_override_and_overwrite() {
    let app = common::create_test_app().await;
    let (_, teacher_token) = common::register_user(&app, "teacher").await;
    let (student_id, student_token) = common::register_user(&app, "student").await;

    let (_, homework_id) =
        set_up_assignment(&app, &teacher_token, &student_id, Duration::days(3)).await;

    let (status, submission) = common::request_json(
        &app,
        "POST",
        &format!("/api/homework/{}/submit", homework_id),
        Some(&student_token),
        Some(json!({
            "answers": { (common::MATH_QUESTION_1): "4", (common::MATH_QUESTION_2): "2" },
            "elapsed_seconds": 300,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let submission_id = submission["id"].as_str().unwrap().to_string();
    assert_eq!(submission["auto_score"], 100);

    // Manual override plus feedback
    let (status, graded) = common::request_json(
        &app,
        "PUT",
        &format!("/api/homework/{}/submissions/{}/grade", homework_id, submission_id),
        Some(&teacher_token),
        Some(json!({ "score_override": 85, "feedback": "Show your work on #2." })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "grading failed: {graded}");
    assert_eq!(graded["score_override"], 85);
    assert_eq!(graded["score"], 85);
    assert_eq!(graded["feedback"], "Show your work on #2.");
    assert_eq!(graded["graded"], true);

    // A second grading request overwrites the first wholesale
    let (status, regraded) = common::request_json(
        &app,
        "PUT",
        &format!("/api/homework/{}/submissions/{}/grade", homework_id, submission_id),
        Some(&teacher_token),
        Some(json!({ "feedback": "Revised after review." })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    // Override cleared: the auto score is authoritative again
    assert_eq!(regraded["score"], 100);
    assert_eq!(regraded["feedback"], "Revised after review.");
}

#[tokio::test]
async fn test_students_cannot_grade() {
    let app = common::create_test_app().await;
    let (_, teacher_token) = common::register_user(&app, "teacher").await;
    let (student_id, student_token) = common::register_user(&app, "student").await;

    let (_, homework_id) =
        set_up_assignment(&app, &teacher_token, &student_id, Duration::days(3)).await;

    let (status, submission) = common::request_json(
        &app,
        "POST",
        &format!("/api/homework/{}/submit", homework_id),
        Some(&student_token),
        Some(json!({
            "answers": { (common::MATH_QUESTION_1): "4" },
            "elapsed_seconds": 60,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let submission_id = submission["id"].as_str().unwrap().to_string();

    let (status, _) = common::request_json(
        &app,
        "PUT",
        &format!("/api/homework/{}/submissions/{}/grade", homework_id, submission_id),
        Some(&student_token),
        Some(json!({ "score_override": 100 })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_student_detail_has_redacted_questions() {
    let app = common::create_test_app().await;
    let (_, teacher_token) = common::register_user(&app, "teacher").await;
    let (student_id, student_token) = common::register_user(&app, "student").await;

    let (_, homework_id) =
        set_up_assignment(&app, &teacher_token, &student_id, Duration::days(3)).await;

    let (status, detail) = common::request_json(
        &app,
        "GET",
        &format!("/api/homework/{}", homework_id),
        Some(&student_token),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let questions = detail["questions"].as_array().unwrap();
    assert_eq!(questions.len(), 2);
    for question in questions {
        assert!(question.get("correct_answer").is_none());
        assert!(question.get("explanation").is_none());
    }
}
