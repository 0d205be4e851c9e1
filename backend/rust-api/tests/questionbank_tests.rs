use axum::http::StatusCode;
use serde_json::json;

mod common;

#[tokio::test]
async fn test_students_cannot_create_questions() {
    let app = common::create_test_app().await;
    let (_, student_token) = common::register_user(&app, "student").await;

    let (status, _) = common::request_json(
        &app,
        "POST",
        "/api/questionbank/",
        Some(&student_token),
        Some(json!({
            "text": "What is 1 + 1?",
            "type": "multiple_choice",
            "options": ["1", "2"],
            "correct_answer": "2",
            "section": "math",
            "difficulty": "easy",
        })),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_multiple_choice_needs_correct_answer_among_options() {
    let app = common::create_test_app().await;
    let (_, teacher_token) = common::register_user(&app, "teacher").await;

    let (status, _) = common::request_json(
        &app,
        "POST",
        "/api/questionbank/",
        Some(&teacher_token),
        Some(json!({
            "text": "Pick the synonym of 'arduous'.",
            "type": "multiple_choice",
            "options": ["easy", "bright"],
            "correct_answer": "difficult",
            "section": "reading_writing",
            "difficulty": "medium",
        })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_create_update_delete_question() {
    let app = common::create_test_app().await;
    let (_, teacher_token) = common::register_user(&app, "teacher").await;

    let (status, created) = common::request_json(
        &app,
        "POST",
        "/api/questionbank/",
        Some(&teacher_token),
        Some(json!({
            "text": "What is 15% of 80?",
            "type": "grid_in",
            "options": [],
            "correct_answer": "12",
            "section": "math",
            "difficulty": "easy",
            "explanation": "0.15 * 80 = 12",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "create failed: {created}");

    let question_id = created["_id"]["$oid"]
        .as_str()
        .or_else(|| created["_id"].as_str())
        .unwrap()
        .to_string();

    let (status, updated) = common::request_json(
        &app,
        "PATCH",
        &format!("/api/questionbank/{}", question_id),
        Some(&teacher_token),
        Some(json!({ "difficulty": "medium" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "update failed: {updated}");
    assert_eq!(updated["difficulty"], "medium");

    let (status, _) = common::request_json(
        &app,
        "DELETE",
        &format!("/api/questionbank/{}", question_id),
        Some(&teacher_token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = common::request_json(
        &app,
        "GET",
        &format!("/api/questionbank/{}", question_id),
        Some(&teacher_token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_student_listing_is_redacted() {
    let app = common::create_test_app().await;
    let (_, teacher_token) = common::register_user(&app, "teacher").await;
    let (_, student_token) = common::register_user(&app, "student").await;

    // Students never see answers or explanations
    let (status, questions) = common::request_json(
        &app,
        "GET",
        "/api/questionbank/?section=math",
        Some(&student_token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let questions = questions.as_array().unwrap();
    assert!(!questions.is_empty());
    for question in questions {
        assert!(question.get("correct_answer").is_none());
        assert!(question.get("explanation").is_none());
    }

    // Teachers see the full record
    let (status, questions) = common::request_json(
        &app,
        "GET",
        "/api/questionbank/?section=math",
        Some(&teacher_token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let questions = questions.as_array().unwrap();
    assert!(questions
        .iter()
        .all(|question| question.get("correct_answer").is_some()));
}

#[tokio::test]
async fn test_text_search_filter() {
    let app = common::create_test_app().await;
    let (_, teacher_token) = common::register_user(&app, "teacher").await;

    let (status, questions) = common::request_json(
        &app,
        "GET",
        "/api/questionbank/?search=slope",
        Some(&teacher_token),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    for question in questions.as_array().unwrap() {
        assert!(question["text"]
            .as_str()
            .unwrap()
            .to_lowercase()
            .contains("slope"));
    }
}
