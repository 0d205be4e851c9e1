use axum::http::StatusCode;
use serde_json::json;

mod common;

async fn create_card(app: &axum::Router, token: &str, word: &str) -> String {
    let (status, card) = common::request_json(
        app,
        "POST",
        "/api/flashcards/",
        Some(token),
        Some(json!({
            "word": word,
            "definition": "requiring great effort",
            "part_of_speech": "adjective",
            "difficulty": "medium",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "card creation failed: {card}");
    card["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_create_and_list_own_cards() {
    let app = common::create_test_app().await;
    let (_, token) = common::register_user(&app, "student").await;

    create_card(&app, &token, "arduous").await;
    create_card(&app, &token, "laconic").await;

    let (status, cards) =
        common::request_json(&app, "GET", "/api/flashcards/", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);

    let cards = cards.as_array().unwrap();
    assert_eq!(cards.len(), 2);

    // Word search narrows the list
    let (status, filtered) = common::request_json(
        &app,
        "GET",
        "/api/flashcards/?search=ard",
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let filtered = filtered.as_array().unwrap();
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0]["word"], "arduous");
}

#[tokio::test]
async fn test_review_outcome_moves_difficulty() {
    let app = common::create_test_app().await;
    let (_, token) = common::register_user(&app, "student").await;

    let card_id = create_card(&app, &token, "ubiquitous").await;

    // A miss drifts toward hard
    let (status, card) = common::request_json(
        &app,
        "POST",
        &format!("/api/flashcards/{}/review", card_id),
        Some(&token),
        Some(json!({ "outcome": "again" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(card["difficulty"], "hard");
    assert_eq!(card["times_reviewed"], 1);
    assert!(card["last_reviewed_at"].is_string());

    // Two easy recalls walk it back down
    for expected in ["medium", "easy"] {
        let (status, card) = common::request_json(
            &app,
            "POST",
            &format!("/api/flashcards/{}/review", card_id),
            Some(&token),
            Some(json!({ "outcome": "easy" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(card["difficulty"], expected);
    }
}

#[tokio::test]
async fn test_cards_are_private_to_owner() {
    let app = common::create_test_app().await;
    let (_, owner_token) = common::register_user(&app, "student").await;
    let (_, other_token) = common::register_user(&app, "student").await;

    let card_id = create_card(&app, &owner_token, "ephemeral").await;

    // Another user cannot see, update or review it
    let (status, _) = common::request_json(
        &app,
        "GET",
        &format!("/api/flashcards/{}", card_id),
        Some(&other_token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = common::request_json(
        &app,
        "POST",
        &format!("/api/flashcards/{}/review", card_id),
        Some(&other_token),
        Some(json!({ "outcome": "good" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_review_batch_caps_count() {
    let app = common::create_test_app().await;
    let (_, token) = common::register_user(&app, "student").await;

    for word in ["alacrity", "brevity", "candor", "dearth", "enmity"] {
        create_card(&app, &token, word).await;
    }

    let (status, batch) = common::request_json(
        &app,
        "GET",
        "/api/flashcards/review?count=3",
        Some(&token),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(batch.as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_update_and_delete_card() {
    let app = common::create_test_app().await;
    let (_, token) = common::register_user(&app, "student").await;

    let card_id = create_card(&app, &token, "mispeled").await;

    let (status, updated) = common::request_json(
        &app,
        "PATCH",
        &format!("/api/flashcards/{}", card_id),
        Some(&token),
        Some(json!({ "word": "misspelled" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["word"], "misspelled");

    let (status, _) = common::request_json(
        &app,
        "DELETE",
        &format!("/api/flashcards/{}", card_id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = common::request_json(
        &app,
        "GET",
        &format!("/api/flashcards/{}", card_id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
