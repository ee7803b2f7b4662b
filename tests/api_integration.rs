//! Integration tests for the HealthQuest API endpoints.
//!
//! These tests drive the full request/response cycle through the router, with a fixed clock.

use std::sync::Arc;

use axum::http::StatusCode;
use axum_test::TestServer;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Value, json};

use healthquest::api::{AppState, router};
use healthquest::clock::FixedClock;
use healthquest::period::Zone;
use healthquest::storage::Storage;
use healthquest::tracker::{Tracker, TrackerConfig};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 14, 20, 0, 0).unwrap()
}

async fn create_test_server() -> (TestServer, Tracker) {
    let storage = Storage::new("sqlite::memory:").await.unwrap();
    let tracker = Tracker::new(
        storage,
        TrackerConfig::standard(Zone::utc()).unwrap(),
        Arc::new(FixedClock::new(now())),
    );
    tracker.seed_challenges().await.unwrap();

    let app = router(AppState {
        tracker: tracker.clone(),
    });

    (TestServer::new(app).unwrap(), tracker)
}

async fn create_owner(tracker: &Tracker, name: &str) -> i64 {
    tracker.storage().create_owner(name, true).await.unwrap()
}

async fn challenge_id(server: &TestServer, name: &str) -> i64 {
    let challenges: Vec<Value> = server.get("/challenges").await.json();
    challenges
        .iter()
        .find(|c| c["name"] == name)
        .and_then(|c| c["id"].as_i64())
        .unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let (server, _) = create_test_server().await;

    let response = server.get("/health").await;

    response.assert_status_ok();
}

#[tokio::test]
async fn test_post_sample() {
    let (server, tracker) = create_test_server().await;
    let owner = create_owner(&tracker, "ada").await;

    let response = server
        .post(&format!("/owners/{owner}/samples"))
        .json(&json!({
            "metric": "latest_steps_taken",
            "value": 4200,
            "recorded_at": "2024-05-14T08:00:00Z"
        }))
        .await;

    response.assert_status(StatusCode::CREATED);
    let body: Value = response.json();
    assert_eq!(body["metric"], "latest_steps_taken");
    assert_eq!(body["value"], 4200.0);

    let recent: Vec<Value> = server
        .get(&format!("/owners/{owner}/samples?limit=5"))
        .await
        .json();
    assert_eq!(recent.len(), 1);
}

#[tokio::test]
async fn test_post_sample_default_timestamp() {
    let (server, tracker) = create_test_server().await;
    let owner = create_owner(&tracker, "ada").await;

    let response = server
        .post(&format!("/owners/{owner}/samples"))
        .json(&json!({ "metric": "latest_water_intake", "value": 0.5 }))
        .await;

    response.assert_status(StatusCode::CREATED);
    let body: Value = response.json();
    assert_eq!(body["recorded_at"], "2024-05-14T20:00:00Z");
}

#[tokio::test]
async fn test_post_sample_unknown_owner() {
    let (server, _) = create_test_server().await;

    let response = server
        .post("/owners/999/samples")
        .json(&json!({ "metric": "latest_steps_taken", "value": 10 }))
        .expect_failure()
        .await;

    response.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_goal_lifecycle() {
    let (server, tracker) = create_test_server().await;
    let owner = create_owner(&tracker, "ada").await;

    let response = server
        .put(&format!("/owners/{owner}/goals"))
        .json(&json!({
            "metric": "latest_steps_taken",
            "target_value": 5000,
            "period": "daily"
        }))
        .await;
    response.assert_status_ok();
    let goal: Value = response.json();
    let goal_id = goal["id"].as_i64().unwrap();

    // Saving again overwrites the target instead of adding a goal.
    server
        .put(&format!("/owners/{owner}/goals"))
        .json(&json!({
            "metric": "latest_steps_taken",
            "target_value": 8000,
            "period": "daily"
        }))
        .await
        .assert_status_ok();

    let goals: Vec<Value> = server.get(&format!("/owners/{owner}/goals")).await.json();
    assert_eq!(goals.len(), 1);
    assert_eq!(goals[0]["target_value"], 8000.0);

    server
        .delete(&format!("/goals/{goal_id}"))
        .await
        .assert_status(StatusCode::NO_CONTENT);
    server
        .delete(&format!("/goals/{goal_id}"))
        .expect_failure()
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_goal_is_rejected() {
    let (server, tracker) = create_test_server().await;
    let owner = create_owner(&tracker, "ada").await;

    let response = server
        .put(&format!("/owners/{owner}/goals"))
        .json(&json!({ "metric": "latest_steps_taken", "target_value": 0, "period": "daily" }))
        .expect_failure()
        .await;
    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = response.json();
    assert!(body["error"].as_str().unwrap().contains("positive"));

    // Weight goals are monthly only.
    server
        .put(&format!("/owners/{owner}/goals"))
        .json(&json!({ "metric": "latest_weight", "target_value": 70, "period": "weekly" }))
        .expect_failure()
        .await
        .assert_status(StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_goal_progress() {
    let (server, tracker) = create_test_server().await;
    let owner = create_owner(&tracker, "ada").await;

    for (value, at) in [(2000, "2024-05-14T08:00:00Z"), (500, "2024-05-13T08:00:00Z")] {
        server
            .post(&format!("/owners/{owner}/samples"))
            .json(&json!({ "metric": "latest_steps_taken", "value": value, "recorded_at": at }))
            .await
            .assert_status(StatusCode::CREATED);
    }

    let response = server
        .get(&format!(
            "/owners/{owner}/goals/progress?metric=latest_steps_taken&period=daily&target=5000"
        ))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["behavior"], "cumulative");
    assert_eq!(body["window_start"], "2024-05-14T00:00:00Z");
    assert_eq!(body["progress_value"], 2000.0);
    assert_eq!(body["percent_complete"], 40.0);
    assert_eq!(body["has_data"], true);
    assert_eq!(body["series"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_goal_progress_without_history() {
    let (server, tracker) = create_test_server().await;
    let owner = create_owner(&tracker, "ada").await;

    let response = server
        .get(&format!(
            "/owners/{owner}/goals/progress?metric=latest_fasting_blood_sugar&period=daily"
        ))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["progress_value"], 0.0);
    assert_eq!(body["has_data"], false);
    assert_eq!(body["window_start"], Value::Null);
}

#[tokio::test]
async fn test_weekly_goal_progress_with_other_metrics_only() {
    let (server, tracker) = create_test_server().await;
    let owner = create_owner(&tracker, "ada").await;
    server
        .post(&format!("/owners/{owner}/samples"))
        .json(&json!({ "metric": "latest_water_intake", "value": 1.5 }))
        .await
        .assert_status(StatusCode::CREATED);

    let response = server
        .get(&format!(
            "/owners/{owner}/goals/progress?metric=latest_steps_taken&period=weekly&target=70000"
        ))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["window_start"], Value::Null);
    assert_eq!(body["window_end"], Value::Null);
    assert_eq!(body["progress_value"], 0.0);
    assert_eq!(body["percent_complete"], 0.0);
    assert_eq!(body["series"], json!([]));
}

#[tokio::test]
async fn test_challenge_completion_credits_once() {
    let (server, tracker) = create_test_server().await;
    let owner = create_owner(&tracker, "ada").await;
    let daily_steps = challenge_id(&server, "Daily Steps").await;

    for _ in 0..3 {
        server
            .post(&format!("/owners/{owner}/samples"))
            .json(&json!({ "metric": "latest_steps_taken", "value": 6000 }))
            .await
            .assert_status(StatusCode::CREATED);
    }

    let status: Value = server
        .get(&format!("/owners/{owner}/challenges/{daily_steps}"))
        .await
        .json();
    assert_eq!(status["completed"], true);
    assert_eq!(status["state"], "completed");
    assert_eq!(status["progress"], 10000.0);

    server
        .post(&format!("/owners/{owner}/challenges/refresh"))
        .await
        .assert_status_ok();

    let points: Value = server.get(&format!("/owners/{owner}/points")).await.json();
    assert_eq!(points["balance"], 50);
}

#[tokio::test]
async fn test_refresh_and_nearly_complete() {
    let (server, tracker) = create_test_server().await;
    let owner = create_owner(&tracker, "ada").await;

    server
        .post(&format!("/owners/{owner}/samples"))
        .json(&json!({ "metric": "latest_calories_burned", "value": 400 }))
        .await
        .assert_status(StatusCode::CREATED);

    let summary: Value = server
        .post(&format!("/owners/{owner}/challenges/refresh"))
        .await
        .json();
    assert_eq!(summary["evaluated"], 12);
    assert_eq!(summary["newly_completed"], 0);
    assert_eq!(summary["failed"], 0);

    let nearly: Vec<Value> = server
        .get(&format!("/owners/{owner}/challenges/nearly-complete?top=1"))
        .await
        .json();
    assert_eq!(nearly.len(), 1);
    assert_eq!(nearly[0]["name"], "Daily Calories Burned");

    let all: Vec<Value> = server.get(&format!("/owners/{owner}/challenges")).await.json();
    assert_eq!(all.len(), 12);
}

#[tokio::test]
async fn test_unknown_challenge() {
    let (server, tracker) = create_test_server().await;
    let owner = create_owner(&tracker, "ada").await;

    server
        .get(&format!("/owners/{owner}/challenges/9999"))
        .expect_failure()
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_claim_rejected_when_balance_too_low() {
    let (server, tracker) = create_test_server().await;
    let owner = create_owner(&tracker, "ada").await;

    server
        .post(&format!("/owners/{owner}/points"))
        .json(&json!({ "amount": 200 }))
        .await
        .assert_status_ok();

    let response = server
        .post(&format!("/owners/{owner}/rewards/legend/claim"))
        .expect_failure()
        .await;
    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);

    let points: Value = server.get(&format!("/owners/{owner}/points")).await.json();
    assert_eq!(points["balance"], 200);
}

#[tokio::test]
async fn test_claim_reward() {
    let (server, tracker) = create_test_server().await;
    let owner = create_owner(&tracker, "ada").await;

    server
        .post(&format!("/owners/{owner}/points"))
        .json(&json!({ "amount": 250 }))
        .await
        .assert_status_ok();

    let response = server
        .post(&format!("/owners/{owner}/rewards/stepper/claim"))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["balance"], 150);

    server
        .post(&format!("/owners/{owner}/rewards/stepper/claim"))
        .expect_failure()
        .await
        .assert_status(StatusCode::UNPROCESSABLE_ENTITY);

    let claims: Vec<Value> = server.get(&format!("/owners/{owner}/rewards")).await.json();
    assert_eq!(claims.len(), 1);
    assert_eq!(claims[0]["reward_name"], "Golden Stepper Badge");

    let catalog: Vec<Value> = server.get("/rewards").await.json();
    assert_eq!(catalog.len(), 8);
}

#[tokio::test]
async fn test_negative_credit_is_rejected() {
    let (server, tracker) = create_test_server().await;
    let owner = create_owner(&tracker, "ada").await;

    server
        .post(&format!("/owners/{owner}/points"))
        .json(&json!({ "amount": -10 }))
        .expect_failure()
        .await
        .assert_status(StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_summary_and_streak() {
    let (server, tracker) = create_test_server().await;
    let owner = create_owner(&tracker, "ada").await;

    for at in ["2024-05-13T09:00:00Z", "2024-05-14T09:00:00Z", "2024-05-14T12:00:00Z"] {
        server
            .post(&format!("/owners/{owner}/samples"))
            .json(&json!({ "metric": "latest_steps_taken", "value": 1000, "recorded_at": at }))
            .await
            .assert_status(StatusCode::CREATED);
    }

    let summary: Vec<Value> = server
        .get(&format!("/owners/{owner}/summary?period=weekly"))
        .await
        .json();
    assert_eq!(summary.len(), 1);
    assert_eq!(summary[0]["metric"], "latest_steps_taken");
    assert_eq!(summary[0]["value"], 3000.0);
    assert_eq!(summary[0]["category"], "activity");
    assert_eq!(summary[0]["band"], Value::Null);

    let daily: Vec<Value> = server
        .get(&format!("/owners/{owner}/summary?period=daily"))
        .await
        .json();
    assert_eq!(daily[0]["value"], 2000.0);
    assert_eq!(daily[0]["band"], "critical");

    let streak: Value = server.get(&format!("/owners/{owner}/streak")).await.json();
    assert_eq!(streak["days"], 2);
}

#[tokio::test]
async fn test_leaderboards() {
    let (server, tracker) = create_test_server().await;
    let ada = create_owner(&tracker, "ada").await;
    let bo = create_owner(&tracker, "bo").await;

    for (owner, value) in [(ada, 3000), (bo, 8000)] {
        server
            .post(&format!("/owners/{owner}/samples"))
            .json(&json!({ "metric": "latest_steps_taken", "value": value }))
            .await
            .assert_status(StatusCode::CREATED);
    }

    let board: Vec<Value> = server
        .get("/leaderboard/latest_steps_taken?timeframe=daily")
        .await
        .json();
    assert_eq!(board.len(), 2);
    assert_eq!(board[0]["display_name"], "bo");
    assert_eq!(board[0]["rank"], 1);
    assert_eq!(board[1]["score"], 3000.0);

    server
        .get("/leaderboard/steps")
        .expect_failure()
        .await
        .assert_status(StatusCode::UNPROCESSABLE_ENTITY);

    let points: Vec<Value> = server.get("/leaderboard/points").await.json();
    assert_eq!(points.len(), 2);
}
