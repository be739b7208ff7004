//! `/api/v1/jobs` and the continuity view, end to end through the router.

mod common;

use std::sync::Arc;

use axum::http::StatusCode;
use common::{body_json, build_test_app, get, post_empty, post_json, wait_for_status, TestProvider};
use serde_json::json;

const TERMINAL: &[&str] = &["completed", "failed", "canceled"];

fn shot_body(shot_id: &str, variation: &str) -> serde_json::Value {
    json!({
        "type": "generate-shot",
        "projectId": common::PROJECT,
        "shotId": shot_id,
        "variation": variation,
    })
}

#[tokio::test]
async fn create_job_runs_to_completion() {
    let app = build_test_app(Arc::new(TestProvider::ready()));
    app.write("prompts/compiled/SHOT_01/A.txt", "Wide shot of the harbour");

    let response = post_json(&app.router, "/api/v1/jobs", shot_body("SHOT_01", "A")).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let json = body_json(response).await;
    assert_eq!(json["data"]["lockKey"], "demo:SHOT_01:A");
    assert_eq!(json["data"]["status"], "queued");
    let job_id = json["data"]["jobId"].as_str().unwrap().to_string();

    let job = wait_for_status(&app.router, &format!("/api/v1/jobs/{job_id}"), TERMINAL).await;
    assert_eq!(job["data"]["status"], "completed", "{}", job["data"]["error"]);
    assert_eq!(app.read("renders/SHOT_01/A/first.png").unwrap(), b"first");

    let history = body_json(get(&app.router, &format!("/api/v1/jobs/{job_id}/history")).await).await;
    let events = history["data"].as_array().unwrap();
    assert_eq!(events.first().unwrap()["event"], "JOB_QUEUED");
    assert_eq!(events.last().unwrap()["event"], "JOB_COMPLETED");

    let listed = body_json(get(&app.router, "/api/v1/jobs?status=completed").await).await;
    assert_eq!(listed["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn malformed_body_is_a_validation_error() {
    let app = build_test_app(Arc::new(TestProvider::ready()));

    let response = post_json(&app.router, "/api/v1/jobs", json!({ "type": "paint-fence" })).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "VALIDATION_FAILED");

    let response = post_empty(&app.router, "/api/v1/jobs").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn second_job_on_same_key_returns_lock_conflict() {
    let provider = Arc::new(TestProvider::held());
    let app = build_test_app(Arc::clone(&provider));
    app.write("prompts/compiled/SHOT_02/B.txt", "Close up");

    let first = body_json(post_json(&app.router, "/api/v1/jobs", shot_body("SHOT_02", "B")).await).await;
    let first_id = first["data"]["jobId"].as_str().unwrap().to_string();

    let response = post_json(&app.router, "/api/v1/jobs", shot_body("SHOT_02", "B")).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let json = body_json(response).await;
    assert_eq!(json["code"], "LOCK_CONFLICT");
    assert_eq!(json["activeId"], first_id.as_str());

    // A different variation is a different key.
    let response = post_json(&app.router, "/api/v1/jobs", shot_body("SHOT_02", "C")).await;
    assert_eq!(response.status(), StatusCode::CREATED);

    provider.open();
    wait_for_status(&app.router, &format!("/api/v1/jobs/{first_id}"), TERMINAL).await;
}

#[tokio::test]
async fn cancel_stops_a_running_job() {
    let app = build_test_app(Arc::new(TestProvider::held()));
    app.write("prompts/compiled/SHOT_01/A.txt", "prompt");

    let created = body_json(post_json(&app.router, "/api/v1/jobs", shot_body("SHOT_01", "A")).await).await;
    let job_id = created["data"]["jobId"].as_str().unwrap().to_string();

    let response = post_empty(&app.router, &format!("/api/v1/jobs/{job_id}/cancel")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["data"]["canceled"], true);

    let job = wait_for_status(&app.router, &format!("/api/v1/jobs/{job_id}"), TERMINAL).await;
    assert_eq!(job["data"]["status"], "canceled");
    assert_eq!(job["data"]["error"]["code"], "CANCELED");

    let again = body_json(post_empty(&app.router, &format!("/api/v1/jobs/{job_id}/cancel")).await).await;
    assert_eq!(again["data"]["canceled"], false);
}

#[tokio::test]
async fn unknown_job_is_not_found() {
    let app = build_test_app(Arc::new(TestProvider::ready()));
    let id = uuid::Uuid::new_v4();

    let response = get(&app.router, &format!("/api/v1/jobs/{id}")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["code"], "NOT_FOUND");

    let response = post_empty(&app.router, &format!("/api/v1/jobs/{id}/cancel")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unconfigured_provider_refuses_jobs() {
    let app = build_test_app(Arc::new(TestProvider::unconfigured()));
    app.write("prompts/compiled/SHOT_01/A.txt", "prompt");

    let response = post_json(&app.router, "/api/v1/jobs", shot_body("SHOT_01", "A")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["code"], "AUTH_REQUIRED");
}

#[tokio::test]
async fn retry_creates_a_linked_job() {
    let app = build_test_app(Arc::new(TestProvider::ready()));
    app.write("prompts/compiled/SHOT_01/A.txt", "prompt");

    let created = body_json(post_json(&app.router, "/api/v1/jobs", shot_body("SHOT_01", "A")).await).await;
    let job_id = created["data"]["jobId"].as_str().unwrap().to_string();
    wait_for_status(&app.router, &format!("/api/v1/jobs/{job_id}"), TERMINAL).await;

    let response = post_json(
        &app.router,
        &format!("/api/v1/jobs/{job_id}/retry"),
        json!({ "outputCount": 2 }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let retry_id = body_json(response).await["data"]["jobId"].as_str().unwrap().to_string();

    let retried = wait_for_status(&app.router, &format!("/api/v1/jobs/{retry_id}"), TERMINAL).await;
    assert_eq!(retried["data"]["retryOf"], job_id.as_str());
    assert_eq!(retried["data"]["input"]["outputCount"], 2);
}

#[tokio::test]
async fn continuity_view_covers_every_variation() {
    let app = build_test_app(Arc::new(TestProvider::ready()));
    app.write(
        "sequence.json",
        json!({ "editorialOrder": ["SHOT_01", "SHOT_02"], "selections": { "SHOT_01": "A" } })
            .to_string(),
    );
    app.write("renders/SHOT_01/A/last.png", b"prev-last");

    let response = get(
        &app.router,
        "/api/v1/projects/demo/shots/SHOT_02/continuity",
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    let variations: Vec<&str> = json["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["variation"].as_str().unwrap())
        .collect();
    assert_eq!(variations, ["A", "B", "C", "D"]);
    assert_eq!(json["data"][0]["first"]["source"], "inherited");
}

#[tokio::test]
async fn continuity_rejects_path_like_shot_ids() {
    let app = build_test_app(Arc::new(TestProvider::ready()));

    let response = get(&app.router, "/api/v1/projects/demo/shots/..%2Fetc/continuity").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
