//! Transformation lifecycle: creation, execution, failover, cancellation.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::TestApp;
use recast::providers::{
    MockProvider, Provider, ProviderError, ProviderReply, ProviderRequest,
};
use recast::transform::TransformationKind;
use serde_json::json;

/// Always fails with a retriable error, like an upstream having an outage.
struct OutageProvider;

#[async_trait]
impl Provider for OutageProvider {
    fn name(&self) -> &'static str {
        "flaky"
    }

    fn supports(&self, _kind: TransformationKind) -> bool {
        true
    }

    async fn invoke(&self, _request: &ProviderRequest) -> Result<ProviderReply, ProviderError> {
        Err(ProviderError::Unavailable("status 503".to_string()))
    }
}

#[tokio::test]
async fn summary_transformation_completes_end_to_end() {
    let app = TestApp::spawn().await;
    let user = app.register_user().await;

    let created = app
        .create_transformation(&user, json!({"kind": "summary", "parameters": {"length": 200}}))
        .await;
    let transformation = &created["transformation"];
    assert_eq!(transformation["status"], "pending");
    let id = transformation["id"].as_str().unwrap().to_string();

    let done = app
        .wait_for_status(&user, &id, "completed", Duration::from_secs(5))
        .await;

    assert!(!done["result"].as_str().unwrap_or("").is_empty());
    assert_eq!(done["provider_used"], "mock");
    assert!(done["tokens_used"].as_i64().unwrap_or(0) > 0);
}

#[tokio::test]
async fn document_backed_transformation_completes() {
    let app = TestApp::spawn().await;
    let user = app.register_user().await;

    let upload = app
        .upload_text_document(&user, "Launch notes", "We shipped the new importer last week.")
        .await;
    assert_eq!(upload["document"]["status"], "ready");
    let document_id = upload["document"]["id"].as_str().unwrap().to_string();

    let created = app
        .create_transformation(
            &user,
            json!({
                "kind": "blog_post",
                "parameters": {"word_count": 500, "tone": "casual"},
                "document_id": document_id,
            }),
        )
        .await;
    let id = created["transformation"]["id"].as_str().unwrap().to_string();

    let done = app
        .wait_for_status(&user, &id, "completed", Duration::from_secs(5))
        .await;
    assert!(!done["result"].as_str().unwrap_or("").is_empty());
}

#[tokio::test]
async fn unknown_kind_and_bad_parameters_are_rejected() {
    let app = TestApp::spawn().await;
    let user = app.register_user().await;

    let bad_kind = app
        .post(
            "/api/transformations",
            &user.access,
            json!({"kind": "podcast", "parameters": {}}),
        )
        .await;
    assert_status!(bad_kind, 400);

    let out_of_range = app
        .post(
            "/api/transformations",
            &user.access,
            json!({"kind": "summary", "parameters": {"length": 50}}),
        )
        .await;
    assert_status!(out_of_range, 400);

    let unknown_key = app
        .post(
            "/api/transformations",
            &user.access,
            json!({"kind": "summary", "parameters": {"length": 200, "style": "brief"}}),
        )
        .await;
    assert_status!(unknown_key, 400);
}

#[tokio::test]
async fn status_endpoint_reports_attempts() {
    let app = TestApp::spawn().await;
    let user = app.register_user().await;

    let created = app
        .create_transformation(&user, json!({"kind": "summary", "parameters": {"length": 150}}))
        .await;
    let id = created["transformation"]["id"].as_str().unwrap().to_string();

    app.wait_for_status(&user, &id, "completed", Duration::from_secs(5))
        .await;

    let response = app
        .get(&format!("/api/transformations/{}/status", id), &user.access)
        .await;
    assert_status!(response, 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["id"], id);
    assert_eq!(body["status"], "completed");
    assert_eq!(body["attempts"], 1);
}

#[tokio::test]
async fn preset_parameters_merge_under_request_overrides() {
    let app = TestApp::spawn().await;
    let user = app.register_user().await;

    let created = app
        .post(
            "/api/transformation-presets",
            &user.access,
            json!({
                "name": "House style",
                "kind": "blog_post",
                "parameters": {"tone": "professional", "word_count": 800},
            }),
        )
        .await;
    assert_status!(created, 201);
    let body: serde_json::Value = created.json().await.unwrap();
    let preset_id = body["preset"]["id"].as_str().unwrap().to_string();

    let created = app
        .create_transformation(
            &user,
            json!({
                "kind": "blog_post",
                "preset_id": preset_id,
                "parameters": {"word_count": 500},
            }),
        )
        .await;

    let params = &created["transformation"]["parameters"];
    assert_eq!(params["tone"], "professional");
    assert_eq!(params["word_count"], 500);

    // Usage counts the enqueue, exactly once.
    let listing = app.get("/api/transformation-presets", &user.access).await;
    let body: serde_json::Value = listing.json().await.unwrap();
    assert_eq!(body["presets"][0]["usage_count"], 1);

    app.create_transformation(
        &user,
        json!({"kind": "blog_post", "preset_id": body["presets"][0]["id"], "parameters": {}}),
    )
    .await;

    let listing = app.get("/api/transformation-presets", &user.access).await;
    let body: serde_json::Value = listing.json().await.unwrap();
    assert_eq!(body["presets"][0]["usage_count"], 2);
}

#[tokio::test]
async fn preset_kind_must_match_request_kind() {
    let app = TestApp::spawn().await;
    let user = app.register_user().await;

    let created = app
        .post(
            "/api/transformation-presets",
            &user.access,
            json!({
                "name": "Digest",
                "kind": "summary",
                "parameters": {"length": 300},
            }),
        )
        .await;
    let body: serde_json::Value = created.json().await.unwrap();
    let preset_id = body["preset"]["id"].as_str().unwrap().to_string();

    let mismatched = app
        .post(
            "/api/transformations",
            &user.access,
            json!({
                "kind": "blog_post",
                "preset_id": preset_id,
                "parameters": {"word_count": 500, "tone": "casual"},
            }),
        )
        .await;
    assert_status!(mismatched, 400);
}

#[tokio::test]
async fn failover_moves_to_the_next_provider_and_opens_the_breaker() {
    let app = TestApp::spawn_with_providers(vec![
        Arc::new(OutageProvider),
        Arc::new(MockProvider::with_latency(Duration::from_millis(5))),
    ])
    .await;
    let user = app.register_user().await;

    let created = app
        .create_transformation(&user, json!({"kind": "summary", "parameters": {"length": 200}}))
        .await;
    let id = created["transformation"]["id"].as_str().unwrap().to_string();

    let done = app
        .wait_for_status(&user, &id, "completed", Duration::from_secs(5))
        .await;
    assert_eq!(done["provider_used"], "mock");

    // Enough jobs to cross the failure threshold open the first breaker.
    for _ in 0..3 {
        let created = app
            .create_transformation(
                &user,
                json!({"kind": "summary", "parameters": {"length": 200}}),
            )
            .await;
        let id = created["transformation"]["id"].as_str().unwrap().to_string();
        app.wait_for_status(&user, &id, "completed", Duration::from_secs(5))
            .await;
    }

    assert_eq!(
        app.registry.breaker_state("flaky"),
        Some(recast::providers::BreakerState::Open)
    );
}

#[tokio::test]
async fn exhausted_providers_fail_the_transformation_after_retries() {
    let app = TestApp::spawn_with_providers(vec![Arc::new(OutageProvider)]).await;
    let user = app.register_user().await;

    let created = app
        .create_transformation(&user, json!({"kind": "summary", "parameters": {"length": 200}}))
        .await;
    let id = created["transformation"]["id"].as_str().unwrap().to_string();

    let failed = app
        .wait_for_status(&user, &id, "failed", Duration::from_secs(10))
        .await;
    assert_eq!(failed["error_reason"], "provider_exhausted");
}

#[tokio::test]
async fn cancel_mid_flight_reaches_cancelled_without_completing() {
    // A provider slow enough that the cancel lands while it runs.
    let app = TestApp::spawn_with_providers(vec![Arc::new(MockProvider::with_latency(
        Duration::from_secs(2),
    ))])
    .await;
    let user = app.register_user().await;

    let created = app
        .create_transformation(
            &user,
            json!({
                "kind": "custom",
                "parameters": {"custom_instructions": "Take your time with this one."},
            }),
        )
        .await;
    let id = created["transformation"]["id"].as_str().unwrap().to_string();

    app.wait_for_status(&user, &id, "running", Duration::from_secs(5))
        .await;

    let cancel = app
        .post(
            &format!("/api/transformations/{}/cancel", id),
            &user.access,
            json!({}),
        )
        .await;
    assert_status!(cancel, 202);

    let done = app
        .wait_for_status(&user, &id, "cancelled", Duration::from_secs(10))
        .await;
    assert_eq!(done["error_reason"], "cancelled");
}

#[tokio::test]
async fn cancel_pending_transformation_is_immediate() {
    // No executor drain here: a very slow provider keeps the single worker
    // busy with the first job while the second sits pending.
    let app = TestApp::spawn_with_providers(vec![Arc::new(MockProvider::with_latency(
        Duration::from_secs(3),
    ))])
    .await;
    let user = app.register_user().await;

    let blocker = app
        .create_transformation(
            &user,
            json!({"kind": "custom", "parameters": {"custom_instructions": "slow"}}),
        )
        .await;
    let _ = blocker;

    let created = app
        .create_transformation(&user, json!({"kind": "summary", "parameters": {"length": 200}}))
        .await;
    let id = created["transformation"]["id"].as_str().unwrap().to_string();

    let cancel = app
        .post(
            &format!("/api/transformations/{}/cancel", id),
            &user.access,
            json!({}),
        )
        .await;
    assert_status!(cancel, 202);

    let done = app
        .wait_for_status(&user, &id, "cancelled", Duration::from_secs(5))
        .await;
    assert_eq!(done["status"], "cancelled");
}
