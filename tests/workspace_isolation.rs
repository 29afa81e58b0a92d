//! Cross-workspace isolation: entities in one workspace must be invisible
//! to subjects of another, indistinguishably from not existing.

mod common;

use common::TestApp;
use serde_json::json;

#[tokio::test]
async fn documents_are_invisible_across_workspaces() {
    let app = TestApp::spawn().await;
    let alice = app.register_user().await;
    let bob = app.register_user().await;

    let upload = app
        .upload_text_document(&alice, "Quarterly notes", "The quarterly numbers improved.")
        .await;
    let document_id = upload["document"]["id"].as_str().unwrap().to_string();

    // Owner sees it.
    let own = app
        .get(&format!("/api/documents/{}", document_id), &alice.access)
        .await;
    assert_status!(own, 200);

    // A subject from another workspace gets a plain 404.
    let cross = app
        .get(&format!("/api/documents/{}", document_id), &bob.access)
        .await;
    assert_status!(cross, 404);

    let cross_delete = app
        .delete(&format!("/api/documents/{}", document_id), &bob.access)
        .await;
    assert_status!(cross_delete, 404);

    // And the listing never includes it.
    let listing = app.get("/api/documents", &bob.access).await;
    let body: serde_json::Value = listing.json().await.unwrap();
    assert_eq!(body["count"], 0);
}

#[tokio::test]
async fn transformations_are_invisible_across_workspaces() {
    let app = TestApp::spawn().await;
    let alice = app.register_user().await;
    let bob = app.register_user().await;

    let created = app
        .create_transformation(&alice, json!({"kind": "summary", "parameters": {"length": 200}}))
        .await;
    let id = created["transformation"]["id"].as_str().unwrap().to_string();

    let cross_get = app
        .get(&format!("/api/transformations/{}", id), &bob.access)
        .await;
    assert_status!(cross_get, 404);

    let cross_status = app
        .get(&format!("/api/transformations/{}/status", id), &bob.access)
        .await;
    assert_status!(cross_status, 404);

    let cross_cancel = app
        .post(
            &format!("/api/transformations/{}/cancel", id),
            &bob.access,
            json!({}),
        )
        .await;
    assert_status!(cross_cancel, 404);
}

#[tokio::test]
async fn foreign_documents_cannot_seed_transformations() {
    let app = TestApp::spawn().await;
    let alice = app.register_user().await;
    let bob = app.register_user().await;

    let upload = app
        .upload_text_document(&alice, "Private doc", "Internal content.")
        .await;
    let document_id = upload["document"]["id"].as_str().unwrap().to_string();

    let response = app
        .post(
            "/api/transformations",
            &bob.access,
            json!({
                "kind": "summary",
                "parameters": {"length": 200},
                "document_id": document_id,
            }),
        )
        .await;
    assert_status!(response, 404);
}

#[tokio::test]
async fn presets_are_invisible_across_workspaces() {
    let app = TestApp::spawn().await;
    let alice = app.register_user().await;
    let bob = app.register_user().await;

    let created = app
        .post(
            "/api/transformation-presets",
            &alice.access,
            json!({
                "name": "Shared digest",
                "kind": "summary",
                "parameters": {"length": 300},
                "is_shared": true,
            }),
        )
        .await;
    assert_status!(created, 201);
    let body: serde_json::Value = created.json().await.unwrap();
    let preset_id = body["preset"]["id"].as_str().unwrap().to_string();

    // Even shared presets stop at the workspace boundary.
    let cross_update = app
        .patch(
            &format!("/api/transformation-presets/{}", preset_id),
            &bob.access,
            json!({"name": "Hijacked"}),
        )
        .await;
    assert_status!(cross_update, 404);

    let listing = app.get("/api/transformation-presets", &bob.access).await;
    let body: serde_json::Value = listing.json().await.unwrap();
    assert_eq!(body["count"], 0);

    let cross_use = app
        .post(
            "/api/transformations",
            &bob.access,
            json!({"kind": "summary", "parameters": {}, "preset_id": preset_id}),
        )
        .await;
    assert_status!(cross_use, 404);
}
