//! Preset visibility and ownership rules.

mod common;

use common::TestApp;
use serde_json::json;

#[tokio::test]
async fn create_validates_kind_and_parameters() {
    let app = TestApp::spawn().await;
    let user = app.register_user().await;

    let bad_kind = app
        .post(
            "/api/transformation-presets",
            &user.access,
            json!({"name": "Bad", "kind": "podcast", "parameters": {}}),
        )
        .await;
    assert_status!(bad_kind, 400);

    let bad_params = app
        .post(
            "/api/transformation-presets",
            &user.access,
            json!({"name": "Bad", "kind": "summary", "parameters": {"length": 5}}),
        )
        .await;
    assert_status!(bad_params, 400);
}

#[tokio::test]
async fn shared_presets_are_readable_but_not_editable_by_members() {
    let app = TestApp::spawn().await;
    let owner = app.register_user().await;
    let member = app.add_workspace_member(owner.workspace_id).await;

    let created = app
        .post(
            "/api/transformation-presets",
            &owner.access,
            json!({
                "name": "Team digest",
                "kind": "summary",
                "parameters": {"length": 300},
                "is_shared": true,
            }),
        )
        .await;
    assert_status!(created, 201);
    let body: serde_json::Value = created.json().await.unwrap();
    let preset_id = body["preset"]["id"].as_str().unwrap().to_string();

    // Visible to the workspace member...
    let listing = app.get("/api/transformation-presets", &member.access).await;
    let body: serde_json::Value = listing.json().await.unwrap();
    assert_eq!(body["count"], 1);

    // ...usable by them...
    let used = app
        .post(
            "/api/transformations",
            &member.access,
            json!({"kind": "summary", "preset_id": preset_id, "parameters": {}}),
        )
        .await;
    assert_status!(used, 201);

    // ...but only the owner may modify or delete it.
    let update = app
        .patch(
            &format!("/api/transformation-presets/{}", preset_id),
            &member.access,
            json!({"name": "Renamed"}),
        )
        .await;
    assert_status!(update, 403);

    let delete = app
        .delete(
            &format!("/api/transformation-presets/{}", preset_id),
            &member.access,
        )
        .await;
    assert_status!(delete, 403);
}

#[tokio::test]
async fn private_presets_read_as_absent_to_other_members() {
    let app = TestApp::spawn().await;
    let owner = app.register_user().await;
    let member = app.add_workspace_member(owner.workspace_id).await;

    let created = app
        .post(
            "/api/transformation-presets",
            &owner.access,
            json!({
                "name": "Personal drafts",
                "kind": "summary",
                "parameters": {"length": 150},
                "is_shared": false,
            }),
        )
        .await;
    let body: serde_json::Value = created.json().await.unwrap();
    let preset_id = body["preset"]["id"].as_str().unwrap().to_string();

    let listing = app.get("/api/transformation-presets", &member.access).await;
    let body: serde_json::Value = listing.json().await.unwrap();
    assert_eq!(body["count"], 0);

    // Not a 403: a private preset must not reveal its existence.
    let update = app
        .patch(
            &format!("/api/transformation-presets/{}", preset_id),
            &member.access,
            json!({"name": "Poke"}),
        )
        .await;
    assert_status!(update, 404);
}

#[tokio::test]
async fn owner_updates_and_deletes_their_preset() {
    let app = TestApp::spawn().await;
    let owner = app.register_user().await;

    let created = app
        .post(
            "/api/transformation-presets",
            &owner.access,
            json!({
                "name": "Draft",
                "description": "First cut",
                "kind": "blog_post",
                "parameters": {"word_count": 600, "tone": "casual"},
            }),
        )
        .await;
    let body: serde_json::Value = created.json().await.unwrap();
    let preset_id = body["preset"]["id"].as_str().unwrap().to_string();

    let updated = app
        .patch(
            &format!("/api/transformation-presets/{}", preset_id),
            &owner.access,
            json!({
                "name": "Polished",
                "description": null,
                "parameters": {"word_count": 900, "tone": "professional"},
                "is_shared": true,
            }),
        )
        .await;
    assert_status!(updated, 200);
    let body: serde_json::Value = updated.json().await.unwrap();
    assert_eq!(body["preset"]["name"], "Polished");
    assert!(body["preset"]["description"].is_null());
    assert_eq!(body["preset"]["parameters"]["word_count"], 900);
    assert_eq!(body["preset"]["is_shared"], true);

    // Updated parameters are still validated against the preset's kind.
    let invalid = app
        .patch(
            &format!("/api/transformation-presets/{}", preset_id),
            &owner.access,
            json!({"parameters": {"word_count": 10, "tone": "casual"}}),
        )
        .await;
    assert_status!(invalid, 400);

    let deleted = app
        .delete(
            &format!("/api/transformation-presets/{}", preset_id),
            &owner.access,
        )
        .await;
    assert_status!(deleted, 204);

    let listing = app.get("/api/transformation-presets", &owner.access).await;
    let body: serde_json::Value = listing.json().await.unwrap();
    assert_eq!(body["count"], 0);
}

#[tokio::test]
async fn listing_orders_by_usage() {
    let app = TestApp::spawn().await;
    let user = app.register_user().await;

    for name in ["alpha", "beta"] {
        let response = app
            .post(
                "/api/transformation-presets",
                &user.access,
                json!({
                    "name": name,
                    "kind": "summary",
                    "parameters": {"length": 200},
                }),
            )
            .await;
        assert_status!(response, 201);
    }

    let listing = app.get("/api/transformation-presets", &user.access).await;
    let body: serde_json::Value = listing.json().await.unwrap();
    let beta_id = body["presets"]
        .as_array()
        .unwrap()
        .iter()
        .find(|p| p["name"] == "beta")
        .unwrap()["id"]
        .as_str()
        .unwrap()
        .to_string();

    // Using "beta" promotes it above "alpha".
    app.create_transformation(
        &user,
        json!({"kind": "summary", "preset_id": beta_id, "parameters": {}}),
    )
    .await;

    let listing = app.get("/api/transformation-presets", &user.access).await;
    let body: serde_json::Value = listing.json().await.unwrap();
    assert_eq!(body["presets"][0]["name"], "beta");
    assert_eq!(body["presets"][1]["name"], "alpha");
}
