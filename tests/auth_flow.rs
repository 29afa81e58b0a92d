//! Authentication and session rotation flows.

mod common;

use common::TestApp;
use serde_json::json;

#[tokio::test]
async fn register_creates_user_and_workspace() {
    let app = TestApp::spawn().await;

    let email = TestApp::unique_email();
    let response = app
        .post_public(
            "/api/auth/register",
            json!({"email": email, "password": "P@ssw0rd!12", "workspace_name": "Test Co"}),
        )
        .await;
    assert_status!(response, 201);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["user"]["email"], email);
    assert_eq!(body["user"]["role"], "owner");
    assert!(body["user"]["workspace_id"].is_string());
}

#[tokio::test]
async fn register_rejects_duplicate_email() {
    let app = TestApp::spawn().await;

    let email = TestApp::unique_email();
    let payload = json!({"email": email, "password": "P@ssw0rd!12"});

    let first = app.post_public("/api/auth/register", payload.clone()).await;
    assert_status!(first, 201);

    let second = app.post_public("/api/auth/register", payload).await;
    assert_status!(second, 409);
}

#[tokio::test]
async fn register_rejects_short_password() {
    let app = TestApp::spawn().await;

    let response = app
        .post_public(
            "/api/auth/register",
            json!({"email": TestApp::unique_email(), "password": "short"}),
        )
        .await;
    assert_status!(response, 400);
}

#[tokio::test]
async fn login_rejects_wrong_password() {
    let app = TestApp::spawn().await;
    let user = app.register_user().await;

    let response = app
        .post_public(
            "/api/auth/login",
            json!({"email": user.email, "password": "wrong-password"}),
        )
        .await;
    assert_status!(response, 401);
}

#[tokio::test]
async fn me_returns_user_and_workspace() {
    let app = TestApp::spawn().await;
    let user = app.register_user().await;

    let response = app.get("/api/auth/me", &user.access).await;
    assert_status!(response, 200);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["user"]["id"], user.id.to_string());
    assert_eq!(body["workspace"]["id"], user.workspace_id.to_string());
    assert!(body["workspace"]["name"].is_string());
}

#[tokio::test]
async fn protected_routes_require_a_token() {
    let app = TestApp::spawn().await;

    let response = app
        .client
        .get(format!("{}/api/documents", app.base_url))
        .send()
        .await
        .unwrap();
    assert_status!(response, 401);
}

#[tokio::test]
async fn refresh_rotates_the_pair() {
    let app = TestApp::spawn().await;
    let user = app.register_user().await;

    let response = app
        .post_public("/api/auth/refresh", json!({"refresh": user.refresh}))
        .await;
    assert_status!(response, 200);

    let body: serde_json::Value = response.json().await.unwrap();
    let new_access = body["access"].as_str().unwrap();
    let new_refresh = body["refresh"].as_str().unwrap();

    assert_ne!(new_refresh, user.refresh);

    // The rotated pair works.
    let me = app.get("/api/auth/me", new_access).await;
    assert_status!(me, 200);

    // The pre-rotation access token is bound to the revoked parent session.
    let stale = app.get("/api/auth/me", &user.access).await;
    assert_status!(stale, 401);
}

#[tokio::test]
async fn refresh_replay_revokes_the_whole_chain() {
    let app = TestApp::spawn().await;
    let user = app.register_user().await;

    // Legitimate rotation: r0 -> (a1, r1).
    let first = app
        .post_public("/api/auth/refresh", json!({"refresh": user.refresh}))
        .await;
    assert_status!(first, 200);
    let body: serde_json::Value = first.json().await.unwrap();
    let a1 = body["access"].as_str().unwrap().to_string();
    let r1 = body["refresh"].as_str().unwrap().to_string();

    // Replay of r0: rejected, and the whole descendant chain dies with it.
    let replay = app
        .post_public("/api/auth/refresh", json!({"refresh": user.refresh}))
        .await;
    assert_status!(replay, 401);

    let stale_access = app.get("/api/auth/me", &a1).await;
    assert_status!(stale_access, 401);

    let stale_refresh = app
        .post_public("/api/auth/refresh", json!({"refresh": r1}))
        .await;
    assert_status!(stale_refresh, 401);
}

#[tokio::test]
async fn refresh_rejects_garbage_tokens() {
    let app = TestApp::spawn().await;

    let response = app
        .post_public("/api/auth/refresh", json!({"refresh": "not-a-real-token"}))
        .await;
    assert_status!(response, 401);
}

#[tokio::test]
async fn logout_revokes_access_immediately() {
    let app = TestApp::spawn().await;
    let user = app.register_user().await;

    let response = app.post("/api/auth/logout", &user.access, json!({})).await;
    assert_status!(response, 204);

    let me = app.get("/api/auth/me", &user.access).await;
    assert_status!(me, 401);

    let refresh = app
        .post_public("/api/auth/refresh", json!({"refresh": user.refresh}))
        .await;
    assert_status!(refresh, 401);
}
