//! Real-time channel: handshake, job events, presence, workspace messages.

mod common;

use std::time::Duration;

use common::{TestApp, TestUser};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

async fn connect(app: &TestApp, user: &TestUser) -> WsStream {
    let url = format!(
        "{}?token={}&workspace_id={}",
        app.ws_url, user.access, user.workspace_id
    );
    let (stream, _) = connect_async(url).await.expect("WS connect failed");
    stream
}

/// Reads frames until one of the wanted type arrives; panics on timeout.
async fn next_frame_of_type(stream: &mut WsStream, wanted: &str) -> Value {
    let deadline = Duration::from_secs(5);

    let result = tokio::time::timeout(deadline, async {
        while let Some(message) = stream.next().await {
            let Ok(Message::Text(text)) = message else {
                continue;
            };
            let Ok(frame) = serde_json::from_str::<Value>(&text) else {
                continue;
            };
            if frame["type"] == wanted {
                return frame;
            }
        }
        panic!("stream closed while waiting for '{}' frame", wanted);
    })
    .await;

    result.unwrap_or_else(|_| panic!("no '{}' frame within {:?}", wanted, deadline))
}

#[tokio::test]
async fn handshake_establishes_connection() {
    let app = TestApp::spawn().await;
    let user = app.register_user().await;

    let mut stream = connect(&app, &user).await;

    let frame = next_frame_of_type(&mut stream, "connection_established").await;
    assert_eq!(frame["data"]["workspace_id"], user.workspace_id.to_string());
    assert_eq!(frame["data"]["user_id"], user.id.to_string());
}

#[tokio::test]
async fn invalid_token_is_closed_with_policy_violation() {
    let app = TestApp::spawn().await;
    let user = app.register_user().await;

    let url = format!(
        "{}?token=garbage&workspace_id={}",
        app.ws_url, user.workspace_id
    );
    let (mut stream, _) = connect_async(url).await.expect("WS connect failed");

    let message = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("expected a close frame")
        .expect("stream ended")
        .expect("read error");

    match message {
        Message::Close(Some(frame)) => {
            assert_eq!(u16::from(frame.code), 1008);
        }
        other => panic!("expected close frame, got {:?}", other),
    }
}

#[tokio::test]
async fn mismatched_workspace_is_rejected() {
    let app = TestApp::spawn().await;
    let user = app.register_user().await;
    let other = app.register_user().await;

    let url = format!(
        "{}?token={}&workspace_id={}",
        app.ws_url, user.access, other.workspace_id
    );
    let (mut stream, _) = connect_async(url).await.expect("WS connect failed");

    let message = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("expected a close frame")
        .expect("stream ended")
        .expect("read error");

    match message {
        Message::Close(Some(frame)) => {
            assert_eq!(u16::from(frame.code), 1008);
        }
        other => panic!("expected close frame, got {:?}", other),
    }
}

#[tokio::test]
async fn job_events_arrive_in_order_with_matching_ids() {
    let app = TestApp::spawn().await;
    let user = app.register_user().await;

    let mut stream = connect(&app, &user).await;
    next_frame_of_type(&mut stream, "connection_established").await;

    let created = app
        .create_transformation(&user, json!({"kind": "summary", "parameters": {"length": 200}}))
        .await;
    let id = created["transformation"]["id"].as_str().unwrap().to_string();

    let started = next_frame_of_type(&mut stream, "transformation_started").await;
    assert_eq!(started["data"]["id"], id);

    let completed = next_frame_of_type(&mut stream, "transformation_completed").await;
    assert_eq!(completed["data"]["id"], id);
    assert!(!completed["data"]["result_preview"]
        .as_str()
        .unwrap_or("")
        .is_empty());
}

#[tokio::test]
async fn events_do_not_cross_workspaces() {
    let app = TestApp::spawn().await;
    let alice = app.register_user().await;
    let bob = app.register_user().await;

    let mut bob_stream = connect(&app, &bob).await;
    next_frame_of_type(&mut bob_stream, "connection_established").await;

    let created = app
        .create_transformation(&alice, json!({"kind": "summary", "parameters": {"length": 200}}))
        .await;
    let id = created["transformation"]["id"].as_str().unwrap().to_string();
    app.wait_for_status(&alice, &id, "completed", Duration::from_secs(5))
        .await;

    // Bob's stream stays silent apart from heartbeats.
    let observed = tokio::time::timeout(Duration::from_millis(500), async {
        while let Some(message) = bob_stream.next().await {
            if let Ok(Message::Text(text)) = message {
                let frame: Value = serde_json::from_str(&text).unwrap_or_default();
                let frame_type = frame["type"].as_str().unwrap_or("");
                if frame_type.starts_with("transformation_") {
                    return frame_type.to_string();
                }
            }
        }
        String::new()
    })
    .await;

    assert!(observed.is_err(), "bob observed a foreign event");
}

#[tokio::test]
async fn ping_gets_a_pong() {
    let app = TestApp::spawn().await;
    let user = app.register_user().await;

    let mut stream = connect(&app, &user).await;
    next_frame_of_type(&mut stream, "connection_established").await;

    stream
        .send(Message::Text(json!({"type": "ping"}).to_string().into()))
        .await
        .unwrap();

    next_frame_of_type(&mut stream, "pong").await;
}

#[tokio::test]
async fn presence_updates_and_snapshots() {
    let app = TestApp::spawn().await;
    let owner = app.register_user().await;
    let member = app.add_workspace_member(owner.workspace_id).await;

    let mut owner_stream = connect(&app, &owner).await;
    next_frame_of_type(&mut owner_stream, "connection_established").await;

    // A teammate connecting produces a join update for the owner.
    let mut member_stream = connect(&app, &member).await;
    next_frame_of_type(&mut member_stream, "connection_established").await;

    // The owner may observe their own join first; wait for the member's.
    loop {
        let update = next_frame_of_type(&mut owner_stream, "presence_update").await;
        if update["data"]["user_id"] == member.id.to_string() {
            assert_eq!(update["data"]["status"], "joined");
            break;
        }
    }

    // The snapshot sees both.
    owner_stream
        .send(Message::Text(
            json!({"type": "get_workspace_presence"}).to_string().into(),
        ))
        .await
        .unwrap();

    let snapshot = next_frame_of_type(&mut owner_stream, "workspace_presence").await;
    assert_eq!(snapshot["data"]["count"], 2);

    // Disconnecting produces a leave update.
    member_stream.close(None).await.unwrap();

    loop {
        let update = next_frame_of_type(&mut owner_stream, "presence_update").await;
        if update["data"]["user_id"] == member.id.to_string()
            && update["data"]["status"] == "left"
        {
            break;
        }
    }
}

#[tokio::test]
async fn workspace_messages_fan_out_to_members() {
    let app = TestApp::spawn().await;
    let owner = app.register_user().await;
    let member = app.add_workspace_member(owner.workspace_id).await;

    let mut owner_stream = connect(&app, &owner).await;
    next_frame_of_type(&mut owner_stream, "connection_established").await;
    let mut member_stream = connect(&app, &member).await;
    next_frame_of_type(&mut member_stream, "connection_established").await;

    member_stream
        .send(Message::Text(
            json!({"type": "workspace_message", "data": {"text": "shipping today"}})
                .to_string()
                .into(),
        ))
        .await
        .unwrap();

    let message = next_frame_of_type(&mut owner_stream, "workspace_message").await;
    assert_eq!(message["data"]["text"], "shipping today");
    assert_eq!(message["data"]["user_id"], member.id.to_string());
}
