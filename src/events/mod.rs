//! Workspace event fabric: envelope types, topics, and the broker-backed bus.

pub mod bus;

pub use bus::EventBus;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    TransformationStarted,
    TransformationProgress,
    TransformationCompleted,
    TransformationFailed,
    PresenceJoin,
    PresenceLeave,
    PresenceSummary,
    WorkspaceMessage,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::TransformationStarted => "transformation.started",
            EventKind::TransformationProgress => "transformation.progress",
            EventKind::TransformationCompleted => "transformation.completed",
            EventKind::TransformationFailed => "transformation.failed",
            EventKind::PresenceJoin => "presence.join",
            EventKind::PresenceLeave => "presence.leave",
            EventKind::PresenceSummary => "presence.summary",
            EventKind::WorkspaceMessage => "workspace.message",
        }
    }

    /// Terminal job outcomes must reach clients even under backpressure;
    /// everything else may be shed.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventKind::TransformationCompleted | EventKind::TransformationFailed
        )
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Broker topic names. Everything a workspace's members may see flows over
/// `ws.{workspace_id}`; user-addressed events use the nested user topic;
/// `instance.*` carries control-plane traffic (presence reconciliation).
pub fn workspace_topic(workspace_id: Uuid) -> String {
    format!("ws.{}", workspace_id)
}

pub fn user_topic(workspace_id: Uuid, user_id: Uuid) -> String {
    format!("ws.{}.user.{}", workspace_id, user_id)
}

pub fn instance_topic(instance_id: &str) -> String {
    format!("instance.{}", instance_id)
}

/// Parses the workspace id out of a `ws.*` topic.
pub fn topic_workspace(topic: &str) -> Option<Uuid> {
    let rest = topic.strip_prefix("ws.")?;
    let workspace_part = rest.split('.').next()?;
    Uuid::parse_str(workspace_part).ok()
}

/// Parses the user id out of a `ws.{ws}.user.{user}` topic.
pub fn topic_user(topic: &str) -> Option<Uuid> {
    let (_, user_part) = topic.split_once(".user.")?;
    Uuid::parse_str(user_part).ok()
}

/// The unit on the wire. Consumers tolerate duplicates (delivery is
/// at-least-once) and treat each envelope as self-describing; `emitted_at`
/// is monotonic per topic per origin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub topic: String,
    pub kind: EventKind,
    pub payload: serde_json::Value,
    pub origin_instance_id: String,
    pub emitted_at: DateTime<Utc>,
}
