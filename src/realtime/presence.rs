//! Workspace presence tracking.
//!
//! Each instance keeps exact refcounts for its own connections and learns
//! about other instances through periodic summaries gossiped on `instance.*`
//! topics. Queries return the union of the local view and every non-stale
//! remote view: approximate, with bounded staleness.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::events::{instance_topic, workspace_topic, EventBus, EventEnvelope, EventKind};

struct RemoteView {
    workspaces: HashMap<Uuid, HashSet<Uuid>>,
    updated_at: Instant,
}

pub struct PresenceTracker {
    instance_id: String,
    local: Mutex<HashMap<Uuid, HashMap<Uuid, usize>>>,
    remote: Mutex<HashMap<String, RemoteView>>,
    summary_interval: Duration,
}

impl PresenceTracker {
    pub fn new(instance_id: String, summary_interval: Duration) -> Self {
        Self {
            instance_id,
            local: Mutex::new(HashMap::new()),
            remote: Mutex::new(HashMap::new()),
            summary_interval,
        }
    }

    /// Records a local connection; publishes `presence.join` when this is the
    /// user's first live connection in the workspace.
    pub async fn join(&self, bus: &EventBus, workspace_id: Uuid, user_id: Uuid) {
        let first_connection = {
            let mut local = match self.local.lock() {
                Ok(guard) => guard,
                Err(_) => return,
            };
            let users = local.entry(workspace_id).or_default();
            let count = users.entry(user_id).or_insert(0);
            *count += 1;
            *count == 1
        };

        if first_connection {
            bus.publish(
                workspace_topic(workspace_id),
                EventKind::PresenceJoin,
                json!({"workspace_id": workspace_id, "user_id": user_id}),
            )
            .await;
        }
    }

    /// Drops a local connection; publishes `presence.leave` when the user's
    /// last connection in the workspace closes.
    pub async fn leave(&self, bus: &EventBus, workspace_id: Uuid, user_id: Uuid) {
        let last_connection = {
            let mut local = match self.local.lock() {
                Ok(guard) => guard,
                Err(_) => return,
            };
            let Some(users) = local.get_mut(&workspace_id) else {
                return;
            };
            let Some(count) = users.get_mut(&user_id) else {
                return;
            };

            *count = count.saturating_sub(1);
            if *count == 0 {
                users.remove(&user_id);
                if users.is_empty() {
                    local.remove(&workspace_id);
                }
                true
            } else {
                false
            }
        };

        if last_connection {
            bus.publish(
                workspace_topic(workspace_id),
                EventKind::PresenceLeave,
                json!({"workspace_id": workspace_id, "user_id": user_id}),
            )
            .await;
        }
    }

    /// Ingests a gossiped summary from another instance.
    pub fn observe_summary(&self, envelope: &EventEnvelope) {
        if envelope.kind != EventKind::PresenceSummary
            || envelope.origin_instance_id == self.instance_id
        {
            return;
        }

        let Some(summary) = envelope.payload.get("workspaces").and_then(|v| v.as_object()) else {
            return;
        };

        let mut workspaces = HashMap::new();
        for (workspace, users) in summary {
            let Ok(workspace_id) = Uuid::parse_str(workspace) else {
                continue;
            };
            let user_ids: HashSet<Uuid> = users
                .as_array()
                .map(|list| {
                    list.iter()
                        .filter_map(|u| u.as_str())
                        .filter_map(|u| Uuid::parse_str(u).ok())
                        .collect()
                })
                .unwrap_or_default();
            workspaces.insert(workspace_id, user_ids);
        }

        if let Ok(mut remote) = self.remote.lock() {
            debug!(
                origin = %envelope.origin_instance_id,
                workspaces = workspaces.len(),
                "Presence summary received"
            );
            remote.insert(
                envelope.origin_instance_id.clone(),
                RemoteView {
                    workspaces,
                    updated_at: Instant::now(),
                },
            );
        }
    }

    /// The workspace's online users: local view plus the union of fresh
    /// remote views. Remote entries expire after three missed summaries.
    pub fn snapshot(&self, workspace_id: Uuid) -> Vec<Uuid> {
        let mut online: HashSet<Uuid> = HashSet::new();

        if let Ok(local) = self.local.lock() {
            if let Some(users) = local.get(&workspace_id) {
                online.extend(users.keys().copied());
            }
        }

        let staleness_cutoff = self.summary_interval * 3;
        if let Ok(remote) = self.remote.lock() {
            for view in remote.values() {
                if view.updated_at.elapsed() > staleness_cutoff {
                    continue;
                }
                if let Some(users) = view.workspaces.get(&workspace_id) {
                    online.extend(users.iter().copied());
                }
            }
        }

        let mut result: Vec<Uuid> = online.into_iter().collect();
        result.sort();
        result
    }

    fn local_summary(&self) -> serde_json::Value {
        let local = match self.local.lock() {
            Ok(guard) => guard,
            Err(_) => return json!({"workspaces": {}}),
        };

        let workspaces: serde_json::Map<String, serde_json::Value> = local
            .iter()
            .map(|(workspace, users)| {
                (
                    workspace.to_string(),
                    json!(users.keys().map(|u| u.to_string()).collect::<Vec<_>>()),
                )
            })
            .collect();

        json!({ "workspaces": workspaces })
    }

    /// Gossip loop: periodically publishes this instance's occupancy on its
    /// own `instance.*` topic for the others to reconcile against.
    pub async fn run_gossip(&self, bus: EventBus, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            interval_secs = self.summary_interval.as_secs(),
            "Presence gossip started"
        );

        let mut timer = tokio::time::interval(self.summary_interval);

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    self.prune_stale();
                    bus.publish(
                        instance_topic(&self.instance_id),
                        EventKind::PresenceSummary,
                        self.local_summary(),
                    )
                    .await;
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Presence gossip stopped");
    }

    pub fn prune_stale(&self) {
        let staleness_cutoff = self.summary_interval * 3;
        if let Ok(mut remote) = self.remote.lock() {
            let before = remote.len();
            remote.retain(|_, view| view.updated_at.elapsed() <= staleness_cutoff);
            if remote.len() < before {
                warn!(pruned = before - remote.len(), "Pruned stale presence views");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn tracker() -> PresenceTracker {
        PresenceTracker::new("instance-a".to_string(), Duration::from_secs(15))
    }

    #[tokio::test]
    async fn test_join_leave_refcounting() {
        let bus = EventBus::new(None);
        let tracker = tracker();
        let ws = Uuid::new_v4();
        let user = Uuid::new_v4();

        let mut rx = bus.subscribe();

        // Two connections, one join event.
        tracker.join(&bus, ws, user).await;
        tracker.join(&bus, ws, user).await;
        assert_eq!(tracker.snapshot(ws), vec![user]);
        assert_eq!(rx.recv().await.unwrap().kind, EventKind::PresenceJoin);
        assert!(rx.try_recv().is_err());

        // First disconnect keeps the user online.
        tracker.leave(&bus, ws, user).await;
        assert_eq!(tracker.snapshot(ws), vec![user]);
        assert!(rx.try_recv().is_err());

        tracker.leave(&bus, ws, user).await;
        assert!(tracker.snapshot(ws).is_empty());
        assert_eq!(rx.recv().await.unwrap().kind, EventKind::PresenceLeave);
    }

    #[test]
    fn test_remote_summaries_union_into_snapshot() {
        let tracker = tracker();
        let ws = Uuid::new_v4();
        let remote_user = Uuid::new_v4();

        let envelope = EventEnvelope {
            topic: instance_topic("instance-b"),
            kind: EventKind::PresenceSummary,
            payload: json!({"workspaces": {ws.to_string(): [remote_user.to_string()]}}),
            origin_instance_id: "instance-b".to_string(),
            emitted_at: Utc::now(),
        };

        tracker.observe_summary(&envelope);
        assert_eq!(tracker.snapshot(ws), vec![remote_user]);
    }

    #[test]
    fn test_own_summaries_are_ignored() {
        let tracker = tracker();
        let ws = Uuid::new_v4();

        let envelope = EventEnvelope {
            topic: instance_topic("instance-a"),
            kind: EventKind::PresenceSummary,
            payload: json!({"workspaces": {ws.to_string(): [Uuid::new_v4().to_string()]}}),
            origin_instance_id: "instance-a".to_string(),
            emitted_at: Utc::now(),
        };

        tracker.observe_summary(&envelope);
        assert!(tracker.snapshot(ws).is_empty());
    }
}
