//! Real-time session layer: wire frames, bounded send queues, the session
//! hub, and presence tracking.

pub mod hub;
pub mod presence;

pub use hub::{SessionHandle, SessionHub};
pub use presence::PresenceTracker;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::events::EventKind;

/// JSON frame exchanged on the duplex channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsFrame {
    #[serde(rename = "type")]
    pub frame_type: String,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl WsFrame {
    pub fn new(frame_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            frame_type: frame_type.into(),
            data,
            timestamp: Utc::now(),
        }
    }
}

/// Maps a bus event kind to the client-facing frame type. Control-plane
/// kinds have no client frame.
pub fn frame_type_for(kind: EventKind) -> Option<&'static str> {
    match kind {
        EventKind::TransformationStarted => Some("transformation_started"),
        EventKind::TransformationProgress => Some("transformation_progress"),
        EventKind::TransformationCompleted => Some("transformation_completed"),
        EventKind::TransformationFailed => Some("transformation_failed"),
        EventKind::PresenceJoin | EventKind::PresenceLeave => Some("presence_update"),
        EventKind::WorkspaceMessage => Some("workspace_message"),
        EventKind::PresenceSummary => None,
    }
}

#[derive(Debug, Clone)]
pub struct OutboundFrame {
    pub text: String,
    /// Terminal job outcomes are never shed under backpressure.
    pub terminal: bool,
}

/// Bounded per-session send queue.
///
/// Dispatch must never block on a slow socket: when the queue is full the
/// oldest non-terminal frame is dropped and counted. Terminal frames are
/// always enqueued, growing past capacity if every queued frame is terminal.
pub struct SendQueue {
    frames: Mutex<VecDeque<OutboundFrame>>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
}

impl SendQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            notify: Notify::new(),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn push(&self, frame: OutboundFrame) {
        {
            let mut frames = match self.frames.lock() {
                Ok(guard) => guard,
                Err(_) => return,
            };

            if frames.len() >= self.capacity {
                let victim = frames.iter().position(|f| !f.terminal);
                match victim {
                    Some(idx) => {
                        frames.remove(idx);
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                    None if !frame.terminal => {
                        // Queue is all terminal frames; shed the newcomer.
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        return;
                    }
                    None => {}
                }
            }

            frames.push_back(frame);
        }

        self.notify.notify_one();
    }

    pub async fn pop(&self) -> OutboundFrame {
        loop {
            if let Ok(mut frames) = self.frames.lock() {
                if let Some(frame) = frames.pop_front() {
                    return frame;
                }
            }
            self.notify.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.frames.lock().map(|f| f.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame(text: &str, terminal: bool) -> OutboundFrame {
        OutboundFrame {
            text: text.to_string(),
            terminal,
        }
    }

    #[test]
    fn test_frame_type_mapping() {
        assert_eq!(
            frame_type_for(EventKind::TransformationCompleted),
            Some("transformation_completed")
        );
        assert_eq!(frame_type_for(EventKind::PresenceJoin), Some("presence_update"));
        assert_eq!(frame_type_for(EventKind::PresenceSummary), None);
    }

    #[test]
    fn test_ws_frame_shape() {
        let frame = WsFrame::new("pong", json!({}));
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "pong");
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn test_queue_drops_oldest_non_terminal_when_full() {
        let queue = SendQueue::new(2);
        queue.push(frame("a", false));
        queue.push(frame("b", false));
        queue.push(frame("c", false));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dropped(), 1);

        // "a" was shed, "b" survives at the front.
        let frames = queue.frames.lock().unwrap();
        assert_eq!(frames[0].text, "b");
        assert_eq!(frames[1].text, "c");
    }

    #[test]
    fn test_terminal_frames_are_never_dropped() {
        let queue = SendQueue::new(2);
        queue.push(frame("progress-1", false));
        queue.push(frame("progress-2", false));
        queue.push(frame("completed", true));
        queue.push(frame("failed", true));

        let frames = queue.frames.lock().unwrap();
        let texts: Vec<&str> = frames.iter().map(|f| f.text.as_str()).collect();
        assert!(texts.contains(&"completed"));
        assert!(texts.contains(&"failed"));
    }

    #[test]
    fn test_all_terminal_queue_grows_rather_than_dropping() {
        let queue = SendQueue::new(1);
        queue.push(frame("completed-1", true));
        queue.push(frame("completed-2", true));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dropped(), 0);

        // A non-terminal frame arriving now is the one shed.
        queue.push(frame("progress", false));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dropped(), 1);
    }

    #[tokio::test]
    async fn test_pop_returns_pushed_frames_in_order() {
        let queue = SendQueue::new(8);
        queue.push(frame("first", false));
        queue.push(frame("second", true));

        assert_eq!(queue.pop().await.text, "first");
        assert_eq!(queue.pop().await.text, "second");
    }
}
