//! The session hub: connected real-time sessions and event dispatch.
//!
//! The hub consumes the instance-local envelope stream from the event bus
//! and routes each envelope to the send queues of authorized sessions. A
//! session only ever receives envelopes whose topic workspace matches its
//! subject's workspace; user-addressed topics additionally match the user.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, watch, Notify};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::Subject;
use crate::events::{topic_user, topic_workspace, EventBus, EventEnvelope, EventKind};

use super::{frame_type_for, OutboundFrame, PresenceTracker, SendQueue, WsFrame};

pub struct SessionHandle {
    pub connection_id: Uuid,
    pub subject: Subject,
    pub queue: SendQueue,
    close: Notify,
    closed: AtomicBool,
    last_pong: Mutex<Instant>,
}

impl SessionHandle {
    fn new(subject: Subject, queue_capacity: usize) -> Self {
        Self {
            connection_id: Uuid::new_v4(),
            subject,
            queue: SendQueue::new(queue_capacity),
            close: Notify::new(),
            closed: AtomicBool::new(false),
            last_pong: Mutex::new(Instant::now()),
        }
    }

    pub fn push_frame(&self, frame: &WsFrame, terminal: bool) {
        if self.closed.load(Ordering::Relaxed) {
            return;
        }

        match serde_json::to_string(frame) {
            Ok(text) => self.queue.push(OutboundFrame { text, terminal }),
            Err(e) => warn!(error = %e, "Failed to encode outbound frame"),
        }
    }

    /// Requests cooperative close; the session's writer task observes this
    /// and tears both tasks down.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
        self.close.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    pub async fn wait_closed(&self) {
        while !self.is_closed() {
            self.close.notified().await;
        }
    }

    pub fn touch_pong(&self) {
        if let Ok(mut last) = self.last_pong.lock() {
            *last = Instant::now();
        }
    }

    fn pong_age(&self) -> Duration {
        self.last_pong
            .lock()
            .map(|last| last.elapsed())
            .unwrap_or_default()
    }
}

pub struct SessionHub {
    sessions: RwLock<HashMap<Uuid, Arc<SessionHandle>>>,
    pub presence: Arc<PresenceTracker>,
    queue_capacity: usize,
}

impl SessionHub {
    pub fn new(presence: Arc<PresenceTracker>, queue_capacity: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            presence,
            queue_capacity,
        }
    }

    pub async fn register(&self, bus: &EventBus, subject: Subject) -> Arc<SessionHandle> {
        let handle = Arc::new(SessionHandle::new(subject.clone(), self.queue_capacity));

        if let Ok(mut sessions) = self.sessions.write() {
            sessions.insert(handle.connection_id, handle.clone());
        }

        self.presence
            .join(bus, subject.workspace_id, subject.user_id)
            .await;

        debug!(
            connection_id = %handle.connection_id,
            user_id = %subject.user_id,
            workspace_id = %subject.workspace_id,
            "Session registered"
        );

        handle
    }

    pub async fn unregister(&self, bus: &EventBus, handle: &SessionHandle) {
        let removed = self
            .sessions
            .write()
            .map(|mut sessions| sessions.remove(&handle.connection_id).is_some())
            .unwrap_or(false);

        if removed {
            handle.close();
            self.presence
                .leave(bus, handle.subject.workspace_id, handle.subject.user_id)
                .await;
            debug!(connection_id = %handle.connection_id, "Session unregistered");
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }

    /// Routes one envelope to every authorized session's send queue. Slow
    /// sockets never block dispatch: the queue sheds under backpressure.
    fn dispatch(&self, envelope: EventEnvelope) {
        if envelope.topic.starts_with("instance.") {
            self.presence.observe_summary(&envelope);
            return;
        }

        let Some(workspace_id) = topic_workspace(&envelope.topic) else {
            return;
        };
        let target_user = topic_user(&envelope.topic);

        let Some(frame_type) = frame_type_for(envelope.kind) else {
            return;
        };

        let mut data = envelope.payload.clone();
        if let Some(map) = data.as_object_mut() {
            match envelope.kind {
                EventKind::PresenceJoin => {
                    map.insert("status".to_string(), serde_json::json!("joined"));
                }
                EventKind::PresenceLeave => {
                    map.insert("status".to_string(), serde_json::json!("left"));
                }
                _ => {}
            }
        }

        let frame = WsFrame::new(frame_type, data);
        let terminal = envelope.kind.is_terminal();

        let Ok(sessions) = self.sessions.read() else {
            return;
        };

        for handle in sessions.values() {
            if handle.subject.workspace_id != workspace_id {
                continue;
            }
            if let Some(user_id) = target_user {
                if handle.subject.user_id != user_id {
                    continue;
                }
            }
            handle.push_frame(&frame, terminal);
        }
    }

    /// Dispatch loop over the bus's envelope stream.
    pub async fn run_dispatch(&self, bus: EventBus, mut shutdown_rx: watch::Receiver<bool>) {
        let mut rx = bus.subscribe();
        info!("Session hub dispatch started");

        loop {
            tokio::select! {
                received = rx.recv() => {
                    match received {
                        Ok(envelope) => self.dispatch(envelope),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Hub dispatch lagged behind the event stream");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Session hub dispatch stopped");
    }

    /// Closes sessions that have not answered a heartbeat within twice the
    /// heartbeat interval.
    pub async fn run_reaper(&self, heartbeat: Duration, mut shutdown_rx: watch::Receiver<bool>) {
        let mut timer = tokio::time::interval(heartbeat);
        let max_age = heartbeat * 2;

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    let stale: Vec<Arc<SessionHandle>> = self
                        .sessions
                        .read()
                        .map(|sessions| {
                            sessions
                                .values()
                                .filter(|h| h.pong_age() > max_age)
                                .cloned()
                                .collect()
                        })
                        .unwrap_or_default();

                    for handle in stale {
                        warn!(
                            connection_id = %handle.connection_id,
                            user_id = %handle.subject.user_id,
                            "Closing unresponsive session"
                        );
                        handle.close();
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
    }
}
