//! Live session bus
//!
//! A single hub owns every connected operator session and a topic table
//! keyed by instance id (with `global` reserved). Each session has a bounded
//! outbox; fan-out never blocks on a consumer — a session whose outbox is
//! full is dropped on the spot.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::message::Frame;

/// Topic for sessions not bound to a specific instance.
pub const GLOBAL_TOPIC: &str = "global";

/// Outbox bound per session.
pub const OUTBOX_CAPACITY: usize = 256;

pub type SessionId = u64;

struct SessionEntry {
    topic: String,
    sender: mpsc::Sender<Vec<u8>>,
    log_task: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct HubInner {
    sessions: HashMap<SessionId, SessionEntry>,
    topics: HashMap<String, HashSet<SessionId>>,
}

/// The hub. Registration, unregistration and fan-out are serialized behind
/// one lock; no await happens while it is held.
#[derive(Default)]
pub struct Hub {
    inner: Mutex<HubInner>,
    next_id: AtomicU64,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session subscribed to `topic`. Returns its id and the receiving
    /// end of its outbox for the write pump to drain.
    pub fn register(&self, topic: &str) -> (SessionId, mpsc::Receiver<Vec<u8>>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (sender, receiver) = mpsc::channel(OUTBOX_CAPACITY);

        let mut inner = self.inner.lock().expect("hub lock poisoned");
        inner.sessions.insert(
            id,
            SessionEntry {
                topic: topic.to_string(),
                sender,
                log_task: None,
            },
        );
        inner.topics.entry(topic.to_string()).or_default().insert(id);

        tracing::info!(session = id, topic = %topic, total = inner.sessions.len(), "session connected");
        (id, receiver)
    }

    /// Remove a session, close its outbox and cancel any attached log
    /// stream.
    pub fn unregister(&self, id: SessionId) {
        let mut inner = self.inner.lock().expect("hub lock poisoned");
        remove_session(&mut inner, id);
    }

    /// Attach a log-stream task to a session, cancelling a previous one.
    pub fn set_log_task(&self, id: SessionId, task: JoinHandle<()>) {
        let mut inner = self.inner.lock().expect("hub lock poisoned");
        if let Some(entry) = inner.sessions.get_mut(&id) {
            if let Some(old) = entry.log_task.replace(task) {
                old.abort();
            }
        } else {
            // Session vanished between spawn and attach
            task.abort();
        }
    }

    /// Cancel a session's log-stream task, if any.
    pub fn clear_log_task(&self, id: SessionId) {
        let mut inner = self.inner.lock().expect("hub lock poisoned");
        if let Some(entry) = inner.sessions.get_mut(&id) {
            if let Some(task) = entry.log_task.take() {
                task.abort();
            }
        }
    }

    /// The outbox sender of a session, for per-session pumps (log streams,
    /// command transcripts).
    pub fn sender(&self, id: SessionId) -> Option<mpsc::Sender<Vec<u8>>> {
        let inner = self.inner.lock().expect("hub lock poisoned");
        inner.sessions.get(&id).map(|e| e.sender.clone())
    }

    /// Enqueue a frame to one session. A full outbox drops the session.
    pub fn send(&self, id: SessionId, frame: &Frame) {
        let Some(bytes) = frame.encode() else { return };
        let mut inner = self.inner.lock().expect("hub lock poisoned");
        if let Some(entry) = inner.sessions.get(&id) {
            if entry.sender.try_send(bytes).is_err() {
                tracing::warn!(session = id, "slow consumer, dropping session");
                remove_session(&mut inner, id);
            }
        }
    }

    /// Enqueue a frame to every session.
    pub fn broadcast(&self, frame: &Frame) {
        let Some(bytes) = frame.encode() else { return };
        let mut inner = self.inner.lock().expect("hub lock poisoned");
        let dead: Vec<SessionId> = inner
            .sessions
            .iter()
            .filter(|(_, entry)| entry.sender.try_send(bytes.clone()).is_err())
            .map(|(id, _)| *id)
            .collect();
        for id in dead {
            tracing::warn!(session = id, "slow consumer, dropping session");
            remove_session(&mut inner, id);
        }
    }

    /// Enqueue a frame to every session subscribed to `topic`.
    pub fn broadcast_to(&self, topic: &str, frame: &Frame) {
        let Some(bytes) = frame.encode() else { return };
        let mut inner = self.inner.lock().expect("hub lock poisoned");
        let Some(subscribers) = inner.topics.get(topic) else {
            return;
        };
        let dead: Vec<SessionId> = subscribers
            .iter()
            .filter(|id| match inner.sessions.get(id) {
                Some(entry) => entry.sender.try_send(bytes.clone()).is_err(),
                None => false,
            })
            .copied()
            .collect();
        for id in dead {
            tracing::warn!(session = id, topic = %topic, "slow consumer, dropping session");
            remove_session(&mut inner, id);
        }
    }

    pub fn session_count(&self) -> usize {
        self.inner.lock().expect("hub lock poisoned").sessions.len()
    }
}

fn remove_session(inner: &mut HubInner, id: SessionId) {
    if let Some(entry) = inner.sessions.remove(&id) {
        if let Some(task) = entry.log_task {
            task.abort();
        }
        if let Some(subscribers) = inner.topics.get_mut(&entry.topic) {
            subscribers.remove(&id);
            if subscribers.is_empty() {
                inner.topics.remove(&entry.topic);
            }
        }
        tracing::info!(session = id, total = inner.sessions.len(), "session disconnected");
    }
}
