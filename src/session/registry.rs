//! Client Registry
//!
//! The registry is the only state shared between sessions. It maps each
//! registered session to its [`Outbox`], the queue drained by that session's
//! control-connection writer task.
//!
//! ## Broadcast
//!
//! ```text
//!   lock ── snapshot members ── unlock
//!                  │
//!                  ▼
//!        send to each outbox (no lock held)
//!                  │
//!                  ▼
//!   lock ── remove members whose send failed ── unlock
//! ```
//!
//! A send fails once the member's writer task has stopped, either because its
//! socket write failed or because the session is closing. It also fails when
//! the member's queue is full: a peer that stays connected but stops reading
//! fills it up. Failed members are removed before `broadcast` returns, so a
//! dead or stalled peer is offered at most the one broadcast that discovers it.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

/// Process-unique identifier of a session.
pub type SessionId = u64;

/// Lines a session may have queued before it counts as stalled
pub const OUTBOX_CAPACITY: usize = 1024;

/// Sending half of a session's outbound line queue.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::Sender<Bytes>,
}

impl Outbox {
    /// Creates an outbox holding up to [`OUTBOX_CAPACITY`] lines and the
    /// receiver its writer task drains.
    pub fn channel() -> (Self, mpsc::Receiver<Bytes>) {
        Self::with_capacity(OUTBOX_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Queues raw bytes without waiting. Returns false if the writer has
    /// stopped or the queue is full.
    pub fn send(&self, bytes: Bytes) -> bool {
        match self.tx.try_send(bytes) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!("Outbox full, dropping line");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Queues `line` with a `\n` terminator.
    pub fn send_line(&self, line: &str) -> bool {
        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');
        self.send(Bytes::from(buf))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Debug)]
struct Member {
    name: String,
    outbox: Outbox,
}

/// Concurrency-safe set of sessions eligible for broadcast.
#[derive(Debug)]
pub struct ClientRegistry {
    members: Mutex<HashMap<SessionId, Member>>,
    next_id: AtomicU64,
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            members: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocates an id for a new session.
    pub fn next_id(&self) -> SessionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, Member>> {
        self.members.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a session under `id`.
    pub fn add(&self, id: SessionId, name: impl Into<String>, outbox: Outbox) {
        let name = name.into();
        debug!(session = %name, id, "Registered session");
        self.lock().insert(id, Member { name, outbox });
    }

    /// Deregisters a session. Returns false if it was not registered, for
    /// example because a broadcast already pruned it.
    pub fn remove(&self, id: SessionId) -> bool {
        self.lock().remove(&id).is_some()
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.lock().contains_key(&id)
    }

    /// Sends `message` as one line to every member except `excluding`.
    ///
    /// Returns the number of members the line was queued for.
    pub fn broadcast(&self, message: &str, excluding: Option<SessionId>) -> usize {
        let mut line = Vec::with_capacity(message.len() + 1);
        line.extend_from_slice(message.as_bytes());
        line.push(b'\n');
        let line = Bytes::from(line);

        let recipients: Vec<(SessionId, Outbox)> = self
            .lock()
            .iter()
            .filter(|(id, _)| Some(**id) != excluding)
            .map(|(id, member)| (*id, member.outbox.clone()))
            .collect();

        let mut delivered = 0;
        let mut failed = Vec::new();
        for (id, outbox) in recipients {
            if outbox.send(line.clone()) {
                delivered += 1;
            } else {
                failed.push(id);
            }
        }

        if !failed.is_empty() {
            let mut members = self.lock();
            for id in failed {
                if let Some(member) = members.remove(&id) {
                    warn!(session = %member.name, "Broadcast failed, removing session");
                }
            }
        }

        delivered
    }

    /// Display names of all registered sessions, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().values().map(|m| m.name.clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
