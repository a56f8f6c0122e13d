//! Per-connection session state.
//!
//! A [`Session`] is the shared handle for one client connection. The
//! connection's read task, the dispatcher, and every room the session joins
//! all hold (or weakly reference) the same `Arc<Session>`; the session never
//! owns any of them.
//!
//! Outbound traffic is serialized by construction: every producer enqueues
//! through [`Session::submit`] into a bounded channel, and exactly one
//! writer task drains that channel onto the socket. No two messages can
//! interleave mid-transmission and per-queue order is preserved, without any
//! lock shared between sessions.
//!
//! # Invariants
//!
//! - The username is set at most once, on successful authentication.
//! - Once [`Session::begin_close`] has run, `submit` rejects every further
//!   message, so nothing is enqueued after the disconnect was observed.
//! - The room set only tracks names; each room keeps its own back-reference
//!   and the two are reconciled lazily on broadcast and cleanup passes.

use std::{
    collections::HashSet,
    fmt,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicBool, Ordering},
    },
};

use palaver_proto::Response;
use tokio::sync::{Mutex, Notify, mpsc};

/// Unique identifier of one accepted connection.
///
/// Assigned at accept time and immutable for the connection's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    /// Wrap a raw identifier.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw identifier value.
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Shared state for one live connection.
pub struct Session {
    /// Connection identity, assigned at accept time.
    id: SessionId,
    /// Authenticated username. Set exactly once by a successful login.
    username: OnceLock<String>,
    /// Names of rooms this session has joined.
    rooms: Mutex<HashSet<String>>,
    /// Producer side of the outbound queue.
    outbound: mpsc::Sender<Response>,
    /// Set once the session started closing; gates `submit`.
    closing: AtomicBool,
    /// Wakes the read task when the session is closed from outside
    /// (administrative kick, write failure, queue overflow).
    shutdown: Notify,
}

impl Session {
    /// Create a session and the receiver its writer task will drain.
    ///
    /// `queue_depth` bounds the outbound queue; a full queue marks the peer
    /// as too slow and closes the session rather than blocking a broadcast
    /// pass.
    pub fn new(id: SessionId, queue_depth: usize) -> (Arc<Self>, mpsc::Receiver<Response>) {
        let (tx, rx) = mpsc::channel(queue_depth.max(1));
        let session = Arc::new(Self {
            id,
            username: OnceLock::new(),
            rooms: Mutex::new(HashSet::new()),
            outbound: tx,
            closing: AtomicBool::new(false),
            shutdown: Notify::new(),
        });
        (session, rx)
    }

    /// Connection identity.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Authenticated username. `None` while unauthenticated.
    pub fn username(&self) -> Option<&str> {
        self.username.get().map(String::as_str)
    }

    /// Transition to authenticated. Returns `false` if the session already
    /// authenticated once; the state never changes back.
    pub fn authenticate(&self, username: String) -> bool {
        self.username.set(username).is_ok()
    }

    /// Enqueue a message for delivery. Never blocks.
    ///
    /// Returns `false` if the message was not accepted: the session is
    /// closing, the writer is gone, or the queue is full. A full queue is
    /// treated as a dead peer and starts the close, so callers can prune
    /// this session on any `false`.
    pub fn submit(&self, response: Response) -> bool {
        if self.is_closing() {
            return false;
        }
        match self.outbound.try_send(response) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(session = %self.id, "outbound queue full, closing slow session");
                self.begin_close();
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Start closing the session. Idempotent; safe under racing triggers
    /// (read error, write error, kick).
    pub fn begin_close(&self) {
        if !self.closing.swap(true, Ordering::AcqRel) {
            self.shutdown.notify_one();
        }
    }

    /// Whether the session has started closing.
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Wait until the session starts closing. Returns immediately if it
    /// already has.
    pub async fn closed(&self) {
        while !self.is_closing() {
            self.shutdown.notified().await;
        }
    }

    /// Record membership in `room`. Returns `false` if already a member
    /// (joining twice is a no-op).
    pub async fn join_room(&self, room: &str) -> bool {
        self.rooms.lock().await.insert(room.to_owned())
    }

    /// Drop membership in `room`. Returns `false` if not a member.
    pub async fn leave_room(&self, room: &str) -> bool {
        self.rooms.lock().await.remove(room)
    }

    /// Whether this session has joined `room`.
    pub async fn is_member(&self, room: &str) -> bool {
        self.rooms.lock().await.contains(room)
    }

    /// Take the whole membership set, leaving it empty. Used by disconnect
    /// cleanup to walk the rooms exactly once.
    pub async fn take_rooms(&self) -> Vec<String> {
        self.rooms.lock().await.drain().collect()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("username", &self.username.get())
            .field("closing", &self.is_closing())
            .finish()
    }
}
