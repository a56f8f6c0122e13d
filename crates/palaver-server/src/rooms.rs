//! Rooms and the room registry.
//!
//! A [`Room`] tracks its members and a bounded slice of recent messages.
//! Membership entries are weak back-references: a room knows *of* a session
//! but never keeps one alive, so a session's destruction does not have to
//! walk every room it belonged to under a lock. Stale entries are pruned
//! lazily the next time the room is touched by a broadcast pass.
//!
//! The [`RoomRegistry`] owns the rooms and is the single source of truth
//! for their existence: get-or-create constructs exactly one `Room` per
//! name even under concurrent callers, and rooms persist until explicitly
//! deleted (an administrative operation, not automatic on last leave).

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Weak},
};

use palaver_proto::{Response, RoomMessage};
use tokio::sync::{Mutex, RwLock};

use crate::session::{Session, SessionId};

/// Membership and history state, guarded together so a join observes a
/// history snapshot consistent with its membership insertion.
struct RoomInner {
    /// Non-owning back-references to member sessions.
    members: HashMap<SessionId, Weak<Session>>,
    /// Retained history, oldest first.
    history: VecDeque<RoomMessage>,
}

/// A named broadcast group.
pub struct Room {
    name: String,
    history_limit: usize,
    inner: Mutex<RoomInner>,
}

impl Room {
    /// Create an empty room retaining at most `history_limit` messages.
    pub fn new(name: impl Into<String>, history_limit: usize) -> Self {
        Self {
            name: name.into(),
            history_limit,
            inner: Mutex::new(RoomInner {
                members: HashMap::new(),
                history: VecDeque::new(),
            }),
        }
    }

    /// Room name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Insert `session` as a member and return the history snapshot the
    /// joiner should be shown. Duplicate insertion is a no-op; the snapshot
    /// and the insertion happen under one lock, so no broadcast can fall
    /// between them.
    pub async fn join(&self, session: &Arc<Session>) -> Vec<RoomMessage> {
        let mut inner = self.inner.lock().await;
        inner.members.insert(session.id(), Arc::downgrade(session));
        inner.history.iter().cloned().collect()
    }

    /// Remove the member entry for `id`. Absent is a no-op, not an error.
    pub async fn remove_member(&self, id: SessionId) -> bool {
        self.inner.lock().await.members.remove(&id).is_some()
    }

    /// Whether `id` currently has a member entry.
    pub async fn has_member(&self, id: SessionId) -> bool {
        self.inner.lock().await.members.contains_key(&id)
    }

    /// Number of member entries, including not-yet-pruned stale ones.
    pub async fn member_count(&self) -> usize {
        self.inner.lock().await.members.len()
    }

    /// Append `message` to history and fan it out to every live member.
    ///
    /// Members whose session is gone or closing are pruned as a side effect
    /// of this pass. `exclude` suppresses the echo to the sender. Returns
    /// the number of sessions the message was enqueued to.
    pub async fn broadcast(&self, message: RoomMessage, exclude: Option<SessionId>) -> usize {
        let mut inner = self.inner.lock().await;

        if self.history_limit > 0 {
            while inner.history.len() >= self.history_limit {
                inner.history.pop_front();
            }
            inner.history.push_back(message.clone());
        }

        let mut delivered = 0;
        inner.members.retain(|id, weak| {
            let Some(session) = weak.upgrade() else {
                return false;
            };
            if Some(*id) == exclude {
                return true;
            }
            if session.submit(Response::Message {
                room: self.name.clone(),
                from: message.from.clone(),
                text: message.text.clone(),
            }) {
                delivered += 1;
                true
            } else {
                // Rejected submit means the session is closing or its
                // writer is gone; drop the back-reference now.
                false
            }
        });
        delivered
    }

    /// Point-in-time copy of the retained history, most recent last.
    pub async fn history(&self) -> Vec<RoomMessage> {
        self.inner.lock().await.history.iter().cloned().collect()
    }
}

impl std::fmt::Debug for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Room")
            .field("name", &self.name)
            .field("history_limit", &self.history_limit)
            .finish()
    }
}

/// Concurrent map of room name to room, with get-or-create semantics.
#[derive(Debug)]
pub struct RoomRegistry {
    history_limit: usize,
    rooms: RwLock<HashMap<String, Arc<Room>>>,
}

impl RoomRegistry {
    /// Create an empty registry; rooms it creates retain at most
    /// `history_limit` messages.
    pub fn new(history_limit: usize) -> Self {
        Self {
            history_limit,
            rooms: RwLock::new(HashMap::new()),
        }
    }

    /// Return the room named `name`, creating it if absent.
    ///
    /// Under concurrent callers for a new name, exactly one `Room` is
    /// constructed and every caller gets a handle to it.
    pub async fn get_or_create(&self, name: &str) -> Arc<Room> {
        if let Some(room) = self.rooms.read().await.get(name) {
            return Arc::clone(room);
        }
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .entry(name.to_owned())
            .or_insert_with(|| Arc::new(Room::new(name, self.history_limit)));
        Arc::clone(room)
    }

    /// Look up an existing room.
    pub async fn get(&self, name: &str) -> Option<Arc<Room>> {
        self.rooms.read().await.get(name).cloned()
    }

    /// Remove and return the room named `name`. No-op when absent.
    pub async fn remove(&self, name: &str) -> Option<Arc<Room>> {
        self.rooms.write().await.remove(name)
    }

    /// Point-in-time copy of all rooms.
    pub async fn snapshot(&self) -> Vec<Arc<Room>> {
        self.rooms.read().await.values().cloned().collect()
    }

    /// Names of all rooms, sorted.
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.rooms.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of rooms.
    pub async fn len(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Whether no rooms exist.
    pub async fn is_empty(&self) -> bool {
        self.rooms.read().await.is_empty()
    }
}
