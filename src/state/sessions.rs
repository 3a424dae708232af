//! Live socket bookkeeping: the single-session-per-user map, join dedup
//! locks, disconnect grace timers, and canvas resync flags.
//!
//! Everything here is process-local and never blocks on I/O; persistent
//! truth stays in the room store.

use std::time::{Duration, Instant};

use axum::extract::ws::Message;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Fallback TTL releasing a join lock whose holder never finished.
const JOIN_LOCK_TTL: Duration = Duration::from_secs(2);

/// Handle used to push messages to one connected socket.
#[derive(Clone)]
pub struct SocketHandle {
    pub socket_id: Uuid,
    pub user_id: i64,
    pub tx: mpsc::UnboundedSender<Message>,
    /// Room this socket has joined, if any.
    pub room_id: Option<i64>,
}

pub struct SessionRegistry {
    sockets: DashMap<Uuid, SocketHandle>,
    user_index: DashMap<i64, Uuid>,
    join_locks: DashMap<(i64, i64), Instant>,
    grace_timers: DashMap<(i64, i64), JoinHandle<()>>,
    /// Sockets currently replaying a canvas snapshot, per room.
    resyncing: DashMap<(Uuid, i64), ()>,
    /// Sockets that already asked for a snapshot this resume, per room.
    canvas_requested: DashMap<(Uuid, i64), ()>,
    /// Sockets that announced a permanent leave (shortened grace).
    leaving: DashMap<Uuid, ()>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sockets: DashMap::new(),
            user_index: DashMap::new(),
            join_locks: DashMap::new(),
            grace_timers: DashMap::new(),
            resyncing: DashMap::new(),
            canvas_requested: DashMap::new(),
            leaving: DashMap::new(),
        }
    }

    /// Register a freshly authenticated socket.
    ///
    /// If the user already holds a socket, that socket is evicted first and
    /// its sender returned so the caller can close it; only then does the
    /// new socket become current.
    pub fn register(
        &self,
        user_id: i64,
        tx: mpsc::UnboundedSender<Message>,
    ) -> (Uuid, Option<SocketHandle>) {
        let evicted = self
            .user_index
            .remove(&user_id)
            .and_then(|(_, old_socket)| self.sockets.remove(&old_socket))
            .map(|(_, handle)| handle);

        let socket_id = Uuid::new_v4();
        self.sockets.insert(
            socket_id,
            SocketHandle {
                socket_id,
                user_id,
                tx,
                room_id: None,
            },
        );
        self.user_index.insert(user_id, socket_id);
        (socket_id, evicted)
    }

    /// Drop a socket on disconnect.
    ///
    /// The user entry is cleared only while it still points at this socket,
    /// so a late-fired disconnect never evicts a newer connection.
    pub fn unregister(&self, socket_id: Uuid) -> Option<SocketHandle> {
        let (_, handle) = self.sockets.remove(&socket_id)?;
        self.user_index
            .remove_if(&handle.user_id, |_, current| *current == socket_id);
        self.resyncing.retain(|(sid, _), _| *sid != socket_id);
        self.canvas_requested.retain(|(sid, _), _| *sid != socket_id);
        self.leaving.remove(&socket_id);
        Some(handle)
    }

    pub fn socket(&self, socket_id: Uuid) -> Option<SocketHandle> {
        self.sockets.get(&socket_id).map(|entry| entry.clone())
    }

    /// Resolve the user's current socket at send time; never cached.
    pub fn socket_for_user(&self, user_id: i64) -> Option<SocketHandle> {
        let socket_id = *self.user_index.get(&user_id)?;
        self.socket(socket_id)
    }

    pub fn current_socket_id(&self, user_id: i64) -> Option<Uuid> {
        self.user_index.get(&user_id).map(|entry| *entry)
    }

    pub fn set_room(&self, socket_id: Uuid, room_id: Option<i64>) {
        if let Some(mut entry) = self.sockets.get_mut(&socket_id) {
            entry.room_id = room_id;
        }
    }

    /// Every registered socket currently joined to the room.
    pub fn sockets_in_room(&self, room_id: i64) -> Vec<SocketHandle> {
        self.sockets
            .iter()
            .filter(|entry| entry.room_id == Some(room_id))
            .map(|entry| entry.clone())
            .collect()
    }

    /// Take the short-lived join lock for (room, user). Returns false while
    /// another join for the same pair is in flight and the TTL has not
    /// elapsed.
    pub fn try_join_lock(&self, room_id: i64, user_id: i64) -> bool {
        let key = (room_id, user_id);
        let now = Instant::now();
        let mut acquired = false;
        let entry = self.join_locks.entry(key).or_insert_with(|| {
            acquired = true;
            now
        });
        if acquired {
            return true;
        }
        if now.duration_since(*entry) > JOIN_LOCK_TTL {
            // Stale lock from a join that never completed.
            drop(entry);
            self.join_locks.insert(key, now);
            return true;
        }
        false
    }

    pub fn release_join_lock(&self, room_id: i64, user_id: i64) {
        self.join_locks.remove(&(room_id, user_id));
    }

    /// Arm (replacing any previous) the disconnect grace timer.
    pub fn arm_grace(&self, room_id: i64, user_id: i64, timer: JoinHandle<()>) {
        if let Some(previous) = self.grace_timers.insert((room_id, user_id), timer) {
            previous.abort();
        }
    }

    /// Cancel the grace timer; the reconnect path calls this first.
    pub fn cancel_grace(&self, room_id: i64, user_id: i64) -> bool {
        match self.grace_timers.remove(&(room_id, user_id)) {
            Some((_, timer)) => {
                timer.abort();
                true
            }
            None => false,
        }
    }

    /// Drop the bookkeeping entry once a grace timer has fired.
    pub fn grace_fired(&self, room_id: i64, user_id: i64) {
        self.grace_timers.remove(&(room_id, user_id));
    }

    pub fn mark_resyncing(&self, socket_id: Uuid, room_id: i64) {
        self.resyncing.insert((socket_id, room_id), ());
    }

    pub fn is_resyncing(&self, socket_id: Uuid, room_id: i64) -> bool {
        self.resyncing.contains_key(&(socket_id, room_id))
    }

    /// `resync_done` clears the flag for every room of this socket.
    pub fn finish_resync(&self, socket_id: Uuid) {
        self.resyncing.retain(|(sid, _), _| *sid != socket_id);
        self.canvas_requested.retain(|(sid, _), _| *sid != socket_id);
    }

    /// One snapshot request per resume: true only for the first caller.
    pub fn request_canvas_once(&self, socket_id: Uuid, room_id: i64) -> bool {
        let mut first = false;
        self.canvas_requested
            .entry((socket_id, room_id))
            .or_insert_with(|| {
                first = true;
            });
        first
    }

    pub fn mark_leaving(&self, socket_id: Uuid) {
        self.leaving.insert(socket_id, ());
    }

    pub fn is_leaving(&self, socket_id: Uuid) -> bool {
        self.leaving.contains_key(&socket_id)
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> mpsc::UnboundedSender<Message> {
        let (tx, _rx) = mpsc::unbounded_channel();
        tx
    }

    #[test]
    fn at_most_one_socket_per_user() {
        let registry = SessionRegistry::new();
        let (first, evicted) = registry.register(7, channel());
        assert!(evicted.is_none());

        let (second, evicted) = registry.register(7, channel());
        let evicted = evicted.expect("previous socket must be evicted");
        assert_eq!(evicted.socket_id, first);
        assert!(registry.socket(first).is_none());
        assert_eq!(registry.current_socket_id(7), Some(second));
    }

    #[test]
    fn late_disconnect_does_not_evict_newer_connection() {
        let registry = SessionRegistry::new();
        let (old, _) = registry.register(7, channel());
        let (new, _) = registry.register(7, channel());

        // The old socket's disconnect arrives after the new registration.
        registry.unregister(old);
        assert_eq!(registry.current_socket_id(7), Some(new));
    }

    #[test]
    fn join_lock_blocks_duplicates_until_released() {
        let registry = SessionRegistry::new();
        assert!(registry.try_join_lock(1, 7));
        assert!(!registry.try_join_lock(1, 7));
        registry.release_join_lock(1, 7);
        assert!(registry.try_join_lock(1, 7));
    }

    #[test]
    fn room_broadcast_set_follows_set_room() {
        let registry = SessionRegistry::new();
        let (a, _) = registry.register(1, channel());
        let (b, _) = registry.register(2, channel());
        registry.set_room(a, Some(9));
        registry.set_room(b, Some(9));
        assert_eq!(registry.sockets_in_room(9).len(), 2);

        registry.set_room(b, None);
        assert_eq!(registry.sockets_in_room(9).len(), 1);
    }

    #[test]
    fn resync_flags_are_per_socket_and_cleared_once() {
        let registry = SessionRegistry::new();
        let (socket, _) = registry.register(1, channel());
        registry.mark_resyncing(socket, 9);
        assert!(registry.is_resyncing(socket, 9));
        assert!(registry.request_canvas_once(socket, 9));
        assert!(!registry.request_canvas_once(socket, 9));

        registry.finish_resync(socket);
        assert!(!registry.is_resyncing(socket, 9));
        assert!(registry.request_canvas_once(socket, 9));
    }
}
