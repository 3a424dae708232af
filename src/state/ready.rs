//! Process-wide Ready tracking: room id → user ids who tapped Ready.
//! Cleared on game start and on return-to-lobby.

use std::collections::HashSet;

use dashmap::DashMap;

pub struct ReadySet {
    rooms: DashMap<i64, HashSet<i64>>,
}

impl ReadySet {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
        }
    }

    pub fn set_ready(&self, room_id: i64, user_id: i64) {
        self.rooms.entry(room_id).or_default().insert(user_id);
    }

    pub fn set_not_ready(&self, room_id: i64, user_id: i64) {
        if let Some(mut users) = self.rooms.get_mut(&room_id) {
            users.remove(&user_id);
        }
    }

    pub fn is_ready(&self, room_id: i64, user_id: i64) -> bool {
        self.rooms
            .get(&room_id)
            .map(|users| users.contains(&user_id))
            .unwrap_or(false)
    }

    pub fn ready_users(&self, room_id: i64) -> HashSet<i64> {
        self.rooms
            .get(&room_id)
            .map(|users| users.clone())
            .unwrap_or_default()
    }

    /// Drop a single user, e.g. when their grace window expires.
    pub fn remove_user(&self, room_id: i64, user_id: i64) {
        self.set_not_ready(room_id, user_id);
    }

    pub fn clear_room(&self, room_id: i64) {
        self.rooms.remove(&room_id);
    }
}

impl Default for ReadySet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_state_round_trip() {
        let ready = ReadySet::new();
        ready.set_ready(1, 10);
        ready.set_ready(1, 11);
        assert!(ready.is_ready(1, 10));
        assert_eq!(ready.ready_users(1).len(), 2);

        ready.set_not_ready(1, 10);
        assert!(!ready.is_ready(1, 10));

        ready.clear_room(1);
        assert!(ready.ready_users(1).is_empty());
    }
}
