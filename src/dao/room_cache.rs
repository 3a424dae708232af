//! Short-TTL read-through snapshot of hot room fields.
//!
//! Never the source of truth: the phase clock uses it to decide "is the phase
//! still the one I was scheduled for?" without a database round-trip. Any
//! path that writes fetches through the store first.

use std::time::{Duration, Instant, SystemTime};

use dashmap::DashMap;

use crate::dao::models::RoomEntity;
use crate::game::phases::{remaining_secs, RoundPhase};

/// Minimal cached view of a room's phase state.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomSnapshot {
    pub id: i64,
    pub code: String,
    pub round_phase: Option<RoundPhase>,
    pub round_phase_end_time: Option<SystemTime>,
}

impl RoomSnapshot {
    /// Client-visible whole seconds left in the active phase.
    pub fn remaining_secs(&self) -> u64 {
        self.round_phase_end_time
            .map(|end| remaining_secs(end, SystemTime::now()))
            .unwrap_or(0)
    }
}

struct CacheSlot {
    snapshot: RoomSnapshot,
    cached_at: Instant,
}

/// TTL cache keyed by room id with a parallel code → id index.
pub struct RoomCache {
    slots: DashMap<i64, CacheSlot>,
    code_index: DashMap<String, i64>,
    ttl: Duration,
}

impl RoomCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            slots: DashMap::new(),
            code_index: DashMap::new(),
            ttl,
        }
    }

    /// Fresh snapshot for the room, if one is cached and within TTL.
    pub fn get(&self, room_id: i64) -> Option<RoomSnapshot> {
        let slot = self.slots.get(&room_id)?;
        if slot.cached_at.elapsed() > self.ttl {
            return None;
        }
        Some(slot.snapshot.clone())
    }

    pub fn get_by_code(&self, code: &str) -> Option<RoomSnapshot> {
        let id = *self.code_index.get(code)?;
        self.get(id)
    }

    /// Called after every successful mutation of the full record.
    pub fn refresh(&self, room: &RoomEntity) {
        self.code_index.insert(room.code.clone(), room.id);
        self.slots.insert(
            room.id,
            CacheSlot {
                snapshot: RoomSnapshot {
                    id: room.id,
                    code: room.code.clone(),
                    round_phase: room.round_phase,
                    round_phase_end_time: room.round_phase_end_time,
                },
                cached_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, room_id: i64) {
        if let Some((_, slot)) = self.slots.remove(&room_id) {
            self.code_index.remove(&slot.snapshot.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::models::RoomSettings;
    use crate::game::phases::{GameMode, RoomStatus};

    fn sample_room(id: i64, code: &str) -> RoomEntity {
        let now = SystemTime::now();
        RoomEntity {
            id,
            code: code.to_owned(),
            owner_id: 1,
            max_players: 8,
            is_public: true,
            game_mode: GameMode::Solo,
            settings: RoomSettings::default(),
            status: RoomStatus::Playing,
            current_round: 1,
            round_phase: Some(RoundPhase::Drawing),
            round_phase_end_time: Some(now + Duration::from_secs(42)),
            current_drawer_id: Some(1),
            current_word: Some("tree".into()),
            current_word_options: None,
            drawer_pointer_index: 0,
            last_drawer_id: None,
            drawn_user_ids: vec![1],
            used_words: vec!["tree".into()],
            seat_count: 3,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn refresh_then_get_by_id_and_code() {
        let cache = RoomCache::new(Duration::from_secs(3));
        cache.refresh(&sample_room(7, "ABCDE"));

        let by_id = cache.get(7).unwrap();
        assert_eq!(by_id.round_phase, Some(RoundPhase::Drawing));
        let by_code = cache.get_by_code("ABCDE").unwrap();
        assert_eq!(by_code.id, 7);
    }

    #[test]
    fn expired_entries_are_misses() {
        let cache = RoomCache::new(Duration::ZERO);
        cache.refresh(&sample_room(7, "ABCDE"));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get(7).is_none());
    }

    #[test]
    fn invalidate_drops_both_indexes() {
        let cache = RoomCache::new(Duration::from_secs(3));
        cache.refresh(&sample_room(7, "ABCDE"));
        cache.invalidate(7);
        assert!(cache.get(7).is_none());
        assert!(cache.get_by_code("ABCDE").is_none());
    }

    #[test]
    fn snapshot_remaining_clamps_to_zero() {
        let snapshot = RoomSnapshot {
            id: 1,
            code: "AAAAA".into(),
            round_phase: Some(RoundPhase::Drawing),
            round_phase_end_time: Some(SystemTime::now() - Duration::from_secs(5)),
        };
        assert_eq!(snapshot.remaining_secs(), 0);
    }
}
