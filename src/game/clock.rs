//! Wall-clock-authoritative single-shot timers.
//!
//! One timer per `(room code, timer kind)`. The persisted
//! `round_phase_end_time` is the authority: tasks sleep until that absolute
//! instant (plus a deterministic per-room jitter) and re-validate the phase
//! against the cached snapshot, then against fresh state, before acting.
//! On process start [`PhaseClock::rebuild`] re-creates every timer from the
//! database before the join gate opens.

use std::time::SystemTime;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::dao::models::RoomEntity;
use crate::dao::room_cache::RoomSnapshot;
use crate::game::phases::{RoundPhase, LOBBY_TIMEOUT_SECS};
use crate::game::{engine, lifecycle};
use crate::state::SharedState;

/// What a scheduled timer will do when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    Phase(RoundPhase),
    LobbyIdle,
}

pub struct PhaseClock {
    timers: DashMap<(String, TimerKind), JoinHandle<()>>,
}

impl PhaseClock {
    pub fn new() -> Self {
        Self {
            timers: DashMap::new(),
        }
    }

    /// Schedule the expiry of the room's active timed phase.
    ///
    /// Replaces any previous timer with the same key; the caller must have
    /// already persisted `round_phase_end_time`.
    pub fn schedule_phase(&self, state: &SharedState, room: &RoomEntity) {
        let Some((phase, end_time)) = room.active_timed_phase() else {
            return;
        };
        let key = (room.code.clone(), TimerKind::Phase(phase));
        let delay = end_time
            .duration_since(SystemTime::now())
            .unwrap_or_default()
            + state.config().phase_jitter(room.id);

        let task_state = state.clone();
        let room_id = room.id;
        let code = room.code.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fire_phase(task_state, room_id, code, phase).await;
        });

        if let Some(previous) = self.timers.insert(key, handle) {
            previous.abort();
        }
    }

    /// Arm the lobby idle timer for a freshly created or reset lobby.
    pub fn schedule_lobby_idle(&self, state: &SharedState, room: &RoomEntity) {
        let key = (room.code.clone(), TimerKind::LobbyIdle);
        let task_state = state.clone();
        let room_id = room.id;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_secs(LOBBY_TIMEOUT_SECS)).await;
            if let Err(err) = lifecycle::on_lobby_idle(&task_state, room_id).await {
                warn!(room_id, error = %err, "lobby idle handler failed");
            }
        });
        if let Some(previous) = self.timers.insert(key, handle) {
            previous.abort();
        }
    }

    pub fn cancel(&self, code: &str, kind: TimerKind) {
        if let Some((_, handle)) = self.timers.remove(&(code.to_owned(), kind)) {
            handle.abort();
        }
    }

    /// Drop the bookkeeping entry for a timer that is firing right now.
    /// Unlike [`cancel`](Self::cancel) this never aborts, so a handler may
    /// call it for its own key.
    fn forget(&self, code: &str, kind: TimerKind) {
        self.timers.remove(&(code.to_owned(), kind));
    }

    /// Cancel every phase timer for the room; leaving, owner leave,
    /// report-driven skips and explicit transitions all funnel here.
    pub fn cancel_phase_timers(&self, code: &str) {
        self.timers.retain(|(timer_code, kind), handle| {
            if timer_code == code && matches!(kind, TimerKind::Phase(_)) {
                handle.abort();
                false
            } else {
                true
            }
        });
    }

    pub fn cancel_all(&self, code: &str) {
        self.timers.retain(|(timer_code, _), handle| {
            if timer_code == code {
                handle.abort();
                false
            } else {
                true
            }
        });
    }

    #[cfg(test)]
    pub fn scheduled_count(&self, code: &str) -> usize {
        self.timers
            .iter()
            .filter(|entry| entry.key().0 == code)
            .count()
    }

    /// Startup sweep: reschedule (or fire, when overdue) every timed phase
    /// of every playing room. Runs before the join gate opens.
    pub async fn rebuild(&self, state: &SharedState) {
        let store = match state.room_store().await {
            Ok(store) => store,
            Err(err) => {
                error!(error = %err, "timer rebuild skipped: no store installed");
                return;
            }
        };

        let rooms = match store.list_playing_rooms().await {
            Ok(rooms) => rooms,
            Err(err) => {
                error!(error = %err, "timer rebuild failed to list playing rooms");
                return;
            }
        };

        let mut rescheduled = 0usize;
        let mut fired = 0usize;
        for room in rooms {
            let Some((phase, end_time)) = room.active_timed_phase() else {
                continue;
            };
            state.cache().refresh(&room);
            if end_time <= SystemTime::now() {
                // Overdue while we were down: run the expiry now.
                fired += 1;
                let task_state = state.clone();
                let code = room.code.clone();
                let room_id = room.id;
                tokio::spawn(async move {
                    fire_phase(task_state, room_id, code, phase).await;
                });
            } else {
                rescheduled += 1;
                self.schedule_phase(state, &room);
            }
        }
        info!(rescheduled, fired, "phase timer rebuild complete");
    }
}

impl Default for PhaseClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Cheap pre-check against the cached snapshot: a timer whose phase has
/// already moved on exits without touching the database.
fn snapshot_allows(snapshot: Option<RoomSnapshot>, phase: RoundPhase) -> bool {
    match snapshot {
        Some(snapshot) => snapshot.round_phase == Some(phase),
        // Cache miss: fall through to the authoritative read.
        None => true,
    }
}

async fn fire_phase(state: SharedState, room_id: i64, code: String, phase: RoundPhase) {
    state.clock().forget(&code, TimerKind::Phase(phase));

    if !snapshot_allows(state.cache().get(room_id), phase) {
        debug!(room_id, phase = phase.as_str(), "timer lost to cached transition");
        return;
    }

    let store = match state.room_store().await {
        Ok(store) => store,
        Err(err) => {
            warn!(room_id, error = %err, "phase expiry skipped: storage degraded");
            return;
        }
    };
    let room = match store.find_room(room_id).await {
        Ok(Some(room)) => room,
        Ok(None) => return,
        Err(err) => {
            warn!(room_id, error = %err, "phase expiry failed to read room");
            return;
        }
    };
    if room.round_phase != Some(phase) {
        debug!(room_id, phase = phase.as_str(), "timer lost to concurrent transition");
        return;
    }

    if let Err(err) = engine::on_phase_expired(&state, room, phase).await {
        // A stuck room is worse than a skipped beat: try to move on.
        error!(room_id, phase = phase.as_str(), error = %err, "phase expiry handler failed; attempting recovery");
        engine::recover_room(&state, room_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::models::{NewRoom, RoomSettings};
    use crate::dao::room_store::{PhaseUpdate, RoomStore};
    use crate::game::phases::GameMode;
    use crate::state::test_support::state_with_memory_store;
    use std::time::Duration;

    #[tokio::test]
    async fn cancel_all_clears_every_timer_for_a_room() {
        let (state, store) = state_with_memory_store().await;
        let room = store
            .create_room(NewRoom {
                owner_id: 1,
                max_players: 4,
                is_public: false,
                game_mode: GameMode::Solo,
                settings: RoomSettings::default(),
            })
            .await
            .unwrap();
        let room = store
            .transition_phase(
                room.id,
                None,
                PhaseUpdate::enter(
                    RoundPhase::Drawing,
                    SystemTime::now() + Duration::from_secs(80),
                ),
            )
            .await
            .unwrap()
            .unwrap();

        state.clock().schedule_phase(&state, &room);
        state.clock().schedule_lobby_idle(&state, &room);
        assert_eq!(state.clock().scheduled_count(&room.code), 2);

        state.clock().cancel_phase_timers(&room.code);
        assert_eq!(state.clock().scheduled_count(&room.code), 1);

        state.clock().cancel_all(&room.code);
        assert_eq!(state.clock().scheduled_count(&room.code), 0);
    }

    #[tokio::test]
    async fn rescheduling_a_phase_replaces_the_previous_timer() {
        let (state, store) = state_with_memory_store().await;
        let room = store
            .create_room(NewRoom {
                owner_id: 1,
                max_players: 4,
                is_public: false,
                game_mode: GameMode::Solo,
                settings: RoomSettings::default(),
            })
            .await
            .unwrap();
        let room = store
            .transition_phase(
                room.id,
                None,
                PhaseUpdate::enter(
                    RoundPhase::Drawing,
                    SystemTime::now() + Duration::from_secs(80),
                ),
            )
            .await
            .unwrap()
            .unwrap();

        state.clock().schedule_phase(&state, &room);
        state.clock().schedule_phase(&state, &room);
        assert_eq!(state.clock().scheduled_count(&room.code), 1);
    }

    #[test]
    fn snapshot_guard_blocks_stale_phase() {
        let snapshot = RoomSnapshot {
            id: 1,
            code: "AAAAA".into(),
            round_phase: Some(RoundPhase::Reveal),
            round_phase_end_time: Some(SystemTime::now() + Duration::from_secs(7)),
        };
        assert!(!snapshot_allows(
            Some(snapshot.clone()),
            RoundPhase::Drawing
        ));
        assert!(snapshot_allows(Some(snapshot), RoundPhase::Reveal));
        assert!(snapshot_allows(None, RoundPhase::Drawing));
    }
}
