//! In-memory [`RoomStore`] backend.
//!
//! Serializes every operation under a single mutex, which gives the same
//! observable compare-and-update semantics as the MongoDB backend. Used by
//! tests and local development without a database.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use futures::future::BoxFuture;
use rand::Rng;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::dao::models::{
    MessageEntity, NewMessage, NewReport, NewRoom, ParticipantEntity, ReportEntity, ReportKind,
    RoomEntity, RoomSettings,
};
use crate::game::phases::{RoomStatus, RoundPhase, Team, ELIMINATION_ALLOWANCE};

use super::{JoinOutcome, ParticipantPatch, PhaseUpdate, RoomStore, StoreResult};

#[derive(Default)]
struct MemoryState {
    next_room_id: i64,
    rooms: HashMap<i64, RoomEntity>,
    code_index: HashMap<String, i64>,
    participants: HashMap<(i64, i64), ParticipantEntity>,
    messages: Vec<MessageEntity>,
    reports: HashMap<(i64, i64, ReportKind), ReportEntity>,
}

#[derive(Clone, Default)]
pub struct MemoryRoomStore {
    inner: Arc<Mutex<MemoryState>>,
}

impl MemoryRoomStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn random_code(taken: &HashMap<String, i64>) -> String {
    let mut rng = rand::thread_rng();
    loop {
        let code: String = (0..5)
            .map(|_| char::from(b'A' + rng.gen_range(0..26)))
            .collect();
        if !taken.contains_key(&code) {
            return code;
        }
    }
}

fn apply_phase_update(room: &mut RoomEntity, update: PhaseUpdate) {
    room.round_phase = update.phase;
    room.round_phase_end_time = update.phase_end_time;
    if let Some(status) = update.status {
        room.status = status;
    }
    if let Some(round) = update.current_round {
        room.current_round = round;
    }
    if let Some(drawer) = update.current_drawer_id {
        room.current_drawer_id = drawer;
    }
    if let Some(word) = update.current_word {
        room.current_word = word;
    }
    if let Some(options) = update.current_word_options {
        room.current_word_options = options;
    }
    if let Some(pointer) = update.drawer_pointer_index {
        room.drawer_pointer_index = pointer;
    }
    if let Some(last) = update.last_drawer_id {
        room.last_drawer_id = last;
    }
    if let Some(drawn) = update.drawn_user_ids {
        room.drawn_user_ids = drawn;
    }
    if update.clear_used_words {
        room.used_words.clear();
    }
    if let Some(word) = update.used_word {
        if !room.used_words.contains(&word) {
            room.used_words.push(word);
        }
    }
    room.updated_at = SystemTime::now();
}

fn apply_participant_patch(participant: &mut ParticipantEntity, patch: ParticipantPatch) {
    if let Some(socket) = patch.socket_id {
        participant.socket_id = socket;
    }
    if let Some(active) = patch.is_active {
        participant.is_active = active;
    }
    if let Some(team) = patch.team {
        participant.team = team;
    }
    if let Some(paid) = patch.has_paid_entry {
        participant.has_paid_entry = paid;
    }
    if let Some(drawn) = patch.has_drawn {
        participant.has_drawn = drawn;
    }
    if let Some(count) = patch.elimination_count {
        participant.elimination_count = count;
    }
    if let Some(count) = patch.skip_count {
        participant.skip_count = count;
    }
}

fn recount_seats(state: &mut MemoryState, room_id: i64) {
    let seats = state
        .participants
        .values()
        .filter(|p| p.room_id == room_id && p.is_active)
        .count() as u32;
    if let Some(room) = state.rooms.get_mut(&room_id) {
        room.seat_count = seats;
    }
}

impl RoomStore for MemoryRoomStore {
    fn create_room(&self, new_room: NewRoom) -> BoxFuture<'static, StoreResult<RoomEntity>> {
        let store = self.clone();
        Box::pin(async move {
            let mut state = store.inner.lock().await;
            state.next_room_id += 1;
            let id = state.next_room_id;
            let code = random_code(&state.code_index);
            let now = SystemTime::now();
            let room = RoomEntity {
                id,
                code: code.clone(),
                owner_id: new_room.owner_id,
                max_players: new_room.max_players,
                is_public: new_room.is_public,
                game_mode: new_room.game_mode,
                settings: new_room.settings,
                status: RoomStatus::Lobby,
                current_round: 0,
                round_phase: None,
                round_phase_end_time: None,
                current_drawer_id: None,
                current_word: None,
                current_word_options: None,
                drawer_pointer_index: 0,
                last_drawer_id: None,
                drawn_user_ids: Vec::new(),
                used_words: Vec::new(),
                seat_count: 0,
                created_at: now,
                updated_at: now,
            };
            state.code_index.insert(code, id);
            state.rooms.insert(id, room.clone());
            Ok(room)
        })
    }

    fn find_room(&self, id: i64) -> BoxFuture<'static, StoreResult<Option<RoomEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let state = store.inner.lock().await;
            Ok(state.rooms.get(&id).cloned())
        })
    }

    fn find_room_by_code(
        &self,
        code: String,
    ) -> BoxFuture<'static, StoreResult<Option<RoomEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let state = store.inner.lock().await;
            let id = state.code_index.get(&code).copied();
            Ok(id.and_then(|id| state.rooms.get(&id).cloned()))
        })
    }

    fn list_public_rooms(&self) -> BoxFuture<'static, StoreResult<Vec<RoomEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let state = store.inner.lock().await;
            let mut rooms: Vec<_> = state
                .rooms
                .values()
                .filter(|room| room.is_public && room.status.accepts_setup_changes())
                .cloned()
                .collect();
            rooms.sort_by_key(|room| room.id);
            Ok(rooms)
        })
    }

    fn list_playing_rooms(&self) -> BoxFuture<'static, StoreResult<Vec<RoomEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let state = store.inner.lock().await;
            let mut rooms: Vec<_> = state
                .rooms
                .values()
                .filter(|room| room.status == RoomStatus::Playing)
                .cloned()
                .collect();
            rooms.sort_by_key(|room| room.id);
            Ok(rooms)
        })
    }

    fn update_settings(
        &self,
        room_id: i64,
        settings: RoomSettings,
    ) -> BoxFuture<'static, StoreResult<Option<RoomEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let mut state = store.inner.lock().await;
            let Some(room) = state.rooms.get_mut(&room_id) else {
                return Ok(None);
            };
            room.settings = settings;
            room.updated_at = SystemTime::now();
            Ok(Some(room.clone()))
        })
    }

    fn set_status(
        &self,
        room_id: i64,
        status: RoomStatus,
    ) -> BoxFuture<'static, StoreResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let mut state = store.inner.lock().await;
            if let Some(room) = state.rooms.get_mut(&room_id) {
                room.status = status;
                room.updated_at = SystemTime::now();
            }
            Ok(())
        })
    }

    fn transition_phase(
        &self,
        room_id: i64,
        from: Option<RoundPhase>,
        update: PhaseUpdate,
    ) -> BoxFuture<'static, StoreResult<Option<RoomEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let mut state = store.inner.lock().await;
            let Some(room) = state.rooms.get_mut(&room_id) else {
                return Ok(None);
            };
            if room.round_phase != from {
                return Ok(None);
            }
            apply_phase_update(room, update);
            Ok(Some(room.clone()))
        })
    }

    fn delete_room(&self, room_id: i64) -> BoxFuture<'static, StoreResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            let mut state = store.inner.lock().await;
            let Some(room) = state.rooms.remove(&room_id) else {
                return Ok(false);
            };
            state.code_index.remove(&room.code);
            state.participants.retain(|(rid, _), _| *rid != room_id);
            state.reports.retain(|(rid, _, _), _| *rid != room_id);
            Ok(true)
        })
    }

    fn join_room(
        &self,
        room_id: i64,
        user_id: i64,
        team: Option<Team>,
    ) -> BoxFuture<'static, StoreResult<JoinOutcome>> {
        let store = self.clone();
        Box::pin(async move {
            let mut state = store.inner.lock().await;
            let Some(room) = state.rooms.get(&room_id) else {
                return Ok(JoinOutcome::RoomGone);
            };
            let max_players = room.max_players;
            let playing = room.status == RoomStatus::Playing;
            let active = state
                .participants
                .values()
                .filter(|p| p.room_id == room_id && p.is_active)
                .count() as u32;

            if let Some(existing) = state.participants.get_mut(&(room_id, user_id)) {
                if existing.is_banned() {
                    return Ok(JoinOutcome::Banned);
                }
                if existing.is_active {
                    return Ok(JoinOutcome::Rejoined(existing.clone()));
                }
                if playing {
                    // Grace already expired mid-game; the seat is gone.
                    return Ok(JoinOutcome::SeatLost);
                }
                if active >= max_players {
                    return Ok(JoinOutcome::RoomFull);
                }
                existing.is_active = true;
                let participant = existing.clone();
                recount_seats(&mut state, room_id);
                return Ok(JoinOutcome::Joined(participant));
            }

            if active >= max_players {
                return Ok(JoinOutcome::RoomFull);
            }

            let now = SystemTime::now();
            let participant = ParticipantEntity {
                room_id,
                user_id,
                team,
                is_drawer: false,
                score: 0,
                points_updated_at: now,
                has_guessed_this_round: false,
                has_paid_entry: false,
                has_drawn: false,
                elimination_count: ELIMINATION_ALLOWANCE,
                skip_count: 0,
                is_active: true,
                socket_id: None,
                banned_at: None,
                joined_at: now,
            };
            state
                .participants
                .insert((room_id, user_id), participant.clone());
            recount_seats(&mut state, room_id);
            Ok(JoinOutcome::Joined(participant))
        })
    }

    fn find_participant(
        &self,
        room_id: i64,
        user_id: i64,
    ) -> BoxFuture<'static, StoreResult<Option<ParticipantEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let state = store.inner.lock().await;
            Ok(state.participants.get(&(room_id, user_id)).cloned())
        })
    }

    fn list_participants(
        &self,
        room_id: i64,
    ) -> BoxFuture<'static, StoreResult<Vec<ParticipantEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let state = store.inner.lock().await;
            let mut participants: Vec<_> = state
                .participants
                .values()
                .filter(|p| p.room_id == room_id)
                .cloned()
                .collect();
            participants.sort_by_key(|p| p.user_id);
            Ok(participants)
        })
    }

    fn update_participant(
        &self,
        room_id: i64,
        user_id: i64,
        patch: ParticipantPatch,
    ) -> BoxFuture<'static, StoreResult<Option<ParticipantEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let mut state = store.inner.lock().await;
            let Some(participant) = state.participants.get_mut(&(room_id, user_id)) else {
                return Ok(None);
            };
            let was_active = participant.is_active;
            apply_participant_patch(participant, patch);
            let participant = participant.clone();
            if was_active != participant.is_active {
                recount_seats(&mut state, room_id);
            }
            Ok(Some(participant))
        })
    }

    fn set_drawer(&self, room_id: i64, drawer_id: i64) -> BoxFuture<'static, StoreResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let mut state = store.inner.lock().await;
            for participant in state.participants.values_mut() {
                if participant.room_id == room_id {
                    participant.is_drawer = participant.user_id == drawer_id;
                }
            }
            Ok(())
        })
    }

    fn award_guess(
        &self,
        room_id: i64,
        user_id: i64,
        points: i32,
        at: SystemTime,
    ) -> BoxFuture<'static, StoreResult<Option<ParticipantEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let mut state = store.inner.lock().await;
            let Some(participant) = state.participants.get_mut(&(room_id, user_id)) else {
                return Ok(None);
            };
            if participant.has_guessed_this_round {
                return Ok(None);
            }
            participant.has_guessed_this_round = true;
            participant.score += points;
            participant.points_updated_at = at;
            Ok(Some(participant.clone()))
        })
    }

    fn award_team(
        &self,
        room_id: i64,
        team: Team,
        points: i32,
        at: SystemTime,
    ) -> BoxFuture<'static, StoreResult<Vec<ParticipantEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let mut state = store.inner.lock().await;
            let mut awarded = Vec::new();
            for participant in state.participants.values_mut() {
                if participant.room_id == room_id
                    && participant.team == Some(team)
                    && participant.is_active
                    && !participant.has_guessed_this_round
                {
                    participant.has_guessed_this_round = true;
                    participant.score += points;
                    participant.points_updated_at = at;
                    awarded.push(participant.clone());
                }
            }
            awarded.sort_by_key(|p| p.user_id);
            Ok(awarded)
        })
    }

    fn reset_round_flags(&self, room_id: i64) -> BoxFuture<'static, StoreResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let mut state = store.inner.lock().await;
            for participant in state.participants.values_mut() {
                if participant.room_id == room_id {
                    participant.has_guessed_this_round = false;
                    participant.is_drawer = false;
                }
            }
            Ok(())
        })
    }

    fn reset_scores(&self, room_id: i64) -> BoxFuture<'static, StoreResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let mut state = store.inner.lock().await;
            for participant in state.participants.values_mut() {
                if participant.room_id == room_id {
                    participant.score = 0;
                    participant.has_guessed_this_round = false;
                    participant.has_paid_entry = false;
                    participant.has_drawn = false;
                    participant.is_drawer = false;
                    participant.elimination_count = ELIMINATION_ALLOWANCE;
                    participant.skip_count = 0;
                }
            }
            Ok(())
        })
    }

    fn remove_participant(
        &self,
        room_id: i64,
        user_id: i64,
    ) -> BoxFuture<'static, StoreResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            let mut state = store.inner.lock().await;
            let removed = state.participants.remove(&(room_id, user_id)).is_some();
            if removed {
                recount_seats(&mut state, room_id);
            }
            Ok(removed)
        })
    }

    fn ban_participant(
        &self,
        room_id: i64,
        user_id: i64,
        at: SystemTime,
    ) -> BoxFuture<'static, StoreResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let mut state = store.inner.lock().await;
            if let Some(participant) = state.participants.get_mut(&(room_id, user_id)) {
                participant.banned_at = Some(at);
                participant.is_active = false;
                participant.socket_id = None;
                recount_seats(&mut state, room_id);
            }
            Ok(())
        })
    }

    fn sweep_orphans(&self) -> BoxFuture<'static, StoreResult<Vec<i64>>> {
        let store = self.clone();
        Box::pin(async move {
            let mut state = store.inner.lock().await;
            let mut affected = Vec::new();
            for participant in state.participants.values_mut() {
                if participant.is_active && participant.socket_id.is_none() {
                    participant.is_active = false;
                    if !affected.contains(&participant.room_id) {
                        affected.push(participant.room_id);
                    }
                }
            }
            for room_id in &affected {
                recount_seats(&mut state, *room_id);
            }
            Ok(affected)
        })
    }

    fn save_message(
        &self,
        message: NewMessage,
    ) -> BoxFuture<'static, StoreResult<MessageEntity>> {
        let store = self.clone();
        Box::pin(async move {
            let mut state = store.inner.lock().await;
            let entity = MessageEntity {
                id: Uuid::new_v4(),
                room_id: message.room_id,
                user_id: message.user_id,
                content: message.content,
                sent_at: SystemTime::now(),
            };
            state.messages.push(entity.clone());
            Ok(entity)
        })
    }

    fn record_report(&self, report: NewReport) -> BoxFuture<'static, StoreResult<ReportEntity>> {
        let store = self.clone();
        Box::pin(async move {
            let mut state = store.inner.lock().await;
            let key = (report.room_id, report.target_user_id, report.kind);
            let entry = state.reports.entry(key).or_insert_with(|| ReportEntity {
                room_id: report.room_id,
                target_user_id: report.target_user_id,
                kind: report.kind,
                reporter_ids: Vec::new(),
                strike_count: 0,
            });
            if !entry.reporter_ids.contains(&report.reporter_id) {
                entry.reporter_ids.push(report.reporter_id);
                entry.strike_count += 1;
            }
            Ok(entry.clone())
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StoreResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StoreResult<()>> {
        Box::pin(async { Ok(()) })
    }
}
