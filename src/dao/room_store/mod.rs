pub mod memory;
pub mod mongodb;

use std::error::Error;
use std::time::SystemTime;

use futures::future::BoxFuture;
use thiserror::Error;
use uuid::Uuid;

use crate::dao::models::{
    MessageEntity, NewMessage, NewReport, NewRoom, ParticipantEntity, ReportEntity, RoomEntity,
    RoomSettings,
};
use crate::game::phases::{RoomStatus, RoundPhase, Team};

/// Result alias for room-store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Error surfaced by a room-store backend.
///
/// A lost phase race is NOT an error: `transition_phase` reports it as
/// `None` and the losing caller exits silently. `Conflict` is reserved for
/// multi-row writes that kept colliding after the backend's bounded retry,
/// which callers treat as transient unavailability of that one operation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("room store unavailable while {op}")]
    Backend {
        op: &'static str,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    #[error("room {room_id}: {op} still conflicted after {attempts} attempts")]
    Conflict {
        op: &'static str,
        room_id: i64,
        attempts: u32,
    },
}

/// Field set a phase transition may write together with `round_phase`.
///
/// `Option<Option<..>>` fields distinguish "leave untouched" (outer `None`)
/// from "clear" (inner `None`).
#[derive(Debug, Clone, Default)]
pub struct PhaseUpdate {
    pub phase: Option<RoundPhase>,
    pub phase_end_time: Option<SystemTime>,
    pub status: Option<RoomStatus>,
    pub current_round: Option<u32>,
    pub current_drawer_id: Option<Option<i64>>,
    pub current_word: Option<Option<String>>,
    pub current_word_options: Option<Option<Vec<String>>>,
    pub drawer_pointer_index: Option<u32>,
    pub last_drawer_id: Option<Option<i64>>,
    pub drawn_user_ids: Option<Vec<i64>>,
    /// Appended to `used_words` if not already present.
    pub used_word: Option<String>,
    pub clear_used_words: bool,
}

impl PhaseUpdate {
    /// Transition into `phase` with its authoritative end time.
    pub fn enter(phase: RoundPhase, end_time: SystemTime) -> Self {
        Self {
            phase: Some(phase),
            phase_end_time: Some(end_time),
            ..Self::default()
        }
    }

    /// Transition to the untimed sentinel (no end time).
    pub fn sentinel() -> Self {
        Self {
            phase: Some(RoundPhase::InternalProcessing),
            ..Self::default()
        }
    }

    /// Clear the phase entirely (back to lobby / closed).
    pub fn idle() -> Self {
        Self::default()
    }
}

/// Partial update of a participant row.
#[derive(Debug, Clone, Default)]
pub struct ParticipantPatch {
    pub socket_id: Option<Option<Uuid>>,
    pub is_active: Option<bool>,
    pub team: Option<Option<Team>>,
    pub has_paid_entry: Option<bool>,
    pub has_drawn: Option<bool>,
    pub elimination_count: Option<i32>,
    pub skip_count: Option<i32>,
}

/// Result of an atomic join attempt.
#[derive(Debug, Clone)]
pub enum JoinOutcome {
    /// A brand-new seat was claimed.
    Joined(ParticipantEntity),
    /// An existing active participant reconnected.
    Rejoined(ParticipantEntity),
    /// Participant exists but lost their seat to the grace timer.
    SeatLost,
    /// Active participants already fill `max_players`.
    RoomFull,
    /// The user is banned from this room.
    Banned,
    RoomGone,
}

/// Abstraction over the persistence layer for rooms and participants.
///
/// `transition_phase` is the sole way `round_phase` changes: it applies its
/// update only when the stored phase equals `from`, returning the post-image
/// on success and `None` when a concurrent transition won the race.
pub trait RoomStore: Send + Sync {
    fn create_room(&self, new_room: NewRoom) -> BoxFuture<'static, StoreResult<RoomEntity>>;
    fn find_room(&self, id: i64) -> BoxFuture<'static, StoreResult<Option<RoomEntity>>>;
    fn find_room_by_code(
        &self,
        code: String,
    ) -> BoxFuture<'static, StoreResult<Option<RoomEntity>>>;
    fn list_public_rooms(&self) -> BoxFuture<'static, StoreResult<Vec<RoomEntity>>>;
    /// Rooms with `status = playing`; the startup rebuild sweep input.
    fn list_playing_rooms(&self) -> BoxFuture<'static, StoreResult<Vec<RoomEntity>>>;
    fn update_settings(
        &self,
        room_id: i64,
        settings: RoomSettings,
    ) -> BoxFuture<'static, StoreResult<Option<RoomEntity>>>;
    fn set_status(&self, room_id: i64, status: RoomStatus)
        -> BoxFuture<'static, StoreResult<()>>;
    fn transition_phase(
        &self,
        room_id: i64,
        from: Option<RoundPhase>,
        update: PhaseUpdate,
    ) -> BoxFuture<'static, StoreResult<Option<RoomEntity>>>;
    /// Delete the room and all of its participants.
    fn delete_room(&self, room_id: i64) -> BoxFuture<'static, StoreResult<bool>>;

    /// Atomic join: enforces `max_players` against the active-seat count and
    /// refuses banned users, all in one storage round-trip.
    fn join_room(
        &self,
        room_id: i64,
        user_id: i64,
        team: Option<Team>,
    ) -> BoxFuture<'static, StoreResult<JoinOutcome>>;
    fn find_participant(
        &self,
        room_id: i64,
        user_id: i64,
    ) -> BoxFuture<'static, StoreResult<Option<ParticipantEntity>>>;
    /// All participants of a room ordered by ascending user id.
    fn list_participants(
        &self,
        room_id: i64,
    ) -> BoxFuture<'static, StoreResult<Vec<ParticipantEntity>>>;
    fn update_participant(
        &self,
        room_id: i64,
        user_id: i64,
        patch: ParticipantPatch,
    ) -> BoxFuture<'static, StoreResult<Option<ParticipantEntity>>>;
    /// Mark `drawer_id` as the drawer and clear the flag on everyone else.
    fn set_drawer(&self, room_id: i64, drawer_id: i64) -> BoxFuture<'static, StoreResult<()>>;
    /// Award a solo guess exactly once: succeeds only while
    /// `has_guessed_this_round` is still false, marking it in the same write.
    fn award_guess(
        &self,
        room_id: i64,
        user_id: i64,
        points: i32,
        at: SystemTime,
    ) -> BoxFuture<'static, StoreResult<Option<ParticipantEntity>>>;
    /// Award every active member of `team`, marking them all as having
    /// guessed. Caller must hold the `_internal_processing` sentinel.
    fn award_team(
        &self,
        room_id: i64,
        team: Team,
        points: i32,
        at: SystemTime,
    ) -> BoxFuture<'static, StoreResult<Vec<ParticipantEntity>>>;
    /// New round: clear `has_guessed_this_round` and drawer flags.
    fn reset_round_flags(&self, room_id: i64) -> BoxFuture<'static, StoreResult<()>>;
    /// Return-to-lobby: zero scores and per-game flags.
    fn reset_scores(&self, room_id: i64) -> BoxFuture<'static, StoreResult<()>>;
    fn remove_participant(
        &self,
        room_id: i64,
        user_id: i64,
    ) -> BoxFuture<'static, StoreResult<bool>>;
    fn ban_participant(
        &self,
        room_id: i64,
        user_id: i64,
        at: SystemTime,
    ) -> BoxFuture<'static, StoreResult<()>>;
    /// Crash-recovery: mark every `socket_id = null ∧ is_active` participant
    /// inactive; returns the affected room ids for empty-room checks.
    fn sweep_orphans(&self) -> BoxFuture<'static, StoreResult<Vec<i64>>>;

    fn save_message(&self, message: NewMessage)
        -> BoxFuture<'static, StoreResult<MessageEntity>>;
    /// Record a report, deduplicating reporters; drawing reports bump the
    /// strike counter once per distinct reporter.
    fn record_report(&self, report: NewReport) -> BoxFuture<'static, StoreResult<ReportEntity>>;

    fn health_check(&self) -> BoxFuture<'static, StoreResult<()>>;
    fn try_reconnect(&self) -> BoxFuture<'static, StoreResult<()>>;
}
