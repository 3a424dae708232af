use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::game::phases::{GameMode, RoomStatus, RoundPhase, Team};

/// Mutable room settings, changeable only while the room is in lobby/waiting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RoomSettings {
    /// Word language, e.g. `"english"`, `"turkish"`.
    pub language: String,
    /// Requested script: `"default"`, `"native"`, `"english"` or `"roman"`.
    pub script: String,
    /// ISO-2 country code used by the word catalog.
    pub country: String,
    /// Category titles restricting the word pool; empty means every category.
    pub category: Vec<String>,
    /// Coins debited from each player when the game starts.
    pub entry_points: i64,
    /// First participant (or team) to reach this score wins.
    pub target_points: i32,
    pub voice_enabled: bool,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            language: "english".into(),
            script: "default".into(),
            country: "US".into(),
            category: Vec::new(),
            entry_points: 0,
            target_points: 60,
            voice_enabled: false,
        }
    }
}

/// The single source of truth for one game session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomEntity {
    pub id: i64,
    /// 5-char uppercase join code, unique across rooms.
    pub code: String,
    pub owner_id: i64,
    pub max_players: u32,
    pub is_public: bool,
    pub game_mode: GameMode,
    pub settings: RoomSettings,
    pub status: RoomStatus,
    pub current_round: u32,
    pub round_phase: Option<RoundPhase>,
    /// Absolute wall-clock instant the active phase expires.
    pub round_phase_end_time: Option<SystemTime>,
    pub current_drawer_id: Option<i64>,
    pub current_word: Option<String>,
    /// Only set while `round_phase == ChoosingWord`.
    pub current_word_options: Option<Vec<String>>,
    pub drawer_pointer_index: u32,
    pub last_drawer_id: Option<i64>,
    /// Who has drawn in the current cycle; reset when everyone has.
    pub drawn_user_ids: Vec<i64>,
    /// Words already played this game, never recycled except on exhaustion.
    pub used_words: Vec<String>,
    /// Active seats currently claimed; maintained by join/leave/grace updates.
    pub seat_count: u32,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
}

impl RoomEntity {
    /// The clock-driven phase currently pending expiry, if any.
    pub fn active_timed_phase(&self) -> Option<(RoundPhase, SystemTime)> {
        match (self.round_phase, self.round_phase_end_time) {
            (Some(phase), Some(end)) if phase.is_timed() => Some((phase, end)),
            _ => None,
        }
    }
}

/// One row per (room, user); kept across disconnects until grace expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantEntity {
    pub room_id: i64,
    pub user_id: i64,
    pub team: Option<Team>,
    pub is_drawer: bool,
    /// Cumulative score for the current game.
    pub score: i32,
    /// Wall clock of the last score increase; ASC tie-breaker behind DESC score.
    pub points_updated_at: SystemTime,
    pub has_guessed_this_round: bool,
    pub has_paid_entry: bool,
    pub has_drawn: bool,
    /// Word-choice timeouts left before removal.
    pub elimination_count: i32,
    pub skip_count: i32,
    pub is_active: bool,
    /// Live socket currently owning this seat, if any.
    pub socket_id: Option<Uuid>,
    /// Room-scoped ban timestamp.
    pub banned_at: Option<SystemTime>,
    pub joined_at: SystemTime,
}

impl ParticipantEntity {
    pub fn is_banned(&self) -> bool {
        self.banned_at.is_some()
    }
}

/// Persisted chat line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEntity {
    pub id: Uuid,
    pub room_id: i64,
    pub user_id: i64,
    pub content: String,
    pub sent_at: SystemTime,
}

/// What a report targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    User,
    Drawing,
}

/// Aggregated report row per (room, target, kind).
///
/// Drawing reports escalate: the first strike aborts the current drawer's
/// turn, the second bans the target from this room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportEntity {
    pub room_id: i64,
    pub target_user_id: i64,
    pub kind: ReportKind,
    pub reporter_ids: Vec<i64>,
    pub strike_count: u32,
}

/// Input for creating a room; the store allocates id and code.
#[derive(Debug, Clone)]
pub struct NewRoom {
    pub owner_id: i64,
    pub max_players: u32,
    pub is_public: bool,
    pub game_mode: GameMode,
    pub settings: RoomSettings,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub room_id: i64,
    pub user_id: i64,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct NewReport {
    pub room_id: i64,
    pub target_user_id: i64,
    pub kind: ReportKind,
    pub reporter_id: i64,
}
