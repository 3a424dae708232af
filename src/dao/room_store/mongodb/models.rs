use mongodb::bson::{doc, Bson, DateTime, Document};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dao::models::{
    MessageEntity, ParticipantEntity, ReportEntity, ReportKind, RoomEntity, RoomSettings,
};
use crate::game::phases::{GameMode, RoomStatus, RoundPhase, Team};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoRoomDocument {
    #[serde(rename = "_id")]
    pub id: i64,
    pub code: String,
    pub owner_id: i64,
    pub max_players: u32,
    pub is_public: bool,
    pub game_mode: GameMode,
    pub settings: RoomSettings,
    pub status: RoomStatus,
    pub current_round: u32,
    pub round_phase: Option<RoundPhase>,
    pub round_phase_end_time: Option<DateTime>,
    pub current_drawer_id: Option<i64>,
    pub current_word: Option<String>,
    pub current_word_options: Option<Vec<String>>,
    pub drawer_pointer_index: u32,
    pub last_drawer_id: Option<i64>,
    pub drawn_user_ids: Vec<i64>,
    pub used_words: Vec<String>,
    #[serde(default)]
    pub seat_count: u32,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

impl From<RoomEntity> for MongoRoomDocument {
    fn from(value: RoomEntity) -> Self {
        Self {
            id: value.id,
            code: value.code,
            owner_id: value.owner_id,
            max_players: value.max_players,
            is_public: value.is_public,
            game_mode: value.game_mode,
            settings: value.settings,
            status: value.status,
            current_round: value.current_round,
            round_phase: value.round_phase,
            round_phase_end_time: value.round_phase_end_time.map(DateTime::from_system_time),
            current_drawer_id: value.current_drawer_id,
            current_word: value.current_word,
            current_word_options: value.current_word_options,
            drawer_pointer_index: value.drawer_pointer_index,
            last_drawer_id: value.last_drawer_id,
            drawn_user_ids: value.drawn_user_ids,
            used_words: value.used_words,
            seat_count: value.seat_count,
            created_at: DateTime::from_system_time(value.created_at),
            updated_at: DateTime::from_system_time(value.updated_at),
        }
    }
}

impl From<MongoRoomDocument> for RoomEntity {
    fn from(value: MongoRoomDocument) -> Self {
        Self {
            id: value.id,
            code: value.code,
            owner_id: value.owner_id,
            max_players: value.max_players,
            is_public: value.is_public,
            game_mode: value.game_mode,
            settings: value.settings,
            status: value.status,
            current_round: value.current_round,
            round_phase: value.round_phase,
            round_phase_end_time: value.round_phase_end_time.map(|at| at.to_system_time()),
            current_drawer_id: value.current_drawer_id,
            current_word: value.current_word,
            current_word_options: value.current_word_options,
            drawer_pointer_index: value.drawer_pointer_index,
            last_drawer_id: value.last_drawer_id,
            drawn_user_ids: value.drawn_user_ids,
            used_words: value.used_words,
            seat_count: value.seat_count,
            created_at: value.created_at.to_system_time(),
            updated_at: value.updated_at.to_system_time(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoParticipantDocument {
    pub room_id: i64,
    pub user_id: i64,
    pub team: Option<Team>,
    pub is_drawer: bool,
    pub score: i32,
    /// Millisecond precision; the ranking tie-breaker.
    pub points_updated_at: DateTime,
    pub has_guessed_this_round: bool,
    pub has_paid_entry: bool,
    pub has_drawn: bool,
    pub elimination_count: i32,
    pub skip_count: i32,
    pub is_active: bool,
    pub socket_id: Option<String>,
    pub banned_at: Option<DateTime>,
    pub joined_at: DateTime,
}

impl From<ParticipantEntity> for MongoParticipantDocument {
    fn from(value: ParticipantEntity) -> Self {
        Self {
            room_id: value.room_id,
            user_id: value.user_id,
            team: value.team,
            is_drawer: value.is_drawer,
            score: value.score,
            points_updated_at: DateTime::from_system_time(value.points_updated_at),
            has_guessed_this_round: value.has_guessed_this_round,
            has_paid_entry: value.has_paid_entry,
            has_drawn: value.has_drawn,
            elimination_count: value.elimination_count,
            skip_count: value.skip_count,
            is_active: value.is_active,
            socket_id: value.socket_id.map(|id| id.to_string()),
            banned_at: value.banned_at.map(DateTime::from_system_time),
            joined_at: DateTime::from_system_time(value.joined_at),
        }
    }
}

impl From<MongoParticipantDocument> for ParticipantEntity {
    fn from(value: MongoParticipantDocument) -> Self {
        Self {
            room_id: value.room_id,
            user_id: value.user_id,
            team: value.team,
            is_drawer: value.is_drawer,
            score: value.score,
            points_updated_at: value.points_updated_at.to_system_time(),
            has_guessed_this_round: value.has_guessed_this_round,
            has_paid_entry: value.has_paid_entry,
            has_drawn: value.has_drawn,
            elimination_count: value.elimination_count,
            skip_count: value.skip_count,
            is_active: value.is_active,
            socket_id: value
                .socket_id
                .as_deref()
                .and_then(|id| Uuid::parse_str(id).ok()),
            banned_at: value.banned_at.map(|at| at.to_system_time()),
            joined_at: value.joined_at.to_system_time(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoMessageDocument {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub room_id: i64,
    pub user_id: i64,
    pub content: String,
    pub sent_at: DateTime,
}

impl From<MongoMessageDocument> for MessageEntity {
    fn from(value: MongoMessageDocument) -> Self {
        Self {
            id: value.id,
            room_id: value.room_id,
            user_id: value.user_id,
            content: value.content,
            sent_at: value.sent_at.to_system_time(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoReportDocument {
    pub room_id: i64,
    pub target_user_id: i64,
    pub kind: ReportKind,
    pub reporter_ids: Vec<i64>,
    pub strike_count: u32,
}

impl From<MongoReportDocument> for ReportEntity {
    fn from(value: MongoReportDocument) -> Self {
        Self {
            room_id: value.room_id,
            target_user_id: value.target_user_id,
            kind: value.kind,
            reporter_ids: value.reporter_ids,
            strike_count: value.strike_count,
        }
    }
}

pub fn doc_id(id: i64) -> Document {
    doc! { "_id": id }
}

pub fn participant_key(room_id: i64, user_id: i64) -> Document {
    doc! { "room_id": room_id, "user_id": user_id }
}

/// BSON value matching the serialized form of an optional phase.
pub fn phase_bson(phase: Option<RoundPhase>) -> Bson {
    match phase {
        Some(phase) => Bson::String(phase.as_str().to_owned()),
        None => Bson::Null,
    }
}

pub fn report_kind_str(kind: ReportKind) -> &'static str {
    match kind {
        ReportKind::User => "user",
        ReportKind::Drawing => "drawing",
    }
}
