//! WebSocket event envelopes.
//!
//! Both directions use externally tagged JSON: `{ "type": ..., "data": ... }`.
//! Unknown inbound events deserialize to [`ClientEvent::Unknown`] and are
//! dropped with a warning instead of tearing the connection down.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::dao::models::{MessageEntity, ParticipantEntity, RoomEntity, RoomSettings};
use crate::error::ServiceError;
use crate::game::guess::RankingEntry;
use crate::game::phases::{epoch_millis, GameMode, RoomStatus, RoundPhase, Team};

/// Reference to a room by either its join code or its numeric id.
#[derive(Debug, Clone, Default, Deserialize, Serialize, ToSchema)]
pub struct RoomRef {
    #[serde(default)]
    pub room_code: Option<String>,
    #[serde(default)]
    pub room_id: Option<i64>,
}

impl RoomRef {
    pub fn by_id(room_id: i64) -> Self {
        Self {
            room_code: None,
            room_id: Some(room_id),
        }
    }
}

/// Messages accepted from socket clients.
#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Handshake: must be the first event on every connection.
    Authenticate { token: String },
    JoinRoom {
        #[serde(flatten)]
        room: RoomRef,
        #[serde(default)]
        team: Option<Team>,
    },
    LeaveRoom {
        #[serde(flatten)]
        room: RoomRef,
    },
    UpdateSettings {
        room_id: i64,
        settings: RoomSettings,
    },
    SelectTeam {
        room_id: i64,
        team: Team,
    },
    SetReady {
        #[serde(flatten)]
        room: RoomRef,
    },
    SetNotReady {
        #[serde(flatten)]
        room: RoomRef,
    },
    RemoveParticipant {
        room_id: i64,
        user_id: i64,
    },
    ContinueWaiting {
        room_id: i64,
    },
    StartGame {
        #[serde(flatten)]
        room: RoomRef,
    },
    ChooseWord {
        room_id: i64,
        word: String,
    },
    DrawingData {
        #[serde(flatten)]
        room: RoomRef,
        strokes: Value,
        #[serde(default)]
        is_finished: Option<bool>,
        #[serde(default)]
        canvas_version: Option<u64>,
        sequence: u64,
    },
    ClearCanvas {
        #[serde(flatten)]
        room: RoomRef,
        canvas_version: u64,
    },
    SendCanvasData {
        room_code: String,
        #[serde(default)]
        target_user_id: Option<i64>,
        #[serde(default)]
        target_socket_id: Option<Uuid>,
        history: Value,
        last_sequence: u64,
        remaining_time: u64,
    },
    ResyncDone {},
    ChatMessage {
        #[serde(flatten)]
        room: RoomRef,
        content: String,
    },
    SubmitGuess {
        #[serde(flatten)]
        room: RoomRef,
        guess: String,
    },
    SkipTurn {
        room_id: i64,
    },
    WordHint {
        #[serde(flatten)]
        room: RoomRef,
        revealed_word: String,
        hints_remaining: u32,
    },
    PrepareToLeavePermanently {},
    ReportUser {
        room_id: i64,
        user_id: i64,
    },
    ReportDrawing {
        room_id: i64,
    },
    JoinVoice {
        room_id: i64,
    },
    VoiceTransport {
        room_id: i64,
        payload: Value,
    },
    #[serde(other)]
    Unknown,
}

impl ClientEvent {
    pub fn from_json_str(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// Wire view of one participant, broadcast with `room_participants`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ParticipantSummary {
    pub user_id: i64,
    pub team: Option<Team>,
    pub is_drawer: bool,
    pub score: i32,
    pub is_active: bool,
    pub is_owner: bool,
    pub ready: bool,
    pub connected: bool,
}

impl ParticipantSummary {
    pub fn from_entity(entity: &ParticipantEntity, owner_id: i64, ready: bool) -> Self {
        Self {
            user_id: entity.user_id,
            team: entity.team,
            is_drawer: entity.is_drawer,
            score: entity.score,
            is_active: entity.is_active,
            is_owner: entity.user_id == owner_id,
            ready,
            connected: entity.socket_id.is_some(),
        }
    }
}

/// Wire view of a room, sent with `room_joined`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RoomSnapshotPayload {
    pub room_id: i64,
    pub code: String,
    pub owner_id: i64,
    pub max_players: u32,
    pub game_mode: GameMode,
    pub status: RoomStatus,
    pub settings: RoomSettings,
    pub current_round: u32,
    pub round_phase: Option<RoundPhase>,
    /// Epoch milliseconds of the phase deadline.
    pub round_phase_end_time: Option<i64>,
    pub round_remaining_time: u64,
    pub current_drawer_id: Option<i64>,
}

impl RoomSnapshotPayload {
    pub fn from_entity(room: &RoomEntity) -> Self {
        let remaining = room
            .round_phase_end_time
            .map(|end| crate::game::phases::remaining_secs(end, std::time::SystemTime::now()))
            .unwrap_or(0);
        Self {
            room_id: room.id,
            code: room.code.clone(),
            owner_id: room.owner_id,
            max_players: room.max_players,
            game_mode: room.game_mode,
            status: room.status,
            settings: room.settings.clone(),
            current_round: room.current_round,
            round_phase: room.round_phase,
            round_phase_end_time: room.round_phase_end_time.map(epoch_millis),
            round_remaining_time: remaining,
            current_drawer_id: room.current_drawer_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RankingPayload {
    pub rank: u32,
    pub user_id: i64,
    pub team: Option<Team>,
    pub score: i32,
    pub reward: i64,
}

impl From<&RankingEntry> for RankingPayload {
    fn from(entry: &RankingEntry) -> Self {
        Self {
            rank: entry.rank,
            user_id: entry.user_id,
            team: entry.team,
            score: entry.score,
            reward: entry.reward,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChatPayload {
    pub user_id: i64,
    pub content: String,
    pub sent_at: i64,
}

impl From<&MessageEntity> for ChatPayload {
    fn from(message: &MessageEntity) -> Self {
        Self {
            user_id: message.user_id,
            content: message.content.clone(),
            sent_at: epoch_millis(message.sent_at),
        }
    }
}

/// Messages pushed to socket clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    RoomJoined {
        room: RoomSnapshotPayload,
        participants: Vec<ParticipantSummary>,
    },
    RoomParticipants {
        participants: Vec<ParticipantSummary>,
    },
    PlayerJoined {
        user_id: i64,
        team: Option<Team>,
    },
    PlayerLeft {
        user_id: i64,
    },
    PlayerRemoved {
        user_id: i64,
        reason: String,
    },
    SettingsUpdated {
        settings: RoomSettings,
    },
    PhaseChange {
        phase: RoundPhase,
        duration: u64,
        /// Epoch milliseconds of the deadline; clients derive countdowns
        /// from this, never from their own clocks alone.
        phase_end_time: i64,
        round: u32,
    },
    DrawerSelected {
        drawer: i64,
        preview_duration: u64,
    },
    DrawerSkipped {
        drawer: i64,
    },
    WordOptions {
        words: Vec<String>,
        duration: u64,
    },
    ClearChat,
    DrawingData {
        user_id: i64,
        strokes: Value,
        is_finished: Option<bool>,
        canvas_version: Option<u64>,
        sequence: u64,
    },
    DrawingAck {
        sequence: u64,
    },
    CanvasCleared {
        canvas_version: u64,
    },
    CanvasResume {
        history: Value,
        last_sequence: u64,
        remaining_time: u64,
        room: RoomSnapshotPayload,
    },
    RequestCanvasData {
        target_user_id: Option<i64>,
        target_socket_id: Option<Uuid>,
    },
    ChatMessage(ChatPayload),
    CorrectGuess {
        user_id: i64,
        reward: i32,
    },
    IncorrectGuess {
        guess: String,
    },
    GuessResult {
        user_id: i64,
        correct: bool,
    },
    ScoreUpdate {
        user_id: i64,
        score: i32,
    },
    WordHint {
        revealed_word: String,
        hints_remaining: u32,
    },
    GameEnded {
        rankings: Vec<RankingPayload>,
        entry_cost: i64,
        game_mode: GameMode,
    },
    GameEndedInsufficientPlayers,
    RoomBackToLobby,
    RoomClosed,
    UserBanned {
        user_id: i64,
    },
    UserBannedFromRoom {
        user_id: i64,
    },
    LobbyTimeExceeded {
        /// Seconds the owner has to respond before deletion.
        respond_within: u64,
    },
    ExitedDueToInactivity,
    ServerSyncing,
    VoiceEvent {
        payload: Value,
    },
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },
}

impl ServerEvent {
    pub fn error(err: &ServiceError) -> Self {
        ServerEvent::Error {
            message: err.code(),
            details: Some(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_room_accepts_code_or_id() {
        let by_code: ClientEvent =
            serde_json::from_str(r#"{"type":"join_room","data":{"room_code":"ABCDE"}}"#).unwrap();
        match by_code {
            ClientEvent::JoinRoom { room, team } => {
                assert_eq!(room.room_code.as_deref(), Some("ABCDE"));
                assert!(room.room_id.is_none());
                assert!(team.is_none());
            }
            other => panic!("unexpected event: {other:?}"),
        }

        let by_id: ClientEvent = serde_json::from_str(
            r#"{"type":"join_room","data":{"room_id":12,"team":"blue"}}"#,
        )
        .unwrap();
        match by_id {
            ClientEvent::JoinRoom { room, team } => {
                assert_eq!(room.room_id, Some(12));
                assert_eq!(team, Some(Team::Blue));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn unknown_event_types_do_not_fail_parsing() {
        let event: ClientEvent =
            serde_json::from_str(r#"{"type":"dance","data":{}}"#).unwrap();
        assert!(matches!(event, ClientEvent::Unknown));
    }

    #[test]
    fn server_events_serialize_with_type_tag() {
        let event = ServerEvent::ScoreUpdate {
            user_id: 3,
            score: 14,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "score_update");
        assert_eq!(json["data"]["score"], 14);
    }

    #[test]
    fn error_event_carries_stable_code() {
        let event = ServerEvent::error(&ServiceError::RoomNotFound);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["data"]["message"], "room_not_found");
    }

    #[test]
    fn phase_serializes_snake_case() {
        let event = ServerEvent::PhaseChange {
            phase: RoundPhase::SelectingDrawer,
            duration: 5,
            phase_end_time: 0,
            round: 1,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["data"]["phase"], "selecting_drawer");
    }
}
