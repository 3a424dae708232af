use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::dao::models::{RoomEntity, RoomSettings};
use crate::game::phases::{GameMode, RoomStatus};

/// Payload used to create a room from the lobby REST surface.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateRoomRequest {
    pub owner_id: i64,
    /// Seats in the room; must be between 2 and 15.
    pub max_players: u32,
    #[serde(default)]
    pub is_public: bool,
    pub game_mode: GameMode,
    #[serde(default)]
    pub settings: Option<RoomSettings>,
}

/// Room view returned by the REST surface.
#[derive(Debug, Serialize, ToSchema)]
pub struct RoomSummary {
    pub id: i64,
    pub code: String,
    pub owner_id: i64,
    pub max_players: u32,
    pub is_public: bool,
    pub game_mode: GameMode,
    pub status: RoomStatus,
    pub player_count: u32,
    pub voice_enabled: bool,
}

impl From<RoomEntity> for RoomSummary {
    fn from(room: RoomEntity) -> Self {
        Self {
            id: room.id,
            code: room.code,
            owner_id: room.owner_id,
            max_players: room.max_players,
            is_public: room.is_public,
            game_mode: room.game_mode,
            status: room.status,
            player_count: room.seat_count,
            voice_enabled: room.settings.voice_enabled,
        }
    }
}
