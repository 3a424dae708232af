use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use thiserror::Error;

use crate::dao::room_store::StoreError;

/// Errors surfaced to socket clients as `error { message }` payloads and to
/// REST clients through [`AppError`].
///
/// Precondition failures indicate client bugs: they are returned to the
/// offending socket and never mutate state. Lost phase races are not errors
/// at all; the losing caller exits silently.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("storage unavailable")]
    Unavailable(#[source] StoreError),
    #[error("storage unavailable (degraded mode)")]
    Degraded,
    #[error("not authenticated")]
    NotAuthenticated,
    #[error("room not found")]
    RoomNotFound,
    #[error("room closed")]
    RoomClosed,
    #[error("room full")]
    RoomFull,
    #[error("max players must be between 2 and 15")]
    InvalidMaxPlayers,
    #[error("only the owner can {action}")]
    OnlyOwner { action: &'static str },
    #[error("settings cannot change after the game started")]
    CannotUpdateAfterGameStarted,
    #[error("invalid team")]
    InvalidTeam,
    #[error("room is not in team mode")]
    NotTeamMode,
    #[error("teams cannot change after the game started")]
    CannotChangeTeamAfterGameStarted,
    #[error("not enough players")]
    NotEnoughPlayers,
    #[error("both teams need players")]
    BothTeamsNeedPlayers,
    #[error("not all players are ready")]
    NotAllReady,
    #[error("insufficient coins")]
    InsufficientCoins,
    #[error("not your turn")]
    NotYourTurn,
    #[error("wrong phase for this action")]
    WrongPhase,
    #[error("word is not one of the offered options")]
    InvalidWordChoice,
    #[error("already guessed this round")]
    AlreadyGuessed,
    #[error("the drawer cannot guess")]
    DrawerCannotGuess,
    #[error("wrong team")]
    WrongTeam,
    #[error("round already ended")]
    RoundEnded,
    #[error("you are banned from this room")]
    Banned,
    #[error("server is restoring state, try again shortly")]
    ServerSyncing,
    #[error("cannot remove yourself")]
    CannotRemoveSelf,
    #[error("participants cannot be removed during a game")]
    CannotRemoveDuringGame,
    #[error("seat lost to inactivity")]
    ExitedDueToInactivity,
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl ServiceError {
    /// Stable machine-readable code carried in the `error` event.
    pub fn code(&self) -> String {
        match self {
            ServiceError::Unavailable(_) | ServiceError::Degraded => "server_unavailable".into(),
            ServiceError::NotAuthenticated => "not_authenticated".into(),
            ServiceError::RoomNotFound => "room_not_found".into(),
            ServiceError::RoomClosed => "room_closed".into(),
            ServiceError::RoomFull => "room_full".into(),
            ServiceError::InvalidMaxPlayers => "invalid_max_players".into(),
            ServiceError::OnlyOwner { action } => format!("only_owner_can_{action}"),
            ServiceError::CannotUpdateAfterGameStarted => {
                "cannot_update_after_game_started".into()
            }
            ServiceError::InvalidTeam => "invalid_team".into(),
            ServiceError::NotTeamMode => "not_team_mode".into(),
            ServiceError::CannotChangeTeamAfterGameStarted => {
                "cannot_change_team_after_game_started".into()
            }
            ServiceError::NotEnoughPlayers => "not_enough_players".into(),
            ServiceError::BothTeamsNeedPlayers => "both_teams_need_players".into(),
            ServiceError::NotAllReady => "not_all_ready".into(),
            ServiceError::InsufficientCoins => "insufficient_coins".into(),
            ServiceError::NotYourTurn => "not_your_turn".into(),
            ServiceError::WrongPhase => "wrong_phase".into(),
            ServiceError::InvalidWordChoice => "invalid_word_choice".into(),
            ServiceError::AlreadyGuessed => "already_guessed".into(),
            ServiceError::DrawerCannotGuess => "drawer_cannot_guess".into(),
            ServiceError::WrongTeam => "wrong_team".into(),
            ServiceError::RoundEnded => "round_ended".into(),
            ServiceError::Banned => "you_are_banned".into(),
            ServiceError::ServerSyncing => "server_syncing".into(),
            ServiceError::CannotRemoveSelf => "cannot_remove_self".into(),
            ServiceError::CannotRemoveDuringGame => "cannot_remove_during_game".into(),
            ServiceError::ExitedDueToInactivity => "exited_due_to_inactivity".into(),
            ServiceError::InvalidInput(_) => "invalid_input".into(),
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        ServiceError::Unavailable(err)
    }
}

/// HTTP-facing error wrapper for the REST surface.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Unavailable(source) => AppError::ServiceUnavailable(source.to_string()),
            ServiceError::Degraded | ServiceError::ServerSyncing => {
                AppError::ServiceUnavailable(err.to_string())
            }
            ServiceError::NotAuthenticated => AppError::Unauthorized(err.to_string()),
            ServiceError::RoomNotFound => AppError::NotFound(err.to_string()),
            ServiceError::RoomClosed
            | ServiceError::RoomFull
            | ServiceError::CannotUpdateAfterGameStarted => AppError::Conflict(err.to_string()),
            other => AppError::BadRequest(other.to_string()),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}
