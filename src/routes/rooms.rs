use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};

use crate::{
    dto::rooms::{CreateRoomRequest, RoomSummary},
    dto::ws::RoomRef,
    error::AppError,
    services::room_service,
    state::SharedState,
};

/// Routes bootstrapping rooms for the lobby UI.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/rooms", post(create_room).get(list_rooms))
        .route("/rooms/{code}", get(get_room))
}

/// Create a fresh room and return its join code.
#[utoipa::path(
    post,
    path = "/rooms",
    tag = "rooms",
    request_body = CreateRoomRequest,
    responses(
        (status = 200, description = "Room created", body = RoomSummary)
    )
)]
pub async fn create_room(
    State(state): State<SharedState>,
    Json(payload): Json<CreateRoomRequest>,
) -> Result<Json<RoomSummary>, AppError> {
    let room = room_service::create_room(
        &state,
        payload.owner_id,
        payload.max_players,
        payload.is_public,
        payload.game_mode,
        payload.settings,
    )
    .await?;
    Ok(Json(room.into()))
}

/// List public rooms open for joining.
#[utoipa::path(
    get,
    path = "/rooms",
    tag = "rooms",
    responses(
        (status = 200, description = "Open public rooms", body = [RoomSummary])
    )
)]
pub async fn list_rooms(
    State(state): State<SharedState>,
) -> Result<Json<Vec<RoomSummary>>, AppError> {
    let rooms = room_service::list_public_rooms(&state).await?;
    Ok(Json(rooms.into_iter().map(Into::into).collect()))
}

/// Look a room up by its join code.
#[utoipa::path(
    get,
    path = "/rooms/{code}",
    tag = "rooms",
    params(("code" = String, Path, description = "5-character room code")),
    responses(
        (status = 200, description = "Room found", body = RoomSummary),
        (status = 404, description = "No such room")
    )
)]
pub async fn get_room(
    State(state): State<SharedState>,
    Path(code): Path<String>,
) -> Result<Json<RoomSummary>, AppError> {
    let room = room_service::resolve_room(
        &state,
        &RoomRef {
            room_code: Some(code),
            room_id: None,
        },
    )
    .await?;
    Ok(Json(room.into()))
}
