//! Canvas resync protocol for joiners and reconnectors.
//!
//! The server never stores stroke history; it brokers a snapshot from the
//! current drawer's live socket to the resyncing socket, holding back live
//! `drawing_data` for that socket until it reports `resync_done`.

use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::dao::models::RoomEntity;
use crate::dto::ws::{RoomRef, RoomSnapshotPayload, ServerEvent};
use crate::error::ServiceError;
use crate::game::phases::RoundPhase;
use crate::services::{broadcast, room_service};
use crate::state::{SharedState, SocketHandle};

/// Start a resync for a socket that entered an in-flight drawing phase.
///
/// At most one canvas request per resume: repeated triggers (join event plus
/// phase broadcast races) collapse onto the per-socket flag.
pub async fn begin_resync(
    state: &SharedState,
    socket_id: Uuid,
    user_id: i64,
    room: &RoomEntity,
) -> Result<(), ServiceError> {
    let Some(drawer_id) = room.current_drawer_id else {
        return Ok(());
    };

    if !state.sessions().request_canvas_once(socket_id, room.id) {
        debug!(room = %room.code, %socket_id, "canvas request already in flight");
        return Ok(());
    }

    if drawer_id == user_id {
        // The drawer rejoined: they own the only full history, so they serve
        // everyone else instead of being served.
        broadcast::send_to_user(
            state,
            drawer_id,
            &ServerEvent::RequestCanvasData {
                target_user_id: None,
                target_socket_id: None,
            },
        );
        return Ok(());
    }

    state.sessions().mark_resyncing(socket_id, room.id);
    // Resolve the drawer's socket now, at send time.
    broadcast::send_to_user(
        state,
        drawer_id,
        &ServerEvent::RequestCanvasData {
            target_user_id: Some(user_id),
            target_socket_id: Some(socket_id),
        },
    );
    Ok(())
}

/// Drawer answers a snapshot request; forward it to the target's current
/// socket together with a full room payload.
pub async fn send_canvas_data(
    state: &SharedState,
    sender_id: i64,
    room_code: String,
    target_user_id: Option<i64>,
    target_socket_id: Option<Uuid>,
    history: Value,
    last_sequence: u64,
    remaining_time: u64,
) -> Result<(), ServiceError> {
    let room = room_service::resolve_room(
        state,
        &RoomRef {
            room_code: Some(room_code),
            room_id: None,
        },
    )
    .await?;
    if room.current_drawer_id != Some(sender_id) {
        return Err(ServiceError::NotYourTurn);
    }

    let event = ServerEvent::CanvasResume {
        history,
        last_sequence,
        remaining_time,
        room: RoomSnapshotPayload::from_entity(&room),
    };

    let target = match (target_socket_id, target_user_id) {
        (Some(socket_id), _) => state.sessions().socket(socket_id),
        (None, Some(user_id)) => state.sessions().socket_for_user(user_id),
        (None, None) => None,
    };
    if let Some(handle) = target {
        broadcast::send_to_socket(&handle.tx, &event);
    }
    Ok(())
}

/// The resyncing socket caught up; live deltas resume.
pub fn resync_done(state: &SharedState, socket_id: Uuid) {
    state.sessions().finish_resync(socket_id);
}

/// Relay a live drawing delta from the drawer to the room.
pub async fn drawing_data(
    state: &SharedState,
    sender: &SocketHandle,
    room_ref: &RoomRef,
    strokes: Value,
    is_finished: Option<bool>,
    canvas_version: Option<u64>,
    sequence: u64,
) -> Result<(), ServiceError> {
    let room = room_service::resolve_room(state, room_ref).await?;
    if room.round_phase != Some(RoundPhase::Drawing) {
        return Err(ServiceError::WrongPhase);
    }
    if room.current_drawer_id != Some(sender.user_id) {
        return Err(ServiceError::NotYourTurn);
    }

    broadcast::broadcast_drawing(
        state,
        room.id,
        sender,
        &ServerEvent::DrawingData {
            user_id: sender.user_id,
            strokes,
            is_finished,
            canvas_version,
            sequence,
        },
    );
    broadcast::send_to_socket(&sender.tx, &ServerEvent::DrawingAck { sequence });
    Ok(())
}

/// Wipe the canvas; the bumped version lets clients discard stale strokes.
pub async fn clear_canvas(
    state: &SharedState,
    sender_id: i64,
    room_ref: &RoomRef,
    canvas_version: u64,
) -> Result<(), ServiceError> {
    let room = room_service::resolve_room(state, room_ref).await?;
    if room.round_phase != Some(RoundPhase::Drawing) {
        return Err(ServiceError::WrongPhase);
    }
    if room.current_drawer_id != Some(sender_id) {
        return Err(ServiceError::NotYourTurn);
    }
    broadcast::broadcast_room(
        state,
        room.id,
        &ServerEvent::CanvasCleared {
            canvas_version: canvas_version + 1,
        },
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::models::{NewRoom, RoomSettings};
    use crate::dao::room_store::{PhaseUpdate, RoomStore};
    use crate::game::phases::GameMode;
    use crate::state::test_support::state_with_memory_store;
    use std::time::{Duration, SystemTime};

    async fn drawing_room(
        store: &std::sync::Arc<crate::dao::room_store::memory::MemoryRoomStore>,
        drawer: i64,
    ) -> RoomEntity {
        let room = store
            .create_room(NewRoom {
                owner_id: drawer,
                max_players: 8,
                is_public: false,
                game_mode: GameMode::Solo,
                settings: RoomSettings::default(),
            })
            .await
            .unwrap();
        store.join_room(room.id, drawer, None).await.unwrap();
        store
            .transition_phase(
                room.id,
                None,
                PhaseUpdate {
                    current_drawer_id: Some(Some(drawer)),
                    current_word: Some(Some("tree".into())),
                    ..PhaseUpdate::enter(
                        RoundPhase::Drawing,
                        SystemTime::now() + Duration::from_secs(80),
                    )
                },
            )
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn joiner_resync_flags_socket_until_done() {
        let (state, store) = state_with_memory_store().await;
        let room = drawing_room(&store, 1).await;

        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let (joiner_socket, _) = state.sessions().register(2, tx);
        begin_resync(&state, joiner_socket, 2, &room).await.unwrap();

        assert!(state.sessions().is_resyncing(joiner_socket, room.id));
        // Re-triggering the same resume is a no-op.
        begin_resync(&state, joiner_socket, 2, &room).await.unwrap();

        resync_done(&state, joiner_socket);
        assert!(!state.sessions().is_resyncing(joiner_socket, room.id));
    }

    #[tokio::test]
    async fn drawer_rejoin_is_not_flagged_as_resyncing() {
        let (state, store) = state_with_memory_store().await;
        let room = drawing_room(&store, 1).await;

        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let (drawer_socket, _) = state.sessions().register(1, tx);
        begin_resync(&state, drawer_socket, 1, &room).await.unwrap();
        assert!(!state.sessions().is_resyncing(drawer_socket, room.id));
    }

    #[tokio::test]
    async fn only_the_drawer_may_stream_strokes() {
        let (state, store) = state_with_memory_store().await;
        let room = drawing_room(&store, 1).await;

        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let (socket, _) = state.sessions().register(2, tx);
        let handle = state.sessions().socket(socket).unwrap();

        let result = drawing_data(
            &state,
            &handle,
            &RoomRef::by_id(room.id),
            serde_json::json!([]),
            None,
            None,
            1,
        )
        .await;
        assert!(matches!(result, Err(ServiceError::NotYourTurn)));
    }

    #[tokio::test]
    async fn clear_canvas_bumps_version() {
        let (state, store) = state_with_memory_store().await;
        let room = drawing_room(&store, 1).await;

        // Listener in the room observes the bumped version.
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let (listener, _) = state.sessions().register(2, tx);
        state.sessions().set_room(listener, Some(room.id));

        clear_canvas(&state, 1, &RoomRef::by_id(room.id), 4)
            .await
            .unwrap();
        let raw = rx.recv().await.unwrap();
        let axum::extract::ws::Message::Text(text) = raw else {
            panic!("expected text frame");
        };
        let value: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(value["type"], "canvas_cleared");
        assert_eq!(value["data"]["canvas_version"], 5);
    }
}
