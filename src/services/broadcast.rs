//! Typed emit helpers over the socket registry.
//!
//! Recipients are always resolved through the registry at the moment of
//! sending, never cached inside game logic, so a reconnect that lands while
//! an emit is in flight cannot deliver to a stale socket.

use axum::extract::ws::Message;
use tokio::sync::mpsc;
use tracing::warn;

use crate::dao::models::RoomEntity;
use crate::dto::ws::{ParticipantSummary, ServerEvent};
use crate::error::ServiceError;
use crate::state::{SharedState, SocketHandle};

/// Serialize a payload and push it onto one socket's writer channel.
pub fn send_to_socket(tx: &mpsc::UnboundedSender<Message>, event: &ServerEvent) {
    let payload = match serde_json::to_string(event) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(error = %err, "failed to serialize server event");
            return;
        }
    };
    let _ = tx.send(Message::Text(payload.into()));
}

/// Emit to the user's current socket, if they have one right now.
pub fn send_to_user(state: &SharedState, user_id: i64, event: &ServerEvent) {
    if let Some(handle) = state.sessions().socket_for_user(user_id) {
        send_to_socket(&handle.tx, event);
    }
}

/// Emit to every socket joined to the room.
pub fn broadcast_room(state: &SharedState, room_id: i64, event: &ServerEvent) {
    for handle in state.sessions().sockets_in_room(room_id) {
        send_to_socket(&handle.tx, event);
    }
}

/// Emit a live drawing delta, skipping the sender and any socket that is
/// still replaying a canvas snapshot.
pub fn broadcast_drawing(
    state: &SharedState,
    room_id: i64,
    sender: &SocketHandle,
    event: &ServerEvent,
) {
    for handle in state.sessions().sockets_in_room(room_id) {
        if handle.socket_id == sender.socket_id {
            continue;
        }
        if state.sessions().is_resyncing(handle.socket_id, room_id) {
            continue;
        }
        send_to_socket(&handle.tx, event);
    }
}

/// Current participant roster as wire summaries, Ready flags included.
pub async fn participant_summaries(
    state: &SharedState,
    room: &RoomEntity,
) -> Result<Vec<ParticipantSummary>, ServiceError> {
    let store = state.room_store().await?;
    let participants = store.list_participants(room.id).await?;
    let ready = state.ready().ready_users(room.id);
    Ok(participants
        .iter()
        .map(|p| ParticipantSummary::from_entity(p, room.owner_id, ready.contains(&p.user_id)))
        .collect())
}

/// Rebroadcast the roster to the whole room.
pub async fn broadcast_participants(
    state: &SharedState,
    room: &RoomEntity,
) -> Result<(), ServiceError> {
    let participants = participant_summaries(state, room).await?;
    broadcast_room(
        state,
        room.id,
        &ServerEvent::RoomParticipants { participants },
    );
    Ok(())
}
