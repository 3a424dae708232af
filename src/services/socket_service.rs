//! Socket lifecycle: handshake authentication, single-session enforcement,
//! the event dispatch loop, and the disconnect grace path.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth;
use crate::dao::room_store::ParticipantPatch;
use crate::dto::ws::{ClientEvent, ServerEvent};
use crate::error::ServiceError;
use crate::services::{
    broadcast, chat_service, guess_service, report_service, resync_service, room_service,
};
use crate::state::SharedState;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle the full lifecycle of one client connection.
pub async fn handle_socket(state: SharedState, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Dedicated writer task keeps outbound messages flowing even while we
    // await inbound frames.
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    // Anonymous connections only exist during the handshake: the first
    // event must authenticate, or the connection is closed.
    let user_id = match await_handshake(&state, &mut receiver).await {
        Some(user_id) => user_id,
        None => {
            let _ = outbound_tx.send(Message::Close(None));
            finalize(writer_task, outbound_tx).await;
            return;
        }
    };

    let (socket_id, evicted) = state.sessions().register(user_id, outbound_tx.clone());
    if let Some(previous) = evicted {
        // Single session per user: the older socket is closed first.
        info!(user_id, "evicting previous session");
        let _ = previous.tx.send(Message::Close(None));
    }
    info!(user_id, %socket_id, "socket authenticated");

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => match ClientEvent::from_json_str(&text) {
                Ok(ClientEvent::Unknown) => {
                    warn!(user_id, "ignoring unknown event");
                }
                Ok(event) => {
                    if let Err(err) = dispatch(&state, socket_id, user_id, event).await {
                        broadcast::send_to_socket(&outbound_tx, &ServerEvent::error(&err));
                    }
                }
                Err(err) => {
                    warn!(user_id, error = %err, "failed to parse client event");
                }
            },
            Ok(Message::Ping(payload)) => {
                let _ = outbound_tx.send(Message::Pong(payload));
            }
            Ok(Message::Close(frame)) => {
                let _ = outbound_tx.send(Message::Close(frame));
                break;
            }
            Ok(Message::Binary(_)) | Ok(Message::Pong(_)) => {}
            Err(err) => {
                warn!(user_id, error = %err, "websocket error");
                break;
            }
        }
    }

    handle_disconnect(&state, socket_id).await;
    finalize(writer_task, outbound_tx).await;
}

/// Wait for the authenticate event and verify its token.
async fn await_handshake(
    state: &SharedState,
    receiver: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
) -> Option<i64> {
    let first = match tokio::time::timeout(HANDSHAKE_TIMEOUT, receiver.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => text,
        Ok(Some(Ok(_))) | Ok(None) => return None,
        Ok(Some(Err(err))) => {
            warn!(error = %err, "websocket receive error during handshake");
            return None;
        }
        Err(_) => {
            warn!("websocket handshake timed out");
            return None;
        }
    };

    let event = match ClientEvent::from_json_str(&first) {
        Ok(event) => event,
        Err(err) => {
            warn!(error = %err, "failed to parse handshake event");
            return None;
        }
    };
    let ClientEvent::Authenticate { token } = event else {
        warn!("first event was not authenticate");
        return None;
    };

    match auth::verify_token(&token, &state.config().token_secret) {
        Ok(user_id) => Some(user_id),
        Err(err) => {
            warn!(error = %err, "handshake token rejected");
            None
        }
    }
}

/// Route one authenticated event to its service.
async fn dispatch(
    state: &SharedState,
    socket_id: Uuid,
    user_id: i64,
    event: ClientEvent,
) -> Result<(), ServiceError> {
    match event {
        ClientEvent::Authenticate { .. } => {
            // Already authenticated; duplicate handshakes are ignored.
            Ok(())
        }
        ClientEvent::JoinRoom { room, team } => {
            room_service::join_room(state, socket_id, user_id, &room, team).await
        }
        ClientEvent::LeaveRoom { room } => {
            room_service::leave_room(state, socket_id, user_id, &room).await
        }
        ClientEvent::UpdateSettings { room_id, settings } => {
            room_service::update_settings(state, user_id, room_id, settings).await
        }
        ClientEvent::SelectTeam { room_id, team } => {
            room_service::select_team(state, user_id, room_id, team).await
        }
        ClientEvent::SetReady { room } => {
            room_service::set_ready(state, user_id, &room, true).await
        }
        ClientEvent::SetNotReady { room } => {
            room_service::set_ready(state, user_id, &room, false).await
        }
        ClientEvent::RemoveParticipant { room_id, user_id: target } => {
            room_service::remove_participant(state, user_id, room_id, target).await
        }
        ClientEvent::ContinueWaiting { room_id } => {
            crate::game::lifecycle::continue_waiting(state, room_id, user_id).await
        }
        ClientEvent::StartGame { room } => {
            let room = room_service::resolve_room(state, &room).await?;
            crate::game::engine::start_game(state, room.id, user_id).await
        }
        ClientEvent::ChooseWord { room_id, word } => {
            crate::game::engine::choose_word(state, room_id, user_id, word).await
        }
        ClientEvent::DrawingData {
            room,
            strokes,
            is_finished,
            canvas_version,
            sequence,
        } => {
            let handle = state
                .sessions()
                .socket(socket_id)
                .ok_or(ServiceError::NotAuthenticated)?;
            resync_service::drawing_data(
                state,
                &handle,
                &room,
                strokes,
                is_finished,
                canvas_version,
                sequence,
            )
            .await
        }
        ClientEvent::ClearCanvas {
            room,
            canvas_version,
        } => resync_service::clear_canvas(state, user_id, &room, canvas_version).await,
        ClientEvent::SendCanvasData {
            room_code,
            target_user_id,
            target_socket_id,
            history,
            last_sequence,
            remaining_time,
        } => {
            resync_service::send_canvas_data(
                state,
                user_id,
                room_code,
                target_user_id,
                target_socket_id,
                history,
                last_sequence,
                remaining_time,
            )
            .await
        }
        ClientEvent::ResyncDone {} => {
            resync_service::resync_done(state, socket_id);
            Ok(())
        }
        ClientEvent::ChatMessage { room, content } => {
            chat_service::send_message(state, user_id, &room, content).await
        }
        ClientEvent::SubmitGuess { room, guess } => {
            guess_service::submit_guess(state, user_id, &room, guess).await
        }
        ClientEvent::SkipTurn { room_id } => {
            room_service::skip_turn(state, user_id, room_id).await
        }
        ClientEvent::WordHint {
            room,
            revealed_word,
            hints_remaining,
        } => room_service::word_hint(state, user_id, &room, revealed_word, hints_remaining).await,
        ClientEvent::PrepareToLeavePermanently {} => {
            state.sessions().mark_leaving(socket_id);
            Ok(())
        }
        ClientEvent::ReportUser { room_id, user_id: target } => {
            report_service::report_user(state, user_id, room_id, target).await
        }
        ClientEvent::ReportDrawing { room_id } => {
            report_service::report_drawing(state, user_id, room_id).await
        }
        ClientEvent::JoinVoice { room_id } => {
            let payload = state.voice().join(room_id, user_id).await?;
            broadcast::send_to_user(state, user_id, &ServerEvent::VoiceEvent { payload });
            Ok(())
        }
        ClientEvent::VoiceTransport { room_id, payload } => {
            let payload = state
                .voice()
                .create_transport(room_id, user_id, payload)
                .await?;
            broadcast::send_to_user(state, user_id, &ServerEvent::VoiceEvent { payload });
            Ok(())
        }
        ClientEvent::Unknown => Ok(()),
    }
}

/// Disconnect path: clear the socket from the seat but keep the seat alive
/// for the grace window; a reconnect cancels the pending timer.
pub async fn handle_disconnect(state: &SharedState, socket_id: Uuid) {
    let leaving = state.sessions().is_leaving(socket_id);
    let Some(handle) = state.sessions().unregister(socket_id) else {
        return;
    };
    let user_id = handle.user_id;
    info!(user_id, %socket_id, "socket disconnected");

    let Some(room_id) = handle.room_id else {
        return;
    };
    let Ok(store) = state.room_store().await else {
        return;
    };

    // Only strip the socket if this seat still belongs to it; a newer
    // connection may already own the participant row.
    match store.find_participant(room_id, user_id).await {
        Ok(Some(participant)) if participant.socket_id == Some(socket_id) => {
            let _ = store
                .update_participant(
                    room_id,
                    user_id,
                    ParticipantPatch {
                        socket_id: Some(None),
                        ..Default::default()
                    },
                )
                .await;
        }
        _ => return,
    }

    let grace = if leaving {
        state.config().leaving_grace
    } else {
        state.config().grace_period
    };
    arm_grace_timer(state, room_id, user_id, grace);
}

/// Start (or restart) the grace countdown for a disconnected participant.
pub fn arm_grace_timer(state: &SharedState, room_id: i64, user_id: i64, grace: Duration) {
    let task_state = state.clone();
    let timer: JoinHandle<()> = tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        task_state.sessions().grace_fired(room_id, user_id);
        if let Err(err) = expire_grace(&task_state, room_id, user_id).await {
            warn!(room_id, user_id, error = %err, "grace expiry failed");
        }
    });
    state.sessions().arm_grace(room_id, user_id, timer);
}

/// The user never came back: the seat is released and lifecycle checks run.
async fn expire_grace(
    state: &SharedState,
    room_id: i64,
    user_id: i64,
) -> Result<(), ServiceError> {
    let store = state.room_store().await?;
    let Some(participant) = store.find_participant(room_id, user_id).await? else {
        return Ok(());
    };
    if participant.socket_id.is_some() || !participant.is_active {
        // Reconnected (or already gone) while the timer was in flight.
        return Ok(());
    }

    store
        .update_participant(
            room_id,
            user_id,
            ParticipantPatch {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await?;
    state.ready().remove_user(room_id, user_id);
    broadcast::broadcast_room(state, room_id, &ServerEvent::PlayerLeft { user_id });
    crate::game::lifecycle::check_room_after_departure(state, room_id, user_id).await
}

/// Ensure the writer task winds down before the handler returns.
async fn finalize(writer_task: JoinHandle<()>, outbound_tx: mpsc::UnboundedSender<Message>) {
    drop(outbound_tx);
    let _ = writer_task.await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::models::{NewRoom, RoomSettings};
    use crate::dao::room_store::RoomStore;
    use crate::dto::ws::RoomRef;
    use crate::game::phases::GameMode;
    use crate::state::test_support::state_with_memory_store;

    async fn joined_socket(
        state: &SharedState,
        store: &std::sync::Arc<crate::dao::room_store::memory::MemoryRoomStore>,
        user_id: i64,
    ) -> (i64, Uuid) {
        let room = store
            .create_room(NewRoom {
                owner_id: 99,
                max_players: 8,
                is_public: false,
                game_mode: GameMode::Solo,
                settings: RoomSettings::default(),
            })
            .await
            .unwrap();
        store.join_room(room.id, 99, None).await.unwrap();
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let (socket, _) = state.sessions().register(user_id, tx);
        room_service::join_room(state, socket, user_id, &RoomRef::by_id(room.id), None)
            .await
            .unwrap();
        (room.id, socket)
    }

    #[tokio::test]
    async fn disconnect_keeps_seat_active_within_grace() {
        let (state, store) = state_with_memory_store().await;
        let (room_id, socket) = joined_socket(&state, &store, 7).await;

        handle_disconnect(&state, socket).await;

        let participant = store.find_participant(room_id, 7).await.unwrap().unwrap();
        assert!(participant.is_active);
        assert!(participant.socket_id.is_none());
    }

    #[tokio::test]
    async fn grace_expiry_marks_inactive_and_broadcasts() {
        let (state, store) = state_with_memory_store().await;
        let (room_id, socket) = joined_socket(&state, &store, 7).await;

        handle_disconnect(&state, socket).await;
        // Test config uses a 50 ms grace window.
        tokio::time::sleep(Duration::from_millis(150)).await;

        let participant = store.find_participant(room_id, 7).await.unwrap().unwrap();
        assert!(!participant.is_active);
    }

    #[tokio::test]
    async fn reconnect_within_grace_cancels_the_timer() {
        let (state, store) = state_with_memory_store().await;
        let (room_id, socket) = joined_socket(&state, &store, 7).await;

        handle_disconnect(&state, socket).await;

        // Reconnect with a new socket before the window closes.
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let (new_socket, _) = state.sessions().register(7, tx);
        room_service::join_room(&state, new_socket, 7, &RoomRef::by_id(room_id), None)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        let participant = store.find_participant(room_id, 7).await.unwrap().unwrap();
        assert!(participant.is_active);
        assert_eq!(participant.socket_id, Some(new_socket));
    }

    #[tokio::test]
    async fn stale_disconnect_does_not_strip_a_newer_socket() {
        let (state, store) = state_with_memory_store().await;
        let (room_id, old_socket) = joined_socket(&state, &store, 7).await;

        // A newer connection takes over the seat first.
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let (new_socket, _) = state.sessions().register(7, tx);
        room_service::join_room(&state, new_socket, 7, &RoomRef::by_id(room_id), None)
            .await
            .unwrap();

        handle_disconnect(&state, old_socket).await;
        let participant = store.find_participant(room_id, 7).await.unwrap().unwrap();
        assert_eq!(participant.socket_id, Some(new_socket));
        assert!(participant.is_active);
    }
}
