//! Chat: persist the line, then fan it out to the room.

use crate::dao::models::NewMessage;
use crate::dto::ws::{ChatPayload, RoomRef, ServerEvent};
use crate::error::ServiceError;
use crate::services::{broadcast, room_service};
use crate::state::SharedState;

const MAX_MESSAGE_LEN: usize = 500;

pub async fn send_message(
    state: &SharedState,
    user_id: i64,
    room_ref: &RoomRef,
    content: String,
) -> Result<(), ServiceError> {
    let content = content.trim().to_owned();
    if content.is_empty() || content.len() > MAX_MESSAGE_LEN {
        return Err(ServiceError::InvalidInput(
            "message must be 1-500 characters".into(),
        ));
    }

    let room = room_service::resolve_room(state, room_ref).await?;
    let store = state.room_store().await?;
    room_service::require_active_participant(&store, room.id, user_id).await?;

    let message = store
        .save_message(NewMessage {
            room_id: room.id,
            user_id,
            content,
        })
        .await?;
    broadcast::broadcast_room(
        state,
        room.id,
        &ServerEvent::ChatMessage(ChatPayload::from(&message)),
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::models::{NewRoom, RoomSettings};
    use crate::dao::room_store::RoomStore;
    use crate::game::phases::GameMode;
    use crate::state::test_support::state_with_memory_store;

    #[tokio::test]
    async fn empty_and_oversized_messages_are_rejected() {
        let (state, store) = state_with_memory_store().await;
        let room = store
            .create_room(NewRoom {
                owner_id: 1,
                max_players: 4,
                is_public: false,
                game_mode: GameMode::Solo,
                settings: RoomSettings::default(),
            })
            .await
            .unwrap();
        store.join_room(room.id, 1, None).await.unwrap();

        assert!(send_message(&state, 1, &RoomRef::by_id(room.id), "   ".into())
            .await
            .is_err());
        assert!(send_message(
            &state,
            1,
            &RoomRef::by_id(room.id),
            "x".repeat(501)
        )
        .await
        .is_err());
        assert!(send_message(&state, 1, &RoomRef::by_id(room.id), "hello".into())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn non_participants_cannot_chat() {
        let (state, store) = state_with_memory_store().await;
        let room = store
            .create_room(NewRoom {
                owner_id: 1,
                max_players: 4,
                is_public: false,
                game_mode: GameMode::Solo,
                settings: RoomSettings::default(),
            })
            .await
            .unwrap();

        assert!(matches!(
            send_message(&state, 9, &RoomRef::by_id(room.id), "hi".into()).await,
            Err(ServiceError::RoomNotFound)
        ));
    }
}
