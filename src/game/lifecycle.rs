//! Room lifecycle watchdogs: lobby idle timeout, empty-room deletion,
//! insufficient-player detection, owner departure, and the crash-recovery
//! sweep that runs before the join gate opens.

use tracing::{info, warn};

use crate::dao::models::{ParticipantEntity, RoomEntity};
use crate::dao::room_store::PhaseUpdate;
use crate::dto::ws::ServerEvent;
use crate::error::ServiceError;
use crate::game::engine;
use crate::game::phases::{GameMode, RoomStatus, RoundPhase, Team, LOBBY_TIMEOUT_SECS};
use crate::services::broadcast;
use crate::state::SharedState;

/// Tear the room down entirely: timers, sockets, cache, rows.
pub async fn delete_room(state: &SharedState, room: &RoomEntity) -> Result<(), ServiceError> {
    state.clock().cancel_all(&room.code);
    broadcast::broadcast_room(state, room.id, &ServerEvent::RoomClosed);

    for handle in state.sessions().sockets_in_room(room.id) {
        state.sessions().set_room(handle.socket_id, None);
    }
    state.ready().clear_room(room.id);
    state.cache().invalidate(room.id);

    let store = state.room_store().await?;
    store.delete_room(room.id).await?;
    info!(room = %room.code, "room deleted");
    Ok(())
}

/// Run after a participant leaves, is removed, or times out of grace:
/// owner departure deletes the room, an empty room deletes itself, and a
/// playing room without enough players ends the game.
pub async fn check_room_after_departure(
    state: &SharedState,
    room_id: i64,
    departed_user: i64,
) -> Result<(), ServiceError> {
    let store = state.room_store().await?;
    let Some(room) = store.find_room(room_id).await? else {
        return Ok(());
    };

    if departed_user == room.owner_id {
        return delete_room(state, &room).await;
    }

    let participants = store.list_participants(room_id).await?;
    let actives: Vec<&ParticipantEntity> =
        participants.iter().filter(|p| p.is_active).collect();
    if actives.is_empty() {
        return delete_room(state, &room).await;
    }

    if room.status == RoomStatus::Playing {
        if !population_sufficient(&room, &actives) {
            return end_insufficient(state, &room).await;
        }
        // A departing drawer forfeits the rest of their turn.
        if room.current_drawer_id == Some(departed_user)
            && matches!(
                room.round_phase,
                Some(RoundPhase::ChoosingWord | RoundPhase::Drawing)
            )
        {
            engine::abort_drawer_turn(state, &room).await?;
        }
    }

    broadcast::broadcast_participants(state, &room).await?;
    Ok(())
}

fn population_sufficient(room: &RoomEntity, actives: &[&ParticipantEntity]) -> bool {
    match room.game_mode {
        GameMode::Solo => actives.len() >= 2,
        GameMode::Team => [Team::Blue, Team::Orange].into_iter().all(|team| {
            actives.iter().filter(|p| p.team == Some(team)).count() >= 2
        }),
    }
}

/// The game cannot continue: announce it and close the room record.
pub async fn end_insufficient(
    state: &SharedState,
    room: &RoomEntity,
) -> Result<(), ServiceError> {
    state.clock().cancel_all(&room.code);
    broadcast::broadcast_room(state, room.id, &ServerEvent::GameEndedInsufficientPlayers);

    let store = state.room_store().await?;
    let update = PhaseUpdate {
        status: Some(RoomStatus::Closed),
        current_drawer_id: Some(None),
        current_word: Some(None),
        current_word_options: Some(None),
        ..PhaseUpdate::idle()
    };
    if let Some(updated) = store
        .transition_phase(room.id, room.round_phase, update)
        .await?
    {
        state.cache().refresh(&updated);
    }
    warn!(room = %room.code, "game ended: insufficient players");
    Ok(())
}

/// Lobby idle expiry: prod the owner if they are connected, otherwise the
/// room is abandoned and deleted. `continue_waiting` re-arms the timer.
pub async fn on_lobby_idle(state: &SharedState, room_id: i64) -> Result<(), ServiceError> {
    let store = state.room_store().await?;
    let Some(room) = store.find_room(room_id).await? else {
        return Ok(());
    };
    if !room.status.accepts_setup_changes() {
        return Ok(());
    }

    match state.sessions().socket_for_user(room.owner_id) {
        Some(owner) => {
            broadcast::send_to_socket(
                &owner.tx,
                &ServerEvent::LobbyTimeExceeded {
                    respond_within: LOBBY_TIMEOUT_SECS,
                },
            );
            // Another silent window and the next expiry gets the same choice.
            state.clock().schedule_lobby_idle(state, &room);
            Ok(())
        }
        None => delete_room(state, &room).await,
    }
}

/// Owner action resetting the idle countdown.
pub async fn continue_waiting(
    state: &SharedState,
    room_id: i64,
    caller_id: i64,
) -> Result<(), ServiceError> {
    let store = state.room_store().await?;
    let room = store
        .find_room(room_id)
        .await?
        .ok_or(ServiceError::RoomNotFound)?;
    if room.owner_id != caller_id {
        return Err(ServiceError::OnlyOwner {
            action: "continue_waiting",
        });
    }
    state.clock().schedule_lobby_idle(state, &room);
    Ok(())
}

/// Boot-time sweep: every participant left holding `is_active` with no
/// socket belongs to the previous process. Mark them inactive and run the
/// empty-room check per affected room.
pub async fn startup_sweep(state: &SharedState) -> Result<(), ServiceError> {
    let store = state.room_store().await?;
    let affected = store.sweep_orphans().await?;
    let swept = affected.len();

    for room_id in affected {
        let Some(room) = store.find_room(room_id).await? else {
            continue;
        };
        let participants = store.list_participants(room_id).await?;
        let actives = participants.iter().filter(|p| p.is_active).count();
        if actives == 0 {
            delete_room(state, &room).await?;
        }
    }
    info!(rooms = swept, "startup orphan sweep complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::models::{NewRoom, RoomSettings};
    use crate::dao::room_store::{ParticipantPatch, RoomStore};
    use crate::state::test_support::state_with_memory_store;

    #[tokio::test]
    async fn owner_departure_deletes_the_room() {
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
        store.join_room(room.id, 2, None).await.unwrap();

        check_room_after_departure(&state, room.id, 1).await.unwrap();
        assert!(store.find_room(room.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn playing_room_without_enough_players_closes() {
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
        store.join_room(room.id, 2, None).await.unwrap();
        state.ready().set_ready(room.id, 2);
        engine::start_game(&state, room.id, 1).await.unwrap();

        store
            .update_participant(
                room.id,
                2,
                ParticipantPatch {
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        check_room_after_departure(&state, room.id, 2).await.unwrap();
        let room = store.find_room(room.id).await.unwrap().unwrap();
        assert_eq!(room.status, RoomStatus::Closed);
        assert_eq!(room.round_phase, None);
    }

    #[tokio::test]
    async fn startup_sweep_reaps_orphans_and_empty_rooms() {
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
        store.join_room(room.id, 2, None).await.unwrap();

        // Nobody holds a socket: the whole room is orphaned.
        startup_sweep(&state).await.unwrap();
        assert!(store.find_room(room.id).await.unwrap().is_none());
    }
}
