//! Room membership and setup operations driven by socket events.

use tracing::{info, warn};
use uuid::Uuid;

use crate::dao::models::{NewRoom, RoomEntity, RoomSettings};
use crate::dao::room_store::{JoinOutcome, ParticipantPatch, RoomStore};
use crate::dto::ws::{RoomRef, RoomSnapshotPayload, ServerEvent};
use crate::error::ServiceError;
use crate::game::phases::{GameMode, RoomStatus, RoundPhase, Team, SKIP_ALLOWANCE};
use crate::game::{engine, lifecycle};
use crate::services::{broadcast, resync_service};
use crate::state::SharedState;

use std::sync::Arc;

/// Resolve a room reference (code or id) through the store.
pub async fn resolve_room(
    state: &SharedState,
    room_ref: &RoomRef,
) -> Result<RoomEntity, ServiceError> {
    let store = state.room_store().await?;
    let room = if let Some(id) = room_ref.room_id {
        store.find_room(id).await?
    } else if let Some(code) = &room_ref.room_code {
        store.find_room_by_code(code.to_uppercase()).await?
    } else {
        return Err(ServiceError::InvalidInput("missing room reference".into()));
    };
    room.ok_or(ServiceError::RoomNotFound)
}

/// Create a room from the REST surface.
pub async fn create_room(
    state: &SharedState,
    owner_id: i64,
    max_players: u32,
    is_public: bool,
    game_mode: GameMode,
    settings: Option<RoomSettings>,
) -> Result<RoomEntity, ServiceError> {
    if !(2..=15).contains(&max_players) {
        return Err(ServiceError::InvalidMaxPlayers);
    }
    let store = state.room_store().await?;
    let room = store
        .create_room(NewRoom {
            owner_id,
            max_players,
            is_public,
            game_mode,
            settings: settings.unwrap_or_default(),
        })
        .await?;
    state.cache().refresh(&room);
    state.clock().schedule_lobby_idle(state, &room);
    info!(room = %room.code, owner = owner_id, "room created");
    Ok(room)
}

pub async fn list_public_rooms(state: &SharedState) -> Result<Vec<RoomEntity>, ServiceError> {
    let store = state.room_store().await?;
    Ok(store.list_public_rooms().await?)
}

/// Idempotent join driven by `join_room` events.
///
/// Dedup is two-layered: the short-lived (room, user) lock swallows
/// duplicate joins from the same connection, while the store's atomic seat
/// claim enforces capacity against concurrent strangers.
pub async fn join_room(
    state: &SharedState,
    socket_id: Uuid,
    user_id: i64,
    room_ref: &RoomRef,
    team: Option<Team>,
) -> Result<(), ServiceError> {
    if !state.accepting_joins() {
        return Err(ServiceError::ServerSyncing);
    }

    let room = resolve_room(state, room_ref).await?;
    if room.status == RoomStatus::Closed {
        return Err(ServiceError::RoomClosed);
    }
    if let Some(team) = team {
        validate_team_choice(&room, team)?;
    }

    if !state.sessions().try_join_lock(room.id, user_id) {
        // A join for this pair is already in flight on this connection.
        return Ok(());
    }
    let result = join_room_locked(state, socket_id, user_id, &room, team).await;
    state.sessions().release_join_lock(room.id, user_id);
    result
}

async fn join_room_locked(
    state: &SharedState,
    socket_id: Uuid,
    user_id: i64,
    room: &RoomEntity,
    team: Option<Team>,
) -> Result<(), ServiceError> {
    // A reconnect beats the pending grace timer.
    state.sessions().cancel_grace(room.id, user_id);

    let store = state.room_store().await?;
    let outcome = store.join_room(room.id, user_id, team).await?;
    let (participant, fresh_seat) = match outcome {
        JoinOutcome::Joined(p) => (p, true),
        JoinOutcome::Rejoined(p) => (p, false),
        JoinOutcome::RoomFull => return Err(ServiceError::RoomFull),
        JoinOutcome::Banned => return Err(ServiceError::Banned),
        JoinOutcome::RoomGone => return Err(ServiceError::RoomNotFound),
        JoinOutcome::SeatLost => {
            broadcast::send_to_user(state, user_id, &ServerEvent::ExitedDueToInactivity);
            return Err(ServiceError::ExitedDueToInactivity);
        }
    };

    let same_socket = participant.socket_id == Some(socket_id);
    store
        .update_participant(
            room.id,
            user_id,
            ParticipantPatch {
                socket_id: Some(Some(socket_id)),
                ..Default::default()
            },
        )
        .await?;
    state.sessions().set_room(socket_id, Some(room.id));

    let room = store
        .find_room(room.id)
        .await?
        .ok_or(ServiceError::RoomNotFound)?;
    state.cache().refresh(&room);

    let participants = broadcast::participant_summaries(state, &room).await?;
    broadcast::send_to_user(
        state,
        user_id,
        &ServerEvent::RoomJoined {
            room: RoomSnapshotPayload::from_entity(&room),
            participants: participants.clone(),
        },
    );

    if same_socket && !fresh_seat {
        // Same connection re-sent join_room: state went to that socket only.
        return Ok(());
    }

    broadcast::broadcast_room(
        state,
        room.id,
        &ServerEvent::RoomParticipants { participants },
    );
    if fresh_seat {
        broadcast::broadcast_room(
            state,
            room.id,
            &ServerEvent::PlayerJoined {
                user_id,
                team: team.or(participant.team),
            },
        );
    }

    // Mid-round arrivals need the canvas replayed before live deltas.
    if room.status == RoomStatus::Playing && room.round_phase == Some(RoundPhase::Drawing) {
        resync_service::begin_resync(state, socket_id, user_id, &room).await?;
    }
    Ok(())
}

fn validate_team_choice(room: &RoomEntity, _team: Team) -> Result<(), ServiceError> {
    if room.game_mode != GameMode::Team {
        return Err(ServiceError::NotTeamMode);
    }
    Ok(())
}

/// Voluntary leave. Owner departure deletes the room outright.
pub async fn leave_room(
    state: &SharedState,
    socket_id: Uuid,
    user_id: i64,
    room_ref: &RoomRef,
) -> Result<(), ServiceError> {
    let room = resolve_room(state, room_ref).await?;
    let store = state.room_store().await?;
    if store.find_participant(room.id, user_id).await?.is_none() {
        return Err(ServiceError::RoomNotFound);
    }

    state.sessions().set_room(socket_id, None);
    state.sessions().cancel_grace(room.id, user_id);
    state.ready().remove_user(room.id, user_id);

    if room.owner_id == user_id {
        return lifecycle::delete_room(state, &room).await;
    }

    store
        .update_participant(
            room.id,
            user_id,
            ParticipantPatch {
                is_active: Some(false),
                socket_id: Some(None),
                ..Default::default()
            },
        )
        .await?;
    broadcast::broadcast_room(state, room.id, &ServerEvent::PlayerLeft { user_id });
    lifecycle::check_room_after_departure(state, room.id, user_id).await
}

/// Owner-only settings update while the room is still in setup.
///
/// Enabling voice debits every active participant; one empty wallet rejects
/// the whole change. Once the updated settings are broadcast the change is
/// final, even if a later debit fails.
pub async fn update_settings(
    state: &SharedState,
    user_id: i64,
    room_id: i64,
    settings: RoomSettings,
) -> Result<(), ServiceError> {
    let store = state.room_store().await?;
    let room = store
        .find_room(room_id)
        .await?
        .ok_or(ServiceError::RoomNotFound)?;
    if room.owner_id != user_id {
        return Err(ServiceError::OnlyOwner {
            action: "update_settings",
        });
    }
    if !room.status.accepts_setup_changes() {
        return Err(ServiceError::CannotUpdateAfterGameStarted);
    }
    if settings.target_points <= 0 || settings.entry_points < 0 {
        return Err(ServiceError::InvalidInput(
            "target and entry points must be positive".into(),
        ));
    }

    let enabling_voice = settings.voice_enabled && !room.settings.voice_enabled;
    let mut voice_payers = Vec::new();
    if enabling_voice {
        let wallet = state.wallet();
        let cost = state.config().voice_cost;
        for participant in store.list_participants(room_id).await? {
            if !participant.is_active {
                continue;
            }
            if wallet.balance(participant.user_id).await? < cost {
                return Err(ServiceError::InsufficientCoins);
            }
            voice_payers.push(participant.user_id);
        }
    }

    let updated = store
        .update_settings(room_id, settings.clone())
        .await?
        .ok_or(ServiceError::RoomNotFound)?;
    state.cache().refresh(&updated);
    broadcast::broadcast_room(state, room_id, &ServerEvent::SettingsUpdated { settings });

    // Past this point failures are logged, never surfaced as errors.
    if enabling_voice {
        let wallet = state.wallet();
        let cost = state.config().voice_cost;
        for payer in voice_payers {
            if let Err(err) = wallet.debit(payer, cost).await {
                warn!(room_id, user_id = payer, error = %err, "voice fee debit failed after broadcast");
            }
        }
    }
    Ok(())
}

pub async fn select_team(
    state: &SharedState,
    user_id: i64,
    room_id: i64,
    team: Team,
) -> Result<(), ServiceError> {
    let store = state.room_store().await?;
    let room = store
        .find_room(room_id)
        .await?
        .ok_or(ServiceError::RoomNotFound)?;
    if room.game_mode != GameMode::Team {
        return Err(ServiceError::NotTeamMode);
    }
    if !room.status.accepts_setup_changes() {
        return Err(ServiceError::CannotChangeTeamAfterGameStarted);
    }
    store
        .update_participant(
            room_id,
            user_id,
            ParticipantPatch {
                team: Some(Some(team)),
                ..Default::default()
            },
        )
        .await?
        .ok_or(ServiceError::RoomNotFound)?;
    broadcast::broadcast_participants(state, &room).await
}

pub async fn set_ready(
    state: &SharedState,
    user_id: i64,
    room_ref: &RoomRef,
    ready: bool,
) -> Result<(), ServiceError> {
    let room = resolve_room(state, room_ref).await?;
    let store = state.room_store().await?;
    if store.find_participant(room.id, user_id).await?.is_none() {
        return Err(ServiceError::RoomNotFound);
    }
    if ready {
        state.ready().set_ready(room.id, user_id);
    } else {
        state.ready().set_not_ready(room.id, user_id);
    }
    broadcast::broadcast_participants(state, &room).await
}

/// Owner removes a participant; never during a game, never themselves.
pub async fn remove_participant(
    state: &SharedState,
    caller_id: i64,
    room_id: i64,
    target_id: i64,
) -> Result<(), ServiceError> {
    let store = state.room_store().await?;
    let room = store
        .find_room(room_id)
        .await?
        .ok_or(ServiceError::RoomNotFound)?;
    if room.owner_id != caller_id {
        return Err(ServiceError::OnlyOwner {
            action: "remove_participants",
        });
    }
    if room.status == RoomStatus::Playing {
        return Err(ServiceError::CannotRemoveDuringGame);
    }
    if caller_id == target_id {
        return Err(ServiceError::CannotRemoveSelf);
    }

    store.remove_participant(room_id, target_id).await?;
    state.ready().remove_user(room_id, target_id);
    if let Some(handle) = state.sessions().socket_for_user(target_id) {
        if handle.room_id == Some(room_id) {
            state.sessions().set_room(handle.socket_id, None);
            broadcast::send_to_socket(
                &handle.tx,
                &ServerEvent::PlayerRemoved {
                    user_id: target_id,
                    reason: "removed_by_owner".into(),
                },
            );
        }
    }
    broadcast::broadcast_room(
        state,
        room_id,
        &ServerEvent::PlayerRemoved {
            user_id: target_id,
            reason: "removed_by_owner".into(),
        },
    );
    broadcast::broadcast_participants(state, &room).await
}

/// Drawer gives up their turn; three skips cost the seat.
pub async fn skip_turn(
    state: &SharedState,
    user_id: i64,
    room_id: i64,
) -> Result<(), ServiceError> {
    let store = state.room_store().await?;
    let room = store
        .find_room(room_id)
        .await?
        .ok_or(ServiceError::RoomNotFound)?;
    if room.current_drawer_id != Some(user_id) {
        return Err(ServiceError::NotYourTurn);
    }
    if !matches!(
        room.round_phase,
        Some(RoundPhase::ChoosingWord | RoundPhase::Drawing)
    ) {
        return Err(ServiceError::WrongPhase);
    }

    let participant = store
        .find_participant(room_id, user_id)
        .await?
        .ok_or(ServiceError::RoomNotFound)?;
    let skips = participant.skip_count + 1;
    store
        .update_participant(
            room_id,
            user_id,
            ParticipantPatch {
                skip_count: Some(skips),
                ..Default::default()
            },
        )
        .await?;

    broadcast::broadcast_room(state, room_id, &ServerEvent::DrawerSkipped { drawer: user_id });
    engine::abort_drawer_turn(state, &room).await?;

    if skips >= SKIP_ALLOWANCE {
        store.remove_participant(room_id, user_id).await?;
        state.ready().remove_user(room_id, user_id);
        broadcast::broadcast_room(
            state,
            room_id,
            &ServerEvent::PlayerRemoved {
                user_id,
                reason: "too_many_skips".into(),
            },
        );
        lifecycle::check_room_after_departure(state, room_id, user_id).await?;
    }
    Ok(())
}

/// Drawer-originated hint relay; the server never invents hints.
pub async fn word_hint(
    state: &SharedState,
    user_id: i64,
    room_ref: &RoomRef,
    revealed_word: String,
    hints_remaining: u32,
) -> Result<(), ServiceError> {
    let room = resolve_room(state, room_ref).await?;
    if room.round_phase != Some(RoundPhase::Drawing) {
        return Err(ServiceError::WrongPhase);
    }
    if room.current_drawer_id != Some(user_id) {
        return Err(ServiceError::NotYourTurn);
    }
    broadcast::broadcast_room(
        state,
        room.id,
        &ServerEvent::WordHint {
            revealed_word,
            hints_remaining,
        },
    );
    Ok(())
}

/// Require the caller to be an active, unbanned participant; shared gate
/// for chat, guesses and reports.
pub async fn require_active_participant(
    store: &Arc<dyn RoomStore>,
    room_id: i64,
    user_id: i64,
) -> Result<crate::dao::models::ParticipantEntity, ServiceError> {
    let participant = store
        .find_participant(room_id, user_id)
        .await?
        .ok_or(ServiceError::RoomNotFound)?;
    if participant.is_banned() {
        return Err(ServiceError::Banned);
    }
    if !participant.is_active {
        return Err(ServiceError::ExitedDueToInactivity);
    }
    Ok(participant)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::state_with_memory_store;

    async fn create_lobby(state: &SharedState) -> RoomEntity {
        create_room(state, 1, 4, true, GameMode::Solo, None)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn join_is_gated_until_rebuild_completes() {
        let (state, _store) = state_with_memory_store().await;
        let room = create_lobby(&state).await;

        // Simulate a fresh boot where the gate has not opened.
        let gated = crate::state::AppState::new(
            crate::config::AppConfig::for_tests(),
            std::sync::Arc::new(crate::game::words::StaticWordCatalog),
            std::sync::Arc::new(
                crate::services::collaborators::MemoryWallet::with_default_balance(0),
            ),
            std::sync::Arc::new(crate::services::collaborators::NullVoiceRelay),
        );
        let result = join_room(
            &gated,
            Uuid::new_v4(),
            2,
            &RoomRef::by_id(room.id),
            None,
        )
        .await;
        assert!(matches!(result, Err(ServiceError::ServerSyncing)));
    }

    #[tokio::test]
    async fn join_and_rejoin_are_idempotent_per_socket() {
        let (state, store) = state_with_memory_store().await;
        let room = create_lobby(&state).await;

        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let (socket, _) = state.sessions().register(2, tx);
        join_room(&state, socket, 2, &RoomRef::by_id(room.id), None)
            .await
            .unwrap();
        join_room(&state, socket, 2, &RoomRef::by_id(room.id), None)
            .await
            .unwrap();

        let participant = store.find_participant(room.id, 2).await.unwrap().unwrap();
        assert_eq!(participant.socket_id, Some(socket));
        assert!(participant.is_active);
    }

    #[tokio::test]
    async fn full_room_rejects_surplus_joiners() {
        let (state, _store) = state_with_memory_store().await;
        let room = create_room(&state, 1, 2, true, GameMode::Solo, None)
            .await
            .unwrap();
        for user in [1, 2] {
            let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
            let (socket, _) = state.sessions().register(user, tx);
            join_room(&state, socket, user, &RoomRef::by_id(room.id), None)
                .await
                .unwrap();
        }

        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let (socket, _) = state.sessions().register(3, tx);
        assert!(matches!(
            join_room(&state, socket, 3, &RoomRef::by_id(room.id), None).await,
            Err(ServiceError::RoomFull)
        ));
    }

    #[tokio::test]
    async fn owner_leave_deletes_room() {
        let (state, store) = state_with_memory_store().await;
        let room = create_lobby(&state).await;
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let (socket, _) = state.sessions().register(1, tx);
        join_room(&state, socket, 1, &RoomRef::by_id(room.id), None)
            .await
            .unwrap();

        leave_room(&state, socket, 1, &RoomRef::by_id(room.id))
            .await
            .unwrap();
        assert!(store.find_room(room.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn settings_are_owner_only_and_lobby_only() {
        let (state, store) = state_with_memory_store().await;
        let room = create_lobby(&state).await;
        store.join_room(room.id, 1, None).await.unwrap();
        store.join_room(room.id, 2, None).await.unwrap();

        assert!(matches!(
            update_settings(&state, 2, room.id, RoomSettings::default()).await,
            Err(ServiceError::OnlyOwner { .. })
        ));

        store
            .set_status(room.id, RoomStatus::Playing)
            .await
            .unwrap();
        assert!(matches!(
            update_settings(&state, 1, room.id, RoomSettings::default()).await,
            Err(ServiceError::CannotUpdateAfterGameStarted)
        ));
    }

    #[tokio::test]
    async fn voice_enable_requires_everyone_funded() {
        let (state, store) = state_with_memory_store().await;
        let wallet = state.wallet();
        let room = create_lobby(&state).await;
        store.join_room(room.id, 1, None).await.unwrap();
        store.join_room(room.id, 2, None).await.unwrap();

        // Drain one participant below the voice fee.
        wallet.debit(2, 995).await.unwrap();
        let settings = RoomSettings {
            voice_enabled: true,
            ..RoomSettings::default()
        };
        assert!(matches!(
            update_settings(&state, 1, room.id, settings.clone()).await,
            Err(ServiceError::InsufficientCoins)
        ));

        wallet.credit(2, 100).await.unwrap();
        update_settings(&state, 1, room.id, settings).await.unwrap();
        let room = store.find_room(room.id).await.unwrap().unwrap();
        assert!(room.settings.voice_enabled);
    }

    #[tokio::test]
    async fn remove_participant_guards() {
        let (state, store) = state_with_memory_store().await;
        let room = create_lobby(&state).await;
        store.join_room(room.id, 1, None).await.unwrap();
        store.join_room(room.id, 2, None).await.unwrap();

        assert!(matches!(
            remove_participant(&state, 1, room.id, 1).await,
            Err(ServiceError::CannotRemoveSelf)
        ));
        assert!(matches!(
            remove_participant(&state, 2, room.id, 1).await,
            Err(ServiceError::OnlyOwner { .. })
        ));

        remove_participant(&state, 1, room.id, 2).await.unwrap();
        assert!(store.find_participant(room.id, 2).await.unwrap().is_none());
    }
}
