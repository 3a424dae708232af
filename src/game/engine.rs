//! The per-room phase state machine.
//!
//! Every phase change goes through the store's compare-and-update keyed on
//! the expected predecessor phase; callers that lose the race exit silently.
//! Multi-step work that must not be redone by a parallel caller (drawer
//! reward, team award, drawer elimination) first claims the
//! `_internal_processing` sentinel and releases it by transitioning onward.

use std::time::SystemTime;

use tracing::{info, warn};

use crate::dao::models::{ParticipantEntity, RoomEntity};
use crate::dao::room_store::{ParticipantPatch, PhaseUpdate};
use crate::dto::ws::{RankingPayload, ServerEvent};
use crate::error::ServiceError;
use crate::game::guess::{drawer_reward, final_rankings, target_reached};
use crate::game::phases::{
    epoch_millis, GameMode, RoomStatus, RoundPhase, ELIMINATION_ALLOWANCE, SELECTING_DRAWER_SECS,
};
use crate::game::{rotation, words};
use crate::services::broadcast;
use crate::state::SharedState;

/// Why a drawing phase is being closed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawingEnd {
    Timeout,
    AllGuessed,
    DrawerGone,
}

/// Owner starts the game from the lobby.
pub async fn start_game(
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
            action: "start_game",
        });
    }
    if !room.status.accepts_setup_changes() {
        return Err(ServiceError::WrongPhase);
    }

    let participants = store.list_participants(room_id).await?;
    let actives: Vec<&ParticipantEntity> =
        participants.iter().filter(|p| p.is_active).collect();
    check_population(&room, &actives)?;

    // Everyone but the owner must have tapped Ready.
    let ready = state.ready().ready_users(room_id);
    if actives
        .iter()
        .any(|p| p.user_id != room.owner_id && !ready.contains(&p.user_id))
    {
        return Err(ServiceError::NotAllReady);
    }

    charge_entry(state, &room, &actives).await?;

    state.ready().clear_room(room_id);
    state
        .clock()
        .cancel(&room.code, crate::game::clock::TimerKind::LobbyIdle);
    broadcast::broadcast_room(state, room_id, &ServerEvent::ClearChat);

    info!(room = %room.code, "game starting");
    enter_selecting_drawer(state, room_id, room.round_phase, 1, true).await?;
    Ok(())
}

/// Both modes need enough players to keep a round meaningful.
fn check_population(
    room: &RoomEntity,
    actives: &[&ParticipantEntity],
) -> Result<(), ServiceError> {
    match room.game_mode {
        GameMode::Solo => {
            if actives.len() < 2 {
                return Err(ServiceError::NotEnoughPlayers);
            }
        }
        GameMode::Team => {
            for team in [crate::game::phases::Team::Blue, crate::game::phases::Team::Orange] {
                if actives.iter().filter(|p| p.team == Some(team)).count() < 2 {
                    return Err(ServiceError::BothTeamsNeedPlayers);
                }
            }
        }
    }
    Ok(())
}

/// Debit the entry fee from everyone who has not paid yet. All balances are
/// checked before the first debit so one broke player rejects the start
/// without partial charges.
async fn charge_entry(
    state: &SharedState,
    room: &RoomEntity,
    actives: &[&ParticipantEntity],
) -> Result<(), ServiceError> {
    let entry = room.settings.entry_points;
    if entry <= 0 {
        return Ok(());
    }
    let wallet = state.wallet();
    let unpaid: Vec<i64> = actives
        .iter()
        .filter(|p| !p.has_paid_entry)
        .map(|p| p.user_id)
        .collect();

    for user_id in &unpaid {
        if wallet.balance(*user_id).await? < entry {
            return Err(ServiceError::InsufficientCoins);
        }
    }

    let store = state.room_store().await?;
    for user_id in unpaid {
        wallet.debit(user_id, entry).await?;
        store
            .update_participant(
                room.id,
                user_id,
                ParticipantPatch {
                    has_paid_entry: Some(true),
                    ..Default::default()
                },
            )
            .await?;
    }
    Ok(())
}

/// Enter selecting_drawer: pick the next drawer, reset round flags, arm the
/// preview timer. Returns false when the compare-and-update lost.
pub async fn enter_selecting_drawer(
    state: &SharedState,
    room_id: i64,
    from: Option<RoundPhase>,
    round: u32,
    starting: bool,
) -> Result<bool, ServiceError> {
    let store = state.room_store().await?;
    let Some(mut room) = store.find_room(room_id).await? else {
        return Ok(false);
    };
    if starting {
        // A fresh game begins a fresh cycle.
        room.drawn_user_ids.clear();
        room.drawer_pointer_index = 0;
    }

    let participants = store.list_participants(room_id).await?;
    let actives: Vec<&ParticipantEntity> =
        participants.iter().filter(|p| p.is_active).collect();
    if check_population(&room, &actives).is_err() {
        crate::game::lifecycle::end_insufficient(state, &room).await?;
        return Ok(true);
    }

    let Some(selection) = rotation::select_drawer(&room, &participants) else {
        crate::game::lifecycle::end_insufficient(state, &room).await?;
        return Ok(true);
    };

    let end_time = SystemTime::now() + RoundPhase::SelectingDrawer.duration().unwrap();
    let update = PhaseUpdate {
        status: starting.then_some(RoomStatus::Playing),
        current_round: Some(round),
        current_drawer_id: Some(Some(selection.drawer_id)),
        current_word: Some(None),
        current_word_options: Some(None),
        drawer_pointer_index: Some(selection.pointer_index),
        last_drawer_id: Some(room.current_drawer_id),
        drawn_user_ids: Some(selection.drawn_user_ids),
        clear_used_words: starting,
        ..PhaseUpdate::enter(RoundPhase::SelectingDrawer, end_time)
    };

    let Some(updated) = store.transition_phase(room_id, from, update).await? else {
        return Ok(false);
    };

    store.reset_round_flags(room_id).await?;
    store.set_drawer(room_id, selection.drawer_id).await?;

    state.cache().refresh(&updated);
    broadcast_phase(state, &updated);
    broadcast::broadcast_room(
        state,
        room_id,
        &ServerEvent::DrawerSelected {
            drawer: selection.drawer_id,
            preview_duration: SELECTING_DRAWER_SECS,
        },
    );
    state.clock().schedule_phase(state, &updated);
    Ok(true)
}

/// Clock callback: the room was re-read and still holds `phase`.
pub async fn on_phase_expired(
    state: &SharedState,
    room: RoomEntity,
    phase: RoundPhase,
) -> Result<(), ServiceError> {
    match phase {
        RoundPhase::SelectingDrawer => enter_choosing_word(state, room).await,
        RoundPhase::ChoosingWord => on_word_choice_timeout(state, room).await,
        RoundPhase::Drawing => end_drawing(state, room, DrawingEnd::Timeout).await.map(|_| ()),
        RoundPhase::Reveal => on_reveal_end(state, room).await,
        RoundPhase::Interval => {
            let round = room.current_round + 1;
            enter_selecting_drawer(state, room.id, Some(RoundPhase::Interval), round, false)
                .await
                .map(|_| ())
        }
        RoundPhase::IntervalEnding => back_to_lobby(state, room).await,
        RoundPhase::InternalProcessing => {
            warn!(room = %room.code, "sentinel phase reached the clock; ignoring");
            Ok(())
        }
    }
}

/// selecting_drawer expired: compute word options and offer them to the
/// drawer's current socket.
async fn enter_choosing_word(state: &SharedState, room: RoomEntity) -> Result<(), ServiceError> {
    let options = words::compute_options(
        state.word_catalog().as_ref(),
        &room.settings,
        &room.used_words,
    )
    .await;

    let store = state.room_store().await?;
    let duration = RoundPhase::ChoosingWord.duration().unwrap();
    let end_time = SystemTime::now() + duration;
    let update = PhaseUpdate {
        current_word_options: Some(Some(options.clone())),
        ..PhaseUpdate::enter(RoundPhase::ChoosingWord, end_time)
    };

    let Some(updated) = store
        .transition_phase(room.id, Some(RoundPhase::SelectingDrawer), update)
        .await?
    else {
        return Ok(());
    };

    state.cache().refresh(&updated);
    broadcast_phase(state, &updated);
    if let Some(drawer_id) = updated.current_drawer_id {
        // Resolved through the session map at send time, not earlier.
        broadcast::send_to_user(
            state,
            drawer_id,
            &ServerEvent::WordOptions {
                words: options,
                duration: duration.as_secs(),
            },
        );
    }
    state.clock().schedule_phase(state, &updated);
    Ok(())
}

/// Drawer picked a word: persist it and open the drawing phase.
pub async fn choose_word(
    state: &SharedState,
    room_id: i64,
    user_id: i64,
    word: String,
) -> Result<(), ServiceError> {
    let store = state.room_store().await?;
    let room = store
        .find_room(room_id)
        .await?
        .ok_or(ServiceError::RoomNotFound)?;

    if room.round_phase != Some(RoundPhase::ChoosingWord) {
        return Err(ServiceError::WrongPhase);
    }
    if room.current_drawer_id != Some(user_id) {
        return Err(ServiceError::NotYourTurn);
    }
    let offered = room
        .current_word_options
        .as_ref()
        .map(|options| options.iter().any(|w| w == &word))
        .unwrap_or(false);
    if !offered {
        return Err(ServiceError::InvalidWordChoice);
    }

    let end_time = SystemTime::now() + RoundPhase::Drawing.duration().unwrap();
    let update = PhaseUpdate {
        current_word: Some(Some(word.clone())),
        current_word_options: Some(None),
        used_word: Some(word),
        ..PhaseUpdate::enter(RoundPhase::Drawing, end_time)
    };
    let Some(updated) = store
        .transition_phase(room_id, Some(RoundPhase::ChoosingWord), update)
        .await?
    else {
        // The choice lost against the word-choice timeout.
        return Err(ServiceError::RoundEnded);
    };

    store
        .update_participant(
            room_id,
            user_id,
            ParticipantPatch {
                elimination_count: Some(ELIMINATION_ALLOWANCE),
                has_drawn: Some(true),
                ..Default::default()
            },
        )
        .await?;

    state.cache().refresh(&updated);
    broadcast_phase(state, &updated);
    state.clock().schedule_phase(state, &updated);
    Ok(())
}

/// choosing_word expired: burn one elimination credit and rotate on; at
/// zero credits the drawer loses their seat.
async fn on_word_choice_timeout(
    state: &SharedState,
    room: RoomEntity,
) -> Result<(), ServiceError> {
    let store = state.room_store().await?;
    let Some(_claimed) = store
        .transition_phase(
            room.id,
            Some(RoundPhase::ChoosingWord),
            PhaseUpdate {
                current_word_options: Some(None),
                ..PhaseUpdate::sentinel()
            },
        )
        .await?
    else {
        return Ok(());
    };

    if let Some(drawer_id) = room.current_drawer_id {
        broadcast::broadcast_room(
            state,
            room.id,
            &ServerEvent::DrawerSkipped { drawer: drawer_id },
        );
        if let Some(drawer) = store.find_participant(room.id, drawer_id).await? {
            let remaining = drawer.elimination_count - 1;
            if remaining <= 0 {
                store.remove_participant(room.id, drawer_id).await?;
                state.ready().remove_user(room.id, drawer_id);
                broadcast::broadcast_room(
                    state,
                    room.id,
                    &ServerEvent::PlayerRemoved {
                        user_id: drawer_id,
                        reason: "failed_to_choose_word".into(),
                    },
                );
                if let Ok(Some(fresh)) = store.find_room(room.id).await {
                    broadcast::broadcast_participants(state, &fresh).await?;
                }
            } else {
                store
                    .update_participant(
                        room.id,
                        drawer_id,
                        ParticipantPatch {
                            elimination_count: Some(remaining),
                            ..Default::default()
                        },
                    )
                    .await?;
            }
        }
    }

    enter_selecting_drawer(
        state,
        room.id,
        Some(RoundPhase::InternalProcessing),
        room.current_round,
        false,
    )
    .await
    .map(|_| ())
}

/// Close out a drawing phase: claim the sentinel, reward the drawer in solo
/// mode, and reveal. Returns false when a parallel caller won the race.
pub async fn end_drawing(
    state: &SharedState,
    room: RoomEntity,
    trigger: DrawingEnd,
) -> Result<bool, ServiceError> {
    let store = state.room_store().await?;
    let claim = if trigger == DrawingEnd::DrawerGone {
        // The drawer is gone: also clear their word and seat on the room.
        PhaseUpdate {
            current_drawer_id: Some(None),
            current_word: Some(None),
            current_word_options: Some(None),
            ..PhaseUpdate::sentinel()
        }
    } else {
        PhaseUpdate::sentinel()
    };
    let Some(_claimed) = store
        .transition_phase(room.id, Some(RoundPhase::Drawing), claim)
        .await?
    else {
        return Ok(false);
    };

    state
        .clock()
        .cancel(&room.code, crate::game::clock::TimerKind::Phase(RoundPhase::Drawing));

    if room.game_mode == GameMode::Solo && trigger != DrawingEnd::DrawerGone {
        award_solo_drawer(state, &room).await?;
    }

    if trigger == DrawingEnd::DrawerGone {
        // Skip reveal entirely; the next round starts from interval.
        enter_interval_from_sentinel(state, &room).await?;
    } else {
        enter_reveal_from_sentinel(state, &room).await?;
    }
    Ok(true)
}

/// Solo drawer reward: proportional to how many eligible players guessed.
async fn award_solo_drawer(state: &SharedState, room: &RoomEntity) -> Result<(), ServiceError> {
    let Some(drawer_id) = room.current_drawer_id else {
        return Ok(());
    };
    let store = state.room_store().await?;
    let participants = store.list_participants(room.id).await?;
    let actives: Vec<&ParticipantEntity> =
        participants.iter().filter(|p| p.is_active).collect();
    let guessers = actives
        .iter()
        .filter(|p| p.user_id != drawer_id && p.has_guessed_this_round)
        .count();
    let reward = drawer_reward(guessers, actives.len());
    if reward == 0 {
        return Ok(());
    }

    if let Some(drawer) = store
        .award_guess(room.id, drawer_id, reward, SystemTime::now())
        .await?
    {
        broadcast::broadcast_room(
            state,
            room.id,
            &ServerEvent::ScoreUpdate {
                user_id: drawer_id,
                score: drawer.score,
            },
        );
    }
    Ok(())
}

/// Release the sentinel into reveal. Public for the team-guess path, which
/// claims the sentinel itself before awarding.
pub async fn enter_reveal_from_sentinel(
    state: &SharedState,
    room: &RoomEntity,
) -> Result<(), ServiceError> {
    let store = state.room_store().await?;
    let end_time = SystemTime::now() + RoundPhase::Reveal.duration().unwrap();
    let Some(updated) = store
        .transition_phase(
            room.id,
            Some(RoundPhase::InternalProcessing),
            PhaseUpdate::enter(RoundPhase::Reveal, end_time),
        )
        .await?
    else {
        warn!(room = %room.code, "sentinel holder lost reveal transition");
        return Ok(());
    };

    state.cache().refresh(&updated);
    broadcast_phase(state, &updated);
    state.clock().schedule_phase(state, &updated);
    Ok(())
}

async fn enter_interval_from_sentinel(
    state: &SharedState,
    room: &RoomEntity,
) -> Result<(), ServiceError> {
    let store = state.room_store().await?;
    let end_time = SystemTime::now() + RoundPhase::Interval.duration().unwrap();
    let Some(updated) = store
        .transition_phase(
            room.id,
            Some(RoundPhase::InternalProcessing),
            PhaseUpdate::enter(RoundPhase::Interval, end_time),
        )
        .await?
    else {
        warn!(room = %room.code, "sentinel holder lost interval transition");
        return Ok(());
    };

    state.cache().refresh(&updated);
    broadcast_phase(state, &updated);
    state.clock().schedule_phase(state, &updated);
    Ok(())
}

/// reveal expired: either the scoreboard says the game is over, or the next
/// round's interval begins.
async fn on_reveal_end(state: &SharedState, room: RoomEntity) -> Result<(), ServiceError> {
    let store = state.room_store().await?;
    let participants = store.list_participants(room.id).await?;
    let actives: Vec<ParticipantEntity> = participants
        .into_iter()
        .filter(|p| p.is_active)
        .collect();

    if target_reached(&actives, room.game_mode, room.settings.target_points) {
        return end_game(state, room, &actives).await;
    }

    let end_time = SystemTime::now() + RoundPhase::Interval.duration().unwrap();
    let Some(updated) = store
        .transition_phase(
            room.id,
            Some(RoundPhase::Reveal),
            PhaseUpdate::enter(RoundPhase::Interval, end_time),
        )
        .await?
    else {
        return Ok(());
    };

    state.cache().refresh(&updated);
    broadcast_phase(state, &updated);
    state.clock().schedule_phase(state, &updated);
    Ok(())
}

/// Game over: rank, pay out, and pause briefly before returning to lobby.
async fn end_game(
    state: &SharedState,
    room: RoomEntity,
    actives: &[ParticipantEntity],
) -> Result<(), ServiceError> {
    let store = state.room_store().await?;
    let rankings = final_rankings(actives, room.game_mode, room.settings.entry_points);

    let end_time = SystemTime::now() + RoundPhase::IntervalEnding.duration().unwrap();
    let update = PhaseUpdate {
        status: Some(RoomStatus::Finished),
        current_drawer_id: Some(None),
        current_word: Some(None),
        current_word_options: Some(None),
        ..PhaseUpdate::enter(RoundPhase::IntervalEnding, end_time)
    };
    let Some(updated) = store
        .transition_phase(room.id, Some(RoundPhase::Reveal), update)
        .await?
    else {
        return Ok(());
    };

    let wallet = state.wallet();
    for entry in &rankings {
        if entry.reward > 0 {
            if let Err(err) = wallet.credit(entry.user_id, entry.reward).await {
                warn!(room = %room.code, user_id = entry.user_id, error = %err, "reward credit failed");
            }
        }
    }

    info!(room = %room.code, "game ended");
    state.cache().refresh(&updated);
    broadcast::broadcast_room(
        state,
        room.id,
        &ServerEvent::GameEnded {
            rankings: rankings.iter().map(RankingPayload::from).collect(),
            entry_cost: room.settings.entry_points,
            game_mode: room.game_mode,
        },
    );
    state.clock().schedule_phase(state, &updated);
    Ok(())
}

/// interval_ending expired: scores reset, room returns to the lobby.
async fn back_to_lobby(state: &SharedState, room: RoomEntity) -> Result<(), ServiceError> {
    let store = state.room_store().await?;
    let update = PhaseUpdate {
        status: Some(RoomStatus::Lobby),
        current_round: Some(0),
        current_drawer_id: Some(None),
        current_word: Some(None),
        current_word_options: Some(None),
        drawer_pointer_index: Some(0),
        last_drawer_id: Some(None),
        drawn_user_ids: Some(Vec::new()),
        clear_used_words: true,
        ..PhaseUpdate::idle()
    };
    let Some(updated) = store
        .transition_phase(room.id, Some(RoundPhase::IntervalEnding), update)
        .await?
    else {
        return Ok(());
    };

    store.reset_scores(room.id).await?;
    state.ready().clear_room(room.id);
    state.cache().refresh(&updated);
    broadcast::broadcast_room(state, room.id, &ServerEvent::RoomBackToLobby);
    broadcast::broadcast_participants(state, &updated).await?;
    state.clock().schedule_lobby_idle(state, &updated);
    Ok(())
}

/// Abort the current drawer's turn (report strike, drawer leaving): clear
/// drawer and word state and continue from interval.
pub async fn abort_drawer_turn(state: &SharedState, room: &RoomEntity) -> Result<bool, ServiceError> {
    let from = match room.round_phase {
        Some(phase @ (RoundPhase::ChoosingWord | RoundPhase::Drawing)) => phase,
        _ => return Ok(false),
    };

    let store = state.room_store().await?;
    state.clock().cancel_phase_timers(&room.code);

    let end_time = SystemTime::now() + RoundPhase::Interval.duration().unwrap();
    let update = PhaseUpdate {
        current_drawer_id: Some(None),
        current_word: Some(None),
        current_word_options: Some(None),
        ..PhaseUpdate::enter(RoundPhase::Interval, end_time)
    };
    let Some(updated) = store.transition_phase(room.id, Some(from), update).await? else {
        return Ok(false);
    };

    state.cache().refresh(&updated);
    broadcast_phase(state, &updated);
    state.clock().schedule_phase(state, &updated);
    Ok(true)
}

/// Last-ditch recovery after a failed expiry handler: try to move the room
/// into the next drawer selection rather than leaving it stuck.
pub async fn recover_room(state: &SharedState, room_id: i64) {
    let Ok(store) = state.room_store().await else {
        return;
    };
    let Ok(Some(room)) = store.find_room(room_id).await else {
        return;
    };
    if room.status != RoomStatus::Playing {
        return;
    }
    state.clock().cancel_phase_timers(&room.code);
    if let Err(err) =
        enter_selecting_drawer(state, room_id, room.round_phase, room.current_round, false).await
    {
        warn!(room_id, error = %err, "room recovery failed");
    }
}

/// Broadcast the phase envelope every transition emits.
fn broadcast_phase(state: &SharedState, room: &RoomEntity) {
    let (Some(phase), Some(end_time)) = (room.round_phase, room.round_phase_end_time) else {
        return;
    };
    let duration = phase.duration().map(|d| d.as_secs()).unwrap_or(0);
    broadcast::broadcast_room(
        state,
        room.id,
        &ServerEvent::PhaseChange {
            phase,
            duration,
            phase_end_time: epoch_millis(end_time),
            round: room.current_round,
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::models::{NewRoom, RoomSettings};
    use crate::dao::room_store::RoomStore;
    use crate::game::phases::Team;
    use crate::state::test_support::state_with_memory_store;
    use crate::state::SharedState;
    use std::sync::Arc;
    use std::time::Duration;

    async fn lobby_with_players(
        state: &SharedState,
        store: &Arc<crate::dao::room_store::memory::MemoryRoomStore>,
        mode: GameMode,
        users: &[(i64, Option<Team>)],
    ) -> RoomEntity {
        let room = store
            .create_room(NewRoom {
                owner_id: users[0].0,
                max_players: 8,
                is_public: false,
                game_mode: mode,
                settings: RoomSettings::default(),
            })
            .await
            .unwrap();
        for (user_id, team) in users {
            store.join_room(room.id, *user_id, *team).await.unwrap();
            if *user_id != room.owner_id {
                state.ready().set_ready(room.id, *user_id);
            }
        }
        room
    }

    #[tokio::test]
    async fn start_game_enters_selecting_drawer_with_lowest_user_id() {
        let (state, store) = state_with_memory_store().await;
        let room =
            lobby_with_players(&state, &store, GameMode::Solo, &[(1, None), (2, None), (3, None)])
                .await;

        start_game(&state, room.id, 1).await.unwrap();

        let room = store.find_room(room.id).await.unwrap().unwrap();
        assert_eq!(room.status, RoomStatus::Playing);
        assert_eq!(room.round_phase, Some(RoundPhase::SelectingDrawer));
        assert_eq!(room.current_round, 1);
        assert_eq!(room.current_drawer_id, Some(1));
        assert!(room.round_phase_end_time.is_some());
        assert_eq!(room.drawn_user_ids, vec![1]);
    }

    #[tokio::test]
    async fn start_game_requires_owner_and_ready_players() {
        let (state, store) = state_with_memory_store().await;
        let room =
            lobby_with_players(&state, &store, GameMode::Solo, &[(1, None), (2, None)]).await;

        assert!(matches!(
            start_game(&state, room.id, 2).await,
            Err(ServiceError::OnlyOwner { .. })
        ));

        state.ready().set_not_ready(room.id, 2);
        assert!(matches!(
            start_game(&state, room.id, 1).await,
            Err(ServiceError::NotAllReady)
        ));
    }

    #[tokio::test]
    async fn start_game_rejects_single_player() {
        let (state, store) = state_with_memory_store().await;
        let room = lobby_with_players(&state, &store, GameMode::Solo, &[(1, None)]).await;
        assert!(matches!(
            start_game(&state, room.id, 1).await,
            Err(ServiceError::NotEnoughPlayers)
        ));
    }

    #[tokio::test]
    async fn team_mode_needs_two_per_team() {
        let (state, store) = state_with_memory_store().await;
        let room = lobby_with_players(
            &state,
            &store,
            GameMode::Team,
            &[
                (1, Some(Team::Blue)),
                (2, Some(Team::Blue)),
                (3, Some(Team::Orange)),
            ],
        )
        .await;
        assert!(matches!(
            start_game(&state, room.id, 1).await,
            Err(ServiceError::BothTeamsNeedPlayers)
        ));
    }

    #[tokio::test]
    async fn selecting_drawer_expiry_offers_word_options_to_drawer() {
        let (state, store) = state_with_memory_store().await;
        let room =
            lobby_with_players(&state, &store, GameMode::Solo, &[(1, None), (2, None)]).await;
        start_game(&state, room.id, 1).await.unwrap();

        let room = store.find_room(room.id).await.unwrap().unwrap();
        on_phase_expired(&state, room.clone(), RoundPhase::SelectingDrawer)
            .await
            .unwrap();

        let room = store.find_room(room.id).await.unwrap().unwrap();
        assert_eq!(room.round_phase, Some(RoundPhase::ChoosingWord));
        let options = room.current_word_options.unwrap();
        assert_eq!(options.len(), 3);
    }

    #[tokio::test]
    async fn choose_word_moves_to_drawing_and_records_word() {
        let (state, store) = state_with_memory_store().await;
        let room =
            lobby_with_players(&state, &store, GameMode::Solo, &[(1, None), (2, None)]).await;
        start_game(&state, room.id, 1).await.unwrap();
        let fresh = store.find_room(room.id).await.unwrap().unwrap();
        on_phase_expired(&state, fresh, RoundPhase::SelectingDrawer)
            .await
            .unwrap();

        let fresh = store.find_room(room.id).await.unwrap().unwrap();
        let word = fresh.current_word_options.as_ref().unwrap()[0].clone();

        // Non-drawers cannot choose.
        assert!(matches!(
            choose_word(&state, room.id, 2, word.clone()).await,
            Err(ServiceError::NotYourTurn)
        ));
        // Off-menu words are rejected.
        assert!(matches!(
            choose_word(&state, room.id, 1, "not-offered".into()).await,
            Err(ServiceError::InvalidWordChoice)
        ));

        choose_word(&state, room.id, 1, word.clone()).await.unwrap();
        let room = store.find_room(room.id).await.unwrap().unwrap();
        assert_eq!(room.round_phase, Some(RoundPhase::Drawing));
        assert_eq!(room.current_word, Some(word.clone()));
        assert!(room.used_words.contains(&word));
        assert!(room.current_word_options.is_none());
    }

    #[tokio::test]
    async fn word_timeout_decrements_and_finally_removes_drawer() {
        let (state, store) = state_with_memory_store().await;
        let room =
            lobby_with_players(&state, &store, GameMode::Solo, &[(1, None), (2, None), (3, None)])
                .await;
        start_game(&state, room.id, 1).await.unwrap();
        let fresh = store.find_room(room.id).await.unwrap().unwrap();
        on_phase_expired(&state, fresh, RoundPhase::SelectingDrawer)
            .await
            .unwrap();

        // Down to the last credit.
        store
            .update_participant(
                room.id,
                1,
                ParticipantPatch {
                    elimination_count: Some(1),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let fresh = store.find_room(room.id).await.unwrap().unwrap();
        on_phase_expired(&state, fresh, RoundPhase::ChoosingWord)
            .await
            .unwrap();

        // The drawer lost their seat; play continues from the pointer.
        assert!(store.find_participant(room.id, 1).await.unwrap().is_none());
        let room = store.find_room(room.id).await.unwrap().unwrap();
        assert_eq!(room.round_phase, Some(RoundPhase::SelectingDrawer));
        assert_eq!(room.current_drawer_id, Some(3));
    }

    #[tokio::test]
    async fn drawing_timeout_rewards_solo_drawer_and_reveals() {
        let (state, store) = state_with_memory_store().await;
        let room =
            lobby_with_players(&state, &store, GameMode::Solo, &[(1, None), (2, None), (3, None)])
                .await;
        start_game(&state, room.id, 1).await.unwrap();
        let fresh = store.find_room(room.id).await.unwrap().unwrap();
        on_phase_expired(&state, fresh, RoundPhase::SelectingDrawer)
            .await
            .unwrap();
        let fresh = store.find_room(room.id).await.unwrap().unwrap();
        let word = fresh.current_word_options.as_ref().unwrap()[0].clone();
        choose_word(&state, room.id, 1, word).await.unwrap();

        // One of the two guessers got the word.
        store
            .award_guess(room.id, 2, 7, SystemTime::now())
            .await
            .unwrap();

        let fresh = store.find_room(room.id).await.unwrap().unwrap();
        on_phase_expired(&state, fresh, RoundPhase::Drawing)
            .await
            .unwrap();

        let room = store.find_room(room.id).await.unwrap().unwrap();
        assert_eq!(room.round_phase, Some(RoundPhase::Reveal));
        // Drawer reward: 20 * 1 / 2 = 10.
        let drawer = store.find_participant(room.id, 1).await.unwrap().unwrap();
        assert_eq!(drawer.score, 10);
    }

    #[tokio::test]
    async fn reveal_below_target_continues_to_interval_and_next_round() {
        let (state, store) = state_with_memory_store().await;
        let room =
            lobby_with_players(&state, &store, GameMode::Solo, &[(1, None), (2, None)]).await;
        start_game(&state, room.id, 1).await.unwrap();

        // Force the room into reveal with modest scores.
        store
            .transition_phase(
                room.id,
                Some(RoundPhase::SelectingDrawer),
                PhaseUpdate::enter(
                    RoundPhase::Reveal,
                    SystemTime::now() + Duration::from_secs(7),
                ),
            )
            .await
            .unwrap()
            .unwrap();

        let fresh = store.find_room(room.id).await.unwrap().unwrap();
        on_phase_expired(&state, fresh, RoundPhase::Reveal).await.unwrap();
        let room_after = store.find_room(room.id).await.unwrap().unwrap();
        assert_eq!(room_after.round_phase, Some(RoundPhase::Interval));

        on_phase_expired(&state, room_after, RoundPhase::Interval)
            .await
            .unwrap();
        let room_after = store.find_room(room.id).await.unwrap().unwrap();
        assert_eq!(room_after.round_phase, Some(RoundPhase::SelectingDrawer));
        assert_eq!(room_after.current_round, 2);
    }

    #[tokio::test]
    async fn reveal_at_target_ends_game_then_returns_to_lobby() {
        let (state, store) = state_with_memory_store().await;
        let room =
            lobby_with_players(&state, &store, GameMode::Solo, &[(1, None), (2, None)]).await;
        start_game(&state, room.id, 1).await.unwrap();

        store
            .award_guess(room.id, 2, 60, SystemTime::now())
            .await
            .unwrap();
        store
            .transition_phase(
                room.id,
                Some(RoundPhase::SelectingDrawer),
                PhaseUpdate::enter(
                    RoundPhase::Reveal,
                    SystemTime::now() + Duration::from_secs(7),
                ),
            )
            .await
            .unwrap()
            .unwrap();

        let fresh = store.find_room(room.id).await.unwrap().unwrap();
        on_phase_expired(&state, fresh, RoundPhase::Reveal).await.unwrap();

        let room_after = store.find_room(room.id).await.unwrap().unwrap();
        assert_eq!(room_after.status, RoomStatus::Finished);
        assert_eq!(room_after.round_phase, Some(RoundPhase::IntervalEnding));

        on_phase_expired(&state, room_after, RoundPhase::IntervalEnding)
            .await
            .unwrap();
        let room_after = store.find_room(room.id).await.unwrap().unwrap();
        assert_eq!(room_after.status, RoomStatus::Lobby);
        assert_eq!(room_after.round_phase, None);
        let winner = store.find_participant(room.id, 2).await.unwrap().unwrap();
        assert_eq!(winner.score, 0);
        assert!(room_after.used_words.is_empty());
    }

    #[tokio::test]
    async fn abort_drawer_turn_clears_word_and_enters_interval() {
        let (state, store) = state_with_memory_store().await;
        let room =
            lobby_with_players(&state, &store, GameMode::Solo, &[(1, None), (2, None)]).await;
        start_game(&state, room.id, 1).await.unwrap();
        let fresh = store.find_room(room.id).await.unwrap().unwrap();
        on_phase_expired(&state, fresh, RoundPhase::SelectingDrawer)
            .await
            .unwrap();
        let fresh = store.find_room(room.id).await.unwrap().unwrap();
        let word = fresh.current_word_options.as_ref().unwrap()[0].clone();
        choose_word(&state, room.id, 1, word).await.unwrap();

        let fresh = store.find_room(room.id).await.unwrap().unwrap();
        assert!(abort_drawer_turn(&state, &fresh).await.unwrap());

        let room_after = store.find_room(room.id).await.unwrap().unwrap();
        assert_eq!(room_after.round_phase, Some(RoundPhase::Interval));
        assert!(room_after.current_word.is_none());
        assert!(room_after.current_drawer_id.is_none());
    }

    #[tokio::test]
    async fn concurrent_expiry_handlers_transition_at_most_once() {
        let (state, store) = state_with_memory_store().await;
        let room =
            lobby_with_players(&state, &store, GameMode::Solo, &[(1, None), (2, None)]).await;
        start_game(&state, room.id, 1).await.unwrap();
        let fresh = store.find_room(room.id).await.unwrap().unwrap();

        // Two racing expiry handlers for the same phase: exactly one wins.
        let (left, right) = tokio::join!(
            on_phase_expired(&state, fresh.clone(), RoundPhase::SelectingDrawer),
            on_phase_expired(&state, fresh, RoundPhase::SelectingDrawer),
        );
        left.unwrap();
        right.unwrap();

        let room_after = store.find_room(room.id).await.unwrap().unwrap();
        assert_eq!(room_after.round_phase, Some(RoundPhase::ChoosingWord));
        assert_eq!(room_after.current_word_options.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn entry_fee_is_charged_once_per_player() {
        let (state, store) = state_with_memory_store().await;
        let room = store
            .create_room(NewRoom {
                owner_id: 1,
                max_players: 8,
                is_public: false,
                game_mode: GameMode::Solo,
                settings: RoomSettings {
                    entry_points: 100,
                    ..RoomSettings::default()
                },
            })
            .await
            .unwrap();
        store.join_room(room.id, 1, None).await.unwrap();
        store.join_room(room.id, 2, None).await.unwrap();
        state.ready().set_ready(room.id, 2);

        start_game(&state, room.id, 1).await.unwrap();
        assert_eq!(state.wallet().balance(1).await.unwrap(), 900);
        assert_eq!(state.wallet().balance(2).await.unwrap(), 900);
        let paid = store.find_participant(room.id, 2).await.unwrap().unwrap();
        assert!(paid.has_paid_entry);
    }
}
