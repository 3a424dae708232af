//! submit_guess orchestration.
//!
//! Solo awards are per-player conditional writes; the team award claims the
//! `_internal_processing` sentinel so exactly one guess per round can pay
//! the whole team, then closes the round immediately.

use std::time::SystemTime;

use crate::dao::models::{ParticipantEntity, RoomEntity};
use crate::dto::ws::{RoomRef, ServerEvent};
use crate::error::ServiceError;
use crate::game::engine::{self, DrawingEnd};
use crate::game::guess::{guess_reward, is_correct};
use crate::game::phases::{GameMode, RoundPhase};
use crate::services::{broadcast, room_service};
use crate::state::SharedState;

pub async fn submit_guess(
    state: &SharedState,
    user_id: i64,
    room_ref: &RoomRef,
    guess: String,
) -> Result<(), ServiceError> {
    let room = room_service::resolve_room(state, room_ref).await?;
    let store = state.room_store().await?;

    if room.round_phase != Some(RoundPhase::Drawing) {
        return Err(ServiceError::WrongPhase);
    }
    let Some(word) = room.current_word.clone() else {
        return Err(ServiceError::WrongPhase);
    };
    let Some(end_time) = room.round_phase_end_time else {
        return Err(ServiceError::WrongPhase);
    };

    let participant = room_service::require_active_participant(&store, room.id, user_id).await?;
    if room.current_drawer_id == Some(user_id) {
        return Err(ServiceError::DrawerCannotGuess);
    }
    if participant.has_guessed_this_round {
        return Err(ServiceError::AlreadyGuessed);
    }

    if room.game_mode == GameMode::Team {
        let drawer_team = drawer_team(&store, &room).await?;
        if participant.team != drawer_team {
            return Err(ServiceError::WrongTeam);
        }
    }

    if !is_correct(&guess, &word) {
        broadcast::send_to_user(state, user_id, &ServerEvent::IncorrectGuess { guess });
        broadcast::broadcast_room(
            state,
            room.id,
            &ServerEvent::GuessResult {
                user_id,
                correct: false,
            },
        );
        return Ok(());
    }

    let now = SystemTime::now();
    let reward = guess_reward(end_time, now);
    match room.game_mode {
        GameMode::Solo => award_solo(state, &room, user_id, reward, now).await,
        GameMode::Team => award_team(state, &room, &participant, user_id, reward, now).await,
    }
}

async fn drawer_team(
    store: &std::sync::Arc<dyn crate::dao::room_store::RoomStore>,
    room: &RoomEntity,
) -> Result<Option<crate::game::phases::Team>, ServiceError> {
    let Some(drawer_id) = room.current_drawer_id else {
        return Ok(None);
    };
    Ok(store
        .find_participant(room.id, drawer_id)
        .await?
        .and_then(|p| p.team))
}

async fn award_solo(
    state: &SharedState,
    room: &RoomEntity,
    user_id: i64,
    reward: i32,
    now: SystemTime,
) -> Result<(), ServiceError> {
    let store = state.room_store().await?;
    // Exactly-once: the write itself checks has_guessed_this_round.
    let Some(awarded) = store.award_guess(room.id, user_id, reward, now).await? else {
        return Err(ServiceError::AlreadyGuessed);
    };

    broadcast::broadcast_room(
        state,
        room.id,
        &ServerEvent::CorrectGuess { user_id, reward },
    );
    broadcast::broadcast_room(
        state,
        room.id,
        &ServerEvent::ScoreUpdate {
            user_id,
            score: awarded.score,
        },
    );
    broadcast::broadcast_room(
        state,
        room.id,
        &ServerEvent::GuessResult {
            user_id,
            correct: true,
        },
    );

    // The round ends early once every eligible guesser has the word.
    let participants = store.list_participants(room.id).await?;
    let eligible: Vec<&ParticipantEntity> = participants
        .iter()
        .filter(|p| p.is_active && room.current_drawer_id != Some(p.user_id))
        .collect();
    if !eligible.is_empty() && eligible.iter().all(|p| p.has_guessed_this_round) {
        let Some(fresh) = store.find_room(room.id).await? else {
            return Ok(());
        };
        engine::end_drawing(state, fresh, DrawingEnd::AllGuessed).await?;
    }
    Ok(())
}

async fn award_team(
    state: &SharedState,
    room: &RoomEntity,
    participant: &ParticipantEntity,
    user_id: i64,
    reward: i32,
    now: SystemTime,
) -> Result<(), ServiceError> {
    let Some(team) = participant.team else {
        return Err(ServiceError::InvalidTeam);
    };
    let store = state.room_store().await?;

    // First correct guess claims the round; racers see round_ended.
    let Some(_claimed) = store
        .transition_phase(
            room.id,
            Some(RoundPhase::Drawing),
            crate::dao::room_store::PhaseUpdate::sentinel(),
        )
        .await?
    else {
        return Err(ServiceError::RoundEnded);
    };
    state.clock().cancel(
        &room.code,
        crate::game::clock::TimerKind::Phase(RoundPhase::Drawing),
    );

    let awarded = store.award_team(room.id, team, reward, now).await?;
    broadcast::broadcast_room(
        state,
        room.id,
        &ServerEvent::CorrectGuess { user_id, reward },
    );
    for member in &awarded {
        broadcast::broadcast_room(
            state,
            room.id,
            &ServerEvent::ScoreUpdate {
                user_id: member.user_id,
                score: member.score,
            },
        );
    }
    broadcast::broadcast_room(
        state,
        room.id,
        &ServerEvent::GuessResult {
            user_id,
            correct: true,
        },
    );

    engine::enter_reveal_from_sentinel(state, room).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::models::{NewRoom, RoomSettings};
    use crate::dao::room_store::RoomStore;
    use crate::game::phases::Team;
    use crate::state::test_support::state_with_memory_store;
    use std::sync::Arc;

    async fn playing_room(
        state: &crate::state::SharedState,
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
        for (user, team) in users {
            store.join_room(room.id, *user, *team).await.unwrap();
            if *user != room.owner_id {
                state.ready().set_ready(room.id, *user);
            }
        }
        engine::start_game(state, room.id, room.owner_id).await.unwrap();

        // Walk to the drawing phase with a fixed word.
        let fresh = store.find_room(room.id).await.unwrap().unwrap();
        engine::on_phase_expired(state, fresh, RoundPhase::SelectingDrawer)
            .await
            .unwrap();
        let fresh = store.find_room(room.id).await.unwrap().unwrap();
        let word = fresh.current_word_options.as_ref().unwrap()[0].clone();
        let drawer = fresh.current_drawer_id.unwrap();
        engine::choose_word(state, room.id, drawer, word).await.unwrap();
        store.find_room(room.id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn wrong_guess_is_soft_and_leaves_state_alone() {
        let (state, store) = state_with_memory_store().await;
        let room =
            playing_room(&state, &store, GameMode::Solo, &[(1, None), (2, None)]).await;

        submit_guess(&state, 2, &RoomRef::by_id(room.id), "definitely-wrong".into())
            .await
            .unwrap();
        let p = store.find_participant(room.id, 2).await.unwrap().unwrap();
        assert_eq!(p.score, 0);
        assert!(!p.has_guessed_this_round);
    }

    #[tokio::test]
    async fn drawer_cannot_guess_their_own_word() {
        let (state, store) = state_with_memory_store().await;
        let room =
            playing_room(&state, &store, GameMode::Solo, &[(1, None), (2, None)]).await;
        let word = room.current_word.clone().unwrap();
        let drawer = room.current_drawer_id.unwrap();

        assert!(matches!(
            submit_guess(&state, drawer, &RoomRef::by_id(room.id), word).await,
            Err(ServiceError::DrawerCannotGuess)
        ));
    }

    #[tokio::test]
    async fn correct_solo_guess_awards_time_based_points() {
        let (state, store) = state_with_memory_store().await;
        let room = playing_room(
            &state,
            &store,
            GameMode::Solo,
            &[(1, None), (2, None), (3, None)],
        )
        .await;
        let word = room.current_word.clone().unwrap();

        submit_guess(&state, 2, &RoomRef::by_id(room.id), word.clone())
            .await
            .unwrap();
        let p = store.find_participant(room.id, 2).await.unwrap().unwrap();
        // Full 80 s remaining: ceil(80 / 8) = 10.
        assert_eq!(p.score, 10);
        assert!(p.has_guessed_this_round);

        // Second attempt bounces off the exactly-once write.
        assert!(matches!(
            submit_guess(&state, 2, &RoomRef::by_id(room.id), word).await,
            Err(ServiceError::AlreadyGuessed)
        ));

        // One guesser still missing: the round keeps running.
        let fresh = store.find_room(room.id).await.unwrap().unwrap();
        assert_eq!(fresh.round_phase, Some(RoundPhase::Drawing));
    }

    #[tokio::test]
    async fn last_eligible_guesser_closes_the_round() {
        let (state, store) = state_with_memory_store().await;
        let room = playing_room(
            &state,
            &store,
            GameMode::Solo,
            &[(1, None), (2, None), (3, None)],
        )
        .await;
        let word = room.current_word.clone().unwrap();

        submit_guess(&state, 2, &RoomRef::by_id(room.id), word.clone())
            .await
            .unwrap();
        submit_guess(&state, 3, &RoomRef::by_id(room.id), word)
            .await
            .unwrap();

        let fresh = store.find_room(room.id).await.unwrap().unwrap();
        assert_eq!(fresh.round_phase, Some(RoundPhase::Reveal));
        // Drawer reward for two of two guessers: capped at 20.
        let drawer = store.find_participant(room.id, 1).await.unwrap().unwrap();
        assert_eq!(drawer.score, 20);
    }

    #[tokio::test]
    async fn team_first_correct_awards_whole_team_once_and_reveals() {
        let (state, store) = state_with_memory_store().await;
        let room = playing_room(
            &state,
            &store,
            GameMode::Team,
            &[
                (1, Some(Team::Blue)),
                (2, Some(Team::Blue)),
                (3, Some(Team::Orange)),
                (4, Some(Team::Orange)),
            ],
        )
        .await;
        let word = room.current_word.clone().unwrap();
        // Drawer is user 1 (blue); teammate 2 guesses for blue.
        submit_guess(&state, 2, &RoomRef::by_id(room.id), word.clone())
            .await
            .unwrap();

        let fresh = store.find_room(room.id).await.unwrap().unwrap();
        assert_eq!(fresh.round_phase, Some(RoundPhase::Reveal));

        let blue_two = store.find_participant(room.id, 2).await.unwrap().unwrap();
        assert_eq!(blue_two.score, 10);
        // Whole team paid, including the drawer's teammates... and nobody else.
        let blue_one = store.find_participant(room.id, 1).await.unwrap().unwrap();
        assert_eq!(blue_one.score, 10);
        let orange = store.find_participant(room.id, 3).await.unwrap().unwrap();
        assert_eq!(orange.score, 0);

        // A late duplicate from the other teammate loses the race cleanly.
        assert!(matches!(
            submit_guess(&state, 2, &RoomRef::by_id(room.id), word).await,
            Err(ServiceError::WrongPhase | ServiceError::AlreadyGuessed)
        ));
    }

    #[tokio::test]
    async fn opposing_team_guess_is_rejected() {
        let (state, store) = state_with_memory_store().await;
        let room = playing_room(
            &state,
            &store,
            GameMode::Team,
            &[
                (1, Some(Team::Blue)),
                (2, Some(Team::Blue)),
                (3, Some(Team::Orange)),
                (4, Some(Team::Orange)),
            ],
        )
        .await;
        let word = room.current_word.clone().unwrap();

        // Drawer is blue; orange players must not guess.
        assert!(matches!(
            submit_guess(&state, 3, &RoomRef::by_id(room.id), word).await,
            Err(ServiceError::WrongTeam)
        ));
    }
}
