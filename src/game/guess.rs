//! Guess validation, scoring, and end-of-game ranking rules.

use std::time::SystemTime;

use crate::dao::models::ParticipantEntity;
use crate::game::phases::{remaining_secs, GameMode, Team, MAX_POINTS_PER_ROUND};

/// A guess matches when it equals the current word after trimming and
/// case-folding.
pub fn is_correct(guess: &str, word: &str) -> bool {
    guess.trim().eq_ignore_ascii_case(word.trim())
}

/// Reward for a correct guess: one point per started 8-second slice of the
/// time still left, capped.
pub fn guess_reward(phase_end: SystemTime, now: SystemTime) -> i32 {
    let remaining = remaining_secs(phase_end, now);
    let reward = remaining.div_ceil(8) as i32;
    reward.min(MAX_POINTS_PER_ROUND)
}

/// Drawer reward in solo mode, scaled by how many guessers got the word.
/// Team mode never rewards the drawer.
pub fn drawer_reward(correct_guessers: usize, player_count: usize) -> i32 {
    let divisor = player_count.saturating_sub(1).max(1);
    let reward = (20 * correct_guessers / divisor) as i32;
    reward.min(MAX_POINTS_PER_ROUND)
}

/// One row of the final scoreboard.
#[derive(Debug, Clone, PartialEq)]
pub struct RankingEntry {
    pub rank: u32,
    pub user_id: i64,
    pub team: Option<Team>,
    pub score: i32,
    /// Coins credited back from the entry pool.
    pub reward: i64,
}

/// Sort key `(score DESC, points_updated_at ASC)`: reaching a score first
/// outranks reaching it later.
pub fn rank_participants(participants: &[ParticipantEntity]) -> Vec<ParticipantEntity> {
    let mut ranked: Vec<ParticipantEntity> = participants.to_vec();
    ranked.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then(a.points_updated_at.cmp(&b.points_updated_at))
            .then(a.user_id.cmp(&b.user_id))
    });
    ranked
}

/// Whether the game-over condition holds: any participant at target in solo
/// mode, any team total at target in team mode.
pub fn target_reached(
    participants: &[ParticipantEntity],
    mode: GameMode,
    target_points: i32,
) -> bool {
    match mode {
        GameMode::Solo => participants.iter().any(|p| p.score >= target_points),
        GameMode::Team => [Team::Blue, Team::Orange]
            .into_iter()
            .any(|team| team_total(participants, team) >= target_points),
    }
}

pub fn team_total(participants: &[ParticipantEntity], team: Team) -> i32 {
    participants
        .iter()
        .filter(|p| p.team == Some(team))
        .map(|p| p.score)
        .sum()
}

/// Final rankings plus per-player coin rewards from the entry pool.
///
/// Solo: 2 players pay double-or-nothing; 3+ pay out 3/2/1 multiples of the
/// entry fee. Team: every member of the higher-scoring team gets twice the
/// entry fee.
pub fn final_rankings(
    participants: &[ParticipantEntity],
    mode: GameMode,
    entry_points: i64,
) -> Vec<RankingEntry> {
    let ranked = rank_participants(participants);
    let player_count = ranked.len();

    match mode {
        GameMode::Solo => ranked
            .iter()
            .enumerate()
            .map(|(idx, p)| {
                let rank = idx as u32 + 1;
                let multiplier = if player_count == 2 {
                    if rank == 1 { 2 } else { 0 }
                } else {
                    match rank {
                        1 => 3,
                        2 => 2,
                        3 => 1,
                        _ => 0,
                    }
                };
                RankingEntry {
                    rank,
                    user_id: p.user_id,
                    team: p.team,
                    score: p.score,
                    reward: entry_points * multiplier,
                }
            })
            .collect(),
        GameMode::Team => {
            let blue = team_total(participants, Team::Blue);
            let orange = team_total(participants, Team::Orange);
            let winner = if blue >= orange { Team::Blue } else { Team::Orange };
            ranked
                .iter()
                .enumerate()
                .map(|(idx, p)| RankingEntry {
                    rank: idx as u32 + 1,
                    user_id: p.user_id,
                    team: p.team,
                    score: p.score,
                    reward: if p.team == Some(winner) {
                        entry_points * 2
                    } else {
                        0
                    },
                })
                .collect()
        }
    }
}
