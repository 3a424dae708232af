use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Lifecycle status of a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    /// Freshly created, owner is assembling players.
    Lobby,
    /// Everyone is in, waiting for the owner to start.
    Waiting,
    /// A game is in progress.
    Playing,
    /// The last game concluded normally.
    Finished,
    /// The room was shut down (insufficient players, owner left).
    Closed,
}

/// Sub-phase of a running round.
///
/// `InternalProcessing` is a short-lived sentinel claimed before any
/// multi-step work that must not be redone by a racing caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RoundPhase {
    SelectingDrawer,
    ChoosingWord,
    Drawing,
    Reveal,
    Interval,
    #[serde(rename = "_internal_processing")]
    InternalProcessing,
    IntervalEnding,
}

/// Team assignment in team mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Team {
    Blue,
    Orange,
}

/// How scoring and rotation behave for a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum GameMode {
    /// Free-for-all: every non-drawer guesses for themselves.
    Solo,
    /// Two teams; the drawer's team guesses, first correct wins the round.
    Team,
}

/// Hard ceiling on points a single round can award to one participant.
pub const MAX_POINTS_PER_ROUND: i32 = 20;

/// Seconds the owner sees the chosen drawer before word selection starts.
pub const SELECTING_DRAWER_SECS: u64 = 5;
pub const CHOOSING_WORD_SECS: u64 = 10;
pub const DRAWING_SECS: u64 = 80;
pub const REVEAL_SECS: u64 = 7;
pub const INTERVAL_SECS: u64 = 4;
/// Pause between `game_ended` and the automatic return to lobby.
pub const INTERVAL_ENDING_SECS: u64 = 2;
/// Idle time a lobby may sit unstarted before the owner is prodded.
pub const LOBBY_TIMEOUT_SECS: u64 = 120;

/// Word-choice failures a drawer is allowed before being removed.
pub const ELIMINATION_ALLOWANCE: i32 = 3;
/// Voluntary skips a drawer is allowed before being removed.
pub const SKIP_ALLOWANCE: i32 = 3;

impl RoundPhase {
    /// Stable wire/storage name of the phase.
    pub fn as_str(self) -> &'static str {
        match self {
            RoundPhase::SelectingDrawer => "selecting_drawer",
            RoundPhase::ChoosingWord => "choosing_word",
            RoundPhase::Drawing => "drawing",
            RoundPhase::Reveal => "reveal",
            RoundPhase::Interval => "interval",
            RoundPhase::InternalProcessing => "_internal_processing",
            RoundPhase::IntervalEnding => "interval_ending",
        }
    }

    /// Authoritative duration for phases driven by the clock.
    ///
    /// The sentinel has no timer; it is released by the caller that claimed it.
    pub fn duration(self) -> Option<Duration> {
        let secs = match self {
            RoundPhase::SelectingDrawer => SELECTING_DRAWER_SECS,
            RoundPhase::ChoosingWord => CHOOSING_WORD_SECS,
            RoundPhase::Drawing => DRAWING_SECS,
            RoundPhase::Reveal => REVEAL_SECS,
            RoundPhase::Interval => INTERVAL_SECS,
            RoundPhase::IntervalEnding => INTERVAL_ENDING_SECS,
            RoundPhase::InternalProcessing => return None,
        };
        Some(Duration::from_secs(secs))
    }

    pub fn is_timed(self) -> bool {
        self.duration().is_some()
    }
}

impl RoomStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RoomStatus::Lobby => "lobby",
            RoomStatus::Waiting => "waiting",
            RoomStatus::Playing => "playing",
            RoomStatus::Finished => "finished",
            RoomStatus::Closed => "closed",
        }
    }

    /// Settings and team changes are only allowed before a game starts.
    pub fn accepts_setup_changes(self) -> bool {
        matches!(self, RoomStatus::Lobby | RoomStatus::Waiting)
    }
}

impl Team {
    pub fn as_str(self) -> &'static str {
        match self {
            Team::Blue => "blue",
            Team::Orange => "orange",
        }
    }
}

impl GameMode {
    pub fn as_str(self) -> &'static str {
        match self {
            GameMode::Solo => "solo",
            GameMode::Team => "team",
        }
    }
}

/// Client-visible whole seconds left in a phase: `max(0, ceil((end - now) / 1s))`.
pub fn remaining_secs(end: SystemTime, now: SystemTime) -> u64 {
    match end.duration_since(now) {
        Ok(left) => left.as_millis().div_ceil(1000) as u64,
        Err(_) => 0,
    }
}

/// Epoch milliseconds for wire payloads.
pub fn epoch_millis(at: SystemTime) -> i64 {
    match at.duration_since(SystemTime::UNIX_EPOCH) {
        Ok(since) => since.as_millis() as i64,
        Err(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_has_no_timer() {
        assert_eq!(RoundPhase::InternalProcessing.duration(), None);
        assert!(!RoundPhase::InternalProcessing.is_timed());
    }

    #[test]
    fn timed_phase_durations() {
        assert_eq!(
            RoundPhase::Drawing.duration(),
            Some(Duration::from_secs(80))
        );
        assert_eq!(
            RoundPhase::ChoosingWord.duration(),
            Some(Duration::from_secs(10))
        );
        assert_eq!(
            RoundPhase::IntervalEnding.duration(),
            Some(Duration::from_secs(2))
        );
    }

    #[test]
    fn remaining_rounds_up_partial_seconds() {
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(100);
        let end = now + Duration::from_millis(4200);
        assert_eq!(remaining_secs(end, now), 5);
    }

    #[test]
    fn remaining_clamps_to_zero_after_end() {
        let end = SystemTime::UNIX_EPOCH + Duration::from_secs(100);
        let now = end + Duration::from_secs(3);
        assert_eq!(remaining_secs(end, now), 0);
    }

    #[test]
    fn setup_changes_rejected_once_playing() {
        assert!(RoomStatus::Lobby.accepts_setup_changes());
        assert!(RoomStatus::Waiting.accepts_setup_changes());
        assert!(!RoomStatus::Playing.accepts_setup_changes());
        assert!(!RoomStatus::Closed.accepts_setup_changes());
    }
}
