//! Fair drawer rotation.
//!
//! Sorted-by-user-id participants define the order. `drawn_user_ids` tracks
//! who has drawn in the current cycle; once everyone has drawn, the set
//! resets and a new cycle begins.

use crate::dao::models::{ParticipantEntity, RoomEntity};
use crate::game::phases::{GameMode, Team};

/// Result of choosing the next drawer; persisted atomically with the
/// selecting_drawer transition.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawerSelection {
    pub drawer_id: i64,
    pub pointer_index: u32,
    /// Post-selection cycle set (reset first if everyone had drawn).
    pub drawn_user_ids: Vec<i64>,
}

/// Choose the next drawer, or `None` when no active participants remain.
pub fn select_drawer(
    room: &RoomEntity,
    participants: &[ParticipantEntity],
) -> Option<DrawerSelection> {
    let order = rotation_order(room.game_mode, participants);
    if order.is_empty() {
        return None;
    }

    let pointer = room.drawer_pointer_index as usize % order.len();
    let mut drawn: Vec<i64> = room
        .drawn_user_ids
        .iter()
        .copied()
        .filter(|id| order.contains(id))
        .collect();

    // Scan the ring from the pointer for someone who has not drawn yet.
    let candidate = (0..order.len())
        .map(|offset| (pointer + offset) % order.len())
        .find(|&idx| !drawn.contains(&order[idx]));

    let chosen_idx = match candidate {
        Some(idx) => idx,
        None => {
            // Everyone drew this cycle; start the next one at the pointer.
            drawn.clear();
            pointer
        }
    };

    let drawer_id = order[chosen_idx];
    drawn.push(drawer_id);

    Some(DrawerSelection {
        drawer_id,
        pointer_index: ((chosen_idx + 1) % order.len()) as u32,
        drawn_user_ids: drawn,
    })
}

/// Rotation order for the mode: flat sorted ids in solo, the alternating
/// blue/orange merge in team mode (flat again when a team is empty).
fn rotation_order(mode: GameMode, participants: &[ParticipantEntity]) -> Vec<i64> {
    let mut active: Vec<&ParticipantEntity> =
        participants.iter().filter(|p| p.is_active).collect();
    active.sort_by_key(|p| p.user_id);

    if mode == GameMode::Solo {
        return active.iter().map(|p| p.user_id).collect();
    }

    let blue: Vec<i64> = active
        .iter()
        .filter(|p| p.team == Some(Team::Blue))
        .map(|p| p.user_id)
        .collect();
    let orange: Vec<i64> = active
        .iter()
        .filter(|p| p.team == Some(Team::Orange))
        .map(|p| p.user_id)
        .collect();

    if blue.is_empty() || orange.is_empty() {
        return active.iter().map(|p| p.user_id).collect();
    }

    let mut order = Vec::with_capacity(blue.len() + orange.len());
    let mut blue_iter = blue.into_iter();
    let mut orange_iter = orange.into_iter();
    loop {
        match (blue_iter.next(), orange_iter.next()) {
            (None, None) => break,
            (blue_next, orange_next) => {
                order.extend(blue_next);
                order.extend(orange_next);
            }
        }
    }
    order
}
