//! Player and drawing reports.
//!
//! Drawing reports escalate per distinct reporter: the first strike aborts
//! the current drawer's turn, the second bans them from this room.

use std::time::SystemTime;

use tracing::info;

use crate::dao::models::{NewReport, ReportKind};
use crate::dto::ws::ServerEvent;
use crate::error::ServiceError;
use crate::game::{engine, lifecycle};
use crate::services::{broadcast, room_service};
use crate::state::SharedState;

/// Report another player for their behavior; recorded for moderation, no
/// in-game consequence.
pub async fn report_user(
    state: &SharedState,
    reporter_id: i64,
    room_id: i64,
    target_id: i64,
) -> Result<(), ServiceError> {
    let store = state.room_store().await?;
    room_service::require_active_participant(&store, room_id, reporter_id).await?;
    if store.find_participant(room_id, target_id).await?.is_none() {
        return Err(ServiceError::RoomNotFound);
    }

    let report = store
        .record_report(NewReport {
            room_id,
            target_user_id: target_id,
            kind: ReportKind::User,
            reporter_id,
        })
        .await?;
    info!(room_id, target_id, strikes = report.strike_count, "user reported");
    Ok(())
}

/// Report the current drawing; strikes target the active drawer.
pub async fn report_drawing(
    state: &SharedState,
    reporter_id: i64,
    room_id: i64,
) -> Result<(), ServiceError> {
    let store = state.room_store().await?;
    let room = store
        .find_room(room_id)
        .await?
        .ok_or(ServiceError::RoomNotFound)?;
    room_service::require_active_participant(&store, room_id, reporter_id).await?;
    let Some(drawer_id) = room.current_drawer_id else {
        return Err(ServiceError::WrongPhase);
    };
    if drawer_id == reporter_id {
        return Err(ServiceError::InvalidInput("cannot report yourself".into()));
    }

    let report = store
        .record_report(NewReport {
            room_id,
            target_user_id: drawer_id,
            kind: ReportKind::Drawing,
            reporter_id,
        })
        .await?;
    info!(room_id, drawer_id, strikes = report.strike_count, "drawing reported");

    match report.strike_count {
        0 => Ok(()),
        1 => {
            // First strike: the turn is forfeit.
            engine::abort_drawer_turn(state, &room).await?;
            broadcast::broadcast_room(
                state,
                room_id,
                &ServerEvent::DrawerSkipped { drawer: drawer_id },
            );
            Ok(())
        }
        _ => {
            // Second strike: banned from this room only.
            engine::abort_drawer_turn(state, &room).await?;
            store
                .ban_participant(room_id, drawer_id, SystemTime::now())
                .await?;
            state.ready().remove_user(room_id, drawer_id);
            broadcast::broadcast_room(
                state,
                room_id,
                &ServerEvent::UserBannedFromRoom { user_id: drawer_id },
            );
            if let Some(handle) = state.sessions().socket_for_user(drawer_id) {
                if handle.room_id == Some(room_id) {
                    state.sessions().set_room(handle.socket_id, None);
                    broadcast::send_to_socket(
                        &handle.tx,
                        &ServerEvent::UserBanned { user_id: drawer_id },
                    );
                }
            }
            lifecycle::check_room_after_departure(state, room_id, drawer_id).await
        }
    }
}
