//! Keeps the room store connected.
//!
//! One task owns the backend slot and drives a two-state link loop: while
//! the link is down it dials on a fixed pause; once a store is installed it
//! probes the backend on a steady cadence. A failed probe gets a single
//! in-place reconnect; if that also fails the slot is cleared so every
//! other code path answers with degraded-mode errors while dialing starts
//! over. Room state itself needs no replay on reconnect: rooms live in the
//! database and the phase clock re-validates against fresh reads anyway.

use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    dao::room_store::{RoomStore, StoreError},
    state::SharedState,
};

/// How often an installed store is probed.
const PROBE_CADENCE: Duration = Duration::from_secs(4);
/// Pause between dial attempts while the link is down.
const REDIAL_PAUSE: Duration = Duration::from_secs(3);

enum Link {
    Down,
    Up(Arc<dyn RoomStore>),
}

/// Run the supervisor loop; never returns.
pub async fn run<F, Fut>(state: SharedState, mut dial: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn RoomStore>, StoreError>> + Send,
{
    let mut link = Link::Down;
    loop {
        link = match link {
            Link::Down => match dial().await {
                Ok(store) => {
                    state.install_room_store(store.clone()).await;
                    info!("room store online");
                    Link::Up(store)
                }
                Err(err) => {
                    warn!(error = %err, "room store dial failed");
                    sleep(REDIAL_PAUSE).await;
                    Link::Down
                }
            },
            Link::Up(store) => {
                sleep(PROBE_CADENCE).await;
                if store.health_check().await.is_ok() {
                    Link::Up(store)
                } else if store.try_reconnect().await.is_ok() {
                    info!("room store reconnected in place");
                    Link::Up(store)
                } else {
                    warn!("room store lost; entering degraded mode");
                    state.clear_room_store().await;
                    Link::Down
                }
            }
        };
    }
}
