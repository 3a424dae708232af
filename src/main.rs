//! Binary entrypoint wiring the REST surface, the WebSocket session layer,
//! and the MongoDB room store together.

use std::{env, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sketch_party_back::config::AppConfig;
use sketch_party_back::dao::room_store::mongodb::{MongoRoomStore, MongoSettings};
use sketch_party_back::dao::room_store::{RoomStore, StoreError};
use sketch_party_back::game::lifecycle;
use sketch_party_back::game::words::StaticWordCatalog;
use sketch_party_back::services::collaborators::{MemoryWallet, NullVoiceRelay};
use sketch_party_back::services::storage_supervisor;
use sketch_party_back::state::{AppState, SharedState};

/// Coins granted to wallets of the built-in dev wallet backend.
const DEV_WALLET_BALANCE: i64 = 1_000;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    // Startup problems retry with delay instead of exiting: the HTTP
    // listener should come up even while configuration is incomplete.
    let config = loop {
        match AppConfig::from_env() {
            Ok(config) => break config,
            Err(err) => {
                warn!(error = %err, "configuration incomplete; retrying");
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        }
    };

    let app_state = AppState::new(
        config,
        Arc::new(StaticWordCatalog),
        Arc::new(MemoryWallet::with_default_balance(DEV_WALLET_BALANCE)),
        Arc::new(NullVoiceRelay),
    );

    spawn_mongo_supervisor(app_state.clone());
    spawn_recovery_gate(app_state.clone());

    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Launch the storage supervisor task maintaining the MongoDB connection.
fn spawn_mongo_supervisor(state: SharedState) {
    tokio::spawn(storage_supervisor::run(state, || async {
        let settings = MongoSettings::from_env().map_err(StoreError::from)?;
        let store = MongoRoomStore::connect(settings).await?;
        Ok::<Arc<dyn RoomStore>, StoreError>(Arc::new(store))
    }));
}

/// Once storage is up: sweep orphaned participants, rebuild phase timers
/// from persisted end times, then open the join gate.
fn spawn_recovery_gate(state: SharedState) {
    tokio::spawn(async move {
        let mut degraded = state.degraded_watcher();
        while *degraded.borrow() {
            if degraded.changed().await.is_err() {
                return;
            }
        }

        if let Err(err) = lifecycle::startup_sweep(&state).await {
            warn!(error = %err, "startup sweep failed");
        }
        state.clock().rebuild(&state).await;
        state.open_join_gate();
        info!("recovery complete; accepting joins");
    });
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    sketch_party_back::routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
