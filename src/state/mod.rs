pub mod ready;
pub mod sessions;

use std::sync::Arc;

use tokio::sync::{watch, RwLock};

use crate::config::AppConfig;
use crate::dao::room_cache::RoomCache;
use crate::dao::room_store::RoomStore;
use crate::error::ServiceError;
use crate::game::clock::PhaseClock;
use crate::game::words::WordCatalog;
use crate::services::collaborators::{CoinWallet, VoiceRelay};

pub use self::ready::ReadySet;
pub use self::sessions::{SessionRegistry, SocketHandle};

pub type SharedState = Arc<AppState>;

/// Central application state: the store slot with its degraded flag, the
/// session registry, the per-room phase timers, the hot-room cache, and the
/// collaborator seams.
pub struct AppState {
    config: AppConfig,
    room_store: RwLock<Option<Arc<dyn RoomStore>>>,
    degraded: watch::Sender<bool>,
    /// Startup gate: joins are refused until the timer rebuild completes.
    accepting: watch::Sender<bool>,
    cache: RoomCache,
    sessions: SessionRegistry,
    ready: ReadySet,
    clock: PhaseClock,
    word_catalog: Arc<dyn WordCatalog>,
    wallet: Arc<dyn CoinWallet>,
    voice: Arc<dyn VoiceRelay>,
}

impl AppState {
    /// Construct the shared state. The application starts degraded (no
    /// store) and gated (no joins) until the supervisor installs a backend
    /// and the rebuild sweep finishes.
    pub fn new(
        config: AppConfig,
        word_catalog: Arc<dyn WordCatalog>,
        wallet: Arc<dyn CoinWallet>,
        voice: Arc<dyn VoiceRelay>,
    ) -> SharedState {
        let (degraded_tx, _) = watch::channel(true);
        let (accepting_tx, _) = watch::channel(false);
        let cache = RoomCache::new(config.cache_ttl);
        Arc::new(Self {
            config,
            room_store: RwLock::new(None),
            degraded: degraded_tx,
            accepting: accepting_tx,
            cache,
            sessions: SessionRegistry::new(),
            ready: ReadySet::new(),
            clock: PhaseClock::new(),
            word_catalog,
            wallet,
            voice,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Handle to the current store, or the degraded-mode error.
    pub async fn room_store(&self) -> Result<Arc<dyn RoomStore>, ServiceError> {
        let guard = self.room_store.read().await;
        guard.as_ref().cloned().ok_or(ServiceError::Degraded)
    }

    /// Install a backend and leave degraded mode.
    pub async fn install_room_store(&self, store: Arc<dyn RoomStore>) {
        {
            let mut guard = self.room_store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false);
    }

    /// Remove the backend and enter degraded mode.
    pub async fn clear_room_store(&self) {
        {
            let mut guard = self.room_store.write().await;
            guard.take();
        }
        self.update_degraded(true);
    }

    pub async fn is_degraded(&self) -> bool {
        let guard = self.room_store.read().await;
        guard.is_none()
    }

    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    fn update_degraded(&self, value: bool) {
        let _ = self.degraded.send(value);
    }

    /// Whether the startup gate has opened for new joins.
    pub fn accepting_joins(&self) -> bool {
        *self.accepting.borrow()
    }

    /// Flip the gate once the rebuild sweep finished.
    pub fn open_join_gate(&self) {
        let _ = self.accepting.send(true);
    }

    pub fn cache(&self) -> &RoomCache {
        &self.cache
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn ready(&self) -> &ReadySet {
        &self.ready
    }

    pub fn clock(&self) -> &PhaseClock {
        &self.clock
    }

    pub fn word_catalog(&self) -> Arc<dyn WordCatalog> {
        self.word_catalog.clone()
    }

    pub fn wallet(&self) -> Arc<dyn CoinWallet> {
        self.wallet.clone()
    }

    pub fn voice(&self) -> Arc<dyn VoiceRelay> {
        self.voice.clone()
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use crate::dao::room_store::memory::MemoryRoomStore;
    use crate::game::words::StaticWordCatalog;
    use crate::services::collaborators::{MemoryWallet, NullVoiceRelay};

    /// State wired to the in-memory backend with the join gate open.
    pub async fn state_with_memory_store() -> (SharedState, Arc<MemoryRoomStore>) {
        let store = Arc::new(MemoryRoomStore::new());
        let state = AppState::new(
            AppConfig::for_tests(),
            Arc::new(StaticWordCatalog),
            Arc::new(MemoryWallet::with_default_balance(1_000)),
            Arc::new(NullVoiceRelay),
        );
        state.install_room_store(store.clone()).await;
        state.open_join_gate();
        (state, store)
    }
}
