use std::sync::Arc;

use tokio::sync::broadcast;

use bz_core::{BzResult, LiveEvent, RecordStore};
use bz_storage::SqliteRecordStore;

use crate::auth::AuthConfig;

pub const DEFAULT_LIVE_CHANNEL_CAPACITY: usize = 256;

/// Shared application state.
pub struct AppState {
    pub store: Arc<dyn RecordStore>,
    /// Change feed the store publishes to; websocket clients subscribe here.
    pub live_tx: broadcast::Sender<LiveEvent>,
    /// Fired once when the server stops; open live feeds send CLOSE and end.
    pub shutdown_tx: broadcast::Sender<()>,
    pub auth: AuthConfig,
}

impl AppState {
    pub fn new(
        store: Arc<dyn RecordStore>,
        live_tx: broadcast::Sender<LiveEvent>,
        auth: AuthConfig,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            store,
            live_tx,
            shutdown_tx,
            auth,
        }
    }

    /// End every open live feed.
    pub fn shutdown(&self) {
        // No open feeds is not an error.
        let _ = self.shutdown_tx.send(());
    }

    /// State over a fresh in-memory database wired to its own change feed.
    pub fn in_memory(auth: AuthConfig) -> BzResult<Self> {
        let (live_tx, _) = broadcast::channel(DEFAULT_LIVE_CHANNEL_CAPACITY);
        let store = SqliteRecordStore::open_in_memory()?.with_change_feed(live_tx.clone());
        Ok(Self::new(Arc::new(store), live_tx, auth))
    }
}
