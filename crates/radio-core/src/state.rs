use crate::artwork::NowPlayingView;
use crate::catalog::Channel;
use crate::playback::PlayIndicator;
use crate::protocol::{CatalogStatus, DaemonState};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared read model of the player.  Only the player's event loop writes
/// to it; socket and HTTP handlers read snapshots.
pub struct StateManager {
    state: Arc<RwLock<DaemonState>>,
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl StateManager {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(DaemonState {
                rev: 1,
                ..Default::default()
            })),
        }
    }

    pub async fn get_state(&self) -> DaemonState {
        self.state.read().await.clone()
    }

    pub async fn channels(&self) -> Vec<Channel> {
        self.state.read().await.channels.clone()
    }

    pub async fn set_catalog_loaded(&self, channels: Vec<Channel>) {
        let mut state = self.state.write().await;
        state.catalog = CatalogStatus::Loaded;
        state.channels = channels;
        state.rev += 1;
    }

    pub async fn set_catalog_failed(&self, message: String) {
        let mut state = self.state.write().await;
        state.catalog = CatalogStatus::Failed(message);
        state.channels.clear();
        state.rev += 1;
    }

    pub async fn set_current_channel(&self, channel_id: Option<String>) {
        let mut state = self.state.write().await;
        state.current_channel = channel_id;
        state.rev += 1;
    }

    pub async fn set_now_playing(&self, view: Option<NowPlayingView>) {
        let mut state = self.state.write().await;
        state.now_playing = view;
        state.rev += 1;
    }

    /// Returns true when the indicator actually changed.
    pub async fn set_indicator(&self, indicator: PlayIndicator) -> bool {
        let mut state = self.state.write().await;
        if state.indicator == indicator {
            return false;
        }
        state.indicator = indicator;
        state.rev += 1;
        true
    }
}
