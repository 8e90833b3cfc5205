/// PlayerCore: single-owner event loop for all mutable player state.
///
/// Every input arrives as a `PlayerEvent` on one mpsc channel: client
/// commands from the socket and HTTP servers, session ticks and metadata
/// resolutions, mpv events, and the heartbeat.  PlayerCore owns the
/// `SessionManager` (and through it the audio engine); no other task
/// touches them.  After each change it updates the shared `StateManager`
/// and pushes a `BroadcastMessage` to every listener.
use std::future::Future;
use std::sync::Arc;

use radio_core::artwork::NowPlayingView;
use radio_core::catalog::{load_catalog, Channel};
use radio_core::config::Config;
use radio_core::metadata::MetadataResolver;
use radio_core::playback::{PlayIndicator, Playback};
use radio_core::protocol::{CatalogStatus, Command};
use radio_core::session::{SessionEvent, SessionManager};
use radio_core::state::StateManager;
use rand::Rng;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::mpv::{EngineObservation, MpvEvent, MpvPlayback};
use crate::BroadcastMessage;

const HEARTBEAT_SECS: u64 = 10;

/// All inputs into the PlayerCore loop.
#[derive(Debug)]
pub enum PlayerEvent {
    /// A command from a socket client or the HTTP API.
    ClientCommand(Command),
    /// Poll tick or metadata resolution from the session.
    Session(SessionEvent),
    /// Unsolicited mpv event (forwarded from the reader task).
    Mpv(MpvEvent),
    /// Check engine process liveness.
    HeartbeatTick,
    Shutdown,
}

/// Process-level control of the audio engine on top of `Playback`.
pub trait Engine: Playback {
    /// Forget a dead engine process.  Returns true when one was running.
    fn reap_if_dead(&mut self) -> bool;

    fn shutdown(&mut self) -> impl Future<Output = ()> + Send;
}

impl Engine for MpvPlayback {
    fn reap_if_dead(&mut self) -> bool {
        MpvPlayback::reap_if_dead(self)
    }

    async fn shutdown(&mut self) {
        MpvPlayback::shutdown(self).await
    }
}

pub struct PlayerCore<E: Engine> {
    catalog_source: String,
    client: reqwest::Client,
    state_manager: Arc<StateManager>,
    session: SessionManager<E>,
    observed: EngineObservation,
    event_tx: mpsc::Sender<PlayerEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
}

impl PlayerCore<MpvPlayback> {
    pub fn new(
        config: &Config,
        client: reqwest::Client,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
        event_tx: mpsc::Sender<PlayerEvent>,
    ) -> Self {
        let (mpv_tx, mpv_rx) = mpsc::channel::<MpvEvent>(64);
        forward(mpv_rx, event_tx.clone(), PlayerEvent::Mpv);
        let engine = MpvPlayback::new(config.mpv.volume, mpv_tx);
        Self::with_engine(config, client, engine, broadcast_tx, event_tx)
    }
}

impl<E: Engine> PlayerCore<E> {
    pub fn with_engine(
        config: &Config,
        client: reqwest::Client,
        engine: E,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
        event_tx: mpsc::Sender<PlayerEvent>,
    ) -> Self {
        let (session_tx, session_rx) = mpsc::channel::<SessionEvent>(64);
        forward(session_rx, event_tx.clone(), PlayerEvent::Session);

        let resolver = MetadataResolver::new(client.clone(), config.server.clone());
        let session = SessionManager::new(resolver, config.server.clone(), engine, session_tx);

        Self {
            catalog_source: config.catalog_source(),
            client,
            state_manager: Arc::new(StateManager::new()),
            session,
            observed: EngineObservation::default(),
            event_tx,
            broadcast_tx,
        }
    }

    pub fn state_manager(&self) -> Arc<StateManager> {
        Arc::clone(&self.state_manager)
    }

    /// Load the catalog, then run until `Shutdown` or until every sender
    /// is gone.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<PlayerEvent>) -> anyhow::Result<()> {
        info!("PlayerCore: starting event loop");
        self.load_catalog().await;

        let heartbeat_tx = self.event_tx.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(tokio::time::Duration::from_secs(HEARTBEAT_SECS)).await;
                if heartbeat_tx.send(PlayerEvent::HeartbeatTick).await.is_err() {
                    break;
                }
            }
        });

        loop {
            match event_rx.recv().await {
                None => {
                    info!("PlayerCore: event channel closed, shutting down");
                    break;
                }
                Some(PlayerEvent::Shutdown) => {
                    info!("PlayerCore: shutdown requested");
                    break;
                }
                Some(PlayerEvent::ClientCommand(cmd)) => {
                    info!("PlayerCore: command {:?}", cmd);
                    if let Err(e) = self.handle_command(cmd).await {
                        error!("PlayerCore: command error: {}", e);
                        let _ = self.broadcast_tx.send(BroadcastMessage::Error(e.to_string()));
                    }
                }
                Some(PlayerEvent::Session(evt)) => self.handle_session_event(evt).await,
                Some(PlayerEvent::Mpv(evt)) => self.handle_mpv_event(evt).await,
                Some(PlayerEvent::HeartbeatTick) => {
                    if self.session.playback_mut().reap_if_dead() {
                        self.observed = EngineObservation::default();
                        self.sync_indicator().await;
                    }
                }
            }
        }

        self.cleanup().await;
        Ok(())
    }

    // ── catalog ───────────────────────────────────────────────────────────────

    /// One attempt, no retry.  A failure leaves the player without channels
    /// for the rest of the process.
    async fn load_catalog(&mut self) {
        match load_catalog(&self.client, &self.catalog_source).await {
            Ok(channels) => {
                info!("PlayerCore: {} channels loaded", channels.len());
                self.state_manager.set_catalog_loaded(channels).await;
            }
            Err(e) => {
                error!("PlayerCore: catalog load from {} failed: {}", self.catalog_source, e);
                self.state_manager
                    .set_catalog_failed(format!("Could not load channels: {}", e))
                    .await;
            }
        }
        let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
    }

    async fn channels(&self) -> anyhow::Result<Vec<Channel>> {
        let state = self.state_manager.get_state().await;
        match state.catalog {
            CatalogStatus::Loaded => Ok(state.channels),
            CatalogStatus::Loading => anyhow::bail!("Channels are still loading"),
            CatalogStatus::Failed(message) => anyhow::bail!(message),
        }
    }

    // ── commands ──────────────────────────────────────────────────────────────

    async fn handle_command(&mut self, cmd: Command) -> anyhow::Result<()> {
        match cmd {
            Command::Play { channel_id } => {
                let channel = self
                    .channels()
                    .await?
                    .into_iter()
                    .find(|c| c.id == channel_id)
                    .ok_or_else(|| anyhow::anyhow!("Unknown channel {}", channel_id))?;
                self.switch_to(channel).await?
            }
            Command::PlayIndex { idx } => {
                let channel = self
                    .channels()
                    .await?
                    .get(idx)
                    .cloned()
                    .ok_or_else(|| anyhow::anyhow!("No channel at index {}", idx))?;
                self.switch_to(channel).await?
            }
            Command::Next => self.step(1).await?,
            Command::Prev => self.step(-1).await?,
            Command::Random => self.random().await?,
            Command::TogglePause => self.session.toggle_play_pause().await?,
            Command::Stop => self.stop().await?,
            Command::ArtworkFailed => {
                if let Some(view) = self.session.mark_artwork_failed() {
                    debug!("PlayerCore: artwork failed for {}", view.channel_id);
                    self.publish(Some(view)).await;
                }
            }
            // socket clients are answered directly, anything else gets a refresh
            Command::GetState => {
                let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
            }
        }
        Ok(())
    }

    /// The session is switched even when the engine then fails to load, so
    /// the display and state are updated before the error is returned.
    async fn switch_to(&mut self, channel: Channel) -> anyhow::Result<()> {
        let channel_id = channel.id.clone();
        let result = self.session.switch_to(channel).await;
        self.state_manager.set_current_channel(Some(channel_id)).await;
        self.publish(self.session.view().cloned()).await;
        result
    }

    async fn step(&mut self, delta: isize) -> anyhow::Result<()> {
        let channels = self.channels().await?;
        if channels.is_empty() {
            anyhow::bail!("No channels available");
        }
        let len = channels.len() as isize;
        let current = self
            .session
            .current_channel()
            .and_then(|cur| channels.iter().position(|c| c.id == cur.id));
        let idx = match current {
            Some(i) => (i as isize + delta).rem_euclid(len),
            None if delta >= 0 => 0,
            None => len - 1,
        };
        self.switch_to(channels[idx as usize].clone()).await
    }

    async fn random(&mut self) -> anyhow::Result<()> {
        let channels = self.channels().await?;
        let current_id = self.session.current_channel().map(|c| c.id.clone());
        let candidates: Vec<&Channel> = channels
            .iter()
            .filter(|c| channels.len() == 1 || Some(&c.id) != current_id.as_ref())
            .collect();
        if candidates.is_empty() {
            anyhow::bail!("No channels available");
        }
        let pick = candidates[rand::thread_rng().gen_range(0..candidates.len())].clone();
        self.switch_to(pick).await
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        let result = self.session.stop().await;
        self.state_manager.set_current_channel(None).await;
        self.publish(None).await;
        result
    }

    // ── session / engine events ───────────────────────────────────────────────

    async fn handle_session_event(&mut self, evt: SessionEvent) {
        if let Some(view) = self.session.handle_event(evt) {
            debug!("PlayerCore: now playing {} / {}", view.title, view.subtitle);
            self.publish(Some(view)).await;
        }
    }

    async fn handle_mpv_event(&mut self, evt: MpvEvent) {
        if self.observed.apply(&evt) {
            debug!("PlayerCore: engine {:?}", self.observed);
            self.sync_indicator().await;
        }
    }

    async fn sync_indicator(&mut self) {
        let indicator = PlayIndicator::from_engine(self.observed.engine_event());
        if self.state_manager.set_indicator(indicator).await {
            let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
        }
    }

    async fn publish(&self, view: Option<NowPlayingView>) {
        self.state_manager.set_now_playing(view.clone()).await;
        let _ = self.broadcast_tx.send(BroadcastMessage::NowPlaying(view));
        let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
    }

    async fn cleanup(&mut self) {
        if let Err(e) = self.session.stop().await {
            warn!("PlayerCore: stop on shutdown failed: {}", e);
        }
        self.session.playback_mut().shutdown().await;
    }
}

/// Pipe a typed channel into the core's event channel.
fn forward<T: Send + 'static>(
    mut rx: mpsc::Receiver<T>,
    core_tx: mpsc::Sender<PlayerEvent>,
    wrap: fn(T) -> PlayerEvent,
) {
    tokio::spawn(async move {
        while let Some(item) = rx.recv().await {
            if core_tx.send(wrap(item)).await.is_err() {
                break;
            }
        }
    });
}
