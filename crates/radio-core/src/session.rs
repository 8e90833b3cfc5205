//! Channel session: which channel is current, the poll timer scoped to it,
//! and the display state derived from its metadata.
//!
//! ```text
//!   switch_to(channel)
//!         │
//!         ├── epoch += 1, old PollTimer cancelled
//!         ├── ChannelFallback published, one resolution spawned
//!         ├── new PollTimer ── every 15 s ──► SessionEvent::PollTick(ticket)
//!         └── Playback::load_and_play(stream_url)
//!
//!   resolution task ──► SessionEvent::Resolved { ticket, seq, now_playing }
//! ```
//!
//! Every tick and resolution carries the `PollTicket` it was issued under.
//! `handle_event` drops anything whose ticket no longer matches the session
//! at the moment it is handled, so a fetch started for an earlier channel
//! can never overwrite the display of a later one.  Within one ticket,
//! resolutions are numbered in the order their fetches started; one that
//! finishes after a later-started fetch was applied is dropped.
//!
//! All methods are meant to be called from a single event-loop task.

use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::artwork::{DisplayImage, NowPlayingView};
use crate::catalog::Channel;
use crate::config::ServerConfig;
use crate::metadata::{MetadataResolver, NowPlaying};
use crate::playback::Playback;

pub const POLL_INTERVAL_MS: u64 = 15_000;

/// Identifies the session a tick or resolution belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollTicket {
    pub channel_id: String,
    pub epoch: u64,
}

#[derive(Debug)]
pub enum SessionEvent {
    PollTick(PollTicket),
    Resolved {
        ticket: PollTicket,
        /// Fetch order, increasing across the whole session.
        seq: u64,
        now_playing: NowPlaying,
    },
}

// ── poll timer ────────────────────────────────────────────────────────────────

/// Repeating task that emits `PollTick` every `period`, first tick one
/// period after start.  Cancelled on drop.
pub struct PollTimer {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl PollTimer {
    pub fn start(ticket: PollTicket, period: Duration, events: mpsc::Sender<SessionEvent>) -> Self {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let first = Instant::now() + period;

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(first, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = interval.tick() => {
                        if events.send(SessionEvent::PollTick(ticket.clone())).await.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!("[session] poll timer for {} stopped", ticket.channel_id);
        });

        Self { token, task }
    }

    pub fn cancel(self) {
        drop(self);
    }

    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled() && !self.task.is_finished()
    }
}

impl Drop for PollTimer {
    fn drop(&mut self) {
        self.token.cancel();
        self.task.abort();
    }
}

/// How many poll timers have been armed and cancelled over the process
/// lifetime.  `armed - cancelled` is never more than one.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimerStats {
    pub armed: u64,
    pub cancelled: u64,
}

// ── session ───────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Session {
    current: Option<Channel>,
    epoch: u64,
    timer: Option<PollTimer>,
    stats: TimerStats,
    /// Last resolution sequence number handed out.
    issued: u64,
    /// Sequence number of the newest resolution applied.
    applied: u64,
}

impl Session {
    fn ticket(&self) -> Option<PollTicket> {
        self.current.as_ref().map(|c| PollTicket {
            channel_id: c.id.clone(),
            epoch: self.epoch,
        })
    }

    fn is_current(&self, ticket: &PollTicket) -> bool {
        ticket.epoch == self.epoch
            && self
                .current
                .as_ref()
                .is_some_and(|c| c.id == ticket.channel_id)
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
            self.stats.cancelled += 1;
        }
    }

    fn arm_timer(&mut self, ticket: PollTicket, events: mpsc::Sender<SessionEvent>) {
        debug_assert!(self.timer.is_none());
        self.timer = Some(PollTimer::start(
            ticket,
            Duration::from_millis(POLL_INTERVAL_MS),
            events,
        ));
        self.stats.armed += 1;
    }
}

// ── manager ───────────────────────────────────────────────────────────────────

pub struct SessionManager<P: Playback> {
    session: Session,
    resolver: MetadataResolver,
    server: ServerConfig,
    playback: P,
    events: mpsc::Sender<SessionEvent>,
    view: Option<NowPlayingView>,
}

impl<P: Playback> SessionManager<P> {
    /// `events` must be drained by the caller and fed back into
    /// `handle_event`.
    pub fn new(
        resolver: MetadataResolver,
        server: ServerConfig,
        playback: P,
        events: mpsc::Sender<SessionEvent>,
    ) -> Self {
        Self {
            session: Session::default(),
            resolver,
            server,
            playback,
            events,
            view: None,
        }
    }

    pub fn current_channel(&self) -> Option<&Channel> {
        self.session.current.as_ref()
    }

    pub fn view(&self) -> Option<&NowPlayingView> {
        self.view.as_ref()
    }

    pub fn timer_stats(&self) -> TimerStats {
        self.session.stats
    }

    pub fn has_active_timer(&self) -> bool {
        self.session.timer.as_ref().is_some_and(PollTimer::is_active)
    }

    pub fn playback(&self) -> &P {
        &self.playback
    }

    pub fn playback_mut(&mut self) -> &mut P {
        &mut self.playback
    }

    /// Make `channel` current.  The session is fully switched (old timer
    /// gone, fallback published, new timer armed) before the engine is
    /// asked to play; an engine error is returned but leaves the session
    /// in place.
    pub async fn switch_to(&mut self, channel: Channel) -> anyhow::Result<()> {
        info!("[session] switching to {} ({})", channel.title, channel.id);

        self.session.current = Some(channel.clone());
        self.session.epoch += 1;
        self.session.cancel_timer();

        let ticket = PollTicket {
            channel_id: channel.id.clone(),
            epoch: self.session.epoch,
        };

        self.view = Some(NowPlayingView::render(&channel, NowPlaying::ChannelFallback));
        self.spawn_resolution(ticket.clone(), channel.clone());

        self.session.arm_timer(ticket, self.events.clone());

        let stream_url = self.server.stream_url(&channel.id);
        self.playback.load_and_play(&stream_url).await
    }

    /// Apply a tick or resolution.  Returns the new view when the display
    /// changed.
    pub fn handle_event(&mut self, event: SessionEvent) -> Option<NowPlayingView> {
        match event {
            SessionEvent::PollTick(ticket) => {
                if !self.session.is_current(&ticket) {
                    debug!("[session] dropping stale tick for {}", ticket.channel_id);
                    return None;
                }
                if let Some(channel) = self.session.current.clone() {
                    self.spawn_resolution(ticket, channel);
                }
                None
            }
            SessionEvent::Resolved {
                ticket,
                seq,
                now_playing,
            } => {
                if !self.session.is_current(&ticket) {
                    debug!(
                        "[session] discarding stale metadata for {} (epoch {})",
                        ticket.channel_id, ticket.epoch
                    );
                    return None;
                }
                if seq < self.session.applied {
                    debug!(
                        "[session] discarding out-of-order metadata for {} (seq {} < {})",
                        ticket.channel_id, seq, self.session.applied
                    );
                    return None;
                }
                self.session.applied = seq;
                let channel = self.session.current.as_ref()?;
                let mut view = NowPlayingView::render(channel, now_playing);
                if let Some(current) = &self.view {
                    // same song, same broken image: keep the placeholder
                    if current.image.errored && current.now_playing == view.now_playing {
                        view.image = current.image.clone();
                    }
                }
                if self.view.as_ref() == Some(&view) {
                    return None;
                }
                self.view = Some(view.clone());
                Some(view)
            }
        }
    }

    /// Flip play/pause on the engine.  Ignored while no channel is current.
    pub async fn toggle_play_pause(&mut self) -> anyhow::Result<()> {
        if self.session.current.is_none() {
            debug!("[session] toggle ignored, nothing playing");
            return Ok(());
        }
        self.playback.toggle_play_pause().await
    }

    /// Tear the session down: timer cancelled, channel and display cleared,
    /// engine stopped.
    pub async fn stop(&mut self) -> anyhow::Result<()> {
        self.session.cancel_timer();
        if self.session.current.take().is_some() {
            self.session.epoch += 1;
            info!("[session] stopped");
        }
        self.view = None;
        self.playback.stop().await
    }

    /// The presentation layer could not load the current image.
    pub fn mark_artwork_failed(&mut self) -> Option<NowPlayingView> {
        let view = self.view.as_mut()?;
        if view.image.errored {
            return None;
        }
        view.image = DisplayImage::failed();
        Some(view.clone())
    }

    /// Ticket for the current session, if any.
    pub fn ticket(&self) -> Option<PollTicket> {
        self.session.ticket()
    }

    fn spawn_resolution(&mut self, ticket: PollTicket, channel: Channel) {
        self.session.issued += 1;
        let seq = self.session.issued;
        let resolver = self.resolver.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let now_playing = resolver.resolve(&channel).await;
            if events
                .send(SessionEvent::Resolved {
                    ticket,
                    seq,
                    now_playing,
                })
                .await
                .is_err()
            {
                debug!("[session] event loop gone, dropping resolution");
            }
        });
    }
}
