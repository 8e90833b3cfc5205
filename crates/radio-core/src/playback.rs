//! Boundary to the external audio engine.  The session issues intents; the
//! engine reports what it is actually doing and the indicator mirrors it.

use serde::{Deserialize, Serialize};
use std::future::Future;

/// Intents the session sends to the audio engine.
pub trait Playback: Send {
    /// Replace whatever is loaded with `stream_url` and start playing.
    fn load_and_play(&mut self, stream_url: &str) -> impl Future<Output = anyhow::Result<()>> + Send;

    /// Flip between playing and paused.  Does nothing when no stream is loaded.
    fn toggle_play_pause(&mut self) -> impl Future<Output = anyhow::Result<()>> + Send;

    /// Unload the current stream.
    fn stop(&mut self) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// Play/pause transitions reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    Playing,
    Paused,
}

/// Two-state play/pause affordance.  `Play` is shown while the engine is
/// paused or idle, `Pause` while it is playing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PlayIndicator {
    #[default]
    Play,
    Pause,
}

impl PlayIndicator {
    pub fn from_engine(event: EngineEvent) -> Self {
        match event {
            EngineEvent::Playing => PlayIndicator::Pause,
            EngineEvent::Paused => PlayIndicator::Play,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indicator_mirrors_engine() {
        assert_eq!(PlayIndicator::default(), PlayIndicator::Play);
        assert_eq!(PlayIndicator::from_engine(EngineEvent::Playing), PlayIndicator::Pause);
        assert_eq!(PlayIndicator::from_engine(EngineEvent::Paused), PlayIndicator::Play);
    }
}
