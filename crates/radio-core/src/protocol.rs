use serde::{Deserialize, Serialize};

use crate::artwork::NowPlayingView;
use crate::catalog::Channel;
use crate::playback::PlayIndicator;

/// Current protocol version.  Bump this when the wire format changes in a
/// breaking way.  Clients check this on connect.
pub const PROTOCOL_VERSION: u32 = 1;

/// Messages sent from a presentation client to the player.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    /// Switch to the channel with this id.
    Play { channel_id: String },
    /// Switch to the channel at this catalog position.
    PlayIndex { idx: usize },
    Next,
    Prev,
    Random,
    TogglePause,
    Stop,
    /// The current player image failed to load.
    ArtworkFailed,
    GetState,
}

/// Messages pushed from the player to every client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "broadcast")]
pub enum Broadcast {
    /// Sent immediately on connect: protocol version + full state snapshot.
    Hello {
        protocol_version: u32,
        state: DaemonState,
    },
    State {
        data: DaemonState,
    },
    /// The player panel changed (None = nothing playing).
    NowPlaying {
        view: Option<NowPlayingView>,
    },
    Log {
        message: String,
    },
    Error {
        message: String,
    },
}

/// Whether the catalog is usable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "status", content = "message")]
pub enum CatalogStatus {
    #[default]
    Loading,
    Loaded,
    /// Terminal: channel selection never begins.
    Failed(String),
}

/// Full snapshot of the player.  `rev` increases on every change so
/// clients can detect missed updates.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DaemonState {
    #[serde(default)]
    pub rev: u64,
    pub catalog: CatalogStatus,
    pub channels: Vec<Channel>,
    pub current_channel: Option<String>,
    pub now_playing: Option<NowPlayingView>,
    #[serde(default)]
    pub indicator: PlayIndicator,
}

impl DaemonState {
    pub fn channel_index(&self, channel_id: &str) -> Option<usize> {
        self.channels.iter().position(|c| c.id == channel_id)
    }
}

/// Wrapper for socket communication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Command(Command),
    Broadcast(Broadcast),
}

impl Message {
    /// Length-prefixed frame: u32 big-endian byte count, then JSON.
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        let len = u32::try_from(json.len())?;
        let mut result = Vec::with_capacity(4 + json.len());
        result.extend_from_slice(&len.to_be_bytes());
        result.extend_from_slice(&json);
        Ok(result)
    }

    /// Size of the frame at the front of `data`, header included, once all
    /// of its bytes are present.
    pub fn complete_frame_len(data: &[u8]) -> Option<usize> {
        let header: [u8; 4] = data.get(..4)?.try_into().ok()?;
        let total = 4 + u32::from_be_bytes(header) as usize;
        (data.len() >= total).then_some(total)
    }

    /// Decode one frame from the front of `data`, returning the message and
    /// the number of bytes consumed.
    pub fn decode(data: &[u8]) -> anyhow::Result<(Self, usize)> {
        if data.len() < 4 {
            anyhow::bail!("Insufficient data for length header");
        }
        let Some(total) = Self::complete_frame_len(data) else {
            anyhow::bail!("Insufficient data for message");
        };
        let msg: Self = serde_json::from_slice(&data[4..total])?;
        Ok((msg, total))
    }
}
