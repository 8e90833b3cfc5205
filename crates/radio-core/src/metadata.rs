//! Live metadata feed: fetching, parsing and "now playing" selection.
//!
//! The feed's timestamps run ahead of what the listener hears by the
//! stream's broadcast delay, so selection happens against
//! `now - BROADCAST_DELAY_MS`, never against wall-clock now.

use chrono::{DateTime, NaiveDateTime, TimeDelta, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::catalog::Channel;
use crate::config::ServerConfig;
use crate::error::MetadataError;

/// Lag between a feed timestamp and the moment it is audible.
pub const BROADCAST_DELAY_MS: i64 = 25_000;

pub const SONG_FLAG: &str = "SONG";

/// One entry from the live item list.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataEvent {
    pub timestamp: DateTime<Utc>,
    pub cut_flags: Vec<String>,
    pub name: String,
    pub artist_name: String,
    pub artwork: Option<String>,
}

impl MetadataEvent {
    pub fn is_song(&self) -> bool {
        self.cut_flags.iter().any(|f| f == SONG_FLAG)
    }
}

/// What the listener is hearing right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NowPlaying {
    Song {
        name: String,
        artist_name: String,
        artwork: Option<String>,
    },
    /// No eligible song; show the channel itself.
    ChannelFallback,
}

// ── feed parsing ──────────────────────────────────────────────────────────────

/// Pull the live items out of a metadata document.  Every level is
/// optional: a shape mismatch yields an empty list, and items with an
/// unreadable timestamp are dropped.
pub fn live_items(doc: &Value) -> Vec<MetadataEvent> {
    let Some(items) = doc["streams"][0]["metadata"]["live"]["items"].as_array() else {
        debug!("[metadata] document has no live items");
        return Vec::new();
    };

    items.iter().filter_map(parse_item).collect()
}

fn parse_item(item: &Value) -> Option<MetadataEvent> {
    let timestamp = parse_timestamp(&item["timestamp"])?;

    let cut_flags = match &item["cutFlags"] {
        Value::Array(flags) => flags
            .iter()
            .filter_map(|f| f.as_str())
            .map(|f| f.to_string())
            .collect(),
        Value::String(s) => s
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|f| !f.is_empty())
            .map(|f| f.to_string())
            .collect(),
        _ => Vec::new(),
    };

    let text = |key: &str| item[key].as_str().unwrap_or_default().to_string();

    let artwork = item["images"]["tile"]["aspect_1x1"]["preferredImage"]["url"]
        .as_str()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    Some(MetadataEvent {
        timestamp,
        cut_flags,
        name: text("name"),
        artist_name: text("artistName"),
        artwork,
    })
}

/// Accepts RFC 3339, naive ISO-8601 (read as UTC) and epoch milliseconds,
/// either as a JSON number or a numeric string.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            if let Ok(ms) = s.parse::<i64>() {
                return Utc.timestamp_millis_opt(ms).single();
            }
            ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
                .map(|naive| naive.and_utc())
        }
        _ => None,
    }
}

// ── selection ─────────────────────────────────────────────────────────────────

/// Pick the song the listener is hearing at wall-clock `now`.
///
/// Eligible items are songs that aired at or before `now - delay`; of
/// those, the one with the latest timestamp wins regardless of list order.
/// Equal timestamps resolve to the later list entry.
pub fn select_now_playing(items: &[MetadataEvent], now: DateTime<Utc>) -> NowPlaying {
    let effective_now = now - TimeDelta::milliseconds(BROADCAST_DELAY_MS);

    items
        .iter()
        .filter(|item| item.is_song() && item.timestamp <= effective_now)
        .max_by_key(|item| item.timestamp)
        .map(|item| NowPlaying::Song {
            name: item.name.clone(),
            artist_name: item.artist_name.clone(),
            artwork: item.artwork.clone(),
        })
        .unwrap_or(NowPlaying::ChannelFallback)
}

// ── resolver ──────────────────────────────────────────────────────────────────

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Fetches a channel's metadata document and resolves it to `NowPlaying`.
/// Cheap to clone; clones share the HTTP connection pool.
#[derive(Clone)]
pub struct MetadataResolver {
    client: reqwest::Client,
    server: ServerConfig,
    clock: Clock,
}

impl MetadataResolver {
    pub fn new(client: reqwest::Client, server: ServerConfig) -> Self {
        Self {
            client,
            server,
            clock: Arc::new(Utc::now),
        }
    }

    /// Replace the wall clock used to compute the listener's position.
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    /// Fetch the raw live item list for `channel_id`.
    pub async fn fetch(&self, channel_id: &str) -> Result<Vec<MetadataEvent>, MetadataError> {
        let url = self.server.metadata_url(channel_id);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(MetadataError::Status(response.status()));
        }
        let body = response.bytes().await?;
        let doc: Value = serde_json::from_slice(&body)?;
        Ok(live_items(&doc))
    }

    /// Resolve what is audible on `channel` right now.  Fetch failures are
    /// logged and reported as `ChannelFallback`.
    pub async fn resolve(&self, channel: &Channel) -> NowPlaying {
        match self.fetch(&channel.id).await {
            Ok(items) => {
                let now_playing = select_now_playing(&items, (self.clock)());
                debug!(
                    "[metadata] {}: {} items → {:?}",
                    channel.id,
                    items.len(),
                    now_playing
                );
                now_playing
            }
            Err(e) => {
                warn!("[metadata] failed to fetch metadata for {}: {}", channel.id, e);
                NowPlaying::ChannelFallback
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn song(ts: DateTime<Utc>, name: &str) -> MetadataEvent {
        MetadataEvent {
            timestamp: ts,
            cut_flags: vec![SONG_FLAG.into()],
            name: name.into(),
            artist_name: format!("{name} artist"),
            artwork: None,
        }
    }

    fn song_name(np: &NowPlaying) -> Option<&str> {
        match np {
            NowPlaying::Song { name, .. } => Some(name),
            NowPlaying::ChannelFallback => None,
        }
    }

    #[test]
    fn test_delay_excludes_future_song() {
        let items = vec![
            song(t0(), "first"),
            song(t0() + TimeDelta::seconds(30), "second"),
        ];
        // now - 25s == T0 + 10s
        let now = t0() + TimeDelta::seconds(35);
        assert_eq!(song_name(&select_now_playing(&items, now)), Some("first"));
    }

    #[test]
    fn test_boundary_is_inclusive() {
        let items = vec![song(t0(), "exact")];
        let now = t0() + TimeDelta::milliseconds(BROADCAST_DELAY_MS);
        assert_eq!(song_name(&select_now_playing(&items, now)), Some("exact"));

        let just_before = now - TimeDelta::milliseconds(1);
        assert_eq!(select_now_playing(&items, just_before), NowPlaying::ChannelFallback);
    }

    #[test]
    fn test_non_song_items_ignored() {
        let mut talk = song(t0() + TimeDelta::seconds(5), "talk break");
        talk.cut_flags = vec!["LINK".into(), "TALK".into()];
        let items = vec![song(t0(), "song"), talk];
        let now = t0() + TimeDelta::minutes(5);
        assert_eq!(song_name(&select_now_playing(&items, now)), Some("song"));
    }

    #[test]
    fn test_out_of_order_feed_uses_latest_timestamp() {
        let items = vec![
            song(t0() + TimeDelta::seconds(60), "latest"),
            song(t0(), "oldest"),
            song(t0() + TimeDelta::seconds(30), "middle"),
        ];
        let now = t0() + TimeDelta::minutes(10);
        assert_eq!(song_name(&select_now_playing(&items, now)), Some("latest"));
    }

    #[test]
    fn test_equal_timestamps_prefer_later_entry() {
        let items = vec![song(t0(), "a"), song(t0(), "b")];
        let now = t0() + TimeDelta::minutes(1);
        assert_eq!(song_name(&select_now_playing(&items, now)), Some("b"));
    }

    #[test]
    fn test_empty_feed_falls_back() {
        assert_eq!(select_now_playing(&[], t0()), NowPlaying::ChannelFallback);
    }

    #[test]
    fn test_never_selects_unaired_item() {
        let items: Vec<MetadataEvent> = (0..40)
            .map(|i| song(t0() + TimeDelta::seconds(i * 7), &format!("s{i}")))
            .collect();
        for offset in (0..300).step_by(3) {
            let now = t0() + TimeDelta::seconds(offset);
            let cutoff = now - TimeDelta::milliseconds(BROADCAST_DELAY_MS);
            if let NowPlaying::Song { name, .. } = select_now_playing(&items, now) {
                let picked = items.iter().find(|i| i.name == name).unwrap();
                assert!(picked.timestamp <= cutoff);
            }
        }
    }

    #[test]
    fn test_live_items_full_document() {
        let doc = json!({
            "streams": [{
                "metadata": {
                    "live": {
                        "items": [
                            {
                                "timestamp": "2024-05-01T12:00:00Z",
                                "cutFlags": ["SONG"],
                                "name": "Track",
                                "artistName": "Band",
                                "images": {"tile": {"aspect_1x1": {"preferredImage": {"url": "https://art/x.jpg"}}}}
                            },
                            {
                                "timestamp": "not a date",
                                "cutFlags": ["SONG"],
                                "name": "Dropped"
                            }
                        ]
                    }
                }
            }]
        });
        let items = live_items(&doc);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].timestamp, t0());
        assert_eq!(items[0].artist_name, "Band");
        assert_eq!(items[0].artwork.as_deref(), Some("https://art/x.jpg"));
        assert!(items[0].is_song());
    }

    #[test]
    fn test_live_items_shape_mismatch_is_empty() {
        assert!(live_items(&json!({})).is_empty());
        assert!(live_items(&json!({"streams": []})).is_empty());
        assert!(live_items(&json!({"streams": [{"metadata": {"live": {"items": "nope"}}}]})).is_empty());
        assert!(live_items(&json!([1, 2, 3])).is_empty());
    }

    #[test]
    fn test_missing_fields_default() {
        let doc = json!({"streams": [{"metadata": {"live": {"items": [
            {"timestamp": 1714564800000i64}
        ]}}}]});
        let items = live_items(&doc);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].timestamp, t0());
        assert!(items[0].cut_flags.is_empty());
        assert_eq!(items[0].name, "");
        assert!(items[0].artwork.is_none());
    }

    #[test]
    fn test_parse_timestamp_variants() {
        assert_eq!(parse_timestamp(&json!("2024-05-01T14:00:00+02:00")), Some(t0()));
        assert_eq!(parse_timestamp(&json!("2024-05-01T12:00:00.000")), Some(t0()));
        assert_eq!(parse_timestamp(&json!("1714564800000")), Some(t0()));
        assert_eq!(parse_timestamp(&json!(1714564800000i64)), Some(t0()));
        assert_eq!(parse_timestamp(&json!(null)), None);
        assert_eq!(parse_timestamp(&json!(true)), None);
    }
}
