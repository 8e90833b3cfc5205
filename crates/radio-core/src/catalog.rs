//! Channel catalog: m3u8-style playlist parsing and genre grouping.
//!
//! The aggregator publishes one block per channel:
//!
//! ```text
//! #EXTINF:-1 tvg-logo="https://…/logo.png" group-title="Rock",Classic Vinyl
//! /listen/8f0c3a2e-5d1b-4c8e-9a7f-2b6d4e1f0a93
//! ```
//!
//! Anything that doesn't match that shape is ignored.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, info};

use crate::error::CatalogError;

pub const DEFAULT_GENRE: &str = "Miscellaneous";

/// One station from the catalog.  Identity is `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    /// Opaque stream identifier (hex with hyphens).
    pub id: String,
    pub title: String,
    pub genre: String,
    /// May be empty.
    pub logo_url: String,
}

/// Channels sharing a genre, in catalog order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenreGroup {
    pub genre: String,
    pub channels: Vec<Channel>,
}

fn entry_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // attrs: anything up to the first comma outside double quotes
        Regex::new(
            r#"#EXTINF:-1(?P<attrs>(?:[^,"\r\n]|"[^"\r\n]*")*),(?P<title>[^\r\n]+)[\r\n]+[^\r\n]*?/listen/(?P<id>[a-fA-F0-9-]+)"#,
        )
        .expect("catalog entry pattern is valid")
    })
}

fn attr_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"([A-Za-z0-9_-]+)="([^"]*)""#).expect("catalog attribute pattern is valid")
    })
}

/// Parse catalog text into channels, preserving order of appearance.
/// Duplicated ids are passed through untouched.
pub fn parse_catalog(raw: &str) -> Vec<Channel> {
    let mut channels = Vec::new();

    for caps in entry_regex().captures_iter(raw) {
        let attrs = caps.name("attrs").map(|m| m.as_str()).unwrap_or("");
        let title = caps.name("title").map(|m| m.as_str().trim()).unwrap_or("");
        let id = caps.name("id").map(|m| m.as_str().trim()).unwrap_or("");
        if title.is_empty() || id.is_empty() {
            continue;
        }

        let mut logo_url = String::new();
        let mut genre = String::new();
        for attr in attr_regex().captures_iter(attrs) {
            match &attr[1] {
                "tvg-logo" => logo_url = attr[2].to_string(),
                "group-title" => genre = attr[2].trim().to_string(),
                _ => {}
            }
        }
        if genre.is_empty() {
            genre = DEFAULT_GENRE.to_string();
        }

        channels.push(Channel {
            id: id.to_string(),
            title: title.to_string(),
            genre,
            logo_url,
        });
    }

    debug!("[catalog] parsed {} channels", channels.len());
    channels
}

/// Group channels by genre, genres ordered by first appearance.  When an
/// id repeats, only its last occurrence is kept.
pub fn group_by_genre(channels: &[Channel]) -> Vec<GenreGroup> {
    let last_seen: HashMap<&str, usize> = channels
        .iter()
        .enumerate()
        .map(|(idx, c)| (c.id.as_str(), idx))
        .collect();

    let mut groups: Vec<GenreGroup> = Vec::new();
    let mut group_idx: HashMap<&str, usize> = HashMap::new();

    for (idx, channel) in channels.iter().enumerate() {
        if last_seen.get(channel.id.as_str()) != Some(&idx) {
            continue;
        }
        let slot = *group_idx.entry(channel.genre.as_str()).or_insert_with(|| {
            groups.push(GenreGroup {
                genre: channel.genre.clone(),
                channels: Vec::new(),
            });
            groups.len() - 1
        });
        groups[slot].channels.push(channel.clone());
    }

    groups
}

/// Load the catalog from an http(s) URL or a local file.
pub async fn load_catalog(
    client: &reqwest::Client,
    source: &str,
) -> Result<Vec<Channel>, CatalogError> {
    let text = if source.starts_with("http://") || source.starts_with("https://") {
        info!("[catalog] fetching {}", source);
        let response = client.get(source).send().await?;
        if !response.status().is_success() {
            return Err(CatalogError::Status(response.status()));
        }
        response.text().await?
    } else {
        info!("[catalog] reading {}", source);
        tokio::fs::read_to_string(Path::new(source))
            .await
            .map_err(|source_err| CatalogError::Io {
                path: source.to_string(),
                source: source_err,
            })?
    };

    Ok(parse_catalog(&text))
}
