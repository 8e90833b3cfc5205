//! Display model for the player panel: which text and image to show for a
//! channel given its resolved `NowPlaying`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::catalog::Channel;
use crate::metadata::NowPlaying;

/// Image service that serves resized variants of feed artwork.
pub const IMAGE_SERVICE_BASE_URL: &str = "https://imgsrv-sxm-prod-device.streaming.siriusxm.com/";

/// 1×1 transparent GIF shown in place of an image that failed to load.
pub const PLACEHOLDER_IMAGE: &str = "data:image/gif;base64,R0lGODlhAQABAAD/ACwAAAAAAQABAAACADs=";

pub const ARTWORK_SIZE: u32 = 300;

/// URL of a 300×300 JPEG rendition of `source_url`.
pub fn resized_artwork_url(source_url: &str) -> String {
    let request = json!({
        "key": source_url,
        "edits": [
            { "format": { "type": "jpeg" } },
            { "resize": { "width": ARTWORK_SIZE, "height": ARTWORK_SIZE } },
        ],
    });
    format!("{}{}", IMAGE_SERVICE_BASE_URL, STANDARD.encode(request.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayImage {
    pub src: String,
    /// Set once the presentation layer reports that `src` failed to load.
    pub errored: bool,
}

impl DisplayImage {
    fn new(src: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            errored: false,
        }
    }

    pub fn failed() -> Self {
        Self {
            src: PLACEHOLDER_IMAGE.to_string(),
            errored: true,
        }
    }
}

/// Everything the player panel shows for the current channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NowPlayingView {
    pub channel_id: String,
    /// Always the channel title.
    pub heading: String,
    pub title: String,
    pub subtitle: String,
    pub image: DisplayImage,
    pub now_playing: NowPlaying,
}

impl NowPlayingView {
    pub fn render(channel: &Channel, now_playing: NowPlaying) -> Self {
        let (title, subtitle, image) = match &now_playing {
            NowPlaying::Song {
                name,
                artist_name,
                artwork,
            } => {
                let src = match artwork {
                    Some(url) => resized_artwork_url(url),
                    None => channel.logo_url.clone(),
                };
                (name.clone(), artist_name.clone(), DisplayImage::new(src))
            }
            NowPlaying::ChannelFallback => (
                channel.title.clone(),
                channel.genre.clone(),
                DisplayImage::new(channel.logo_url.clone()),
            ),
        };

        Self {
            channel_id: channel.id.clone(),
            heading: channel.title.clone(),
            title,
            subtitle,
            image,
            now_playing,
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.now_playing == NowPlaying::ChannelFallback
    }
}
