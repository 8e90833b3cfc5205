mod common;

use common::mock_feed::{feed_document, song_item, MockFeed, MockReply};
use radio_core::artwork::NowPlayingView;
use radio_core::catalog::{load_catalog, Channel};
use radio_core::error::CatalogError;
use radio_core::metadata::{MetadataResolver, NowPlaying};
use radio_core::playback::Playback;
use radio_core::session::{SessionEvent, SessionManager};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Default, Clone)]
struct RecordingPlayback {
    loads: Arc<Mutex<Vec<String>>>,
}

impl Playback for RecordingPlayback {
    async fn load_and_play(&mut self, stream_url: &str) -> anyhow::Result<()> {
        self.loads.lock().unwrap().push(stream_url.to_string());
        Ok(())
    }

    async fn toggle_play_pause(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

fn channel(id: &str, title: &str) -> Channel {
    Channel {
        id: id.into(),
        title: title.into(),
        genre: "Jazz".into(),
        logo_url: format!("https://logo/{id}.png"),
    }
}

/// Feed `expected` resolutions back into the manager, collecting every
/// view it publishes.
async fn pump_resolutions(
    mgr: &mut SessionManager<RecordingPlayback>,
    rx: &mut mpsc::Receiver<SessionEvent>,
    expected: usize,
) -> Vec<NowPlayingView> {
    let mut published = Vec::new();
    let mut seen = 0;
    while seen < expected {
        let evt = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("resolution should arrive")
            .expect("channel open");
        if matches!(evt, SessionEvent::Resolved { .. }) {
            seen += 1;
        }
        if let Some(view) = mgr.handle_event(evt) {
            published.push(view);
        }
    }
    published
}

#[tokio::test]
async fn switch_mid_fetch_only_shows_new_channel() {
    let feed = MockFeed::start().await;
    // A answers slowly with a song; B answers at once with an error.
    feed.reply(
        "aaaa",
        MockReply::ok(feed_document(json!([song_item(
            "2020-01-01T00:00:00Z",
            "Song on A",
            "Artist A"
        )])))
        .delayed(Duration::from_millis(300)),
    );
    feed.reply("bbbb", MockReply::status(500));

    let (tx, mut rx) = mpsc::channel(64);
    let playback = RecordingPlayback::default();
    let resolver = MetadataResolver::new(reqwest::Client::new(), feed.server());
    let mut mgr = SessionManager::new(resolver, feed.server(), playback.clone(), tx);

    mgr.switch_to(channel("aaaa", "Channel A")).await.unwrap();
    mgr.switch_to(channel("bbbb", "Channel B")).await.unwrap();

    let published = pump_resolutions(&mut mgr, &mut rx, 2).await;
    assert!(published.iter().all(|v| v.channel_id == "bbbb"));

    let view = mgr.view().unwrap();
    assert_eq!(view.channel_id, "bbbb");
    assert_eq!(view.now_playing, NowPlaying::ChannelFallback);
    assert_eq!(view.title, "Channel B");
    assert_eq!(
        *playback.loads.lock().unwrap(),
        vec![
            format!("{}/listen/aaaa", feed.base_url),
            format!("{}/listen/bbbb", feed.base_url),
        ]
    );
}

#[tokio::test]
async fn fallback_upgrades_to_song() {
    let feed = MockFeed::start().await;
    feed.reply(
        "cccc",
        MockReply::ok(feed_document(json!([
            song_item("2020-01-01T00:00:00Z", "Earlier", "X"),
            song_item("2020-01-01T00:03:00Z", "Current", "Y"),
        ]))),
    );

    let (tx, mut rx) = mpsc::channel(64);
    let resolver = MetadataResolver::new(reqwest::Client::new(), feed.server());
    let mut mgr = SessionManager::new(resolver, feed.server(), RecordingPlayback::default(), tx);

    mgr.switch_to(channel("cccc", "Channel C")).await.unwrap();
    assert!(mgr.view().unwrap().is_fallback());

    let published = pump_resolutions(&mut mgr, &mut rx, 1).await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].title, "Current");
    assert_eq!(published[0].subtitle, "Y");
    assert_eq!(published[0].heading, "Channel C");
    assert_eq!(published[0].image.src, "https://logo/cccc.png");
}

#[tokio::test]
async fn poll_tick_triggers_another_fetch() {
    let feed = MockFeed::start().await;
    feed.reply("dddd", MockReply::ok(feed_document(json!([]))));

    let (tx, mut rx) = mpsc::channel(64);
    let resolver = MetadataResolver::new(reqwest::Client::new(), feed.server());
    let mut mgr = SessionManager::new(resolver, feed.server(), RecordingPlayback::default(), tx);

    mgr.switch_to(channel("dddd", "Channel D")).await.unwrap();
    pump_resolutions(&mut mgr, &mut rx, 1).await;

    let ticket = mgr.ticket().unwrap();
    assert!(mgr.handle_event(SessionEvent::PollTick(ticket)).is_none());
    pump_resolutions(&mut mgr, &mut rx, 1).await;

    assert_eq!(feed.hits(), vec!["dddd".to_string(), "dddd".to_string()]);
}

#[tokio::test]
async fn slow_poll_does_not_overwrite_newer_one() {
    let feed = MockFeed::start().await;
    feed.reply(
        "eeee",
        MockReply::ok(feed_document(json!([song_item(
            "2020-01-01T00:00:00Z",
            "Older",
            "X"
        )])))
        .delayed(Duration::from_millis(400)),
    );

    let (tx, mut rx) = mpsc::channel(64);
    let resolver = MetadataResolver::new(reqwest::Client::new(), feed.server());
    let mut mgr = SessionManager::new(resolver, feed.server(), RecordingPlayback::default(), tx);

    // the first fetch is in flight with the slow reply
    mgr.switch_to(channel("eeee", "Channel E")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(feed.hits().len(), 1);

    feed.reply(
        "eeee",
        MockReply::ok(feed_document(json!([song_item(
            "2020-01-01T00:05:00Z",
            "Newer",
            "Y"
        )]))),
    );
    let ticket = mgr.ticket().unwrap();
    assert!(mgr.handle_event(SessionEvent::PollTick(ticket)).is_none());

    let published = pump_resolutions(&mut mgr, &mut rx, 2).await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].title, "Newer");
    assert_eq!(mgr.view().unwrap().title, "Newer");
}

#[tokio::test]
async fn catalog_loads_from_server() {
    let feed = MockFeed::start().await;
    feed.catalog(MockReply::ok(
        "#EXTM3U\n#EXTINF:-1 tvg-logo=\"l1\" group-title=\"Rock\",One\n/listen/aaaa-0001\n#EXTINF:-1 tvg-logo=\"l2\" group-title=\"\",Two\n/listen/bbbb-0002\n",
    ));

    let source = feed.server().catalog_url();
    let channels = load_catalog(&reqwest::Client::new(), &source).await.unwrap();
    assert_eq!(channels.len(), 2);
    assert_eq!(channels[1].genre, "Miscellaneous");
}

#[tokio::test]
async fn catalog_error_status_is_reported() {
    let feed = MockFeed::start().await;
    feed.catalog(MockReply::status(503));

    let source = feed.server().catalog_url();
    let err = load_catalog(&reqwest::Client::new(), &source)
        .await
        .unwrap_err();
    assert!(matches!(err, CatalogError::Status(s) if s.as_u16() == 503));
}
