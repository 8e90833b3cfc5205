#![allow(dead_code)]

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

/// Canned answer for one metadata id.
#[derive(Debug, Clone)]
pub struct MockReply {
    pub status: u16,
    pub body: String,
    pub delay: Duration,
}

impl MockReply {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
            delay: Duration::ZERO,
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: "upstream error".into(),
            delay: Duration::ZERO,
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Default)]
struct Shared {
    metadata: Mutex<HashMap<String, MockReply>>,
    catalog: Mutex<Option<MockReply>>,
    hits: Mutex<Vec<String>>,
}

/// Local stand-in for the aggregator server, bound to an ephemeral port.
pub struct MockFeed {
    pub base_url: String,
    shared: Arc<Shared>,
    task: tokio::task::JoinHandle<()>,
}

impl MockFeed {
    pub async fn start() -> Self {
        let shared = Arc::new(Shared::default());
        let app = Router::new()
            .route("/metadata/:id", get(metadata))
            .route("/channels.m3u8", get(catalog))
            .with_state(shared.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock feed");
        let addr = listener.local_addr().expect("mock feed address");
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            base_url: format!("http://{}", addr),
            shared,
            task,
        }
    }

    pub fn server(&self) -> radio_core::config::ServerConfig {
        radio_core::config::ServerConfig {
            base_url: self.base_url.clone(),
        }
    }

    pub fn reply(&self, channel_id: &str, reply: MockReply) {
        self.shared
            .metadata
            .lock()
            .unwrap()
            .insert(channel_id.to_string(), reply);
    }

    pub fn catalog(&self, reply: MockReply) {
        *self.shared.catalog.lock().unwrap() = Some(reply);
    }

    /// Metadata ids requested so far, in arrival order.
    pub fn hits(&self) -> Vec<String> {
        self.shared.hits.lock().unwrap().clone()
    }
}

impl Drop for MockFeed {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn metadata(State(shared): State<Arc<Shared>>, Path(id): Path<String>) -> (StatusCode, String) {
    shared.hits.lock().unwrap().push(id.clone());
    let reply = shared.metadata.lock().unwrap().get(&id).cloned();
    respond(reply).await
}

async fn catalog(State(shared): State<Arc<Shared>>) -> (StatusCode, String) {
    let reply = shared.catalog.lock().unwrap().clone();
    respond(reply).await
}

async fn respond(reply: Option<MockReply>) -> (StatusCode, String) {
    match reply {
        Some(r) => {
            tokio::time::sleep(r.delay).await;
            let status = StatusCode::from_u16(r.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, r.body)
        }
        None => (StatusCode::NOT_FOUND, String::new()),
    }
}

/// Wrap live items in the nesting the aggregator uses.
pub fn feed_document(items: Value) -> String {
    json!({
        "streams": [{
            "metadata": {
                "live": { "items": items }
            }
        }]
    })
    .to_string()
}

pub fn song_item(timestamp: &str, name: &str, artist: &str) -> Value {
    json!({
        "timestamp": timestamp,
        "cutFlags": ["SONG"],
        "name": name,
        "artistName": artist,
    })
}
