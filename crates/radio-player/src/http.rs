use crate::core::PlayerEvent;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use radio_core::catalog::{group_by_genre, GenreGroup};
use radio_core::protocol::{Command, DaemonState};
use radio_core::state::StateManager;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info};

#[derive(Clone)]
struct HttpState {
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<PlayerEvent>,
}

pub fn start_server(
    bind_address: String,
    port: u16,
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<PlayerEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(state_manager, event_tx);

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP API server listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

fn router(state_manager: Arc<StateManager>, event_tx: mpsc::Sender<PlayerEvent>) -> Router {
    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/channels", get(get_channels))
        .route("/api/play/:id", get(play_channel).post(play_channel))
        .route("/api/toggle", get(toggle).post(toggle))
        .route("/api/next", get(next_channel).post(next_channel))
        .route("/api/prev", get(prev_channel).post(prev_channel))
        .route("/api/random", get(random_channel).post(random_channel))
        .route("/api/stop", get(stop).post(stop))
        .route("/api/artwork/error", post(artwork_error))
        .with_state(HttpState {
            state_manager,
            event_tx,
        })
}

async fn get_state(State(state): State<HttpState>) -> Json<DaemonState> {
    Json(state.state_manager.get_state().await)
}

async fn get_channels(State(state): State<HttpState>) -> Json<Vec<GenreGroup>> {
    let channels = state.state_manager.channels().await;
    Json(group_by_genre(&channels))
}

async fn send(state: &HttpState, cmd: Command) -> StatusCode {
    info!("HTTP API: {:?}", cmd);
    if state.event_tx.send(PlayerEvent::ClientCommand(cmd)).await.is_err() {
        error!("Failed to forward HTTP command");
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    StatusCode::OK
}

async fn play_channel(State(state): State<HttpState>, Path(id): Path<String>) -> StatusCode {
    send(&state, Command::Play { channel_id: id }).await
}

async fn toggle(State(state): State<HttpState>) -> StatusCode {
    send(&state, Command::TogglePause).await
}

async fn next_channel(State(state): State<HttpState>) -> StatusCode {
    send(&state, Command::Next).await
}

async fn prev_channel(State(state): State<HttpState>) -> StatusCode {
    send(&state, Command::Prev).await
}

async fn random_channel(State(state): State<HttpState>) -> StatusCode {
    send(&state, Command::Random).await
}

async fn stop(State(state): State<HttpState>) -> StatusCode {
    send(&state, Command::Stop).await
}

async fn artwork_error(State(state): State<HttpState>) -> StatusCode {
    send(&state, Command::ArtworkFailed).await
}
