use crate::core::PlayerEvent;
use crate::BroadcastMessage;
use radio_core::protocol::{Broadcast, Command, Message, PROTOCOL_VERSION};
use radio_core::state::StateManager;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

/// Accept presentation clients on `address`.  Each client gets a `Hello`,
/// then every broadcast; its commands are forwarded to the core.
/// `GetState` is answered on the same connection with a `State` frame.
pub fn start_server(
    address: String,
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<PlayerEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let listener = match TcpListener::bind(&address).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind TCP socket {}: {}", address, e);
                return;
            }
        };
        info!("TCP server listening at {}", address);
        serve(listener, state_manager, event_tx, broadcast_tx).await;
    })
}

async fn serve(
    listener: TcpListener,
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<PlayerEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
) {
    let mut client_id = 0usize;
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                client_id += 1;
                let id = client_id;
                info!("Client {} connected from {}", id, peer);

                let sm = state_manager.clone();
                let evt_tx = event_tx.clone();
                let bcast_rx = broadcast_tx.subscribe();
                tokio::spawn(async move {
                    let (read_half, write_half) = stream.into_split();
                    handle_client(read_half, write_half, sm, id, evt_tx, bcast_rx).await;
                    info!("Client {} disconnected", id);
                });
            }
            Err(e) => error!("Failed to accept connection: {}", e),
        }
    }
}

async fn handle_client<R, W>(
    mut read_half: R,
    mut write_half: W,
    state_manager: Arc<StateManager>,
    client_id: usize,
    event_tx: mpsc::Sender<PlayerEvent>,
    mut broadcast_rx: broadcast::Receiver<BroadcastMessage>,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut tmp = [0u8; 4096];
    let mut read_buf: Vec<u8> = Vec::new();

    if let Ok(encoded) = encode_hello(&state_manager).await {
        if write_half.write_all(&encoded).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            result = read_half.read(&mut tmp) => {
                match result {
                    Ok(0) => break,
                    Ok(n) => {
                        read_buf.extend_from_slice(&tmp[..n]);
                        // partial frames stay buffered until the rest arrives
                        while let Some(frame_len) = Message::complete_frame_len(&read_buf) {
                            let decoded = Message::decode(&read_buf[..frame_len]);
                            read_buf.drain(..frame_len);
                            match decoded {
                                Ok((Message::Command(Command::GetState), _)) => {
                                    debug!("Client {} requested state", client_id);
                                    if let Ok(encoded) = encode_state(&state_manager).await {
                                        if write_half.write_all(&encoded).await.is_err() {
                                            return;
                                        }
                                    }
                                }
                                Ok((Message::Command(cmd), _)) => {
                                    debug!("Client {} sent command: {:?}", client_id, cmd);
                                    if event_tx.send(PlayerEvent::ClientCommand(cmd)).await.is_err() {
                                        warn!("PlayerEvent channel closed");
                                        return;
                                    }
                                }
                                Ok(_) => {}
                                Err(e) => warn!("Client {} sent a malformed frame: {}", client_id, e),
                            }
                        }
                    }
                    Err(e) => {
                        error!("Read error from client {}: {}", client_id, e);
                        break;
                    }
                }
            }

            msg = broadcast_rx.recv() => {
                let frame = match msg {
                    Ok(BroadcastMessage::StateUpdated) => encode_state(&state_manager).await,
                    Ok(BroadcastMessage::NowPlaying(view)) => {
                        Message::Broadcast(Broadcast::NowPlaying { view }).encode()
                    }
                    Ok(BroadcastMessage::Log(message)) => {
                        Message::Broadcast(Broadcast::Log { message }).encode()
                    }
                    Ok(BroadcastMessage::Error(message)) => {
                        Message::Broadcast(Broadcast::Error { message }).encode()
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Client {} missed {} broadcast messages", client_id, n);
                        encode_state(&state_manager).await
                    }
                    Err(_) => break,
                };
                if let Ok(encoded) = frame {
                    if write_half.write_all(&encoded).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
}

async fn encode_hello(state_manager: &StateManager) -> anyhow::Result<Vec<u8>> {
    Message::Broadcast(Broadcast::Hello {
        protocol_version: PROTOCOL_VERSION,
        state: state_manager.get_state().await,
    })
    .encode()
}

async fn encode_state(state_manager: &StateManager) -> anyhow::Result<Vec<u8>> {
    let state = state_manager.get_state().await;
    Message::Broadcast(Broadcast::State { data: state }).encode()
}
