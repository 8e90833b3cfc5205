/// mpv as the audio engine, driven over its JSON IPC socket.
///
/// ```text
///   MpvPlayback (Playback impl, owned by the session)
///         │ lazily spawns on first load
///         ▼
///   MpvDriver::spawn_and_connect()
///         ├── writer_task   ← MpvRequest via mpsc → socket
///         └── reader_task   ← JSON lines from socket
///                                ├── reply (request_id) → oneshot
///                                └── event / property-change → MpvEvent channel
/// ```
///
/// Unix uses a domain socket, Windows a named pipe `\\.\pipe\<name>`.
use radio_core::playback::{EngineEvent, Playback};
use radio_core::platform;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

#[cfg(unix)]
use tokio::net::UnixStream;

#[cfg(windows)]
use tokio::net::windows::named_pipe::ClientOptions;

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

/// observe_property ids, matched in property-change events.
pub const OBS_CORE_IDLE: u64 = 1;
pub const OBS_PAUSE: u64 = 2;

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>;

struct PendingRequest {
    req_id: u64,
    payload: String,
    reply: oneshot::Sender<anyhow::Result<Value>>,
}

/// Unsolicited mpv message (no request_id).
#[derive(Debug, Clone)]
pub struct MpvEvent {
    pub raw: Value,
}

impl MpvEvent {
    pub fn as_property_change(&self) -> Option<(u64, &Value)> {
        if self.raw.get("event")?.as_str()? == "property-change" {
            let id = self.raw.get("id")?.as_u64()?;
            let data = self.raw.get("data").unwrap_or(&Value::Null);
            Some((id, data))
        } else {
            None
        }
    }

    pub fn event_name(&self) -> Option<&str> {
        self.raw.get("event")?.as_str()
    }
}

// ── handle ────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct MpvHandle {
    tx: mpsc::Sender<PendingRequest>,
}

impl MpvHandle {
    pub async fn send(&self, command: Value) -> anyhow::Result<Value> {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let msg = json!({ "command": command, "request_id": req_id });
        let mut raw = serde_json::to_string(&msg)?;
        raw.push('\n');

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PendingRequest {
                req_id,
                payload: raw,
                reply: reply_tx,
            })
            .await
            .map_err(|_| anyhow::anyhow!("mpv writer task gone"))?;

        tokio::time::timeout(tokio::time::Duration::from_secs(5), reply_rx)
            .await
            .map_err(|_| anyhow::anyhow!("mpv IPC timeout for req={}", req_id))?
            .map_err(|_| anyhow::anyhow!("mpv reply channel dropped req={}", req_id))?
    }

    pub async fn load_stream(&self, url: &str) -> anyhow::Result<()> {
        self.send(json!(["loadfile", url, "replace"])).await?;
        // a paused engine stays paused across loadfile
        self.send(json!(["set_property", "pause", false])).await?;
        Ok(())
    }

    pub async fn cycle_pause(&self) -> anyhow::Result<()> {
        self.send(json!(["cycle", "pause"])).await?;
        Ok(())
    }

    pub async fn stop(&self) -> anyhow::Result<()> {
        self.send(json!(["stop"])).await?;
        Ok(())
    }

    pub async fn set_volume(&self, vol: f32) -> anyhow::Result<()> {
        let vol_pct = (vol * 100.0).clamp(0.0, 100.0);
        self.send(json!(["set_property", "volume", vol_pct])).await?;
        Ok(())
    }

    /// Must be called after every fresh connection.
    pub async fn observe_properties(&self) {
        for (id, name) in [(OBS_CORE_IDLE, "core-idle"), (OBS_PAUSE, "pause")] {
            match self.send(json!(["observe_property", id, name])).await {
                Ok(_) => debug!("mpv: observe_property id={} name={}", id, name),
                Err(e) => warn!("mpv: observe_property {} failed: {}", name, e),
            }
        }
    }
}

// ── driver ────────────────────────────────────────────────────────────────────

/// Owns the mpv child process.
pub struct MpvDriver {
    socket_name: String,
    process: Option<tokio::process::Child>,
    volume: f32,
}

impl MpvDriver {
    pub fn new(volume: f32) -> Self {
        Self {
            socket_name: platform::mpv_socket_name(),
            process: None,
            volume,
        }
    }

    pub fn process_alive(&mut self) -> bool {
        match self.process {
            Some(ref mut child) => child.try_wait().ok().flatten().is_none(),
            None => false,
        }
    }

    pub async fn kill(&mut self) {
        if let Some(mut p) = self.process.take() {
            let _ = p.kill().await;
        }
    }

    fn spawn_process(&mut self) -> anyhow::Result<()> {
        let mpv_binary =
            platform::find_mpv_binary().ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?;
        let vol_arg = format!(
            "--volume={}",
            (self.volume * 100.0).clamp(0.0, 100.0).round() as i64
        );

        info!("mpv: spawning {}", mpv_binary.display());
        let child = tokio::process::Command::new(mpv_binary)
            .arg("--no-video")
            .arg("--idle=yes")
            .arg(platform::mpv_socket_arg())
            .arg("--quiet")
            .arg(vol_arg)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        self.process = Some(child);
        Ok(())
    }

    #[cfg(unix)]
    pub async fn spawn_and_connect(
        &mut self,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        self.kill().await;

        let socket_path = std::path::PathBuf::from(&self.socket_name);
        let _ = tokio::fs::remove_file(&socket_path).await;

        self.spawn_process()?;

        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if socket_path.exists() {
                break;
            }
        }
        if !socket_path.exists() {
            anyhow::bail!("mpv IPC socket did not appear");
        }
        tokio::time::sleep(tokio::time::Duration::from_millis(200)).await;

        let stream = UnixStream::connect(&socket_path).await?;
        info!("mpv: connected to IPC socket");
        let (read_half, write_half) = stream.into_split();
        Ok(start_io_tasks(read_half, write_half, event_tx))
    }

    #[cfg(windows)]
    pub async fn spawn_and_connect(
        &mut self,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        self.kill().await;
        self.spawn_process()?;

        let pipe_path = format!(r"\\.\pipe\{}", self.socket_name);
        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if let Ok(client) = ClientOptions::new().open(&pipe_path) {
                info!("mpv: connected to named pipe");
                let (read_half, write_half) = tokio::io::split(client);
                return Ok(start_io_tasks(read_half, write_half, event_tx));
            }
        }
        anyhow::bail!("mpv named pipe did not appear")
    }
}

fn start_io_tasks<R, W>(read_half: R, write_half: W, event_tx: mpsc::Sender<MpvEvent>) -> MpvHandle
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let (cmd_tx, cmd_rx) = mpsc::channel::<PendingRequest>(64);

    tokio::spawn(writer_task(write_half, cmd_rx, pending.clone()));
    tokio::spawn(reader_task(BufReader::new(read_half), pending, event_tx));

    MpvHandle { tx: cmd_tx }
}

async fn reader_task<R>(mut reader: BufReader<R>, pending: PendingMap, event_tx: mpsc::Sender<MpvEvent>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("mpv reader: connection closed");
                for (_, tx) in pending.lock().await.drain() {
                    let _ = tx.send(Err(anyhow::anyhow!("mpv IPC connection closed")));
                }
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let val: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("mpv reader: invalid json '{}': {}", trimmed, e);
                        continue;
                    }
                };

                if let Some(req_id) = val.get("request_id").and_then(|v| v.as_u64()) {
                    let Some(tx) = pending.lock().await.remove(&req_id) else {
                        debug!("mpv reader: response for unknown req={}", req_id);
                        continue;
                    };
                    let result = if val["error"].as_str() == Some("success") {
                        Ok(val)
                    } else {
                        let err = val["error"].as_str().unwrap_or("unknown error").to_string();
                        debug!("mpv reader: response req={} err={}", req_id, err);
                        Err(anyhow::anyhow!("mpv error: {}", err))
                    };
                    let _ = tx.send(result);
                } else {
                    debug!("mpv reader: event {}", trimmed);
                    if event_tx.send(MpvEvent { raw: val }).await.is_err() {
                        break;
                    }
                }
            }
            Err(e) => {
                warn!("mpv reader: read error: {}", e);
                for (_, tx) in pending.lock().await.drain() {
                    let _ = tx.send(Err(anyhow::anyhow!("mpv IPC read error: {}", e)));
                }
                break;
            }
        }
    }
}

async fn writer_task<W>(mut writer: W, mut rx: mpsc::Receiver<PendingRequest>, pending: PendingMap)
where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // register before writing so the reader can match the reply
        pending.lock().await.insert(req.req_id, req.reply);
        debug!("mpv writer: send req={} payload={}", req.req_id, req.payload.trim());
        if let Err(e) = writer.write_all(req.payload.as_bytes()).await {
            warn!("mpv writer: write error: {}", e);
            if let Some(tx) = pending.lock().await.remove(&req.req_id) {
                let _ = tx.send(Err(anyhow::anyhow!("mpv write error: {}", e)));
            }
            break;
        }
    }
    debug!("mpv writer: task exiting");
}

// ── engine state ──────────────────────────────────────────────────────────────

/// What mpv last reported about pause and idleness.  The engine counts as
/// playing only while unpaused and not idle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EngineObservation {
    pub pause: bool,
    pub core_idle: Option<bool>,
}

impl EngineObservation {
    /// Fold one mpv event in.  Returns true when anything changed.
    pub fn apply(&mut self, evt: &MpvEvent) -> bool {
        let before = *self;
        if let Some((obs_id, data)) = evt.as_property_change() {
            match obs_id {
                OBS_PAUSE => self.pause = data.as_bool().unwrap_or(false),
                OBS_CORE_IDLE => self.core_idle = data.as_bool(),
                _ => {}
            }
        } else if evt.event_name() == Some("end-file") {
            self.core_idle = Some(true);
        }
        *self != before
    }

    pub fn engine_event(&self) -> EngineEvent {
        if !self.pause && self.core_idle == Some(false) {
            EngineEvent::Playing
        } else {
            EngineEvent::Paused
        }
    }
}

// ── Playback impl ─────────────────────────────────────────────────────────────

/// The session's handle on mpv.  The process is started on the first load
/// and restarted on the next load if it died.
pub struct MpvPlayback {
    driver: MpvDriver,
    handle: Option<MpvHandle>,
    event_tx: mpsc::Sender<MpvEvent>,
    volume: f32,
    loaded: bool,
}

impl MpvPlayback {
    /// mpv events for every connection are delivered on `event_tx`.
    pub fn new(volume: f32, event_tx: mpsc::Sender<MpvEvent>) -> Self {
        Self {
            driver: MpvDriver::new(volume),
            handle: None,
            event_tx,
            volume,
            loaded: false,
        }
    }

    /// Drop the handle if the process has gone away.  Returns true when it
    /// had been running.
    pub fn reap_if_dead(&mut self) -> bool {
        if self.handle.is_some() && !self.driver.process_alive() {
            warn!("mpv: process died");
            self.handle = None;
            self.loaded = false;
            return true;
        }
        false
    }

    pub async fn shutdown(&mut self) {
        info!("mpv: shutting down");
        if let Some(handle) = self.handle.take() {
            let _ = handle.stop().await;
        }
        self.driver.kill().await;
        self.loaded = false;
    }

    async fn ensure_handle(&mut self) -> anyhow::Result<MpvHandle> {
        self.reap_if_dead();
        if let Some(handle) = &self.handle {
            return Ok(handle.clone());
        }

        let handle = self.driver.spawn_and_connect(self.event_tx.clone()).await?;
        handle.observe_properties().await;
        if let Err(e) = handle.set_volume(self.volume).await {
            warn!("mpv: failed to set volume: {}", e);
        }
        self.handle = Some(handle.clone());
        Ok(handle)
    }
}

impl Playback for MpvPlayback {
    async fn load_and_play(&mut self, stream_url: &str) -> anyhow::Result<()> {
        let handle = self.ensure_handle().await?;
        info!("mpv: loading {}", stream_url);
        handle.load_stream(stream_url).await?;
        self.loaded = true;
        Ok(())
    }

    async fn toggle_play_pause(&mut self) -> anyhow::Result<()> {
        match (&self.handle, self.loaded) {
            (Some(handle), true) => handle.cycle_pause().await,
            _ => {
                debug!("mpv: toggle ignored, nothing loaded");
                Ok(())
            }
        }
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        self.loaded = false;
        match &self.handle {
            Some(handle) => handle.stop().await,
            None => Ok(()),
        }
    }
}
