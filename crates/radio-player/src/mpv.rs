//! JSON IPC client for one mpv process.
//!
//! ```text
//!   MpvDriver::launch()
//!         │
//!         ├── writer   ← MpvRequest over mpsc, one JSON line each
//!         └── reader   ← JSON lines from mpv
//!                          ├── has request_id → pending oneshot
//!                          └── otherwise      → MpvEvent channel
//! ```
//!
//! Unix builds talk over a domain socket, Windows over a named pipe.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

#[cfg(unix)]
use tokio::net::UnixStream;

#[cfg(windows)]
use tokio::net::windows::named_pipe::ClientOptions;

static NEXT_REQUEST: AtomicU64 = AtomicU64::new(1);

const REPLY_TIMEOUT: Duration = Duration::from_secs(5);
const CONNECT_ATTEMPTS: u32 = 50;
const CONNECT_POLL: Duration = Duration::from_millis(100);

/// Observed property ids.
pub const OBS_CORE_IDLE: u64 = 1;
pub const OBS_PAUSE: u64 = 2;

type Reply = oneshot::Sender<anyhow::Result<Value>>;
type PendingMap = Arc<Mutex<HashMap<u64, Reply>>>;

struct MpvRequest {
    id: u64,
    line: String,
    reply: Reply,
}

/// Unsolicited message from mpv: an event or a property change.
#[derive(Debug, Clone)]
pub struct MpvEvent {
    pub raw: Value,
}

impl MpvEvent {
    pub fn name(&self) -> Option<&str> {
        self.raw.get("event")?.as_str()
    }

    pub fn property_change(&self) -> Option<(u64, &Value)> {
        if self.name()? != "property-change" {
            return None;
        }
        let id = self.raw.get("id")?.as_u64()?;
        Some((id, self.raw.get("data").unwrap_or(&Value::Null)))
    }

    /// `end-file` caused by a load or demux failure.
    pub fn is_load_error(&self) -> bool {
        self.name() == Some("end-file")
            && self.raw.get("reason").and_then(Value::as_str) == Some("error")
    }

    pub fn file_error(&self) -> Option<&str> {
        self.raw.get("file_error").and_then(Value::as_str)
    }
}

#[derive(Clone)]
pub struct MpvHandle {
    tx: mpsc::Sender<MpvRequest>,
}

impl MpvHandle {
    pub async fn send(&self, command: Value) -> anyhow::Result<Value> {
        let id = NEXT_REQUEST.fetch_add(1, Ordering::Relaxed);
        let mut line = serde_json::to_string(&json!({ "command": command, "request_id": id }))?;
        line.push('\n');

        let (reply, rx) = oneshot::channel();
        self.tx
            .send(MpvRequest { id, line, reply })
            .await
            .map_err(|_| anyhow!("mpv writer gone"))?;

        tokio::time::timeout(REPLY_TIMEOUT, rx)
            .await
            .map_err(|_| anyhow!("mpv reply timeout (req {})", id))?
            .map_err(|_| anyhow!("mpv reply dropped (req {})", id))?
    }

    pub async fn load(&self, url: &str) -> anyhow::Result<()> {
        self.send(json!(["loadfile", url, "replace"])).await?;
        Ok(())
    }

    pub async fn stop(&self) -> anyhow::Result<()> {
        self.send(json!(["stop"])).await?;
        Ok(())
    }

    pub async fn set_pause(&self, paused: bool) -> anyhow::Result<()> {
        self.send(json!(["set_property", "pause", paused])).await?;
        Ok(())
    }

    pub async fn set_volume(&self, volume: f32) -> anyhow::Result<()> {
        let pct = (volume * 100.0).clamp(0.0, 100.0);
        self.send(json!(["set_property", "volume", pct])).await?;
        Ok(())
    }

    pub async fn observe(&self) {
        for (id, name) in [(OBS_CORE_IDLE, "core-idle"), (OBS_PAUSE, "pause")] {
            if let Err(e) = self.send(json!(["observe_property", id, name])).await {
                warn!("mpv: observe {} failed: {}", name, e);
            }
        }
    }
}

/// Owns one mpv child process.  Killed on drop.
pub struct MpvDriver {
    socket_name: String,
    process: Option<tokio::process::Child>,
}

impl MpvDriver {
    pub fn new(element_id: u64) -> Self {
        Self {
            socket_name: radio_proto::platform::mpv_socket_name(element_id),
            process: None,
        }
    }

    pub fn is_running(&mut self) -> bool {
        match self.process.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    pub async fn kill(&mut self) {
        if let Some(mut child) = self.process.take() {
            let _ = child.kill().await;
        }
        #[cfg(unix)]
        let _ = tokio::fs::remove_file(&self.socket_name).await;
    }

    fn spawn_process(&mut self, volume: f32) -> anyhow::Result<()> {
        let binary = radio_proto::platform::find_mpv_binary().context("mpv binary not found")?;
        let child = tokio::process::Command::new(binary)
            .arg("--no-video")
            .arg("--idle=yes")
            .arg("--quiet")
            .arg(radio_proto::platform::mpv_socket_arg(&self.socket_name))
            .arg(format!(
                "--volume={}",
                (volume * 100.0).clamp(0.0, 100.0).round() as i64
            ))
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        self.process = Some(child);
        Ok(())
    }

    /// Start mpv at `volume` and connect to its IPC endpoint.
    #[cfg(unix)]
    pub async fn launch(
        &mut self,
        volume: f32,
        events: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        self.kill().await;
        let path = std::path::PathBuf::from(&self.socket_name);
        info!("mpv: launching ({})", self.socket_name);
        self.spawn_process(volume)?;

        for _ in 0..CONNECT_ATTEMPTS {
            tokio::time::sleep(CONNECT_POLL).await;
            if !path.exists() {
                continue;
            }
            if let Ok(stream) = UnixStream::connect(&path).await {
                debug!("mpv: connected to {}", path.display());
                let (read, write) = stream.into_split();
                return Ok(start_io(read, write, events));
            }
        }
        self.kill().await;
        anyhow::bail!("mpv IPC socket {} did not come up", path.display())
    }

    #[cfg(windows)]
    pub async fn launch(
        &mut self,
        volume: f32,
        events: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        self.kill().await;
        let pipe = format!(r"\\.\pipe\{}", self.socket_name);
        info!("mpv: launching ({})", pipe);
        self.spawn_process(volume)?;

        for _ in 0..CONNECT_ATTEMPTS {
            tokio::time::sleep(CONNECT_POLL).await;
            if let Ok(client) = ClientOptions::new().open(&pipe) {
                debug!("mpv: connected to {}", pipe);
                let (read, write) = tokio::io::split(client);
                return Ok(start_io(read, write, events));
            }
        }
        self.kill().await;
        anyhow::bail!("mpv named pipe {} did not come up", pipe)
    }
}

fn start_io<R, W>(read: R, write: W, events: mpsc::Sender<MpvEvent>) -> MpvHandle
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(writer(write, rx, pending.clone()));
    tokio::spawn(reader(BufReader::new(read), pending, events));
    MpvHandle { tx }
}

async fn fail_all(pending: &PendingMap, reason: &str) {
    for (_, reply) in pending.lock().await.drain() {
        let _ = reply.send(Err(anyhow!("mpv IPC {}", reason)));
    }
}

async fn reader<R>(mut lines: BufReader<R>, pending: PendingMap, events: mpsc::Sender<MpvEvent>)
where
    R: AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match lines.read_line(&mut line).await {
            Ok(0) => {
                debug!("mpv reader: closed");
                fail_all(&pending, "closed").await;
                return;
            }
            Err(e) => {
                warn!("mpv reader: {}", e);
                fail_all(&pending, "read error").await;
                return;
            }
            Ok(_) => {}
        }

        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        let value: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                debug!("mpv reader: bad line '{}': {}", text, e);
                continue;
            }
        };

        match value.get("request_id").and_then(Value::as_u64) {
            Some(id) => {
                let Some(reply) = pending.lock().await.remove(&id) else {
                    debug!("mpv reader: unmatched reply {}", id);
                    continue;
                };
                let result = match value.get("error").and_then(Value::as_str) {
                    Some("success") => Ok(value),
                    other => Err(anyhow!("mpv error: {}", other.unwrap_or("unknown"))),
                };
                let _ = reply.send(result);
            }
            None => {
                if events.send(MpvEvent { raw: value }).await.is_err() {
                    debug!("mpv reader: event consumer gone");
                    return;
                }
            }
        }
    }
}

async fn writer<W>(mut out: W, mut rx: mpsc::Receiver<MpvRequest>, pending: PendingMap)
where
    W: AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        pending.lock().await.insert(req.id, req.reply);
        if let Err(e) = out.write_all(req.line.as_bytes()).await {
            warn!("mpv writer: {}", e);
            if let Some(reply) = pending.lock().await.remove(&req.id) {
                let _ = reply.send(Err(anyhow!("mpv write failed: {}", e)));
            }
            break;
        }
    }
    debug!("mpv writer: exiting");
}
