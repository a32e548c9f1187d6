/// mpv IPC driver with separated reader/writer tasks.
///
/// Architecture:
///
/// ```text
///   MpvDriver::attach() / MpvDriver::spawn_and_connect()
///         │
///         ├── writer_task   ← receives PendingRequest via mpsc, writes → socket
///         └── reader_task   ← reads JSON lines from socket
///                                ├── response (has request_id) → matched oneshot::Sender
///                                └── event / property-change   → event_tx channel
/// ```
///
/// chatsync only follows the player: it observes pause, speed, duration and
/// media-title, listens for seeks and file changes, and asks for `time-pos`
/// when it needs to resync.  [`translate`] turns raw mpv events into
/// [`PlayerUpdate`]s for the session core.
///
/// Platform notes:
/// - Unix:   Unix domain sockets
/// - Windows: Named pipes  \\.\pipe\<name>
use chatsync_proto::protocol::PlaybackSignal;
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

// ── global request-id counter ─────────────────────────────────────────────────

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

// ── observation property IDs ──────────────────────────────────────────────────

pub const OBS_PAUSE: u64 = 1;
pub const OBS_SPEED: u64 = 2;
pub const OBS_DURATION: u64 = 3;
pub const OBS_MEDIA_TITLE: u64 = 4;

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>;

// ── internal channel types ────────────────────────────────────────────────────

struct PendingRequest {
    req_id: u64,
    payload: String, // serialised JSON line (already has '\n')
    reply: oneshot::Sender<anyhow::Result<Value>>,
}

/// An mpv event / property-change that arrived unsolicited (no request_id).
#[derive(Debug, Clone)]
pub struct MpvEvent {
    pub raw: Value,
}

impl MpvEvent {
    /// Returns `Some((obs_id, data))` if this is a property-change event.
    pub fn as_property_change(&self) -> Option<(u64, &Value)> {
        if self.raw.get("event")?.as_str()? == "property-change" {
            let id = self.raw.get("id")?.as_u64()?;
            let data = self.raw.get("data").unwrap_or(&Value::Null);
            Some((id, data))
        } else {
            None
        }
    }

    /// Returns the event name, e.g. "end-file", "start-file", "seek".
    pub fn event_name(&self) -> Option<&str> {
        self.raw.get("event")?.as_str()
    }
}

// ── event translation ─────────────────────────────────────────────────────────

/// What an mpv event means for the replay session.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerUpdate {
    Signal(PlaybackSignal),
    /// Current media title (observed; may repeat the previous value).
    Title(Option<String>),
    Duration(Option<f64>),
    /// The position jumped; sample `time-pos` and resync.
    Resync,
    /// A new file begins; titles and durations seen so far are stale.
    FileStarted,
}

pub fn translate(evt: &MpvEvent) -> Option<PlayerUpdate> {
    if let Some((obs_id, data)) = evt.as_property_change() {
        return match obs_id {
            OBS_PAUSE => data.as_bool().map(|paused| {
                PlayerUpdate::Signal(if paused {
                    PlaybackSignal::Pause
                } else {
                    PlaybackSignal::Play
                })
            }),
            OBS_SPEED => data
                .as_f64()
                .map(|rate| PlayerUpdate::Signal(PlaybackSignal::RateChange { rate })),
            OBS_DURATION => Some(PlayerUpdate::Duration(
                data.as_f64().filter(|d| d.is_finite() && *d > 0.0),
            )),
            OBS_MEDIA_TITLE => Some(PlayerUpdate::Title(
                data.as_str()
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string),
            )),
            _ => None,
        };
    }

    match evt.event_name()? {
        "seek" | "playback-restart" => Some(PlayerUpdate::Resync),
        "start-file" => Some(PlayerUpdate::FileStarted),
        "end-file" => {
            let reason = evt
                .raw
                .get("reason")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown");
            info!("mpv: end-file reason={}", reason);
            Some(PlayerUpdate::Signal(PlaybackSignal::Ended))
        }
        _ => None,
    }
}

// ── public handle ─────────────────────────────────────────────────────────────

/// Cloneable handle to the mpv writer task.  Use `send()` to fire a command
/// and await the response.
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

    /// Current playback position in seconds; `None` while nothing is loaded.
    pub async fn time_pos(&self) -> anyhow::Result<Option<f64>> {
        let resp = self.send(json!(["get_property", "time-pos"])).await?;
        Ok(resp["data"].as_f64())
    }

    /// Register observe_property for everything the session follows.
    /// Must be called after every fresh connection; mpv answers each
    /// registration with the current value.
    pub async fn observe_all_properties(&self) {
        let props = [
            (OBS_PAUSE, "pause"),
            (OBS_SPEED, "speed"),
            (OBS_DURATION, "duration"),
            (OBS_MEDIA_TITLE, "media-title"),
        ];
        for (id, name) in &props {
            match self.send(json!(["observe_property", id, name])).await {
                Ok(_) => debug!("mpv: observe_property id={} name={}", id, name),
                Err(e) => warn!("mpv: observe_property {} failed: {}", name, e),
            }
        }
    }
}

// ── driver ────────────────────────────────────────────────────────────────────

/// Connects to a player's IPC socket, optionally launching mpv first.
pub struct MpvDriver {
    socket_name: String,
    extra_args: Vec<String>,
    process: Option<tokio::process::Child>,
}

impl MpvDriver {
    pub fn new(socket_name: String, extra_args: Vec<String>) -> Self {
        Self {
            socket_name,
            extra_args,
            process: None,
        }
    }

    pub fn socket_name(&self) -> &str {
        &self.socket_name
    }

    /// True when we launched mpv and it has since exited.
    pub fn process_exited(&mut self) -> bool {
        match self.process {
            Some(ref mut child) => child.try_wait().ok().flatten().is_some(),
            None => false,
        }
    }

    /// Kill the process if we launched one.
    pub async fn kill(&mut self) {
        if let Some(mut p) = self.process.take() {
            let _ = p.kill().await;
        }
    }

    fn spawn_process(&mut self, media: &str) -> anyhow::Result<()> {
        info!("mpv: spawning player for {}", media);
        let mpv_binary = chatsync_proto::platform::find_mpv_binary()
            .ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?;
        let ipc_arg = chatsync_proto::platform::mpv_socket_arg(&self.socket_name);

        let child = tokio::process::Command::new(mpv_binary)
            .arg(&ipc_arg)
            .arg("--quiet")
            .args(&self.extra_args)
            .arg(media)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()?;
        self.process = Some(child);
        Ok(())
    }

    // ── spawn / attach ────────────────────────────────────────────────────────

    #[cfg(unix)]
    pub async fn spawn_and_connect(
        &mut self,
        media: &str,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        self.kill().await;

        let socket_path = std::path::PathBuf::from(&self.socket_name);
        let _ = tokio::fs::remove_file(&socket_path).await;
        self.spawn_process(media)?;

        // Wait for socket to appear
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
        Ok(Self::start_io_tasks(stream, event_tx))
    }

    /// Connect to a player that is already running.
    #[cfg(unix)]
    pub async fn attach(&mut self, event_tx: mpsc::Sender<MpvEvent>) -> Option<MpvHandle> {
        let socket_path = std::path::PathBuf::from(&self.socket_name);
        if !socket_path.exists() {
            return None;
        }
        match UnixStream::connect(&socket_path).await {
            Ok(stream) => {
                info!("mpv: attached to {}", self.socket_name);
                Some(Self::start_io_tasks(stream, event_tx))
            }
            Err(e) => {
                debug!("mpv: failed to attach: {}", e);
                None
            }
        }
    }

    #[cfg(unix)]
    fn start_io_tasks(stream: UnixStream, event_tx: mpsc::Sender<MpvEvent>) -> MpvHandle {
        let (read_half, write_half) = stream.into_split();
        Self::start_io(BufReader::new(read_half), write_half, event_tx)
    }

    // ── Windows ───────────────────────────────────────────────────────────────

    #[cfg(windows)]
    pub async fn spawn_and_connect(
        &mut self,
        media: &str,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        self.kill().await;
        self.spawn_process(media)?;

        let pipe_path = format!(r"\\.\pipe\{}", self.socket_name);
        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if let Ok(client) = ClientOptions::new().open(&pipe_path) {
                info!("mpv: connected to named pipe");
                return Ok(Self::start_io_tasks_windows(client, event_tx));
            }
        }
        anyhow::bail!("mpv named pipe did not appear")
    }

    #[cfg(windows)]
    pub async fn attach(&mut self, event_tx: mpsc::Sender<MpvEvent>) -> Option<MpvHandle> {
        let pipe_path = format!(r"\\.\pipe\{}", self.socket_name);
        match ClientOptions::new().open(&pipe_path) {
            Ok(client) => {
                info!("mpv: attached to named pipe {}", self.socket_name);
                Some(Self::start_io_tasks_windows(client, event_tx))
            }
            Err(e) => {
                debug!("mpv: failed to attach to named pipe: {}", e);
                None
            }
        }
    }

    #[cfg(windows)]
    fn start_io_tasks_windows(
        pipe: tokio::net::windows::named_pipe::NamedPipeClient,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> MpvHandle {
        let (read_half, write_half) = tokio::io::split(pipe);
        Self::start_io(BufReader::new(read_half), write_half, event_tx)
    }

    fn start_io<R, W>(
        reader: BufReader<R>,
        writer: W,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> MpvHandle
    where
        R: tokio::io::AsyncRead + Unpin + Send + 'static,
        W: tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        // req_id → reply channel.  Writer inserts, reader resolves.
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (cmd_tx, cmd_rx) = mpsc::channel::<PendingRequest>(64);

        tokio::spawn(writer_task(writer, cmd_rx, pending.clone()));
        tokio::spawn(reader_task(reader, pending, event_tx));

        MpvHandle { tx: cmd_tx }
    }
}

// ── reader task ───────────────────────────────────────────────────────────────

async fn fail_pending(pending: &PendingMap, reason: &str) {
    let mut map = pending.lock().await;
    for (_, tx) in map.drain() {
        let _ = tx.send(Err(anyhow::anyhow!("{}", reason)));
    }
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
                fail_pending(&pending, "mpv IPC connection closed").await;
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
                    let mut map = pending.lock().await;
                    if let Some(tx) = map.remove(&req_id) {
                        let result = if val["error"].as_str() == Some("success") {
                            Ok(val)
                        } else {
                            let err = val["error"]
                                .as_str()
                                .unwrap_or("unknown error")
                                .to_string();
                            debug!("mpv reader: response req={} err={}", req_id, err);
                            Err(anyhow::anyhow!("mpv error: {}", err))
                        };
                        let _ = tx.send(result);
                    } else {
                        debug!("mpv reader: response for unknown req={}", req_id);
                    }
                } else {
                    debug!("mpv reader: event {}", trimmed);
                    if event_tx.send(MpvEvent { raw: val }).await.is_err() {
                        break;
                    }
                }
            }
            Err(e) => {
                warn!("mpv reader: read error: {}", e);
                fail_pending(&pending, "mpv IPC read error").await;
                break;
            }
        }
    }
}

// ── writer task ───────────────────────────────────────────────────────────────

async fn writer_task<W>(mut writer: W, mut rx: mpsc::Receiver<PendingRequest>, pending: PendingMap)
where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // Register reply channel before writing so reader can match it
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

#[cfg(test)]
mod tests {
    use super::*;

    fn event(raw: Value) -> MpvEvent {
        MpvEvent { raw }
    }

    fn property(id: u64, data: Value) -> MpvEvent {
        event(json!({ "event": "property-change", "id": id, "name": "x", "data": data }))
    }

    #[test]
    fn test_pause_and_speed() {
        assert_eq!(
            translate(&property(OBS_PAUSE, json!(true))),
            Some(PlayerUpdate::Signal(PlaybackSignal::Pause))
        );
        assert_eq!(
            translate(&property(OBS_PAUSE, json!(false))),
            Some(PlayerUpdate::Signal(PlaybackSignal::Play))
        );
        assert_eq!(
            translate(&property(OBS_SPEED, json!(1.5))),
            Some(PlayerUpdate::Signal(PlaybackSignal::RateChange { rate: 1.5 }))
        );
        assert_eq!(translate(&property(OBS_PAUSE, Value::Null)), None);
    }

    #[test]
    fn test_title_and_duration() {
        assert_eq!(
            translate(&property(OBS_MEDIA_TITLE, json!("  Cuphead Part 1 "))),
            Some(PlayerUpdate::Title(Some("Cuphead Part 1".into())))
        );
        assert_eq!(
            translate(&property(OBS_MEDIA_TITLE, json!(""))),
            Some(PlayerUpdate::Title(None))
        );
        assert_eq!(
            translate(&property(OBS_DURATION, json!(3600.5))),
            Some(PlayerUpdate::Duration(Some(3600.5)))
        );
        assert_eq!(
            translate(&property(OBS_DURATION, Value::Null)),
            Some(PlayerUpdate::Duration(None))
        );
    }

    #[test]
    fn test_named_events() {
        assert_eq!(
            translate(&event(json!({ "event": "playback-restart" }))),
            Some(PlayerUpdate::Resync)
        );
        assert_eq!(
            translate(&event(json!({ "event": "seek" }))),
            Some(PlayerUpdate::Resync)
        );
        assert_eq!(
            translate(&event(json!({ "event": "start-file", "playlist_entry_id": 1 }))),
            Some(PlayerUpdate::FileStarted)
        );
        assert_eq!(
            translate(&event(json!({ "event": "end-file", "reason": "eof" }))),
            Some(PlayerUpdate::Signal(PlaybackSignal::Ended))
        );
        assert_eq!(translate(&event(json!({ "event": "file-loaded" }))), None);
        assert_eq!(translate(&property(99, json!(1))), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_handle_round_trip_over_socket() {
        use tokio::net::UnixListener;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mpv.sock");
        let listener = UnixListener::bind(&path).unwrap();

        // fake player: answers time-pos, then pushes a pause event
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut lines = BufReader::new(read_half).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let req: Value = serde_json::from_str(&line).unwrap();
                let id = req["request_id"].as_u64().unwrap();
                let reply = json!({ "data": 42.5, "error": "success", "request_id": id });
                write_half
                    .write_all(format!("{}\n", reply).as_bytes())
                    .await
                    .unwrap();
                let evt = json!({ "event": "property-change", "id": OBS_PAUSE, "data": true });
                write_half
                    .write_all(format!("{}\n", evt).as_bytes())
                    .await
                    .unwrap();
            }
        });

        let (event_tx, mut event_rx) = mpsc::channel(8);
        let mut driver = MpvDriver::new(path.display().to_string(), Vec::new());
        let handle = driver.attach(event_tx).await.expect("socket is listening");

        assert_eq!(handle.time_pos().await.unwrap(), Some(42.5));
        let evt = event_rx.recv().await.unwrap();
        assert_eq!(
            translate(&evt),
            Some(PlayerUpdate::Signal(PlaybackSignal::Pause))
        );
    }
}
