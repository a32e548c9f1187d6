/// SessionCore: single-owner event loop around the replay session.
///
/// Every input (client commands, mpv events, finished loads, timers) arrives
/// as a `SessionEvent`.  SessionCore owns the `ReplaySession` and the mpv
/// connection exclusively; socket and HTTP handlers only send events and read
/// the published `SessionSnapshot`.
///
/// Two timers run outside the loop and report back through the channel: the
/// debounced window poll and the auto-select notification.  Both are
/// replaced (aborted and respawned) on every reschedule, so a burst of
/// signals collapses into a single pending tick.
use std::time::{Duration, Instant};

use chatsync_engine::{EventStream, ReplaySession, SelectionEffect};
use chatsync_proto::config::{Config, JsonSettingsProvider};
use chatsync_proto::protocol::{CandidateMetadata, Command, PlaybackSignal};
use chatsync_proto::state::SnapshotStore;
use tokio::sync::{broadcast, mpsc};
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use crate::catalog;
use crate::mpv::{self, MpvDriver, MpvEvent, MpvHandle, PlayerUpdate};
use crate::BroadcastMessage;

/// Delay before a poll requested by a signal runs.
const SETTLE: Duration = Duration::from_millis(50);
const HEARTBEAT: Duration = Duration::from_secs(5);

// ── SessionEvent ──────────────────────────────────────────────────────────────

/// All inputs into the SessionCore loop.
#[derive(Debug)]
pub enum SessionEvent {
    /// A command from a TCP client or the HTTP API.
    ClientCommand(Command),
    /// Raw mpv unsolicited event (forwarded from the reader task).
    MpvEvent(MpvEvent),
    /// The IPC connection with this id closed.
    PlayerDisconnected { connection: u64 },
    /// `time-pos` sampled after a seek or a fresh connection.
    PositionSampled(f64),
    CatalogLoaded(anyhow::Result<Vec<CandidateMetadata>>),
    StreamLoaded {
        generation: u64,
        candidate_id: String,
        result: anyhow::Result<EventStream>,
    },
    PollTick,
    NotifyElapsed { ticket: u64 },
    /// Reattach to the player / notice that it died.
    HeartbeatTick,
    Shutdown,
}

// ── SessionCore ───────────────────────────────────────────────────────────────

pub struct SessionCore {
    config: Config,
    session: ReplaySession,
    store: SnapshotStore,
    mpv_driver: MpvDriver,
    /// Live handle to the mpv IO tasks.  `None` while no player is attached.
    mpv_handle: Option<MpvHandle>,
    /// Bumped on every connection attempt so a late disconnect from an
    /// earlier connection is recognisable.
    connection: u64,
    event_tx: mpsc::Sender<SessionEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
    poll_task: Option<AbortHandle>,
    notify_task: Option<AbortHandle>,
    load_task: Option<AbortHandle>,
    /// Last media-title / duration seen for the current file.
    last_title: Option<String>,
    last_duration: Option<f64>,
}

impl SessionCore {
    pub fn new(
        config: Config,
        store: SnapshotStore,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
        event_tx: mpsc::Sender<SessionEvent>,
    ) -> Self {
        let settings = JsonSettingsProvider::new(config.daemon.settings_file.clone());
        info!("Settings file: {}", settings.path().display());
        let session = ReplaySession::new(Box::new(settings), config.matching.clone(), Instant::now());
        let mpv_driver = MpvDriver::new(config.mpv.socket.clone(), config.mpv.extra_args.clone());

        Self {
            config,
            session,
            store,
            mpv_driver,
            mpv_handle: None,
            connection: 0,
            event_tx,
            broadcast_tx,
            poll_task: None,
            notify_task: None,
            load_task: None,
            last_title: None,
            last_duration: None,
        }
    }

    /// Run the core event loop until `Shutdown` or until every sender is gone.
    pub async fn run(
        mut self,
        mut event_rx: mpsc::Receiver<SessionEvent>,
        media: Option<String>,
    ) -> anyhow::Result<()> {
        info!("SessionCore: starting event loop");

        let heartbeat_tx = self.event_tx.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(HEARTBEAT).await;
                if heartbeat_tx.send(SessionEvent::HeartbeatTick).await.is_err() {
                    break;
                }
            }
        });

        let shutdown_tx = self.event_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = shutdown_tx.send(SessionEvent::Shutdown).await;
            }
        });

        self.connect_player(media.as_deref()).await;
        self.spawn_catalog_load();
        self.publish().await;

        loop {
            match event_rx.recv().await {
                None => {
                    info!("SessionCore: event channel closed, shutting down");
                    break;
                }
                Some(SessionEvent::Shutdown) => {
                    info!("SessionCore: shutdown requested");
                    break;
                }
                Some(SessionEvent::ClientCommand(cmd)) => {
                    info!("SessionCore: command {:?}", cmd);
                    self.handle_command(cmd);
                    self.publish().await;
                }
                Some(SessionEvent::MpvEvent(evt)) => {
                    self.handle_mpv_event(evt).await;
                }
                Some(SessionEvent::PlayerDisconnected { connection }) => {
                    if connection == self.connection && self.mpv_handle.is_some() {
                        warn!("SessionCore: player connection lost");
                        self.player_lost().await;
                    } else {
                        debug!("SessionCore: stale disconnect for connection {}", connection);
                    }
                }
                Some(SessionEvent::PositionSampled(position_secs)) => {
                    self.apply_signal(PlaybackSignal::Seek { position_secs }).await;
                }
                Some(SessionEvent::CatalogLoaded(result)) => match result {
                    Ok(candidates) => {
                        let effects = self.session.set_catalog(candidates);
                        self.apply_effects(effects);
                        self.publish().await;
                    }
                    Err(e) => self.report_error(format!("Failed to load catalog: {}", e)),
                },
                Some(SessionEvent::StreamLoaded {
                    generation,
                    candidate_id,
                    result,
                }) => {
                    self.handle_stream_loaded(generation, candidate_id, result).await;
                }
                Some(SessionEvent::PollTick) => {
                    self.poll_task = None;
                    self.poll().await;
                }
                Some(SessionEvent::NotifyElapsed { ticket }) => {
                    self.notify_task = None;
                    let effects = self.session.notify_elapsed(ticket);
                    self.apply_effects(effects);
                    self.request_poll();
                    self.publish().await;
                }
                Some(SessionEvent::HeartbeatTick) => {
                    if self.mpv_handle.is_some() && self.mpv_driver.process_exited() {
                        warn!("SessionCore: heartbeat: mpv process exited");
                        self.player_lost().await;
                    } else if self.mpv_handle.is_none() {
                        self.connect_player(None).await;
                    }
                }
            }
        }

        self.cleanup().await;
        Ok(())
    }

    // ── player ────────────────────────────────────────────────────────────────

    async fn connect_player(&mut self, media: Option<&str>) {
        self.connection += 1;
        let connection = self.connection;

        // One forwarder per connection; it reports the disconnect when the
        // reader task drops its sender.
        let (mpv_tx, mut mpv_rx) = mpsc::channel::<MpvEvent>(64);
        let core_tx = self.event_tx.clone();
        tokio::spawn(async move {
            while let Some(evt) = mpv_rx.recv().await {
                if core_tx.send(SessionEvent::MpvEvent(evt)).await.is_err() {
                    return;
                }
            }
            let _ = core_tx
                .send(SessionEvent::PlayerDisconnected { connection })
                .await;
        });

        let handle = match media {
            Some(media) => match self.mpv_driver.spawn_and_connect(media, mpv_tx).await {
                Ok(h) => Some(h),
                Err(e) => {
                    error!("SessionCore: failed to start mpv: {}", e);
                    None
                }
            },
            None => self.mpv_driver.attach(mpv_tx).await,
        };
        let Some(handle) = handle else {
            debug!(
                "SessionCore: no player on {}, retrying in {:?}",
                self.mpv_driver.socket_name(),
                HEARTBEAT
            );
            return;
        };

        info!("SessionCore: player connected");
        let h = handle.clone();
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            h.observe_all_properties().await;
            sample_position(&h, &tx).await;
        });
        self.mpv_handle = Some(handle);
        self.store.set_player_connected(true).await;
        let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
    }

    async fn player_lost(&mut self) {
        self.mpv_handle = None;
        self.store.set_player_connected(false).await;
        // Freeze the estimate where the player was last seen.
        self.apply_signal(PlaybackSignal::Pause).await;
    }

    async fn handle_mpv_event(&mut self, evt: MpvEvent) {
        let Some(update) = mpv::translate(&evt) else {
            return;
        };
        match update {
            PlayerUpdate::Signal(signal) => self.apply_signal(signal).await,
            PlayerUpdate::Title(title) => {
                if title == self.last_title {
                    return;
                }
                info!("mpv: media-title {:?} → {:?}", self.last_title, title);
                self.last_title = title.clone();
                self.apply_signal(PlaybackSignal::VideoChanged { title }).await;
                if let (true, Some(duration_secs)) = (self.last_title.is_some(), self.last_duration) {
                    self.apply_signal(PlaybackSignal::Ready { duration_secs }).await;
                }
            }
            PlayerUpdate::Duration(duration) => {
                if duration == self.last_duration {
                    return;
                }
                self.last_duration = duration;
                // without a title the target is not known yet
                if let (Some(duration_secs), true) = (duration, self.last_title.is_some()) {
                    self.apply_signal(PlaybackSignal::Ready { duration_secs }).await;
                }
            }
            PlayerUpdate::Resync => {
                if let Some(h) = self.mpv_handle.clone() {
                    let tx = self.event_tx.clone();
                    tokio::spawn(async move { sample_position(&h, &tx).await });
                }
            }
            PlayerUpdate::FileStarted => {
                debug!("mpv: start-file");
                self.last_title = None;
                self.last_duration = None;
            }
        }
    }

    async fn apply_signal(&mut self, signal: PlaybackSignal) {
        let effects = self.session.handle_signal(signal, Instant::now());
        self.apply_effects(effects);
        self.request_poll();
        self.publish().await;
    }

    /// Player position now, falling back to the session estimate.
    async fn current_position(&self) -> f64 {
        if let Some(h) = &self.mpv_handle {
            match h.time_pos().await {
                Ok(Some(pos)) => return pos,
                Ok(None) => {}
                Err(e) => debug!("SessionCore: time-pos unavailable: {}", e),
            }
        }
        self.session.position(Instant::now())
    }

    // ── commands ──────────────────────────────────────────────────────────────

    fn handle_command(&mut self, cmd: Command) {
        let effects = match cmd {
            Command::Select { candidate_id } => self.session.select(&candidate_id),
            Command::Unselect => self.session.unselect(),
            Command::Reset => self.session.reset(),
            Command::SetSearchText { text } => self.session.set_search_text(&text),
            Command::SetMode { mode } => self.session.set_mode(mode),
            Command::SetAutoSelectConfig { config } => self.session.set_auto_select_config(config),
            Command::SetDelay { seconds } => {
                self.session.set_delay(seconds);
                Vec::new()
            }
            Command::ReloadCatalog => {
                self.spawn_catalog_load();
                Vec::new()
            }
            Command::GetState => Vec::new(),
        };
        self.apply_effects(effects);
        self.request_poll();
    }

    // ── effects ───────────────────────────────────────────────────────────────

    fn apply_effects(&mut self, effects: Vec<SelectionEffect>) {
        for effect in effects {
            match effect {
                SelectionEffect::Select {
                    candidate,
                    generation,
                    automatic,
                } => {
                    info!(
                        "SessionCore: loading stream {} ({}) generation={} automatic={}",
                        candidate.id, candidate.title, generation, automatic
                    );
                    if let Some(prev) = self.load_task.take() {
                        prev.abort();
                    }
                    let streams = self.config.catalog.streams.clone();
                    let tx = self.event_tx.clone();
                    let task = tokio::spawn(async move {
                        let result = catalog::load_stream(&streams, &candidate.id).await;
                        let _ = tx
                            .send(SessionEvent::StreamLoaded {
                                generation,
                                candidate_id: candidate.id,
                                result,
                            })
                            .await;
                    });
                    self.load_task = Some(task.abort_handle());
                }
                SelectionEffect::ArmNotifyTimer { ticket, after } => {
                    if let Some(prev) = self.notify_task.take() {
                        prev.abort();
                    }
                    let tx = self.event_tx.clone();
                    let task = tokio::spawn(async move {
                        tokio::time::sleep(after).await;
                        let _ = tx.send(SessionEvent::NotifyElapsed { ticket }).await;
                    });
                    self.notify_task = Some(task.abort_handle());
                }
                SelectionEffect::CancelNotifyTimer => {
                    if let Some(prev) = self.notify_task.take() {
                        prev.abort();
                    }
                }
            }
        }
    }

    async fn handle_stream_loaded(
        &mut self,
        generation: u64,
        candidate_id: String,
        result: anyhow::Result<EventStream>,
    ) {
        self.load_task = None;
        if generation != self.session.machine().generation() {
            debug!("SessionCore: dropped stale load of {}", candidate_id);
            return;
        }
        match result {
            Ok(stream) => {
                let position = self.current_position().await;
                match self
                    .session
                    .stream_loaded(generation, stream, position, Instant::now())
                {
                    Some(effects) => {
                        self.apply_effects(effects);
                        self.request_poll();
                        self.publish().await;
                    }
                    None => debug!("SessionCore: dropped stale stream {}", candidate_id),
                }
            }
            Err(e) => {
                self.report_error(format!("Failed to load stream {}: {}", candidate_id, e));
                let effects = self.session.unselect();
                self.apply_effects(effects);
                self.publish().await;
            }
        }
    }

    fn spawn_catalog_load(&self) {
        let source = self.config.catalog.source.clone();
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let result = catalog::load_catalog(&source).await;
            let _ = tx.send(SessionEvent::CatalogLoaded(result)).await;
        });
    }

    // ── window poll ───────────────────────────────────────────────────────────

    fn request_poll(&mut self) {
        self.schedule_poll(SETTLE);
    }

    fn schedule_poll(&mut self, after: Duration) {
        if let Some(prev) = self.poll_task.take() {
            prev.abort();
        }
        let tx = self.event_tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(SessionEvent::PollTick).await;
        });
        self.poll_task = Some(task.abort_handle());
    }

    async fn poll(&mut self) {
        let Some(batch) = self.session.poll(Instant::now()) else {
            return;
        };
        if !batch.is_noop() {
            debug!(
                "SessionCore: {} due events (replaced={})",
                batch.events.len(),
                batch.replaced
            );
            let _ = self.broadcast_tx.send(BroadcastMessage::Window {
                events: batch.events,
                replaced: batch.replaced,
            });
            self.publish().await;
        }
        if self.session.is_playing() {
            self.schedule_poll(Duration::from_millis(self.config.replay.poll_interval_ms));
        }
    }

    // ── helpers ───────────────────────────────────────────────────────────────

    async fn publish(&self) {
        let mut snapshot = self.session.snapshot(Instant::now());
        snapshot.player_connected = self.mpv_handle.is_some();
        self.store.publish(snapshot).await;
        let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
    }

    fn report_error(&self, message: String) {
        error!("SessionCore: {}", message);
        let _ = self.broadcast_tx.send(BroadcastMessage::Error(message));
    }

    async fn cleanup(&mut self) {
        info!("SessionCore: cleanup");
        for task in [
            self.poll_task.take(),
            self.notify_task.take(),
            self.load_task.take(),
        ]
        .into_iter()
        .flatten()
        {
            task.abort();
        }
        self.mpv_driver.kill().await;
    }
}

async fn sample_position(handle: &MpvHandle, tx: &mpsc::Sender<SessionEvent>) {
    match handle.time_pos().await {
        Ok(Some(pos)) => {
            let _ = tx.send(SessionEvent::PositionSampled(pos)).await;
        }
        Ok(None) => debug!("mpv: no time-pos (nothing loaded)"),
        Err(e) => debug!("mpv: time-pos failed: {}", e),
    }
}
