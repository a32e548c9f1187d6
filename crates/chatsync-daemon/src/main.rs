mod catalog;
mod core;
mod http;
mod mpv;
mod socket;

use chatsync_proto::config::Config;
use chatsync_proto::protocol::TimestampedEvent;
use chatsync_proto::state::SnapshotStore;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug, Clone)]
pub enum BroadcastMessage {
    StateUpdated,
    /// Newly due events; `replaced` tells clients to drop their window first.
    Window {
        events: Vec<TimestampedEvent>,
        replaced: bool,
    },
    Log(String),
    Error(String),
}

/// A custom tracing layer that forwards log messages to the broadcast channel
struct BroadcastLayer {
    sender: broadcast::Sender<BroadcastMessage>,
}

impl BroadcastLayer {
    fn new(sender: broadcast::Sender<BroadcastMessage>) -> Self {
        Self { sender }
    }
}

impl<S> tracing_subscriber::Layer<S> for BroadcastLayer
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        // Only WARN and ERROR reach clients
        let level = event.metadata().level();
        if !matches!(*level, tracing::Level::WARN | tracing::Level::ERROR) {
            return;
        }

        let mut message = String::new();
        let now = chrono::Local::now();
        message.push_str(&format!("{} [{}] ", now.format("%H:%M:%S"), level));
        let mut visitor = MessageVisitor(&mut message);
        event.record(&mut visitor);

        // no receivers is fine
        let _ = self.sender.send(BroadcastMessage::Log(message));
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl<'a> tracing::field::Visit for MessageVisitor<'a> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0.push_str(&format!("{:?}", value));
        } else {
            self.0.push_str(&format!(" {}={:?}", field.name(), value));
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Broadcast channel first so logging can use it
    let (broadcast_tx, _) = broadcast::channel::<BroadcastMessage>(256);

    let data_dir = chatsync_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("chatsync.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(BroadcastLayer::new(broadcast_tx.clone()))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,chatsync_daemon=debug")),
        )
        .init();

    info!("Log file: {:?}", log_path);

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());

    // Optional media to open in a player we launch ourselves; without it we
    // follow whatever mpv is listening on the configured socket.
    let media = std::env::args().nth(1);

    // Event channel: all external inputs funnel into SessionCore
    let (event_tx, event_rx) = tokio::sync::mpsc::channel::<core::SessionEvent>(256);

    let store = SnapshotStore::new();
    let session_core = core::SessionCore::new(
        config.clone(),
        store.clone(),
        broadcast_tx.clone(),
        event_tx.clone(),
    );

    let _socket_handle = socket::start_server(
        config.http.bind_address.clone(),
        chatsync_proto::platform::DAEMON_TCP_PORT,
        store.clone(),
        event_tx.clone(),
        broadcast_tx.clone(),
    );

    if config.http.enabled {
        let _http_handle = http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            store.clone(),
            event_tx.clone(),
        );
    }

    info!("chatsync initialised, running event loop");
    session_core.run(event_rx, media).await?;

    Ok(())
}
