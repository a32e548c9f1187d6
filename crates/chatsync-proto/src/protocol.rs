use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current protocol version.  Bump this when the wire format changes in a
/// breaking way.  Clients check this on connect and can refuse to talk to an
/// incompatible daemon.
pub const PROTOCOL_VERSION: u32 = 1;

// ── Event stream ──────────────────────────────────────────────────────────────

/// One chat message (or any other record) that becomes due `offset_secs`
/// seconds after the start of the stream it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub id: String,
    pub offset_secs: f64,
    /// Opaque to the sync core.  Renderers pick the fields they understand.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl TimestampedEvent {
    /// String field of the payload, `None` when absent or not a string.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(|v| v.as_str())
    }
}

// ── Catalog / matching ────────────────────────────────────────────────────────

/// One entry of the catalog: a recorded event stream that may belong to the
/// media currently loaded in the player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateMetadata {
    pub id: String,
    pub title: String,
    /// 0.0 when the catalog did not provide a usable duration.
    #[serde(default)]
    pub duration_secs: f64,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl CandidateMetadata {
    pub fn has_duration(&self) -> bool {
        self.duration_secs.is_finite() && self.duration_secs > 0.0
    }
}

/// What we know about the media playing in the player.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TargetMetadata {
    pub title: String,
    #[serde(default)]
    pub duration_secs: Option<f64>,
}

impl TargetMetadata {
    /// Duration if known and positive.
    pub fn known_duration(&self) -> Option<f64> {
        self.duration_secs.filter(|d| d.is_finite() && *d > 0.0)
    }
}

/// How the stream to replay gets chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionMode {
    /// The user always picks from the catalog.
    Manual,
    /// Rank the catalog against the player's media, the user picks.
    AutoSearch,
    /// Rank, and pick the top match when it is confident enough.
    #[default]
    AutoSelect,
}

impl SelectionMode {
    pub fn is_automatic(self) -> bool {
        !matches!(self, SelectionMode::Manual)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::AutoSearch => "auto-search",
            Self::AutoSelect => "auto-select",
        }
    }
}

impl std::str::FromStr for SelectionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "manual" => Ok(Self::Manual),
            "auto-search" | "autosearch" => Ok(Self::AutoSearch),
            "auto-select" | "autoselect" => Ok(Self::AutoSelect),
            other => Err(format!("unknown selection mode '{}'", other)),
        }
    }
}

/// Where the selection state machine currently is.
///
/// Transitions:
///   Searching -> AutoSearching | AutoSearchError | SelectedWaiting
///             | SelectedNotify | SelectedPlaying
///   AutoSearching -> Searching | SelectedWaiting | SelectedPlaying
///   AutoSearchError -> Searching
///   SelectedWaiting -> SelectedPlaying
///   SelectedNotify -> SelectedPlaying
///   (any) -> Searching on reset / unselect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionState {
    #[default]
    Searching,
    AutoSearching,
    AutoSearchError,
    SelectedWaiting,
    SelectedNotify,
    SelectedPlaying,
}

impl SelectionState {
    pub fn is_selected(self) -> bool {
        matches!(
            self,
            Self::SelectedWaiting | Self::SelectedNotify | Self::SelectedPlaying
        )
    }
}

/// Thresholds for trusting the top-ranked candidate without asking the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoSelectConfig {
    /// Minimum score (0..=100) the top match needs.
    #[serde(default = "default_min_match_threshold")]
    pub min_match_threshold: u32,
    /// Required gap between the best and the second-best score.
    #[serde(default = "default_match_margin_threshold")]
    pub match_margin_threshold: u32,
    /// How long the "automatically selected" notice stays up.  0 skips it.
    #[serde(default = "default_notification_duration_secs")]
    pub notification_duration_secs: u32,
}

impl Default for AutoSelectConfig {
    fn default() -> Self {
        Self {
            min_match_threshold: default_min_match_threshold(),
            match_margin_threshold: default_match_margin_threshold(),
            notification_duration_secs: default_notification_duration_secs(),
        }
    }
}

fn default_min_match_threshold() -> u32 {
    80
}

fn default_match_margin_threshold() -> u32 {
    20
}

fn default_notification_duration_secs() -> u32 {
    5
}

/// Scoring knobs for the matcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchConfig {
    /// Allowed duration difference, as a percentage of the candidate duration.
    #[serde(default = "default_duration_tolerance_percent")]
    pub duration_tolerance_percent: f64,
    #[serde(default)]
    pub duration_weight: u32,
    #[serde(default = "default_title_weight")]
    pub title_weight: u32,
    /// Multiplier for purely numeric title tokens ("part 2", "day 14").
    #[serde(default = "default_numeric_weight")]
    pub numeric_weight: u32,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            duration_tolerance_percent: default_duration_tolerance_percent(),
            duration_weight: 0,
            title_weight: default_title_weight(),
            numeric_weight: default_numeric_weight(),
        }
    }
}

fn default_duration_tolerance_percent() -> f64 {
    10.0
}

fn default_title_weight() -> u32 {
    100
}

fn default_numeric_weight() -> u32 {
    4
}

// ── View ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub message: String,
    pub detail: Option<String>,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrowserEntry {
    pub candidate: CandidateMetadata,
    pub score: Option<u32>,
}

/// The candidate list shown while no stream is selected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateBrowser {
    pub entries: Vec<BrowserEntry>,
    pub reveal_scores: bool,
}

/// Everything a renderer needs besides the message window itself.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ViewState {
    pub state: SelectionState,
    pub mode: SelectionMode,
    pub show_stream: bool,
    pub notification: Option<Notification>,
    pub browser: Option<CandidateBrowser>,
    pub selected: Option<CandidateMetadata>,
}

// ── Playback ──────────────────────────────────────────────────────────────────

/// Discrete signals from the playback collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "kebab-case")]
pub enum PlaybackSignal {
    Ready { duration_secs: f64 },
    Play,
    Pause,
    RateChange { rate: f64 },
    Seek { position_secs: f64 },
    VideoChanged { title: Option<String> },
    Ended,
}

// ── Wire protocol ─────────────────────────────────────────────────────────────

/// Messages sent from a client to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    Select { candidate_id: String },
    Unselect,
    Reset,
    SetSearchText { text: String },
    SetMode { mode: SelectionMode },
    SetAutoSelectConfig { config: AutoSelectConfig },
    SetDelay { seconds: f64 },
    /// Re-fetch the catalog from its configured source.
    ReloadCatalog,
    GetState,
}

/// Messages sent from the daemon to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "broadcast")]
pub enum Broadcast {
    /// Sent immediately on connect: protocol version + full snapshot.
    Hello {
        protocol_version: u32,
        snapshot: SessionSnapshot,
    },
    State {
        data: SessionSnapshot,
    },
    /// Newly due events.  When `replaced` is set the client drops its window
    /// first (seek, stream change).
    Window {
        events: Vec<TimestampedEvent>,
        replaced: bool,
    },
    Log {
        message: String,
    },
    Error {
        message: String,
    },
}

/// Published copy of the session.  `rev` increases on every change so
/// clients can detect missed updates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionSnapshot {
    #[serde(default)]
    pub rev: u64,
    pub view: ViewState,
    pub target: Option<TargetMetadata>,
    /// Current bounded window, oldest first.
    pub window: Vec<TimestampedEvent>,
    pub position_secs: f64,
    pub rate: f64,
    pub playing: bool,
    pub delay_secs: f64,
    pub catalog_len: usize,
    #[serde(default)]
    pub player_connected: bool,
}

/// Wrapper for socket communication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Command(Command),
    Broadcast(Broadcast),
}

impl Message {
    /// 4-byte big-endian length prefix followed by the JSON body.
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        let len = u32::try_from(json.len())?;
        let mut result = Vec::with_capacity(4 + json.len());
        result.extend_from_slice(&len.to_be_bytes());
        result.extend_from_slice(&json);
        Ok(result)
    }

    /// Decode one frame from the front of `data`, returning the number of
    /// bytes consumed.  Errors when the frame is incomplete.
    pub fn decode(data: &[u8]) -> anyhow::Result<(Self, usize)> {
        if data.len() < 4 {
            anyhow::bail!("Insufficient data for length header");
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if data.len() < 4 + len {
            anyhow::bail!("Insufficient data for message");
        }
        let msg: Self = serde_json::from_slice(&data[4..4 + len])?;
        Ok((msg, 4 + len))
    }
}
