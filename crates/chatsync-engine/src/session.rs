//! One replay session: clock, scheduler and selection wired together.
//!
//! The session is synchronous and owned by a single task.  Anything that
//! needs time or I/O comes back out as a [`SelectionEffect`].

use std::time::Instant;

use chatsync_proto::config::{ReplaySettings, SettingsProvider};
use chatsync_proto::protocol::{
    AutoSelectConfig, CandidateMetadata, MatchConfig, PlaybackSignal, SelectionMode,
    SessionSnapshot, TargetMetadata, TimestampedEvent, ViewState,
};
use tracing::{debug, info, warn};

use crate::clock::{PlaybackClock, PlaybackState};
use crate::scheduler::{MessageWindowScheduler, WindowBatch};
use crate::selection::{SelectionEffect, SelectionMachine};
use crate::stream::EventStream;

pub struct ReplaySession {
    clock: PlaybackClock,
    scheduler: MessageWindowScheduler,
    machine: SelectionMachine,
    settings: Box<dyn SettingsProvider>,
    delay_secs: f64,
    /// Player is currently playing (not merely has played).
    playing: bool,
}

impl ReplaySession {
    pub fn new(settings: Box<dyn SettingsProvider>, match_config: MatchConfig, now: Instant) -> Self {
        let stored = settings.load();
        info!(
            "[session] mode={} delay={}s min_match={} margin={}",
            stored.mode.label(),
            stored.delay_secs,
            stored.auto_select.min_match_threshold,
            stored.auto_select.match_margin_threshold
        );
        let delay_secs = if stored.delay_secs.is_finite() {
            stored.delay_secs
        } else {
            0.0
        };
        Self {
            clock: PlaybackClock::new(now),
            scheduler: MessageWindowScheduler::new(),
            machine: SelectionMachine::new(stored.mode, stored.auto_select, match_config),
            settings,
            delay_secs,
            playing: false,
        }
    }

    // ── Renderer entry points ─────────────────────────────────────────────────

    pub fn select(&mut self, candidate_id: &str) -> Vec<SelectionEffect> {
        let effects = self.machine.select(candidate_id);
        self.after_effects(effects)
    }

    pub fn unselect(&mut self) -> Vec<SelectionEffect> {
        self.scheduler.clear();
        let effects = self.machine.unselect();
        self.after_effects(effects)
    }

    pub fn reset(&mut self) -> Vec<SelectionEffect> {
        self.clear_stream(Instant::now());
        let effects = self.machine.reset();
        self.resume_playback(effects)
    }

    pub fn set_search_text(&mut self, text: &str) -> Vec<SelectionEffect> {
        let effects = self.machine.set_search_text(text);
        self.after_effects(effects)
    }

    pub fn set_mode(&mut self, mode: SelectionMode) -> Vec<SelectionEffect> {
        let effects = self.machine.set_mode(mode);
        self.persist();
        self.after_effects(effects)
    }

    pub fn set_auto_select_config(&mut self, config: AutoSelectConfig) -> Vec<SelectionEffect> {
        let effects = self.machine.set_auto_select_config(config);
        self.persist();
        self.after_effects(effects)
    }

    /// Takes effect on the next poll; no resync needed.
    pub fn set_delay(&mut self, seconds: f64) {
        if !seconds.is_finite() {
            warn!("[session] ignoring non-finite delay {}", seconds);
            return;
        }
        info!("[session] delay {}s -> {}s", self.delay_secs, seconds);
        self.delay_secs = seconds;
        self.persist();
    }

    // ── Collaborator inputs ───────────────────────────────────────────────────

    pub fn set_catalog(&mut self, candidates: Vec<CandidateMetadata>) -> Vec<SelectionEffect> {
        let effects = self.machine.set_catalog(candidates);
        self.after_effects(effects)
    }

    pub fn set_match_config(&mut self, config: MatchConfig) -> Vec<SelectionEffect> {
        let effects = self.machine.set_match_config(config);
        self.after_effects(effects)
    }

    pub fn set_target(&mut self, target: Option<TargetMetadata>) -> Vec<SelectionEffect> {
        let effects = self.machine.set_target(target);
        self.after_effects(effects)
    }

    pub fn handle_signal(&mut self, signal: PlaybackSignal, now: Instant) -> Vec<SelectionEffect> {
        debug!("[session] {:?}", signal);
        match signal {
            PlaybackSignal::Ready { duration_secs } => {
                let mut target = self.machine.target().cloned().unwrap_or_default();
                target.duration_secs = Some(duration_secs).filter(|d| d.is_finite() && *d > 0.0);
                self.set_target(Some(target))
            }
            PlaybackSignal::Play => {
                self.playing = true;
                self.clock.enable(now);
                let effects = self.machine.playback_started();
                self.after_effects(effects)
            }
            PlaybackSignal::Pause | PlaybackSignal::Ended => {
                self.playing = false;
                self.clock.disable(now);
                Vec::new()
            }
            PlaybackSignal::RateChange { rate } => {
                self.clock.set_rate(rate, now);
                Vec::new()
            }
            PlaybackSignal::Seek { position_secs } => {
                self.clock.resync(position_secs, now);
                self.scheduler.resync(position_secs, self.delay_secs);
                Vec::new()
            }
            PlaybackSignal::VideoChanged { title } => {
                let target = title.map(|title| TargetMetadata {
                    title,
                    duration_secs: None,
                });
                self.clear_stream(now);
                let effects = self.machine.reset_for_target(target);
                self.resume_playback(effects)
            }
        }
    }

    /// A stream requested by a `Select` effect arrived.  `position` is the
    /// player position at load time.  `None` means the load was stale and
    /// nothing changed.
    pub fn stream_loaded(
        &mut self,
        generation: u64,
        stream: EventStream,
        position: f64,
        now: Instant,
    ) -> Option<Vec<SelectionEffect>> {
        let effects = self.machine.stream_loaded(generation)?;
        info!("[session] stream loaded: {} events at {:.1}s", stream.len(), position);
        self.scheduler.load(stream);
        self.clock.resync(position, now);
        self.scheduler.resync(position, self.delay_secs);
        Some(self.after_effects(effects))
    }

    pub fn notify_elapsed(&mut self, ticket: u64) -> Vec<SelectionEffect> {
        let effects = self.machine.notify_elapsed(ticket);
        self.after_effects(effects)
    }

    /// Newly due events, or `None` while no stream is on screen.
    pub fn poll(&mut self, now: Instant) -> Option<WindowBatch> {
        if !self.machine.shows_stream() || !self.scheduler.has_stream() {
            return None;
        }
        let estimate = self.clock.estimate(now);
        Some(self.scheduler.poll(estimate, self.delay_secs))
    }

    // ── Output ────────────────────────────────────────────────────────────────

    pub fn view(&self) -> ViewState {
        self.machine.view()
    }

    pub fn window(&self) -> Vec<TimestampedEvent> {
        self.scheduler.window().cloned().collect()
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.clock.state()
    }

    pub fn position(&self, now: Instant) -> f64 {
        self.clock.estimate(now)
    }

    pub fn delay(&self) -> f64 {
        self.delay_secs
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn machine(&self) -> &SelectionMachine {
        &self.machine
    }

    pub fn settings_provider(&self) -> &dyn SettingsProvider {
        self.settings.as_ref()
    }

    /// Full published copy.  `rev` and `player_connected` are filled in by
    /// whoever publishes it.
    pub fn snapshot(&self, now: Instant) -> SessionSnapshot {
        SessionSnapshot {
            rev: 0,
            view: self.view(),
            target: self.machine.target().cloned(),
            window: self.window(),
            position_secs: self.clock.estimate(now),
            rate: self.clock.rate(),
            playing: self.playing,
            delay_secs: self.delay_secs,
            catalog_len: self.machine.catalog().len(),
            player_connected: false,
        }
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    fn clear_stream(&mut self, now: Instant) {
        self.scheduler.clear();
        self.clock.clear(now);
    }

    /// The machine forgets playback on reset; the player may still be going.
    fn resume_playback(&mut self, mut effects: Vec<SelectionEffect>) -> Vec<SelectionEffect> {
        if self.playing {
            effects.extend(self.machine.playback_started());
        }
        self.after_effects(effects)
    }

    /// A new selection replaces whatever stream was on screen.
    fn after_effects(&mut self, effects: Vec<SelectionEffect>) -> Vec<SelectionEffect> {
        if effects
            .iter()
            .any(|e| matches!(e, SelectionEffect::Select { .. }))
        {
            self.scheduler.clear();
        }
        effects
    }

    fn persist(&mut self) {
        let settings = ReplaySettings {
            mode: self.machine.mode(),
            auto_select: self.machine.auto_select_config(),
            delay_secs: self.delay_secs,
        };
        if let Err(e) = self.settings.store(&settings) {
            warn!("[session] failed to store settings: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::ev;
    use chatsync_proto::config::MemorySettingsProvider;
    use chatsync_proto::protocol::SelectionState;
    use std::time::Duration;

    fn session(mode: SelectionMode) -> ReplaySession {
        let settings = MemorySettingsProvider::new(ReplaySettings {
            mode,
            ..ReplaySettings::default()
        });
        ReplaySession::new(Box::new(settings), MatchConfig::default(), Instant::now())
    }

    fn candidate(id: &str, title: &str) -> CandidateMetadata {
        CandidateMetadata {
            id: id.into(),
            title: title.into(),
            duration_secs: 0.0,
            created_at: None,
        }
    }

    fn stream(n: usize) -> EventStream {
        EventStream::new((0..n).map(|i| ev(&format!("m{}", i), i as f64)).collect()).unwrap()
    }

    #[test]
    fn test_settings_round_trip_through_provider() {
        let mut s = session(SelectionMode::Manual);
        s.set_mode(SelectionMode::AutoSearch);
        s.set_delay(-1.5);
        s.set_delay(f64::NAN);
        let stored = s.settings_provider().load();
        assert_eq!(stored.mode, SelectionMode::AutoSearch);
        assert_eq!(stored.delay_secs, -1.5);
        assert_eq!(s.delay(), -1.5);
    }

    #[test]
    fn test_no_poll_until_stream_is_shown() {
        let mut s = session(SelectionMode::Manual);
        s.set_catalog(vec![candidate("a", "Cuphead")]);
        assert!(s.poll(Instant::now()).is_none());
        s.select("a");
        assert!(s.poll(Instant::now()).is_none());
    }

    #[test]
    fn test_load_resyncs_and_plays() {
        let t0 = Instant::now();
        let mut s = session(SelectionMode::Manual);
        s.set_catalog(vec![candidate("a", "Cuphead")]);
        let effects = s.select("a");
        let generation = match &effects[0] {
            SelectionEffect::Select { generation, .. } => *generation,
            other => panic!("unexpected effect {:?}", other),
        };

        assert!(s.stream_loaded(generation, stream(300), 150.0, t0).is_some());
        assert_eq!(s.view().state, SelectionState::SelectedWaiting);

        let batch = s.poll(t0).unwrap();
        assert!(batch.replaced);
        // 50..=150 are due, the window keeps the newest hundred
        assert_eq!(batch.events.len(), 101);
        assert_eq!(s.window().len(), 100);

        s.handle_signal(PlaybackSignal::Play, t0);
        assert_eq!(s.view().state, SelectionState::SelectedPlaying);
        let batch = s.poll(t0 + Duration::from_secs(3)).unwrap();
        assert_eq!(batch.events.len(), 3);
        assert!(!batch.replaced);
    }

    #[test]
    fn test_seek_replaces_window() {
        let t0 = Instant::now();
        let mut s = session(SelectionMode::Manual);
        s.set_catalog(vec![candidate("a", "Cuphead")]);
        s.select("a");
        s.stream_loaded(1, stream(300), 10.0, t0);
        s.poll(t0);

        s.handle_signal(PlaybackSignal::Seek { position_secs: 250.0 }, t0);
        let batch = s.poll(t0).unwrap();
        assert!(batch.replaced);
        assert_eq!(batch.events.first().map(|e| e.id.as_str()), Some("m150"));
        assert_eq!(s.position(t0), 250.0);
    }

    #[test]
    fn test_video_change_resets_and_retargets() {
        let t0 = Instant::now();
        let mut s = session(SelectionMode::AutoSelect);
        s.set_catalog(vec![candidate("a", "Cuphead Part 1"), candidate("b", "Hollow Knight")]);
        s.handle_signal(PlaybackSignal::Play, t0);

        let effects = s.handle_signal(
            PlaybackSignal::VideoChanged {
                title: Some("Hollow Knight".into()),
            },
            t0,
        );
        assert!(effects.contains(&SelectionEffect::CancelNotifyTimer));
        assert_eq!(s.view().state, SelectionState::SelectedNotify);
        assert_eq!(s.view().selected.map(|c| c.id), Some("b".to_string()));

        s.handle_signal(PlaybackSignal::Ready { duration_secs: 3600.0 }, t0);
        assert_eq!(
            s.machine().target().and_then(|t| t.duration_secs),
            Some(3600.0)
        );
        assert_eq!(s.machine().target().map(|t| t.title.as_str()), Some("Hollow Knight"));
    }

    #[test]
    fn test_pause_freezes_position() {
        let t0 = Instant::now();
        let mut s = session(SelectionMode::Manual);
        s.handle_signal(PlaybackSignal::Seek { position_secs: 20.0 }, t0);
        s.handle_signal(PlaybackSignal::Play, t0);
        s.handle_signal(PlaybackSignal::RateChange { rate: 2.0 }, t0);
        s.handle_signal(PlaybackSignal::Pause, t0 + Duration::from_secs(5));
        assert_eq!(s.position(t0 + Duration::from_secs(60)), 30.0);
        assert!(!s.is_playing());
        let state = s.playback_state();
        assert!(!state.enabled);
        assert_eq!(state.reference_position, 30.0);
        assert_eq!(s.snapshot(t0).rate, 2.0);
    }
}
