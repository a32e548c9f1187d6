//! Decides which stream gets replayed and what the renderer shows meanwhile.
//!
//! Every input setter stores the new value and re-runs [`SelectionMachine::evaluate`],
//! which steps the state machine until it settles.  Work that has to happen
//! outside the machine (loading a stream, arming the notification timer) is
//! returned as [`SelectionEffect`]s for the owner to carry out.

use std::time::Duration;

use chatsync_proto::protocol::{
    AutoSelectConfig, BrowserEntry, CandidateBrowser, CandidateMetadata, MatchConfig,
    Notification, SelectionMode, SelectionState, Severity, TargetMetadata, ViewState,
};
use tracing::{debug, info, warn};

use crate::matcher::{self, MatchResult};

/// Upper bound on transitions per evaluation.  The longest legal chain is
/// three steps; anything beyond means the inputs are flapping.
const MAX_STEPS: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub enum SelectionEffect {
    /// Load the event stream for `candidate`; report back with `generation`.
    Select {
        candidate: CandidateMetadata,
        generation: u64,
        automatic: bool,
    },
    /// Call `notify_elapsed(ticket)` after `after`.
    ArmNotifyTimer { ticket: u64, after: Duration },
    CancelNotifyTimer,
}

#[derive(Debug, Default)]
pub struct SelectionMachine {
    state: SelectionState,
    mode: SelectionMode,
    auto_config: AutoSelectConfig,
    match_config: MatchConfig,
    target: Option<TargetMetadata>,
    catalog: Vec<CandidateMetadata>,
    search_text: String,
    selected: Option<CandidateMetadata>,
    stream_loaded: bool,
    /// Playback was active at some point since the last reset.
    playback_active: bool,
    ranked: Vec<MatchResult>,
    /// An automatic selection was already made; cleared by reset/unselect.
    acted: bool,
    /// Candidate the user unselected; never auto-selected again until the
    /// target changes or the session resets.
    declined: Option<String>,
    /// Set by reset: automation waits for the next input change.
    held: bool,
    generation: u64,
    notify_ticket: u64,
}

impl SelectionMachine {
    pub fn new(mode: SelectionMode, auto_config: AutoSelectConfig, match_config: MatchConfig) -> Self {
        Self {
            mode,
            auto_config,
            match_config,
            ..Default::default()
        }
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    pub fn state(&self) -> SelectionState {
        self.state
    }

    pub fn mode(&self) -> SelectionMode {
        self.mode
    }

    pub fn auto_select_config(&self) -> AutoSelectConfig {
        self.auto_config
    }

    pub fn target(&self) -> Option<&TargetMetadata> {
        self.target.as_ref()
    }

    pub fn catalog(&self) -> &[CandidateMetadata] {
        &self.catalog
    }

    pub fn ranked(&self) -> &[MatchResult] {
        &self.ranked
    }

    pub fn selected(&self) -> Option<&CandidateMetadata> {
        self.selected.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn search_text(&self) -> &str {
        &self.search_text
    }

    /// The selected stream is on screen.
    pub fn shows_stream(&self) -> bool {
        self.state.is_selected()
    }

    // ── Inputs ────────────────────────────────────────────────────────────────

    pub fn set_mode(&mut self, mode: SelectionMode) -> Vec<SelectionEffect> {
        if mode == self.mode {
            return Vec::new();
        }
        info!("[selection] mode {} -> {}", self.mode.label(), mode.label());
        self.mode = mode;
        self.held = false;
        self.restart_search();
        self.evaluate()
    }

    pub fn set_auto_select_config(&mut self, config: AutoSelectConfig) -> Vec<SelectionEffect> {
        self.auto_config = config;
        self.held = false;
        self.restart_search();
        self.evaluate()
    }

    pub fn set_match_config(&mut self, config: MatchConfig) -> Vec<SelectionEffect> {
        self.match_config = config;
        self.held = false;
        self.refresh_ranking();
        self.restart_search();
        self.evaluate()
    }

    pub fn set_search_text(&mut self, text: &str) -> Vec<SelectionEffect> {
        self.search_text = text.to_string();
        self.evaluate()
    }

    pub fn set_catalog(&mut self, catalog: Vec<CandidateMetadata>) -> Vec<SelectionEffect> {
        info!("[selection] catalog now has {} candidates", catalog.len());
        self.catalog = catalog;
        self.held = false;
        self.refresh_ranking();
        self.restart_search();
        self.evaluate()
    }

    pub fn set_target(&mut self, target: Option<TargetMetadata>) -> Vec<SelectionEffect> {
        if target == self.target {
            return Vec::new();
        }
        debug!("[selection] target {:?}", target);
        self.target = target;
        self.declined = None;
        self.held = false;
        self.refresh_ranking();
        self.restart_search();
        self.evaluate()
    }

    /// The player started playing.  Sticky until the next reset.
    pub fn playback_started(&mut self) -> Vec<SelectionEffect> {
        if self.playback_active {
            return Vec::new();
        }
        self.playback_active = true;
        self.evaluate()
    }

    /// User picked a candidate from the browser.
    pub fn select(&mut self, candidate_id: &str) -> Vec<SelectionEffect> {
        let Some(candidate) = self.catalog.iter().find(|c| c.id == candidate_id).cloned() else {
            warn!("[selection] unknown candidate {}", candidate_id);
            return Vec::new();
        };
        let mut effects = Vec::new();
        if self.state == SelectionState::SelectedNotify {
            effects.push(SelectionEffect::CancelNotifyTimer);
        }
        info!("[selection] manual select {} ({})", candidate.id, candidate.title);
        self.generation += 1;
        self.selected = Some(candidate.clone());
        self.stream_loaded = false;
        self.held = false;
        self.state = SelectionState::Searching;
        effects.push(SelectionEffect::Select {
            candidate,
            generation: self.generation,
            automatic: false,
        });
        effects.extend(self.evaluate());
        effects
    }

    /// Drop the current selection and go back to searching.
    pub fn unselect(&mut self) -> Vec<SelectionEffect> {
        if let Some(selected) = self.selected.take() {
            info!("[selection] unselect {}", selected.id);
            self.declined = Some(selected.id);
        }
        self.clear_selection();
        let mut effects = vec![SelectionEffect::CancelNotifyTimer];
        effects.extend(self.evaluate());
        effects
    }

    /// Start over: no selection, no history, playback considered inactive.
    /// Settles in `Searching`; automation resumes once the target, catalog,
    /// mode or a config changes.
    pub fn reset(&mut self) -> Vec<SelectionEffect> {
        info!("[selection] reset from {:?}", self.state);
        self.forget();
        self.held = true;
        vec![SelectionEffect::CancelNotifyTimer]
    }

    /// Reset for new media: the new target is in place before the machine
    /// evaluates, so nothing is matched against the old one.
    pub fn reset_for_target(&mut self, target: Option<TargetMetadata>) -> Vec<SelectionEffect> {
        info!("[selection] reset from {:?} for {:?}", self.state, target);
        self.forget();
        self.held = false;
        self.target = target;
        self.refresh_ranking();
        let mut effects = vec![SelectionEffect::CancelNotifyTimer];
        effects.extend(self.evaluate());
        effects
    }

    /// The stream requested with `generation` finished loading.  `None` when
    /// the selection has moved on since; the result must be discarded.
    pub fn stream_loaded(&mut self, generation: u64) -> Option<Vec<SelectionEffect>> {
        if generation != self.generation || self.selected.is_none() {
            debug!(
                "[selection] ignoring stale load (generation {} != {})",
                generation, self.generation
            );
            return None;
        }
        self.stream_loaded = true;
        Some(self.evaluate())
    }

    /// The notification timer with `ticket` fired.
    pub fn notify_elapsed(&mut self, ticket: u64) -> Vec<SelectionEffect> {
        if self.state != SelectionState::SelectedNotify || ticket != self.notify_ticket {
            debug!("[selection] ignoring stale notify ticket {}", ticket);
            return Vec::new();
        }
        let mut effects = Vec::new();
        self.transition(SelectionState::SelectedPlaying, &mut effects);
        effects.extend(self.evaluate());
        effects
    }

    // ── Evaluation ────────────────────────────────────────────────────────────

    /// Step until no transition applies.
    pub fn evaluate(&mut self) -> Vec<SelectionEffect> {
        let mut effects = Vec::new();
        for _ in 0..MAX_STEPS {
            match self.step(&mut effects) {
                Some(next) if next != self.state => self.transition(next, &mut effects),
                _ => return effects,
            }
        }
        warn!("[selection] evaluation did not settle in {:?}", self.state);
        effects
    }

    fn step(&mut self, effects: &mut Vec<SelectionEffect>) -> Option<SelectionState> {
        match self.state {
            SelectionState::Searching => self.step_searching(effects),
            SelectionState::AutoSearching => {
                if self.has_loaded_selection() {
                    Some(self.loaded_state())
                } else if self.is_typing() || !self.automation_enabled() {
                    Some(SelectionState::Searching)
                } else {
                    None
                }
            }
            SelectionState::AutoSearchError => {
                if self.is_typing() || !self.automation_enabled() {
                    Some(SelectionState::Searching)
                } else {
                    None
                }
            }
            SelectionState::SelectedWaiting => {
                self.playback_active.then_some(SelectionState::SelectedPlaying)
            }
            SelectionState::SelectedNotify | SelectionState::SelectedPlaying => None,
        }
    }

    fn step_searching(&mut self, effects: &mut Vec<SelectionEffect>) -> Option<SelectionState> {
        if self.has_loaded_selection() {
            return Some(self.loaded_state());
        }
        // a manual pick is still loading
        if self.selected.is_some()
            || self.held
            || self.is_typing()
            || !self.automation_enabled()
        {
            return None;
        }

        if self.mode == SelectionMode::AutoSelect && !self.acted {
            if let Some(pick) = self.auto_pick() {
                info!(
                    "[selection] auto-selected {} ({})",
                    pick.id, pick.title
                );
                self.acted = true;
                self.generation += 1;
                self.selected = Some(pick.clone());
                self.stream_loaded = false;
                effects.push(SelectionEffect::Select {
                    candidate: pick,
                    generation: self.generation,
                    automatic: true,
                });
                return Some(if self.auto_config.notification_duration_secs > 0 {
                    SelectionState::SelectedNotify
                } else {
                    SelectionState::SelectedPlaying
                });
            }
        }

        if self.ranked.is_empty() {
            Some(SelectionState::AutoSearchError)
        } else {
            Some(SelectionState::AutoSearching)
        }
    }

    fn transition(&mut self, next: SelectionState, effects: &mut Vec<SelectionEffect>) {
        info!("[selection] {:?} -> {:?}", self.state, next);
        if next == SelectionState::AutoSearchError {
            warn!("[selection] no candidates match the current media");
        }
        self.state = next;
        if next == SelectionState::SelectedNotify {
            self.notify_ticket += 1;
            effects.push(SelectionEffect::ArmNotifyTimer {
                ticket: self.notify_ticket,
                after: Duration::from_secs(u64::from(self.auto_config.notification_duration_secs)),
            });
        }
    }

    fn auto_pick(&self) -> Option<CandidateMetadata> {
        let top = matcher::evaluate_auto_select(&self.ranked, &self.auto_config)?;
        if self.declined.as_deref() == Some(top.candidate.id.as_str()) {
            debug!("[selection] top match {} was declined", top.candidate.id);
            return None;
        }
        Some(top.candidate.clone())
    }

    fn refresh_ranking(&mut self) {
        self.ranked = match &self.target {
            Some(target) => matcher::rank_and_filter(target, &self.catalog, &self.match_config),
            None => Vec::new(),
        };
    }

    /// Inputs behind the automatic states changed; search again.
    fn restart_search(&mut self) {
        if matches!(
            self.state,
            SelectionState::AutoSearching | SelectionState::AutoSearchError
        ) {
            self.state = SelectionState::Searching;
        }
    }

    fn forget(&mut self) {
        self.selected = None;
        self.declined = None;
        self.playback_active = false;
        self.search_text.clear();
        self.clear_selection();
    }

    fn clear_selection(&mut self) {
        self.stream_loaded = false;
        self.acted = false;
        self.generation += 1;
        // invalidates a timer that fires before the cancel lands
        self.notify_ticket += 1;
        self.state = SelectionState::Searching;
    }

    fn has_loaded_selection(&self) -> bool {
        self.selected.is_some() && self.stream_loaded
    }

    fn loaded_state(&self) -> SelectionState {
        if self.playback_active {
            SelectionState::SelectedPlaying
        } else {
            SelectionState::SelectedWaiting
        }
    }

    fn is_typing(&self) -> bool {
        !self.search_text.trim().is_empty()
    }

    fn automation_enabled(&self) -> bool {
        self.mode.is_automatic() && self.target.is_some()
    }

    // ── Output ────────────────────────────────────────────────────────────────

    pub fn view(&self) -> ViewState {
        let (notification, browser) = match self.state {
            SelectionState::Searching => {
                let notification = self.selected.as_ref().map(|c| Notification {
                    message: "Loading stream".into(),
                    detail: Some(c.title.clone()),
                    severity: Severity::Info,
                });
                (notification, Some(self.catalog_browser()))
            }
            SelectionState::AutoSearching => (
                Some(Notification {
                    message: "Possible matches found".into(),
                    detail: self.target.as_ref().map(|t| t.title.clone()),
                    severity: Severity::Info,
                }),
                Some(CandidateBrowser {
                    entries: self
                        .ranked
                        .iter()
                        .map(|r| BrowserEntry {
                            candidate: r.candidate.clone(),
                            score: Some(r.score),
                        })
                        .collect(),
                    reveal_scores: true,
                }),
            ),
            SelectionState::AutoSearchError => (
                Some(Notification {
                    message: "No matching streams found".into(),
                    detail: self.target.as_ref().map(|t| t.title.clone()),
                    severity: Severity::Warning,
                }),
                Some(self.catalog_browser()),
            ),
            SelectionState::SelectedWaiting => (
                Some(Notification {
                    message: "Waiting for playback".into(),
                    detail: None,
                    severity: Severity::Info,
                }),
                None,
            ),
            SelectionState::SelectedNotify => (
                Some(Notification {
                    message: "Automatically selected".into(),
                    detail: self.selected.as_ref().map(|c| c.title.clone()),
                    severity: Severity::Success,
                }),
                None,
            ),
            SelectionState::SelectedPlaying => (None, None),
        };

        ViewState {
            state: self.state,
            mode: self.mode,
            show_stream: self.shows_stream(),
            notification,
            browser,
            selected: self.selected.clone(),
        }
    }

    /// Catalog filtered by the search text, newest first.
    fn catalog_browser(&self) -> CandidateBrowser {
        let mut entries: Vec<&CandidateMetadata> =
            matcher::search_filter(&self.catalog, &self.search_text);
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        CandidateBrowser {
            entries: entries
                .into_iter()
                .map(|c| BrowserEntry {
                    candidate: c.clone(),
                    score: None,
                })
                .collect(),
            reveal_scores: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn candidate(id: &str, title: &str) -> CandidateMetadata {
        CandidateMetadata {
            id: id.into(),
            title: title.into(),
            duration_secs: 0.0,
            created_at: None,
        }
    }

    fn target(title: &str) -> Option<TargetMetadata> {
        Some(TargetMetadata {
            title: title.into(),
            duration_secs: None,
        })
    }

    fn machine(mode: SelectionMode) -> SelectionMachine {
        SelectionMachine::new(mode, AutoSelectConfig::default(), MatchConfig::default())
    }

    fn selects(effects: &[SelectionEffect]) -> Vec<(String, u64, bool)> {
        effects
            .iter()
            .filter_map(|e| match e {
                SelectionEffect::Select {
                    candidate,
                    generation,
                    automatic,
                } => Some((candidate.id.clone(), *generation, *automatic)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_starts_searching_without_target() {
        let mut m = machine(SelectionMode::AutoSelect);
        m.set_catalog(vec![candidate("a", "Cuphead Part 1")]);
        assert_eq!(m.state(), SelectionState::Searching);
        let view = m.view();
        assert!(!view.show_stream);
        assert_eq!(view.browser.map(|b| b.entries.len()), Some(1));
    }

    #[test]
    fn test_auto_select_with_notification() {
        let mut m = machine(SelectionMode::AutoSelect);
        m.set_catalog(vec![candidate("a", "Cuphead Part 1"), candidate("b", "Hollow Knight")]);
        let effects = m.set_target(target("Cuphead Part 1"));

        assert_eq!(m.state(), SelectionState::SelectedNotify);
        assert_eq!(selects(&effects), vec![("a".to_string(), 1, true)]);
        assert!(effects.contains(&SelectionEffect::ArmNotifyTimer {
            ticket: 1,
            after: Duration::from_secs(5),
        }));

        let view = m.view();
        assert!(view.show_stream);
        let note = view.notification.unwrap();
        assert_eq!(note.severity, Severity::Success);
        assert_eq!(note.detail.as_deref(), Some("Cuphead Part 1"));

        // unchanged inputs never fire a second selection
        assert!(m.evaluate().is_empty());
        assert!(m.set_search_text("").is_empty());

        assert!(m.notify_elapsed(1).is_empty());
        assert_eq!(m.state(), SelectionState::SelectedPlaying);
        assert!(m.view().notification.is_none());
    }

    #[test]
    fn test_zero_notification_duration_skips_notify() {
        let mut m = SelectionMachine::new(
            SelectionMode::AutoSelect,
            AutoSelectConfig {
                notification_duration_secs: 0,
                ..AutoSelectConfig::default()
            },
            MatchConfig::default(),
        );
        m.set_catalog(vec![candidate("a", "Cuphead Part 1")]);
        let effects = m.set_target(target("Cuphead Part 1"));
        assert_eq!(m.state(), SelectionState::SelectedPlaying);
        assert!(!effects
            .iter()
            .any(|e| matches!(e, SelectionEffect::ArmNotifyTimer { .. })));
    }

    #[test]
    fn test_ambiguous_match_lists_candidates() {
        let mut m = machine(SelectionMode::AutoSelect);
        m.set_catalog(vec![
            candidate("a", "Cuphead Part 1"),
            candidate("b", "Cuphead Part 1 again"),
        ]);
        let effects = m.set_target(target("Cuphead Part 1"));
        assert!(selects(&effects).is_empty());
        assert_eq!(m.state(), SelectionState::AutoSearching);

        let browser = m.view().browser.unwrap();
        assert!(browser.reveal_scores);
        assert_eq!(browser.entries[0].candidate.id, "a");
        assert_eq!(browser.entries[0].score, Some(100));
    }

    #[test]
    fn test_auto_search_never_selects() {
        let mut m = machine(SelectionMode::AutoSearch);
        m.set_catalog(vec![candidate("a", "Cuphead Part 1")]);
        let effects = m.set_target(target("Cuphead Part 1"));
        assert!(selects(&effects).is_empty());
        assert_eq!(m.state(), SelectionState::AutoSearching);
    }

    #[test]
    fn test_no_candidates_is_an_error_state() {
        let mut m = machine(SelectionMode::AutoSearch);
        m.set_target(target("Cuphead Part 1"));
        assert_eq!(m.state(), SelectionState::AutoSearchError);
        let note = m.view().notification.unwrap();
        assert_eq!(note.severity, Severity::Warning);

        // typing leaves the error
        m.set_search_text("cup");
        assert_eq!(m.state(), SelectionState::Searching);
        m.set_search_text("");
        assert_eq!(m.state(), SelectionState::AutoSearchError);

        // a catalog with a candidate recovers
        m.set_catalog(vec![candidate("a", "Cuphead Part 1")]);
        assert_eq!(m.state(), SelectionState::AutoSearching);
    }

    #[test]
    fn test_switching_to_manual_leaves_auto_states() {
        let mut m = machine(SelectionMode::AutoSearch);
        m.set_catalog(vec![candidate("a", "Cuphead")]);
        m.set_target(target("Cuphead"));
        assert_eq!(m.state(), SelectionState::AutoSearching);
        m.set_mode(SelectionMode::Manual);
        assert_eq!(m.state(), SelectionState::Searching);
    }

    #[test]
    fn test_manual_select_waits_for_load_then_playback() {
        let mut m = machine(SelectionMode::Manual);
        m.set_catalog(vec![candidate("a", "Cuphead"), candidate("b", "Hollow Knight")]);
        let effects = m.select("b");
        assert_eq!(selects(&effects), vec![("b".to_string(), 1, false)]);
        assert_eq!(m.state(), SelectionState::Searching);
        assert_eq!(m.view().notification.map(|n| n.message), Some("Loading stream".into()));

        assert!(m.stream_loaded(1).is_some());
        assert_eq!(m.state(), SelectionState::SelectedWaiting);
        m.playback_started();
        assert_eq!(m.state(), SelectionState::SelectedPlaying);
    }

    #[test]
    fn test_load_after_playback_goes_straight_to_playing() {
        let mut m = machine(SelectionMode::Manual);
        m.set_catalog(vec![candidate("a", "Cuphead")]);
        m.playback_started();
        m.select("a");
        m.stream_loaded(1);
        assert_eq!(m.state(), SelectionState::SelectedPlaying);
    }

    #[test]
    fn test_stale_load_is_ignored() {
        let mut m = machine(SelectionMode::Manual);
        m.set_catalog(vec![candidate("a", "Cuphead"), candidate("b", "Hollow Knight")]);
        m.select("a");
        m.select("b");
        assert!(m.stream_loaded(1).is_none());
        assert_eq!(m.state(), SelectionState::Searching);
        assert!(m.stream_loaded(2).is_some());
        assert_eq!(m.selected().map(|c| c.id.as_str()), Some("b"));
    }

    #[test]
    fn test_unknown_candidate_is_ignored() {
        let mut m = machine(SelectionMode::Manual);
        assert!(m.select("missing").is_empty());
        assert_eq!(m.generation(), 0);
    }

    #[test]
    fn test_unselect_declines_auto_pick() {
        let mut m = machine(SelectionMode::AutoSelect);
        m.set_catalog(vec![candidate("a", "Cuphead Part 1")]);
        m.set_target(target("Cuphead Part 1"));
        assert_eq!(m.state(), SelectionState::SelectedNotify);

        let effects = m.unselect();
        assert!(effects.contains(&SelectionEffect::CancelNotifyTimer));
        assert!(selects(&effects).is_empty());
        assert_eq!(m.state(), SelectionState::AutoSearching);
        assert!(m.selected().is_none());

        // a stale timer from the previous selection does nothing
        assert!(m.notify_elapsed(1).is_empty());
        assert_eq!(m.state(), SelectionState::AutoSearching);
    }

    #[test]
    fn test_reset_settles_in_searching() {
        let mut m = machine(SelectionMode::AutoSelect);
        m.set_catalog(vec![candidate("a", "Cuphead Part 1")]);
        m.set_target(target("Cuphead Part 1"));
        assert_eq!(m.state(), SelectionState::SelectedNotify);

        let effects = m.reset();
        assert_eq!(effects, vec![SelectionEffect::CancelNotifyTimer]);
        assert_eq!(m.state(), SelectionState::Searching);
        assert!(m.selected().is_none());

        // unchanged inputs keep it there
        assert!(m.evaluate().is_empty());
        assert!(m.playback_started().is_empty());
        assert!(m.set_search_text("").is_empty());
        assert_eq!(m.state(), SelectionState::Searching);
    }

    #[test]
    fn test_reset_forgets_decline() {
        let mut m = machine(SelectionMode::AutoSelect);
        m.set_catalog(vec![candidate("a", "Cuphead Part 1")]);
        m.set_target(target("Cuphead Part 1"));
        m.unselect();
        assert!(selects(&m.reset()).is_empty());

        // the next catalog refresh may pick the declined candidate again
        let effects = m.set_catalog(vec![candidate("a", "Cuphead Part 1")]);
        assert_eq!(selects(&effects).len(), 1);
        assert_eq!(m.state(), SelectionState::SelectedNotify);
    }

    #[test]
    fn test_reset_for_target_matches_new_media() {
        let mut m = machine(SelectionMode::AutoSelect);
        m.set_catalog(vec![candidate("a", "Cuphead Part 1"), candidate("b", "Hollow Knight")]);
        m.set_target(target("Cuphead Part 1"));
        assert_eq!(m.selected().map(|c| c.id.as_str()), Some("a"));

        let effects = m.reset_for_target(target("Hollow Knight"));
        assert!(effects.contains(&SelectionEffect::CancelNotifyTimer));
        assert_eq!(selects(&effects), vec![("b".to_string(), 3, true)]);
        assert_eq!(m.state(), SelectionState::SelectedNotify);

        // no title: nothing to match, back to browsing
        let effects = m.reset_for_target(None);
        assert!(selects(&effects).is_empty());
        assert_eq!(m.state(), SelectionState::Searching);
        assert!(m.target().is_none());
    }

    #[test]
    fn test_auto_select_config_change_reevaluates() {
        let mut m = machine(SelectionMode::AutoSelect);
        m.set_catalog(vec![
            candidate("a", "Cuphead Part 1"),
            candidate("b", "Cuphead Part 1 again"),
        ]);
        m.set_target(target("Cuphead Part 1"));
        assert_eq!(m.state(), SelectionState::AutoSearching);

        let effects = m.set_auto_select_config(AutoSelectConfig {
            match_margin_threshold: 0,
            ..AutoSelectConfig::default()
        });
        assert_eq!(selects(&effects), vec![("a".to_string(), 1, true)]);
        assert_eq!(m.state(), SelectionState::SelectedNotify);
    }

    #[test]
    fn test_config_change_respects_decline() {
        let mut m = machine(SelectionMode::AutoSearch);
        m.set_catalog(vec![candidate("a", "Cuphead Part 1")]);
        m.set_target(target("Cuphead Part 1"));
        m.set_mode(SelectionMode::AutoSelect);
        assert_eq!(m.state(), SelectionState::SelectedNotify);
        m.unselect();
        assert_eq!(m.state(), SelectionState::AutoSearching);

        // the decline still holds after a config change
        let effects = m.set_auto_select_config(AutoSelectConfig {
            min_match_threshold: 50,
            ..AutoSelectConfig::default()
        });
        assert!(selects(&effects).is_empty());
        assert_eq!(m.state(), SelectionState::AutoSearching);
    }

    #[test]
    fn test_browser_is_filtered_and_newest_first() {
        let mut m = machine(SelectionMode::Manual);
        let mut old = candidate("old", "Cuphead Part 1");
        old.created_at = Some(Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap());
        let mut new = candidate("new", "Cuphead Part 2");
        new.created_at = Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        m.set_catalog(vec![old, candidate("undated", "Cuphead Part 3"), new, candidate("hk", "Hollow Knight")]);

        m.set_search_text("cuphead");
        let ids: Vec<String> = m
            .view()
            .browser
            .unwrap()
            .entries
            .into_iter()
            .map(|e| e.candidate.id)
            .collect();
        assert_eq!(ids, vec!["new", "old", "undated"]);
    }
}
