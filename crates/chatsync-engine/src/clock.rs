//! Playback position estimate driven by discrete player signals.
//!
//! The player tells us when it plays, pauses, seeks and changes speed; between
//! those signals the position is extrapolated from wall time.  Every rate
//! change and every pause folds the elapsed segment into the reference
//! position, so a segment always contributes `wall_elapsed * rate_at_the_time`
//! and earlier segments are never rescaled.

use std::time::Instant;

use tracing::{debug, warn};

/// Lowest accepted playback rate.  Zero or negative rates clamp to this.
pub const MIN_RATE: f64 = 0.0625;

/// Snapshot of the clock's reference point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackState {
    pub rate: f64,
    pub reference_position: f64,
    pub reference_wall_time: Instant,
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct PlaybackClock {
    rate: f64,
    /// `None` until the first resync; the estimate is 0.0 until then.
    reference_position: Option<f64>,
    reference_wall: Instant,
    enabled: bool,
}

impl PlaybackClock {
    pub fn new(now: Instant) -> Self {
        Self {
            rate: 1.0,
            reference_position: None,
            reference_wall: now,
            enabled: false,
        }
    }

    /// Make `estimate(now) == position`.
    pub fn resync(&mut self, position: f64, now: Instant) {
        let position = if position.is_finite() { position } else { 0.0 };
        debug!("[clock] resync to {:.3}s", position);
        self.reference_position = Some(position);
        self.reference_wall = now;
    }

    /// Change the rate from `now` on.  Returns the rate actually applied.
    pub fn set_rate(&mut self, rate: f64, now: Instant) -> f64 {
        if !rate.is_finite() {
            warn!("[clock] ignoring non-finite rate {}", rate);
            return self.rate;
        }
        let rate = if rate < MIN_RATE {
            warn!("[clock] rate {} below minimum, clamping to {}", rate, MIN_RATE);
            MIN_RATE
        } else {
            rate
        };
        self.fold(now);
        self.rate = rate;
        self.rate
    }

    /// Resume extrapolation from the frozen position.
    pub fn enable(&mut self, now: Instant) {
        if !self.enabled {
            self.reference_wall = now;
            self.enabled = true;
        }
    }

    /// Freeze the estimate at its value at `now`.
    pub fn disable(&mut self, now: Instant) {
        if self.enabled {
            self.fold(now);
            self.enabled = false;
        }
    }

    pub fn estimate(&self, now: Instant) -> f64 {
        let Some(reference) = self.reference_position else {
            return 0.0;
        };
        if !self.enabled {
            return reference;
        }
        // An instant before the reference (clock skew between callers) counts
        // as zero elapsed.
        let elapsed = now.saturating_duration_since(self.reference_wall);
        reference + elapsed.as_secs_f64() * self.rate
    }

    pub fn is_synced(&self) -> bool {
        self.reference_position.is_some()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn state(&self) -> PlaybackState {
        PlaybackState {
            rate: self.rate,
            reference_position: self.reference_position.unwrap_or(0.0),
            reference_wall_time: self.reference_wall,
            enabled: self.enabled,
        }
    }

    /// Forget the stream position (stream discarded).  Rate and play state
    /// belong to the player and are kept.
    pub fn clear(&mut self, now: Instant) {
        self.reference_position = None;
        self.reference_wall = now;
    }

    fn fold(&mut self, now: Instant) {
        if self.reference_position.is_some() {
            self.reference_position = Some(self.estimate(now));
        }
        self.reference_wall = now;
    }
}
