//! Turns an estimated playback position into the events that are due.

use std::collections::VecDeque;

use chatsync_proto::protocol::TimestampedEvent;
use tracing::debug;

use crate::stream::EventStream;

/// Maximum number of events kept in the visible window.
pub const WINDOW_CAPACITY: usize = 100;

/// How many events before the seek target a resync replays, so the window is
/// immediately populated with recent context.
pub const RESYNC_LOOKBACK: usize = 100;

/// Result of one poll.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowBatch {
    /// Newly due events, in stream order.
    pub events: Vec<TimestampedEvent>,
    /// The window was cleared before `events` were appended.
    pub replaced: bool,
}

impl WindowBatch {
    /// True when the renderer has nothing to do.
    pub fn is_noop(&self) -> bool {
        self.events.is_empty() && !self.replaced
    }
}

#[derive(Debug, Default)]
pub struct MessageWindowScheduler {
    stream: Option<EventStream>,
    cursor: usize,
    window: VecDeque<TimestampedEvent>,
    dirty: bool,
}

impl MessageWindowScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a new stream.  The window is emptied and the next poll starts
    /// from the first event until a resync says otherwise.
    pub fn load(&mut self, stream: EventStream) {
        debug!("[scheduler] loaded stream with {} events", stream.len());
        self.stream = Some(stream);
        self.cursor = 0;
        self.window.clear();
        self.dirty = true;
    }

    /// Discard the stream and the window.
    pub fn clear(&mut self) {
        self.stream = None;
        self.cursor = 0;
        self.window.clear();
        self.dirty = false;
    }

    pub fn has_stream(&self) -> bool {
        self.stream.is_some()
    }

    pub fn stream(&self) -> Option<&EventStream> {
        self.stream.as_ref()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// First index whose offset is `>= position`; the stream length when every
    /// event is earlier.  Ties resolve to the leftmost index.
    pub fn cursor_for(&self, position: f64) -> usize {
        match &self.stream {
            Some(stream) => stream
                .events()
                .partition_point(|ev| ev.offset_secs < position),
            None => 0,
        }
    }

    /// Jump to `position` (seek, stream load).  Rewinds an extra
    /// `RESYNC_LOOKBACK` events and marks the window for replacement.
    pub fn resync(&mut self, position: f64, delay_offset: f64) {
        let target = self.cursor_for(position - delay_offset);
        self.cursor = target.saturating_sub(RESYNC_LOOKBACK);
        self.dirty = true;
        debug!(
            "[scheduler] resync position={:.3}s delay={:.3}s cursor={} (target {})",
            position, delay_offset, self.cursor, target
        );
    }

    /// Emit every event with `offset + delay_offset <= ceil(now_estimate)`
    /// past the cursor.
    pub fn poll(&mut self, now_estimate: f64, delay_offset: f64) -> WindowBatch {
        let Some(stream) = &self.stream else {
            return WindowBatch::default();
        };

        let replaced = std::mem::take(&mut self.dirty);
        if replaced {
            self.window.clear();
        }

        let horizon = now_estimate.ceil();
        let events = stream.events();
        let start = self.cursor;
        while let Some(ev) = events.get(self.cursor) {
            if ev.offset_secs + delay_offset > horizon {
                break;
            }
            self.cursor += 1;
        }

        let due = events[start..self.cursor].to_vec();
        for ev in &due {
            self.window.push_back(ev.clone());
        }
        while self.window.len() > WINDOW_CAPACITY {
            self.window.pop_front();
        }

        WindowBatch {
            events: due,
            replaced,
        }
    }

    /// Visible window, oldest first.
    pub fn window(&self) -> impl Iterator<Item = &TimestampedEvent> {
        self.window.iter()
    }

    pub fn window_len(&self) -> usize {
        self.window.len()
    }
}
