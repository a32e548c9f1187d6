//! Synchronous replay core: playback clock, due-event scheduling, candidate
//! matching and the selection state machine.  No I/O and no timers live here;
//! the daemon drives it.

pub mod clock;
pub mod matcher;
pub mod scheduler;
pub mod selection;
pub mod session;
pub mod stream;

pub use clock::{PlaybackClock, PlaybackState, MIN_RATE};
pub use matcher::MatchResult;
pub use scheduler::{MessageWindowScheduler, WindowBatch, RESYNC_LOOKBACK, WINDOW_CAPACITY};
pub use selection::{SelectionEffect, SelectionMachine};
pub use session::ReplaySession;
pub use stream::{EventStream, StreamError};
