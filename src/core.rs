//! Game clock
//!
//! The server runs on a discrete monotonic tick counter, decoupled from the
//! wall clock by a fixed conversion factor. Rate limiting and request
//! timestamps are expressed in ticks, never in raw milliseconds, so tests
//! can drive the clock by hand.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Milliseconds per game tick.
pub const TICK_MS: u64 = 100;

/// Game-tick duration as a `Duration` for convenience.
pub const TICK_DURATION: Duration = Duration::from_millis(TICK_MS);

/// Monotonic game-tick counter shared by every connection.
///
/// In production one [`GameClock::run`] task advances the counter every
/// [`TICK_MS`] milliseconds. Tests construct a clock and call
/// [`GameClock::advance`] directly.
pub struct GameClock {
    tick: AtomicU64,
}

impl GameClock {
    /// Create a clock starting at tick 0.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            tick: AtomicU64::new(0),
        })
    }

    /// Current tick.
    pub fn now(&self) -> u64 {
        self.tick.load(Ordering::Acquire)
    }

    /// Advance the clock by `ticks`. Returns the new current tick.
    pub fn advance(&self, ticks: u64) -> u64 {
        self.tick.fetch_add(ticks, Ordering::AcqRel) + ticks
    }

    /// Drive the clock from wall time, one tick per [`TICK_MS`].
    ///
    /// Never returns; spawn it on the runtime at server start.
    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(TICK_DURATION);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Burst);
        // The first interval tick fires immediately; skip it so tick 0
        // covers the first TICK_MS of uptime.
        interval.tick().await;
        loop {
            interval.tick().await;
            self.advance(1);
        }
    }

    /// Ticks elapsed since `earlier`, saturating at zero.
    pub fn ticks_since(&self, earlier: u64) -> u64 {
        self.now().saturating_sub(earlier)
    }
}
