//! Simulated time
//!
//! The engine advances in fixed steps of `tick_interval` time units:
//! `t = 0, Δ, 2Δ, …`. A tick first advances the clock and then runs the nodes
//! at the new time, so the first processed instant is `Δ`.
//!
//! Activity-log entries also carry a wall-clock `epochTimestamp`. The
//! [`WallClock`] source is configurable so reruns can be made byte-identical.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Simulated time in abstract time units (scenario intervals use the same unit)
pub type SimTime = u64;

/// Discrete simulation clock
///
/// # Example
/// ```
/// use workflow_simulator_core_rs::SimClock;
///
/// let mut clock = SimClock::new(2);
/// assert_eq!(clock.current_time(), 0);
/// clock.advance();
/// assert_eq!(clock.current_time(), 2);
/// assert_eq!(clock.tick_count(), 1);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SimClock {
    current_time: SimTime,
    tick_interval: SimTime,
    tick_count: u64,
}

impl SimClock {
    /// Create a clock at `t = 0`
    ///
    /// # Panics
    /// Panics if `tick_interval` is zero.
    pub fn new(tick_interval: SimTime) -> Self {
        assert!(tick_interval > 0, "tick_interval must be positive");
        Self {
            current_time: 0,
            tick_interval,
            tick_count: 0,
        }
    }

    /// Rebuild a clock from checkpointed values
    pub fn from_parts(current_time: SimTime, tick_interval: SimTime, tick_count: u64) -> Self {
        let mut clock = Self::new(tick_interval);
        clock.current_time = current_time;
        clock.tick_count = tick_count;
        clock
    }

    /// Advance by one step and return the new time
    pub fn advance(&mut self) -> SimTime {
        self.current_time += self.tick_interval;
        self.tick_count += 1;
        self.current_time
    }

    /// Time the next `advance` will move to
    pub fn next_time(&self) -> SimTime {
        self.current_time + self.tick_interval
    }

    pub fn current_time(&self) -> SimTime {
        self.current_time
    }

    pub fn tick_interval(&self) -> SimTime {
        self.tick_interval
    }

    /// Number of ticks processed since `t = 0`
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Back to `t = 0`
    pub fn reset(&mut self) {
        self.current_time = 0;
        self.tick_count = 0;
    }
}

/// Source of the wall-clock `epochTimestamp` stamped on history entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum WallClock {
    /// Host clock at the moment the entry is recorded
    System,

    /// `origin_epoch_ms + t * ms_per_time_unit`; reproducible across reruns
    #[serde(rename_all = "camelCase")]
    Derived {
        origin_epoch_ms: u64,
        ms_per_time_unit: u64,
    },
}

impl Default for WallClock {
    fn default() -> Self {
        WallClock::System
    }
}

impl WallClock {
    /// Epoch milliseconds for an entry recorded at simulated time `t`
    pub fn epoch_ms(&self, t: SimTime) -> u64 {
        match *self {
            WallClock::System => SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0),
            WallClock::Derived {
                origin_epoch_ms,
                ms_per_time_unit,
            } => origin_epoch_ms.saturating_add(t.saturating_mul(ms_per_time_unit)),
        }
    }

    pub fn is_deterministic(&self) -> bool {
        matches!(self, WallClock::Derived { .. })
    }
}
