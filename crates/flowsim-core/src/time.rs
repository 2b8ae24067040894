//! Simulation time and the shared clock handle.
//!
//! Components read the current time through a cheaply clonable
//! [`SimClock`]; the driver that owns the event loop is the only writer.
//! Nothing here schedules: dispatch order is the driver's job, and every
//! operation in the forwarding plane runs to completion once entered.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

/// An opaque monotonic point in simulated time (nanosecond resolution).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[must_use]
pub struct EventQueueTime(u64);

impl EventQueueTime {
    pub const ZERO: EventQueueTime = EventQueueTime(0);

    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    pub fn from_duration(d: Duration) -> Self {
        Self(u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
    }

    #[must_use]
    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    pub fn saturating_add(self, d: Duration) -> Self {
        Self(self.0.saturating_add(u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)))
    }

    /// Time elapsed since `earlier`, saturating at zero.
    #[must_use]
    pub fn saturating_since(self, earlier: EventQueueTime) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }
}

impl fmt::Display for EventQueueTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ns", self.0)
    }
}

/// A shared read-mostly handle to the simulation clock.
///
/// Clones observe the same underlying instant; only the driver advances it.
#[derive(Clone, Default)]
#[must_use]
pub struct SimClock {
    now: Rc<Cell<EventQueueTime>>,
}

impl SimClock {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn now(&self) -> EventQueueTime {
        self.now.get()
    }

    /// Converts a wall-clock duration to queue time.
    pub fn to_time(&self, d: Duration) -> EventQueueTime {
        EventQueueTime::from_duration(d)
    }

    /// Moves the clock forward. Driver-only.
    pub fn advance(&self, d: Duration) {
        self.now.set(self.now.get().saturating_add(d));
    }

    /// Jumps the clock to an absolute instant. Driver-only; time never
    /// moves backwards.
    pub fn set(&self, t: EventQueueTime) {
        debug_assert!(t >= self.now.get(), "clock moved backwards");
        self.now.set(t);
    }
}

impl fmt::Debug for SimClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SimClock({})", self.now())
    }
}
