use std::time::{Duration, Instant};

/// Tracks politeness state for one domain (netloc)
///
/// A domain is ready iff no dispatch has happened yet or at least `delay`
/// has elapsed since the last one. The scheduler checks readiness and calls
/// [`DomainState::reserve`] under the same lock, so two concurrent dequeues
/// can never both see the domain as ready.
#[derive(Debug, Clone)]
pub struct DomainState {
    /// Minimum spacing between consecutive dispatches
    pub delay: Duration,

    /// When the last dispatch to this domain was reserved
    pub last_dispatch: Option<Instant>,

    /// Number of dispatches reserved for this domain
    pub dispatch_count: u64,

    /// Whether the delay was set explicitly (config override, robots.txt)
    pub delay_pinned: bool,
}

impl DomainState {
    /// Creates a new DomainState with the given politeness delay
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            last_dispatch: None,
            dispatch_count: 0,
            delay_pinned: false,
        }
    }

    /// Checks if a dispatch may happen at `now`
    pub fn is_ready(&self, now: Instant) -> bool {
        match self.last_dispatch {
            Some(last) => now.saturating_duration_since(last) >= self.delay,
            None => true,
        }
    }

    /// Time left before the domain becomes ready, or None if it is ready now
    pub fn time_until_ready(&self, now: Instant) -> Option<Duration> {
        let last = self.last_dispatch?;
        let elapsed = now.saturating_duration_since(last);
        if elapsed < self.delay {
            Some(self.delay - elapsed)
        } else {
            None
        }
    }

    /// Marks the domain as just dispatched
    pub fn reserve(&mut self, now: Instant) {
        self.last_dispatch = Some(now);
        self.dispatch_count += 1;
    }

    /// Sets an explicit delay that later default changes will not override
    pub fn pin_delay(&mut self, delay: Duration) {
        self.delay = delay;
        self.delay_pinned = true;
    }
}
