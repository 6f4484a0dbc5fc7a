//! Timer handles driven by explicit timestamps.
//!
//! The core has no clock of its own: owners pass `IoProvider::current_time_ms()`
//! into every call. Each timer belongs to exactly one component and is cancelled
//! by that component, so a stale deadline can never fire into a newer state.

/// A single-shot deadline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OneShotTimer {
    deadline_ms: Option<u64>,
}

impl OneShotTimer {
    pub fn new() -> Self {
        Self { deadline_ms: None }
    }

    /// Arm (or re-arm) the timer to expire `delay_ms` after `now_ms`.
    pub fn arm(&mut self, now_ms: u64, delay_ms: u64) {
        self.deadline_ms = Some(now_ms.saturating_add(delay_ms));
    }

    pub fn cancel(&mut self) {
        self.deadline_ms = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline_ms.is_some()
    }

    pub fn remaining_ms(&self, now_ms: u64) -> Option<u64> {
        self.deadline_ms.map(|d| d.saturating_sub(now_ms))
    }

    /// Returns true exactly once when the deadline has passed, disarming the timer.
    pub fn expire(&mut self, now_ms: u64) -> bool {
        match self.deadline_ms {
            Some(deadline) if now_ms >= deadline => {
                self.deadline_ms = None;
                true
            }
            _ => false,
        }
    }
}

/// A repeating timer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntervalTimer {
    period_ms: u64,
    next_ms: Option<u64>,
}

impl IntervalTimer {
    pub fn new(period_ms: u64) -> Self {
        Self {
            period_ms: period_ms.max(1),
            next_ms: None,
        }
    }

    pub fn period_ms(&self) -> u64 {
        self.period_ms
    }

    /// Start ticking; the first tick is one period after `now_ms`.
    pub fn start(&mut self, now_ms: u64, period_ms: u64) {
        self.period_ms = period_ms.max(1);
        self.next_ms = Some(now_ms.saturating_add(self.period_ms));
    }

    pub fn stop(&mut self) {
        self.next_ms = None;
    }

    pub fn is_running(&self) -> bool {
        self.next_ms.is_some()
    }

    /// Returns true when a tick is due. Missed ticks are skipped, not replayed.
    pub fn tick(&mut self, now_ms: u64) -> bool {
        match self.next_ms {
            Some(next) if now_ms >= next => {
                self.next_ms = Some(now_ms.saturating_add(self.period_ms));
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_shot_fires_once() {
        let mut t = OneShotTimer::new();
        assert!(!t.expire(0));

        t.arm(1000, 500);
        assert!(t.is_armed());
        assert_eq!(t.remaining_ms(1200), Some(300));
        assert!(!t.expire(1499));
        assert!(t.expire(1500));
        assert!(!t.is_armed());
        assert!(!t.expire(5000));
    }

    #[test]
    fn test_one_shot_cancel() {
        let mut t = OneShotTimer::new();
        t.arm(0, 100);
        t.cancel();
        assert!(!t.expire(1000));
        assert_eq!(t.remaining_ms(0), None);
    }

    #[test]
    fn test_interval_skips_missed_ticks() {
        let mut t = IntervalTimer::new(100);
        assert!(!t.tick(1000));

        t.start(0, 100);
        assert!(!t.tick(99));
        assert!(t.tick(100));
        // Late poll: one tick, then the schedule restarts from now
        assert!(t.tick(450));
        assert!(!t.tick(500));
        assert!(t.tick(550));

        t.stop();
        assert!(!t.is_running());
        assert!(!t.tick(10_000));
    }
}
