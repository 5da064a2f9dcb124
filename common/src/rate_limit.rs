use crate::config::EmailIntervals;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertCategory {
    Firmware,
    Critical,
    Warning,
    Normal,
}

impl AlertCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Firmware => "firmware",
            Self::Critical => "critical",
            Self::Warning => "warning",
            Self::Normal => "normal",
        }
    }

    fn index(self) -> usize {
        match self {
            Self::Firmware => 0,
            Self::Critical => 1,
            Self::Warning => 2,
            Self::Normal => 3,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    min_interval_ms: u64,
    last_sent_ms: Option<u64>,
}

/// Per-category minimum spacing between accepted email sends.
#[derive(Debug, Clone)]
pub struct EmailRateLimiter {
    slots: [Slot; 4],
}

impl EmailRateLimiter {
    pub fn new(intervals: &EmailIntervals) -> Self {
        let slot = |min_interval_ms| Slot {
            min_interval_ms,
            last_sent_ms: None,
        };
        Self {
            slots: [
                slot(intervals.firmware_ms),
                slot(intervals.critical_ms),
                slot(intervals.warning_ms),
                slot(intervals.normal_ms),
            ],
        }
    }

    /// Records the send and returns `true` if the category's interval elapsed.
    pub fn try_acquire(&mut self, category: AlertCategory, now_ms: u64) -> bool {
        let slot = &mut self.slots[category.index()];
        if let Some(last) = slot.last_sent_ms {
            // A clock that appears to run backwards counts as elapsed.
            if now_ms >= last && now_ms - last < slot.min_interval_ms {
                return false;
            }
        }
        slot.last_sent_ms = Some(now_ms);
        true
    }

    pub fn remaining_ms(&self, category: AlertCategory, now_ms: u64) -> u64 {
        let slot = &self.slots[category.index()];
        match slot.last_sent_ms {
            Some(last) if now_ms >= last => slot.min_interval_ms.saturating_sub(now_ms - last),
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> EmailRateLimiter {
        EmailRateLimiter::new(&EmailIntervals {
            firmware_ms: 60_000,
            critical_ms: 10_000,
            warning_ms: 10_000,
            normal_ms: 10_000,
        })
    }

    #[test]
    fn second_send_within_interval_is_suppressed() {
        let mut limiter = limiter();
        assert!(limiter.try_acquire(AlertCategory::Critical, 1_000));
        assert!(!limiter.try_acquire(AlertCategory::Critical, 10_999));
        assert_eq!(limiter.remaining_ms(AlertCategory::Critical, 10_999), 1);
    }

    #[test]
    fn send_after_interval_is_accepted() {
        let mut limiter = limiter();
        assert!(limiter.try_acquire(AlertCategory::Warning, 1_000));
        assert!(limiter.try_acquire(AlertCategory::Warning, 11_000));
    }

    #[test]
    fn categories_are_independent() {
        let mut limiter = limiter();
        assert!(limiter.try_acquire(AlertCategory::Critical, 0));
        assert!(limiter.try_acquire(AlertCategory::Normal, 1));
        assert!(limiter.try_acquire(AlertCategory::Firmware, 2));
        assert!(!limiter.try_acquire(AlertCategory::Firmware, 59_000));
    }

    #[test]
    fn backwards_clock_counts_as_elapsed() {
        let mut limiter = limiter();
        assert!(limiter.try_acquire(AlertCategory::Normal, 50_000));
        assert!(limiter.try_acquire(AlertCategory::Normal, 10));
    }
}
