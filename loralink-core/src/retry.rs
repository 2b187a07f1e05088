//! Bounded retry budget for the waiting states.

/// Default retry ceiling.
pub const DEFAULT_MAX_RETRIES: u8 = 3;

/// Counts consecutive failed windows. `can_retry` answers false on the
/// `max`-th failure and resets itself, so the next transfer starts fresh.
#[derive(Debug, Clone, Copy)]
pub struct RetryCounter {
    counter: u8,
    max: u8,
}

impl RetryCounter {
    pub fn new(max: u8) -> Self {
        Self {
            counter: 0,
            max: max.max(1),
        }
    }

    pub fn clear(&mut self) {
        self.counter = 0;
    }

    /// Record a failed window. True if another attempt is allowed.
    pub fn can_retry(&mut self) -> bool {
        self.counter += 1;
        if self.counter >= self.max {
            self.counter = 0;
            return false;
        }
        true
    }

    pub fn count(&self) -> u8 {
        self.counter
    }

    pub fn max(&self) -> u8 {
        self.max
    }
}

impl Default for RetryCounter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausts_after_max_failures() {
        let mut retries = RetryCounter::new(3);
        assert!(retries.can_retry());
        assert!(retries.can_retry());
        assert!(!retries.can_retry());
        assert_eq!(retries.count(), 0);
    }

    #[test]
    fn exhaustion_resets_budget() {
        let mut retries = RetryCounter::new(5);
        for _ in 0..4 {
            assert!(retries.can_retry());
        }
        assert!(!retries.can_retry());
        // Fresh budget afterwards.
        for _ in 0..4 {
            assert!(retries.can_retry());
        }
        assert!(!retries.can_retry());
    }

    #[test]
    fn clear_restores_budget() {
        let mut retries = RetryCounter::default();
        assert!(retries.can_retry());
        assert!(retries.can_retry());
        retries.clear();
        assert!(retries.can_retry());
        assert!(retries.can_retry());
        assert!(!retries.can_retry());
    }

    #[test]
    fn zero_ceiling_is_treated_as_one() {
        let mut retries = RetryCounter::new(0);
        assert_eq!(retries.max(), 1);
        assert!(!retries.can_retry());
    }
}
