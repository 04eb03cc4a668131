//! Consecutive-miss tracking for the block source.

/// Counts consecutive polls that found no block.
///
/// Exceeding the threshold grows it by a tenth (integer), so a slow source
/// yields less and less often instead of stalling the pipeline forever.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StallCounter {
    count: u32,
    threshold: u32,
}

impl StallCounter {
    pub fn new(threshold: u32) -> Self {
        Self {
            count: 0,
            threshold,
        }
    }

    /// Record one miss. Returns `true` when this miss breaches the threshold,
    /// in which case the threshold grows and the count restarts.
    pub fn record(&mut self) -> bool {
        self.count += 1;
        if self.count <= self.threshold {
            return false;
        }
        self.threshold += self.threshold / 10;
        self.count = 0;
        true
    }

    /// A block arrived.
    pub fn reset(&mut self) {
        self.count = 0;
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breach_only_after_exceeding_threshold() {
        let mut counter = StallCounter::new(10);
        for _ in 0..10 {
            assert!(!counter.record());
        }
        assert_eq!(counter.count(), 10);
        assert!(counter.record());
        assert_eq!(counter.threshold(), 11);
        assert_eq!(counter.count(), 0);
    }

    #[test]
    fn threshold_keeps_growing() {
        let mut counter = StallCounter::new(100);
        let mut breaches = Vec::new();
        for _ in 0..400 {
            if counter.record() {
                breaches.push(counter.threshold());
            }
        }
        assert_eq!(breaches, vec![110, 121, 133]);
    }

    #[test]
    fn reset_clears_count_but_keeps_threshold() {
        let mut counter = StallCounter::new(2);
        counter.record();
        counter.record();
        counter.reset();
        assert_eq!(counter.count(), 0);
        assert!(!counter.record());
        assert_eq!(counter.threshold(), 2);
    }
}
