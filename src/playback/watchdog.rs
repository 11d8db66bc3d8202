//! Zero-throughput stall detection.
//!
//! A stream can die silently: the transport keeps reporting `Playing` while
//! no bytes are being decoded. The watchdog samples the decoded bitrate once
//! per second (after a grace period, see [`crate::SessionOptions`]) and
//! treats a sustained run of zero samples as a stall, distinct from an
//! explicit transport error but recovered through the same retry path.

/// Counts consecutive zero-bitrate samples and fires at a threshold.
#[derive(Debug)]
pub struct StallDetector {
    consecutive_zero: u32,
    threshold: u32,
}

impl StallDetector {
    pub fn new(threshold: u32) -> Self {
        Self {
            consecutive_zero: 0,
            threshold,
        }
    }

    /// Feeds one bitrate sample. Returns `true` exactly when this sample is
    /// the `threshold`-th consecutive zero; the counter then restarts so a
    /// persisting stall fires again only after another full run.
    pub fn observe(&mut self, bitrate: u64) -> bool {
        if bitrate > 0 {
            self.consecutive_zero = 0;
            return false;
        }
        self.consecutive_zero += 1;
        if self.consecutive_zero >= self.threshold {
            self.consecutive_zero = 0;
            true
        } else {
            false
        }
    }

    pub fn reset(&mut self) {
        self.consecutive_zero = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nine_zero_samples_do_not_trigger_but_the_tenth_does() {
        let mut detector = StallDetector::new(10);
        for i in 0..9 {
            assert!(!detector.observe(0), "sample {i} must not trigger");
        }
        assert!(detector.observe(0));
    }

    #[test]
    fn any_nonzero_sample_resets_the_run() {
        let mut detector = StallDetector::new(10);
        for _ in 0..9 {
            detector.observe(0);
        }
        detector.observe(1_500_000);
        for i in 0..9 {
            assert!(!detector.observe(0), "sample {i} after reset");
        }
        assert!(detector.observe(0));
    }

    #[test]
    fn triggering_restarts_the_counter() {
        let mut detector = StallDetector::new(3);
        assert!(!detector.observe(0));
        assert!(!detector.observe(0));
        assert!(detector.observe(0));
        // fresh run after firing
        assert!(!detector.observe(0));
        assert!(!detector.observe(0));
        assert!(detector.observe(0));
    }
}
