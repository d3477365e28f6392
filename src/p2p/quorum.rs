//! Quorum threshold and the one-shot crossing latch

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};

/// How many peer acknowledgements make a transaction distributed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuorumPolicy {
    /// Fixed number of acknowledgements regardless of cluster size
    Fixed(usize),
    /// Strict majority of the currently known peers
    Majority,
}

impl Default for QuorumPolicy {
    fn default() -> Self {
        QuorumPolicy::Fixed(2)
    }
}

impl QuorumPolicy {
    pub fn threshold(&self, peers: usize) -> usize {
        match self {
            QuorumPolicy::Fixed(n) => *n,
            QuorumPolicy::Majority => peers / 2 + 1,
        }
    }
}

/// Counts acknowledgements for one transaction. Exactly one call to
/// [`QuorumLatch::ack`] observes the crossing, however many run concurrently.
#[derive(Debug)]
pub struct QuorumLatch {
    threshold: usize,
    acks: AtomicUsize,
}

impl QuorumLatch {
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold,
            acks: AtomicUsize::new(0),
        }
    }

    /// Record one acknowledgement; true only for the one reaching the threshold
    pub fn ack(&self) -> bool {
        self.acks.fetch_add(1, Ordering::AcqRel) + 1 == self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_threshold() {
        assert_eq!(QuorumPolicy::default().threshold(5), 2);
        assert_eq!(QuorumPolicy::Fixed(2).threshold(1), 2);
        assert_eq!(QuorumPolicy::Majority.threshold(2), 2);
        assert_eq!(QuorumPolicy::Majority.threshold(3), 2);
        assert_eq!(QuorumPolicy::Majority.threshold(4), 3);
        assert_eq!(QuorumPolicy::Majority.threshold(0), 1);
    }

    #[test]
    fn test_latch_fires_once() {
        let latch = QuorumLatch::new(2);
        assert!(!latch.ack());
        assert!(latch.ack());
        assert!(!latch.ack());
        assert!(!latch.ack());
    }

    #[test]
    fn test_latch_concurrent_acks() {
        for _ in 0..50 {
            let latch = Arc::new(QuorumLatch::new(2));
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let latch = latch.clone();
                    std::thread::spawn(move || latch.ack())
                })
                .collect();
            let fired = handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|fired| *fired)
                .count();
            assert_eq!(fired, 1);
        }
    }

    #[test]
    fn test_zero_threshold_never_fires() {
        let latch = QuorumLatch::new(0);
        assert!(!latch.ack());
        assert!(!latch.ack());
    }
}
