//! Probabilistic distinct-flow estimation.

use std::collections::HashSet;

use flowsim_core::FiveTuple;

/// Estimates the number of distinct five-tuples in a packet stream from a
/// 1-in-`n` sample.
///
/// The counter sees only the sampled packets; it tracks the distinct flow
/// hashes among them and scales the count back up by the sampling rate.
/// Insertion is O(1) expected.
#[derive(Debug)]
#[must_use]
pub struct FlowCounter {
    scale: u64,
    seen: HashSet<u64>,
}

impl FlowCounter {
    /// A counter for a 1-in-`n` sampled stream.
    ///
    /// # Panics
    ///
    /// Panics when `n` is zero.
    pub fn new(n: u64) -> Self {
        assert!(n != 0, "flow counter sampling rate must be at least 1");
        Self {
            scale: n,
            seen: HashSet::new(),
        }
    }

    /// Feeds one sampled packet's flow identity to the estimator.
    pub fn new_packet(&mut self, five_tuple: &FiveTuple) {
        self.seen.insert(five_tuple.flow_hash());
    }

    /// Estimated distinct flows in the full (unsampled) stream.
    #[must_use]
    pub fn estimate_count(&self) -> u64 {
        self.seen.len() as u64 * self.scale
    }

    /// The sampling rate `n` this counter was built for.
    #[must_use]
    pub fn scale(&self) -> u64 {
        self.scale
    }

    /// A fresh, empty counter at the same sampling rate.
    pub fn clone_empty(&self) -> Self {
        Self::new(self.scale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowsim_core::{AccessLayerPort, IpAddress, IpProto};

    fn make_tuple(src: u32) -> FiveTuple {
        FiveTuple::new(
            IpAddress::new(src),
            IpAddress::new(0x0a00_0001),
            IpProto::UDP,
            AccessLayerPort::new(9000),
            AccessLayerPort::new(53),
        )
    }

    #[test]
    fn test_counts_distinct_flows() {
        let mut counter = FlowCounter::new(1);
        for src in 0..100 {
            counter.new_packet(&make_tuple(src));
        }
        assert_eq!(counter.estimate_count(), 100);
    }

    #[test]
    fn test_repeats_do_not_inflate() {
        let mut counter = FlowCounter::new(1);
        for _ in 0..1000 {
            counter.new_packet(&make_tuple(7));
        }
        assert_eq!(counter.estimate_count(), 1);
    }

    #[test]
    fn test_estimate_scales_by_rate() {
        let mut counter = FlowCounter::new(16);
        for src in 0..10 {
            counter.new_packet(&make_tuple(src));
        }
        assert_eq!(counter.estimate_count(), 160);
    }

    #[test]
    fn test_clone_empty_keeps_rate_drops_state() {
        let mut counter = FlowCounter::new(4);
        counter.new_packet(&make_tuple(1));
        let fresh = counter.clone_empty();
        assert_eq!(fresh.scale(), 4);
        assert_eq!(fresh.estimate_count(), 0);
    }

    #[test]
    #[should_panic(expected = "sampling rate")]
    fn test_zero_rate_panics() {
        let _ = FlowCounter::new(0);
    }
}
