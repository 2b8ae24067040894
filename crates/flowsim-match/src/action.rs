//! A single weighted output action.

use std::cell::Cell;
use std::fmt;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use flowsim_core::sscp::{ActionSpec, ActionStats};
use flowsim_core::{DevicePortNumber, Packet, PacketTag};

use crate::flow_counter::FlowCounter;

/// One forwarding decision a rule can make: an output port, an optional
/// tag rewrite, a weight, and per-action statistics.
///
/// Sampling draws come from a generator seeded from the output port and
/// weight, so identical simulations sample identically.
#[derive(Debug)]
#[must_use]
pub struct MatchRuleAction {
    output_port: DevicePortNumber,
    tag: Option<PacketTag>,
    weight: u32,
    preferential_drop: bool,
    stats: ActionStats,
    sample_prob: f64,
    flow_counter: Option<FlowCounter>,
    rng: StdRng,
    // Sum of sibling weights, maintained by the owning rule. Zero until
    // the action is attached.
    total_weight: Cell<u64>,
}

impl MatchRuleAction {
    pub fn new(output_port: DevicePortNumber, tag: Option<PacketTag>, weight: u32) -> Self {
        Self {
            output_port,
            tag,
            weight,
            preferential_drop: false,
            stats: ActionStats::new(output_port, tag),
            sample_prob: 0.0,
            flow_counter: None,
            rng: StdRng::seed_from_u64(u64::from(output_port.raw()) + u64::from(weight)),
            total_weight: Cell::new(0),
        }
    }

    /// Builds the runtime action from its declarative description. The
    /// spec is assumed validated (weight at least 1).
    pub fn from_spec(spec: &ActionSpec) -> Self {
        let mut action = Self::new(spec.output_port, spec.tag, spec.weight);
        action.preferential_drop = spec.preferential_drop;
        if let Some(n) = spec.flow_counter_n {
            action.enable_flow_counter(n);
        }
        action
    }

    /// Samples one in `n` matching packets into a distinct-flow counter.
    ///
    /// # Panics
    ///
    /// Panics when `n` is zero.
    pub fn enable_flow_counter(&mut self, n: u64) {
        let counter = FlowCounter::new(n);
        self.sample_prob = 1.0 / n as f64;
        self.flow_counter = Some(counter);
    }

    #[must_use]
    pub fn output_port(&self) -> DevicePortNumber {
        self.output_port
    }

    #[must_use]
    pub fn tag(&self) -> Option<PacketTag> {
        self.tag
    }

    #[must_use]
    pub fn weight(&self) -> u32 {
        self.weight
    }

    #[must_use]
    pub fn preferential_drop(&self) -> bool {
        self.preferential_drop
    }

    pub fn set_preferential_drop(&mut self, value: bool) {
        self.preferential_drop = value;
    }

    /// Counts a matched packet, and maybe samples its flow.
    pub fn update_stats(&mut self, packet: &Packet) {
        let prev = self.stats.total_bytes_matched;
        self.stats.total_bytes_matched += u64::from(packet.size_bytes());
        self.stats.total_pkts_matched += 1;
        assert!(
            prev <= self.stats.total_bytes_matched,
            "byte counter overflow: {prev} + {}",
            packet.size_bytes()
        );

        if self.sample_prob != 0.0 {
            if let Some(counter) = self.flow_counter.as_mut() {
                if self.rng.gen::<f64>() <= self.sample_prob {
                    counter.new_packet(packet.five_tuple());
                }
            }
        }
    }

    /// A snapshot of the counters. The flow-count estimate is attached
    /// only when asked for and when this action samples flows.
    #[must_use]
    pub fn stats(&self, include_flow_count: bool) -> ActionStats {
        let mut out = self.stats.clone();
        if include_flow_count {
            if let Some(counter) = &self.flow_counter {
                out.flow_count = Some(counter.estimate_count());
            }
        }
        out
    }

    /// Folds another snapshot's counters into this action.
    pub fn merge_stats(&mut self, other: &ActionStats) {
        let prev_bytes = self.stats.total_bytes_matched;
        let prev_pkts = self.stats.total_pkts_matched;
        self.stats.total_bytes_matched += other.total_bytes_matched;
        self.stats.total_pkts_matched += other.total_pkts_matched;
        assert!(
            self.stats.total_bytes_matched >= prev_bytes
                && self.stats.total_pkts_matched >= prev_pkts,
            "stats merge overflow"
        );
    }

    /// This action's share of the rule's traffic: weight over the sum of
    /// sibling weights.
    ///
    /// # Panics
    ///
    /// Panics when the action has not been attached to a rule.
    #[must_use]
    pub fn fraction_of_traffic(&self) -> f64 {
        let total = self.total_weight.get();
        assert!(total != 0, "no parent rule set yet");
        f64::from(self.weight) / total as f64
    }

    pub(crate) fn set_total_weight(&self, total: u64) {
        self.total_weight.set(total);
    }

    #[must_use]
    pub fn has_flow_counter(&self) -> bool {
        self.flow_counter.is_some()
    }
}

impl Clone for MatchRuleAction {
    /// Duplicates the forwarding identity. Statistics, sampling draws, and
    /// rule attachment start over; a flow counter is re-attached fresh at
    /// the same rate.
    fn clone(&self) -> Self {
        let mut clone = Self::new(self.output_port, self.tag, self.weight);
        clone.preferential_drop = self.preferential_drop;
        if let Some(counter) = &self.flow_counter {
            clone.enable_flow_counter(counter.scale());
        }
        clone
    }
}

impl fmt::Display for MatchRuleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(out: {}, tag: {}, flow counter: {}, w: {})",
            self.output_port,
            self.tag.map_or_else(|| "-".to_string(), |t| t.to_string()),
            self.flow_counter.is_some(),
            self.weight
        )
    }
}
