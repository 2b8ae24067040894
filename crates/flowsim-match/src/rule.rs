//! A classification rule and its weighted actions.

use std::fmt;

use flowsim_core::sscp::{ActionStats, RuleSpec};
use flowsim_core::{FiveTuple, MatchRuleKey, Packet};

use crate::action::MatchRuleAction;

/// A key plus an ordered sequence of weighted actions.
///
/// The sum of action weights is cached and recomputed on every mutation;
/// action order is load-bearing (it breaks ties in weighted selection) and
/// survives cloning.
#[derive(Debug)]
#[must_use]
pub struct MatchRule {
    key: MatchRuleKey,
    actions: Vec<MatchRuleAction>,
    total_weight: u64,
}

impl MatchRule {
    pub fn new(key: MatchRuleKey) -> Self {
        Self {
            key,
            actions: Vec::new(),
            total_weight: 0,
        }
    }

    /// Builds the runtime rule from a validated specification.
    pub fn from_spec(spec: &RuleSpec) -> Self {
        let mut rule = Self::new(spec.key.clone());
        for action_spec in &spec.actions {
            rule.add_action(MatchRuleAction::from_spec(action_spec));
        }
        rule
    }

    #[must_use]
    pub fn key(&self) -> &MatchRuleKey {
        &self.key
    }

    #[must_use]
    pub fn actions(&self) -> &[MatchRuleAction] {
        &self.actions
    }

    #[must_use]
    pub fn total_weight(&self) -> u64 {
        self.total_weight
    }

    /// Appends an action and refreshes the weight cache.
    ///
    /// # Panics
    ///
    /// Panics when an existing action already uses the same
    /// (output port, tag) pair.
    pub fn add_action(&mut self, action: MatchRuleAction) {
        for current in &self.actions {
            assert!(
                !(current.output_port() == action.output_port() && current.tag() == action.tag()),
                "duplicate action for port {} and tag {:?} in rule {}",
                action.output_port(),
                action.tag(),
                self.key
            );
        }
        self.actions.push(action);

        self.total_weight = self
            .actions
            .iter()
            .map(|a| u64::from(a.weight()))
            .sum();
        for action in &self.actions {
            action.set_total_weight(self.total_weight);
        }
    }

    /// Picks the action for a flow without touching statistics.
    ///
    /// Exactly one action wins outright. Otherwise the flow hash modulo
    /// the total weight is scanned against the weight prefix sums, first
    /// match wins (insertion order breaks ties). A rule with no actions
    /// yields `None`.
    #[must_use]
    pub fn choose_index(&self, five_tuple: &FiveTuple) -> Option<usize> {
        if self.actions.len() == 1 {
            return Some(0);
        }
        if self.total_weight == 0 {
            return None;
        }

        let mut hash = five_tuple.flow_hash() % self.total_weight;
        for (i, action) in self.actions.iter().enumerate() {
            let weight = u64::from(action.weight());
            if hash < weight {
                return Some(i);
            }
            hash -= weight;
        }
        unreachable!("hash exceeded total weight");
    }

    /// Picks the action for a packet and records the match in its
    /// statistics.
    pub fn choose(&mut self, packet: &Packet) -> Option<&MatchRuleAction> {
        let index = self.choose_index(packet.five_tuple())?;
        self.actions[index].update_stats(packet);
        Some(&self.actions[index])
    }

    /// Diagnostic path: selects action `i` without hashing, recording the
    /// match.
    ///
    /// # Panics
    ///
    /// Panics when `i` is out of range.
    pub fn explicit_choose(&mut self, i: usize, packet: &Packet) -> &MatchRuleAction {
        assert!(
            i < self.actions.len(),
            "action index {i} out of range for rule {}",
            self.key
        );
        self.actions[i].update_stats(packet);
        &self.actions[i]
    }

    /// Per-action counter snapshots in action order.
    #[must_use]
    pub fn stats(&self, include_flow_count: bool) -> Vec<ActionStats> {
        self.actions
            .iter()
            .map(|a| a.stats(include_flow_count))
            .collect()
    }

    /// Folds another rule's counters into actions with a matching
    /// (output port, tag) pair.
    pub fn merge_stats(&mut self, other: &MatchRule) {
        for action in &mut self.actions {
            for other_action in &other.actions {
                if action.tag() == other_action.tag()
                    && action.output_port() == other_action.output_port()
                {
                    action.merge_stats(&other_action.stats(false));
                }
            }
        }
    }
}

impl Clone for MatchRule {
    /// Clones the key and the actions in order; statistics start fresh.
    fn clone(&self) -> Self {
        let mut clone = Self::new(self.key.clone());
        for action in &self.actions {
            clone.add_action(action.clone());
        }
        clone
    }
}

impl fmt::Display for MatchRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> [", self.key)?;
        for (i, action) in self.actions.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{action}")?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowsim_core::{AccessLayerPort, DevicePortNumber, IpAddress, IpProto, PacketTag};

    fn make_key() -> MatchRuleKey {
        MatchRuleKey::new(
            DevicePortNumber::new(1),
            PacketTag::DEFAULT,
            vec![FiveTuple::WILDCARD],
        )
    }

    fn make_packet(src: u32) -> Packet {
        Packet::new_data(
            FiveTuple::new(
                IpAddress::new(src),
                IpAddress::new(0x0a00_00ff),
                IpProto::TCP,
                AccessLayerPort::new(4000),
                AccessLayerPort::new(80),
            ),
            1000,
        )
    }

    fn make_action(port: u32, weight: u32) -> MatchRuleAction {
        MatchRuleAction::new(DevicePortNumber::new(port), None, weight)
    }

    #[test]
    fn test_single_action_always_wins() {
        let mut rule = MatchRule::new(make_key());
        rule.add_action(make_action(2, 1));
        for src in 0..100 {
            let action = rule.choose(&make_packet(src)).unwrap();
            assert_eq!(action.output_port(), DevicePortNumber::new(2));
        }
    }

    #[test]
    fn test_no_actions_yields_none() {
        let mut rule = MatchRule::new(make_key());
        assert!(rule.choose(&make_packet(1)).is_none());
    }

    #[test]
    fn test_total_weight_cache_tracks_mutation() {
        let mut rule = MatchRule::new(make_key());
        rule.add_action(make_action(2, 3));
        assert_eq!(rule.total_weight(), 3);
        rule.add_action(make_action(3, 1));
        assert_eq!(rule.total_weight(), 4);
        // Every action sees the refreshed total.
        assert!((rule.actions()[0].fraction_of_traffic() - 0.75).abs() < f64::EPSILON);
        assert!((rule.actions()[1].fraction_of_traffic() - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    #[should_panic(expected = "duplicate action")]
    fn test_duplicate_port_tag_panics() {
        let mut rule = MatchRule::new(make_key());
        rule.add_action(make_action(2, 1));
        rule.add_action(make_action(2, 5));
    }

    #[test]
    fn test_same_port_different_tag_allowed() {
        let mut rule = MatchRule::new(make_key());
        rule.add_action(MatchRuleAction::new(
            DevicePortNumber::new(2),
            Some(PacketTag::new(1)),
            1,
        ));
        rule.add_action(MatchRuleAction::new(
            DevicePortNumber::new(2),
            Some(PacketTag::new(2)),
            1,
        ));
        assert_eq!(rule.actions().len(), 2);
    }

    #[test]
    fn test_choice_is_deterministic_per_flow() {
        let mut rule = MatchRule::new(make_key());
        rule.add_action(make_action(2, 3));
        rule.add_action(make_action(3, 1));

        for src in 0..50 {
            let first = rule.choose_index(make_packet(src).five_tuple());
            for _ in 0..5 {
                assert_eq!(rule.choose_index(make_packet(src).five_tuple()), first);
            }
        }
    }

    #[test]
    fn test_weighted_split_roughly_proportional() {
        let mut rule = MatchRule::new(make_key());
        rule.add_action(make_action(2, 3));
        rule.add_action(make_action(3, 1));

        let mut first = 0usize;
        let total = 10_000u32;
        for src in 0..total {
            if rule.choose_index(make_packet(src).five_tuple()) == Some(0) {
                first += 1;
            }
        }
        let fraction = first as f64 / f64::from(total);
        assert!(
            (fraction - 0.75).abs() < 0.03,
            "split fraction {fraction} too far from 0.75"
        );
    }

    #[test]
    fn test_choose_updates_stats() {
        let mut rule = MatchRule::new(make_key());
        rule.add_action(make_action(2, 1));
        rule.choose(&make_packet(1));
        rule.choose(&make_packet(2));
        let stats = rule.stats(false);
        assert_eq!(stats[0].total_pkts_matched, 2);
        assert_eq!(stats[0].total_bytes_matched, 2000);
    }

    #[test]
    fn test_explicit_choose_bypasses_hash() {
        let mut rule = MatchRule::new(make_key());
        rule.add_action(make_action(2, 1000));
        rule.add_action(make_action(3, 1));

        let pkt = make_packet(1);
        let action = rule.explicit_choose(1, &pkt);
        assert_eq!(action.output_port(), DevicePortNumber::new(3));
        assert_eq!(rule.stats(false)[1].total_pkts_matched, 1);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_explicit_choose_out_of_range_panics() {
        let mut rule = MatchRule::new(make_key());
        rule.add_action(make_action(2, 1));
        rule.explicit_choose(1, &make_packet(1));
    }

    #[test]
    fn test_clone_preserves_order_and_resets_stats() {
        let mut rule = MatchRule::new(make_key());
        rule.add_action(make_action(2, 3));
        rule.add_action(make_action(3, 1));
        rule.choose(&make_packet(1));

        let clone = rule.clone();
        assert_eq!(clone.total_weight(), 4);
        assert_eq!(
            clone.actions()[0].output_port(),
            rule.actions()[0].output_port()
        );
        assert_eq!(clone.stats(false)[0].total_pkts_matched, 0);

        // Clones route identically.
        for src in 0..100 {
            let pkt = make_packet(src);
            assert_eq!(
                rule.choose_index(pkt.five_tuple()),
                clone.choose_index(pkt.five_tuple())
            );
        }
    }

    #[test]
    fn test_merge_stats_by_port_and_tag() {
        let mut rule = MatchRule::new(make_key());
        rule.add_action(make_action(2, 1));
        rule.add_action(make_action(3, 1));

        let mut other = MatchRule::new(make_key());
        other.add_action(make_action(3, 1));
        other.explicit_choose(0, &make_packet(9));

        rule.merge_stats(&other);
        let stats = rule.stats(false);
        assert_eq!(stats[0].total_pkts_matched, 0);
        assert_eq!(stats[1].total_pkts_matched, 1);
    }
}
