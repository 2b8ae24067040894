//! The ruleset owner: rule installation, lookup, and stats aggregation.

use std::collections::BTreeMap;

use tracing::debug;

use flowsim_core::sscp::{RuleSpec, StatsReplyBody};
use flowsim_core::{DevicePortNumber, MatchRuleKey, Packet, PacketTag, SpecError};

use crate::rule::MatchRule;
use crate::tree::{MatchTree, RuleId};

/// The copyable outcome of a match: what the device needs to forward the
/// packet. Projected from the chosen action after its statistics update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct ForwardingDecision {
    pub output_port: DevicePortNumber,
    pub rewrite_tag: Option<PacketTag>,
    pub preferential_drop: bool,
}

/// Owns the rules (in a free-list arena addressed by [`RuleId`]), the
/// ordered key map for deterministic iteration, and the wildcard tree.
///
/// Rules enter and leave atomically: the new rule is indexed before the
/// old one is cleared, so no packet ever observes an intermediate state.
#[derive(Debug)]
#[must_use]
pub struct Matcher {
    id: String,
    arena: Vec<Option<MatchRule>>,
    free_ids: Vec<RuleId>,
    by_key: BTreeMap<MatchRuleKey, RuleId>,
    tree: MatchTree,
}

impl Matcher {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            arena: Vec::new(),
            free_ids: Vec::new(),
            by_key: BTreeMap::new(),
            tree: MatchTree::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn num_rules(&self) -> usize {
        self.by_key.len()
    }

    /// Installs, replaces, or deletes a rule.
    ///
    /// A spec with no actions deletes any rule with the same key (a no-op
    /// when none exists). Otherwise the rule is indexed under every
    /// five-tuple of its key; a prior rule with the same key is cleared
    /// from the tree and dropped, its statistics with it.
    pub fn add_rule(&mut self, spec: RuleSpec) -> Result<(), SpecError> {
        spec.validate()?;

        if spec.is_delete() {
            if let Some(old_id) = self.by_key.remove(&spec.key) {
                self.tree.clear(old_id);
                self.release(old_id);
                debug!(matcher = %self.id, key = %spec.key, "removed rule");
            }
            return Ok(());
        }

        let rule = MatchRule::from_spec(&spec);
        let key = rule.key().clone();
        let new_id = self.alloc(rule);
        for five_tuple in key.five_tuples() {
            self.tree
                .insert(five_tuple, key.input_port(), key.tag(), new_id);
        }

        let replaced = self.by_key.insert(key.clone(), new_id);
        if let Some(old_id) = replaced {
            self.tree.clear(old_id);
            self.release(old_id);
            debug!(matcher = %self.id, key = %key, "updated rule");
        } else {
            debug!(matcher = %self.id, key = %key, "added rule");
        }
        Ok(())
    }

    /// Classifies a packet arriving on `input_port`, updating the chosen
    /// action's statistics. `None` on a match miss or when the matched
    /// rule has no actions.
    ///
    /// # Panics
    ///
    /// Panics when `input_port` is the wildcard sentinel: loopback-number
    /// traffic must never be looked up, or wildcard rules would alias it.
    pub fn match_or_null(
        &mut self,
        packet: &Packet,
        input_port: DevicePortNumber,
    ) -> Option<ForwardingDecision> {
        assert!(
            !input_port.is_wildcard(),
            "bad input port in match_or_null at {}",
            self.id
        );

        let id = self
            .tree
            .lookup(packet.five_tuple(), input_port, packet.tag())?;
        let rule = self.arena[id.index()]
            .as_mut()
            .expect("match tree references a live rule");
        let action = rule.choose(packet)?;
        Some(ForwardingDecision {
            output_port: action.output_port(),
            rewrite_tag: action.tag(),
            preferential_drop: action.preferential_drop(),
        })
    }

    /// Diagnostic path: routes a packet through action `i` of the rule
    /// with the given key, bypassing the hash.
    ///
    /// # Panics
    ///
    /// Panics when the key is unknown or the index is out of range.
    pub fn explicit_choose(
        &mut self,
        key: &MatchRuleKey,
        i: usize,
        packet: &Packet,
    ) -> ForwardingDecision {
        let id = *self
            .by_key
            .get(key)
            .unwrap_or_else(|| panic!("no rule with key {key} at {}", self.id));
        let rule = self.arena[id.index()]
            .as_mut()
            .expect("key map references a live rule");
        let action = rule.explicit_choose(i, packet);
        ForwardingDecision {
            output_port: action.output_port(),
            rewrite_tag: action.tag(),
            preferential_drop: action.preferential_drop(),
        }
    }

    /// The rule installed under `key`, if any.
    #[must_use]
    pub fn rule(&self, key: &MatchRuleKey) -> Option<&MatchRule> {
        let id = self.by_key.get(key)?;
        self.arena[id.index()].as_ref()
    }

    /// All rules in key order.
    pub fn rules(&self) -> impl Iterator<Item = &MatchRule> {
        self.by_key
            .values()
            .filter_map(|id| self.arena[id.index()].as_ref())
    }

    /// Snapshots every rule's per-action counters into `reply`, in key
    /// order.
    pub fn populate_stats(&self, include_flow_counts: bool, reply: &mut StatsReplyBody) {
        for (key, id) in &self.by_key {
            if let Some(rule) = self.arena[id.index()].as_ref() {
                reply.add_stats(key.clone(), rule.stats(include_flow_counts));
            }
        }
    }

    fn alloc(&mut self, rule: MatchRule) -> RuleId {
        if let Some(id) = self.free_ids.pop() {
            self.arena[id.index()] = Some(rule);
            id
        } else {
            self.arena.push(Some(rule));
            RuleId::new(self.arena.len() - 1)
        }
    }

    fn release(&mut self, id: RuleId) {
        self.arena[id.index()] = None;
        self.free_ids.push(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowsim_core::sscp::ActionSpec;
    use flowsim_core::{AccessLayerPort, FiveTuple, IpAddress, IpProto};

    const PORT1: DevicePortNumber = DevicePortNumber::new(1);

    fn dst_tuple(dst: u32) -> FiveTuple {
        FiveTuple::new(
            IpAddress::WILDCARD,
            IpAddress::new(dst),
            IpProto::WILDCARD,
            AccessLayerPort::WILDCARD,
            AccessLayerPort::WILDCARD,
        )
    }

    fn make_packet(dst: u32, src: u32) -> Packet {
        Packet::new_data(
            FiveTuple::new(
                IpAddress::new(src),
                IpAddress::new(dst),
                IpProto::TCP,
                AccessLayerPort::new(3000),
                AccessLayerPort::new(80),
            ),
            1000,
        )
    }

    fn make_spec(tuples: Vec<FiveTuple>, out: u32) -> RuleSpec {
        RuleSpec::new(
            MatchRuleKey::new(PORT1, PacketTag::DEFAULT, tuples),
            vec![ActionSpec::new(DevicePortNumber::new(out), None, 1)],
        )
    }

    #[test]
    fn test_add_then_match() {
        let mut matcher = Matcher::new("m");
        matcher.add_rule(make_spec(vec![dst_tuple(10)], 2)).unwrap();

        let decision = matcher.match_or_null(&make_packet(10, 1), PORT1).unwrap();
        assert_eq!(decision.output_port, DevicePortNumber::new(2));
        assert!(matcher.match_or_null(&make_packet(11, 1), PORT1).is_none());
    }

    #[test]
    fn test_rule_indexed_under_every_tuple() {
        let mut matcher = Matcher::new("m");
        matcher
            .add_rule(make_spec(vec![dst_tuple(10), dst_tuple(11)], 2))
            .unwrap();

        assert!(matcher.match_or_null(&make_packet(10, 1), PORT1).is_some());
        assert!(matcher.match_or_null(&make_packet(11, 1), PORT1).is_some());
        assert_eq!(matcher.num_rules(), 1);
    }

    #[test]
    fn test_replace_discards_old_rule_and_stats() {
        let mut matcher = Matcher::new("m");
        matcher.add_rule(make_spec(vec![dst_tuple(10)], 2)).unwrap();
        matcher.match_or_null(&make_packet(10, 1), PORT1);

        // Same key, different action set.
        matcher.add_rule(make_spec(vec![dst_tuple(10)], 3)).unwrap();

        let decision = matcher.match_or_null(&make_packet(10, 1), PORT1).unwrap();
        assert_eq!(decision.output_port, DevicePortNumber::new(3));
        assert_eq!(matcher.num_rules(), 1);

        // The replacement's counters started at zero (one match so far).
        let key = MatchRuleKey::new(PORT1, PacketTag::DEFAULT, vec![dst_tuple(10)]);
        let stats = matcher.rule(&key).unwrap().stats(false);
        assert_eq!(stats[0].total_pkts_matched, 1);
    }

    #[test]
    fn test_replace_narrows_tuple_coverage() {
        let mut matcher = Matcher::new("m");
        matcher
            .add_rule(make_spec(vec![dst_tuple(10), dst_tuple(11)], 2))
            .unwrap();

        // Keys differ (different tuple lists), so this is a new rule, not
        // a replacement; both remain installed.
        matcher.add_rule(make_spec(vec![dst_tuple(10)], 3)).unwrap();
        assert_eq!(matcher.num_rules(), 2);

        // The narrower rule overwrote the shared leaf.
        let decision = matcher.match_or_null(&make_packet(10, 1), PORT1).unwrap();
        assert_eq!(decision.output_port, DevicePortNumber::new(3));
        let decision = matcher.match_or_null(&make_packet(11, 1), PORT1).unwrap();
        assert_eq!(decision.output_port, DevicePortNumber::new(2));
    }

    #[test]
    fn test_empty_actions_deletes() {
        let mut matcher = Matcher::new("m");
        matcher.add_rule(make_spec(vec![dst_tuple(10)], 2)).unwrap();
        assert_eq!(matcher.num_rules(), 1);

        let key = MatchRuleKey::new(PORT1, PacketTag::DEFAULT, vec![dst_tuple(10)]);
        matcher.add_rule(RuleSpec::delete(key)).unwrap();
        assert_eq!(matcher.num_rules(), 0);
        assert!(matcher.match_or_null(&make_packet(10, 1), PORT1).is_none());
    }

    #[test]
    fn test_delete_missing_key_is_noop() {
        let mut matcher = Matcher::new("m");
        let key = MatchRuleKey::new(PORT1, PacketTag::DEFAULT, vec![dst_tuple(10)]);
        matcher.add_rule(RuleSpec::delete(key)).unwrap();
        assert_eq!(matcher.num_rules(), 0);
    }

    #[test]
    fn test_invalid_spec_rejected() {
        let mut matcher = Matcher::new("m");
        let spec = RuleSpec::new(
            MatchRuleKey::new(PORT1, PacketTag::DEFAULT, vec![dst_tuple(10)]),
            vec![ActionSpec::new(DevicePortNumber::new(2), None, 0)],
        );
        assert!(matcher.add_rule(spec).is_err());
        assert_eq!(matcher.num_rules(), 0);
    }

    #[test]
    #[should_panic(expected = "bad input port")]
    fn test_wildcard_input_port_panics() {
        let mut matcher = Matcher::new("m");
        matcher.match_or_null(&make_packet(10, 1), DevicePortNumber::WILDCARD);
    }

    #[test]
    fn test_decision_carries_action_attributes() {
        let mut matcher = Matcher::new("m");
        let mut action = ActionSpec::new(DevicePortNumber::new(2), Some(PacketTag::new(9)), 1);
        action.preferential_drop = true;
        let spec = RuleSpec::new(
            MatchRuleKey::new(PORT1, PacketTag::DEFAULT, vec![dst_tuple(10)]),
            vec![action],
        );
        matcher.add_rule(spec).unwrap();

        let decision = matcher.match_or_null(&make_packet(10, 1), PORT1).unwrap();
        assert_eq!(decision.rewrite_tag, Some(PacketTag::new(9)));
        assert!(decision.preferential_drop);
    }

    #[test]
    fn test_populate_stats_in_key_order() {
        let mut matcher = Matcher::new("m");
        matcher.add_rule(make_spec(vec![dst_tuple(20)], 2)).unwrap();
        matcher.add_rule(make_spec(vec![dst_tuple(10)], 3)).unwrap();
        matcher.match_or_null(&make_packet(20, 1), PORT1);

        let mut reply = StatsReplyBody::new();
        matcher.populate_stats(false, &mut reply);
        assert_eq!(reply.entries().len(), 2);
        // BTreeMap order, not insertion order.
        assert!(reply.entries()[0].0 < reply.entries()[1].0);
        let matched: u64 = reply
            .entries()
            .iter()
            .flat_map(|(_, stats)| stats)
            .map(|s| s.total_pkts_matched)
            .sum();
        assert_eq!(matched, 1);
    }

    #[test]
    fn test_explicit_choose_updates_stats() {
        let mut matcher = Matcher::new("m");
        let key = MatchRuleKey::new(PORT1, PacketTag::DEFAULT, vec![dst_tuple(10)]);
        let spec = RuleSpec::new(
            key.clone(),
            vec![
                ActionSpec::new(DevicePortNumber::new(2), None, 100),
                ActionSpec::new(DevicePortNumber::new(3), None, 1),
            ],
        );
        matcher.add_rule(spec).unwrap();

        let decision = matcher.explicit_choose(&key, 1, &make_packet(10, 1));
        assert_eq!(decision.output_port, DevicePortNumber::new(3));
        assert_eq!(matcher.rule(&key).unwrap().stats(false)[1].total_pkts_matched, 1);
    }

    #[test]
    fn test_rule_ids_recycled() {
        let mut matcher = Matcher::new("m");
        for round in 0..10 {
            matcher
                .add_rule(make_spec(vec![dst_tuple(round)], 2))
                .unwrap();
            let key = MatchRuleKey::new(PORT1, PacketTag::DEFAULT, vec![dst_tuple(round)]);
            matcher.add_rule(RuleSpec::delete(key)).unwrap();
        }
        // Every add reused the freed slot.
        assert!(matcher.arena.len() <= 1);
    }
}
