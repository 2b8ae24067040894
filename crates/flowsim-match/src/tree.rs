//! The multi-dimensional wildcard lookup tree.
//!
//! A fixed-depth tree with one level per match dimension, ordered so the
//! most selective fields are queried first: input port, tag, destination
//! IP, source IP, protocol, source port, destination port. Each node keeps
//! concrete children in a map and at most one wildcard child; lookups
//! prefer the concrete child at every level independently.

use std::collections::HashMap;
use std::fmt;

use flowsim_core::{DevicePortNumber, FiveTuple, PacketTag};

const NUM_LEVELS: usize = 7;

/// A stable handle to a rule in the matcher's arena. Leaves of the tree
/// store these instead of aliasing the rules themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[must_use]
pub struct RuleId(u32);

impl RuleId {
    pub(crate) fn new(index: usize) -> Self {
        Self(index as u32)
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rule#{}", self.0)
    }
}

/// Projects the value and wildcard sentinel for one tree level.
fn level_key(
    five_tuple: &FiveTuple,
    input_port: DevicePortNumber,
    tag: PacketTag,
    level: usize,
) -> (u64, u64) {
    match level {
        0 => (
            u64::from(input_port.raw()),
            u64::from(DevicePortNumber::WILDCARD.raw()),
        ),
        1 => (u64::from(tag.raw()), u64::from(PacketTag::WILDCARD.raw())),
        2 => (
            u64::from(five_tuple.ip_dst().raw()),
            u64::from(flowsim_core::IpAddress::WILDCARD.raw()),
        ),
        3 => (
            u64::from(five_tuple.ip_src().raw()),
            u64::from(flowsim_core::IpAddress::WILDCARD.raw()),
        ),
        4 => (
            u64::from(five_tuple.ip_proto().raw()),
            u64::from(flowsim_core::IpProto::WILDCARD.raw()),
        ),
        5 => (
            u64::from(five_tuple.src_port().raw()),
            u64::from(flowsim_core::AccessLayerPort::WILDCARD.raw()),
        ),
        6 => (
            u64::from(five_tuple.dst_port().raw()),
            u64::from(flowsim_core::AccessLayerPort::WILDCARD.raw()),
        ),
        _ => unreachable!("level {level} out of range"),
    }
}

#[derive(Debug, Default)]
struct Node {
    concrete: HashMap<u64, Node>,
    wild: Option<Box<Node>>,
    rule: Option<RuleId>,
}

impl Node {
    fn is_empty(&self) -> bool {
        self.rule.is_none() && self.concrete.is_empty() && self.wild.is_none()
    }
}

/// The lookup index over all installed rules.
#[derive(Debug, Default)]
#[must_use]
pub struct MatchTree {
    root: Node,
}

impl MatchTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a rule handle under one (possibly wildcarded) five-tuple.
    /// An existing handle at the same leaf is overwritten.
    pub fn insert(
        &mut self,
        five_tuple: &FiveTuple,
        input_port: DevicePortNumber,
        tag: PacketTag,
        id: RuleId,
    ) {
        let mut node = &mut self.root;
        for level in 0..NUM_LEVELS {
            let (value, wild) = level_key(five_tuple, input_port, tag, level);
            node = if value == wild {
                node.wild.get_or_insert_with(Box::default)
            } else {
                node.concrete.entry(value).or_default()
            };
        }
        node.rule = Some(id);
    }

    /// Finds the rule for a concrete packet identity, preferring concrete
    /// children over wildcard children at every level.
    #[must_use]
    pub fn lookup(
        &self,
        five_tuple: &FiveTuple,
        input_port: DevicePortNumber,
        tag: PacketTag,
    ) -> Option<RuleId> {
        Self::lookup_node(&self.root, five_tuple, input_port, tag, 0)
    }

    fn lookup_node(
        node: &Node,
        five_tuple: &FiveTuple,
        input_port: DevicePortNumber,
        tag: PacketTag,
        level: usize,
    ) -> Option<RuleId> {
        if level == NUM_LEVELS {
            return node.rule;
        }
        let (value, wild) = level_key(five_tuple, input_port, tag, level);

        if value != wild {
            if let Some(child) = node.concrete.get(&value) {
                if let Some(id) = Self::lookup_node(child, five_tuple, input_port, tag, level + 1) {
                    return Some(id);
                }
            }
        }
        node.wild
            .as_deref()
            .and_then(|child| Self::lookup_node(child, five_tuple, input_port, tag, level + 1))
    }

    /// Removes every leaf referencing `id` and prunes emptied nodes.
    pub fn clear(&mut self, id: RuleId) {
        Self::clear_node(&mut self.root, id);
    }

    // Returns whether the node became empty.
    fn clear_node(node: &mut Node, id: RuleId) -> bool {
        if node.rule == Some(id) {
            node.rule = None;
        }
        node.concrete.retain(|_, child| !Self::clear_node(child, id));
        let prune_wild = node
            .wild
            .as_deref_mut()
            .is_some_and(|child| Self::clear_node(child, id));
        if prune_wild {
            node.wild = None;
        }
        node.is_empty()
    }

    /// True when no rules are installed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }
}
