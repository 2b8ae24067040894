//! Match-rule keys.

use std::fmt;

use crate::tuple::FiveTuple;
use crate::types::{DevicePortNumber, PacketTag};

/// The immutable identity of a match rule: input port, tag, and a set of
/// (possibly wildcarded) five-tuples.
///
/// The tuple list is canonicalized on construction (sorted, deduplicated)
/// so two keys built from the same tuples in different orders compare
/// equal and hash identically.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[must_use]
pub struct MatchRuleKey {
    input_port: DevicePortNumber,
    tag: PacketTag,
    five_tuples: Vec<FiveTuple>,
}

impl MatchRuleKey {
    pub fn new(
        input_port: DevicePortNumber,
        tag: PacketTag,
        mut five_tuples: Vec<FiveTuple>,
    ) -> Self {
        five_tuples.sort_unstable();
        five_tuples.dedup();
        Self {
            input_port,
            tag,
            five_tuples,
        }
    }

    #[must_use]
    pub fn input_port(&self) -> DevicePortNumber {
        self.input_port
    }

    #[must_use]
    pub fn tag(&self) -> PacketTag {
        self.tag
    }

    #[must_use]
    pub fn five_tuples(&self) -> &[FiveTuple] {
        &self.five_tuples
    }
}

impl fmt::Display for MatchRuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "in: {}, tag: {}, tuples: [", self.input_port, self.tag)?;
        for (i, tuple) in self.five_tuples.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{tuple}")?;
        }
        write!(f, "]")
    }
}

impl fmt::Debug for MatchRuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MatchRuleKey({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AccessLayerPort, IpAddress, IpProto};

    fn make_tuple(dst: u32) -> FiveTuple {
        FiveTuple::new(
            IpAddress::WILDCARD,
            IpAddress::new(dst),
            IpProto::WILDCARD,
            AccessLayerPort::WILDCARD,
            AccessLayerPort::WILDCARD,
        )
    }

    #[test]
    fn test_tuple_order_does_not_matter() {
        let a = MatchRuleKey::new(
            DevicePortNumber::new(1),
            PacketTag::DEFAULT,
            vec![make_tuple(1), make_tuple(2)],
        );
        let b = MatchRuleKey::new(
            DevicePortNumber::new(1),
            PacketTag::DEFAULT,
            vec![make_tuple(2), make_tuple(1)],
        );
        assert_eq!(a, b);
    }

    #[test]
    fn test_duplicate_tuples_collapse() {
        let key = MatchRuleKey::new(
            DevicePortNumber::new(1),
            PacketTag::DEFAULT,
            vec![make_tuple(1), make_tuple(1)],
        );
        assert_eq!(key.five_tuples().len(), 1);
    }

    #[test]
    fn test_components_distinguish() {
        let a = MatchRuleKey::new(DevicePortNumber::new(1), PacketTag::DEFAULT, vec![]);
        let b = MatchRuleKey::new(DevicePortNumber::new(2), PacketTag::DEFAULT, vec![]);
        let c = MatchRuleKey::new(DevicePortNumber::new(1), PacketTag::new(7), vec![]);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_display() {
        let key = MatchRuleKey::new(
            DevicePortNumber::new(3),
            PacketTag::new(9),
            vec![FiveTuple::WILDCARD],
        );
        assert_eq!(format!("{key}"), "in: 3, tag: 9, tuples: [(*:* -> *:*, *)]");
    }
}
