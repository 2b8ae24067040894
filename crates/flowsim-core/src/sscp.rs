//! Control-plane (SSCP) data model.
//!
//! Control messages ride the data path as zero-size packets whose IP
//! protocol byte names the opcode. The payloads they carry are plain data:
//! declarative rule specifications going down, counter snapshots coming
//! back. The matcher turns specifications into runtime rules; nothing here
//! owns statistics or sampling state.

use crate::error::SpecError;
use crate::key::MatchRuleKey;
use crate::types::{DevicePortNumber, IpProto, PacketTag};

/// Opcodes carried in the IP protocol byte of zero-size packets. Kept above
/// the assigned protocol range.
pub mod opcode {
    use crate::types::IpProto;

    pub const ADD_OR_UPDATE: IpProto = IpProto::new(253);
    pub const ACK: IpProto = IpProto::new(252);
    pub const STATS_REQUEST: IpProto = IpProto::new(251);
    pub const STATS_REPLY: IpProto = IpProto::new(250);
}

/// Declarative description of one weighted output action.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct ActionSpec {
    /// Port the packet leaves through.
    pub output_port: DevicePortNumber,
    /// Tag to rewrite onto matching packets, if any.
    pub tag: Option<PacketTag>,
    /// Relative share of traffic. Must be at least 1.
    pub weight: u32,
    /// Mark matching packets for preferential drop.
    pub preferential_drop: bool,
    /// When set to `n`, sample one in `n` matching packets into a
    /// distinct-flow counter.
    pub flow_counter_n: Option<u64>,
}

impl ActionSpec {
    pub fn new(output_port: DevicePortNumber, tag: Option<PacketTag>, weight: u32) -> Self {
        Self {
            output_port,
            tag,
            weight,
            preferential_drop: false,
            flow_counter_n: None,
        }
    }

    pub fn validate(&self) -> Result<(), SpecError> {
        if self.weight == 0 {
            return Err(SpecError::ZeroWeight {
                output_port: self.output_port,
            });
        }
        Ok(())
    }
}

/// Declarative description of a rule: a key and its weighted actions.
///
/// An empty action list means "delete the rule with this key".
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct RuleSpec {
    pub key: MatchRuleKey,
    pub actions: Vec<ActionSpec>,
}

impl RuleSpec {
    pub fn new(key: MatchRuleKey, actions: Vec<ActionSpec>) -> Self {
        Self { key, actions }
    }

    /// A deletion marker for the given key.
    pub fn delete(key: MatchRuleKey) -> Self {
        Self {
            key,
            actions: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_delete(&self) -> bool {
        self.actions.is_empty()
    }

    /// Checks action weights and rejects duplicate (output port, tag)
    /// pairs.
    pub fn validate(&self) -> Result<(), SpecError> {
        for (i, action) in self.actions.iter().enumerate() {
            action.validate()?;
            for earlier in &self.actions[..i] {
                if earlier.output_port == action.output_port && earlier.tag == action.tag {
                    return Err(SpecError::DuplicateAction {
                        output_port: action.output_port,
                        tag: action.tag,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Snapshot of one action's counters, as carried in a stats reply.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct ActionStats {
    pub output_port: DevicePortNumber,
    pub tag: Option<PacketTag>,
    pub total_pkts_matched: u64,
    pub total_bytes_matched: u64,
    /// Estimated distinct flows, present only when flow counts were
    /// requested and the action samples flows.
    pub flow_count: Option<u64>,
}

impl ActionStats {
    pub fn new(output_port: DevicePortNumber, tag: Option<PacketTag>) -> Self {
        Self {
            output_port,
            tag,
            total_pkts_matched: 0,
            total_bytes_matched: 0,
            flow_count: None,
        }
    }
}

/// The body of a stats reply: per-rule action snapshots in the remote
/// matcher's key order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[must_use]
pub struct StatsReplyBody {
    entries: Vec<(MatchRuleKey, Vec<ActionStats>)>,
}

impl StatsReplyBody {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_stats(&mut self, key: MatchRuleKey, stats: Vec<ActionStats>) {
        self.entries.push((key, stats));
    }

    #[must_use]
    pub fn entries(&self) -> &[(MatchRuleKey, Vec<ActionStats>)] {
        &self.entries
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// True when the protocol byte names a control opcode.
#[must_use]
pub fn is_control_proto(proto: IpProto) -> bool {
    matches!(
        proto,
        p if p == opcode::ADD_OR_UPDATE
            || p == opcode::ACK
            || p == opcode::STATS_REQUEST
            || p == opcode::STATS_REPLY
    )
}
