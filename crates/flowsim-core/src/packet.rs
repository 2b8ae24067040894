//! The packet model and the handler graph edge types.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::sscp::{opcode, RuleSpec, StatsReplyBody};
use crate::tuple::FiveTuple;
use crate::types::{AccessLayerPort, IpAddress, IpProto, PacketTag};

/// Hop budget packets start with.
pub const DEFAULT_TTL: u8 = 100;

/// Size of the zero-payload control messages, by wire convention.
const CONTROL_SIZE: u32 = 0;

/// What a packet carries beyond its headers.
///
/// Control messages are tagged explicitly rather than smuggled behind a
/// size check, but they keep the wire convention: zero size, opcode in the
/// protocol byte, so traces interoperate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketPayload {
    /// Ordinary data traffic. The payload itself is opaque; only the size
    /// matters to the forwarding plane.
    Data,
    /// Install, replace, or (when the spec has no actions) delete a rule.
    AddOrUpdate {
        rule: RuleSpec,
        tx_id: Option<u64>,
    },
    /// Acknowledges an add-or-update that carried a transaction id.
    Ack { tx_id: u64 },
    /// Asks the receiving device for a snapshot of its matcher counters.
    StatsRequest { include_flow_counts: bool },
    /// The snapshot, in the remote matcher's key order.
    StatsReply { stats: StatsReplyBody },
}

/// A packet in flight. Ownership is unique and transferred on every hop.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct Packet {
    five_tuple: FiveTuple,
    size_bytes: u32,
    ttl: u8,
    tag: PacketTag,
    preferential_drop: bool,
    payload: PacketPayload,
}

impl Packet {
    /// A data packet of the given size.
    pub fn new_data(five_tuple: FiveTuple, size_bytes: u32) -> Self {
        Self {
            five_tuple,
            size_bytes,
            ttl: DEFAULT_TTL,
            tag: PacketTag::DEFAULT,
            preferential_drop: false,
            payload: PacketPayload::Data,
        }
    }

    fn new_control(
        ip_src: IpAddress,
        ip_dst: IpAddress,
        op: IpProto,
        payload: PacketPayload,
    ) -> Self {
        let five_tuple = FiveTuple::new(
            ip_src,
            ip_dst,
            op,
            AccessLayerPort::new(0),
            AccessLayerPort::new(0),
        );
        Self {
            five_tuple,
            size_bytes: CONTROL_SIZE,
            ttl: DEFAULT_TTL,
            tag: PacketTag::DEFAULT,
            preferential_drop: false,
            payload,
        }
    }

    /// An add-or-update control message.
    pub fn new_add_or_update(
        ip_src: IpAddress,
        ip_dst: IpAddress,
        rule: RuleSpec,
        tx_id: Option<u64>,
    ) -> Self {
        Self::new_control(
            ip_src,
            ip_dst,
            opcode::ADD_OR_UPDATE,
            PacketPayload::AddOrUpdate { rule, tx_id },
        )
    }

    /// An acknowledgement control message.
    pub fn new_ack(ip_src: IpAddress, ip_dst: IpAddress, tx_id: u64) -> Self {
        Self::new_control(ip_src, ip_dst, opcode::ACK, PacketPayload::Ack { tx_id })
    }

    /// A stats-request control message.
    pub fn new_stats_request(
        ip_src: IpAddress,
        ip_dst: IpAddress,
        include_flow_counts: bool,
    ) -> Self {
        Self::new_control(
            ip_src,
            ip_dst,
            opcode::STATS_REQUEST,
            PacketPayload::StatsRequest {
                include_flow_counts,
            },
        )
    }

    /// A stats-reply control message.
    pub fn new_stats_reply(ip_src: IpAddress, ip_dst: IpAddress, stats: StatsReplyBody) -> Self {
        Self::new_control(
            ip_src,
            ip_dst,
            opcode::STATS_REPLY,
            PacketPayload::StatsReply { stats },
        )
    }

    #[must_use]
    pub fn five_tuple(&self) -> &FiveTuple {
        &self.five_tuple
    }

    #[must_use]
    pub fn size_bytes(&self) -> u32 {
        self.size_bytes
    }

    #[must_use]
    pub fn ttl(&self) -> u8 {
        self.ttl
    }

    #[must_use]
    pub fn tag(&self) -> PacketTag {
        self.tag
    }

    pub fn set_tag(&mut self, tag: PacketTag) {
        self.tag = tag;
    }

    #[must_use]
    pub fn preferential_drop(&self) -> bool {
        self.preferential_drop
    }

    pub fn set_preferential_drop(&mut self, value: bool) {
        self.preferential_drop = value;
    }

    #[must_use]
    pub fn payload(&self) -> &PacketPayload {
        &self.payload
    }

    /// Consumes the packet, yielding its payload.
    #[must_use]
    pub fn into_payload(self) -> PacketPayload {
        self.payload
    }

    /// Control messages are zero-size by wire convention.
    #[must_use]
    pub fn is_control(&self) -> bool {
        self.size_bytes == CONTROL_SIZE
    }

    /// Spends one hop. Returns `false` when the budget is exhausted; the
    /// caller treats that as fatal during forwarding.
    pub fn decrement_ttl(&mut self) -> bool {
        if self.ttl == 0 {
            return false;
        }
        self.ttl -= 1;
        self.ttl > 0
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pkt {} size {} ttl {} tag {}",
            self.five_tuple, self.size_bytes, self.ttl, self.tag
        )
    }
}

/// Anything that accepts packets: ports, queues, pipes, devices, sinks.
pub trait PacketHandler {
    fn handle_packet(&mut self, pkt: Packet);
}

/// A shared handle to a packet handler: the edge type of the
/// single-threaded handler graph.
pub type HandlerRef = Rc<RefCell<dyn PacketHandler>>;

/// Observes packets crossing a trust boundary without taking ownership.
pub trait PacketObserver {
    fn observe_packet(&mut self, pkt: &Packet);
}
