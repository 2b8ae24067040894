//! The canonical flow identifier.

use std::fmt;

use crate::types::{AccessLayerPort, IpAddress, IpProto};

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// An immutable (source IP, destination IP, protocol, source port,
/// destination port) record identifying a flow.
///
/// Any field may hold its wildcard sentinel when the tuple is used inside a
/// match-rule key.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[must_use]
pub struct FiveTuple {
    ip_src: IpAddress,
    ip_dst: IpAddress,
    ip_proto: IpProto,
    src_port: AccessLayerPort,
    dst_port: AccessLayerPort,
}

impl FiveTuple {
    /// The fully wildcarded tuple: matches any flow.
    pub const WILDCARD: FiveTuple = FiveTuple {
        ip_src: IpAddress::WILDCARD,
        ip_dst: IpAddress::WILDCARD,
        ip_proto: IpProto::WILDCARD,
        src_port: AccessLayerPort::WILDCARD,
        dst_port: AccessLayerPort::WILDCARD,
    };

    pub const fn new(
        ip_src: IpAddress,
        ip_dst: IpAddress,
        ip_proto: IpProto,
        src_port: AccessLayerPort,
        dst_port: AccessLayerPort,
    ) -> Self {
        Self {
            ip_src,
            ip_dst,
            ip_proto,
            src_port,
            dst_port,
        }
    }

    #[must_use]
    pub const fn ip_src(&self) -> IpAddress {
        self.ip_src
    }

    #[must_use]
    pub const fn ip_dst(&self) -> IpAddress {
        self.ip_dst
    }

    #[must_use]
    pub const fn ip_proto(&self) -> IpProto {
        self.ip_proto
    }

    #[must_use]
    pub const fn src_port(&self) -> AccessLayerPort {
        self.src_port
    }

    #[must_use]
    pub const fn dst_port(&self) -> AccessLayerPort {
        self.dst_port
    }

    /// The same flow seen from the opposite direction: source and
    /// destination fields swapped, protocol unchanged.
    pub const fn reverse(&self) -> FiveTuple {
        FiveTuple {
            ip_src: self.ip_dst,
            ip_dst: self.ip_src,
            ip_proto: self.ip_proto,
            src_port: self.dst_port,
            dst_port: self.src_port,
        }
    }

    /// A stable hash of the tuple (FNV-1a over the fields in declaration
    /// order).
    ///
    /// Weighted action selection reduces this value modulo the rule's total
    /// weight, so it must be identical across runs, platforms, and compiler
    /// versions for simulations to be reproducible.
    #[must_use]
    pub fn flow_hash(&self) -> u64 {
        let mut h = FNV_OFFSET;
        for byte in self
            .ip_src
            .raw()
            .to_le_bytes()
            .into_iter()
            .chain(self.ip_dst.raw().to_le_bytes())
            .chain([self.ip_proto.raw()])
            .chain(self.src_port.raw().to_le_bytes())
            .chain(self.dst_port.raw().to_le_bytes())
        {
            h ^= u64::from(byte);
            h = h.wrapping_mul(FNV_PRIME);
        }
        h
    }
}

impl fmt::Display for FiveTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}:{} -> {}:{}, {})",
            self.ip_src, self.src_port, self.ip_dst, self.dst_port, self.ip_proto
        )
    }
}

impl fmt::Debug for FiveTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FiveTuple{self}")
    }
}
