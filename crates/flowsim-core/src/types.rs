//! Newtype wrappers for packet and device header fields.
//!
//! These types prevent accidental mixing of fields that share an underlying
//! integer representation (a device port is not an access-layer port is not
//! a tag). Every field reserves its maximum representable value as the
//! wildcard sentinel meaning "match any".

use std::fmt;
use std::net::Ipv4Addr;

/// An IPv4 address stored as a host-order integer.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[must_use]
pub struct IpAddress(u32);

impl IpAddress {
    /// Wildcard sentinel: matches any address.
    pub const WILDCARD: IpAddress = IpAddress(u32::MAX);

    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn is_wildcard(self) -> bool {
        self.0 == u32::MAX
    }
}

impl From<Ipv4Addr> for IpAddress {
    fn from(addr: Ipv4Addr) -> Self {
        Self(u32::from(addr))
    }
}

impl From<IpAddress> for Ipv4Addr {
    fn from(addr: IpAddress) -> Self {
        Ipv4Addr::from(addr.0)
    }
}

impl fmt::Display for IpAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_wildcard() {
            write!(f, "*")
        } else {
            write!(f, "{}", Ipv4Addr::from(self.0))
        }
    }
}

impl fmt::Debug for IpAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IpAddress({self})")
    }
}

/// A port on a device. Not to be confused with [`AccessLayerPort`], which is
/// a transport-layer (TCP/UDP) port.
///
/// The maximum port number doubles as the loopback port identifier: the
/// distinguished port through which locally-produced packets leave a device.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[must_use]
pub struct DevicePortNumber(u32);

impl DevicePortNumber {
    /// Wildcard sentinel: matches any device port.
    pub const WILDCARD: DevicePortNumber = DevicePortNumber(u32::MAX);

    /// The loopback port number. Same value as the wildcard sentinel.
    pub const LOOPBACK: DevicePortNumber = DevicePortNumber(u32::MAX);

    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn is_wildcard(self) -> bool {
        self.0 == u32::MAX
    }
}

impl fmt::Display for DevicePortNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_wildcard() {
            write!(f, "*")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl fmt::Debug for DevicePortNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DevicePortNumber({self})")
    }
}

/// A transport-layer (TCP/UDP) port number.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[must_use]
pub struct AccessLayerPort(u16);

impl AccessLayerPort {
    /// Wildcard sentinel: matches any transport port.
    pub const WILDCARD: AccessLayerPort = AccessLayerPort(u16::MAX);

    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn raw(self) -> u16 {
        self.0
    }

    #[must_use]
    pub const fn is_wildcard(self) -> bool {
        self.0 == u16::MAX
    }
}

impl fmt::Display for AccessLayerPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_wildcard() {
            write!(f, "*")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl fmt::Debug for AccessLayerPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccessLayerPort({self})")
    }
}

/// An IP protocol number. Control-plane messages repurpose this byte as an
/// opcode (see [`crate::sscp`]).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[must_use]
pub struct IpProto(u8);

impl IpProto {
    /// Wildcard sentinel: matches any protocol.
    pub const WILDCARD: IpProto = IpProto(u8::MAX);

    pub const TCP: IpProto = IpProto(6);
    pub const UDP: IpProto = IpProto(17);

    pub const fn new(raw: u8) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn raw(self) -> u8 {
        self.0
    }

    #[must_use]
    pub const fn is_wildcard(self) -> bool {
        self.0 == u8::MAX
    }
}

impl fmt::Display for IpProto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            IpProto::WILDCARD => write!(f, "*"),
            IpProto::TCP => write!(f, "tcp"),
            IpProto::UDP => write!(f, "udp"),
            IpProto(other) => write!(f, "{other}"),
        }
    }
}

impl fmt::Debug for IpProto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IpProto({self})")
    }
}

/// A small integer mark carried by packets, rewritable by match actions and
/// matched by rules.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[must_use]
pub struct PacketTag(u32);

impl PacketTag {
    /// Wildcard sentinel: matches any tag.
    pub const WILDCARD: PacketTag = PacketTag(u32::MAX);

    /// The tag packets carry until an action rewrites it.
    pub const DEFAULT: PacketTag = PacketTag(0);

    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn is_wildcard(self) -> bool {
        self.0 == u32::MAX
    }
}

impl fmt::Display for PacketTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_wildcard() {
            write!(f, "*")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl fmt::Debug for PacketTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PacketTag({self})")
    }
}
