//! Core types and data model for the flowsim forwarding plane.
//!
//! This crate defines the field newtypes and their wildcard sentinels, the
//! five-tuple flow identifier, the packet model with its explicitly tagged
//! control payloads, the declarative rule/stats model carried by control
//! messages, and the shared simulation clock.

pub mod error;
pub mod key;
pub mod packet;
pub mod sscp;
pub mod time;
pub mod tuple;
pub mod types;

pub use error::SpecError;
pub use key::MatchRuleKey;
pub use packet::{HandlerRef, Packet, PacketHandler, PacketObserver, PacketPayload, DEFAULT_TTL};
pub use sscp::{ActionSpec, ActionStats, RuleSpec, StatsReplyBody};
pub use time::{EventQueueTime, SimClock};
pub use tuple::FiveTuple;
pub use types::{AccessLayerPort, DevicePortNumber, IpAddress, IpProto, PacketTag};
