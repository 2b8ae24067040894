//! Device, port, and network substrate.
//!
//! Packets flow from a pipe into a [`Port`], whose [`Device`] either
//! consumes them locally (control messages and terminating flows) or
//! classifies them through its matcher and hands them to an output port's
//! outgoing handler. A [`Network`] registers devices, builds links, and
//! owns the shared retransmit scan timer.

pub mod connection;
pub mod device;
pub mod link;
pub mod network;
pub mod port;
pub mod testing;

pub use connection::{
    Connection, TcpSink, TcpSource, TcpSourceConfig, UdpSink, UdpSource, ACK_SIZE_BYTES,
};
pub use device::{Device, DeviceStats};
pub use link::{HoldQueue, LinkElement, PassThroughPipe, PassThroughQueue};
pub use network::{Network, RetxTimer};
pub use port::Port;
