//! Shared test doubles and packet helpers.
//!
//! Used by this crate's unit and integration tests; available to
//! downstream crates that need a terminal handler or a quick packet.

use std::cell::RefCell;
use std::rc::Rc;

use flowsim_core::{
    AccessLayerPort, FiveTuple, IpAddress, IpProto, Packet, PacketHandler, PacketObserver,
};

/// A terminal handler that records everything delivered to it.
#[derive(Debug, Default)]
pub struct CollectingHandler {
    pub packets: Vec<Packet>,
}

impl PacketHandler for CollectingHandler {
    fn handle_packet(&mut self, pkt: Packet) {
        self.packets.push(pkt);
    }
}

/// A fresh shared [`CollectingHandler`].
pub fn new_collector() -> Rc<RefCell<CollectingHandler>> {
    Rc::new(RefCell::new(CollectingHandler::default()))
}

/// An observer that counts notifications.
#[derive(Debug, Default)]
pub struct CountingObserver {
    pub seen: u64,
}

impl PacketObserver for CountingObserver {
    fn observe_packet(&mut self, _pkt: &Packet) {
        self.seen += 1;
    }
}

/// A fresh shared [`CountingObserver`].
pub fn new_counting_observer() -> Rc<RefCell<CountingObserver>> {
    Rc::new(RefCell::new(CountingObserver::default()))
}

/// A TCP data packet between two numeric addresses.
pub fn make_data_packet(src: u32, dst: u32, size: u32) -> Packet {
    Packet::new_data(
        FiveTuple::new(
            IpAddress::new(src),
            IpAddress::new(dst),
            IpProto::TCP,
            AccessLayerPort::new(1000),
            AccessLayerPort::new(80),
        ),
        size,
    )
}
