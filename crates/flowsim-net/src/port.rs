//! A named attach point on a device.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use flowsim_core::{DevicePortNumber, HandlerRef, Packet, PacketHandler};

use crate::device::Device;

/// One port of a device: packets arriving here are processed by the parent
/// device; packets leaving go to the single outgoing handler bound by
/// [`Port::connect`].
///
/// The `internal` flag classifies the port for observer routing across
/// administrative boundaries.
#[must_use]
pub struct Port {
    number: DevicePortNumber,
    internal: bool,
    device: Weak<RefCell<Device>>,
    out_handler: Option<HandlerRef>,
}

impl Port {
    pub(crate) fn new(number: DevicePortNumber, device: Weak<RefCell<Device>>) -> Self {
        Self {
            number,
            internal: false,
            device,
            out_handler: None,
        }
    }

    #[must_use]
    pub fn number(&self) -> DevicePortNumber {
        self.number
    }

    #[must_use]
    pub fn internal(&self) -> bool {
        self.internal
    }

    pub fn set_internal(&mut self, internal: bool) {
        self.internal = internal;
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.out_handler.is_some()
    }

    /// Binds the outgoing handler. Connecting the same handler again is a
    /// no-op.
    ///
    /// # Panics
    ///
    /// Panics when a different handler is already bound; use
    /// [`Port::reconnect`] to replace one deliberately.
    pub fn connect(&mut self, out_handler: HandlerRef) {
        if let Some(existing) = &self.out_handler {
            if Rc::ptr_eq(existing, &out_handler) {
                return;
            }
            panic!("tried to connect port {} twice", self.number);
        }
        self.out_handler = Some(out_handler);
    }

    /// Replaces the outgoing handler.
    ///
    /// # Panics
    ///
    /// Panics when the port was never connected.
    pub fn reconnect(&mut self, out_handler: HandlerRef) {
        assert!(
            self.out_handler.is_some(),
            "tried to reconnect an unconnected port"
        );
        self.out_handler = Some(out_handler);
    }

    /// Hands a packet to the outgoing handler.
    ///
    /// # Panics
    ///
    /// Panics when the port is not connected.
    pub fn send_packet_out(&mut self, pkt: Packet) {
        let handler = self
            .out_handler
            .as_ref()
            .unwrap_or_else(|| panic!("send on unconnected port {}", self.number))
            .clone();
        handler.borrow_mut().handle_packet(pkt);
    }
}

impl PacketHandler for Port {
    /// An arriving packet is processed by the parent device.
    fn handle_packet(&mut self, pkt: Packet) {
        let device = self
            .device
            .upgrade()
            .expect("port outlived its parent device");
        let number = self.number;
        device.borrow_mut().handle_packet_from_port(number, pkt);
    }
}

impl std::fmt::Debug for Port {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Port")
            .field("number", &self.number)
            .field("internal", &self.internal)
            .field("connected", &self.out_handler.is_some())
            .finish()
    }
}
