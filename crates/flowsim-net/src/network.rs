//! The device registry, link builder, and retransmit scan timer.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};
use std::time::Duration;

use tracing::info;

use flowsim_core::{DevicePortNumber, EventQueueTime, FiveTuple, HandlerRef, SimClock};

use crate::device::Device;
use crate::link::LinkElement;

/// One scan clock shared by every TCP source in the network.
///
/// Sources are registered as (device, tuple) pairs; the scan asks each
/// device to run its source's retransmit check. Devices are held weakly:
/// the network does not own them.
#[must_use]
pub struct RetxTimer {
    scan_period: Duration,
    last_scan: Option<EventQueueTime>,
    sources: Vec<(Weak<RefCell<Device>>, FiveTuple)>,
}

impl RetxTimer {
    pub fn new(scan_period: Duration) -> Self {
        Self {
            scan_period,
            last_scan: None,
            sources: Vec::new(),
        }
    }

    #[must_use]
    pub fn scan_period(&self) -> Duration {
        self.scan_period
    }

    #[must_use]
    pub fn num_registered(&self) -> usize {
        self.sources.len()
    }

    pub fn register(&mut self, device: Weak<RefCell<Device>>, tuple: FiveTuple) {
        self.sources.push((device, tuple));
    }

    /// Whether a scan is owed at `now`.
    #[must_use]
    pub fn due(&self, now: EventQueueTime) -> bool {
        match self.last_scan {
            None => true,
            Some(last) => now.saturating_since(last) >= self.scan_period,
        }
    }

    /// Runs the retransmit check of every registered source. Dropped
    /// devices are forgotten.
    pub fn scan(&mut self, now: EventQueueTime) {
        self.sources.retain(|(device, _)| device.strong_count() > 0);
        for (device, tuple) in &self.sources {
            if let Some(device) = device.upgrade() {
                device.borrow_mut().retransmit_scan(tuple, now);
            }
        }
        self.last_scan = Some(now);
    }
}

impl std::fmt::Debug for RetxTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetxTimer")
            .field("scan_period", &self.scan_period)
            .field("sources", &self.sources.len())
            .finish()
    }
}

/// The network: a registry of devices and the shared retransmit timer.
///
/// Links are ephemeral from the network's point of view: once built, the
/// port-queue-pipe-port chain lives inside the linked components.
#[must_use]
pub struct Network {
    devices: BTreeMap<String, Rc<RefCell<Device>>>,
    retx_timer: Rc<RefCell<RetxTimer>>,
    clock: SimClock,
}

impl Network {
    pub fn new(tcp_retx_scan_period: Duration, clock: SimClock) -> Self {
        Self {
            devices: BTreeMap::new(),
            retx_timer: Rc::new(RefCell::new(RetxTimer::new(tcp_retx_scan_period))),
            clock,
        }
    }

    #[must_use]
    pub fn clock(&self) -> &SimClock {
        &self.clock
    }

    /// Registers a device and hands it the shared retransmit timer.
    pub fn add_device(&mut self, device: Rc<RefCell<Device>>) {
        let id = device.borrow().id().to_string();
        device.borrow_mut().set_retx_timer(self.retx_timer.clone());
        self.devices.insert(id, device);
    }

    #[must_use]
    pub fn device(&self, id: &str) -> Option<Rc<RefCell<Device>>> {
        self.devices.get(id).cloned()
    }

    #[must_use]
    pub fn num_devices(&self) -> usize {
        self.devices.len()
    }

    pub fn devices(&self) -> impl Iterator<Item = (&String, &Rc<RefCell<Device>>)> {
        self.devices.iter()
    }

    /// Builds a unidirectional link: the source port feeds the queue, the
    /// queue feeds the pipe, the pipe feeds the destination port. Both
    /// ports are created on demand and marked per `internal`.
    ///
    /// # Panics
    ///
    /// Panics when the endpoints name the same device, or an unknown one.
    pub fn add_link<Q, P>(
        &mut self,
        queue: Rc<RefCell<Q>>,
        pipe: Rc<RefCell<P>>,
        src_id: &str,
        dst_id: &str,
        src_port_num: DevicePortNumber,
        dst_port_num: DevicePortNumber,
        internal: bool,
    ) where
        Q: LinkElement + 'static,
        P: LinkElement + 'static,
    {
        assert!(src_id != dst_id, "link source same as destination");
        let src = self
            .devices
            .get(src_id)
            .unwrap_or_else(|| panic!("no device {src_id}"))
            .clone();
        let dst = self
            .devices
            .get(dst_id)
            .unwrap_or_else(|| panic!("no device {dst_id}"))
            .clone();

        let src_port = src.borrow_mut().find_or_create_port(src_port_num);
        src_port.borrow_mut().set_internal(internal);

        let dst_port = dst.borrow_mut().find_or_create_port(dst_port_num);
        dst_port.borrow_mut().set_internal(internal);

        src_port.borrow_mut().connect(queue.clone() as HandlerRef);
        queue.borrow_mut().connect(pipe.clone() as HandlerRef);
        pipe.borrow_mut().connect(dst_port.clone() as HandlerRef);

        info!(
            src = %src_id, src_port = %src_port_num,
            dst = %dst_id, dst_port = %dst_port_num,
            internal, "added link"
        );
    }

    #[must_use]
    pub fn retx_timer(&self) -> Rc<RefCell<RetxTimer>> {
        self.retx_timer.clone()
    }

    /// Runs the retransmit scan when its period has elapsed.
    pub fn scan_retransmits_if_due(&self, now: EventQueueTime) {
        let due = self.retx_timer.borrow().due(now);
        if due {
            self.retx_timer.borrow_mut().scan(now);
        }
    }

    /// Drives every device's endpoints once.
    pub fn tick_all(&self, now: EventQueueTime) {
        for device in self.devices.values() {
            device.borrow_mut().tick(now);
        }
    }
}

impl std::fmt::Debug for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Network")
            .field("devices", &self.devices.len())
            .field("retx_timer", &self.retx_timer.borrow())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::{PassThroughPipe, PassThroughQueue};
    use flowsim_core::IpAddress;

    fn make_network() -> Network {
        Network::new(Duration::from_millis(10), SimClock::new())
    }

    fn add_device(net: &mut Network, id: &str, ip: u32) -> Rc<RefCell<Device>> {
        let device = Device::new(id, IpAddress::new(ip), net.clock().clone());
        net.add_device(device.clone());
        device
    }

    #[test]
    fn test_add_link_creates_and_marks_ports() {
        let mut net = make_network();
        let a = add_device(&mut net, "a", 1);
        let b = add_device(&mut net, "b", 2);

        net.add_link(
            Rc::new(RefCell::new(PassThroughQueue::new("q"))),
            Rc::new(RefCell::new(PassThroughPipe::new("p"))),
            "a",
            "b",
            DevicePortNumber::new(1),
            DevicePortNumber::new(2),
            true,
        );

        let a_port = a.borrow_mut().find_or_create_port(DevicePortNumber::new(1));
        assert!(a_port.borrow().internal());
        assert!(a_port.borrow().is_connected());

        let b_port = b.borrow_mut().find_or_create_port(DevicePortNumber::new(2));
        assert!(b_port.borrow().internal());
        // The receive side has no outgoing handler from this link.
        assert!(!b_port.borrow().is_connected());
    }

    #[test]
    #[should_panic(expected = "source same as destination")]
    fn test_self_link_panics() {
        let mut net = make_network();
        add_device(&mut net, "a", 1);
        net.add_link(
            Rc::new(RefCell::new(PassThroughQueue::new("q"))),
            Rc::new(RefCell::new(PassThroughPipe::new("p"))),
            "a",
            "a",
            DevicePortNumber::new(1),
            DevicePortNumber::new(2),
            false,
        );
    }

    #[test]
    #[should_panic(expected = "no device")]
    fn test_unknown_device_panics() {
        let mut net = make_network();
        add_device(&mut net, "a", 1);
        net.add_link(
            Rc::new(RefCell::new(PassThroughQueue::new("q"))),
            Rc::new(RefCell::new(PassThroughPipe::new("p"))),
            "a",
            "missing",
            DevicePortNumber::new(1),
            DevicePortNumber::new(2),
            false,
        );
    }

    #[test]
    fn test_retx_timer_due_tracking() {
        let mut timer = RetxTimer::new(Duration::from_millis(10));
        assert!(timer.due(EventQueueTime::ZERO));

        timer.scan(EventQueueTime::ZERO);
        assert!(!timer.due(EventQueueTime::from_nanos(9_999_999)));
        assert!(timer.due(EventQueueTime::from_nanos(10_000_000)));
    }

    #[test]
    fn test_scan_forgets_dropped_devices() {
        let clock = SimClock::new();
        let device = Device::new("orphan", IpAddress::new(9), clock);
        let mut timer = RetxTimer::new(Duration::from_millis(10));
        timer.register(Rc::downgrade(&device), flowsim_core::FiveTuple::WILDCARD);
        assert_eq!(timer.num_registered(), 1);

        drop(device);
        timer.scan(EventQueueTime::ZERO);
        assert_eq!(timer.num_registered(), 0);
    }
}
