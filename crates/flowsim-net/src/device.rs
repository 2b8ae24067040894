//! A software-defined device: packet ingress, localhost demux, and
//! endpoint creation.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::{Rc, Weak};

use tracing::{debug, info, trace};

use flowsim_core::sscp::StatsReplyBody;
use flowsim_core::{
    AccessLayerPort, DevicePortNumber, EventQueueTime, FiveTuple, HandlerRef, IpAddress, IpProto,
    Packet, PacketHandler, PacketObserver, PacketPayload, SimClock,
};
use flowsim_match::{ForwardingDecision, Matcher};

use crate::connection::{
    generator_id, sink_id, Connection, TcpSink, TcpSource, TcpSourceConfig, UdpSink, UdpSource,
};
use crate::network::RetxTimer;
use crate::port::Port;

type ObserverRef = Rc<RefCell<dyn PacketObserver>>;

/// Per-device packet counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStats {
    pub packets_seen: u64,
    pub bytes_seen: u64,
    pub packets_for_localhost: u64,
    pub bytes_for_localhost: u64,
    pub packets_failed_to_match: u64,
    pub bytes_failed_to_match: u64,
    pub route_updates_seen: u64,
}

/// A device owns its ports, its matcher, and its flow endpoints.
///
/// Created behind `Rc<RefCell<_>>` so ports can point back at their
/// parent; the network and link chains share the same handle.
#[must_use]
pub struct Device {
    id: String,
    ip_address: IpAddress,
    clock: SimClock,
    ports: BTreeMap<DevicePortNumber, Rc<RefCell<Port>>>,
    matcher: Matcher,
    connections: HashMap<FiveTuple, Box<dyn Connection>>,
    stats: DeviceStats,
    die_on_fail_to_match: bool,
    replies_handler: Option<HandlerRef>,
    internal_external_observer: Option<ObserverRef>,
    external_internal_observer: Option<ObserverRef>,
    retx_timer: Option<Rc<RefCell<RetxTimer>>>,
    self_handle: Weak<RefCell<Device>>,
}

impl Device {
    pub fn new(
        id: impl Into<String>,
        ip_address: IpAddress,
        clock: SimClock,
    ) -> Rc<RefCell<Device>> {
        let id = id.into();
        Rc::new_cyclic(|self_handle| {
            RefCell::new(Device {
                matcher: Matcher::new(format!("matcher_for_{id}")),
                id,
                ip_address,
                clock,
                ports: BTreeMap::new(),
                connections: HashMap::new(),
                stats: DeviceStats::default(),
                die_on_fail_to_match: false,
                replies_handler: None,
                internal_external_observer: None,
                external_internal_observer: None,
                retx_timer: None,
                self_handle: self_handle.clone(),
            })
        })
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn ip_address(&self) -> IpAddress {
        self.ip_address
    }

    #[must_use]
    pub fn stats(&self) -> &DeviceStats {
        &self.stats
    }

    #[must_use]
    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    pub fn matcher_mut(&mut self) -> &mut Matcher {
        &mut self.matcher
    }

    pub fn set_die_on_fail_to_match(&mut self, die: bool) {
        self.die_on_fail_to_match = die;
    }

    /// Binds the handler control-plane replies (ACKs, stats replies) are
    /// sent to.
    pub fn set_replies_handler(&mut self, handler: HandlerRef) {
        self.replies_handler = Some(handler);
    }

    /// Registers the observer for packets crossing from an internal input
    /// port to an external output port. Setting the same observer again is
    /// tolerated.
    ///
    /// # Panics
    ///
    /// Panics when a different observer is already registered.
    pub fn add_internal_external_observer(&mut self, observer: ObserverRef) {
        if let Some(existing) = &self.internal_external_observer {
            assert!(
                Rc::ptr_eq(existing, &observer),
                "internal-external observer already set at {}",
                self.id
            );
        }
        self.internal_external_observer = Some(observer);
    }

    /// The symmetric registration for external-to-internal crossings.
    ///
    /// # Panics
    ///
    /// Panics when a different observer is already registered.
    pub fn add_external_internal_observer(&mut self, observer: ObserverRef) {
        if let Some(existing) = &self.external_internal_observer {
            assert!(
                Rc::ptr_eq(existing, &observer),
                "external-internal observer already set at {}",
                self.id
            );
        }
        self.external_internal_observer = Some(observer);
    }

    pub(crate) fn set_retx_timer(&mut self, timer: Rc<RefCell<RetxTimer>>) {
        self.retx_timer = Some(timer);
    }

    /// Resolves a port, instantiating it on first use.
    pub fn find_or_create_port(&mut self, number: DevicePortNumber) -> Rc<RefCell<Port>> {
        if let Some(port) = self.ports.get(&number) {
            return port.clone();
        }
        let port = Rc::new(RefCell::new(Port::new(number, self.self_handle.clone())));
        self.ports.insert(number, port.clone());
        port
    }

    /// The lowest-numbered port not yet in use.
    ///
    /// # Panics
    ///
    /// Panics when all port numbers are taken.
    pub fn next_available_port(&mut self) -> Rc<RefCell<Port>> {
        for raw in 1..DevicePortNumber::LOOPBACK.raw() {
            let number = DevicePortNumber::new(raw);
            if !self.ports.contains_key(&number) {
                return self.find_or_create_port(number);
            }
        }
        panic!("out of port numbers at {}", self.id);
    }

    /// The distinguished port locally-produced packets leave through.
    pub fn loopback_port(&mut self) -> Rc<RefCell<Port>> {
        self.find_or_create_port(DevicePortNumber::LOOPBACK)
    }

    #[must_use]
    pub fn num_ports(&self) -> usize {
        self.ports.len()
    }

    /// Ingress from a port: count, demux to localhost, or classify and
    /// forward.
    ///
    /// # Panics
    ///
    /// Panics on a match miss when `die_on_fail_to_match` is set, on TTL
    /// expiry, and on an action naming an unknown output port.
    pub fn handle_packet_from_port(&mut self, input_port: DevicePortNumber, pkt: Packet) {
        let pkt_size = u64::from(pkt.size_bytes());
        self.stats.packets_seen += 1;
        self.stats.bytes_seen += pkt_size;

        if pkt.five_tuple().ip_dst() == self.ip_address {
            self.stats.packets_for_localhost += 1;
            self.stats.bytes_for_localhost += pkt_size;
            self.handle_packet(pkt);
            return;
        }

        let Some(decision) = self.matcher.match_or_null(&pkt, input_port) else {
            self.stats.packets_failed_to_match += 1;
            self.stats.bytes_failed_to_match += pkt_size;
            if self.die_on_fail_to_match {
                panic!("dropping packet {pkt} at {}", self.id);
            }
            trace!(device = %self.id, %pkt, "match miss, packet dropped");
            return;
        };

        let input_internal = self
            .ports
            .get(&input_port)
            .is_some_and(|p| p.borrow().internal());
        self.handle_packet_with_decision(input_internal, pkt, decision);
    }

    fn handle_packet_with_decision(
        &mut self,
        input_internal: bool,
        mut pkt: Packet,
        decision: ForwardingDecision,
    ) {
        if let Some(tag) = decision.rewrite_tag {
            pkt.set_tag(tag);
        }
        if decision.preferential_drop && !pkt.preferential_drop() {
            pkt.set_preferential_drop(true);
        }
        if !pkt.decrement_ttl() {
            panic!("TTL exceeded at {} {pkt}", self.id);
        }

        let output_port = self
            .ports
            .get(&decision.output_port)
            .unwrap_or_else(|| {
                panic!(
                    "unable to find port {} at {}",
                    decision.output_port, self.id
                )
            })
            .clone();

        let output_internal = output_port.borrow().internal();
        if input_internal && !output_internal {
            if let Some(observer) = &self.internal_external_observer {
                observer.borrow_mut().observe_packet(&pkt);
            }
        } else if !input_internal && output_internal {
            if let Some(observer) = &self.external_internal_observer {
                observer.borrow_mut().observe_packet(&pkt);
            }
        }

        output_port.borrow_mut().send_packet_out(pkt);
    }

    /// Local delivery: control messages act on the matcher; data packets
    /// are demultiplexed to flow endpoints, instantiating a sink for new
    /// flows.
    ///
    /// # Panics
    ///
    /// Panics on a stats request without a replies handler and on data
    /// packets whose protocol has no sink constructor.
    pub fn handle_packet(&mut self, pkt: Packet) {
        if pkt.is_control() {
            let requester = pkt.five_tuple().ip_src();
            match pkt.into_payload() {
                PacketPayload::AddOrUpdate { rule, tx_id } => {
                    self.stats.route_updates_seen += 1;
                    if let Err(err) = self.matcher.add_rule(rule) {
                        panic!("invalid rule in add-or-update at {}: {err}", self.id);
                    }
                    if let Some(tx_id) = tx_id {
                        if let Some(handler) = self.replies_handler.clone() {
                            let reply = Packet::new_ack(self.ip_address, requester, tx_id);
                            info!(device = %self.id, tx_id, "will tx ack");
                            handler.borrow_mut().handle_packet(reply);
                        }
                    }
                }
                PacketPayload::StatsRequest {
                    include_flow_counts,
                } => {
                    let mut body = StatsReplyBody::new();
                    self.matcher.populate_stats(include_flow_counts, &mut body);
                    let handler = self.replies_handler.clone().unwrap_or_else(|| {
                        panic!("received stats request, but no replies handler at {}", self.id)
                    });
                    let reply = Packet::new_stats_reply(self.ip_address, requester, body);
                    handler.borrow_mut().handle_packet(reply);
                }
                // Other control opcodes are not for this layer.
                PacketPayload::Ack { .. }
                | PacketPayload::StatsReply { .. }
                | PacketPayload::Data => {}
            }
            return;
        }

        let incoming = *pkt.five_tuple();
        let outgoing = incoming.reverse();
        let now = self.clock.now();

        if !self.connections.contains_key(&outgoing) {
            let connection: Box<dyn Connection> = match incoming.ip_proto() {
                IpProto::UDP => {
                    info!(device = %self.id, flow = %outgoing, "added udp sink");
                    Box::new(UdpSink::new(sink_id(&incoming), outgoing))
                }
                IpProto::TCP => {
                    info!(device = %self.id, flow = %outgoing, "added tcp sink");
                    Box::new(TcpSink::new(sink_id(&incoming), outgoing))
                }
                other => panic!(
                    "don't know how to create new connection for ip proto {} at {}",
                    other.raw(),
                    self.id
                ),
            };
            self.connections.insert(outgoing, connection);
        }

        let responses = self
            .connections
            .get_mut(&outgoing)
            .map(|connection| connection.handle_packet(pkt, now))
            .unwrap_or_default();
        self.emit_local(responses);
    }

    /// Builds a TCP traffic generator toward `dst_address:dst_port`,
    /// registered with the network's retransmit timer. Returns the tuple
    /// the generator is keyed by.
    ///
    /// # Panics
    ///
    /// Panics when the device is not part of a network, or when source
    /// ports are exhausted.
    pub fn add_tcp_generator(
        &mut self,
        config: TcpSourceConfig,
        dst_address: IpAddress,
        dst_port: AccessLayerPort,
    ) -> FiveTuple {
        let tuple = self.prepare_tuple(dst_address, dst_port, IpProto::TCP);
        let timer = self
            .retx_timer
            .clone()
            .unwrap_or_else(|| panic!("device {} is not part of a network", self.id));

        let source = TcpSource::new(generator_id(&tuple), tuple, config);
        timer
            .borrow_mut()
            .register(self.self_handle.clone(), tuple);
        self.connections.insert(tuple, Box::new(source));
        info!(device = %self.id, flow = %tuple, "added tcp generator");
        tuple
    }

    /// Builds a UDP traffic generator toward `dst_address:dst_port`.
    ///
    /// # Panics
    ///
    /// Panics when source ports are exhausted.
    pub fn add_udp_generator(
        &mut self,
        dst_address: IpAddress,
        dst_port: AccessLayerPort,
        mss_bytes: u32,
    ) -> FiveTuple {
        let tuple = self.prepare_tuple(dst_address, dst_port, IpProto::UDP);
        let source = UdpSource::new(generator_id(&tuple), tuple, mss_bytes);
        self.connections.insert(tuple, Box::new(source));
        info!(device = %self.id, flow = %tuple, "added udp generator");
        tuple
    }

    /// Queues application data on a generator.
    ///
    /// # Panics
    ///
    /// Panics when no connection is keyed by `tuple`.
    pub fn add_data(&mut self, tuple: &FiveTuple, bytes: u64) {
        self.connections
            .get_mut(tuple)
            .unwrap_or_else(|| panic!("no connection {tuple} at {}", self.id))
            .add_data(bytes);
    }

    /// Drives every endpoint's time-based sending; emitted packets leave
    /// through the loopback port.
    pub fn tick(&mut self, now: EventQueueTime) {
        let mut out = Vec::new();
        for connection in self.connections.values_mut() {
            out.extend(connection.tick(now));
        }
        self.emit_local(out);
    }

    /// Runs the retransmit scan of one registered connection.
    pub(crate) fn retransmit_scan(&mut self, tuple: &FiveTuple, now: EventQueueTime) {
        let packets = self
            .connections
            .get_mut(tuple)
            .map(|connection| connection.on_retransmit_scan(now))
            .unwrap_or_default();
        self.emit_local(packets);
    }

    #[must_use]
    pub fn has_connection(&self, tuple: &FiveTuple) -> bool {
        self.connections.contains_key(tuple)
    }

    #[must_use]
    pub fn num_connections(&self) -> usize {
        self.connections.len()
    }

    /// Looks up a connection for inspection.
    #[must_use]
    pub fn connection(&self, tuple: &FiveTuple) -> Option<&dyn Connection> {
        self.connections.get(tuple).map(Box::as_ref)
    }

    fn emit_local(&mut self, packets: Vec<Packet>) {
        if packets.is_empty() {
            return;
        }
        let loopback = self.loopback_port();
        for pkt in packets {
            debug!(device = %self.id, %pkt, "emitting local packet");
            loopback.borrow_mut().send_packet_out(pkt);
        }
    }

    /// A five-tuple from this device to the destination, with the first
    /// source port not already keying a connection.
    ///
    /// # Panics
    ///
    /// Panics when every source port is taken.
    fn prepare_tuple(
        &self,
        dst_address: IpAddress,
        dst_port: AccessLayerPort,
        proto: IpProto,
    ) -> FiveTuple {
        for raw in 1..u16::MAX {
            let tuple = FiveTuple::new(
                self.ip_address,
                dst_address,
                proto,
                AccessLayerPort::new(raw),
                dst_port,
            );
            if !self.connections.contains_key(&tuple) {
                return tuple;
            }
        }
        panic!("out of src ports at {}", self.id);
    }
}

impl PacketHandler for Device {
    /// Packets handed directly to a device are local deliveries.
    fn handle_packet(&mut self, pkt: Packet) {
        Device::handle_packet(self, pkt);
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("ip", &self.ip_address)
            .field("ports", &self.ports.len())
            .field("connections", &self.connections.len())
            .field("rules", &self.matcher.num_rules())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{new_collector, new_counting_observer};
    use flowsim_core::sscp::{ActionSpec, RuleSpec};
    use flowsim_core::{MatchRuleKey, PacketTag};

    const PORT1: DevicePortNumber = DevicePortNumber::new(1);
    const PORT2: DevicePortNumber = DevicePortNumber::new(2);

    fn device_ip() -> IpAddress {
        IpAddress::new(0x0a00_0005) // 10.0.0.5
    }

    fn make_device() -> Rc<RefCell<Device>> {
        Device::new("dev", device_ip(), SimClock::new())
    }

    fn transit_packet(dst: u32, src: u32) -> Packet {
        Packet::new_data(
            FiveTuple::new(
                IpAddress::new(src),
                IpAddress::new(dst),
                IpProto::TCP,
                AccessLayerPort::new(4000),
                AccessLayerPort::new(80),
            ),
            1000,
        )
    }

    fn local_tcp_packet() -> Packet {
        Packet::new_data(
            FiveTuple::new(
                IpAddress::new(0x0a00_0006),
                device_ip(),
                IpProto::TCP,
                AccessLayerPort::new(1234),
                AccessLayerPort::new(80),
            ),
            1000,
        )
    }

    fn wildcard_rule_to(out: DevicePortNumber) -> RuleSpec {
        RuleSpec::new(
            MatchRuleKey::new(PORT1, PacketTag::DEFAULT, vec![FiveTuple::WILDCARD]),
            vec![ActionSpec::new(out, None, 1)],
        )
    }

    #[test]
    fn test_forwarding_through_matcher() {
        let device = make_device();
        let collector = new_collector();
        {
            let mut dev = device.borrow_mut();
            dev.matcher_mut()
                .add_rule(wildcard_rule_to(PORT2))
                .unwrap();
            let out = dev.find_or_create_port(PORT2);
            out.borrow_mut().connect(collector.clone());
            dev.find_or_create_port(PORT1);
        }

        device
            .borrow_mut()
            .handle_packet_from_port(PORT1, transit_packet(99, 1));

        let collected = collector.borrow();
        assert_eq!(collected.packets.len(), 1);
        // One hop spent.
        assert_eq!(
            collected.packets[0].ttl(),
            flowsim_core::DEFAULT_TTL - 1
        );

        let dev = device.borrow();
        assert_eq!(dev.stats().packets_seen, 1);
        assert_eq!(dev.stats().bytes_seen, 1000);
        assert_eq!(dev.stats().packets_failed_to_match, 0);
    }

    #[test]
    fn test_match_miss_counts_and_drops() {
        let device = make_device();
        device.borrow_mut().find_or_create_port(PORT1);
        device
            .borrow_mut()
            .handle_packet_from_port(PORT1, transit_packet(99, 1));

        let dev = device.borrow();
        assert_eq!(dev.stats().packets_failed_to_match, 1);
        assert_eq!(dev.stats().bytes_failed_to_match, 1000);
    }

    #[test]
    #[should_panic(expected = "dropping packet")]
    fn test_match_miss_fatal_when_configured() {
        let device = make_device();
        device.borrow_mut().set_die_on_fail_to_match(true);
        device.borrow_mut().find_or_create_port(PORT1);
        device
            .borrow_mut()
            .handle_packet_from_port(PORT1, transit_packet(99, 1));
    }

    #[test]
    #[should_panic(expected = "unable to find port")]
    fn test_unknown_output_port_panics() {
        let device = make_device();
        let mut dev = device.borrow_mut();
        dev.matcher_mut()
            .add_rule(wildcard_rule_to(DevicePortNumber::new(7)))
            .unwrap();
        dev.find_or_create_port(PORT1);
        dev.handle_packet_from_port(PORT1, transit_packet(99, 1));
    }

    #[test]
    #[should_panic(expected = "TTL exceeded")]
    fn test_ttl_expiry_is_fatal() {
        let device = make_device();
        let collector = new_collector();
        {
            let mut dev = device.borrow_mut();
            dev.matcher_mut()
                .add_rule(wildcard_rule_to(PORT2))
                .unwrap();
            dev.find_or_create_port(PORT2)
                .borrow_mut()
                .connect(collector.clone());
            dev.find_or_create_port(PORT1);
        }

        let mut pkt = transit_packet(99, 1);
        while pkt.ttl() > 1 {
            pkt.decrement_ttl();
        }
        device.borrow_mut().handle_packet_from_port(PORT1, pkt);
    }

    #[test]
    fn test_tag_rewrite_and_preferential_drop() {
        let device = make_device();
        let collector = new_collector();
        {
            let mut dev = device.borrow_mut();
            let mut action = ActionSpec::new(PORT2, Some(PacketTag::new(9)), 1);
            action.preferential_drop = true;
            dev.matcher_mut()
                .add_rule(RuleSpec::new(
                    MatchRuleKey::new(PORT1, PacketTag::DEFAULT, vec![FiveTuple::WILDCARD]),
                    vec![action],
                ))
                .unwrap();
            dev.find_or_create_port(PORT2)
                .borrow_mut()
                .connect(collector.clone());
            dev.find_or_create_port(PORT1);
        }

        device
            .borrow_mut()
            .handle_packet_from_port(PORT1, transit_packet(99, 1));

        let collected = collector.borrow();
        assert_eq!(collected.packets[0].tag(), PacketTag::new(9));
        assert!(collected.packets[0].preferential_drop());
    }

    #[test]
    fn test_localhost_delivery_creates_tcp_sink_once() {
        let device = make_device();
        let collector = new_collector();
        {
            let mut dev = device.borrow_mut();
            dev.find_or_create_port(PORT1);
            // ACKs leave through the loopback port.
            dev.loopback_port().borrow_mut().connect(collector.clone());
        }

        let pkt = local_tcp_packet();
        let expected_key = pkt.five_tuple().reverse();

        device.borrow_mut().handle_packet_from_port(PORT1, pkt);
        {
            let dev = device.borrow();
            assert_eq!(dev.stats().packets_for_localhost, 1);
            assert_eq!(dev.num_connections(), 1);
            assert!(dev.has_connection(&expected_key));
        }

        // The second packet reuses the sink.
        device
            .borrow_mut()
            .handle_packet_from_port(PORT1, local_tcp_packet());
        {
            let dev = device.borrow();
            assert_eq!(dev.num_connections(), 1);
            let sink = dev.connection(&expected_key).unwrap();
            assert_eq!(sink.id(), sink_id(local_tcp_packet().five_tuple()));
        }

        // One ACK per data packet, sent on the reverse tuple.
        let collected = collector.borrow();
        assert_eq!(collected.packets.len(), 2);
        assert_eq!(*collected.packets[0].five_tuple(), expected_key);
    }

    #[test]
    #[should_panic(expected = "don't know how to create new connection")]
    fn test_unknown_proto_sink_is_fatal() {
        let device = make_device();
        device.borrow_mut().find_or_create_port(PORT1);
        let pkt = Packet::new_data(
            FiveTuple::new(
                IpAddress::new(1),
                device_ip(),
                IpProto::new(47),
                AccessLayerPort::new(1),
                AccessLayerPort::new(2),
            ),
            100,
        );
        device.borrow_mut().handle_packet_from_port(PORT1, pkt);
    }

    #[test]
    fn test_add_or_update_acks_only_with_tx_id() {
        let device = make_device();
        let collector = new_collector();
        device.borrow_mut().set_replies_handler(collector.clone());

        let controller = IpAddress::new(0x0a00_00c8);
        let rule = wildcard_rule_to(PORT2);

        // Without a transaction id: applied, no reply.
        device.borrow_mut().handle_packet(Packet::new_add_or_update(
            controller,
            device_ip(),
            rule.clone(),
            None,
        ));
        assert_eq!(collector.borrow().packets.len(), 0);
        assert_eq!(device.borrow().stats().route_updates_seen, 1);
        assert_eq!(device.borrow().matcher().num_rules(), 1);

        // With one: acknowledged to the requester.
        device.borrow_mut().handle_packet(Packet::new_add_or_update(
            controller,
            device_ip(),
            rule,
            Some(77),
        ));
        let collected = collector.borrow();
        assert_eq!(collected.packets.len(), 1);
        assert_eq!(
            *collected.packets[0].payload(),
            PacketPayload::Ack { tx_id: 77 }
        );
        assert_eq!(collected.packets[0].five_tuple().ip_dst(), controller);
    }

    #[test]
    fn test_stats_request_round_trip() {
        let device = make_device();
        let collector = new_collector();
        {
            let mut dev = device.borrow_mut();
            dev.set_replies_handler(collector.clone());
            dev.matcher_mut()
                .add_rule(wildcard_rule_to(PORT2))
                .unwrap();
        }

        let controller = IpAddress::new(0x0a00_00c8);
        device
            .borrow_mut()
            .handle_packet(Packet::new_stats_request(controller, device_ip(), false));

        let collected = collector.borrow();
        assert_eq!(collected.packets.len(), 1);
        match collected.packets[0].payload() {
            PacketPayload::StatsReply { stats } => {
                assert_eq!(stats.entries().len(), 1);
            }
            other => panic!("expected stats reply, got {other:?}"),
        }
    }

    #[test]
    #[should_panic(expected = "no replies handler")]
    fn test_stats_request_without_handler_is_fatal() {
        let device = make_device();
        device.borrow_mut().handle_packet(Packet::new_stats_request(
            IpAddress::new(1),
            device_ip(),
            false,
        ));
    }

    #[test]
    fn test_ack_and_stats_reply_ignored() {
        let device = make_device();
        device
            .borrow_mut()
            .handle_packet(Packet::new_ack(IpAddress::new(1), device_ip(), 5));
        device.borrow_mut().handle_packet(Packet::new_stats_reply(
            IpAddress::new(1),
            device_ip(),
            StatsReplyBody::new(),
        ));
        assert_eq!(device.borrow().num_connections(), 0);
    }

    #[test]
    fn test_udp_generator_picks_fresh_src_ports() {
        let device = make_device();
        let dst = IpAddress::new(0x0a00_0006);
        let first =
            device
                .borrow_mut()
                .add_udp_generator(dst, AccessLayerPort::new(9000), 1000);
        let second =
            device
                .borrow_mut()
                .add_udp_generator(dst, AccessLayerPort::new(9000), 1000);

        assert_eq!(first.src_port(), AccessLayerPort::new(1));
        assert_eq!(second.src_port(), AccessLayerPort::new(2));
        assert_eq!(device.borrow().num_connections(), 2);
    }

    #[test]
    #[should_panic(expected = "not part of a network")]
    fn test_tcp_generator_requires_network() {
        let device = make_device();
        device.borrow_mut().add_tcp_generator(
            TcpSourceConfig::default(),
            IpAddress::new(2),
            AccessLayerPort::new(80),
        );
    }

    #[test]
    fn test_generator_tick_emits_via_loopback() {
        let device = make_device();
        let collector = new_collector();
        device
            .borrow_mut()
            .loopback_port()
            .borrow_mut()
            .connect(collector.clone());

        let tuple = device.borrow_mut().add_udp_generator(
            IpAddress::new(0x0a00_0006),
            AccessLayerPort::new(9000),
            1000,
        );
        device.borrow_mut().add_data(&tuple, 2000);
        device.borrow_mut().tick(EventQueueTime::ZERO);

        assert_eq!(collector.borrow().packets.len(), 2);
    }

    #[test]
    fn test_observer_fires_on_internal_external_crossing() {
        let device = make_device();
        let collector = new_collector();
        let observer = new_counting_observer();
        {
            let mut dev = device.borrow_mut();
            dev.matcher_mut()
                .add_rule(wildcard_rule_to(PORT2))
                .unwrap();
            dev.find_or_create_port(PORT1).borrow_mut().set_internal(true);
            let out = dev.find_or_create_port(PORT2);
            out.borrow_mut().connect(collector.clone());
            dev.add_internal_external_observer(observer.clone());
        }

        device
            .borrow_mut()
            .handle_packet_from_port(PORT1, transit_packet(99, 1));
        assert_eq!(observer.borrow().seen, 1);

        // Internal to internal: no notification.
        device
            .borrow_mut()
            .find_or_create_port(PORT2)
            .borrow_mut()
            .set_internal(true);
        device
            .borrow_mut()
            .handle_packet_from_port(PORT1, transit_packet(99, 2));
        assert_eq!(observer.borrow().seen, 1);
    }

    #[test]
    fn test_next_available_port_skips_taken() {
        let device = make_device();
        let mut dev = device.borrow_mut();
        dev.find_or_create_port(DevicePortNumber::new(1));
        dev.find_or_create_port(DevicePortNumber::new(2));
        let next = dev.next_available_port();
        assert_eq!(next.borrow().number(), DevicePortNumber::new(3));
    }
}
