//! Flow endpoints: the contract the device requires, and token-level
//! TCP/UDP sources and sinks.
//!
//! Endpoints never hold references into the device that owns them; they
//! return any packets they want to emit, and the device injects those
//! through the loopback port's outgoing handler. Real protocol state
//! machines can replace these models behind the same trait.

use std::time::Duration;

use flowsim_core::{EventQueueTime, FiveTuple, Packet};

/// Size of the ACK packets a TCP sink emits.
pub const ACK_SIZE_BYTES: u32 = 40;

/// A flow endpoint owned by a device and keyed by its outgoing five-tuple.
pub trait Connection {
    fn id(&self) -> &str;

    /// The outgoing five-tuple this endpoint is keyed by.
    fn five_tuple(&self) -> &FiveTuple;

    /// Consumes an arriving packet; returns packets to emit in response.
    fn handle_packet(&mut self, pkt: Packet, now: EventQueueTime) -> Vec<Packet>;

    /// Periodic retransmit scan (TCP sources only).
    fn on_retransmit_scan(&mut self, _now: EventQueueTime) -> Vec<Packet> {
        Vec::new()
    }

    /// Drives time-based sending.
    fn tick(&mut self, _now: EventQueueTime) -> Vec<Packet> {
        Vec::new()
    }

    /// Queues application data for sending (sources only).
    fn add_data(&mut self, _bytes: u64) {}
}

/// The conventional endpoint id for an auto-created sink, derived from the
/// tuple of the packet that created it.
#[must_use]
pub fn sink_id(five_tuple: &FiveTuple) -> String {
    format!(
        "sink_{}_port_{}_to_{}_port_{}_proto_{}",
        five_tuple.ip_src(),
        five_tuple.src_port().raw(),
        five_tuple.ip_dst(),
        five_tuple.dst_port().raw(),
        five_tuple.ip_proto().raw()
    )
}

/// The conventional endpoint id for a traffic generator.
#[must_use]
pub fn generator_id(five_tuple: &FiveTuple) -> String {
    format!(
        "generator_{}_port_{}_to_{}_port_{}_proto_{}",
        five_tuple.ip_src(),
        five_tuple.src_port().raw(),
        five_tuple.ip_dst(),
        five_tuple.dst_port().raw(),
        five_tuple.ip_proto().raw()
    )
}

/// A UDP sink: absorbs packets and counts them.
#[derive(Debug)]
#[must_use]
pub struct UdpSink {
    id: String,
    five_tuple: FiveTuple,
    pkts_seen: u64,
    bytes_seen: u64,
}

impl UdpSink {
    /// `five_tuple` is the outgoing direction (the reverse of the packets
    /// the sink absorbs).
    pub fn new(id: String, five_tuple: FiveTuple) -> Self {
        Self {
            id,
            five_tuple,
            pkts_seen: 0,
            bytes_seen: 0,
        }
    }

    #[must_use]
    pub fn pkts_seen(&self) -> u64 {
        self.pkts_seen
    }

    #[must_use]
    pub fn bytes_seen(&self) -> u64 {
        self.bytes_seen
    }
}

impl Connection for UdpSink {
    fn id(&self) -> &str {
        &self.id
    }

    fn five_tuple(&self) -> &FiveTuple {
        &self.five_tuple
    }

    fn handle_packet(&mut self, pkt: Packet, _now: EventQueueTime) -> Vec<Packet> {
        self.pkts_seen += 1;
        self.bytes_seen += u64::from(pkt.size_bytes());
        Vec::new()
    }
}

/// A TCP sink: absorbs packets, counts them, and answers each data packet
/// with a fixed-size ACK on the reverse direction.
#[derive(Debug)]
#[must_use]
pub struct TcpSink {
    id: String,
    five_tuple: FiveTuple,
    pkts_seen: u64,
    bytes_seen: u64,
}

impl TcpSink {
    /// `five_tuple` is the outgoing direction ACKs are sent on.
    pub fn new(id: String, five_tuple: FiveTuple) -> Self {
        Self {
            id,
            five_tuple,
            pkts_seen: 0,
            bytes_seen: 0,
        }
    }

    #[must_use]
    pub fn pkts_seen(&self) -> u64 {
        self.pkts_seen
    }

    #[must_use]
    pub fn bytes_seen(&self) -> u64 {
        self.bytes_seen
    }
}

impl Connection for TcpSink {
    fn id(&self) -> &str {
        &self.id
    }

    fn five_tuple(&self) -> &FiveTuple {
        &self.five_tuple
    }

    fn handle_packet(&mut self, pkt: Packet, _now: EventQueueTime) -> Vec<Packet> {
        self.pkts_seen += 1;
        self.bytes_seen += u64::from(pkt.size_bytes());
        vec![Packet::new_data(self.five_tuple, ACK_SIZE_BYTES)]
    }
}

/// A UDP source: drains queued application data into MSS-sized packets on
/// every tick. No pacing, no acknowledgements.
#[derive(Debug)]
#[must_use]
pub struct UdpSource {
    id: String,
    five_tuple: FiveTuple,
    mss_bytes: u32,
    pending_bytes: u64,
    pkts_sent: u64,
}

impl UdpSource {
    pub fn new(id: String, five_tuple: FiveTuple, mss_bytes: u32) -> Self {
        Self {
            id,
            five_tuple,
            mss_bytes,
            pending_bytes: 0,
            pkts_sent: 0,
        }
    }

    #[must_use]
    pub fn pkts_sent(&self) -> u64 {
        self.pkts_sent
    }
}

impl Connection for UdpSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn five_tuple(&self) -> &FiveTuple {
        &self.five_tuple
    }

    fn handle_packet(&mut self, _pkt: Packet, _now: EventQueueTime) -> Vec<Packet> {
        Vec::new()
    }

    fn tick(&mut self, _now: EventQueueTime) -> Vec<Packet> {
        let mut out = Vec::new();
        while self.pending_bytes > 0 {
            let size = u64::from(self.mss_bytes).min(self.pending_bytes) as u32;
            self.pending_bytes -= u64::from(size);
            self.pkts_sent += 1;
            out.push(Packet::new_data(self.five_tuple, size));
        }
        out
    }

    fn add_data(&mut self, bytes: u64) {
        self.pending_bytes += bytes;
    }
}

/// Configuration of a TCP source.
#[derive(Debug, Clone)]
pub struct TcpSourceConfig {
    pub mss_bytes: u32,
    pub initial_cwnd_pkts: u32,
    pub max_cwnd_pkts: u32,
    pub retx_timeout: Duration,
}

impl Default for TcpSourceConfig {
    fn default() -> Self {
        Self {
            mss_bytes: 1500,
            initial_cwnd_pkts: 4,
            max_cwnd_pkts: 64,
            retx_timeout: Duration::from_millis(200),
        }
    }
}

/// A token-level TCP source: window-limited sending, ACK-clocked window
/// growth, timeout-based retransmission through the shared scan timer.
#[derive(Debug)]
#[must_use]
pub struct TcpSource {
    id: String,
    five_tuple: FiveTuple,
    config: TcpSourceConfig,
    pending_bytes: u64,
    cwnd_pkts: u32,
    in_flight_pkts: u32,
    last_send: EventQueueTime,
    pkts_sent: u64,
    acks_seen: u64,
    retransmissions: u64,
}

impl TcpSource {
    pub fn new(id: String, five_tuple: FiveTuple, config: TcpSourceConfig) -> Self {
        let cwnd_pkts = config.initial_cwnd_pkts.max(1);
        Self {
            id,
            five_tuple,
            config,
            pending_bytes: 0,
            cwnd_pkts,
            in_flight_pkts: 0,
            last_send: EventQueueTime::ZERO,
            pkts_sent: 0,
            acks_seen: 0,
            retransmissions: 0,
        }
    }

    #[must_use]
    pub fn pkts_sent(&self) -> u64 {
        self.pkts_sent
    }

    #[must_use]
    pub fn acks_seen(&self) -> u64 {
        self.acks_seen
    }

    #[must_use]
    pub fn retransmissions(&self) -> u64 {
        self.retransmissions
    }

    #[must_use]
    pub fn in_flight_pkts(&self) -> u32 {
        self.in_flight_pkts
    }

    fn send_window(&mut self, now: EventQueueTime) -> Vec<Packet> {
        let mut out = Vec::new();
        while self.in_flight_pkts < self.cwnd_pkts && self.pending_bytes > 0 {
            let size = u64::from(self.config.mss_bytes).min(self.pending_bytes) as u32;
            self.pending_bytes -= u64::from(size);
            self.in_flight_pkts += 1;
            self.pkts_sent += 1;
            self.last_send = now;
            out.push(Packet::new_data(self.five_tuple, size));
        }
        out
    }
}

impl Connection for TcpSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn five_tuple(&self) -> &FiveTuple {
        &self.five_tuple
    }

    /// An arriving packet on this tuple is an acknowledgement: it opens
    /// the window and clocks out more data.
    fn handle_packet(&mut self, _pkt: Packet, now: EventQueueTime) -> Vec<Packet> {
        self.acks_seen += 1;
        self.in_flight_pkts = self.in_flight_pkts.saturating_sub(1);
        self.cwnd_pkts = (self.cwnd_pkts + 1).min(self.config.max_cwnd_pkts);
        self.send_window(now)
    }

    fn on_retransmit_scan(&mut self, now: EventQueueTime) -> Vec<Packet> {
        if self.in_flight_pkts == 0 {
            return Vec::new();
        }
        if now.saturating_since(self.last_send) <= self.config.retx_timeout {
            return Vec::new();
        }
        self.retransmissions += 1;
        self.last_send = now;
        vec![Packet::new_data(self.five_tuple, self.config.mss_bytes)]
    }

    fn tick(&mut self, now: EventQueueTime) -> Vec<Packet> {
        self.send_window(now)
    }

    fn add_data(&mut self, bytes: u64) {
        self.pending_bytes += bytes;
    }
}
