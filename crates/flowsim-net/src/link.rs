//! The queue/pipe contract and its pass-through instances.
//!
//! A link chains `source port -> queue -> pipe -> destination port`. The
//! substrate only requires that queues and pipes accept packets and can be
//! connected to a downstream handler; rate-limited queues and
//! propagation-delay pipes plug in behind the same trait.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use flowsim_core::{HandlerRef, Packet, PacketHandler};

/// A connectable element of a link chain.
pub trait LinkElement: PacketHandler {
    /// Binds the downstream handler packets are forwarded to.
    fn connect(&mut self, downstream: HandlerRef);
}

/// A queue model that forwards immediately, counting what passes through.
#[must_use]
pub struct PassThroughQueue {
    id: String,
    downstream: Option<HandlerRef>,
    packets_seen: u64,
    bytes_seen: u64,
}

impl PassThroughQueue {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            downstream: None,
            packets_seen: 0,
            bytes_seen: 0,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn packets_seen(&self) -> u64 {
        self.packets_seen
    }

    #[must_use]
    pub fn bytes_seen(&self) -> u64 {
        self.bytes_seen
    }
}

impl PacketHandler for PassThroughQueue {
    fn handle_packet(&mut self, pkt: Packet) {
        self.packets_seen += 1;
        self.bytes_seen += u64::from(pkt.size_bytes());
        let downstream = self
            .downstream
            .as_ref()
            .unwrap_or_else(|| panic!("queue {} is not connected", self.id))
            .clone();
        downstream.borrow_mut().handle_packet(pkt);
    }
}

impl LinkElement for PassThroughQueue {
    fn connect(&mut self, downstream: HandlerRef) {
        self.downstream = Some(downstream);
    }
}

/// A propagation pipe that delivers immediately, counting what passes
/// through.
#[must_use]
pub struct PassThroughPipe {
    id: String,
    downstream: Option<HandlerRef>,
    packets_seen: u64,
}

impl PassThroughPipe {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            downstream: None,
            packets_seen: 0,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn packets_seen(&self) -> u64 {
        self.packets_seen
    }
}

impl PacketHandler for PassThroughPipe {
    fn handle_packet(&mut self, pkt: Packet) {
        self.packets_seen += 1;
        let downstream = self
            .downstream
            .as_ref()
            .unwrap_or_else(|| panic!("pipe {} is not connected", self.id))
            .clone();
        downstream.borrow_mut().handle_packet(pkt);
    }
}

impl LinkElement for PassThroughPipe {
    fn connect(&mut self, downstream: HandlerRef) {
        self.downstream = Some(downstream);
    }
}

/// A queue that buffers packets until the driver drains it.
///
/// Zero-latency pass-through elements deliver within the sender's call
/// stack, which a cyclic topology (data one way, ACKs back) cannot
/// tolerate: the chain would re-enter a device that is still processing.
/// A hold queue breaks the chain the way a scheduled queue drain does in
/// an event loop.
#[must_use]
pub struct HoldQueue {
    id: String,
    downstream: Option<HandlerRef>,
    buffer: VecDeque<Packet>,
    packets_seen: u64,
    bytes_seen: u64,
}

impl HoldQueue {
    pub fn new(id: impl Into<String>) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self {
            id: id.into(),
            downstream: None,
            buffer: VecDeque::new(),
            packets_seen: 0,
            bytes_seen: 0,
        }))
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    #[must_use]
    pub fn packets_seen(&self) -> u64 {
        self.packets_seen
    }

    #[must_use]
    pub fn bytes_seen(&self) -> u64 {
        self.bytes_seen
    }

    /// Forwards everything buffered so far. Packets arriving downstream
    /// as a consequence of the drain (including back into this queue)
    /// stay buffered for the next call. Returns the number forwarded.
    ///
    /// # Panics
    ///
    /// Panics when the queue holds packets but is not connected.
    pub fn drain(queue: &Rc<RefCell<Self>>) -> usize {
        let mut forwarded = 0;
        let batch = queue.borrow().buffer.len();
        while forwarded < batch {
            let (pkt, downstream) = {
                let mut q = queue.borrow_mut();
                let Some(pkt) = q.buffer.pop_front() else {
                    break;
                };
                let downstream = q
                    .downstream
                    .as_ref()
                    .unwrap_or_else(|| panic!("queue {} is not connected", q.id))
                    .clone();
                (pkt, downstream)
            };
            // The queue borrow is released: the downstream chain may feed
            // packets back into it.
            downstream.borrow_mut().handle_packet(pkt);
            forwarded += 1;
        }
        forwarded
    }
}

impl PacketHandler for HoldQueue {
    fn handle_packet(&mut self, pkt: Packet) {
        self.packets_seen += 1;
        self.bytes_seen += u64::from(pkt.size_bytes());
        self.buffer.push_back(pkt);
    }
}

impl LinkElement for HoldQueue {
    fn connect(&mut self, downstream: HandlerRef) {
        self.downstream = Some(downstream);
    }
}
