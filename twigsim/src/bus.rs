//! Shared radio medium.
//!
//! Every simulated node attaches to the bus at a fixed [`Port`] and
//! gets back a [`SimTransport`] implementing [`twignet::Transport`].
//! A unicast send is delivered when some in-range port is listening on
//! the target address, and the link-level acknowledgement a real radio
//! would see maps to exactly that condition. Broadcasts fan out to
//! every in-range listener. Packet loss is drawn per link from a
//! seeded generator so runs replay bit for bit.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use twignet::{RxFrame, Transport, FRAME_SIZE};

use crate::metrics::SimMetrics;
use crate::topology::{Port, Topology};

struct PortState {
    inbox: VecDeque<RxFrame>,
    /// Unicast address, `None` until the node calls `listen`.
    own_addr: Option<u64>,
    broadcast_addr: Option<u64>,
}

impl PortState {
    fn new() -> Self {
        Self {
            inbox: VecDeque::new(),
            own_addr: None,
            broadcast_addr: None,
        }
    }

    fn listening(&self) -> bool {
        self.own_addr.is_some()
    }
}

struct BusState {
    topology: Topology,
    ports: Vec<PortState>,
    rng: u64,
    metrics: SimMetrics,
}

impl BusState {
    /// Draw against a link's loss rate. `true` means the frame died.
    fn lost(&mut self, a: Port, b: Port) -> bool {
        let rate = self
            .topology
            .link(a, b)
            .map(|l| l.loss_rate)
            .unwrap_or(0.0);
        if rate <= 0.0 {
            return false;
        }
        self.rng = self
            .rng
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        let draw = (self.rng >> 11) as f64 / (1u64 << 53) as f64;
        draw < rate
    }

    /// Push one frame across a single link, applying loss.
    fn deliver(&mut self, from: Port, to: Port, frame: &[u8; FRAME_SIZE]) -> bool {
        if self.lost(from, to) {
            self.metrics.frames_lost += 1;
            return false;
        }
        self.ports[to].inbox.push_back(RxFrame { data: *frame });
        self.metrics.frames_delivered += 1;
        true
    }

    fn transmit(&mut self, from: Port, addr: u64, frame: &[u8; FRAME_SIZE]) -> bool {
        self.metrics.frames_sent += 1;

        if self.ports[from].broadcast_addr == Some(addr) {
            let hearers = self.topology.hearers(from, self.ports.len());
            for to in hearers {
                if self.ports[to].listening() {
                    self.deliver(from, to, frame);
                }
            }
            // Nobody acknowledges a broadcast.
            return true;
        }

        let target = self
            .ports
            .iter()
            .position(|p| p.own_addr == Some(addr));
        match target {
            Some(to) if to != from && self.topology.can_hear(from, to) => {
                self.deliver(from, to, frame)
            }
            _ => {
                self.metrics.frames_unroutable += 1;
                false
            }
        }
    }
}

/// Handle on the shared medium. Cheap to clone; all clones observe the
/// same ports, topology and counters.
#[derive(Clone)]
pub struct RadioBus {
    inner: Rc<RefCell<BusState>>,
}

impl RadioBus {
    pub fn new(seed: u64) -> Self {
        Self {
            inner: Rc::new(RefCell::new(BusState {
                topology: Topology::new(),
                ports: Vec::new(),
                rng: seed,
                metrics: SimMetrics::new(),
            })),
        }
    }

    /// Claim the next port and get the transport for it.
    ///
    /// The transport holds only a weak reference, so dropping the bus
    /// (and the simulator owning it) turns attached radios silent
    /// instead of leaking the whole medium.
    pub fn attach(&self) -> SimTransport {
        let mut bus = self.inner.borrow_mut();
        let port = bus.ports.len();
        bus.ports.push(PortState::new());
        SimTransport {
            bus: Rc::downgrade(&self.inner),
            port,
        }
    }

    pub fn port_count(&self) -> usize {
        self.inner.borrow().ports.len()
    }

    /// Frames waiting in a port's inbox.
    pub fn pending(&self, port: Port) -> usize {
        let bus = self.inner.borrow();
        bus.ports.get(port).map(|p| p.inbox.len()).unwrap_or(0)
    }

    pub fn metrics(&self) -> SimMetrics {
        self.inner.borrow().metrics
    }

    pub fn with_topology<R>(&self, f: impl FnOnce(&mut Topology) -> R) -> R {
        f(&mut self.inner.borrow_mut().topology)
    }

    pub fn connect(&self, a: Port, b: Port) {
        self.with_topology(|t| t.connect(a, b));
    }

    pub fn disconnect(&self, a: Port, b: Port) {
        self.with_topology(|t| t.disconnect(a, b));
    }
}

/// One node's radio: a port index plus a weak handle on the bus.
pub struct SimTransport {
    bus: Weak<RefCell<BusState>>,
    port: Port,
}

impl SimTransport {
    pub fn port(&self) -> Port {
        self.port
    }
}

impl Transport for SimTransport {
    fn listen(&mut self, own_addr: u64, broadcast_addr: u64) {
        if let Some(bus) = self.bus.upgrade() {
            let mut bus = bus.borrow_mut();
            let port = &mut bus.ports[self.port];
            port.own_addr = Some(own_addr);
            port.broadcast_addr = Some(broadcast_addr);
        }
    }

    fn send(&mut self, addr: u64, frame: &[u8; FRAME_SIZE], _want_ack: bool) -> bool {
        match self.bus.upgrade() {
            Some(bus) => bus.borrow_mut().transmit(self.port, addr, frame),
            None => false,
        }
    }

    fn receive(&mut self) -> Option<RxFrame> {
        let bus = self.bus.upgrade()?;
        let mut bus = bus.borrow_mut();
        bus.ports[self.port].inbox.pop_front()
    }
}
