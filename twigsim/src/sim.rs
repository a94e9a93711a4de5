//! The simulator proper: a set of nodes on one radio bus, driven by a
//! shared clock.
//!
//! There is no event queue. Protocol code blocks in bounded poll loops
//! (id requests, parent searches) that call `Clock::delay` between
//! polls, so the clock itself is the scheduler: every delay advances
//! simulated time and then pumps pending frames through the *other*
//! nodes. A node is taken out of the shared slot table while it runs,
//! which makes re-entry structurally impossible even when pumping
//! recurses through nested delays.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use twignet::{Clock, Config, Duration, Error, Message, Timestamp};

use crate::bus::RadioBus;
use crate::metrics::SimMetrics;
use crate::node::SimNode;
use crate::topology::{Port, Topology};

type NodeSlots = Rc<RefCell<Vec<Option<SimNode>>>>;

/// Frames one node may consume per pump pass before the pump moves on.
const PUMP_BUDGET: u32 = 64;

/// Simulated time shared by every node, doubling as the frame pump.
#[derive(Clone)]
pub struct SimClock {
    time: Rc<Cell<u64>>,
    bus: RadioBus,
    nodes: Weak<RefCell<Vec<Option<SimNode>>>>,
}

impl SimClock {
    fn new(bus: RadioBus, nodes: &NodeSlots) -> Self {
        Self {
            time: Rc::new(Cell::new(0)),
            bus,
            nodes: Rc::downgrade(nodes),
        }
    }

    /// Run pending frames through every idle node. Nodes currently
    /// executing have an empty slot and are skipped; their inbox waits
    /// until they delay or return.
    pub(crate) fn pump(&self) {
        let Some(nodes) = self.nodes.upgrade() else {
            return;
        };
        let count = nodes.borrow().len();
        for port in 0..count {
            if self.bus.pending(port) == 0 {
                continue;
            }
            let Some(mut node) = nodes.borrow_mut()[port].take() else {
                continue;
            };
            let mut budget = PUMP_BUDGET;
            while budget > 0 && self.bus.pending(port) > 0 {
                node.tick();
                budget -= 1;
            }
            nodes.borrow_mut()[port] = Some(node);
        }
    }
}

impl Clock for SimClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_millis(self.time.get())
    }

    fn delay(&self, duration: Duration) {
        self.time.set(self.time.get() + duration.as_millis());
        self.pump();
    }
}

/// A network of simulated nodes.
pub struct Simulator {
    bus: RadioBus,
    clock: SimClock,
    nodes: NodeSlots,
    seed: u64,
}

impl Simulator {
    pub fn new(seed: u64) -> Self {
        let bus = RadioBus::new(seed);
        let nodes: NodeSlots = Rc::new(RefCell::new(Vec::new()));
        let clock = SimClock::new(bus.clone(), &nodes);
        Self {
            bus,
            clock,
            nodes,
            seed,
        }
    }

    /// Attach a new node to the bus. It starts disconnected and
    /// uninitialized; wire it with [`connect`](Self::connect) and bring
    /// it up with [`init_node`](Self::init_node).
    pub fn add_node(&mut self) -> Port {
        self.add_node_with_config(Config::default())
    }

    pub fn add_node_with_config(&mut self, config: Config) -> Port {
        let transport = self.bus.attach();
        let port = transport.port();
        self.seed = self.seed.wrapping_add(0x9E3779B97F4A7C15);
        let node = SimNode::new(transport, self.clock.clone(), self.seed, config);
        self.nodes.borrow_mut().push(Some(node));
        port
    }

    /// Run `f` against one node, with the node removed from the slot
    /// table for the duration so pumping cannot re-enter it.
    ///
    /// Panics if the node is already executing, which can only happen
    /// by calling this from inside an application handler.
    pub fn with_node<R>(&self, port: Port, f: impl FnOnce(&mut SimNode) -> R) -> R {
        let mut node = self.nodes.borrow_mut()[port]
            .take()
            .expect("node is already executing");
        let result = f(&mut node);
        self.nodes.borrow_mut()[port] = Some(node);
        result
    }

    /// Bring a node up; blocking discovery exchanges resolve against
    /// the other nodes through the clock pump.
    pub fn init_node(&self, port: Port, relay: bool, static_id: Option<u8>) -> Result<(), Error> {
        self.with_node(port, |n| n.init(relay, static_id))
    }

    /// One process tick on one node.
    pub fn tick(&self, port: Port) -> bool {
        self.with_node(port, |n| n.tick())
    }

    pub fn send_from(&self, port: Port, msg: &mut Message, echo: bool) -> Result<(), Error> {
        let result = self.with_node(port, |n| n.send(msg, echo));
        self.settle();
        result
    }

    /// Pump until every inbox is empty or the network will not quiesce.
    pub fn settle(&self) {
        for _ in 0..16 {
            if (0..self.bus.port_count()).all(|p| self.bus.pending(p) == 0) {
                return;
            }
            self.clock.pump();
        }
    }

    /// Advance simulated time, pumping as a delay would.
    pub fn advance(&self, duration: Duration) {
        self.clock.delay(duration);
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    // Topology plumbing.

    pub fn connect(&self, a: Port, b: Port) {
        self.bus.connect(a, b);
    }

    pub fn disconnect(&self, a: Port, b: Port) {
        self.bus.disconnect(a, b);
    }

    pub fn with_topology<R>(&self, f: impl FnOnce(&mut Topology) -> R) -> R {
        self.bus.with_topology(f)
    }

    pub fn metrics(&self) -> SimMetrics {
        self.bus.metrics()
    }

    // Shorthand readers for assertions.

    pub fn node_id(&self, port: Port) -> u8 {
        self.with_node(port, |n| n.node().node_id())
    }

    pub fn parent(&self, port: Port) -> Option<u8> {
        self.with_node(port, |n| n.node().parent())
    }

    pub fn distance(&self, port: Port) -> Option<u8> {
        self.with_node(port, |n| n.node().distance())
    }

    pub fn received(&self, port: Port) -> Vec<Message> {
        self.with_node(port, |n| n.recorder().messages.clone())
    }
}
