//! One simulated node: a `twignet::Node` over the in-process radio
//! bus, RAM-backed storage and the shared simulated clock.

use twignet::{AppHandler, Config, Error, Message, Node, Random, Storage};

use crate::bus::SimTransport;
use crate::sim::SimClock;

/// RAM standing in for EEPROM. Erased cells read `0xFF`.
pub struct RamStorage {
    bytes: Vec<u8>,
}

impl RamStorage {
    pub fn new() -> Self {
        Self {
            bytes: vec![0xFF; 1024],
        }
    }
}

impl Default for RamStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for RamStorage {
    fn read_byte(&self, addr: u16) -> u8 {
        self.bytes.get(addr as usize).copied().unwrap_or(0xFF)
    }

    fn write_byte(&mut self, addr: u16, value: u8) {
        if let Some(slot) = self.bytes.get_mut(addr as usize) {
            *slot = value;
        }
    }
}

/// Seeded jitter source, one independent stream per node.
pub struct SimRng {
    state: u64,
}

impl SimRng {
    pub fn new(seed: u64) -> Self {
        Self {
            state: seed | 1,
        }
    }
}

impl Random for SimRng {
    fn gen_range(&mut self, min: u64, max: u64) -> u64 {
        if max <= min {
            return min;
        }
        self.state = self
            .state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        min + (self.state >> 33) % (max - min)
    }
}

/// Captures everything the node hands to its application.
#[derive(Default)]
pub struct Recorder {
    pub messages: Vec<Message>,
    pub acks: Vec<Message>,
    pub times: Vec<u32>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.acks.clear();
        self.times.clear();
    }
}

impl AppHandler for Recorder {
    fn on_message(&mut self, msg: &Message) {
        self.messages.push(msg.clone());
    }

    fn on_ack(&mut self, msg: &Message) {
        self.acks.push(msg.clone());
    }

    fn on_time(&mut self, seconds: u32) {
        self.times.push(seconds);
    }
}

/// A protocol node plus its recording application.
pub struct SimNode {
    node: Node<SimTransport, RamStorage, SimClock, SimRng>,
    recorder: Recorder,
}

impl SimNode {
    pub fn new(transport: SimTransport, clock: SimClock, seed: u64, config: Config) -> Self {
        Self {
            node: Node::new(
                transport,
                RamStorage::new(),
                clock,
                SimRng::new(seed),
                config,
            ),
            recorder: Recorder::new(),
        }
    }

    /// Bring the node up; see [`twignet::Node::init`].
    pub fn init(&mut self, relay: bool, static_id: Option<u8>) -> Result<(), Error> {
        self.node.init(relay, static_id)
    }

    /// One process tick against the recorder. Returns whether a frame
    /// was consumed.
    pub fn tick(&mut self) -> bool {
        self.node.process(&mut self.recorder)
    }

    pub fn send(&mut self, msg: &mut Message, echo: bool) -> Result<(), Error> {
        self.node.send(msg, echo)
    }

    pub fn node(&self) -> &Node<SimTransport, RamStorage, SimClock, SimRng> {
        &self.node
    }

    pub fn node_mut(&mut self) -> &mut Node<SimTransport, RamStorage, SimClock, SimRng> {
        &mut self.node
    }

    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    pub fn recorder_mut(&mut self) -> &mut Recorder {
        &mut self.recorder
    }
}
