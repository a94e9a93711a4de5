//! The node: all protocol state behind one struct.
//!
//! `Node` is generic over the four injected capabilities and owns every
//! piece of protocol state: identity, routing table, controller
//! configuration, metrics, and the reusable message buffers. Protocol
//! phases live as `impl` blocks in their own modules (`discovery`,
//! `forwarding`); this module holds construction, startup, persistence
//! and the thin application-facing senders.
//!
//! # Usage
//!
//! ```ignore
//! let mut node = Node::new(radio, eeprom, clock, rng, Config::default());
//! node.init(false, None)?;                 // join the tree
//! node.send_battery_level(87)?;
//!
//! loop {
//!     node.process(&mut handler);          // one tick per loop
//! }
//! ```

#[cfg(feature = "debug")]
use alloc::boxed::Box;

use crate::config::Config;
#[cfg(feature = "debug")]
use crate::debug::{DebugEmitter, DebugEvent};
use crate::routes::RouteTable;
use crate::traits::{Clock, Random, Storage, Transport};
use crate::types::{
    Command, ControllerConfig, Error, InternalType, LinkMetrics, Message, AUTO_ID,
    BROADCAST_ID, DISTANCE_INFINITE, GATEWAY_ID, MAX_NODE_ID, MAX_PAYLOAD,
};

pub struct Node<T, S, C, R> {
    pub(crate) transport: T,
    pub(crate) storage: S,
    pub(crate) clock: C,
    pub(crate) random: R,
    pub(crate) config: Config,

    pub(crate) node_id: u8,
    pub(crate) parent: u8,
    pub(crate) distance: u8,
    pub(crate) relay: bool,
    pub(crate) parent_failures: u8,

    pub(crate) routes: RouteTable,
    pub(crate) controller: ControllerConfig,
    pub(crate) metrics: LinkMetrics,

    /// Most recently received message (reused every tick).
    pub(crate) rx: Message,
    /// Pending echo reply, rebuilt per echo-requested delivery.
    pub(crate) echo: Message,

    #[cfg(feature = "debug")]
    pub(crate) emitter: Option<Box<dyn DebugEmitter>>,
}

impl<T: Transport, S: Storage, C: Clock, R: Random> Node<T, S, C, R> {
    pub fn new(transport: T, storage: S, clock: C, random: R, config: Config) -> Self {
        Self {
            transport,
            storage,
            clock,
            random,
            config,
            node_id: AUTO_ID,
            parent: AUTO_ID,
            distance: DISTANCE_INFINITE,
            relay: false,
            parent_failures: 0,
            routes: RouteTable::new(),
            controller: ControllerConfig::default(),
            metrics: LinkMetrics::new(),
            rx: Message::default(),
            echo: Message::default(),
            #[cfg(feature = "debug")]
            emitter: None,
        }
    }

    /// Bring the node up: restore persisted state, start listening, and
    /// complete id assignment and parent discovery as needed.
    ///
    /// A `static_id` overrides (and replaces) the persisted id; `None`
    /// uses the persisted one, falling back to over-the-air assignment
    /// on fresh storage. A `static_id` outside the assignable range
    /// fails with [`Error::NotAssigned`] and leaves the node untouched.
    /// Failed id assignment is returned (the node is unusable without
    /// one; `init` can simply be called again). Failed parent discovery
    /// is not an error here: the node stays up, answers nothing, and
    /// retries via the failure path.
    pub fn init(&mut self, relay: bool, static_id: Option<u8>) -> Result<(), Error> {
        if matches!(static_id, Some(id) if id > MAX_NODE_ID) {
            return Err(Error::NotAssigned);
        }
        self.relay = relay;
        let layout = self.config.layout;

        match static_id {
            Some(id) => {
                if self.storage.read_byte(layout.node_id) != id {
                    self.storage.write_byte(layout.node_id, id);
                }
                self.node_id = id;
            }
            None => {
                // Erased storage reads 0xFF == AUTO_ID.
                self.node_id = self.storage.read_byte(layout.node_id);
            }
        }

        if self.node_id == GATEWAY_ID {
            // The gateway roots the tree and always relays.
            self.relay = true;
            self.parent = AUTO_ID;
            self.distance = 0;
            self.storage.write_byte(layout.distance, 0);
        } else {
            self.parent = self.storage.read_byte(layout.parent);
            self.distance = self.storage.read_byte(layout.distance);
        }

        self.routes = RouteTable::load(&self.storage, &layout);
        let config_byte = self.storage.read_byte(layout.controller);
        self.controller = if config_byte == 0xFF {
            ControllerConfig::default()
        } else {
            ControllerConfig::from_byte(config_byte)
        };

        self.listen_current();

        if self.node_id == AUTO_ID {
            self.request_id()?;
        }
        if !self.is_gateway() && !self.has_parent() {
            let _ = self.find_parent();
        }
        Ok(())
    }

    // Accessors

    pub fn node_id(&self) -> u8 {
        self.node_id
    }

    pub fn is_gateway(&self) -> bool {
        self.node_id == GATEWAY_ID
    }

    pub fn is_relay(&self) -> bool {
        self.relay
    }

    pub fn parent(&self) -> Option<u8> {
        if self.parent == AUTO_ID {
            None
        } else {
            Some(self.parent)
        }
    }

    pub fn distance(&self) -> Option<u8> {
        if self.distance == DISTANCE_INFINITE {
            None
        } else {
            Some(self.distance)
        }
    }

    pub fn has_parent(&self) -> bool {
        self.parent != AUTO_ID && self.distance != DISTANCE_INFINITE
    }

    pub fn controller_config(&self) -> ControllerConfig {
        self.controller
    }

    pub fn metrics(&self) -> &LinkMetrics {
        &self.metrics
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// The message delivered by the most recent process tick.
    pub fn last_message(&self) -> &Message {
        &self.rx
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    // Application senders

    /// Report the battery level (clamped to 0..=100) to the gateway.
    pub fn send_battery_level(&mut self, percent: u8) -> Result<(), Error> {
        let mut msg = Message::internal(GATEWAY_ID, InternalType::BatteryLevel)
            .with_payload(&[percent.min(100)]);
        self.send(&mut msg, false)
    }

    /// Report the application name and version to the gateway.
    pub fn send_sketch_info(&mut self, name: &str, version: &str) -> Result<(), Error> {
        let mut msg = Message::internal(GATEWAY_ID, InternalType::SketchName)
            .with_payload(truncated(name));
        self.send(&mut msg, false)?;
        let mut msg = Message::internal(GATEWAY_ID, InternalType::SketchVersion)
            .with_payload(truncated(version));
        self.send(&mut msg, false)
    }

    /// Ask another node (usually the gateway) for a variable value. The
    /// reply arrives through `AppHandler::on_message`.
    pub fn request_value(&mut self, destination: u8, sensor: u8, sub_type: u8) -> Result<(), Error> {
        let mut msg = Message::new(destination, sensor, Command::Req, sub_type);
        self.send(&mut msg, false)
    }

    /// Ask the gateway for the current time. The reply arrives through
    /// `AppHandler::on_time`.
    pub fn request_time(&mut self) -> Result<(), Error> {
        let mut msg = Message::internal(GATEWAY_ID, InternalType::TimeRequest);
        self.send(&mut msg, false)
    }

    // Application persistence, in the region after the protocol's own.

    pub fn save_state(&mut self, pos: u16, value: u8) {
        let addr = self.config.layout.app_state + pos;
        self.storage.write_byte(addr, value);
    }

    pub fn load_state(&self, pos: u16) -> u8 {
        let addr = self.config.layout.app_state + pos;
        self.storage.read_byte(addr)
    }

    // Persistence of protocol state.

    pub(crate) fn store_identity(&mut self) {
        let layout = self.config.layout;
        self.storage.write_byte(layout.node_id, self.node_id);
        self.storage.write_byte(layout.parent, self.parent);
        self.storage.write_byte(layout.distance, self.distance);
    }

    pub(crate) fn store_route(&mut self, child: u8) {
        let addr = self.config.layout.route_slot(child);
        self.storage.write_byte(addr, self.routes.slot(child));
    }

    pub(crate) fn store_controller(&mut self) {
        let addr = self.config.layout.controller;
        self.storage.write_byte(addr, self.controller.to_byte());
    }

    /// Point the radio at this node's current addresses.
    pub(crate) fn listen_current(&mut self) {
        let own = self.config.radio_address(self.node_id);
        let broadcast = self.config.radio_address(BROADCAST_ID);
        self.transport.listen(own, broadcast);
    }

    #[cfg(feature = "debug")]
    pub fn set_debug_emitter(&mut self, emitter: Box<dyn DebugEmitter>) {
        self.emitter = Some(emitter);
    }

    #[cfg(feature = "debug")]
    pub(crate) fn emit_debug(&mut self, event: DebugEvent) {
        if let Some(emitter) = self.emitter.as_mut() {
            emitter.emit(event);
        }
    }
}

/// Clip a string to what fits in one payload.
fn truncated(s: &str) -> &[u8] {
    let bytes = s.as_bytes();
    &bytes[..bytes.len().min(MAX_PAYLOAD)]
}
