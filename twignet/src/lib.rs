#![forbid(unsafe_code)]
//! twignet - tree-routing network layer for point-to-point sensor radios
//!
//! Self-organizing convergecast tree over cheap packet radios: every
//! node picks a parent one hop closer to the single gateway (id 0),
//! sensor data climbs the tree hop by hop, and relays learn per-child
//! routes from the traffic passing through them so the gateway can
//! reach any node back down the same path.
//!
//! This crate is `no_std` but **requires the `alloc` crate** for the
//! variable-length message payloads (bounded at [`MAX_PAYLOAD`]).
//!
//! # Key properties
//!
//! - Node ids are a single byte: gateway 0, broadcast 255, 1-254
//!   assignable (persisted, or requested over the air at first boot)
//! - Parent selection minimizes hop distance to the gateway and heals
//!   itself after repeated parent-link failures
//! - Fixed 32-byte frames with a CRC-8 integrity code
//! - All protocol state persists through byte-addressed storage and
//!   survives power cycles
//! - Strictly synchronous: one `process` call per loop tick, no
//!   executor required
//!
//! # Example
//!
//! ```ignore
//! use twignet::{Config, Message, Node, Command};
//!
//! // Implement Transport, Storage, Clock and Random for your platform.
//! let mut node = Node::new(radio, eeprom, clock, rng, Config::default());
//! node.init(false, None)?;
//!
//! let mut report = Message::new(0, 1, Command::Set, 0).with_payload(b"21.5");
//! node.send(&mut report, false)?;
//!
//! loop {
//!     node.process(&mut handler);
//! }
//! ```
//!
//! # Module structure
//!
//! - [`types`] - ids, constants, [`Message`], errors
//! - [`wire`] - frame codec and validation
//! - [`traits`] - Transport, Storage, Clock, Random, AppHandler
//! - [`config`] - runtime tuning and the storage memory map
//! - [`node`] - the Node struct, startup, persistence, senders
//! - [`discovery`] - id assignment and parent search
//! - [`forwarding`] - the process tick and routed sends
//! - [`routes`] - the child routing table
//! - [`time`] - Timestamp and Duration types
//! - [`debug`] - protocol tracing for harnesses

#![no_std]

// Prevent test/debug features from leaking into release builds.
#[cfg(all(feature = "test-support", not(test), not(debug_assertions)))]
compile_error!(
    "The `test-support` feature must not be enabled in release builds. \
     It exists only for host-side tests and simulation."
);

#[cfg(all(feature = "debug", not(test), not(debug_assertions)))]
compile_error!(
    "The `debug` feature must not be enabled in release builds. \
     It adds protocol tracing overhead intended only for development and simulation."
);

extern crate alloc;

pub mod config;
#[macro_use]
pub mod debug;
pub mod discovery;
pub mod forwarding;
pub mod node;
pub mod routes;
pub mod time;
pub mod traits;
pub mod types;
pub mod wire;

// Re-export the working set at the crate root.
pub use config::{Config, StorageLayout};
pub use debug::{DebugEmitter, DebugEvent};
pub use node::Node;
pub use routes::RouteTable;
pub use time::{Duration, Timestamp};
pub use traits::{AppHandler, Clock, Random, RxFrame, RxQueue, Storage, Transport};
pub use types::{
    Command, ControllerConfig, Error, InternalType, LinkMetrics, Message, AUTO_ID, BROADCAST_ID,
    FRAME_SIZE, GATEWAY_ID, MAX_NODE_ID, MAX_PAYLOAD, PROTOCOL_VERSION,
};
pub use wire::DecodeError;
