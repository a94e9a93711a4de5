//! twigsim - multi-node network simulator for twignet
//!
//! Runs whole twignet networks in a single process with no real radios
//! and no real time: nodes share an in-memory [`RadioBus`], a
//! configurable [`Topology`] decides who hears whom, and a simulated
//! clock advances only when protocol code sleeps. Runs are fully
//! deterministic for a given seed.
//!
//! # Example
//!
//! ```
//! use twigsim::Simulator;
//! use twignet::GATEWAY_ID;
//!
//! let mut sim = Simulator::new(42);
//! let gw = sim.add_node();
//! let leaf = sim.add_node();
//! sim.connect(gw, leaf);
//!
//! sim.init_node(gw, true, Some(GATEWAY_ID)).unwrap();
//! sim.init_node(leaf, false, Some(1)).unwrap();
//! assert_eq!(sim.parent(leaf), Some(GATEWAY_ID));
//! ```
//!
//! # How time works
//!
//! There is no event queue. The protocol's bounded poll loops call
//! `Clock::delay` between polls; the simulated clock advances there
//! and pumps queued frames through the other nodes before returning.
//! That lets blocking exchanges (id assignment, parent search) resolve
//! inside a single `init_node` call while everything stays
//! single-threaded and ordered.

pub mod bus;
pub mod metrics;
pub mod node;
pub mod sim;
pub mod topology;

pub use bus::{RadioBus, SimTransport};
pub use metrics::SimMetrics;
pub use node::{RamStorage, Recorder, SimNode, SimRng};
pub use sim::{SimClock, Simulator};
pub use topology::{Link, Port, Topology};

pub use twignet::{Duration, Timestamp};
