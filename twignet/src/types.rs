//! Core types and constants for the twignet protocol.

use alloc::vec::Vec;
use core::fmt;

// Node id space
pub const GATEWAY_ID: u8 = 0;
pub const BROADCAST_ID: u8 = 255;
/// Sentinel stored in place of a node id before assignment completes.
pub const AUTO_ID: u8 = 255;
/// Highest assignable node id (255 is reserved for broadcast/auto).
pub const MAX_NODE_ID: u8 = 254;
/// Sensor id used for node-level (internal) messages.
pub const NODE_SENSOR_ID: u8 = 255;

// Sentinels
/// Empty slot in the routing table.
pub const ROUTE_NONE: u8 = 255;
/// Hop distance meaning "no usable path to the gateway".
pub const DISTANCE_INFINITE: u8 = 255;

// Wire format
pub const PROTOCOL_VERSION: u8 = 1;
/// Every radio frame is exactly this many bytes.
pub const FRAME_SIZE: usize = 32;
pub const HEADER_SIZE: usize = 9;
pub const MAX_PAYLOAD: usize = FRAME_SIZE - HEADER_SIZE;

/// Command classes (low 3 bits of the wire command byte).
///
/// Wire contract; values must remain stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// Sensor presentation to the controller.
    Presentation = 0,
    /// Set a variable value.
    Set = 1,
    /// Request a variable value.
    Req = 2,
    /// Echo reply confirming a delivered message.
    Ack = 3,
    /// Protocol-internal traffic (see [`InternalType`]).
    Internal = 4,
}

impl Command {
    /// Parse a command class from its wire value.
    pub fn from_wire(value: u8) -> Option<Command> {
        match value {
            0 => Some(Command::Presentation),
            1 => Some(Command::Set),
            2 => Some(Command::Req),
            3 => Some(Command::Ack),
            4 => Some(Command::Internal),
            _ => None,
        }
    }
}

/// Sub-types for [`Command::Internal`] messages.
///
/// Wire contract, like [`Command`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InternalType {
    BatteryLevel = 0,
    TimeRequest = 1,
    TimeResponse = 2,
    Version = 3,
    IdRequest = 4,
    IdResponse = 5,
    FindParent = 6,
    FindParentResponse = 7,
    SketchName = 8,
    SketchVersion = 9,
    Config = 10,
    LogMessage = 11,
}

impl InternalType {
    pub fn from_wire(value: u8) -> Option<InternalType> {
        match value {
            0 => Some(InternalType::BatteryLevel),
            1 => Some(InternalType::TimeRequest),
            2 => Some(InternalType::TimeResponse),
            3 => Some(InternalType::Version),
            4 => Some(InternalType::IdRequest),
            5 => Some(InternalType::IdResponse),
            6 => Some(InternalType::FindParent),
            7 => Some(InternalType::FindParentResponse),
            8 => Some(InternalType::SketchName),
            9 => Some(InternalType::SketchVersion),
            10 => Some(InternalType::Config),
            11 => Some(InternalType::LogMessage),
            _ => None,
        }
    }
}

/// A network-layer message.
///
/// `sender` is the originating node; `last_node` is the immediate radio
/// hop the frame arrived from, rewritten at every hop and used for route
/// learning. The integrity code exists only in the encoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub sender: u8,
    pub last_node: u8,
    pub destination: u8,
    pub sensor: u8,
    pub command: Command,
    pub sub_type: u8,
    /// Ask the destination to send an echo ([`Command::Ack`]) back.
    pub echo_request: bool,
    /// At most [`MAX_PAYLOAD`] bytes survive encoding.
    pub payload: Vec<u8>,
}

impl Default for Message {
    fn default() -> Self {
        Self {
            sender: AUTO_ID,
            last_node: AUTO_ID,
            destination: GATEWAY_ID,
            sensor: NODE_SENSOR_ID,
            command: Command::Internal,
            sub_type: 0,
            echo_request: false,
            payload: Vec::new(),
        }
    }
}

impl Message {
    /// Build an application message. Sender and hop fields are filled in
    /// by the node when the message is sent.
    pub fn new(destination: u8, sensor: u8, command: Command, sub_type: u8) -> Self {
        Self {
            destination,
            sensor,
            command,
            sub_type,
            ..Self::default()
        }
    }

    /// Build a protocol-internal message.
    pub fn internal(destination: u8, sub_type: InternalType) -> Self {
        Self::new(destination, NODE_SENSOR_ID, Command::Internal, sub_type as u8)
    }

    pub fn with_payload(mut self, bytes: &[u8]) -> Self {
        self.payload = bytes.to_vec();
        self
    }

    /// True when this is an internal message of the given sub-type.
    pub fn is_internal(&self, sub_type: InternalType) -> bool {
        self.command == Command::Internal && self.sub_type == sub_type as u8
    }
}

/// Configuration pushed down from the gateway, overwritten wholesale
/// whenever a new [`InternalType::Config`] message arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControllerConfig {
    pub is_metric: bool,
}

impl ControllerConfig {
    pub fn from_byte(byte: u8) -> Self {
        Self {
            is_metric: byte != 0,
        }
    }

    pub fn to_byte(self) -> u8 {
        self.is_metric as u8
    }
}

/// Counters for link-level monitoring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkMetrics {
    /// Frames handed to the transport (any kind).
    pub sent: u32,
    /// Valid frames received and processed.
    pub received: u32,
    /// Frames relayed for other nodes.
    pub forwarded: u32,
    /// Frames dropped (invalid, unroutable, or not ours to relay).
    pub dropped: u32,
    /// Hop-local sends that exhausted their retry budget.
    pub tx_failures: u32,
}

impl LinkMetrics {
    pub const fn new() -> Self {
        Self {
            sent: 0,
            received: 0,
            forwarded: 0,
            dropped: 0,
            tx_failures: 0,
        }
    }
}

/// Errors surfaced by node operations.
///
/// Nothing in this layer is fatal: every variant degrades to "this
/// operation did not succeed now" and recovery (retry, re-discovery)
/// is autonomous.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The node has no assigned id yet.
    NotAssigned,
    /// Destination unknown and no parent to fall back to.
    NoRoute,
    /// No id or parent obtained within the retry budget.
    AssignmentTimeout,
    /// Hop-local send not acknowledged after the retry budget.
    TransmitFailure,
    /// Payload exceeds [`MAX_PAYLOAD`].
    PayloadTooLarge,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotAssigned => write!(f, "node id not assigned"),
            Error::NoRoute => write!(f, "no route to destination"),
            Error::AssignmentTimeout => write!(f, "assignment timed out"),
            Error::TransmitFailure => write!(f, "transmit not acknowledged"),
            Error::PayloadTooLarge => write!(f, "payload too large"),
        }
    }
}
