//! Debug events for protocol tracing.
//!
//! Test harnesses and the simulator attach an emitter to observe every
//! protocol decision. Plumbing on the node is gated behind the `debug`
//! feature; the event type itself always compiles so harness code can
//! name it.

/// Trait for receiving debug events from a node.
pub trait DebugEmitter: Send {
    fn emit(&mut self, event: DebugEvent);
}

/// Protocol decisions worth tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugEvent {
    /// A received frame failed validation and was dropped.
    DecodeFailed { len: usize },
    /// A child route was learned or replaced.
    RouteLearned { child: u8, hop: u8 },
    /// A child route was dropped after a failed forward.
    RouteForgotten { child: u8 },
    /// A message was delivered to the application.
    Delivered { sender: u8, sub_type: u8 },
    /// A frame was relayed toward a known descendant.
    ForwardedDown { destination: u8, hop: u8 },
    /// A frame was relayed to the parent (destination unknown).
    ForwardedUp { destination: u8, parent: u8 },
    /// Foreign traffic dropped because this node does not relay.
    DroppedNotRelay { destination: u8 },
    /// Relay traffic dropped because there is no parent to fall back to.
    DroppedNoParent { destination: u8 },
    /// An id-request broadcast went out.
    IdRequestSent { attempt: u8 },
    /// An id was adopted and persisted.
    IdAssigned { id: u8 },
    /// A parent-search broadcast went out.
    ParentSearchStarted,
    /// A parent-search reply was considered.
    ParentReply { id: u8, distance: u8 },
    /// A parent was selected.
    ParentSelected { id: u8, distance: u8 },
    /// The listen window closed with no usable reply.
    ParentSearchFailed,
    /// A hop-local send exhausted its retry budget.
    TransmitFailed { to: u8, parent_link: bool },
    /// An echo reply was sent back to a message's origin.
    EchoSent { to: u8 },
}

/// Emit a debug event from node code. Compiles to nothing without the
/// `debug` feature.
macro_rules! trace_event {
    ($node:expr, $event:expr) => {{
        #[cfg(feature = "debug")]
        $node.emit_debug($event);
    }};
}
