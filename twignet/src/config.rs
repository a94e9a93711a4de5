//! Runtime configuration and the persistent storage memory map.
//!
//! Everything tunable lives in one [`Config`] constructed at startup and
//! handed to the node, so radios sharing a network agree on addressing
//! and timing by construction rather than by scattered constants.

use crate::time::Duration;

/// Byte offsets of the node's persistent state.
///
/// Writes are one byte per mutation, so a power loss corrupts at most a
/// single entry. Applications get everything at and after `app_state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageLayout {
    /// This node's assigned id (one byte).
    pub node_id: u16,
    /// Current parent id (one byte).
    pub parent: u16,
    /// Hop distance to the gateway (one byte).
    pub distance: u16,
    /// Routing table, one byte per possible descendant id (256 bytes).
    pub routes: u16,
    /// Controller configuration block.
    pub controller: u16,
    /// First byte available to the application.
    pub app_state: u16,
}

/// Size of the controller configuration block in bytes. Only the first
/// byte is used today; the rest is reserved.
pub const CONTROLLER_BLOCK_SIZE: u16 = 24;

impl StorageLayout {
    /// The default map: identity at the very front, then the route
    /// table, then the controller block.
    pub const fn compact() -> Self {
        Self {
            node_id: 0,
            parent: 1,
            distance: 2,
            routes: 3,
            controller: 3 + 256,
            app_state: 3 + 256 + CONTROLLER_BLOCK_SIZE,
        }
    }

    /// Storage address of the route entry for `child`.
    #[inline]
    pub const fn route_slot(&self, child: u8) -> u16 {
        self.routes + child as u16
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        Self::compact()
    }
}

/// Immutable runtime configuration for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Radio base address; node `n` listens on `base_address + n`.
    pub base_address: u64,
    /// Failed parent-link sends tolerated before searching for a new
    /// parent.
    pub search_failures: u8,
    /// Id-request broadcasts before giving up.
    pub id_request_retries: u8,
    /// How long to wait for an id response per attempt.
    pub id_request_timeout: Duration,
    /// How long to collect parent-search replies.
    pub parent_listen_window: Duration,
    /// Hop-local transmit attempts per send.
    pub send_retries: u8,
    /// Base backoff between transmit attempts, doubled each retry.
    pub retry_backoff: Duration,
    /// Idle sleep inside bounded receive-poll loops.
    pub poll_interval: Duration,
    /// Persistent state map.
    pub layout: StorageLayout,
}

impl Config {
    /// Radio address a given node id listens on.
    #[inline]
    pub const fn radio_address(&self, id: u8) -> u64 {
        self.base_address + id as u64
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_address: 0xA8A8_E1FC00,
            search_failures: 5,
            id_request_retries: 3,
            id_request_timeout: Duration::from_millis(1500),
            parent_listen_window: Duration::from_secs(2),
            send_retries: 3,
            retry_backoff: Duration::from_millis(5),
            poll_interval: Duration::from_millis(1),
            layout: StorageLayout::compact(),
        }
    }
}
