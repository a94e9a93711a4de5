//! Child routing table.
//!
//! One byte per possible descendant id: `next_hop[child]` is the direct
//! child to hand a downward frame to, or [`ROUTE_NONE`]. Entries are
//! learned opportunistically from upward traffic (last seen wins) and
//! dropped when a forward on them fails. The table mirrors a 256-byte
//! region of persistent storage, loaded whole at startup and written
//! one byte per mutation by the node.

use crate::config::StorageLayout;
use crate::traits::Storage;
use crate::types::ROUTE_NONE;

const ROUTE_SLOTS: usize = 256;

pub struct RouteTable {
    next_hop: [u8; ROUTE_SLOTS],
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RouteTable {
    pub const fn new() -> Self {
        Self {
            next_hop: [ROUTE_NONE; ROUTE_SLOTS],
        }
    }

    /// Rebuild the table from its persisted region.
    pub fn load<S: Storage>(storage: &S, layout: &StorageLayout) -> Self {
        let mut table = Self::new();
        storage.read_block(layout.routes, &mut table.next_hop);
        table
    }

    /// Direct child hop toward `child`, if known.
    #[inline]
    pub fn lookup(&self, child: u8) -> Option<u8> {
        match self.next_hop[child as usize] {
            ROUTE_NONE => None,
            hop => Some(hop),
        }
    }

    /// Record that `child` is reachable via `hop`, replacing any earlier
    /// entry. Returns whether the entry changed (the caller persists
    /// only on change, bounding storage wear).
    pub fn learn(&mut self, child: u8, hop: u8) -> bool {
        if hop == ROUTE_NONE {
            return false;
        }
        let slot = &mut self.next_hop[child as usize];
        if *slot == hop {
            return false;
        }
        *slot = hop;
        true
    }

    /// Drop the entry for `child`. Returns whether one existed.
    pub fn forget(&mut self, child: u8) -> bool {
        let slot = &mut self.next_hop[child as usize];
        if *slot == ROUTE_NONE {
            return false;
        }
        *slot = ROUTE_NONE;
        true
    }

    /// Raw hop byte for persistence.
    #[inline]
    pub(crate) fn slot(&self, child: u8) -> u8 {
        self.next_hop[child as usize]
    }

    /// Known `(child, hop)` pairs.
    pub fn entries(&self) -> impl Iterator<Item = (u8, u8)> + '_ {
        self.next_hop
            .iter()
            .enumerate()
            .filter(|(_, &hop)| hop != ROUTE_NONE)
            .map(|(child, &hop)| (child as u8, hop))
    }

    pub fn is_empty(&self) -> bool {
        self.next_hop.iter().all(|&hop| hop == ROUTE_NONE)
    }
}
