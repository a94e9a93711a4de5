//! Id assignment and parent discovery.
//!
//! Both operations are broadcast request/response exchanges with a
//! bounded listen window: the node polls its transport and sleeps
//! `Config::poll_interval` between polls, so a simulated clock drives
//! the window deterministically. Unrelated frames arriving during a
//! window are consumed and dropped; discovery is rare and the tree
//! re-learns routes from live traffic anyway.

use crate::node::Node;
use crate::traits::{Clock, Random, Storage, Transport};
use crate::types::{
    Error, InternalType, Message, AUTO_ID, BROADCAST_ID, DISTANCE_INFINITE, GATEWAY_ID,
    MAX_NODE_ID,
};
use crate::wire;

impl<T: Transport, S: Storage, C: Clock, R: Random> Node<T, S, C, R> {
    /// Obtain a node id over the air.
    ///
    /// Broadcasts an id request and waits for a response carrying the
    /// assigned id, retrying up to `Config::id_request_retries` times.
    /// The gateway forwards requests to its controlling application,
    /// which owns id uniqueness. No-op when an id is already assigned.
    pub fn request_id(&mut self) -> Result<u8, Error> {
        if self.node_id != AUTO_ID {
            return Ok(self.node_id);
        }
        let broadcast = self.config.radio_address(BROADCAST_ID);

        for attempt in 0..self.config.id_request_retries.max(1) {
            trace_event!(self, crate::debug::DebugEvent::IdRequestSent { attempt });
            let mut request = Message::internal(GATEWAY_ID, InternalType::IdRequest);
            request.sender = AUTO_ID;
            request.last_node = AUTO_ID;
            if let Ok(frame) = wire::encode(&request) {
                self.transport.send(broadcast, &frame, false);
                self.metrics.sent += 1;
            }

            let deadline = self.clock.now() + self.config.id_request_timeout;
            while self.clock.now() < deadline {
                match self.transport.receive() {
                    Some(rx) => {
                        if let Ok(msg) = wire::decode(&rx.data) {
                            if let Some(id) = assigned_id(&msg) {
                                self.adopt_id(id);
                                return Ok(id);
                            }
                        }
                    }
                    None => self.clock.delay(self.config.poll_interval),
                }
            }
        }
        Err(Error::AssignmentTimeout)
    }

    /// Adopt a newly assigned id: persist it and re-listen on the
    /// matching radio address. Also reached from the process tick when
    /// a response arrives after the request window closed.
    pub(crate) fn adopt_id(&mut self, id: u8) {
        self.node_id = id;
        self.storage.write_byte(self.config.layout.node_id, id);
        self.listen_current();
        trace_event!(self, crate::debug::DebugEvent::IdAssigned { id });
    }

    /// Search for a parent.
    ///
    /// Broadcasts a probe, collects `(id, distance)` offers for
    /// `Config::parent_listen_window`, and adopts the closest-to-gateway
    /// responder; on equal distance the first responder stays. The
    /// current parent is cleared for the duration of the search, so a
    /// silent window leaves the node parentless (and every routed send
    /// failing `NoRoute`) until a later search succeeds.
    pub fn find_parent(&mut self) -> Result<(), Error> {
        if self.is_gateway() {
            return Ok(());
        }
        if self.node_id == AUTO_ID {
            return Err(Error::NotAssigned);
        }

        trace_event!(self, crate::debug::DebugEvent::ParentSearchStarted);
        self.parent = AUTO_ID;
        self.distance = DISTANCE_INFINITE;

        let mut probe = Message::internal(BROADCAST_ID, InternalType::FindParent);
        probe.sender = self.node_id;
        probe.last_node = self.node_id;
        if let Ok(frame) = wire::encode(&probe) {
            let broadcast = self.config.radio_address(BROADCAST_ID);
            self.transport.send(broadcast, &frame, false);
            self.metrics.sent += 1;
        }

        let deadline = self.clock.now() + self.config.parent_listen_window;
        let mut best: Option<(u8, u8)> = None;
        while self.clock.now() < deadline {
            match self.transport.receive() {
                Some(rx) => {
                    let Ok(msg) = wire::decode(&rx.data) else {
                        continue;
                    };
                    let Some(distance) = offered_distance(&msg, self.node_id) else {
                        continue;
                    };
                    trace_event!(
                        self,
                        crate::debug::DebugEvent::ParentReply {
                            id: msg.sender,
                            distance
                        }
                    );
                    // Strictly-less, so the first responder wins ties.
                    if best.map_or(true, |(_, d)| distance < d) {
                        best = Some((msg.sender, distance));
                    }
                }
                None => self.clock.delay(self.config.poll_interval),
            }
        }

        match best {
            Some((parent, distance)) => {
                self.parent = parent;
                self.distance = distance + 1;
                self.parent_failures = 0;
                self.store_identity();
                trace_event!(
                    self,
                    crate::debug::DebugEvent::ParentSelected {
                        id: parent,
                        distance: self.distance
                    }
                );
                Ok(())
            }
            None => {
                trace_event!(self, crate::debug::DebugEvent::ParentSearchFailed);
                Err(Error::AssignmentTimeout)
            }
        }
    }

    /// Answer a neighbor's parent search with this node's distance.
    /// Only relays with a live path to the gateway respond.
    pub(crate) fn answer_parent_search(&mut self, requester: u8) {
        if !self.relay {
            return;
        }
        if self.node_id == AUTO_ID || self.distance == DISTANCE_INFINITE {
            return;
        }
        if requester == BROADCAST_ID || requester == self.node_id {
            return;
        }

        let mut offer = Message::internal(requester, InternalType::FindParentResponse)
            .with_payload(&[self.distance]);
        offer.sender = self.node_id;
        offer.last_node = self.node_id;
        if let Ok(frame) = wire::encode(&offer) {
            // One hop by definition; no link ack.
            self.transport
                .send(self.config.radio_address(requester), &frame, false);
            self.metrics.sent += 1;
        }
    }

    /// Account one failed send on the parent link. At the configured
    /// budget the counter resets and a single parent search runs.
    pub(crate) fn note_parent_send_failure(&mut self) {
        self.parent_failures = self.parent_failures.saturating_add(1);
        if self.parent_failures >= self.config.search_failures {
            self.parent_failures = 0;
            let _ = self.find_parent();
        }
    }
}

/// Extract the assigned id from an id response, if that is what this is.
pub(crate) fn assigned_id(msg: &Message) -> Option<u8> {
    if !msg.is_internal(InternalType::IdResponse) {
        return None;
    }
    let id = *msg.payload.first()?;
    (1..=MAX_NODE_ID).contains(&id).then_some(id)
}

/// Extract the offered distance from a parent-search response. Offers
/// at the maximum representable depth are unusable (the child would sit
/// beyond it) and treated as absent.
fn offered_distance(msg: &Message, own_id: u8) -> Option<u8> {
    if !msg.is_internal(InternalType::FindParentResponse) {
        return None;
    }
    if msg.sender == own_id {
        return None;
    }
    let distance = *msg.payload.first()?;
    (distance < DISTANCE_INFINITE - 1).then_some(distance)
}
