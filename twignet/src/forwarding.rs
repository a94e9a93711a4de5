//! The receive tick and the routed send path.
//!
//! One `process` call handles at most one frame: validate, learn the
//! route it rode in on, then deliver locally or relay. Sends resolve a
//! single hop (child route, else parent) and hand the frame to
//! `send_write`, the only place frames are retried.

use crate::discovery::assigned_id;
use crate::node::Node;
use crate::time::Duration;
use crate::traits::{AppHandler, Clock, Random, Storage, Transport};
use crate::types::{
    Command, ControllerConfig, Error, InternalType, Message, AUTO_ID, BROADCAST_ID,
    FRAME_SIZE, GATEWAY_ID, MAX_PAYLOAD,
};
use crate::wire;

impl<T: Transport, S: Storage, C: Clock, R: Random> Node<T, S, C, R> {
    /// Handle one buffered frame, if any. Returns whether a message was
    /// delivered to the application.
    ///
    /// Call this once per loop iteration; it never blocks on an empty
    /// transport.
    pub fn process<H: AppHandler>(&mut self, app: &mut H) -> bool {
        let Some(rx) = self.transport.receive() else {
            return false;
        };
        let msg = match wire::decode(&rx.data) {
            Ok(msg) => msg,
            Err(_) => {
                trace_event!(
                    self,
                    crate::debug::DebugEvent::DecodeFailed { len: rx.data.len() }
                );
                self.metrics.dropped += 1;
                return false;
            }
        };
        self.metrics.received += 1;

        if self.node_id == AUTO_ID {
            // Before assignment only an id response matters; it may
            // arrive long after the request window closed.
            if let Some(id) = assigned_id(&msg) {
                self.adopt_id(id);
            }
            return false;
        }

        self.rx = msg;
        let (sender, hop, destination) = (self.rx.sender, self.rx.last_node, self.rx.destination);
        if destination != BROADCAST_ID {
            self.learn_route(sender, hop);
        }

        if destination == self.node_id || destination == BROADCAST_ID {
            return self.deliver_local(app);
        }
        if self.relay {
            self.relay_onward();
        } else {
            trace_event!(self, crate::debug::DebugEvent::DroppedNotRelay { destination });
            self.metrics.dropped += 1;
        }
        false
    }

    /// Send an application message. Fills in the origin fields, then
    /// routes it like any relayed frame. With `echo` set the receiver
    /// answers with a [`Command::Ack`] copy, surfaced via `on_ack`.
    pub fn send(&mut self, msg: &mut Message, echo: bool) -> Result<(), Error> {
        if self.node_id == AUTO_ID {
            return Err(Error::NotAssigned);
        }
        if msg.payload.len() > MAX_PAYLOAD {
            return Err(Error::PayloadTooLarge);
        }
        msg.sender = self.node_id;
        msg.echo_request = echo;
        self.send_routed(msg.clone())
    }

    /// Route one message out of this node, stamping it as the last hop.
    fn send_routed(&mut self, mut msg: Message) -> Result<(), Error> {
        msg.last_node = self.node_id;
        if msg.destination == BROADCAST_ID {
            let frame = wire::encode(&msg)?;
            let broadcast = self.config.radio_address(BROADCAST_ID);
            self.transport.send(broadcast, &frame, false);
            self.metrics.sent += 1;
            return Ok(());
        }
        let (hop, parent_link) = self.resolve_hop(msg.destination)?;
        let frame = wire::encode(&msg)?;
        self.send_write(hop, &frame, parent_link)
    }

    /// Next hop for a destination: a learned child route when relaying,
    /// else the parent (convergecast default).
    fn resolve_hop(&self, destination: u8) -> Result<(u8, bool), Error> {
        if self.relay {
            if let Some(hop) = self.routes.lookup(destination) {
                return Ok((hop, false));
            }
        }
        match self.parent() {
            Some(parent) => Ok((parent, true)),
            None => Err(Error::NoRoute),
        }
    }

    /// Transmit one frame to one hop with the local retry budget:
    /// exponential backoff doubled per attempt, plus jitter so
    /// colliding neighbors separate. The re-parenting counter tracks
    /// *consecutive* parent-link failures: every acked parent send
    /// zeroes it, every exhausted one feeds it.
    pub(crate) fn send_write(
        &mut self,
        hop: u8,
        frame: &[u8; FRAME_SIZE],
        parent_link: bool,
    ) -> Result<(), Error> {
        let addr = self.config.radio_address(hop);
        let attempts = self.config.send_retries.max(1);
        for attempt in 0..attempts {
            if self.transport.send(addr, frame, true) {
                self.metrics.sent += 1;
                if parent_link {
                    self.parent_failures = 0;
                }
                return Ok(());
            }
            if attempt + 1 < attempts {
                let backoff = self.config.retry_backoff.as_millis() << attempt;
                let jitter = self.random.gen_range(0, backoff.max(1));
                self.clock.delay(Duration::from_millis(backoff + jitter));
            }
        }
        self.metrics.tx_failures += 1;
        trace_event!(
            self,
            crate::debug::DebugEvent::TransmitFailed { to: hop, parent_link }
        );
        if parent_link {
            self.note_parent_send_failure();
        }
        Err(Error::TransmitFailure)
    }

    /// Learn that `sender` is reachable via the direct neighbor `hop`.
    /// Only traffic climbing through us teaches child routes; frames
    /// arriving on the parent link describe ancestors, not descendants.
    fn learn_route(&mut self, sender: u8, hop: u8) {
        if !self.relay {
            return;
        }
        if sender == self.node_id || sender == GATEWAY_ID {
            return;
        }
        if sender == BROADCAST_ID || hop == BROADCAST_ID {
            return;
        }
        if self.parent() == Some(hop) {
            return;
        }
        if self.routes.learn(sender, hop) {
            self.store_route(sender);
            trace_event!(
                self,
                crate::debug::DebugEvent::RouteLearned { child: sender, hop }
            );
        }
    }

    /// Deliver the buffered message to this node.
    fn deliver_local<H: AppHandler>(&mut self, app: &mut H) -> bool {
        if self.rx.command == Command::Internal {
            match InternalType::from_wire(self.rx.sub_type) {
                Some(InternalType::FindParent) => {
                    let requester = self.rx.sender;
                    self.answer_parent_search(requester);
                    return false;
                }
                // Replies to windows that already closed.
                Some(InternalType::FindParentResponse) => return false,
                Some(InternalType::IdResponse) => return false,
                Some(InternalType::Config) => {
                    if let Some(&byte) = self.rx.payload.first() {
                        self.controller = ControllerConfig::from_byte(byte);
                        self.store_controller();
                    }
                    // The application may care about unit changes too.
                }
                Some(InternalType::TimeResponse) => {
                    if let [a, b, c, d, ..] = self.rx.payload[..] {
                        app.on_time(u32::from_le_bytes([a, b, c, d]));
                        return true;
                    }
                    return false;
                }
                _ => {}
            }
        }

        if self.rx.echo_request
            && self.rx.destination == self.node_id
            && self.rx.command != Command::Ack
        {
            self.send_echo();
        }

        trace_event!(
            self,
            crate::debug::DebugEvent::Delivered {
                sender: self.rx.sender,
                sub_type: self.rx.sub_type
            }
        );
        if self.rx.command == Command::Ack {
            app.on_ack(&self.rx);
        } else {
            app.on_message(&self.rx);
        }
        true
    }

    /// Build and send the echo reply for the buffered message: same
    /// content, [`Command::Ack`] class, back to the origin. Best effort.
    fn send_echo(&mut self) {
        let mut reply = self.rx.clone();
        reply.destination = self.rx.sender;
        reply.sender = self.node_id;
        reply.command = Command::Ack;
        reply.echo_request = false;
        trace_event!(
            self,
            crate::debug::DebugEvent::EchoSent { to: reply.destination }
        );
        self.echo = reply;
        let pending = self.echo.clone();
        let _ = self.send_routed(pending);
    }

    /// Relay the buffered message: down a known child route, else up to
    /// the parent. A failed child forward drops that route (stale); the
    /// next upward message through here re-learns it.
    fn relay_onward(&mut self) {
        let mut forward = self.rx.clone();
        forward.last_node = self.node_id;
        let destination = forward.destination;
        let Ok(frame) = wire::encode(&forward) else {
            // Unreachable for payloads that arrived in one frame.
            return;
        };

        if let Some(hop) = self.routes.lookup(destination) {
            trace_event!(
                self,
                crate::debug::DebugEvent::ForwardedDown { destination, hop }
            );
            self.metrics.forwarded += 1;
            if self.send_write(hop, &frame, false).is_err() && self.routes.forget(destination) {
                self.store_route(destination);
                trace_event!(
                    self,
                    crate::debug::DebugEvent::RouteForgotten { child: destination }
                );
            }
        } else if let Some(parent) = self.parent() {
            trace_event!(
                self,
                crate::debug::DebugEvent::ForwardedUp { destination, parent }
            );
            self.metrics.forwarded += 1;
            let _ = self.send_write(parent, &frame, true);
        } else {
            trace_event!(
                self,
                crate::debug::DebugEvent::DroppedNoParent { destination }
            );
            self.metrics.dropped += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::traits::test_impls::{
        MockClock, MockRandom, MockStorage, MockTransport, RecordingHandler,
    };
    use crate::types::DISTANCE_INFINITE;

    type TestNode = Node<MockTransport, MockStorage, MockClock, MockRandom>;

    fn restored(id: u8, parent: u8, distance: u8, relay: bool) -> TestNode {
        let layout = Config::default().layout;
        let mut storage = MockStorage::new();
        storage.preload(layout.node_id, &[id, parent, distance]);
        let mut node = Node::new(
            MockTransport::new(),
            storage,
            MockClock::new(),
            MockRandom::new(),
            Config::default(),
        );
        node.init(relay, None).unwrap();
        node
    }

    fn incoming(sender: u8, last: u8, destination: u8) -> Message {
        let mut msg = Message::new(destination, 1, Command::Set, 2).with_payload(b"on");
        msg.sender = sender;
        msg.last_node = last;
        msg
    }

    #[test]
    fn test_empty_tick() {
        let mut node = restored(1, GATEWAY_ID, 1, false);
        let mut app = RecordingHandler::new();
        assert!(!node.process(&mut app));
        assert!(app.messages.is_empty());
    }

    #[test]
    fn test_delivery_to_self() {
        let mut node = restored(1, GATEWAY_ID, 1, false);
        let msg = incoming(GATEWAY_ID, GATEWAY_ID, 1);
        node.transport.inject_message(&msg);

        let mut app = RecordingHandler::new();
        assert!(node.process(&mut app));
        assert_eq!(app.messages.len(), 1);
        assert_eq!(app.messages[0].payload, b"on");
        assert_eq!(node.last_message().sender, GATEWAY_ID);
        assert_eq!(node.metrics().received, 1);
    }

    #[test]
    fn test_broadcast_delivery() {
        let mut node = restored(1, GATEWAY_ID, 1, false);
        node.transport.inject_message(&incoming(2, 2, BROADCAST_ID));
        let mut app = RecordingHandler::new();
        assert!(node.process(&mut app));
        assert_eq!(app.messages.len(), 1);
        // Broadcasts are never re-sent.
        assert_eq!(node.transport().sent_count(), 0);
    }

    #[test]
    fn test_corrupt_frame_dropped() {
        let mut node = restored(1, GATEWAY_ID, 1, false);
        let mut frame = wire::encode(&incoming(GATEWAY_ID, GATEWAY_ID, 1)).unwrap();
        frame[4] ^= 0x10;
        node.transport.inject(frame);

        let mut app = RecordingHandler::new();
        assert!(!node.process(&mut app));
        assert!(app.messages.is_empty());
        assert_eq!(node.metrics().dropped, 1);
        assert_eq!(node.metrics().received, 0);
    }

    #[test]
    fn test_leaf_drops_foreign_traffic() {
        let mut node = restored(1, GATEWAY_ID, 1, false);
        node.transport.inject_message(&incoming(5, 5, 9));
        let mut app = RecordingHandler::new();
        assert!(!node.process(&mut app));
        assert!(app.messages.is_empty());
        assert_eq!(node.transport().sent_count(), 0);
        assert_eq!(node.metrics().dropped, 1);
    }

    #[test]
    fn test_relay_learns_and_forwards_up() {
        let mut relay = restored(1, GATEWAY_ID, 1, true);
        // From node 5, directly (hop == sender), climbing to node 9.
        relay.transport.inject_message(&incoming(5, 5, 9));
        let mut app = RecordingHandler::new();
        assert!(!relay.process(&mut app));

        assert_eq!(relay.routes().lookup(5), Some(5));
        let layout = relay.config().layout;
        assert_eq!(relay.storage.read_byte(layout.route_slot(5)), 5);

        // Destination 9 is unknown, so the frame went to the parent.
        let sent = relay.transport_mut().take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].addr, relay.config().radio_address(GATEWAY_ID));
        assert!(sent[0].want_ack);
        let fwd = sent[0].message().unwrap();
        assert_eq!(fwd.sender, 5);
        assert_eq!(fwd.last_node, 1);
        assert_eq!(fwd.destination, 9);
        assert_eq!(relay.metrics().forwarded, 1);
    }

    #[test]
    fn test_relay_forwards_down_known_route() {
        let mut relay = restored(1, GATEWAY_ID, 1, true);
        relay.transport.inject_message(&incoming(5, 5, GATEWAY_ID));
        let mut app = RecordingHandler::new();
        relay.process(&mut app);
        relay.transport_mut().take_sent();

        // Downward traffic from the gateway to the learned child.
        relay.transport.inject_message(&incoming(GATEWAY_ID, GATEWAY_ID, 5));
        relay.process(&mut app);
        let sent = relay.transport_mut().take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].addr, relay.config().radio_address(5));
        assert_eq!(sent[0].message().unwrap().last_node, 1);
    }

    #[test]
    fn test_learning_guards() {
        let mut relay = restored(1, GATEWAY_ID, 1, true);
        let mut app = RecordingHandler::new();

        // Traffic arriving on the parent link teaches nothing.
        relay.transport.inject_message(&incoming(9, GATEWAY_ID, 1));
        relay.process(&mut app);
        assert_eq!(relay.routes().lookup(9), None);

        // The gateway is never a descendant.
        relay.transport.inject_message(&incoming(GATEWAY_ID, 3, 1));
        relay.process(&mut app);
        assert_eq!(relay.routes().lookup(GATEWAY_ID), None);

        // Broadcast frames teach nothing either.
        relay.transport.inject_message(&incoming(7, 7, BROADCAST_ID));
        relay.process(&mut app);
        assert_eq!(relay.routes().lookup(7), None);
    }

    #[test]
    fn test_stale_child_route_forgotten() {
        let mut relay = restored(1, GATEWAY_ID, 1, true);
        let mut app = RecordingHandler::new();
        relay.transport.inject_message(&incoming(5, 5, GATEWAY_ID));
        relay.process(&mut app);
        assert_eq!(relay.routes().lookup(5), Some(5));

        // The child went away; the forward fails and the route goes.
        relay.transport_mut().set_default_ack(false);
        relay.transport.inject_message(&incoming(GATEWAY_ID, GATEWAY_ID, 5));
        relay.process(&mut app);
        assert_eq!(relay.routes().lookup(5), None);
        let layout = relay.config().layout;
        assert_eq!(relay.storage.read_byte(layout.route_slot(5)), 0xFF);
        // Child-link failures never feed the parent counter.
        assert_eq!(relay.parent_failures, 0);
        assert_eq!(relay.parent(), Some(GATEWAY_ID));
    }

    #[test]
    fn test_echo_reply() {
        let mut node = restored(1, GATEWAY_ID, 1, false);
        let mut msg = incoming(GATEWAY_ID, GATEWAY_ID, 1);
        msg.echo_request = true;
        node.transport.inject_message(&msg);

        let mut app = RecordingHandler::new();
        assert!(node.process(&mut app));
        assert_eq!(app.messages.len(), 1);

        let sent = node.transport_mut().take_sent();
        assert_eq!(sent.len(), 1);
        let echo = sent[0].message().unwrap();
        assert_eq!(echo.command, Command::Ack);
        assert_eq!(echo.destination, GATEWAY_ID);
        assert_eq!(echo.sender, 1);
        assert!(!echo.echo_request);
        assert_eq!(echo.sub_type, msg.sub_type);
        assert_eq!(echo.payload, msg.payload);
    }

    #[test]
    fn test_ack_dispatched_to_on_ack() {
        let mut node = restored(1, GATEWAY_ID, 1, false);
        let mut ack = incoming(GATEWAY_ID, GATEWAY_ID, 1);
        ack.command = Command::Ack;
        node.transport.inject_message(&ack);

        let mut app = RecordingHandler::new();
        assert!(node.process(&mut app));
        assert!(app.messages.is_empty());
        assert_eq!(app.acks.len(), 1);
        // Acks are never echoed back.
        assert_eq!(node.transport().sent_count(), 0);
    }

    #[test]
    fn test_time_response() {
        let mut node = restored(1, GATEWAY_ID, 1, false);
        let mut msg = Message::internal(1, InternalType::TimeResponse)
            .with_payload(&1_700_000_000u32.to_le_bytes());
        msg.sender = GATEWAY_ID;
        msg.last_node = GATEWAY_ID;
        node.transport.inject_message(&msg);

        let mut app = RecordingHandler::new();
        assert!(node.process(&mut app));
        assert_eq!(app.times, [1_700_000_000]);
        assert!(app.messages.is_empty());
    }

    #[test]
    fn test_controller_config_applied() {
        let mut node = restored(1, GATEWAY_ID, 1, false);
        assert!(!node.controller_config().is_metric);

        let mut msg = Message::internal(1, InternalType::Config).with_payload(&[1]);
        msg.sender = GATEWAY_ID;
        msg.last_node = GATEWAY_ID;
        node.transport.inject_message(&msg);

        let mut app = RecordingHandler::new();
        assert!(node.process(&mut app));
        assert!(node.controller_config().is_metric);
        let layout = node.config().layout;
        assert_eq!(node.storage.read_byte(layout.controller), 1);
    }

    #[test]
    fn test_unassigned_gating() {
        let mut node = Node::new(
            MockTransport::new(),
            MockStorage::new(),
            MockClock::new(),
            MockRandom::new(),
            Config::default(),
        );
        // Skip init; the node has no id and must ignore normal traffic.
        let mut app = RecordingHandler::new();
        node.transport.inject_message(&incoming(GATEWAY_ID, GATEWAY_ID, BROADCAST_ID));
        assert!(!node.process(&mut app));
        assert!(app.messages.is_empty());

        // Sending is refused outright.
        let mut msg = incoming(GATEWAY_ID, GATEWAY_ID, GATEWAY_ID);
        assert_eq!(node.send(&mut msg, false), Err(Error::NotAssigned));

        // A late id response completes assignment from the tick.
        let mut response = Message::internal(BROADCAST_ID, InternalType::IdResponse)
            .with_payload(&[8]);
        response.sender = GATEWAY_ID;
        response.last_node = GATEWAY_ID;
        node.transport.inject_message(&response);
        assert!(!node.process(&mut app));
        assert_eq!(node.node_id(), 8);
    }

    #[test]
    fn test_send_without_parent() {
        let mut node = restored(1, AUTO_ID, DISTANCE_INFINITE, false);
        let mut msg = Message::new(GATEWAY_ID, 1, Command::Set, 2);
        assert_eq!(node.send(&mut msg, false), Err(Error::NoRoute));
    }

    #[test]
    fn test_send_oversized_payload() {
        let mut node = restored(1, GATEWAY_ID, 1, false);
        let mut msg =
            Message::new(GATEWAY_ID, 1, Command::Set, 2).with_payload(&[0; MAX_PAYLOAD + 1]);
        assert_eq!(node.send(&mut msg, false), Err(Error::PayloadTooLarge));
        assert_eq!(node.transport().sent_count(), 0);
    }

    #[test]
    fn test_send_write_retries_until_ack() {
        let mut node = restored(1, GATEWAY_ID, 1, false);
        node.transport_mut().script_ack(false);
        node.transport_mut().script_ack(true);

        let mut msg = Message::new(GATEWAY_ID, 1, Command::Set, 2);
        node.send(&mut msg, false).unwrap();
        let sent = node.transport_mut().take_sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(node.metrics().tx_failures, 0);
        // The failed attempt backed off through the clock.
        assert!(node.clock.now() > crate::time::Timestamp::ZERO);
    }

    #[test]
    fn test_send_write_exhausts_budget() {
        let mut node = restored(1, GATEWAY_ID, 1, false);
        node.transport_mut().set_default_ack(false);
        let attempts = node.config().send_retries as usize;

        let mut msg = Message::new(GATEWAY_ID, 1, Command::Set, 2);
        assert_eq!(node.send(&mut msg, false), Err(Error::TransmitFailure));
        assert_eq!(node.transport_mut().take_sent().len(), attempts);
        assert_eq!(node.metrics().tx_failures, 1);
        assert_eq!(node.parent_failures, 1);
    }

    #[test]
    fn test_acked_parent_send_resets_failure_streak() {
        let mut node = restored(1, GATEWAY_ID, 1, false);
        node.transport_mut().set_default_ack(false);
        let budget = node.config().search_failures;

        // One short of the budget.
        let mut msg = Message::new(GATEWAY_ID, 1, Command::Set, 2);
        for _ in 0..budget - 1 {
            assert_eq!(node.send(&mut msg.clone(), false), Err(Error::TransmitFailure));
        }
        assert_eq!(node.parent_failures, budget - 1);

        // A single acked send wipes the streak; the failures were not
        // consecutive, so no search may fire on the next one.
        node.transport_mut().script_ack(true);
        node.send(&mut msg.clone(), false).unwrap();
        assert_eq!(node.parent_failures, 0);

        node.transport_mut().take_sent();
        assert_eq!(node.send(&mut msg, false), Err(Error::TransmitFailure));
        assert_eq!(node.parent_failures, 1);
        assert_eq!(node.parent(), Some(GATEWAY_ID));
        let searched = node
            .transport_mut()
            .take_sent()
            .iter()
            .any(|f| {
                f.message()
                    .map(|m| m.is_internal(InternalType::FindParent))
                    .unwrap_or(false)
            });
        assert!(!searched);
    }

    #[test]
    fn test_relay_answers_parent_search() {
        let mut relay = restored(1, GATEWAY_ID, 1, true);
        let mut probe = Message::internal(BROADCAST_ID, InternalType::FindParent);
        probe.sender = 9;
        probe.last_node = 9;
        relay.transport.inject_message(&probe);

        let mut app = RecordingHandler::new();
        // Protocol housekeeping, not an application delivery.
        assert!(!relay.process(&mut app));
        assert!(app.messages.is_empty());

        let sent = relay.transport_mut().take_sent();
        assert_eq!(sent.len(), 1);
        let offer = sent[0].message().unwrap();
        assert!(offer.is_internal(InternalType::FindParentResponse));
        assert_eq!(offer.destination, 9);
        assert_eq!(offer.payload, [1]);
    }
}
