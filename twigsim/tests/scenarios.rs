//! End-to-end network scenarios: bring-up, routed traffic, healing.

use twigsim::Simulator;
use twignet::{Command, Error, InternalType, Message, BROADCAST_ID, GATEWAY_ID};

/// Gateway - relay - leaf in a chain; only neighbors hear each other.
fn three_hop() -> (Simulator, usize, usize, usize) {
    let mut sim = Simulator::new(42);
    let gw = sim.add_node();
    let relay = sim.add_node();
    let leaf = sim.add_node();
    sim.connect(gw, relay);
    sim.connect(relay, leaf);

    sim.init_node(gw, true, Some(GATEWAY_ID)).unwrap();
    sim.init_node(relay, true, Some(1)).unwrap();
    sim.init_node(leaf, false, Some(2)).unwrap();
    (sim, gw, relay, leaf)
}

#[test]
fn test_chain_bring_up() {
    let (sim, _gw, relay, leaf) = three_hop();

    assert_eq!(sim.parent(relay), Some(GATEWAY_ID));
    assert_eq!(sim.distance(relay), Some(1));
    // The leaf cannot hear the gateway, so it settles one hop deeper.
    assert_eq!(sim.parent(leaf), Some(1));
    assert_eq!(sim.distance(leaf), Some(2));
}

#[test]
fn test_uplink_learns_routes() {
    let (sim, gw, relay, leaf) = three_hop();

    let mut report = Message::new(GATEWAY_ID, 3, Command::Set, 0).with_payload(b"21.5");
    sim.send_from(leaf, &mut report, false).unwrap();

    let inbox = sim.received(gw);
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].sender, 2);
    assert_eq!(inbox[0].last_node, 1);
    assert_eq!(inbox[0].payload, b"21.5");

    // Both hops on the path now know where node 2 lives.
    assert_eq!(sim.with_node(relay, |n| n.node().routes().lookup(2)), Some(2));
    assert_eq!(sim.with_node(gw, |n| n.node().routes().lookup(2)), Some(1));
}

#[test]
fn test_downlink_follows_learned_routes() {
    let (sim, gw, _relay, leaf) = three_hop();

    // One uplink primes the route tables.
    let mut report = Message::new(GATEWAY_ID, 3, Command::Set, 0);
    sim.send_from(leaf, &mut report, false).unwrap();

    let mut command = Message::new(2, 3, Command::Set, 1).with_payload(b"off");
    sim.send_from(gw, &mut command, false).unwrap();

    let inbox = sim.received(leaf);
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].sender, GATEWAY_ID);
    assert_eq!(inbox[0].payload, b"off");
}

#[test]
fn test_echo_returns_across_relay() {
    let (sim, gw, _relay, leaf) = three_hop();

    let mut report = Message::new(GATEWAY_ID, 3, Command::Set, 0).with_payload(b"7");
    sim.send_from(leaf, &mut report, true).unwrap();

    assert_eq!(sim.received(gw).len(), 1);
    let acks = sim.with_node(leaf, |n| n.recorder().acks.clone());
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0].command, Command::Ack);
    assert_eq!(acks[0].payload, b"7");
}

#[test]
fn test_broadcast_stays_one_hop() {
    let (sim, gw, relay, leaf) = three_hop();

    let mut ping = Message::new(BROADCAST_ID, 3, Command::Set, 0).with_payload(b"hi");
    sim.send_from(leaf, &mut ping, false).unwrap();

    // Broadcasts are delivered to direct neighbors and not re-flooded.
    assert_eq!(sim.received(relay).len(), 1);
    assert!(sim.received(gw).is_empty());
}

#[test]
fn test_parent_failover_to_second_relay() {
    let mut sim = Simulator::new(42);
    let gw = sim.add_node();
    let relay_a = sim.add_node();
    let relay_b = sim.add_node();
    let leaf = sim.add_node();
    sim.connect(gw, relay_a);
    sim.connect(gw, relay_b);
    sim.connect(relay_a, leaf);
    sim.connect(relay_b, leaf);

    sim.init_node(gw, true, Some(GATEWAY_ID)).unwrap();
    sim.init_node(relay_a, true, Some(1)).unwrap();
    sim.init_node(relay_b, true, Some(2)).unwrap();
    sim.init_node(leaf, false, Some(10)).unwrap();

    // Both relays offer distance 1; the first answer wins.
    assert_eq!(sim.parent(leaf), Some(1));
    assert_eq!(sim.distance(leaf), Some(2));

    // The chosen relay dies. The next sends fail until the failure
    // budget triggers a new search, which lands on the survivor.
    sim.disconnect(relay_a, leaf);
    let failures = sim.with_node(leaf, |n| n.node().config().search_failures);
    for _ in 0..failures {
        let mut report = Message::new(GATEWAY_ID, 3, Command::Set, 0);
        assert_eq!(
            sim.send_from(leaf, &mut report, false),
            Err(Error::TransmitFailure)
        );
    }
    assert_eq!(sim.parent(leaf), Some(2));
    assert_eq!(sim.distance(leaf), Some(2));

    // Traffic flows again over the new path.
    let mut report = Message::new(GATEWAY_ID, 3, Command::Set, 0).with_payload(b"alive");
    sim.send_from(leaf, &mut report, false).unwrap();
    let inbox = sim.received(gw);
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].sender, 10);
    assert_eq!(inbox[0].last_node, 2);
}

#[test]
fn test_id_assignment_over_the_air() {
    let mut sim = Simulator::new(42);
    let gw = sim.add_node();
    let newcomer = sim.add_node();
    sim.connect(gw, newcomer);

    sim.init_node(gw, true, Some(GATEWAY_ID)).unwrap();

    // Nobody answers during the request window, but the requests reach
    // the gateway's application, which owns id allocation.
    assert_eq!(
        sim.init_node(newcomer, false, None),
        Err(Error::AssignmentTimeout)
    );
    let requests = sim.received(gw);
    assert!(!requests.is_empty());
    assert!(requests[0].is_internal(InternalType::IdRequest));

    // A late broadcast response still gets adopted.
    let mut grant = Message::internal(BROADCAST_ID, InternalType::IdResponse).with_payload(&[7]);
    sim.send_from(gw, &mut grant, false).unwrap();
    assert_eq!(sim.node_id(newcomer), 7);

    // Second boot finds the persisted id and joins the tree.
    sim.init_node(newcomer, false, None).unwrap();
    assert_eq!(sim.parent(newcomer), Some(GATEWAY_ID));
    assert_eq!(sim.distance(newcomer), Some(1));
}

#[test]
fn test_total_loss_exhausts_retries() {
    let mut sim = Simulator::new(42);
    let gw = sim.add_node();
    let leaf = sim.add_node();
    sim.connect(gw, leaf);
    sim.init_node(gw, true, Some(GATEWAY_ID)).unwrap();
    sim.init_node(leaf, false, Some(3)).unwrap();

    sim.with_topology(|t| t.set_loss_rate(1.0));
    let mut report = Message::new(GATEWAY_ID, 3, Command::Set, 0);
    assert_eq!(
        sim.send_from(leaf, &mut report, false),
        Err(Error::TransmitFailure)
    );

    let metrics = sim.metrics();
    assert!(metrics.frames_lost >= 3);
    assert!(sim.received(gw).is_empty());
    assert!(metrics.delivery_rate() < 1.0);
}

#[test]
fn test_star_of_leaves() {
    let mut sim = Simulator::new(42);
    let gw = sim.add_node();
    let mut leaves = Vec::new();
    for id in 1..=5u8 {
        let port = sim.add_node();
        sim.connect(gw, port);
        leaves.push((port, id));
    }

    sim.init_node(gw, true, Some(GATEWAY_ID)).unwrap();
    for &(port, id) in &leaves {
        sim.init_node(port, false, Some(id)).unwrap();
        assert_eq!(sim.parent(port), Some(GATEWAY_ID));
        assert_eq!(sim.distance(port), Some(1));
    }

    for &(port, id) in &leaves {
        let mut report =
            Message::new(GATEWAY_ID, 0, Command::Set, 0).with_payload(&[id]);
        sim.send_from(port, &mut report, false).unwrap();
    }
    let inbox = sim.received(gw);
    assert_eq!(inbox.len(), 5);
    for (i, &(_, id)) in leaves.iter().enumerate() {
        assert_eq!(inbox[i].sender, id);
        assert_eq!(inbox[i].payload, [id]);
    }

    // Every leaf went straight to the gateway, nothing was relayed.
    assert_eq!(sim.metrics().frames_unroutable, 0);
}
