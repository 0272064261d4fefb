//! End-to-end gossip scenarios over the simulated network

use std::time::Duration;

use murmur_core::{MurmurError, SeqNo};
use murmur_runtime::{NodeConfig, NodeEvent};
use murmur_test::{ChaosConfig, NetworkSimulator, NodeIndex};
use proptest::prelude::*;

const TICK: Duration = Duration::from_millis(50);

fn config(origin: &str, seed: u64) -> NodeConfig {
    NodeConfig::default()
        .with_origin(origin)
        .with_seed(seed)
        .with_announce_on_start(false)
}

fn line(sim: &mut NetworkSimulator, names: &[&str]) -> Vec<NodeIndex> {
    let nodes: Vec<_> = names
        .iter()
        .enumerate()
        .map(|(i, name)| sim.add_node(config(name, 100 + i as u64)))
        .collect();
    for pair in nodes.windows(2) {
        sim.connect_both(pair[0], pair[1]);
    }
    nodes
}

#[test]
fn single_message_reaches_neighbor() {
    let mut sim = NetworkSimulator::perfect();
    let a = sim.add_node(config("A", 1));
    let b = sim.add_node(config("B", 2));
    sim.connect(a, b);

    let rumor = sim.submit(a, "hi").unwrap();
    assert_eq!(rumor.seq, SeqNo::FIRST);
    assert_eq!(sim.status(a).get("A"), Some(SeqNo::new(2)));

    sim.run_for(Duration::from_millis(200), TICK);

    assert_eq!(sim.status(b).get("A"), Some(SeqNo::new(2)));
    let entry = sim.dispatcher(b).routes().entry("A").unwrap();
    assert_eq!(entry.next_hop, sim.addr(a));
    assert!(entry.direct);
}

#[test]
fn route_through_middle_node_is_indirect() {
    let mut sim = NetworkSimulator::perfect();
    let nodes = line(&mut sim, &["A", "B", "C"]);
    let (a, b, c) = (nodes[0], nodes[1], nodes[2]);

    sim.announce(a);
    let reached = sim.run_until(Duration::from_secs(50), TICK, |sim| {
        sim.dispatcher(c).routes().entry("A").is_some()
    });
    assert!(reached);

    let at_b = sim.dispatcher(b).routes().entry("A").unwrap();
    assert_eq!(at_b.next_hop, sim.addr(a));
    assert!(at_b.direct);

    let at_c = sim.dispatcher(c).routes().entry("A").unwrap();
    assert_eq!(at_c.next_hop, sim.addr(b));
    assert!(!at_c.direct);

    // C picked up A's address from the relayed rumor
    assert!(sim.dispatcher(c).neighbors().contains(&sim.addr(a)));
}

#[test]
fn private_chat_relayed_along_route() {
    let mut sim = NetworkSimulator::perfect();
    let nodes = line(&mut sim, &["A", "B", "C"]);
    let (a, b, c) = (nodes[0], nodes[1], nodes[2]);

    assert!(!sim.private_chat(c, "A", "too early"));

    sim.announce(a);
    assert!(sim.run_until(Duration::from_secs(50), TICK, |sim| {
        sim.dispatcher(c).routes().lookup("A").is_some()
    }));
    assert!(sim.private_chat(c, "A", "psst"));
    sim.run_for(Duration::from_millis(200), TICK);

    let delivered: Vec<_> = sim
        .events(a)
        .iter()
        .filter_map(|e| match e {
            NodeEvent::PayloadDelivered { payload, from } => Some((payload, *from)),
            _ => None,
        })
        .collect();
    assert_eq!(delivered.len(), 1);
    let (payload, from) = delivered[0];
    assert_eq!(from, sim.addr(b));
    assert_eq!(payload.chat_text(), Some("psst"));
    assert_eq!(payload.origin.as_ref().map(|o| o.as_str()), Some("C"));
    assert_eq!(payload.hop_limit, 9);
}

#[test]
fn lossy_ring_converges_through_anti_entropy() {
    let mut sim = NetworkSimulator::new(ChaosConfig::lossy(0.25), 42);
    let names = ["A", "B", "C", "D", "E", "F"];
    let nodes = line(&mut sim, &names);
    sim.connect_both(nodes[nodes.len() - 1], nodes[0]);

    for &node in &nodes {
        for i in 0..3 {
            sim.submit(node, &format!("message {i}")).unwrap();
        }
    }

    let all_delivered = |sim: &NetworkSimulator| {
        nodes.iter().all(|&node| {
            let status = sim.status(node);
            names
                .iter()
                .all(|name| status.get(name).map_or(false, |next| next.value() >= 4))
        })
    };
    assert!(sim.run_until(Duration::from_secs(20 * 60), TICK, all_delivered));

    for &node in &nodes {
        assert_eq!(sim.dispatcher(node).routes().len(), names.len() - 1);
    }
}

#[test]
fn noforward_node_does_not_relay_chat() {
    let mut sim = NetworkSimulator::perfect();
    let quiet = |origin: &str, seed| config(origin, seed).with_route_rumor_interval(Duration::from_secs(3600));
    let a = sim.add_node(quiet("A", 1));
    let b = sim.add_node(quiet("B", 2).with_forwarding(false));
    let c = sim.add_node(quiet("C", 3));
    sim.connect_both(a, b);
    sim.connect_both(b, c);

    sim.submit(a, "for B only").unwrap();
    sim.run_for(Duration::from_secs(120), TICK);

    assert_eq!(sim.status(b).get("A"), Some(SeqNo::new(2)));
    assert_eq!(sim.status(c).get("A"), None);

    // B's own messages still go out
    sim.submit(b, "from B").unwrap();
    sim.run_for(Duration::from_secs(30), TICK);
    assert_eq!(sim.status(c).get("B"), Some(SeqNo::new(2)));
}

#[test]
fn severed_link_heals_through_other_path() {
    let mut sim = NetworkSimulator::perfect();
    let nodes = line(&mut sim, &["A", "B", "C"]);
    let (a, b, c) = (nodes[0], nodes[1], nodes[2]);
    sim.connect_both(a, c);
    sim.set_link_config(a, b, ChaosConfig::severed());
    sim.set_link_config(b, a, ChaosConfig::severed());

    sim.submit(a, "around").unwrap();
    assert!(sim.run_until(Duration::from_secs(120), TICK, |sim| {
        sim.status(b).get("A") == Some(SeqNo::new(2))
    }));
    let entry = sim.dispatcher(b).routes().entry("A").unwrap();
    assert_eq!(entry.next_hop, sim.addr(c));
    assert!(!entry.direct);
}

#[test]
fn oversized_line_does_not_stall_later_messages() {
    let mut sim = NetworkSimulator::perfect();
    let a = sim.add_node(config("A", 1));
    let b = sim.add_node(config("B", 2));
    sim.connect_both(a, b);

    assert!(matches!(
        sim.submit(a, &"x".repeat(9000)),
        Err(MurmurError::DatagramTooLarge { .. })
    ));
    let rumor = sim.submit(a, "small follow-up").unwrap();
    assert_eq!(rumor.seq, SeqNo::FIRST);

    assert!(sim.run_until(Duration::from_secs(60), TICK, |sim| {
        sim.status(b).get("A") == Some(SeqNo::new(2))
    }));
    assert!(sim
        .events(b)
        .iter()
        .any(|e| e.chat().map(|(_, body)| body) == Some("small follow-up")));
}

#[test]
fn same_seeds_same_history() {
    let run = || {
        let mut sim = NetworkSimulator::new(ChaosConfig::lossy(0.2), 9);
        let nodes = line(&mut sim, &["A", "B", "C", "D"]);
        sim.submit(nodes[0], "one").unwrap();
        sim.submit(nodes[3], "two").unwrap();
        sim.run_for(Duration::from_secs(90), TICK);
        nodes
            .iter()
            .map(|&n| (sim.status(n), sim.events(n).len(), sim.dispatcher(n).stats().datagrams_in))
            .collect::<Vec<_>>()
    };
    assert_eq!(run(), run());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn message_reaches_every_node_for_any_seed(net_seed in any::<u64>(), node_seed in any::<u64>()) {
        let mut sim = NetworkSimulator::new(ChaosConfig::lossy(0.1), net_seed);
        let names = ["A", "B", "C", "D"];
        let nodes: Vec<_> = names
            .iter()
            .enumerate()
            .map(|(i, name)| sim.add_node(config(name, node_seed.wrapping_add(i as u64))))
            .collect();
        for pair in nodes.windows(2) {
            sim.connect_both(pair[0], pair[1]);
        }

        sim.submit(nodes[0], "hello").unwrap();
        let reached = sim.run_until(Duration::from_secs(10 * 60), TICK, |sim| {
            nodes.iter().all(|&n| sim.status(n).get("A") == Some(SeqNo::new(2)))
        });
        prop_assert!(reached);
    }
}
