// Integration tests for route discovery and repair across several engines
//
// Engines exchange encoded control datagrams over an in-memory radio model:
// a broadcast reaches every linked node, a unicast only the addressed node
// when the link exists. Delivery is FIFO and runs until the mesh is quiet.

use meshroute_core::{
    encode_message, Action, ControlMessage, InterfaceAddress, LinkFeedback, MessageType,
    ProtocolConfig, RepairTier, RoutingError, RoutingProtocol,
};
use std::collections::{BTreeSet, VecDeque};
use std::net::Ipv4Addr;
use std::time::Duration;

const A: usize = 0;
const B: usize = 1;
const C: usize = 2;
const D: usize = 3;
const E: usize = 4;

fn addr(node: usize) -> Ipv4Addr {
    Ipv4Addr::new(10, 0, 0, node as u8 + 1)
}

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

struct Transmission {
    from: usize,
    to: Ipv4Addr,
    message: ControlMessage,
}

struct Mesh {
    nodes: Vec<RoutingProtocol>,
    links: BTreeSet<(usize, usize)>,
    transmissions: Vec<Transmission>,
    events: Vec<(usize, Action)>,
}

impl Mesh {
    fn new(count: usize, links: &[(usize, usize)]) -> Self {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();

        let nodes = (0..count)
            .map(|i| {
                let mut node = RoutingProtocol::new(ProtocolConfig {
                    rng_seed: Some(i as u64 + 1),
                    ..ProtocolConfig::default()
                })
                .unwrap();
                node.on_interface_up(InterfaceAddress::new(1, addr(i), 24), Duration::ZERO);
                node
            })
            .collect();

        let mut mesh = Self {
            nodes,
            links: BTreeSet::new(),
            transmissions: Vec::new(),
            events: Vec::new(),
        };
        for &(a, b) in links {
            mesh.link(a, b);
        }
        mesh
    }

    fn link(&mut self, a: usize, b: usize) {
        self.links.insert((a.min(b), a.max(b)));
    }

    fn unlink(&mut self, a: usize, b: usize) {
        self.links.remove(&(a.min(b), a.max(b)));
    }

    fn linked(&self, a: usize, b: usize) -> bool {
        self.links.contains(&(a.min(b), a.max(b)))
    }

    /// Fire due timers on every node, then deliver until quiet
    fn tick(&mut self, now: Duration) {
        for node in &mut self.nodes {
            node.poll_timers(now);
        }
        self.flush(now);
    }

    fn flush(&mut self, now: Duration) {
        let mut queue = VecDeque::new();
        for i in 0..self.nodes.len() {
            self.collect(i, &mut queue);
        }

        while let Some((to, from, bytes)) = queue.pop_front() {
            let result = self.nodes[to].handle_control_datagram(&bytes, addr(from), 1, now);
            if let Err(e) = result {
                assert!(
                    matches!(e, RoutingError::DuplicateControlMessage { .. }),
                    "node {} rejected a datagram: {}",
                    to,
                    e
                );
            }
            self.collect(to, &mut queue);
        }
    }

    fn collect(&mut self, from: usize, queue: &mut VecDeque<(usize, usize, Vec<u8>)>) {
        for action in self.nodes[from].take_actions() {
            match action {
                Action::Transmit { to, message, .. } => {
                    let bytes = encode_message(&message).to_vec();
                    for receiver in 0..self.nodes.len() {
                        let addressed = to.is_broadcast() || to == addr(receiver);
                        if receiver != from && addressed && self.linked(from, receiver) {
                            queue.push_back((receiver, from, bytes.clone()));
                        }
                    }
                    self.transmissions.push(Transmission { from, to, message });
                }
                other => self.events.push((from, other)),
            }
        }
    }

    fn sent_by(&self, node: usize, kind: MessageType) -> Vec<&Transmission> {
        self.transmissions
            .iter()
            .filter(|t| t.from == node && t.message.message_type == kind)
            .collect()
    }

    fn count(&self, kind: MessageType) -> usize {
        self.transmissions
            .iter()
            .filter(|t| t.message.message_type == kind)
            .count()
    }

    fn forget_traffic(&mut self) {
        self.transmissions.clear();
        self.events.clear();
    }

    fn next_hop(&self, node: usize, destination: usize) -> Option<Ipv4Addr> {
        self.nodes[node]
            .route_table()
            .get(addr(destination))
            .map(|r| r.next_hop)
    }
}

#[test]
fn test_line_discovery_through_relay() {
    // A - B - C, nothing learned yet
    let mut mesh = Mesh::new(3, &[(A, B), (B, C)]);

    let now = ms(10);
    assert_eq!(
        mesh.nodes[A].resolve_outgoing_route(addr(C), now),
        Err(RoutingError::NoRouteAvailable {
            destination: addr(C)
        })
    );
    mesh.flush(now);

    let requests = mesh.sent_by(A, MessageType::Request);
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].to, Ipv4Addr::BROADCAST);
    assert_eq!(requests[0].message.origin, addr(A));
    assert_eq!(requests[0].message.destination, addr(C));

    let relayed = mesh.sent_by(B, MessageType::Request);
    assert_eq!(relayed.len(), 1);
    assert_eq!(relayed[0].message.hop_count, 1);

    let replies = mesh.sent_by(C, MessageType::Reply);
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].to, addr(B));

    let route = mesh.nodes[A].route_table().get(addr(C)).unwrap();
    assert_eq!(route.next_hop, addr(B));
    assert_eq!(route.hop_count, 2);

    let reverse = mesh.nodes[C].route_table().get(addr(A)).unwrap();
    assert_eq!(reverse.next_hop, addr(B));
    assert_eq!(reverse.hop_count, 2);

    assert!(mesh.events.contains(&(
        A,
        Action::RouteFound {
            destination: addr(C),
            next_hop: addr(B)
        }
    )));

    let handle = mesh.nodes[A].resolve_outgoing_route(addr(C), now).unwrap();
    assert_eq!(handle.next_hop, addr(B));
    assert_eq!(handle.source, addr(A));

    let dump = mesh.nodes[A].routing_table_dump(now).to_string();
    assert!(dump.contains("Node: 10.0.0.1"));
    assert!(dump.contains("10.0.0.3"));

    println!("✓ Discovery over a relay installs the route via B");
}

#[test]
fn test_each_node_relays_a_request_once() {
    // Diamond: A - B - C and A - D - C
    let mut mesh = Mesh::new(4, &[(A, B), (B, C), (A, D), (D, C)]);

    let now = ms(10);
    let _ = mesh.nodes[A].resolve_outgoing_route(addr(C), now);
    mesh.flush(now);

    assert_eq!(mesh.sent_by(A, MessageType::Request).len(), 1);
    assert_eq!(mesh.sent_by(B, MessageType::Request).len(), 1);
    assert_eq!(mesh.sent_by(D, MessageType::Request).len(), 1);
    assert!(mesh.sent_by(C, MessageType::Request).is_empty());
    assert_eq!(mesh.count(MessageType::Request), 3);

    let found: Vec<_> = mesh
        .events
        .iter()
        .filter(|(node, action)| *node == A && matches!(action, Action::RouteFound { .. }))
        .collect();
    assert_eq!(found.len(), 1);

    println!("✓ Duplicate requests are suppressed");
}

#[test]
fn test_destination_answers_duplicate_requests_once() {
    // Diamond with nothing learned: the request reaches C over B and over D
    let mut mesh = Mesh::new(4, &[(A, B), (B, C), (A, D), (D, C)]);

    let now = ms(10);
    let _ = mesh.nodes[A].resolve_outgoing_route(addr(C), now);
    mesh.flush(now);

    let replies = mesh.sent_by(C, MessageType::Reply);
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].to, addr(B));

    // The copy via D left no reverse path behind
    let reverse = mesh.nodes[C].route_table().get(addr(A)).unwrap();
    assert_eq!(reverse.next_hop, addr(B));
    assert!(reverse.backup_next_hops().is_empty());

    let route = mesh.nodes[A].route_table().get(addr(C)).unwrap();
    assert_eq!(route.next_hop, addr(B));
    assert!(route.backup_next_hops().is_empty());

    println!("✓ One reply per request, however many copies arrive");
}

/// Diamond A - B - C and A - D - C after one round of hellos, with A's
/// route to C discovered. Returns the primary and the backup next hop.
fn diamond_with_route() -> (Mesh, Ipv4Addr, Ipv4Addr) {
    let mut mesh = Mesh::new(4, &[(A, B), (B, C), (A, D), (D, C)]);
    mesh.tick(ms(1_000));
    mesh.forget_traffic();

    let now = ms(1_100);
    let _ = mesh.nodes[A].resolve_outgoing_route(addr(C), now);
    mesh.flush(now);

    let route = mesh.nodes[A].route_table().get(addr(C)).unwrap();
    let primary = route.next_hop;
    let backups = route.backup_next_hops();
    assert_eq!(backups.len(), 1);
    (mesh, primary, backups[0])
}

#[test]
fn test_diamond_discovery_learns_backup() {
    let (mesh, primary, backup) = diamond_with_route();

    // B and D both know C from its hello and answer for it
    assert!(mesh.sent_by(C, MessageType::Reply).is_empty());
    assert_eq!(mesh.count(MessageType::Request), 1);
    assert!(mesh.sent_by(B, MessageType::Reply).iter().any(|t| t.to == addr(A)));
    assert!(mesh.sent_by(D, MessageType::Reply).iter().any(|t| t.to == addr(A)));

    let hops: BTreeSet<Ipv4Addr> = [primary, backup].into_iter().collect();
    assert_eq!(hops, [addr(B), addr(D)].into_iter().collect());

    let found: Vec<_> = mesh
        .events
        .iter()
        .filter(|(node, action)| *node == A && matches!(action, Action::RouteFound { .. }))
        .collect();
    assert_eq!(found.len(), 1);

    println!("✓ The losing reply is kept as a backup");
}

#[test]
fn test_backup_promoted_without_discovery() {
    let (mut mesh, primary, backup) = diamond_with_route();
    mesh.forget_traffic();

    // The primary relay drops off the air
    let relay = if primary == addr(B) { B } else { D };
    mesh.unlink(A, relay);
    mesh.unlink(relay, C);

    let later = ms(1_150);
    let tier = mesh.nodes[A].on_link_feedback(LinkFeedback::failed(primary, addr(C), None), later);
    assert_eq!(tier, Some(RepairTier::BackupSwitch));
    mesh.flush(later);

    assert_eq!(mesh.next_hop(A, C), Some(backup));
    assert_eq!(mesh.count(MessageType::Request), 0);
    assert_eq!(mesh.count(MessageType::Repair), 0);
    assert!(mesh.events.is_empty());

    let handle = mesh.nodes[A].resolve_outgoing_route(addr(C), later).unwrap();
    assert_eq!(handle.next_hop, backup);

    println!("✓ Backup path takes over with no Discovery broadcast");
}

#[test]
fn test_intermediate_node_answers_from_known_route() {
    // A - B - C; hellos teach B about C first
    let mut mesh = Mesh::new(3, &[(A, B), (B, C)]);
    mesh.tick(ms(1_000));
    assert_eq!(mesh.next_hop(B, C), Some(addr(C)));
    mesh.forget_traffic();

    let now = ms(1_100);
    let _ = mesh.nodes[A].resolve_outgoing_route(addr(C), now);
    mesh.flush(now);

    // B answers for C and tells C the way back to A
    assert!(mesh.sent_by(B, MessageType::Request).is_empty());
    assert!(mesh.sent_by(C, MessageType::Reply).is_empty());
    let replies = mesh.sent_by(B, MessageType::Reply);
    assert_eq!(replies.len(), 2);
    assert!(replies.iter().any(|t| t.to == addr(A)));
    assert!(replies.iter().any(|t| t.to == addr(C)));

    assert_eq!(mesh.next_hop(A, C), Some(addr(B)));
    assert_eq!(mesh.next_hop(C, A), Some(addr(B)));

    println!("✓ Intermediate reply with gratuitous reply");
}

#[test]
fn test_local_repair_through_another_neighbor() {
    // A - B - C with a detour B - E - C
    let mut mesh = Mesh::new(5, &[(A, B), (B, C), (B, E), (E, C)]);
    mesh.tick(ms(1_000));

    let now = ms(1_100);
    let _ = mesh.nodes[A].resolve_outgoing_route(addr(C), now);
    mesh.flush(now);
    assert_eq!(mesh.next_hop(A, C), Some(addr(B)));
    assert_eq!(mesh.next_hop(B, C), Some(addr(C)));
    mesh.forget_traffic();

    mesh.unlink(B, C);
    let later = ms(1_200);
    let tier = mesh.nodes[B].on_link_feedback(
        LinkFeedback::failed(addr(C), addr(C), Some(addr(A))),
        later,
    );
    assert_eq!(tier, Some(RepairTier::LocalRepair));
    mesh.flush(later);

    let queries = mesh.sent_by(B, MessageType::Repair);
    assert_eq!(queries.len(), 1);
    assert_eq!(queries[0].to, Ipv4Addr::BROADCAST);

    assert_eq!(mesh.next_hop(B, C), Some(addr(E)));
    assert!(!mesh.nodes[B].is_repairing(addr(C)));
    assert_eq!(mesh.count(MessageType::Request), 0);
    assert_eq!(mesh.count(MessageType::Error), 0);
    assert!(mesh.events.is_empty());

    // The repair timeout passing changes nothing
    mesh.tick(ms(1_400));
    assert_eq!(mesh.next_hop(B, C), Some(addr(E)));
    assert_eq!(mesh.count(MessageType::Request), 0);

    println!("✓ Local repair recovers within one hop");
}

#[test]
fn test_unanswered_repair_escalates_and_notifies_source() {
    // A - B - C and nothing else can reach C
    let mut mesh = Mesh::new(3, &[(A, B), (B, C)]);
    mesh.tick(ms(1_000));

    let now = ms(1_100);
    let _ = mesh.nodes[A].resolve_outgoing_route(addr(C), now);
    mesh.flush(now);
    assert_eq!(mesh.next_hop(A, C), Some(addr(B)));
    mesh.forget_traffic();

    mesh.unlink(B, C);
    let later = ms(1_200);
    let tier = mesh.nodes[B].on_link_feedback(
        LinkFeedback::failed(addr(C), addr(C), Some(addr(A))),
        later,
    );
    assert_eq!(tier, Some(RepairTier::LocalRepair));
    mesh.flush(later);
    assert!(mesh.nodes[B].is_repairing(addr(C)));

    // Nobody answers; after the repair timeout B gives up locally
    mesh.flush(ms(1_401));
    for node in &mut mesh.nodes {
        node.poll_timers(ms(1_401));
    }
    mesh.flush(ms(1_401));

    assert!(mesh.events.contains(&(
        B,
        Action::Failed(RoutingError::ForwardingFailure {
            destination: addr(C),
            next_hop: addr(C)
        })
    )));
    let errors = mesh.sent_by(B, MessageType::Error);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].to, addr(A));
    assert_eq!(mesh.sent_by(B, MessageType::Request).len(), 1);

    // A heard the error and dropped its route
    assert_eq!(mesh.next_hop(A, C), None);

    println!("✓ Failed local repair escalates to rediscovery");
}
