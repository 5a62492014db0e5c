//! Routing engine: one node's protocol instance
//!
//! Single threaded and host driven. The host passes the current time (time
//! since start) into every call, feeds received control datagrams and link
//! feedback in, fires timers when `next_timer_deadline` comes due and drains
//! the resulting [`Action`]s (datagrams to send, discovery outcomes).
//!
//! Decision order for outbound traffic:
//! 1. **Route table**: live route to the destination
//! 2. **Neighbor**: the destination is a live one-hop neighbor
//! 3. **Subnet** (opt-in): the destination shares a participating subnet
//! 4. **Discovery**: flood a route request and report `NoRouteAvailable`
//!
//! Forwarding failures escalate through three repair tiers: backup switch,
//! one-hop local repair, then full rediscovery with a Route Error upstream.

use crate::config::ProtocolConfig;
use crate::forward::{Dequeued, PacketHeader, PriorityScheduler, TrafficClass, TrafficClassifier};
use crate::interface::InterfaceAddress;
use crate::link::{LinkMonitor, Motion};
use crate::message::{decode_message, ControlMessage, MessageType, PROBE_ECHO, PROBE_REQUEST};
use crate::metric::CrossLayerMetric;
use crate::routing::{
    seq_newer, DiscoveryState, DiscoveryTable, LinkSample, NeighborTable, PendingDiscovery,
    PendingRepair, RepairTable, RepairTier, RouteEntry, RouteTable, RoutingTableDump, Sighting,
    Unreachable, UpsertOutcome,
};
use crate::timer::{TimerEvent, TimerId, TimerQueue};
use crate::RoutingError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Something the host has to do on the engine's behalf
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Send a control message; `to` is `255.255.255.255` for link-local broadcast
    Transmit {
        interface: u32,
        to: Ipv4Addr,
        message: ControlMessage,
    },
    /// A discovery finished with a usable route
    RouteFound {
        destination: Ipv4Addr,
        next_hop: Ipv4Addr,
    },
    /// A delivery failure surfaced to the traffic source
    Failed(RoutingError),
}

/// Route chosen for a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteHandle {
    pub destination: Ipv4Addr,
    pub next_hop: Ipv4Addr,
    /// Source address to stamp on locally originated packets
    pub source: Ipv4Addr,
    pub interface: u32,
}

/// Link-layer transmission report for a unicast frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkFeedback {
    pub next_hop: Ipv4Addr,
    /// Final destination of the frame, when it carried routed traffic
    pub destination: Option<Ipv4Addr>,
    /// Originator of the routed traffic
    pub source: Option<Ipv4Addr>,
    pub success: bool,
}

impl LinkFeedback {
    pub fn delivered(next_hop: Ipv4Addr) -> Self {
        Self {
            next_hop,
            destination: None,
            source: None,
            success: true,
        }
    }

    pub fn failed(next_hop: Ipv4Addr, destination: Ipv4Addr, source: Option<Ipv4Addr>) -> Self {
        Self {
            next_hop,
            destination: Some(destination),
            source,
            success: false,
        }
    }
}

/// Why a forwarded packet was not queued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    NoInterfaces,
    UnknownInterface,
    NoRoute,
    QueueFull,
    /// Our own packet came back to us
    Looped,
}

/// Result of [`RoutingProtocol::handle_forwarded_packet`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardOutcome {
    /// Addressed to this node; hand it to the local stack
    Delivered,
    /// Queued for transmission toward the next hop
    Forwarded {
        packet: u64,
        route: RouteHandle,
        class: TrafficClass,
    },
    Dropped(DropReason),
}

/// A packet ready to leave the node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutboundPacket {
    pub id: u64,
    pub header: PacketHeader,
    pub route: RouteHandle,
    pub class: TrafficClass,
    pub waited: Duration,
}

#[derive(Debug, Clone, Copy)]
struct QueuedPacket {
    id: u64,
    header: PacketHeader,
    route: RouteHandle,
}

/// Counters for status output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingSummary {
    pub interfaces: usize,
    pub neighbors: usize,
    pub routes: usize,
    pub pending_discoveries: usize,
    pub pending_repairs: usize,
    pub queued_packets: usize,
}

/// One node's routing protocol instance
pub struct RoutingProtocol {
    config: ProtocolConfig,
    rng: StdRng,
    /// Interfaces reported up by the host
    up: BTreeSet<u32>,
    /// Up interfaces with an address; the ones we route on
    interfaces: BTreeMap<u32, InterfaceAddress>,
    running: bool,
    neighbors: NeighborTable,
    routes: RouteTable,
    discovery: DiscoveryTable,
    repairs: RepairTable,
    link: LinkMonitor,
    classifier: TrafficClassifier,
    outbound: PriorityScheduler<QueuedPacket>,
    timers: TimerQueue,
    request_id: u32,
    repair_id: u32,
    sequence_number: u32,
    next_packet_id: u64,
    actions: Vec<Action>,
}

impl RoutingProtocol {
    pub fn new(config: ProtocolConfig) -> Result<Self, RoutingError> {
        config.validate()?;

        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            rng,
            up: BTreeSet::new(),
            interfaces: BTreeMap::new(),
            running: false,
            neighbors: NeighborTable::new(config.neighbor_timeout(), config.link_quality_alpha),
            routes: RouteTable::new(config.metric_weights, config.max_backup_paths),
            discovery: DiscoveryTable::new(
                config.seen_request_lifetime(),
                config.seen_request_capacity,
            ),
            repairs: RepairTable::new(),
            link: LinkMonitor::new(config.probe_rtt_target()),
            classifier: TrafficClassifier::new(config.control_port),
            outbound: PriorityScheduler::new(
                config.queue_weights,
                config.queue_capacity,
                config.max_queue_wait(),
            ),
            timers: TimerQueue::new(),
            request_id: 0,
            repair_id: 0,
            sequence_number: 0,
            next_packet_id: 0,
            actions: Vec::new(),
            config,
        })
    }

    // ------------------------------------------------------------------
    // Host interface
    // ------------------------------------------------------------------

    /// Drain pending actions
    pub fn take_actions(&mut self) -> Vec<Action> {
        std::mem::take(&mut self.actions)
    }

    /// When the host should call [`poll_timers`](Self::poll_timers) next
    pub fn next_timer_deadline(&mut self) -> Option<Duration> {
        self.timers.next_deadline()
    }

    /// Fire every timer due at `now`
    pub fn poll_timers(&mut self, now: Duration) {
        while let Some((id, _deadline, event)) = self.timers.pop_due(now) {
            match event {
                TimerEvent::Hello => {
                    self.send_hello(now);
                    let next = self.jittered(self.config.hello_interval());
                    self.timers.schedule(now + next, TimerEvent::Hello);
                }
                TimerEvent::Probe => {
                    self.probe_tick(now);
                    let next = self.jittered(self.config.probe_interval());
                    self.timers.schedule(now + next, TimerEvent::Probe);
                }
                TimerEvent::Purge => {
                    self.purge_tick(now);
                    let next = self.jittered(self.config.purge_interval());
                    self.timers.schedule(now + next, TimerEvent::Purge);
                }
                TimerEvent::DiscoveryRetry(destination) => {
                    self.discovery_retry(id, destination, now)
                }
                TimerEvent::LocalRepairTimeout(destination) => {
                    self.local_repair_timed_out(id, destination, now)
                }
            }
        }
    }

    pub fn set_local_motion(&mut self, motion: Motion) {
        self.link.set_local_motion(motion);
    }

    pub fn set_neighbor_motion(&mut self, neighbor: Ipv4Addr, motion: Motion) {
        self.link.set_neighbor_motion(neighbor, motion);
    }

    // ------------------------------------------------------------------
    // Interface lifecycle
    // ------------------------------------------------------------------

    pub fn on_interface_up(&mut self, interface: InterfaceAddress, now: Duration) {
        if interface.address.is_loopback() {
            debug!("Ignoring loopback interface {}", interface);
            return;
        }
        self.up.insert(interface.index);
        self.attach(interface, now);
    }

    pub fn on_interface_down(&mut self, index: u32) {
        self.up.remove(&index);
        self.detach(index);
    }

    pub fn on_address_added(&mut self, interface: InterfaceAddress, now: Duration) {
        if !self.up.contains(&interface.index) {
            debug!("Address added on down interface {}", interface);
            return;
        }
        if interface.address.is_loopback() {
            return;
        }
        self.attach(interface, now);
    }

    pub fn on_address_removed(&mut self, index: u32, address: Ipv4Addr) {
        match self.interfaces.get(&index) {
            Some(current) if current.address == address => self.detach(index),
            _ => warn!(
                "Removed address {} is not in use on interface {}",
                address, index
            ),
        }
    }

    /// Tear everything down
    pub fn shutdown(&mut self) {
        self.up.clear();
        self.interfaces.clear();
        self.routes.set_local_addresses(std::iter::empty());
        self.stop();
        self.actions.clear();
    }

    fn attach(&mut self, interface: InterfaceAddress, now: Duration) {
        if let Some(existing) = self.interfaces.get(&interface.index) {
            if existing.address != interface.address {
                warn!(
                    "Interface {} already routes on {}; ignoring {}",
                    interface.index, existing.address, interface.address
                );
            }
            return;
        }

        info!("Routing on interface {}", interface);
        self.interfaces.insert(interface.index, interface);
        self.refresh_local_addresses();

        if !self.running {
            self.start(now);
        }
    }

    fn detach(&mut self, index: u32) {
        let Some(interface) = self.interfaces.remove(&index) else {
            return;
        };
        info!("Stopped routing on interface {}", interface);

        self.routes.remove_interface(index);
        for lost in self.neighbors.remove_interface(index) {
            self.link.forget(lost);
        }
        self.refresh_local_addresses();

        if self.interfaces.is_empty() {
            self.stop();
        }
    }

    fn start(&mut self, now: Duration) {
        self.running = true;

        let hello = self.random_offset(self.config.hello_interval());
        self.timers.schedule(now + hello, TimerEvent::Hello);
        let probe = self.random_offset(self.config.probe_interval());
        self.timers.schedule(now + probe, TimerEvent::Probe);
        self.timers
            .schedule(now + self.config.purge_interval(), TimerEvent::Purge);

        debug!("Routing engine started");
    }

    fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;
        self.timers.clear();
        self.neighbors.clear();
        self.routes.clear();
        self.discovery.clear();
        self.repairs.clear();
        self.link.clear();
        self.outbound.clear();
        info!("No routing interfaces left; engine stopped");
    }

    fn refresh_local_addresses(&mut self) {
        let addresses: Vec<Ipv4Addr> = self.interfaces.values().map(|i| i.address).collect();
        self.routes.set_local_addresses(addresses);
    }

    // ------------------------------------------------------------------
    // Outbound and forwarded traffic
    // ------------------------------------------------------------------

    /// Route for locally originated traffic.
    ///
    /// Starts a discovery when nothing is known and reports `NoRouteAvailable`;
    /// the caller retries once `Action::RouteFound` arrives.
    pub fn resolve_outgoing_route(
        &mut self,
        destination: Ipv4Addr,
        now: Duration,
    ) -> Result<RouteHandle, RoutingError> {
        let Some(first) = self.interfaces.values().next().copied() else {
            return Err(RoutingError::NoInterfaces);
        };

        if destination.is_broadcast() || destination.is_multicast() || self.is_local(destination)
        {
            return Ok(RouteHandle {
                destination,
                next_hop: destination,
                source: first.address,
                interface: first.index,
            });
        }

        if let Some(handle) = self.active_route(destination, now) {
            return Ok(handle);
        }

        if self.discovery.is_pending(destination) || self.repairs.is_pending(destination) {
            return Err(RoutingError::NoRouteAvailable { destination });
        }
        if self
            .discovery
            .recently_failed(destination, now, self.config.discovery_retry_interval())
            .is_some()
        {
            return Err(RoutingError::DestinationUnreachable { destination });
        }

        self.begin_discovery(destination, now);
        Err(RoutingError::NoRouteAvailable { destination })
    }

    /// Resolve, classify and queue a locally originated packet
    pub fn submit_outgoing(
        &mut self,
        header: PacketHeader,
        now: Duration,
    ) -> Result<u64, RoutingError> {
        let route = self.resolve_outgoing_route(header.destination, now)?;
        let class = self.classifier.classify(&header);
        let id = self.next_packet_id();
        self.outbound
            .enqueue(QueuedPacket { id, header, route }, class, now)?;
        Ok(id)
    }

    /// Decide what happens to a packet received for forwarding
    pub fn handle_forwarded_packet(
        &mut self,
        header: PacketHeader,
        incoming_interface: u32,
        now: Duration,
    ) -> ForwardOutcome {
        if self.interfaces.is_empty() {
            return ForwardOutcome::Dropped(DropReason::NoInterfaces);
        }
        if !self.interfaces.contains_key(&incoming_interface) {
            return ForwardOutcome::Dropped(DropReason::UnknownInterface);
        }

        let destination = header.destination;
        if self.is_local(destination)
            || destination.is_broadcast()
            || self
                .interfaces
                .values()
                .any(|i| i.broadcast_address() == destination)
        {
            return ForwardOutcome::Delivered;
        }
        if self.is_local(header.source) {
            debug!("Own packet to {} came back on {}", destination, incoming_interface);
            return ForwardOutcome::Dropped(DropReason::Looped);
        }

        let lifetime = self.config.route_timeout();
        self.routes.touch(header.source, now, lifetime);

        let Some(route) = self.active_route(destination, now) else {
            if self.repairs.is_pending(destination) {
                trace!(
                    "Holding back traffic from {} while {} is repaired",
                    header.source, destination
                );
                self.repairs.add_source(destination, header.source);
                return ForwardOutcome::Dropped(DropReason::NoRoute);
            }
            debug!(
                "No route to {} for traffic from {}; notifying upstream",
                destination, header.source
            );
            let upstream: BTreeSet<Ipv4Addr> = self
                .routes
                .lookup(header.source, now)
                .map(|r| r.next_hop)
                .into_iter()
                .collect();
            if let Some(own) = self.interfaces.get(&incoming_interface).map(|i| i.address) {
                self.send_route_error(destination, own, 0, &upstream, now);
            }
            return ForwardOutcome::Dropped(DropReason::NoRoute);
        };

        if let Some(upstream) = self.routes.lookup(header.source, now).map(|r| r.next_hop) {
            self.routes.add_precursor(destination, upstream);
        }

        let class = self.classifier.classify(&header);
        let id = self.next_packet_id();
        match self
            .outbound
            .enqueue(QueuedPacket { id, header, route }, class, now)
        {
            Ok(()) => ForwardOutcome::Forwarded {
                packet: id,
                route,
                class,
            },
            Err(e) => {
                warn!("Dropping packet to {}: {}", destination, e);
                ForwardOutcome::Dropped(DropReason::QueueFull)
            }
        }
    }

    /// Next packet to transmit; the route is re-resolved at dequeue time
    pub fn dequeue_outbound(&mut self, now: Duration) -> Option<OutboundPacket> {
        let Dequeued {
            item,
            class,
            waited,
        } = self.outbound.dequeue(now)?;
        self.link.record_queue_delay(waited);

        let route = self
            .active_route(item.header.destination, now)
            .unwrap_or(item.route);
        Some(OutboundPacket {
            id: item.id,
            header: item.header,
            route,
            class,
            waited,
        })
    }

    /// Report the outcome of a unicast transmission
    pub fn on_link_feedback(&mut self, feedback: LinkFeedback, now: Duration) -> Option<RepairTier> {
        if feedback.success {
            if let Some(interface) = self
                .neighbors
                .lookup(feedback.next_hop, now)
                .map(|n| n.interface)
            {
                self.neighbors
                    .observe(feedback.next_hop, interface, LinkSample::quality(1.0), now);
            }
            return None;
        }

        self.neighbors
            .record_quality(feedback.next_hop, self.config.failure_sample, now);
        let destination = feedback.destination?;
        Some(self.repair_route(destination, feedback.next_hop, feedback.source, now))
    }

    fn active_route(&mut self, destination: Ipv4Addr, now: Duration) -> Option<RouteHandle> {
        if self.routes.lookup(destination, now).is_none() {
            self.try_direct_route(destination, now);
        }
        let (next_hop, interface) = self
            .routes
            .lookup(destination, now)
            .map(|r| (r.next_hop, r.interface))?;
        self.routes
            .touch(destination, now, self.config.route_timeout());

        let source = self.interfaces.get(&interface).map(|i| i.address)?;
        Some(RouteHandle {
            destination,
            next_hop,
            source,
            interface,
        })
    }

    fn try_direct_route(&mut self, destination: Ipv4Addr, now: Duration) {
        if let Some(interface) = self.neighbors.lookup(destination, now).map(|n| n.interface) {
            self.install_direct_route(destination, interface, None, now);
            return;
        }

        if self.config.subnet_direct_routes {
            let on_link = self
                .interfaces
                .values()
                .find(|i| i.contains(destination))
                .map(|i| i.index);
            if let Some(interface) = on_link {
                let metric = CrossLayerMetric::new(1.0, self.link.queuing_delay(), 0.0, 1, now);
                let entry = RouteEntry::new(
                    destination,
                    destination,
                    interface,
                    1,
                    0,
                    metric,
                    now + self.config.route_timeout(),
                );
                self.routes.upsert(entry, now);
            }
        }
    }

    // ------------------------------------------------------------------
    // Control messages
    // ------------------------------------------------------------------

    /// Process one received control datagram
    pub fn handle_control_datagram(
        &mut self,
        bytes: &[u8],
        sender: Ipv4Addr,
        interface: u32,
        now: Duration,
    ) -> Result<(), RoutingError> {
        if !self.interfaces.contains_key(&interface) {
            return Err(RoutingError::UnknownInterface(interface));
        }
        let msg = decode_message(bytes)?;

        if self.is_local(sender) {
            trace!("Ignoring own {} echoed back", msg.message_type);
            return Ok(());
        }
        trace!(
            "{} from {} on interface {}",
            msg.message_type,
            sender,
            interface
        );

        match msg.message_type {
            MessageType::Hello => self.handle_hello(&msg, sender, interface, now),
            MessageType::Request => return self.handle_request(&msg, sender, interface, now),
            MessageType::Reply => self.handle_reply(&msg, sender, interface, now),
            MessageType::Error => self.handle_error(&msg, sender, interface, now),
            MessageType::Probe => self.handle_probe(&msg, sender, interface, now),
            MessageType::Repair => self.handle_repair(&msg, sender, interface, now),
        }
        Ok(())
    }

    fn handle_hello(&mut self, msg: &ControlMessage, sender: Ipv4Addr, interface: u32, now: Duration) {
        self.observe_sender(sender, interface, 1.0, Some((msg.delay, msg.mobility)), now);
        self.install_direct_route(sender, interface, Some(msg.sequence_number), now);
    }

    fn handle_request(
        &mut self,
        msg: &ControlMessage,
        sender: Ipv4Addr,
        interface: u32,
        now: Duration,
    ) -> Result<(), RoutingError> {
        self.observe_sender(sender, interface, 1.0, None, now);
        if !self.is_local(msg.origin)
            && !self
                .discovery
                .seen
                .check_and_record(msg.origin, msg.request_id, now)
        {
            return Err(RoutingError::DuplicateControlMessage {
                origin: msg.origin,
                request_id: msg.request_id,
            });
        }

        let seq_hint = (msg.origin == sender).then_some(msg.sequence_number);
        self.install_direct_route(sender, interface, seq_hint, now);
        if self.is_local(msg.origin) {
            return Ok(());
        }

        let path = msg.metric(now).extend_over(&self.link_to(sender, now), now);
        let reverse = RouteEntry::new(
            msg.origin,
            sender,
            interface,
            path.hop_count,
            msg.sequence_number,
            path,
            now + self.config.route_timeout(),
        );
        self.routes.upsert(reverse, now);

        if self.is_local(msg.destination) {
            self.sequence_number = self.sequence_number.wrapping_add(1);
            let reply = ControlMessage::reply(
                msg.destination,
                msg.origin,
                msg.request_id,
                0,
                self.sequence_number,
                &self.link.local_metric(now),
            );
            debug!(
                "RREQ {} from {} reached us; replying via {}",
                msg.request_id, msg.origin, sender
            );
            self.transmit(interface, sender, reply);
            return Ok(());
        }

        if self.config.intermediate_replies {
            let known = self
                .routes
                .lookup(msg.destination, now)
                .filter(|r| r.next_hop != sender)
                .map(|r| (r.next_hop, r.interface, r.hop_count, r.sequence_number, r.metric));
            if let Some((next_hop, next_interface, hop_count, sequence_number, metric)) = known {
                let reply = ControlMessage::reply(
                    msg.destination,
                    msg.origin,
                    msg.request_id,
                    hop_u8(hop_count),
                    sequence_number,
                    &metric,
                );
                self.routes.add_precursor(msg.destination, sender);
                self.routes.add_precursor(msg.origin, next_hop);
                debug!(
                    "Answering RREQ for {} from {} with a known route",
                    msg.destination, msg.origin
                );
                self.transmit(interface, sender, reply);

                // Gratuitous reply so the destination learns the way back
                let gratuitous = ControlMessage::reply(
                    msg.origin,
                    msg.destination,
                    msg.request_id,
                    hop_u8(path.hop_count),
                    msg.sequence_number,
                    &path,
                );
                self.transmit(next_interface, next_hop, gratuitous);
                return Ok(());
            }
        }

        if path.hop_count >= u32::from(self.config.max_hop_count) {
            trace!(
                "RREQ {} from {} hit the hop limit",
                msg.request_id,
                msg.origin
            );
            return Ok(());
        }

        let relay = ControlMessage {
            hop_count: hop_u8(path.hop_count),
            link_quality: path.link_quality,
            delay: path.queuing_delay,
            mobility: path.mobility,
            ..*msg
        };
        self.broadcast(relay);
        Ok(())
    }

    fn handle_reply(&mut self, msg: &ControlMessage, sender: Ipv4Addr, interface: u32, now: Duration) {
        self.observe_sender(sender, interface, 1.0, None, now);
        let seq_hint = (msg.destination == sender).then_some(msg.sequence_number);
        self.install_direct_route(sender, interface, seq_hint, now);

        if self.is_local(msg.destination) {
            return;
        }

        let path = msg.metric(now).extend_over(&self.link_to(sender, now), now);
        let forward = RouteEntry::new(
            msg.destination,
            sender,
            interface,
            path.hop_count,
            msg.sequence_number,
            path,
            now + self.config.route_timeout(),
        );
        let outcome = self.routes.upsert(forward, now);

        if self.is_local(msg.origin) {
            self.route_answered(msg.destination, now);
            return;
        }
        if outcome == UpsertOutcome::Ignored {
            trace!("Stale RREP for {} not relayed", msg.destination);
            return;
        }

        let Some((next_hop, reverse_interface)) = self
            .routes
            .lookup(msg.origin, now)
            .map(|r| (r.next_hop, r.interface))
        else {
            debug!("No reverse route to {}; dropping RREP", msg.origin);
            return;
        };
        self.routes.add_precursor(msg.destination, next_hop);
        self.routes.add_precursor(msg.origin, sender);

        let relay = ControlMessage::reply(
            msg.destination,
            msg.origin,
            msg.request_id,
            hop_u8(path.hop_count),
            msg.sequence_number,
            &path,
        );
        self.transmit(reverse_interface, next_hop, relay);
    }

    fn handle_error(&mut self, msg: &ControlMessage, sender: Ipv4Addr, interface: u32, now: Duration) {
        self.observe_sender(sender, interface, 1.0, None, now);

        let destination = msg.destination;
        let broken = msg.origin;
        let Some(next_hop) = self.routes.get(destination).map(|r| r.next_hop) else {
            trace!("RERR for unknown destination {}", destination);
            return;
        };

        if next_hop != sender && next_hop != broken {
            self.routes.mark_unreachable(destination, sender, now);
            self.routes.mark_unreachable(destination, broken, now);
            return;
        }

        match self.routes.mark_unreachable(destination, next_hop, now) {
            Unreachable::Promoted { next_hop: backup } => {
                debug!("RERR for {}: switched to backup {}", destination, backup);
            }
            Unreachable::Removed(entry) => {
                debug!("RERR for {}: route via {} removed", destination, next_hop);
                self.send_route_error(
                    destination,
                    broken,
                    msg.sequence_number,
                    &entry.precursors,
                    now,
                );
            }
            Unreachable::NotAffected | Unreachable::Absent => {}
        }
    }

    fn handle_probe(&mut self, msg: &ControlMessage, sender: Ipv4Addr, interface: u32, now: Duration) {
        match msg.hop_count {
            PROBE_REQUEST => {
                self.observe_sender(sender, interface, 1.0, None, now);
                if self.is_local(msg.destination) {
                    let echo =
                        ControlMessage::probe(msg.origin, msg.destination, msg.request_id, PROBE_ECHO);
                    self.transmit(interface, sender, echo);
                }
            }
            PROBE_ECHO => {
                let quality = match self.link.complete_probe(msg.request_id, sender, now) {
                    Some(result) => {
                        trace!(
                            "Probe to {}: rtt {:?}, quality {:.2}",
                            sender,
                            result.rtt,
                            result.quality
                        );
                        result.quality
                    }
                    None => 1.0,
                };
                self.observe_sender(sender, interface, quality, None, now);
            }
            other => trace!("Ignoring probe with marker {}", other),
        }
    }

    fn handle_repair(&mut self, msg: &ControlMessage, sender: Ipv4Addr, interface: u32, now: Duration) {
        self.observe_sender(sender, interface, 1.0, None, now);
        self.install_direct_route(sender, interface, None, now);

        if self.is_local(msg.origin) {
            return;
        }

        let answer = if self.is_local(msg.destination) {
            self.sequence_number = self.sequence_number.wrapping_add(1);
            Some(ControlMessage::reply(
                msg.destination,
                msg.origin,
                msg.request_id,
                0,
                self.sequence_number,
                &self.link.local_metric(now),
            ))
        } else {
            self.routes
                .lookup(msg.destination, now)
                .filter(|r| r.next_hop != sender && !seq_newer(msg.sequence_number, r.sequence_number))
                .map(|r| {
                    ControlMessage::reply(
                        msg.destination,
                        msg.origin,
                        msg.request_id,
                        hop_u8(r.hop_count),
                        r.sequence_number,
                        &r.metric,
                    )
                })
        };

        if let Some(reply) = answer {
            self.routes.add_precursor(msg.destination, sender);
            debug!(
                "Answering local repair from {} for {}",
                msg.origin, msg.destination
            );
            self.transmit(interface, sender, reply);
        }
    }

    // ------------------------------------------------------------------
    // Discovery
    // ------------------------------------------------------------------

    fn begin_discovery(&mut self, destination: Ipv4Addr, now: Duration) {
        if self.discovery.is_pending(destination) {
            return;
        }
        let Some(request_id) = self.broadcast_request(destination, now) else {
            return;
        };

        let timer = self.timers.schedule(
            now + self.config.discovery_retry_interval(),
            TimerEvent::DiscoveryRetry(destination),
        );
        self.discovery.begin(PendingDiscovery {
            destination,
            request_id,
            attempts_remaining: self.config.discovery_max_attempts - 1,
            timer,
            started_at: now,
        });
        debug!("Discovering route to {} (RREQ {})", destination, request_id);
    }

    /// Flood a fresh request; returns its id
    fn broadcast_request(&mut self, destination: Ipv4Addr, now: Duration) -> Option<u32> {
        let origin = self.primary_address()?;
        self.request_id = self.request_id.wrapping_add(1);
        self.sequence_number = self.sequence_number.wrapping_add(1);

        let request = ControlMessage::request(
            destination,
            origin,
            self.request_id,
            self.sequence_number,
            &self.link.local_metric(now),
        );
        self.discovery
            .seen
            .check_and_record(origin, self.request_id, now);
        self.broadcast(request);
        Some(self.request_id)
    }

    fn discovery_retry(&mut self, timer: TimerId, destination: Ipv4Addr, now: Duration) {
        let Some(pending) = self.discovery.pending(destination).cloned() else {
            return;
        };
        if pending.timer != timer {
            return;
        }

        if let Some(next_hop) = self.routes.lookup(destination, now).map(|r| r.next_hop) {
            self.discovery.complete(destination);
            self.actions.push(Action::RouteFound {
                destination,
                next_hop,
            });
            return;
        }

        if pending.attempts_remaining == 0 {
            self.discovery.fail(destination, now);
            info!(
                "Destination {} unreachable after {} attempts",
                destination, self.config.discovery_max_attempts
            );
            self.actions
                .push(Action::Failed(RoutingError::DestinationUnreachable { destination }));
            return;
        }

        let Some(request_id) = self.broadcast_request(destination, now) else {
            self.discovery.fail(destination, now);
            return;
        };
        let timer = self.timers.schedule(
            now + self.config.discovery_retry_interval(),
            TimerEvent::DiscoveryRetry(destination),
        );
        if let Some(entry) = self.discovery.pending_mut(destination) {
            entry.request_id = request_id;
            entry.attempts_remaining -= 1;
            entry.timer = timer;
            debug!(
                "Retrying discovery for {} ({} attempts left)",
                destination, entry.attempts_remaining
            );
        }
    }

    fn route_answered(&mut self, destination: Ipv4Addr, now: Duration) {
        let Some(next_hop) = self.routes.lookup(destination, now).map(|r| r.next_hop) else {
            return;
        };

        let repaired = self
            .repairs
            .get(destination)
            .is_some_and(|r| r.failed_next_hop != next_hop);
        if repaired {
            if let Some(repair) = self.repairs.take(destination) {
                self.timers.cancel(repair.timer);
                info!(
                    "Local repair for {} succeeded via {} after {:?}",
                    destination,
                    next_hop,
                    now.saturating_sub(repair.started_at)
                );
            }
        }

        self.discovery.clear_unreachable(destination);
        if let Some(pending) = self.discovery.complete(destination) {
            self.timers.cancel(pending.timer);
            info!(
                "Route to {} found via {} after {:?}",
                destination,
                next_hop,
                now.saturating_sub(pending.started_at)
            );
            self.actions.push(Action::RouteFound {
                destination,
                next_hop,
            });
        }
    }

    // ------------------------------------------------------------------
    // Repair
    // ------------------------------------------------------------------

    fn repair_route(
        &mut self,
        destination: Ipv4Addr,
        failed: Ipv4Addr,
        source: Option<Ipv4Addr>,
        now: Duration,
    ) -> RepairTier {
        let sources: BTreeSet<Ipv4Addr> = source.filter(|s| !self.is_local(*s)).into_iter().collect();

        if !self.config.fast_local_repair {
            let (sequence_number, precursors) = self
                .routes
                .remove(destination)
                .map(|e| (e.sequence_number, e.precursors))
                .unwrap_or_default();
            self.global_repair(destination, failed, sequence_number, sources, precursors, now);
            return RepairTier::GlobalDiscovery;
        }

        let (sequence_number, precursors) = match self.routes.mark_unreachable(destination, failed, now)
        {
            Unreachable::Promoted { next_hop } => {
                info!(
                    "Route to {} switched from {} to backup {}",
                    destination, failed, next_hop
                );
                return RepairTier::BackupSwitch;
            }
            Unreachable::NotAffected if self.routes.lookup(destination, now).is_some() => {
                debug!("Route to {} no longer uses {}", destination, failed);
                return RepairTier::BackupSwitch;
            }
            Unreachable::Removed(entry) => (entry.sequence_number, entry.precursors),
            Unreachable::NotAffected | Unreachable::Absent => (0, BTreeSet::new()),
        };

        if self.repairs.is_pending(destination) {
            for source in sources {
                self.repairs.add_source(destination, source);
            }
            return RepairTier::LocalRepair;
        }

        let helpers = self
            .neighbors
            .live_addresses(now)
            .into_iter()
            .filter(|n| *n != failed)
            .count();
        let origin = match self.primary_address() {
            Some(origin) if helpers > 0 => origin,
            _ => {
                debug!("Nobody to ask for {}; escalating to discovery", destination);
                self.global_repair(destination, failed, sequence_number, sources, precursors, now);
                return RepairTier::GlobalDiscovery;
            }
        };

        self.repair_id = self.repair_id.wrapping_add(1);
        let query = ControlMessage::repair(destination, origin, self.repair_id, sequence_number);
        self.broadcast(query);

        let timer = self.timers.schedule(
            now + self.config.local_repair_timeout(),
            TimerEvent::LocalRepairTimeout(destination),
        );
        self.repairs.begin(PendingRepair {
            destination,
            repair_id: self.repair_id,
            failed_next_hop: failed,
            sequence_number,
            sources,
            precursors,
            timer,
            started_at: now,
        });
        info!(
            "Local repair for {} started ({} down, {} neighbors asked)",
            destination, failed, helpers
        );
        RepairTier::LocalRepair
    }

    fn local_repair_timed_out(&mut self, timer: TimerId, destination: Ipv4Addr, now: Duration) {
        if self.repairs.get(destination).map(|r| r.timer) != Some(timer) {
            return;
        }
        let Some(repair) = self.repairs.take(destination) else {
            return;
        };

        if self.routes.lookup(destination, now).is_some() {
            debug!("Route to {} restored before local repair timed out", destination);
            return;
        }
        info!("Local repair for {} timed out; rediscovering", destination);
        self.global_repair(
            destination,
            repair.failed_next_hop,
            repair.sequence_number,
            repair.sources,
            repair.precursors,
            now,
        );
    }

    /// Tier 3: tell the sources and rediscover
    fn global_repair(
        &mut self,
        destination: Ipv4Addr,
        broken: Ipv4Addr,
        sequence_number: u32,
        sources: BTreeSet<Ipv4Addr>,
        precursors: BTreeSet<Ipv4Addr>,
        now: Duration,
    ) {
        self.actions.push(Action::Failed(RoutingError::ForwardingFailure {
            destination,
            next_hop: broken,
        }));

        let mut upstream = precursors;
        for source in &sources {
            if let Some(next_hop) = self.routes.lookup(*source, now).map(|r| r.next_hop) {
                upstream.insert(next_hop);
            }
        }
        upstream.remove(&broken);
        self.send_route_error(destination, broken, sequence_number, &upstream, now);

        self.begin_discovery(destination, now);
    }

    /// Unicast to a single upstream neighbor, broadcast to several
    fn send_route_error(
        &mut self,
        destination: Ipv4Addr,
        broken: Ipv4Addr,
        sequence_number: u32,
        upstream: &BTreeSet<Ipv4Addr>,
        now: Duration,
    ) {
        let error = ControlMessage::error(destination, broken, sequence_number);
        let mut targets = upstream.iter();
        match (targets.next(), targets.next()) {
            (None, _) => {}
            (Some(&only), None) => {
                if let Some(interface) = self.interface_toward(only, now) {
                    debug!("RERR for {} to {}", destination, only);
                    self.transmit(interface, only, error);
                }
            }
            (Some(_), Some(_)) => {
                debug!("RERR for {} to {} precursors", destination, upstream.len());
                self.broadcast(error);
            }
        }
    }

    // ------------------------------------------------------------------
    // Periodic work
    // ------------------------------------------------------------------

    fn send_hello(&mut self, now: Duration) {
        let metric = self.link.local_metric(now);
        let interfaces: Vec<InterfaceAddress> = self.interfaces.values().copied().collect();
        for interface in interfaces {
            let hello = ControlMessage::hello(interface.address, self.sequence_number, &metric);
            self.transmit(interface.index, Ipv4Addr::BROADCAST, hello);
        }
    }

    fn probe_tick(&mut self, now: Duration) {
        for silent in self.link.expire_probes(now, self.config.probe_interval()) {
            debug!("Probe to {} unanswered", silent);
            self.neighbors
                .record_quality(silent, self.config.failure_sample, now);
        }

        let candidates = self.neighbors.live_addresses(now);
        let Some(target) = self.link.pick_probe_target(&mut self.rng, &candidates) else {
            return;
        };
        let Some((interface, address)) = self
            .neighbors
            .lookup(target, now)
            .and_then(|n| self.interfaces.get(&n.interface))
            .map(|i| (i.index, i.address))
        else {
            return;
        };

        let id = self.link.start_probe(target, now);
        self.transmit(
            interface,
            target,
            ControlMessage::probe(target, address, id, PROBE_REQUEST),
        );
    }

    fn purge_tick(&mut self, now: Duration) {
        for lost in self.neighbors.purge_expired(now) {
            info!("Neighbor {} lost", lost);
            self.link.forget(lost);
            self.handle_link_break(lost, now);
        }
        self.routes.purge_expired(now);
        self.discovery
            .purge_expired(now, self.config.route_timeout());
    }

    fn handle_link_break(&mut self, neighbor: Ipv4Addr, now: Duration) {
        for destination in self.routes.routes_via(neighbor) {
            if let Unreachable::Removed(entry) =
                self.routes.mark_unreachable(destination, neighbor, now)
            {
                self.send_route_error(
                    destination,
                    neighbor,
                    entry.sequence_number,
                    &entry.precursors,
                    now,
                );
            }
        }
        self.routes.drop_backups_via(neighbor);
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn observe_sender(
        &mut self,
        sender: Ipv4Addr,
        interface: u32,
        quality: f64,
        advertised: Option<(f64, f64)>,
        now: Duration,
    ) {
        let sample = LinkSample {
            quality,
            queuing_delay: advertised.map(|(delay, _)| delay),
            mobility: advertised.map(|(_, mobility)| self.link.mobility_toward(sender, mobility)),
        };
        if self.neighbors.observe(sender, interface, sample, now) == Sighting::New {
            debug!("New neighbor {} on interface {}", sender, interface);
        }
    }

    fn install_direct_route(
        &mut self,
        neighbor: Ipv4Addr,
        interface: u32,
        sequence_number: Option<u32>,
        now: Duration,
    ) {
        if !self.neighbors.is_neighbor(neighbor, now) {
            return;
        }
        let sequence_number = sequence_number
            .or_else(|| self.routes.get(neighbor).map(|r| r.sequence_number))
            .unwrap_or(0);
        let metric = self.link_to(neighbor, now).with_hop_count(1);
        let entry = RouteEntry::new(
            neighbor,
            neighbor,
            interface,
            1,
            sequence_number,
            metric,
            now + self.config.route_timeout(),
        );
        self.routes.upsert(entry, now);
    }

    /// Metric of the hop from this node to `neighbor`
    fn link_to(&self, neighbor: Ipv4Addr, now: Duration) -> CrossLayerMetric {
        let (quality, mobility) = self
            .neighbors
            .lookup(neighbor, now)
            .map(|n| (n.link_quality, n.metric.mobility))
            .unwrap_or((1.0, 0.0));
        CrossLayerMetric::new(quality, self.link.queuing_delay(), mobility, 1, now)
    }

    fn interface_toward(&mut self, address: Ipv4Addr, now: Duration) -> Option<u32> {
        if let Some(neighbor) = self.neighbors.lookup(address, now) {
            return Some(neighbor.interface);
        }
        if let Some(route) = self.routes.lookup(address, now) {
            return Some(route.interface);
        }
        self.interfaces.keys().next().copied()
    }

    fn transmit(&mut self, interface: u32, to: Ipv4Addr, message: ControlMessage) {
        self.actions.push(Action::Transmit {
            interface,
            to,
            message,
        });
    }

    fn broadcast(&mut self, message: ControlMessage) {
        let indices: Vec<u32> = self.interfaces.keys().copied().collect();
        for interface in indices {
            self.transmit(interface, Ipv4Addr::BROADCAST, message);
        }
    }

    fn is_local(&self, address: Ipv4Addr) -> bool {
        self.interfaces.values().any(|i| i.address == address)
    }

    fn primary_address(&self) -> Option<Ipv4Addr> {
        self.interfaces.values().next().map(|i| i.address)
    }

    fn next_packet_id(&mut self) -> u64 {
        self.next_packet_id += 1;
        self.next_packet_id
    }

    fn random_offset(&mut self, interval: Duration) -> Duration {
        interval.mul_f64(self.rng.gen_range(0.0..1.0))
    }

    /// ±10 % around the interval
    fn jittered(&mut self, interval: Duration) -> Duration {
        interval.mul_f64(self.rng.gen_range(0.9..=1.1))
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn primary_interface(&self) -> Option<InterfaceAddress> {
        self.interfaces.values().next().copied()
    }

    pub fn route_table(&self) -> &RouteTable {
        &self.routes
    }

    pub fn neighbor_table(&self) -> &NeighborTable {
        &self.neighbors
    }

    pub fn sequence_number(&self) -> u32 {
        self.sequence_number
    }

    pub fn discovery_state(&self, destination: Ipv4Addr, now: Duration) -> DiscoveryState {
        let has_route = self
            .routes
            .get(destination)
            .is_some_and(|r| !r.is_expired(now));
        self.discovery.state(destination, has_route)
    }

    pub fn is_repairing(&self, destination: Ipv4Addr) -> bool {
        self.repairs.is_pending(destination)
    }

    pub fn summary(&self, now: Duration) -> RoutingSummary {
        RoutingSummary {
            interfaces: self.interfaces.len(),
            neighbors: self.neighbors.live_addresses(now).len(),
            routes: self.routes.snapshot(now).len(),
            pending_discoveries: self.discovery.pending_count(),
            pending_repairs: self.repairs.len(),
            queued_packets: self.outbound.len(),
        }
    }

    /// Printable routing table
    pub fn routing_table_dump(&self, now: Duration) -> RoutingTableDump {
        RoutingTableDump {
            node: self.primary_address(),
            time: now,
            rows: self.routes.snapshot(now),
        }
    }
}

fn hop_u8(hops: u32) -> u8 {
    u8::try_from(hops).unwrap_or(u8::MAX)
}
