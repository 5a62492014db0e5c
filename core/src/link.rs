//! Link monitoring: probes, queue delay and mobility
//!
//! Feeds the cross-layer metric with the measurements the node can make itself:
//! - Probe round trips turned into link quality samples
//! - Time packets spend in the forwarding queue (EWMA, seconds)
//! - Relative speed toward a neighbor from host-supplied motion vectors
//!
//! A neighbor without motion data falls back to the mobility it advertises.

use crate::metric::CrossLayerMetric;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::Duration;
use tracing::trace;

/// EWMA factor for the queue delay estimate
const QUEUE_DELAY_ALPHA: f64 = 0.25;

/// Position (m) and velocity (m/s) of a node
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Motion {
    pub position: [f64; 3],
    pub velocity: [f64; 3],
}

impl Motion {
    pub fn speed(&self) -> f64 {
        norm(self.velocity)
    }

    /// Magnitude of the velocity difference
    pub fn relative_speed(&self, other: &Motion) -> f64 {
        norm([
            self.velocity[0] - other.velocity[0],
            self.velocity[1] - other.velocity[1],
            self.velocity[2] - other.velocity[2],
        ])
    }
}

fn norm(v: [f64; 3]) -> f64 {
    let n = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
    if n.is_finite() {
        n
    } else {
        0.0
    }
}

/// Answered probe
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeResult {
    pub neighbor: Ipv4Addr,
    pub rtt: Duration,
    /// Quality sample in [0, 1]
    pub quality: f64,
}

#[derive(Debug, Clone, Copy)]
struct OutstandingProbe {
    neighbor: Ipv4Addr,
    sent_at: Duration,
}

/// Per-node link measurements
#[derive(Debug, Clone)]
pub struct LinkMonitor {
    local_motion: Option<Motion>,
    neighbor_motion: HashMap<Ipv4Addr, Motion>,
    probes: HashMap<u32, OutstandingProbe>,
    next_probe_id: u32,
    queue_delay: f64,
    rtt_target: Duration,
}

impl LinkMonitor {
    pub fn new(rtt_target: Duration) -> Self {
        Self {
            local_motion: None,
            neighbor_motion: HashMap::new(),
            probes: HashMap::new(),
            next_probe_id: 0,
            queue_delay: 0.0,
            rtt_target,
        }
    }

    pub fn set_local_motion(&mut self, motion: Motion) {
        self.local_motion = Some(motion);
    }

    pub fn set_neighbor_motion(&mut self, neighbor: Ipv4Addr, motion: Motion) {
        self.neighbor_motion.insert(neighbor, motion);
    }

    /// Own speed, advertised in hellos
    pub fn own_mobility(&self) -> f64 {
        self.local_motion.map(|m| m.speed()).unwrap_or(0.0)
    }

    /// Mobility of the link toward `neighbor`
    pub fn mobility_toward(&self, neighbor: Ipv4Addr, advertised: f64) -> f64 {
        match (self.local_motion, self.neighbor_motion.get(&neighbor)) {
            (Some(local), Some(remote)) => local.relative_speed(remote),
            _ => advertised,
        }
    }

    /// Fold one dequeue wait into the queue delay estimate
    pub fn record_queue_delay(&mut self, waited: Duration) {
        let sample = waited.as_secs_f64();
        self.queue_delay = QUEUE_DELAY_ALPHA * sample + (1.0 - QUEUE_DELAY_ALPHA) * self.queue_delay;
    }

    /// Current queue delay estimate in seconds
    pub fn queuing_delay(&self) -> f64 {
        self.queue_delay
    }

    /// Metric of this node as the end of a path (hop count zero)
    pub fn local_metric(&self, now: Duration) -> CrossLayerMetric {
        CrossLayerMetric::new(1.0, self.queue_delay, self.own_mobility(), 0, now)
    }

    /// Choose a random neighbor to probe
    pub fn pick_probe_target<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        neighbors: &[Ipv4Addr],
    ) -> Option<Ipv4Addr> {
        neighbors.choose(rng).copied()
    }

    /// Register an outgoing probe and return its id
    pub fn start_probe(&mut self, neighbor: Ipv4Addr, now: Duration) -> u32 {
        self.next_probe_id = self.next_probe_id.wrapping_add(1);
        let id = self.next_probe_id;
        self.probes.insert(
            id,
            OutstandingProbe {
                neighbor,
                sent_at: now,
            },
        );
        id
    }

    /// Match an echo to its probe. Echoes from anyone but the probed neighbor are ignored.
    pub fn complete_probe(&mut self, id: u32, from: Ipv4Addr, now: Duration) -> Option<ProbeResult> {
        let probe = self.probes.get(&id).copied()?;
        if probe.neighbor != from {
            trace!("Probe {} echo from {} instead of {}", id, from, probe.neighbor);
            return None;
        }
        self.probes.remove(&id);

        let rtt = now.saturating_sub(probe.sent_at);
        let quality = if rtt.is_zero() {
            1.0
        } else {
            (self.rtt_target.as_secs_f64() / rtt.as_secs_f64()).min(1.0)
        };
        Some(ProbeResult {
            neighbor: from,
            rtt,
            quality,
        })
    }

    /// Drop probes older than `timeout`, returning the neighbors that never answered
    pub fn expire_probes(&mut self, now: Duration, timeout: Duration) -> Vec<Ipv4Addr> {
        let mut failed = Vec::new();
        self.probes.retain(|_, probe| {
            let alive = now.saturating_sub(probe.sent_at) < timeout;
            if !alive {
                failed.push(probe.neighbor);
            }
            alive
        });
        failed.sort();
        failed
    }

    /// Forget everything about a lost neighbor
    pub fn forget(&mut self, neighbor: Ipv4Addr) {
        self.neighbor_motion.remove(&neighbor);
        self.probes.retain(|_, probe| probe.neighbor != neighbor);
    }

    pub fn outstanding_probes(&self) -> usize {
        self.probes.len()
    }

    pub fn clear(&mut self) {
        self.neighbor_motion.clear();
        self.probes.clear();
        self.queue_delay = 0.0;
    }
}
