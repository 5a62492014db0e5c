//! Control message types
//!
//! Every control message shares one fixed layout; the meaning of the address
//! and counter fields depends on the message type:
//!
//! | Type    | destination              | origin                 | request_id        | sequence_number        |
//! |---------|--------------------------|------------------------|-------------------|------------------------|
//! | Request | sought destination       | requester              | requester counter | requester sequence     |
//! | Reply   | route destination        | requester              | echoed            | destination sequence   |
//! | Error   | unreachable destination  | broken next hop        | 0                 | last known dest seq    |
//! | Hello   | limited broadcast        | sender                 | 0                 | sender sequence        |
//! | Probe   | probed / probing node    | sender                 | probe id          | 0                      |
//! | Repair  | sought destination       | repairing node         | repair id         | last known dest seq    |
//!
//! `hop_count` is the number of hops already travelled for Request/Reply and
//! distinguishes a probe (`PROBE_REQUEST`) from its echo (`PROBE_ECHO`).

use crate::metric::CrossLayerMetric;
use std::net::Ipv4Addr;
use std::time::Duration;

/// Probe sent to a neighbor
pub const PROBE_REQUEST: u8 = 0;
/// Probe echoed back to the prober
pub const PROBE_ECHO: u8 = 1;

/// Control message type (first byte on the wire)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Route request, flooded (0x01)
    Request = 1,
    /// Route reply, unicast along the reverse path (0x02)
    Reply = 2,
    /// Route error, sent upstream (0x03)
    Error = 3,
    /// Neighbor beacon (0x04)
    Hello = 4,
    /// Link quality probe (0x05)
    Probe = 5,
    /// One-hop local repair query (0x06)
    Repair = 6,
}

impl MessageType {
    /// Convert from the wire byte
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(MessageType::Request),
            2 => Some(MessageType::Reply),
            3 => Some(MessageType::Error),
            4 => Some(MessageType::Hello),
            5 => Some(MessageType::Probe),
            6 => Some(MessageType::Repair),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Request => write!(f, "RREQ"),
            Self::Reply => write!(f, "RREP"),
            Self::Error => write!(f, "RERR"),
            Self::Hello => write!(f, "HELLO"),
            Self::Probe => write!(f, "PROBE"),
            Self::Repair => write!(f, "REPAIR"),
        }
    }
}

/// A decoded control message
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlMessage {
    pub message_type: MessageType,
    pub hop_count: u8,
    pub request_id: u32,
    pub destination: Ipv4Addr,
    pub origin: Ipv4Addr,
    pub link_quality: f64,
    /// Accumulated queuing delay in seconds
    pub delay: f64,
    pub mobility: f64,
    pub sequence_number: u32,
}

impl ControlMessage {
    fn with_metric(
        message_type: MessageType,
        destination: Ipv4Addr,
        origin: Ipv4Addr,
        metric: &CrossLayerMetric,
    ) -> Self {
        Self {
            message_type,
            hop_count: 0,
            request_id: 0,
            destination,
            origin,
            link_quality: metric.link_quality,
            delay: metric.queuing_delay,
            mobility: metric.mobility,
            sequence_number: 0,
        }
    }

    /// Route request for `destination` originated by `origin`
    pub fn request(
        destination: Ipv4Addr,
        origin: Ipv4Addr,
        request_id: u32,
        sequence_number: u32,
        metric: &CrossLayerMetric,
    ) -> Self {
        Self {
            request_id,
            sequence_number,
            ..Self::with_metric(MessageType::Request, destination, origin, metric)
        }
    }

    /// Route reply advertising a path to `destination`, travelling back to `origin`
    pub fn reply(
        destination: Ipv4Addr,
        origin: Ipv4Addr,
        request_id: u32,
        hop_count: u8,
        sequence_number: u32,
        metric: &CrossLayerMetric,
    ) -> Self {
        Self {
            request_id,
            hop_count,
            sequence_number,
            ..Self::with_metric(MessageType::Reply, destination, origin, metric)
        }
    }

    /// Route error: `destination` is no longer reachable through `broken_hop`
    pub fn error(destination: Ipv4Addr, broken_hop: Ipv4Addr, sequence_number: u32) -> Self {
        Self {
            sequence_number,
            ..Self::with_metric(
                MessageType::Error,
                destination,
                broken_hop,
                &CrossLayerMetric::default(),
            )
        }
    }

    /// Neighbor beacon advertising the sender's local state
    pub fn hello(origin: Ipv4Addr, sequence_number: u32, metric: &CrossLayerMetric) -> Self {
        Self {
            sequence_number,
            ..Self::with_metric(MessageType::Hello, Ipv4Addr::BROADCAST, origin, metric)
        }
    }

    /// Probe (or probe echo when `hop_count == PROBE_ECHO`)
    pub fn probe(destination: Ipv4Addr, origin: Ipv4Addr, probe_id: u32, hop_count: u8) -> Self {
        Self {
            request_id: probe_id,
            hop_count,
            ..Self::with_metric(
                MessageType::Probe,
                destination,
                origin,
                &CrossLayerMetric::default(),
            )
        }
    }

    /// One-hop repair query for `destination`
    pub fn repair(
        destination: Ipv4Addr,
        origin: Ipv4Addr,
        repair_id: u32,
        sequence_number: u32,
    ) -> Self {
        Self {
            request_id: repair_id,
            sequence_number,
            ..Self::with_metric(
                MessageType::Repair,
                destination,
                origin,
                &CrossLayerMetric::default(),
            )
        }
    }

    /// Metric carried by the message, stamped with `now`
    pub fn metric(&self, now: Duration) -> CrossLayerMetric {
        CrossLayerMetric::new(
            self.link_quality,
            self.delay,
            self.mobility,
            self.hop_count as u32,
            now,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_conversion() {
        assert_eq!(MessageType::Request.as_u8(), 1);
        assert_eq!(MessageType::Repair.as_u8(), 6);
        assert_eq!(MessageType::from_u8(2), Some(MessageType::Reply));
        assert_eq!(MessageType::from_u8(0), None);
        assert_eq!(MessageType::from_u8(7), None);
    }

    #[test]
    fn test_hello_is_broadcast() {
        let origin = Ipv4Addr::new(10, 0, 0, 1);
        let hello = ControlMessage::hello(origin, 9, &CrossLayerMetric::default());
        assert_eq!(hello.destination, Ipv4Addr::BROADCAST);
        assert_eq!(hello.origin, origin);
        assert_eq!(hello.sequence_number, 9);
    }

    #[test]
    fn test_metric_carries_hop_count() {
        let metric = CrossLayerMetric::new(0.7, 0.01, 0.5, 0, Duration::ZERO);
        let reply = ControlMessage::reply(
            Ipv4Addr::new(10, 0, 0, 3),
            Ipv4Addr::new(10, 0, 0, 1),
            4,
            2,
            11,
            &metric,
        );
        let carried = reply.metric(Duration::from_secs(1));
        assert_eq!(carried.hop_count, 2);
        assert_eq!(carried.link_quality, 0.7);
        assert_eq!(carried.timestamp, Duration::from_secs(1));
    }
}
