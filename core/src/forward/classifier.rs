// Traffic classification for the forwarding queue
//
// Control traffic and datagrams are latency sensitive; streams tolerate delay.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

pub const PROTO_TCP: u8 = 6;
pub const PROTO_UDP: u8 = 17;

/// Service class of a forwarded packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TrafficClass {
    High,
    Medium,
    Normal,
}

impl TrafficClass {
    pub const ALL: [TrafficClass; 3] = [TrafficClass::High, TrafficClass::Medium, TrafficClass::Normal];

    /// Queue index (0 = High)
    pub fn index(self) -> usize {
        match self {
            TrafficClass::High => 0,
            TrafficClass::Medium => 1,
            TrafficClass::Normal => 2,
        }
    }
}

impl fmt::Display for TrafficClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrafficClass::High => write!(f, "high"),
            TrafficClass::Medium => write!(f, "medium"),
            TrafficClass::Normal => write!(f, "normal"),
        }
    }
}

/// The parts of a packet header routing decisions look at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    /// IP protocol number
    pub protocol: u8,
    pub source_port: Option<u16>,
    pub destination_port: Option<u16>,
}

impl PacketHeader {
    pub fn new(source: Ipv4Addr, destination: Ipv4Addr, protocol: u8) -> Self {
        Self {
            source,
            destination,
            protocol,
            source_port: None,
            destination_port: None,
        }
    }

    pub fn with_ports(mut self, source_port: u16, destination_port: u16) -> Self {
        self.source_port = Some(source_port);
        self.destination_port = Some(destination_port);
        self
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TrafficClassifier {
    control_port: u16,
}

impl TrafficClassifier {
    pub fn new(control_port: u16) -> Self {
        Self { control_port }
    }

    pub fn classify(&self, header: &PacketHeader) -> TrafficClass {
        let control = header.source_port == Some(self.control_port)
            || header.destination_port == Some(self.control_port);

        match header.protocol {
            _ if control => TrafficClass::High,
            PROTO_UDP => TrafficClass::High,
            PROTO_TCP => TrafficClass::Medium,
            _ => TrafficClass::Normal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(protocol: u8) -> PacketHeader {
        PacketHeader::new(Ipv4Addr::new(10, 1, 1, 1), Ipv4Addr::new(10, 1, 1, 3), protocol)
    }

    #[test]
    fn test_classes_by_protocol() {
        let classifier = TrafficClassifier::new(654);
        assert_eq!(classifier.classify(&header(PROTO_UDP)), TrafficClass::High);
        assert_eq!(
            classifier.classify(&header(PROTO_TCP).with_ports(40_000, 80)),
            TrafficClass::Medium
        );
        assert_eq!(classifier.classify(&header(1)), TrafficClass::Normal);
    }

    #[test]
    fn test_control_port_is_high_priority() {
        let classifier = TrafficClassifier::new(654);
        let tcp_control = header(PROTO_TCP).with_ports(654, 9_000);
        assert_eq!(classifier.classify(&tcp_control), TrafficClass::High);
    }

    #[test]
    fn test_class_indices() {
        let indices: Vec<usize> = TrafficClass::ALL.iter().map(|c| c.index()).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }
}
