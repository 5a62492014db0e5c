// MeshRoute Core: reactive multi-hop routing for wireless ad hoc networks
//
// On-demand route discovery ranked by a cross-layer metric (link quality,
// queuing delay, mobility, hop count), tiered fast local repair and a
// weighted priority forwarding queue. The engine owns no sockets and no
// clock; a host drives it with datagrams, link feedback and timer ticks.

pub mod config;
pub mod engine;
pub mod forward;
pub mod interface;
pub mod link;
pub mod message;
pub mod metric;
pub mod routing;
pub mod timer;

use std::net::Ipv4Addr;
use thiserror::Error;

pub use config::{ConfigError, ProtocolConfig, DEFAULT_CONTROL_PORT};
pub use engine::{
    Action, DropReason, ForwardOutcome, LinkFeedback, OutboundPacket, RouteHandle,
    RoutingProtocol, RoutingSummary,
};
pub use forward::{PacketHeader, QueueError, TrafficClass};
pub use interface::InterfaceAddress;
pub use link::Motion;
pub use message::{decode_message, encode_message, ControlMessage, MessageType, WireError};
pub use metric::{CrossLayerMetric, MetricWeights};
pub use routing::{DiscoveryState, RepairTier, RoutingTableDump};

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RoutingError {
    #[error("No route to {destination} yet; discovery in progress")]
    NoRouteAvailable { destination: Ipv4Addr },

    #[error("Destination unreachable: {destination}")]
    DestinationUnreachable { destination: Ipv4Addr },

    #[error("No routing interfaces")]
    NoInterfaces,

    #[error("Duplicate control message from {origin} (request {request_id})")]
    DuplicateControlMessage { origin: Ipv4Addr, request_id: u32 },

    #[error("Forwarding to {destination} via {next_hop} failed")]
    ForwardingFailure {
        destination: Ipv4Addr,
        next_hop: Ipv4Addr,
    },

    #[error("Unknown interface: {0}")]
    UnknownInterface(u32),

    #[error("Forwarding queue: {0}")]
    Queue(#[from] QueueError),

    #[error("Malformed control message: {0}")]
    Wire(#[from] WireError),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

impl RoutingError {
    /// Failures the host may retry later without changing anything
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RoutingError::NoRouteAvailable { .. }
                | RoutingError::DestinationUnreachable { .. }
                | RoutingError::Queue(_)
        )
    }
}

// ============================================================================
// TESTS
// ============================================================================
