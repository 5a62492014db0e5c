//! Forwarding plane: traffic classes and the outbound priority queue

pub mod classifier;
pub mod scheduler;

pub use classifier::{PacketHeader, TrafficClass, TrafficClassifier, PROTO_TCP, PROTO_UDP};
pub use scheduler::{Dequeued, PriorityScheduler, QueueError};
