// Participating network interfaces
//
// The engine routes over IPv4 interfaces carrying exactly one address each.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

/// An interface index with its address and prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InterfaceAddress {
    pub index: u32,
    pub address: Ipv4Addr,
    pub prefix_len: u8,
}

impl InterfaceAddress {
    pub fn new(index: u32, address: Ipv4Addr, prefix_len: u8) -> Self {
        Self {
            index,
            address,
            prefix_len: prefix_len.min(32),
        }
    }

    pub fn netmask(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.mask_bits())
    }

    /// Subnet-directed broadcast address
    pub fn broadcast_address(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.address) | !self.mask_bits())
    }

    /// Whether `other` is on this interface's subnet
    pub fn contains(&self, other: Ipv4Addr) -> bool {
        let mask = self.mask_bits();
        u32::from(self.address) & mask == u32::from(other) & mask
    }

    fn mask_bits(&self) -> u32 {
        match self.prefix_len.min(32) {
            0 => 0,
            len => u32::MAX << (32 - u32::from(len)),
        }
    }
}

impl fmt::Display for InterfaceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}/{}", self.index, self.address, self.prefix_len)
    }
}
