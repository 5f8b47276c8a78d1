//! ARP cache

use smoltcp::wire::{EthernetAddress, Ipv4Address};

pub const ARP_CACHE_SIZE: usize = 8;

/// Fixed-size IPv4 to MAC table
///
/// Once full, new entries replace old ones in insertion order.
#[derive(Debug, Clone)]
pub struct ArpCache {
    entries: [Option<(Ipv4Address, EthernetAddress)>; ARP_CACHE_SIZE],
    next: usize,
}

impl ArpCache {
    pub const fn new() -> Self {
        Self {
            entries: [None; ARP_CACHE_SIZE],
            next: 0,
        }
    }

    pub fn lookup(&self, ip: Ipv4Address) -> Option<EthernetAddress> {
        self.entries.iter().flatten().find(|(addr, _)| *addr == ip).map(|&(_, mac)| mac)
    }

    pub fn insert(&mut self, ip: Ipv4Address, mac: EthernetAddress) {
        if let Some(slot) = self.entries.iter_mut().flatten().find(|(addr, _)| *addr == ip) {
            slot.1 = mac;
            return;
        }
        self.entries[self.next] = Some((ip, mac));
        self.next = (self.next + 1) % ARP_CACHE_SIZE;
    }

    pub fn len(&self) -> usize {
        self.entries.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ArpCache {
    fn default() -> Self {
        Self::new()
    }
}
