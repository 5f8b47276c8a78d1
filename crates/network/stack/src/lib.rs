//! bootfs-net - ARP and IPv4/UDP over a raw Ethernet driver
//!
//! Just enough networking for the NFS client: resolve the server (or the
//! gateway) with ARP, frame UDP datagrams with smoltcp wire types, and
//! hand back the payload of datagrams addressed to a bound local port.
//! There are no sockets in the BSD sense and no IP fragment reassembly.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

use alloc::vec;

use bootfs_driver_traits::{DriverError, DriverResult};
use log::{debug, trace, warn};
use smoltcp::phy::ChecksumCapabilities;
use smoltcp::wire::{
    ArpOperation, ArpPacket, ArpRepr, EthernetAddress, EthernetFrame, EthernetProtocol, EthernetRepr, IpAddress,
    IpProtocol, Ipv4Address, Ipv4Packet, Ipv4Repr, UdpPacket,
};

pub mod arp;
pub mod udp;


pub use arp::{ArpCache, ARP_CACHE_SIZE};
pub use udp::UdpConnection;

const ETHERNET_HEADER: usize = 14;
const ARP_PACKET: usize = 28;
const IPV4_HEADER: usize = 20;
const UDP_HEADER: usize = 8;

/// Largest frame the stack sends or accepts
pub const MAX_FRAME: usize = 1514;

/// Wait for an ARP reply before asking again
pub const ARP_TIMEOUT_MS: u64 = 1000;
/// ARP requests sent before the host is declared unreachable
pub const ARP_RETRIES: u32 = 3;

/// Raw Ethernet driver
pub trait NetworkDriver {
    fn get_mac_address(&self) -> Option<[u8; 6]>;
    fn send_packet(&self, data: &[u8]) -> DriverResult<()>;
    /// Copy the next received frame into `buffer` (non-blocking)
    fn receive_packet(&self, buffer: &mut [u8]) -> Option<usize>;
    /// Monotonic milliseconds
    fn now_ms(&self) -> u64;
    /// Wait for the next interrupt
    fn halt(&self) {}
}

/// Network configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetConfig {
    pub ip_addr: Ipv4Address,
    pub netmask: Ipv4Address,
    pub gateway: Ipv4Address,
    pub mac_addr: EthernetAddress,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            ip_addr: Ipv4Address::new(10, 0, 2, 15),
            netmask: Ipv4Address::new(255, 255, 255, 0),
            gateway: Ipv4Address::new(10, 0, 2, 2),
            mac_addr: EthernetAddress([0x52, 0x54, 0x00, 0x12, 0x34, 0x56]),
        }
    }
}

/// A UDP datagram addressed to us
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpMeta {
    pub src_addr: Ipv4Address,
    pub src_port: u16,
    pub dst_port: u16,
    /// Payload bytes copied out
    pub len: usize,
}

/// Minimal network stack
pub struct NetworkStack<D: NetworkDriver> {
    pub config: NetConfig,
    arp: ArpCache,
    driver: D,
}

impl<D: NetworkDriver> NetworkStack<D> {
    /// Create a stack with the default addresses and the driver's MAC
    pub fn new(driver: D) -> Option<Self> {
        let mac = driver.get_mac_address()?;
        let config = NetConfig {
            mac_addr: EthernetAddress(mac),
            ..NetConfig::default()
        };
        Some(Self::with_config(driver, config))
    }

    pub fn with_config(driver: D, config: NetConfig) -> Self {
        Self {
            config,
            arp: ArpCache::new(),
            driver,
        }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn arp_cache(&self) -> &ArpCache {
        &self.arp
    }

    pub fn now_ms(&self) -> u64 {
        self.driver.now_ms()
    }

    pub fn halt(&self) {
        self.driver.halt()
    }

    fn is_local(&self, ip: Ipv4Address) -> bool {
        let mask = self.config.netmask.0;
        let mine = self.config.ip_addr.0;
        ip.0.iter()
            .zip(mine.iter())
            .zip(mask.iter())
            .all(|((a, b), m)| a & m == b & m)
    }

    /// Next hop for `target`: itself on the local subnet, else the gateway
    pub fn next_hop(&self, target: Ipv4Address) -> Ipv4Address {
        if self.is_local(target) {
            target
        } else {
            self.config.gateway
        }
    }

    fn send_arp(&self, operation: ArpOperation, target_mac: EthernetAddress, target_ip: Ipv4Address) -> DriverResult<()> {
        let arp_repr = ArpRepr::EthernetIpv4 {
            operation,
            source_hardware_addr: self.config.mac_addr,
            source_protocol_addr: self.config.ip_addr,
            target_hardware_addr: target_mac,
            target_protocol_addr: target_ip,
        };
        let eth_repr = EthernetRepr {
            src_addr: self.config.mac_addr,
            dst_addr: match operation {
                ArpOperation::Request => EthernetAddress::BROADCAST,
                _ => target_mac,
            },
            ethertype: EthernetProtocol::Arp,
        };

        let mut buffer = vec![0u8; ETHERNET_HEADER + ARP_PACKET];
        let mut eth_frame = EthernetFrame::new_unchecked(&mut buffer);
        eth_repr.emit(&mut eth_frame);
        let mut arp_packet = ArpPacket::new_unchecked(eth_frame.payload_mut());
        arp_repr.emit(&mut arp_packet);

        self.driver.send_packet(&buffer)
    }

    /// MAC address of `ip`, asking the network when it is not cached
    pub fn resolve(&mut self, ip: Ipv4Address) -> DriverResult<EthernetAddress> {
        if let Some(mac) = self.arp.lookup(ip) {
            return Ok(mac);
        }

        let mut rx_buf = [0u8; MAX_FRAME];
        for attempt in 0..ARP_RETRIES {
            debug!("net: ARP who-has {} (attempt {})", ip, attempt + 1);
            self.send_arp(ArpOperation::Request, EthernetAddress([0; 6]), ip)?;

            let start = self.driver.now_ms();
            while self.driver.now_ms().wrapping_sub(start) < ARP_TIMEOUT_MS {
                if let Some(len) = self.driver.receive_packet(&mut rx_buf) {
                    // Datagrams arriving now are dropped; RPC retransmits
                    self.process_frame(&rx_buf[..len.min(MAX_FRAME)], None);
                    if let Some(mac) = self.arp.lookup(ip) {
                        return Ok(mac);
                    }
                }
                self.driver.halt();
            }
        }

        warn!("net: no ARP reply from {}", ip);
        Err(DriverError::Timeout)
    }

    /// Send one UDP datagram
    pub fn send_udp(&mut self, dst_addr: Ipv4Address, src_port: u16, dst_port: u16, payload: &[u8]) -> DriverResult<()> {
        let udp_len = UDP_HEADER + payload.len();
        let total_len = ETHERNET_HEADER + IPV4_HEADER + udp_len;
        if total_len > MAX_FRAME {
            return Err(DriverError::BufferTooSmall);
        }
        let dst_mac = self.resolve(self.next_hop(dst_addr))?;

        let mut buffer = vec![0u8; total_len];
        let eth_repr = EthernetRepr {
            src_addr: self.config.mac_addr,
            dst_addr: dst_mac,
            ethertype: EthernetProtocol::Ipv4,
        };
        let mut eth_frame = EthernetFrame::new_unchecked(&mut buffer);
        eth_repr.emit(&mut eth_frame);

        let ip_repr = Ipv4Repr {
            src_addr: self.config.ip_addr,
            dst_addr,
            next_header: IpProtocol::Udp,
            payload_len: udp_len,
            hop_limit: 64,
        };
        let mut ip_packet = Ipv4Packet::new_unchecked(eth_frame.payload_mut());
        ip_repr.emit(&mut ip_packet, &ChecksumCapabilities::default());

        let mut udp_packet = UdpPacket::new_unchecked(ip_packet.payload_mut());
        udp_packet.set_src_port(src_port);
        udp_packet.set_dst_port(dst_port);
        udp_packet.set_len(udp_len as u16);
        udp_packet.payload_mut()[..payload.len()].copy_from_slice(payload);
        udp_packet.fill_checksum(
            &IpAddress::Ipv4(self.config.ip_addr),
            &IpAddress::Ipv4(dst_addr),
        );

        trace!("net: UDP {}:{} -> {}:{} ({} bytes)", self.config.ip_addr, src_port, dst_addr, dst_port, payload.len());
        self.driver.send_packet(&buffer)
    }

    /// Receive at most one frame and return its UDP payload if it is for `local_port`
    pub fn poll_udp(&mut self, local_port: u16, buf: &mut [u8]) -> Option<UdpMeta> {
        let mut rx_buf = [0u8; MAX_FRAME];
        let len = self.driver.receive_packet(&mut rx_buf)?;
        self.process_frame(&rx_buf[..len.min(MAX_FRAME)], Some((local_port, buf)))
    }

    /// Handle ARP traffic; copy out a UDP payload for the bound port
    fn process_frame(&mut self, data: &[u8], udp: Option<(u16, &mut [u8])>) -> Option<UdpMeta> {
        let eth_frame = EthernetFrame::new_checked(data).ok()?;

        match eth_frame.ethertype() {
            EthernetProtocol::Arp => {
                let arp = ArpPacket::new_checked(eth_frame.payload()).ok()?;
                if let Ok(ArpRepr::EthernetIpv4 {
                    operation,
                    source_hardware_addr,
                    source_protocol_addr,
                    target_protocol_addr,
                    ..
                }) = ArpRepr::parse(&arp)
                {
                    if operation == ArpOperation::Reply {
                        self.arp.insert(source_protocol_addr, source_hardware_addr);
                    }
                    if operation == ArpOperation::Request && target_protocol_addr == self.config.ip_addr {
                        self.arp.insert(source_protocol_addr, source_hardware_addr);
                        let _ = self.send_arp(ArpOperation::Reply, source_hardware_addr, source_protocol_addr);
                    }
                }
                None
            }
            EthernetProtocol::Ipv4 => {
                let ip_packet = Ipv4Packet::new_checked(eth_frame.payload()).ok()?;
                if ip_packet.dst_addr() != self.config.ip_addr || ip_packet.next_header() != IpProtocol::Udp {
                    return None;
                }
                if ip_packet.more_frags() || ip_packet.frag_offset() != 0 {
                    debug!("net: dropping IP fragment from {}", ip_packet.src_addr());
                    return None;
                }
                let (local_port, buf) = udp?;
                let udp_packet = UdpPacket::new_checked(ip_packet.payload()).ok()?;
                if udp_packet.dst_port() != local_port {
                    return None;
                }
                let src_addr = ip_packet.src_addr();
                // A zero checksum means the sender did not compute one
                if udp_packet.checksum() != 0
                    && !udp_packet.verify_checksum(&IpAddress::Ipv4(src_addr), &IpAddress::Ipv4(self.config.ip_addr))
                {
                    debug!("net: bad UDP checksum from {}", src_addr);
                    return None;
                }
                let payload = udp_packet.payload();
                let len = payload.len().min(buf.len());
                buf[..len].copy_from_slice(&payload[..len]);
                Some(UdpMeta {
                    src_addr,
                    src_port: udp_packet.src_port(),
                    dst_port: local_port,
                    len,
                })
            }
            _ => None,
        }
    }
}
