//! UDP Socket Trait
//!
//! Implemented by the network stack.
//! Used by network filesystem clients (NFS over ONC RPC).
//!
//! The socket is already bound to a local port and connected to one
//! remote host; only the destination port varies per datagram, because
//! portmap, mountd and nfsd listen on different ports of the same server.

use crate::DriverResult;

/// IPv4 address in network order
pub type Ipv4Addr = [u8; 4];

/// A bound, single-peer UDP endpoint
pub trait UdpSocket {
    /// Address of the remote host
    fn remote_addr(&self) -> Ipv4Addr;

    /// Send one datagram to `port` on the remote host
    fn send_to(&mut self, port: u16, payload: &[u8]) -> DriverResult<()>;

    /// Poll for a datagram from the remote host (non-blocking)
    ///
    /// # Returns
    /// * `Ok(Some(len))` - Datagram received, len bytes written to buf
    /// * `Ok(None)` - Nothing pending
    fn poll_recv(&mut self, buf: &mut [u8]) -> DriverResult<Option<usize>>;

    /// Monotonic time in milliseconds, used for retransmission deadlines
    fn now_ms(&self) -> u64;

    /// Give the CPU away while waiting (e.g. `hlt` until the next tick)
    fn idle(&mut self) {}
}

/// Format an IPv4 address as dotted quad
pub fn format_ipv4(addr: &Ipv4Addr) -> alloc::string::String {
    alloc::format!("{}.{}.{}.{}", addr[0], addr[1], addr[2], addr[3])
}
