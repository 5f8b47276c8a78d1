//! UDP endpoint for the NFS client

use alloc::sync::Arc;

use bootfs_driver_traits::{DriverResult, Ipv4Addr, UdpSocket};
use log::trace;
use smoltcp::wire::Ipv4Address;
use spin::Mutex;

use crate::{NetworkDriver, NetworkStack};

/// Local port used when none is given; below 1024 so servers exporting
/// with `secure` accept AUTH_UNIX calls from us
pub const DEFAULT_LOCAL_PORT: u16 = 1000;

/// One local port talking to one remote host
///
/// Several connections may share a stack. Each poll consumes at most one
/// frame, and frames for other ports are dropped.
pub struct UdpConnection<D: NetworkDriver> {
    stack: Arc<Mutex<NetworkStack<D>>>,
    remote: Ipv4Address,
    local_port: u16,
}

impl<D: NetworkDriver> UdpConnection<D> {
    pub fn new(stack: Arc<Mutex<NetworkStack<D>>>, remote: Ipv4Addr) -> Self {
        Self::bind(stack, remote, DEFAULT_LOCAL_PORT)
    }

    pub fn bind(stack: Arc<Mutex<NetworkStack<D>>>, remote: Ipv4Addr, local_port: u16) -> Self {
        Self {
            stack,
            remote: Ipv4Address(remote),
            local_port,
        }
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub fn stack(&self) -> &Arc<Mutex<NetworkStack<D>>> {
        &self.stack
    }
}

impl<D: NetworkDriver> UdpSocket for UdpConnection<D> {
    fn remote_addr(&self) -> Ipv4Addr {
        self.remote.0
    }

    fn send_to(&mut self, port: u16, payload: &[u8]) -> DriverResult<()> {
        self.stack.lock().send_udp(self.remote, self.local_port, port, payload)
    }

    fn poll_recv(&mut self, buf: &mut [u8]) -> DriverResult<Option<usize>> {
        let meta = match self.stack.lock().poll_udp(self.local_port, buf) {
            Some(meta) => meta,
            None => return Ok(None),
        };
        if meta.src_addr != self.remote {
            trace!("net: ignoring datagram from {}", meta.src_addr);
            return Ok(None);
        }
        Ok(Some(meta.len))
    }

    fn now_ms(&self) -> u64 {
        self.stack.lock().now_ms()
    }

    fn idle(&mut self) {
        self.stack.lock().halt()
    }
}
