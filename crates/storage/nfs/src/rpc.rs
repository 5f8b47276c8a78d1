//! ONC RPC (RFC 5531) over UDP
//!
//! One call is outstanding at a time. Each call gets a fresh transaction
//! id; retransmissions reuse it. A reply carrying the previous id is a late
//! answer to an earlier retransmission and is dropped, anything else with a
//! foreign id fails the call.

use alloc::vec;
use alloc::vec::Vec;

use bootfs_driver_traits::UdpSocket;
use log::{debug, warn};

use crate::error::{Error, Result, RpcError};
use crate::proto::{
    MOUNT_VERSION, NFS_VERSION, PORTMAP_PORT, PORTMAP_VERSION, PROG_MOUNT, PROG_NFS, PROG_PORTMAP,
};
use crate::xdr::{XdrDecoder, XdrEncoder};

const MSG_CALL: u32 = 0;
const MSG_REPLY: u32 = 1;
const RPC_VERSION: u32 = 2;
const MSG_ACCEPTED: u32 = 0;
const SUCCESS: u32 = 0;

const AUTH_NONE: u32 = 0;
const AUTH_UNIX: u32 = 1;
/// Largest opaque auth body (RFC 5531)
const MAX_AUTH_BYTES: usize = 400;

/// Receive buffer; an Ethernet frame always fits
const RX_BUFFER: usize = 2048;

/// RPC program spoken to on the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Program {
    Portmap,
    Mount,
    Nfs,
}

impl Program {
    pub const fn number(self) -> u32 {
        match self {
            Program::Portmap => PROG_PORTMAP,
            Program::Mount => PROG_MOUNT,
            Program::Nfs => PROG_NFS,
        }
    }

    pub const fn version(self) -> u32 {
        match self {
            Program::Portmap => PORTMAP_VERSION,
            Program::Mount => MOUNT_VERSION,
            Program::Nfs => NFS_VERSION,
        }
    }
}

/// Outcome of checking one received datagram
#[derive(Debug, PartialEq, Eq)]
enum Reply {
    /// Answer to the previous call, keep waiting
    Stale,
    /// Procedure results start at this byte offset
    Body(usize),
}

fn check_reply(packet: &[u8], xid: u32) -> Result<Reply> {
    let mut dec = XdrDecoder::new(packet);
    let found = dec.get_u32()?;
    if found != xid {
        if xid.wrapping_sub(found) == 1 {
            return Ok(Reply::Stale);
        }
        return Err(RpcError::XidMismatch { expected: xid, found }.into());
    }
    let mtype = dec.get_u32()?;
    if mtype != MSG_REPLY {
        return Err(RpcError::NotAReply(mtype).into());
    }
    if dec.get_u32()? != MSG_ACCEPTED {
        // rejected_reply: reject_stat (RPC_MISMATCH or AUTH_ERROR)
        return Err(RpcError::Denied(dec.get_u32()?).into());
    }
    // Verifier: flavor and opaque body
    dec.get_u32()?;
    dec.get_opaque(MAX_AUTH_BYTES)?;
    let accept = dec.get_u32()?;
    if accept != SUCCESS {
        return Err(RpcError::NotAccepted(accept).into());
    }
    Ok(Reply::Body(dec.position()))
}

/// Synchronous RPC client bound to one server
pub struct RpcClient<S: UdpSocket> {
    socket: S,
    xid: u32,
    timeout_ms: u64,
    retries: u32,
    mount_port: u16,
    nfs_port: u16,
    rx: Vec<u8>,
}

impl<S: UdpSocket> RpcClient<S> {
    pub fn new(socket: S, timeout_ms: u64, retries: u32) -> Self {
        // Seed from the clock so a rebooted client does not replay old ids
        let xid = socket.now_ms() as u32;
        RpcClient {
            socket,
            xid,
            timeout_ms,
            retries: retries.max(1),
            mount_port: 0,
            nfs_port: 0,
            rx: vec![0u8; RX_BUFFER],
        }
    }

    pub fn socket(&self) -> &S {
        &self.socket
    }

    pub fn socket_mut(&mut self) -> &mut S {
        &mut self.socket
    }

    /// Destination port for `prog`
    pub fn port(&self, prog: Program) -> u16 {
        match prog {
            Program::Portmap => PORTMAP_PORT,
            Program::Mount => self.mount_port,
            Program::Nfs => self.nfs_port,
        }
    }

    pub fn set_port(&mut self, prog: Program, port: u16) {
        match prog {
            Program::Portmap => {}
            Program::Mount => self.mount_port = port,
            Program::Nfs => self.nfs_port = port,
        }
    }

    /// Transaction id of the last call
    pub fn xid(&self) -> u32 {
        self.xid
    }

    fn encode_call(&self, prog: Program, procedure: u32, args: &[u8]) -> Vec<u8> {
        let mut enc = XdrEncoder::new();
        enc.put_u32(self.xid)
            .put_u32(MSG_CALL)
            .put_u32(RPC_VERSION)
            .put_u32(prog.number())
            .put_u32(prog.version())
            .put_u32(procedure);
        match prog {
            // The portmapper takes anonymous calls
            Program::Portmap => {
                enc.put_u32(AUTH_NONE).put_u32(0);
            }
            // AUTH_UNIX as root with an empty machine name: stamp, name,
            // uid, gid, no auxiliary gids
            Program::Mount | Program::Nfs => {
                enc.put_u32(AUTH_UNIX)
                    .put_u32(20)
                    .put_u32(0)
                    .put_u32(0)
                    .put_u32(0)
                    .put_u32(0)
                    .put_u32(0);
            }
        }
        enc.put_u32(AUTH_NONE).put_u32(0);
        enc.put_fixed(args);
        enc.into_bytes()
    }

    /// Issue a call and wait for its results
    ///
    /// Returns the procedure-specific part of the reply. The request is
    /// retransmitted after every `timeout_ms` without an answer, up to
    /// `retries` transmissions in total.
    pub fn call(&mut self, prog: Program, procedure: u32, args: &[u8]) -> Result<Vec<u8>> {
        self.xid = self.xid.wrapping_add(1);
        let request = self.encode_call(prog, procedure, args);
        let port = self.port(prog);
        debug!("rpc: prog {} proc {} xid {:#x} -> port {}", prog.number(), procedure, self.xid, port);

        for attempt in 0..self.retries {
            if attempt > 0 {
                debug!("rpc: retransmit xid {:#x} (attempt {})", self.xid, attempt + 1);
            }
            self.socket.send_to(port, &request)?;
            let deadline = self.socket.now_ms().saturating_add(self.timeout_ms);

            loop {
                if let Some(len) = self.socket.poll_recv(&mut self.rx)? {
                    let packet = &self.rx[..len.min(self.rx.len())];
                    match check_reply(packet, self.xid)? {
                        Reply::Stale => debug!("rpc: dropping stale reply"),
                        Reply::Body(start) => return Ok(packet[start..].to_vec()),
                    }
                    continue;
                }
                if self.socket.now_ms() >= deadline {
                    break;
                }
                self.socket.idle();
            }
        }

        warn!(
            "rpc: prog {} proc {} timed out after {} attempts",
            prog.number(),
            procedure,
            self.retries
        );
        Err(Error::TimedOut)
    }
}
