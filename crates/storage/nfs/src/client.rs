//! NFSv3 client operations
//!
//! Mounting asks the portmapper for the mountd and nfsd ports (unless the
//! options pin them), then fetches the export's root handle with MNT.
//! Paths are resolved one LOOKUP per component starting from that handle.

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use bootfs_driver_traits::{format_ipv4, UdpSocket};
use log::{debug, info, warn};

use crate::error::{Error, Result, XdrError};
use crate::options::NfsOptions;
use crate::proto::{
    decode_post_op_attr, Fattr3, NfsStat, IPPROTO_UDP, MAXPATHLEN, MOUNTPROC3_MNT, MOUNTPROC3_UMNT,
    NFS3_COOKIEVERFSIZE, NFS3_FHSIZE, NFSPROC3_GETATTR, NFSPROC3_LOOKUP, NFSPROC3_READ, NFSPROC3_READDIR,
    NFSPROC3_READLINK, NFS_VERSION, PORTMAP_GETPORT, READDIR_COUNT, READ_CHUNK,
};
use crate::rpc::{Program, RpcClient};
use crate::xdr::{XdrDecoder, XdrEncoder};

/// Options always handed to the kernel for an NFS root
pub const ROOT_NFS_OPTS: &str = "v3,tcp";

/// Opaque server-side file handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHandle(Vec<u8>);

impl FileHandle {
    pub fn new(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > NFS3_FHSIZE {
            return Err(XdrError::TooLong {
                len: bytes.len() as u32,
                max: NFS3_FHSIZE as u32,
            }
            .into());
        }
        Ok(FileHandle(bytes.to_vec()))
    }

    fn decode(dec: &mut XdrDecoder<'_>) -> Result<Self> {
        Ok(FileHandle(dec.get_opaque(NFS3_FHSIZE)?.to_vec()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// READ result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadReply {
    pub data: Vec<u8>,
    pub eof: bool,
}

/// One READDIR entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry3 {
    pub fileid: u64,
    pub name: String,
    pub cookie: u64,
}

/// A mounted export
pub struct NfsClient<S: UdpSocket> {
    rpc: RpcClient<S>,
    options: NfsOptions,
    root: FileHandle,
}

impl<S: UdpSocket> NfsClient<S> {
    /// Discover ports and mount the export named by `options`
    pub fn mount(socket: S, options: NfsOptions) -> Result<Self> {
        let mut rpc = RpcClient::new(socket, options.timeout_ms, options.retries);

        for (prog, manual) in [(Program::Mount, options.mount_port), (Program::Nfs, options.nfs_port)] {
            let port = match manual {
                Some(port) => port,
                None => getport(&mut rpc, prog)?,
            };
            debug!("nfs: program {} on port {}", prog.number(), port);
            rpc.set_port(prog, port);
        }

        let mut args = XdrEncoder::new();
        args.put_str(&options.path);
        let reply = rpc.call(Program::Mount, MOUNTPROC3_MNT, args.as_bytes())?;
        let mut dec = XdrDecoder::new(&reply);
        match dec.get_u32()? {
            0 => {}
            status => {
                warn!("nfs: server refused to mount {} ({})", options.path, status);
                return Err(Error::MountRefused(status));
            }
        }
        let root = FileHandle::decode(&mut dec)?;

        info!("nfs: mounted {}:{}", format_ipv4(&options.server), options.path);
        Ok(NfsClient { rpc, options, root })
    }

    /// Tell mountd the export is no longer in use
    pub fn unmount(&mut self) -> Result<()> {
        let mut args = XdrEncoder::new();
        args.put_str(&self.options.path);
        self.rpc.call(Program::Mount, MOUNTPROC3_UMNT, args.as_bytes())?;
        Ok(())
    }

    pub fn options(&self) -> &NfsOptions {
        &self.options
    }

    pub fn root(&self) -> &FileHandle {
        &self.root
    }

    pub fn rpc(&self) -> &RpcClient<S> {
        &self.rpc
    }

    pub fn mount_port(&self) -> u16 {
        self.rpc.port(Program::Mount)
    }

    pub fn nfs_port(&self) -> u16 {
        self.rpc.port(Program::Nfs)
    }

    fn nfs_call(&mut self, procedure: u32, args: &XdrEncoder) -> Result<Vec<u8>> {
        self.rpc.call(Program::Nfs, procedure, args.as_bytes())
    }

    /// LOOKUP `name` in `dir`; attributes are returned when the server sent them
    pub fn lookup(&mut self, dir: &FileHandle, name: &str) -> Result<(FileHandle, Option<Fattr3>)> {
        let mut args = XdrEncoder::new();
        args.put_opaque(dir.as_bytes());
        args.put_filename(name).map_err(|_| Error::NameTooLong)?;

        let reply = self.nfs_call(NFSPROC3_LOOKUP, &args)?;
        let mut dec = XdrDecoder::new(&reply);
        NfsStat::check(&mut dec)?;
        let fh = FileHandle::decode(&mut dec)?;
        let attr = decode_post_op_attr(&mut dec)?;
        Ok((fh, attr))
    }

    pub fn getattr(&mut self, fh: &FileHandle) -> Result<Fattr3> {
        let mut args = XdrEncoder::new();
        args.put_opaque(fh.as_bytes());

        let reply = self.nfs_call(NFSPROC3_GETATTR, &args)?;
        let mut dec = XdrDecoder::new(&reply);
        NfsStat::check(&mut dec)?;
        Ok(Fattr3::decode(&mut dec)?)
    }

    /// Target of the symlink behind `fh`
    pub fn readlink(&mut self, fh: &FileHandle) -> Result<Vec<u8>> {
        let mut args = XdrEncoder::new();
        args.put_opaque(fh.as_bytes());

        let reply = self.nfs_call(NFSPROC3_READLINK, &args)?;
        let mut dec = XdrDecoder::new(&reply);
        NfsStat::check(&mut dec)?;
        decode_post_op_attr(&mut dec)?;
        Ok(dec.get_opaque(MAXPATHLEN)?.to_vec())
    }

    /// READ up to `count` bytes at `offset`
    pub fn read(&mut self, fh: &FileHandle, offset: u64, count: u32) -> Result<ReadReply> {
        let mut args = XdrEncoder::new();
        args.put_opaque(fh.as_bytes()).put_u64(offset).put_u32(count);

        let reply = self.nfs_call(NFSPROC3_READ, &args)?;
        let mut dec = XdrDecoder::new(&reply);
        NfsStat::check(&mut dec)?;
        decode_post_op_attr(&mut dec)?;
        let _count = dec.get_u32()?;
        let eof = dec.get_bool()?;
        let data = dec.get_opaque(count as usize)?.to_vec();
        if count > 0 && data.is_empty() && !eof {
            warn!("nfs: empty read at offset {} before end of file", offset);
            return Err(Error::ShortRead);
        }
        Ok(ReadReply { data, eof })
    }

    /// One READDIR page
    ///
    /// Returns the new cookie verifier and the undecoded entry list, which
    /// starts at the first `value_follows` word.
    pub fn readdir_page(
        &mut self,
        dir: &FileHandle,
        cookie: u64,
        verf: &[u8; NFS3_COOKIEVERFSIZE],
    ) -> Result<([u8; NFS3_COOKIEVERFSIZE], Vec<u8>)> {
        let mut args = XdrEncoder::new();
        args.put_opaque(dir.as_bytes())
            .put_u64(cookie)
            .put_fixed(verf)
            .put_u32(READDIR_COUNT);

        let reply = self.nfs_call(NFSPROC3_READDIR, &args)?;
        let mut dec = XdrDecoder::new(&reply);
        NfsStat::check(&mut dec)?;
        decode_post_op_attr(&mut dec)?;
        let mut new_verf = [0u8; NFS3_COOKIEVERFSIZE];
        new_verf.copy_from_slice(dec.get_fixed(NFS3_COOKIEVERFSIZE)?);
        let start = dec.position();
        Ok((new_verf, reply[start..].to_vec()))
    }

    /// Walk `path` (absolute within the export) one LOOKUP at a time
    pub fn resolve(&mut self, path: &str) -> Result<(FileHandle, Option<Fattr3>)> {
        let mut fh = self.root.clone();
        let mut attr = None;
        for name in path.split('/').filter(|c| !c.is_empty() && *c != ".") {
            let (next, next_attr) = self.lookup(&fh, name)?;
            fh = next;
            attr = next_attr;
        }
        Ok((fh, attr))
    }

    /// Handle and attributes of `path`, asking GETATTR when LOOKUP sent none
    pub fn stat(&mut self, path: &str) -> Result<(FileHandle, Fattr3)> {
        let (fh, attr) = self.resolve(path)?;
        let attr = match attr {
            Some(attr) => attr,
            None => self.getattr(&fh)?,
        };
        Ok((fh, attr))
    }

    /// Open `path` for chunked reading
    pub fn open(&mut self, path: &str) -> Result<NfsFile> {
        let (fh, attr) = self.stat(path)?;
        Ok(NfsFile::new(fh, attr))
    }

    /// Open the directory behind `fh` and fetch its first page
    pub fn opendir(&mut self, fh: FileHandle) -> Result<DirStream> {
        let mut stream = DirStream {
            dir: fh,
            cookie: 0,
            verf: [0; NFS3_COOKIEVERFSIZE],
            page: Vec::new(),
            pos: 0,
            page_entries: 0,
            done: false,
        };
        stream.fetch(self)?;
        Ok(stream)
    }

    /// `root=/dev/nfs nfsroot=<ip>:<path>,v3,tcp[,port=N][,mountport=N]`
    pub fn linux_rootarg(&self) -> String {
        let mut arg = format!(
            "root=/dev/nfs nfsroot={}:{},{}",
            format_ipv4(&self.options.server),
            self.options.path,
            ROOT_NFS_OPTS
        );
        if let Some(port) = self.options.nfs_port {
            arg.push_str(&format!(",port={}", port));
        }
        if let Some(port) = self.options.mount_port {
            arg.push_str(&format!(",mountport={}", port));
        }
        arg
    }
}

fn getport<S: UdpSocket>(rpc: &mut RpcClient<S>, prog: Program) -> Result<u16> {
    let mut args = XdrEncoder::new();
    args.put_u32(prog.number())
        .put_u32(NFS_VERSION)
        .put_u32(IPPROTO_UDP)
        .put_u32(0);
    let reply = rpc.call(Program::Portmap, PORTMAP_GETPORT, args.as_bytes())?;
    match XdrDecoder::new(&reply).get_u32()? {
        port @ 1..=0xFFFF => Ok(port as u16),
        _ => {
            warn!("nfs: portmap has no port for program {}", prog.number());
            Err(Error::NoPort(prog.number()))
        }
    }
}

/// Open file with a one-chunk read buffer
#[derive(Debug, Clone)]
pub struct NfsFile {
    fh: FileHandle,
    attr: Fattr3,
    pos: u64,
    chunk: Vec<u8>,
    consumed: usize,
}

impl NfsFile {
    pub fn new(fh: FileHandle, attr: Fattr3) -> Self {
        NfsFile {
            fh,
            attr,
            pos: 0,
            chunk: Vec::new(),
            consumed: 0,
        }
    }

    pub fn handle(&self) -> &FileHandle {
        &self.fh
    }

    pub fn attr(&self) -> &Fattr3 {
        &self.attr
    }

    pub fn size(&self) -> u64 {
        self.attr.size
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Move the read position, dropping buffered data
    pub fn seek(&mut self, pos: u64) {
        self.pos = pos;
        self.chunk.clear();
        self.consumed = 0;
    }

    /// Read at the current position
    ///
    /// Serves the buffered chunk first; a new READ of at most 1024 bytes is
    /// sent only once it is used up. Returns 0 at end of file.
    pub fn read<S: UdpSocket>(&mut self, client: &mut NfsClient<S>, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.consumed == self.chunk.len() {
            let reply = client.read(&self.fh, self.pos, READ_CHUNK)?;
            self.chunk = reply.data;
            self.consumed = 0;
        }
        let n = buf.len().min(self.chunk.len() - self.consumed);
        buf[..n].copy_from_slice(&self.chunk[self.consumed..self.consumed + n]);
        self.consumed += n;
        self.pos += n as u64;
        Ok(n)
    }
}

/// Directory listing in progress
///
/// Entries are decoded lazily from the last READDIR reply; the next page is
/// requested with the last cookie once a reply's list ends without `eof`.
#[derive(Debug, Clone)]
pub struct DirStream {
    dir: FileHandle,
    cookie: u64,
    verf: [u8; NFS3_COOKIEVERFSIZE],
    page: Vec<u8>,
    pos: usize,
    page_entries: usize,
    done: bool,
}

impl DirStream {
    fn fetch<S: UdpSocket>(&mut self, client: &mut NfsClient<S>) -> Result<()> {
        let (verf, page) = client.readdir_page(&self.dir, self.cookie, &self.verf)?;
        debug!("nfs: READDIR cookie {} -> {} bytes", self.cookie, page.len());
        self.verf = verf;
        self.page = page;
        self.pos = 0;
        self.page_entries = 0;
        Ok(())
    }

    /// Next entry, `None` once the server reported `eof`
    pub fn next_entry<S: UdpSocket>(&mut self, client: &mut NfsClient<S>) -> Result<Option<Entry3>> {
        while !self.done {
            let mut dec = XdrDecoder::at(&self.page, self.pos);
            if dec.get_bool()? {
                let fileid = dec.get_u64()?;
                let name = String::from_utf8_lossy(dec.get_filename()?).into_owned();
                let cookie = dec.get_u64()?;
                self.pos = dec.position();
                self.cookie = cookie;
                self.page_entries += 1;
                return Ok(Some(Entry3 { fileid, name, cookie }));
            }
            if dec.get_bool()? {
                self.done = true;
            } else if self.page_entries == 0 {
                // Asking again with the same cookie would loop forever
                warn!("nfs: READDIR page without entries or eof at cookie {}", self.cookie);
                self.done = true;
            } else {
                self.fetch(client)?;
            }
        }
        Ok(None)
    }

    pub fn is_done(&self) -> bool {
        self.done
    }
}
