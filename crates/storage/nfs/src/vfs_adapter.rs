//! NFS VFS Adapter
//!
//! Implements the VFS Filesystem trait for a mounted export. Open handles
//! share the client (and with it the socket) through an `Arc<Mutex<_>>`.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;

use bootfs_driver_traits::UdpSocket;
use bootfs_vfs::{
    seek_position, DirEntry, DirOperations, FileOperations, FileStat, FileType, Filesystem, FsStats, SeekFrom,
    VfsError, VfsResult,
};
use log::error;
use spin::Mutex;

use crate::client::{DirStream, NfsClient, NfsFile};
use crate::error::Error;
use crate::options::NfsOptions;
use crate::proto::{Fattr3, FileType3, NfsStat, READ_CHUNK};
use crate::xdr::MAX_NAME_LEN;

/// NFS Filesystem VFS adapter
pub struct NfsFilesystem<S: UdpSocket + Send + 'static> {
    client: Arc<Mutex<NfsClient<S>>>,
}

impl<S: UdpSocket + Send + 'static> NfsFilesystem<S> {
    pub fn new(client: NfsClient<S>) -> Self {
        NfsFilesystem {
            client: Arc::new(Mutex::new(client)),
        }
    }

    /// Mount the export over `socket`
    pub fn mount(socket: S, options: NfsOptions) -> VfsResult<Self> {
        match NfsClient::mount(socket, options) {
            Ok(client) => Ok(Self::new(client)),
            Err(e) => {
                error!("nfs: mount failed: {}", e);
                Err(error_to_vfs(e))
            }
        }
    }

    /// Shared client, for callers that need raw protocol access
    pub fn client(&self) -> Arc<Mutex<NfsClient<S>>> {
        self.client.clone()
    }
}

/// Map a client error onto the VFS error space
pub fn error_to_vfs(e: Error) -> VfsError {
    match e {
        Error::Status(stat) => match stat {
            NfsStat::NoEnt => VfsError::NotFound,
            NfsStat::NotDir => VfsError::NotADirectory,
            NfsStat::IsDir => VfsError::IsADirectory,
            NfsStat::Perm | NfsStat::Access => VfsError::PermissionDenied,
            NfsStat::NameTooLong => VfsError::NameTooLong,
            NfsStat::Inval => VfsError::InvalidArgument,
            NfsStat::RoFs => VfsError::ReadOnly,
            NfsStat::NotSupp => VfsError::NotSupported,
            NfsStat::NoDev | NfsStat::NxIo => VfsError::NoDevice,
            _ => VfsError::IoError,
        },
        // mountstat3 shares the errno numbering
        Error::MountRefused(2) => VfsError::NotFound,
        Error::MountRefused(13) => VfsError::PermissionDenied,
        Error::MountRefused(20) => VfsError::NotADirectory,
        Error::TimedOut => VfsError::TimedOut,
        Error::NameTooLong => VfsError::NameTooLong,
        Error::BadOptions => VfsError::InvalidArgument,
        Error::NoPort(_) => VfsError::NoDevice,
        Error::MountRefused(_) | Error::Xdr(_) | Error::Rpc(_) | Error::Network(_) | Error::ShortRead => {
            VfsError::IoError
        }
    }
}

fn type_to_vfs(ftype: FileType3) -> (FileType, u32) {
    match ftype {
        FileType3::Regular => (FileType::Regular, 0o100000),
        FileType3::Directory => (FileType::Directory, 0o040000),
        FileType3::BlockDevice => (FileType::BlockDevice, 0o060000),
        FileType3::CharDevice => (FileType::CharDevice, 0o020000),
        FileType3::Symlink => (FileType::Symlink, 0o120000),
        FileType3::Socket => (FileType::Socket, 0o140000),
        FileType3::Fifo => (FileType::Fifo, 0o010000),
        FileType3::Unknown(_) => (FileType::Unknown, 0),
    }
}

fn attr_to_stat(attr: &Fattr3) -> FileStat {
    let (file_type, fmt) = type_to_vfs(attr.ftype);
    FileStat {
        file_type,
        size: attr.size,
        nlink: attr.nlink,
        inode: attr.fileid,
        mode: fmt | (attr.mode & 0o7777),
        uid: attr.uid,
        gid: attr.gid,
        blksize: READ_CHUNK,
        blocks: attr.used.div_ceil(512),
        atime: attr.atime.seconds as u64,
        mtime: attr.mtime.seconds as u64,
        ctime: attr.ctime.seconds as u64,
    }
}

impl<S: UdpSocket + Send + 'static> Filesystem for NfsFilesystem<S> {
    fn name(&self) -> &'static str {
        "nfs"
    }

    fn open(&self, path: &str) -> VfsResult<Box<dyn FileOperations>> {
        let file = self.client.lock().open(path).map_err(error_to_vfs)?;
        if file.attr().ftype == FileType3::Directory {
            return Err(VfsError::IsADirectory);
        }
        Ok(Box::new(NfsFileHandle {
            client: self.client.clone(),
            file,
        }))
    }

    fn stat(&self, path: &str) -> VfsResult<FileStat> {
        let (_, attr) = self.client.lock().stat(path).map_err(error_to_vfs)?;
        Ok(attr_to_stat(&attr))
    }

    fn opendir(&self, path: &str) -> VfsResult<Box<dyn DirOperations>> {
        let mut client = self.client.lock();
        let (fh, _) = client.resolve(path).map_err(error_to_vfs)?;
        let stream = client.opendir(fh).map_err(error_to_vfs)?;
        Ok(Box::new(NfsDirHandle {
            client: self.client.clone(),
            stream,
        }))
    }

    fn readlink(&self, path: &str) -> VfsResult<String> {
        let mut client = self.client.lock();
        let (fh, attr) = client.stat(path).map_err(error_to_vfs)?;
        if attr.ftype != FileType3::Symlink {
            return Err(VfsError::NotASymlink);
        }
        let target = client.readlink(&fh).map_err(error_to_vfs)?;
        Ok(String::from_utf8_lossy(&target).into_owned())
    }

    fn statfs(&self) -> VfsResult<FsStats> {
        // FSSTAT is not implemented; report only the static limits
        Ok(FsStats {
            block_size: READ_CHUNK,
            max_name_len: MAX_NAME_LEN as u32,
            ..FsStats::default()
        })
    }

    fn linux_rootarg(&self) -> VfsResult<String> {
        Ok(self.client.lock().linux_rootarg())
    }

    fn unmount(&self) -> VfsResult<()> {
        self.client.lock().unmount().map_err(error_to_vfs)
    }
}

/// Open NFS file
struct NfsFileHandle<S: UdpSocket + Send + 'static> {
    client: Arc<Mutex<NfsClient<S>>>,
    file: NfsFile,
}

impl<S: UdpSocket + Send + 'static> FileOperations for NfsFileHandle<S> {
    fn read(&mut self, buffer: &mut [u8]) -> VfsResult<usize> {
        let mut client = self.client.lock();
        self.file.read(&mut *client, buffer).map_err(error_to_vfs)
    }

    fn seek(&mut self, offset: i64, whence: SeekFrom) -> VfsResult<u64> {
        let pos = seek_position(self.file.position(), self.file.size(), offset, whence)?;
        self.file.seek(pos);
        Ok(pos)
    }

    fn tell(&self) -> u64 {
        self.file.position()
    }

    fn stat(&self) -> VfsResult<FileStat> {
        Ok(attr_to_stat(self.file.attr()))
    }
}

/// Open NFS directory
struct NfsDirHandle<S: UdpSocket + Send + 'static> {
    client: Arc<Mutex<NfsClient<S>>>,
    stream: DirStream,
}

impl<S: UdpSocket + Send + 'static> DirOperations for NfsDirHandle<S> {
    fn readdir(&mut self) -> VfsResult<Option<DirEntry>> {
        let mut client = self.client.lock();
        loop {
            let entry = match self.stream.next_entry(&mut *client).map_err(error_to_vfs)? {
                Some(entry) => entry,
                None => return Ok(None),
            };
            // Other drivers do not list the self and parent links
            if entry.name == "." || entry.name == ".." {
                continue;
            }
            return Ok(Some(DirEntry {
                name: entry.name,
                file_type: FileType::Unknown,
                inode: entry.fileid,
            }));
        }
    }
}
