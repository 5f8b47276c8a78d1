//! UBIFS VFS Adapter
//!
//! Implements the VFS Filesystem trait for a mounted UBIFS volume. The
//! mount context sits behind a mutex shared with every open handle, so a
//! handle outlives the mount table entry it came from.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;

use bootfs_driver_traits::VolumeDevice;
use bootfs_vfs::{
    seek_position, DirEntry as VfsDirEntry, DirOperations, FileOperations, FileStat, FileType, Filesystem, FsStats,
    SeekFrom, VfsError, VfsResult,
};
use log::error;
use spin::Mutex;

use crate::dir::DirCursor;
use crate::error::{Error, IoError, MountError};
use crate::file::OpenFile;
use crate::inode::{FileKind, Inode};
use crate::mount::{MountOptions, Ubifs};
use crate::{BLOCK_SIZE, MAX_NLEN};

/// UBIFS Filesystem VFS adapter
pub struct UbifsFilesystem<V: VolumeDevice + Send + 'static> {
    inner: Arc<Mutex<Ubifs<V>>>,
    /// UBI volume name and MTD partition for the kernel command line
    rootarg: Option<(String, String)>,
}

impl<V: VolumeDevice + Send + 'static> UbifsFilesystem<V> {
    /// Wrap an already mounted volume
    pub fn new(fs: Ubifs<V>) -> Self {
        UbifsFilesystem {
            inner: Arc::new(Mutex::new(fs)),
            rootarg: None,
        }
    }

    /// Mount `volume` and wrap it
    pub fn mount(volume: V, options: MountOptions) -> VfsResult<Self> {
        match Ubifs::mount(volume, options) {
            Ok(fs) => Ok(Self::new(fs)),
            Err(e) => {
                error!("ubifs: mount failed: {}", e);
                Err(mount_error_to_vfs(e))
            }
        }
    }

    /// Record where the volume lives so `linux_rootarg` can describe it
    pub fn with_rootarg(mut self, volume_name: &str, mtd_partition: &str) -> Self {
        self.rootarg = Some((String::from(volume_name), String::from(mtd_partition)));
        self
    }
}

fn error_to_vfs(e: Error) -> VfsError {
    match e {
        Error::NotFound => VfsError::NotFound,
        Error::NotADirectory => VfsError::NotADirectory,
        Error::IsADirectory => VfsError::IsADirectory,
        Error::NotASymlink => VfsError::NotASymlink,
        Error::NameTooLong => VfsError::NameTooLong,
        Error::InvalidArgument => VfsError::InvalidArgument,
        Error::Io(IoError::CorruptTree(_)) => VfsError::Corrupted,
        Error::Io(IoError::Decompress(_)) | Error::Io(IoError::Device(_)) => VfsError::IoError,
    }
}

fn mount_error_to_vfs(e: MountError) -> VfsError {
    match e {
        MountError::BadGeometry | MountError::GeometryMismatch => VfsError::InvalidArgument,
        MountError::BadSuperblock(_) | MountError::NoMasterNode | MountError::BadRoot => VfsError::Corrupted,
        MountError::UnsupportedKeyFormat(_)
        | MountError::UnsupportedKeyHash(_)
        | MountError::UnsupportedVersion { .. } => VfsError::NotSupported,
        MountError::Io(_) => VfsError::IoError,
    }
}

fn kind_to_vfs(kind: FileKind) -> FileType {
    match kind {
        FileKind::Regular => FileType::Regular,
        FileKind::Directory => FileType::Directory,
        FileKind::Symlink => FileType::Symlink,
        FileKind::BlockDevice => FileType::BlockDevice,
        FileKind::CharDevice => FileType::CharDevice,
        FileKind::Fifo => FileType::Fifo,
        FileKind::Socket => FileType::Socket,
    }
}

fn inode_to_stat(inode: &Inode) -> FileStat {
    FileStat {
        file_type: kind_to_vfs(inode.kind),
        size: inode.size,
        nlink: inode.nlink,
        inode: inode.number,
        mode: inode.mode,
        uid: inode.uid,
        gid: inode.gid,
        blksize: BLOCK_SIZE as u32,
        blocks: inode.size.div_ceil(512),
        atime: inode.atime.sec,
        mtime: inode.mtime.sec,
        ctime: inode.ctime.sec,
    }
}

impl<V: VolumeDevice + Send + 'static> Filesystem for UbifsFilesystem<V> {
    fn name(&self) -> &'static str {
        "ubifs"
    }

    fn open(&self, path: &str) -> VfsResult<Box<dyn FileOperations>> {
        let file = self.inner.lock().open(path).map_err(error_to_vfs)?;
        Ok(Box::new(UbifsFile {
            fs: self.inner.clone(),
            file: Some(file),
            position: 0,
        }))
    }

    fn stat(&self, path: &str) -> VfsResult<FileStat> {
        let inode = self.inner.lock().stat(path).map_err(error_to_vfs)?;
        Ok(inode_to_stat(&inode))
    }

    fn opendir(&self, path: &str) -> VfsResult<Box<dyn DirOperations>> {
        let cursor = self.inner.lock().opendir(path).map_err(error_to_vfs)?;
        Ok(Box::new(UbifsDir {
            fs: self.inner.clone(),
            cursor: Some(cursor),
        }))
    }

    fn readlink(&self, path: &str) -> VfsResult<String> {
        let target = self.inner.lock().readlink(path).map_err(error_to_vfs)?;
        Ok(String::from_utf8_lossy(&target).into_owned())
    }

    fn statfs(&self) -> VfsResult<FsStats> {
        let fs = self.inner.lock();
        let info = fs.info();
        let block = BLOCK_SIZE as u64;
        Ok(FsStats {
            total_blocks: info.leb_cnt as u64 * info.leb_size as u64 / block,
            free_blocks: info.total_free / block,
            block_size: BLOCK_SIZE as u32,
            total_inodes: info.highest_inum,
            free_inodes: 0,
            max_name_len: MAX_NLEN as u32,
        })
    }

    fn linux_rootarg(&self) -> VfsResult<String> {
        let (volume, mtd) = self.rootarg.as_ref().ok_or(VfsError::NotSupported)?;
        Ok(self.inner.lock().linux_rootarg(volume, mtd))
    }
}

/// Open UBIFS file
struct UbifsFile<V: VolumeDevice + Send + 'static> {
    fs: Arc<Mutex<Ubifs<V>>>,
    /// Taken on drop
    file: Option<OpenFile>,
    position: u64,
}

impl<V: VolumeDevice + Send + 'static> FileOperations for UbifsFile<V> {
    fn read(&mut self, buffer: &mut [u8]) -> VfsResult<usize> {
        let file = self.file.as_mut().ok_or(VfsError::InvalidArgument)?;
        let n = self
            .fs
            .lock()
            .read(file, self.position, buffer)
            .map_err(error_to_vfs)?;
        self.position += n as u64;
        Ok(n)
    }

    fn seek(&mut self, offset: i64, whence: SeekFrom) -> VfsResult<u64> {
        let size = self.file.as_ref().map_or(0, |f| f.size());
        self.position = seek_position(self.position, size, offset, whence)?;
        Ok(self.position)
    }

    fn tell(&self) -> u64 {
        self.position
    }

    fn stat(&self) -> VfsResult<FileStat> {
        let file = self.file.as_ref().ok_or(VfsError::InvalidArgument)?;
        Ok(inode_to_stat(file.inode()))
    }
}

impl<V: VolumeDevice + Send + 'static> Drop for UbifsFile<V> {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            self.fs.lock().close(file);
        }
    }
}

/// Open UBIFS directory
struct UbifsDir<V: VolumeDevice + Send + 'static> {
    fs: Arc<Mutex<Ubifs<V>>>,
    cursor: Option<DirCursor>,
}

impl<V: VolumeDevice + Send + 'static> DirOperations for UbifsDir<V> {
    fn readdir(&mut self) -> VfsResult<Option<VfsDirEntry>> {
        let cursor = self.cursor.as_mut().ok_or(VfsError::InvalidArgument)?;
        let entry = self.fs.lock().readdir(cursor).map_err(error_to_vfs)?;
        Ok(entry.map(|e| VfsDirEntry {
            name: e.name,
            file_type: e.kind.map_or(FileType::Unknown, kind_to_vfs),
            inode: e.inode_number,
        }))
    }
}

impl<V: VolumeDevice + Send + 'static> Drop for UbifsDir<V> {
    fn drop(&mut self) {
        if let Some(cursor) = self.cursor.take() {
            self.fs.lock().closedir(cursor);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ImageBuilder;
    use crate::ROOT_INO;
    use bootfs_driver_traits::RamVolume;
    use bootfs_vfs::Vfs;

    fn boot_volume() -> (RamVolume, u64) {
        let mut b = ImageBuilder::new();
        let boot = b.mkdir(ROOT_INO, "boot");
        let kernel = b.add_file(boot, "zImage-6.1", &[0x5A; 6000]);
        b.add_symlink(boot, "zImage", "zImage-6.1");
        b.add_symlink(ROOT_INO, "vmlinuz", "/boot/zImage");
        (b.build().into_volume(), kernel)
    }

    #[test]
    fn test_read_kernel_through_symlinks() {
        let (vol, kernel) = boot_volume();
        let fs = UbifsFilesystem::mount(vol, MountOptions::default()).unwrap();
        let mut vfs = Vfs::new();
        vfs.mount("/", "ubifs", "ubi0:rootfs", Box::new(fs)).unwrap();

        let st = vfs.stat("/vmlinuz").unwrap();
        assert_eq!(st.file_type, FileType::Regular);
        assert_eq!(st.inode, kernel);
        assert_eq!(st.size, 6000);
        assert_eq!(vfs.lstat("/vmlinuz").unwrap().file_type, FileType::Symlink);
        assert_eq!(vfs.readlink("/vmlinuz").unwrap(), "/boot/zImage");

        let mut file = vfs.open("/vmlinuz").unwrap();
        let mut buf = vec![0u8; 8192];
        assert_eq!(file.read(&mut buf).unwrap(), 6000);
        assert!(buf[..6000].iter().all(|&b| b == 0x5A));
        assert_eq!(file.read(&mut buf).unwrap(), 0);
        assert_eq!(file.seek(-100, SeekFrom::End).unwrap(), 5900);
        assert_eq!(file.read(&mut buf).unwrap(), 100);
        assert_eq!(file.tell(), 6000);
    }

    #[test]
    fn test_handles_release_inodes_on_drop() {
        let (vol, kernel) = boot_volume();
        let fs = UbifsFilesystem::mount(vol, MountOptions::default()).unwrap();

        let file = fs.open("/boot/zImage-6.1").unwrap();
        let dir = fs.opendir("/boot").unwrap();
        assert_eq!(fs.inner.lock().inode_cache().refcount(kernel), Some(1));
        drop(file);
        drop(dir);
        let inner = fs.inner.lock();
        assert!(inner.inode_cache().is_evictable(kernel));
        assert_eq!(inner.inode_cache().evictable(), inner.inode_cache().cached());
    }

    #[test]
    fn test_listing_and_errors() {
        let (vol, _) = boot_volume();
        let fs = UbifsFilesystem::mount(vol, MountOptions::default()).unwrap();

        let mut dir = fs.opendir("/boot").unwrap();
        let mut names = Vec::new();
        while let Some(entry) = dir.readdir().unwrap() {
            names.push((entry.name, entry.file_type));
        }
        names.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(
            names,
            [
                (String::from("zImage"), FileType::Symlink),
                (String::from("zImage-6.1"), FileType::Regular)
            ]
        );

        assert_eq!(fs.open("/boot").err(), Some(VfsError::IsADirectory));
        assert_eq!(fs.stat("/nope").err(), Some(VfsError::NotFound));
        assert_eq!(fs.readlink("/boot").err(), Some(VfsError::NotASymlink));
    }

    #[test]
    fn test_statfs_and_rootarg() {
        let (vol, _) = boot_volume();
        let fs = UbifsFilesystem::mount(vol, MountOptions::default()).unwrap();
        assert_eq!(fs.linux_rootarg().err(), Some(VfsError::NotSupported));

        let fs = fs.with_rootarg("rootfs", "ubi");
        assert_eq!(fs.linux_rootarg().unwrap(), "root=ubi0:rootfs ubi.mtd=ubi rootfstype=ubifs");
        let stats = fs.statfs().unwrap();
        assert_eq!(stats.block_size, 4096);
        assert_eq!(stats.max_name_len, 255);
        assert!(stats.total_blocks > 0);
    }

    #[test]
    fn test_mount_failure_maps_to_corrupted() {
        let mut image = ImageBuilder::new().build();
        image.bytes_mut()[0] = 0;
        let err = UbifsFilesystem::mount(image.into_volume(), MountOptions::default()).err();
        assert_eq!(err, Some(VfsError::Corrupted));
    }
}
