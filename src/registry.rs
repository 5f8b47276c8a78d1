//! Filesystem driver registry
//!
//! Maps a filesystem type name to a probe. A probe turns a mount source
//! and option string into a mounted [`Filesystem`].

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;

use bootfs_driver_traits::{Ipv4Addr, UdpSocket, VolumeDevice};
use bootfs_net::{NetworkDriver, NetworkStack, UdpConnection};
use bootfs_nfs::vfs_adapter::error_to_vfs;
use bootfs_nfs::{NfsFilesystem, NfsOptions};
use bootfs_ubifs::{MountOptions, UbifsFilesystem};
use bootfs_vfs::{Filesystem, Vfs, VfsError, VfsResult};
use log::{info, warn};
use spin::Mutex;

/// Mount a source with an option string
pub type Probe = Box<dyn Fn(&str, &str) -> VfsResult<Box<dyn Filesystem>> + Send + Sync>;

/// Registered drivers plus the mount table they feed
pub struct FsDriverRegistry {
    drivers: BTreeMap<String, Probe>,
    vfs: Vfs,
}

impl Default for FsDriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FsDriverRegistry {
    pub fn new() -> Self {
        FsDriverRegistry {
            drivers: BTreeMap::new(),
            vfs: Vfs::new(),
        }
    }

    /// Register a driver under `name`
    pub fn register(&mut self, name: &str, probe: Probe) -> VfsResult<()> {
        if self.drivers.contains_key(name) {
            warn!("fs: driver {} already registered", name);
            return Err(VfsError::Busy);
        }
        self.drivers.insert(String::from(name), probe);
        Ok(())
    }

    /// Registered driver names, sorted
    pub fn drivers(&self) -> impl Iterator<Item = &str> {
        self.drivers.keys().map(String::as_str)
    }

    /// Mount `source` on `path` with the driver registered as `fstype`
    pub fn mount(&mut self, fstype: &str, source: &str, path: &str) -> VfsResult<()> {
        self.mount_with_options(fstype, source, "", path)
    }

    /// Same as [`mount`](Self::mount) with a comma separated option string
    pub fn mount_with_options(&mut self, fstype: &str, source: &str, options: &str, path: &str) -> VfsResult<()> {
        let probe = self.drivers.get(fstype).ok_or_else(|| {
            warn!("fs: no driver for filesystem type {}", fstype);
            VfsError::NoDevice
        })?;
        let fs = probe(source, options)?;
        self.vfs.mount(path, fstype, source, fs)
    }

    pub fn umount(&mut self, path: &str) -> VfsResult<()> {
        self.vfs.unmount(path)
    }

    pub fn vfs(&self) -> &Vfs {
        &self.vfs
    }

    pub fn vfs_mut(&mut self) -> &mut Vfs {
        &mut self.vfs
    }

    /// Kernel `root=` arguments for the filesystem mounted at `path`
    pub fn linux_rootarg(&self, path: &str) -> VfsResult<String> {
        self.vfs.linux_rootarg(path)
    }
}

/// An opened UBI volume and where it lives
pub struct UbiSource<V> {
    pub volume: V,
    /// UBI volume name (`rootfs`)
    pub volume_name: String,
    /// MTD partition holding the UBI device (`nand0.root`)
    pub mtd_partition: String,
}

impl<V> UbiSource<V> {
    pub fn new(volume: V, volume_name: &str, mtd_partition: &str) -> Self {
        UbiSource {
            volume,
            volume_name: String::from(volume_name),
            mtd_partition: String::from(mtd_partition),
        }
    }
}

/// UBIFS probe; `open` maps a mount source to a UBI volume
pub fn ubifs_probe<V, F>(open: F) -> Probe
where
    V: VolumeDevice + Send + 'static,
    F: Fn(&str) -> VfsResult<UbiSource<V>> + Send + Sync + 'static,
{
    Box::new(move |source: &str, options: &str| {
        let ubi = open(source)?;
        let fs = UbifsFilesystem::mount(ubi.volume, MountOptions::parse(options))?
            .with_rootarg(&ubi.volume_name, &ubi.mtd_partition);
        Ok(Box::new(fs) as Box<dyn Filesystem>)
    })
}

/// NFS probe; `connect` opens a UDP socket to the server
///
/// The source is `<server-ip>:<export>`.
pub fn nfs_probe<S, F>(connect: F) -> Probe
where
    S: UdpSocket + Send + 'static,
    F: Fn(Ipv4Addr) -> VfsResult<S> + Send + Sync + 'static,
{
    Box::new(move |source: &str, options: &str| {
        let opts = NfsOptions::parse(source, options).map_err(|e| {
            warn!("nfs: bad mount source '{}': {}", source, e);
            error_to_vfs(e)
        })?;
        let socket = connect(opts.server)?;
        info!("nfs: mounting {}", source);
        let fs = NfsFilesystem::mount(socket, opts)?;
        Ok(Box::new(fs) as Box<dyn Filesystem>)
    })
}

/// Socket factory for [`nfs_probe`] over a shared network stack
pub fn udp_connector<D>(
    stack: Arc<Mutex<NetworkStack<D>>>,
) -> impl Fn(Ipv4Addr) -> VfsResult<UdpConnection<D>> + Send + Sync + 'static
where
    D: NetworkDriver + Send + 'static,
{
    move |server| Ok(UdpConnection::new(stack.clone(), server))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use bootfs_driver_traits::{DriverResult, RamVolume};
    use bootfs_ubifs::testing::ImageBuilder;
    use bootfs_ubifs::ROOT_INO;
    use bootfs_vfs::FileType;

    fn image() -> RamVolume {
        let mut b = ImageBuilder::new();
        let boot = b.mkdir(ROOT_INO, "boot");
        b.add_file(boot, "zImage", &[0xA5; 5000]);
        b.build().into_volume()
    }

    fn registry() -> FsDriverRegistry {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut reg = FsDriverRegistry::new();
        reg.register(
            "ubifs",
            ubifs_probe(|source: &str| match source {
                "ubi0.rootfs" => Ok(UbiSource::new(image(), "rootfs", "nand0.root")),
                _ => Err(VfsError::NoDevice),
            }),
        )
        .unwrap();
        reg
    }

    /// A server that never answers
    struct Silent {
        clock: u64,
        sent: Arc<AtomicUsize>,
    }

    impl UdpSocket for Silent {
        fn remote_addr(&self) -> Ipv4Addr {
            [10, 0, 0, 1]
        }

        fn send_to(&mut self, _port: u16, _payload: &[u8]) -> DriverResult<()> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn poll_recv(&mut self, _buf: &mut [u8]) -> DriverResult<Option<usize>> {
            self.clock += 5;
            Ok(None)
        }

        fn now_ms(&self) -> u64 {
            self.clock
        }
    }

    #[test]
    fn test_mount_and_umount() {
        let mut reg = registry();
        reg.mount("ubifs", "ubi0.rootfs", "/").unwrap();

        let st = reg.vfs().stat("/boot/zImage").unwrap();
        assert_eq!(st.file_type, FileType::Regular);
        assert_eq!(st.size, 5000);
        assert_eq!(
            reg.linux_rootarg("/").unwrap(),
            "root=ubi0:rootfs ubi.mtd=nand0.root rootfstype=ubifs"
        );

        reg.umount("/").unwrap();
        assert_eq!(reg.vfs().stat("/boot/zImage"), Err(VfsError::NotMounted));
        assert_eq!(reg.umount("/"), Err(VfsError::NotMounted));
    }

    #[test]
    fn test_mount_errors() {
        let mut reg = registry();
        assert_eq!(reg.mount("jffs2", "ubi0.rootfs", "/"), Err(VfsError::NoDevice));
        assert_eq!(reg.mount("ubifs", "ubi1.data", "/"), Err(VfsError::NoDevice));
        assert!(reg.vfs().list_mounts().is_empty());

        reg.mount_with_options("ubifs", "ubi0.rootfs", "tnc_cache=4", "/mnt").unwrap();
        assert_eq!(reg.mount("ubifs", "ubi0.rootfs", "/mnt"), Err(VfsError::AlreadyMounted));
    }

    #[test]
    fn test_register_twice() {
        let mut reg = registry();
        let again = ubifs_probe(|_: &str| Ok(UbiSource::new(image(), "rootfs", "nand0.root")));
        assert_eq!(reg.register("ubifs", again).err(), Some(VfsError::Busy));
        assert_eq!(reg.drivers().collect::<Vec<_>>(), ["ubifs"]);
    }

    #[test]
    fn test_nfs_probe() {
        let mut reg = registry();
        let sent = Arc::new(AtomicUsize::new(0));
        let counter = sent.clone();
        reg.register(
            "nfs",
            nfs_probe(move |server| {
                assert_eq!(server, [10, 0, 0, 1]);
                Ok(Silent {
                    clock: 0,
                    sent: counter.clone(),
                })
            }),
        )
        .unwrap();
        assert_eq!(reg.drivers().collect::<Vec<_>>(), ["nfs", "ubifs"]);

        // Rejected before any traffic
        assert_eq!(reg.mount("nfs", "server:/export", "/mnt"), Err(VfsError::InvalidArgument));
        assert_eq!(sent.load(Ordering::SeqCst), 0);

        assert_eq!(
            reg.mount_with_options("nfs", "10.0.0.1:/export", "timeout=20,retries=2,mountport=635", "/mnt"),
            Err(VfsError::TimedOut)
        );
        // mountd was given, so only the GETPORT for nfsd goes out
        assert_eq!(sent.load(Ordering::SeqCst), 2);
    }
}
