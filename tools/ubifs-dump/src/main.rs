//! ubifs-dump - inspect UBIFS volume images on the host
//!
//! The image is the contents of one UBI volume (what `ubiupdatevol`
//! writes, or `mkfs.ubifs` produces), not a raw NAND dump with UBI
//! headers.
//!
//! Usage:
//!   ubifs-dump rootfs.ubifs info
//!   ubifs-dump rootfs.ubifs ls /boot
//!   ubifs-dump rootfs.ubifs cat /boot/zImage > zImage
//!   ubifs-dump --leb-size 126976 rootfs.ubifs stat /boot/zImage

use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bootfs_driver_traits::{DriverError, DriverResult, VolumeDevice, VolumeGeometry};
use bootfs_ubifs::node::{self, Payload, SB_NODE_SZ};
use bootfs_ubifs::{Compression, FileKind, Inode, MountOptions, Ubifs};
use log::{debug, info};

#[derive(Parser)]
#[command(name = "ubifs-dump")]
#[command(about = "Inspect UBIFS volume images")]
struct Args {
    /// UBIFS volume image
    image: PathBuf,

    /// LEB size in bytes (read from the superblock if omitted)
    #[arg(short, long)]
    leb_size: Option<u32>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Superblock and master node summary
    Info,
    /// List a directory
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },
    /// Write a file to stdout
    Cat { path: String },
    /// Show inode attributes
    Stat { path: String },
    /// Print a symlink target
    Readlink { path: String },
}

fn other(e: impl std::fmt::Display) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e.to_string())
}

/// A volume image in a host file
struct FileVolume {
    file: File,
    geometry: VolumeGeometry,
}

impl FileVolume {
    fn open(path: &Path, leb_size: Option<u32>) -> io::Result<Self> {
        let mut file = File::open(path)?;
        let (detected_leb, min_io_size) = read_geometry(&mut file)?;
        let leb_size = leb_size.unwrap_or(detected_leb);
        if leb_size == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "LEB size must not be zero"));
        }
        if leb_size != detected_leb {
            info!("using LEB size {} (superblock says {})", leb_size, detected_leb);
        }

        let len = file.metadata()?.len();
        let leb_count = u32::try_from(len / leb_size as u64).map_err(other)?;
        if len % leb_size as u64 != 0 {
            info!("ignoring {} trailing bytes", len % leb_size as u64);
        }
        debug!("{}: {} LEBs of {} bytes", path.display(), leb_count, leb_size);

        Ok(FileVolume {
            file,
            geometry: VolumeGeometry {
                leb_size,
                leb_count,
                min_io_size,
            },
        })
    }
}

/// LEB size and minimal I/O unit from the superblock at offset 0
fn read_geometry(file: &mut File) -> io::Result<(u32, u32)> {
    let mut buf = vec![0u8; SB_NODE_SZ];
    file.seek(SeekFrom::Start(0))?;
    file.read_exact(&mut buf)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "image is smaller than a superblock"))?;
    let node = node::decode(&buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("superblock: {}", e)))?;
    match node.payload {
        Payload::Superblock(sb) => Ok((sb.leb_size, sb.min_io_size)),
        _ => Err(io::Error::new(io::ErrorKind::InvalidData, "first node is not a superblock")),
    }
}

impl VolumeDevice for FileVolume {
    fn geometry(&self) -> VolumeGeometry {
        self.geometry
    }

    fn read_leb(&mut self, leb: u32, offset: u32, buffer: &mut [u8]) -> DriverResult<()> {
        if leb >= self.geometry.leb_count || offset as usize + buffer.len() > self.geometry.leb_size as usize {
            return Err(DriverError::InvalidParameter);
        }
        let pos = leb as u64 * self.geometry.leb_size as u64 + offset as u64;
        self.file.seek(SeekFrom::Start(pos)).map_err(|_| DriverError::IoError)?;
        self.file.read_exact(buffer).map_err(|_| DriverError::IoError)
    }
}

fn kind_tag(kind: FileKind) -> char {
    match kind {
        FileKind::Regular => '-',
        FileKind::Directory => 'd',
        FileKind::Symlink => 'l',
        FileKind::BlockDevice => 'b',
        FileKind::CharDevice => 'c',
        FileKind::Fifo => 'p',
        FileKind::Socket => 's',
    }
}

fn mode_string(inode: &Inode) -> String {
    let mut s = String::with_capacity(10);
    s.push(kind_tag(inode.kind));
    for shift in [6u32, 3, 0] {
        let bits = (inode.mode >> shift) & 7;
        s.push(if bits & 4 != 0 { 'r' } else { '-' });
        s.push(if bits & 2 != 0 { 'w' } else { '-' });
        s.push(if bits & 1 != 0 { 'x' } else { '-' });
    }
    s
}

fn join(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}

fn info(fs: &Ubifs<FileVolume>, out: &mut impl Write) -> io::Result<()> {
    let info = fs.info();
    let compr = Compression::from_u16(info.default_compr).map_or("unknown", |c| c.name());
    writeln!(out, "LEB size:          {}", info.leb_size)?;
    writeln!(out, "LEB count:         {}", info.leb_cnt)?;
    writeln!(out, "Min I/O size:      {}", info.min_io_size)?;
    writeln!(out, "Format version:    {} (ro compat {})", info.fmt_version, info.ro_compat_version)?;
    writeln!(out, "Key hash:          {:?}", info.key_hash)?;
    writeln!(out, "Compression:       {}", compr)?;
    writeln!(out, "Fanout:            {}", info.fanout)?;
    writeln!(out, "UUID:              {}", format_uuid(&info.uuid))?;
    writeln!(out, "Commit number:     {}", info.cmt_no)?;
    writeln!(out, "Master sqnum:      {}", info.mst_sqnum)?;
    writeln!(out, "Highest inode:     {}", info.highest_inum)?;
    writeln!(out, "Index size:        {}", info.index_size)?;
    writeln!(out, "Free space:        {}", info.total_free)?;
    writeln!(out, "Used space:        {}", info.total_used)?;
    writeln!(out, "State:             {}", if info.dirty { "dirty" } else { "clean" })
}

fn format_uuid(uuid: &[u8; 16]) -> String {
    let hex: Vec<String> = uuid.iter().map(|b| format!("{:02x}", b)).collect();
    format!(
        "{}-{}-{}-{}-{}",
        hex[0..4].concat(),
        hex[4..6].concat(),
        hex[6..8].concat(),
        hex[8..10].concat(),
        hex[10..16].concat()
    )
}

fn ls(fs: &mut Ubifs<FileVolume>, path: &str, out: &mut impl Write) -> io::Result<()> {
    let mut cursor = fs.opendir(path).map_err(other)?;
    let mut entries = Vec::new();
    let listed = loop {
        match fs.readdir(&mut cursor) {
            Ok(Some(entry)) => entries.push(entry),
            Ok(None) => break Ok(()),
            Err(e) => break Err(other(e)),
        }
    };
    fs.closedir(cursor);
    listed?;

    entries.sort_by(|a, b| a.name.cmp(&b.name));
    for entry in &entries {
        let full = join(path, &entry.name);
        match fs.stat(&full) {
            Ok(inode) => {
                write!(out, "{} {:>6} {:>10} {}", mode_string(&inode), inode.number, inode.size, entry.name)?;
                if inode.is_symlink() {
                    write!(out, " -> {}", String::from_utf8_lossy(&inode.inline_data))?;
                }
                writeln!(out)?;
            }
            Err(e) => writeln!(out, "?????????? {:>6} {:>10} {} ({})", entry.inode_number, "?", entry.name, e)?,
        }
    }
    Ok(())
}

fn cat(fs: &mut Ubifs<FileVolume>, path: &str, out: &mut impl Write) -> io::Result<u64> {
    let mut file = fs.open(path).map_err(other)?;
    let mut buf = vec![0u8; 64 * 1024];
    let mut offset = 0u64;
    let copied = loop {
        match fs.read(&mut file, offset, &mut buf) {
            Ok(0) => break Ok(offset),
            Ok(n) => {
                if let Err(e) = out.write_all(&buf[..n]) {
                    break Err(e);
                }
                offset += n as u64;
            }
            Err(e) => break Err(other(e)),
        }
    };
    fs.close(file);
    copied
}

fn stat(fs: &mut Ubifs<FileVolume>, path: &str, out: &mut impl Write) -> io::Result<()> {
    let inode = fs.stat(path).map_err(other)?;
    writeln!(out, "  File: {}", path)?;
    writeln!(out, "  Size: {:<10} Inode: {:<8} Links: {}", inode.size, inode.number, inode.nlink)?;
    writeln!(
        out,
        "Access: ({:04o}/{})  Uid: {}  Gid: {}",
        inode.permissions(),
        mode_string(&inode),
        inode.uid,
        inode.gid
    )?;
    writeln!(out, "Access: {}.{:09}", inode.atime.sec, inode.atime.nsec)?;
    writeln!(out, "Modify: {}.{:09}", inode.mtime.sec, inode.mtime.nsec)?;
    writeln!(out, "Change: {}.{:09}", inode.ctime.sec, inode.ctime.nsec)?;
    writeln!(out, " Flags: {:?}  Xattrs: {}", inode.flags, inode.xattr_cnt)
}

fn readlink(fs: &mut Ubifs<FileVolume>, path: &str, out: &mut impl Write) -> io::Result<()> {
    let target = fs.readlink(path).map_err(other)?;
    out.write_all(&target)?;
    writeln!(out)
}

fn run(args: Args, out: &mut impl Write) -> io::Result<()> {
    let volume = FileVolume::open(&args.image, args.leb_size)?;
    let mut fs = Ubifs::mount(volume, MountOptions::default()).map_err(other)?;

    match &args.command {
        Command::Info => info(&fs, out)?,
        Command::Ls { path } => ls(&mut fs, path, out)?,
        Command::Cat { path } => {
            let n = cat(&mut fs, path, out)?;
            debug!("{}: {} bytes", path, n);
        }
        Command::Stat { path } => stat(&mut fs, path, out)?,
        Command::Readlink { path } => readlink(&mut fs, path, out)?,
    }
    out.flush()
}

fn main() -> io::Result<()> {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let stdout = io::stdout();
    let mut out = stdout.lock();
    run(args, &mut out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bootfs_ubifs::testing::{Image, ImageBuilder};
    use bootfs_ubifs::ROOT_INO;

    fn image() -> Image {
        let mut b = ImageBuilder::new().leb_size(16 * 1024).compression(Compression::Zlib);
        let boot = b.mkdir(ROOT_INO, "boot");
        let kernel: Vec<u8> = (0..10_000u32).map(|i| (i % 97) as u8).collect();
        b.add_file(boot, "zImage-6.1", &kernel);
        b.add_symlink(boot, "zImage", "zImage-6.1");
        b.build()
    }

    /// Write `bytes` to a fresh file under the temp dir
    fn write_image(name: &str, bytes: &[u8]) -> PathBuf {
        let path = std::env::temp_dir().join(format!("ubifs-dump-{}-{}.img", std::process::id(), name));
        std::fs::write(&path, bytes).unwrap();
        path
    }

    fn run_to_string(image: &Path, leb_size: Option<u32>, command: Command) -> io::Result<String> {
        let args = Args {
            image: image.to_path_buf(),
            leb_size,
            verbose: false,
            command,
        };
        let mut out = Vec::new();
        run(args, &mut out)?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    #[test]
    fn test_leb_size_detected() {
        let path = write_image("detect", image().bytes());
        let mut file = File::open(&path).unwrap();
        assert_eq!(read_geometry(&mut file).unwrap().0, 16 * 1024);

        let vol = FileVolume::open(&path, None).unwrap();
        assert_eq!(vol.geometry().leb_size, 16 * 1024);
        assert_eq!(vol.geometry().leb_count as usize, image().bytes().len() / (16 * 1024));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_commands() {
        let path = write_image("commands", image().bytes());

        let info = run_to_string(&path, None, Command::Info).unwrap();
        assert!(info.contains("LEB size:          16384"));
        assert!(info.contains("Compression:       zlib"));
        assert!(info.contains("State:             clean"));

        let ls = run_to_string(&path, None, Command::Ls { path: "/boot".into() }).unwrap();
        let lines: Vec<&str> = ls.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("lrwxrwxrwx"));
        assert!(lines[0].ends_with("zImage -> zImage-6.1"));
        assert!(lines[1].starts_with("-rw-r--r--"));
        assert!(lines[1].ends_with(" 10000 zImage-6.1"));

        let args = Args {
            image: path.clone(),
            leb_size: Some(16 * 1024),
            verbose: false,
            command: Command::Cat { path: "/boot/zImage-6.1".into() },
        };
        let mut out = Vec::new();
        run(args, &mut out).unwrap();
        assert_eq!(out.len(), 10_000);
        assert!(out.iter().enumerate().all(|(i, &b)| b == (i % 97) as u8));

        let target = run_to_string(&path, None, Command::Readlink { path: "/boot/zImage".into() }).unwrap();
        assert_eq!(target, "zImage-6.1\n");

        let stat = run_to_string(&path, None, Command::Stat { path: "/boot".into() }).unwrap();
        assert!(stat.contains("(0755/drwxr-xr-x)"));

        assert!(run_to_string(&path, None, Command::Cat { path: "/nope".into() }).is_err());
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_not_an_image() {
        let path = write_image("garbage", &[0u8; 8192]);
        let err = FileVolume::open(&path, None).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        let path_small = write_image("small", &[0u8; 100]);
        assert!(FileVolume::open(&path_small, None).is_err());

        std::fs::remove_file(&path).unwrap();
        std::fs::remove_file(&path_small).unwrap();
    }
}
