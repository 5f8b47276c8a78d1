//! Filesystem tests against synthetic images
//!
//! Run with: cargo test --package bootfs-ubifs

use std::collections::BTreeSet;
use std::string::String;
use std::vec::Vec;

use bootfs_driver_traits::RamVolume;

use super::*;
use crate::testing::{finish_node, ImageBuilder, InodeSpec};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 251) as u8).collect()
}

fn mount(builder: ImageBuilder) -> Ubifs<RamVolume> {
    init_logging();
    Ubifs::mount(builder.build().into_volume(), MountOptions::default()).unwrap()
}

fn read_all(fs: &mut Ubifs<RamVolume>, path: &str) -> Vec<u8> {
    let mut file = fs.open(path).unwrap();
    let mut out = vec![0u8; file.size() as usize];
    let n = fs.read(&mut file, 0, &mut out).unwrap();
    assert_eq!(n, out.len());
    fs.close(file);
    out
}

fn list(fs: &mut Ubifs<RamVolume>, path: &str) -> Vec<DirEntry> {
    let mut cursor = fs.opendir(path).unwrap();
    let mut entries = Vec::new();
    while let Some(entry) = fs.readdir(&mut cursor).unwrap() {
        entries.push(entry);
    }
    fs.closedir(cursor);
    entries
}

// ============================================================================
// MOUNT
// ============================================================================

#[test]
fn test_mount_empty_volume() {
    let mut fs = mount(ImageBuilder::new());
    assert_eq!(fs.info().fmt_version, 4);
    assert_eq!(fs.info().key_hash, KeyHash::R5);
    assert!(!fs.info().dirty);
    assert!(fs.stat("/").unwrap().is_dir());
    assert!(list(&mut fs, "/").is_empty());
}

#[test]
fn test_mount_options_parse() {
    assert_eq!(MountOptions::parse("tnc_cache=16").tnc_cache_limit, 16);
    assert_eq!(MountOptions::parse(""), MountOptions::default());
    assert_eq!(MountOptions::parse("bogus, tnc_cache=x"), MountOptions::default());
}

#[test]
fn test_bad_superblock() {
    init_logging();
    let mut image = ImageBuilder::new().build();
    image.bytes_mut()[0] ^= 1;
    let err = Ubifs::mount(image.into_volume(), MountOptions::default()).err().unwrap();
    assert!(matches!(err, MountError::BadSuperblock(_)));
}

#[test]
fn test_volume_too_small() {
    init_logging();
    let vol = RamVolume::new(vec![0xFF; 2 * 4096], 4096, 8);
    let err = Ubifs::mount(vol, MountOptions::default()).err().unwrap();
    assert_eq!(err, MountError::BadGeometry);
}

#[test]
fn test_geometry_mismatch() {
    init_logging();
    let image = ImageBuilder::new().build();

    let wrong_leb = RamVolume::new(image.bytes().to_vec(), image.leb_size() / 2, image.min_io_size());
    let err = Ubifs::mount(wrong_leb, MountOptions::default()).err().unwrap();
    assert_eq!(err, MountError::GeometryMismatch);

    let wrong_io = RamVolume::new(image.bytes().to_vec(), image.leb_size(), 2048);
    let err = Ubifs::mount(wrong_io, MountOptions::default()).err().unwrap();
    assert_eq!(err, MountError::GeometryMismatch);
}

#[test]
fn test_no_master_node() {
    init_logging();
    let mut image = ImageBuilder::new().build();
    let leb = image.leb_size() as usize;
    image.bytes_mut()[leb + 30] ^= 0xFF;
    image.bytes_mut()[2 * leb + 30] ^= 0xFF;
    let err = Ubifs::mount(image.into_volume(), MountOptions::default()).err().unwrap();
    assert_eq!(err, MountError::NoMasterNode);
}

#[test]
fn test_one_master_copy_is_enough() {
    init_logging();
    let mut image = ImageBuilder::new().build();
    let leb = image.leb_size() as usize;
    image.bytes_mut()[leb + 30] ^= 0xFF;
    assert!(Ubifs::mount(image.into_volume(), MountOptions::default()).is_ok());
}

#[test]
fn test_newest_master_wins() {
    let fs = mount(ImageBuilder::new().master_copies(3));
    assert_eq!(fs.info().cmt_no, 3);
}

#[test]
fn test_dirty_volume_mounts() {
    let fs = mount(ImageBuilder::new().dirty(true));
    assert!(fs.info().dirty);
}

#[test]
fn test_format_versions() {
    init_logging();
    let newer_compatible = ImageBuilder::new().format_version(6, 0).build();
    assert!(Ubifs::mount(newer_compatible.into_volume(), MountOptions::default()).is_ok());

    let newer = ImageBuilder::new().format_version(6, 1).build();
    let err = Ubifs::mount(newer.into_volume(), MountOptions::default()).err().unwrap();
    assert_eq!(
        err,
        MountError::UnsupportedVersion {
            fmt_version: 6,
            ro_compat_version: 1
        }
    );
}

#[test]
fn test_unmount_returns_volume() {
    let fs = mount(ImageBuilder::new());
    let vol = fs.unmount();
    assert!(Ubifs::mount(vol, MountOptions::default()).is_ok());
}

// ============================================================================
// LOOKUP AND DIRECTORIES
// ============================================================================

#[test]
fn test_path_resolution() {
    let mut b = ImageBuilder::new();
    let boot = b.mkdir(ROOT_INO, "boot");
    let dtbs = b.mkdir(boot, "dtbs");
    let dtb = b.add_file(dtbs, "board.dtb", b"\xd0\x0d\xfe\xed");
    let mut fs = mount(b);

    assert_eq!(fs.stat("/boot/dtbs/board.dtb").unwrap().number, dtb);
    assert_eq!(fs.stat("boot//dtbs/").unwrap().number, dtbs);
    assert_eq!(fs.stat("//").unwrap().number, ROOT_INO);
    assert_eq!(fs.stat("/boot/missing"), Err(Error::NotFound));
    assert_eq!(fs.stat("/boot/dtbs/board.dtb/x"), Err(Error::NotADirectory));
}

#[test]
fn test_name_too_long() {
    let mut fs = mount(ImageBuilder::new());
    let long = "a".repeat(MAX_NLEN + 1);
    assert_eq!(fs.stat(&long), Err(Error::NameTooLong));
    assert_eq!(fs.stat(&"a".repeat(MAX_NLEN)), Err(Error::NotFound));
}

#[test]
fn test_open_and_opendir_kinds() {
    let mut b = ImageBuilder::new();
    b.mkdir(ROOT_INO, "dir");
    b.add_file(ROOT_INO, "file", b"x");
    let mut fs = mount(b);
    assert!(matches!(fs.open("/dir"), Err(Error::IsADirectory)));
    assert!(matches!(fs.opendir("/file"), Err(Error::NotADirectory)));
}

#[test]
fn test_readdir_lists_every_entry_once() {
    let mut b = ImageBuilder::new().fanout(4);
    let mut names = BTreeSet::new();
    for i in 0..300 {
        let name = format!("file-{:03}", i);
        b.add_file(ROOT_INO, &name, name.as_bytes());
        names.insert(name);
    }
    let mut fs = mount(b);

    let listed: Vec<String> = list(&mut fs, "/").into_iter().map(|e| e.name).collect();
    assert_eq!(listed.len(), 300);
    assert_eq!(listed.iter().cloned().collect::<BTreeSet<_>>(), names);

    for name in &names {
        let path = format!("/{}", name);
        assert_eq!(read_all(&mut fs, &path), name.as_bytes());
    }
}

#[test]
fn test_readdir_kinds_and_links() {
    let mut b = ImageBuilder::new();
    let file = b.add_file(ROOT_INO, "file", b"data");
    b.mkdir(ROOT_INO, "dir");
    b.add_symlink(ROOT_INO, "link", "file");
    b.add_inode(ROOT_INO, "fifo", InodeSpec::special(FileKind::Fifo));
    b.link(ROOT_INO, "alias", file, FileKind::Regular.itype());
    let mut fs = mount(b);

    let entries = list(&mut fs, "/");
    let kind = |name: &str| entries.iter().find(|e| e.name == name).and_then(|e| e.kind);
    assert_eq!(entries.len(), 5);
    assert_eq!(kind("file"), Some(FileKind::Regular));
    assert_eq!(kind("dir"), Some(FileKind::Directory));
    assert_eq!(kind("link"), Some(FileKind::Symlink));
    assert_eq!(kind("fifo"), Some(FileKind::Fifo));
    assert_eq!(fs.stat("/alias").unwrap().number, file);
}

#[test]
fn test_readdir_rewind() {
    let mut b = ImageBuilder::new();
    b.add_file(ROOT_INO, "one", b"1");
    b.add_file(ROOT_INO, "two", b"2");
    let mut fs = mount(b);

    let mut cursor = fs.opendir("/").unwrap();
    let first = fs.readdir(&mut cursor).unwrap();
    while fs.readdir(&mut cursor).unwrap().is_some() {}
    assert_eq!(fs.readdir(&mut cursor).unwrap(), None);
    cursor.rewind();
    assert_eq!(fs.readdir(&mut cursor).unwrap(), first);
    fs.closedir(cursor);
}

#[test]
fn test_hash_collisions() {
    // The test hash only looks at the first four bytes
    let mut b = ImageBuilder::new().key_hash(KeyHash::Test).fanout(2);
    let names = ["abcd2", "abcd0", "abcd1", "zz", "abcd"];
    let mut inums = Vec::new();
    for name in names {
        inums.push(b.add_file(ROOT_INO, name, name.as_bytes()));
    }
    let mut fs = mount(b);
    assert_eq!(fs.info().key_hash, KeyHash::Test);

    for (name, inum) in names.iter().zip(&inums) {
        assert_eq!(fs.stat(&format!("/{}", name)).unwrap().number, *inum, "{}", name);
    }
    assert_eq!(fs.stat("/abcd3"), Err(Error::NotFound));

    let listed: Vec<String> = list(&mut fs, "/").into_iter().map(|e| e.name).collect();
    let colliding: Vec<&str> = listed.iter().map(String::as_str).filter(|n| n.starts_with("abcd")).collect();
    assert_eq!(colliding, ["abcd", "abcd0", "abcd1", "abcd2"]);
    assert_eq!(listed.len(), names.len());
}

#[test]
fn test_next_entry_ordering() {
    let mut b = ImageBuilder::new().key_hash(KeyHash::Test).fanout(2);
    let etc = b.mkdir(ROOT_INO, "etc");
    for name in ["aaaa", "bbbb2", "bbbb1", "dddd", "mmmm"] {
        b.add_file(etc, name, name.as_bytes());
    }
    // Entries of the next directory inode follow in key order
    let var = b.mkdir(ROOT_INO, "var");
    b.add_file(var, "log", b"");
    let mut fs = mount(b);
    assert!(var > etc);

    let hash = fs.info().key_hash;
    let mut sorted: Vec<(u32, &str)> = ["aaaa", "bbbb1", "bbbb2", "dddd", "mmmm"]
        .into_iter()
        .map(|n| (hash.hash(n.as_bytes()), n))
        .collect();
    sorted.sort();
    let name_after = |fs: &mut Ubifs<RamVolume>, key: Key, hint: Option<&str>| {
        fs.next_entry(&key, hint.map(str::as_bytes), 0)
            .unwrap()
            .map(|d| String::from_utf8(d.name).unwrap())
    };

    assert_eq!(name_after(&mut fs, Key::lowest_dent(etc), None).as_deref(), Some(sorted[0].1));

    let mut gaps = 0;
    for pair in sorted.windows(2) {
        let ((lo_hash, lo), (hi_hash, hi)) = (pair[0], pair[1]);
        // The entry itself is skipped when its name is the hint
        assert_eq!(name_after(&mut fs, Key::dent(etc, lo_hash), Some(lo)).as_deref(), Some(hi));
        // A key between two entries lands on the later one
        if hi_hash > lo_hash + 1 {
            assert_eq!(name_after(&mut fs, Key::dent(etc, lo_hash + 1), None).as_deref(), Some(hi));
            gaps += 1;
        }
    }
    assert!(gaps >= 3);

    // Past the last entry the scan stops instead of moving on to `var`
    let (last_hash, last) = sorted[sorted.len() - 1];
    assert_eq!(name_after(&mut fs, Key::dent(etc, last_hash), Some(last)), None);
    assert_eq!(name_after(&mut fs, Key::dent(etc, last_hash + 1), None), None);
    assert_eq!(name_after(&mut fs, Key::lowest_dent(var), None).as_deref(), Some("log"));
}

#[test]
fn test_stale_entry_ignored() {
    let mut b = ImageBuilder::new();
    let dir = b.mkdir(ROOT_INO, "etc");
    let live = b.add_file(dir, "fstab", b"live");
    b.add_stale_dent(dir, "ghost", live, FileKind::Regular.itype());
    let mut fs = mount(b);

    assert_eq!(fs.stat("/etc/ghost"), Err(Error::NotFound));
    let names: Vec<String> = list(&mut fs, "/etc").into_iter().map(|e| e.name).collect();
    assert_eq!(names, ["fstab"]);
}

#[test]
fn test_symlinks_are_not_followed() {
    let mut b = ImageBuilder::new();
    b.add_file(ROOT_INO, "zImage-6.1", b"kernel");
    b.add_symlink(ROOT_INO, "zImage", "zImage-6.1");
    let mut fs = mount(b);

    assert_eq!(fs.readlink("/zImage").unwrap(), b"zImage-6.1");
    assert_eq!(fs.readlink("/zImage-6.1"), Err(Error::NotASymlink));
    let st = fs.stat("/zImage").unwrap();
    assert!(st.is_symlink());
    assert_eq!(st.size, 10);
}

#[test]
fn test_inode_refcounts() {
    let mut b = ImageBuilder::new();
    let inum = b.add_file(ROOT_INO, "f", b"abc");
    let mut fs = mount(b);

    let files: Vec<OpenFile> = (0..3).map(|_| fs.open("/f").unwrap()).collect();
    assert_eq!(fs.inode_cache().refcount(inum), Some(3));
    assert_eq!(fs.inode_cache().refcount(ROOT_INO), Some(0));

    for (i, file) in files.into_iter().enumerate() {
        assert!(!fs.inode_cache().is_evictable(inum));
        fs.close(file);
        assert_eq!(fs.inode_cache().refcount(inum), Some(2 - i));
    }
    assert!(fs.inode_cache().is_evictable(inum));
    assert_eq!(fs.inode_cache_mut().evict_unreferenced(), 2);
    assert_eq!(fs.inode_cache().cached(), 0);
}

#[test]
fn test_handles_belong_to_their_mount() {
    let image = {
        let mut b = ImageBuilder::new();
        b.mkdir(ROOT_INO, "boot");
        b.add_file(ROOT_INO, "f", b"abc");
        b.build()
    };
    init_logging();
    let mut first = Ubifs::mount(image.volume(), MountOptions::default()).unwrap();
    let mut second = Ubifs::mount(image.volume(), MountOptions::default()).unwrap();
    assert_ne!(first.mount_id(), second.mount_id());

    let mut file = first.open("/f").unwrap();
    let inum = file.inode().number;
    let mut buf = [0u8; 3];
    assert_eq!(second.read(&mut file, 0, &mut buf), Err(Error::InvalidArgument));
    assert_eq!(first.read(&mut file, 0, &mut buf).unwrap(), 3);

    let mut cursor = first.opendir("/").unwrap();
    assert_eq!(second.readdir(&mut cursor), Err(Error::InvalidArgument));
    assert!(first.readdir(&mut cursor).unwrap().is_some());

    // Closing on the wrong mount leaves both inode caches alone
    let other = second.open("/f").unwrap();
    second.close(file);
    assert_eq!(second.inode_cache().refcount(inum), Some(1));
    assert_eq!(first.inode_cache().refcount(inum), Some(1));
    first.closedir(cursor);
    second.close(other);
    assert_eq!(second.inode_cache().refcount(inum), Some(0));
}

#[test]
fn test_offset_past_last_block() {
    let mut b = ImageBuilder::new();
    b.add_sparse_file(ROOT_INO, "huge", u64::MAX, &[]);
    let mut fs = mount(b);
    let mut file = fs.open("/huge").unwrap();
    let mut buf = [0xFFu8; 8];
    assert_eq!(fs.read(&mut file, 0, &mut buf).unwrap(), 8);
    assert_eq!(buf, [0; 8]);
    assert_eq!(fs.read(&mut file, 1 << 50, &mut buf), Err(Error::InvalidArgument));
    fs.close(file);
}

#[test]
fn test_failed_resolve_releases_references() {
    let mut b = ImageBuilder::new();
    let dir = b.mkdir(ROOT_INO, "d");
    let mut fs = mount(b);
    assert_eq!(fs.stat("/d/nope"), Err(Error::NotFound));
    assert_eq!(fs.inode_cache().refcount(dir), Some(0));
    assert_eq!(fs.inode_cache().refcount(ROOT_INO), Some(0));
}

#[test]
fn test_index_cache_limit() {
    init_logging();
    let mut b = ImageBuilder::new().fanout(2);
    for i in 0..40 {
        b.add_file(ROOT_INO, &format!("f{}", i), &[i as u8; 10]);
    }
    let vol = b.build().into_volume();
    let mut fs = Ubifs::mount(vol, MountOptions { tnc_cache_limit: 3 }).unwrap();
    for i in 0..40 {
        assert_eq!(read_all(&mut fs, &format!("/f{}", i)), [i as u8; 10]);
        assert!(fs.cached_index_nodes() <= 3);
    }
}

#[test]
fn test_exact_lookup() {
    let mut b = ImageBuilder::new();
    let inum = b.add_file(ROOT_INO, "f", b"abc");
    let mut fs = mount(b);
    let node = fs.lookup(&Key::inode(inum)).unwrap().unwrap();
    assert_eq!(node.header.node_type, NodeType::Inode);
    assert!(fs.lookup(&Key::inode(inum + 100)).unwrap().is_none());
    assert!(fs.lookup(&Key::data(inum, 1)).unwrap().is_none());
    assert!(fs.lookup(&Key::inode(0)).unwrap().is_none());
}

// ============================================================================
// FILE READS
// ============================================================================

#[test]
fn test_read_across_block_boundary() {
    let data = pattern(10_000);
    for compression in [Compression::None, Compression::Lzo, Compression::Zlib] {
        let mut b = ImageBuilder::new().compression(compression);
        b.add_file(ROOT_INO, "vmlinux", &data);
        let mut fs = mount(b);

        let mut file = fs.open("/vmlinux").unwrap();
        let mut buf = [0u8; 200];
        assert_eq!(fs.read(&mut file, 4000, &mut buf).unwrap(), 200, "{:?}", compression);
        assert_eq!(&buf[..96], &data[4000..4096]);
        assert_eq!(&buf[96..], &data[4096..4200]);
        assert_eq!(file.cached_block(), Some(1));
        fs.close(file);

        assert_eq!(read_all(&mut fs, "/vmlinux"), data, "{:?}", compression);
    }
}

/// Compression tag and payload length of the data node for `block`
fn stored_block(image: &crate::testing::Image, inum: u64, block: u32) -> (u16, usize) {
    let off = image.leaf_offset(&Key::data(inum, block)).unwrap();
    let dn = node::decode(&image.bytes()[off..]).unwrap().into_data().unwrap();
    (dn.compr_type, dn.data.len())
}

#[test]
fn test_blocks_that_do_not_shrink_are_stored_plain() {
    let text = b"console=ttyS0,115200 root=ubi0:rootfs rootfstype=ubifs ".repeat(80);
    let mut x = 0x1234_5678u32;
    let noise: Vec<u8> = (0..BLOCK_SIZE)
        .map(|_| {
            x ^= x << 13;
            x ^= x >> 17;
            x ^= x << 5;
            x as u8
        })
        .collect();

    for compression in [Compression::Lzo, Compression::Zlib] {
        let mut b = ImageBuilder::new();
        let packed = b.add_file_with(ROOT_INO, "cmdline", &text, compression);
        let raw = b.add_file_with(ROOT_INO, "noise", &noise, compression);
        let image = b.build();

        let (tag, len) = stored_block(&image, packed, 0);
        assert_eq!(tag, compression as u16);
        assert!(len < BLOCK_SIZE, "{:?}: {}", compression, len);
        assert_eq!(stored_block(&image, raw, 0), (Compression::None as u16, BLOCK_SIZE));

        init_logging();
        let mut fs = Ubifs::mount(image.into_volume(), MountOptions::default()).unwrap();
        assert_eq!(read_all(&mut fs, "/cmdline"), text, "{:?}", compression);
        assert_eq!(read_all(&mut fs, "/noise"), noise, "{:?}", compression);
    }
}

#[test]
fn test_read_at_end_of_file() {
    let mut b = ImageBuilder::new();
    b.add_file(ROOT_INO, "f", b"0123456789");
    let mut fs = mount(b);
    let mut file = fs.open("/f").unwrap();

    let mut buf = [0u8; 2];
    assert_eq!(fs.read(&mut file, 10, &mut buf).unwrap(), 0);
    assert_eq!(fs.read(&mut file, 1000, &mut buf).unwrap(), 0);
    assert_eq!(fs.read(&mut file, 9, &mut buf).unwrap(), 1);
    assert_eq!(buf[0], b'9');
    assert_eq!(fs.read(&mut file, 0, &mut []).unwrap(), 0);
    fs.close(file);
}

#[test]
fn test_empty_file() {
    let mut b = ImageBuilder::new();
    b.add_file(ROOT_INO, "empty", b"");
    let mut fs = mount(b);
    assert!(read_all(&mut fs, "/empty").is_empty());
}

#[test]
fn test_holes_read_as_zeros() {
    let mut b = ImageBuilder::new();
    let size = 3 * BLOCK_SIZE as u64 + 10;
    b.add_sparse_file(ROOT_INO, "sparse", size, &[(1, &[0xAA; BLOCK_SIZE])]);
    let mut fs = mount(b);

    let data = read_all(&mut fs, "/sparse");
    assert_eq!(data.len() as u64, size);
    assert!(data[..BLOCK_SIZE].iter().all(|&b| b == 0));
    assert!(data[BLOCK_SIZE..2 * BLOCK_SIZE].iter().all(|&b| b == 0xAA));
    assert!(data[2 * BLOCK_SIZE..].iter().all(|&b| b == 0));
}

#[test]
fn test_short_block_is_zero_padded() {
    // Inode larger than its data: the tail of the last block is zeros
    let mut b = ImageBuilder::new();
    b.add_sparse_file(ROOT_INO, "f", 100, &[(0, b"head")]);
    let mut fs = mount(b);
    let data = read_all(&mut fs, "/f");
    assert_eq!(&data[..4], b"head");
    assert!(data[4..].iter().all(|&b| b == 0));
}

#[test]
fn test_stale_data_reads_as_hole() {
    let mut b = ImageBuilder::new();
    let inum = b.add_sparse_file(ROOT_INO, "f", 2 * BLOCK_SIZE as u64, &[(0, b"fresh")]);
    b.add_stale_block(inum, 1, &[0x55; 64]);
    let mut fs = mount(b);
    let data = read_all(&mut fs, "/f");
    assert_eq!(&data[..5], b"fresh");
    assert!(data[BLOCK_SIZE..].iter().all(|&b| b == 0));
}

#[test]
fn test_codec_not_compiled_in() {
    let mut b = ImageBuilder::new();
    b.add_file_with(ROOT_INO, "z", b"zstd payload", Compression::Zstd);
    let mut fs = mount(b);
    let mut file = fs.open("/z").unwrap();
    let mut buf = [0u8; 4];
    match fs.read(&mut file, 0, &mut buf) {
        Err(Error::Io(IoError::Decompress(e))) => {
            assert_eq!(e.failure, DecompressFailure::NotCompiledIn);
            assert_eq!(e.codec, Compression::Zstd as u16);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(file.cached_block(), None);
    fs.close(file);
}

#[test]
fn test_declared_size_mismatch() {
    let mut b = ImageBuilder::new();
    let inum = b.add_inode(ROOT_INO, "f", InodeSpec::file(5));
    b.add_data_node(inum, 0, b"abc", Compression::None as u16, 5);
    let mut fs = mount(b);
    let mut file = fs.open("/f").unwrap();
    let mut buf = [0u8; 5];
    match fs.read(&mut file, 0, &mut buf) {
        Err(Error::Io(IoError::CorruptTree(c))) => {
            assert_eq!(c.reason, CorruptReason::SizeMismatch { expected: 5, actual: 3 });
        }
        other => panic!("unexpected {:?}", other),
    }
    fs.close(file);
}

#[test]
fn test_corrupt_leaf_is_reported() {
    init_logging();
    let mut b = ImageBuilder::new();
    let inum = b.add_file(ROOT_INO, "f", &pattern(100));
    let mut image = b.build();
    let off = image.leaf_offset(&Key::data(inum, 0)).unwrap();
    image.bytes_mut()[off + 60] ^= 0x01;

    let mut fs = Ubifs::mount(image.into_volume(), MountOptions::default()).unwrap();
    let mut file = fs.open("/f").unwrap();
    let mut buf = [0u8; 10];
    match fs.read(&mut file, 0, &mut buf) {
        Err(Error::Io(IoError::CorruptTree(c))) => {
            assert!(matches!(c.reason, CorruptReason::BadChecksum { .. }));
            assert!(c.location.is_some());
        }
        other => panic!("unexpected {:?}", other),
    }
    fs.close(file);
}

#[test]
fn test_leaf_key_must_match_branch() {
    init_logging();
    let mut b = ImageBuilder::new();
    let inum = b.add_file(ROOT_INO, "f", &pattern(100));
    let mut image = b.build();
    let off = image.leaf_offset(&Key::data(inum, 0)).unwrap();
    // Point the node at block 9 and make the CRC valid again
    image.bytes_mut()[off + 28] = 9;
    finish_node(&mut image.bytes_mut()[off..]);

    let mut fs = Ubifs::mount(image.into_volume(), MountOptions::default()).unwrap();
    let mut file = fs.open("/f").unwrap();
    let mut buf = [0u8; 10];
    match fs.read(&mut file, 0, &mut buf) {
        Err(Error::Io(IoError::CorruptTree(c))) => assert_eq!(c.reason, CorruptReason::KeyMismatch),
        other => panic!("unexpected {:?}", other),
    }
    fs.close(file);
}

#[test]
fn test_linux_rootarg() {
    let fs = mount(ImageBuilder::new());
    assert_eq!(
        fs.linux_rootarg("rootfs", "3"),
        "root=ubi0:rootfs ubi.mtd=3 rootfstype=ubifs"
    );
}
