//! Integration tests: a realistic boot volume read through the public API
//! and through the VFS adapter

use bootfs_driver_traits::RamVolume;
use bootfs_ubifs::testing::{Image, ImageBuilder};
use bootfs_ubifs::{Compression, Error, Key, MountOptions, Ubifs, UbifsFilesystem, ROOT_INO};
use bootfs_vfs::{FileType, SeekFrom, Vfs, VfsError};

const KERNEL_LEN: usize = 3 * 4096 + 1234;

fn kernel(seed: u8) -> Vec<u8> {
    let mut x = seed as u32 | 1;
    (0..KERNEL_LEN)
        .map(|_| {
            x ^= x << 13;
            x ^= x >> 17;
            x ^= x << 5;
            // Mostly small values so zlib has something to do
            (x % 16) as u8
        })
        .collect()
}

/// Kernels under every codec, a device tree directory big enough for a
/// three level index, and the usual symlinks
fn boot_image() -> Image {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut b = ImageBuilder::new().fanout(4).leb_size(32 * 1024);
    let boot = b.mkdir(ROOT_INO, "boot");
    b.add_file_with(boot, "zImage-plain", &kernel(1), Compression::None);
    b.add_file_with(boot, "zImage-lzo", &kernel(2), Compression::Lzo);
    b.add_file_with(boot, "zImage-zlib", &kernel(3), Compression::Zlib);
    b.add_symlink(boot, "zImage", "zImage-zlib");
    b.add_symlink(ROOT_INO, "vmlinuz", "boot/zImage");

    let dtbs = b.mkdir(boot, "dtbs");
    for i in 0..40 {
        let name = format!("board-{:02}.dtb", i);
        b.add_file(dtbs, &name, name.as_bytes());
    }
    b.build()
}

fn vfs(image: &Image) -> Vfs {
    let fs = UbifsFilesystem::mount(image.volume(), MountOptions::default()).unwrap();
    let mut vfs = Vfs::new();
    vfs.mount("/", "ubifs", "ubi0:rootfs", Box::new(fs)).unwrap();
    vfs
}

#[test]
fn every_codec_reads_back() {
    let image = boot_image();
    let mut fs = Ubifs::mount(image.volume(), MountOptions::default()).unwrap();

    for (name, seed) in [("zImage-plain", 1), ("zImage-lzo", 2), ("zImage-zlib", 3)] {
        let path = format!("/boot/{}", name);
        let mut file = fs.open(&path).unwrap();
        assert_eq!(file.size(), KERNEL_LEN as u64);

        let mut data = vec![0u8; KERNEL_LEN + 100];
        let n = fs.read(&mut file, 0, &mut data).unwrap();
        assert_eq!(n, KERNEL_LEN, "{}", name);
        assert_eq!(&data[..n], &kernel(seed)[..], "{}", name);
        fs.close(file);
    }
}

#[test]
fn partial_reads_through_vfs() {
    let image = boot_image();
    let vfs = vfs(&image);
    let expected = kernel(3);

    let mut file = vfs.open("/vmlinuz").unwrap();
    assert_eq!(file.stat().unwrap().size, KERNEL_LEN as u64);

    // Straddles the first block boundary
    assert_eq!(file.seek(4000, SeekFrom::Start).unwrap(), 4000);
    let mut buf = [0u8; 200];
    assert_eq!(file.read(&mut buf).unwrap(), 200);
    assert_eq!(&buf[..], &expected[4000..4200]);

    // Odd-sized chunks to the end
    let mut rest = Vec::new();
    let mut chunk = [0u8; 777];
    loop {
        let n = file.read(&mut chunk).unwrap();
        if n == 0 {
            break;
        }
        rest.extend_from_slice(&chunk[..n]);
    }
    assert_eq!(rest, &expected[4200..]);
    assert_eq!(file.tell(), KERNEL_LEN as u64);
}

#[test]
fn large_directory_lists_every_entry() {
    let image = boot_image();
    let vfs = vfs(&image);

    let mut names: Vec<String> = vfs.readdir("/boot/dtbs").unwrap().into_iter().map(|e| e.name).collect();
    names.sort();
    let expected: Vec<String> = (0..40).map(|i| format!("board-{:02}.dtb", i)).collect();
    assert_eq!(names, expected);

    let st = vfs.stat("/boot/dtbs/board-17.dtb").unwrap();
    assert_eq!(st.file_type, FileType::Regular);
    assert_eq!(st.size, "board-17.dtb".len() as u64);
    assert_eq!(vfs.stat("/boot/dtbs/board-40.dtb"), Err(VfsError::NotFound));
}

#[test]
fn symlink_chain_resolves() {
    let image = boot_image();
    let vfs = vfs(&image);

    assert_eq!(vfs.readlink("/vmlinuz").unwrap(), "boot/zImage");
    assert_eq!(vfs.lstat("/boot/zImage").unwrap().file_type, FileType::Symlink);
    let resolved = vfs.canonicalize("/vmlinuz", Default::default()).unwrap();
    assert_eq!(resolved.path, "/boot/zImage-zlib");
    assert_eq!(resolved.symlinks_followed, 2);
}

#[test]
fn corrupt_data_node_fails_only_that_block() {
    let mut image = boot_image();
    let inum = {
        let mut fs = Ubifs::mount(image.volume(), MountOptions::default()).unwrap();
        fs.stat("/boot/zImage-plain").unwrap().number
    };
    let offset = image.leaf_offset(&Key::data(inum, 1)).unwrap();
    // Last byte of the payload
    image.bytes_mut()[offset + 48 + 4095] ^= 0x01;

    let volume: RamVolume = image.volume();
    let mut fs = Ubifs::mount(volume, MountOptions::default()).unwrap();
    let mut file = fs.open("/boot/zImage-plain").unwrap();
    let mut buf = vec![0u8; 4096];

    assert_eq!(fs.read(&mut file, 0, &mut buf).unwrap(), 4096);
    assert!(matches!(fs.read(&mut file, 4096, &mut buf), Err(Error::Io(_))));
    assert_eq!(fs.read(&mut file, 8192, &mut buf).unwrap(), 4096);
    assert_eq!(&buf[..], &kernel(1)[8192..12288]);
    fs.close(file);
}
