//! End-to-end volume scenarios against a real image file.

use uos::disk::FileDisk;
use uos::fs::{format, FsError, Volume};

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[test]
fn image_file_survives_a_full_session() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("volume.img");

    let mut dev = FileDisk::create(&path, 128).unwrap();
    format(&mut dev).unwrap();

    // Session one: write a small file and a multi-block file.
    let mut vol = Volume::mount(dev).unwrap();
    vol.create("hello.txt").unwrap();
    let fd = vol.open("hello.txt").unwrap();
    assert_eq!(vol.write(fd, b"hello").unwrap(), 5);
    vol.close(fd).unwrap();

    let big = pattern(10000);
    vol.create("big.bin").unwrap();
    let fd = vol.open("big.bin").unwrap();
    assert_eq!(vol.write(fd, &big).unwrap(), 10000);
    vol.close(fd).unwrap();
    vol.unmount().unwrap();

    // Session two: reopen the image from scratch and read everything back.
    let dev = FileDisk::open(&path).unwrap();
    let mut vol = Volume::mount(dev).unwrap();
    let names: Vec<String> = vol.files().map(|f| f.name.to_string()).collect();
    assert_eq!(names, vec!["hello.txt", "big.bin"]);

    let fd = vol.open("hello.txt").unwrap();
    let mut out = [0u8; 8];
    assert_eq!(vol.read(fd, &mut out).unwrap(), 5);
    assert_eq!(&out[..5], b"hello");
    vol.close(fd).unwrap();

    let fd = vol.open("big.bin").unwrap();
    assert_eq!(vol.stat(fd).unwrap(), 10000);
    let mut out = vec![0u8; 10000];
    assert_eq!(vol.read(fd, &mut out).unwrap(), 10000);
    assert_eq!(out, big);
    vol.close(fd).unwrap();

    // Deleting the big file returns its three blocks.
    let free = vol.info().fat_free;
    vol.remove("big.bin").unwrap();
    assert_eq!(vol.info().fat_free, free + 3);
    vol.unmount().unwrap();
}

#[test]
fn info_matches_the_formatted_geometry() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("volume.img");
    let mut dev = FileDisk::create(&path, 128).unwrap();
    format(&mut dev).unwrap();
    let vol = Volume::mount(dev).unwrap();

    let info = vol.info();
    assert_eq!(info.total_blocks, 128);
    assert_eq!(info.fat_blocks, 1);
    assert_eq!(info.root_dir_block, 2);
    assert_eq!(info.data_start, 3);
    assert_eq!(info.data_blocks, 125);
    assert_eq!(info.fat_free, 125);
    assert_eq!(info.dir_free, 128);
}

#[test]
fn mounting_an_unformatted_image_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("blank.img");
    let dev = FileDisk::create(&path, 64).unwrap();
    assert!(matches!(Volume::mount(dev), Err(FsError::BadImage)));
}
