//! Mounts synthetic FAT32 and NTFS images from files on disk.

use std::io::Write;
use tempfile::NamedTempFile;
use volume_forensics::filesystem::VolumeInfo;
use volume_forensics::filesystem::bpb::FsKind;
use volume_forensics::traits::TreeDisplay;
use volume_forensics::{FsError, VolumeHandle};

const SECTOR: usize = 512;

fn write_image(bytes: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(bytes).unwrap();
    file.flush().unwrap();
    file
}

fn put(buf: &mut [u8], off: usize, bytes: &[u8]) {
    buf[off..off + bytes.len()].copy_from_slice(bytes);
}

/// FAT32 image with `hello.txt` in the root and `sub/inner.bin`.
fn fat32_image() -> Vec<u8> {
    let (rsvd, fat_sz, total) = (4usize, 1usize, 64usize);
    let mut img = vec![0u8; total * SECTOR];
    put(&mut img, 0, &[0xEB, 0x58, 0x90]);
    put(&mut img, 3, b"MSWIN4.1");
    put(&mut img, 0x0B, &(SECTOR as u16).to_le_bytes());
    img[0x0D] = 1;
    put(&mut img, 0x0E, &(rsvd as u16).to_le_bytes());
    img[0x10] = 2;
    img[0x15] = 0xF8;
    put(&mut img, 0x20, &(total as u32).to_le_bytes());
    put(&mut img, 0x24, &(fat_sz as u32).to_le_bytes());
    put(&mut img, 0x2C, &2u32.to_le_bytes());
    put(&mut img, 0x47, b"TESTVOL    ");
    put(&mut img, 0x52, b"FAT32   ");
    put(&mut img, 510, &[0x55, 0xAA]);

    let fat = rsvd * SECTOR;
    for cluster in [0u32, 1, 2, 3, 4, 5] {
        put(&mut img, fat + cluster as usize * 4, &0x0FFF_FFFFu32.to_le_bytes());
    }
    let cluster = |n: usize| (rsvd + 2 * fat_sz + n - 2) * SECTOR;
    let slot = |name: &[u8; 11], attr: u8, first: u16, size: u32| {
        let mut s = [0u8; 32];
        s[..11].copy_from_slice(name);
        s[11] = attr;
        s[26..28].copy_from_slice(&first.to_le_bytes());
        s[28..32].copy_from_slice(&size.to_le_bytes());
        s
    };

    put(&mut img, cluster(2), &slot(b"HELLO   TXT", 0x20, 3, 12));
    put(&mut img, cluster(2) + 32, &slot(b"SUB        ", 0x10, 4, 0));
    put(&mut img, cluster(3), b"hello, world");
    put(&mut img, cluster(4), &slot(b".          ", 0x10, 4, 0));
    put(&mut img, cluster(4) + 32, &slot(b"..         ", 0x10, 0, 0));
    put(&mut img, cluster(4) + 64, &slot(b"INNER   BIN", 0x20, 5, 3));
    put(&mut img, cluster(5), &[1, 2, 3]);
    img
}

fn protect(record: &mut [u8]) {
    put(record, 4, &0x30u16.to_le_bytes());
    put(record, 6, &3u16.to_le_bytes());
    put(record, 0x30, &[0x01, 0x00]);
    for i in 1..=2 {
        let end = i * SECTOR;
        let saved = [record[end - 2], record[end - 1]];
        put(record, 0x30 + 2 * i, &saved);
        put(record, end - 2, &[0x01, 0x00]);
    }
}

fn resident(type_code: u32, name: &str, value: &[u8]) -> Vec<u8> {
    let units: Vec<u16> = name.encode_utf16().collect();
    let value_offset = (0x18 + units.len() * 2 + 7) & !7;
    let len = (value_offset + value.len() + 7) & !7;
    let mut attr = vec![0u8; len];
    put(&mut attr, 0, &type_code.to_le_bytes());
    put(&mut attr, 4, &(len as u32).to_le_bytes());
    attr[9] = units.len() as u8;
    put(&mut attr, 10, &0x18u16.to_le_bytes());
    put(&mut attr, 16, &(value.len() as u32).to_le_bytes());
    put(&mut attr, 20, &(value_offset as u16).to_le_bytes());
    for (i, u) in units.iter().enumerate() {
        put(&mut attr, 0x18 + 2 * i, &u.to_le_bytes());
    }
    put(&mut attr, value_offset, value);
    attr
}

fn file_name(name: &str, flags: u32) -> Vec<u8> {
    let units: Vec<u16> = name.encode_utf16().collect();
    let mut value = vec![0u8; 66 + units.len() * 2];
    put(&mut value, 0, &5u64.to_le_bytes());
    put(&mut value, 56, &flags.to_le_bytes());
    value[64] = units.len() as u8;
    value[65] = 1;
    for (i, u) in units.iter().enumerate() {
        put(&mut value, 66 + 2 * i, &u.to_le_bytes());
    }
    value
}

fn record(flags: u16, attributes: &[Vec<u8>]) -> Vec<u8> {
    let mut rec = vec![0u8; 1024];
    put(&mut rec, 0, b"FILE");
    put(&mut rec, 20, &0x38u16.to_le_bytes());
    put(&mut rec, 22, &flags.to_le_bytes());
    let mut pos = 0x38;
    for attr in attributes {
        put(&mut rec, pos, attr);
        pos += attr.len();
    }
    put(&mut rec, pos, &0xFFFF_FFFFu32.to_le_bytes());
    put(&mut rec, 24, &((pos + 8) as u32).to_le_bytes());
    protect(&mut rec);
    rec
}

/// NTFS image whose root holds `notes.txt` (record 24).
fn ntfs_image() -> Vec<u8> {
    let (total, mft_lcn) = (128usize, 8usize);
    let mut img = vec![0u8; total * SECTOR];
    put(&mut img, 0, &[0xEB, 0x52, 0x90]);
    put(&mut img, 3, b"NTFS    ");
    put(&mut img, 0x0B, &(SECTOR as u16).to_le_bytes());
    img[0x0D] = 1;
    put(&mut img, 0x28, &(total as i64).to_le_bytes());
    put(&mut img, 0x30, &(mft_lcn as u64).to_le_bytes());
    put(&mut img, 0x38, &2u64.to_le_bytes());
    img[0x40] = 0xF6;
    img[0x44] = 2;
    put(&mut img, 510, &[0x55, 0xAA]);

    let key = file_name("notes.txt", 0x20);
    let entry_len = (16 + key.len() + 7) & !7;
    let mut entry = vec![0u8; entry_len];
    put(&mut entry, 0, &24u64.to_le_bytes());
    put(&mut entry, 8, &(entry_len as u16).to_le_bytes());
    put(&mut entry, 10, &(key.len() as u16).to_le_bytes());
    put(&mut entry, 16, &key);
    let mut last = vec![0u8; 16];
    put(&mut last, 8, &16u16.to_le_bytes());
    put(&mut last, 12, &2u16.to_le_bytes());

    let mut index_root = vec![0u8; 32];
    put(&mut index_root, 0, &0x30u32.to_le_bytes());
    put(&mut index_root, 8, &4096u32.to_le_bytes());
    let node_len = (16 + entry.len() + last.len()) as u32;
    put(&mut index_root, 16, &16u32.to_le_bytes());
    put(&mut index_root, 20, &node_len.to_le_bytes());
    put(&mut index_root, 24, &node_len.to_le_bytes());
    index_root.extend(entry);
    index_root.extend(last);

    let mft = mft_lcn * SECTOR;
    let mft_record = record(0x0001, &[resident(0x80, "", &[0u8; 8])]);
    put(&mut img, mft, &mft_record);
    let root = record(
        0x0003,
        &[
            resident(0x30, "", &file_name(".", 0x1000_0000)),
            resident(0x90, "$I30", &index_root),
        ],
    );
    put(&mut img, mft + 5 * 1024, &root);
    let notes = record(
        0x0001,
        &[
            resident(0x30, "", &file_name("notes.txt", 0x20)),
            resident(0x80, "", b"remember the milk"),
        ],
    );
    put(&mut img, mft + 24 * 1024, &notes);
    img
}

#[test]
fn mounts_fat32_image_by_path() {
    let file = write_image(&fat32_image());
    let mut handle = VolumeHandle::mount(file.path(), true).unwrap();
    assert_eq!(handle.kind(), FsKind::Fat32);

    let root = handle.root().clone();
    let hello = handle.open_path(&root, "hello.txt").unwrap();
    assert!(hello.is_text());
    assert_eq!(handle.read_file_content(&hello).unwrap(), b"hello, world");

    let sub = handle.open_path(&root, "sub").unwrap();
    let inner = handle.open_path(&sub, "inner.bin").unwrap();
    assert_eq!(handle.read_file_content(&inner).unwrap(), vec![1, 2, 3]);

    let tree = handle.display_tree().unwrap();
    assert!(tree.contains("inner.bin"));

    match handle.volume_info().unwrap() {
        VolumeInfo::Fat32 { volume_label, .. } => assert_eq!(volume_label, "TESTVOL"),
        other => panic!("unexpected info {other:?}"),
    }
}

#[test]
fn mounts_ntfs_image_by_path() {
    let file = write_image(&ntfs_image());
    let mut handle = VolumeHandle::mount(file.path(), true).unwrap();
    assert_eq!(handle.kind(), FsKind::Ntfs);

    let root = handle.root().clone();
    let names: Vec<&str> = root
        .children()
        .unwrap()
        .iter()
        .map(|e| e.name().as_str())
        .collect();
    assert_eq!(names, vec!["notes.txt"]);

    let notes = handle.load(&root.children().unwrap()[0]).unwrap();
    assert_eq!(notes.content(), Some(&b"remember the milk"[..]));
}

#[test]
fn rejects_unformatted_image() {
    let file = write_image(&vec![0u8; 8 * SECTOR]);
    assert!(matches!(
        VolumeHandle::mount(file.path(), false),
        Err(FsError::UnsupportedFilesystem)
    ));
}

#[test]
fn missing_image_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        VolumeHandle::mount(&dir.path().join("absent.img"), false),
        Err(FsError::IOError(_))
    ));
}

#[test]
fn validation_rejects_bad_signature() {
    let mut image = fat32_image();
    image[511] = 0x00;
    let file = write_image(&image);

    assert!(matches!(
        VolumeHandle::mount(file.path(), true),
        Err(FsError::InvalidSignature(_))
    ));
    assert!(VolumeHandle::mount(file.path(), false).is_ok());
}
