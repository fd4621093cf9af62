//! Corruption detection tests
//!
//! A damaged medium must be rejected on load, never half-opened.

use fhdpak::core::header::{Header, HEADER_SIZE};
use fhdpak::{Access, Container, MemoryChannel};

fn build_medium() -> (Vec<u8>, Header) {
    let channel = MemoryChannel::new();
    let view = MemoryChannel::from_shared(channel.shared());
    let mut pak = Container::create("c.pak", Access::ReadWrite, Box::new(channel), 4, 8)
        .unwrap()
        .unwrap();
    pak.write_file("alpha", &vec![1u8; 5000]).unwrap();
    pak.write_file("beta", b"beta").unwrap();
    let header = *pak.header();
    pak.shutdown().unwrap();
    (view.to_vec(), header)
}

fn load(bytes: Vec<u8>) -> Option<Container> {
    Container::load("c.pak", Access::Read, Box::new(MemoryChannel::from_bytes(bytes))).unwrap()
}

fn put_i32(bytes: &mut [u8], offset: u64, value: i32) {
    let offset = offset as usize;
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

#[test]
fn test_intact_medium_loads() {
    let (bytes, _) = build_medium();
    let mut pak = load(bytes).unwrap();
    assert_eq!(pak.file_count(), 2);
    assert_eq!(pak.read_file("beta").unwrap(), b"beta");
}

#[test]
fn test_flipped_magic() {
    let (mut bytes, _) = build_medium();
    for i in 0..3 {
        bytes[i] = !bytes[i];
    }
    assert!(load(bytes).is_none());
}

#[test]
fn test_unknown_version() {
    let (mut bytes, _) = build_medium();
    bytes[3] = 2;
    assert!(load(bytes).is_none());
}

#[test]
fn test_entries_exceed_blocks() {
    let (mut bytes, _) = build_medium();
    put_i32(&mut bytes, 8, 9);
    assert!(load(bytes).is_none());
}

#[test]
fn test_block_count_exceeds_max() {
    let (mut bytes, _) = build_medium();
    put_i32(&mut bytes, 16, 9);
    assert!(load(bytes).is_none());
}

#[test]
fn test_truncated_header() {
    let (bytes, _) = build_medium();
    assert!(load(bytes[..HEADER_SIZE - 1].to_vec()).is_none());
    assert!(load(Vec::new()).is_none());
}

#[test]
fn test_truncated_tables() {
    let (bytes, header) = build_medium();
    let cut = header.name_entry_offset(1) as usize;
    assert!(load(bytes[..cut].to_vec()).is_none());
}

#[test]
fn test_truncated_payload() {
    let (bytes, header) = build_medium();
    // Drop the last cluster, which belongs to "beta"
    let cut = bytes.len() - 4096;
    assert!(cut as u64 >= header.data_offset());
    assert!(load(bytes[..cut].to_vec()).is_none());
}

#[test]
fn test_overlapping_blocks() {
    let (mut bytes, header) = build_medium();
    // Point block 1 into block 0's second cluster
    let block0_cluster = (header.data_offset() / 4096) as i32;
    put_i32(&mut bytes, header.block_entry_offset(1) + 4, block0_cluster + 1);
    assert!(load(bytes).is_none());
}

#[test]
fn test_name_index_out_of_range() {
    let (mut bytes, header) = build_medium();
    put_i32(&mut bytes, header.block_entry_offset(0), 7);
    assert!(load(bytes).is_none());
}

#[test]
fn test_two_blocks_share_a_name() {
    let (mut bytes, header) = build_medium();
    put_i32(&mut bytes, header.block_entry_offset(1), 0);
    assert!(load(bytes).is_none());
}

#[test]
fn test_random_garbage() {
    let garbage: Vec<u8> = (0..16384u32).map(|i| (i * 7919 % 251) as u8).collect();
    assert!(load(garbage).is_none());
}

/// Medium whose block 1 is a free one-cluster record between two files
fn medium_with_free_block() -> (Vec<u8>, Header) {
    let channel = MemoryChannel::new();
    let view = MemoryChannel::from_shared(channel.shared());
    let mut pak = Container::create("c.pak", Access::ReadWrite, Box::new(channel), 4, 8)
        .unwrap()
        .unwrap();
    pak.write_file("alpha", &vec![1u8; 5000]).unwrap();
    pak.write_file("gamma", &vec![3u8; 4096]).unwrap();
    pak.write_file("beta", b"beta").unwrap();
    pak.delete_file("gamma").unwrap();
    assert_eq!(pak.stats().unwrap().free_blocks, 1);
    let header = *pak.header();
    pak.shutdown().unwrap();
    (view.to_vec(), header)
}

#[test]
fn test_free_block_intact_loads() {
    let (bytes, _) = medium_with_free_block();
    let len = bytes.len() as u64;
    let mut pak = load(bytes).unwrap();
    assert!(pak.write_file("delta", &vec![4u8; 4096]).unwrap());
    assert_eq!(pak.stats().unwrap().medium_length, len);
}

#[test]
fn test_free_block_past_medium_end() {
    let (mut bytes, header) = medium_with_free_block();
    let end_cluster = (bytes.len() / 4096) as i32;
    put_i32(&mut bytes, header.block_entry_offset(1) + 4, end_cluster);
    assert!(load(bytes).is_none());
}

#[test]
fn test_free_block_at_last_cluster() {
    let (mut bytes, header) = medium_with_free_block();
    put_i32(&mut bytes, header.block_entry_offset(1) + 4, i32::MAX);
    put_i32(&mut bytes, header.block_entry_offset(1) + 8, 8192);
    assert!(load(bytes).is_none());
}
