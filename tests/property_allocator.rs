//! Property-based tests for allocator correctness
//!
//! Uses proptest to drive random create/overwrite/delete sequences and check
//! that stored content and the block layout stay consistent.

use fhdpak::{Access, Container, FileInfo, IoChannel, MemoryChannel, CLUSTER_SIZE};
use proptest::prelude::*;
use std::collections::HashMap;

#[derive(Debug, Clone)]
enum Op {
    Write { file: u8, size: usize, byte: u8 },
    Delete { file: u8 },
    Rename { from: u8, to: u8 },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0u8..6, 0usize..20_000, any::<u8>())
            .prop_map(|(file, size, byte)| Op::Write { file, size, byte }),
        2 => (0u8..6).prop_map(|file| Op::Delete { file }),
        1 => (0u8..6, 0u8..6).prop_map(|(from, to)| Op::Rename { from, to }),
    ]
}

fn new_container() -> (Container, MemoryChannel) {
    let channel = MemoryChannel::new();
    let view = MemoryChannel::from_shared(channel.shared());
    let pak = Container::create("prop.pak", Access::ReadWrite, Box::new(channel), 6, 24)
        .unwrap()
        .unwrap();
    (pak, view)
}

fn assert_no_overlap(infos: &[FileInfo]) -> Result<(), TestCaseError> {
    let mut ranges: Vec<(u64, u64)> = infos
        .iter()
        .filter(|info| info.length > 0)
        .map(|info| {
            let reserved = (info.length + CLUSTER_SIZE - 1) / CLUSTER_SIZE * CLUSTER_SIZE;
            (info.offset, info.offset + reserved)
        })
        .collect();
    ranges.sort_unstable();

    for pair in ranges.windows(2) {
        prop_assert!(
            pair[0].1 <= pair[1].0,
            "Ranges {:?} and {:?} overlap",
            pair[0],
            pair[1]
        );
    }
    Ok(())
}

proptest! {
    #[test]
    fn prop_content_matches_model(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let (mut pak, view) = new_container();
        let mut model: HashMap<String, Vec<u8>> = HashMap::new();

        for op in ops {
            match op {
                Op::Write { file, size, byte } => {
                    let name = format!("file{}", file);
                    let data = vec![byte; size];
                    if pak.write_file(&name, &data).unwrap() {
                        model.insert(name, data);
                    }
                }
                Op::Delete { file } => {
                    let name = format!("file{}", file);
                    let deleted = pak.delete_file(&name).unwrap();
                    prop_assert_eq!(deleted, model.remove(&name).is_some());
                }
                Op::Rename { from, to } => {
                    let from = format!("file{}", from);
                    let to = format!("file{}", to);
                    let renamed = pak.rename_file(&from, &to).unwrap();
                    if from == to {
                        prop_assert!(renamed);
                    } else if model.contains_key(&from) && !model.contains_key(&to) {
                        prop_assert!(renamed);
                        let data = model.remove(&from).unwrap();
                        model.insert(to, data);
                    } else {
                        prop_assert!(!renamed);
                    }
                }
            }

            prop_assert_eq!(pak.file_count(), model.len());
        }

        let infos = pak.get_all_file_infos().unwrap();
        assert_no_overlap(&infos)?;
        for info in &infos {
            prop_assert!(info.offset + info.length <= view.len().unwrap());
        }

        for (name, data) in &model {
            prop_assert_eq!(&pak.read_file(name).unwrap(), data);
        }

        // Everything survives a reload
        pak.shutdown().unwrap();
        let mut reloaded = Container::load(
            "prop.pak",
            Access::Read,
            Box::new(MemoryChannel::from_shared(view.shared())),
        )
        .unwrap()
        .unwrap();
        prop_assert_eq!(reloaded.file_count(), model.len());
        for (name, data) in &model {
            prop_assert_eq!(&reloaded.read_file(name).unwrap(), data);
        }
    }

    #[test]
    fn prop_delete_all_leaves_no_live_space(sizes in prop::collection::vec(1usize..40_000, 1..6)) {
        let (mut pak, view) = new_container();

        for (i, size) in sizes.iter().enumerate() {
            let name = format!("f{}", i);
            prop_assert!(pak.write_file(&name, &vec![i as u8; *size]).unwrap());
        }
        let len = view.len().unwrap();
        let data_offset = pak.header().data_offset();

        for i in 0..sizes.len() {
            let name = format!("f{}", i);
            prop_assert!(pak.delete_file(&name).unwrap());
        }

        // All payload space is free and fully coalesced
        let stats = pak.stats().unwrap();
        prop_assert_eq!(stats.free_blocks, 1);
        prop_assert_eq!(stats.free_bytes, len - data_offset);
        prop_assert_eq!(view.len().unwrap(), len);
    }

    #[test]
    fn prop_reuse_never_grows(size in 1usize..50_000) {
        let (mut pak, view) = new_container();
        pak.write_file("victim", &vec![1u8; size]).unwrap();
        pak.write_file("guard", b"g").unwrap();
        let len = view.len().unwrap();

        pak.delete_file("victim").unwrap();
        prop_assert!(pak.write_file("replacement", &vec![2u8; size]).unwrap());
        prop_assert_eq!(view.len().unwrap(), len);
    }
}
