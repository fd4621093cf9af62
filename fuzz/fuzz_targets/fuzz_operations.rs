#![no_main]
use arbitrary::Arbitrary;
use fhdpak::{Access, Container, MemoryChannel};
use libfuzzer_sys::fuzz_target;
use std::collections::HashMap;

#[derive(Debug, Arbitrary)]
enum Op {
    Write { file: u8, len: u16, byte: u8 },
    Delete { file: u8 },
    Rename { from: u8, to: u8 },
    Reload,
}

fuzz_target!(|ops: Vec<Op>| {
    let channel = MemoryChannel::new();
    let shared = channel.shared();
    let mut pak = match Container::create("fuzz.pak", Access::ReadWrite, Box::new(channel), 8, 16)
    {
        Ok(Some(pak)) => pak,
        _ => return,
    };
    let mut model: HashMap<String, Vec<u8>> = HashMap::new();

    for op in ops.into_iter().take(64) {
        match op {
            Op::Write { file, len, byte } => {
                let name = format!("f{}", file % 10);
                let data = vec![byte; len as usize];
                if pak.write_file(&name, &data).unwrap() {
                    model.insert(name, data);
                }
            }
            Op::Delete { file } => {
                let name = format!("f{}", file % 10);
                assert_eq!(pak.delete_file(&name).unwrap(), model.remove(&name).is_some());
            }
            Op::Rename { from, to } => {
                let from = format!("f{}", from % 10);
                let to = format!("f{}", to % 10);
                if pak.rename_file(&from, &to).unwrap() && from != to {
                    let data = model.remove(&from).unwrap();
                    model.insert(to, data);
                }
            }
            Op::Reload => {
                pak.shutdown().unwrap();
                let channel = MemoryChannel::from_shared(shared.clone());
                pak = Container::load("fuzz.pak", Access::ReadWrite, Box::new(channel))
                    .unwrap()
                    .unwrap();
            }
        }
    }

    for (name, data) in &model {
        assert_eq!(&pak.read_file(name).unwrap(), data);
    }
});
