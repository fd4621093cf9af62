#![no_main]
use fhdpak::{Access, Container, MemoryChannel};
use libfuzzer_sys::fuzz_target;

// Arbitrary media must be rejected or loaded, never panic
fuzz_target!(|data: &[u8]| {
    let channel = MemoryChannel::from_bytes(data.to_vec());
    let mut pak = match Container::load("fuzz.pak", Access::ReadWrite, Box::new(channel)) {
        Ok(Some(pak)) => pak,
        _ => return,
    };

    let infos = match pak.get_all_file_infos() {
        Ok(infos) => infos,
        Err(_) => return,
    };
    for info in infos {
        let _ = pak.read_file(&info.name);
    }

    // A loaded container must accept further writes
    let _ = pak.write_file("fuzz-probe", data);
    let _ = pak.shutdown();
});
