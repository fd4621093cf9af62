//! Write failure recovery tests
//!
//! A write that fails part-way must not leave records behind that make the
//! container unloadable.

use fhdpak::core::record::{NameEntry, Record};
use fhdpak::{Access, Container, IoChannel, MemoryChannel, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Memory channel that fails a number of writes of a chosen size
struct FailingChannel {
    inner: MemoryChannel,
    matches: fn(usize) -> bool,
    failures: Arc<AtomicUsize>,
}

impl IoChannel for FailingChannel {
    fn position(&self) -> u64 {
        self.inner.position()
    }

    fn seek(&mut self, position: u64) -> Result<()> {
        self.inner.seek(position)
    }

    fn len(&self) -> Result<u64> {
        self.inner.len()
    }

    fn set_len(&mut self, len: u64) -> Result<()> {
        self.inner.set_len(len)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.inner.read(buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        if (self.matches)(buf.len())
            && self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Err(std::io::Error::new(std::io::ErrorKind::Other, "disk error").into());
        }
        self.inner.write_all(buf)
    }

    fn flush(&mut self) -> Result<()> {
        self.inner.flush()
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }
}

/// Container over a failing channel, a view of its medium and the failure budget
fn create(matches: fn(usize) -> bool) -> (Container, MemoryChannel, Arc<AtomicUsize>) {
    let inner = MemoryChannel::new();
    let view = MemoryChannel::from_shared(inner.shared());
    let failures = Arc::new(AtomicUsize::new(0));
    let channel = FailingChannel {
        inner,
        matches,
        failures: Arc::clone(&failures),
    };
    let pak = Container::create("flaky.pak", Access::ReadWrite, Box::new(channel), 4, 8)
        .unwrap()
        .unwrap();
    (pak, view, failures)
}

fn reload(view: &MemoryChannel) -> Option<Container> {
    Container::load(
        "flaky.pak",
        Access::Read,
        Box::new(MemoryChannel::from_shared(view.shared())),
    )
    .unwrap()
}

fn is_payload(len: usize) -> bool {
    len > 1000 && len != NameEntry::SIZE
}

fn is_name_record(len: usize) -> bool {
    len == NameEntry::SIZE
}

#[test]
fn test_failed_new_file_payload() {
    let (mut pak, view, failures) = create(is_payload);

    failures.store(1, Ordering::SeqCst);
    assert!(pak.write_file("a", &vec![1u8; 5000]).is_err());
    assert!(!pak.has_file("a").unwrap());

    assert!(pak.write_file("b", b"bb").unwrap());
    let stats = pak.stats().unwrap();
    assert_eq!(stats.name_count, 1);
    pak.shutdown().unwrap();

    let mut reloaded = reload(&view).expect("container stays loadable");
    assert_eq!(reloaded.file_count(), 1);
    assert_eq!(reloaded.read_file("b").unwrap(), b"bb");
}

#[test]
fn test_failed_name_record() {
    let (mut pak, view, failures) = create(is_name_record);

    failures.store(1, Ordering::SeqCst);
    assert!(pak.write_file("first", b"payload").is_err());
    assert_eq!(pak.file_count(), 0);

    assert!(pak.write_file("second", b"payload").unwrap());
    pak.shutdown().unwrap();

    let mut reloaded = reload(&view).expect("container stays loadable");
    assert!(!reloaded.has_file("first").unwrap());
    assert_eq!(reloaded.read_file("second").unwrap(), b"payload");
}

#[test]
fn test_failed_overwrite_keeps_old_content() {
    let (mut pak, view, failures) = create(is_payload);
    assert!(pak.write_file("doc", &vec![7u8; 2000]).unwrap());

    failures.store(1, Ordering::SeqCst);
    assert!(pak.write_file("doc", &vec![8u8; 9000]).is_err());
    assert_eq!(pak.read_file("doc").unwrap(), vec![7u8; 2000]);

    assert!(pak.write_file("other", &vec![9u8; 3000]).unwrap());
    pak.shutdown().unwrap();

    let mut reloaded = reload(&view).expect("container stays loadable");
    assert_eq!(reloaded.read_file("doc").unwrap(), vec![7u8; 2000]);
    assert_eq!(reloaded.read_file("other").unwrap(), vec![9u8; 3000]);
}
