//! End-to-end scenarios (S1-S6) and the quantified properties from the
//! "testable properties" section of the specification this crate
//! implements, driven against the registry/handle layers directly (no
//! kernel FUSE mount required for these).

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use busfs::bus::Bus;
use busfs::error::BusError;
use busfs::handle::Handle;
use busfs::registry::Registry;

fn small_bus() -> Arc<Bus> {
    Arc::new(Bus::new("/topic", 4, 8))
}

#[test]
fn s1_simple_echo() {
    let bus = small_bus();
    let mut reader = Handle::open(Arc::clone(&bus), libc::O_RDONLY | libc::O_NONBLOCK).unwrap();
    let writer = Handle::open(Arc::clone(&bus), libc::O_WRONLY).unwrap();

    writer.write(b"abc\n").unwrap();
    let mut out = [0u8; 16];
    let n = reader.read(&mut out).unwrap();
    assert_eq!(&out[..n], b"abc\n");

    assert!(matches!(reader.read(&mut out), Err(BusError::WouldBlock)));
}

#[test]
fn s2_partial_message() {
    let bus = small_bus();
    let mut reader = Handle::open(Arc::clone(&bus), libc::O_RDONLY | libc::O_NONBLOCK).unwrap();
    let writer = Handle::open(Arc::clone(&bus), libc::O_WRONLY).unwrap();

    writer.write(b"ab").unwrap();
    let mut out = [0u8; 16];
    let mut total = Vec::new();
    let n = reader.read(&mut out).unwrap();
    total.extend_from_slice(&out[..n]);

    writer.write(b"c\n").unwrap();
    let n = reader.read(&mut out).unwrap();
    total.extend_from_slice(&out[..n]);

    assert_eq!(total, b"abc\n");
}

#[test]
fn s3_overflow_rollover() {
    let bus = small_bus(); // N=4
    let mut reader = Handle::open(Arc::clone(&bus), libc::O_RDONLY | libc::O_NONBLOCK).unwrap();
    let writer = Handle::open(Arc::clone(&bus), libc::O_WRONLY).unwrap();

    for i in 1..=6 {
        writer.write(format!("m{i}\n").as_bytes()).unwrap();
    }

    let mut out = [0u8; 64];
    let n = reader.read(&mut out).unwrap();
    let seen = String::from_utf8_lossy(&out[..n]).into_owned();
    assert!(!seen.contains("m1\n"));
    assert!(!seen.contains("m2\n"));
    assert!(seen.starts_with("m4\n"));
}

#[test]
fn s4_truncation() {
    let bus = small_bus(); // capacity=8
    let mut reader = Handle::open(Arc::clone(&bus), libc::O_RDONLY | libc::O_NONBLOCK).unwrap();
    let writer = Handle::open(Arc::clone(&bus), libc::O_WRONLY).unwrap();

    writer.write(b"123456789\n").unwrap();
    let mut out = [0u8; 16];
    let n = reader.read(&mut out).unwrap();
    assert_eq!(&out[..n], b"1234567\n");
}

#[test]
fn s5_cancellation_within_one_wait_cycle() {
    let bus = small_bus();
    let mut reader = Handle::open(Arc::clone(&bus), libc::O_RDONLY).unwrap();

    let (tx, rx) = std::sync::mpsc::channel();
    let result = thread::spawn(move || {
        tx.send(()).unwrap();
        let mut out = [0u8; 8];
        reader.read(&mut out)
    });

    rx.recv().unwrap();
    thread::sleep(Duration::from_millis(20));
    // The cancellation handler wakes every currently blocked reader
    // process-wide, so a plain process-directed signal reaches the
    // reader thread's wait loop within one wait cycle.
    unsafe {
        libc::kill(std::process::id() as i32, libc::SIGUSR1);
    }

    let outcome = result.join().unwrap();
    assert!(matches!(outcome, Err(BusError::Interrupted)));
}

#[test]
fn s6_unlink_with_open_reader() {
    let registry = Registry::new(4, 8);
    let bus = registry.get_or_create("/topic");
    let mut reader = Handle::open(Arc::clone(&bus), libc::O_RDONLY | libc::O_NONBLOCK).unwrap();
    let writer = Handle::open(Arc::clone(&bus), libc::O_WRONLY).unwrap();

    writer.write(b"x\n").unwrap();
    let mut out = [0u8; 8];
    let n = reader.read(&mut out).unwrap();
    assert_eq!(&out[..n], b"x\n");

    registry.unlink("/topic").unwrap();
    assert!(!registry.contains("/topic"));
    assert!(bus.is_unlinked());

    drop(writer);
    assert_eq!(bus.writer_count(), 0);

    // Reader is still alive and its prior read already drained the data;
    // next nonblocking read reports would-block, not an error from the
    // now-unlinked bus.
    assert!(matches!(reader.read(&mut out), Err(BusError::WouldBlock)));
}

#[test]
fn lifecycle_property_fresh_bus_after_unlink_and_recreate() {
    let registry = Registry::new(4, 8);
    let first = registry.get_or_create("/topic");
    registry.unlink("/topic").unwrap();

    let second = registry.get_or_create("/topic");
    assert!(!Arc::ptr_eq(&first, &second));

    let buf = second.stat_sizes();
    assert_eq!(buf, first.stat_sizes());
}

#[test]
fn rename_atomicity_property() {
    let registry = Registry::new(4, 8);
    let bus = registry.get_or_create("/old");
    let mut reader = Handle::open(Arc::clone(&bus), libc::O_RDONLY | libc::O_NONBLOCK).unwrap();

    registry.rename("/old", "/new").unwrap();
    assert!(registry.get("/old").is_none());
    assert!(Arc::ptr_eq(&registry.get("/new").unwrap(), &bus));

    let writer = Handle::open(Arc::clone(&bus), libc::O_WRONLY).unwrap();
    writer.write(b"still-connected\n").unwrap();
    let mut out = [0u8; 32];
    let n = reader.read(&mut out).unwrap();
    assert_eq!(&out[..n], b"still-connected\n");
}

#[test]
fn append_accounting_property() {
    let bus = small_bus();
    let n = bus.append(b"a\nbb\nccc\n").unwrap();
    assert_eq!(n, 9);
}

#[test]
fn bounded_lag_with_no_loss_property() {
    let bus = Arc::new(Bus::new("/topic", 8, 8));
    let mut reader = Handle::open(Arc::clone(&bus), libc::O_RDONLY | libc::O_NONBLOCK).unwrap();
    let writer = Handle::open(Arc::clone(&bus), libc::O_WRONLY).unwrap();

    for i in 0..7 {
        writer.write(format!("{i}\n").as_bytes()).unwrap();
    }

    let mut out = [0u8; 64];
    let n = reader.read(&mut out).unwrap();
    assert_eq!(
        String::from_utf8_lossy(&out[..n]),
        "0\n1\n2\n3\n4\n5\n6\n"
    );
}
