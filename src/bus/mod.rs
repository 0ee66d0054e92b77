//! The in-memory bus: a fixed ring of message slots shared by one writer
//! and any number of readers.
//!
//! Grounded on the reference implementation's `busfs_file_st` /
//! `msgs_add_delimited` (`examples/original_source/busfs.c`,
//! `busfs_write.c`), restructured around `std::sync` primitives instead of
//! raw `pthread_rwlock_t`/`pthread_cond_t`.

pub mod cursor;
pub mod wait;

use std::sync::{Condvar, Mutex, RwLock};
use std::time::SystemTime;

use crate::constants::{DEFAULT_DELIM, INITIAL_SERIAL};
use crate::error::{BusError, BusResult};

pub use cursor::ReaderCursor;

/// One ring entry: a fixed-capacity buffer holding one in-progress or
/// completed message, plus the serial it was assigned when it became the
/// write target.
#[derive(Debug, Clone)]
pub(crate) struct Slot {
    pub(crate) bytes: Vec<u8>,
    pub(crate) size: usize,
    pub(crate) serial: u64,
}

impl Slot {
    fn new(capacity: usize) -> Self {
        Self {
            bytes: vec![0u8; capacity],
            size: 0,
            serial: 0,
        }
    }
}

/// Everything guarded by the "buf lock": the slot ring, the write cursor,
/// and the serial counter. Invariant 1 (`slots[i].serial <= next_serial`,
/// `slots[cur_idx].serial == next_serial`) is maintained by every mutator
/// in this module.
pub(crate) struct BufState {
    pub(crate) slots: Vec<Slot>,
    pub(crate) cur_idx: usize,
    pub(crate) next_serial: u64,
}

/// Everything guarded by the "refs lock": the handle-role counts and the
/// unlinked flag.
#[derive(Debug, Default)]
pub(crate) struct Counts {
    pub(crate) reader_count: u32,
    pub(crate) writer_count: u32,
    pub(crate) refcount: u32,
    pub(crate) unlinked: bool,
}

/// A named message bus. One instance per registered path; shared via `Arc`
/// by the registry, every open reader's cursor, and every open writer
/// handle.
pub struct Bus {
    /// Registry key. Guarded independently since renaming only touches the
    /// path, never the ring contents.
    path: Mutex<String>,
    pub(crate) delim: u8,
    pub(crate) ring_size: usize,
    pub(crate) slot_capacity: usize,

    pub(crate) buf: RwLock<BufState>,
    pub(crate) counts: RwLock<Counts>,

    pub(crate) iowait_mutex: Mutex<()>,
    pub(crate) iowait_cond: Condvar,

    mtime: Mutex<SystemTime>,
}

impl Bus {
    /// Creates a fresh bus for `path` with the given ring geometry.
    /// Reference: `new_busfs_file`.
    pub fn new(path: impl Into<String>, ring_size: usize, slot_capacity: usize) -> Self {
        assert!(ring_size > 0, "ring_size must be > 0");
        assert!(slot_capacity > 1, "slot_capacity must be > 1");

        let mut slots = Vec::with_capacity(ring_size);
        slots.push(Slot::new(slot_capacity));
        for _ in 1..ring_size {
            slots.push(Slot::new(slot_capacity));
        }
        slots[0].serial = INITIAL_SERIAL;

        Self {
            path: Mutex::new(path.into()),
            delim: DEFAULT_DELIM,
            ring_size,
            slot_capacity,
            buf: RwLock::new(BufState {
                slots,
                cur_idx: 0,
                next_serial: INITIAL_SERIAL,
            }),
            counts: RwLock::new(Counts::default()),
            iowait_mutex: Mutex::new(()),
            iowait_cond: Condvar::new(),
            mtime: Mutex::new(SystemTime::now()),
        }
    }

    /// Current registry path.
    pub fn path(&self) -> String {
        self.path.lock().expect("path mutex poisoned").clone()
    }

    /// Overwrites the registry path. Called only by the registry under its
    /// own exclusive lock during `rename`.
    pub(crate) fn set_path(&self, new_path: impl Into<String>) {
        *self.path.lock().expect("path mutex poisoned") = new_path.into();
    }

    /// Wall-clock time of the last successful append.
    pub fn mtime(&self) -> SystemTime {
        *self.mtime.lock().expect("mtime mutex poisoned")
    }

    /// True once `unlink` has removed the backing path from the registry.
    pub fn is_unlinked(&self) -> bool {
        self.counts.read().expect("counts lock poisoned").unlinked
    }

    pub(crate) fn mark_unlinked(&self) {
        self.counts.write().expect("counts lock poisoned").unlinked = true;
    }

    /// Advisory `stat` fields for this bus: `(blksize, blocks, size)`.
    pub fn stat_sizes(&self) -> (u64, u64, u64) {
        let blksize = self.slot_capacity as u64;
        let blocks = self.ring_size as u64;
        (blksize, blocks, blocks * blksize)
    }

    /// Appends `data` to the ring, honoring the truncation rule on
    /// oversized messages. Never fails; returns the number of input bytes
    /// accepted (always `data.len()`). Reference: `msgs_add_delimited` +
    /// `busfs_write_io`.
    pub fn append(&self, data: &[u8]) -> BusResult<usize> {
        {
            let mut buf = self.buf.write().map_err(|_| BusError::OutOfMemory)?;
            let delim = self.delim;
            let ring_size = self.ring_size;
            let capacity = self.slot_capacity;

            let mut idx = buf.cur_idx;
            // Once a message is truncated mid-stream, the remaining bytes of
            // that same original message are discarded (property 5) rather
            // than folded into a second, chained message.
            let mut discarding = false;
            for &input_byte in data {
                if discarding {
                    if input_byte == delim {
                        discarding = false;
                    }
                    continue;
                }

                let msg = &mut buf.slots[idx];

                if msg.size >= capacity - 1 {
                    msg.bytes[msg.size] = delim;
                    msg.size += 1;
                    let next_serial = buf.next_serial + 1;
                    buf.next_serial = next_serial;
                    idx = (idx + 1) % ring_size;
                    let next = &mut buf.slots[idx];
                    next.serial = next_serial;
                    next.size = 0;
                    discarding = input_byte != delim;
                    continue;
                }

                msg.bytes[msg.size] = input_byte;
                msg.size += 1;

                if input_byte == delim {
                    let next_serial = buf.next_serial + 1;
                    buf.next_serial = next_serial;
                    idx = (idx + 1) % ring_size;
                    let next = &mut buf.slots[idx];
                    next.serial = next_serial;
                    next.size = 0;
                }
            }
            buf.cur_idx = idx;
        }

        self.iowait_cond.notify_all();
        *self.mtime.lock().expect("mtime mutex poisoned") = SystemTime::now();
        Ok(data.len())
    }

    /// Registers a new reader cursor, positioned at the oldest retained
    /// message. Bumps `reader_count` and `refcount`. Takes ownership of an
    /// `Arc` clone; callers that still need their own reference should
    /// clone before calling (`Arc::clone(&bus).new_reader(...)`).
    pub fn new_reader(self: std::sync::Arc<Self>, nonblocking: bool) -> ReaderCursor {
        {
            let mut counts = self.counts.write().expect("counts lock poisoned");
            counts.reader_count += 1;
            counts.refcount += 1;
        }
        ReaderCursor::new(self, nonblocking)
    }

    /// Registers a new writer handle. Bumps `writer_count` and `refcount`.
    pub fn new_writer(&self) {
        let mut counts = self.counts.write().expect("counts lock poisoned");
        counts.writer_count += 1;
        counts.refcount += 1;
    }

    /// Releases one handle of the given role. Returns `true` if this was
    /// the release that should free the bus (`refcount == 0 && unlinked`);
    /// the registry is responsible for actually dropping its `Arc`.
    pub fn release(&self, role: HandleRole) -> bool {
        let mut counts = self.counts.write().expect("counts lock poisoned");
        match role {
            HandleRole::Reader => counts.reader_count = counts.reader_count.saturating_sub(1),
            HandleRole::Writer => counts.writer_count = counts.writer_count.saturating_sub(1),
            HandleRole::None => {}
        }
        counts.refcount = counts.refcount.saturating_sub(1);
        counts.refcount == 0 && counts.unlinked
    }

    /// Number of currently open writer handles.
    pub fn writer_count(&self) -> u32 {
        self.counts.read().expect("counts lock poisoned").writer_count
    }
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts = self.counts.read().expect("counts lock poisoned");
        f.debug_struct("Bus")
            .field("path", &self.path())
            .field("ring_size", &self.ring_size)
            .field("slot_capacity", &self.slot_capacity)
            .field("reader_count", &counts.reader_count)
            .field("writer_count", &counts.writer_count)
            .field("refcount", &counts.refcount)
            .field("unlinked", &counts.unlinked)
            .finish()
    }
}

/// Which role a handle holds, for refcount bookkeeping on release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleRole {
    Reader,
    Writer,
    /// Used for lookups that don't hold a handle reference at all (e.g. a
    /// `getattr` that only incremented to pin the bus momentarily).
    None,
}
