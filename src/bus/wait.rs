//! Wait/interrupt protocol: how a blocked reader sleeps for new data and how
//! it gets woken early by a cancellation signal.
//!
//! Grounded on `examples/original_source/busfs_read.c`
//! (`wait_for_more_data`, `mk_condwait_tmo`,
//! `busfs_read_interrupt_handler`). The reference tracks cancellation with
//! a thread-local counter (`pthread_getspecific`/`pthread_setspecific`)
//! bumped by a signal handler. Rust's `thread_local!` accessor isn't
//! provably async-signal-safe to call from inside a handler (it may
//! lazily initialize on first access), so instead every waiter publishes
//! its own pre-allocated `Arc<AtomicU64>` counter into a process-wide
//! registry before it starts waiting; the handler only ever touches a
//! `try_lock` over a plain `Vec` and atomic fetch-adds already-allocated
//! counters — no allocation and no blocking lock acquisition inside the
//! handler itself. A `try_lock` miss (the registry being updated by
//! another waiter registering/unregistering at the exact moment the
//! signal fires) simply defers the wake to the next wait cycle, which
//! stays within the bounded-time contract (one `WAIT_CYCLE`).
//!
//! This is necessarily a broadcast: the handler wakes every currently
//! blocked reader, not only the one the signal was directed at. That's a
//! deliberate simplification over the reference's single-thread
//! `pthread_kill` targeting, justified by the signal-safety constraint
//! above.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Once, OnceLock};

use crate::constants::WAIT_CYCLE;
use crate::error::{BusError, BusResult};

use super::Bus;

static HANDLER_INSTALLED: Once = Once::new();
static WAITERS: OnceLock<Mutex<Vec<Arc<AtomicU64>>>> = OnceLock::new();

fn waiters() -> &'static Mutex<Vec<Arc<AtomicU64>>> {
    WAITERS.get_or_init(|| Mutex::new(Vec::new()))
}

extern "C" fn on_cancel_signal(_signum: libc::c_int) {
    if let Ok(registered) = waiters().try_lock() {
        for counter in registered.iter() {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Installs the process-wide cancellation signal handler. Idempotent; safe
/// to call from every thread that's about to block.
fn ensure_handler_installed(signal: i32) {
    HANDLER_INSTALLED.call_once(|| {
        // SAFETY: `on_cancel_signal` only performs a `try_lock` (never
        // blocks) and atomic fetch-adds over already-allocated counters.
        unsafe {
            signal_hook::low_level::register(signal, move || on_cancel_signal(signal))
                .expect("failed to install busfs cancellation handler");
        }
    });
}

/// Why [`wait_for_data`] stopped waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitOutcome {
    /// New data arrived (or a rollover moved the slot being watched).
    NewData,
    /// The bus is unlinked and has no writer left, so no more data will
    /// ever arrive; the caller should report completion (EOF), not loop.
    Drained,
}

/// Blocks the calling thread until the bus either gains new data (the
/// write cursor's serial moves past `snap_serial`, or the current slot
/// grows past `snap_size` bytes) or becomes permanently drained (unlinked
/// with no writer left to ever produce more), waking every [`WAIT_CYCLE`]
/// to recheck. Returns [`BusError::Interrupted`] if the cancellation
/// signal fires while this thread is registered as waiting. Reference:
/// `wait_for_more_data` / `_HAVE_NEW_DATA`.
pub(crate) fn wait_for_data(
    bus: &Bus,
    r_idx: usize,
    snap_serial: u64,
    snap_size: usize,
) -> BusResult<WaitOutcome> {
    ensure_handler_installed(crate::constants::DEFAULT_CANCEL_SIGNAL);

    let counter = Arc::new(AtomicU64::new(0));
    waiters()
        .lock()
        .expect("waiter registry poisoned")
        .push(Arc::clone(&counter));

    let result = loop {
        {
            let guard = bus.iowait_mutex.lock().expect("iowait mutex poisoned");
            let (_guard, _timeout) = bus
                .iowait_cond
                .wait_timeout(guard, WAIT_CYCLE)
                .expect("iowait mutex poisoned");
        }

        if counter.load(Ordering::Relaxed) != 0 {
            break Err(BusError::Interrupted);
        }

        let buf = bus.buf.read().expect("buf lock poisoned");
        let slot = &buf.slots[r_idx];
        let have_new_data = buf.next_serial != snap_serial || slot.size != snap_size;
        drop(buf);

        if have_new_data {
            break Ok(WaitOutcome::NewData);
        }

        if bus.is_unlinked() && bus.writer_count() == 0 {
            break Ok(WaitOutcome::Drained);
        }
    };

    waiters()
        .lock()
        .expect("waiter registry poisoned")
        .retain(|c| !Arc::ptr_eq(c, &counter));

    result
}
