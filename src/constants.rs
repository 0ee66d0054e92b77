//! Crate-wide constants.
//!
//! Centralizes the magic numbers from the original reference implementation
//! (`BUSFS_DGRAM_COUNT`, `BUSFS_MSGLEN_INITIAL`, the 250ms wait cycle) so
//! they're documented in one place instead of scattered through the bus
//! core.

use std::time::Duration;

// ============================================================================
// Ring sizing (reference: busfs.h BUSFS_DGRAM_COUNT / BUSFS_MSGLEN_INITIAL)
// ============================================================================

/// Default number of slots per bus ring.
pub const DEFAULT_RING_SIZE: usize = 1024;

/// Default per-slot byte capacity.
pub const DEFAULT_SLOT_CAPACITY: usize = 256;

/// Initial serial value assigned to a freshly created bus (reference: 0x100).
pub const INITIAL_SERIAL: u64 = 0x100;

/// Message delimiter (reference: `'\n'`).
pub const DEFAULT_DELIM: u8 = b'\n';

// ============================================================================
// Wait protocol
// ============================================================================

/// Length of one wait-protocol cycle: how long a blocked reader waits on the
/// condition variable before re-checking the wake condition and its
/// cancellation counter (reference: `mk_condwait_tmo`, 250000 usec).
pub const WAIT_CYCLE: Duration = Duration::from_millis(250);

// ============================================================================
// Filesystem defaults
// ============================================================================

/// Default log file path (reference: `BUSFS_LOGFILE`).
pub const DEFAULT_LOGFILE: &str = "busfs.log";

/// Default real backing directory (reference: `BUSFS_REALFS`).
pub const DEFAULT_REALFS: &str = "/tmp/busfs";

/// Default cancellation signal.
pub const DEFAULT_CANCEL_SIGNAL: libc::c_int = libc::SIGUSR1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_defaults_match_reference() {
        assert_eq!(DEFAULT_RING_SIZE, 1024);
        assert_eq!(DEFAULT_SLOT_CAPACITY, 256);
        assert_eq!(INITIAL_SERIAL, 0x100);
        assert_eq!(DEFAULT_DELIM, b'\n');
    }

    #[test]
    fn wait_cycle_is_250ms() {
        assert_eq!(WAIT_CYCLE, Duration::from_millis(250));
    }
}
