//! Error kinds surfaced by the bus core, and their POSIX errno mapping.
//!
//! The core never panics on the happy path; every failure mode named in
//! the data model comes back as a [`BusError`] that the `fuser` layer
//! converts to a negated errno via [`BusError::to_errno`].

use thiserror::Error;

/// Errors the bus core can return to its caller (the filesystem dispatch
/// layer). Distinct from the `anyhow`-wrapped setup errors surfaced at the
/// CLI boundary in `main.rs`.
#[derive(Debug, Error)]
pub enum BusError {
    /// Nonblocking reader with no new data. Local; caller retries.
    #[error("would block")]
    WouldBlock,

    /// Blocking reader cancelled by the wake signal. Local; caller may retry.
    #[error("interrupted")]
    Interrupted,

    /// Role mismatch: read on a writer handle, or vice versa.
    #[error("bad file descriptor")]
    BadFileDescriptor,

    /// Unsupported open mode, or an operation with no meaning for bus files
    /// (`mknod`, `link`).
    #[error("invalid argument")]
    InvalidArgument,

    /// Path not registered when a registry lookup was expected to succeed.
    #[error("not found")]
    NotFound,

    /// Registry or Bus allocation / lock-acquisition failure.
    #[error("out of memory")]
    OutOfMemory,

    /// Any error surfaced by the underlying host directory, passed through.
    #[error("host filesystem error: {0}")]
    Host(#[from] std::io::Error),
}

impl BusError {
    /// Maps this error to a negated-errno value, the currency `fuser`
    /// reply callbacks expect.
    #[must_use]
    pub fn to_errno(&self) -> i32 {
        match self {
            Self::WouldBlock => libc::EAGAIN,
            Self::Interrupted => libc::EINTR,
            Self::BadFileDescriptor => libc::EBADF,
            Self::InvalidArgument => libc::EINVAL,
            Self::NotFound => libc::ENOENT,
            Self::OutOfMemory => libc::ENOMEM,
            Self::Host(e) => e.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}

/// Convenience alias used throughout the bus core.
pub type BusResult<T> = Result<T, BusError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping_is_exhaustive_and_nonzero() {
        let variants = [
            BusError::WouldBlock,
            BusError::Interrupted,
            BusError::BadFileDescriptor,
            BusError::InvalidArgument,
            BusError::NotFound,
            BusError::OutOfMemory,
        ];
        for v in variants {
            assert_ne!(v.to_errno(), 0, "{v} must map to a nonzero errno");
        }
    }

    #[test]
    fn would_block_maps_to_eagain() {
        assert_eq!(BusError::WouldBlock.to_errno(), libc::EAGAIN);
    }

    #[test]
    fn host_error_passes_through_raw_os_error() {
        let io = std::io::Error::from_raw_os_error(libc::EPERM);
        let err = BusError::Host(io);
        assert_eq!(err.to_errno(), libc::EPERM);
    }
}
