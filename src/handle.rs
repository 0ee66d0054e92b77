//! Handle layer: what an open file descriptor on a bus path actually is.
//!
//! The reference implementation aliases a single `busfs_fd_st` struct for
//! both roles and tells them apart with a `mode` tag
//! (`examples/original_source/busfs.h`, `busfs_fops.h`). Spec §4.5
//! recommends a tagged enum instead of replicating that aliasing trick;
//! that's what this module is.

use std::sync::Arc;

use crate::bus::{Bus, HandleRole, ReaderCursor};
use crate::error::{BusError, BusResult};

/// One open file descriptor on a bus path: either a reading cursor or a
/// writing handle. Never both — `open` rejects `O_RDWR`.
pub enum Handle {
    Reader(ReaderCursor),
    Writer(WriterHandle),
}

impl Handle {
    /// Opens `bus` under the given POSIX `open(2)` flags. Only pure
    /// `O_RDONLY` or `O_WRONLY` are meaningful for a bus file; anything
    /// else (`O_RDWR`, or access-mode bits not representable for a
    /// streaming pub/sub endpoint) is rejected. Reference:
    /// `busfs_open`/`busfs_check_open_flags`.
    pub fn open(bus: Arc<Bus>, flags: i32) -> BusResult<Self> {
        let nonblocking = flags & libc::O_NONBLOCK != 0;
        match flags & libc::O_ACCMODE {
            libc::O_RDONLY => Ok(Self::Reader(bus.new_reader(nonblocking))),
            libc::O_WRONLY => {
                bus.new_writer();
                Ok(Self::Writer(WriterHandle { bus }))
            }
            _ => Err(BusError::InvalidArgument),
        }
    }

    /// Which role this handle holds.
    #[must_use]
    pub fn role(&self) -> HandleRole {
        match self {
            Self::Reader(_) => HandleRole::Reader,
            Self::Writer(_) => HandleRole::Writer,
        }
    }

    /// Reads into `out`. Valid only on a [`Handle::Reader`].
    pub fn read(&mut self, out: &mut [u8]) -> BusResult<usize> {
        match self {
            Self::Reader(cursor) => cursor.read(out),
            Self::Writer(_) => Err(BusError::BadFileDescriptor),
        }
    }

    /// Appends `data`. Valid only on a [`Handle::Writer`].
    pub fn write(&self, data: &[u8]) -> BusResult<usize> {
        match self {
            Self::Writer(writer) => writer.bus.append(data),
            Self::Reader(_) => Err(BusError::BadFileDescriptor),
        }
    }
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reader(cursor) => f.debug_tuple("Handle::Reader").field(cursor).finish(),
            Self::Writer(writer) => f
                .debug_tuple("Handle::Writer")
                .field(&writer.bus.path())
                .finish(),
        }
    }
}

/// The writer side of a [`Handle`]. A thin `Arc<Bus>` wrapper whose `Drop`
/// releases the writer-role refcount, mirroring what [`ReaderCursor`]'s
/// `Drop` does for readers.
pub struct WriterHandle {
    bus: Arc<Bus>,
}

impl Drop for WriterHandle {
    fn drop(&mut self) {
        let should_free = self.bus.release(HandleRole::Writer);
        if should_free {
            log::debug!("bus {:?} has no remaining handles; dropping", self.bus.path());
        }
    }
}
