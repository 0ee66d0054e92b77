//! busfs: a FUSE filesystem where each file is a named publish/subscribe
//! message bus backed by a fixed-size in-memory ring buffer.
//!
//! Grounded on the teacher crate's flat `src/` module layout
//! (`examples/Tonksthebear-trybotster/cli/src/lib.rs`).

pub mod bus;
pub mod config;
pub mod constants;
pub mod error;
pub mod fs;
pub mod handle;
pub mod registry;

pub use bus::Bus;
pub use config::Config;
pub use error::{BusError, BusResult};
pub use handle::Handle;
pub use registry::Registry;
