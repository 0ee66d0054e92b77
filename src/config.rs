//! Runtime configuration.
//!
//! Mirrors the reference implementation's compile-time `#define`s
//! (`BUSFS_LOGFILE`, `BUSFS_REALFS`, `BUSFS_DGRAM_COUNT`,
//! `BUSFS_MSGLEN_INITIAL`) as a runtime-overridable struct, loaded with
//! defaults and then overlaid with environment variables.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_CANCEL_SIGNAL, DEFAULT_LOGFILE, DEFAULT_REALFS, DEFAULT_RING_SIZE,
    DEFAULT_SLOT_CAPACITY,
};

/// Resolved configuration for one mounted bus filesystem.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Log file path.
    pub logfile: PathBuf,
    /// Real backing directory that metadata operations are delegated to.
    pub realfs: PathBuf,
    /// Number of slots per bus ring.
    pub ring_size: usize,
    /// Per-slot byte capacity.
    pub slot_capacity: usize,
    /// Signal number used to cancel a blocked reader.
    #[serde(skip)]
    pub cancel_signal: i32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logfile: PathBuf::from(DEFAULT_LOGFILE),
            realfs: PathBuf::from(DEFAULT_REALFS),
            ring_size: DEFAULT_RING_SIZE,
            slot_capacity: DEFAULT_SLOT_CAPACITY,
            cancel_signal: DEFAULT_CANCEL_SIGNAL,
        }
    }
}

impl Config {
    /// Builds a default configuration, then overlays `BUSFS_*` environment
    /// variables.
    #[must_use]
    pub fn load() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(logfile) = std::env::var("BUSFS_LOGFILE") {
            self.logfile = PathBuf::from(logfile);
        }
        if let Ok(realfs) = std::env::var("BUSFS_REALFS") {
            self.realfs = PathBuf::from(realfs);
        }
        if let Ok(ring_size) = std::env::var("BUSFS_RING_SIZE") {
            if let Ok(n) = ring_size.parse::<usize>() {
                self.ring_size = n;
            }
        }
        if let Ok(slot_capacity) = std::env::var("BUSFS_SLOT_CAPACITY") {
            if let Ok(n) = slot_capacity.parse::<usize>() {
                self.slot_capacity = n;
            }
        }
        if let Ok(sig) = std::env::var("BUSFS_CANCEL_SIGNAL") {
            if let Ok(n) = sig.parse::<i32>() {
                self.cancel_signal = n;
            }
        }
    }

    /// Ensures the real backing directory exists, creating it (and its
    /// parents) if necessary. Reference: `busfs_fuse_init`'s `stat`/`mkdir`
    /// dance in `main.c`.
    pub fn ensure_realfs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.realfs)
    }

    /// Resolves a mount-relative path to its location under the real
    /// backing directory. Reference: `BUSFS_CONVERT_PATH`.
    #[must_use]
    pub fn resolve(&self, path: &std::path::Path) -> PathBuf {
        // `path` always arrives as an absolute, "/"-rooted mount path from
        // fuser; strip the leading separator so `join` doesn't discard
        // `realfs`.
        let relative = path.strip_prefix("/").unwrap_or(path);
        self.realfs.join(relative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_reference_constants() {
        let config = Config::default();
        assert_eq!(config.logfile, PathBuf::from("busfs.log"));
        assert_eq!(config.realfs, PathBuf::from("/tmp/busfs"));
        assert_eq!(config.ring_size, 1024);
        assert_eq!(config.slot_capacity, 256);
    }

    #[test]
    fn resolve_joins_mount_relative_path_onto_realfs() {
        let mut config = Config::default();
        config.realfs = PathBuf::from("/tmp/busfs");
        assert_eq!(
            config.resolve(std::path::Path::new("/foo/bar")),
            PathBuf::from("/tmp/busfs/foo/bar")
        );
        assert_eq!(
            config.resolve(std::path::Path::new("/")),
            PathBuf::from("/tmp/busfs")
        );
    }

    #[test]
    fn env_overrides_apply_on_top_of_defaults() {
        // SAFETY: test runs single-threaded per #[test] isolation concerns
        // around env vars; scope the var to this test only.
        std::env::set_var("BUSFS_RING_SIZE", "42");
        let config = Config::load();
        assert_eq!(config.ring_size, 42);
        std::env::remove_var("BUSFS_RING_SIZE");
    }

    #[test]
    fn malformed_env_override_is_ignored() {
        std::env::set_var("BUSFS_RING_SIZE", "not-a-number");
        let config = Config::load();
        assert_eq!(config.ring_size, DEFAULT_RING_SIZE);
        std::env::remove_var("BUSFS_RING_SIZE");
    }
}
