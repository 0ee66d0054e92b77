//! Path → [`Bus`] registry: the top-level directory of named buses.
//!
//! Grounded on the reference's global `busfs_files` list protected by
//! `busfs_files_lock` (`examples/original_source/busfs.c`) and, for the
//! CRUD shape, the teacher's `client/registry.rs` HashMap-backed registry.
//!
//! Lock ordering: the registry lock is always acquired before any
//! individual [`Bus`]'s own locks, never after.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::bus::Bus;
use crate::error::{BusError, BusResult};

/// Normalizes a FUSE mount path into its registry key: always `/`-rooted,
/// never carrying a trailing slash (except for the root itself).
///
/// Reference: the rename open question (spec §9 #4) traced to `to` and
/// `from` being canonicalized inconsistently; canonicalizing both through
/// this one function closes that gap.
fn canonical_key(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// The registry of all currently-named buses, keyed by mount path.
pub struct Registry {
    buses: RwLock<HashMap<String, Arc<Bus>>>,
    ring_size: usize,
    slot_capacity: usize,
}

impl Registry {
    #[must_use]
    pub fn new(ring_size: usize, slot_capacity: usize) -> Self {
        Self {
            buses: RwLock::new(HashMap::new()),
            ring_size,
            slot_capacity,
        }
    }

    /// Looks up an existing bus by path.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<Arc<Bus>> {
        let key = canonical_key(path);
        self.buses
            .read()
            .expect("registry lock poisoned")
            .get(&key)
            .cloned()
    }

    /// Looks up a bus, creating it (with the registry's default ring
    /// geometry) if it doesn't exist yet. Reference: `create_file` /
    /// `new_busfs_file`.
    pub fn get_or_create(&self, path: &str) -> Arc<Bus> {
        let key = canonical_key(path);
        {
            if let Some(bus) = self.buses.read().expect("registry lock poisoned").get(&key) {
                return Arc::clone(bus);
            }
        }

        let mut buses = self.buses.write().expect("registry lock poisoned");
        // Re-check: another thread may have created it while we waited for
        // the write lock.
        if let Some(bus) = buses.get(&key) {
            return Arc::clone(bus);
        }
        let bus = Arc::new(Bus::new(key.clone(), self.ring_size, self.slot_capacity));
        buses.insert(key, Arc::clone(&bus));
        bus
    }

    /// Removes `path` from the registry and marks its bus unlinked. Any
    /// handle still holding an `Arc` keeps the bus alive (per-handle
    /// readers/writers see their in-flight reads/writes through to
    /// completion); once the last handle drops, the bus is deallocated.
    /// Reference: `unlink_file`.
    pub fn unlink(&self, path: &str) -> BusResult<()> {
        let key = canonical_key(path);
        let mut buses = self.buses.write().expect("registry lock poisoned");
        let bus = buses.remove(&key).ok_or(BusError::NotFound)?;
        bus.mark_unlinked();
        Ok(())
    }

    /// Atomically moves the bus at `from` to `to`. If a bus already exists
    /// at `to`, it's unlinked to make way (matching POSIX rename-over
    /// semantics). Reference: `rename_file`.
    pub fn rename(&self, from: &str, to: &str) -> BusResult<()> {
        let from_key = canonical_key(from);
        let to_key = canonical_key(to);

        let mut buses = self.buses.write().expect("registry lock poisoned");
        let bus = buses.remove(&from_key).ok_or(BusError::NotFound)?;

        if let Some(displaced) = buses.remove(&to_key) {
            displaced.mark_unlinked();
        }

        bus.set_path(to_key.clone());
        buses.insert(to_key, bus);
        Ok(())
    }

    /// True if a bus is currently registered at `path`.
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        let key = canonical_key(path);
        self.buses.read().expect("registry lock poisoned").contains_key(&key)
    }

    /// All currently-registered mount paths, for directory listing.
    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        self.buses
            .read()
            .expect("registry lock poisoned")
            .keys()
            .cloned()
            .collect()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("count", &self.buses.read().expect("registry lock poisoned").len())
            .field("ring_size", &self.ring_size)
            .field("slot_capacity", &self.slot_capacity)
            .finish()
    }
}
