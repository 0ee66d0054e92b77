//! FUSE dispatch: wires `fuser::Filesystem` callbacks to the
//! [`crate::registry::Registry`] / [`crate::handle::Handle`] layers for bus
//! content, and to the host `realfs` directory for everything else
//! (directory structure, permissions, timestamps).
//!
//! Grounded on `examples/original_source/main.c` (the `fuse_operations`
//! table) and `fops.c` (the pass-through boilerplate ops), restructured
//! around the `fuser` crate's trait-based dispatch instead of a C struct of
//! function pointers.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty,
    ReplyEntry, ReplyOpen, ReplyWrite, Request,
};

use crate::config::Config;
use crate::error::BusError;
use crate::handle::Handle;
use crate::registry::Registry;

const TTL: Duration = Duration::from_secs(0);
const ROOT_INO: u64 = 1;

/// Bidirectional inode <-> mount-path table. FUSE addresses files by
/// inode; the bus core and host filesystem both address them by path, so
/// every dispatch entry point translates through here first.
struct Inodes {
    path_to_ino: HashMap<PathBuf, u64>,
    ino_to_path: HashMap<u64, PathBuf>,
    next: u64,
}

impl Inodes {
    fn new() -> Self {
        let mut path_to_ino = HashMap::new();
        let mut ino_to_path = HashMap::new();
        path_to_ino.insert(PathBuf::from("/"), ROOT_INO);
        ino_to_path.insert(ROOT_INO, PathBuf::from("/"));
        Self {
            path_to_ino,
            ino_to_path,
            next: ROOT_INO + 1,
        }
    }

    fn ino_for(&mut self, path: &Path) -> u64 {
        if let Some(ino) = self.path_to_ino.get(path) {
            return *ino;
        }
        let ino = self.next;
        self.next += 1;
        self.path_to_ino.insert(path.to_path_buf(), ino);
        self.ino_to_path.insert(ino, path.to_path_buf());
        ino
    }

    fn path_of(&self, ino: u64) -> Option<PathBuf> {
        self.ino_to_path.get(&ino).cloned()
    }
}

/// The assembled filesystem: host-backed metadata, bus-backed content.
pub struct BusFs {
    config: Config,
    registry: Registry,
    inodes: Mutex<Inodes>,
    handles: Mutex<HashMap<u64, Handle>>,
    next_fh: AtomicU64,
}

impl BusFs {
    #[must_use]
    pub fn new(config: Config) -> Self {
        let registry = Registry::new(config.ring_size, config.slot_capacity);
        Self {
            config,
            registry,
            inodes: Mutex::new(Inodes::new()),
            handles: Mutex::new(HashMap::new()),
            next_fh: AtomicU64::new(1),
        }
    }

    fn mount_path(&self, ino: u64) -> Option<PathBuf> {
        self.inodes.lock().expect("inode table poisoned").path_of(ino)
    }

    fn child_path(&self, parent: u64, name: &OsStr) -> Option<PathBuf> {
        let parent_path = self.mount_path(parent)?;
        Some(parent_path.join(name))
    }

    fn ino_for(&self, path: &Path) -> u64 {
        self.inodes.lock().expect("inode table poisoned").ino_for(path)
    }

    /// Builds the `FileAttr` fuser expects, deriving most fields from the
    /// host-backed file but substituting the bus's advisory size/block
    /// count when `path` names a registered bus.
    fn attr_for(&self, ino: u64, path: &Path) -> std::io::Result<FileAttr> {
        let real_path = self.config.resolve(path);
        let meta = std::fs::symlink_metadata(&real_path)?;
        let kind = if meta.is_dir() {
            FileType::Directory
        } else {
            FileType::RegularFile
        };

        let (blksize, blocks, size) = if let Some(bus) = self.registry.get(path.to_string_lossy().as_ref()) {
            bus.stat_sizes()
        } else {
            (512, meta.blocks(), meta.size())
        };

        Ok(FileAttr {
            ino,
            size,
            blocks,
            atime: meta.accessed().unwrap_or(SystemTime::UNIX_EPOCH),
            mtime: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            ctime: SystemTime::UNIX_EPOCH + Duration::from_secs(meta.ctime() as u64),
            crtime: meta.created().unwrap_or(SystemTime::UNIX_EPOCH),
            kind,
            perm: (meta.mode() & 0o7777) as u16,
            nlink: meta.nlink() as u32,
            uid: meta.uid(),
            gid: meta.gid(),
            rdev: 0,
            blksize: blksize as u32,
            flags: 0,
        })
    }

    fn alloc_fh(&self) -> u64 {
        self.next_fh.fetch_add(1, Ordering::Relaxed)
    }
}

impl Filesystem for BusFs {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(path) = self.child_path(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.attr_for(self.ino_for(&path), &path) {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(e) => reply.error(e.raw_os_error().unwrap_or(libc::ENOENT)),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let Some(path) = self.mount_path(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.attr_for(ino, &path) {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(e) => reply.error(e.raw_os_error().unwrap_or(libc::ENOENT)),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let Some(path) = self.mount_path(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let bus = self.registry.get_or_create(&path.to_string_lossy());
        match Handle::open(bus, flags) {
            Ok(handle) => {
                let fh = self.alloc_fh();
                self.handles.lock().expect("handle table poisoned").insert(fh, handle);
                reply.opened(fh, 0);
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        let Some(path) = self.child_path(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        let real_path = self.config.resolve(&path);
        if let Some(parent_dir) = real_path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent_dir) {
                reply.error(e.raw_os_error().unwrap_or(libc::EIO));
                return;
            }
        }
        if let Err(e) = std::fs::File::create(&real_path) {
            reply.error(e.raw_os_error().unwrap_or(libc::EIO));
            return;
        }

        let bus = self.registry.get_or_create(&path.to_string_lossy());
        match Handle::open(bus, flags) {
            Ok(handle) => {
                let ino = self.ino_for(&path);
                let fh = self.alloc_fh();
                self.handles.lock().expect("handle table poisoned").insert(fh, handle);
                match self.attr_for(ino, &path) {
                    Ok(attr) => reply.created(&TTL, &attr, 0, fh, 0),
                    Err(e) => reply.error(e.raw_os_error().unwrap_or(libc::EIO)),
                }
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let mut handles = self.handles.lock().expect("handle table poisoned");
        let Some(handle) = handles.get_mut(&fh) else {
            reply.error(libc::EBADF);
            return;
        };
        let mut buf = vec![0u8; size as usize];
        match handle.read(&mut buf) {
            Ok(n) => reply.data(&buf[..n]),
            Err(BusError::WouldBlock) => reply.data(&[]),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let handles = self.handles.lock().expect("handle table poisoned");
        let Some(handle) = handles.get(&fh) else {
            reply.error(libc::EBADF);
            return;
        };
        match handle.write(data) {
            Ok(n) => reply.written(n as u32),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        self.handles.lock().expect("handle table poisoned").remove(&fh);
        reply.ok();
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(path) = self.child_path(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        let _ = self.registry.unlink(&path.to_string_lossy());
        match std::fs::remove_file(self.config.resolve(&path)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.raw_os_error().unwrap_or(libc::EIO)),
        }
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let (Some(from), Some(to)) = (
            self.child_path(parent, name),
            self.child_path(newparent, newname),
        ) else {
            reply.error(libc::ENOENT);
            return;
        };

        let _ = self
            .registry
            .rename(&from.to_string_lossy(), &to.to_string_lossy());

        match std::fs::rename(self.config.resolve(&from), self.config.resolve(&to)) {
            Ok(()) => {
                let mut inodes = self.inodes.lock().expect("inode table poisoned");
                if let Some(ino) = inodes.path_to_ino.remove(&from) {
                    inodes.ino_to_path.insert(ino, to.clone());
                    inodes.path_to_ino.insert(to, ino);
                }
                reply.ok();
            }
            Err(e) => reply.error(e.raw_os_error().unwrap_or(libc::EIO)),
        }
    }

    fn mknod(
        &mut self,
        _req: &Request<'_>,
        _parent: u64,
        _name: &OsStr,
        _mode: u32,
        _umask: u32,
        _rdev: u32,
        reply: ReplyEntry,
    ) {
        // Bus files are created through `create`/`open(O_CREAT)`; device
        // and special nodes have no meaning here. Reference:
        // `busfs_mknod` in `fops.c`, which is similarly unsupported.
        reply.error(libc::EINVAL);
    }

    fn link(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _newparent: u64,
        _newname: &OsStr,
        reply: ReplyEntry,
    ) {
        reply.error(libc::EINVAL);
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let Some(path) = self.mount_path(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let real_path = self.config.resolve(&path);
        let entries = match std::fs::read_dir(&real_path) {
            Ok(entries) => entries,
            Err(e) => {
                reply.error(e.raw_os_error().unwrap_or(libc::EIO));
                return;
            }
        };

        let mut rows: Vec<(u64, FileType, std::ffi::OsString)> = vec![
            (ino, FileType::Directory, OsStr::new(".").to_os_string()),
            (ino, FileType::Directory, OsStr::new("..").to_os_string()),
        ];
        for entry in entries.flatten() {
            let child_path = path.join(entry.file_name());
            let kind = if entry.path().is_dir() {
                FileType::Directory
            } else {
                FileType::RegularFile
            };
            let child_ino = self.ino_for(&child_path);
            rows.push((child_ino, kind, entry.file_name()));
        }

        for (i, (row_ino, kind, name)) in rows.into_iter().enumerate().skip(offset as usize) {
            if reply.add(row_ino, (i + 1) as i64, kind, name) {
                break;
            }
        }
        reply.ok();
    }
}
