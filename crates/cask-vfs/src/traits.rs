//! The OS interface the pager consumes (§6).
//!
//! Everything above this trait boundary is synchronous and
//! single-threaded per the pager's scheduling model (§5): a call either
//! completes or returns an error, and `Busy` is the only error the
//! pager itself knows how to retry (via the busy handler).

use std::path::{Path, PathBuf};

use cask_error::Result;
use cask_types::LockLevel;

/// A handle to an open file as seen by the pager: the database file,
/// the rollback journal, the statement sub-journal, or a master
/// journal.
pub trait VfsFile: Send {
    /// Read starting at `offset`, filling as much of `buf` as the file
    /// contains. Returns the number of bytes actually read; short reads
    /// past end-of-file are not an error (the pager zero-fills the
    /// remainder itself, §4.2).
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize>;

    /// Write the full contents of `buf` at `offset`, extending the file
    /// if necessary.
    fn write_at(&mut self, buf: &[u8], offset: u64) -> Result<()>;

    /// Truncate (or, implementation-defined, extend) the file to
    /// exactly `size` bytes.
    fn truncate(&mut self, size: u64) -> Result<()>;

    /// Flush file content durably to storage.
    fn sync(&mut self) -> Result<()>;

    /// Current file size in bytes.
    fn file_size(&mut self) -> Result<u64>;

    /// Escalate this handle's lock to at least `level`. A no-op if the
    /// handle already holds `level` or higher. Returns
    /// [`cask_error::CaskError::Busy`] if the lock is held elsewhere and
    /// cannot be granted right now.
    fn lock(&mut self, level: LockLevel) -> Result<()>;

    /// De-escalate this handle's lock to at most `level`.
    fn unlock(&mut self, level: LockLevel) -> Result<()>;

    /// Probe whether some other connection holds at least a `Reserved`
    /// lock, without blocking and without changing this handle's own
    /// lock state.
    fn check_reserved_lock(&mut self) -> Result<bool>;

    /// This handle's current lock level.
    fn current_lock(&self) -> LockLevel;

    /// Device sector size, used to pad the journal header (§4.8).
    fn sector_size(&self) -> u32 {
        512
    }
}

/// A handle kept open purely so its directory entry can be fsynced
/// after a file is created, renamed, or unlinked inside it. Unlike
/// `VfsFile` it supports only `sync`.
pub struct DirHandle(pub(crate) Option<Box<dyn FnMut() -> Result<()> + Send>>);

impl DirHandle {
    /// A handle that performs no I/O (used by VFS implementations that
    /// have nothing durable to flush, e.g. the in-memory VFS).
    #[must_use]
    pub fn noop() -> Self {
        Self(None)
    }

    pub fn sync(&mut self) -> Result<()> {
        match &mut self.0 {
            Some(f) => f(),
            None => Ok(()),
        }
    }
}

/// Factory for `VfsFile` handles plus the filesystem-level operations
/// the pager needs that aren't scoped to one open file.
pub trait Vfs: Send + Sync {
    type File: VfsFile;

    /// Open for reading and writing, creating the file if absent.
    fn open_read_write(&self, path: &Path) -> Result<Self::File>;

    /// Open for reading only; fails if the file does not exist.
    fn open_read_only(&self, path: &Path) -> Result<Self::File>;

    /// Open a fresh file exclusively (used for journals and the
    /// statement sub-journal), optionally marking it for deletion when
    /// the last handle closes.
    fn open_exclusive(&self, path: &Path, delete_on_close: bool) -> Result<Self::File>;

    /// Remove a file. Not an error if it does not exist.
    fn delete(&self, path: &Path) -> Result<()>;

    /// Whether a file exists at `path`.
    fn exists(&self, path: &Path) -> bool;

    /// Canonicalize a path the way this VFS would resolve it.
    fn full_pathname(&self, path: &Path) -> Result<PathBuf>;

    /// Allocate a name for a new temporary file (statement sub-journal,
    /// or the in-memory VFS's own backing store).
    fn temp_file_name(&self) -> Result<PathBuf>;

    /// Open the containing directory of `path` purely so it can be
    /// fsynced after a rename or unlink (§6).
    fn open_directory(&self, path: &Path) -> Result<DirHandle>;

    /// Fill `buf` with bytes suitable for seeding the journal checksum
    /// (§3 "Checksum seed").
    fn randomness(&self, buf: &mut [u8]);
}
