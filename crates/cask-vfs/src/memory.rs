//! An in-process [`Vfs`] that keeps every file as a `Vec<u8>` behind a
//! shared mutex, with lock conflicts simulated against a small
//! registry instead of real `flock(2)` calls.
//!
//! Cloning a [`MemoryVfs`] gives a second handle onto the *same*
//! backing store, which is how tests simulate two connections racing
//! against one database (§8 scenarios "two writers" and "busy retry").

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use cask_error::{CaskError, Result};
use cask_types::LockLevel;

use crate::traits::{DirHandle, Vfs, VfsFile};

#[derive(Default)]
struct MemFile {
    data: Vec<u8>,
    /// Lock level held by each open handle, keyed by an opaque handle id.
    holders: HashMap<u64, LockLevel>,
}

#[derive(Default)]
struct Store {
    files: HashMap<PathBuf, MemFile>,
    next_handle: u64,
    next_temp: u64,
}

/// Shared in-memory filesystem. Implements [`Vfs`] by storing each
/// file as a byte buffer; used by the pager's test suite and by the
/// `:memory:` database mode described in §4.7.
#[derive(Clone, Default)]
pub struct MemoryVfs {
    store: Arc<Mutex<Store>>,
}

impl MemoryVfs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// A handle onto one file inside a [`MemoryVfs`] store.
pub struct MemoryFile {
    store: Arc<Mutex<Store>>,
    path: PathBuf,
    handle_id: u64,
    current: LockLevel,
    delete_on_close: bool,
}

impl Drop for MemoryFile {
    fn drop(&mut self) {
        let mut store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(file) = store.files.get_mut(&self.path) {
            file.holders.remove(&self.handle_id);
        }
        if self.delete_on_close {
            store.files.remove(&self.path);
        }
    }
}

impl MemoryFile {
    fn open(store: Arc<Mutex<Store>>, path: &Path, delete_on_close: bool) -> Self {
        let handle_id = {
            let mut guard = store.lock().unwrap_or_else(|e| e.into_inner());
            guard.files.entry(path.to_path_buf()).or_default();
            guard.next_handle += 1;
            guard.next_handle
        };
        Self {
            store,
            path: path.to_path_buf(),
            handle_id,
            current: LockLevel::None,
            delete_on_close,
        }
    }
}

impl VfsFile for MemoryFile {
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        let file = store
            .files
            .get(&self.path)
            .ok_or_else(|| CaskError::internal("read from a file missing from the store"))?;
        let offset = offset as usize;
        if offset >= file.data.len() {
            return Ok(0);
        }
        let n = buf.len().min(file.data.len() - offset);
        buf[..n].copy_from_slice(&file.data[offset..offset + n]);
        Ok(n)
    }

    fn write_at(&mut self, buf: &[u8], offset: u64) -> Result<()> {
        let mut store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        let file = store.files.entry(self.path.clone()).or_default();
        let offset = offset as usize;
        let end = offset + buf.len();
        if file.data.len() < end {
            file.data.resize(end, 0);
        }
        file.data[offset..end].copy_from_slice(buf);
        Ok(())
    }

    fn truncate(&mut self, size: u64) -> Result<()> {
        let mut store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        let file = store.files.entry(self.path.clone()).or_default();
        file.data.resize(size as usize, 0);
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }

    fn file_size(&mut self) -> Result<u64> {
        let store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        Ok(store.files.get(&self.path).map_or(0, |f| f.data.len() as u64))
    }

    fn lock(&mut self, level: LockLevel) -> Result<()> {
        if level <= self.current {
            return Ok(());
        }
        let mut store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        let file = store.files.entry(self.path.clone()).or_default();

        let others = file
            .holders
            .iter()
            .filter(|(id, _)| **id != self.handle_id)
            .map(|(_, lvl)| *lvl);

        let conflicts = match level {
            LockLevel::None => false,
            LockLevel::Shared => others.clone().any(|o| o == LockLevel::Exclusive),
            LockLevel::Reserved => {
                others.clone().any(|o| o >= LockLevel::Reserved)
            }
            LockLevel::Pending | LockLevel::Exclusive => {
                others.clone().any(|o| o >= LockLevel::Shared)
            }
        };

        if conflicts {
            return Err(CaskError::Busy);
        }

        file.holders.insert(self.handle_id, level);
        self.current = level;
        Ok(())
    }

    fn unlock(&mut self, level: LockLevel) -> Result<()> {
        if level >= self.current {
            return Ok(());
        }
        let mut store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(file) = store.files.get_mut(&self.path) {
            if level == LockLevel::None {
                file.holders.remove(&self.handle_id);
            } else {
                file.holders.insert(self.handle_id, level);
            }
        }
        self.current = level;
        Ok(())
    }

    fn check_reserved_lock(&mut self) -> Result<bool> {
        if self.current >= LockLevel::Reserved {
            return Ok(true);
        }
        let store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        Ok(store.files.get(&self.path).is_some_and(|file| {
            file.holders
                .iter()
                .any(|(id, lvl)| *id != self.handle_id && *lvl >= LockLevel::Reserved)
        }))
    }

    fn current_lock(&self) -> LockLevel {
        self.current
    }
}

impl Vfs for MemoryVfs {
    type File = MemoryFile;

    fn open_read_write(&self, path: &Path) -> Result<Self::File> {
        Ok(MemoryFile::open(Arc::clone(&self.store), path, false))
    }

    fn open_read_only(&self, path: &Path) -> Result<Self::File> {
        let store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        if !store.files.contains_key(path) {
            return Err(CaskError::CantOpen(path.display().to_string()));
        }
        drop(store);
        Ok(MemoryFile::open(Arc::clone(&self.store), path, false))
    }

    fn open_exclusive(&self, path: &Path, delete_on_close: bool) -> Result<Self::File> {
        Ok(MemoryFile::open(Arc::clone(&self.store), path, delete_on_close))
    }

    fn delete(&self, path: &Path) -> Result<()> {
        let mut store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        store.files.remove(path);
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        let store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        store.files.contains_key(path)
    }

    fn full_pathname(&self, path: &Path) -> Result<PathBuf> {
        Ok(path.to_path_buf())
    }

    fn temp_file_name(&self) -> Result<PathBuf> {
        let mut store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        store.next_temp += 1;
        Ok(PathBuf::from(format!("/tmp/cask-mem-{}", store.next_temp)))
    }

    fn open_directory(&self, _path: &Path) -> Result<DirHandle> {
        Ok(DirHandle::noop())
    }

    fn randomness(&self, buf: &mut [u8]) {
        // Deterministic is fine for an in-memory test double; real
        // entropy comes from `OsVfs`.
        for (i, b) in buf.iter_mut().enumerate() {
            *b = (i as u8).wrapping_mul(47).wrapping_add(11);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let vfs = MemoryVfs::new();
        let mut f = vfs.open_read_write(Path::new("db")).unwrap();
        f.write_at(b"hello", 0).unwrap();
        let mut buf = [0u8; 5];
        let n = f.read_at(&mut buf, 0).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn read_past_eof_returns_zero_bytes_not_error() {
        let vfs = MemoryVfs::new();
        let mut f = vfs.open_read_write(Path::new("db")).unwrap();
        let mut buf = [0xffu8; 4];
        let n = f.read_at(&mut buf, 1000).unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn second_handle_cannot_get_exclusive_while_first_holds_shared() {
        let vfs = MemoryVfs::new();
        let mut a = vfs.open_read_write(Path::new("db")).unwrap();
        let mut b = vfs.open_read_write(Path::new("db")).unwrap();
        a.lock(LockLevel::Shared).unwrap();
        b.lock(LockLevel::Shared).unwrap();
        assert!(matches!(
            b.lock(LockLevel::Exclusive),
            Err(CaskError::Busy)
        ));
    }

    #[test]
    fn only_one_connection_can_hold_reserved() {
        let vfs = MemoryVfs::new();
        let mut a = vfs.open_read_write(Path::new("db")).unwrap();
        let mut b = vfs.open_read_write(Path::new("db")).unwrap();
        a.lock(LockLevel::Shared).unwrap();
        b.lock(LockLevel::Shared).unwrap();
        a.lock(LockLevel::Reserved).unwrap();
        assert!(matches!(
            b.lock(LockLevel::Reserved),
            Err(CaskError::Busy)
        ));
        assert!(b.check_reserved_lock().unwrap());
    }

    #[test]
    fn delete_on_close_removes_file_when_handle_drops() {
        let vfs = MemoryVfs::new();
        let f = vfs.open_exclusive(Path::new("journal"), true).unwrap();
        assert!(vfs.exists(Path::new("journal")));
        drop(f);
        assert!(!vfs.exists(Path::new("journal")));
    }
}
