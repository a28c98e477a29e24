//! Real-filesystem [`Vfs`] backed by `flock(2)`.
//!
//! `flock` only grants whole-file shared/exclusive locks, so it cannot
//! express SQLite's five-level `NONE/SHARED/RESERVED/PENDING/EXCLUSIVE`
//! ladder (§5) on its own. `RESERVED` and `PENDING` are layered on top
//! by holding an exclusive `flock` on a small sidecar marker file next
//! to the database (`<path>-reserved`, `<path>-pending`); the main
//! file's own `flock` only ever toggles between none/shared/exclusive.
//! This is a deliberate simplification over real byte-range locking,
//! recorded in the design ledger.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use cask_error::{CaskError, Result};
use cask_types::LockLevel;

use crate::traits::{DirHandle, Vfs, VfsFile};

fn flock(fd: i32, operation: i32) -> io::Result<()> {
    // SAFETY: `fd` is a valid, open file descriptor for the lifetime of
    // this call, owned by the `File` the caller borrowed it from.
    let rc = unsafe { libc::flock(fd, operation) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

fn try_lock_exclusive(fd: i32) -> Result<bool> {
    match flock(fd, libc::LOCK_EX | libc::LOCK_NB) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
        Err(e) => Err(CaskError::from(e)),
    }
}

fn marker_path(db_path: &Path, suffix: &str) -> PathBuf {
    let mut s = db_path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

/// Probes whether some other handle holds the marker at `path`,
/// without taking the lock ourselves (acquire-then-immediately-release).
fn marker_held_by_other(path: &Path) -> Result<bool> {
    let probe = OpenOptions::new().create(true).write(true).open(path)?;
    let got = try_lock_exclusive(probe.as_raw_fd())?;
    if got {
        let _ = flock(probe.as_raw_fd(), libc::LOCK_UN);
    }
    Ok(!got)
}

/// One of the two sidecar lock files standing in for a byte-range
/// lock that `flock` cannot express.
struct Marker {
    file: Option<File>,
}

impl Marker {
    fn closed() -> Self {
        Self { file: None }
    }

    fn acquire(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)?;
        if try_lock_exclusive(file.as_raw_fd())? {
            Ok(Self { file: Some(file) })
        } else {
            Err(CaskError::Busy)
        }
    }

    fn release(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = flock(file.as_raw_fd(), libc::LOCK_UN);
        }
    }

    fn held(&self) -> bool {
        self.file.is_some()
    }
}

/// A file handle on a real filesystem, with locking approximated via
/// `flock` plus the marker-file scheme described above.
pub struct OsFile {
    file: File,
    path: PathBuf,
    current: LockLevel,
    reserved: Marker,
    pending: Marker,
    delete_on_close: bool,
}

impl Drop for OsFile {
    fn drop(&mut self) {
        self.reserved.release();
        self.pending.release();
        if self.delete_on_close {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

impl OsFile {
    fn new(file: File, path: PathBuf, delete_on_close: bool) -> Self {
        Self {
            file,
            path,
            current: LockLevel::None,
            reserved: Marker::closed(),
            pending: Marker::closed(),
            delete_on_close,
        }
    }

    fn escalate(&mut self, target: LockLevel) -> Result<()> {
        match target {
            LockLevel::None => Ok(()),
            LockLevel::Shared => {
                if self.current == LockLevel::None {
                    // A writer waiting in PENDING must win the race against a
                    // steady stream of new readers (§5), so a new SHARED lock
                    // is refused while another connection holds PENDING.
                    if !self.pending.held()
                        && marker_held_by_other(&marker_path(&self.path, "-pending"))?
                    {
                        return Err(CaskError::Busy);
                    }
                    match flock(self.file.as_raw_fd(), libc::LOCK_SH | libc::LOCK_NB) {
                        Ok(()) => Ok(()),
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                            Err(CaskError::Busy)
                        }
                        Err(e) => Err(CaskError::from(e)),
                    }
                } else {
                    Ok(())
                }
            }
            LockLevel::Reserved => {
                if !self.reserved.held() {
                    self.reserved = Marker::acquire(&marker_path(&self.path, "-reserved"))?;
                }
                Ok(())
            }
            LockLevel::Pending => {
                if !self.pending.held() {
                    self.pending = Marker::acquire(&marker_path(&self.path, "-pending"))?;
                }
                Ok(())
            }
            LockLevel::Exclusive => {
                match flock(self.file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) {
                    Ok(()) => Ok(()),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(CaskError::Busy),
                    Err(e) => Err(CaskError::from(e)),
                }
            }
        }
    }
}

impl VfsFile for OsFile {
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
        use std::os::unix::fs::FileExt;
        match self.file.read_at(buf, offset) {
            Ok(n) => Ok(n),
            Err(e) => Err(CaskError::from(e)),
        }
    }

    fn write_at(&mut self, buf: &[u8], offset: u64) -> Result<()> {
        use std::os::unix::fs::FileExt;
        self.file.write_all_at(buf, offset)?;
        Ok(())
    }

    fn truncate(&mut self, size: u64) -> Result<()> {
        self.file.set_len(size)?;
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    fn file_size(&mut self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn lock(&mut self, level: LockLevel) -> Result<()> {
        if level <= self.current {
            return Ok(());
        }
        // Escalate one rung at a time, matching the state machine in §5:
        // a connection always passes through RESERVED before EXCLUSIVE.
        let ladder = [
            LockLevel::Shared,
            LockLevel::Reserved,
            LockLevel::Pending,
            LockLevel::Exclusive,
        ];
        for &rung in &ladder {
            if rung > self.current && rung <= level {
                self.escalate(rung)?;
                self.current = rung;
            }
        }
        Ok(())
    }

    fn unlock(&mut self, level: LockLevel) -> Result<()> {
        if level >= self.current {
            return Ok(());
        }
        if level < LockLevel::Pending {
            self.pending.release();
        }
        if level < LockLevel::Reserved {
            self.reserved.release();
        }
        if level == LockLevel::None {
            flock(self.file.as_raw_fd(), libc::LOCK_UN).map_err(CaskError::from)?;
        } else if level == LockLevel::Shared && self.current == LockLevel::Exclusive {
            flock(self.file.as_raw_fd(), libc::LOCK_SH | libc::LOCK_NB)
                .map_err(CaskError::from)?;
        }
        self.current = level;
        Ok(())
    }

    fn check_reserved_lock(&mut self) -> Result<bool> {
        if self.current >= LockLevel::Reserved {
            return Ok(true);
        }
        marker_held_by_other(&marker_path(&self.path, "-reserved"))
    }

    fn current_lock(&self) -> LockLevel {
        self.current
    }
}

/// A [`Vfs`] backed by the real filesystem.
#[derive(Clone, Copy, Default)]
pub struct OsVfs;

impl OsVfs {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Vfs for OsVfs {
    type File = OsFile;

    fn open_read_write(&self, path: &Path) -> Result<Self::File> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .map_err(|e| CaskError::CantOpen(format!("{}: {e}", path.display())))?;
        Ok(OsFile::new(file, path.to_path_buf(), false))
    }

    fn open_read_only(&self, path: &Path) -> Result<Self::File> {
        let file = OpenOptions::new()
            .read(true)
            .open(path)
            .map_err(|e| CaskError::CantOpen(format!("{}: {e}", path.display())))?;
        Ok(OsFile::new(file, path.to_path_buf(), false))
    }

    fn open_exclusive(&self, path: &Path, delete_on_close: bool) -> Result<Self::File> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(0o600)
            .open(path)
            .map_err(|e| CaskError::CantOpen(format!("{}: {e}", path.display())))?;
        Ok(OsFile::new(file, path.to_path_buf(), delete_on_close))
    }

    fn delete(&self, path: &Path) -> Result<()> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CaskError::from(e)),
        }
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn full_pathname(&self, path: &Path) -> Result<PathBuf> {
        if path.is_absolute() {
            Ok(path.to_path_buf())
        } else {
            let cwd = std::env::current_dir()?;
            Ok(cwd.join(path))
        }
    }

    fn temp_file_name(&self) -> Result<PathBuf> {
        let mut bytes = [0u8; 8];
        self.randomness(&mut bytes);
        let name: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
        Ok(std::env::temp_dir().join(format!("cask-{name}.tmp")))
    }

    fn open_directory(&self, path: &Path) -> Result<DirHandle> {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let dir_file = File::open(dir)?;
        Ok(DirHandle(Some(Box::new(move || {
            dir_file.sync_all().map_err(CaskError::from)
        }))))
    }

    fn randomness(&self, buf: &mut [u8]) {
        rand::Rng::fill(&mut rand::thread_rng(), buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_read_and_truncate_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db");
        let vfs = OsVfs::new();
        let mut f = vfs.open_read_write(&path).unwrap();
        f.write_at(b"abcdefgh", 0).unwrap();
        assert_eq!(f.file_size().unwrap(), 8);
        let mut buf = [0u8; 4];
        f.read_at(&mut buf, 2).unwrap();
        assert_eq!(&buf, b"cdef");
        f.truncate(3).unwrap();
        assert_eq!(f.file_size().unwrap(), 3);
    }

    #[test]
    fn reserved_lock_blocks_a_second_handle() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db");
        let vfs = OsVfs::new();
        let mut a = vfs.open_read_write(&path).unwrap();
        let mut b = vfs.open_read_write(&path).unwrap();
        a.lock(LockLevel::Reserved).unwrap();
        assert!(b.check_reserved_lock().unwrap());
        assert!(matches!(
            b.lock(LockLevel::Reserved),
            Err(CaskError::Busy)
        ));
    }

    #[test]
    fn delete_on_close_removes_the_journal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db-journal");
        let vfs = OsVfs::new();
        let f = vfs.open_exclusive(&path, true).unwrap();
        assert!(path.exists());
        drop(f);
        assert!(!path.exists());
    }

    #[test]
    fn delete_is_not_an_error_when_file_is_already_gone() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing");
        let vfs = OsVfs::new();
        vfs.delete(&path).unwrap();
    }
}
