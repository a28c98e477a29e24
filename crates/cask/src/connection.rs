//! Ergonomic wrapper around [`Pager`] for callers that just want to
//! read and write whole pages without juggling [`PageRef`] handles
//! themselves.

use std::path::Path;

use cask_error::Result;
use cask_pager::{OpenOptions, Pager, PageRef};
use cask_types::{PageNumber, PagerState};
use cask_vfs::{OsVfs, Vfs};

/// A page-store handle over a given [`Vfs`].
///
/// Most callers only ever need [`OsVfs`]; the type parameter exists so
/// tests (and anything embedding this crate) can substitute
/// `cask_vfs::MemoryVfs` without touching the rest of their code.
pub struct Connection<V: Vfs = OsVfs> {
    pager: Pager<V>,
}

impl Connection<OsVfs> {
    /// Opens `path` against the real filesystem with default options.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(OsVfs::new(), path, OpenOptions::new())
    }

    /// Opens `path` against the real filesystem with caller-supplied
    /// options.
    pub fn open_with_options(path: impl AsRef<Path>, options: OpenOptions) -> Result<Self> {
        Self::open_with(OsVfs::new(), path, options)
    }

    /// Opens a pure in-memory page store (the `:memory:` sentinel;
    /// see [`cask_types::MEMORY_DB_SENTINEL`]).
    pub fn open_memory() -> Result<Self> {
        Self::open_with(
            OsVfs::new(),
            cask_types::MEMORY_DB_SENTINEL,
            OpenOptions::new(),
        )
    }
}

impl<V: Vfs> Connection<V> {
    /// Opens `path` against an arbitrary [`Vfs`] implementation.
    pub fn open_with(vfs: V, path: impl AsRef<Path>, options: OpenOptions) -> Result<Self> {
        let pager = Pager::open(vfs, path, options)?;
        Ok(Self { pager })
    }

    /// Current pager state (`Unlock`, `Shared`, `Reserved`, ...).
    #[must_use]
    pub fn state(&self) -> PagerState {
        self.pager.state()
    }

    /// Number of pages in the database as the pager currently sees it.
    #[must_use]
    pub fn db_size(&self) -> u32 {
        self.pager.db_size()
    }

    /// Reads a full copy of `pgno`'s bytes.
    pub fn read_page(&mut self, pgno: PageNumber) -> Result<Vec<u8>> {
        let page = self.pager.get(pgno)?;
        let data = self.pager.page_data(page).to_vec();
        self.pager.unref(page)?;
        Ok(data)
    }

    /// Overwrites `pgno` with `bytes`, marking it dirty. `bytes` must
    /// be exactly one page long.
    ///
    /// # Panics
    ///
    /// Panics if `bytes.len()` does not match the page size the
    /// connection was opened with.
    pub fn write_page(&mut self, pgno: PageNumber, bytes: &[u8]) -> Result<()> {
        let page = self.pager.get(pgno)?;
        self.pager.write(page)?;
        let dst = self.pager.page_data_mut(page);
        assert_eq!(dst.len(), bytes.len(), "page size mismatch");
        dst.copy_from_slice(bytes);
        self.pager.unref(page)
    }

    /// Begins a write transaction, optionally naming a master journal
    /// for multi-file atomic commit.
    pub fn begin(&mut self, master_name: Option<Vec<u8>>) -> Result<()> {
        self.pager.begin(master_name)
    }

    /// Commits the current write transaction.
    pub fn commit(&mut self) -> Result<()> {
        self.pager.commit()
    }

    /// Rolls back the current write transaction.
    pub fn rollback(&mut self) -> Result<()> {
        self.pager.rollback()
    }

    /// Flushes and syncs without ending the transaction.
    pub fn sync(&mut self) -> Result<()> {
        self.pager.sync()
    }

    /// Opens a statement sub-transaction nested inside the current
    /// write transaction.
    pub fn stmt_begin(&mut self) -> Result<()> {
        self.pager.stmt_begin()
    }

    /// Commits the current statement sub-transaction.
    pub fn stmt_commit(&mut self) -> Result<()> {
        self.pager.stmt_commit()
    }

    /// Rolls back only the changes made since `stmt_begin`.
    pub fn stmt_rollback(&mut self) -> Result<()> {
        self.pager.stmt_rollback()
    }

    /// Shrinks the database to `new_page_count` pages at the next
    /// commit.
    pub fn truncate(&mut self, new_page_count: u32) -> Result<()> {
        self.pager.truncate(new_page_count)
    }

    /// Gives back the underlying [`Pager`] for callers that need the
    /// lower-level `PageRef` API (e.g. to avoid copying page bytes).
    pub fn pager_mut(&mut self) -> &mut Pager<V> {
        &mut self.pager
    }

    /// Closes the connection, rolling back any open transaction.
    pub fn close(mut self) -> Result<()> {
        self.pager.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cask_types::PageSize;
    use cask_vfs::MemoryVfs;

    fn pn(n: u32) -> PageNumber {
        PageNumber::new(n).unwrap()
    }

    #[test]
    fn write_commit_read_round_trip() {
        let vfs = MemoryVfs::new();
        let options = OpenOptions::new().with_page_size(PageSize::new(512).unwrap());
        let mut conn = Connection::open_with(vfs, "test.db", options).unwrap();

        conn.begin(None).unwrap();
        conn.write_page(pn(1), &[7u8; 512]).unwrap();
        conn.commit().unwrap();

        let data = conn.read_page(pn(1)).unwrap();
        assert_eq!(data, vec![7u8; 512]);
    }

    #[test]
    fn rollback_discards_uncommitted_write() {
        let vfs = MemoryVfs::new();
        let options = OpenOptions::new().with_page_size(PageSize::new(512).unwrap());
        let mut conn = Connection::open_with(vfs, "test.db", options).unwrap();

        conn.begin(None).unwrap();
        conn.write_page(pn(1), &[1u8; 512]).unwrap();
        conn.commit().unwrap();

        conn.begin(None).unwrap();
        conn.write_page(pn(1), &[2u8; 512]).unwrap();
        conn.rollback().unwrap();

        let data = conn.read_page(pn(1)).unwrap();
        assert_eq!(data, vec![1u8; 512]);
    }
}
