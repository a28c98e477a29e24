//! Statement sub-journal (§3 "Statement sub-journal", §4.5).
//!
//! Same page records as the main journal but with no header and no
//! checksums: this journal is only ever replayed into the in-memory
//! cache by the same process that wrote it, never recovered after a
//! crash, so there is nothing to authenticate against.

use cask_error::Result;
use cask_types::PageNumber;
use cask_vfs::VfsFile;

fn record_len(page_size: usize) -> usize {
    4 + page_size
}

/// The open statement sub-journal for the currently active statement
/// transaction.
pub struct StmtJournal<F: VfsFile> {
    file: F,
    page_size: usize,
    record_count: u32,
}

impl<F: VfsFile> StmtJournal<F> {
    #[must_use]
    pub const fn new(file: F, page_size: usize) -> Self {
        Self {
            file,
            page_size,
            record_count: 0,
        }
    }

    #[must_use]
    pub const fn record_count(&self) -> u32 {
        self.record_count
    }

    pub fn append(&mut self, pgno: PageNumber, data: &[u8]) -> Result<()> {
        let offset = u64::from(self.record_count) * record_len(self.page_size) as u64;
        let mut raw = Vec::with_capacity(record_len(self.page_size));
        raw.extend_from_slice(&pgno.get().to_be_bytes());
        raw.extend_from_slice(data);
        self.file.write_at(&raw, offset)?;
        self.record_count += 1;
        Ok(())
    }

    /// `stmt_commit`: the sub-journal is discarded by rewinding the
    /// write cursor; the underlying file is reused for the next
    /// statement rather than reopened (§4.5).
    pub fn reset(&mut self) {
        self.record_count = 0;
    }

    /// Read every record back out in reverse write order (§4.5 step 2:
    /// the last-written image of a page is the one to restore).
    pub fn records_reversed(&mut self) -> Result<Vec<(PageNumber, Vec<u8>)>> {
        let rec_len = record_len(self.page_size);
        let mut out = Vec::with_capacity(self.record_count as usize);
        for i in (0..self.record_count).rev() {
            let offset = u64::from(i) * rec_len as u64;
            let mut raw = vec![0u8; rec_len];
            self.file.read_at(&mut raw, offset)?;
            let pgno_raw = u32::from_be_bytes(raw[0..4].try_into().unwrap());
            let Some(pgno) = PageNumber::new(pgno_raw) else {
                continue;
            };
            out.push((pgno, raw[4..].to_vec()));
        }
        Ok(out)
    }

    pub fn into_file(self) -> F {
        self.file
    }
}
