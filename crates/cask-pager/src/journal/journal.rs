//! Rollback journal writer and reader (§3, §4.3, §4.4, §4.8, §4.9).

use cask_error::Result;
use cask_types::PageNumber;
use cask_vfs::VfsFile;

use super::format::{self, DecodedRecord, JournalHeader};

/// The open rollback journal for one write transaction. Owns the
/// append cursor and the header fields that must be rewritten in
/// `full_sync` mode.
pub struct Journal<F: VfsFile> {
    file: F,
    header: JournalHeader,
    header_len: u64,
    write_offset: u64,
    page_size: usize,
}

impl<F: VfsFile> Journal<F> {
    /// Create a brand-new journal: write the header (with the record
    /// count left as the "unknown" sentinel) and position the append
    /// cursor just past it.
    pub fn create(
        mut file: F,
        checksum_seed: u32,
        orig_page_count: u32,
        master_name: Option<Vec<u8>>,
        page_size: usize,
    ) -> Result<Self> {
        let sector_size = file.sector_size();
        let header = JournalHeader {
            record_count: None,
            checksum_seed,
            orig_page_count,
            master_name,
        };
        let encoded = header.encode(sector_size);
        file.write_at(&encoded, 0)?;
        let header_len = encoded.len() as u64;
        Ok(Self {
            file,
            header,
            header_len,
            write_offset: header_len,
            page_size,
        })
    }

    #[must_use]
    pub const fn checksum_seed(&self) -> u32 {
        self.header.checksum_seed
    }

    #[must_use]
    pub fn record_count(&self) -> u32 {
        ((self.write_offset - self.header_len) / format::record_len(self.page_size) as u64) as u32
    }

    /// Append one page's pre-image. Returns the byte offset it was
    /// written at, which the statement sub-journal remembers as its
    /// replay boundary (§4.5).
    pub fn append(&mut self, pgno: PageNumber, data: &[u8]) -> Result<u64> {
        let offset = self.write_offset;
        let raw = format::encode_record(pgno, data, self.header.checksum_seed);
        self.file.write_at(&raw, offset)?;
        self.write_offset += raw.len() as u64;
        Ok(offset)
    }

    /// Sync in `Normal` mode: one fsync of the appended records.
    pub fn sync_normal(&mut self) -> Result<()> {
        self.file.sync()
    }

    /// Sync in `Full` mode: fsync the records, then rewrite the header's
    /// record count with the now-known value and fsync a second time
    /// (§4.1, §4.9). This bounds how much of a torn tail recovery has to
    /// tolerate: once this returns, the header's count is trustworthy.
    pub fn sync_full(&mut self) -> Result<()> {
        self.file.sync()?;
        let count = self.record_count();
        self.file.write_at(&count.to_be_bytes(), 8)?;
        self.file.sync()
    }

    pub fn file_mut(&mut self) -> &mut F {
        &mut self.file
    }

    pub fn into_file(self) -> F {
        self.file
    }
}

/// Sequential reader over an existing journal, used by recovery and by
/// statement-sub-journal replay.
pub struct JournalReader<F: VfsFile> {
    file: F,
    page_size: usize,
    seed: u32,
    offset: u64,
    remaining: Option<u32>,
    file_size: u64,
}

impl<F: VfsFile> JournalReader<F> {
    /// Parse the header and position the cursor at the first record.
    pub fn open(mut file: F, page_size: usize) -> Result<(JournalHeader, Self)> {
        let file_size = file.file_size()?;
        let mut probe = vec![0u8; file_size.min(4096) as usize];
        file.read_at(&mut probe, 0)?;
        let (header, _min_offset) = JournalHeader::decode(&probe)?;
        let sector_size = file.sector_size();
        let header_len = header.encoded_len();
        let padded = header_len.div_ceil(sector_size.max(1) as usize) * sector_size.max(1) as usize;
        let reader = Self {
            offset: padded as u64,
            remaining: header.record_count,
            seed: header.checksum_seed,
            page_size,
            file,
            file_size,
        };
        Ok((header, reader))
    }

    #[must_use]
    pub const fn checksum_seed(&self) -> u32 {
        self.seed
    }

    /// Read the next record. Returns `None` once the declared record
    /// count is exhausted, the page-number-0 terminator is seen, the
    /// file runs out of bytes, or a checksum mismatch signals a torn
    /// tail (§4.4 step 6: "halt cleanly, treat remainder as torn").
    pub fn next_record(&mut self) -> Result<Option<(PageNumber, Vec<u8>)>> {
        if let Some(remaining) = self.remaining {
            if remaining == 0 {
                return Ok(None);
            }
        }
        let rec_len = format::record_len(self.page_size);
        if self.offset + rec_len as u64 > self.file_size {
            return Ok(None);
        }
        let mut raw = vec![0u8; rec_len];
        let n = self.file.read_at(&mut raw, self.offset)?;
        if n < rec_len {
            return Ok(None);
        }
        let Some(DecodedRecord {
            pgno,
            data_range,
            checksum_ok,
        }) = format::decode_record(&raw, self.page_size, self.seed)
        else {
            return Ok(None);
        };
        if !checksum_ok {
            return Ok(None);
        }
        self.offset += rec_len as u64;
        if let Some(remaining) = &mut self.remaining {
            *remaining -= 1;
        }
        let pgno = PageNumber::new(pgno).ok_or(cask_error::CaskError::Corrupt(
            "journal record has page number 0 after terminator check".to_owned(),
        ))?;
        Ok(Some((pgno, raw[data_range.0..data_range.1].to_vec())))
    }

    pub fn into_file(self) -> F {
        self.file
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cask_vfs::{MemoryVfs, Vfs};
    use std::path::Path;

    #[test]
    fn write_then_replay_round_trips_records() {
        let vfs = MemoryVfs::new();
        let file = vfs.open_exclusive(Path::new("j"), false).unwrap();
        let mut journal = Journal::create(file, 0xabcd, 2, None, 8).unwrap();

        let p1 = PageNumber::new(1).unwrap();
        let p2 = PageNumber::new(2).unwrap();
        journal.append(p1, &[1; 8]).unwrap();
        journal.append(p2, &[2; 8]).unwrap();
        journal.sync_normal().unwrap();
        assert_eq!(journal.record_count(), 2);

        let file = journal.into_file();
        let (header, mut reader) = JournalReader::open(file, 8).unwrap();
        assert_eq!(header.orig_page_count, 2);

        let (pgno, data) = reader.next_record().unwrap().unwrap();
        assert_eq!(pgno, p1);
        assert_eq!(data, vec![1; 8]);
        let (pgno, data) = reader.next_record().unwrap().unwrap();
        assert_eq!(pgno, p2);
        assert_eq!(data, vec![2; 8]);
        assert!(reader.next_record().unwrap().is_none());
    }

    #[test]
    fn corrupted_last_record_is_treated_as_a_torn_tail() {
        let vfs = MemoryVfs::new();
        let file = vfs.open_exclusive(Path::new("j"), false).unwrap();
        let mut journal = Journal::create(file, 1, 1, None, 4).unwrap();
        let p1 = PageNumber::new(1).unwrap();
        let p2 = PageNumber::new(2).unwrap();
        let p3 = PageNumber::new(3).unwrap();
        journal.append(p1, &[1; 4]).unwrap();
        journal.append(p2, &[2; 4]).unwrap();
        let bad_offset = journal.append(p3, &[3; 4]).unwrap();
        journal.sync_full().unwrap();

        // Corrupt the checksum trailer of the third record.
        let file = journal.file_mut();
        let corrupt_checksum_offset = bad_offset + 4 /* pgno */ + 4 /* data */;
        file.write_at(&[0xff; 4], corrupt_checksum_offset).unwrap();

        let (_, mut reader) = JournalReader::open(journal.into_file(), 4).unwrap();
        assert!(reader.next_record().unwrap().is_some());
        assert!(reader.next_record().unwrap().is_some());
        assert!(reader.next_record().unwrap().is_none());
    }

    #[test]
    fn full_sync_writes_the_true_record_count_into_the_header() {
        let vfs = MemoryVfs::new();
        let file = vfs.open_exclusive(Path::new("j"), false).unwrap();
        let mut journal = Journal::create(file, 1, 1, None, 4).unwrap();
        journal.append(PageNumber::ONE, &[9; 4]).unwrap();
        journal.sync_full().unwrap();

        let (header, _) = JournalReader::open(journal.into_file(), 4).unwrap();
        assert_eq!(header.record_count, Some(1));
    }
}
