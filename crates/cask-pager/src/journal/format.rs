//! On-disk layout of the rollback journal (§3, §4.8).

use cask_error::{CaskError, Result};
use cask_types::PageNumber;

/// Bytes that identify a journal belonging to this pager family. Any
/// other leading bytes mean the file is not a journal we understand.
pub const MAGIC: [u8; 8] = [0xd9, 0xd5, 0x05, 0xf9, 0x20, 0xa1, 0x63, 0xd7];

/// Record-count value meaning "derive the count from file size" —
/// written when the true count was not known until the journal was
/// fully flushed (e.g. a crash mid-write left it unset).
pub const RECORD_COUNT_SENTINEL: u32 = 0xFFFF_FFFF;

const FIXED_HEADER_LEN: usize = 8 + 4 + 4 + 4 + 4;

/// Decoded journal header (§3 "Journal").
#[derive(Debug, Clone)]
pub struct JournalHeader {
    pub record_count: Option<u32>,
    pub checksum_seed: u32,
    pub orig_page_count: u32,
    pub master_name: Option<Vec<u8>>,
}

impl JournalHeader {
    /// Size in bytes of the unpadded header this record set would
    /// serialize to.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        let name_len = self.master_name.as_ref().map_or(0, |n| n.len() + 1);
        FIXED_HEADER_LEN + name_len
    }

    /// Serialize, padded so the first page record starts at a sector
    /// boundary (§4.8).
    #[must_use]
    pub fn encode(&self, sector_size: u32) -> Vec<u8> {
        let name_len = self.master_name.as_ref().map_or(0, |n| n.len() + 1);
        let unpadded = FIXED_HEADER_LEN + name_len;
        let padded = pad_up(unpadded, sector_size as usize);

        let mut buf = Vec::with_capacity(padded);
        buf.extend_from_slice(&MAGIC);
        buf.extend_from_slice(&self.record_count.unwrap_or(RECORD_COUNT_SENTINEL).to_be_bytes());
        buf.extend_from_slice(&self.checksum_seed.to_be_bytes());
        buf.extend_from_slice(&self.orig_page_count.to_be_bytes());
        buf.extend_from_slice(&(name_len as u32).to_be_bytes());
        if let Some(name) = &self.master_name {
            buf.extend_from_slice(name);
            buf.push(0);
        }
        buf.resize(padded, 0);
        buf
    }

    /// Parse a header from the front of `buf`. Returns the header and
    /// the byte offset of the first page record (which may be less
    /// than `buf.len()` if the caller handed us more than the header).
    pub fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        if buf.len() < FIXED_HEADER_LEN {
            return Err(CaskError::corrupt("journal header truncated"));
        }
        if buf[0..8] != MAGIC {
            return Err(CaskError::corrupt("journal magic mismatch"));
        }
        let record_count = u32::from_be_bytes(buf[8..12].try_into().unwrap());
        let checksum_seed = u32::from_be_bytes(buf[12..16].try_into().unwrap());
        let orig_page_count = u32::from_be_bytes(buf[16..20].try_into().unwrap());
        let name_len = u32::from_be_bytes(buf[20..24].try_into().unwrap()) as usize;

        let master_name = if name_len == 0 {
            None
        } else {
            let end = FIXED_HEADER_LEN
                .checked_add(name_len)
                .ok_or_else(|| CaskError::corrupt("master journal name length overflow"))?;
            if buf.len() < end {
                return Err(CaskError::corrupt("journal header truncated (master name)"));
            }
            let raw = &buf[FIXED_HEADER_LEN..end - 1];
            Some(raw.to_vec())
        };

        let offset = FIXED_HEADER_LEN + name_len;
        Ok((
            Self {
                record_count: (record_count != RECORD_COUNT_SENTINEL).then_some(record_count),
                checksum_seed,
                orig_page_count,
                master_name,
            },
            offset,
        ))
    }
}

fn pad_up(len: usize, sector_size: usize) -> usize {
    let sector_size = sector_size.max(1);
    len.div_ceil(sector_size) * sector_size
}

/// Per-page checksum: seed + page number, not a content hash (§4.3).
/// Cheap enough to compute on every write; its only job is to flag a
/// torn tail with high probability, not to detect tampering.
#[must_use]
pub const fn record_checksum(seed: u32, pgno: PageNumber) -> u32 {
    seed.wrapping_add(pgno.get())
}

/// Byte length of one page record: 4-byte page number, page payload,
/// 4-byte checksum.
#[must_use]
pub const fn record_len(page_size: usize) -> usize {
    4 + page_size + 4
}

/// Encode one page record.
#[must_use]
pub fn encode_record(pgno: PageNumber, data: &[u8], seed: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(record_len(data.len()));
    buf.extend_from_slice(&pgno.get().to_be_bytes());
    buf.extend_from_slice(data);
    buf.extend_from_slice(&record_checksum(seed, pgno).to_be_bytes());
    buf
}

/// A decoded page record, or `None` if `buf` holds the sentinel
/// page-number-0 terminator.
pub struct DecodedRecord {
    pub pgno: u32,
    pub data_range: (usize, usize),
    pub checksum_ok: bool,
}

/// Decode one fixed-size record out of `buf` (which must be exactly
/// `record_len(page_size)` bytes), checking its checksum against `seed`.
#[must_use]
pub fn decode_record(buf: &[u8], page_size: usize, seed: u32) -> Option<DecodedRecord> {
    if buf.len() != record_len(page_size) {
        return None;
    }
    let pgno = u32::from_be_bytes(buf[0..4].try_into().unwrap());
    if pgno == 0 {
        return None;
    }
    let data_range = (4, 4 + page_size);
    let stored = u32::from_be_bytes(buf[4 + page_size..4 + page_size + 4].try_into().unwrap());
    let expected = seed.wrapping_add(pgno);
    Some(DecodedRecord {
        pgno,
        data_range,
        checksum_ok: stored == expected,
    })
}
