//! Optional opaque transform applied around every disk transfer (§4.6).

use cask_types::PageNumber;

/// Which transfer a [`PageCodec`] call is wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecMode {
    /// About to write `pgno` to the database file.
    EncodeForDb,
    /// Just read `pgno` from the database file.
    DecodeFromDb,
    /// About to write `pgno`'s pre-image into the journal.
    EncodeForJournal,
    /// Just read `pgno`'s pre-image back out of the journal.
    DecodeFromJournal,
}

/// A reversible, page-scoped transform the pager applies around every
/// disk transfer. The pager treats the buffer as opaque between the
/// `encode` and matching `decode` calls; it never inspects content.
pub trait PageCodec: Send {
    /// Transform `buf` in place before it reaches disk.
    fn encode(&mut self, buf: &mut [u8], pgno: PageNumber, mode: CodecMode);

    /// Reverse [`Self::encode`] on data just read from disk.
    fn decode(&mut self, buf: &mut [u8], pgno: PageNumber, mode: CodecMode);
}

/// The default when no codec is configured: every transfer is a no-op.
pub struct NullCodec;

impl PageCodec for NullCodec {
    fn encode(&mut self, _buf: &mut [u8], _pgno: PageNumber, _mode: CodecMode) {}
    fn decode(&mut self, _buf: &mut [u8], _pgno: PageNumber, _mode: CodecMode) {}
}
