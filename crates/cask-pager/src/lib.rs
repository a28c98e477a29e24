//! Transactional page cache: state machine, rollback journal, and
//! statement sub-transactions over a [`cask_vfs::Vfs`].

mod busy;
mod cache;
mod codec;
mod config;
mod error_mask;
mod frame;
mod history;
mod journal;
mod pager;

pub use busy::{BusyHandler, CountedBusyHandler, NoBusyHandler};
pub use codec::{CodecMode, NullCodec, PageCodec};
pub use config::OpenOptions;
pub use error_mask::ErrorMask;
pub use frame::Frame;
pub use journal::{JournalHeader, StmtJournal};
pub use pager::{PageRef, Pager};
