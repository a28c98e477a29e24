//! Public API facade over the page store.
//!
//! Downstream users depend on this crate alone; `cask-types`,
//! `cask-error`, `cask-vfs`, and `cask-pager` are implementation
//! details re-exported here for convenience and for crates that want
//! the lower-level pieces directly.

pub use cask_error::{CaskError, Result};
pub use cask_pager::{
    BusyHandler, CodecMode, CountedBusyHandler, ErrorMask, Frame, JournalHeader, NoBusyHandler,
    NullCodec, OpenOptions, PageCodec, PageRef, Pager, StmtJournal,
};
pub use cask_types::{
    LockLevel, PageData, PageNumber, PageSize, PagerState, SafetyLevel, CHANGE_COUNTER_OFFSET,
    DEFAULT_PAGE_SIZE, JOURNAL_SUFFIX, MEMORY_DB_SENTINEL,
};
pub use cask_vfs::{DirHandle, MemoryFile, MemoryVfs, OsFile, OsVfs, Vfs, VfsFile};

mod connection;

pub use connection::Connection;
