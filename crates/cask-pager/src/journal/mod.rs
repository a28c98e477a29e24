//! Rollback journal subsystem: wire format, writer/reader, statement
//! sub-journal, and the master-journal delete protocol.

pub mod format;
pub mod journal;
pub mod master;
pub mod stmt;

pub use format::JournalHeader;
pub use journal::{Journal, JournalReader};
pub use master::try_delete_master;
pub use stmt::StmtJournal;
