//! Cached page frame (§3 "Cached page frame").

use cask_types::{PageData, PageNumber};

/// A single cached page plus the bookkeeping the pager needs to decide
/// when it is safe to flush or evict it.
pub struct Frame {
    pub pgno: PageNumber,
    pub data: PageData,
    /// The page has been written since it was loaded; must reach the
    /// database file (or be discarded by rollback) before eviction.
    pub dirty: bool,
    /// A pre-image for this page already sits in the rollback journal.
    pub in_journal: bool,
    /// A pre-image for this page already sits in the statement
    /// sub-journal of the currently active statement transaction.
    pub in_stmt: bool,
    /// The journal record backing this page has not yet been synced;
    /// while true the frame must not be written to the database file.
    pub needs_sync: bool,
    /// Sticky flag set by `dont_write`: this page must still be given a
    /// real pre-image in the journal even if a later `dont_rollback`
    /// call asks to skip it (the page may be freed and reused for
    /// unrelated data within the same transaction).
    pub always_rollback: bool,
    pub ref_count: u32,
    pub(crate) lru_prev: Option<usize>,
    pub(crate) lru_next: Option<usize>,
}

impl Frame {
    pub(crate) fn fresh(pgno: PageNumber, data: PageData) -> Self {
        Self {
            pgno,
            data,
            dirty: false,
            in_journal: false,
            in_stmt: false,
            needs_sync: false,
            always_rollback: false,
            ref_count: 0,
            lru_prev: None,
            lru_next: None,
        }
    }

    pub(crate) fn reset_for_reuse(&mut self, pgno: PageNumber, data: PageData) {
        self.pgno = pgno;
        self.data = data;
        self.dirty = false;
        self.in_journal = false;
        self.in_stmt = false;
        self.needs_sync = false;
        // `always_rollback` is sticky at the pager level, not the frame
        // level, and is handled by the caller before this reset.
        debug_assert_eq!(self.ref_count, 0);
    }
}
