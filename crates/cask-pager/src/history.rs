//! Per-page history records standing in for the journal in `:memory:`
//! mode (§4.7).

use hashbrown::HashMap;

use cask_types::{PageData, PageNumber};

#[derive(Default)]
struct Record {
    pre_txn: Option<PageData>,
    pre_stmt: Option<PageData>,
}

/// Tracks pre-transaction and pre-statement images for pages modified
/// while the pager is running against the `:memory:` sentinel, in lieu
/// of journaling.
#[derive(Default)]
pub struct History {
    records: HashMap<PageNumber, Record>,
}

impl History {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Called from `write()` before a page's in-memory bytes change.
    /// Snapshots `current` the first time this page is touched within
    /// the transaction, and again the first time within an active
    /// statement.
    pub fn note_write(&mut self, pgno: PageNumber, current: &[u8], stmt_active: bool) {
        let record = self.records.entry(pgno).or_default();
        if record.pre_txn.is_none() {
            record.pre_txn = Some(PageData::from_vec(current.to_vec()));
        }
        if stmt_active && record.pre_stmt.is_none() {
            record.pre_stmt = Some(PageData::from_vec(current.to_vec()));
        }
    }

    /// `commit`: the transaction's snapshots are no longer needed.
    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// `rollback`: hand back every page's pre-transaction image so the
    /// caller can restore cache contents, then drop all history.
    pub fn take_for_rollback(&mut self) -> Vec<(PageNumber, PageData)> {
        let out = self
            .records
            .drain()
            .filter_map(|(pgno, r)| r.pre_txn.map(|data| (pgno, data)))
            .collect();
        out
    }

    /// `stmt_commit`: statement snapshots are discarded, transaction
    /// snapshots survive.
    pub fn stmt_commit(&mut self) {
        for record in self.records.values_mut() {
            record.pre_stmt = None;
        }
    }

    /// `stmt_rollback`: hand back every page's pre-statement image (for
    /// pages touched since `stmt_begin`) and discard those snapshots,
    /// keeping the transaction-level snapshot intact.
    pub fn take_for_stmt_rollback(&mut self) -> Vec<(PageNumber, PageData)> {
        let mut out = Vec::new();
        for (pgno, record) in &mut self.records {
            if let Some(data) = record.pre_stmt.take() {
                out.push((*pgno, data));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pn(n: u32) -> PageNumber {
        PageNumber::new(n).unwrap()
    }

    #[test]
    fn first_write_snapshots_the_pre_transaction_image() {
        let mut hist = History::new();
        hist.note_write(pn(1), &[1, 2, 3], false);
        hist.note_write(pn(1), &[9, 9, 9], false);
        let rolled_back = hist.take_for_rollback();
        assert_eq!(rolled_back, vec![(pn(1), PageData::from_vec(vec![1, 2, 3]))]);
    }

    #[test]
    fn stmt_rollback_restores_only_statement_scope() {
        let mut hist = History::new();
        hist.note_write(pn(1), &[1, 1, 1], false);
        hist.note_write(pn(1), &[2, 2, 2], true);
        hist.note_write(pn(1), &[3, 3, 3], true);

        let stmt_restore = hist.take_for_stmt_rollback();
        assert_eq!(stmt_restore, vec![(pn(1), PageData::from_vec(vec![2, 2, 2]))]);

        // The transaction-level snapshot is still there for a later
        // full rollback.
        let txn_restore = hist.take_for_rollback();
        assert_eq!(txn_restore, vec![(pn(1), PageData::from_vec(vec![1, 1, 1]))]);
    }

    #[test]
    fn commit_clears_all_history() {
        let mut hist = History::new();
        hist.note_write(pn(1), &[1], false);
        hist.clear();
        assert!(hist.take_for_rollback().is_empty());
    }
}
