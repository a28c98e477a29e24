//! The pager state machine (§4.1) and its public API (§6).

use std::path::{Path, PathBuf};

use cask_error::{CaskError, Result};
use cask_types::{
    LockLevel, PageData, PageNumber, PageSize, PagerState, SafetyLevel, CHANGE_COUNTER_OFFSET,
    JOURNAL_SUFFIX, MEMORY_DB_SENTINEL,
};
use cask_vfs::{Vfs, VfsFile};

use crate::busy::BusyHandler;
use crate::cache::PageCache;
use crate::codec::{CodecMode, PageCodec};
use crate::config::OpenOptions;
use crate::error_mask::ErrorMask;
use crate::history::History;
use crate::journal::{try_delete_master, Journal, JournalReader, StmtJournal};

/// A handle to a page the pager currently holds pinned. Cheap to copy;
/// the real frame lives inside the pager's cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRef(PageNumber);

impl PageRef {
    #[must_use]
    pub const fn pgno(self) -> PageNumber {
        self.0
    }
}

/// Transactional page cache over a single database file (§3 "Pager").
pub struct Pager<V: Vfs> {
    vfs: V,
    db_path: PathBuf,
    journal_path: PathBuf,
    file: Option<V::File>,
    journal: Option<Journal<V::File>>,
    stmt_journal: Option<StmtJournal<V::File>>,
    stmt_journal_mark: u32,
    stmt_active: bool,
    cache: PageCache,
    page_size: PageSize,
    #[allow(dead_code)]
    reserved_bytes: u8,
    db_size: u32,
    orig_db_size: u32,
    stmt_size: u32,
    state: PagerState,
    in_journal_bits: Vec<bool>,
    in_stmt_bits: Vec<bool>,
    dirty_cache: bool,
    safety_level: SafetyLevel,
    read_only: bool,
    mem_db: bool,
    always_rollback: bool,
    err_mask: ErrorMask,
    busy_handler: Box<dyn BusyHandler>,
    codec: Option<Box<dyn PageCodec>>,
    destructor: Option<Box<dyn FnMut(&mut PageData, PageNumber) + Send>>,
    reiniter: Option<Box<dyn FnMut(&mut PageData, PageNumber) + Send>>,
    history: History,
    active_master_name: Option<Vec<u8>>,
    pending_truncate: Option<u32>,
    total_refs: u32,
    is_open: bool,
}

fn journal_path_for(db_path: &Path) -> PathBuf {
    let mut s = db_path.as_os_str().to_owned();
    s.push(JOURNAL_SUFFIX);
    PathBuf::from(s)
}

fn stmt_journal_path_for(db_path: &Path) -> PathBuf {
    let mut s = db_path.as_os_str().to_owned();
    s.push("-stmtjrnl");
    PathBuf::from(s)
}

impl<V: Vfs> Pager<V> {
    /// Open (or create) a database. `path` may be the sentinel
    /// [`MEMORY_DB_SENTINEL`] to select the in-memory mode of §4.7.
    pub fn open(vfs: V, path: impl AsRef<Path>, options: OpenOptions) -> Result<Self> {
        let path = path.as_ref();
        let mem_db = path.as_os_str() == MEMORY_DB_SENTINEL;

        let (file, db_size) = if mem_db {
            (None, 0)
        } else {
            let mut f = if options.read_only {
                vfs.open_read_only(path)?
            } else {
                vfs.open_read_write(path)?
            };
            let size = f.file_size()?;
            let page_bytes = u64::from(options.page_size.get());
            let pages = size / page_bytes;
            let pages = u32::try_from(pages).map_err(|_| CaskError::OutOfRange {
                what: "database page count".to_owned(),
                value: pages.to_string(),
            })?;
            (Some(f), pages)
        };

        let journal_path = if mem_db {
            PathBuf::new()
        } else {
            journal_path_for(path)
        };

        tracing::info!(path = %path.display(), mem_db, db_size, "pager opened");

        Ok(Self {
            vfs,
            db_path: path.to_path_buf(),
            journal_path,
            file,
            journal: None,
            stmt_journal: None,
            stmt_journal_mark: 0,
            stmt_active: false,
            cache: PageCache::new(options.cache_capacity),
            page_size: options.page_size,
            reserved_bytes: options.reserved_bytes,
            db_size,
            orig_db_size: db_size,
            stmt_size: 0,
            state: PagerState::Unlock,
            in_journal_bits: Vec::new(),
            in_stmt_bits: Vec::new(),
            dirty_cache: false,
            safety_level: options.safety_level,
            read_only: options.read_only,
            mem_db,
            always_rollback: false,
            err_mask: ErrorMask::empty(),
            busy_handler: options.busy_handler,
            codec: options.codec,
            destructor: None,
            reiniter: None,
            history: History::new(),
            active_master_name: None,
            pending_truncate: None,
            total_refs: 0,
            is_open: true,
        })
    }

    /// Roll back any open transaction and release the file lock.
    pub fn close(&mut self) -> Result<()> {
        self.check_open()?;
        if self.state.is_writing() {
            let _ = self.rollback();
        }
        if !self.mem_db {
            if let Some(file) = self.file.as_mut() {
                let _ = file.unlock(LockLevel::None);
            }
        }
        self.is_open = false;
        tracing::info!(path = %self.db_path.display(), "pager closed");
        Ok(())
    }

    #[must_use]
    pub const fn state(&self) -> PagerState {
        self.state
    }

    #[must_use]
    pub const fn db_size(&self) -> u32 {
        self.db_size
    }

    #[must_use]
    pub const fn page_size(&self) -> PageSize {
        self.page_size
    }

    // -- configuration mutators (§6) -----------------------------------

    pub fn set_cachesize(&mut self, capacity: usize) {
        self.cache.set_capacity(capacity);
    }

    pub const fn set_safety_level(&mut self, level: SafetyLevel) {
        self.safety_level = level;
    }

    pub fn set_codec(&mut self, codec: impl PageCodec + 'static) {
        self.codec = Some(Box::new(codec));
    }

    pub fn set_destructor(&mut self, f: impl FnMut(&mut PageData, PageNumber) + Send + 'static) {
        self.destructor = Some(Box::new(f));
    }

    pub fn set_reiniter(&mut self, f: impl FnMut(&mut PageData, PageNumber) + Send + 'static) {
        self.reiniter = Some(Box::new(f));
    }

    // -- page acquisition (§6) ------------------------------------------

    /// Acquire (loading if necessary) and pin a page.
    pub fn get(&mut self, pgno: PageNumber) -> Result<PageRef> {
        self.check_open()?;
        self.fail_if_poisoned()?;
        self.ensure_shared_lock()?;

        if let Some(slot) = self.cache.lookup(pgno) {
            self.cache.pin(slot);
            self.total_refs += 1;
            return Ok(PageRef(pgno));
        }

        let data = if self.mem_db || pgno.get() > self.db_size {
            PageData::zeroed(self.page_size.as_usize())
        } else {
            self.read_page_from_db(pgno)?
        };

        let slot = if self.cache.has_capacity() {
            self.cache.alloc(pgno, data)
        } else {
            self.make_room_and_install(pgno, data)?
        };
        self.restore_journal_bits(pgno, slot);
        self.total_refs += 1;
        Ok(PageRef(pgno))
    }

    /// A freshly loaded frame starts with `in_journal`/`in_stmt` clear
    /// (`Frame::fresh`/`reset_for_reuse`), but this page may already have
    /// a pre-image recorded earlier in the current transaction if it was
    /// evicted and reloaded; the bitsets outlive any individual frame, so
    /// restore from them (§4.2 step 5).
    fn restore_journal_bits(&mut self, pgno: PageNumber, slot: usize) {
        let idx = pgno.get() as usize - 1;
        let in_journal = self.in_journal_bits.get(idx).copied().unwrap_or(false);
        let in_stmt = self.in_stmt_bits.get(idx).copied().unwrap_or(false);
        let frame = self.cache.frame_mut(slot);
        frame.in_journal = in_journal;
        frame.in_stmt = in_stmt;
    }

    /// Cache-only probe: does not touch disk or the lock.
    pub fn lookup(&mut self, pgno: PageNumber) -> Option<PageRef> {
        let slot = self.cache.lookup(pgno)?;
        self.cache.pin(slot);
        self.total_refs += 1;
        Some(PageRef(pgno))
    }

    pub fn add_ref(&mut self, page: PageRef) {
        if let Some(slot) = self.cache.lookup(page.0) {
            self.cache.pin(slot);
            self.total_refs += 1;
        }
    }

    pub fn unref(&mut self, page: PageRef) -> Result<()> {
        if let Some(slot) = self.cache.lookup(page.0) {
            self.cache.unpin(slot);
            self.total_refs = self.total_refs.saturating_sub(1);
            if self.total_refs == 0 && self.state == PagerState::Shared {
                self.release_to_unlock()?;
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn page_data(&self, page: PageRef) -> &[u8] {
        let slot = self.cache.lookup(page.0).expect("PageRef outlived its frame");
        &self.cache.frame(slot).data
    }

    pub fn page_data_mut(&mut self, page: PageRef) -> &mut [u8] {
        let slot = self.cache.lookup(page.0).expect("PageRef outlived its frame");
        &mut self.cache.frame_mut(slot).data
    }

    // -- writes (§4.3, §6) ------------------------------------------------

    /// Mark a page writable: journals its pre-image exactly once,
    /// folds it into the active statement sub-journal if any, and sets
    /// `dirty`.
    pub fn write(&mut self, page: PageRef) -> Result<()> {
        self.check_open()?;
        if self.read_only {
            return Err(CaskError::ReadOnly);
        }
        self.fail_if_poisoned()?;
        self.escalate_to_reserved()?;

        let pgno = page.0;
        let slot = self
            .cache
            .lookup(pgno)
            .ok_or_else(|| CaskError::misuse("write() called on a page that is not held"))?;
        self.journal_preimage_if_needed(slot)?;

        let frame = self.cache.frame_mut(slot);
        frame.dirty = true;
        if pgno.get() > self.db_size {
            self.db_size = pgno.get();
        }
        self.dirty_cache = true;
        Ok(())
    }

    /// Hint that a dirty page's contents are unused and need not be
    /// flushed. Sticky: marks the frame `always_rollback` so a later
    /// reuse of this page number for different data still gets a real
    /// pre-image in the journal.
    pub fn dont_write(&mut self, pgno: PageNumber) {
        if self.mem_db {
            return;
        }
        let Some(slot) = self.cache.lookup(pgno) else {
            return;
        };
        let frame = self.cache.frame_mut(slot);
        frame.always_rollback = true;
        if frame.dirty {
            let grew_this_transaction = pgno.get() == self.db_size && self.orig_db_size < self.db_size;
            if !grew_this_transaction {
                frame.dirty = false;
            }
        }
    }

    /// Hint that a page's pre-image need not be journaled: fakes
    /// `in_journal`/`in_stmt` so `journal_preimage_if_needed` skips a
    /// real write for it. A no-op once `dont_write` (or the pager-wide
    /// sticky flag) has claimed this page for real rollback.
    pub fn dont_rollback(&mut self, page: PageRef) {
        if self.state != PagerState::Exclusive || self.journal.is_none() {
            return;
        }
        let pgno = page.0;
        let Some(slot) = self.cache.lookup(pgno) else {
            return;
        };
        if self.cache.frame(slot).always_rollback || self.always_rollback || self.mem_db {
            return;
        }

        let in_journal = self.cache.frame(slot).in_journal;
        if !in_journal && pgno.get() <= self.orig_db_size {
            if let Some(bit) = self.in_journal_bits.get_mut(pgno.get() as usize - 1) {
                *bit = true;
            }
            let frame = self.cache.frame_mut(slot);
            frame.in_journal = true;
            if self.stmt_active {
                if let Some(bit) = self.in_stmt_bits.get_mut(pgno.get() as usize - 1) {
                    *bit = true;
                }
                self.cache.frame_mut(slot).in_stmt = true;
            }
        }

        let in_stmt = self.cache.frame(slot).in_stmt;
        if self.stmt_active && !in_stmt && pgno.get() <= self.stmt_size {
            if let Some(bit) = self.in_stmt_bits.get_mut(pgno.get() as usize - 1) {
                *bit = true;
            }
            self.cache.frame_mut(slot).in_stmt = true;
        }
    }

    // -- transaction control (§4.1, §6) -----------------------------------

    /// Elevate `SHARED` to `RESERVED` and open the rollback journal.
    /// `master_name` names a master journal coordinating a multi-file
    /// atomic commit, if any.
    pub fn begin(&mut self, master_name: Option<Vec<u8>>) -> Result<()> {
        self.check_open()?;
        self.fail_if_poisoned()?;
        self.ensure_shared_lock()?;
        self.active_master_name = master_name;
        self.escalate_to_reserved()
    }

    pub fn commit(&mut self) -> Result<()> {
        self.check_open()?;
        self.fail_if_poisoned()?;
        if self.state < PagerState::Reserved {
            return Ok(());
        }
        if !self.dirty_cache {
            self.clear_transaction_bits();
            return self.release_to_shared();
        }
        match self.commit_inner() {
            Ok(()) => Ok(()),
            Err(e) => {
                self.poison(&e);
                Err(e)
            }
        }
    }

    pub fn rollback(&mut self) -> Result<()> {
        self.check_open()?;
        if self.state < PagerState::Reserved {
            return Ok(());
        }
        match self.rollback_inner() {
            Ok(()) => {
                self.err_mask
                    .remove(ErrorMask::FULL | ErrorMask::NOMEM | ErrorMask::DISK);
                Ok(())
            }
            Err(e) => {
                self.poison(&e);
                Err(e)
            }
        }
    }

    /// Phase-one sync for multi-pager atomic commit: fsync this
    /// pager's journal without flushing pages or releasing the lock.
    pub fn sync(&mut self) -> Result<()> {
        self.check_open()?;
        if self.mem_db {
            return Ok(());
        }
        let Some(journal) = self.journal.as_mut() else {
            return Ok(());
        };
        if self.safety_level.full_sync() {
            journal.sync_full()
        } else if !self.safety_level.no_sync() {
            journal.sync_normal()
        } else {
            Ok(())
        }
    }

    // -- statement sub-transactions (§4.5) --------------------------------

    pub fn stmt_begin(&mut self) -> Result<()> {
        self.check_open()?;
        if !self.state.is_writing() {
            return Err(CaskError::misuse("stmt_begin requires an open write transaction"));
        }
        self.stmt_size = self.db_size;
        self.in_stmt_bits = vec![false; self.stmt_size as usize];
        self.stmt_active = true;
        if self.mem_db {
            return Ok(());
        }
        self.stmt_journal_mark = self.journal.as_ref().map_or(0, Journal::record_count);
        match self.stmt_journal.as_mut() {
            Some(stmt_journal) => stmt_journal.reset(),
            None => {
                let path = stmt_journal_path_for(&self.db_path);
                let file = self.vfs.open_exclusive(&path, true)?;
                self.stmt_journal = Some(StmtJournal::new(file, self.page_size.as_usize()));
            }
        }
        Ok(())
    }

    pub fn stmt_commit(&mut self) -> Result<()> {
        self.check_open()?;
        if let Some(stmt_journal) = self.stmt_journal.as_mut() {
            stmt_journal.reset();
        }
        if self.mem_db {
            self.history.stmt_commit();
        }
        for slot in self.cache.slot_indices().collect::<Vec<_>>() {
            self.cache.frame_mut(slot).in_stmt = false;
        }
        self.in_stmt_bits.clear();
        self.stmt_active = false;
        Ok(())
    }

    pub fn stmt_rollback(&mut self) -> Result<()> {
        self.check_open()?;
        if self.mem_db {
            let restores = self.history.take_for_stmt_rollback();
            for (pgno, data) in restores {
                self.install_restored_page(pgno, data);
            }
        } else {
            if let Some(stmt_journal) = self.stmt_journal.as_mut() {
                let records = stmt_journal.records_reversed()?;
                for (pgno, data) in records {
                    self.install_restored_page(pgno, PageData::from_vec(data));
                }
            }
            let mark = self.stmt_journal_mark;
            let total = self.journal.as_ref().map_or(0, Journal::record_count);
            if total > mark {
                let tail = self.read_main_journal_tail_reversed(mark, total)?;
                for (pgno, data) in tail {
                    self.install_restored_page(pgno, data);
                }
            }
        }
        self.db_size = self.stmt_size;
        self.stmt_commit()
    }

    // -- shrinking (§6) ----------------------------------------------------

    pub fn truncate(&mut self, new_page_count: u32) -> Result<()> {
        self.check_open()?;
        self.escalate_to_reserved()?;
        if new_page_count >= self.db_size {
            return Ok(());
        }
        let upper = self.db_size.min(self.orig_db_size);
        for raw in (new_page_count + 1)..=upper {
            let Some(pgno) = PageNumber::new(raw) else {
                continue;
            };
            if self.mem_db && self.cache.lookup(pgno).is_none() {
                continue;
            }
            self.load_and_journal_preimage(pgno)?;
        }
        for raw in (new_page_count + 1)..=self.db_size {
            if let Some(pgno) = PageNumber::new(raw) {
                self.cache.invalidate(pgno);
            }
        }
        self.db_size = new_page_count;
        self.pending_truncate = Some(new_page_count);
        self.dirty_cache = true;
        Ok(())
    }

    // -- internals: locking & recovery -------------------------------------

    fn check_open(&self) -> Result<()> {
        if self.is_open {
            Ok(())
        } else {
            Err(CaskError::misuse("pager used after close"))
        }
    }

    fn fail_if_poisoned(&self) -> Result<()> {
        if self.err_mask.contains(ErrorMask::CORRUPT) {
            return Err(CaskError::corrupt("pager poisoned by a prior corruption"));
        }
        if self.err_mask.contains(ErrorMask::LOCK) {
            return Err(CaskError::Protocol);
        }
        if self.err_mask.contains(ErrorMask::FULL) {
            return Err(CaskError::Full);
        }
        if self.err_mask.contains(ErrorMask::NOMEM) {
            return Err(CaskError::NoMem);
        }
        if self.err_mask.contains(ErrorMask::DISK) {
            return Err(CaskError::internal("pager poisoned by a prior I/O error"));
        }
        Ok(())
    }

    fn poison(&mut self, err: &CaskError) {
        let bit = match err {
            CaskError::Corrupt(_) => ErrorMask::CORRUPT,
            CaskError::Protocol => ErrorMask::LOCK,
            CaskError::Full => ErrorMask::FULL,
            CaskError::NoMem => ErrorMask::NOMEM,
            CaskError::IoErr(_) => ErrorMask::DISK,
            _ => return,
        };
        tracing::error!(?bit, "pager poisoned");
        self.err_mask |= bit;
    }

    fn acquire_lock(&mut self, level: LockLevel) -> Result<()> {
        if self.mem_db {
            return Ok(());
        }
        let mut attempt = 0u32;
        loop {
            let file = self.file.as_mut().expect("database file is open");
            match file.lock(level) {
                Ok(()) => {
                    tracing::debug!(?level, attempt, "lock acquired");
                    return Ok(());
                }
                Err(CaskError::Busy) => {
                    if self.busy_handler.retry(attempt) {
                        attempt += 1;
                        continue;
                    }
                    return Err(CaskError::Busy);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn ensure_shared_lock(&mut self) -> Result<()> {
        if self.state != PagerState::Unlock {
            return Ok(());
        }
        if self.mem_db {
            self.state = PagerState::Shared;
            return Ok(());
        }
        self.acquire_lock(LockLevel::Shared)?;
        self.state = PagerState::Shared;

        if self.vfs.exists(&self.journal_path) {
            let held_elsewhere = self
                .file
                .as_mut()
                .expect("database file is open")
                .check_reserved_lock()?;
            if !held_elsewhere {
                self.recover_hot_journal()?;
            }
        }
        Ok(())
    }

    fn recover_hot_journal(&mut self) -> Result<()> {
        tracing::info!(path = %self.journal_path.display(), "recovering hot journal");
        self.acquire_lock(LockLevel::Exclusive)?;
        self.state = PagerState::Exclusive;
        self.replay_journal_into()?;
        self.clear_transaction_bits();
        self.vfs.delete(&self.journal_path)?;
        if let Some(file) = self.file.as_mut() {
            file.unlock(LockLevel::Shared)?;
        }
        self.state = PagerState::Shared;
        Ok(())
    }

    fn escalate_to_reserved(&mut self) -> Result<()> {
        self.ensure_shared_lock()?;
        if self.state >= PagerState::Reserved {
            return Ok(());
        }
        self.acquire_lock(LockLevel::Reserved)?;
        self.orig_db_size = self.db_size;
        self.state = PagerState::Reserved;
        self.in_journal_bits = vec![false; self.orig_db_size as usize];
        if !self.mem_db {
            self.open_new_journal()?;
            if self.orig_db_size > 0 {
                self.preload_and_journal_page1()?;
            }
        }
        tracing::debug!(orig_db_size = self.orig_db_size, "entered reserved state");
        Ok(())
    }

    fn open_new_journal(&mut self) -> Result<()> {
        let mut seed_buf = [0u8; 4];
        self.vfs.randomness(&mut seed_buf);
        let seed = u32::from_be_bytes(seed_buf);
        let file = self.vfs.open_exclusive(&self.journal_path, false)?;
        let journal = Journal::create(
            file,
            seed,
            self.orig_db_size,
            self.active_master_name.clone(),
            self.page_size.as_usize(),
        )?;
        self.journal = Some(journal);
        // The journal's directory entry must itself survive a crash, or a
        // reopen after power loss could fail to see the journal that would
        // have told it to recover (§6 `open_directory`).
        if !self.safety_level.no_sync() {
            self.vfs.open_directory(&self.journal_path)?.sync()?;
        }
        Ok(())
    }

    fn preload_and_journal_page1(&mut self) -> Result<()> {
        self.load_and_journal_preimage(PageNumber::ONE)?;
        Ok(())
    }

    /// Bring `pgno` into cache if it is not already there, and ensure
    /// its pre-image is journaled, without leaving a stray pin behind.
    fn load_and_journal_preimage(&mut self, pgno: PageNumber) -> Result<usize> {
        let (slot, fresh) = match self.cache.lookup(pgno) {
            Some(s) => (s, false),
            None => {
                let data = self.read_page_from_db(pgno)?;
                let s = if self.cache.has_capacity() {
                    self.cache.alloc(pgno, data)
                } else {
                    self.make_room_and_install(pgno, data)?
                };
                self.restore_journal_bits(pgno, s);
                (s, true)
            }
        };
        self.journal_preimage_if_needed(slot)?;
        if fresh {
            self.cache.unpin(slot);
        }
        Ok(slot)
    }

    /// Layered write-mark responsibilities from §4.3, steps 1 and 2
    /// (step 3, marking dirty, is the caller's job).
    fn journal_preimage_if_needed(&mut self, slot: usize) -> Result<()> {
        let pgno = self.cache.frame(slot).pgno;

        if self.mem_db {
            let data = self.cache.frame(slot).data.clone();
            self.history.note_write(pgno, &data, self.stmt_active);
            return Ok(());
        }

        let already_journaled = self.cache.frame(slot).in_journal;
        if !already_journaled && pgno.get() <= self.orig_db_size {
            let mut data = self.cache.frame(slot).data.to_vec();
            self.codec_transform(&mut data, pgno, CodecMode::EncodeForJournal);
            let journal = self
                .journal
                .as_mut()
                .ok_or_else(|| CaskError::internal("journal not open during write-mark"))?;
            journal.append(pgno, &data)?;
            let frame = self.cache.frame_mut(slot);
            frame.in_journal = true;
            frame.needs_sync = !self.safety_level.no_sync();
            if let Some(bit) = self.in_journal_bits.get_mut(pgno.get() as usize - 1) {
                *bit = true;
            }
        } else if pgno.get() > self.orig_db_size {
            // Pages beyond the pre-transaction size need no pre-image, but
            // the journal header itself is not yet durably synced, so the
            // page must not reach the database file ahead of it.
            self.cache.frame_mut(slot).needs_sync = !self.safety_level.no_sync();
        }

        if self.stmt_journal.is_some() {
            let in_stmt = self.cache.frame(slot).in_stmt;
            if !in_stmt && pgno.get() <= self.stmt_size {
                let data = self.cache.frame(slot).data.to_vec();
                self.stmt_journal.as_mut().unwrap().append(pgno, &data)?;
                self.cache.frame_mut(slot).in_stmt = true;
                if let Some(bit) = self.in_stmt_bits.get_mut(pgno.get() as usize - 1) {
                    *bit = true;
                }
            }
        }
        Ok(())
    }

    fn commit_inner(&mut self) -> Result<()> {
        if self.mem_db {
            self.history.clear();
            self.active_master_name = None;
        } else {
            if self.db_size > 0 {
                self.bump_change_counter()?;
            }
            if let Some(journal) = self.journal.as_mut() {
                if self.safety_level.full_sync() {
                    journal.sync_full()?;
                } else if !self.safety_level.no_sync() {
                    journal.sync_normal()?;
                }
            }
            self.cache.clear_needs_sync_all();

            let dirty: Vec<usize> = self
                .cache
                .slot_indices()
                .filter(|&s| self.cache.frame(s).dirty)
                .collect();
            for slot in dirty {
                self.flush_frame(slot)?;
            }

            if let Some(new_count) = self.pending_truncate.take() {
                if let Some(file) = self.file.as_mut() {
                    file.truncate(u64::from(new_count) * u64::from(self.page_size.get()))?;
                }
            }

            if let Some(file) = self.file.as_mut() {
                if !self.safety_level.no_sync() {
                    file.sync()?;
                }
            }
            self.state = PagerState::Synced;
            self.delete_journal_and_master()?;
        }
        self.clear_transaction_bits();
        tracing::info!(db_size = self.db_size, "transaction committed");
        self.release_to_shared()
    }

    fn bump_change_counter(&mut self) -> Result<()> {
        let pgno = PageNumber::ONE;
        let slot = self.load_and_journal_preimage(pgno)?;
        let frame = self.cache.frame_mut(slot);
        let counter =
            u32::from_be_bytes(frame.data[CHANGE_COUNTER_OFFSET..CHANGE_COUNTER_OFFSET + 4].try_into().unwrap());
        frame.data[CHANGE_COUNTER_OFFSET..CHANGE_COUNTER_OFFSET + 4]
            .copy_from_slice(&counter.wrapping_add(1).to_be_bytes());
        frame.dirty = true;
        Ok(())
    }

    fn rollback_inner(&mut self) -> Result<()> {
        if self.mem_db {
            let restores = self.history.take_for_rollback();
            for (pgno, data) in restores {
                self.install_restored_page(pgno, data);
            }
            self.db_size = self.orig_db_size;
            self.active_master_name = None;
        } else if self.state == PagerState::Reserved {
            self.discard_dirty_pages_from_disk()?;
            self.db_size = self.orig_db_size;
        } else {
            self.replay_journal_into()?;
        }

        self.clear_transaction_bits();

        if !self.mem_db {
            self.journal = None;
            self.vfs.delete(&self.journal_path)?;
            if let Some(master) = self.active_master_name.take() {
                let master_path = bytes_to_path(&master);
                try_delete_master(&self.vfs, &master_path, self.page_size.as_usize())?;
            }
        }
        tracing::info!(db_size = self.db_size, "transaction rolled back");
        self.release_to_shared()
    }

    fn discard_dirty_pages_from_disk(&mut self) -> Result<()> {
        let slots: Vec<usize> = self.cache.slot_indices().collect();
        for slot in slots {
            let (pgno, dirty) = {
                let frame = self.cache.frame(slot);
                (frame.pgno, frame.dirty)
            };
            if !dirty || pgno.get() > self.orig_db_size {
                continue;
            }
            let fresh = self.read_page_from_db(pgno)?;
            self.install_restored_page(pgno, fresh);
        }
        Ok(())
    }

    /// Shared recovery routine for both the hot-journal-at-open path and
    /// the EXCLUSIVE/SYNCED rollback path (§4.4 steps 1-7). Leaves the
    /// journal in place; the caller deletes it once this returns `Ok`.
    fn replay_journal_into(&mut self) -> Result<()> {
        let file = self.vfs.open_read_only(&self.journal_path)?;
        let (header, mut reader) = JournalReader::open(file, self.page_size.as_usize())?;

        if let Some(master_name) = &header.master_name {
            let master_path = bytes_to_path(master_name);
            if !self.vfs.exists(&master_path) {
                tracing::info!("stale journal references a resolved master, skipping replay");
                return Ok(());
            }
        }

        let mx_pg = header.orig_page_count;
        if let Some(file) = self.file.as_mut() {
            file.truncate(u64::from(mx_pg) * u64::from(self.page_size.get()))?;
        }

        while let Some((pgno, mut data)) = reader.next_record()? {
            if pgno.get() > mx_pg {
                continue;
            }
            self.codec_transform(&mut data, pgno, CodecMode::DecodeFromJournal);
            self.write_page_to_db(pgno, &data)?;
            self.install_restored_page(pgno, PageData::from_vec(data));
        }

        self.db_size = mx_pg;
        self.orig_db_size = mx_pg;
        Ok(())
    }

    fn read_main_journal_tail_reversed(
        &mut self,
        from_record: u32,
        to_record: u32,
    ) -> Result<Vec<(PageNumber, PageData)>> {
        let file = self.vfs.open_read_only(&self.journal_path)?;
        let (_, mut reader) = JournalReader::open(file, self.page_size.as_usize())?;
        let mut collected = Vec::new();
        let mut idx = 0u32;
        while let Some((pgno, data)) = reader.next_record()? {
            if idx >= from_record && idx < to_record {
                collected.push((pgno, PageData::from_vec(data)));
            }
            idx += 1;
        }
        collected.reverse();
        Ok(collected)
    }

    fn install_restored_page(&mut self, pgno: PageNumber, mut data: PageData) {
        if let Some(slot) = self.cache.lookup(pgno) {
            if let Some(reiniter) = self.reiniter.as_mut() {
                reiniter(&mut data, pgno);
            }
            self.cache.frame_mut(slot).data = data;
            self.cache.frame_mut(slot).dirty = false;
        }
    }

    fn delete_journal_and_master(&mut self) -> Result<()> {
        self.journal = None;
        self.vfs.delete(&self.journal_path)?;
        if let Some(master) = self.active_master_name.take() {
            let master_path = bytes_to_path(&master);
            try_delete_master(&self.vfs, &master_path, self.page_size.as_usize())?;
        }
        Ok(())
    }

    fn clear_transaction_bits(&mut self) {
        for slot in self.cache.slot_indices().collect::<Vec<_>>() {
            let frame = self.cache.frame_mut(slot);
            frame.dirty = false;
            frame.in_journal = false;
            frame.in_stmt = false;
            frame.needs_sync = false;
        }
        self.in_journal_bits.clear();
        self.in_stmt_bits.clear();
        self.dirty_cache = false;
        self.stmt_journal = None;
        self.stmt_journal_mark = 0;
        self.stmt_size = 0;
        self.stmt_active = false;
        self.pending_truncate = None;
    }

    fn release_to_shared(&mut self) -> Result<()> {
        if !self.mem_db {
            if let Some(file) = self.file.as_mut() {
                file.unlock(LockLevel::Shared)?;
            }
        }
        self.state = PagerState::Shared;
        if self.total_refs == 0 {
            self.release_to_unlock()?;
        }
        Ok(())
    }

    fn release_to_unlock(&mut self) -> Result<()> {
        if !self.mem_db {
            if let Some(file) = self.file.as_mut() {
                file.unlock(LockLevel::None)?;
            }
        }
        self.state = PagerState::Unlock;
        Ok(())
    }

    fn flush_frame(&mut self, slot: usize) -> Result<()> {
        if self.state < PagerState::Exclusive {
            self.acquire_lock(LockLevel::Exclusive)?;
            self.state = PagerState::Exclusive;
        }
        debug_assert!(
            !self.cache.frame(slot).needs_sync,
            "flushing a frame whose journal record is not yet synced"
        );
        let (pgno, data) = {
            let frame = self.cache.frame(slot);
            (frame.pgno, frame.data.to_vec())
        };
        self.write_page_to_db(pgno, &data)?;
        self.cache.frame_mut(slot).dirty = false;
        Ok(())
    }

    fn make_room_and_install(&mut self, pgno: PageNumber, data: PageData) -> Result<usize> {
        let victim = match self.cache.pick_victim() {
            Some(v) => v,
            None => {
                self.force_journal_sync()?;
                self.cache.clear_needs_sync_all();
                self.cache
                    .pick_victim()
                    .ok_or_else(|| CaskError::internal("no evictable frame after forced sync"))?
            }
        };
        if self.cache.frame(victim).dirty {
            self.flush_frame(victim)?;
        }
        if self.cache.frame(victim).always_rollback {
            self.always_rollback = true;
        }
        if let Some(destructor) = self.destructor.as_mut() {
            let frame = self.cache.frame(victim);
            let mut snapshot = frame.data.clone();
            destructor(&mut snapshot, frame.pgno);
        }
        self.cache.reuse_slot(victim, pgno, data);
        Ok(victim)
    }

    fn force_journal_sync(&mut self) -> Result<()> {
        if self.mem_db {
            return Ok(());
        }
        if let Some(journal) = self.journal.as_mut() {
            tracing::debug!("forcing journal sync to make room in the cache");
            if self.safety_level.full_sync() {
                journal.sync_full()?;
            } else {
                journal.sync_normal()?;
            }
        }
        Ok(())
    }

    fn codec_transform(&mut self, buf: &mut [u8], pgno: PageNumber, mode: CodecMode) {
        if let Some(codec) = self.codec.as_mut() {
            match mode {
                CodecMode::EncodeForDb | CodecMode::EncodeForJournal => codec.encode(buf, pgno, mode),
                CodecMode::DecodeFromDb | CodecMode::DecodeFromJournal => codec.decode(buf, pgno, mode),
            }
        }
    }

    fn read_page_from_db(&mut self, pgno: PageNumber) -> Result<PageData> {
        let page_size = self.page_size.as_usize();
        let mut buf = vec![0u8; page_size];
        if let Some(file) = self.file.as_mut() {
            let offset = pgno.offset(self.page_size.get());
            file.read_at(&mut buf, offset)?;
        }
        self.codec_transform(&mut buf, pgno, CodecMode::DecodeFromDb);
        Ok(PageData::from_vec(buf))
    }

    fn write_page_to_db(&mut self, pgno: PageNumber, data: &[u8]) -> Result<()> {
        let mut buf = data.to_vec();
        self.codec_transform(&mut buf, pgno, CodecMode::EncodeForDb);
        if let Some(file) = self.file.as_mut() {
            let offset = pgno.offset(self.page_size.get());
            file.write_at(&buf, offset)?;
        }
        Ok(())
    }
}

fn bytes_to_path(raw: &[u8]) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(raw).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cask_vfs::MemoryVfs;

    fn open_disk(vfs: &MemoryVfs, path: &str, initial_pages: u32, page_size: usize) {
        let f = vfs.open_read_write(Path::new(path)).unwrap();
        drop(f);
        let mut f = vfs.open_read_write(Path::new(path)).unwrap();
        f.write_at(&vec![0xAAu8; initial_pages as usize * page_size], 0)
            .unwrap();
    }

    fn pn(n: u32) -> PageNumber {
        PageNumber::new(n).unwrap()
    }

    #[test]
    fn single_page_commit_flips_the_byte_and_bumps_the_counter() {
        let vfs = MemoryVfs::new();
        open_disk(&vfs, "/db", 1, 512);
        let opts = OpenOptions::new().with_page_size(PageSize::new(512).unwrap());
        let mut pager = Pager::open(vfs.clone(), "/db", opts).unwrap();

        pager.begin(None).unwrap();
        let page = pager.get(pn(1)).unwrap();
        pager.write(page).unwrap();
        pager.page_data_mut(page)[0] = 0xBB;
        pager.commit().unwrap();

        let mut f = vfs.open_read_only(Path::new("/db")).unwrap();
        let mut buf = [0u8; 512];
        f.read_at(&mut buf, 0).unwrap();
        assert_eq!(buf[0], 0xBB);
        assert_eq!(
            u32::from_be_bytes(buf[CHANGE_COUNTER_OFFSET..CHANGE_COUNTER_OFFSET + 4].try_into().unwrap()),
            1
        );
        assert!(!vfs.exists(Path::new("/db-journal")));
    }

    #[test]
    fn rollback_restores_original_bytes() {
        let vfs = MemoryVfs::new();
        open_disk(&vfs, "/db", 1, 512);
        let opts = OpenOptions::new().with_page_size(PageSize::new(512).unwrap());
        let mut pager = Pager::open(vfs.clone(), "/db", opts).unwrap();

        pager.begin(None).unwrap();
        let page = pager.get(pn(1)).unwrap();
        pager.write(page).unwrap();
        pager.page_data_mut(page)[0] = 0xBB;
        pager.rollback().unwrap();

        let mut f = vfs.open_read_only(Path::new("/db")).unwrap();
        let mut buf = [0u8; 512];
        f.read_at(&mut buf, 0).unwrap();
        assert_eq!(buf[0], 0xAA);
        assert_eq!(
            u32::from_be_bytes(buf[CHANGE_COUNTER_OFFSET..CHANGE_COUNTER_OFFSET + 4].try_into().unwrap()),
            0
        );
    }

    #[test]
    fn stmt_rollback_restores_only_statement_scope() {
        let vfs = MemoryVfs::new();
        open_disk(&vfs, "/db", 2, 512);
        let opts = OpenOptions::new().with_page_size(PageSize::new(512).unwrap());
        let mut pager = Pager::open(vfs, "/db", opts).unwrap();

        pager.begin(None).unwrap();
        let p1 = pager.get(pn(1)).unwrap();
        pager.write(p1).unwrap();
        pager.page_data_mut(p1)[0] = b'A';

        pager.stmt_begin().unwrap();
        pager.write(p1).unwrap();
        pager.page_data_mut(p1)[0] = b'B';
        let p2 = pager.get(pn(2)).unwrap();
        pager.write(p2).unwrap();
        pager.page_data_mut(p2)[0] = b'C';

        pager.stmt_rollback().unwrap();

        assert_eq!(pager.page_data(p1)[0], b'A');
        assert_eq!(pager.page_data(p2)[0], 0xAA);
        assert!(pager.state().is_writing());
    }

    #[test]
    fn memory_mode_commit_and_rollback_round_trip() {
        let vfs = MemoryVfs::new();
        let opts = OpenOptions::new().with_page_size(PageSize::new(512).unwrap());
        let mut pager = Pager::open(vfs, MEMORY_DB_SENTINEL, opts).unwrap();

        pager.begin(None).unwrap();
        let page = pager.get(pn(1)).unwrap();
        pager.write(page).unwrap();
        pager.page_data_mut(page)[0] = 7;
        pager.commit().unwrap();
        assert_eq!(pager.page_data(page)[0], 7);

        pager.begin(None).unwrap();
        let page = pager.get(pn(1)).unwrap();
        pager.write(page).unwrap();
        pager.page_data_mut(page)[0] = 99;
        pager.rollback().unwrap();
        assert_eq!(pager.page_data(page)[0], 7);
    }

    #[test]
    fn evicting_a_dirty_page_forces_a_journal_sync_first() {
        let vfs = MemoryVfs::new();
        open_disk(&vfs, "/db", 4, 512);
        let opts = OpenOptions::new()
            .with_page_size(PageSize::new(512).unwrap())
            .with_cache_capacity(1);
        let mut pager = Pager::open(vfs, "/db", opts).unwrap();

        pager.begin(None).unwrap();
        for i in 1..=4u32 {
            let page = pager.get(pn(i)).unwrap();
            pager.write(page).unwrap();
            pager.page_data_mut(page)[0] = i as u8;
            pager.unref(page).unwrap();
        }
        pager.commit().unwrap();
    }

    #[test]
    fn write_without_read_only_on_a_read_only_pager_is_rejected() {
        let vfs = MemoryVfs::new();
        open_disk(&vfs, "/db", 1, 512);
        let opts = OpenOptions::new()
            .with_page_size(PageSize::new(512).unwrap())
            .read_only(true);
        let mut pager = Pager::open(vfs, "/db", opts).unwrap();
        let page = pager.get(pn(1)).unwrap();
        assert!(matches!(pager.write(page), Err(CaskError::ReadOnly)));
    }

    #[test]
    fn dont_write_clears_dirty_for_an_ordinary_page() {
        let vfs = MemoryVfs::new();
        open_disk(&vfs, "/db", 2, 512);
        let opts = OpenOptions::new().with_page_size(PageSize::new(512).unwrap());
        let mut pager = Pager::open(vfs, "/db", opts).unwrap();

        pager.begin(None).unwrap();
        let page1 = pager.get(pn(1)).unwrap();
        pager.write(page1).unwrap();
        pager.dont_write(pn(1));

        let slot = pager.cache.lookup(pn(1)).unwrap();
        assert!(!pager.cache.frame(slot).dirty);
        assert!(pager.cache.frame(slot).always_rollback);
    }

    #[test]
    fn dont_write_keeps_dirty_for_the_last_page_of_a_grown_file() {
        let vfs = MemoryVfs::new();
        open_disk(&vfs, "/db", 1, 512);
        let opts = OpenOptions::new().with_page_size(PageSize::new(512).unwrap());
        let mut pager = Pager::open(vfs, "/db", opts).unwrap();

        pager.begin(None).unwrap();
        let page2 = pager.get(pn(2)).unwrap();
        pager.write(page2).unwrap();
        assert_eq!(pager.db_size(), 2);

        pager.dont_write(pn(2));

        let slot = pager.cache.lookup(pn(2)).unwrap();
        assert!(
            pager.cache.frame(slot).dirty,
            "the last page of a file that grew this transaction must still be written"
        );
        assert!(pager.cache.frame(slot).always_rollback);
    }

    #[test]
    fn dont_rollback_fakes_in_journal_for_an_unwritten_existing_page() {
        let vfs = MemoryVfs::new();
        open_disk(&vfs, "/db", 2, 512);
        let opts = OpenOptions::new().with_page_size(PageSize::new(512).unwrap());
        let mut pager = Pager::open(vfs, "/db", opts).unwrap();

        pager.begin(None).unwrap();
        let page1 = pager.get(pn(1)).unwrap();
        pager.write(page1).unwrap();
        // Simulate the lock upgrade a real flush would have caused; this
        // repo's pager only reaches Exclusive on the first flush, which
        // `dont_rollback` requires (it only matters once pages are about
        // to be written back).
        pager.state = PagerState::Exclusive;

        let page2 = pager.get(pn(2)).unwrap();
        let slot2 = pager.cache.lookup(pn(2)).unwrap();
        assert!(!pager.cache.frame(slot2).in_journal);

        pager.dont_rollback(page2);

        assert!(
            pager.cache.frame(slot2).in_journal,
            "dont_rollback should fake in_journal for an unjournaled existing page"
        );

        // A later write() must not re-journal the page now that in_journal
        // is (fakely) set.
        pager.write(page2).unwrap();
        pager.page_data_mut(page2)[0] = 0x42;
        pager.unref(page2).unwrap();
    }
}
