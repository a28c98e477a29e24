//! Page cache: hash index plus an intrusive LRU list threaded through
//! the frame arena by slot index (§4.2, §9 "arena+index").
//!
//! The arena only ever grows, up to `capacity`; once full, frames are
//! reused in place by [`PageCache::reuse_slot`]. A frame is a member of
//! the LRU list exactly while its `ref_count` is zero. `synced_hint`
//! caches the last slot found safe to evict so repeated evictions don't
//! always rescan the whole list from the tail.

use hashbrown::HashMap;

use cask_types::{PageData, PageNumber};

use crate::frame::Frame;

pub struct PageCache {
    capacity: usize,
    slots: Vec<Frame>,
    index: HashMap<PageNumber, usize>,
    lru_head: Option<usize>,
    lru_tail: Option<usize>,
    synced_hint: Option<usize>,
}

impl PageCache {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            slots: Vec::new(),
            index: HashMap::new(),
            lru_head: None,
            lru_tail: None,
            synced_hint: None,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Cache-only probe: does not pin, does not count as a use.
    #[must_use]
    pub fn lookup(&self, pgno: PageNumber) -> Option<usize> {
        self.index.get(&pgno).copied()
    }

    #[must_use]
    pub fn frame(&self, slot: usize) -> &Frame {
        &self.slots[slot]
    }

    pub fn frame_mut(&mut self, slot: usize) -> &mut Frame {
        &mut self.slots[slot]
    }

    /// Acquire a reference to an already-cached frame, unlinking it
    /// from the LRU list if it was previously unreferenced.
    pub fn pin(&mut self, slot: usize) {
        let was_free = self.slots[slot].ref_count == 0;
        self.slots[slot].ref_count += 1;
        if was_free {
            self.detach(slot);
        }
    }

    /// Drop a reference; once it reaches zero the frame joins the LRU
    /// list as the most-recently-used entry.
    pub fn unpin(&mut self, slot: usize) {
        debug_assert!(self.slots[slot].ref_count > 0);
        self.slots[slot].ref_count -= 1;
        if self.slots[slot].ref_count == 0 {
            self.push_front(slot);
        }
    }

    #[must_use]
    pub fn has_capacity(&self) -> bool {
        self.slots.len() < self.capacity
    }

    /// Allocate a brand-new frame for `pgno`; only valid while
    /// `has_capacity` holds. Returns the new slot, already pinned once.
    pub fn alloc(&mut self, pgno: PageNumber, data: PageData) -> usize {
        debug_assert!(self.has_capacity());
        let mut frame = Frame::fresh(pgno, data);
        frame.ref_count = 1;
        let slot = self.slots.len();
        self.slots.push(frame);
        self.index.insert(pgno, slot);
        slot
    }

    /// Pick an eviction victim: the oldest unreferenced frame whose
    /// pre-image is already durably synced. Returns `None` if every
    /// unreferenced frame still needs a journal sync (the caller must
    /// force one via [`Self::clear_needs_sync_all`] and retry).
    pub fn pick_victim(&mut self) -> Option<usize> {
        if let Some(slot) = self.synced_hint {
            if self.slots[slot].ref_count == 0 && !self.slots[slot].needs_sync {
                return Some(slot);
            }
            self.synced_hint = None;
        }

        let mut cursor = self.lru_tail;
        while let Some(slot) = cursor {
            if !self.slots[slot].needs_sync {
                return Some(slot);
            }
            cursor = self.slots[slot].lru_prev;
        }
        None
    }

    /// Reassign an evicted slot to a new page. The slot must currently
    /// be unreferenced and detached from the LRU list (as returned by
    /// [`Self::pick_victim`]); it is pinned once on return.
    pub fn reuse_slot(&mut self, slot: usize, new_pgno: PageNumber, data: PageData) {
        self.detach(slot);
        let old_pgno = self.slots[slot].pgno;
        self.index.remove(&old_pgno);
        self.slots[slot].reset_for_reuse(new_pgno, data);
        self.slots[slot].ref_count = 1;
        self.index.insert(new_pgno, slot);
        if self.synced_hint == Some(slot) {
            self.synced_hint = None;
        }
    }

    /// Called after a forced journal sync clears `needs_sync` pager-wide;
    /// lets the eviction scan start fresh from the true LRU tail.
    pub fn clear_needs_sync_all(&mut self) {
        for frame in &mut self.slots {
            frame.needs_sync = false;
        }
        self.synced_hint = self.lru_tail;
    }

    /// All occupied slots, in arena order (stable, not LRU order).
    pub fn slot_indices(&self) -> impl Iterator<Item = usize> + '_ {
        0..self.slots.len()
    }

    /// Forgets that `pgno` is cached and clears its frame's write-back
    /// flags, so a later lookup can't resurrect stale content and a
    /// later eviction can't flush it. Used when `truncate` shrinks the
    /// database; the frame slot stays in the arena and the LRU list for
    /// `pick_victim` to reclaim.
    pub fn invalidate(&mut self, pgno: PageNumber) {
        if let Some(slot) = self.index.remove(&pgno) {
            let frame = &mut self.slots[slot];
            frame.dirty = false;
            frame.in_journal = false;
            frame.in_stmt = false;
            frame.needs_sync = false;
        }
    }

    fn detach(&mut self, slot: usize) {
        let (prev, next) = (self.slots[slot].lru_prev, self.slots[slot].lru_next);
        match prev {
            Some(p) => self.slots[p].lru_next = next,
            None => self.lru_head = next,
        }
        match next {
            Some(n) => self.slots[n].lru_prev = prev,
            None => self.lru_tail = prev,
        }
        self.slots[slot].lru_prev = None;
        self.slots[slot].lru_next = None;
    }

    fn push_front(&mut self, slot: usize) {
        self.slots[slot].lru_prev = None;
        self.slots[slot].lru_next = self.lru_head;
        if let Some(h) = self.lru_head {
            self.slots[h].lru_prev = Some(slot);
        } else {
            self.lru_tail = Some(slot);
        }
        self.lru_head = Some(slot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(byte: u8) -> PageData {
        let mut d = PageData::zeroed(8);
        d[0] = byte;
        d
    }

    fn pn(n: u32) -> PageNumber {
        PageNumber::new(n).unwrap()
    }

    #[test]
    fn alloc_then_lookup_finds_the_slot() {
        let mut cache = PageCache::new(4);
        let slot = cache.alloc(pn(1), page(0xaa));
        assert_eq!(cache.lookup(pn(1)), Some(slot));
        assert_eq!(cache.frame(slot).ref_count, 1);
    }

    #[test]
    fn unpin_to_zero_makes_frame_evictable() {
        let mut cache = PageCache::new(4);
        let slot = cache.alloc(pn(1), page(1));
        cache.unpin(slot);
        assert_eq!(cache.frame(slot).ref_count, 0);
        assert_eq!(cache.pick_victim(), Some(slot));
    }

    #[test]
    fn pinned_frames_are_never_picked_as_victims() {
        let mut cache = PageCache::new(4);
        let a = cache.alloc(pn(1), page(1));
        let b = cache.alloc(pn(2), page(2));
        cache.unpin(b);
        assert_eq!(cache.pick_victim(), Some(b));
        cache.pin(a);
        assert_eq!(cache.frame(a).ref_count, 2);
    }

    #[test]
    fn victim_search_skips_frames_needing_sync() {
        let mut cache = PageCache::new(4);
        let a = cache.alloc(pn(1), page(1));
        let b = cache.alloc(pn(2), page(2));
        cache.frame_mut(a).needs_sync = true;
        cache.unpin(a);
        cache.unpin(b);
        // `a` is older (unpinned first) but not sync-safe; `b` should win.
        assert_eq!(cache.pick_victim(), Some(b));
    }

    #[test]
    fn no_victim_when_every_unreferenced_frame_needs_sync() {
        let mut cache = PageCache::new(4);
        let a = cache.alloc(pn(1), page(1));
        cache.frame_mut(a).needs_sync = true;
        cache.unpin(a);
        assert_eq!(cache.pick_victim(), None);
        cache.clear_needs_sync_all();
        assert_eq!(cache.pick_victim(), Some(a));
    }

    #[test]
    fn reuse_slot_remaps_the_index() {
        let mut cache = PageCache::new(1);
        let slot = cache.alloc(pn(1), page(1));
        cache.unpin(slot);
        let victim = cache.pick_victim().unwrap();
        cache.reuse_slot(victim, pn(2), page(2));
        assert_eq!(cache.lookup(pn(1)), None);
        assert_eq!(cache.lookup(pn(2)), Some(victim));
        assert_eq!(cache.frame(victim).ref_count, 1);
    }

    #[test]
    fn lru_order_prefers_oldest_released_frame() {
        let mut cache = PageCache::new(4);
        let a = cache.alloc(pn(1), page(1));
        let b = cache.alloc(pn(2), page(2));
        cache.unpin(a);
        cache.unpin(b);
        // `a` was released first, so it's the true LRU tail.
        assert_eq!(cache.pick_victim(), Some(a));
    }
}
