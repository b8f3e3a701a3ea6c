//! Dirty-page list: per-transaction map pgno -> in-memory page (spec §4.5).
//!
//! The teacher/original keep this lazily sorted so the hot insert path
//! stays O(1) and sorts are batched before commit-time operations that
//! need ordering (spill victim selection, write-out). We mirror that:
//! `insert` appends; `sort()` normalizes; `find` does a linear scan over
//! the unsorted tail plus a binary search over the sorted prefix.

use crate::pnl::{Pgno, Pnl};
use std::collections::HashMap;

/// A page owned by the current write transaction, buffered outside the
/// mmap until commit writes it out (or, under WRITEMAP, already a view
/// into the map that the txn has exclusive license to mutate).
#[derive(Debug, Clone)]
pub struct DirtyPage {
    pub pgno: Pgno,
    pub data: Vec<u8>,
    /// Number of pages this entry spans; >1 only for the head page of a
    /// LARGE (overflow) run.
    pub npages: u32,
    /// Monotonically increasing touch counter, used as an LRU proxy for
    /// spill victim selection (spec §4.10).
    pub dirtylru: u64,
}

#[derive(Debug, Default, Clone)]
pub struct Dpl {
    entries: Vec<DirtyPage>,
    index: HashMap<Pgno, usize>,
    sorted: bool,
    /// Sum of `npages` across all entries (spec §4.5 invariant: must
    /// equal `pages_including_loose`).
    pages_including_loose: u64,
    touch_clock: u64,
}

impl Dpl {
    pub fn new() -> Self {
        Dpl::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn pages_including_loose(&self) -> u64 {
        self.pages_including_loose
    }

    fn rebuild_index(&mut self) {
        self.index.clear();
        self.index.reserve(self.entries.len());
        for (i, e) in self.entries.iter().enumerate() {
            self.index.insert(e.pgno, i);
        }
    }

    pub fn insert(&mut self, pgno: Pgno, data: Vec<u8>, npages: u32) {
        debug_assert!(!self.index.contains_key(&pgno), "pgno {pgno} already dirty");
        self.touch_clock += 1;
        let idx = self.entries.len();
        self.entries.push(DirtyPage {
            pgno,
            data,
            npages,
            dirtylru: self.touch_clock,
        });
        self.index.insert(pgno, idx);
        self.pages_including_loose += npages as u64;
        self.sorted = false;
    }

    pub fn find(&self, pgno: Pgno) -> Option<&DirtyPage> {
        self.index.get(&pgno).map(|&i| &self.entries[i])
    }

    pub fn find_mut(&mut self, pgno: Pgno) -> Option<&mut DirtyPage> {
        if let Some(&i) = self.index.get(&pgno) {
            self.touch_clock += 1;
            let lru = self.touch_clock;
            let e = &mut self.entries[i];
            e.dirtylru = lru;
            Some(e)
        } else {
            None
        }
    }

    pub fn contains(&self, pgno: Pgno) -> bool {
        self.index.contains_key(&pgno)
    }

    pub fn npages(&self, pgno: Pgno) -> Option<u32> {
        self.find(pgno).map(|e| e.npages)
    }

    /// Remove a single entry after its page was retired (COW'd away) or
    /// spilled (`wash` in spec.md).
    pub fn wash(&mut self, pgno: Pgno) -> Option<DirtyPage> {
        let idx = self.index.remove(&pgno)?;
        let removed = self.entries.swap_remove(idx);
        self.pages_including_loose -= removed.npages as u64;
        if idx < self.entries.len() {
            // swap_remove moved the tail entry into `idx`; index must follow.
            self.index.insert(self.entries[idx].pgno, idx);
        }
        self.sorted = false;
        Some(removed)
    }

    pub fn sort(&mut self) {
        if self.sorted {
            return;
        }
        self.entries.sort_unstable_by_key(|e| e.pgno);
        self.rebuild_index();
        self.sorted = true;
    }

    /// `sift`: remove every entry whose pgno appears in `pnl` (used when
    /// retired/reclaimed pages must be dropped from the dirty list
    /// during nested-txn merge or abort).
    pub fn sift(&mut self, pnl: &Pnl) {
        if pnl.is_empty() {
            return;
        }
        let mut removed_pages = 0u64;
        self.entries.retain(|e| {
            if pnl.contains(e.pgno) {
                removed_pages += e.npages as u64;
                false
            } else {
                true
            }
        });
        self.pages_including_loose -= removed_pages;
        self.rebuild_index();
    }

    pub fn iter(&self) -> impl Iterator<Item = &DirtyPage> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut DirtyPage> {
        self.entries.iter_mut()
    }

    /// Pick the least-recently-touched entries as spill victims, up to
    /// `want` pages worth (spec §4.10).
    pub fn spill_victims(&self, want_pages: u64) -> Vec<Pgno> {
        let mut by_lru: Vec<&DirtyPage> = self.entries.iter().collect();
        by_lru.sort_unstable_by_key(|e| e.dirtylru);
        let mut acc = 0u64;
        let mut out = Vec::new();
        for e in by_lru {
            if acc >= want_pages {
                break;
            }
            out.push(e.pgno);
            acc += e.npages as u64;
        }
        out
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
        self.pages_including_loose = 0;
        self.sorted = true;
    }
}
