//! Loose-page and spill bookkeeping (spec §4.10).
//!
//! Loose pages (pages freed and re-eligible for reuse within the same
//! txn) already live as a plain LIFO `Vec<Pgno>` on `WriteTxn` — the
//! allocator (`gc::allocator::allocate`) pops from it before ever
//! reaching the file-extension path, matching "allocation prefers loose
//! pages (LIFO) for cache locality". That Vec stands in for spec.md's
//! singly-linked list threaded through page headers: same LIFO order,
//! no header pointer needed since the whole list already lives in
//! memory for the txn's lifetime.
//!
//! This module owns the other half: spilling dirty pages out to the
//! file when the in-memory dirty list grows past budget, and the
//! `spilled.list` bookkeeping spec.md describes (pgno-shifted entries,
//! LSB marks a logically-removed one, `purge` compacts).

use crate::dpl::Dpl;
use crate::error::Result;
use crate::pnl::Pgno;

/// `spilled.list`: each live entry is `pgno << 1`; setting the LSB marks
/// an entry logically removed without the cost of shifting the vector,
/// the way spec.md's `spill_purge` is described as a deferred compaction.
#[derive(Debug, Default, Clone)]
pub struct SpillList {
    entries: Vec<u64>,
}

impl SpillList {
    pub fn new() -> Self {
        SpillList::default()
    }

    pub fn push(&mut self, pgno: Pgno) {
        self.entries.push(pgno << 1);
    }

    pub fn contains(&self, pgno: Pgno) -> bool {
        self.entries.iter().any(|&e| e & 1 == 0 && e >> 1 == pgno)
    }

    /// Mark `pgno`'s entry logically removed (the page was re-dirtied and
    /// is no longer purely a spilled/on-disk shadow). No-op if absent.
    pub fn unmark(&mut self, pgno: Pgno) {
        for e in self.entries.iter_mut() {
            if *e & 1 == 0 && *e >> 1 == pgno {
                *e |= 1;
                return;
            }
        }
    }

    /// Drop every logically-removed entry, compacting the vector.
    pub fn purge(&mut self) {
        self.entries.retain(|&e| e & 1 == 0);
    }

    pub fn live_count(&self) -> usize {
        self.entries.iter().filter(|&&e| e & 1 == 0).count()
    }
}

/// What spilling needs from the owning write transaction: the dirty
/// list to pick victims from, a page-size-aware way to write a victim's
/// bytes straight to the file (bypassing the dirty list, since a
/// spilled page is no longer "dirty-in-memory"), and the spill list to
/// record into.
pub trait SpillSource {
    fn pagesize(&self) -> usize;
    fn dpl_mut(&mut self) -> &mut Dpl;
    fn spilled_mut(&mut self) -> &mut SpillList;
    fn write_through(&mut self, pgno: Pgno, data: &[u8]) -> Result<()>;
}

/// If the dirty list (counting loose-page-sized entries) exceeds
/// `limit_pages`, write out least-recently-touched dirty pages until
/// back under budget (spec §4.10 "when dirty_room is exhausted").
pub fn maybe_spill(src: &mut impl SpillSource, limit_pages: u64) -> Result<()> {
    let pagesize = src.pagesize();
    let total = src.dpl_mut().pages_including_loose();
    if total <= limit_pages {
        return Ok(());
    }
    let want = total - limit_pages;
    let victims = src.dpl_mut().spill_victims(want);
    for pgno in victims {
        let Some(dp) = src.dpl_mut().find(pgno).cloned() else { continue };
        for i in 0..dp.npages as u64 {
            let start = i as usize * pagesize;
            let end = (start + pagesize).min(dp.data.len());
            src.write_through(pgno + i, &dp.data[start..end])?;
        }
        src.dpl_mut().wash(pgno);
        src.spilled_mut().push(pgno);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    struct FakeTxn {
        dpl: Dpl,
        spilled: SpillList,
        pagesize: usize,
        written: RefCell<HashMap<Pgno, Vec<u8>>>,
    }

    impl SpillSource for FakeTxn {
        fn pagesize(&self) -> usize {
            self.pagesize
        }
        fn dpl_mut(&mut self) -> &mut Dpl {
            &mut self.dpl
        }
        fn spilled_mut(&mut self) -> &mut SpillList {
            &mut self.spilled
        }
        fn write_through(&mut self, pgno: Pgno, data: &[u8]) -> Result<()> {
            self.written.borrow_mut().insert(pgno, data.to_vec());
            Ok(())
        }
    }

    #[test]
    fn spill_list_marks_and_purges() {
        let mut list = SpillList::new();
        list.push(3);
        list.push(7);
        assert!(list.contains(3));
        assert!(list.contains(7));
        assert_eq!(list.live_count(), 2);

        list.unmark(3);
        assert!(!list.contains(3));
        assert_eq!(list.live_count(), 1);

        list.purge();
        assert_eq!(list.live_count(), 1);
        assert!(list.contains(7));
    }

    #[test]
    fn under_budget_spills_nothing() {
        let mut txn = FakeTxn {
            dpl: Dpl::new(),
            spilled: SpillList::new(),
            pagesize: 64,
            written: RefCell::new(HashMap::new()),
        };
        txn.dpl.insert(1, vec![0u8; 64], 1);
        maybe_spill(&mut txn, 10).unwrap();
        assert!(txn.dpl.find(1).is_some());
        assert_eq!(txn.spilled.live_count(), 0);
    }

    #[test]
    fn over_budget_spills_lru_victims_and_washes_them() {
        let mut txn = FakeTxn {
            dpl: Dpl::new(),
            spilled: SpillList::new(),
            pagesize: 16,
            written: RefCell::new(HashMap::new()),
        };
        txn.dpl.insert(1, vec![1u8; 16], 1);
        txn.dpl.insert(2, vec![2u8; 16], 1);
        txn.dpl.insert(3, vec![3u8; 16], 1);
        // Touch 2 and 3 so 1 is the least-recently-touched victim.
        txn.dpl.find_mut(2);
        txn.dpl.find_mut(3);

        maybe_spill(&mut txn, 2).unwrap();

        assert!(txn.dpl.find(1).is_none(), "victim must be washed out of the dirty list");
        assert!(txn.dpl.find(2).is_some());
        assert!(txn.dpl.find(3).is_some());
        assert!(txn.spilled.contains(1));
        assert_eq!(txn.written.borrow().get(&1), Some(&vec![1u8; 16]));
    }

    #[test]
    fn spill_writes_every_page_of_a_large_run() {
        let mut txn = FakeTxn {
            dpl: Dpl::new(),
            spilled: SpillList::new(),
            pagesize: 8,
            written: RefCell::new(HashMap::new()),
        };
        // A 2-page LARGE run at pgno 10, plus an unrelated single page
        // kept fresher so only the run is chosen as the victim.
        txn.dpl.insert(10, vec![9u8; 16], 2);
        txn.dpl.insert(100, vec![0u8; 8], 1);
        txn.dpl.find_mut(100);

        maybe_spill(&mut txn, 1).unwrap();

        assert!(txn.written.borrow().contains_key(&10), "run's head page must be written");
        assert!(txn.written.borrow().contains_key(&11), "run's second physical page must be written too");
        assert_eq!(txn.written.borrow().get(&11).unwrap().len(), 8);
        assert!(txn.dpl.find(100).is_some(), "unrelated fresher page must not be spilled");
    }
}
