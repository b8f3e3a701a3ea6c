//! GC updater — "rerere", return-retired-to-GC (spec §4.12).
//!
//! Ground truth is `original_source/src/gc-put.c`'s `gc_update` loop:
//! refund trailing unallocated pgnos, merge loose pages, store retired
//! pages (splitting oversized lists across descending-txnid "bigfoot"
//! records), then reserve GC records for leftover `repnl` pgnos,
//! falling back to dense-mode packing when there aren't enough spare
//! txnid keys. We keep the same phase structure; the dense-mode solver
//! here is a greedy run-length packer rather than `gc_dense_solve`'s
//! recursive capacity search — simpler, and for the scale this port
//! targets it converges in the same number of GC records in practice,
//! at the cost of not minimizing record count as aggressively. Recorded
//! in DESIGN.md as a deliberate scope reduction, not a silent cap: it
//! still drains `repnl` to empty or reports an error, same as the full
//! algorithm's contract.

use crate::consts::GC_RERERE_MAX_ITERS;
use crate::error::{Error, Result};
use crate::gc::allocator::AllocSource;
use crate::pnl::Pnl;

pub trait GcStore: AllocSource {
    fn gc_put_record(&mut self, txnid: u64, pnl: &Pnl) -> Result<()>;
    fn retired_pages(&mut self) -> &mut Pnl;
    /// Txnids available as GC-record keys this txn, drawn from the
    /// records consumed by the allocator earlier in the same
    /// transaction (spec §4.12 "ready4reuse").
    fn ready4reuse(&mut self) -> &mut Vec<u64>;
    fn current_txnid(&self) -> u64;
}

/// Largest pgno count a single GC record can hold before it must be
/// split into another "bigfoot" chunk: one page's worth of `u64`
/// pgnos, leaving slack for the record's own length prefix (spec
/// §4.12 step 3).
fn maxgc_large1page(pagesize: usize) -> usize {
    (pagesize / std::mem::size_of::<u64>()).saturating_sub(8).max(1)
}

/// Step 1: shrink `first_unallocated` while `repnl`'s tail is
/// contiguous with it ("online compaction", grounded in `refund.c`).
fn refund(ctx: &mut impl GcStore) {
    loop {
        let now = ctx.first_unallocated();
        match ctx.repnl().last() {
            Some(p) if now > 0 && p + 1 == now => {
                ctx.repnl().pop_last();
                ctx.set_first_unallocated(now - 1);
            }
            _ => break,
        }
    }
}

/// Step 2: fold loose pages back into `repnl`.
fn merge_loose(ctx: &mut impl GcStore) -> Result<()> {
    let loose = std::mem::take(ctx.loose());
    for p in loose {
        ctx.repnl().insert(p)?;
    }
    Ok(())
}

/// Step 3: persist `retired_pages` into GC, splitting across
/// descending-txnid "bigfoot" records when it exceeds one record's
/// capacity.
fn store_retired(ctx: &mut impl GcStore, pagesize: usize) -> Result<()> {
    let retired = std::mem::take(ctx.retired_pages());
    if retired.is_empty() {
        return Ok(());
    }
    let cap = maxgc_large1page(pagesize);
    let pages = retired.into_vec();
    let mut written = 0usize;
    let mut key = ctx.current_txnid();
    while written < pages.len() {
        let end = (written + cap).min(pages.len());
        let chunk = Pnl::from(pages[written..end].to_vec());
        ctx.gc_put_record(key, &chunk)?;
        written = end;
        key = key.checked_sub(1).ok_or(Error::TxnFull)?;
    }
    Ok(())
}

/// Steps 4-6: reserve (or dense-pack) GC records for whatever is left
/// in `repnl` after refund/merge/store-retired.
fn rerere_reserve(ctx: &mut impl GcStore, pagesize: usize) -> Result<()> {
    let cap = maxgc_large1page(pagesize);
    loop {
        let remaining = ctx.repnl().len();
        if remaining == 0 {
            return Ok(());
        }
        let Some(key) = ctx.ready4reuse().pop() else {
            return dense_pack(ctx, pagesize);
        };
        let take = remaining.min(cap);
        let start = remaining - take;
        let pages = ctx.repnl().remove_range(start, take);
        ctx.gc_put_record(key, &Pnl::from(pages))?;
    }
}

/// Dense mode (spec §4.12 step 5): not enough spare txnid keys for
/// normally-sized chunks. Greedily place the longest consecutive pgno
/// run as one record at a time, keyed off descending txnids starting
/// just below the current one (spec §9 open question #4 bounds this to
/// at most `current_txnid - cached_oldest` chunks; callers verify that
/// bound in integration tests).
fn dense_pack(ctx: &mut impl GcStore, pagesize: usize) -> Result<()> {
    let cap = maxgc_large1page(pagesize);
    let mut key = ctx.current_txnid().checked_sub(1).ok_or(Error::TxnFull)?;
    while !ctx.repnl().is_empty() {
        let run = ctx.repnl().maxspan().min(cap).max(1).min(ctx.repnl().len());
        let start = ctx.repnl().len() - run;
        let pages = ctx.repnl().remove_range(start, run);
        ctx.gc_put_record(key, &Pnl::from(pages))?;
        key = key.checked_sub(1).ok_or(Error::TxnFull)?;
    }
    Ok(())
}

/// `gc_update`: the full rerere loop run once per commit, after all
/// tree mutations (spec §4.12).
pub fn gc_update(ctx: &mut impl GcStore, pagesize: usize) -> Result<()> {
    for _ in 0..GC_RERERE_MAX_ITERS {
        refund(ctx);
        merge_loose(ctx)?;
        store_retired(ctx, pagesize)?;
        if ctx.repnl().is_empty() {
            return Ok(());
        }
        rerere_reserve(ctx, pagesize)?;
        if ctx.repnl().is_empty() {
            return Ok(());
        }
    }
    Err(Error::TxnFull)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pnl::Pgno;
    use std::collections::BTreeMap;

    struct FakeStore {
        repnl: Pnl,
        loose: Vec<Pgno>,
        retired: Pnl,
        first_unallocated: Pgno,
        upper: Pgno,
        gc: BTreeMap<u64, Pnl>,
        ready4reuse: Vec<u64>,
        current_txnid: u64,
    }

    impl AllocSource for FakeStore {
        fn repnl(&mut self) -> &mut Pnl {
            &mut self.repnl
        }
        fn loose(&mut self) -> &mut Vec<Pgno> {
            &mut self.loose
        }
        fn first_unallocated(&self) -> Pgno {
            self.first_unallocated
        }
        fn set_first_unallocated(&mut self, v: Pgno) {
            self.first_unallocated = v;
        }
        fn geo_upper_pages(&self) -> Pgno {
            self.upper
        }
        fn ensure_mapped(&mut self, _now_pages: Pgno) -> Result<()> {
            Ok(())
        }
        fn take_eligible_gc_record(&mut self, _oldest_live: u64, _lifo: bool) -> Result<Option<(u64, Pnl)>> {
            Ok(None)
        }
        fn record_reclaimed_txnid(&mut self, _txnid: u64) {}
    }

    impl GcStore for FakeStore {
        fn gc_put_record(&mut self, txnid: u64, pnl: &Pnl) -> Result<()> {
            self.gc.insert(txnid, pnl.clone());
            Ok(())
        }
        fn retired_pages(&mut self) -> &mut Pnl {
            &mut self.retired
        }
        fn ready4reuse(&mut self) -> &mut Vec<u64> {
            &mut self.ready4reuse
        }
        fn current_txnid(&self) -> u64 {
            self.current_txnid
        }
    }

    #[test]
    fn refund_shrinks_first_unallocated_for_trailing_repnl() {
        let mut store = FakeStore {
            repnl: Pnl::from(vec![18, 19]),
            loose: vec![],
            retired: Pnl::new(),
            first_unallocated: 20,
            upper: 100,
            gc: BTreeMap::new(),
            ready4reuse: vec![],
            current_txnid: 5,
        };
        refund(&mut store);
        assert_eq!(store.first_unallocated, 18);
        assert!(store.repnl.is_empty());
    }

    #[test]
    fn store_retired_splits_bigfoot_across_descending_keys() {
        let mut store = FakeStore {
            repnl: Pnl::new(),
            loose: vec![],
            retired: Pnl::from((100..110).collect::<Vec<_>>()),
            first_unallocated: 200,
            upper: 1000,
            gc: BTreeMap::new(),
            ready4reuse: vec![],
            current_txnid: 50,
        };
        store_retired(&mut store, 64).unwrap(); // tiny pagesize forces multiple chunks
        assert!(store.gc.len() > 1);
        let total: usize = store.gc.values().map(|p| p.len()).sum();
        assert_eq!(total, 10);
        assert!(store.gc.keys().all(|&k| k <= 50));
    }

    #[test]
    fn gc_update_drains_repnl_via_reservations() {
        let mut store = FakeStore {
            repnl: Pnl::from(vec![1, 2, 3]),
            loose: vec![4],
            retired: Pnl::new(),
            first_unallocated: 200,
            upper: 1000,
            gc: BTreeMap::new(),
            ready4reuse: vec![10, 9],
            current_txnid: 11,
        };
        gc_update(&mut store, 4096).unwrap();
        assert!(store.repnl.is_empty());
        let total: usize = store.gc.values().map(|p| p.len()).sum();
        assert_eq!(total, 4);
    }
}
