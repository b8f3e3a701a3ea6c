//! GC allocator: allocate new pgnos under MVCC (spec §4.11).
//!
//! Source preference order, exactly as spec.md lists it: the current
//! txn's reclaimed PNL (`repnl`), then GC records eligible under the
//! oldest-live-reader horizon, then loose pages, then file extension,
//! then the optional HSR/OOM retry (not wired up in this port — no
//! caller has registered a callback, so we go straight to `MapFull`),
//! and finally `MapFull` itself.

use crate::error::{Error, Result};
use crate::pnl::{Pgno, Pnl};

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AllocFlags: u32 {
        /// Caller only wants pgnos reserved; page content left untouched.
        const RESERVE    = 0b0000_0001;
        /// Satisfying from GC is fine; no preference for fresh pages.
        const UNIMPORTANT = 0b0000_0010;
    }
}

/// What the allocator needs from the owning write transaction. Kept
/// separate from `cursor::PageSource`/`PageSourceMut` since GC record
/// lookups are a tree search in their own right (over the GC table),
/// not a raw page fetch.
pub trait AllocSource {
    fn repnl(&mut self) -> &mut Pnl;
    fn loose(&mut self) -> &mut Vec<Pgno>;
    fn first_unallocated(&self) -> Pgno;
    fn set_first_unallocated(&mut self, v: Pgno);
    fn geo_upper_pages(&self) -> Pgno;
    fn ensure_mapped(&mut self, now_pages: Pgno) -> Result<()>;
    /// Pop one GC record whose key (txnid) is `<= oldest_live`, per the
    /// `lifo` preference (spec §4.11 "LIFO iff MDBX_LIFORECLAIM"),
    /// deleting it from the GC table and returning its key + pgno list.
    /// `None` once no eligible record remains.
    fn take_eligible_gc_record(&mut self, oldest_live: u64, lifo: bool) -> Result<Option<(u64, Pnl)>>;
    fn record_reclaimed_txnid(&mut self, txnid: u64);
}

/// Allocate `npages` consecutive pgnos (spec §4.11).
pub fn allocate(src: &mut impl AllocSource, npages: u32, oldest_live: u64, lifo: bool) -> Result<Pgno> {
    if let Some(p) = try_from_repnl(src, npages) {
        return Ok(p);
    }

    while let Some((txnid, pnl)) = src.take_eligible_gc_record(oldest_live, lifo)? {
        src.record_reclaimed_txnid(txnid);
        src.repnl().merge(&pnl)?;
        if let Some(p) = try_from_repnl(src, npages) {
            return Ok(p);
        }
    }

    if npages == 1 {
        if let Some(p) = src.loose().pop() {
            return Ok(p);
        }
    }

    let now = src.first_unallocated();
    let want = now + npages as Pgno;
    if want <= src.geo_upper_pages() {
        src.ensure_mapped(want)?;
        src.set_first_unallocated(want);
        return Ok(now);
    }

    Err(Error::MapFull)
}

fn try_from_repnl(src: &mut impl AllocSource, npages: u32) -> Option<Pgno> {
    if npages == 1 {
        return src.repnl().pop_last();
    }
    let idx = src.repnl().find_span(npages as usize)?;
    let pages = src.repnl().remove_range(idx, npages as usize);
    pages.first().copied()
}
