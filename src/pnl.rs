//! Page-number list: a sorted, growable array of `pgno`s (spec §4.4).
//!
//! Ground truth is `original_source/src/pnl.c`. libmdbx represents a PNL
//! as a raw buffer with element 0 holding the length and a compile-time
//! `MDBX_PNL_ASCENDING` switch choosing sort direction. We keep the same
//! "ascending" convention but drop the raw-buffer trick in favor of a
//! `Vec<u64>` — there is no caller in safe Rust for the manual
//! allocation dance `pnl_alloc`/`pnl_shrink`/`pnl_reserve` perform, the
//! allocator already amortizes growth for us.

use crate::consts::PAGELIST_LIMIT;
use crate::error::{Error, Result};

pub type Pgno = u64;

/// A sorted-ascending list of page numbers, with helpers matching the
/// operations spec.md names: insert_span, append_span/append_stepped,
/// merge, sort_nochk, search, check, maxspan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pnl(Vec<Pgno>);

impl Pnl {
    pub fn new() -> Self {
        Pnl(Vec::new())
    }

    pub fn with_capacity(cap: usize) -> Self {
        Pnl(Vec::with_capacity(cap))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[Pgno] {
        &self.0
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn first(&self) -> Option<Pgno> {
        self.0.first().copied()
    }

    pub fn last(&self) -> Option<Pgno> {
        self.0.last().copied()
    }

    pub fn pop_last(&mut self) -> Option<Pgno> {
        self.0.pop()
    }

    pub fn truncate(&mut self, len: usize) {
        self.0.truncate(len);
    }

    pub fn iter(&self) -> impl Iterator<Item = Pgno> + '_ {
        self.0.iter().copied()
    }

    fn check_limit(&self, extra: usize) -> Result<()> {
        if self.0.len() + extra > PAGELIST_LIMIT {
            return Err(Error::TxnFull);
        }
        Ok(())
    }

    /// Binary search for `pgno`; returns `Ok(idx)` if present, `Err(idx)`
    /// for the insertion position that keeps the list sorted (`search`
    /// in spec.md).
    pub fn search(&self, pgno: Pgno) -> std::result::Result<usize, usize> {
        self.0.binary_search(&pgno)
    }

    pub fn contains(&self, pgno: Pgno) -> bool {
        self.search(pgno).is_ok()
    }

    /// Insert a single page number, keeping the list sorted. No-op if
    /// already present (callers are expected to not double-free a pgno;
    /// debug-asserted at call sites that care).
    pub fn insert(&mut self, pgno: Pgno) -> Result<()> {
        self.insert_span(pgno, 1)
    }

    /// Insert `n` consecutive page numbers starting at `pgno`
    /// (`insert_span`).
    pub fn insert_span(&mut self, pgno: Pgno, n: usize) -> Result<()> {
        if n == 0 {
            return Ok(());
        }
        self.check_limit(n)?;
        for i in 0..n as Pgno {
            let p = pgno + i;
            if let Err(idx) = self.0.binary_search(&p) {
                self.0.insert(idx, p);
            }
        }
        Ok(())
    }

    /// Append `n` consecutive page numbers, assuming they sort after the
    /// current tail (`append_span`). Falls back to `insert_span`'s
    /// binary-search path if that assumption doesn't hold, so callers
    /// never corrupt ordering by misusing this as a fast path.
    pub fn append_span(&mut self, pgno: Pgno, n: usize) -> Result<()> {
        if n == 0 {
            return Ok(());
        }
        self.check_limit(n)?;
        if self.0.last().is_none_or(|&last| last < pgno) {
            self.0.extend((0..n as Pgno).map(|i| pgno + i));
            Ok(())
        } else {
            self.insert_span(pgno, n)
        }
    }

    /// Append pgnos at a fixed stride (used for spilled-page lists, which
    /// encode `(pgno << 1)` — step 2 — per spec §4.10).
    pub fn append_stepped(&mut self, start: Pgno, step: Pgno, n: usize) -> Result<()> {
        if n == 0 {
            return Ok(());
        }
        self.check_limit(n)?;
        let mut v: Vec<Pgno> = (0..n as Pgno).map(|i| start + i * step).collect();
        self.0.append(&mut v);
        self.0.sort_unstable();
        Ok(())
    }

    /// Merge `other` (also sorted-ascending) into `self` in place.
    pub fn merge(&mut self, other: &Pnl) -> Result<()> {
        if other.is_empty() {
            return Ok(());
        }
        if self.is_empty() {
            self.0 = other.0.clone();
            return Ok(());
        }
        self.check_limit(other.len())?;
        // Easy case: fully disjoint ranges concatenate without a merge pass.
        if self.0.last().copied().unwrap() < other.0.first().copied().unwrap() {
            self.0.extend_from_slice(&other.0);
            return Ok(());
        }
        if other.0.last().copied().unwrap() < self.0.first().copied().unwrap() {
            let mut merged = other.0.clone();
            merged.extend_from_slice(&self.0);
            self.0 = merged;
            return Ok(());
        }
        let mut merged = Vec::with_capacity(self.0.len() + other.0.len());
        let (mut a, mut b) = (self.0.iter().peekable(), other.0.iter().peekable());
        loop {
            match (a.peek(), b.peek()) {
                (Some(&&x), Some(&&y)) => {
                    if x < y {
                        merged.push(x);
                        a.next();
                    } else if y < x {
                        merged.push(y);
                        b.next();
                    } else {
                        merged.push(x);
                        a.next();
                        b.next();
                    }
                }
                (Some(&&x), None) => {
                    merged.push(x);
                    a.next();
                }
                (None, Some(&&y)) => {
                    merged.push(y);
                    b.next();
                }
                (None, None) => break,
            }
        }
        self.0 = merged;
        Ok(())
    }

    /// `sort_nochk`: normalize ordering without validating bounds. Given
    /// we maintain sortedness on every mutating path, this is only
    /// needed after bulk `extend`/unsorted construction (e.g. from a
    /// freshly decoded GC record we don't yet trust).
    pub fn sort_nochk(&mut self) {
        self.0.sort_unstable();
        self.0.dedup();
    }

    /// Debug-only ordering/bounds check (`check` in spec.md).
    pub fn check(&self, limit: Pgno) -> bool {
        if self.0.len() > PAGELIST_LIMIT {
            return false;
        }
        if self.0.windows(2).any(|w| w[0] >= w[1]) {
            return false;
        }
        if let Some(&most) = self.0.last() {
            if most >= limit {
                return false;
            }
        }
        true
    }

    /// Longest run of consecutive pgnos (used by dense-mode GC packing,
    /// spec §4.12 step 5).
    pub fn maxspan(&self) -> usize {
        if self.0.is_empty() {
            return 0;
        }
        let mut best = 1usize;
        let mut cur = 1usize;
        for w in self.0.windows(2) {
            if w[1] == w[0] + 1 {
                cur += 1;
                best = best.max(cur);
            } else {
                cur = 1;
            }
        }
        best
    }

    /// Find a run of >= `n` consecutive pgnos anywhere in the list;
    /// returns the starting index of the run if found. Used by the GC
    /// allocator to satisfy multi-page (LARGE-run) requests from `repnl`.
    pub fn find_span(&self, n: usize) -> Option<usize> {
        if n == 0 || self.0.len() < n {
            return None;
        }
        let mut run_start = 0usize;
        for i in 1..self.0.len() {
            if self.0[i] != self.0[i - 1] + 1 {
                run_start = i;
            }
            if i - run_start + 1 >= n {
                return Some(i + 1 - n);
            }
        }
        None
    }

    /// Remove the `n` pgnos starting at index `idx` (used after
    /// `find_span`/single-page consumption from the front or back).
    pub fn remove_range(&mut self, idx: usize, n: usize) -> Vec<Pgno> {
        self.0.drain(idx..idx + n).collect()
    }

    pub fn extend_from_slice(&mut self, s: &[Pgno]) {
        self.0.extend_from_slice(s);
    }

    pub fn from_sorted_vec(v: Vec<Pgno>) -> Self {
        debug_assert!(v.windows(2).all(|w| w[0] < w[1]));
        Pnl(v)
    }

    pub fn into_vec(self) -> Vec<Pgno> {
        self.0
    }
}

impl From<Vec<Pgno>> for Pnl {
    fn from(mut v: Vec<Pgno>) -> Self {
        v.sort_unstable();
        v.dedup();
        Pnl(v)
    }
}

impl FromIterator<Pgno> for Pnl {
    fn from_iter<T: IntoIterator<Item = Pgno>>(iter: T) -> Self {
        Pnl::from(iter.into_iter().collect::<Vec<_>>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_keeps_order() {
        let mut pnl = Pnl::new();
        for p in [5, 1, 3, 2, 4] {
            pnl.insert(p).unwrap();
        }
        assert_eq!(pnl.as_slice(), &[1, 2, 3, 4, 5]);
    }

    #[test]
    fn insert_span_covers_range() {
        let mut pnl = Pnl::new();
        pnl.insert_span(10, 3).unwrap();
        assert_eq!(pnl.as_slice(), &[10, 11, 12]);
    }

    #[test]
    fn merge_disjoint_and_overlapping() {
        let mut a = Pnl::from(vec![1, 2, 3]);
        let b = Pnl::from(vec![4, 5]);
        a.merge(&b).unwrap();
        assert_eq!(a.as_slice(), &[1, 2, 3, 4, 5]);

        let mut c = Pnl::from(vec![1, 3, 5]);
        let d = Pnl::from(vec![2, 3, 4]);
        c.merge(&d).unwrap();
        assert_eq!(c.as_slice(), &[1, 2, 3, 4, 5]);
    }

    #[test]
    fn maxspan_finds_longest_run() {
        let pnl = Pnl::from(vec![1, 2, 3, 7, 8, 20]);
        assert_eq!(pnl.maxspan(), 3);
    }

    #[test]
    fn find_span_locates_run() {
        let pnl = Pnl::from(vec![1, 2, 3, 7, 8, 9, 10]);
        let idx = pnl.find_span(4).unwrap();
        assert_eq!(&pnl.as_slice()[idx..idx + 4], &[7, 8, 9, 10]);
        assert!(pnl.find_span(5).is_none());
    }

    #[quickcheck_macros::quickcheck]
    fn from_vec_is_always_sorted(mut v: Vec<u64>) -> bool {
        v.truncate(200);
        let pnl = Pnl::from(v);
        pnl.as_slice().windows(2).all(|w| w[0] < w[1])
    }
}
