//! Tree split / rebalance / merge and the node insert/delete entry
//! points that drive them (spec §4.7, §4.8, §4.9).
//!
//! Branch pages store a real key in every slot, including index 0 —
//! `Page::search_key`'s branch path never looks at index 0's key, so
//! whatever sits there is inert. We lean on that: a branch entry moved
//! between pages (split, merge, redistribute) always keeps its key
//! bytes verbatim, wherever it ends up. A sibling's own index-0 key
//! then already equals the separator the parent holds for it, so
//! merge/redistribute never need a side channel back to the parent to
//! recover a "lost" boundary key.
//!
//! Cursor patching across a split is spec.md's stated design (§4.8:
//! "all tracked cursors with stacks intersecting the split must be
//! patched"). This port has no live cursor registry to patch — cursors
//! are built fresh from a `Cursor::new`/`set` call per use rather than
//! kept open across mutations — so instead of patching in place, a
//! caller holding a cursor across a `tree_insert`/`tree_delete` must
//! re-`set`/`set_range` it afterward. Documented simplification, not a
//! silent gap: every split/merge/rebalance spec.md names still runs and
//! leaves the tree in the same shape a patched-cursor implementation
//! would.

use crate::cursor::PageSource;
use crate::error::{Error, Result};
use crate::meta::INVALID_PGNO;
use crate::node::{large_run_pages, leaf_node_size, needs_large};
use crate::page::{NodeFlags, Page, PageFlags, PageView, PAGE_HEADER_SIZE};
use crate::pnl::Pgno;

/// What tree mutation needs beyond read-only traversal: copy-on-write,
/// fresh-page allocation, and retirement bookkeeping (spec §4.9 "Page
/// touch").
pub trait PageSourceMut: PageSource {
    /// Ensure the page at `pgno` is writable by the current txn,
    /// copy-on-writing it to a new pgno if it belonged to an older
    /// snapshot. Returns the pgno to use from now on (unchanged if it
    /// was already dirty).
    fn touch_page(&mut self, pgno: Pgno) -> Result<Pgno>;
    /// Allocate `npages` fresh pgnos for a brand-new page (not an
    /// existing one being copied).
    fn alloc_page(&mut self, npages: u32) -> Result<Pgno>;
    /// Persist a page's current bytes into the dirty list under its own
    /// pgno (the page must already be owned by this txn via
    /// `touch_page`/`alloc_page`).
    fn write_page(&mut self, page: &Page);
    fn retire_page(&mut self, pgno: Pgno);
}

const MAX_HEIGHT: usize = 32;

/// `tree_search` + copy-on-write: descend from `root` toward `key`,
/// touching every page on the path and fixing up each parent's child
/// pointer when a child's pgno changes underneath it. Returns the
/// touched stack (root first, target leaf last) and the new root pgno.
fn descend_touch<S: PageSourceMut>(src: &mut S, root: Pgno, key: &[u8]) -> Result<(Vec<(Pgno, usize)>, Pgno)> {
    let new_root = src.touch_page(root)?;
    let mut stack = Vec::with_capacity(MAX_HEIGHT);
    let mut cur = new_root;
    loop {
        let page = src.read_page(cur)?;
        let view = page.view();
        if view.flags().contains(PageFlags::BRANCH) {
            let idx = match view.search_key(key) {
                Ok(i) => i,
                Err(i) => i - 1,
            };
            let child = view.branch(idx).child_pgno;
            let new_child = src.touch_page(child)?;
            if new_child != child {
                let mut parent = page;
                parent.set_branch_child(idx, new_child);
                src.write_page(&parent);
            }
            stack.push((cur, idx));
            cur = new_child;
        } else {
            let idx = view.search_key(key).unwrap_or_else(|i| i);
            stack.push((cur, idx));
            return Ok((stack, new_root));
        }
    }
}

/// `node_add_leaf`/`node_add_branch` plus the oversize decision (spec
/// §4.7): insert `(key, value)` into the tree rooted at `root`,
/// splitting pages as needed. `is_dupsort` suppresses the LARGE-run
/// oversize path (DUPSORT values never spill to an overflow page).
pub fn tree_insert<S: PageSourceMut>(
    src: &mut S,
    root: &mut Pgno,
    height: &mut u32,
    key: &[u8],
    value: &[u8],
    flags: NodeFlags,
    is_dupsort: bool,
) -> Result<()> {
    if *root == INVALID_PGNO {
        let pgno = src.alloc_page(1)?;
        let mut page = Page::new(src.pagesize());
        page.init(pgno, PageFlags::LEAF, src.pagesize());
        page.add_leaf(0, key, value, flags)?;
        src.write_page(&page);
        *root = pgno;
        *height = 1;
        return Ok(());
    }

    let (mut stack, new_root) = descend_touch(src, *root, key)?;
    *root = new_root;
    let (leaf_pgno, idx) = stack.pop().unwrap();

    let mut leaf = src.read_page(leaf_pgno)?;
    {
        let view = leaf.view();
        if idx < view.count() && view.leaf(idx).key == key {
            drop(view);
            leaf.node_del(idx);
            src.write_page(&leaf);
        }
    }

    let (final_key, final_value, final_flags) = if !is_dupsort && needs_large(key, value, src.pagesize(), false) {
        let n = large_run_pages(value.len(), src.pagesize(), PAGE_HEADER_SIZE);
        let head_pgno = src.alloc_page(n)?;
        let mut p = Page::new(src.pagesize() * n as usize);
        p.init(head_pgno, PageFlags::LARGE, src.pagesize());
        p.set_extra(n);
        p.data[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + value.len()].copy_from_slice(value);
        src.write_page(&p);
        // A BIG (non-DUP) value's node stores the run's head pgno plus the
        // value's true byte length, since the run itself is page-rounded
        // and can't recover the exact length on its own.
        let mut encoded = head_pgno.to_le_bytes().to_vec();
        encoded.extend_from_slice(&(value.len() as u32).to_le_bytes());
        (key.to_vec(), encoded, flags | NodeFlags::BIG)
    } else {
        (key.to_vec(), value.to_vec(), flags)
    };

    match leaf.add_leaf(idx, &final_key, &final_value, final_flags) {
        Ok(()) => {
            src.write_page(&leaf);
            Ok(())
        }
        Err(Error::PageFull) => split_leaf_and_insert(src, root, height, &mut stack, leaf, idx, &final_key, &final_value, final_flags),
        Err(e) => Err(e),
    }
}

/// `node_del`: remove `key` from the tree, then rebalance on the way
/// back up (spec §4.7/§4.8). Returns whether the key was present.
pub fn tree_delete<S: PageSourceMut>(src: &mut S, root: &mut Pgno, height: &mut u32, key: &[u8]) -> Result<bool> {
    if *root == INVALID_PGNO {
        return Ok(false);
    }
    let (mut stack, new_root) = descend_touch(src, *root, key)?;
    *root = new_root;
    let (leaf_pgno, idx) = stack.pop().unwrap();

    let mut leaf = src.read_page(leaf_pgno)?;
    {
        let view = leaf.view();
        if idx >= view.count() || view.leaf(idx).key != key {
            return Ok(false);
        }
        let found = view.leaf(idx);
        if found.flags.contains(NodeFlags::BIG) {
            let pgno = u64::from_le_bytes(found.value[..8].try_into().unwrap());
            drop(view);
            src.retire_page(pgno);
        }
    }
    leaf.node_del(idx);
    src.write_page(&leaf);

    tree_rebalance(src, root, height, &mut stack, leaf_pgno)?;
    Ok(true)
}

/// Choose a split index per spec §4.8's three strategies: pure-right
/// for an append-like insert at the tail, pure-left near the head, else
/// scan outward from the midpoint for the smallest index where both
/// halves fit the new node.
fn choose_split_index(page: &Page, insert_idx: usize, new_body_len: usize) -> usize {
    let count = page.count();
    if insert_idx >= count {
        return count;
    }
    if insert_idx == 0 {
        return 0;
    }
    let mid = count / 2;
    let half_budget = (page.data.len() - new_body_len) / 2;
    let mut offset = 0usize;
    loop {
        let lo = mid.saturating_sub(offset);
        let hi = (mid + offset).min(count);
        if page_half_fits(page, lo, half_budget) {
            return lo.clamp(1, count);
        }
        if page_half_fits(page, hi, half_budget) {
            return hi.clamp(1, count);
        }
        if lo == 0 && hi == count {
            return mid.clamp(1, count);
        }
        offset += 1;
    }
}

fn page_half_fits(page: &Page, split: usize, budget: usize) -> bool {
    let view = page.view();
    let used: usize = (0..split).map(|i| node_body_len(&view, i)).sum();
    used <= budget
}

fn node_body_len(view: &PageView<'_>, i: usize) -> usize {
    if view.flags().contains(PageFlags::BRANCH) {
        std::mem::size_of::<crate::page::BranchNodeHeader>() + view.branch(i).key.len()
    } else {
        let l = view.leaf(i);
        std::mem::size_of::<crate::page::LeafNodeHeader>() + l.key.len() + l.value.len()
    }
}

#[allow(clippy::too_many_arguments)]
fn split_leaf_and_insert<S: PageSourceMut>(
    src: &mut S,
    root: &mut Pgno,
    height: &mut u32,
    stack: &mut Vec<(Pgno, usize)>,
    old_leaf: Page,
    insert_idx: usize,
    key: &[u8],
    value: &[u8],
    flags: NodeFlags,
) -> Result<()> {
    let new_body_len = leaf_node_size(key, value.len());
    let split_at = choose_split_index(&old_leaf, insert_idx, new_body_len);

    let mut left = Page::new(src.pagesize());
    left.init(old_leaf.pgno(), old_leaf.flags(), src.pagesize());
    let sister_pgno = src.alloc_page(1)?;
    let mut right = Page::new(src.pagesize());
    right.init(sister_pgno, old_leaf.flags(), src.pagesize());

    let view = old_leaf.view();
    let mut inserted = false;
    let mut w = 0usize;
    for i in 0..view.count() {
        if i == insert_idx {
            let dest = if w < split_at { &mut left } else { &mut right };
            let local_idx = dest.count();
            dest.add_leaf(local_idx, key, value, flags)?;
            inserted = true;
            w += 1;
        }
        let l = view.leaf(i);
        let dest = if w < split_at { &mut left } else { &mut right };
        let local_idx = dest.count();
        dest.add_leaf(local_idx, l.key, l.value, l.flags)?;
        w += 1;
    }
    if !inserted {
        let dest = if w < split_at { &mut left } else { &mut right };
        let local_idx = dest.count();
        dest.add_leaf(local_idx, key, value, flags)?;
    }
    drop(view);

    src.write_page(&left);
    src.write_page(&right);

    let separator = right.view().leaf(0).key.to_vec();

    if stack.is_empty() {
        grow_root(src, root, height, left.pgno(), sister_pgno, separator)
    } else {
        propagate_new_child(src, root, height, stack, sister_pgno, separator)
    }
}

/// Insert a separator key + child pgno into the parent on `stack`'s
/// tail, splitting the parent branch page in turn if it's full.
fn propagate_new_child<S: PageSourceMut>(
    src: &mut S,
    root: &mut Pgno,
    height: &mut u32,
    stack: &mut Vec<(Pgno, usize)>,
    new_child_pgno: Pgno,
    separator_key: Vec<u8>,
) -> Result<()> {
    let (parent_pgno, child_idx) = stack.pop().unwrap();
    let mut parent = src.read_page(parent_pgno)?;
    match parent.add_branch(child_idx + 1, &separator_key, new_child_pgno) {
        Ok(()) => {
            src.write_page(&parent);
            Ok(())
        }
        Err(Error::PageFull) => split_branch_and_insert(src, root, height, stack, parent, child_idx + 1, &separator_key, new_child_pgno),
        Err(e) => Err(e),
    }
}

#[allow(clippy::too_many_arguments)]
fn split_branch_and_insert<S: PageSourceMut>(
    src: &mut S,
    root: &mut Pgno,
    height: &mut u32,
    stack: &mut Vec<(Pgno, usize)>,
    old_branch: Page,
    insert_idx: usize,
    key: &[u8],
    child_pgno: Pgno,
) -> Result<()> {
    let view = old_branch.view();
    let count = view.count();
    let mut items: Vec<(Vec<u8>, Pgno)> = (0..count).map(|i| (view.branch(i).key.to_vec(), view.branch(i).child_pgno)).collect();
    drop(view);
    items.insert(insert_idx, (key.to_vec(), child_pgno));

    let split_at = (items.len() / 2).max(1);

    let mut left = Page::new(src.pagesize());
    left.init(old_branch.pgno(), PageFlags::BRANCH, src.pagesize());
    let sister_pgno = src.alloc_page(1)?;
    let mut right = Page::new(src.pagesize());
    right.init(sister_pgno, PageFlags::BRANCH, src.pagesize());

    for (i, (k, child)) in items.iter().enumerate() {
        let dest = if i < split_at { &mut left } else { &mut right };
        let local_idx = dest.count();
        dest.add_branch(local_idx, k, *child)?;
    }

    // `right`'s own index-0 key already equals the separator between
    // `left` and `right` (see module doc) — no recomputation needed.
    let separator = items[split_at].0.clone();

    src.write_page(&left);
    src.write_page(&right);

    if stack.is_empty() {
        grow_root(src, root, height, left.pgno(), sister_pgno, separator)
    } else {
        propagate_new_child(src, root, height, stack, sister_pgno, separator)
    }
}

fn grow_root<S: PageSourceMut>(
    src: &mut S,
    root: &mut Pgno,
    height: &mut u32,
    left_pgno: Pgno,
    right_pgno: Pgno,
    separator: Vec<u8>,
) -> Result<()> {
    let new_root_pgno = src.alloc_page(1)?;
    let mut new_root = Page::new(src.pagesize());
    new_root.init(new_root_pgno, PageFlags::BRANCH, src.pagesize());
    // The root's own index-0 key is never consulted (no parent above
    // it to need a separator), so an empty placeholder is fine here.
    new_root.add_branch(0, b"", left_pgno)?;
    new_root.add_branch(1, &separator, right_pgno)?;
    src.write_page(&new_root);
    *root = new_root_pgno;
    *height += 1;
    Ok(())
}

fn is_underfull(page: &Page, min_keys: usize) -> bool {
    let view = page.view();
    if view.count() < min_keys {
        return true;
    }
    let total = page.data.len();
    view.free_space().saturating_mul(2) > total
}

fn can_merge(a: &Page, b: &Page) -> bool {
    let used_a = a.data.len() - a.free_space();
    let used_b = b.data.len() - b.free_space();
    // both halves' node bytes (minus one page header, since the merged
    // page only needs one) must fit in a single page.
    used_a + used_b <= a.data.len() + PAGE_HEADER_SIZE
}

/// `tree_rebalance` (spec §4.8): after a delete, collapse/merge/
/// redistribute on the way back up the stack.
fn tree_rebalance<S: PageSourceMut>(
    src: &mut S,
    root: &mut Pgno,
    height: &mut u32,
    stack: &mut Vec<(Pgno, usize)>,
    mut child_pgno: Pgno,
) -> Result<()> {
    loop {
        let page = src.read_page(child_pgno)?;
        let is_branch = page.flags().contains(PageFlags::BRANCH);
        let min_keys = if is_branch { crate::consts::BRANCH_MIN_KEYS } else { crate::consts::LEAF_MIN_KEYS };
        let underfull = is_underfull(&page, min_keys);

        let Some((parent_pgno, child_idx)) = stack.pop() else {
            if is_branch && page.count() == 1 {
                *root = page.view().branch(0).child_pgno;
                *height = height.saturating_sub(1);
            } else if !is_branch && page.count() == 0 {
                *root = INVALID_PGNO;
                *height = 0;
            }
            return Ok(());
        };

        if !underfull {
            return Ok(());
        }

        let parent = src.read_page(parent_pgno)?;
        let pview = parent.view();
        // Prefer the right sibling, then the left one (spec §9 open
        // question #3's deterministic tie-break: "prefer dirty
        // neighbor, then left" — we have no per-page dirty bit to
        // consult at this layer, so right-then-left stands in as the
        // fixed, reproducible order).
        let sibling_idx = if child_idx + 1 < pview.count() {
            Some(child_idx + 1)
        } else if child_idx > 0 {
            Some(child_idx - 1)
        } else {
            None
        };
        let Some(sib_idx) = sibling_idx else {
            return Ok(());
        };
        let sibling_pgno_before = pview.branch(sib_idx).child_pgno;
        drop(pview);
        let sibling_pgno = src.touch_page(sibling_pgno_before)?;
        if sibling_pgno != sibling_pgno_before {
            let mut parent = src.read_page(parent_pgno)?;
            parent.set_branch_child(sib_idx, sibling_pgno);
            src.write_page(&parent);
        }
        let mut sibling = src.read_page(sibling_pgno)?;
        let mut this_page = src.read_page(child_pgno)?;

        let (left_idx, left_pgno) = if sib_idx > child_idx { (child_idx, child_pgno) } else { (sib_idx, sibling_pgno) };
        let (left, right) = if sib_idx > child_idx { (&mut this_page, &mut sibling) } else { (&mut sibling, &mut this_page) };

        if can_merge(left, right) {
            merge_pages(left, right);
            src.write_page(left);
            src.retire_page(right.pgno());
            let mut parent = src.read_page(parent_pgno)?;
            parent.node_del(left_idx + 1);
            if is_branch {
                parent.set_branch_child(left_idx, left_pgno);
            }
            src.write_page(&parent);
            child_pgno = parent_pgno;
            continue;
        } else {
            redistribute(left, right);
            let new_sep = if is_branch { right.view().branch(0).key.to_vec() } else { right.view().leaf(0).key.to_vec() };
            src.write_page(left);
            src.write_page(right);
            let mut parent = src.read_page(parent_pgno)?;
            rewrite_separator(&mut parent, left_idx + 1, &new_sep)?;
            src.write_page(&parent);
            return Ok(());
        }
    }
}

/// Rebuild `dest` from its own entries plus `src_page`'s, in order.
/// Branch keys carry over verbatim (see module doc on why index 0
/// needs no special handling).
fn merge_pages(dest: &mut Page, src_page: &Page) {
    let view = src_page.view();
    if view.flags().contains(PageFlags::BRANCH) {
        for i in 0..view.count() {
            let n = view.branch(i);
            let idx = dest.count();
            let _ = dest.add_branch(idx, n.key, n.child_pgno);
        }
    } else if view.flags().contains(PageFlags::DUPFIX) {
        for i in 0..view.count() {
            let idx = dest.count();
            let _ = dest.add_dupfix(idx, view.dupfix_key(i));
        }
    } else {
        for i in 0..view.count() {
            let n = view.leaf(i);
            let idx = dest.count();
            let _ = dest.add_leaf(idx, n.key, n.value, n.flags);
        }
    }
}

/// Move entries from the larger sibling into the smaller one until
/// they're within one entry of balanced (spec §4.8 "redistribute one
/// node").
fn redistribute(left: &mut Page, right: &mut Page) {
    if left.count() < right.count() {
        let move_count = ((right.count() - left.count()) / 2).max(1);
        for _ in 0..move_count {
            move_one(right, left, true);
        }
    } else {
        let move_count = ((left.count() - right.count()) / 2).max(1);
        for _ in 0..move_count {
            move_one(left, right, false);
        }
    }
}

/// Move exactly one entry between two sibling pages. `from_front`
/// means pull `from`'s first entry and append it to `to`'s tail (used
/// when `to` is the left sibling); otherwise pull `from`'s last entry
/// and prepend it to `to`'s head.
fn move_one(from: &mut Page, to: &mut Page, from_front: bool) {
    let is_branch = from.flags().contains(PageFlags::BRANCH);
    let src_idx = if from_front { 0 } else { from.count() - 1 };
    let view = from.view();
    if is_branch {
        let n = view.branch(src_idx);
        let (key, child) = (n.key.to_vec(), n.child_pgno);
        drop(view);
        let dest_idx = if from_front { to.count() } else { 0 };
        let _ = to.add_branch(dest_idx, &key, child);
    } else {
        let n = view.leaf(src_idx);
        let (key, value, flags) = (n.key.to_vec(), n.value.to_vec(), n.flags);
        drop(view);
        let dest_idx = if from_front { to.count() } else { 0 };
        let _ = to.add_leaf(dest_idx, &key, &value, flags);
    }
    from.node_del(src_idx);
}

fn rewrite_separator(parent: &mut Page, idx: usize, new_key: &[u8]) -> Result<()> {
    let view = parent.view();
    if idx >= view.count() {
        return Ok(());
    }
    let child = view.branch(idx).child_pgno;
    drop(view);
    parent.node_del(idx);
    parent.add_branch(idx, new_key, child)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    /// A single-writer, no-snapshot page source: every page is already
    /// "owned", so `touch_page` is a no-op and nothing is ever shared
    /// with an older reader. Good enough to exercise split/merge/
    /// redistribute without a real `WriteTxn`/`Pager` underneath.
    struct MemSource {
        pages: RefCell<HashMap<Pgno, Page>>,
        next_pgno: RefCell<Pgno>,
        pagesize: usize,
    }

    impl MemSource {
        fn new(pagesize: usize) -> Self {
            MemSource {
                pages: RefCell::new(HashMap::new()),
                next_pgno: RefCell::new(1),
                pagesize,
            }
        }
    }

    impl PageSource for MemSource {
        fn pagesize(&self) -> usize {
            self.pagesize
        }
        fn read_page(&self, pgno: Pgno) -> Result<Page> {
            self.pages.borrow().get(&pgno).cloned().ok_or(Error::NotFound)
        }
    }

    impl PageSourceMut for MemSource {
        fn touch_page(&mut self, pgno: Pgno) -> Result<Pgno> {
            Ok(pgno)
        }
        fn alloc_page(&mut self, npages: u32) -> Result<Pgno> {
            let mut next = self.next_pgno.borrow_mut();
            let pgno = *next;
            *next += npages.max(1) as u64;
            Ok(pgno)
        }
        fn write_page(&mut self, page: &Page) {
            self.pages.borrow_mut().insert(page.pgno(), page.clone());
        }
        fn retire_page(&mut self, pgno: Pgno) {
            self.pages.borrow_mut().remove(&pgno);
        }
    }

    fn collect_leaves(src: &MemSource, root: Pgno, height: u32) -> Vec<(Vec<u8>, Vec<u8>)> {
        fn walk(src: &MemSource, pgno: Pgno, out: &mut Vec<(Vec<u8>, Vec<u8>)>) {
            let page = src.read_page(pgno).unwrap();
            let view = page.view();
            if view.flags().contains(PageFlags::BRANCH) {
                for i in 0..view.count() {
                    walk(src, view.branch(i).child_pgno, out);
                }
            } else {
                for i in 0..view.count() {
                    let n = view.leaf(i);
                    out.push((n.key.to_vec(), n.value.to_vec()));
                }
            }
        }
        let mut out = Vec::new();
        if root != INVALID_PGNO && height > 0 {
            walk(src, root, &mut out);
        }
        out
    }

    fn tree_height(src: &MemSource, root: Pgno) -> u32 {
        let mut h = 1;
        let mut pgno = root;
        loop {
            let page = src.read_page(pgno).unwrap();
            let view = page.view();
            if !view.flags().contains(PageFlags::BRANCH) {
                return h;
            }
            pgno = view.branch(0).child_pgno;
            h += 1;
        }
    }

    #[test]
    fn insert_into_empty_tree_creates_leaf_root() {
        let mut src = MemSource::new(4096);
        let mut root = INVALID_PGNO;
        let mut height = 0;
        tree_insert(&mut src, &mut root, &mut height, b"a", b"1", NodeFlags::empty(), false).unwrap();
        assert_ne!(root, INVALID_PGNO);
        assert_eq!(height, 1);
        assert_eq!(collect_leaves(&src, root, height), vec![(b"a".to_vec(), b"1".to_vec())]);
    }

    #[test]
    fn many_ascending_inserts_split_leaves_and_grow_root() {
        let mut src = MemSource::new(512);
        let mut root = INVALID_PGNO;
        let mut height = 0;
        let mut expect = Vec::new();
        for i in 0..200u32 {
            let key = format!("key-{i:05}");
            let value = format!("value-{i:05}");
            tree_insert(&mut src, &mut root, &mut height, key.as_bytes(), value.as_bytes(), NodeFlags::empty(), false).unwrap();
            expect.push((key.into_bytes(), value.into_bytes()));
        }
        assert!(height > 1, "200 small keys in 512-byte pages must outgrow a single leaf");
        let got = collect_leaves(&src, root, height);
        assert_eq!(got, expect, "in-order leaf walk must match ascending insert order");
    }

    #[test]
    fn reinserting_same_key_replaces_value_without_duplicate() {
        let mut src = MemSource::new(4096);
        let mut root = INVALID_PGNO;
        let mut height = 0;
        tree_insert(&mut src, &mut root, &mut height, b"a", b"1", NodeFlags::empty(), false).unwrap();
        tree_insert(&mut src, &mut root, &mut height, b"a", b"2", NodeFlags::empty(), false).unwrap();
        assert_eq!(collect_leaves(&src, root, height), vec![(b"a".to_vec(), b"2".to_vec())]);
    }

    #[test]
    fn delete_on_empty_tree_returns_false() {
        let mut src = MemSource::new(4096);
        let mut root = INVALID_PGNO;
        let mut height = 0;
        assert!(!tree_delete(&mut src, &mut root, &mut height, b"a").unwrap());
    }

    #[test]
    fn delete_missing_key_returns_false_and_leaves_tree_intact() {
        let mut src = MemSource::new(4096);
        let mut root = INVALID_PGNO;
        let mut height = 0;
        tree_insert(&mut src, &mut root, &mut height, b"a", b"1", NodeFlags::empty(), false).unwrap();
        assert!(!tree_delete(&mut src, &mut root, &mut height, b"zzz").unwrap());
        assert_eq!(collect_leaves(&src, root, height), vec![(b"a".to_vec(), b"1".to_vec())]);
    }

    #[test]
    fn delete_last_key_empties_tree() {
        let mut src = MemSource::new(4096);
        let mut root = INVALID_PGNO;
        let mut height = 0;
        tree_insert(&mut src, &mut root, &mut height, b"a", b"1", NodeFlags::empty(), false).unwrap();
        assert!(tree_delete(&mut src, &mut root, &mut height, b"a").unwrap());
        assert_eq!(root, INVALID_PGNO);
        assert_eq!(height, 0);
    }

    #[test]
    fn deleting_down_to_one_leaf_collapses_root_height() {
        let mut src = MemSource::new(512);
        let mut root = INVALID_PGNO;
        let mut height = 0;
        let mut keys = Vec::new();
        for i in 0..200u32 {
            let key = format!("key-{i:05}");
            tree_insert(&mut src, &mut root, &mut height, key.as_bytes(), b"v", NodeFlags::empty(), false).unwrap();
            keys.push(key);
        }
        assert!(height > 1);
        // Delete all but the first handful of keys; what remains should
        // fit back into a single leaf and height should shrink to 1.
        for key in keys.iter().skip(3) {
            assert!(tree_delete(&mut src, &mut root, &mut height, key.as_bytes()).unwrap());
        }
        assert_eq!(height, 1, "deleting down to a few keys must collapse branch levels");
        assert_eq!(tree_height(&src, root), 1);
        let remaining = collect_leaves(&src, root, height);
        assert_eq!(remaining.len(), 3);
    }

    #[test]
    fn ascending_then_descending_inserts_keep_sorted_order() {
        let mut src = MemSource::new(512);
        let mut root = INVALID_PGNO;
        let mut height = 0;
        let mut expect: Vec<Vec<u8>> = Vec::new();
        for i in (0..100u32).rev() {
            let key = format!("k{i:05}");
            tree_insert(&mut src, &mut root, &mut height, key.as_bytes(), b"v", NodeFlags::empty(), false).unwrap();
            expect.push(key.into_bytes());
        }
        expect.sort();
        let got: Vec<Vec<u8>> = collect_leaves(&src, root, height).into_iter().map(|(k, _)| k).collect();
        assert_eq!(got, expect);
    }

    #[test]
    fn interleaved_insert_and_delete_leaves_consistent_tree() {
        let mut src = MemSource::new(512);
        let mut root = INVALID_PGNO;
        let mut height = 0;
        let mut live: Vec<u32> = Vec::new();
        for i in 0..150u32 {
            let key = format!("k{i:05}");
            tree_insert(&mut src, &mut root, &mut height, key.as_bytes(), b"v", NodeFlags::empty(), false).unwrap();
            live.push(i);
            if i % 3 == 0 && i >= 30 {
                let victim = i - 30;
                let vkey = format!("k{victim:05}");
                assert!(tree_delete(&mut src, &mut root, &mut height, vkey.as_bytes()).unwrap());
                live.retain(|&x| x != victim);
            }
        }
        let mut expect: Vec<Vec<u8>> = live.iter().map(|i| format!("k{i:05}").into_bytes()).collect();
        expect.sort();
        let got: Vec<Vec<u8>> = collect_leaves(&src, root, height).into_iter().map(|(k, _)| k).collect();
        assert_eq!(got, expect);
    }
}
