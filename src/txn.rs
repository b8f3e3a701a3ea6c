//! Read and write transactions (spec §4.3, §4.9, §4.13, §4.14).
//!
//! A `ReadTxn` is a pinned snapshot: a published reader-table slot plus a
//! copy of the meta-triplet's chosen snapshot (main tree, GC tree,
//! geometry). A `WriteTxn` is the single mutator: it owns the dirty-page
//! list, the reclaimed/loose/retired pgno bookkeeping, and implements
//! `cursor::PageSource`, `rebalance::PageSourceMut`, `gc::AllocSource` and
//! `gc::GcStore` directly, so `rebalance::tree_insert/tree_delete` and
//! `gc::allocate/gc_update` run against it with no adapter layer.

use crate::consts::COHERENCY_MAX_RETRIES;
use crate::cursor::{Cursor, PageSource};
use crate::dpl::Dpl;
use crate::error::{Error, Result};
use crate::gc::allocator::AllocSource;
use crate::gc::updater::GcStore;
use crate::gc::{allocate, gc_update};
use crate::meta::{Canary, Geometry, TableFlags, TreeDescriptor, INVALID_PGNO};
use crate::page::{NodeFlags, Page, PageFlags, PAGE_HEADER_SIZE};
use crate::pager::Pager;
use crate::pnl::{Pgno, Pnl};
use crate::reader::BoundSlot;
use crate::rebalance::{tree_delete, tree_insert, PageSourceMut};
use crate::spill::{maybe_spill, SpillList, SpillSource};
use crate::table::{decode_tree_descriptor, encode_tree_descriptor, Table, TableRegistry};
use std::collections::HashMap;

/// Budget (in pages) past which a write txn spills its least-recently
/// touched dirty pages to the file rather than growing the in-memory
/// dirty list without bound (spec §4.10). Not a tunable spec.md
/// exposes; chosen generously since nothing here runs on constrained
/// embedded targets.
const DIRTY_ROOM_LIMIT_PAGES: u64 = 8192;

/// Shared, env-wide pieces a transaction needs without owning them: the
/// pager, the table directory, and the committed-state snapshot a new
/// txn starts from. `env.rs`'s `Environment` embeds this and hands out
/// `&EnvShared` to transactions it constructs.
pub(crate) struct EnvShared {
    pub pager: Pager,
    pub readers: crate::reader::ReaderTable,
    pub reader_cache: crate::reader::ReaderCache,
    pub tables: TableRegistry,
    pub state: parking_lot::Mutex<CommitState>,
    pub pid: u64,
    pub lifo_reclaim: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct CommitState {
    pub txnid: u64,
    pub main_tree: TreeDescriptor,
    pub gc_tree: TreeDescriptor,
    pub geometry: Geometry,
    pub canary: Canary,
    pub boot_id: [u64; 2],
    pub pages_retired: u64,
}

fn current_pid() -> u64 {
    std::process::id() as u64
}

/// Thread ids aren't inherently numeric in Rust; hash the opaque
/// `ThreadId` down to a `u64`, clamped away from the `TID_FREE` sentinel.
fn current_tid() -> u64 {
    use std::hash::{Hash, Hasher};
    let mut h = std::collections::hash_map::DefaultHasher::new();
    std::thread::current().id().hash(&mut h);
    h.finish().max(1)
}

/// Reconstruct a page's full byte span from the mmap, growing past one
/// `pagesize` chunk only for the head page of a LARGE run (`extra` is
/// only a page count when the LARGE flag is set — for DUPFIX leaves it's
/// the record size, and reading it as a page count would walk off the
/// end of the file).
fn read_committed_page(pager: &Pager, pgno: Pgno) -> Result<Page> {
    let first = pager.page_at(pgno)?;
    let npages = {
        let view = crate::page::PageView::new(&first);
        if view.flags().contains(PageFlags::LARGE) { view.num_pages() } else { 1 }
    };
    if npages <= 1 {
        return Ok(Page::from_bytes(first.to_vec()));
    }
    let mut data = Vec::with_capacity(npages as usize * pager.pagesize());
    data.extend_from_slice(&first);
    drop(first);
    for i in 1..npages as u64 {
        let more = pager.page_at(pgno + i)?;
        data.extend_from_slice(&more);
    }
    Ok(Page::from_bytes(data))
}

fn read_page_through(pager: &Pager, dpl: &Dpl, pgno: Pgno) -> Result<Page> {
    if let Some(dp) = dpl.find(pgno) {
        return Ok(Page::from_bytes(dp.data.clone()));
    }
    read_committed_page(pager, pgno)
}

/// Descend a tree for `key`, returning the matching leaf node's raw
/// flags/value without a cursor's DUPSORT/DUPFIX resolution layered on
/// top — used by `get` to make its own decision about a `BIG` value.
fn lookup_raw<S: PageSource>(src: &S, root: Pgno, key: &[u8]) -> Result<Option<(NodeFlags, Vec<u8>)>> {
    let mut pgno = root;
    loop {
        let page = src.read_page(pgno)?;
        let view = page.view();
        if view.flags().contains(PageFlags::BRANCH) {
            let idx = match view.search_key(key) {
                Ok(i) => i,
                Err(i) => i.saturating_sub(1),
            };
            pgno = view.branch(idx).child_pgno;
        } else {
            return match view.search_key(key) {
                Ok(i) => {
                    let l = view.leaf(i);
                    Ok(Some((l.flags, l.value.to_vec())))
                }
                Err(_) => Ok(None),
            };
        }
    }
}

/// Read a `BIG` (non-DUP) node's full value out of its overflow run. The
/// node's stored bytes are `pgno(8) || true_len(4)` (see `rebalance.rs`):
/// the run itself is page-rounded and can't recover the exact length.
fn read_large_value<S: PageSource>(src: &S, node_value: &[u8]) -> Result<Vec<u8>> {
    let pgno = u64::from_le_bytes(node_value[..8].try_into().unwrap());
    let len = u32::from_le_bytes(node_value[8..12].try_into().unwrap()) as usize;
    let page = src.read_page(pgno)?;
    Ok(page.data[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + len].to_vec())
}

fn resolved_value<S: PageSource>(src: &S, flags: NodeFlags, value: Vec<u8>) -> Result<Vec<u8>> {
    if flags.contains(NodeFlags::BIG) && !flags.contains(NodeFlags::DUP) {
        read_large_value(src, &value)
    } else {
        Ok(value)
    }
}

/// Compact a scratch subpage down to the bytes its entries actually use
/// (header + entry array + live key/value region), dropping the free
/// gap in the middle — the shape a real inline DUPSORT leaf value must
/// have, since it has to fit inside a page no bigger than its own.
fn pack_subpage(sub: &Page) -> Vec<u8> {
    let used = {
        let view = sub.view();
        view.lower() + (sub.data.len() - view.upper())
    };
    crate::node::shrink_subpage(sub, used).data
}

/// Largest compacted subpage an outer leaf can hold for `key`: the outer
/// page's usable body minus the entry slot and node header the outer
/// leaf node itself needs.
fn max_inline_subpage_len(pagesize: usize, key: &[u8]) -> usize {
    let overhead = crate::page::ENTRY_SIZE + crate::node::leaf_node_size(key, 0);
    (pagesize - PAGE_HEADER_SIZE).saturating_sub(overhead)
}

fn encode_dup_subtree(root: Pgno, height: u32) -> Vec<u8> {
    let mut out = root.to_le_bytes().to_vec();
    out.extend_from_slice(&height.to_le_bytes());
    out
}

fn decode_dup_subtree(value: &[u8]) -> (Pgno, u32) {
    let root = u64::from_le_bytes(value[..8].try_into().unwrap());
    let height = u32::from_le_bytes(value[8..12].try_into().unwrap());
    (root, height)
}

/// Build a scratch subpage (big enough to never spuriously overflow)
/// holding `first` and `second` as DUPSORT "values stored as keys".
fn two_value_subpage(pagesize: usize, first: &[u8], second: &[u8]) -> Page {
    let mut scratch = Page::new(pagesize);
    scratch.init(0, PageFlags::LEAF, pagesize);
    let idx0 = scratch.view().search_key(first).unwrap_err();
    scratch.add_leaf(idx0, first, b"", NodeFlags::empty()).expect("fresh scratch page always has room for two entries");
    let idx1 = scratch.view().search_key(second).unwrap_err();
    scratch.add_leaf(idx1, second, b"", NodeFlags::empty()).expect("fresh scratch page always has room for two entries");
    scratch
}

/// Net change in each page kind across one logical tree mutation (spec
/// §3 `tree_t`'s `branch_pages`/`leaf_pages`/`large_pages`). Reset before
/// a `tree_insert`/`tree_delete` call and applied to the mutated table's
/// descriptor right after, so a promoted DUPSORT sub-tree's freshly
/// built pages land in the same window as the outer insert that caused
/// them.
#[derive(Debug, Default, Clone, Copy)]
struct PageCountDelta {
    branch: i64,
    leaf: i64,
    large: i64,
}

impl PageCountDelta {
    fn bump(&mut self, flags: PageFlags, delta: i64) {
        if flags.contains(PageFlags::LARGE) {
            self.large += delta;
        } else if flags.contains(PageFlags::BRANCH) {
            self.branch += delta;
        } else {
            self.leaf += delta;
        }
    }
}

fn apply_page_delta(desc: &mut TreeDescriptor, delta: &PageCountDelta) {
    desc.branch_pages.set((desc.branch_pages.get() as i64 + delta.branch).max(0) as u64);
    desc.leaf_pages.set((desc.leaf_pages.get() as i64 + delta.leaf).max(0) as u64);
    desc.large_pages.set((desc.large_pages.get() as i64 + delta.large).max(0) as u64);
}

fn gc_key(txnid: u64) -> [u8; 8] {
    txnid.to_ne_bytes()
}

fn encode_gc_value(pnl: &Pnl) -> Vec<u8> {
    let mut out = Vec::with_capacity(pnl.len() * 8);
    for p in pnl.iter() {
        out.extend_from_slice(&p.to_le_bytes());
    }
    out
}

pub(crate) fn decode_gc_value(bytes: &[u8]) -> Pnl {
    Pnl::from(bytes.chunks_exact(8).map(|c| u64::from_le_bytes(c.try_into().unwrap())).collect::<Vec<_>>())
}

// ---------------------------------------------------------------------
// Read transaction
// ---------------------------------------------------------------------

/// A pinned MVCC snapshot (spec §4.3 "Reader registration", §4.14
/// "Begin a read transaction"). Dropping it releases (but does not
/// unbind) its reader-table slot, so a thread reopening a read txn
/// shortly after reuses the same slot without a rescan.
pub struct ReadTxn<'env> {
    env: &'env EnvShared,
    slot: BoundSlot,
    txnid: u64,
    main_tree: TreeDescriptor,
    gc_tree: TreeDescriptor,
    geometry: Geometry,
}

impl<'env> ReadTxn<'env> {
    pub(crate) fn begin(env: &'env EnvShared) -> Result<Self> {
        let slot = env.readers.bind_slot(current_pid(), current_tid())?;
        let mut attempt = 0;
        loop {
            let (txnid, main_tree, gc_tree, geometry, upper) = {
                let st = env.state.lock();
                (st.txnid, st.main_tree, st.gc_tree, st.geometry, st.geometry.now.get())
            };
            env.readers.publish(&slot, txnid, upper, 0);
            let confirm = env.state.lock().txnid;
            if confirm == txnid {
                return Ok(ReadTxn { env, slot, txnid, main_tree, gc_tree, geometry });
            }
            attempt += 1;
            if attempt >= COHERENCY_MAX_RETRIES {
                env.readers.unbind(slot);
                return Err(Error::MvccRetarded);
            }
        }
    }

    pub fn txnid(&self) -> u64 {
        self.txnid
    }

    pub(crate) fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub(crate) fn tree_for(&self, table: Table) -> Result<TreeDescriptor> {
        if table.dbi == Table::MAIN.dbi {
            return Ok(self.main_tree);
        }
        if table.dbi == Table::GC.dbi {
            return Ok(self.gc_tree);
        }
        let name = self.env.tables.name(table)?.ok_or(Error::BadDbi)?;
        let Some(root) = self.main_tree.root() else {
            return Ok(TreeDescriptor::empty());
        };
        let mut cur = Cursor::new(self, root, false, false);
        match cur.set(name.as_bytes())? {
            Some(e) => decode_tree_descriptor(&e.value),
            None => Ok(TreeDescriptor::empty()),
        }
    }

    pub fn get(&self, table: Table, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let desc = self.tree_for(table)?;
        let Some(root) = desc.root() else { return Ok(None) };
        match lookup_raw(self, root, key)? {
            Some((flags, value)) => Ok(Some(resolved_value(self, flags, value)?)),
            None => Ok(None),
        }
    }

    pub fn cursor(&self, table: Table) -> Result<Cursor<'_, Self>> {
        let desc = self.tree_for(table)?;
        let flags = self.env.tables.flags(table)?;
        let root = desc.root().unwrap_or(INVALID_PGNO);
        Ok(Cursor::new(self, root, flags.contains(TableFlags::DUPSORT), flags.contains(TableFlags::DUPFIXED)))
    }

    pub fn abort(self) {}
}

impl<'env> PageSource for ReadTxn<'env> {
    fn pagesize(&self) -> usize {
        self.env.pager.pagesize()
    }
    fn read_page(&self, pgno: Pgno) -> Result<Page> {
        read_committed_page(&self.env.pager, pgno)
    }
}

impl<'env> Drop for ReadTxn<'env> {
    fn drop(&mut self) {
        self.env.readers.release(&self.slot);
    }
}

// ---------------------------------------------------------------------
// Write transaction
// ---------------------------------------------------------------------

/// The single mutator (spec §4.9 "Write transaction lifecycle"). Callers
/// obtain one from `Environment::begin_write`, which also enforces
/// single-writer exclusion; dropping without `commit()` aborts, discarding
/// every dirty page and pgno-list change.
pub struct WriteTxn<'env> {
    env: &'env EnvShared,
    txnid: u64,
    geometry: Geometry,
    main_tree: TreeDescriptor,
    gc_tree: TreeDescriptor,
    canary: Canary,
    dpl: Dpl,
    repnl: Pnl,
    loose: Vec<Pgno>,
    retired: Pnl,
    spilled: SpillList,
    ready4reuse: Vec<u64>,
    table_trees: HashMap<u32, TreeDescriptor>,
    oldest_live: u64,
    done: bool,
    page_delta: PageCountDelta,
    /// Nesting depth (spec §4.13 `begin(parent)`): 0 for a top-level
    /// transaction, parent's depth + 1 for a child. Only a depth-0 txn
    /// may run `finish_commit`/advance the meta-triplet; a child commits
    /// by folding into its parent via `txn_merge`.
    depth: u32,
}

impl<'env> WriteTxn<'env> {
    pub(crate) fn begin(env: &'env EnvShared) -> Result<Self> {
        let st = env.state.lock();
        let oldest_live = env.readers.oldest_live().unwrap_or(st.txnid + 1);
        Ok(WriteTxn {
            env,
            txnid: st.txnid + 1,
            geometry: st.geometry,
            main_tree: st.main_tree,
            gc_tree: st.gc_tree,
            canary: st.canary,
            dpl: Dpl::new(),
            repnl: Pnl::new(),
            loose: Vec::new(),
            retired: Pnl::new(),
            spilled: SpillList::new(),
            ready4reuse: Vec::new(),
            table_trees: HashMap::new(),
            oldest_live,
            done: false,
            page_delta: PageCountDelta::default(),
            depth: 0,
        })
    }

    /// Begin a child (nested) write transaction under `parent` (spec
    /// §4.13 `begin(parent)`). The child forks the parent's entire
    /// in-progress scratch state — dirty pages, loose/retired/reclaimed
    /// pgno lists, tree descriptors, canary — and mutates its own copy
    /// in complete isolation. It shares the parent's writer exclusion
    /// (the same thread already holds `Environment`'s `writer_lock`), so
    /// no additional locking is needed; the two transactions simply
    /// never run concurrently.
    ///
    /// This forked-state design (rather than a page-generation-tagged
    /// shared dirty list) means `commit_nested`/`txn_merge` can fold a
    /// committed child back by wholesale-replacing the parent's fields
    /// with the child's, and an aborted child's fork is just dropped —
    /// see DESIGN.md for why that's equivalent here to the spec's
    /// merge-on-commit / discard-on-abort semantics for a single-writer,
    /// non-concurrent nesting model.
    pub(crate) fn begin_nested(parent: &WriteTxn<'env>) -> Self {
        WriteTxn {
            env: parent.env,
            txnid: parent.txnid,
            geometry: parent.geometry,
            main_tree: parent.main_tree,
            gc_tree: parent.gc_tree,
            canary: parent.canary,
            dpl: parent.dpl.clone(),
            repnl: parent.repnl.clone(),
            loose: parent.loose.clone(),
            retired: parent.retired.clone(),
            spilled: parent.spilled.clone(),
            ready4reuse: parent.ready4reuse.clone(),
            table_trees: parent.table_trees.clone(),
            oldest_live: parent.oldest_live,
            done: false,
            page_delta: PageCountDelta::default(),
            depth: parent.depth + 1,
        }
    }

    pub(crate) fn depth(&self) -> u32 {
        self.depth
    }

    /// Fold a committed child's final state back into `self` (spec
    /// §4.13 commit step 2, `txn_merge`). The child was forked from
    /// `self`'s own state and only ever mutated its own copy, so its
    /// bookkeeping already supersedes `self`'s — adopt it wholesale.
    /// Page-count deltas accumulate rather than replace, since `self`
    /// may already have its own pending delta from work done before the
    /// child began.
    pub(crate) fn txn_merge(&mut self, mut child: WriteTxn<'env>) {
        self.geometry = child.geometry;
        self.main_tree = child.main_tree;
        self.gc_tree = child.gc_tree;
        self.canary = child.canary;
        self.dpl = std::mem::take(&mut child.dpl);
        self.repnl = std::mem::take(&mut child.repnl);
        self.loose = std::mem::take(&mut child.loose);
        self.retired = std::mem::take(&mut child.retired);
        self.spilled = std::mem::take(&mut child.spilled);
        self.ready4reuse = std::mem::take(&mut child.ready4reuse);
        self.table_trees = std::mem::take(&mut child.table_trees);
        self.page_delta.branch += child.page_delta.branch;
        self.page_delta.leaf += child.page_delta.leaf;
        self.page_delta.large += child.page_delta.large;
        child.mark_aborted();
    }

    fn take_page_delta(&mut self) -> PageCountDelta {
        std::mem::take(&mut self.page_delta)
    }

    pub fn txnid(&self) -> u64 {
        self.txnid
    }

    pub fn canary(&self) -> Canary {
        self.canary
    }

    pub fn set_canary(&mut self, canary: Canary) {
        self.canary = canary;
    }

    fn load_tree(&mut self, table: Table) -> Result<()> {
        if self.table_trees.contains_key(&table.dbi) {
            return Ok(());
        }
        let desc = if table.dbi == Table::MAIN.dbi {
            self.main_tree
        } else if table.dbi == Table::GC.dbi {
            self.gc_tree
        } else {
            let name = self.env.tables.name(table)?.ok_or(Error::BadDbi)?;
            let found = match self.main_tree.root() {
                Some(root) => {
                    let mut cur = Cursor::new(&*self, root, false, false);
                    cur.set(name.as_bytes())?
                }
                None => None,
            };
            match found {
                Some(e) => decode_tree_descriptor(&e.value)?,
                None => {
                    let mut d = TreeDescriptor::empty();
                    d.flags.set(self.env.tables.flags(table)?.bits());
                    d
                }
            }
        };
        self.table_trees.insert(table.dbi, desc);
        Ok(())
    }

    fn tree_of(&mut self, table: Table) -> Result<TreeDescriptor> {
        self.load_tree(table)?;
        Ok(*self.table_trees.get(&table.dbi).expect("just loaded"))
    }

    pub fn put(&mut self, table: Table, key: &[u8], value: &[u8], flags: NodeFlags) -> Result<()> {
        let mut desc = self.tree_of(table)?;
        let is_dupsort = self.env.tables.flags(table)?.contains(TableFlags::DUPSORT);
        let mut root = desc.root.get();
        let mut height = desc.height.get();
        self.page_delta = PageCountDelta::default();
        let is_new = if is_dupsort {
            self.put_dup(&mut root, &mut height, key, value, flags)?
        } else {
            let existed = root != INVALID_PGNO && lookup_raw(&*self, root, key)?.is_some();
            tree_insert(self, &mut root, &mut height, key, value, flags, false)?;
            !existed
        };
        let delta = self.take_page_delta();
        desc.root.set(root);
        desc.height.set(height);
        if is_new {
            desc.items.set(desc.items.get() + 1);
        }
        desc.mod_txnid.set(self.txnid);
        apply_page_delta(&mut desc, &delta);
        self.table_trees.insert(table.dbi, desc);
        self.commit_tree_descriptor(table, desc)?;
        maybe_spill(self, DIRTY_ROOM_LIMIT_PAGES)
    }

    /// DUPSORT insert (spec §4.7 "sub-page"): a key's duplicate set is
    /// kept as a sorted, inline subpage nested in the outer leaf node's
    /// value while it's small, and promoted to a standalone sub-tree
    /// (`DUP|BIG`, the form `cursor.rs`'s `DupNav::SubTree` already
    /// reads) once one more duplicate would no longer fit compacted into
    /// the outer leaf. Returns whether a genuinely new `(key, value)`
    /// pair was added, vs. an idempotent re-put of a duplicate that was
    /// already present.
    fn put_dup(&mut self, root: &mut Pgno, height: &mut u32, key: &[u8], value: &[u8], flags: NodeFlags) -> Result<bool> {
        let existing = if *root == INVALID_PGNO { None } else { lookup_raw(&*self, *root, key)? };
        let pagesize = self.env.pager.pagesize();
        match existing {
            None => {
                tree_insert(self, root, height, key, value, flags, true)?;
                Ok(true)
            }
            Some((node_flags, node_value)) if node_flags.contains(NodeFlags::DUP) && node_flags.contains(NodeFlags::BIG) => {
                let (sroot, sheight) = decode_dup_subtree(&node_value);
                if self.dup_subtree_contains(sroot, value)? {
                    return Ok(false);
                }
                self.promote_dup_subtree(root, height, key, sroot, sheight, value)?;
                Ok(true)
            }
            Some((node_flags, node_value)) if node_flags.contains(NodeFlags::DUP) => {
                let sub = Page::from_bytes(node_value);
                if sub.view().search_key(value).is_ok() {
                    return Ok(false);
                }
                let limit = max_inline_subpage_len(pagesize, key);
                // `sub` is already packed to its exact used size (every inline
                // subpage is stored that way); grow just enough scratch room
                // for one more entry before inserting into it.
                let target = sub.data.len() + crate::page::ENTRY_SIZE + crate::node::leaf_node_size(value, 0);
                let mut scratch = crate::node::shrink_subpage(&sub, target);
                let idx = scratch.view().search_key(value).unwrap_err();
                scratch.add_leaf(idx, value, b"", NodeFlags::empty())?;
                let packed = pack_subpage(&scratch);
                if packed.len() <= limit {
                    tree_insert(self, root, height, key, &packed, NodeFlags::DUP, true)?;
                } else {
                    let view = sub.view();
                    let values: Vec<Vec<u8>> = (0..view.count()).map(|i| view.leaf(i).key.to_vec()).collect();
                    drop(view);
                    self.promote_dup_subpage(root, height, key, values, Some(value.to_vec()))?;
                }
                Ok(true)
            }
            Some((_, node_value)) if node_value == value => Ok(false),
            Some((_, node_value)) => {
                let (first, second) = if node_value.as_slice() < value { (node_value, value.to_vec()) } else { (value.to_vec(), node_value) };
                let scratch = two_value_subpage(pagesize, &first, &second);
                let packed = pack_subpage(&scratch);
                let limit = max_inline_subpage_len(pagesize, key);
                if packed.len() <= limit {
                    tree_insert(self, root, height, key, &packed, NodeFlags::DUP, true)?;
                } else {
                    self.promote_dup_subpage(root, height, key, vec![first, second], None)?;
                }
                Ok(true)
            }
        }
    }

    /// Build a fresh DUPSORT sub-tree holding `values` (each stored as a
    /// duplicate-value key with an empty payload, matching the inline
    /// subpage convention `cursor.rs::dup_value_at` relies on).
    fn build_dup_subtree(&mut self, values: impl IntoIterator<Item = Vec<u8>>) -> Result<(Pgno, u32)> {
        let mut sroot = INVALID_PGNO;
        let mut sheight = 0u32;
        for v in values {
            tree_insert(self, &mut sroot, &mut sheight, &v, b"", NodeFlags::empty(), true)?;
        }
        Ok((sroot, sheight))
    }

    /// Replace an inline subpage's outer node with a promoted `DUP|BIG`
    /// sub-tree containing its existing duplicates plus `new_value`
    /// (already-complete lists pass `None`).
    fn promote_dup_subpage(&mut self, root: &mut Pgno, height: &mut u32, key: &[u8], mut values: Vec<Vec<u8>>, new_value: Option<Vec<u8>>) -> Result<()> {
        if let Some(v) = new_value {
            values.push(v);
        }
        let (sroot, sheight) = self.build_dup_subtree(values)?;
        let encoded = encode_dup_subtree(sroot, sheight);
        tree_insert(self, root, height, key, &encoded, NodeFlags::DUP | NodeFlags::BIG, true)
    }

    /// Grow an already-promoted sub-tree by one more duplicate.
    fn promote_dup_subtree(&mut self, root: &mut Pgno, height: &mut u32, key: &[u8], mut sroot: Pgno, mut sheight: u32, value: &[u8]) -> Result<()> {
        tree_insert(self, &mut sroot, &mut sheight, value, b"", NodeFlags::empty(), true)?;
        let encoded = encode_dup_subtree(sroot, sheight);
        tree_insert(self, root, height, key, &encoded, NodeFlags::DUP | NodeFlags::BIG, true)
    }

    fn dup_subtree_contains(&self, sroot: Pgno, value: &[u8]) -> Result<bool> {
        Ok(lookup_raw(self, sroot, value)?.is_some())
    }

    /// Count the duplicates held in a promoted sub-tree, by walking it
    /// with a plain non-DUPSORT cursor (its leaves are the duplicate
    /// values themselves).
    fn count_dup_subtree(&self, sroot: Pgno) -> Result<u64> {
        let mut cur = Cursor::new(self, sroot, false, false);
        let mut n = 0u64;
        let mut entry = cur.first()?;
        while entry.is_some() {
            n += 1;
            entry = cur.next(crate::cursor::NextMode::Normal)?;
        }
        Ok(n)
    }

    /// Retire every page of a promoted sub-tree below its root. The root
    /// itself is retired by `tree_delete`'s generic `BIG`-flag handling
    /// (it reads the head pgno straight out of the deleted node's
    /// value), so retiring it again here would double-free it.
    fn retire_subtree_descendants(&mut self, root: Pgno) -> Result<()> {
        let page = self.read_page(root)?;
        if page.flags().contains(PageFlags::BRANCH) {
            let view = page.view();
            let children: Vec<Pgno> = (0..view.count()).map(|i| view.branch(i).child_pgno).collect();
            drop(view);
            for child in children {
                self.retire_subtree_pages(child)?;
            }
        }
        Ok(())
    }

    fn retire_subtree_pages(&mut self, pgno: Pgno) -> Result<()> {
        let page = self.read_page(pgno)?;
        if page.flags().contains(PageFlags::BRANCH) {
            let view = page.view();
            let children: Vec<Pgno> = (0..view.count()).map(|i| view.branch(i).child_pgno).collect();
            drop(view);
            for child in children {
                self.retire_subtree_pages(child)?;
            }
        }
        PageSourceMut::retire_page(self, pgno);
        Ok(())
    }

    pub fn delete(&mut self, table: Table, key: &[u8]) -> Result<bool> {
        let mut desc = self.tree_of(table)?;
        let Some(mut root) = desc.root() else { return Ok(false) };
        let looked_up = lookup_raw(&*self, root, key)?;
        let removed_count = match &looked_up {
            Some((flags, value)) if flags.contains(NodeFlags::DUP) && flags.contains(NodeFlags::BIG) => {
                let (sroot, _) = decode_dup_subtree(value);
                self.count_dup_subtree(sroot)?.max(1)
            }
            Some((flags, value)) if flags.contains(NodeFlags::DUP) => Page::from_bytes(value.clone()).view().count().max(1) as u64,
            Some(_) => 1,
            None => 0,
        };
        let subtree_root = match &looked_up {
            Some((flags, value)) if flags.contains(NodeFlags::DUP) && flags.contains(NodeFlags::BIG) => Some(decode_dup_subtree(value).0),
            _ => None,
        };
        let mut height = desc.height.get();
        self.page_delta = PageCountDelta::default();
        if let Some(sroot) = subtree_root {
            self.retire_subtree_descendants(sroot)?;
        }
        let removed = tree_delete(self, &mut root, &mut height, key)?;
        let delta = self.take_page_delta();
        if removed {
            desc.set_root((root != INVALID_PGNO).then_some(root));
            desc.height.set(height);
            desc.items.set(desc.items.get().saturating_sub(removed_count.max(1)));
            desc.mod_txnid.set(self.txnid);
            apply_page_delta(&mut desc, &delta);
            self.table_trees.insert(table.dbi, desc);
            self.commit_tree_descriptor(table, desc)?;
        }
        maybe_spill(self, DIRTY_ROOM_LIMIT_PAGES)?;
        Ok(removed)
    }

    /// For user tables (dbi >= 2), write the updated `tree_t` back into
    /// MainDB right away rather than only at commit — a later `get`/
    /// `cursor` against MainDB within the same txn must see it.
    fn commit_tree_descriptor(&mut self, table: Table, desc: TreeDescriptor) -> Result<()> {
        if table.dbi == Table::MAIN.dbi {
            self.main_tree = desc;
            return Ok(());
        }
        if table.dbi == Table::GC.dbi {
            self.gc_tree = desc;
            return Ok(());
        }
        let name = self.env.tables.name(table)?.ok_or(Error::BadDbi)?;
        let mut root = self.main_tree.root.get();
        let mut height = self.main_tree.height.get();
        let encoded = encode_tree_descriptor(&desc);
        self.page_delta = PageCountDelta::default();
        tree_delete(self, &mut root, &mut height, name.as_bytes())?;
        tree_insert(self, &mut root, &mut height, name.as_bytes(), &encoded, NodeFlags::TREE, false)?;
        let delta = self.take_page_delta();
        self.main_tree.root.set(root);
        self.main_tree.height.set(height);
        self.main_tree.items.set(self.main_tree.items.get().max(1));
        apply_page_delta(&mut self.main_tree, &delta);
        self.table_trees.insert(Table::MAIN.dbi, self.main_tree);
        Ok(())
    }

    pub fn get(&mut self, table: Table, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let desc = self.tree_of(table)?;
        let Some(root) = desc.root() else { return Ok(None) };
        match lookup_raw(&*self, root, key)? {
            Some((flags, value)) => Ok(Some(resolved_value(&*self, flags, value)?)),
            None => Ok(None),
        }
    }

    pub fn cursor(&mut self, table: Table) -> Result<Cursor<'_, Self>> {
        let desc = self.tree_of(table)?;
        let flags = self.env.tables.flags(table)?;
        let root = desc.root().unwrap_or(INVALID_PGNO);
        Ok(Cursor::new(self, root, flags.contains(TableFlags::DUPSORT), flags.contains(TableFlags::DUPFIXED)))
    }

    /// Finalize: run the GC rerere loop, write every dirty page, advance
    /// the meta-triplet (spec §4.9 step "commit", §4.12).
    pub(crate) fn finish_commit(mut self) -> Result<CommitState> {
        debug_assert_eq!(self.depth, 0, "a nested transaction must commit via txn_merge, not finish_commit");
        let pagesize = self.env.pager.pagesize();
        gc_update(&mut self, pagesize)?;

        self.dpl.sort();
        for dp in self.dpl.iter() {
            self.env.pager.write_page(dp.pgno, &dp.data[..pagesize.min(dp.data.len())])?;
            // LARGE runs span multiple physical pages; write the rest too.
            if dp.npages > 1 {
                for i in 1..dp.npages as u64 {
                    let start = i as usize * pagesize;
                    self.env.pager.write_page(dp.pgno + i, &dp.data[start..start + pagesize])?;
                }
            }
        }

        let (boot_id, prior_retired) = {
            let st = self.env.state.lock();
            (st.boot_id, st.pages_retired)
        };
        let state = CommitState {
            txnid: self.txnid,
            main_tree: self.main_tree,
            gc_tree: self.gc_tree,
            geometry: self.geometry,
            canary: self.canary,
            boot_id,
            pages_retired: prior_retired + self.retired.len() as u64,
        };
        self.done = true;
        Ok(state)
    }

    pub(crate) fn mark_aborted(mut self) {
        self.done = true;
    }
}

impl<'env> Drop for WriteTxn<'env> {
    fn drop(&mut self) {
        if !self.done {
            log::debug!("write txn {} dropped without commit/abort; treating as abort", self.txnid);
        }
    }
}

impl<'env> PageSource for WriteTxn<'env> {
    fn pagesize(&self) -> usize {
        self.env.pager.pagesize()
    }
    fn read_page(&self, pgno: Pgno) -> Result<Page> {
        read_page_through(&self.env.pager, &self.dpl, pgno)
    }
}

impl<'env> PageSourceMut for WriteTxn<'env> {
    fn touch_page(&mut self, pgno: Pgno) -> Result<Pgno> {
        if self.dpl.contains(pgno) {
            return Ok(pgno);
        }
        let page = self.read_page(pgno)?;
        let npages = if page.flags().contains(PageFlags::LARGE) { page.view().num_pages() } else { 1 };
        let new_pgno = self.alloc_page(npages)?;
        let mut moved = page;
        moved.set_pgno(new_pgno);
        self.retire_page(pgno);
        self.write_page(&moved);
        Ok(new_pgno)
    }

    fn alloc_page(&mut self, npages: u32) -> Result<Pgno> {
        let oldest_live = self.oldest_live;
        let lifo = self.env.lifo_reclaim;
        allocate(self, npages, oldest_live, lifo)
    }

    fn write_page(&mut self, page: &Page) {
        let npages = if page.flags().contains(PageFlags::LARGE) { page.view().num_pages() } else { 1 };
        let is_new = self.dpl.find(page.pgno()).is_none();
        if let Some(e) = self.dpl.find_mut(page.pgno()) {
            e.data = page.data.clone();
            e.npages = npages;
        } else {
            self.dpl.insert(page.pgno(), page.data.clone(), npages);
        }
        if is_new {
            self.page_delta.bump(page.flags(), 1);
        }
        // A page coming back into the dirty list is no longer purely a
        // spilled-to-disk shadow; drop its spill-list entry so later
        // stats/audit don't double-count it.
        self.spilled.unmark(page.pgno());
    }

    fn retire_page(&mut self, pgno: Pgno) {
        if let Some(dp) = self.dpl.wash(pgno) {
            let kind = Page::from_bytes(dp.data.clone()).flags();
            self.page_delta.bump(kind, -1);
            self.loose.push(pgno);
        } else {
            let kind = read_committed_page(&self.env.pager, pgno).map(|p| p.flags()).unwrap_or(PageFlags::LEAF);
            self.page_delta.bump(kind, -1);
            let _ = self.retired.insert(pgno);
        }
    }
}

impl<'env> SpillSource for WriteTxn<'env> {
    fn pagesize(&self) -> usize {
        self.env.pager.pagesize()
    }
    fn dpl_mut(&mut self) -> &mut Dpl {
        &mut self.dpl
    }
    fn spilled_mut(&mut self) -> &mut SpillList {
        &mut self.spilled
    }
    fn write_through(&mut self, pgno: Pgno, data: &[u8]) -> Result<()> {
        self.env.pager.write_page(pgno, data)
    }
}

impl<'env> AllocSource for WriteTxn<'env> {
    fn repnl(&mut self) -> &mut Pnl {
        &mut self.repnl
    }
    fn loose(&mut self) -> &mut Vec<Pgno> {
        &mut self.loose
    }
    fn first_unallocated(&self) -> Pgno {
        self.geometry.first_unallocated.get()
    }
    fn set_first_unallocated(&mut self, v: Pgno) {
        self.geometry.first_unallocated.set(v);
    }
    fn geo_upper_pages(&self) -> Pgno {
        self.geometry.upper.get()
    }
    fn ensure_mapped(&mut self, now_pages: Pgno) -> Result<()> {
        self.env.pager.resize(now_pages, crate::pager::ResizeMode::ImplicitGrow)
    }
    fn take_eligible_gc_record(&mut self, oldest_live: u64, lifo: bool) -> Result<Option<(u64, Pnl)>> {
        let Some(root) = self.gc_tree.root() else { return Ok(None) };
        let found_key = {
            let mut cur = Cursor::new(&*self, root, false, false);
            if lifo {
                match cur.last()? {
                    Some(e) => {
                        let k = u64::from_ne_bytes(e.key[..8].try_into().unwrap());
                        (k <= oldest_live).then_some(k)
                    }
                    None => None,
                }
            } else {
                match cur.first()? {
                    Some(e) => {
                        let k = u64::from_ne_bytes(e.key[..8].try_into().unwrap());
                        (k <= oldest_live).then_some(k)
                    }
                    None => None,
                }
            }
        };
        let Some(key) = found_key else { return Ok(None) };
        let value = {
            let mut cur = Cursor::new(&*self, root, false, false);
            cur.set(&gc_key(key))?.map(|e| e.value)
        };
        let Some(value) = value else { return Ok(None) };
        let pnl = decode_gc_value(&value);
        let mut root = root;
        let mut height = self.gc_tree.height.get();
        self.page_delta = PageCountDelta::default();
        tree_delete(self, &mut root, &mut height, &gc_key(key))?;
        let delta = self.take_page_delta();
        self.gc_tree.set_root((root != INVALID_PGNO).then_some(root));
        self.gc_tree.height.set(height);
        apply_page_delta(&mut self.gc_tree, &delta);
        Ok(Some((key, pnl)))
    }
    fn record_reclaimed_txnid(&mut self, txnid: u64) {
        self.ready4reuse.push(txnid);
    }
}

impl<'env> GcStore for WriteTxn<'env> {
    fn gc_put_record(&mut self, txnid: u64, pnl: &Pnl) -> Result<()> {
        let mut root = self.gc_tree.root.get();
        let mut height = self.gc_tree.height.get();
        let value = encode_gc_value(pnl);
        self.page_delta = PageCountDelta::default();
        tree_insert(self, &mut root, &mut height, &gc_key(txnid), &value, NodeFlags::empty(), false)?;
        let delta = self.take_page_delta();
        self.gc_tree.root.set(root);
        self.gc_tree.height.set(height);
        self.gc_tree.items.set(self.gc_tree.items.get() + 1);
        self.gc_tree.mod_txnid.set(self.txnid);
        apply_page_delta(&mut self.gc_tree, &delta);
        Ok(())
    }
    fn retired_pages(&mut self) -> &mut Pnl {
        &mut self.retired
    }
    fn ready4reuse(&mut self) -> &mut Vec<u64> {
        &mut self.ready4reuse
    }
    fn current_txnid(&self) -> u64 {
        self.txnid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::Geometry;
    use crate::table::TableRegistry;
    use tempfile::tempdir;

    fn fresh_env(dir: &std::path::Path) -> EnvShared {
        let pager = Pager::open(&dir.join("data.mdbrs"), 4096, 16).unwrap();
        let readers = crate::reader::ReaderTable::open(&dir.join("lock.mdbrs"), 8).unwrap();
        EnvShared {
            pager,
            readers,
            reader_cache: crate::reader::ReaderCache::new(),
            tables: TableRegistry::new(),
            state: parking_lot::Mutex::new(CommitState {
                txnid: 0,
                main_tree: TreeDescriptor::empty(),
                gc_tree: TreeDescriptor::empty(),
                geometry: Geometry::new(16, 16, 1 << 20, 0, 0, 3),
                canary: Canary::default(),
                boot_id: [1, 2],
                pages_retired: 0,
            }),
            pid: current_pid(),
            lifo_reclaim: false,
        }
    }

    #[test]
    fn put_get_delete_roundtrip_through_commit() {
        let dir = tempdir().unwrap();
        let env = fresh_env(dir.path());

        let mut wtxn = WriteTxn::begin(&env).unwrap();
        wtxn.put(Table::MAIN, b"alpha", b"1", NodeFlags::empty()).unwrap();
        wtxn.put(Table::MAIN, b"beta", b"2", NodeFlags::empty()).unwrap();
        assert_eq!(wtxn.get(Table::MAIN, b"alpha").unwrap(), Some(b"1".to_vec()));
        let state = wtxn.finish_commit().unwrap();
        *env.state.lock() = state;

        let rtxn = ReadTxn::begin(&env).unwrap();
        assert_eq!(rtxn.get(Table::MAIN, b"alpha").unwrap(), Some(b"1".to_vec()));
        assert_eq!(rtxn.get(Table::MAIN, b"beta").unwrap(), Some(b"2".to_vec()));
        assert_eq!(rtxn.get(Table::MAIN, b"missing").unwrap(), None);
        rtxn.abort();

        let mut wtxn2 = WriteTxn::begin(&env).unwrap();
        assert!(wtxn2.delete(Table::MAIN, b"alpha").unwrap());
        let state2 = wtxn2.finish_commit().unwrap();
        *env.state.lock() = state2;

        let rtxn2 = ReadTxn::begin(&env).unwrap();
        assert_eq!(rtxn2.get(Table::MAIN, b"alpha").unwrap(), None);
        assert_eq!(rtxn2.get(Table::MAIN, b"beta").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn large_value_roundtrips_through_overflow_run() {
        let dir = tempdir().unwrap();
        let env = fresh_env(dir.path());
        let big = vec![0x5Au8; 4096];

        let mut wtxn = WriteTxn::begin(&env).unwrap();
        wtxn.put(Table::MAIN, b"k", &big, NodeFlags::empty()).unwrap();
        let state = wtxn.finish_commit().unwrap();
        *env.state.lock() = state;

        let rtxn = ReadTxn::begin(&env).unwrap();
        assert_eq!(rtxn.get(Table::MAIN, b"k").unwrap(), Some(big));
    }

    #[test]
    fn named_table_put_survives_reopen_lookup() {
        let dir = tempdir().unwrap();
        let env = fresh_env(dir.path());
        let widgets = env.tables.open("widgets", TableFlags::CREATE).unwrap();

        let mut wtxn = WriteTxn::begin(&env).unwrap();
        wtxn.put(widgets, b"x", b"y", NodeFlags::empty()).unwrap();
        let state = wtxn.finish_commit().unwrap();
        *env.state.lock() = state;

        let rtxn = ReadTxn::begin(&env).unwrap();
        assert_eq!(rtxn.get(widgets, b"x").unwrap(), Some(b"y".to_vec()));
    }

    #[test]
    fn dupsort_put_builds_sorted_subpage_and_cursor_walks_in_order() {
        let dir = tempdir().unwrap();
        let env = fresh_env(dir.path());
        let d = env.tables.open("d", TableFlags::CREATE | TableFlags::DUPSORT).unwrap();

        let mut wtxn = WriteTxn::begin(&env).unwrap();
        wtxn.put(d, b"k", b"002", NodeFlags::empty()).unwrap();
        wtxn.put(d, b"k", b"001", NodeFlags::empty()).unwrap();
        wtxn.put(d, b"k", b"003", NodeFlags::empty()).unwrap();

        let mut cur = wtxn.cursor(d).unwrap();
        let first = cur.first().unwrap().unwrap();
        assert_eq!(first.key, b"k");
        assert_eq!(first.value, b"001");
        assert_eq!(cur.next_dup().unwrap().unwrap().value, b"002");
        assert_eq!(cur.next_dup().unwrap().unwrap().value, b"003");
        assert!(cur.next_dup().unwrap().is_none());
    }

    #[test]
    fn dupsort_reput_of_existing_duplicate_does_not_grow_entry_count() {
        let dir = tempdir().unwrap();
        let env = fresh_env(dir.path());
        let d = env.tables.open("d", TableFlags::CREATE | TableFlags::DUPSORT).unwrap();

        let mut wtxn = WriteTxn::begin(&env).unwrap();
        wtxn.put(d, b"k", b"001", NodeFlags::empty()).unwrap();
        wtxn.put(d, b"k", b"002", NodeFlags::empty()).unwrap();
        wtxn.put(d, b"k", b"001", NodeFlags::empty()).unwrap();
        let desc = wtxn.tree_of(d).unwrap();
        assert_eq!(desc.items.get(), 2);

        assert!(wtxn.delete(d, b"k").unwrap());
        let desc2 = wtxn.tree_of(d).unwrap();
        assert_eq!(desc2.items.get(), 0);
    }

    #[test]
    fn dupsort_subpage_promotes_to_subtree_without_data_loss() {
        let dir = tempdir().unwrap();
        let env = fresh_env(dir.path());
        let d = env.tables.open("d", TableFlags::CREATE | TableFlags::DUPSORT).unwrap();

        let mut wtxn = WriteTxn::begin(&env).unwrap();
        let mut values: Vec<Vec<u8>> = (0..40u32)
            .map(|i| {
                let mut v = format!("{i:03}").into_bytes();
                v.resize(200, b'.');
                v
            })
            .collect();
        for v in &values {
            wtxn.put(d, b"k", v, NodeFlags::empty()).unwrap();
        }
        let desc = wtxn.tree_of(d).unwrap();
        assert_eq!(desc.items.get(), 40, "every duplicate must still be counted after promotion");

        values.sort();
        let mut cur = wtxn.cursor(d).unwrap();
        let mut seen = Vec::new();
        let mut entry = cur.first().unwrap();
        while let Some(e) = entry {
            assert_eq!(e.key, b"k");
            seen.push(e.value.clone());
            entry = cur.next_dup().unwrap();
        }
        assert_eq!(seen, values, "promoted sub-tree must preserve every duplicate in sorted order");
    }

    #[test]
    fn dupsort_subtree_reput_of_existing_duplicate_is_idempotent() {
        let dir = tempdir().unwrap();
        let env = fresh_env(dir.path());
        let d = env.tables.open("d", TableFlags::CREATE | TableFlags::DUPSORT).unwrap();

        let mut wtxn = WriteTxn::begin(&env).unwrap();
        let values: Vec<Vec<u8>> = (0..40u32)
            .map(|i| {
                let mut v = format!("{i:03}").into_bytes();
                v.resize(200, b'.');
                v
            })
            .collect();
        for v in &values {
            wtxn.put(d, b"k", v, NodeFlags::empty()).unwrap();
        }
        // Re-putting an existing duplicate after promotion must not grow the count.
        wtxn.put(d, b"k", &values[5], NodeFlags::empty()).unwrap();
        let desc = wtxn.tree_of(d).unwrap();
        assert_eq!(desc.items.get(), 40);
    }

    #[test]
    fn dupsort_delete_after_promotion_retires_subtree_and_clears_items() {
        let dir = tempdir().unwrap();
        let env = fresh_env(dir.path());
        let d = env.tables.open("d", TableFlags::CREATE | TableFlags::DUPSORT).unwrap();

        let mut wtxn = WriteTxn::begin(&env).unwrap();
        for i in 0..40u32 {
            let mut v = format!("{i:03}").into_bytes();
            v.resize(200, b'.');
            wtxn.put(d, b"k", &v, NodeFlags::empty()).unwrap();
        }
        assert!(wtxn.delete(d, b"k").unwrap());
        let desc = wtxn.tree_of(d).unwrap();
        assert_eq!(desc.items.get(), 0);
        assert_eq!(desc.root(), None);

        // The table must still be usable after the promoted sub-tree's
        // pages are retired.
        wtxn.put(d, b"k2", b"fresh", NodeFlags::empty()).unwrap();
        assert_eq!(wtxn.get(d, b"k2").unwrap(), Some(b"fresh".to_vec()));
    }

    #[test]
    fn page_count_bookkeeping_tracks_branch_and_leaf_pages_on_split() {
        let dir = tempdir().unwrap();
        let env = fresh_env(dir.path());
        let t = env.tables.open("wide", TableFlags::CREATE).unwrap();

        let mut wtxn = WriteTxn::begin(&env).unwrap();
        for i in 0..400u32 {
            let mut key = format!("{i:04}").into_bytes();
            key.resize(64, b'.');
            wtxn.put(t, &key, b"v", NodeFlags::empty()).unwrap();
        }
        let desc = wtxn.tree_of(t).unwrap();
        assert!(desc.leaf_pages.get() >= 2, "leaf_pages should reflect more than one leaf after splitting, got {}", desc.leaf_pages.get());
        assert!(desc.branch_pages.get() >= 1, "branch_pages should be nonzero once the tree grows past height 1, got {}", desc.branch_pages.get());
    }

    #[test]
    fn nested_child_commit_folds_writes_into_parent() {
        let dir = tempdir().unwrap();
        let env = fresh_env(dir.path());

        let mut parent = WriteTxn::begin(&env).unwrap();
        parent.put(Table::MAIN, b"outer", b"1", NodeFlags::empty()).unwrap();

        let mut child = WriteTxn::begin_nested(&parent);
        assert_eq!(child.depth(), 1);
        child.put(Table::MAIN, b"inner", b"2", NodeFlags::empty()).unwrap();
        assert_eq!(child.get(Table::MAIN, b"outer").unwrap(), Some(b"1".to_vec()));
        parent.txn_merge(child);

        assert_eq!(parent.get(Table::MAIN, b"inner").unwrap(), Some(b"2".to_vec()));
        assert_eq!(parent.get(Table::MAIN, b"outer").unwrap(), Some(b"1".to_vec()));

        let state = parent.finish_commit().unwrap();
        *env.state.lock() = state;

        let rtxn = ReadTxn::begin(&env).unwrap();
        assert_eq!(rtxn.get(Table::MAIN, b"inner").unwrap(), Some(b"2".to_vec()));
        assert_eq!(rtxn.get(Table::MAIN, b"outer").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn nested_child_abort_discards_writes_without_touching_parent() {
        let dir = tempdir().unwrap();
        let env = fresh_env(dir.path());

        let mut parent = WriteTxn::begin(&env).unwrap();
        parent.put(Table::MAIN, b"outer", b"1", NodeFlags::empty()).unwrap();

        let mut child = WriteTxn::begin_nested(&parent);
        child.put(Table::MAIN, b"inner", b"2", NodeFlags::empty()).unwrap();
        child.mark_aborted();

        assert_eq!(parent.get(Table::MAIN, b"inner").unwrap(), None);
        assert_eq!(parent.get(Table::MAIN, b"outer").unwrap(), Some(b"1".to_vec()));

        let state = parent.finish_commit().unwrap();
        *env.state.lock() = state;

        let rtxn = ReadTxn::begin(&env).unwrap();
        assert_eq!(rtxn.get(Table::MAIN, b"inner").unwrap(), None);
        assert_eq!(rtxn.get(Table::MAIN, b"outer").unwrap(), Some(b"1".to_vec()));
    }
}
