//! Page and node binary layout (spec §3, §4.6's "node codec" half).
//!
//! A page is a fixed-size byte buffer. Fixed-width header structs are
//! decoded with `zerocopy` rather than the teacher's `ptr::read`/
//! `mem::transmute` — this lets every layout access go through a
//! bounds-checked, alignment-agnostic cast instead of raw pointer
//! arithmetic, matching how `other_examples/b-jam-rbolt` (a sibling
//! mmap+zerocopy B+tree store) treats the same problem.
//!
//! Layout, growing from both ends toward the middle:
//!
//! ```text
//! [ PageHeader | entries: u16 offsets, growing up | ... free ... | key/value data, growing down ]
//!               ^ lower                                          ^ upper
//! ```
//!
//! `lower` is the offset just past the last entry slot; `upper` is the
//! offset of the start of the data region. Free space is `upper - lower`.

use crate::error::{Error, Result};
use zerocopy::byteorder::little_endian::{U16, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

pub const PAGE_HEADER_SIZE: usize = std::mem::size_of::<PageHeader>();
pub const ENTRY_SIZE: usize = std::mem::size_of::<u16>();

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u16 {
        const BRANCH = 0b0000_0001;
        const LEAF   = 0b0000_0010;
        const META   = 0b0000_0100;
        const DUPFIX = 0b0000_1000;
        const LARGE  = 0b0001_0000;
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct NodeFlags: u16 {
        /// value is a pgno referencing a LARGE run, not inline bytes.
        const BIG  = 0b0000_0001;
        /// leaf value is a nested DUPSORT sub-tree/sub-page.
        const DUP  = 0b0000_0010;
        /// MainDB only: value is a 48-byte tree_t descriptor.
        const TREE = 0b0000_0100;
    }
}

#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Debug, Clone, Copy)]
#[repr(C)]
pub struct PageHeader {
    pub pgno: U64,
    pub flags: U16,
    pub count: U16,
    /// For LARGE pages: number of pages in the run. For DUPFIX leaves:
    /// the fixed record size. Unused (0) otherwise.
    pub extra: U32,
    pub lower: U16,
    pub upper: U16,
    _pad: U32,
}

impl PageHeader {
    pub fn flags(&self) -> PageFlags {
        PageFlags::from_bits_truncate(self.flags.get())
    }
}

#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Debug, Clone, Copy)]
#[repr(C)]
pub struct BranchNodeHeader {
    pub key_size: U16,
    _pad: U16,
    pub child_pgno: U64,
}

#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Debug, Clone, Copy)]
#[repr(C)]
pub struct LeafNodeHeader {
    pub flags: U16,
    pub key_size: U16,
    pub val_size: U32,
}

fn header_ref(buf: &[u8]) -> &PageHeader {
    PageHeader::ref_from_bytes(&buf[..PAGE_HEADER_SIZE]).expect("page buffer too small for header")
}

fn header_mut(buf: &mut [u8]) -> &mut PageHeader {
    PageHeader::mut_from_bytes(&mut buf[..PAGE_HEADER_SIZE]).expect("page buffer too small for header")
}

/// Read-only view over a page's bytes (works identically whether the
/// bytes come from the mmap or an owned dirty-page buffer).
pub struct PageView<'a> {
    buf: &'a [u8],
}

impl<'a> PageView<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        PageView { buf }
    }

    pub fn header(&self) -> &PageHeader {
        header_ref(self.buf)
    }

    pub fn pgno(&self) -> u64 {
        self.header().pgno.get()
    }

    pub fn flags(&self) -> PageFlags {
        self.header().flags()
    }

    pub fn count(&self) -> usize {
        self.header().count.get() as usize
    }

    pub fn lower(&self) -> usize {
        self.header().lower.get() as usize
    }

    pub fn upper(&self) -> usize {
        self.header().upper.get() as usize
    }

    pub fn num_pages(&self) -> u32 {
        self.header().extra.get().max(1)
    }

    pub fn dupfix_recsize(&self) -> usize {
        self.header().extra.get() as usize
    }

    pub fn free_space(&self) -> usize {
        self.upper().saturating_sub(self.lower())
    }

    fn entry_offset(&self, i: usize) -> usize {
        debug_assert!(i < self.count());
        let pos = PAGE_HEADER_SIZE + i * ENTRY_SIZE;
        u16::from_le_bytes([self.buf[pos], self.buf[pos + 1]]) as usize
    }

    /// Raw bytes of node `i`, from its start offset to the end of the
    /// page (callers slice further based on the node kind's header).
    fn node_bytes(&self, i: usize) -> &'a [u8] {
        let off = self.entry_offset(i);
        &self.buf[off..]
    }

    pub fn branch(&self, i: usize) -> BranchNodeView<'a> {
        debug_assert!(self.flags().contains(PageFlags::BRANCH));
        let bytes = self.node_bytes(i);
        let hdr = BranchNodeHeader::ref_from_bytes(&bytes[..std::mem::size_of::<BranchNodeHeader>()])
            .expect("branch node header truncated");
        let key_size = hdr.key_size.get() as usize;
        let key_start = std::mem::size_of::<BranchNodeHeader>();
        let key = &bytes[key_start..key_start + key_size];
        BranchNodeView {
            key_size: hdr.key_size.get(),
            child_pgno: hdr.child_pgno.get(),
            key,
        }
    }

    pub fn leaf(&self, i: usize) -> LeafNodeView<'a> {
        debug_assert!(self.flags().contains(PageFlags::LEAF) && !self.flags().contains(PageFlags::DUPFIX));
        let bytes = self.node_bytes(i);
        let hdr_size = std::mem::size_of::<LeafNodeHeader>();
        let hdr = LeafNodeHeader::ref_from_bytes(&bytes[..hdr_size]).expect("leaf node header truncated");
        let key_size = hdr.key_size.get() as usize;
        let val_size = hdr.val_size.get() as usize;
        let key = &bytes[hdr_size..hdr_size + key_size];
        let value = &bytes[hdr_size + key_size..hdr_size + key_size + val_size];
        LeafNodeView {
            flags: NodeFlags::from_bits_truncate(hdr.flags.get()),
            key,
            value,
        }
    }

    /// DUPFIX leaves store no per-node header: just `recsize`-stride
    /// keys back to back, starting at `upper()`.
    pub fn dupfix_key(&self, i: usize) -> &'a [u8] {
        debug_assert!(self.flags().contains(PageFlags::DUPFIX));
        let recsize = self.dupfix_recsize();
        let start = self.upper() + i * recsize;
        &self.buf[start..start + recsize]
    }

    /// Binary search over a BRANCH or sorted LEAF page. Returns
    /// `Ok(idx)` on exact key match, `Err(idx)` for the insertion point
    /// (first index whose key is >= target) — this realizes `SET_RANGE`
    /// as well as exact `SET`.
    pub fn search_key(&self, key: &[u8]) -> std::result::Result<usize, usize> {
        let n = self.count();
        if self.flags().contains(PageFlags::DUPFIX) {
            return binary_search_by(n, |i| self.dupfix_key(i).cmp(key));
        }
        if self.flags().contains(PageFlags::BRANCH) {
            // Entry 0 is the implicit leftmost child and carries no key;
            // search starts at 1.
            if n <= 1 {
                return Err(n);
            }
            let found = binary_search_by(n - 1, |i| self.branch(i + 1).key.cmp(key));
            return match found {
                Ok(i) => Ok(i + 1),
                Err(i) => Err(i + 1),
            };
        }
        binary_search_by(n, |i| self.leaf(i).key.cmp(key))
    }
}

fn binary_search_by(n: usize, mut cmp: impl FnMut(usize) -> std::cmp::Ordering) -> std::result::Result<usize, usize> {
    use std::cmp::Ordering::*;
    let (mut lo, mut hi) = (0usize, n);
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        match cmp(mid) {
            Equal => return Ok(mid),
            Less => lo = mid + 1,
            Greater => hi = mid,
        }
    }
    Err(lo)
}

#[derive(Debug, Clone, Copy)]
pub struct BranchNodeView<'a> {
    pub key_size: u16,
    pub child_pgno: u64,
    pub key: &'a [u8],
}

#[derive(Debug, Clone, Copy)]
pub struct LeafNodeView<'a> {
    pub flags: NodeFlags,
    pub key: &'a [u8],
    pub value: &'a [u8],
}

/// An owned, mutable page buffer — the in-memory representation of a
/// dirty page (spec §4.5/§4.9). All mutation goes through here; once
/// written out at commit it becomes a read-only `PageView` over the
/// mmap.
#[derive(Debug, Clone)]
pub struct Page {
    pub data: Vec<u8>,
}

impl Page {
    pub fn new(pagesize: usize) -> Self {
        Page { data: vec![0u8; pagesize] }
    }

    pub fn from_bytes(data: Vec<u8>) -> Self {
        Page { data }
    }

    pub fn view(&self) -> PageView<'_> {
        PageView::new(&self.data)
    }

    pub fn init(&mut self, pgno: u64, flags: PageFlags, pagesize: usize) {
        let h = header_mut(&mut self.data);
        h.pgno.set(pgno);
        h.flags.set(flags.bits());
        h.count.set(0);
        h.extra.set(0);
        h.lower.set(PAGE_HEADER_SIZE as u16);
        h.upper.set(pagesize as u16);
    }

    pub fn set_extra(&mut self, extra: u32) {
        header_mut(&mut self.data).extra.set(extra);
    }

    /// Rewrite a page's own pgno, used when copy-on-write relocates it to
    /// a freshly allocated pgno.
    pub fn set_pgno(&mut self, pgno: u64) {
        header_mut(&mut self.data).pgno.set(pgno);
    }

    pub fn pgno(&self) -> u64 {
        self.view().pgno()
    }

    pub fn flags(&self) -> PageFlags {
        self.view().flags()
    }

    pub fn count(&self) -> usize {
        self.view().count()
    }

    pub fn free_space(&self) -> usize {
        self.view().free_space()
    }

    fn set_count(&mut self, n: usize) {
        header_mut(&mut self.data).count.set(n as u16);
    }

    fn lower(&self) -> usize {
        self.view().lower()
    }

    fn upper(&self) -> usize {
        self.view().upper()
    }

    fn set_lower(&mut self, v: usize) {
        header_mut(&mut self.data).lower.set(v as u16);
    }

    fn set_upper(&mut self, v: usize) {
        header_mut(&mut self.data).upper.set(v as u16);
    }

    fn entry_offset(&self, i: usize) -> usize {
        let pos = PAGE_HEADER_SIZE + i * ENTRY_SIZE;
        u16::from_le_bytes([self.data[pos], self.data[pos + 1]]) as usize
    }

    fn set_entry_offset(&mut self, i: usize, off: usize) {
        let pos = PAGE_HEADER_SIZE + i * ENTRY_SIZE;
        self.data[pos..pos + 2].copy_from_slice(&(off as u16).to_le_bytes());
    }

    /// Insert a raw node body at index `i`, shifting later entries'
    /// slots up by one and writing the body into the data region just
    /// below `upper`. Returns `Err(PageFull)` if there isn't room.
    fn insert_node_bytes(&mut self, i: usize, body: &[u8]) -> Result<()> {
        let need = ENTRY_SIZE + body.len();
        if self.free_space() < need {
            return Err(Error::PageFull);
        }
        let count = self.count();
        debug_assert!(i <= count);

        // Shift entry-offset slots [i, count) up by one slot to make room.
        let entries_start = PAGE_HEADER_SIZE;
        let shift_from = entries_start + i * ENTRY_SIZE;
        let shift_to = entries_start + (i + 1) * ENTRY_SIZE;
        let shift_len = (count - i) * ENTRY_SIZE;
        self.data.copy_within(shift_from..shift_from + shift_len, shift_to);

        let new_upper = self.upper() - body.len();
        self.data[new_upper..new_upper + body.len()].copy_from_slice(body);
        self.set_entry_offset(i, new_upper);
        self.set_lower(self.lower() + ENTRY_SIZE);
        self.set_upper(new_upper);
        self.set_count(count + 1);
        Ok(())
    }

    pub fn add_branch(&mut self, i: usize, key: &[u8], child_pgno: u64) -> Result<()> {
        let hdr = BranchNodeHeader {
            key_size: U16::new(key.len() as u16),
            _pad: U16::new(0),
            child_pgno: U64::new(child_pgno),
        };
        let mut body = hdr.as_bytes().to_vec();
        body.extend_from_slice(key);
        self.insert_node_bytes(i, &body)
    }

    pub fn add_leaf(&mut self, i: usize, key: &[u8], value: &[u8], flags: NodeFlags) -> Result<()> {
        let hdr = LeafNodeHeader {
            flags: U16::new(flags.bits()),
            key_size: U16::new(key.len() as u16),
            val_size: U32::new(value.len() as u32),
        };
        let mut body = hdr.as_bytes().to_vec();
        body.extend_from_slice(key);
        body.extend_from_slice(value);
        self.insert_node_bytes(i, &body)
    }

    /// Rewrite a branch node's child pgno in place (used after COW'ing a
    /// child page: the parent's pointer must follow it to the new pgno
    /// without a full node re-insert).
    pub fn set_branch_child(&mut self, i: usize, child_pgno: u64) {
        debug_assert!(self.flags().contains(PageFlags::BRANCH));
        let off = self.entry_offset(i) + std::mem::size_of::<U16>() * 2;
        self.data[off..off + std::mem::size_of::<U64>()].copy_from_slice(&child_pgno.to_le_bytes());
    }

    pub fn add_dupfix(&mut self, i: usize, key: &[u8]) -> Result<()> {
        debug_assert!(self.flags().contains(PageFlags::DUPFIX));
        let recsize = self.view().dupfix_recsize();
        debug_assert_eq!(key.len(), recsize);
        if self.free_space() < recsize {
            return Err(Error::PageFull);
        }
        let count = self.count();
        debug_assert!(i <= count);
        let new_upper = self.upper() - recsize;
        // Shift existing records [i, count) down by one slot to make room
        // at index i, since DUPFIX records aren't addressed indirectly.
        let old_start = self.upper();
        let move_len = (count - i) * recsize;
        self.data.copy_within(old_start..old_start + move_len, new_upper);
        let dest = new_upper + move_len;
        self.data[dest..dest + recsize].copy_from_slice(key);
        self.set_upper(new_upper);
        self.set_count(count + 1);
        Ok(())
    }

    /// `node_del`: remove entry `i`, sliding the entries array and
    /// compacting the freed hole out of the data region.
    pub fn node_del(&mut self, i: usize) {
        let count = self.count();
        debug_assert!(i < count);
        let is_dupfix = self.flags().contains(PageFlags::DUPFIX);

        if is_dupfix {
            let recsize = self.view().dupfix_recsize();
            let old_start = self.upper();
            // Slide [old_start, old_start + i*recsize) down by recsize to
            // close the hole left by record i.
            self.data.copy_within(old_start..old_start + i * recsize, old_start + recsize);
            self.set_upper(old_start + recsize);
            self.set_count(count - 1);
            return;
        }

        let removed_off = self.entry_offset(i);
        let removed_len = self.node_body_len(i);

        // Close the gap in the entry-offset array.
        let entries_start = PAGE_HEADER_SIZE;
        let from = entries_start + (i + 1) * ENTRY_SIZE;
        let to = entries_start + i * ENTRY_SIZE;
        let len = (count - i - 1) * ENTRY_SIZE;
        self.data.copy_within(from..from + len, to);
        self.set_lower(self.lower() - ENTRY_SIZE);
        self.set_count(count - 1);

        // Slide the data region above the removed node's slot down to
        // close the hole, then fix up every remaining entry's offset.
        let upper = self.upper();
        self.data.copy_within(upper..removed_off, upper + removed_len);
        self.set_upper(upper + removed_len);
        for j in 0..self.count() {
            let off = self.entry_offset(j);
            if off < removed_off {
                self.set_entry_offset(j, off + removed_len);
            }
        }
    }

    fn node_body_len(&self, i: usize) -> usize {
        let v = self.view();
        if v.flags().contains(PageFlags::BRANCH) {
            std::mem::size_of::<BranchNodeHeader>() + v.branch(i).key_size as usize
        } else {
            let leaf = v.leaf(i);
            std::mem::size_of::<LeafNodeHeader>() + leaf.key.len() + leaf.value.len()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_add_and_read_back() {
        let mut p = Page::new(4096);
        p.init(7, PageFlags::LEAF, 4096);
        p.add_leaf(0, b"alpha", b"1", NodeFlags::empty()).unwrap();
        p.add_leaf(1, b"beta", b"2", NodeFlags::empty()).unwrap();
        let v = p.view();
        assert_eq!(v.count(), 2);
        assert_eq!(v.leaf(0).key, b"alpha");
        assert_eq!(v.leaf(1).value, b"2");
        assert_eq!(v.pgno(), 7);
    }

    #[test]
    fn search_key_finds_insertion_point() {
        let mut p = Page::new(4096);
        p.init(1, PageFlags::LEAF, 4096);
        for (k, val) in [("b", "2"), ("d", "4"), ("f", "6")] {
            let idx = p.view().search_key(k.as_bytes()).unwrap_err();
            p.add_leaf(idx, k.as_bytes(), val.as_bytes(), NodeFlags::empty()).unwrap();
        }
        assert_eq!(p.view().search_key(b"d"), Ok(1));
        assert_eq!(p.view().search_key(b"c"), Err(1));
        assert_eq!(p.view().search_key(b"a"), Err(0));
        assert_eq!(p.view().search_key(b"z"), Err(3));
    }

    #[test]
    fn node_del_compacts_and_reads_remaining() {
        let mut p = Page::new(4096);
        p.init(1, PageFlags::LEAF, 4096);
        p.add_leaf(0, b"a", b"1", NodeFlags::empty()).unwrap();
        p.add_leaf(1, b"b", b"2", NodeFlags::empty()).unwrap();
        p.add_leaf(2, b"c", b"3", NodeFlags::empty()).unwrap();
        p.node_del(1);
        let v = p.view();
        assert_eq!(v.count(), 2);
        assert_eq!(v.leaf(0).key, b"a");
        assert_eq!(v.leaf(1).key, b"c");
        assert_eq!(v.leaf(1).value, b"3");
    }

    #[test]
    fn dupfix_insert_and_search() {
        let mut p = Page::new(4096);
        p.init(1, PageFlags::LEAF | PageFlags::DUPFIX, 4096);
        p.set_extra(4);
        for k in [b"dddd", b"bbbb", b"cccc"] {
            let idx = p.view().search_key(k).unwrap_err();
            p.add_dupfix(idx, k).unwrap();
        }
        assert_eq!(p.view().dupfix_key(0), b"bbbb");
        assert_eq!(p.view().dupfix_key(1), b"cccc");
        assert_eq!(p.view().dupfix_key(2), b"dddd");
        assert_eq!(p.view().search_key(b"cccc"), Ok(1));
    }

    #[test]
    fn branch_implicit_left_child_search() {
        let mut p = Page::new(4096);
        p.init(1, PageFlags::BRANCH, 4096);
        p.add_branch(0, b"", 100).unwrap();
        p.add_branch(1, b"m", 200).unwrap();
        p.add_branch(2, b"t", 300).unwrap();
        assert_eq!(p.view().search_key(b"a"), Err(1));
        assert_eq!(p.view().search_key(b"m"), Ok(1));
        assert_eq!(p.view().search_key(b"z"), Err(3));
    }
}
