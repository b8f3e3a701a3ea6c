//! Meta-triplet manager (spec §4.2) and the on-disk meta-page / tree_t
//! layout (spec §3, §6).
//!
//! Ground truth for the troika (recent/prefer_steady/tail) selection is
//! `original_source/src/meta.c`'s `meta_tap`/`troika_fsm_map`. That file
//! precomputes a 216-entry lookup table over every `(txnid-ordering,
//! steady-bits)` combination so the hot path is a single table index.
//! We get the same deterministic result from three direct pairwise
//! comparisons instead of building the table — there is no hot-path
//! pressure here once translated out of inline SIMD-era C, and three
//! `if`s are far more auditable than a magic byte array. Semantics
//! (recent = greatest txnid tie-broken toward steady; prefer_steady =
//! greatest-txnid STEADY meta; tail = smallest txnid tie-broken toward
//! non-steady) exactly match `meta.c`'s stated behavior.

use crate::error::{Error, Result};
use crate::page::{PageFlags, PageHeader, PAGE_HEADER_SIZE};
use crate::pnl::Pgno;
use zerocopy::byteorder::little_endian::{U16, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

pub const INVALID_PGNO: Pgno = u64::MAX;

#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct Geometry {
    pub lower: U64,
    pub upper: U64,
    pub now: U64,
    pub grow_pv: U32,
    pub shrink_pv: U32,
    pub first_unallocated: U64,
}

impl Geometry {
    pub fn new(lower: u64, now: u64, upper: u64, grow_pv: u32, shrink_pv: u32, first_unallocated: u64) -> Self {
        Geometry {
            lower: U64::new(lower),
            upper: U64::new(upper),
            now: U64::new(now),
            grow_pv: U32::new(grow_pv),
            shrink_pv: U32::new(shrink_pv),
            first_unallocated: U64::new(first_unallocated),
        }
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TableFlags: u16 {
        const REVERSEKEY  = 0b0000_0001;
        const DUPSORT     = 0b0000_0010;
        const INTEGERKEY  = 0b0000_0100;
        const DUPFIXED    = 0b0000_1000;
        const INTEGERDUP  = 0b0001_0000;
        const REVERSEDUP  = 0b0010_0000;
        const CREATE      = 0b0100_0000;
    }
}

/// `tree_t`: root pgno, height, item count, per-kind page counts, flags,
/// last-modifying txnid, DUPFIX record size (spec §3).
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct TreeDescriptor {
    pub root: U64,
    pub height: U32,
    pub flags: U16,
    _pad0: U16,
    pub dupfix_size: U32,
    pub items: U64,
    pub branch_pages: U64,
    pub leaf_pages: U64,
    pub large_pages: U64,
    pub mod_txnid: U64,
}

impl TreeDescriptor {
    pub fn empty() -> Self {
        TreeDescriptor {
            root: U64::new(INVALID_PGNO),
            height: U32::new(0),
            flags: U16::new(0),
            _pad0: U16::new(0),
            dupfix_size: U32::new(0),
            items: U64::new(0),
            branch_pages: U64::new(0),
            leaf_pages: U64::new(0),
            large_pages: U64::new(0),
            mod_txnid: U64::new(0),
        }
    }

    pub fn root(&self) -> Option<Pgno> {
        let r = self.root.get();
        (r != INVALID_PGNO).then_some(r)
    }

    pub fn set_root(&mut self, root: Option<Pgno>) {
        self.root.set(root.unwrap_or(INVALID_PGNO));
    }

    pub fn height(&self) -> u32 {
        self.height.get()
    }

    pub fn flags(&self) -> TableFlags {
        TableFlags::from_bits_truncate(self.flags.get())
    }

    pub fn items(&self) -> u64 {
        self.items.get()
    }
}

#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C)]
pub struct Canary {
    pub x: U64,
    pub y: U64,
    pub z: U64,
    pub v: U64,
}

/// The payload of a meta page, bracketed by a leading and trailing
/// txnid copy (spec §3 "MVCC triplet invariants", §6 binary layout
/// table). On a 64-bit-only target a single `u64` txnid load doesn't
/// tear, but we keep both copies anyway: they are the cheapest possible
/// detector of a concurrent writer having clobbered this meta slot
/// mid-read, and the on-disk format in §6 specifies them explicitly.
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Debug, Clone, Copy)]
#[repr(C)]
pub struct MetaPayload {
    pub magic: U64,
    pub version: U32,
    pub pagesize: U32,
    pub txnid_a: U64,
    pub geometry: Geometry,
    pub gc_tree: TreeDescriptor,
    pub main_tree: TreeDescriptor,
    pub canary: Canary,
    pub pages_retired: U64,
    pub boot_id: [U64; 2],
    /// 0 => WEAK. High bit set => STEADY, low 32 bits hold the crc32c of
    /// everything above (see `compute_signature`).
    pub sign: U64,
    pub txnid_b: U64,
}

pub const META_PAYLOAD_SIZE: usize = std::mem::size_of::<MetaPayload>();
const STEADY_MARKER: u64 = 1 << 63;

fn checksum_region(payload: &MetaPayload) -> &[u8] {
    let bytes = payload.as_bytes();
    let sign_offset = std::mem::offset_of!(MetaPayload, sign);
    &bytes[..sign_offset]
}

fn compute_signature(payload: &MetaPayload) -> u64 {
    let crc = crc32c::crc32c(checksum_region(payload)) as u64;
    STEADY_MARKER | crc
}

impl MetaPayload {
    pub fn txnid(&self) -> u64 {
        self.txnid_a.get()
    }

    pub fn is_steady(&self) -> bool {
        self.sign.get() & STEADY_MARKER != 0
    }

    pub fn signature_valid(&self) -> bool {
        if !self.is_steady() {
            return true; // WEAK metas carry no signature to validate.
        }
        self.sign.get() == compute_signature(self)
    }

    pub fn mark_steady(&mut self) {
        self.txnid_b.set(self.txnid_a.get());
        self.sign.set(compute_signature(self));
    }

    pub fn mark_weak(&mut self) {
        self.txnid_b.set(self.txnid_a.get());
        self.sign.set(0);
    }

    pub fn txnid_copies_match(&self) -> bool {
        self.txnid_a.get() == self.txnid_b.get()
    }
}

pub const META_PAGE_SIZE: usize = PAGE_HEADER_SIZE + META_PAYLOAD_SIZE;

/// Build a fresh meta page's bytes for `pgno` (0, 1, or 2) sized to
/// `pagesize`.
pub fn new_meta_page(pgno: u64, pagesize: usize, payload: &MetaPayload) -> Vec<u8> {
    let mut buf = vec![0u8; pagesize];
    let hdr = PageHeader::mut_from_bytes(&mut buf[..PAGE_HEADER_SIZE]).unwrap();
    hdr.pgno.set(pgno);
    hdr.flags.set(PageFlags::META.bits());
    buf[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + META_PAYLOAD_SIZE].copy_from_slice(payload.as_bytes());
    buf
}

pub fn read_meta_payload(page_bytes: &[u8]) -> Result<&MetaPayload> {
    let hdr = PageHeader::ref_from_bytes(&page_bytes[..PAGE_HEADER_SIZE])
        .map_err(|_| Error::Corrupted("meta page too small"))?;
    if !hdr.flags().contains(PageFlags::META) {
        return Err(Error::Corrupted("expected META page flag"));
    }
    MetaPayload::ref_from_bytes(&page_bytes[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + META_PAYLOAD_SIZE])
        .map_err(|_| Error::Corrupted("meta payload truncated"))
}

/// Validate a meta payload's magic, version and geometry (`validate` in
/// spec.md). Does not check the signature — callers that care about
/// STEADY vs WEAK use `signature_valid`/`is_steady` directly, since a
/// WEAK meta is not itself invalid.
pub fn validate(payload: &MetaPayload, pagesize: usize) -> Result<()> {
    if payload.magic.get() != crate::consts::MAGIC {
        return Err(Error::Invalid);
    }
    if payload.version.get() != crate::consts::FORMAT_VERSION {
        return Err(Error::Invalid);
    }
    if payload.pagesize.get() as usize != pagesize {
        return Err(Error::Corrupted("pagesize mismatch between meta and environment"));
    }
    if !payload.txnid_copies_match() {
        return Err(Error::Corrupted("meta txnid_a/txnid_b mismatch"));
    }
    if !payload.signature_valid() {
        return Err(Error::Corrupted("meta signature does not match payload"));
    }
    let geo = &payload.geometry;
    if geo.lower.get() > geo.now.get() || geo.now.get() > geo.upper.get() {
        return Err(Error::Corrupted("meta geometry lower/now/upper out of order"));
    }
    if geo.first_unallocated.get() < crate::consts::NUM_METAS {
        return Err(Error::Corrupted("meta first_unallocated below reserved meta pages"));
    }
    Ok(())
}

/// The three canonical slot roles derived from the meta-triplet
/// (spec §3 "Tail / recent / prefer_steady").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Troika {
    pub recent: usize,
    pub prefer_steady: usize,
    pub tail: usize,
    pub txnids: [u64; 3],
    pub steady: [bool; 3],
}

impl Troika {
    pub fn recent_txnid(&self) -> u64 {
        self.txnids[self.recent]
    }

    pub fn prefer_steady_txnid(&self) -> u64 {
        self.txnids[self.prefer_steady]
    }
}

/// Compute recent/prefer_steady/tail from three `(txnid, is_steady)`
/// snapshots, one per meta slot.
pub fn compute_troika(snaps: [(u64, bool); 3]) -> Troika {
    let mut recent = 0usize;
    for i in 1..3 {
        let better = snaps[i].0 > snaps[recent].0 || (snaps[i].0 == snaps[recent].0 && snaps[i].1 && !snaps[recent].1);
        if better {
            recent = i;
        }
    }

    let mut prefer_steady: Option<usize> = None;
    for (i, snap) in snaps.iter().enumerate() {
        if snap.1 {
            prefer_steady = Some(match prefer_steady {
                None => i,
                Some(j) if snap.0 > snaps[j].0 => i,
                Some(j) => j,
            });
        }
    }
    let prefer_steady = prefer_steady.unwrap_or(recent);

    let mut tail = 0usize;
    for i in 1..3 {
        let better = snaps[i].0 < snaps[tail].0 || (snaps[i].0 == snaps[tail].0 && !snaps[i].1 && snaps[tail].1);
        if better {
            tail = i;
        }
    }

    Troika {
        recent,
        prefer_steady,
        tail,
        txnids: [snaps[0].0, snaps[1].0, snaps[2].0],
        steady: [snaps[0].1, snaps[1].1, snaps[2].1],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recent_picks_greatest_txnid() {
        let t = compute_troika([(5, true), (7, false), (3, true)]);
        assert_eq!(t.recent, 1);
        assert_eq!(t.tail, 2);
    }

    #[test]
    fn prefer_steady_ignores_non_steady_winner() {
        let t = compute_troika([(5, true), (7, false), (3, true)]);
        assert_eq!(t.prefer_steady, 0);
    }

    #[test]
    fn tail_prefers_overwriting_non_steady_on_tie() {
        let t = compute_troika([(4, true), (4, false), (9, true)]);
        assert_eq!(t.tail, 1);
        assert_eq!(t.recent, 2);
    }

    #[test]
    fn signature_roundtrip() {
        let mut payload = MetaPayload {
            magic: U64::new(crate::consts::MAGIC),
            version: U32::new(crate::consts::FORMAT_VERSION),
            pagesize: U32::new(4096),
            txnid_a: U64::new(42),
            geometry: Geometry::new(16, 16, 1 << 20, 0, 0, 3),
            gc_tree: TreeDescriptor::empty(),
            main_tree: TreeDescriptor::empty(),
            canary: Canary::default(),
            pages_retired: U64::new(0),
            boot_id: [U64::new(1), U64::new(2)],
            sign: U64::new(0),
            txnid_b: U64::new(0),
        };
        payload.mark_steady();
        assert!(payload.is_steady());
        assert!(payload.signature_valid());
        assert!(validate(&payload, 4096).is_ok());

        payload.geometry.now.set(999); // corrupt after signing
        assert!(!payload.signature_valid());
    }
}
