//! Format constants and tunables (spec §3, §4.4).

/// Default page size: the OS page size on most targets this crate cares
/// about. Pages may range 256..=65536 bytes (spec §3); this is only the
/// default chosen by `EnvironmentBuilder` when unset.
pub const DEFAULT_PAGE_SIZE: usize = 4096;
pub const MIN_PAGE_SIZE: usize = 256;
pub const MAX_PAGE_SIZE: usize = 65536;

/// The three meta-pages always live at pgnos 0, 1, 2.
pub const NUM_METAS: u64 = 3;
pub const FIRST_NON_META_PGNO: u64 = NUM_METAS;

/// Hard cap on a PNL's element count (spec §4.4).
pub const PAGELIST_LIMIT: usize = 1 << 30;

/// Max txnid; `recent.txnid + 1` must never exceed this (spec §3).
pub const MAX_TXNID: u64 = 1u64 << 61;

/// Minimum number of keys required on a page before rebalance kicks in.
pub const BRANCH_MIN_KEYS: usize = 2;
pub const LEAF_MIN_KEYS: usize = 1;

/// `merge_threshold` numerator/denominator: a page whose free space
/// exceeds `pagesize - pagesize * pct/65536` is a rebalance candidate.
/// Default pct ~65% (spec §4.8).
pub const MERGE_THRESHOLD_PCT: u32 = 65 * 65536 / 100;
pub const MERGE_THRESHOLD_SCALE: u32 = 65536;

/// Maximum key length honored regardless of page size (spec §6 table /
/// §8 boundary behavior): 511 matches libmdbx's practical ceiling for a
/// branch page with the smallest supported page size; we recompute an
/// effective `maxkeysize()` from the actual page size at runtime and use
/// this only as an absolute upper bound.
pub const ABSOLUTE_MAX_KEYSIZE: usize = 32 * 1024;

/// Magic + format version stored in every meta page. Not wire-compatible
/// with libmdbx; this is our own on-disk format.
pub const MAGIC: u64 = 0x4D44_4252_5253_0001;
pub const FORMAT_VERSION: u32 = 1;

/// Reader-table slot `tid` sentinels (spec §3 "Reader slot").
pub const TID_FREE: u64 = 0;
pub const TID_PARKED: u64 = u64::MAX;
pub const TID_OUSTED: u64 = u64::MAX - 1;

/// Default/maximum reader slot count for a freshly created lock file.
pub const DEFAULT_MAX_READERS: u32 = 126;

/// Bound on `gc_update`'s rerere-reservation retry loop (spec §4.12 step 7).
pub const GC_RERERE_MAX_ITERS: u32 = 42;

/// Bound on the coherency-retry loop in read-txn begin (spec §4.14).
pub const COHERENCY_MAX_RETRIES: u32 = 42;
