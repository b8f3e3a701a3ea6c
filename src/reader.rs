//! Reader registration table and oldest-reader tracking (spec §4.3).
//!
//! Backed by a small mmap'd "lock file" separate from the data file
//! (spec §6 "File layout"), mirroring how libmdbx's `-lck` sidecar
//! holds the slot table. Content is only meaningful while some process
//! holds the environment open, so we don't fsync it.

use crate::consts::{DEFAULT_MAX_READERS, MAGIC, TID_FREE, TID_OUSTED, TID_PARKED};
use crate::error::{Error, Result};
use memmap2::MmapMut;
use parking_lot::Mutex;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use zerocopy::byteorder::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// One reader's published snapshot (spec §3 "Reader slot"). Padded to a
/// cache line so two readers' `publish` calls never false-share.
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Debug, Clone, Copy)]
#[repr(C)]
pub struct ReaderSlotRepr {
    pub pid: U64,
    pub tid: U64,
    pub txnid: U64,
    pub used_pgno: U64,
    pub retired_sum: U64,
    _pad: [U64; 3],
}

const SLOT_SIZE: usize = std::mem::size_of::<ReaderSlotRepr>();

#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Debug, Clone, Copy)]
#[repr(C)]
struct LockFileHeader {
    magic: U64,
    max_readers: U32,
    _pad: U32,
}

const HEADER_SIZE: usize = std::mem::size_of::<LockFileHeader>();

/// A bound slot; holds the index so `publish`/`park`/`unpark`/`release`
/// know where to write without re-scanning the table.
pub struct BoundSlot {
    index: usize,
}

pub struct ReaderTable {
    map: Mutex<MmapMut>,
    max_readers: u32,
}

impl ReaderTable {
    pub fn open(path: &Path, max_readers: u32) -> Result<Self> {
        let max_readers = if max_readers == 0 { DEFAULT_MAX_READERS } else { max_readers };
        let total = HEADER_SIZE + max_readers as usize * SLOT_SIZE;
        let file = OpenOptions::new().read(true).write(true).create(true).open(path)?;
        if file.metadata()?.len() < total as u64 {
            file.set_len(total as u64)?;
        }
        let mut map = unsafe { MmapMut::map_mut(&file)? };
        {
            let hdr = LockFileHeader::mut_from_bytes(&mut map[..HEADER_SIZE]).unwrap();
            if hdr.magic.get() != MAGIC {
                hdr.magic.set(MAGIC);
                hdr.max_readers.set(max_readers);
                map[HEADER_SIZE..total].fill(0);
            }
        }
        Ok(ReaderTable {
            map: Mutex::new(map),
            max_readers,
        })
    }

    fn slot_at<'a>(map: &'a [u8], i: usize) -> &'a ReaderSlotRepr {
        let off = HEADER_SIZE + i * SLOT_SIZE;
        ReaderSlotRepr::ref_from_bytes(&map[off..off + SLOT_SIZE]).unwrap()
    }

    fn slot_at_mut<'a>(map: &'a mut [u8], i: usize) -> &'a mut ReaderSlotRepr {
        let off = HEADER_SIZE + i * SLOT_SIZE;
        ReaderSlotRepr::mut_from_bytes(&mut map[off..off + SLOT_SIZE]).unwrap()
    }

    /// Find a free slot (pid==0) or reuse one already bound to this
    /// (pid, tid) pair, and claim it (`bind_slot`).
    pub fn bind_slot(&self, pid: u64, tid: u64) -> Result<BoundSlot> {
        let mut map = self.map.lock();
        for i in 0..self.max_readers as usize {
            let s = Self::slot_at(&map, i);
            if s.pid.get() == pid && s.tid.get() == tid {
                return Ok(BoundSlot { index: i });
            }
        }
        for i in 0..self.max_readers as usize {
            let s = Self::slot_at(&map, i);
            if s.pid.get() == 0 {
                let slot = Self::slot_at_mut(&mut map, i);
                slot.pid.set(pid);
                slot.tid.set(tid);
                slot.txnid.set(0);
                slot.used_pgno.set(0);
                slot.retired_sum.set(0);
                return Ok(BoundSlot { index: i });
            }
        }
        Err(Error::ReadersFull)
    }

    /// Publish a fresh snapshot into an already-bound slot, using the
    /// reset-high/store-low/store-high pattern so concurrent scanners
    /// never observe a torn `(txnid, used_pgno, retired_sum)` triple
    /// (spec §4.3 "Ordering").
    pub fn publish(&self, slot: &BoundSlot, txnid: u64, used_pgno: u64, retired_sum: u64) {
        let mut map = self.map.lock();
        let s = Self::slot_at_mut(&mut map, slot.index);
        s.txnid.set(0);
        s.used_pgno.set(used_pgno);
        s.retired_sum.set(retired_sum);
        s.txnid.set(txnid);
    }

    pub fn release(&self, slot: &BoundSlot) {
        let mut map = self.map.lock();
        let s = Self::slot_at_mut(&mut map, slot.index);
        s.txnid.set(0);
    }

    pub fn unbind(&self, slot: BoundSlot) {
        let mut map = self.map.lock();
        let s = Self::slot_at_mut(&mut map, slot.index);
        s.pid.set(0);
        s.tid.set(TID_FREE);
        s.txnid.set(0);
    }

    pub fn park(&self, slot: &BoundSlot) {
        let mut map = self.map.lock();
        Self::slot_at_mut(&mut map, slot.index).tid.set(TID_PARKED);
    }

    /// CAS tid from PARKED back to `owner_tid`; if a writer ousted this
    /// slot meanwhile, it now reads OUSTED and the caller must abort
    /// (spec §4.3 `unpark`/§4.14 `unpark`).
    pub fn unpark(&self, slot: &BoundSlot, owner_tid: u64) -> Result<()> {
        let mut map = self.map.lock();
        let s = Self::slot_at_mut(&mut map, slot.index);
        match s.tid.get() {
            TID_PARKED => {
                s.tid.set(owner_tid);
                Ok(())
            }
            TID_OUSTED => Err(Error::Ousted),
            other => {
                debug_assert_eq!(other, owner_tid, "unpark on a slot we don't own");
                Ok(())
            }
        }
    }

    /// A writer blocked on reclaiming pages held by a parked reader may
    /// CAS that reader's tid from PARKED to OUSTED and proceed (spec
    /// §4.3 `oust_laggard`).
    pub fn oust_laggard(&self, index: usize) -> bool {
        let mut map = self.map.lock();
        let s = Self::slot_at_mut(&mut map, index);
        if s.tid.get() == TID_PARKED {
            s.tid.set(TID_OUSTED);
            true
        } else {
            false
        }
    }

    /// Minimum live txnid across every slot with a non-zero pid, or
    /// `None` if there are no readers at all (`oldest_live`).
    pub fn oldest_live(&self) -> Option<u64> {
        let map = self.map.lock();
        let mut oldest: Option<u64> = None;
        for i in 0..self.max_readers as usize {
            let s = Self::slot_at(&map, i);
            if s.pid.get() == 0 {
                continue;
            }
            let txnid = s.txnid.get();
            if txnid == 0 {
                continue; // bound but not currently inside a read txn
            }
            oldest = Some(oldest.map_or(txnid, |o: u64| o.min(txnid)));
        }
        oldest
    }

    /// Scan for slots whose owning process has died and zero them;
    /// returns the count cleared (`check_stale`).
    pub fn check_stale(&self) -> usize {
        let mut map = self.map.lock();
        let mut cleared = 0;
        for i in 0..self.max_readers as usize {
            let s = Self::slot_at(&map, i);
            let pid = s.pid.get();
            if pid != 0 && !process_is_alive(pid) {
                let s = Self::slot_at_mut(&mut map, i);
                s.pid.set(0);
                s.tid.set(TID_FREE);
                s.txnid.set(0);
                cleared += 1;
            }
        }
        cleared
    }

    pub fn max_readers(&self) -> u32 {
        self.max_readers
    }

    /// Snapshot every live slot's index and txnid, for callers that need
    /// to locate a specific laggard to oust.
    pub fn live_slots(&self) -> Vec<(usize, u64, u64)> {
        let map = self.map.lock();
        let mut out = Vec::new();
        for i in 0..self.max_readers as usize {
            let s = Self::slot_at(&map, i);
            if s.pid.get() != 0 {
                out.push((i, s.tid.get(), s.txnid.get()));
            }
        }
        out
    }
}

#[cfg(unix)]
fn process_is_alive(pid: u64) -> bool {
    // kill(pid, 0) performs no signal delivery, only existence/permission
    // checks (spec §4.3 `check_stale`).
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 || *libc::__errno_location() != libc::ESRCH }
}

#[cfg(not(unix))]
fn process_is_alive(_pid: u64) -> bool {
    true
}

/// Cached "refresh" flag the writer polls to decide whether to rescan
/// the reader table for GC purposes, and the cached oldest-reader
/// value it maintains between scans (spec §4.3, §5 "Ordering").
pub struct ReaderCache {
    pub refresh_flag: AtomicU32,
    pub cached_oldest: AtomicU64,
}

impl ReaderCache {
    pub fn new() -> Self {
        ReaderCache {
            refresh_flag: AtomicU32::new(0),
            cached_oldest: AtomicU64::new(0),
        }
    }

    pub fn mark_dirty(&self) {
        self.refresh_flag.store(1, Ordering::Release);
    }

    pub fn take_dirty(&self) -> bool {
        self.refresh_flag.swap(0, Ordering::AcqRel) != 0
    }

    pub fn set_cached_oldest(&self, v: u64) {
        self.cached_oldest.store(v, Ordering::Release);
    }

    pub fn cached_oldest(&self) -> u64 {
        self.cached_oldest.load(Ordering::Acquire)
    }
}

impl Default for ReaderCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn bind_publish_and_oldest_live() {
        let dir = tempdir().unwrap();
        let table = ReaderTable::open(&dir.path().join("lck"), 4).unwrap();

        let s1 = table.bind_slot(100, 1).unwrap();
        table.publish(&s1, 10, 50, 0);
        let s2 = table.bind_slot(101, 1).unwrap();
        table.publish(&s2, 20, 60, 0);

        assert_eq!(table.oldest_live(), Some(10));

        table.release(&s1);
        assert_eq!(table.oldest_live(), Some(20));
    }

    #[test]
    fn park_unpark_and_oust() {
        let dir = tempdir().unwrap();
        let table = ReaderTable::open(&dir.path().join("lck"), 4).unwrap();
        let s1 = table.bind_slot(100, 7).unwrap();
        table.publish(&s1, 5, 10, 0);
        table.park(&s1);

        assert!(table.oust_laggard(0));
        assert!(matches!(table.unpark(&s1, 7), Err(Error::Ousted)));
    }

    #[test]
    fn table_full_errors() {
        let dir = tempdir().unwrap();
        let table = ReaderTable::open(&dir.path().join("lck"), 1).unwrap();
        let _s1 = table.bind_slot(1, 1).unwrap();
        assert!(matches!(table.bind_slot(2, 1), Err(Error::ReadersFull)));
    }
}
