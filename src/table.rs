//! Named-table directory: the DBI-equivalent handle surface built over
//! `meta::TreeDescriptor` (spec §3 "Tree descriptor", §6 "Table flags").
//!
//! MainDB holds one `tree_t` per user-named table, embedded as an
//! `N_TREE` leaf value (spec §3 "Node" / §4.7). This module owns the
//! in-process directory mapping a table name to its slot, plus the
//! comparator selection spec §9 calls for ("Dynamic dispatch for
//! comparators").

use crate::error::{Error, Result};
use crate::meta::{TableFlags, TreeDescriptor};
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

/// Built-in key comparators, selected at table-open from flag bits
/// rather than through a vtable (spec §9: "Store a tag `enum
/// Comparator`, match on it; no v-table required").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Lexical,
    ReverseLexical,
    IntegerU32,
    IntegerU64,
}

impl Comparator {
    pub fn from_flags(flags: TableFlags) -> Self {
        if flags.contains(TableFlags::INTEGERKEY) {
            Comparator::IntegerU64
        } else if flags.contains(TableFlags::REVERSEKEY) {
            Comparator::ReverseLexical
        } else {
            Comparator::Lexical
        }
    }

    pub fn dup_from_flags(flags: TableFlags) -> Self {
        if flags.contains(TableFlags::INTEGERDUP) {
            Comparator::IntegerU64
        } else if flags.contains(TableFlags::REVERSEDUP) {
            Comparator::ReverseLexical
        } else {
            Comparator::Lexical
        }
    }

    pub fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        match self {
            Comparator::Lexical => a.cmp(b),
            Comparator::ReverseLexical => b.cmp(a),
            Comparator::IntegerU32 => int_key(a, 4).cmp(&int_key(b, 4)),
            Comparator::IntegerU64 => int_key(a, 8).cmp(&int_key(b, 8)),
        }
    }
}

/// Integer keys are compared by native-endian value, matching how
/// libmdbx's `cmp_int_align2`/`cmp_int_unaligned` treat `INTEGERKEY`.
/// Short/malformed keys sort as zero rather than panicking — callers
/// validate length against `BadValSize` before this ever runs.
fn int_key(bytes: &[u8], width: usize) -> u64 {
    let mut buf = [0u8; 8];
    let n = bytes.len().min(width).min(8);
    buf[..n].copy_from_slice(&bytes[..n]);
    u64::from_ne_bytes(buf)
}

bitflags::bitflags! {
    /// Per-txn DBI state bits (spec §3 "Transaction").
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DbiState: u8 {
        const DIRTY = 0b0000_0001;
        const STALE = 0b0000_0010;
        const FRESH = 0b0000_0100;
        const CREAT = 0b0000_1000;
        const VALID = 0b0001_0000;
        const OLDEN = 0b0010_0000;
        const LINDO = 0b0100_0000;
    }
}

/// A handle to one open table. `seq` is a snapshot of the slot's
/// generation at open time; every access should check it still matches
/// the directory's live generation (spec §9 open question #1:
/// `dbi_close` may race with other threads' use of the same dbi —
/// preserved here behind explicit sequence-number validation rather
/// than reproducing the race itself).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Table {
    pub dbi: u32,
    pub seq: u64,
}

impl Table {
    /// The reserved handle for MainDB, always open, never closed.
    pub const MAIN: Table = Table { dbi: 0, seq: 0 };
    /// The reserved handle for the GC/FreeDB table.
    pub const GC: Table = Table { dbi: 1, seq: 0 };
}

struct Slot {
    name: Option<String>,
    flags: TableFlags,
    comparator: Comparator,
    dup_comparator: Comparator,
    /// Bumped on every close; a `Table` whose `seq` no longer matches is
    /// stale and every operation on it returns `BadDbi`.
    generation: u64,
    open: bool,
}

/// The env-wide table directory, protected by a fast mutex for
/// open/close while ordinary per-DBI access reads the generation
/// counter lock-free (spec §5 "env's dbi table").
pub struct TableRegistry {
    slots: RwLock<Vec<Slot>>,
    by_name: RwLock<HashMap<String, u32>>,
    next_generation: AtomicU64,
}

impl TableRegistry {
    pub fn new() -> Self {
        let slots = vec![
            Slot {
                name: None,
                flags: TableFlags::empty(),
                comparator: Comparator::Lexical,
                dup_comparator: Comparator::Lexical,
                generation: 0,
                open: true,
            },
            Slot {
                name: Some("gc".to_string()),
                flags: TableFlags::INTEGERKEY,
                comparator: Comparator::IntegerU64,
                dup_comparator: Comparator::Lexical,
                generation: 0,
                open: true,
            },
        ];
        TableRegistry {
            slots: RwLock::new(slots),
            by_name: RwLock::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Open (or, with `CREATE`, create) a named table, returning a fresh
    /// handle. The directory mutation itself is synchronous with respect
    /// to other opens/closes; concurrent *use* of an already-open table
    /// by other txns is lock-free.
    pub fn open(&self, name: &str, flags: TableFlags) -> Result<Table> {
        if let Some(&dbi) = self.by_name.read().get(name) {
            let slots = self.slots.read();
            let slot = &slots[dbi as usize];
            if slot.flags != flags.difference(TableFlags::CREATE) {
                return Err(Error::Incompatible("table reopened with different flags"));
            }
            return Ok(Table {
                dbi,
                seq: slot.generation,
            });
        }
        if !flags.contains(TableFlags::CREATE) {
            return Err(Error::NotFound);
        }
        let comparator = Comparator::from_flags(flags);
        let dup_comparator = Comparator::dup_from_flags(flags);
        let generation = self.next_generation.fetch_add(1, AtomicOrdering::AcqRel);
        let mut slots = self.slots.write();
        let dbi = slots.len() as u32;
        slots.push(Slot {
            name: Some(name.to_string()),
            flags: flags.difference(TableFlags::CREATE),
            comparator,
            dup_comparator,
            generation,
            open: true,
        });
        self.by_name.write().insert(name.to_string(), dbi);
        Ok(Table { dbi, seq: generation })
    }

    pub fn close(&self, table: Table) -> Result<()> {
        if table.dbi < 2 {
            return Err(Error::Incompatible("MainDB/GC handles cannot be closed"));
        }
        let mut slots = self.slots.write();
        let slot = slots.get_mut(table.dbi as usize).ok_or(Error::BadDbi)?;
        if slot.generation != table.seq || !slot.open {
            return Err(Error::BadDbi);
        }
        slot.open = false;
        if let Some(name) = &slot.name {
            self.by_name.write().remove(name);
        }
        Ok(())
    }

    pub fn flags(&self, table: Table) -> Result<TableFlags> {
        let slots = self.slots.read();
        let slot = slots.get(table.dbi as usize).ok_or(Error::BadDbi)?;
        if slot.generation != table.seq || !slot.open {
            return Err(Error::BadDbi);
        }
        Ok(slot.flags)
    }

    pub fn comparator(&self, table: Table) -> Result<Comparator> {
        let slots = self.slots.read();
        let slot = slots.get(table.dbi as usize).ok_or(Error::BadDbi)?;
        if slot.generation != table.seq || !slot.open {
            return Err(Error::BadDbi);
        }
        Ok(slot.comparator)
    }

    /// The persisted name backing `table`'s MainDB entry, or `None` for
    /// the reserved MainDB/GC handles (which aren't themselves entries in
    /// MainDB).
    pub fn name(&self, table: Table) -> Result<Option<String>> {
        let slots = self.slots.read();
        let slot = slots.get(table.dbi as usize).ok_or(Error::BadDbi)?;
        if slot.generation != table.seq || !slot.open {
            return Err(Error::BadDbi);
        }
        Ok(slot.name.clone())
    }

    pub fn dup_comparator(&self, table: Table) -> Result<Comparator> {
        let slots = self.slots.read();
        let slot = slots.get(table.dbi as usize).ok_or(Error::BadDbi)?;
        if slot.generation != table.seq || !slot.open {
            return Err(Error::BadDbi);
        }
        Ok(slot.dup_comparator)
    }
}

impl Default for TableRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode/decode a `TreeDescriptor` as a MainDB leaf value for
/// user-named tables (`N_TREE` node flag, spec §3 "Node").
pub fn encode_tree_descriptor(desc: &TreeDescriptor) -> Vec<u8> {
    use zerocopy::IntoBytes;
    desc.as_bytes().to_vec()
}

pub fn decode_tree_descriptor(bytes: &[u8]) -> Result<TreeDescriptor> {
    use zerocopy::FromBytes;
    TreeDescriptor::read_from_bytes(bytes).map_err(|_| Error::Corrupted("tree_t descriptor truncated"))
}
