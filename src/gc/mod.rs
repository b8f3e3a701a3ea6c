//! Free-space / garbage-collection engine (spec §4.11, §4.12): the
//! allocator that hands out pgnos under MVCC, and the "rerere" updater
//! that returns leftover pgnos to the GC table at commit.

pub mod allocator;
pub mod updater;

pub use allocator::{AllocFlags, AllocSource, allocate};
pub use updater::{GcStore, gc_update};
