//! `mdbrs`: an embedded, transactional, ordered MVCC key-value store.
//!
//! A single writer and any number of concurrent readers share a
//! memory-mapped file through copy-on-write B+trees and a three-slot
//! meta-page ring (spec §3, §4). There are no background threads: every
//! operation — including garbage collection of pages freed by old
//! transactions — runs inline on the caller's thread.
//!
//! ```no_run
//! use mdbrs::{Environment, EnvironmentBuilder, NodeFlags, Table};
//!
//! # fn run() -> mdbrs::Result<()> {
//! let env = EnvironmentBuilder::new().open("example.mdbrs")?;
//! let mut wtxn = env.begin_write()?;
//! wtxn.put(Table::MAIN, b"key", b"value", NodeFlags::empty())?;
//! wtxn.commit()?;
//!
//! let rtxn = env.begin_read()?;
//! assert_eq!(rtxn.get(Table::MAIN, b"key")?, Some(b"value".to_vec()));
//! # Ok(())
//! # }
//! ```

mod consts;
mod cursor;
mod dpl;
mod env;
mod error;
mod gc;
mod meta;
mod node;
mod page;
mod pager;
mod pnl;
mod reader;
mod rebalance;
mod spill;
mod table;
mod txn;

pub use crate::cursor::{Cursor, Entry, NextMode};
pub use crate::env::{ChildTransaction, Environment, EnvFlags, EnvironmentBuilder, TableStat, WriteTransaction};
pub use crate::error::{Error, Result};
pub use crate::meta::{Canary, TableFlags};
pub use crate::page::NodeFlags;
pub use crate::table::{Comparator, DbiState, Table};
pub use crate::txn::ReadTxn;

#[cfg(any(test, feature = "audit"))]
pub use crate::env::AuditReport;
