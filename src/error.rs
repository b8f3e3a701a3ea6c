//! Error kinds surfaced by the store (spec §7).
//!
//! Most tree-mutation errors poison the owning write transaction (only
//! `abort` remains valid); I/O errors poison the whole environment via
//! `FATAL_ERROR`. `NotFound`/`KeyExist` are ordinary return values, not
//! poisoning conditions — callers match on them routinely.

use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("key not found")]
    NotFound,

    #[error("key/value pair already exists")]
    KeyExist,

    #[error("database is at its maximum size and the GC has nothing left to reclaim")]
    MapFull,

    #[error("transaction has run out of dirty-page room or its page list exceeded the limit")]
    TxnFull,

    #[error("page has no room left for this node, caller must split")]
    PageFull,

    #[error("on-disk page/meta/txnid layout is corrupted: {0}")]
    Corrupted(&'static str),

    #[error("invalid file header or unsupported format version")]
    Invalid,

    #[error("environment flags or table kind are incompatible with an existing open: {0}")]
    Incompatible(&'static str),

    #[error("transaction handle is closed or otherwise invalid")]
    BadTxn,

    #[error("reader slot is invalid or was reused by another thread")]
    BadRSlot,

    #[error("table handle is stale, closed, or from a different environment")]
    BadDbi,

    #[error("key or value length is out of bounds for this table")]
    BadValSize,

    #[error("writer is busy: a transaction is already in progress")]
    Busy,

    #[error("reader slot table is full")]
    ReadersFull,

    #[error("memory map cannot be extended further")]
    UnableExtendMapsize,

    #[error("environment opened read-only but a rollback to the last STEADY meta is required")]
    WannaRecovery,

    #[error("read snapshot is older than the cached oldest-reader horizon")]
    MvccRetarded,

    #[error("reader slot was ousted by a writer reclaiming its snapshot")]
    Ousted,

    #[error("environment is unusable after a fatal I/O error")]
    Panic,

    #[error("operation attempted by a thread that does not own this handle")]
    ThreadMismatch,

    #[error("nested transaction already open on this thread without NOSTICKYTHREADS")]
    TxnOverlapping,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// Errors that merely report an outcome rather than poisoning the
    /// transaction that produced them (spec §7 "Propagation").
    pub fn is_benign(&self) -> bool {
        matches!(self, Error::NotFound | Error::KeyExist)
    }

    /// Errors that should set `FATAL_ERROR` on the owning environment.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Panic | Error::Corrupted(_))
    }
}
