//! The error kinds described in the storage core's design: a lookup
//! miss, a duplicate key, a page with no room, a payload too big to
//! ever fit, a lock conflict under strict two-phase locking, a fence
//! key accessor misused on an infinite sentinel, and the catch-all
//! "the file on disk can no longer be trusted".

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("key not found")]
    NotExists,

    #[error("key already exists")]
    Duplicates,

    #[error("page has no space for this payload")]
    NoSpace,

    #[error("payload exceeds the per-page soft limit")]
    TooBigData,

    #[error("lock acquisition would violate two-phase locking")]
    Conflicts,

    #[error("fence key accessor called on an infinite bound")]
    IsInfinity,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt on-disk state: {0}")]
    Corrupt(String),
}

impl Error {
    /// True for statuses that mean "the calling transaction must abort",
    /// per the propagation rules in the error handling design.
    pub fn is_fatal_to_txn(&self) -> bool {
        matches!(self, Error::Conflicts | Error::Corrupt(_) | Error::Io(_))
    }
}
