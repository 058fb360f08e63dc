//! Error types for the table engine.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// I/O error from the filesystem.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Caller misuse: unsupported comparator, non-ascending add, malformed
    /// internal key, mmap disabled, bad option value. Not retryable.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// On-disk data is damaged: bad magic, truncated block, digest mismatch
    /// on a whole structure, inconsistent meta-index. The reader must not
    /// partial-serve after seeing this.
    #[error("corruption: {0}")]
    Corruption(String),

    /// A single value-store record failed its digest check. The rest of the
    /// table remains readable.
    #[error("record {record_id} checksum mismatch: stored {stored:#018x}, computed {computed:#018x}")]
    BadChecksum {
        record_id: u64,
        stored: u64,
        computed: u64,
    },

    /// The builder previously failed; every later call reports the original
    /// failure.
    #[error("builder already failed: {0}")]
    BuilderPoisoned(String),
}

impl Error {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub(crate) fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }

    /// True for the corruption family, including per-record digest failures.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Corruption(_) | Error::BadChecksum { .. })
    }
}

impl From<ziptable_core::KeyError> for Error {
    fn from(e: ziptable_core::KeyError) -> Self {
        Error::InvalidArgument(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
