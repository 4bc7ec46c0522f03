//! Error types for store operations.
//!
//! A decode failure on a single stored record is deliberately absent here:
//! corrupt records are skipped by every scan and never surface as an error.

use std::path::PathBuf;

use snafu::Snafu;

use crate::codec::CodecError;

/// Store error types.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StoreError {
    #[snafu(display("failed to open trace database at {}: {source}", path.display()))]
    Open {
        path: PathBuf,
        source: redb::DatabaseError,
    },

    #[snafu(display("trace database is closed"))]
    Closed,

    #[snafu(display("transaction error: {source}"))]
    Transaction { source: redb::TransactionError },

    #[snafu(display("table error: {source}"))]
    Table { source: redb::TableError },

    #[snafu(display("storage error: {source}"))]
    Storage { source: redb::StorageError },

    #[snafu(display("commit error: {source}"))]
    Commit { source: redb::CommitError },

    #[snafu(display("failed to encode span record: {source}"))]
    Encode { source: CodecError },

    #[snafu(display("{input:?} is not a valid hex identifier: {source}"))]
    InvalidHex {
        input: String,
        source: hex::FromHexError,
    },

    #[snafu(display("span id must be 8 bytes, got {len}"))]
    SpanIdLength { len: usize },
}

/// Result type for store operations.
pub type Result<T, E = StoreError> = std::result::Result<T, E>;
