// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for bcn-core operations.

use thiserror::Error;

/// All possible errors that can occur in bcn-core operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid sync status: '{0}'\n  hint: valid statuses are: pending, syncing, synced, conflict, failed")]
    InvalidStatus(String),

    #[error("invalid security level: '{0}'\n  hint: valid levels are: unclassified, restricted, secret, top_secret")]
    InvalidSecurityLevel(String),

    #[error("invalid channel kind: '{0}'\n  hint: valid kinds are: standard, emergency")]
    InvalidChannelKind(String),

    #[error("invalid stamp: {0}")]
    InvalidStamp(String),

    #[error("invalid sync transition: cannot go from {from} to {to}\n  hint: from '{from}' you can go to: {valid_targets}")]
    InvalidTransition {
        from: String,
        to: String,
        valid_targets: String,
    },

    #[error("{0}")]
    InvalidInput(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("corrupted data: {0}")]
    CorruptedData(String),
}

/// A specialized Result type for bcn-core operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
