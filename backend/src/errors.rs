// SPDX-FileCopyrightText: 2026 Glass Relay Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Shared error vocabulary. Every store in this crate bottoms out in
//! [`StorageError`]; every operation exposed to the wire surface bottoms out
//! in [`GlkdcError`]. Neither type knows about HTTP — the `server` crate maps
//! [`GlkdcError`] to status codes and the `{error_code, error_msg, result}`
//! envelope.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error("error deserializing stored column: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<sqlx::Error> for StorageError {
    fn from(e: sqlx::Error) -> Self {
        Self::Database(e.into())
    }
}

/// The machine-readable outcome of a GLKDC operation.
#[derive(Debug, Error)]
pub enum GlkdcError {
    /// parameter error, malformed signature, or inconsistent list lengths
    #[error("bad request: {0}")]
    BadRequest(String),
    /// caller lacks the relationship required to perform this operation
    #[error("forbidden")]
    Forbidden,
    /// the referenced group or member does not exist
    #[error("not found")]
    NotFound,
    /// a compare-and-set write lost a race, or a stale key-epoch version was supplied
    #[error("conflict")]
    Conflict,
    /// the caller has exceeded a rate limit
    #[error("rate limited")]
    LimiterRejected,
    /// the group or caller is not on the protocol version this operation requires
    #[error("upgrade required")]
    UpgradeRequired,
    /// an unrecoverable store or collaborator failure
    #[error("internal error")]
    Internal(#[from] StorageError),
}

impl GlkdcError {
    /// Machine-readable error code included in the wire envelope.
    pub fn error_code(&self) -> u32 {
        match self {
            GlkdcError::BadRequest(_) => 400,
            GlkdcError::Forbidden => 403,
            GlkdcError::NotFound => 404,
            GlkdcError::Conflict => 409,
            GlkdcError::LimiterRejected => 460,
            GlkdcError::UpgradeRequired => 461,
            GlkdcError::Internal(_) => 500,
        }
    }
}
