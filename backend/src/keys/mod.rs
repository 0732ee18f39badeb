// SPDX-FileCopyrightText: 2026 Glass Relay Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Append-only, per-group versioned key records. [`KeyVersionStore`] is the
//! only component allowed to read or write `KeyRecord` rows: versions are
//! immutable once written and CAS-gated on `(gid, version)`, exactly as
//! described in the data model's KeyRecord invariant.

pub mod cache;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use glkdc_common::identifiers::Gid;
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};
use sqlx::Type;

use crate::errors::StorageError;

/// Key-packaging mode for a `KeyRecord`, wire-encoded as its discriminant
/// (`0`/`1`) rather than a variant-name string. `KeyEpochCoordinator`
/// models an unknown `previousMode` (a group with no key history yet) as
/// `Option::None` rather than as a variant of this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr, Type)]
#[repr(i16)]
#[sqlx(type_name = "int2")]
pub enum Mode {
    OneForEach = 0,
    AllTheSame = 1,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyRecord {
    pub gid: Gid,
    pub version: i64,
    pub mode: Mode,
    pub encrypt_version: i32,
    pub creator: glkdc_common::identifiers::Uid,
    pub create_time: DateTime<Utc>,
    /// Verbatim JSON of the keys object; the server never parses this except
    /// when projecting a `ONE_FOR_EACH` entry down to one caller in
    /// `KeyEpochCoordinator::fetch_by_versions`.
    pub payload: serde_json::Value,
}

#[derive(Debug)]
pub enum InsertOutcome {
    Ok,
    /// A record already exists at `(gid, version)`.
    CasFail,
    Internal(StorageError),
}

impl From<StorageError> for InsertOutcome {
    fn from(e: StorageError) -> Self {
        InsertOutcome::Internal(e)
    }
}

#[async_trait]
pub trait KeyVersionStore: Send + Sync {
    async fn insert(&self, record: KeyRecord) -> InsertOutcome;
    async fn get(&self, gid: Gid, versions: &[i64]) -> Result<Vec<KeyRecord>, StorageError>;
    async fn get_latest(&self, gid: Gid) -> Result<Option<KeyRecord>, StorageError>;
    async fn get_latest_mode_and_version(
        &self,
        gid: Gid,
    ) -> Result<Option<(Mode, i64)>, StorageError>;
    /// Falls back to `Ok(None)` (treated by the coordinator as `Unknown`,
    /// which the rotation policy handles conservatively) rather than
    /// surfacing a storage error — one of the few recovered fallbacks in this
    /// store's error handling.
    async fn get_latest_mode(&self, gid: Gid) -> Result<Option<Mode>, StorageError>;
    async fn clear(&self, gid: Gid) -> Result<(), StorageError>;
}
