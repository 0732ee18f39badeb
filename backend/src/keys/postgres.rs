// SPDX-FileCopyrightText: 2026 Glass Relay Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Postgres-backed [`KeyVersionStore`]. The CAS insert is a single `INSERT
//! ... ON CONFLICT (gid, version) DO NOTHING`, mirroring the CAS pattern used
//! for `allowance_records` writes in the rate limiter persistence.

use async_trait::async_trait;
use glkdc_common::identifiers::{Gid, Uid};
use sqlx::PgPool;

use super::{InsertOutcome, KeyRecord, KeyVersionStore, Mode};
use crate::errors::StorageError;
use crate::infra_service::{InfraService, ServiceCreationError};

pub struct PgKeyVersionStore {
    pool: PgPool,
}

impl PgKeyVersionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InfraService for PgKeyVersionStore {
    async fn initialize(db_pool: PgPool) -> Result<Self, ServiceCreationError> {
        Ok(Self::new(db_pool))
    }
}

struct KeyRecordRow {
    gid: i64,
    version: i64,
    mode: i16,
    encrypt_version: i32,
    creator: String,
    create_time: chrono::DateTime<chrono::Utc>,
    payload: serde_json::Value,
}

impl KeyRecordRow {
    fn into_record(self) -> Result<KeyRecord, StorageError> {
        Ok(KeyRecord {
            gid: Gid(self.gid as u64),
            version: self.version,
            mode: if self.mode == Mode::OneForEach as i16 {
                Mode::OneForEach
            } else {
                Mode::AllTheSame
            },
            encrypt_version: self.encrypt_version,
            creator: Uid::parse(&self.creator)
                .map_err(|_| sqlx::Error::Decode("invalid uid in key_records.creator".into()))?,
            create_time: self.create_time,
            payload: self.payload,
        })
    }
}

#[async_trait]
impl KeyVersionStore for PgKeyVersionStore {
    async fn insert(&self, record: KeyRecord) -> InsertOutcome {
        let result = sqlx::query!(
            r#"INSERT INTO key_records (gid, version, mode, encrypt_version, creator, create_time, payload)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (gid, version) DO NOTHING"#,
            record.gid.0 as i64,
            record.version,
            record.mode as i16,
            record.encrypt_version,
            record.creator.as_str(),
            record.create_time,
            record.payload,
        )
        .execute(&self.pool)
        .await;

        match result {
            Ok(res) if res.rows_affected() == 1 => InsertOutcome::Ok,
            Ok(_) => InsertOutcome::CasFail,
            Err(e) => InsertOutcome::Internal(StorageError::from(e)),
        }
    }

    async fn get(&self, gid: Gid, versions: &[i64]) -> Result<Vec<KeyRecord>, StorageError> {
        let rows = sqlx::query_as!(
            KeyRecordRow,
            r#"SELECT gid, version, mode, encrypt_version, creator, create_time, payload
                FROM key_records WHERE gid = $1 AND version = ANY($2)"#,
            gid.0 as i64,
            versions,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(KeyRecordRow::into_record).collect()
    }

    async fn get_latest(&self, gid: Gid) -> Result<Option<KeyRecord>, StorageError> {
        let row = sqlx::query_as!(
            KeyRecordRow,
            r#"SELECT gid, version, mode, encrypt_version, creator, create_time, payload
                FROM key_records WHERE gid = $1 ORDER BY version DESC LIMIT 1"#,
            gid.0 as i64,
        )
        .fetch_optional(&self.pool)
        .await?;
        row.map(KeyRecordRow::into_record).transpose()
    }

    async fn get_latest_mode_and_version(
        &self,
        gid: Gid,
    ) -> Result<Option<(Mode, i64)>, StorageError> {
        Ok(self.get_latest(gid).await?.map(|r| (r.mode, r.version)))
    }

    async fn get_latest_mode(&self, gid: Gid) -> Result<Option<Mode>, StorageError> {
        Ok(self.get_latest(gid).await?.map(|r| r.mode))
    }

    async fn clear(&self, gid: Gid) -> Result<(), StorageError> {
        sqlx::query!("DELETE FROM key_records WHERE gid = $1", gid.0 as i64)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(gid: Gid, version: i64) -> KeyRecord {
        KeyRecord {
            gid,
            version,
            mode: Mode::OneForEach,
            encrypt_version: 0,
            creator: Uid::from_public_key(b"creator"),
            create_time: chrono::Utc::now(),
            payload: serde_json::json!({"keys_v0": []}),
        }
    }

    #[sqlx::test]
    async fn second_insert_at_same_version_is_cas_fail(pool: PgPool) -> sqlx::Result<()> {
        let store = PgKeyVersionStore::new(pool);
        let gid = Gid(7);
        assert!(matches!(store.insert(record(gid, 0)).await, InsertOutcome::Ok));
        assert!(matches!(
            store.insert(record(gid, 0)).await,
            InsertOutcome::CasFail
        ));
        Ok(())
    }

    #[sqlx::test]
    async fn latest_tracks_the_highest_version(pool: PgPool) -> sqlx::Result<()> {
        let store = PgKeyVersionStore::new(pool);
        let gid = Gid(8);
        store.insert(record(gid, 0)).await;
        store.insert(record(gid, 1)).await;
        let (_, version) = store
            .get_latest_mode_and_version(gid)
            .await
            .unwrap()
            .expect("expected latest record");
        assert_eq!(version, 1);
        Ok(())
    }
}
