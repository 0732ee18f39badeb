// SPDX-FileCopyrightText: 2026 Glass Relay Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-memory test double for [`super::KeyVersionStore`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use glkdc_common::identifiers::Gid;
use tokio::sync::RwLock;

use super::{InsertOutcome, KeyRecord, KeyVersionStore, Mode};
use crate::errors::StorageError;

#[derive(Default)]
pub struct InMemoryKeyVersionStore {
    records: RwLock<BTreeMap<(Gid, i64), KeyRecord>>,
}

impl InMemoryKeyVersionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyVersionStore for InMemoryKeyVersionStore {
    async fn insert(&self, record: KeyRecord) -> InsertOutcome {
        let mut records = self.records.write().await;
        let key = (record.gid, record.version);
        if records.contains_key(&key) {
            return InsertOutcome::CasFail;
        }
        records.insert(key, record);
        InsertOutcome::Ok
    }

    async fn get(&self, gid: Gid, versions: &[i64]) -> Result<Vec<KeyRecord>, StorageError> {
        let records = self.records.read().await;
        Ok(versions
            .iter()
            .filter_map(|v| records.get(&(gid, *v)).cloned())
            .collect())
    }

    async fn get_latest(&self, gid: Gid) -> Result<Option<KeyRecord>, StorageError> {
        let records = self.records.read().await;
        Ok(records
            .range((gid, i64::MIN)..=(gid, i64::MAX))
            .next_back()
            .map(|(_, r)| r.clone()))
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
        self.records.write().await.retain(|(g, _), _| *g != gid);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glkdc_common::identifiers::Uid;

    fn record(gid: Gid, version: i64, mode: Mode) -> KeyRecord {
        KeyRecord {
            gid,
            version,
            mode,
            encrypt_version: 0,
            creator: Uid::from_public_key(b"creator"),
            create_time: chrono::Utc::now(),
            payload: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn second_insert_at_same_version_is_cas_fail() {
        let store = InMemoryKeyVersionStore::new();
        let gid = Gid(1);
        assert!(matches!(
            store.insert(record(gid, 0, Mode::OneForEach)).await,
            InsertOutcome::Ok
        ));
        assert!(matches!(
            store.insert(record(gid, 0, Mode::AllTheSame)).await,
            InsertOutcome::CasFail
        ));
    }

    #[tokio::test]
    async fn latest_tracks_the_highest_version() {
        let store = InMemoryKeyVersionStore::new();
        let gid = Gid(1);
        store.insert(record(gid, 0, Mode::OneForEach)).await;
        store.insert(record(gid, 1, Mode::AllTheSame)).await;
        let (mode, version) = store
            .get_latest_mode_and_version(gid)
            .await
            .unwrap()
            .expect("expected a latest record");
        assert_eq!(version, 1);
        assert_eq!(mode, Mode::AllTheSame);
    }

    #[tokio::test]
    async fn latest_is_none_for_a_brand_new_group() {
        let store = InMemoryKeyVersionStore::new();
        assert!(store.get_latest(Gid(42)).await.unwrap().is_none());
    }
}
