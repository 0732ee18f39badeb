// SPDX-FileCopyrightText: 2026 Glass Relay Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Process-local TTL cache of key bundles, consulted by
//! [`crate::key_epoch_coordinator::KeyEpochCoordinator::prepare`] as a
//! performance hint. A miss never fails the caller — it just means the
//! coordinator falls back to loading the bundle the slow way. Entries are
//! framed with [`glkdc_common::codec`] the same way they would be if this
//! cache were ever promoted to a shared store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use glkdc_common::{
    codec::{decode_frames, encode_frames},
    identifiers::Gid,
    time::TimeStamp,
};
use tokio::sync::RwLock;

struct CacheEntry {
    framed: Vec<u8>,
    inserted_at: TimeStamp,
}

pub struct KeyCache {
    entries: RwLock<HashMap<(Gid, i64), CacheEntry>>,
    ttl: Duration,
}

impl KeyCache {
    pub fn new(ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        })
    }

    pub async fn get(&self, gid: Gid, version: i64) -> Option<Vec<Vec<u8>>> {
        let entries = self.entries.read().await;
        let entry = entries.get(&(gid, version))?;
        if entry.inserted_at.has_expired(self.ttl) {
            return None;
        }
        decode_frames(&entry.framed).ok()
    }

    pub async fn set(&self, gid: Gid, version: i64, bundles: Vec<Vec<u8>>) {
        let framed = encode_frames(bundles);
        self.entries.write().await.insert(
            (gid, version),
            CacheEntry {
                framed,
                inserted_at: TimeStamp::now(),
            },
        );
    }

    async fn sweep(&self) {
        let ttl = self.ttl;
        self.entries
            .write()
            .await
            .retain(|_, entry| !entry.inserted_at.has_expired(ttl));
    }

    /// Spawns the background sweep loop; call once per process, handed the
    /// shared `Arc` returned by [`KeyCache::new`].
    pub fn spawn_sweeper(self: Arc<Self>, interval: StdDuration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.sweep().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_bundles_until_ttl_expires() {
        let cache = KeyCache::new(Duration::milliseconds(50));
        let gid = Gid(1);
        cache
            .set(gid, 0, vec![b"bundle-a".to_vec(), b"bundle-b".to_vec()])
            .await;

        let hit = cache.get(gid, 0).await.expect("expected a cache hit");
        assert_eq!(hit, vec![b"bundle-a".to_vec(), b"bundle-b".to_vec()]);

        tokio::time::sleep(StdDuration::from_millis(60)).await;
        assert!(cache.get(gid, 0).await.is_none());
    }

    #[tokio::test]
    async fn miss_on_unknown_version_never_panics() {
        let cache = KeyCache::new(Duration::seconds(600));
        assert!(cache.get(Gid(1), 99).await.is_none());
    }
}
