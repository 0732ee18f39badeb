// SPDX-FileCopyrightText: 2026 Glass Relay Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Token-bucket rate limiting, keyed on a SHA-256 digest of an arbitrary
//! composite key (limiter name, uid, gid, ...). [`RateLimiter`] is generic
//! over [`StorageProvider`] so the same policy logic runs against Postgres
//! in production and an in-memory map in tests.

use chrono::TimeDelta;
use sha2::{Digest, Sha256};
use sqlx::types::chrono::{DateTime, Utc};

pub mod provider;
pub mod registry;

#[derive(Debug, Clone)]
pub struct RLConfig {
    pub max_requests: u64,
    pub time_window: TimeDelta,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RLKey {
    key: [u8; 32],
}

impl RLKey {
    pub fn new(limiter_name: &[u8], custom: &[&[u8]]) -> Self {
        let key = {
            let mut hasher = Sha256::new();

            hasher.update((limiter_name.len() as u32).to_be_bytes());
            hasher.update(limiter_name);
            for part in custom {
                hasher.update((part.len() as u32).to_be_bytes());
                hasher.update(part);
            }

            hasher.finalize().into()
        };

        RLKey { key }
    }

    pub fn serialize(&self) -> &[u8] {
        &self.key
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Allowance {
    remaining: u64,
    valid_until: DateTime<Utc>,
}

impl Allowance {
    pub fn new(config: &RLConfig) -> Self {
        Allowance {
            remaining: config.max_requests,
            valid_until: Utc::now() + config.time_window,
        }
    }

    fn reset(&mut self, config: &RLConfig) {
        self.remaining = config.max_requests;
        self.valid_until = Utc::now() + config.time_window;
    }

    fn allowed(&mut self, config: &RLConfig) -> bool {
        if self.valid_until < Utc::now() {
            self.reset(config);
        }

        if self.remaining == 0 {
            false
        } else {
            self.remaining -= 1;
            true
        }
    }
}

#[async_trait::async_trait]
pub trait StorageProvider {
    async fn get(&self, key: &RLKey) -> Option<Allowance>;
    async fn set(&self, key: RLKey, allowance: Allowance);
}

pub struct RateLimiter<S: StorageProvider> {
    config: RLConfig,
    storage: S,
}

impl<S: StorageProvider> RateLimiter<S> {
    pub fn new(config: RLConfig, storage: S) -> Self {
        RateLimiter { config, storage }
    }

    pub fn reconfigure(&mut self, config: RLConfig) {
        self.config = config;
    }

    /// `true` iff the request at `key` is within budget. Consumes a token on
    /// success.
    pub async fn allowed(&self, key: RLKey) -> bool {
        let mut allowance = self
            .storage
            .get(&key)
            .await
            .unwrap_or_else(|| Allowance::new(&self.config));

        if allowance.allowed(&self.config) {
            self.storage.set(key, allowance.clone()).await;
            true
        } else {
            false
        }
    }

    /// Reports whether `key` currently has budget remaining, without
    /// consuming a token. Used when this limiter is consulted only as
    /// another limiter's dependency.
    pub async fn peek_allowed(&self, key: &RLKey) -> bool {
        match self.storage.get(key).await {
            Some(allowance) => allowance.remaining > 0 || allowance.valid_until < Utc::now(),
            None => true,
        }
    }
}

/// Composes a limiter with zero or more upstream dependencies: the combined
/// decision is LIMITED if this limiter is over budget, OR if any dependency
/// is. Dependencies are evaluated left to right and short-circuit, so a
/// caller already rejected by `GroupCreation` never consumes a `DhKeys`
/// token it would otherwise have spent.
pub struct DependencyLimiter<S: StorageProvider> {
    limiter: RateLimiter<S>,
    dependencies: Vec<Box<dyn DependencyCheck + Send + Sync>>,
}

#[async_trait::async_trait]
pub trait DependencyCheck {
    async fn allowed(&self, custom: &[&[u8]]) -> bool;
}

#[async_trait::async_trait]
impl<S: StorageProvider + Send + Sync> DependencyCheck for RateLimiter<S> {
    async fn allowed(&self, custom: &[&[u8]]) -> bool {
        self.peek_allowed(&RLKey::new(b"dependency", custom)).await
    }
}

impl<S: StorageProvider> DependencyLimiter<S> {
    pub fn new(limiter: RateLimiter<S>) -> Self {
        Self {
            limiter,
            dependencies: Vec::new(),
        }
    }

    pub fn depends_on(mut self, dependency: Box<dyn DependencyCheck + Send + Sync>) -> Self {
        self.dependencies.push(dependency);
        self
    }

    pub async fn allowed(&self, key: RLKey, dependency_custom: &[&[u8]]) -> bool {
        if !self.limiter.allowed(key).await {
            return false;
        }
        for dependency in &self.dependencies {
            if !dependency.allowed(dependency_custom).await {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::TimeDelta;
    use tokio::sync::Mutex;

    use super::{Allowance, RLConfig, RLKey, RateLimiter, StorageProvider};

    #[derive(Default)]
    pub struct InMemoryStorage {
        data: Mutex<HashMap<Vec<u8>, Allowance>>,
    }

    impl InMemoryStorage {
        pub fn new() -> Self {
            InMemoryStorage {
                data: Mutex::new(HashMap::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl StorageProvider for InMemoryStorage {
        async fn get(&self, key: &RLKey) -> Option<Allowance> {
            self.data.lock().await.get(key.serialize()).cloned()
        }

        async fn set(&self, key: RLKey, allowance: Allowance) {
            self.data
                .lock()
                .await
                .insert(key.serialize().to_owned(), allowance);
        }
    }

    #[tokio::test]
    async fn test_rate_limiter() {
        let config = RLConfig {
            max_requests: 5,
            time_window: TimeDelta::milliseconds(50),
        };
        let storage = InMemoryStorage::new();
        let rate_limiter = RateLimiter::new(config.clone(), storage);

        let key = RLKey::new(b"test_limiter", &[]);

        for _ in 0..config.max_requests {
            assert!(rate_limiter.allowed(key.clone()).await);
        }

        assert!(!rate_limiter.allowed(key.clone()).await);

        tokio::time::sleep(config.time_window.to_std().unwrap()).await;

        assert!(rate_limiter.allowed(key).await);
    }
}
