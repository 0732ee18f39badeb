// SPDX-FileCopyrightText: 2026 Glass Relay Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Owns one [`RateLimiter`] per named limiter required by the control plane
//! and resolves `DependencyLimiter` composition once at construction. Built
//! by `GroupController`'s caller at startup and handed around by reference —
//! never a process-wide mutable singleton.

use chrono::TimeDelta;
use glkdc_common::identifiers::{Gid, Uid};
use sqlx::PgPool;
use tokio::sync::RwLock;

use crate::settings::RateLimitSettings;

use super::{provider::RLPostgresStorage, RLConfig, RLKey, RateLimiter};

pub struct LimiterRegistry {
    group_creation: RwLock<RateLimiter<RLPostgresStorage>>,
    group_keys_update: RwLock<RateLimiter<RLPostgresStorage>>,
    dh_keys: RwLock<RateLimiter<RLPostgresStorage>>,
    group_member_join: RwLock<RateLimiter<RLPostgresStorage>>,
}

impl LimiterRegistry {
    pub fn new(pool: PgPool, settings: &RateLimitSettings) -> Self {
        let limiter = |period_hours: u32, burst: u64| {
            RateLimiter::new(
                RLConfig {
                    max_requests: burst,
                    time_window: TimeDelta::hours(period_hours as i64),
                },
                RLPostgresStorage::new(pool.clone()),
            )
        };

        Self {
            group_creation: RwLock::new(limiter(
                settings.group_creation.period_hours,
                settings.group_creation.burst,
            )),
            group_keys_update: RwLock::new(limiter(
                settings.group_keys_update.period_hours,
                settings.group_keys_update.burst,
            )),
            dh_keys: RwLock::new(limiter(
                settings.dh_keys.period_hours,
                settings.dh_keys.burst,
            )),
            group_member_join: RwLock::new(limiter(
                settings.group_member_join.period_hours,
                settings.group_member_join.burst,
            )),
        }
    }

    /// Updates `(period, burst)` for every named limiter in place, without
    /// resetting any in-flight allowance counters.
    pub async fn reload(&self, settings: &RateLimitSettings) {
        self.group_creation.write().await.reconfigure(RLConfig {
            max_requests: settings.group_creation.burst,
            time_window: TimeDelta::hours(settings.group_creation.period_hours as i64),
        });
        self.group_keys_update.write().await.reconfigure(RLConfig {
            max_requests: settings.group_keys_update.burst,
            time_window: TimeDelta::hours(settings.group_keys_update.period_hours as i64),
        });
        self.dh_keys.write().await.reconfigure(RLConfig {
            max_requests: settings.dh_keys.burst,
            time_window: TimeDelta::hours(settings.dh_keys.period_hours as i64),
        });
        self.group_member_join.write().await.reconfigure(RLConfig {
            max_requests: settings.group_member_join.burst,
            time_window: TimeDelta::hours(settings.group_member_join.period_hours as i64),
        });
    }

    pub async fn group_creation_allowed(&self, uid: &Uid) -> bool {
        let key = RLKey::new(b"group_creation", &[uid.as_str().as_bytes()]);
        self.group_creation.read().await.allowed(key).await
    }

    pub async fn group_keys_update_allowed(&self, uid: &Uid, gid: Gid) -> bool {
        let key = RLKey::new(
            b"group_keys_update",
            &[uid.as_str().as_bytes(), gid.to_string().as_bytes()],
        );
        self.group_keys_update.read().await.allowed(key).await
    }

    /// `DhKeys` depends on `GroupCreation`: a caller already over budget on
    /// group creation is also refused here, even though this call does not
    /// itself consume a `GroupCreation` token.
    pub async fn dh_keys_allowed(&self, uid: &Uid) -> bool {
        let dependency_key = RLKey::new(b"group_creation", &[uid.as_str().as_bytes()]);
        if !self
            .group_creation
            .read()
            .await
            .peek_allowed(&dependency_key)
            .await
        {
            return false;
        }
        let key = RLKey::new(b"dh_keys", &[uid.as_str().as_bytes()]);
        self.dh_keys.read().await.allowed(key).await
    }

    pub async fn group_member_join_allowed(&self, gid: Gid, uid: &Uid) -> bool {
        let key = RLKey::new(
            b"group_member_join",
            &[gid.to_string().as_bytes(), uid.as_str().as_bytes()],
        );
        self.group_member_join.read().await.allowed(key).await
    }
}
