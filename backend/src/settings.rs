// SPDX-FileCopyrightText: 2026 Glass Relay Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use chrono::Duration;
use glkdc_common::identifiers::Uid;
use serde::Deserialize;

/// Top-level configuration, loaded by the `server` crate's `config`-crate
/// pipeline from layered YAML files plus `GLKDC_`-prefixed environment
/// overrides (see `server::configurations`).
#[derive(Deserialize, Clone, Debug)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub application: ApplicationSettings,
    pub group: GroupPolicySettings,
    pub rate_limits: RateLimitSettings,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ApplicationSettings {
    pub port: u16,
    pub host: String,
    /// Requests are aborted at their next suspension point once this
    /// deadline elapses (default 180s per the concurrency model).
    #[serde(default = "default_deadline_seconds")]
    pub request_deadline_seconds: u64,
    /// Accepted request bodies are capped at this size (default 64 MiB).
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_deadline_seconds() -> u64 {
    180
}

fn default_max_body_bytes() -> usize {
    64 * 1024 * 1024
}

#[derive(Deserialize, Clone, Debug)]
pub struct DatabaseSettings {
    pub username: String,
    pub password: String,
    pub port: u16,
    pub host: String,
    pub name: String,
    #[serde(default)]
    pub require_tls: bool,
}

impl DatabaseSettings {
    fn base_connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}",
            self.username, self.password, self.host, self.port
        )
    }

    pub fn connection_string(&self) -> String {
        let mut s = self.base_connection_string();
        s.push('/');
        s.push_str(&self.name);
        if self.require_tls {
            s.push_str("?sslmode=require");
        }
        s
    }

    pub fn connection_string_without_database(&self) -> String {
        self.base_connection_string()
    }
}

/// Corresponds to the original `GroupConfig`: membership-count thresholds
/// driving `KeyEpochCoordinator`'s rotation policy, plus the quorum size and
/// the administrative backdoor from REDESIGN FLAGS turned into real
/// configuration.
#[derive(Deserialize, Clone, Debug)]
pub struct GroupPolicySettings {
    /// P: at or below this member count, always rotate to ONE_FOR_EACH.
    pub power_group_min: u32,
    /// Q: upper bound of the "mixed" member-count bucket.
    pub power_group_max: u32,
    /// R: above this member count, ALL_THE_SAME groups stop refreshing keys
    /// on every membership change.
    pub normal_group_refresh_keys_max: u32,
    #[serde(default = "default_key_switch_candidate_count")]
    pub key_switch_candidate_count: usize,
    #[serde(default = "default_qr_pending_ttl_seconds")]
    pub qr_code_pending_ttl_seconds: i64,
    #[serde(default = "default_key_cache_ttl_seconds")]
    pub key_cache_ttl_seconds: i64,
    #[serde(default = "default_group_keys_versions_limit")]
    pub group_keys_versions_limit: usize,
    #[serde(default = "default_latest_group_keys_gids_limit")]
    pub latest_group_keys_gids_limit: usize,
    #[serde(default = "default_fire_group_keys_update_gids_limit")]
    pub fire_group_keys_update_gids_limit: usize,
    #[serde(default = "default_members_query_uids_limit")]
    pub members_query_uids_limit: usize,
    /// Principals that bypass role and contact-mutuality checks on invite.
    /// Replaces the literal `"bcm_backend_manager"` uid from the original
    /// implementation with explicit, auditable configuration.
    #[serde(default)]
    pub privileged_principals: Vec<Uid>,
}

fn default_key_switch_candidate_count() -> usize {
    5
}

fn default_qr_pending_ttl_seconds() -> i64 {
    60
}

fn default_key_cache_ttl_seconds() -> i64 {
    600
}

fn default_group_keys_versions_limit() -> usize {
    10
}

fn default_latest_group_keys_gids_limit() -> usize {
    5
}

fn default_fire_group_keys_update_gids_limit() -> usize {
    10
}

fn default_members_query_uids_limit() -> usize {
    500
}

impl GroupPolicySettings {
    pub fn qr_code_pending_ttl(&self) -> Duration {
        Duration::seconds(self.qr_code_pending_ttl_seconds)
    }

    pub fn key_cache_ttl(&self) -> Duration {
        Duration::seconds(self.key_cache_ttl_seconds)
    }
}

/// Defaults for the four named limiters. `period_hours`/`burst` are
/// hot-reloadable at runtime via `LimiterRegistry::reload`.
#[derive(Deserialize, Clone, Debug)]
pub struct RateLimitSettings {
    #[serde(default = "default_group_creation")]
    pub group_creation: LimiterConfig,
    #[serde(default = "default_group_keys_update")]
    pub group_keys_update: LimiterConfig,
    #[serde(default = "default_dh_keys")]
    pub dh_keys: LimiterConfig,
    #[serde(default = "default_group_member_join")]
    pub group_member_join: LimiterConfig,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            group_creation: default_group_creation(),
            group_keys_update: default_group_keys_update(),
            dh_keys: default_dh_keys(),
            group_member_join: default_group_member_join(),
        }
    }
}

#[derive(Deserialize, Clone, Copy, Debug)]
pub struct LimiterConfig {
    pub period_hours: u32,
    pub burst: u64,
}

fn default_group_creation() -> LimiterConfig {
    LimiterConfig {
        period_hours: 24,
        burst: 20,
    }
}

fn default_group_keys_update() -> LimiterConfig {
    LimiterConfig {
        period_hours: 24,
        burst: 50,
    }
}

fn default_dh_keys() -> LimiterConfig {
    LimiterConfig {
        period_hours: 24,
        burst: 20,
    }
}

fn default_group_member_join() -> LimiterConfig {
    LimiterConfig {
        period_hours: 24,
        burst: 30,
    }
}
