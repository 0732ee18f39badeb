// SPDX-FileCopyrightText: 2026 Glass Relay Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Decides when and how to rotate a group's key epoch, and drives the
//! quorum's prepare/upload/switch protocol. Unaware of
//! `GroupController` or `MembershipFsm` — it is handed a `gid` and an actor,
//! and only talks to the stores, the cache, the bus and the candidate
//! selector.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use glkdc_common::identifiers::{Gid, Uid};

use crate::{
    candidate_selector,
    errors::GlkdcError,
    external::AccountKeyProvider,
    fault_injector::{FaultInjector, InjectedFault},
    keys::{cache::KeyCache, InsertOutcome, KeyVersionStore, Mode},
    membership::MembershipStore,
    pubsub::{MessageKind, PubSubBus},
    rate_limiter::registry::LimiterRegistry,
    retry::{retry_until, RetryPolicy},
    settings::GroupPolicySettings,
};

/// `insert`'s retry policy for the `GROUP_SWITCH_KEYS` publish: up to 3
/// attempts, 200ms * attempt backoff.
const SWITCH_PUBLISH_RETRY: RetryPolicy = RetryPolicy::new(3, StdDuration::from_millis(200));

pub struct KeyEpochCoordinator {
    membership: Arc<dyn MembershipStore>,
    keys: Arc<dyn KeyVersionStore>,
    cache: Arc<KeyCache>,
    pubsub: Arc<dyn PubSubBus>,
    account_keys: Arc<dyn AccountKeyProvider>,
    policy: GroupPolicySettings,
    fault_injector: Arc<dyn FaultInjector>,
}

/// Projects a `KeyRecord` payload down to what one caller should see:
/// `ONE_FOR_EACH` yields only their own entry, `ALL_THE_SAME` yields the
/// single shared ciphertext. Matches the minimal `{keys_v0, keys_v1,
/// encrypt_version}` shape from the design notes.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ProjectedKeyRecord {
    pub version: i64,
    pub mode: Mode,
    pub encrypt_version: i32,
    pub keys: serde_json::Value,
}

#[derive(Debug)]
pub enum PrepareResult {
    /// Caller is in the quorum; `bundles` is non-empty only for
    /// `ONE_FOR_EACH`.
    InQuorum { bundles: Vec<Vec<u8>> },
    /// Caller is not in the quorum, or `nextVersion` is already stale.
    Conflict,
}

impl KeyEpochCoordinator {
    pub fn new(
        membership: Arc<dyn MembershipStore>,
        keys: Arc<dyn KeyVersionStore>,
        cache: Arc<KeyCache>,
        pubsub: Arc<dyn PubSubBus>,
        account_keys: Arc<dyn AccountKeyProvider>,
        policy: GroupPolicySettings,
        fault_injector: Arc<dyn FaultInjector>,
    ) -> Self {
        Self {
            membership,
            keys,
            cache,
            pubsub,
            account_keys,
            policy,
            fault_injector,
        }
    }

    /// The rotation policy table: `P = powerMin`, `Q = powerMax`,
    /// `R = normalGroupRefreshMax`.
    fn decide(&self, member_count: u32, previous_mode: Option<Mode>) -> Option<Mode> {
        let p = self.policy.power_group_min;
        let q = self.policy.power_group_max;
        let r = self.policy.normal_group_refresh_keys_max;

        if member_count <= p {
            return Some(Mode::OneForEach);
        }
        if member_count <= q {
            return Some(match previous_mode {
                Some(Mode::AllTheSame) => Mode::AllTheSame,
                _ => Mode::OneForEach,
            });
        }
        if member_count <= r {
            return Some(Mode::AllTheSame);
        }
        match previous_mode {
            Some(Mode::AllTheSame) => None,
            _ => Some(Mode::AllTheSame),
        }
    }

    /// Re-evaluates rotation policy for `gid` after a membership-count
    /// change. `getLatestMode` failures are recovered as
    /// `Unknown` (conservative rotation).
    pub async fn on_membership_changed(&self, actor: &Uid, gid: Gid) -> Result<(), GlkdcError> {
        let counts = match self.membership.count_members(gid).await {
            crate::membership::Outcome::Ok(c) => c,
            crate::membership::Outcome::NotFound => return Ok(()),
            crate::membership::Outcome::AlreadyExists => unreachable!("count_members never CAS"),
            crate::membership::Outcome::Internal(e) => return Err(e.into()),
        };
        let previous_mode = self.keys.get_latest_mode(gid).await.unwrap_or(None);
        if let Some(mode) = self.decide(counts.total(), previous_mode) {
            self.request_rotate(actor, gid, mode).await?;
        }
        Ok(())
    }

    /// `fire_group_keys_update`: lets a member ask the server to re-evaluate
    /// rotation without a membership change. Subject to the
    /// `GroupKeysUpdate` limiter per named gid.
    pub async fn fire(
        &self,
        actor: &Uid,
        gids: &[Gid],
        limiters: &LimiterRegistry,
    ) -> Result<(), GlkdcError> {
        for &gid in gids {
            if !limiters.group_keys_update_allowed(actor, gid).await {
                return Err(GlkdcError::LimiterRejected);
            }
            match self.membership.get_member(gid, actor).await {
                crate::membership::Outcome::Ok(_) => {}
                crate::membership::Outcome::NotFound => return Err(GlkdcError::Forbidden),
                crate::membership::Outcome::AlreadyExists => unreachable!(),
                crate::membership::Outcome::Internal(e) => return Err(e.into()),
            }
            self.on_membership_changed(actor, gid).await?;
        }
        Ok(())
    }

    /// Publishes `GROUP_UPDATE_KEYS_REQUEST` and, for `ONE_FOR_EACH`,
    /// pre-fills the cache with the group's current member bundle keyed by
    /// the version the quorum is expected to produce next (this rewrite has
    /// no persisted system-message-id store beyond what's needed to emit
    /// events, so the next expected version doubles as that key).
    async fn request_rotate(&self, actor: &Uid, gid: Gid, mode: Mode) -> Result<(), GlkdcError> {
        if self
            .fault_injector
            .check(InjectedFault::BeforeRequest, gid)
            .is_some()
        {
            return Err(GlkdcError::Internal(crate::errors::StorageError::Database(
                sqlx::Error::PoolClosed.into(),
            )));
        }

        self.pubsub
            .publish_group_event(
                gid,
                MessageKind::GroupUpdateKeysRequest,
                serde_json::json!({ "gid": gid.0, "mode": mode, "requestedBy": actor.as_str() }),
            )
            .await;

        if mode == Mode::OneForEach {
            let next_version = self
                .keys
                .get_latest_mode_and_version(gid)
                .await
                .unwrap_or(None)
                .map(|(_, v)| v + 1)
                .unwrap_or(0);
            let counts = self.membership.count_members(gid).await;
            if let crate::membership::Outcome::Ok(_) = counts {
                let uids = self.members_of(gid).await;
                let bundles: Vec<Vec<u8>> = self
                    .account_keys
                    .fetch_identity_bundles(&uids)
                    .await
                    .into_iter()
                    .map(|entry| entry.bundle)
                    .collect();
                self.cache.set(gid, next_version, bundles).await;
            }
        }
        Ok(())
    }

    async fn members_of(&self, gid: Gid) -> Vec<Uid> {
        match self
            .membership
            .get_members_by_role(gid, &[], None, u32::MAX)
            .await
        {
            crate::membership::Outcome::Ok(members) => {
                members.into_iter().map(|m| m.uid).collect()
            }
            _ => Vec::new(),
        }
    }

    /// Step 1 of the quorum rotation protocol.
    pub async fn prepare(
        &self,
        caller: &Uid,
        gid: Gid,
        next_version: i64,
        mode: Mode,
    ) -> Result<PrepareResult, GlkdcError> {
        let latest = self
            .keys
            .get_latest_mode_and_version(gid)
            .await
            .map_err(GlkdcError::from)?;
        if let Some((_, latest_version)) = latest {
            if next_version <= latest_version {
                return Ok(PrepareResult::Conflict);
            }
        }

        let online = self.pubsub.online_master_members(gid).await;
        let quorum = candidate_selector::select(&online, next_version as u64, self.policy.key_switch_candidate_count);
        let in_quorum = quorum.iter().any(|a| &a.uid == caller);
        if !in_quorum {
            return Ok(PrepareResult::Conflict);
        }

        let bundles = match mode {
            Mode::OneForEach => match self.cache.get(gid, next_version).await {
                Some(bundles) => bundles,
                None => {
                    let uids = self.members_of(gid).await;
                    self.account_keys
                        .fetch_identity_bundles(&uids)
                        .await
                        .into_iter()
                        .map(|e| e.bundle)
                        .collect()
                }
            },
            Mode::AllTheSame => Vec::new(),
        };
        Ok(PrepareResult::InQuorum { bundles })
    }

    /// Step 2/3 of the quorum rotation protocol: validates membership and
    /// version, CAS-inserts the new epoch, then publishes `GROUP_SWITCH_KEYS`
    /// with up to three retries, linearly backed off.
    pub async fn upload(
        &self,
        caller: &Uid,
        gid: Gid,
        version: i64,
        mode: Mode,
        encrypt_version: i32,
        payload: serde_json::Value,
    ) -> Result<(), GlkdcError> {
        match self.membership.get_member(gid, caller).await {
            crate::membership::Outcome::Ok(_) => {}
            crate::membership::Outcome::NotFound => return Err(GlkdcError::Forbidden),
            crate::membership::Outcome::AlreadyExists => unreachable!(),
            crate::membership::Outcome::Internal(e) => return Err(e.into()),
        }

        if self
            .fault_injector
            .check(InjectedFault::BeforeUpload, gid)
            .is_some()
        {
            return Err(GlkdcError::Conflict);
        }

        let record = crate::keys::KeyRecord {
            gid,
            version,
            mode,
            encrypt_version,
            creator: caller.clone(),
            create_time: chrono::Utc::now(),
            payload,
        };

        match self.keys.insert(record).await {
            InsertOutcome::Ok => {}
            InsertOutcome::CasFail => return Err(GlkdcError::Conflict),
            InsertOutcome::Internal(e) => return Err(e.into()),
        }

        if self
            .fault_injector
            .check(InjectedFault::BeforeSwitch, gid)
            .is_some()
        {
            return Err(GlkdcError::Internal(crate::errors::StorageError::Database(
                sqlx::Error::PoolClosed.into(),
            )));
        }

        let deadline = tokio::time::Instant::now() + StdDuration::from_secs(5);
        let publish_result: Result<(), &'static str> = retry_until(SWITCH_PUBLISH_RETRY, deadline, || {
            let pubsub = self.pubsub.clone();
            let version = version;
            async move {
                let result = pubsub
                    .publish_group_event(
                        gid,
                        MessageKind::GroupSwitchKeys,
                        serde_json::json!({ "version": version }),
                    )
                    .await;
                if result.is_sent() {
                    Ok(())
                } else {
                    Err("publish failed")
                }
            }
        })
        .await;

        if publish_result.is_err() {
            tracing::warn!(gid = gid.0, version, "failed to publish GROUP_SWITCH_KEYS after retries");
        }
        Ok(())
    }

    /// `fetchByVersions`: projects each matching record to `caller`'s view.
    pub async fn fetch_by_versions(
        &self,
        caller: &Uid,
        gid: Gid,
        versions: &[i64],
    ) -> Result<Vec<ProjectedKeyRecord>, GlkdcError> {
        self.require_member(gid, caller).await?;
        let records = self.keys.get(gid, versions).await?;
        Ok(records
            .into_iter()
            .map(|r| project(caller, r))
            .collect())
    }

    /// `fetchLatest`: newest version per `gid`, only for groups `caller` is
    /// a member of. Non-members get `FORBIDDEN`; groups with no records yet
    /// are simply absent from the result, not an error.
    pub async fn fetch_latest(
        &self,
        caller: &Uid,
        gids: &[Gid],
    ) -> Result<Vec<(Gid, Option<ProjectedKeyRecord>)>, GlkdcError> {
        let mut out = Vec::with_capacity(gids.len());
        for &gid in gids {
            self.require_member(gid, caller).await?;
            let record = self.keys.get_latest(gid).await?;
            out.push((gid, record.map(|r| project(caller, r))));
        }
        Ok(out)
    }

    async fn require_member(&self, gid: Gid, caller: &Uid) -> Result<(), GlkdcError> {
        match self.membership.get_member(gid, caller).await {
            crate::membership::Outcome::Ok(_) => Ok(()),
            crate::membership::Outcome::NotFound => Err(GlkdcError::Forbidden),
            crate::membership::Outcome::AlreadyExists => unreachable!(),
            crate::membership::Outcome::Internal(e) => Err(e.into()),
        }
    }
}

fn project(caller: &Uid, record: crate::keys::KeyRecord) -> ProjectedKeyRecord {
    let keys = match record.mode {
        Mode::AllTheSame => record.payload.get("keys_v1").cloned().unwrap_or(serde_json::Value::Null),
        Mode::OneForEach => {
            let entries = record
                .payload
                .get("keys_v0")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default();
            let mine: Vec<serde_json::Value> = entries
                .into_iter()
                .filter(|e| e.get("uid").and_then(|u| u.as_str()) == Some(caller.as_str()))
                .collect();
            serde_json::json!({ "keys_v0": mine })
        }
    };
    ProjectedKeyRecord {
        version: record.version,
        mode: record.mode,
        encrypt_version: record.encrypt_version,
        keys,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coordinator_policy() -> GroupPolicySettings {
        GroupPolicySettings {
            power_group_min: 200,
            power_group_max: 220,
            normal_group_refresh_keys_max: 240,
            key_switch_candidate_count: 5,
            qr_code_pending_ttl_seconds: 60,
            key_cache_ttl_seconds: 600,
            group_keys_versions_limit: 10,
            latest_group_keys_gids_limit: 5,
            fire_group_keys_update_gids_limit: 10,
            members_query_uids_limit: 500,
            privileged_principals: vec![],
        }
    }

    fn coordinator() -> KeyEpochCoordinator {
        KeyEpochCoordinator::new(
            Arc::new(crate::membership::memory::InMemoryMembershipStore::new()),
            Arc::new(crate::keys::memory::InMemoryKeyVersionStore::new()),
            KeyCache::new(chrono::Duration::seconds(600)),
            Arc::new(crate::pubsub::memory::InMemoryPubSubBus::new()),
            Arc::new(crate::external::fakes::InMemoryAccountKeyProvider::default()),
            coordinator_policy(),
            Arc::new(crate::fault_injector::NoopFaultInjector),
        )
    }

    #[test]
    fn rotation_policy_crosses_thresholds_as_specified() {
        let c = coordinator();
        assert_eq!(
            c.decide(210, Some(Mode::AllTheSame)),
            Some(Mode::AllTheSame)
        );
        assert_eq!(
            c.decide(210, Some(Mode::OneForEach)),
            Some(Mode::OneForEach)
        );
        assert_eq!(c.decide(250, Some(Mode::AllTheSame)), None);
        assert_eq!(c.decide(250, Some(Mode::OneForEach)), Some(Mode::AllTheSame));
        assert_eq!(c.decide(5, None), Some(Mode::OneForEach));
    }

    #[tokio::test]
    async fn upload_cas_conflict_on_second_writer() {
        let c = coordinator();
        let gid = Gid(1);
        let uid = Uid::from_public_key(b"writer");
        c.membership
            .insert_member(crate::membership::model::GroupMember {
                gid,
                uid: uid.clone(),
                role: crate::membership::model::Role::Owner,
                encrypted_key: vec![],
                group_info_secret: vec![],
                proof: vec![],
                nick: vec![],
                nickname: vec![],
                group_nickname: vec![],
                profile_keys: vec![],
                status: 0,
                create_time: chrono::Utc::now(),
                last_ack_mid: 0,
            })
            .await;

        let first = c
            .upload(&uid, gid, 5, Mode::AllTheSame, 0, serde_json::json!({}))
            .await;
        assert!(first.is_ok());

        let second = c
            .upload(&uid, gid, 5, Mode::AllTheSame, 0, serde_json::json!({}))
            .await;
        assert!(matches!(second, Err(GlkdcError::Conflict)));
    }
}
