// SPDX-FileCopyrightText: 2026 Glass Relay Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Binds [`MembershipFsm`] and [`KeyEpochCoordinator`] to the wire surface.
//! Per call: enforces the list-size boundaries the
//! endpoint table documents, consults a limiter where the operation itself
//! does not already, delegates to the state machine or coordinator, and
//! shapes the result into a response DTO. Holds only `Arc`-shared
//! collaborator references — no owned mutable state, passing collaborator
//! trait objects into request handlers rather than a shared mutable god
//! object.

use std::sync::Arc;

use glkdc_common::identifiers::{Gid, Uid};
use serde::Serialize;

use crate::errors::GlkdcError;
use crate::external::{AccountKeyProvider, KeyBundleEntry};
use crate::key_epoch_coordinator::{KeyEpochCoordinator, PrepareResult, ProjectedKeyRecord};
use crate::keys::Mode;
use crate::membership::model::{Group, GroupMember};
use crate::membership::{MembershipStore, Outcome};
use crate::membership_fsm::{
    CreateGroupRequest, InviteRequest, JoinByCodeOutcome, JoinByCodeRequest, JoinReview,
    MembershipFsm, UpdateGroupRequest,
};
use crate::rate_limiter::registry::LimiterRegistry;
use crate::settings::GroupPolicySettings;

#[derive(Debug, Serialize)]
pub struct CreateGroupResponse {
    pub gid: u64,
}

#[derive(Debug, Serialize)]
pub struct MembersResponse {
    pub members: Vec<GroupMember>,
}

#[derive(Debug, Serialize)]
pub struct GroupKeysResponse {
    pub records: Vec<ProjectedKeyRecord>,
}

#[derive(Debug, Serialize)]
pub struct LatestGroupKeyEntry {
    pub gid: u64,
    pub record: Option<ProjectedKeyRecord>,
}

#[derive(Debug, Serialize)]
pub struct LatestGroupKeysResponse {
    pub entries: Vec<LatestGroupKeyEntry>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "result")]
pub enum PrepareKeyUpdateResponse {
    InQuorum { bundles: Vec<Vec<u8>> },
    Conflict,
}

#[derive(Debug, Serialize)]
pub struct DhKeysResponse {
    pub bundles: Vec<DhKeyBundle>,
}

#[derive(Debug, Serialize)]
pub struct DhKeyBundle {
    pub uid: String,
    pub device_id: u32,
    pub bundle: Vec<u8>,
}

pub struct GroupController {
    membership: Arc<dyn MembershipStore>,
    account_keys: Arc<dyn AccountKeyProvider>,
    limiters: Arc<LimiterRegistry>,
    fsm: Arc<MembershipFsm>,
    key_epoch: Arc<KeyEpochCoordinator>,
    policy: GroupPolicySettings,
}

impl GroupController {
    pub fn new(
        membership: Arc<dyn MembershipStore>,
        account_keys: Arc<dyn AccountKeyProvider>,
        limiters: Arc<LimiterRegistry>,
        fsm: Arc<MembershipFsm>,
        key_epoch: Arc<KeyEpochCoordinator>,
        policy: GroupPolicySettings,
    ) -> Self {
        Self {
            membership,
            account_keys,
            limiters,
            fsm,
            key_epoch,
            policy,
        }
    }

    /// `PUT /v3/group/create`
    pub async fn create_group(
        &self,
        caller: &Uid,
        req: CreateGroupRequest,
    ) -> Result<CreateGroupResponse, GlkdcError> {
        let gid = self.fsm.create_group(caller, req).await?;
        Ok(CreateGroupResponse { gid: gid.0 })
    }

    /// `PUT /v3/group/update`
    pub async fn update_group(
        &self,
        caller: &Uid,
        gid: Gid,
        req: UpdateGroupRequest,
    ) -> Result<Group, GlkdcError> {
        self.fsm.update_group(caller, gid, req).await
    }

    /// `PUT /v3/group/invite`
    pub async fn invite(&self, caller: &Uid, gid: Gid, req: InviteRequest) -> Result<(), GlkdcError> {
        self.fsm.invite(caller, gid, req).await
    }

    /// `PUT /v3/group/join_group_by_code`
    pub async fn join_group_by_code(
        &self,
        caller: &Uid,
        gid: Gid,
        req: JoinByCodeRequest,
    ) -> Result<JoinByCodeOutcome, GlkdcError> {
        self.fsm.join_group_by_code(caller, gid, req).await
    }

    /// `PUT /v3/group/add_me`
    pub async fn add_me(
        &self,
        caller: &Uid,
        gid: Gid,
        group_info_secret: Vec<u8>,
        proof: Vec<u8>,
    ) -> Result<(), GlkdcError> {
        self.fsm.add_me(caller, gid, group_info_secret, proof).await
    }

    /// `PUT /v3/group/review_join_request`
    pub async fn review_join_request(
        &self,
        caller: &Uid,
        gid: Gid,
        reviews: Vec<JoinReview>,
    ) -> Result<(), GlkdcError> {
        self.fsm.review_join_request(caller, gid, reviews).await
    }

    /// `PUT /v3/group/kick`
    pub async fn kick(&self, caller: &Uid, gid: Gid, members: Vec<Uid>) -> Result<(), GlkdcError> {
        self.fsm.kick(caller, gid, members).await
    }

    /// `PUT /v3/group/leave`
    pub async fn leave(
        &self,
        caller: &Uid,
        gid: Gid,
        next_owner: Option<Uid>,
    ) -> Result<(), GlkdcError> {
        self.fsm.leave(caller, gid, next_owner).await
    }

    /// `POST /v3/group/members`. Requires the caller to already be a member,
    /// so this batch lookup cannot be used to enumerate membership from
    /// outside the group.
    pub async fn members(
        &self,
        caller: &Uid,
        gid: Gid,
        uids: Vec<Uid>,
    ) -> Result<MembersResponse, GlkdcError> {
        if uids.len() as u32 > self.policy.members_query_uids_limit as u32 {
            return Err(GlkdcError::BadRequest(format!(
                "uids exceeds the {}-entry limit",
                self.policy.members_query_uids_limit
            )));
        }
        match self.membership.get_member(gid, caller).await {
            Outcome::Ok(_) => {}
            Outcome::NotFound => return Err(GlkdcError::Forbidden),
            Outcome::AlreadyExists => unreachable!(),
            Outcome::Internal(e) => return Err(e.into()),
        }
        match self.membership.get_members(gid, &uids).await {
            Outcome::Ok(members) => Ok(MembersResponse { members }),
            Outcome::NotFound => Err(GlkdcError::NotFound),
            Outcome::AlreadyExists => unreachable!(),
            Outcome::Internal(e) => Err(e.into()),
        }
    }

    /// `POST /v3/group/group_keys`
    pub async fn group_keys(
        &self,
        caller: &Uid,
        gid: Gid,
        versions: Vec<i64>,
    ) -> Result<GroupKeysResponse, GlkdcError> {
        if versions.len() > self.policy.group_keys_versions_limit {
            return Err(GlkdcError::BadRequest(format!(
                "versions exceeds the {}-entry limit",
                self.policy.group_keys_versions_limit
            )));
        }
        let records = self.key_epoch.fetch_by_versions(caller, gid, &versions).await?;
        Ok(GroupKeysResponse { records })
    }

    /// `POST /v3/group/latest_group_keys`
    pub async fn latest_group_keys(
        &self,
        caller: &Uid,
        gids: Vec<Gid>,
    ) -> Result<LatestGroupKeysResponse, GlkdcError> {
        if gids.len() > self.policy.latest_group_keys_gids_limit {
            return Err(GlkdcError::BadRequest(format!(
                "gids exceeds the {}-entry limit",
                self.policy.latest_group_keys_gids_limit
            )));
        }
        let entries = self
            .key_epoch
            .fetch_latest(caller, &gids)
            .await?
            .into_iter()
            .map(|(gid, record)| LatestGroupKeyEntry { gid: gid.0, record })
            .collect();
        Ok(LatestGroupKeysResponse { entries })
    }

    /// `POST /v3/group/fire_group_keys_update`
    pub async fn fire_group_keys_update(&self, caller: &Uid, gids: Vec<Gid>) -> Result<(), GlkdcError> {
        if gids.len() > self.policy.fire_group_keys_update_gids_limit {
            return Err(GlkdcError::BadRequest(format!(
                "gids exceeds the {}-entry limit",
                self.policy.fire_group_keys_update_gids_limit
            )));
        }
        self.key_epoch.fire(caller, &gids, &self.limiters).await
    }

    /// `PUT /v3/group/group_keys_update`
    #[allow(clippy::too_many_arguments)]
    pub async fn group_keys_update(
        &self,
        caller: &Uid,
        gid: Gid,
        version: i64,
        mode: Mode,
        encrypt_version: i32,
        group_keys: serde_json::Value,
    ) -> Result<(), GlkdcError> {
        if !self.limiters.group_keys_update_allowed(caller, gid).await {
            return Err(GlkdcError::LimiterRejected);
        }
        self.key_epoch
            .upload(caller, gid, version, mode, encrypt_version, group_keys)
            .await
    }

    /// `POST /v3/group/prepare_key_update`
    pub async fn prepare_key_update(
        &self,
        caller: &Uid,
        gid: Gid,
        version: i64,
        mode: Mode,
    ) -> Result<PrepareKeyUpdateResponse, GlkdcError> {
        match self.key_epoch.prepare(caller, gid, version, mode).await? {
            PrepareResult::InQuorum { bundles } => Ok(PrepareKeyUpdateResponse::InQuorum { bundles }),
            PrepareResult::Conflict => Ok(PrepareKeyUpdateResponse::Conflict),
        }
    }

    /// `POST /v3/group/dh_keys`
    pub async fn dh_keys(&self, caller: &Uid, uids: Vec<Uid>) -> Result<DhKeysResponse, GlkdcError> {
        if !self.limiters.dh_keys_allowed(caller).await {
            return Err(GlkdcError::LimiterRejected);
        }
        let bundles = self
            .account_keys
            .fetch_identity_bundles(&uids)
            .await
            .into_iter()
            .map(|entry: KeyBundleEntry| DhKeyBundle {
                uid: entry.uid.as_str().to_string(),
                device_id: entry.device_id.0,
                bundle: entry.bundle,
            })
            .collect();
        Ok(DhKeysResponse { bundles })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::fakes::{AlwaysMutual, InMemoryAccountKeyProvider};
    use crate::fault_injector::NoopFaultInjector;
    use crate::keys::cache::KeyCache;
    use crate::keys::memory::InMemoryKeyVersionStore;
    use crate::keys::KeyVersionStore;
    use crate::membership::memory::InMemoryMembershipStore;
    use crate::membership_fsm::ShareBlock;
    use crate::pubsub::memory::InMemoryPubSubBus;
    use crate::pubsub::PubSubBus;
    use ed25519_dalek::{Signer, SigningKey};
    use glkdc_common::crypto::signatures::{Signature, VerifyingKey};
    use rand::rngs::OsRng;
    use sqlx::PgPool;

    fn policy() -> GroupPolicySettings {
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

    fn share_block(owner_key: &SigningKey, owner_confirm: bool) -> ShareBlock {
        let qr_code_setting = b"share-token".to_vec();
        let share_signature = Signature::from_bytes(&owner_key.sign(&qr_code_setting).to_bytes()).unwrap();
        let mut concatenated = qr_code_setting.clone();
        concatenated.push(owner_confirm as u8);
        let share_and_owner_confirm_signature =
            Signature::from_bytes(&owner_key.sign(&concatenated).to_bytes()).unwrap();
        ShareBlock {
            qr_code_setting,
            share_signature,
            share_and_owner_confirm_signature,
        }
    }

    #[sqlx::test]
    async fn group_keys_rejects_more_than_ten_versions(pool: PgPool) -> sqlx::Result<()> {
        let owner_key = SigningKey::generate(&mut OsRng);
        let owner = Uid::from_public_key(owner_key.verifying_key().as_bytes());

        let mut account_keys = InMemoryAccountKeyProvider::default();
        account_keys.identity_keys.insert(
            owner.clone(),
            VerifyingKey::from_bytes(&owner_key.verifying_key().to_bytes()).unwrap(),
        );
        let account_keys = Arc::new(account_keys);

        let membership: Arc<dyn MembershipStore> = Arc::new(InMemoryMembershipStore::new());
        let keys: Arc<dyn KeyVersionStore> = Arc::new(InMemoryKeyVersionStore::new());
        let pubsub = Arc::new(InMemoryPubSubBus::new());
        let limiters = Arc::new(LimiterRegistry::new(pool, &crate::settings::RateLimitSettings::default()));

        let key_epoch = Arc::new(KeyEpochCoordinator::new(
            membership.clone(),
            keys.clone(),
            KeyCache::new(chrono::Duration::seconds(600)),
            pubsub.clone() as Arc<dyn PubSubBus>,
            account_keys.clone(),
            policy(),
            Arc::new(NoopFaultInjector),
        ));

        let fsm = Arc::new(MembershipFsm::new(
            membership.clone(),
            keys,
            pubsub.clone() as Arc<dyn PubSubBus>,
            key_epoch.clone(),
            limiters.clone(),
            account_keys.clone(),
            Arc::new(AlwaysMutual),
            policy(),
        ));

        let controller = GroupController::new(
            membership,
            account_keys,
            limiters,
            fsm.clone(),
            key_epoch,
            policy(),
        );

        let gid = fsm
            .create_group(
                &owner,
                CreateGroupRequest {
                    name: b"g".to_vec(),
                    icon: vec![],
                    intro: vec![],
                    broadcast: false,
                    owner_confirm: false,
                    share: share_block(&owner_key, false),
                    encrypted_group_info_secret: b"s".to_vec(),
                    encrypted_ephemeral_key: b"e".to_vec(),
                    owner_proof: vec![],
                    members: vec![],
                    member_group_info_secrets: vec![],
                    member_proofs: vec![],
                    group_keys_mode: Mode::OneForEach,
                    group_keys_payload: serde_json::json!({ "keys_v0": [] }),
                },
            )
            .await
            .unwrap();

        let too_many: Vec<i64> = (0..11).collect();
        let result = controller.group_keys(&owner, gid, too_many).await;
        assert!(matches!(result, Err(GlkdcError::BadRequest(_))));

        let ok = controller.group_keys(&owner, gid, vec![0]).await.unwrap();
        assert_eq!(ok.records.len(), 1);
        Ok(())
    }
}
