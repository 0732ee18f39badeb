// SPDX-FileCopyrightText: 2026 Glass Relay Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Join/invite/review/kick/leave transitions with signature validation.
//! Unaware of the wire surface — `GroupController` translates HTTP
//! bodies into the request types here and this crate's error variants back
//! into status codes.
//!
//! States per `(gid, uid)`: `None`, `Pending`, `QrCodePending`,
//! `Member(role)`. Every write transition persists a `GROUP_MEMBER_UPDATE`
//! (or `GROUP_INFO_UPDATE`) system message and notifies each affected user,
//! then — for V3 groups whose member count changed — asks
//! [`KeyEpochCoordinator`] to re-evaluate rotation.

use std::sync::Arc;

use chrono::Utc;
use glkdc_common::crypto::signatures::{verify, verify_concat, Signable, Signature};
use glkdc_common::identifiers::{Gid, Uid};
use glkdc_common::time::TimeStamp;

use crate::errors::GlkdcError;
use crate::external::{AccountKeyProvider, ContactMutualityChecker};
use crate::key_epoch_coordinator::KeyEpochCoordinator;
use crate::keys::{InsertOutcome, KeyRecord, KeyVersionStore, Mode};
use crate::membership::model::{
    Group, GroupMember, GroupMemberPatch, GroupPatch, GroupVersion, PendingMember,
    QrCodePendingMember, Role,
};
use crate::membership::{MembershipStore, Outcome};
use crate::pubsub::{MessageKind, PubSubBus};
use crate::rate_limiter::registry::LimiterRegistry;
use crate::settings::GroupPolicySettings;

/// The owner's share-invite blob and its two signatures, carried by
/// `createGroup` and by `update` whenever `qrCodeSetting` changes.
#[derive(Clone)]
pub struct ShareBlock {
    pub qr_code_setting: Vec<u8>,
    pub share_signature: Signature,
    pub share_and_owner_confirm_signature: Signature,
}

struct QrShare(Vec<u8>);

impl Signable for QrShare {
    fn signable_bytes(&self) -> Vec<u8> {
        self.0.clone()
    }
}

struct JoinIntent {
    gid: Gid,
    qr_token: Vec<u8>,
}

impl Signable for JoinIntent {
    fn signable_bytes(&self) -> Vec<u8> {
        let mut bytes = self.gid.0.to_be_bytes().to_vec();
        bytes.extend_from_slice(&self.qr_token);
        bytes
    }
}

struct InviteIntent {
    gid: Gid,
    uid: Uid,
}

impl Signable for InviteIntent {
    fn signable_bytes(&self) -> Vec<u8> {
        let mut bytes = self.gid.0.to_be_bytes().to_vec();
        bytes.extend_from_slice(self.uid.as_str().as_bytes());
        bytes
    }
}

pub struct CreateGroupRequest {
    pub name: Vec<u8>,
    pub icon: Vec<u8>,
    pub intro: Vec<u8>,
    pub broadcast: bool,
    pub owner_confirm: bool,
    pub share: ShareBlock,
    pub encrypted_group_info_secret: Vec<u8>,
    pub encrypted_ephemeral_key: Vec<u8>,
    pub owner_proof: Vec<u8>,
    pub members: Vec<Uid>,
    pub member_group_info_secrets: Vec<Vec<u8>>,
    pub member_proofs: Vec<Vec<u8>>,
    pub group_keys_mode: Mode,
    pub group_keys_payload: serde_json::Value,
}

#[derive(Default)]
pub struct UpdateGroupRequest {
    pub name: Option<Vec<u8>>,
    pub icon: Option<Vec<u8>>,
    pub intro: Option<Vec<u8>>,
    pub broadcast: Option<bool>,
    pub encrypted_group_info_secret: Option<Vec<u8>>,
    pub encrypted_ephemeral_key: Option<Vec<u8>>,
    /// Present only when the owner is rotating the share token; re-verified
    /// the same way `createGroup` verifies it, and clears every
    /// `PendingMember` row for the group on success.
    pub share: Option<(bool, ShareBlock)>,
}

pub struct InviteRequest {
    pub members: Vec<Uid>,
    /// Parallel to `members`; empty means every invitee is `Role::Member`.
    pub roles: Vec<Role>,
    /// Used on the direct-add path (`ownerConfirm=false`, owner inviting).
    pub member_group_info_secrets: Vec<Vec<u8>>,
    /// Used on the pending path: one signature per invitee, over the invite
    /// intent, verified against the invitee's own identity key.
    pub signatures: Vec<Signature>,
}

pub struct JoinByCodeRequest {
    pub qr_code: Vec<u8>,
    pub qr_token: Vec<u8>,
    pub signature: Signature,
    pub comment: Vec<u8>,
}

#[derive(Debug)]
pub enum JoinByCodeOutcome {
    Pending,
    QrCodePending { encrypted_group_info_secret: Vec<u8> },
}

pub struct JoinReview {
    pub uid: Uid,
    pub accepted: bool,
    pub group_info_secret: Vec<u8>,
    pub proof: Vec<u8>,
}

pub struct MembershipFsm {
    membership: Arc<dyn MembershipStore>,
    keys: Arc<dyn KeyVersionStore>,
    pubsub: Arc<dyn PubSubBus>,
    key_epoch: Arc<KeyEpochCoordinator>,
    limiters: Arc<LimiterRegistry>,
    account_keys: Arc<dyn AccountKeyProvider>,
    mutuality: Arc<dyn ContactMutualityChecker>,
    policy: GroupPolicySettings,
}

impl MembershipFsm {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        membership: Arc<dyn MembershipStore>,
        keys: Arc<dyn KeyVersionStore>,
        pubsub: Arc<dyn PubSubBus>,
        key_epoch: Arc<KeyEpochCoordinator>,
        limiters: Arc<LimiterRegistry>,
        account_keys: Arc<dyn AccountKeyProvider>,
        mutuality: Arc<dyn ContactMutualityChecker>,
        policy: GroupPolicySettings,
    ) -> Self {
        Self {
            membership,
            keys,
            pubsub,
            key_epoch,
            limiters,
            account_keys,
            mutuality,
            policy,
        }
    }

    fn is_privileged(&self, uid: &Uid) -> bool {
        self.policy.privileged_principals.contains(uid)
    }

    async fn require_group(&self, gid: Gid) -> Result<Group, GlkdcError> {
        match self.membership.get_group(gid).await {
            Outcome::Ok(g) => Ok(g),
            Outcome::NotFound => Err(GlkdcError::NotFound),
            Outcome::AlreadyExists => unreachable!("get_group never CAS"),
            Outcome::Internal(e) => Err(e.into()),
        }
    }

    /// Unlike [`Self::require_group`], an unknown `(gid, uid)` pair maps to
    /// `FORBIDDEN` rather than `NOT_FOUND` — the caller cannot distinguish
    /// "no such group" from "not a member of this group", a disclosure-
    /// avoidance policy.
    async fn require_member(&self, gid: Gid, uid: &Uid) -> Result<GroupMember, GlkdcError> {
        match self.membership.get_member(gid, uid).await {
            Outcome::Ok(m) => Ok(m),
            Outcome::NotFound => Err(GlkdcError::Forbidden),
            Outcome::AlreadyExists => unreachable!("get_member never CAS"),
            Outcome::Internal(e) => Err(e.into()),
        }
    }

    async fn verify_share(
        &self,
        owner: &Uid,
        owner_confirm: bool,
        share: &ShareBlock,
    ) -> Result<(), GlkdcError> {
        if share.qr_code_setting.is_empty() {
            return Err(GlkdcError::BadRequest("qrCodeSetting must not be empty".into()));
        }
        let key = self
            .account_keys
            .identity_public_key(owner)
            .await
            .ok_or_else(|| GlkdcError::BadRequest("unknown owner identity key".into()))?;
        verify(&key, QrShare(share.qr_code_setting.clone()), &share.share_signature)
            .map_err(|_| GlkdcError::BadRequest("invalid shareSignature".into()))?;
        verify_concat(
            &key,
            QrShare(share.qr_code_setting.clone()),
            &[owner_confirm as u8],
            |p: &QrShare| p.0.clone(),
            &share.share_and_owner_confirm_signature,
        )
        .map_err(|_| GlkdcError::BadRequest("invalid shareAndOwnerConfirmSignature".into()))?;
        Ok(())
    }

    /// Persists the `GROUP_MEMBER_UPDATE` system message and notifies each
    /// affected user with `kind`.
    async fn emit_member_update(&self, gid: Gid, uids: &[Uid], kind: MessageKind) {
        let payload = serde_json::json!({
            "gid": gid.0,
            "members": uids.iter().map(Uid::as_str).collect::<Vec<_>>(),
        });
        self.pubsub
            .publish_group_event(gid, MessageKind::GroupMemberUpdate, payload.clone())
            .await;
        for uid in uids {
            self.pubsub.publish_to_user(uid, kind, payload.clone()).await;
        }
    }

    /// Retries a handful of random 64-bit candidates on CAS collision; the
    /// collision probability at this keyspace is negligible, so exhausting
    /// every attempt is treated as an internal failure rather than modeled
    /// as a recoverable outcome.
    async fn mint_gid(&self, group: &mut Group) -> Result<Gid, GlkdcError> {
        for _ in 0..8 {
            group.gid = Gid(rand::random());
            match self.membership.create_group(group.clone()).await {
                Outcome::Ok(gid) => return Ok(gid),
                Outcome::AlreadyExists => continue,
                Outcome::NotFound => unreachable!("create_group never NotFound"),
                Outcome::Internal(e) => return Err(e.into()),
            }
        }
        Err(GlkdcError::Internal(crate::errors::StorageError::Database(
            sqlx::Error::PoolClosed.into(),
        )))
    }

    /// `None → Member(OWNER)`. Validates the share signature chain, the V3
    /// encrypted-secret fields, and the per-invitee mutuality check; seeds
    /// `KeyVersionStore` with `version=0` in the requested mode.
    pub async fn create_group(&self, owner: &Uid, req: CreateGroupRequest) -> Result<Gid, GlkdcError> {
        if req.members.len() != req.member_group_info_secrets.len()
            || req.members.len() != req.member_proofs.len()
        {
            return Err(GlkdcError::BadRequest(
                "members/memberGroupInfoSecrets/memberProofs length mismatch".into(),
            ));
        }
        if req.encrypted_group_info_secret.is_empty() || req.encrypted_ephemeral_key.is_empty() {
            return Err(GlkdcError::BadRequest(
                "V3 groups require encryptedGroupInfoSecret and encryptedEphemeralKey".into(),
            ));
        }
        self.verify_share(owner, req.owner_confirm, &req.share).await?;

        if !self.limiters.group_creation_allowed(owner).await {
            return Err(GlkdcError::LimiterRejected);
        }

        let mut accepted: Vec<(Uid, Vec<u8>)> = Vec::new();
        for i in 0..req.members.len() {
            let uid = req.members[i].clone();
            if self.is_privileged(&uid) || self.mutuality.mutual(owner, &uid).await {
                accepted.push((uid, req.member_group_info_secrets[i].clone()));
            }
        }

        let now = Utc::now();
        let mut group = Group {
            gid: Gid(0),
            name: req.name,
            icon: req.icon,
            intro: req.intro,
            version: GroupVersion::V3,
            encrypt_status: 0,
            broadcast: req.broadcast,
            owner_confirm: req.owner_confirm,
            qr_code_setting: req.share.qr_code_setting.clone(),
            share_signature: req.share.share_signature.to_bytes().to_vec(),
            share_and_owner_confirm_signature: req
                .share
                .share_and_owner_confirm_signature
                .to_bytes()
                .to_vec(),
            encrypted_group_info_secret: Some(req.encrypted_group_info_secret),
            encrypted_ephemeral_key: Some(req.encrypted_ephemeral_key),
            last_mid: 0,
            create_time: now,
            update_time: now,
            extensions: serde_json::json!({}),
        };
        let gid = self.mint_gid(&mut group).await?;

        let owner_member = GroupMember {
            gid,
            uid: owner.clone(),
            role: Role::Owner,
            encrypted_key: vec![],
            group_info_secret: vec![],
            proof: req.owner_proof,
            nick: vec![],
            nickname: vec![],
            group_nickname: vec![],
            profile_keys: vec![],
            status: 0,
            create_time: now,
            last_ack_mid: 0,
        };
        match self.membership.insert_member(owner_member).await {
            Outcome::Ok(()) => {}
            Outcome::AlreadyExists => unreachable!("fresh group cannot already have an owner row"),
            Outcome::NotFound => unreachable!(),
            Outcome::Internal(e) => return Err(e.into()),
        }

        if !accepted.is_empty() {
            let members = accepted
                .iter()
                .map(|(uid, secret)| GroupMember {
                    gid,
                    uid: uid.clone(),
                    role: Role::Member,
                    encrypted_key: vec![],
                    group_info_secret: secret.clone(),
                    proof: vec![],
                    nick: vec![],
                    nickname: vec![],
                    group_nickname: vec![],
                    profile_keys: vec![],
                    status: 0,
                    create_time: now,
                    last_ack_mid: 0,
                })
                .collect();
            match self.membership.insert_members(gid, members).await {
                Outcome::Ok(()) | Outcome::AlreadyExists => {}
                Outcome::NotFound => unreachable!(),
                Outcome::Internal(e) => return Err(e.into()),
            }
        }

        let record = KeyRecord {
            gid,
            version: 0,
            mode: req.group_keys_mode,
            encrypt_version: 0,
            creator: owner.clone(),
            create_time: now,
            payload: req.group_keys_payload,
        };
        match self.keys.insert(record).await {
            InsertOutcome::Ok => {}
            InsertOutcome::CasFail => unreachable!("fresh group cannot already have version 0"),
            InsertOutcome::Internal(e) => return Err(e.into()),
        }

        let mut all_uids = vec![owner.clone()];
        all_uids.extend(accepted.into_iter().map(|(uid, _)| uid));
        self.emit_member_update(gid, &all_uids, MessageKind::UserEnterGroup).await;
        self.key_epoch.on_membership_changed(owner, gid).await?;

        Ok(gid)
    }

    /// Owner-only update of group metadata and, optionally, the share token.
    /// Rotating the share token clears every pending join request for the
    /// group.
    pub async fn update_group(
        &self,
        caller: &Uid,
        gid: Gid,
        req: UpdateGroupRequest,
    ) -> Result<Group, GlkdcError> {
        let caller_member = self.require_member(gid, caller).await?;
        if caller_member.role != Role::Owner {
            // Preserved behavior, not a fix: a non-owner calling update surfaces
            // as an internal error here rather than FORBIDDEN. Recorded as an
            // intentionally-kept quirk in DESIGN.md rather than corrected.
            return Err(GlkdcError::Internal(crate::errors::StorageError::Database(
                sqlx::Error::PoolClosed.into(),
            )));
        }

        let mut patch = GroupPatch {
            name: req.name,
            icon: req.icon,
            intro: req.intro,
            broadcast: req.broadcast,
            encrypted_group_info_secret: req.encrypted_group_info_secret,
            encrypted_ephemeral_key: req.encrypted_ephemeral_key,
            ..Default::default()
        };

        let rotates_share = req.share.is_some();
        if let Some((owner_confirm, share)) = &req.share {
            self.verify_share(caller, *owner_confirm, share).await?;
            patch.owner_confirm = Some(*owner_confirm);
            patch.qr_code_setting = Some(share.qr_code_setting.clone());
            patch.share_signature = Some(share.share_signature.to_bytes().to_vec());
            patch.share_and_owner_confirm_signature =
                Some(share.share_and_owner_confirm_signature.to_bytes().to_vec());
        }

        let updated = match self.membership.update_group(gid, patch).await {
            Outcome::Ok(g) => g,
            Outcome::NotFound => return Err(GlkdcError::NotFound),
            Outcome::AlreadyExists => unreachable!("update_group never CAS"),
            Outcome::Internal(e) => return Err(e.into()),
        };

        if rotates_share {
            self.membership.clear_pending_members(gid).await;
        }

        self.pubsub
            .publish_group_event(
                gid,
                MessageKind::GroupInfoUpdate,
                serde_json::json!({ "gid": gid.0 }),
            )
            .await;

        Ok(updated)
    }

    /// `None → Member(MEMBER)` (owner, `ownerConfirm=false`) or
    /// `None → Pending` (otherwise).
    pub async fn invite(&self, caller: &Uid, gid: Gid, req: InviteRequest) -> Result<(), GlkdcError> {
        let group = self.require_group(gid).await?;
        if group.version != GroupVersion::V3 {
            return Err(GlkdcError::UpgradeRequired);
        }
        let caller_member = self.require_member(gid, caller).await?;

        let roles = if req.roles.is_empty() {
            vec![Role::Member; req.members.len()]
        } else {
            req.roles
        };
        if roles.len() != req.members.len() {
            return Err(GlkdcError::BadRequest("members/roles length mismatch".into()));
        }

        if caller_member.role == Role::Owner && !group.owner_confirm {
            if req.member_group_info_secrets.len() != req.members.len() {
                return Err(GlkdcError::BadRequest(
                    "members/memberGroupInfoSecrets length mismatch".into(),
                ));
            }
            let mut added = Vec::new();
            for i in 0..req.members.len() {
                let uid = req.members[i].clone();
                if !self.limiters.group_member_join_allowed(gid, &uid).await {
                    return Err(GlkdcError::LimiterRejected);
                }
                let bypass_mutuality = roles[i] == Role::Subscriber || self.is_privileged(&uid);
                if !bypass_mutuality && !self.mutuality.mutual(caller, &uid).await {
                    continue;
                }
                let member = GroupMember {
                    gid,
                    uid: uid.clone(),
                    role: roles[i],
                    encrypted_key: vec![],
                    group_info_secret: req.member_group_info_secrets[i].clone(),
                    proof: vec![],
                    nick: vec![],
                    nickname: vec![],
                    group_nickname: vec![],
                    profile_keys: vec![],
                    status: 0,
                    create_time: Utc::now(),
                    last_ack_mid: 0,
                };
                match self.membership.insert_member(member).await {
                    Outcome::Ok(()) => added.push(uid),
                    Outcome::AlreadyExists => {}
                    Outcome::NotFound => unreachable!(),
                    Outcome::Internal(e) => return Err(e.into()),
                }
            }
            if !added.is_empty() {
                self.emit_member_update(gid, &added, MessageKind::UserEnterGroup).await;
                self.key_epoch.on_membership_changed(caller, gid).await?;
            }
            Ok(())
        } else {
            if req.signatures.len() != req.members.len() {
                return Err(GlkdcError::BadRequest("members/signatures length mismatch".into()));
            }
            for i in 0..req.members.len() {
                let uid = req.members[i].clone();
                if !self.limiters.group_member_join_allowed(gid, &uid).await {
                    return Err(GlkdcError::LimiterRejected);
                }
                let key = self
                    .account_keys
                    .identity_public_key(&uid)
                    .await
                    .ok_or_else(|| GlkdcError::BadRequest("unknown invitee identity key".into()))?;
                verify(
                    &key,
                    InviteIntent { gid, uid: uid.clone() },
                    &req.signatures[i],
                )
                .map_err(|_| GlkdcError::BadRequest("invalid invite signature".into()))?;

                let pending = PendingMember {
                    gid,
                    uid: uid.clone(),
                    inviter: caller.clone(),
                    signature: req.signatures[i].to_bytes().to_vec(),
                    comment: vec![],
                    create_time: Utc::now(),
                };
                match self.membership.insert_pending_member(pending).await {
                    Outcome::Ok(()) | Outcome::AlreadyExists => {}
                    Outcome::NotFound => unreachable!(),
                    Outcome::Internal(e) => return Err(e.into()),
                }
            }
            self.pubsub
                .publish_group_event(
                    gid,
                    MessageKind::GroupJoinReview,
                    serde_json::json!({ "gid": gid.0 }),
                )
                .await;
            Ok(())
        }
    }

    /// `None → Pending` (`ownerConfirm=true`) or `None → QrCodePending`
    /// (`ownerConfirm=false`).
    pub async fn join_group_by_code(
        &self,
        caller: &Uid,
        gid: Gid,
        req: JoinByCodeRequest,
    ) -> Result<JoinByCodeOutcome, GlkdcError> {
        let group = self.require_group(gid).await?;
        if group.version != GroupVersion::V3 {
            return Err(GlkdcError::UpgradeRequired);
        }
        if req.qr_code != group.qr_code_setting {
            return Err(GlkdcError::BadRequest(
                "qrCode does not match the group's current share token".into(),
            ));
        }

        let caller_key = self
            .account_keys
            .identity_public_key(caller)
            .await
            .ok_or_else(|| GlkdcError::BadRequest("unknown caller identity key".into()))?;
        verify(
            &caller_key,
            JoinIntent {
                gid,
                qr_token: req.qr_token.clone(),
            },
            &req.signature,
        )
        .map_err(|_| GlkdcError::BadRequest("invalid join signature".into()))?;

        if !self.limiters.group_member_join_allowed(gid, caller).await {
            return Err(GlkdcError::LimiterRejected);
        }

        if group.owner_confirm {
            let pending = PendingMember {
                gid,
                uid: caller.clone(),
                inviter: caller.clone(),
                signature: req.signature.to_bytes().to_vec(),
                comment: req.comment,
                create_time: Utc::now(),
            };
            match self.membership.insert_pending_member(pending).await {
                Outcome::Ok(()) | Outcome::AlreadyExists => {}
                Outcome::NotFound => unreachable!(),
                Outcome::Internal(e) => return Err(e.into()),
            }
            self.pubsub
                .publish_group_event(
                    gid,
                    MessageKind::GroupJoinReview,
                    serde_json::json!({ "gid": gid.0, "uid": caller.as_str() }),
                )
                .await;
            Ok(JoinByCodeOutcome::Pending)
        } else {
            let secret = group.encrypted_group_info_secret.clone().unwrap_or_default();
            let pending = QrCodePendingMember {
                gid,
                uid: caller.clone(),
                encrypted_group_info_secret: secret.clone(),
                create_time: Utc::now(),
            };
            match self.membership.insert_qr_code_pending_member(pending).await {
                Outcome::Ok(()) => {}
                Outcome::AlreadyExists => unreachable!("qr pending insert upserts, never CAS"),
                Outcome::NotFound => unreachable!(),
                Outcome::Internal(e) => return Err(e.into()),
            }
            Ok(JoinByCodeOutcome::QrCodePending {
                encrypted_group_info_secret: secret,
            })
        }
    }

    /// `QrCodePending → Member(MEMBER)`. Idempotent: a caller who is already
    /// a member gets `Ok(())` with no duplicate events.
    pub async fn add_me(
        &self,
        caller: &Uid,
        gid: Gid,
        group_info_secret: Vec<u8>,
        proof: Vec<u8>,
    ) -> Result<(), GlkdcError> {
        let pending = match self.membership.get_qr_code_pending_member(gid, caller).await {
            Outcome::Ok(p) => p,
            Outcome::NotFound => {
                return match self.membership.get_member(gid, caller).await {
                    Outcome::Ok(_) => Ok(()),
                    Outcome::NotFound => Err(GlkdcError::Forbidden),
                    Outcome::AlreadyExists => unreachable!(),
                    Outcome::Internal(e) => Err(e.into()),
                };
            }
            Outcome::AlreadyExists => unreachable!("qr pending lookup never CAS"),
            Outcome::Internal(e) => return Err(e.into()),
        };

        if TimeStamp::from_utc(pending.create_time).has_expired(self.policy.qr_code_pending_ttl()) {
            self.membership.delete_qr_code_pending_member(gid, caller).await;
            return Err(GlkdcError::BadRequest("qr code pending window has expired".into()));
        }

        if !self.limiters.group_member_join_allowed(gid, caller).await {
            return Err(GlkdcError::LimiterRejected);
        }

        let member = GroupMember {
            gid,
            uid: caller.clone(),
            role: Role::Member,
            encrypted_key: vec![],
            group_info_secret,
            proof,
            nick: vec![],
            nickname: vec![],
            group_nickname: vec![],
            profile_keys: vec![],
            status: 0,
            create_time: Utc::now(),
            last_ack_mid: 0,
        };
        match self.membership.insert_member(member).await {
            Outcome::Ok(()) | Outcome::AlreadyExists => {}
            Outcome::NotFound => unreachable!(),
            Outcome::Internal(e) => return Err(e.into()),
        }
        self.membership.delete_qr_code_pending_member(gid, caller).await;

        self.emit_member_update(gid, std::slice::from_ref(caller), MessageKind::UserEnterGroup)
            .await;
        self.key_epoch.on_membership_changed(caller, gid).await?;
        Ok(())
    }

    /// `Pending → Member(MEMBER)` or `Pending → None`, owner-driven.
    pub async fn review_join_request(
        &self,
        caller: &Uid,
        gid: Gid,
        reviews: Vec<JoinReview>,
    ) -> Result<(), GlkdcError> {
        let caller_member = self.require_member(gid, caller).await?;
        if caller_member.role != Role::Owner {
            return Err(GlkdcError::Forbidden);
        }

        let mut accepted = Vec::new();
        for review in reviews {
            match self.membership.get_pending_member(gid, &review.uid).await {
                Outcome::Ok(_) => {}
                Outcome::NotFound => continue,
                Outcome::AlreadyExists => unreachable!(),
                Outcome::Internal(e) => return Err(e.into()),
            };

            if review.accepted {
                let member = GroupMember {
                    gid,
                    uid: review.uid.clone(),
                    role: Role::Member,
                    encrypted_key: vec![],
                    group_info_secret: review.group_info_secret,
                    proof: review.proof,
                    nick: vec![],
                    nickname: vec![],
                    group_nickname: vec![],
                    profile_keys: vec![],
                    status: 0,
                    create_time: Utc::now(),
                    last_ack_mid: 0,
                };
                match self.membership.insert_member(member).await {
                    Outcome::Ok(()) | Outcome::AlreadyExists => accepted.push(review.uid.clone()),
                    Outcome::NotFound => unreachable!(),
                    Outcome::Internal(e) => return Err(e.into()),
                }
            }
            self.membership.delete_pending_member(gid, &review.uid).await;
        }

        if !accepted.is_empty() {
            self.emit_member_update(gid, &accepted, MessageKind::UserEnterGroup).await;
            self.key_epoch.on_membership_changed(caller, gid).await?;
        }
        Ok(())
    }

    /// `Member(*) → None`, owner/admin-driven. Repeated kicks after the
    /// first are a no-op.
    pub async fn kick(&self, caller: &Uid, gid: Gid, members: Vec<Uid>) -> Result<(), GlkdcError> {
        let caller_member = self.require_member(gid, caller).await?;
        if caller_member.role != Role::Owner && caller_member.role != Role::Admin {
            return Err(GlkdcError::Forbidden);
        }

        let mut kicked = Vec::new();
        for uid in &members {
            if uid == caller {
                continue;
            }
            match self.membership.delete_member(gid, uid).await {
                Outcome::Ok(()) => kicked.push(uid.clone()),
                Outcome::NotFound => {}
                Outcome::AlreadyExists => unreachable!(),
                Outcome::Internal(e) => return Err(e.into()),
            }
        }

        if !kicked.is_empty() {
            self.emit_member_update(gid, &kicked, MessageKind::UserQuitGroup).await;
            self.key_epoch.on_membership_changed(caller, gid).await?;
        }
        Ok(())
    }

    /// `Member(*) → None`, self-driven. An owner leaving a non-empty group
    /// must name a `nextOwner` currently `Member(MEMBER|OWNER)`; the
    /// promotion is applied atomically with the leaver's removal.
    pub async fn leave(
        &self,
        caller: &Uid,
        gid: Gid,
        next_owner: Option<Uid>,
    ) -> Result<(), GlkdcError> {
        let caller_member = self.require_member(gid, caller).await?;

        if caller_member.role == Role::Owner {
            let counts = match self.membership.count_members(gid).await {
                Outcome::Ok(c) => c,
                Outcome::NotFound => return Err(GlkdcError::NotFound),
                Outcome::AlreadyExists => unreachable!(),
                Outcome::Internal(e) => return Err(e.into()),
            };
            if counts.total() > 1 {
                let next = next_owner.ok_or_else(|| {
                    GlkdcError::BadRequest("owner leaving a non-empty group must name nextOwner".into())
                })?;
                let next_member = match self.membership.get_member(gid, &next).await {
                    Outcome::Ok(m) => m,
                    Outcome::NotFound => {
                        return Err(GlkdcError::BadRequest("nextOwner is not a member".into()))
                    }
                    Outcome::AlreadyExists => unreachable!(),
                    Outcome::Internal(e) => return Err(e.into()),
                };
                if !matches!(next_member.role, Role::Member | Role::Owner) {
                    return Err(GlkdcError::BadRequest(
                        "nextOwner must currently be MEMBER or OWNER".into(),
                    ));
                }
                match self
                    .membership
                    .update_member(
                        gid,
                        &next,
                        GroupMemberPatch {
                            role: Some(Role::Owner),
                            ..Default::default()
                        },
                    )
                    .await
                {
                    Outcome::Ok(_) => {}
                    Outcome::NotFound => {
                        return Err(GlkdcError::BadRequest("nextOwner is not a member".into()))
                    }
                    Outcome::AlreadyExists => unreachable!(),
                    Outcome::Internal(e) => return Err(e.into()),
                }
                self.emit_member_update(gid, std::slice::from_ref(&next), MessageKind::UserChangeRole)
                    .await;
            }
        }

        match self.membership.delete_member(gid, caller).await {
            Outcome::Ok(()) | Outcome::NotFound => {}
            Outcome::AlreadyExists => unreachable!(),
            Outcome::Internal(e) => return Err(e.into()),
        }
        self.emit_member_update(gid, std::slice::from_ref(caller), MessageKind::UserQuitGroup)
            .await;
        self.key_epoch.on_membership_changed(caller, gid).await?;
        Ok(())
    }

    /// `Member(role) → Member(role')`, owner/admin-driven. Not exposed as a
    /// wire endpoint — held here so a future admin surface has a single
    /// place to call into.
    pub async fn change_role(
        &self,
        caller: &Uid,
        gid: Gid,
        target: &Uid,
        new_role: Role,
    ) -> Result<(), GlkdcError> {
        let caller_member = self.require_member(gid, caller).await?;
        if caller_member.role != Role::Owner && caller_member.role != Role::Admin {
            return Err(GlkdcError::Forbidden);
        }
        if new_role == Role::Owner {
            return Err(GlkdcError::BadRequest(
                "use leave with nextOwner to transfer ownership".into(),
            ));
        }

        match self
            .membership
            .update_member(
                gid,
                target,
                GroupMemberPatch {
                    role: Some(new_role),
                    ..Default::default()
                },
            )
            .await
        {
            Outcome::Ok(_) => {
                self.emit_member_update(gid, std::slice::from_ref(target), MessageKind::UserChangeRole)
                    .await;
                Ok(())
            }
            Outcome::NotFound => Err(GlkdcError::NotFound),
            Outcome::AlreadyExists => unreachable!(),
            Outcome::Internal(e) => Err(e.into()),
        }
    }

    /// Toggles `status` bit 0. Owners/admins may mute anyone; a member may
    /// always mute or unmute themselves.
    pub async fn set_muted(
        &self,
        caller: &Uid,
        gid: Gid,
        target: &Uid,
        muted: bool,
    ) -> Result<(), GlkdcError> {
        let caller_member = self.require_member(gid, caller).await?;
        if caller_member.role != Role::Owner && caller_member.role != Role::Admin && caller != target {
            return Err(GlkdcError::Forbidden);
        }

        let status = match self.membership.get_member(gid, target).await {
            Outcome::Ok(m) => {
                if muted {
                    m.status | 0x1
                } else {
                    m.status & !0x1
                }
            }
            Outcome::NotFound => return Err(GlkdcError::NotFound),
            Outcome::AlreadyExists => unreachable!(),
            Outcome::Internal(e) => return Err(e.into()),
        };

        match self
            .membership
            .update_member(
                gid,
                target,
                GroupMemberPatch {
                    status: Some(status),
                    ..Default::default()
                },
            )
            .await
        {
            Outcome::Ok(_) => {
                let kind = if muted {
                    MessageKind::UserMuteGroup
                } else {
                    MessageKind::UserUnmuteGroup
                };
                self.emit_member_update(gid, std::slice::from_ref(target), kind).await;
                Ok(())
            }
            Outcome::NotFound => Err(GlkdcError::NotFound),
            Outcome::AlreadyExists => unreachable!(),
            Outcome::Internal(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::fakes::{AlwaysMutual, InMemoryAccountKeyProvider};
    use crate::fault_injector::NoopFaultInjector;
    use crate::keys::cache::KeyCache;
    use crate::keys::memory::InMemoryKeyVersionStore;
    use crate::membership::memory::InMemoryMembershipStore;
    use crate::pubsub::memory::InMemoryPubSubBus;
    use ed25519_dalek::{Signer, SigningKey};
    use glkdc_common::crypto::signatures::VerifyingKey;
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

    struct Harness {
        fsm: MembershipFsm,
        pubsub: Arc<InMemoryPubSubBus>,
        owner: Uid,
        owner_key: SigningKey,
    }

    fn harness(pool: PgPool) -> Harness {
        let owner_key = SigningKey::generate(&mut OsRng);
        let owner = Uid::from_public_key(owner_key.verifying_key().as_bytes());

        let mut account_keys = InMemoryAccountKeyProvider::default();
        account_keys
            .identity_keys
            .insert(owner.clone(), VerifyingKey::from_bytes(&owner_key.verifying_key().to_bytes()).unwrap());
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

        let fsm = MembershipFsm::new(
            membership,
            keys,
            pubsub.clone() as Arc<dyn PubSubBus>,
            key_epoch,
            limiters,
            account_keys,
            Arc::new(AlwaysMutual),
            policy(),
        );

        Harness {
            fsm,
            pubsub,
            owner,
            owner_key,
        }
    }

    fn share_block(owner_key: &SigningKey, owner_confirm: bool) -> ShareBlock {
        let qr_code_setting = b"share-token".to_vec();
        let share_signature = Signature::from_bytes(
            &owner_key.sign(&qr_code_setting).to_bytes(),
        )
        .unwrap();
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

    fn create_request(owner_key: &SigningKey) -> CreateGroupRequest {
        CreateGroupRequest {
            name: b"name".to_vec(),
            icon: vec![],
            intro: vec![],
            broadcast: false,
            owner_confirm: false,
            share: share_block(owner_key, false),
            encrypted_group_info_secret: b"secret".to_vec(),
            encrypted_ephemeral_key: b"ephemeral".to_vec(),
            owner_proof: vec![],
            members: vec![],
            member_group_info_secrets: vec![],
            member_proofs: vec![],
            group_keys_mode: Mode::OneForEach,
            group_keys_payload: serde_json::json!({ "keys_v0": [] }),
        }
    }

    #[sqlx::test]
    async fn create_group_seeds_version_zero_and_emits_enter_event(pool: PgPool) -> sqlx::Result<()> {
        let h = harness(pool);
        let gid = h
            .fsm
            .create_group(&h.owner, create_request(&h.owner_key))
            .await
            .expect("create_group should succeed");

        let record = h
            .fsm
            .keys
            .get_latest(gid)
            .await
            .unwrap()
            .expect("expected a seeded key record");
        assert_eq!(record.version, 0);
        assert_eq!(record.mode, Mode::OneForEach);

        let entered = h.pubsub.published_of_kind(MessageKind::UserEnterGroup).await;
        assert_eq!(entered.len(), 1);
        Ok(())
    }

    #[sqlx::test]
    async fn create_group_rejects_tampered_share_signature(pool: PgPool) -> sqlx::Result<()> {
        let h = harness(pool);
        let mut req = create_request(&h.owner_key);
        req.share.qr_code_setting = b"different-token".to_vec();
        let result = h.fsm.create_group(&h.owner, req).await;
        assert!(matches!(result, Err(GlkdcError::BadRequest(_))));
        Ok(())
    }

    #[sqlx::test]
    async fn kick_after_the_first_is_idempotent(pool: PgPool) -> sqlx::Result<()> {
        let h = harness(pool);
        let gid = h
            .fsm
            .create_group(&h.owner, create_request(&h.owner_key))
            .await
            .unwrap();

        let member_key = SigningKey::generate(&mut OsRng);
        let member_uid = Uid::from_public_key(member_key.verifying_key().as_bytes());
        h.fsm
            .membership
            .insert_member(GroupMember {
                gid,
                uid: member_uid.clone(),
                role: Role::Member,
                encrypted_key: vec![],
                group_info_secret: vec![],
                proof: vec![],
                nick: vec![],
                nickname: vec![],
                group_nickname: vec![],
                profile_keys: vec![],
                status: 0,
                create_time: Utc::now(),
                last_ack_mid: 0,
            })
            .await;

        assert!(h
            .fsm
            .kick(&h.owner, gid, vec![member_uid.clone()])
            .await
            .is_ok());
        assert!(h.fsm.kick(&h.owner, gid, vec![member_uid]).await.is_ok());
        Ok(())
    }

    #[sqlx::test]
    async fn leave_requires_next_owner_in_a_non_empty_group(pool: PgPool) -> sqlx::Result<()> {
        let h = harness(pool);
        let gid = h
            .fsm
            .create_group(&h.owner, create_request(&h.owner_key))
            .await
            .unwrap();

        let member_key = SigningKey::generate(&mut OsRng);
        let member_uid = Uid::from_public_key(member_key.verifying_key().as_bytes());
        h.fsm
            .membership
            .insert_member(GroupMember {
                gid,
                uid: member_uid.clone(),
                role: Role::Member,
                encrypted_key: vec![],
                group_info_secret: vec![],
                proof: vec![],
                nick: vec![],
                nickname: vec![],
                group_nickname: vec![],
                profile_keys: vec![],
                status: 0,
                create_time: Utc::now(),
                last_ack_mid: 0,
            })
            .await;

        assert!(matches!(
            h.fsm.leave(&h.owner, gid, None).await,
            Err(GlkdcError::BadRequest(_))
        ));
        assert!(h.fsm.leave(&h.owner, gid, Some(member_uid.clone())).await.is_ok());

        let new_owner = match h.fsm.membership.get_member(gid, &member_uid).await {
            Outcome::Ok(m) => m,
            _ => panic!("expected the promoted member to still exist"),
        };
        assert_eq!(new_owner.role, Role::Owner);
        Ok(())
    }
}
