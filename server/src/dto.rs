// SPDX-FileCopyrightText: 2026 Glass Relay Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Wire shapes for the JSON endpoints. Kept separate from the domain types
//! in `glkdc_backend` so the persisted/transitional representation (raw
//! `Vec<u8>` columns) can evolve independently of the base64-over-JSON wire
//! encoding clients see — the same boundary drawn between wire messages and
//! backend storage rows.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use glkdc_backend::group_controller::{
    CreateGroupResponse, DhKeyBundle, DhKeysResponse, GroupKeysResponse, LatestGroupKeyEntry,
    LatestGroupKeysResponse, MembersResponse, PrepareKeyUpdateResponse,
};
use glkdc_backend::key_epoch_coordinator::ProjectedKeyRecord;
use glkdc_backend::keys::Mode;
use glkdc_backend::membership::model::{Group, GroupMember, GroupVersion, Role};
use glkdc_backend::membership_fsm::{
    CreateGroupRequest, InviteRequest, JoinByCodeOutcome, JoinByCodeRequest, JoinReview, ShareBlock,
    UpdateGroupRequest,
};
use glkdc_common::crypto::signatures::Signature;
use glkdc_common::identifiers::{Gid, Uid};
use serde::{Deserialize, Serialize};

/// Base64-over-JSON for opaque byte blobs (`name`, `icon`, signatures stored
/// as raw bytes, etc). Mirrors the base64 encoding `glkdc_common`'s
/// `Signature`/`VerifyingKey` types already use for the wire.
mod b64 {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        STANDARD.encode(bytes).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

mod b64_opt {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        bytes.as_deref().map(|b| STANDARD.encode(b)).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(d)?;
        encoded
            .map(|e| STANDARD.decode(e).map_err(serde::de::Error::custom))
            .transpose()
    }
}

mod b64_vec {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(items: &[Vec<u8>], s: S) -> Result<S::Ok, S::Error> {
        let encoded: Vec<String> = items.iter().map(|b| STANDARD.encode(b)).collect();
        encoded.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Vec<u8>>, D::Error> {
        let encoded: Vec<String> = Vec::deserialize(d)?;
        encoded
            .into_iter()
            .map(|e| STANDARD.decode(e).map_err(serde::de::Error::custom))
            .collect()
    }
}

// ---------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGroupRequestDto {
    #[serde(with = "b64")]
    pub name: Vec<u8>,
    #[serde(with = "b64", default)]
    pub icon: Vec<u8>,
    #[serde(with = "b64", default)]
    pub intro: Vec<u8>,
    #[serde(default)]
    pub broadcast: bool,
    pub owner_confirm: bool,
    #[serde(with = "b64")]
    pub qr_code_setting: Vec<u8>,
    pub share_signature: Signature,
    pub share_and_owner_confirm_signature: Signature,
    #[serde(with = "b64")]
    pub encrypted_group_info_secret: Vec<u8>,
    #[serde(with = "b64")]
    pub encrypted_ephemeral_key: Vec<u8>,
    #[serde(with = "b64", default)]
    pub owner_proof: Vec<u8>,
    #[serde(default)]
    pub members: Vec<Uid>,
    #[serde(with = "b64_vec", default)]
    pub member_group_info_secrets: Vec<Vec<u8>>,
    #[serde(with = "b64_vec", default)]
    pub member_proofs: Vec<Vec<u8>>,
    pub group_keys_mode: Mode,
    pub group_keys: serde_json::Value,
}

impl From<CreateGroupRequestDto> for CreateGroupRequest {
    fn from(dto: CreateGroupRequestDto) -> Self {
        CreateGroupRequest {
            name: dto.name,
            icon: dto.icon,
            intro: dto.intro,
            broadcast: dto.broadcast,
            owner_confirm: dto.owner_confirm,
            share: ShareBlock {
                qr_code_setting: dto.qr_code_setting,
                share_signature: dto.share_signature,
                share_and_owner_confirm_signature: dto.share_and_owner_confirm_signature,
            },
            encrypted_group_info_secret: dto.encrypted_group_info_secret,
            encrypted_ephemeral_key: dto.encrypted_ephemeral_key,
            owner_proof: dto.owner_proof,
            members: dto.members,
            member_group_info_secrets: dto.member_group_info_secrets,
            member_proofs: dto.member_proofs,
            group_keys_mode: dto.group_keys_mode,
            group_keys_payload: dto.group_keys,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareDto {
    pub owner_confirm: bool,
    #[serde(with = "b64")]
    pub qr_code_setting: Vec<u8>,
    pub share_signature: Signature,
    pub share_and_owner_confirm_signature: Signature,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateGroupRequestDto {
    pub gid: u64,
    #[serde(with = "b64_opt", default)]
    pub name: Option<Vec<u8>>,
    #[serde(with = "b64_opt", default)]
    pub icon: Option<Vec<u8>>,
    #[serde(with = "b64_opt", default)]
    pub intro: Option<Vec<u8>>,
    #[serde(default)]
    pub broadcast: Option<bool>,
    #[serde(with = "b64_opt", default)]
    pub encrypted_group_info_secret: Option<Vec<u8>>,
    #[serde(with = "b64_opt", default)]
    pub encrypted_ephemeral_key: Option<Vec<u8>>,
    #[serde(default)]
    pub share: Option<ShareDto>,
}

impl From<UpdateGroupRequestDto> for UpdateGroupRequest {
    fn from(dto: UpdateGroupRequestDto) -> Self {
        UpdateGroupRequest {
            name: dto.name,
            icon: dto.icon,
            intro: dto.intro,
            broadcast: dto.broadcast,
            encrypted_group_info_secret: dto.encrypted_group_info_secret,
            encrypted_ephemeral_key: dto.encrypted_ephemeral_key,
            share: dto.share.map(|s| {
                (
                    s.owner_confirm,
                    ShareBlock {
                        qr_code_setting: s.qr_code_setting,
                        share_signature: s.share_signature,
                        share_and_owner_confirm_signature: s.share_and_owner_confirm_signature,
                    },
                )
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteRequestDto {
    pub gid: u64,
    pub members: Vec<Uid>,
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(with = "b64_vec", default)]
    pub member_group_info_secrets: Vec<Vec<u8>>,
    #[serde(default)]
    pub signatures: Vec<Signature>,
}

impl From<InviteRequestDto> for InviteRequest {
    fn from(dto: InviteRequestDto) -> Self {
        InviteRequest {
            members: dto.members,
            roles: dto.roles,
            member_group_info_secrets: dto.member_group_info_secrets,
            signatures: dto.signatures,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinByCodeRequestDto {
    pub gid: u64,
    #[serde(with = "b64")]
    pub qr_code: Vec<u8>,
    #[serde(with = "b64")]
    pub qr_token: Vec<u8>,
    pub signature: Signature,
    #[serde(with = "b64", default)]
    pub comment: Vec<u8>,
}

impl From<JoinByCodeRequestDto> for JoinByCodeRequest {
    fn from(dto: JoinByCodeRequestDto) -> Self {
        JoinByCodeRequest {
            qr_code: dto.qr_code,
            qr_token: dto.qr_token,
            signature: dto.signature,
            comment: dto.comment,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddMeRequestDto {
    pub gid: u64,
    #[serde(with = "b64")]
    pub group_info_secret: Vec<u8>,
    #[serde(with = "b64", default)]
    pub proof: Vec<u8>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinReviewDto {
    pub uid: Uid,
    pub accepted: bool,
    #[serde(with = "b64", default)]
    pub group_info_secret: Vec<u8>,
    #[serde(with = "b64", default)]
    pub proof: Vec<u8>,
}

impl From<JoinReviewDto> for JoinReview {
    fn from(dto: JoinReviewDto) -> Self {
        JoinReview {
            uid: dto.uid,
            accepted: dto.accepted,
            group_info_secret: dto.group_info_secret,
            proof: dto.proof,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewJoinRequestDto {
    pub gid: u64,
    pub reviews: Vec<JoinReviewDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KickRequestDto {
    pub gid: u64,
    pub members: Vec<Uid>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveRequestDto {
    pub gid: u64,
    #[serde(default)]
    pub next_owner: Option<Uid>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembersRequestDto {
    pub gid: u64,
    pub uids: Vec<Uid>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupKeysRequestDto {
    pub gid: u64,
    pub versions: Vec<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestGroupKeysRequestDto {
    pub gids: Vec<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FireGroupKeysUpdateRequestDto {
    pub gids: Vec<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupKeysUpdateRequestDto {
    pub gid: u64,
    pub version: i64,
    pub group_keys_mode: Mode,
    #[serde(default)]
    pub encrypt_version: i32,
    pub group_keys: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepareKeyUpdateRequestDto {
    pub gid: u64,
    pub version: i64,
    pub mode: Mode,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DhKeysRequestDto {
    pub uids: Vec<Uid>,
}

// ---------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGroupResponseDto {
    pub gid: u64,
}

impl From<CreateGroupResponse> for CreateGroupResponseDto {
    fn from(r: CreateGroupResponse) -> Self {
        Self { gid: r.gid }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupDto {
    pub gid: u64,
    #[serde(with = "b64")]
    pub name: Vec<u8>,
    #[serde(with = "b64")]
    pub icon: Vec<u8>,
    #[serde(with = "b64")]
    pub intro: Vec<u8>,
    pub version: GroupVersion,
    pub encrypt_status: i32,
    pub broadcast: bool,
    pub owner_confirm: bool,
    #[serde(with = "b64")]
    pub qr_code_setting: Vec<u8>,
    #[serde(with = "b64")]
    pub share_signature: Vec<u8>,
    #[serde(with = "b64")]
    pub share_and_owner_confirm_signature: Vec<u8>,
    #[serde(with = "b64_opt", default)]
    pub encrypted_group_info_secret: Option<Vec<u8>>,
    #[serde(with = "b64_opt", default)]
    pub encrypted_ephemeral_key: Option<Vec<u8>>,
    pub last_mid: i64,
    pub create_time: chrono::DateTime<chrono::Utc>,
    pub update_time: chrono::DateTime<chrono::Utc>,
    pub extensions: serde_json::Value,
}

impl From<Group> for GroupDto {
    fn from(g: Group) -> Self {
        Self {
            gid: g.gid.0,
            name: g.name,
            icon: g.icon,
            intro: g.intro,
            version: g.version,
            encrypt_status: g.encrypt_status,
            broadcast: g.broadcast,
            owner_confirm: g.owner_confirm,
            qr_code_setting: g.qr_code_setting,
            share_signature: g.share_signature,
            share_and_owner_confirm_signature: g.share_and_owner_confirm_signature,
            encrypted_group_info_secret: g.encrypted_group_info_secret,
            encrypted_ephemeral_key: g.encrypted_ephemeral_key,
            last_mid: g.last_mid,
            create_time: g.create_time,
            update_time: g.update_time,
            extensions: g.extensions,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMemberDto {
    pub gid: u64,
    pub uid: Uid,
    pub role: Role,
    #[serde(with = "b64")]
    pub encrypted_key: Vec<u8>,
    #[serde(with = "b64")]
    pub group_info_secret: Vec<u8>,
    #[serde(with = "b64")]
    pub proof: Vec<u8>,
    #[serde(with = "b64")]
    pub nick: Vec<u8>,
    #[serde(with = "b64")]
    pub nickname: Vec<u8>,
    #[serde(with = "b64")]
    pub group_nickname: Vec<u8>,
    #[serde(with = "b64")]
    pub profile_keys: Vec<u8>,
    pub status: i32,
    pub create_time: chrono::DateTime<chrono::Utc>,
    pub last_ack_mid: i64,
}

impl From<GroupMember> for GroupMemberDto {
    fn from(m: GroupMember) -> Self {
        Self {
            gid: m.gid.0,
            uid: m.uid,
            role: m.role,
            encrypted_key: m.encrypted_key,
            group_info_secret: m.group_info_secret,
            proof: m.proof,
            nick: m.nick,
            nickname: m.nickname,
            group_nickname: m.group_nickname,
            profile_keys: m.profile_keys,
            status: m.status,
            create_time: m.create_time,
            last_ack_mid: m.last_ack_mid,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MembersResponseDto {
    pub members: Vec<GroupMemberDto>,
}

impl From<MembersResponse> for MembersResponseDto {
    fn from(r: MembersResponse) -> Self {
        Self {
            members: r.members.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectedKeyRecordDto {
    pub version: i64,
    pub group_keys_mode: Mode,
    pub encrypt_version: i32,
    pub keys: serde_json::Value,
}

impl From<ProjectedKeyRecord> for ProjectedKeyRecordDto {
    fn from(r: ProjectedKeyRecord) -> Self {
        Self {
            version: r.version,
            group_keys_mode: r.mode,
            encrypt_version: r.encrypt_version,
            keys: r.keys,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupKeysResponseDto {
    pub records: Vec<ProjectedKeyRecordDto>,
}

impl From<GroupKeysResponse> for GroupKeysResponseDto {
    fn from(r: GroupKeysResponse) -> Self {
        Self {
            records: r.records.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestGroupKeyEntryDto {
    pub gid: u64,
    pub record: Option<ProjectedKeyRecordDto>,
}

impl From<LatestGroupKeyEntry> for LatestGroupKeyEntryDto {
    fn from(e: LatestGroupKeyEntry) -> Self {
        Self {
            gid: e.gid,
            record: e.record.map(Into::into),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestGroupKeysResponseDto {
    pub entries: Vec<LatestGroupKeyEntryDto>,
}

impl From<LatestGroupKeysResponse> for LatestGroupKeysResponseDto {
    fn from(r: LatestGroupKeysResponse) -> Self {
        Self {
            entries: r.entries.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "result", rename_all = "camelCase")]
pub enum PrepareKeyUpdateResponseDto {
    InQuorum {
        #[serde(with = "b64_vec")]
        bundles: Vec<Vec<u8>>,
    },
    Conflict,
}

impl From<PrepareKeyUpdateResponse> for PrepareKeyUpdateResponseDto {
    fn from(r: PrepareKeyUpdateResponse) -> Self {
        match r {
            PrepareKeyUpdateResponse::InQuorum { bundles } => Self::InQuorum { bundles },
            PrepareKeyUpdateResponse::Conflict => Self::Conflict,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DhKeyBundleDto {
    pub uid: String,
    pub device_id: u32,
    #[serde(with = "b64")]
    pub bundle: Vec<u8>,
}

impl From<DhKeyBundle> for DhKeyBundleDto {
    fn from(b: DhKeyBundle) -> Self {
        Self {
            uid: b.uid,
            device_id: b.device_id,
            bundle: b.bundle,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DhKeysResponseDto {
    pub bundles: Vec<DhKeyBundleDto>,
}

impl From<DhKeysResponse> for DhKeysResponseDto {
    fn from(r: DhKeysResponse) -> Self {
        Self {
            bundles: r.bundles.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinByCodeResponseDto {
    pub pending: &'static str,
    #[serde(with = "b64_opt", default)]
    pub encrypted_group_info_secret: Option<Vec<u8>>,
}

impl From<JoinByCodeOutcome> for JoinByCodeResponseDto {
    fn from(outcome: JoinByCodeOutcome) -> Self {
        match outcome {
            JoinByCodeOutcome::Pending => Self {
                pending: "PENDING",
                encrypted_group_info_secret: None,
            },
            JoinByCodeOutcome::QrCodePending {
                encrypted_group_info_secret,
            } => Self {
                pending: "QR_CODE_PENDING",
                encrypted_group_info_secret: Some(encrypted_group_info_secret),
            },
        }
    }
}

pub fn gid(value: u64) -> Gid {
    Gid(value)
}
