// SPDX-FileCopyrightText: 2026 Glass Relay Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use chrono::{DateTime, Utc};
use glkdc_common::identifiers::{Gid, Uid};
use serde::{Deserialize, Serialize};
use sqlx::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupVersion {
    V0,
    V3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Type)]
#[repr(i16)]
#[sqlx(type_name = "int2")]
pub enum Role {
    Undefined = 0,
    Subscriber = 1,
    Member = 2,
    Admin = 3,
    Owner = 4,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub gid: Gid,
    pub name: Vec<u8>,
    pub icon: Vec<u8>,
    pub intro: Vec<u8>,
    pub version: GroupVersion,
    pub encrypt_status: i32,
    pub broadcast: bool,
    pub owner_confirm: bool,
    pub qr_code_setting: Vec<u8>,
    pub share_signature: Vec<u8>,
    pub share_and_owner_confirm_signature: Vec<u8>,
    pub encrypted_group_info_secret: Option<Vec<u8>>,
    pub encrypted_ephemeral_key: Option<Vec<u8>>,
    pub last_mid: i64,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
    /// Bounded at 256 entries, keys at 256 B, values at 128 KiB — enforced
    /// by the caller before this reaches the store.
    pub extensions: serde_json::Value,
}

/// A sparse set of fields to apply to an existing [`Group`]. `None` means
/// "leave unchanged"; this is intentionally not `serde(default)` so callers
/// must be explicit about which fields a PUT actually touches.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupPatch {
    pub name: Option<Vec<u8>>,
    pub icon: Option<Vec<u8>>,
    pub intro: Option<Vec<u8>>,
    pub broadcast: Option<bool>,
    pub owner_confirm: Option<bool>,
    pub qr_code_setting: Option<Vec<u8>>,
    pub share_signature: Option<Vec<u8>>,
    pub share_and_owner_confirm_signature: Option<Vec<u8>>,
    pub encrypted_group_info_secret: Option<Vec<u8>>,
    pub encrypted_ephemeral_key: Option<Vec<u8>>,
    pub extensions: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMember {
    pub gid: Gid,
    pub uid: Uid,
    pub role: Role,
    pub encrypted_key: Vec<u8>,
    pub group_info_secret: Vec<u8>,
    pub proof: Vec<u8>,
    pub nick: Vec<u8>,
    pub nickname: Vec<u8>,
    pub group_nickname: Vec<u8>,
    pub profile_keys: Vec<u8>,
    /// Bitfield; bit 0 = mute.
    pub status: i32,
    pub create_time: DateTime<Utc>,
    pub last_ack_mid: i64,
}

impl GroupMember {
    pub fn is_muted(&self) -> bool {
        self.status & 0x1 != 0
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupMemberPatch {
    pub role: Option<Role>,
    pub encrypted_key: Option<Vec<u8>>,
    pub group_info_secret: Option<Vec<u8>>,
    pub proof: Option<Vec<u8>>,
    pub nick: Option<Vec<u8>>,
    pub nickname: Option<Vec<u8>>,
    pub group_nickname: Option<Vec<u8>>,
    pub profile_keys: Option<Vec<u8>>,
    pub status: Option<i32>,
    pub last_ack_mid: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingMember {
    pub gid: Gid,
    pub uid: Uid,
    pub inviter: Uid,
    pub signature: Vec<u8>,
    pub comment: Vec<u8>,
    pub create_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QrCodePendingMember {
    pub gid: Gid,
    pub uid: Uid,
    pub encrypted_group_info_secret: Vec<u8>,
    pub create_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberCounts {
    pub member_count: u32,
    pub subscriber_count: u32,
    pub owner: Option<Uid>,
}

impl MemberCounts {
    pub fn total(&self) -> u32 {
        self.member_count + self.subscriber_count
    }
}
