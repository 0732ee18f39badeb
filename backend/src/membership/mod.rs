// SPDX-FileCopyrightText: 2026 Glass Relay Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Owns `Group`, `GroupMember`, `PendingMember` and `QrCodePendingMember` —
//! the only component allowed to read or write those tables. Every
//! operation returns an [`Outcome`] rather than a bare `Result`, so callers
//! distinguish "nothing changed" logical results from store failures without
//! threading `StorageError` through every match arm.

pub mod memory;
pub mod model;
pub mod postgres;

use async_trait::async_trait;
use glkdc_common::identifiers::{Gid, Uid};

use crate::errors::StorageError;

use self::model::{
    Group, GroupMember, GroupMemberPatch, GroupPatch, MemberCounts, PendingMember,
    QrCodePendingMember, Role,
};

#[derive(Debug)]
pub enum Outcome<T> {
    Ok(T),
    NotFound,
    AlreadyExists,
    Internal(StorageError),
}

impl<T> From<StorageError> for Outcome<T> {
    fn from(e: StorageError) -> Self {
        Outcome::Internal(e)
    }
}

impl<T> From<Result<T, StorageError>> for Outcome<T> {
    fn from(r: Result<T, StorageError>) -> Self {
        match r {
            Ok(v) => Outcome::Ok(v),
            Err(e) => Outcome::Internal(e),
        }
    }
}

impl<T> Outcome<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Ok(v) => Outcome::Ok(f(v)),
            Outcome::NotFound => Outcome::NotFound,
            Outcome::AlreadyExists => Outcome::AlreadyExists,
            Outcome::Internal(e) => Outcome::Internal(e),
        }
    }
}

/// Cursor for `(createTime, uid)`-ordered member listing: the beginning of
/// the order is `start_uid = ""`, `create_time = 0`.
#[derive(Debug, Clone)]
pub struct MemberCursor {
    pub start_uid: Option<Uid>,
    pub create_time: chrono::DateTime<chrono::Utc>,
    pub count: u32,
}

#[async_trait]
pub trait MembershipStore: Send + Sync {
    async fn get_group(&self, gid: Gid) -> Outcome<Group>;
    async fn update_group(&self, gid: Gid, patch: GroupPatch) -> Outcome<Group>;
    async fn create_group(&self, group: Group) -> Outcome<Gid>;
    async fn delete_group(&self, gid: Gid) -> Outcome<()>;

    async fn insert_member(&self, member: GroupMember) -> Outcome<()>;
    /// Inserts all members for one `gid` as a single atomic write.
    async fn insert_members(&self, gid: Gid, members: Vec<GroupMember>) -> Outcome<()>;
    async fn get_member(&self, gid: Gid, uid: &Uid) -> Outcome<GroupMember>;
    async fn get_members(&self, gid: Gid, uids: &[Uid]) -> Outcome<Vec<GroupMember>>;
    async fn get_members_by_role(
        &self,
        gid: Gid,
        roles: &[Role],
        start_uid: Option<&Uid>,
        count: u32,
    ) -> Outcome<Vec<GroupMember>>;
    async fn get_members_ordered_by_create_time(
        &self,
        gid: Gid,
        roles: &[Role],
        cursor: MemberCursor,
    ) -> Outcome<Vec<GroupMember>>;
    async fn update_member(
        &self,
        gid: Gid,
        uid: &Uid,
        patch: GroupMemberPatch,
    ) -> Outcome<GroupMember>;
    /// Compare-and-set update: only applies if `encrypted_key` and
    /// `group_info_secret` are currently empty.
    async fn update_member_if_empty(
        &self,
        gid: Gid,
        uid: &Uid,
        patch: GroupMemberPatch,
    ) -> Outcome<GroupMember>;
    async fn delete_member(&self, gid: Gid, uid: &Uid) -> Outcome<()>;
    async fn delete_members(&self, gid: Gid, uids: &[Uid]) -> Outcome<()>;
    async fn get_owner(&self, gid: Gid) -> Outcome<Uid>;
    async fn count_members(&self, gid: Gid) -> Outcome<MemberCounts>;

    async fn insert_pending_member(&self, pending: PendingMember) -> Outcome<()>;
    async fn get_pending_member(&self, gid: Gid, uid: &Uid) -> Outcome<PendingMember>;
    async fn delete_pending_member(&self, gid: Gid, uid: &Uid) -> Outcome<()>;
    /// Best-effort: used when `qrCodeSetting` changes and all pending rows
    /// for the group must be invalidated. Failure is logged, never
    /// propagated — per the shared signature-validation rule in the
    /// membership state machine.
    async fn clear_pending_members(&self, gid: Gid);

    async fn insert_qr_code_pending_member(&self, pending: QrCodePendingMember) -> Outcome<()>;
    async fn get_qr_code_pending_member(&self, gid: Gid, uid: &Uid)
        -> Outcome<QrCodePendingMember>;
    async fn delete_qr_code_pending_member(&self, gid: Gid, uid: &Uid) -> Outcome<()>;
}
