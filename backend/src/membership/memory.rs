// SPDX-FileCopyrightText: 2026 Glass Relay Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-memory test double: exercises the same trait contract as
//! [`super::postgres::PgMembershipStore`] without a database.

use std::collections::HashMap;

use async_trait::async_trait;
use glkdc_common::identifiers::{Gid, Uid};
use tokio::sync::RwLock;

use super::model::{
    Group, GroupMember, GroupMemberPatch, GroupPatch, MemberCounts, PendingMember,
    QrCodePendingMember, Role,
};
use super::{MemberCursor, MembershipStore, Outcome};

#[derive(Default)]
pub struct InMemoryMembershipStore {
    groups: RwLock<HashMap<Gid, Group>>,
    members: RwLock<HashMap<(Gid, Uid), GroupMember>>,
    pending: RwLock<HashMap<(Gid, Uid), PendingMember>>,
    qr_pending: RwLock<HashMap<(Gid, Uid), QrCodePendingMember>>,
}

impl InMemoryMembershipStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn apply_group_patch(group: &mut Group, patch: GroupPatch) {
    if let Some(v) = patch.name {
        group.name = v;
    }
    if let Some(v) = patch.icon {
        group.icon = v;
    }
    if let Some(v) = patch.intro {
        group.intro = v;
    }
    if let Some(v) = patch.broadcast {
        group.broadcast = v;
    }
    if let Some(v) = patch.owner_confirm {
        group.owner_confirm = v;
    }
    if let Some(v) = patch.qr_code_setting {
        group.qr_code_setting = v;
    }
    if let Some(v) = patch.share_signature {
        group.share_signature = v;
    }
    if let Some(v) = patch.share_and_owner_confirm_signature {
        group.share_and_owner_confirm_signature = v;
    }
    if let Some(v) = patch.encrypted_group_info_secret {
        group.encrypted_group_info_secret = Some(v);
    }
    if let Some(v) = patch.encrypted_ephemeral_key {
        group.encrypted_ephemeral_key = Some(v);
    }
    if let Some(v) = patch.extensions {
        group.extensions = v;
    }
    group.update_time = chrono::Utc::now();
}

fn apply_member_patch(member: &mut GroupMember, patch: GroupMemberPatch) {
    if let Some(v) = patch.role {
        member.role = v;
    }
    if let Some(v) = patch.encrypted_key {
        member.encrypted_key = v;
    }
    if let Some(v) = patch.group_info_secret {
        member.group_info_secret = v;
    }
    if let Some(v) = patch.proof {
        member.proof = v;
    }
    if let Some(v) = patch.nick {
        member.nick = v;
    }
    if let Some(v) = patch.nickname {
        member.nickname = v;
    }
    if let Some(v) = patch.group_nickname {
        member.group_nickname = v;
    }
    if let Some(v) = patch.profile_keys {
        member.profile_keys = v;
    }
    if let Some(v) = patch.status {
        member.status = v;
    }
    if let Some(v) = patch.last_ack_mid {
        member.last_ack_mid = v;
    }
}

#[async_trait]
impl MembershipStore for InMemoryMembershipStore {
    async fn get_group(&self, gid: Gid) -> Outcome<Group> {
        match self.groups.read().await.get(&gid) {
            Some(g) => Outcome::Ok(g.clone()),
            None => Outcome::NotFound,
        }
    }

    async fn update_group(&self, gid: Gid, patch: GroupPatch) -> Outcome<Group> {
        let mut groups = self.groups.write().await;
        match groups.get_mut(&gid) {
            Some(g) => {
                apply_group_patch(g, patch);
                Outcome::Ok(g.clone())
            }
            None => Outcome::NotFound,
        }
    }

    async fn create_group(&self, group: Group) -> Outcome<Gid> {
        let mut groups = self.groups.write().await;
        if groups.contains_key(&group.gid) {
            return Outcome::AlreadyExists;
        }
        let gid = group.gid;
        groups.insert(gid, group);
        Outcome::Ok(gid)
    }

    async fn delete_group(&self, gid: Gid) -> Outcome<()> {
        match self.groups.write().await.remove(&gid) {
            Some(_) => Outcome::Ok(()),
            None => Outcome::NotFound,
        }
    }

    async fn insert_member(&self, member: GroupMember) -> Outcome<()> {
        let key = (member.gid, member.uid.clone());
        let mut members = self.members.write().await;
        if members.contains_key(&key) {
            return Outcome::AlreadyExists;
        }
        members.insert(key, member);
        Outcome::Ok(())
    }

    async fn insert_members(&self, gid: Gid, new_members: Vec<GroupMember>) -> Outcome<()> {
        let mut members = self.members.write().await;
        for m in &new_members {
            if members.contains_key(&(gid, m.uid.clone())) {
                return Outcome::AlreadyExists;
            }
        }
        for m in new_members {
            members.insert((gid, m.uid.clone()), m);
        }
        Outcome::Ok(())
    }

    async fn get_member(&self, gid: Gid, uid: &Uid) -> Outcome<GroupMember> {
        match self.members.read().await.get(&(gid, uid.clone())) {
            Some(m) => Outcome::Ok(m.clone()),
            None => Outcome::NotFound,
        }
    }

    async fn get_members(&self, gid: Gid, uids: &[Uid]) -> Outcome<Vec<GroupMember>> {
        let members = self.members.read().await;
        Outcome::Ok(
            uids.iter()
                .filter_map(|uid| members.get(&(gid, uid.clone())).cloned())
                .collect(),
        )
    }

    async fn get_members_by_role(
        &self,
        gid: Gid,
        roles: &[Role],
        start_uid: Option<&Uid>,
        count: u32,
    ) -> Outcome<Vec<GroupMember>> {
        let members = self.members.read().await;
        let mut matched: Vec<GroupMember> = members
            .values()
            .filter(|m| m.gid == gid && (roles.is_empty() || roles.contains(&m.role)))
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.uid.as_str().cmp(b.uid.as_str()));
        if let Some(start) = start_uid {
            matched.retain(|m| m.uid.as_str() > start.as_str());
        }
        matched.truncate(count as usize);
        Outcome::Ok(matched)
    }

    async fn get_members_ordered_by_create_time(
        &self,
        gid: Gid,
        roles: &[Role],
        cursor: MemberCursor,
    ) -> Outcome<Vec<GroupMember>> {
        let members = self.members.read().await;
        let mut matched: Vec<GroupMember> = members
            .values()
            .filter(|m| {
                m.gid == gid
                    && (roles.is_empty() || roles.contains(&m.role))
                    && (m.create_time, m.uid.as_str())
                        > (
                            cursor.create_time,
                            cursor.start_uid.as_ref().map(|u| u.as_str()).unwrap_or(""),
                        )
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| {
            (a.create_time, a.uid.as_str()).cmp(&(b.create_time, b.uid.as_str()))
        });
        matched.truncate(cursor.count as usize);
        Outcome::Ok(matched)
    }

    async fn update_member(
        &self,
        gid: Gid,
        uid: &Uid,
        patch: GroupMemberPatch,
    ) -> Outcome<GroupMember> {
        let mut members = self.members.write().await;
        match members.get_mut(&(gid, uid.clone())) {
            Some(m) => {
                apply_member_patch(m, patch);
                Outcome::Ok(m.clone())
            }
            None => Outcome::NotFound,
        }
    }

    async fn update_member_if_empty(
        &self,
        gid: Gid,
        uid: &Uid,
        patch: GroupMemberPatch,
    ) -> Outcome<GroupMember> {
        let mut members = self.members.write().await;
        match members.get_mut(&(gid, uid.clone())) {
            Some(m) => {
                if !m.encrypted_key.is_empty() || !m.group_info_secret.is_empty() {
                    return Outcome::AlreadyExists;
                }
                apply_member_patch(m, patch);
                Outcome::Ok(m.clone())
            }
            None => Outcome::NotFound,
        }
    }

    async fn delete_member(&self, gid: Gid, uid: &Uid) -> Outcome<()> {
        match self.members.write().await.remove(&(gid, uid.clone())) {
            Some(_) => Outcome::Ok(()),
            None => Outcome::NotFound,
        }
    }

    async fn delete_members(&self, gid: Gid, uids: &[Uid]) -> Outcome<()> {
        let mut members = self.members.write().await;
        for uid in uids {
            members.remove(&(gid, uid.clone()));
        }
        Outcome::Ok(())
    }

    async fn get_owner(&self, gid: Gid) -> Outcome<Uid> {
        let members = self.members.read().await;
        match members
            .values()
            .find(|m| m.gid == gid && m.role == Role::Owner)
        {
            Some(m) => Outcome::Ok(m.uid.clone()),
            None => Outcome::NotFound,
        }
    }

    async fn count_members(&self, gid: Gid) -> Outcome<MemberCounts> {
        let members = self.members.read().await;
        let mut member_count = 0u32;
        let mut subscriber_count = 0u32;
        let mut owner = None;
        for m in members.values().filter(|m| m.gid == gid) {
            match m.role {
                Role::Subscriber => subscriber_count += 1,
                Role::Owner => {
                    owner = Some(m.uid.clone());
                    member_count += 1;
                }
                _ => member_count += 1,
            }
        }
        Outcome::Ok(MemberCounts {
            member_count,
            subscriber_count,
            owner,
        })
    }

    async fn insert_pending_member(&self, pending: PendingMember) -> Outcome<()> {
        let key = (pending.gid, pending.uid.clone());
        let mut map = self.pending.write().await;
        if map.contains_key(&key) {
            return Outcome::AlreadyExists;
        }
        map.insert(key, pending);
        Outcome::Ok(())
    }

    async fn get_pending_member(&self, gid: Gid, uid: &Uid) -> Outcome<PendingMember> {
        match self.pending.read().await.get(&(gid, uid.clone())) {
            Some(p) => Outcome::Ok(p.clone()),
            None => Outcome::NotFound,
        }
    }

    async fn delete_pending_member(&self, gid: Gid, uid: &Uid) -> Outcome<()> {
        match self.pending.write().await.remove(&(gid, uid.clone())) {
            Some(_) => Outcome::Ok(()),
            None => Outcome::NotFound,
        }
    }

    async fn clear_pending_members(&self, gid: Gid) {
        self.pending.write().await.retain(|(g, _), _| *g != gid);
    }

    async fn insert_qr_code_pending_member(&self, pending: QrCodePendingMember) -> Outcome<()> {
        let key = (pending.gid, pending.uid.clone());
        self.qr_pending.write().await.insert(key, pending);
        Outcome::Ok(())
    }

    async fn get_qr_code_pending_member(
        &self,
        gid: Gid,
        uid: &Uid,
    ) -> Outcome<QrCodePendingMember> {
        match self.qr_pending.read().await.get(&(gid, uid.clone())) {
            Some(p) => Outcome::Ok(p.clone()),
            None => Outcome::NotFound,
        }
    }

    async fn delete_qr_code_pending_member(&self, gid: Gid, uid: &Uid) -> Outcome<()> {
        match self.qr_pending.write().await.remove(&(gid, uid.clone())) {
            Some(_) => Outcome::Ok(()),
            None => Outcome::NotFound,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glkdc_common::identifiers::DeviceKind;

    fn uid(n: u8) -> Uid {
        Uid::from_public_key(&[n; 32])
    }

    fn member(gid: Gid, uid: Uid, role: Role) -> GroupMember {
        GroupMember {
            gid,
            uid,
            role,
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
        }
    }

    #[tokio::test]
    async fn tracks_a_single_owner() {
        let _ = DeviceKind::Master;
        let store = InMemoryMembershipStore::new();
        let gid = Gid(1);
        assert!(matches!(
            store.insert_member(member(gid, uid(1), Role::Owner)).await,
            Outcome::Ok(())
        ));
        assert!(matches!(
            store.insert_member(member(gid, uid(2), Role::Member)).await,
            Outcome::Ok(())
        ));

        let counts = match store.count_members(gid).await {
            Outcome::Ok(c) => c,
            _ => panic!("expected Ok"),
        };
        assert_eq!(counts.member_count, 2);
        assert_eq!(counts.owner, Some(uid(1)));
    }

    #[tokio::test]
    async fn second_insert_of_same_member_is_already_exists() {
        let store = InMemoryMembershipStore::new();
        let gid = Gid(1);
        store.insert_member(member(gid, uid(1), Role::Owner)).await;
        assert!(matches!(
            store.insert_member(member(gid, uid(1), Role::Owner)).await,
            Outcome::AlreadyExists
        ));
    }
}
