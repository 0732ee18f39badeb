// SPDX-FileCopyrightText: 2026 Glass Relay Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Postgres-backed [`MembershipStore`]. CAS-style inserts use `INSERT ...
//! ON CONFLICT DO NOTHING` and inspect `rows_affected()`, the same pattern
//! [`crate::keys::postgres::PgKeyVersionStore`] uses for `key_records`.

use async_trait::async_trait;
use glkdc_common::identifiers::{Gid, Uid};
use sqlx::{PgPool, Postgres, Transaction};

use super::model::{
    Group, GroupMember, GroupMemberPatch, GroupPatch, GroupVersion, MemberCounts, PendingMember,
    QrCodePendingMember, Role,
};
use super::{MemberCursor, MembershipStore, Outcome};
use crate::errors::StorageError;
use crate::infra_service::{InfraService, ServiceCreationError};

pub struct PgMembershipStore {
    pool: PgPool,
}

impl PgMembershipStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InfraService for PgMembershipStore {
    async fn initialize(db_pool: PgPool) -> Result<Self, ServiceCreationError> {
        Ok(Self::new(db_pool))
    }
}

fn role_from_i16(value: i16) -> Role {
    match value {
        1 => Role::Subscriber,
        2 => Role::Member,
        3 => Role::Admin,
        4 => Role::Owner,
        _ => Role::Undefined,
    }
}

fn version_from_i16(value: i16) -> GroupVersion {
    if value == 3 {
        GroupVersion::V3
    } else {
        GroupVersion::V0
    }
}

struct GroupRow {
    gid: i64,
    name: Vec<u8>,
    icon: Vec<u8>,
    intro: Vec<u8>,
    version: i16,
    encrypt_status: i32,
    broadcast: bool,
    owner_confirm: bool,
    qr_code_setting: Vec<u8>,
    share_signature: Vec<u8>,
    share_and_owner_confirm_signature: Vec<u8>,
    encrypted_group_info_secret: Option<Vec<u8>>,
    encrypted_ephemeral_key: Option<Vec<u8>>,
    last_mid: i64,
    create_time: chrono::DateTime<chrono::Utc>,
    update_time: chrono::DateTime<chrono::Utc>,
    extensions: serde_json::Value,
}

impl From<GroupRow> for Group {
    fn from(row: GroupRow) -> Self {
        Group {
            gid: Gid(row.gid as u64),
            name: row.name,
            icon: row.icon,
            intro: row.intro,
            version: version_from_i16(row.version),
            encrypt_status: row.encrypt_status,
            broadcast: row.broadcast,
            owner_confirm: row.owner_confirm,
            qr_code_setting: row.qr_code_setting,
            share_signature: row.share_signature,
            share_and_owner_confirm_signature: row.share_and_owner_confirm_signature,
            encrypted_group_info_secret: row.encrypted_group_info_secret,
            encrypted_ephemeral_key: row.encrypted_ephemeral_key,
            last_mid: row.last_mid,
            create_time: row.create_time,
            update_time: row.update_time,
            extensions: row.extensions,
        }
    }
}

struct MemberRow {
    gid: i64,
    uid: String,
    role: i16,
    encrypted_key: Vec<u8>,
    group_info_secret: Vec<u8>,
    proof: Vec<u8>,
    nick: Vec<u8>,
    nickname: Vec<u8>,
    group_nickname: Vec<u8>,
    profile_keys: Vec<u8>,
    status: i32,
    create_time: chrono::DateTime<chrono::Utc>,
    last_ack_mid: i64,
}

impl MemberRow {
    fn into_member(self) -> Result<GroupMember, StorageError> {
        Ok(GroupMember {
            gid: Gid(self.gid as u64),
            uid: Uid::parse(&self.uid)
                .map_err(|_| sqlx::Error::Decode("invalid uid in group_members.uid".into()))?,
            role: role_from_i16(self.role),
            encrypted_key: self.encrypted_key,
            group_info_secret: self.group_info_secret,
            proof: self.proof,
            nick: self.nick,
            nickname: self.nickname,
            group_nickname: self.group_nickname,
            profile_keys: self.profile_keys,
            status: self.status,
            create_time: self.create_time,
            last_ack_mid: self.last_ack_mid,
        })
    }
}

#[async_trait]
impl MembershipStore for PgMembershipStore {
    async fn get_group(&self, gid: Gid) -> Outcome<Group> {
        let row = sqlx::query_as!(
            GroupRow,
            r#"SELECT gid, name, icon, intro, version, encrypt_status, broadcast, owner_confirm,
                qr_code_setting, share_signature, share_and_owner_confirm_signature,
                encrypted_group_info_secret, encrypted_ephemeral_key, last_mid,
                create_time, update_time, extensions
                FROM groups WHERE gid = $1"#,
            gid.0 as i64,
        )
        .fetch_optional(&self.pool)
        .await;

        match row {
            Ok(Some(row)) => Outcome::Ok(row.into()),
            Ok(None) => Outcome::NotFound,
            Err(e) => Outcome::Internal(e.into()),
        }
    }

    async fn update_group(&self, gid: Gid, patch: GroupPatch) -> Outcome<Group> {
        // Column-level COALESCE keeps `None` fields untouched, mirroring
        // GroupPatch's "None means leave unchanged" contract in-database
        // rather than requiring a read-modify-write round trip.
        let row = sqlx::query_as!(
            GroupRow,
            r#"UPDATE groups SET
                name = COALESCE($2, name),
                icon = COALESCE($3, icon),
                intro = COALESCE($4, intro),
                broadcast = COALESCE($5, broadcast),
                owner_confirm = COALESCE($6, owner_confirm),
                qr_code_setting = COALESCE($7, qr_code_setting),
                share_signature = COALESCE($8, share_signature),
                share_and_owner_confirm_signature = COALESCE($9, share_and_owner_confirm_signature),
                encrypted_group_info_secret = COALESCE($10, encrypted_group_info_secret),
                encrypted_ephemeral_key = COALESCE($11, encrypted_ephemeral_key),
                extensions = COALESCE($12, extensions),
                update_time = now()
                WHERE gid = $1
                RETURNING gid, name, icon, intro, version, encrypt_status, broadcast, owner_confirm,
                qr_code_setting, share_signature, share_and_owner_confirm_signature,
                encrypted_group_info_secret, encrypted_ephemeral_key, last_mid,
                create_time, update_time, extensions"#,
            gid.0 as i64,
            patch.name,
            patch.icon,
            patch.intro,
            patch.broadcast,
            patch.owner_confirm,
            patch.qr_code_setting,
            patch.share_signature,
            patch.share_and_owner_confirm_signature,
            patch.encrypted_group_info_secret,
            patch.encrypted_ephemeral_key,
            patch.extensions,
        )
        .fetch_optional(&self.pool)
        .await;

        match row {
            Ok(Some(row)) => Outcome::Ok(row.into()),
            Ok(None) => Outcome::NotFound,
            Err(e) => Outcome::Internal(e.into()),
        }
    }

    async fn create_group(&self, group: Group) -> Outcome<Gid> {
        let result = sqlx::query!(
            r#"INSERT INTO groups (gid, name, icon, intro, version, encrypt_status, broadcast,
                owner_confirm, qr_code_setting, share_signature, share_and_owner_confirm_signature,
                encrypted_group_info_secret, encrypted_ephemeral_key, last_mid, create_time,
                update_time, extensions)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
                ON CONFLICT (gid) DO NOTHING"#,
            group.gid.0 as i64,
            group.name,
            group.icon,
            group.intro,
            group.version as i16,
            group.encrypt_status,
            group.broadcast,
            group.owner_confirm,
            group.qr_code_setting,
            group.share_signature,
            group.share_and_owner_confirm_signature,
            group.encrypted_group_info_secret,
            group.encrypted_ephemeral_key,
            group.last_mid,
            group.create_time,
            group.update_time,
            group.extensions,
        )
        .execute(&self.pool)
        .await;

        match result {
            Ok(res) if res.rows_affected() == 1 => Outcome::Ok(group.gid),
            Ok(_) => Outcome::AlreadyExists,
            Err(e) => Outcome::Internal(e.into()),
        }
    }

    async fn delete_group(&self, gid: Gid) -> Outcome<()> {
        let result = sqlx::query!("DELETE FROM groups WHERE gid = $1", gid.0 as i64)
            .execute(&self.pool)
            .await;
        match result {
            Ok(res) if res.rows_affected() == 1 => Outcome::Ok(()),
            Ok(_) => Outcome::NotFound,
            Err(e) => Outcome::Internal(e.into()),
        }
    }

    async fn insert_member(&self, member: GroupMember) -> Outcome<()> {
        insert_member_row(&self.pool, member).await
    }

    async fn insert_members(&self, gid: Gid, members: Vec<GroupMember>) -> Outcome<()> {
        let mut tx: Transaction<'_, Postgres> = match self.pool.begin().await {
            Ok(tx) => tx,
            Err(e) => return Outcome::Internal(e.into()),
        };
        for member in members {
            debug_assert_eq!(member.gid, gid);
            let result = sqlx::query!(
                r#"INSERT INTO group_members (gid, uid, role, encrypted_key, group_info_secret,
                    proof, nick, nickname, group_nickname, profile_keys, status, create_time,
                    last_ack_mid)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                    ON CONFLICT (gid, uid) DO NOTHING"#,
                member.gid.0 as i64,
                member.uid.as_str(),
                member.role as i16,
                member.encrypted_key,
                member.group_info_secret,
                member.proof,
                member.nick,
                member.nickname,
                member.group_nickname,
                member.profile_keys,
                member.status,
                member.create_time,
                member.last_ack_mid,
            )
            .execute(&mut *tx)
            .await;
            match result {
                Ok(res) if res.rows_affected() == 1 => {}
                Ok(_) => return Outcome::AlreadyExists,
                Err(e) => return Outcome::Internal(e.into()),
            }
        }
        match tx.commit().await {
            Ok(()) => Outcome::Ok(()),
            Err(e) => Outcome::Internal(e.into()),
        }
    }

    async fn get_member(&self, gid: Gid, uid: &Uid) -> Outcome<GroupMember> {
        let row = sqlx::query_as!(
            MemberRow,
            r#"SELECT gid, uid, role, encrypted_key, group_info_secret, proof, nick, nickname,
                group_nickname, profile_keys, status, create_time, last_ack_mid
                FROM group_members WHERE gid = $1 AND uid = $2"#,
            gid.0 as i64,
            uid.as_str(),
        )
        .fetch_optional(&self.pool)
        .await;

        match row {
            Ok(Some(row)) => row.into_member().into(),
            Ok(None) => Outcome::NotFound,
            Err(e) => Outcome::Internal(e.into()),
        }
    }

    async fn get_members(&self, gid: Gid, uids: &[Uid]) -> Outcome<Vec<GroupMember>> {
        let uid_strs: Vec<&str> = uids.iter().map(|u| u.as_str()).collect();
        let rows = sqlx::query_as!(
            MemberRow,
            r#"SELECT gid, uid, role, encrypted_key, group_info_secret, proof, nick, nickname,
                group_nickname, profile_keys, status, create_time, last_ack_mid
                FROM group_members WHERE gid = $1 AND uid = ANY($2)"#,
            gid.0 as i64,
            &uid_strs as &[&str],
        )
        .fetch_all(&self.pool)
        .await;

        match rows {
            Ok(rows) => rows
                .into_iter()
                .map(MemberRow::into_member)
                .collect::<Result<Vec<_>, _>>()
                .map(Outcome::Ok)
                .unwrap_or_else(|e| Outcome::Internal(e)),
            Err(e) => Outcome::Internal(e.into()),
        }
    }

    async fn get_members_by_role(
        &self,
        gid: Gid,
        roles: &[Role],
        start_uid: Option<&Uid>,
        count: u32,
    ) -> Outcome<Vec<GroupMember>> {
        let role_values: Vec<i16> = roles.iter().map(|r| *r as i16).collect();
        let start = start_uid.map(|u| u.as_str()).unwrap_or("");
        let rows = sqlx::query_as!(
            MemberRow,
            r#"SELECT gid, uid, role, encrypted_key, group_info_secret, proof, nick, nickname,
                group_nickname, profile_keys, status, create_time, last_ack_mid
                FROM group_members
                WHERE gid = $1
                  AND (cardinality($2::smallint[]) = 0 OR role = ANY($2))
                  AND uid > $3
                ORDER BY uid
                LIMIT $4"#,
            gid.0 as i64,
            &role_values as &[i16],
            start,
            count as i64,
        )
        .fetch_all(&self.pool)
        .await;

        match rows {
            Ok(rows) => rows
                .into_iter()
                .map(MemberRow::into_member)
                .collect::<Result<Vec<_>, _>>()
                .map(Outcome::Ok)
                .unwrap_or_else(|e| Outcome::Internal(e)),
            Err(e) => Outcome::Internal(e.into()),
        }
    }

    async fn get_members_ordered_by_create_time(
        &self,
        gid: Gid,
        roles: &[Role],
        cursor: MemberCursor,
    ) -> Outcome<Vec<GroupMember>> {
        let role_values: Vec<i16> = roles.iter().map(|r| *r as i16).collect();
        let start = cursor.start_uid.as_ref().map(|u| u.as_str()).unwrap_or("");
        let rows = sqlx::query_as!(
            MemberRow,
            r#"SELECT gid, uid, role, encrypted_key, group_info_secret, proof, nick, nickname,
                group_nickname, profile_keys, status, create_time, last_ack_mid
                FROM group_members
                WHERE gid = $1
                  AND (cardinality($2::smallint[]) = 0 OR role = ANY($2))
                  AND (create_time, uid) > ($3, $4)
                ORDER BY create_time, uid
                LIMIT $5"#,
            gid.0 as i64,
            &role_values as &[i16],
            cursor.create_time,
            start,
            cursor.count as i64,
        )
        .fetch_all(&self.pool)
        .await;

        match rows {
            Ok(rows) => rows
                .into_iter()
                .map(MemberRow::into_member)
                .collect::<Result<Vec<_>, _>>()
                .map(Outcome::Ok)
                .unwrap_or_else(|e| Outcome::Internal(e)),
            Err(e) => Outcome::Internal(e.into()),
        }
    }

    async fn update_member(
        &self,
        gid: Gid,
        uid: &Uid,
        patch: GroupMemberPatch,
    ) -> Outcome<GroupMember> {
        let row = sqlx::query_as!(
            MemberRow,
            r#"UPDATE group_members SET
                role = COALESCE($3, role),
                encrypted_key = COALESCE($4, encrypted_key),
                group_info_secret = COALESCE($5, group_info_secret),
                proof = COALESCE($6, proof),
                nick = COALESCE($7, nick),
                nickname = COALESCE($8, nickname),
                group_nickname = COALESCE($9, group_nickname),
                profile_keys = COALESCE($10, profile_keys),
                status = COALESCE($11, status),
                last_ack_mid = COALESCE($12, last_ack_mid)
                WHERE gid = $1 AND uid = $2
                RETURNING gid, uid, role, encrypted_key, group_info_secret, proof, nick, nickname,
                group_nickname, profile_keys, status, create_time, last_ack_mid"#,
            gid.0 as i64,
            uid.as_str(),
            patch.role.map(|r| r as i16),
            patch.encrypted_key,
            patch.group_info_secret,
            patch.proof,
            patch.nick,
            patch.nickname,
            patch.group_nickname,
            patch.profile_keys,
            patch.status,
            patch.last_ack_mid,
        )
        .fetch_optional(&self.pool)
        .await;

        match row {
            Ok(Some(row)) => row.into_member().into(),
            Ok(None) => Outcome::NotFound,
            Err(e) => Outcome::Internal(e.into()),
        }
    }

    async fn update_member_if_empty(
        &self,
        gid: Gid,
        uid: &Uid,
        patch: GroupMemberPatch,
    ) -> Outcome<GroupMember> {
        let row = sqlx::query_as!(
            MemberRow,
            r#"UPDATE group_members SET
                role = COALESCE($3, role),
                encrypted_key = COALESCE($4, encrypted_key),
                group_info_secret = COALESCE($5, group_info_secret),
                proof = COALESCE($6, proof),
                nick = COALESCE($7, nick),
                nickname = COALESCE($8, nickname),
                group_nickname = COALESCE($9, group_nickname),
                profile_keys = COALESCE($10, profile_keys),
                status = COALESCE($11, status),
                last_ack_mid = COALESCE($12, last_ack_mid)
                WHERE gid = $1 AND uid = $2
                  AND encrypted_key = '' AND group_info_secret = ''
                RETURNING gid, uid, role, encrypted_key, group_info_secret, proof, nick, nickname,
                group_nickname, profile_keys, status, create_time, last_ack_mid"#,
            gid.0 as i64,
            uid.as_str(),
            patch.role.map(|r| r as i16),
            patch.encrypted_key,
            patch.group_info_secret,
            patch.proof,
            patch.nick,
            patch.nickname,
            patch.group_nickname,
            patch.profile_keys,
            patch.status,
            patch.last_ack_mid,
        )
        .fetch_optional(&self.pool)
        .await;

        match row {
            Ok(Some(row)) => row.into_member().into(),
            Ok(None) => {
                // Distinguish "no such member" from "member exists but was
                // already populated" the same way the in-memory double does:
                // a second lookup tells us which NotFound case this is.
                match self.get_member(gid, uid).await {
                    Outcome::Ok(_) => Outcome::AlreadyExists,
                    other => other,
                }
            }
            Err(e) => Outcome::Internal(e.into()),
        }
    }

    async fn delete_member(&self, gid: Gid, uid: &Uid) -> Outcome<()> {
        let result = sqlx::query!(
            "DELETE FROM group_members WHERE gid = $1 AND uid = $2",
            gid.0 as i64,
            uid.as_str(),
        )
        .execute(&self.pool)
        .await;
        match result {
            Ok(res) if res.rows_affected() == 1 => Outcome::Ok(()),
            Ok(_) => Outcome::NotFound,
            Err(e) => Outcome::Internal(e.into()),
        }
    }

    async fn delete_members(&self, gid: Gid, uids: &[Uid]) -> Outcome<()> {
        let uid_strs: Vec<&str> = uids.iter().map(|u| u.as_str()).collect();
        let result = sqlx::query!(
            "DELETE FROM group_members WHERE gid = $1 AND uid = ANY($2)",
            gid.0 as i64,
            &uid_strs as &[&str],
        )
        .execute(&self.pool)
        .await;
        match result {
            Ok(_) => Outcome::Ok(()),
            Err(e) => Outcome::Internal(e.into()),
        }
    }

    async fn get_owner(&self, gid: Gid) -> Outcome<Uid> {
        let row = sqlx::query!(
            "SELECT uid FROM group_members WHERE gid = $1 AND role = $2",
            gid.0 as i64,
            Role::Owner as i16,
        )
        .fetch_optional(&self.pool)
        .await;

        match row {
            Ok(Some(row)) => match Uid::parse(&row.uid) {
                Ok(uid) => Outcome::Ok(uid),
                Err(_) => Outcome::Internal(
                    sqlx::Error::Decode("invalid uid in group_members.uid".into()).into(),
                ),
            },
            Ok(None) => Outcome::NotFound,
            Err(e) => Outcome::Internal(e.into()),
        }
    }

    async fn count_members(&self, gid: Gid) -> Outcome<MemberCounts> {
        struct Counts {
            member_count: Option<i64>,
            subscriber_count: Option<i64>,
            owner: Option<String>,
        }
        let row = sqlx::query_as!(
            Counts,
            r#"SELECT
                count(*) FILTER (WHERE role != $2) AS member_count,
                count(*) FILTER (WHERE role = $2) AS subscriber_count,
                (SELECT uid FROM group_members WHERE gid = $1 AND role = $3 LIMIT 1) AS owner
                FROM group_members WHERE gid = $1"#,
            gid.0 as i64,
            Role::Subscriber as i16,
            Role::Owner as i16,
        )
        .fetch_one(&self.pool)
        .await;

        match row {
            Ok(row) => {
                let owner = match row.owner {
                    Some(s) => match Uid::parse(&s) {
                        Ok(uid) => Some(uid),
                        Err(_) => {
                            return Outcome::Internal(
                                sqlx::Error::Decode("invalid uid in group_members.uid".into())
                                    .into(),
                            )
                        }
                    },
                    None => None,
                };
                Outcome::Ok(MemberCounts {
                    member_count: row.member_count.unwrap_or(0) as u32,
                    subscriber_count: row.subscriber_count.unwrap_or(0) as u32,
                    owner,
                })
            }
            Err(e) => Outcome::Internal(e.into()),
        }
    }

    async fn insert_pending_member(&self, pending: PendingMember) -> Outcome<()> {
        let result = sqlx::query!(
            r#"INSERT INTO pending_members (gid, uid, inviter, signature, comment, create_time)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (gid, uid) DO NOTHING"#,
            pending.gid.0 as i64,
            pending.uid.as_str(),
            pending.inviter.as_str(),
            pending.signature,
            pending.comment,
            pending.create_time,
        )
        .execute(&self.pool)
        .await;

        match result {
            Ok(res) if res.rows_affected() == 1 => Outcome::Ok(()),
            Ok(_) => Outcome::AlreadyExists,
            Err(e) => Outcome::Internal(e.into()),
        }
    }

    async fn get_pending_member(&self, gid: Gid, uid: &Uid) -> Outcome<PendingMember> {
        struct Row {
            gid: i64,
            uid: String,
            inviter: String,
            signature: Vec<u8>,
            comment: Vec<u8>,
            create_time: chrono::DateTime<chrono::Utc>,
        }
        let row = sqlx::query_as!(
            Row,
            r#"SELECT gid, uid, inviter, signature, comment, create_time
                FROM pending_members WHERE gid = $1 AND uid = $2"#,
            gid.0 as i64,
            uid.as_str(),
        )
        .fetch_optional(&self.pool)
        .await;

        match row {
            Ok(Some(row)) => {
                let (uid, inviter) = match (Uid::parse(&row.uid), Uid::parse(&row.inviter)) {
                    (Ok(u), Ok(i)) => (u, i),
                    _ => {
                        return Outcome::Internal(
                            sqlx::Error::Decode("invalid uid in pending_members".into()).into(),
                        )
                    }
                };
                Outcome::Ok(PendingMember {
                    gid: Gid(row.gid as u64),
                    uid,
                    inviter,
                    signature: row.signature,
                    comment: row.comment,
                    create_time: row.create_time,
                })
            }
            Ok(None) => Outcome::NotFound,
            Err(e) => Outcome::Internal(e.into()),
        }
    }

    async fn delete_pending_member(&self, gid: Gid, uid: &Uid) -> Outcome<()> {
        let result = sqlx::query!(
            "DELETE FROM pending_members WHERE gid = $1 AND uid = $2",
            gid.0 as i64,
            uid.as_str(),
        )
        .execute(&self.pool)
        .await;
        match result {
            Ok(res) if res.rows_affected() == 1 => Outcome::Ok(()),
            Ok(_) => Outcome::NotFound,
            Err(e) => Outcome::Internal(e.into()),
        }
    }

    async fn clear_pending_members(&self, gid: Gid) {
        if let Err(e) = sqlx::query!("DELETE FROM pending_members WHERE gid = $1", gid.0 as i64)
            .execute(&self.pool)
            .await
        {
            tracing::warn!(gid = gid.0, error = %e, "failed to clear pending members");
        }
    }

    async fn insert_qr_code_pending_member(&self, pending: QrCodePendingMember) -> Outcome<()> {
        let result = sqlx::query!(
            r#"INSERT INTO qr_code_pending_members (gid, uid, encrypted_group_info_secret, create_time)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (gid, uid) DO UPDATE SET
                    encrypted_group_info_secret = EXCLUDED.encrypted_group_info_secret,
                    create_time = EXCLUDED.create_time"#,
            pending.gid.0 as i64,
            pending.uid.as_str(),
            pending.encrypted_group_info_secret,
            pending.create_time,
        )
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Outcome::Ok(()),
            Err(e) => Outcome::Internal(e.into()),
        }
    }

    async fn get_qr_code_pending_member(
        &self,
        gid: Gid,
        uid: &Uid,
    ) -> Outcome<QrCodePendingMember> {
        struct Row {
            gid: i64,
            uid: String,
            encrypted_group_info_secret: Vec<u8>,
            create_time: chrono::DateTime<chrono::Utc>,
        }
        let row = sqlx::query_as!(
            Row,
            r#"SELECT gid, uid, encrypted_group_info_secret, create_time
                FROM qr_code_pending_members WHERE gid = $1 AND uid = $2"#,
            gid.0 as i64,
            uid.as_str(),
        )
        .fetch_optional(&self.pool)
        .await;

        match row {
            Ok(Some(row)) => match Uid::parse(&row.uid) {
                Ok(uid) => Outcome::Ok(QrCodePendingMember {
                    gid: Gid(row.gid as u64),
                    uid,
                    encrypted_group_info_secret: row.encrypted_group_info_secret,
                    create_time: row.create_time,
                }),
                Err(_) => Outcome::Internal(
                    sqlx::Error::Decode("invalid uid in qr_code_pending_members".into()).into(),
                ),
            },
            Ok(None) => Outcome::NotFound,
            Err(e) => Outcome::Internal(e.into()),
        }
    }

    async fn delete_qr_code_pending_member(&self, gid: Gid, uid: &Uid) -> Outcome<()> {
        let result = sqlx::query!(
            "DELETE FROM qr_code_pending_members WHERE gid = $1 AND uid = $2",
            gid.0 as i64,
            uid.as_str(),
        )
        .execute(&self.pool)
        .await;
        match result {
            Ok(res) if res.rows_affected() == 1 => Outcome::Ok(()),
            Ok(_) => Outcome::NotFound,
            Err(e) => Outcome::Internal(e.into()),
        }
    }
}

async fn insert_member_row(pool: &PgPool, member: GroupMember) -> Outcome<()> {
    let result = sqlx::query!(
        r#"INSERT INTO group_members (gid, uid, role, encrypted_key, group_info_secret,
            proof, nick, nickname, group_nickname, profile_keys, status, create_time,
            last_ack_mid)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (gid, uid) DO NOTHING"#,
        member.gid.0 as i64,
        member.uid.as_str(),
        member.role as i16,
        member.encrypted_key,
        member.group_info_secret,
        member.proof,
        member.nick,
        member.nickname,
        member.group_nickname,
        member.profile_keys,
        member.status,
        member.create_time,
        member.last_ack_mid,
    )
    .execute(pool)
    .await;

    match result {
        Ok(res) if res.rows_affected() == 1 => Outcome::Ok(()),
        Ok(_) => Outcome::AlreadyExists,
        Err(e) => Outcome::Internal(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(gid: Gid) -> Group {
        Group {
            gid,
            name: vec![],
            icon: vec![],
            intro: vec![],
            version: GroupVersion::V3,
            encrypt_status: 0,
            broadcast: false,
            owner_confirm: false,
            qr_code_setting: vec![],
            share_signature: vec![],
            share_and_owner_confirm_signature: vec![],
            encrypted_group_info_secret: None,
            encrypted_ephemeral_key: None,
            last_mid: 0,
            create_time: chrono::Utc::now(),
            update_time: chrono::Utc::now(),
            extensions: serde_json::json!({}),
        }
    }

    #[sqlx::test]
    async fn second_create_at_same_gid_is_already_exists(pool: PgPool) -> sqlx::Result<()> {
        let store = PgMembershipStore::new(pool);
        let gid = Gid(1);
        assert!(matches!(store.create_group(group(gid)).await, Outcome::Ok(_)));
        assert!(matches!(
            store.create_group(group(gid)).await,
            Outcome::AlreadyExists
        ));
        Ok(())
    }

    #[sqlx::test]
    async fn get_group_reports_not_found_for_unknown_gid(pool: PgPool) -> sqlx::Result<()> {
        let store = PgMembershipStore::new(pool);
        assert!(matches!(store.get_group(Gid(404)).await, Outcome::NotFound));
        Ok(())
    }
}
