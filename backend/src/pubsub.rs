// SPDX-FileCopyrightText: 2026 Glass Relay Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Fire-and-forget notification channel. [`PubSubBus`] also exposes the
//! online-members view [`CandidateSelector`](crate::candidate_selector)
//! reads to pick a key-rotation quorum — the raw pub/sub wire transport
//! itself is assumed to live behind this trait.
//!
//! A typed send reports how many subscribers received the message, or that
//! it failed — retries are the caller's responsibility (see
//! [`crate::retry`]), not the transport's.

use async_trait::async_trait;
use glkdc_common::identifiers::{Address, Gid, Uid};
use serde::Serialize;

/// `group_event_msg` is the literal, active channel name for persisted group
/// system messages.
pub const GROUP_EVENT_CHANNEL: &str = "group_event_msg";

pub fn user_channel(uid: &Uid) -> String {
    format!("user_{uid}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    UserEnterGroup,
    UserQuitGroup,
    UserMuteGroup,
    UserUnmuteGroup,
    UserChangeRole,
    GroupInfoUpdate,
    GroupMemberUpdate,
    GroupSwitchKeys,
    GroupUpdateKeysRequest,
    GroupKeyRefresh,
    GroupJoinReview,
}

#[derive(Debug)]
pub enum PublishResult {
    Sent(usize),
    Failed(String),
}

impl PublishResult {
    pub fn is_sent(&self) -> bool {
        matches!(self, PublishResult::Sent(_))
    }
}

#[async_trait]
pub trait PubSubBus: Send + Sync {
    async fn publish_to_user(
        &self,
        uid: &Uid,
        kind: MessageKind,
        payload: serde_json::Value,
    ) -> PublishResult;

    async fn publish_group_event(
        &self,
        gid: Gid,
        kind: MessageKind,
        payload: serde_json::Value,
    ) -> PublishResult;

    /// Currently-online master-device members of `gid`, as seen by the
    /// pub/sub presence layer. Feeds [`crate::candidate_selector::select`].
    async fn online_master_members(&self, gid: Gid) -> Vec<Address>;
}

pub mod memory {
    use std::collections::HashMap;

    use tokio::sync::RwLock;

    use super::*;

    #[derive(Debug, Clone)]
    pub struct PublishedMessage {
        pub channel: String,
        pub kind: MessageKind,
        pub payload: serde_json::Value,
    }

    #[derive(Default)]
    pub struct InMemoryPubSubBus {
        published: RwLock<Vec<PublishedMessage>>,
        online: RwLock<HashMap<Gid, Vec<Address>>>,
    }

    impl InMemoryPubSubBus {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn set_online(&self, gid: Gid, members: Vec<Address>) {
            self.online.write().await.insert(gid, members);
        }

        pub async fn published(&self) -> Vec<PublishedMessage> {
            self.published.read().await.clone()
        }

        pub async fn published_of_kind(&self, kind: MessageKind) -> Vec<PublishedMessage> {
            self.published
                .read()
                .await
                .iter()
                .filter(|m| m.kind == kind)
                .cloned()
                .collect()
        }
    }

    #[async_trait]
    impl PubSubBus for InMemoryPubSubBus {
        async fn publish_to_user(
            &self,
            uid: &Uid,
            kind: MessageKind,
            payload: serde_json::Value,
        ) -> PublishResult {
            self.published.write().await.push(PublishedMessage {
                channel: user_channel(uid),
                kind,
                payload,
            });
            PublishResult::Sent(1)
        }

        async fn publish_group_event(
            &self,
            _gid: Gid,
            kind: MessageKind,
            payload: serde_json::Value,
        ) -> PublishResult {
            self.published.write().await.push(PublishedMessage {
                channel: GROUP_EVENT_CHANNEL.to_string(),
                kind,
                payload,
            });
            PublishResult::Sent(1)
        }

        async fn online_master_members(&self, gid: Gid) -> Vec<Address> {
            self.online.read().await.get(&gid).cloned().unwrap_or_default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::InMemoryPubSubBus;
    use super::*;

    #[tokio::test]
    async fn publishes_are_recorded_under_the_group_event_channel() {
        let bus = InMemoryPubSubBus::new();
        bus.publish_group_event(Gid(1), MessageKind::GroupMemberUpdate, serde_json::json!({}))
            .await;
        let published = bus.published().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].channel, GROUP_EVENT_CHANNEL);
    }
}
