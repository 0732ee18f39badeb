// SPDX-FileCopyrightText: 2026 Glass Relay Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Named interfaces for collaborators that live outside this crate:
//! account storage/authentication, contact-token bloom filters, and the
//! identity/onetime-key bundles an external account service hands out for
//! DH-key exchange. This crate declares the traits and test fakes; a real
//! implementation lives outside GLKDC.

use async_trait::async_trait;
use glkdc_common::crypto::signatures::VerifyingKey;
use glkdc_common::identifiers::{DeviceId, Uid};

/// One (uid, device) identity/onetime-key bundle, as handed out by the
/// account service for X3DH-style prekey exchange. GLKDC stores and relays
/// these opaquely; it never interprets the bundle contents.
#[derive(Debug, Clone)]
pub struct KeyBundleEntry {
    pub uid: Uid,
    pub device_id: DeviceId,
    pub bundle: Vec<u8>,
}

#[async_trait]
pub trait AccountKeyProvider: Send + Sync {
    /// Fetches the current identity/onetime-key bundle for each `uid`'s
    /// devices. Missing accounts are simply absent from the result.
    async fn fetch_identity_bundles(&self, uids: &[Uid]) -> Vec<KeyBundleEntry>;

    /// The account's long-lived Ed25519 identity public key, used by the
    /// membership state machine to verify `shareSignature`/
    /// `shareAndOwnerConfirmSignature`. `None` if the account is unknown.
    async fn identity_public_key(&self, uid: &Uid) -> Option<VerifyingKey>;
}

/// Contact-token bloom filter check: reports whether
/// `a` and `b` are mutual contacts, used to gate `createGroup`/`invite`.
#[async_trait]
pub trait ContactMutualityChecker: Send + Sync {
    async fn mutual(&self, a: &Uid, b: &Uid) -> bool;
}

pub mod fakes {
    use super::*;

    /// Treats every pair as mutual contacts; for tests that do not exercise
    /// the disclosure-avoidance path.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct AlwaysMutual;

    #[async_trait]
    impl ContactMutualityChecker for AlwaysMutual {
        async fn mutual(&self, _a: &Uid, _b: &Uid) -> bool {
            true
        }
    }

    #[derive(Debug, Default, Clone, Copy)]
    pub struct NeverMutual;

    #[async_trait]
    impl ContactMutualityChecker for NeverMutual {
        async fn mutual(&self, _a: &Uid, _b: &Uid) -> bool {
            false
        }
    }

    /// Fixed set of bundles, for tests of `KeyEpochCoordinator::prepare`'s
    /// `ONE_FOR_EACH` cache pre-fill path.
    #[derive(Debug, Default)]
    pub struct InMemoryAccountKeyProvider {
        pub bundles: Vec<KeyBundleEntry>,
        pub identity_keys: std::collections::HashMap<Uid, VerifyingKey>,
    }

    #[async_trait]
    impl AccountKeyProvider for InMemoryAccountKeyProvider {
        async fn fetch_identity_bundles(&self, uids: &[Uid]) -> Vec<KeyBundleEntry> {
            self.bundles
                .iter()
                .filter(|b| uids.contains(&b.uid))
                .cloned()
                .collect()
        }

        async fn identity_public_key(&self, uid: &Uid) -> Option<VerifyingKey> {
            self.identity_keys.get(uid).cloned()
        }
    }
}
