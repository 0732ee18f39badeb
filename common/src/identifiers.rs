// SPDX-FileCopyrightText: 2026 Glass Relay Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::fmt;

use ripemd::Ripemd160;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A group identifier. Opaque 64-bit value minted by the server on creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Gid(pub u64);

impl fmt::Display for Gid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A per-group, per-user device identifier. Stable for the lifetime of the
/// installation; distinguishes master devices (the ones eligible for
/// [`crate::identifiers::DeviceKind::Master`] quorum duty) from linked ones.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    Master,
    Linked,
}

/// A user identifier: base58check encoding of a version byte followed by the
/// hash160 (`RIPEMD160(SHA256(pubkey))`) of the account's public key.
///
/// Mirrors the on-chain-style address encoding used by the account service;
/// GLKDC never derives this itself (account identity is out of scope) but
/// needs to parse, compare and persist it as an opaque, validated string.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Uid(String);

const UID_VERSION_BYTE: u8 = 0;

#[derive(Debug, thiserror::Error)]
pub enum UidError {
    #[error("uid is not valid base58check")]
    InvalidEncoding,
    #[error("uid checksum mismatch")]
    BadChecksum,
    #[error("uid has unexpected version byte {0}")]
    BadVersion(u8),
}

impl Uid {
    /// Derive the canonical uid for an account's Ed25519 public key.
    pub fn from_public_key(public_key: &[u8]) -> Self {
        let sha = Sha256::digest(public_key);
        let hash160 = Ripemd160::digest(sha);
        Self::from_payload(&hash160)
    }

    fn from_payload(payload: &[u8]) -> Self {
        let mut versioned = Vec::with_capacity(1 + payload.len() + 4);
        versioned.push(UID_VERSION_BYTE);
        versioned.extend_from_slice(payload);
        let checksum = double_sha256(&versioned);
        versioned.extend_from_slice(&checksum[..4]);
        Self(bs58::encode(versioned).into_string())
    }

    pub fn parse(s: &str) -> Result<Self, UidError> {
        let decoded = bs58::decode(s)
            .into_vec()
            .map_err(|_| UidError::InvalidEncoding)?;
        if decoded.len() < 5 {
            return Err(UidError::InvalidEncoding);
        }
        let (body, checksum) = decoded.split_at(decoded.len() - 4);
        if &double_sha256(body)[..4] != checksum {
            return Err(UidError::BadChecksum);
        }
        if body[0] != UID_VERSION_BYTE {
            return Err(UidError::BadVersion(body[0]));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Uid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn double_sha256(data: &[u8]) -> [u8; 32] {
    let once = Sha256::digest(data);
    Sha256::digest(once).into()
}

/// A routable (uid, device) pair as seen by the pub/sub presence view; used
/// by the candidate selector to pick a key-rotation quorum.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    pub uid: Uid,
    pub device_id: DeviceId,
    pub kind: DeviceKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_base58check() {
        let uid = Uid::from_public_key(b"some ed25519 public key bytes...");
        let parsed = Uid::parse(uid.as_str()).unwrap();
        assert_eq!(uid, parsed);
    }

    #[test]
    fn rejects_flipped_checksum() {
        let uid = Uid::from_public_key(b"another public key");
        let mut s = uid.as_str().to_string();
        s.push('1');
        assert!(Uid::parse(&s).is_err());
    }
}
