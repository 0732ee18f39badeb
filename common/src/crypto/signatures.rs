// SPDX-FileCopyrightText: 2026 Glass Relay Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Type-enforced signature verification.
//!
//! Following the same split the wider protocol uses elsewhere: a caller
//! builds the to-be-signed bytes of some [`Signable`] payload, the server
//! [`verify`]s a wire [`Signature`] against a [`VerifyingKey`], and only
//! success produces a [`Verified<T>`] — so a handler can never act on data
//! whose signature it forgot to check, because `T` and `Verified<T>` are
//! distinct types.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use ed25519_dalek::Verifier;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Anything the server must verify a signature over before trusting it.
/// Implementors define the exact byte encoding that was signed; the server
/// never re-derives it from partially-trusted fields.
pub trait Signable {
    fn signable_bytes(&self) -> Vec<u8>;
}

/// Wraps a payload that has passed signature verification. Only
/// [`verify`]/[`verify_concat`] can construct one.
#[derive(Clone, Debug)]
pub struct Verified<T>(T);

impl<T> Verified<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> std::ops::Deref for Verified<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.0
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("malformed base64 signature encoding")]
    Malformed,
    #[error("malformed base64 public key encoding")]
    MalformedKey,
    #[error("signature verification failed")]
    VerificationFailed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifyingKey(ed25519_dalek::VerifyingKey);

impl VerifyingKey {
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, SignatureError> {
        ed25519_dalek::VerifyingKey::from_bytes(bytes)
            .map(Self)
            .map_err(|_| SignatureError::MalformedKey)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }
}

impl Serialize for VerifyingKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        STANDARD.encode(self.0.to_bytes()).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for VerifyingKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let bytes = STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("public key must be 32 bytes"))?;
        Self::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}

/// A base64-encoded Ed25519 signature, as carried on the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature(ed25519_dalek::Signature);

impl Signature {
    pub fn from_base64(encoded: &str) -> Result<Self, SignatureError> {
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|_| SignatureError::Malformed)?;
        let bytes: [u8; 64] = bytes.try_into().map_err(|_| SignatureError::Malformed)?;
        Ok(Self(ed25519_dalek::Signature::from_bytes(&bytes)))
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0.to_bytes())
    }

    /// Raw 64-byte encoding, for components that persist signatures as
    /// opaque columns rather than base64 text (e.g. `groups.share_signature`).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SignatureError> {
        let bytes: [u8; 64] = bytes.try_into().map_err(|_| SignatureError::Malformed)?;
        Ok(Self(ed25519_dalek::Signature::from_bytes(&bytes)))
    }

    pub fn to_bytes(&self) -> [u8; 64] {
        self.0.to_bytes()
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_base64().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        Self::from_base64(&encoded).map_err(serde::de::Error::custom)
    }
}

/// Verify `signature` over `payload.signable_bytes()` under `key`, producing
/// a [`Verified`] wrapper on success.
pub fn verify<T: Signable>(
    key: &VerifyingKey,
    payload: T,
    signature: &Signature,
) -> Result<Verified<T>, SignatureError> {
    let bytes = payload.signable_bytes();
    key.0
        .verify(&bytes, &signature.0)
        .map_err(|_| SignatureError::VerificationFailed)?;
    Ok(Verified(payload))
}

/// Variant of [`verify`] for payloads whose to-be-signed bytes are the
/// concatenation of two separately-available byte strings (used for
/// `qrCodeSetting ∥ ownerConfirm`).
pub fn verify_concat<T>(
    key: &VerifyingKey,
    payload: T,
    extra: &[u8],
    first_bytes: impl FnOnce(&T) -> Vec<u8>,
    signature: &Signature,
) -> Result<Verified<T>, SignatureError> {
    let mut bytes = first_bytes(&payload);
    bytes.extend_from_slice(extra);
    key.0
        .verify(&bytes, &signature.0)
        .map_err(|_| SignatureError::VerificationFailed)?;
    Ok(Verified(payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};
    use rand::rngs::OsRng;

    struct Intent {
        nonce: Vec<u8>,
    }

    impl Signable for Intent {
        fn signable_bytes(&self) -> Vec<u8> {
            self.nonce.clone()
        }
    }

    #[test]
    fn verifies_a_correctly_signed_payload() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifying_key = VerifyingKey(signing_key.verifying_key());

        let intent = Intent {
            nonce: b"join-intent-123".to_vec(),
        };
        let sig = Signature(signing_key.sign(&intent.signable_bytes()));

        let verified = verify(&verifying_key, intent, &sig).unwrap();
        assert_eq!(verified.into_inner().nonce, b"join-intent-123");
    }

    #[test]
    fn rejects_a_tampered_payload() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifying_key = VerifyingKey(signing_key.verifying_key());

        let original = Intent {
            nonce: b"join-intent-123".to_vec(),
        };
        let sig = Signature(signing_key.sign(&original.signable_bytes()));

        let tampered = Intent {
            nonce: b"join-intent-124".to_vec(),
        };
        assert_eq!(
            verify(&verifying_key, tampered, &sig).unwrap_err(),
            SignatureError::VerificationFailed
        );
    }
}
