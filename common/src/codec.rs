// SPDX-FileCopyrightText: 2026 Glass Relay Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Length-prefixed framing used by [`KeyCache`](../../glkdc_backend/keys/cache)
//! to serialize a list of opaque key bundles into a single blob, and back.
//!
//! Frame shape: a 4-byte little-endian length, followed by that many bytes
//! of bundle payload, repeated for each bundle.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FramingError {
    #[error("truncated length prefix")]
    TruncatedLength,
    #[error("truncated frame body: expected {expected} bytes, found {found}")]
    TruncatedBody { expected: usize, found: usize },
}

pub fn encode_frames<I, T>(bundles: I) -> Vec<u8>
where
    I: IntoIterator<Item = T>,
    T: AsRef<[u8]>,
{
    let mut out = Vec::new();
    for bundle in bundles {
        let bytes = bundle.as_ref();
        out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        out.extend_from_slice(bytes);
    }
    out
}

pub fn decode_frames(mut data: &[u8]) -> Result<Vec<Vec<u8>>, FramingError> {
    let mut frames = Vec::new();
    while !data.is_empty() {
        if data.len() < 4 {
            return Err(FramingError::TruncatedLength);
        }
        let (len_bytes, rest) = data.split_at(4);
        let len = u32::from_le_bytes(len_bytes.try_into().unwrap()) as usize;
        if rest.len() < len {
            return Err(FramingError::TruncatedBody {
                expected: len,
                found: rest.len(),
            });
        }
        let (frame, rest) = rest.split_at(len);
        frames.push(frame.to_vec());
        data = rest;
    }
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_multiple_bundles() {
        let bundles: Vec<Vec<u8>> = vec![b"alpha".to_vec(), b"".to_vec(), b"gamma-bundle".to_vec()];
        let framed = encode_frames(bundles.clone());
        let decoded = decode_frames(&framed).unwrap();
        assert_eq!(bundles, decoded);
    }

    #[test]
    fn rejects_truncated_body() {
        let mut framed = encode_frames(vec![b"hello".to_vec()]);
        framed.truncate(framed.len() - 2);
        assert!(matches!(
            decode_frames(&framed),
            Err(FramingError::TruncatedBody { .. })
        ));
    }
}
