// SPDX-FileCopyrightText: 2026 Glass Relay Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

pub mod signatures;

pub use signatures::{Signature, SignatureError, Verified, VerifyingKey};
