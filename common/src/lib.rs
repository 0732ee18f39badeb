// SPDX-FileCopyrightText: 2026 Glass Relay Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

#![deny(unreachable_pub)]

//! Identifiers, wire codecs and crypto primitives shared between the
//! group-lifecycle backend and its HTTP front door.

pub mod codec;
pub mod crypto;
pub mod identifiers;
pub mod time;
