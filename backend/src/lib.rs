// SPDX-FileCopyrightText: 2026 Glass Relay Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

#![deny(unreachable_pub)]

//! The group lifecycle and key-distribution core (GLKDC).
//!
//! This crate implements the server-side state machine for group creation,
//! membership changes and key-epoch rotation. It
//! is transport-agnostic: the `server` crate binds [`group_controller::GroupController`]
//! to an HTTP surface, but everything here is plain async Rust driven by
//! collaborator traits (`MembershipStore`, `KeyVersionStore`, `PubSubBus`, ...).

pub mod candidate_selector;
pub mod errors;
pub mod external;
pub mod fault_injector;
pub mod group_controller;
pub mod infra_service;
pub mod key_epoch_coordinator;
pub mod keys;
pub mod membership;
pub mod membership_fsm;
pub mod pubsub;
pub mod rate_limiter;
pub mod retry;
pub mod settings;

pub use errors::{GlkdcError, StorageError};
