// SPDX-FileCopyrightText: 2026 Glass Relay Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The authentication collaborator interface: every handler
//! needs a `CallerIdentity`, but verifying it is account/auth-service work
//! that is explicitly out of scope for this crate. `AuthenticatedCaller` is
//! the trait boundary; this crate supplies only [`fakes::HeaderTrustingCaller`]
//! for tests and local development, keeping storage and the auth service on
//! opposite sides of a collaborator trait.

use std::future::{ready, Ready};

use actix_web::{dev::Payload, web, FromRequest, HttpRequest};
use glkdc_common::identifiers::Uid;

use crate::errors::ApiError;

#[derive(Debug, Clone)]
pub struct CallerIdentity {
    pub uid: Uid,
}

/// Verifies whatever credential the transport carried and resolves it to a
/// [`CallerIdentity`]. Implemented outside this crate in production; see
/// [`fakes::HeaderTrustingCaller`] for the stand-in used by tests and local
/// runs.
pub trait AuthenticatedCaller: Send + Sync {
    fn authenticate(&self, req: &HttpRequest) -> Result<CallerIdentity, ApiError>;
}

impl FromRequest for CallerIdentity {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let outcome = req
            .app_data::<web::Data<dyn AuthenticatedCaller>>()
            .expect("AuthenticatedCaller must be registered as app_data")
            .authenticate(req);
        ready(outcome)
    }
}

pub mod fakes {
    use super::*;

    /// Trusts the `x-glkdc-uid` header verbatim. Never wired into a real
    /// deployment — stands in for the account service's own extractor in
    /// tests and local `cargo run`.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct HeaderTrustingCaller;

    impl AuthenticatedCaller for HeaderTrustingCaller {
        fn authenticate(&self, req: &HttpRequest) -> Result<CallerIdentity, ApiError> {
            let header = req
                .headers()
                .get("x-glkdc-uid")
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| ApiError::bad_request("missing x-glkdc-uid header"))?;
            let uid = Uid::parse(header)
                .map_err(|_| ApiError::bad_request("malformed x-glkdc-uid header"))?;
            Ok(CallerIdentity { uid })
        }
    }
}
