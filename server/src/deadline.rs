// SPDX-FileCopyrightText: 2026 Glass Relay Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Per-request cancellation at the edge: a `tokio::time::timeout` wraps each
//! request handler rather than being threaded through every collaborator
//! call individually.

use std::future::Future;
use std::time::Duration;

use glkdc_backend::errors::GlkdcError;

use crate::errors::ApiError;

pub async fn enforce<F, T>(deadline: Duration, fut: F) -> Result<T, ApiError>
where
    F: Future<Output = Result<T, GlkdcError>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(ApiError::Timeout),
    }
}
