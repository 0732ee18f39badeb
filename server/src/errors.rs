// SPDX-FileCopyrightText: 2026 Glass Relay Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Maps [`GlkdcError`] onto HTTP status codes and the `{error_code,
//! error_msg, result}` envelope. `GlkdcError` itself stays
//! transport-agnostic in `glkdc_backend`; this is the one place that knows
//! about `actix_web`, keeping per-module `Error` enums separate from their
//! `ResponseError`/`tonic::Status` conversions.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use glkdc_backend::errors::GlkdcError;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Domain(#[from] GlkdcError),
    /// The request's deadline (`application.request_deadline_seconds`)
    /// elapsed before the handler finished, per the concurrency model's
    /// `tokio::time::timeout`-at-the-edge cancellation policy.
    #[error("request deadline exceeded")]
    Timeout,
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::Domain(GlkdcError::BadRequest(msg.into()))
    }

    fn error_code(&self) -> u32 {
        match self {
            ApiError::Domain(e) => e.error_code(),
            ApiError::Timeout => 500,
        }
    }
}

#[derive(Serialize)]
struct ErrorEnvelope {
    error_code: u32,
    error_msg: String,
    result: Option<()>,
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.error_code() as u16).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorEnvelope {
            error_code: self.error_code(),
            error_msg: self.to_string(),
            result: None,
        })
    }
}
