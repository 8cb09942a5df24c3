//! Shared response envelope types for API handlers.
//!
//! All success responses use a `{ "data": ... }` envelope; errors use the
//! `{ "error": ..., "code": ... }` envelope produced by
//! [`crate::error::AppError`].

use serde::Serialize;

/// Standard `{ "data": T }` response envelope.
#[derive(Debug, Serialize)]
pub struct DataResponse<T: Serialize> {
    pub data: T,
}
