//! Caller identity.
//!
//! Authentication happens upstream; the gateway forwards the authenticated
//! user in the `X-User-Id` header. Handlers extract it with [`CurrentUser`].

use axum::{extract::FromRequestParts, http::request::Parts};

use crate::errors::AppError;

/// Header carrying the authenticated user id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// The authenticated caller of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser(pub String);

impl CurrentUser {
    pub fn id(&self) -> &str {
        &self.0
    }
}

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| CurrentUser(v.to_string()))
            .ok_or_else(|| AppError::Validation(format!("missing {} header", USER_ID_HEADER)))
    }
}
