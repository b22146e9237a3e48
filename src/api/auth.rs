//! Caller identity at the HTTP boundary.
//!
//! Authentication proper happens upstream: whatever authenticates the
//! request stores the caller's [`UserId`] as a request extension, and
//! [`AuthenticatedUser`] reads it back. [`attach_identity`] is the
//! standalone stand-in for that layer. It trusts an `X-User-Id` header or
//! a `user_id` query parameter, the latter because browsers cannot set
//! headers on a WebSocket upgrade.

use axum::extract::{FromRequestParts, Query, Request};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;
use serde::Deserialize;

use crate::domain::UserId;
use crate::error::ApiError;

/// Header carrying the caller's user id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// The authenticated caller. Rejects with `401` before any upgrade or
/// stream is set up when no identity is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser(pub UserId);

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<UserId>()
            .copied()
            .map(Self)
            .ok_or(ApiError::Unauthorized)
    }
}

#[derive(Debug, Deserialize)]
struct IdentityQuery {
    user_id: Option<String>,
}

/// Middleware that attaches a [`UserId`] extension taken from the
/// `X-User-Id` header, falling back to the `user_id` query parameter.
///
/// Missing, unparseable and nil ids attach nothing; the extractor then
/// rejects the request.
pub async fn attach_identity(mut req: Request, next: Next) -> Response {
    if let Some(user_id) = identity_of(&req) {
        req.extensions_mut().insert(user_id);
    }
    next.run(req).await
}

fn identity_of(req: &Request) -> Option<UserId> {
    let from_header = req
        .headers()
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);
    let raw = from_header.or_else(|| {
        Query::<IdentityQuery>::try_from_uri(req.uri())
            .ok()
            .and_then(|Query(query)| query.user_id)
    })?;

    match raw.parse::<UserId>() {
        Ok(user_id) if !user_id.is_nil() => Some(user_id),
        Ok(_) => None,
        Err(e) => {
            tracing::debug!(error = %e, "ignoring malformed user id");
            None
        }
    }
}
