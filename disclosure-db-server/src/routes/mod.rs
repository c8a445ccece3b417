//! HTTP route handlers. Thin: decode, call the api crate, map errors.

pub mod admin;
pub mod revisions;
pub mod search;
pub mod submissions;

use axum::http::HeaderMap;

/// The acting user, from the `x-user-id` header. Authentication itself is
/// an external collaborator; this server only threads the identity through
/// to ownership and edit-lock checks.
pub fn current_user(headers: &HeaderMap) -> i64 {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}
