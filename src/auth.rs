//! Basic-auth challenge guarding the operator surface.

use axum::{
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::api::SharedState;

const CHALLENGE: &str = "Basic realm=\"kyc-relay-admin\"";

/// Operator credentials checked by [`require_basic_auth`].
#[derive(Debug, Clone)]
pub struct AdminCredentials {
    pub user: String,
    pub pass: String,
}

/// Middleware for admin routes. Unauthenticated or mismatched requests get a
/// 401 with a `WWW-Authenticate` challenge so browsers prompt for credentials.
pub async fn require_basic_auth(
    State(state): State<SharedState>,
    request: Request,
    next: Next,
) -> Response {
    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| credentials_match(value, &state.admin));

    if authorized {
        next.run(request).await
    } else {
        (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, CHALLENGE)],
            "Authentication required",
        )
            .into_response()
    }
}

/// Check an `Authorization` header value against the configured credentials.
fn credentials_match(header_value: &str, creds: &AdminCredentials) -> bool {
    let Some(encoded) = header_value.strip_prefix("Basic ") else {
        return false;
    };
    let Ok(decoded) = BASE64.decode(encoded.trim()) else {
        return false;
    };
    let Ok(decoded) = String::from_utf8(decoded) else {
        return false;
    };
    match decoded.split_once(':') {
        Some((user, pass)) => user == creds.user && pass == creds.pass,
        None => false,
    }
}

/// Encode a `Basic` authorization header value (used by tests and tooling).
pub fn basic_auth_header(user: &str, pass: &str) -> String {
    format!("Basic {}", BASE64.encode(format!("{}:{}", user, pass)))
}
