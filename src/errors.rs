//! Typed errors for the relay's external boundaries.
//!
//! The vendor call is the only fallible outbound edge; storage failures use
//! `anyhow` with context (see `store`), and HTTP response mapping lives in
//! `api::ApiError`.

use thiserror::Error;

/// Failure creating a verification session at the vendor.
///
/// `Api` means the vendor answered but signaled failure (non-2xx, or the
/// session URL was missing from a 2xx body); the raw payload is kept for
/// diagnostics and surfaced to the caller. `Transport` means the request
/// never completed (network error or timeout) and is surfaced only as a
/// generic internal error. No variant triggers a retry.
#[derive(Debug, Error)]
pub enum VendorError {
    #[error("Vendor rejected session creation (HTTP {status})")]
    Api {
        status: u16,
        body: serde_json::Value,
    },

    #[error("Vendor request failed: {0}")]
    Transport(#[from] reqwest::Error),
}
