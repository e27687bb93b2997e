//! Outbound client for the vendor's verification-session API.
//!
//! One integration mode is supported: the station API host, with the
//! correlation token carried in `verification.vendorData`. The vendor echoes
//! that token back in its webhook, which is how the callback ingestor finds
//! the record. At most one vendor call is made per session-creation request;
//! there are no retries and no fallback hosts.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;

use crate::errors::VendorError;

pub const DEFAULT_SESSIONS_URL: &str = "https://stationapi.veriff.com/v1/sessions";

/// Outbound requests must complete or fail within this window.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const AUTH_HEADER: &str = "X-AUTH-CLIENT";

/// A successfully created vendor session.
#[derive(Debug, Clone)]
pub struct VendorSession {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Serialize)]
struct SessionRequest<'a> {
    verification: VerificationRequest<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VerificationRequest<'a> {
    vendor_data: &'a str,
    person: Person<'a>,
    document: Document<'a>,
    callback: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Person<'a> {
    first_name: &'a str,
    last_name: &'a str,
}

#[derive(Debug, Serialize)]
struct Document<'a> {
    #[serde(rename = "type")]
    doc_type: &'a str,
}

impl<'a> SessionRequest<'a> {
    fn for_correlation(correlation_id: &'a str, callback_url: &'a str) -> Self {
        Self {
            verification: VerificationRequest {
                vendor_data: correlation_id,
                person: Person {
                    first_name: "Client",
                    last_name: "Onboarding",
                },
                document: Document { doc_type: "ID_CARD" },
                callback: callback_url,
            },
        }
    }
}

/// Client for the vendor session-creation endpoint.
///
/// The underlying `reqwest::Client` is built once with a bounded timeout and
/// cloned cheaply into handlers.
#[derive(Clone)]
pub struct VendorClient {
    http: reqwest::Client,
    sessions_url: String,
    api_key: String,
    callback_url: String,
}

impl VendorClient {
    pub fn new(
        api_key: String,
        callback_url: String,
        sessions_url: String,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build vendor HTTP client")?;
        Ok(Self {
            http,
            sessions_url,
            api_key,
            callback_url,
        })
    }

    /// Create a verification session for a correlation id.
    ///
    /// Success requires a 2xx response carrying `verification.id` and
    /// `verification.url`; anything else the vendor answers with becomes
    /// `VendorError::Api` with the raw payload attached.
    pub async fn create_session(&self, correlation_id: &str) -> Result<VendorSession, VendorError> {
        let request = SessionRequest::for_correlation(correlation_id, &self.callback_url);
        let response = self
            .http
            .post(&self.sessions_url)
            .header(AUTH_HEADER, &self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let payload: Value = response.json().await?;

        if status.is_success() {
            if let Some(session) = extract_session(&payload) {
                return Ok(session);
            }
        }
        Err(VendorError::Api {
            status: status.as_u16(),
            body: payload,
        })
    }
}

/// Pull `verification.id` and `verification.url` out of a vendor response.
/// Returns `None` when either is absent, which callers treat as a
/// vendor-reported failure.
fn extract_session(payload: &Value) -> Option<VendorSession> {
    let verification = payload.get("verification")?;
    let id = verification.get("id")?.as_str()?;
    let url = verification.get("url")?.as_str()?;
    Some(VendorSession {
        id: id.to_string(),
        url: url.to_string(),
    })
}
