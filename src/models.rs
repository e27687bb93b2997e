use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a client verification record.
///
/// The only reachable transition is `Pending -> Verified`, driven by an
/// approved vendor callback. `Verified` is terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Pending,
    Verified,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Verified => "verified",
        }
    }
}

impl FromStr for VerificationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "verified" => Ok(Self::Verified),
            _ => Err(format!("Invalid status: {}", s)),
        }
    }
}

/// A stored client verification record.
///
/// `correlation_id` is the external key: it is carried into the vendor
/// session request as `vendorData` and echoed back in the webhook, which is
/// how an asynchronous callback finds its record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientRecord {
    pub id: i64,
    pub correlation_id: String,
    pub full_name: String,
    pub email: String,
    pub company: String,
    pub website: String,
    pub project_type: String,
    pub description: String,
    pub status: VerificationStatus,
    pub vendor_session_id: Option<String>,
    pub created_at: String,
    pub verified_at: Option<String>,
    pub client_ip: Option<String>,
    pub client_timezone: Option<String>,
    pub client_user_agent: Option<String>,
}

/// Payload for inserting a new client record. Status starts at `pending`;
/// `vendor_session_id` and `verified_at` are set later by their own updates.
#[derive(Debug, Clone)]
pub struct NewClient {
    pub correlation_id: String,
    pub full_name: String,
    pub email: String,
    pub company: String,
    pub website: String,
    pub project_type: String,
    pub description: String,
    pub created_at: String,
    pub client_ip: Option<String>,
    pub client_timezone: Option<String>,
    pub client_user_agent: Option<String>,
}

/// Filter for the operator listing. Both fields are optional; `search`
/// matches as a case-insensitive substring (SQLite `LIKE`) against the
/// correlation id, full name, email, and company columns.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub status: Option<VerificationStatus>,
    pub search: Option<String>,
}
