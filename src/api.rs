use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
};
use chrono::{SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::auth::{AdminCredentials, require_basic_auth};
use crate::errors::VendorError;
use crate::models::{NewClient, RecordFilter, VerificationStatus};
use crate::store::DbHandle;
use crate::vendor::VendorClient;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub vendor: VendorClient,
    pub front_end_url: String,
    pub admin: AdminCredentials,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateClientRequest {
    #[serde(default)]
    pub correlation_id: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub website: String,
    #[serde(default)]
    pub project_type: String,
    #[serde(default)]
    pub description: String,
    /// Client-supplied creation time; server time is used when absent.
    #[serde(default)]
    pub timestamp_iso: Option<String>,
    #[serde(default)]
    pub client_ip: Option<String>,
    #[serde(default)]
    pub client_timezone: Option<String>,
    #[serde(default)]
    pub client_user_agent: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub correlation_id: String,
}

#[derive(Deserialize)]
pub struct AdminListQuery {
    pub status: Option<String>,
    pub q: Option<String>,
}

#[derive(Deserialize)]
pub struct RedirectQuery {
    pub client_id: Option<String>,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    /// Vendor answered but signaled failure; its raw payload is surfaced
    /// under `details` for diagnostics.
    VendorRejected(Value),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": msg})),
            )
                .into_response(),
            ApiError::VendorRejected(details) => (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": "Vendor API error", "details": details})),
            )
                .into_response(),
            ApiError::Internal(msg) => {
                error!("internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({"error": "Internal server error"})),
                )
                    .into_response()
            }
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router(state: SharedState) -> Router<SharedState> {
    let admin_routes = Router::new()
        .route("/api/admin/clients", get(list_admin_clients))
        .route_layer(middleware::from_fn_with_state(state, require_basic_auth));

    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/api/clients", post(create_client))
        .route("/api/create-session", post(create_session))
        .route("/callback", post(vendor_callback).get(verification_redirect))
        .merge(admin_routes)
}

// ── Helpers ───────────────────────────────────────────────────────────

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Read a callback field permissively. Vendor payload shape varies by
/// integration mode, so the precedence is: top-level field first, then the
/// same field nested under `verification`.
fn callback_field<'a>(payload: &'a Value, key: &str) -> Option<&'a str> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .or_else(|| {
            payload
                .get("verification")
                .and_then(|v| v.get(key))
                .and_then(Value::as_str)
        })
}

/// Build the post-verification browser redirect: the configured front-end
/// URL with a `kyc=done` marker and the client id appended.
fn redirect_target(front_end_url: &str, client_id: Option<&str>) -> Result<String, ApiError> {
    let mut url = reqwest::Url::parse(front_end_url)
        .map_err(|e| ApiError::Internal(format!("Invalid front-end URL: {}", e)))?;
    url.query_pairs_mut().append_pair("kyc", "done");
    if let Some(id) = client_id.filter(|id| !id.is_empty()) {
        url.query_pairs_mut().append_pair("client_id", id);
    }
    Ok(url.to_string())
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn root() -> &'static str {
    "kyc-relay: verification API live"
}

async fn health_check() -> &'static str {
    "ok"
}

/// `POST /api/clients` - persist a pending client record. Duplicate
/// correlation ids are absorbed silently; the caller always sees success.
async fn create_client(
    State(state): State<SharedState>,
    Json(req): Json<CreateClientRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.correlation_id.is_empty() || req.full_name.is_empty() || req.email.is_empty() {
        return Err(ApiError::BadRequest("Missing required fields".to_string()));
    }

    let client = NewClient {
        correlation_id: req.correlation_id,
        full_name: req.full_name,
        email: req.email,
        company: req.company,
        website: req.website,
        project_type: req.project_type,
        description: req.description,
        created_at: req.timestamp_iso.unwrap_or_else(now_iso),
        client_ip: req.client_ip,
        client_timezone: req.client_timezone,
        client_user_agent: req.client_user_agent,
    };

    let correlation_id = client.correlation_id.clone();
    let inserted = state
        .db
        .call(move |store| store.upsert_if_absent(&client))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    if inserted {
        info!(%correlation_id, "client record created");
    } else {
        debug!(%correlation_id, "duplicate client submission ignored");
    }

    Ok(Json(serde_json::json!({"status": "ok"})))
}

/// `POST /api/create-session` - create a vendor verification session and
/// attach its id to the matching record.
async fn create_session(
    State(state): State<SharedState>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.correlation_id.is_empty() {
        return Err(ApiError::BadRequest("Missing correlationId".to_string()));
    }

    let session = match state.vendor.create_session(&req.correlation_id).await {
        Ok(session) => session,
        Err(VendorError::Api { status, body }) => {
            warn!(
                correlation_id = %req.correlation_id,
                status, "vendor rejected session creation"
            );
            return Err(ApiError::VendorRejected(body));
        }
        Err(VendorError::Transport(e)) => {
            return Err(ApiError::Internal(format!("vendor request failed: {}", e)));
        }
    };

    let correlation_id = req.correlation_id.clone();
    let session_id = session.id.clone();
    let matched = state
        .db
        .call(move |store| store.attach_session(&correlation_id, &session_id))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    if matched {
        info!(
            correlation_id = %req.correlation_id,
            session_id = %session.id,
            "vendor session attached"
        );
    } else {
        warn!(
            correlation_id = %req.correlation_id,
            "session created for unknown correlation id"
        );
    }

    Ok(Json(serde_json::json!({
        "status": "success",
        "sessionId": session.id,
        "sessionUrl": session.url,
        "correlationId": req.correlation_id,
    })))
}

/// `POST /callback` - vendor webhook. Must answer 200 unconditionally: a
/// non-200 here makes the vendor retry indefinitely or flag the integration
/// unhealthy, so internal failures are logged and swallowed. Only an
/// "approved" status (case-insensitive) for a known correlation id mutates
/// the store.
async fn vendor_callback(State(state): State<SharedState>, body: Bytes) -> &'static str {
    let payload: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            debug!("undecodable callback body: {}", e);
            return "OK";
        }
    };

    let correlation_id = callback_field(&payload, "vendorData").map(str::to_owned);
    let status = callback_field(&payload, "status").map(str::to_owned);

    let (Some(correlation_id), Some(status)) = (correlation_id, status) else {
        debug!("callback missing vendorData or status");
        return "OK";
    };
    if !status.eq_ignore_ascii_case("approved") {
        debug!(%correlation_id, %status, "ignoring non-approved callback");
        return "OK";
    }

    let verified_at = now_iso();
    let id_for_store = correlation_id.clone();
    match state
        .db
        .call(move |store| store.mark_verified(&id_for_store, &verified_at))
        .await
    {
        Ok(true) => info!(%correlation_id, "client verified"),
        Ok(false) => debug!(%correlation_id, "no pending record matched callback; dropped"),
        Err(e) => warn!(%correlation_id, "failed to record verification: {}", e),
    }
    "OK"
}

/// `GET /callback` - browser-facing return leg after verification.
async fn verification_redirect(
    State(state): State<SharedState>,
    Query(query): Query<RedirectQuery>,
) -> Result<Redirect, ApiError> {
    let target = redirect_target(&state.front_end_url, query.client_id.as_deref())?;
    Ok(Redirect::to(&target))
}

/// `GET /api/admin/clients` - operator listing, behind basic auth.
async fn list_admin_clients(
    State(state): State<SharedState>,
    Query(query): Query<AdminListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let status = match query.status.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => Some(
            raw.parse::<VerificationStatus>()
                .map_err(ApiError::BadRequest)?,
        ),
        None => None,
    };
    let filter = RecordFilter {
        status,
        search: query.q.filter(|q| !q.is_empty()),
    };

    let items = state
        .db
        .call(move |store| store.query(&filter))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(serde_json::json!({"items": items})))
}
