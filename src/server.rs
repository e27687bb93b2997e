use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::http::HeaderValue;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::api::{self, AppState};
use crate::auth::AdminCredentials;
use crate::config::Config;
use crate::store::{ClientStore, DbHandle};
use crate::vendor::{DEFAULT_SESSIONS_URL, DEFAULT_TIMEOUT, VendorClient};

/// Build the full application router.
pub fn build_router(state: Arc<AppState>) -> Router {
    api::api_router(state.clone()).with_state(state)
}

/// CORS for the public endpoints: exact front-end origin when it parses as a
/// header value, permissive otherwise (e.g. local development).
fn cors_layer(front_end_url: &str) -> CorsLayer {
    match front_end_url
        .trim_end_matches('/')
        .parse::<HeaderValue>()
    {
        Ok(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_methods(Any)
            .allow_headers(Any),
        Err(_) => CorsLayer::permissive(),
    }
}

/// Start the relay server.
pub async fn start_server(config: Config) -> Result<()> {
    // Ensure parent directory exists for the database
    if let Some(parent) = config.db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }
    }

    let store = ClientStore::new(&config.db_path).context("Failed to initialize client store")?;
    let vendor = VendorClient::new(
        config.api_key.clone(),
        config.callback_url(),
        DEFAULT_SESSIONS_URL.to_string(),
        DEFAULT_TIMEOUT,
    )?;

    let state = Arc::new(AppState {
        db: DbHandle::new(store),
        vendor,
        front_end_url: config.front_end_url.clone(),
        admin: AdminCredentials {
            user: config.admin_user.clone(),
            pass: config.admin_pass.clone(),
        },
    });

    let app = build_router(state).layer(cors_layer(&config.front_end_url));

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    info!("kyc-relay listening on http://{}", local_addr);
    info!("callback URL: {}", config.callback_url());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("shutting down...");
}
