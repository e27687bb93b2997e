use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};

pub const DEFAULT_PORT: u16 = 10000;
pub const DEFAULT_DB_PATH: &str = "data/clients.db";

/// Runtime configuration for the relay.
///
/// Loaded once at startup from the environment and injected into each
/// component at construction; handlers never read the environment directly.
#[derive(Debug, Clone)]
pub struct Config {
    /// Vendor API key, sent as the `X-AUTH-CLIENT` header.
    pub api_key: String,
    /// Externally reachable base URL of this service, used to build the
    /// webhook callback URL handed to the vendor.
    pub base_url: String,
    /// Front-end URL browsers are redirected to after verification.
    pub front_end_url: String,
    pub port: u16,
    /// Operator credentials for the admin listing.
    pub admin_user: String,
    pub admin_pass: String,
    pub db_path: PathBuf,
}

impl Config {
    /// Load configuration from process environment variables.
    pub fn from_env() -> Result<Self> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_vars(&vars)
    }

    /// Build configuration from an explicit variable map. Split out from
    /// `from_env` so tests don't mutate process-global environment state.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self> {
        let require = |key: &str| -> Result<String> {
            vars.get(key)
                .map(String::to_owned)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| anyhow!("{} is not set", key))
        };

        let port = match vars.get("PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .with_context(|| format!("PORT is not a valid port number: {}", raw))?,
            None => DEFAULT_PORT,
        };

        Ok(Self {
            api_key: require("VERIFF_API_KEY")?,
            base_url: require("BASE_URL")?,
            front_end_url: require("FRONTEND_URL")?,
            port,
            admin_user: require("ADMIN_USER")?,
            admin_pass: require("ADMIN_PASS")?,
            db_path: vars
                .get("DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH)),
        })
    }

    /// Webhook URL the vendor posts verification decisions to.
    pub fn callback_url(&self) -> String {
        format!("{}/callback", self.base_url.trim_end_matches('/'))
    }
}
