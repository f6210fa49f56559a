use anyhow::{bail, Context, Result};
use std::env;
use std::time::Duration;

use crate::models::Environment;

pub const SANDBOX_BASE_URL: &str = "https://sandbox.safaricom.co.ke";
pub const LIVE_BASE_URL: &str = "https://api.safaricom.co.ke";

/// Credentials seeded into the settings singleton at startup. Every field is
/// optional so a deployment can manage settings in the database instead.
#[derive(Debug, Clone, Default)]
pub struct CredentialSeed {
    pub consumer_key: Option<String>,
    pub consumer_secret: Option<String>,
    pub passkey: Option<String>,
    pub shortcode: Option<String>,
    pub callback_url: Option<String>,
}

impl CredentialSeed {
    pub fn is_empty(&self) -> bool {
        self.consumer_key.is_none()
            && self.consumer_secret.is_none()
            && self.passkey.is_none()
            && self.shortcode.is_none()
            && self.callback_url.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct MpesaConfig {
    pub host: String,
    pub port: u16,
    pub database_url: Option<String>,
    /// `None` keeps whatever environment the settings singleton already holds.
    pub environment: Option<Environment>,
    pub credentials: CredentialSeed,
    pub sandbox_base_url: String,
    pub live_base_url: String,
    pub http_timeout_secs: u64,
    pub token_expiry_buffer_secs: i64,
    pub account_keyword: String,
    pub mode_of_payment: String,
    pub api_key_sha256: Option<String>,
    pub cors_allowed_origins: Vec<String>,
}

impl MpesaConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let host = non_empty("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = match non_empty("PORT") {
            Some(raw) => raw.parse::<u16>().with_context(|| format!("PORT must be a port number, got {raw}"))?,
            None => 8090,
        };
        let environment = match non_empty("MPESA_ENVIRONMENT") {
            Some(raw) => Some(
                Environment::parse(&raw)
                    .with_context(|| format!("MPESA_ENVIRONMENT must be Test or Live, got {raw}"))?,
            ),
            None => None,
        };
        let http_timeout_secs = non_empty("MPESA_HTTP_TIMEOUT_SECONDS")
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(30);
        let token_expiry_buffer_secs = non_empty("MPESA_TOKEN_EXPIRY_BUFFER_SECONDS")
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(300);
        if token_expiry_buffer_secs < 0 {
            bail!("MPESA_TOKEN_EXPIRY_BUFFER_SECONDS must not be negative");
        }
        let api_key_sha256 = match non_empty("MPESA_API_KEY_SHA256") {
            Some(hash) => {
                let hash = hash.to_ascii_lowercase();
                if hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
                    bail!("MPESA_API_KEY_SHA256 must be a hex encoded SHA-256 digest");
                }
                Some(hash)
            }
            None => None,
        };
        let cors_allowed_origins = non_empty("CORS_ALLOWED_ORIGINS")
            .unwrap_or_else(|| "http://localhost:3000,http://localhost:5173".to_string())
            .split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect();

        Ok(Self {
            host,
            port,
            database_url: non_empty("DATABASE_URL"),
            environment,
            credentials: CredentialSeed {
                consumer_key: non_empty("MPESA_CONSUMER_KEY"),
                consumer_secret: non_empty("MPESA_CONSUMER_SECRET"),
                passkey: non_empty("MPESA_PASSKEY"),
                shortcode: non_empty("MPESA_SHORTCODE"),
                callback_url: non_empty("MPESA_CALLBACK_URL"),
            },
            sandbox_base_url: non_empty("MPESA_SANDBOX_BASE_URL")
                .unwrap_or_else(|| SANDBOX_BASE_URL.to_string()),
            live_base_url: non_empty("MPESA_LIVE_BASE_URL").unwrap_or_else(|| LIVE_BASE_URL.to_string()),
            http_timeout_secs: http_timeout_secs.max(1),
            token_expiry_buffer_secs,
            account_keyword: non_empty("MPESA_ACCOUNT_KEYWORD").unwrap_or_else(|| "mpesa".to_string()),
            mode_of_payment: non_empty("MPESA_MODE_OF_PAYMENT")
                .unwrap_or_else(|| "M-Pesa Express".to_string()),
            api_key_sha256,
            cors_allowed_origins,
        })
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

impl Default for MpesaConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8090,
            database_url: None,
            environment: None,
            credentials: CredentialSeed::default(),
            sandbox_base_url: SANDBOX_BASE_URL.to_string(),
            live_base_url: LIVE_BASE_URL.to_string(),
            http_timeout_secs: 30,
            token_expiry_buffer_secs: 300,
            account_keyword: "mpesa".to_string(),
            mode_of_payment: "M-Pesa Express".to_string(),
            api_key_sha256: None,
            cors_allowed_origins: Vec::new(),
        }
    }
}
