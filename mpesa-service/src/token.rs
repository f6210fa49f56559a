use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::MpesaError;
use crate::gateway::{basic_credentials, TOKEN_PATH};
use crate::models::MpesaSettings;
use crate::service::MpesaService;

/// Daraja keys and secrets are well above this; anything shorter is a paste error.
pub const MIN_CREDENTIAL_LEN: usize = 10;
const PREVIEW_CHARS: usize = 20;

/// Consumer key and secret, trimmed and checked for plausibility.
pub fn validated_credentials(settings: &MpesaSettings) -> Result<(String, String), MpesaError> {
    let key = settings.consumer_key.as_deref().map(str::trim).unwrap_or_default();
    let secret = settings.consumer_secret.as_deref().map(str::trim).unwrap_or_default();
    if key.is_empty() {
        return Err(MpesaError::Config("M-Pesa Consumer Key is missing in Mpesa Settings.".into()));
    }
    if secret.is_empty() {
        return Err(MpesaError::Config("M-Pesa Consumer Secret is missing in Mpesa Settings.".into()));
    }
    if key.len() < MIN_CREDENTIAL_LEN {
        return Err(MpesaError::Config("M-Pesa Consumer Key appears to be too short. Please verify.".into()));
    }
    if secret.len() < MIN_CREDENTIAL_LEN {
        return Err(MpesaError::Config("M-Pesa Consumer Secret appears to be too short. Please verify.".into()));
    }
    Ok((key.to_string(), secret.to_string()))
}

/// What an operator sees when checking credentials. Secrets are reported by length only.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialReport {
    pub environment: &'static str,
    pub consumer_key_present: bool,
    pub consumer_key_length: usize,
    pub consumer_secret_present: bool,
    pub consumer_secret_length: usize,
    pub passkey_present: bool,
    pub passkey_length: usize,
    pub shortcode_present: bool,
    pub callback_url_present: bool,
    pub auth_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoded_credentials_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoded_credentials_preview: Option<String>,
}

/// `now + expires_in - buffer`, rejecting lifetimes chrono cannot represent.
fn token_expiry(now: DateTime<Utc>, expires_in: i64, buffer_secs: i64) -> Result<DateTime<Utc>, MpesaError> {
    expires_in
        .checked_sub(buffer_secs)
        .and_then(Duration::try_seconds)
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .ok_or_else(|| MpesaError::MalformedResponse(format!("expires_in {expires_in} is out of range")))
}

fn field_len(value: &Option<String>) -> usize {
    value.as_deref().map(str::trim).map(str::len).unwrap_or(0)
}

impl MpesaService {
    /// Bearer token for gateway calls, served from the settings cache while it is valid.
    pub async fn access_token(&self) -> Result<String, MpesaError> {
        let settings = self.store.settings().await?;
        let now = Utc::now();
        if let Some(token) = settings.cached_token(now) {
            debug!("Using cached M-Pesa access token");
            self.metrics.record_token("cache");
            return Ok(token.to_string());
        }

        let (consumer_key, consumer_secret) = validated_credentials(&settings)?;
        let grant = self
            .gateway
            .generate_token(settings.environment, &consumer_key, &consumer_secret)
            .await?;

        let expiry = token_expiry(now, grant.expires_in, self.options.token_expiry_buffer_secs)?;
        if expiry <= now {
            warn!(expires_in = grant.expires_in, "M-Pesa token lifetime is within the expiry buffer; it will not be reused");
        }
        self.store.store_access_token(&grant.access_token, expiry).await?;
        self.metrics.record_token("gateway");
        info!(%expiry, "M-Pesa access token refreshed");
        Ok(grant.access_token)
    }

    pub async fn check_credentials(&self) -> Result<CredentialReport, MpesaError> {
        let settings = self.store.settings().await?;
        let auth_url = format!(
            "{}{}?grant_type=client_credentials",
            self.options.base_url(settings.environment),
            TOKEN_PATH
        );
        let key = settings.consumer_key.as_deref().map(str::trim).filter(|k| !k.is_empty());
        let secret = settings.consumer_secret.as_deref().map(str::trim).filter(|s| !s.is_empty());
        let encoded = match (key, secret) {
            (Some(key), Some(secret)) => Some(basic_credentials(key, secret)),
            _ => None,
        };

        Ok(CredentialReport {
            environment: settings.environment.as_str(),
            consumer_key_present: key.is_some(),
            consumer_key_length: field_len(&settings.consumer_key),
            consumer_secret_present: secret.is_some(),
            consumer_secret_length: field_len(&settings.consumer_secret),
            passkey_present: field_len(&settings.passkey) > 0,
            passkey_length: field_len(&settings.passkey),
            shortcode_present: field_len(&settings.shortcode) > 0,
            callback_url_present: field_len(&settings.callback_url) > 0,
            auth_url,
            encoded_credentials_length: encoded.as_ref().map(String::len),
            encoded_credentials_preview: encoded
                .as_ref()
                .map(|e| format!("{}...", e.chars().take(PREVIEW_CHARS).collect::<String>())),
        })
    }
}
