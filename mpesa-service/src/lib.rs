use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tracing::info;

pub mod auth;
pub mod callback;
pub mod config;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod ledger;
pub mod metrics;
pub mod models;
pub mod pg_repo;
pub mod phone;
pub mod repo;
pub mod service;
pub mod stk;
pub mod token;

pub use config::MpesaConfig;
pub use error::MpesaError;
pub use service::{MpesaService, ServiceOptions};

use crate::repo::LedgerStore;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<MpesaService>,
    /// Hex SHA-256 of the operator API key. `None` leaves operator routes open.
    pub api_key_sha256: Option<Arc<str>>,
}

impl AppState {
    pub fn new(service: Arc<MpesaService>, api_key_sha256: Option<String>) -> Self {
        Self { service, api_key_sha256: api_key_sha256.map(Arc::from) }
    }
}

pub fn router(state: AppState) -> Router {
    let operator = Router::new()
        .route("/api/mpesa/token", get(handlers::access_token))
        .route("/api/mpesa/credentials/check", get(handlers::check_credentials))
        .route("/api/mpesa/stk-push", post(handlers::initiate_stk_push))
        .route("/api/mpesa/payments/:checkout_request_id", get(handlers::payment_status))
        .route("/api/mpesa/payments/:checkout_request_id/resend", post(handlers::resend_stk_push))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_api_key));

    Router::new()
        .route("/healthz", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route("/api/mpesa/callback", post(handlers::mpesa_callback))
        .route("/api/mpesa/callback/simple", post(handlers::mpesa_simple_callback))
        .merge(operator)
        .with_state(state)
}

/// Fill empty settings fields from configured credentials. Values already stored win,
/// except the environment, which is applied when `MPESA_ENVIRONMENT` is set. Switching
/// environments drops the cached token, since tokens are only valid on their own host.
pub async fn seed_settings(store: &dyn LedgerStore, config: &MpesaConfig) -> anyhow::Result<()> {
    let seed = &config.credentials;
    if seed.is_empty() && config.environment.is_none() {
        return Ok(());
    }
    let mut settings = store.settings().await?;
    let mut changed = false;
    for (slot, value) in [
        (&mut settings.consumer_key, &seed.consumer_key),
        (&mut settings.consumer_secret, &seed.consumer_secret),
        (&mut settings.passkey, &seed.passkey),
        (&mut settings.shortcode, &seed.shortcode),
        (&mut settings.callback_url, &seed.callback_url),
    ] {
        let empty = slot.as_deref().map_or(true, |s| s.trim().is_empty());
        if empty && value.is_some() {
            *slot = value.clone();
            changed = true;
        }
    }
    if let Some(environment) = config.environment.filter(|env| *env != settings.environment) {
        info!(
            from = settings.environment.as_str(),
            to = environment.as_str(),
            "M-Pesa environment changed; cached access token dropped"
        );
        settings.environment = environment;
        settings.access_token = None;
        settings.token_expiry = None;
        changed = true;
    }
    if changed {
        store.save_settings(&settings).await?;
        info!(environment = settings.environment.as_str(), "Mpesa Settings seeded from configuration");
    }
    Ok(())
}
