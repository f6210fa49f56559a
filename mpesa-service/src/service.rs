use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use std::sync::Arc;

use crate::config::MpesaConfig;
use crate::error::MpesaError;
use crate::gateway::DynMpesaGateway;
use crate::metrics::MpesaMetrics;
use crate::models::{Environment, MpesaPayment};
use crate::repo::DynLedgerStore;

const EAST_AFRICA_UTC_OFFSET_HOURS: i64 = 3;

/// Wall-clock time in Nairobi. The gateway validates STK timestamps against it.
pub fn east_africa_time(now: DateTime<Utc>) -> NaiveDateTime {
    (now + Duration::hours(EAST_AFRICA_UTC_OFFSET_HOURS)).naive_utc()
}

#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub token_expiry_buffer_secs: i64,
    pub account_keyword: String,
    pub mode_of_payment: String,
    pub sandbox_base_url: String,
    pub live_base_url: String,
}

impl From<&MpesaConfig> for ServiceOptions {
    fn from(config: &MpesaConfig) -> Self {
        Self {
            token_expiry_buffer_secs: config.token_expiry_buffer_secs,
            account_keyword: config.account_keyword.clone(),
            mode_of_payment: config.mode_of_payment.clone(),
            sandbox_base_url: config.sandbox_base_url.trim_end_matches('/').to_string(),
            live_base_url: config.live_base_url.trim_end_matches('/').to_string(),
        }
    }
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self::from(&MpesaConfig::default())
    }
}

impl ServiceOptions {
    pub fn base_url(&self, environment: Environment) -> &str {
        match environment {
            Environment::Test => &self.sandbox_base_url,
            Environment::Live => &self.live_base_url,
        }
    }
}

/// Orchestrates token handling, STK initiation, callback reconciliation and
/// ledger posting on top of a store and a gateway.
pub struct MpesaService {
    pub(crate) store: DynLedgerStore,
    pub(crate) gateway: DynMpesaGateway,
    pub(crate) metrics: Arc<MpesaMetrics>,
    pub(crate) options: ServiceOptions,
}

impl MpesaService {
    pub fn new(
        store: DynLedgerStore,
        gateway: DynMpesaGateway,
        metrics: Arc<MpesaMetrics>,
        options: ServiceOptions,
    ) -> Self {
        Self { store, gateway, metrics, options }
    }

    pub fn store(&self) -> &DynLedgerStore {
        &self.store
    }

    pub fn metrics(&self) -> &MpesaMetrics {
        &self.metrics
    }

    pub(crate) async fn payment_by_checkout_id(&self, checkout_request_id: &str) -> Result<MpesaPayment, MpesaError> {
        self.store
            .payment_by_checkout_id(checkout_request_id)
            .await?
            .ok_or_else(|| MpesaError::PaymentNotFound(checkout_request_id.to_string()))
    }
}
