use anyhow::Result;
use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct MpesaMetrics {
    registry: Registry,
    token_requests: IntCounterVec,
    stk_pushes: IntCounterVec,
    callbacks: IntCounterVec,
    ledger_entries: IntCounterVec,
}

impl MpesaMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let token_requests = IntCounterVec::new(
            Opts::new("mpesa_token_requests_total", "Access token lookups grouped by source"),
            &["source"],
        )?;
        let stk_pushes = IntCounterVec::new(
            Opts::new("mpesa_stk_push_total", "STK push submissions grouped by result"),
            &["result"],
        )?;
        let callbacks = IntCounterVec::new(
            Opts::new("mpesa_callbacks_total", "Payment callbacks grouped by handler and outcome"),
            &["variant", "outcome"],
        )?;
        let ledger_entries = IntCounterVec::new(
            Opts::new("mpesa_ledger_entries_total", "Payment entry creation attempts grouped by result"),
            &["result"],
        )?;
        registry.register(Box::new(token_requests.clone()))?;
        registry.register(Box::new(stk_pushes.clone()))?;
        registry.register(Box::new(callbacks.clone()))?;
        registry.register(Box::new(ledger_entries.clone()))?;
        Ok(Self {
            registry,
            token_requests,
            stk_pushes,
            callbacks,
            ledger_entries,
        })
    }

    pub fn record_token(&self, source: &str) {
        self.token_requests.with_label_values(&[source]).inc();
    }

    pub fn record_stk_push(&self, result: &str) {
        self.stk_pushes.with_label_values(&[result]).inc();
    }

    pub fn record_callback(&self, variant: &str, outcome: &str) {
        self.callbacks.with_label_values(&[variant, outcome]).inc();
    }

    pub fn record_ledger_entry(&self, result: &str) {
        self.ledger_entries.with_label_values(&[result]).inc();
    }

    pub fn render(&self) -> Result<Response> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        let response = Response::builder()
            .status(StatusCode::OK)
            .header(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            )
            .body(Body::from(buffer))?;
        Ok(response)
    }
}
