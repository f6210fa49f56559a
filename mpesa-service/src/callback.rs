use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::error::MpesaError;
use crate::ledger::LedgerOutcome;
use crate::models::{MpesaPayment, PaymentStatus};
use crate::service::MpesaService;

pub const SUCCESS_RESULT_CODE: &str = "0";

#[derive(Debug, Deserialize)]
pub struct CallbackEnvelope {
    #[serde(rename = "Body")]
    pub body: CallbackBody,
}

#[derive(Debug, Deserialize)]
pub struct CallbackBody {
    #[serde(rename = "stkCallback")]
    pub stk_callback: StkCallback,
}

#[derive(Debug, Deserialize)]
pub struct StkCallback {
    #[serde(rename = "MerchantRequestID", default)]
    pub merchant_request_id: Option<String>,
    #[serde(rename = "CheckoutRequestID", default)]
    pub checkout_request_id: Option<String>,
    #[serde(rename = "ResultCode", default)]
    pub result_code: Option<Value>,
    #[serde(rename = "ResultDesc", default)]
    pub result_desc: Option<String>,
    #[serde(rename = "CallbackMetadata", default)]
    pub metadata: Option<CallbackMetadata>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CallbackMetadata {
    #[serde(rename = "Item", default)]
    pub items: Vec<MetadataItem>,
}

#[derive(Debug, Deserialize)]
pub struct MetadataItem {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Value", default)]
    pub value: Option<Value>,
}

impl StkCallback {
    /// Result code as text; the provider sends it as a number but strings are tolerated.
    pub fn result_code(&self) -> Option<String> {
        self.result_code.as_ref().and_then(scalar_text)
    }

    pub fn succeeded(&self) -> bool {
        self.result_code().as_deref() == Some(SUCCESS_RESULT_CODE)
    }

    pub fn item(&self, name: &str) -> Option<String> {
        self.metadata
            .as_ref()?
            .items
            .iter()
            .find(|item| item.name == name)
            .and_then(|item| item.value.as_ref())
            .and_then(scalar_text)
    }
}

/// Numbers without a fractional part are rendered as integers.
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(match (n.as_i64(), n.as_u64()) {
            (Some(i), _) => i.to_string(),
            (None, Some(u)) => u.to_string(),
            _ => n.to_string(),
        }),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackAck {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CallbackAck {
    pub fn success(message: Option<&str>) -> Self {
        Self { status: "success".into(), message: message.map(str::to_string) }
    }

    pub fn error(message: &str) -> Self {
        Self { status: "error".into(), message: Some(message.to_string()) }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CallbackError {
    #[error("Invalid JSON")]
    InvalidJson(#[source] serde_json::Error),
    #[error("Payment record not found")]
    UnknownCheckout(Option<String>),
    #[error("Processing failed")]
    Processing(#[from] MpesaError),
}

impl CallbackError {
    pub fn status(&self) -> StatusCode {
        match self {
            CallbackError::InvalidJson(_) => StatusCode::BAD_REQUEST,
            CallbackError::UnknownCheckout(_) => StatusCode::NOT_FOUND,
            CallbackError::Processing(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn ack(&self) -> CallbackAck {
        CallbackAck::error(&self.to_string())
    }

    fn outcome(&self) -> &'static str {
        match self {
            CallbackError::InvalidJson(_) => "invalid_json",
            CallbackError::UnknownCheckout(_) => "unknown_checkout",
            CallbackError::Processing(_) => "error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CallbackReport {
    pub payment: String,
    pub status: PaymentStatus,
    /// `None` when the payment failed or the handler never posts to the ledger.
    pub ledger: Option<LedgerOutcome>,
}

fn parse_callback(raw: &[u8]) -> Result<StkCallback, CallbackError> {
    debug!(body = %String::from_utf8_lossy(raw), "M-Pesa callback raw data");
    let envelope: CallbackEnvelope = serde_json::from_slice(raw).map_err(|err| {
        error!(error = %err, "Invalid JSON in M-Pesa callback");
        CallbackError::InvalidJson(err)
    })?;
    Ok(envelope.body.stk_callback)
}

impl MpesaService {
    /// Reconcile a gateway callback: record the result and, on success, post the
    /// ledger entry. Ledger failures are logged and never fail the callback.
    pub async fn handle_callback(&self, raw: &[u8]) -> Result<CallbackReport, CallbackError> {
        let result = self.reconcile(raw).await;
        if let Err(CallbackError::Processing(err)) = &result {
            error!(error = %err, "M-Pesa callback processing error");
        }
        self.metrics.record_callback("full", outcome_label(&result));
        result
    }

    async fn reconcile(&self, raw: &[u8]) -> Result<CallbackReport, CallbackError> {
        let callback = parse_callback(raw)?;
        let result_code = callback.result_code();
        info!(
            checkout_request_id = callback.checkout_request_id.as_deref().unwrap_or_default(),
            result_code = result_code.as_deref().unwrap_or_default(),
            "M-Pesa callback received"
        );
        let mut payment = self.callback_payment(&callback).await?;

        payment.result_code = result_code;
        payment.result_desc = Some(callback.result_desc.clone().unwrap_or_default());
        if callback.merchant_request_id.is_some() {
            payment.merchant_request_id = callback.merchant_request_id.clone();
        }

        if !callback.succeeded() {
            payment.status = PaymentStatus::Failed;
            self.store.save_payment(&payment).await.map_err(MpesaError::from)?;
            info!(
                payment = %payment.name,
                result_code = payment.result_code.as_deref().unwrap_or_default(),
                result_desc = payment.result_desc.as_deref().unwrap_or_default(),
                "M-Pesa payment failed"
            );
            return Ok(CallbackReport { payment: payment.name, status: PaymentStatus::Failed, ledger: None });
        }

        payment.status = PaymentStatus::Completed;
        if let Some(receipt) = callback.item("MpesaReceiptNumber") {
            payment.receipt_number = Some(receipt);
        }
        if let Some(date) = callback.item("TransactionDate") {
            payment.transaction_date = Some(date);
        }
        if let Some(phone) = callback.item("PhoneNumber") {
            payment.phone_number = phone;
        }
        self.store.save_payment(&payment).await.map_err(MpesaError::from)?;

        let ledger = match self.create_payment_entries(&payment).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(payment = %payment.name, error = %err, "Payment entry creation failed");
                LedgerOutcome::Failed(err.to_string())
            }
        };
        self.metrics.record_ledger_entry(ledger.label());
        info!(payment = %payment.name, ledger = ledger.label(), "M-Pesa callback processed");
        Ok(CallbackReport { payment: payment.name, status: PaymentStatus::Completed, ledger: Some(ledger) })
    }

    /// Status-only reconciliation: records the outcome and receipt, never posts to the ledger.
    pub async fn handle_simple_callback(&self, raw: &[u8]) -> Result<CallbackReport, CallbackError> {
        let result = self.reconcile_status_only(raw).await;
        if let Err(CallbackError::Processing(err)) = &result {
            error!(error = %err, "M-Pesa simple callback processing error");
        }
        self.metrics.record_callback("simple", outcome_label(&result));
        result
    }

    async fn reconcile_status_only(&self, raw: &[u8]) -> Result<CallbackReport, CallbackError> {
        let callback = parse_callback(raw)?;
        let mut payment = self.callback_payment(&callback).await?;
        if callback.succeeded() {
            payment.status = PaymentStatus::Completed;
            if let Some(receipt) = callback.item("MpesaReceiptNumber") {
                payment.receipt_number = Some(receipt);
            }
        } else {
            payment.status = PaymentStatus::Failed;
        }
        self.store.save_payment(&payment).await.map_err(MpesaError::from)?;
        Ok(CallbackReport { payment: payment.name, status: payment.status, ledger: None })
    }

    async fn callback_payment(&self, callback: &StkCallback) -> Result<MpesaPayment, CallbackError> {
        let Some(checkout_request_id) = callback.checkout_request_id.as_deref() else {
            warn!("M-Pesa callback without CheckoutRequestID");
            return Err(CallbackError::UnknownCheckout(None));
        };
        match self.payment_by_checkout_id(checkout_request_id).await {
            Ok(payment) => Ok(payment),
            Err(MpesaError::PaymentNotFound(id)) => {
                error!(checkout_request_id = %id, "Unknown CheckoutRequestID");
                Err(CallbackError::UnknownCheckout(Some(id)))
            }
            Err(err) => Err(err.into()),
        }
    }
}

fn outcome_label(result: &Result<CallbackReport, CallbackError>) -> &'static str {
    match result {
        Ok(report) => match report.status {
            PaymentStatus::Completed => "completed",
            _ => "failed",
        },
        Err(err) => err.outcome(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn callback(value: serde_json::Value) -> StkCallback {
        parse_callback(value.to_string().as_bytes()).unwrap()
    }

    #[test]
    fn metadata_values_render_as_text() {
        let cb = callback(json!({
            "Body": {"stkCallback": {
                "MerchantRequestID": "29115-34620561-1",
                "CheckoutRequestID": "ws_CO_191220191020363925",
                "ResultCode": 0,
                "ResultDesc": "The service request is processed successfully.",
                "CallbackMetadata": {"Item": [
                    {"Name": "Amount", "Value": 1.0},
                    {"Name": "MpesaReceiptNumber", "Value": "NLJ7RT61SV"},
                    {"Name": "Balance"},
                    {"Name": "TransactionDate", "Value": 20191219102115u64},
                    {"Name": "PhoneNumber", "Value": 254708374149u64}
                ]}
            }}
        }));
        assert!(cb.succeeded());
        assert_eq!(cb.item("MpesaReceiptNumber").as_deref(), Some("NLJ7RT61SV"));
        assert_eq!(cb.item("TransactionDate").as_deref(), Some("20191219102115"));
        assert_eq!(cb.item("PhoneNumber").as_deref(), Some("254708374149"));
        assert_eq!(cb.item("Balance"), None);
        assert_eq!(cb.item("Missing"), None);
    }

    #[test]
    fn string_result_codes_are_accepted() {
        let ok = callback(json!({"Body": {"stkCallback": {"CheckoutRequestID": "x", "ResultCode": "0"}}}));
        assert!(ok.succeeded());
        let cancelled = callback(json!({"Body": {"stkCallback": {"CheckoutRequestID": "x", "ResultCode": 1032}}}));
        assert!(!cancelled.succeeded());
        assert_eq!(cancelled.result_code().as_deref(), Some("1032"));
    }

    #[test]
    fn malformed_bodies_are_invalid_json() {
        let err = parse_callback(b"not json").unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.ack(), CallbackAck::error("Invalid JSON"));
        assert!(matches!(parse_callback(br#"{"Body": {}}"#), Err(CallbackError::InvalidJson(_))));
    }

    #[test]
    fn ack_omits_empty_message() {
        let v = serde_json::to_value(CallbackAck::success(None)).unwrap();
        assert_eq!(v, json!({"status": "success"}));
    }
}
