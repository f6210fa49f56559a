use common_http_errors::ApiError;
use common_money::MoneyError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MpesaError {
    #[error("{0}")]
    Config(String),
    #[error("Network error connecting to M-Pesa: {0}")]
    Network(#[from] reqwest::Error),
    #[error("M-Pesa request failed (HTTP {status}): {detail}")]
    GatewayStatus { status: u16, detail: String },
    #[error("Invalid response from M-Pesa: {0}")]
    MalformedResponse(String),
    #[error("Either pos_invoice_name or sales_invoice_name must be provided")]
    MissingInvoice,
    #[error("Provide only one of pos_invoice_name or sales_invoice_name")]
    AmbiguousInvoice,
    #[error("{doctype} {name} does not exist. Please save the invoice first and try again.")]
    InvoiceNotFound { doctype: &'static str, name: String },
    #[error("Please provide a valid Kenyan phone number (e.g., 0722123456 or 254722123456), got {0:?}")]
    InvalidPhone(String),
    #[error("Invalid amount: {0}")]
    InvalidAmount(#[from] MoneyError),
    #[error("No M-Pesa payment found for CheckoutRequestID {0}")]
    PaymentNotFound(String),
    #[error("Payment already completed")]
    AlreadyCompleted,
    #[error("No suitable account found for M-Pesa payments. Please create an M-Pesa account in Chart of Accounts.")]
    NoReceivingAccount,
    #[error("storage error: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl MpesaError {
    pub fn code(&self) -> &'static str {
        match self {
            MpesaError::Config(_) => "gateway_config_error",
            MpesaError::Network(_) => "gateway_unreachable",
            MpesaError::GatewayStatus { .. } => "gateway_rejected",
            MpesaError::MalformedResponse(_) => "gateway_malformed_response",
            MpesaError::MissingInvoice => "missing_invoice",
            MpesaError::AmbiguousInvoice => "ambiguous_invoice",
            MpesaError::InvoiceNotFound { .. } => "invoice_not_found",
            MpesaError::InvalidPhone(_) => "invalid_phone_number",
            MpesaError::InvalidAmount(_) => "invalid_amount",
            MpesaError::PaymentNotFound(_) => "payment_not_found",
            MpesaError::AlreadyCompleted => "payment_already_completed",
            MpesaError::NoReceivingAccount => "no_receiving_account",
            MpesaError::Store(_) => "storage_error",
        }
    }
}

impl From<MpesaError> for ApiError {
    fn from(err: MpesaError) -> Self {
        let code = err.code();
        let message = Some(err.to_string());
        match err {
            MpesaError::MissingInvoice
            | MpesaError::AmbiguousInvoice
            | MpesaError::InvoiceNotFound { .. }
            | MpesaError::InvalidPhone(_)
            | MpesaError::InvalidAmount(_) => ApiError::BadRequest { code, message },
            MpesaError::PaymentNotFound(_) => ApiError::NotFound { code, message },
            MpesaError::AlreadyCompleted => ApiError::Conflict { code, message },
            MpesaError::Network(_)
            | MpesaError::GatewayStatus { .. }
            | MpesaError::MalformedResponse(_) => ApiError::BadGateway { code, message },
            MpesaError::Config(_) | MpesaError::NoReceivingAccount | MpesaError::Store(_) => {
                ApiError::Internal { code, message }
            }
        }
    }
}

/// Clip provider text before it lands in an error message.
pub(crate) fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
