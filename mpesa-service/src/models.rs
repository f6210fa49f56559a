use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MpesaError;

pub const POS_INVOICE: &str = "POS Invoice";
pub const SALES_INVOICE: &str = "Sales Invoice";

/// Gateway environment. `Test` targets the sandbox hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    Test,
    Live,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Test => "Test",
            Environment::Live => "Live",
        }
    }

    pub fn parse(s: &str) -> Option<Environment> {
        match s.trim().to_ascii_lowercase().as_str() {
            "test" | "sandbox" => Some(Environment::Test),
            "live" | "production" => Some(Environment::Live),
            _ => None,
        }
    }
}

/// Settings singleton: gateway credentials plus the cached bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MpesaSettings {
    pub consumer_key: Option<String>,
    pub consumer_secret: Option<String>,
    pub passkey: Option<String>,
    pub shortcode: Option<String>,
    pub callback_url: Option<String>,
    pub access_token: Option<String>,
    pub token_expiry: Option<DateTime<Utc>>,
    pub environment: Environment,
}

impl MpesaSettings {
    pub fn empty(environment: Environment) -> Self {
        Self {
            consumer_key: None,
            consumer_secret: None,
            passkey: None,
            shortcode: None,
            callback_url: None,
            access_token: None,
            token_expiry: None,
            environment,
        }
    }

    /// Token still usable at `now`, if any.
    pub fn cached_token(&self, now: DateTime<Utc>) -> Option<&str> {
        match (&self.access_token, self.token_expiry) {
            (Some(token), Some(expiry)) if !token.is_empty() && now < expiry => Some(token),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Initiated,
    Completed,
    Failed,
    Cancelled,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Initiated => "Initiated",
            PaymentStatus::Completed => "Completed",
            PaymentStatus::Failed => "Failed",
            PaymentStatus::Cancelled => "Cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<PaymentStatus> {
        match s {
            "Initiated" => Some(PaymentStatus::Initiated),
            "Completed" => Some(PaymentStatus::Completed),
            "Failed" => Some(PaymentStatus::Failed),
            "Cancelled" => Some(PaymentStatus::Cancelled),
            _ => None,
        }
    }
}

/// The single invoice a payment settles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "doctype", content = "name")]
pub enum InvoiceRef {
    #[serde(rename = "POS Invoice")]
    Pos(String),
    #[serde(rename = "Sales Invoice")]
    Sales(String),
}

impl InvoiceRef {
    /// Builds a reference from the two optional request fields; exactly one must be set.
    pub fn from_parts(pos_invoice: Option<&str>, sales_invoice: Option<&str>) -> Result<Self, MpesaError> {
        let pos = pos_invoice.map(str::trim).filter(|s| !s.is_empty());
        let sales = sales_invoice.map(str::trim).filter(|s| !s.is_empty());
        match (pos, sales) {
            (Some(name), None) => Ok(InvoiceRef::Pos(name.to_string())),
            (None, Some(name)) => Ok(InvoiceRef::Sales(name.to_string())),
            (Some(_), Some(_)) => Err(MpesaError::AmbiguousInvoice),
            (None, None) => Err(MpesaError::MissingInvoice),
        }
    }

    pub fn doctype(&self) -> &'static str {
        match self {
            InvoiceRef::Pos(_) => POS_INVOICE,
            InvoiceRef::Sales(_) => SALES_INVOICE,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            InvoiceRef::Pos(name) | InvoiceRef::Sales(name) => name,
        }
    }

    pub fn pos_invoice(&self) -> Option<&str> {
        match self {
            InvoiceRef::Pos(name) => Some(name),
            InvoiceRef::Sales(_) => None,
        }
    }

    pub fn sales_invoice(&self) -> Option<&str> {
        match self {
            InvoiceRef::Sales(name) => Some(name),
            InvoiceRef::Pos(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MpesaPayment {
    pub name: String,
    pub invoice: InvoiceRef,
    pub amount: BigDecimal,
    pub phone_number: String,
    pub status: PaymentStatus,
    pub checkout_request_id: Option<String>,
    pub merchant_request_id: Option<String>,
    pub result_code: Option<String>,
    pub result_desc: Option<String>,
    pub receipt_number: Option<String>,
    pub transaction_date: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MpesaPayment {
    pub fn initiated(invoice: InvoiceRef, amount: BigDecimal, phone_number: String) -> Self {
        let now = Utc::now();
        Self {
            name: format!("MPESA-PAY-{}", uuid::Uuid::new_v4().simple()),
            invoice,
            amount,
            phone_number,
            status: PaymentStatus::Initiated,
            checkout_request_id: None,
            merchant_request_id: None,
            result_code: None,
            result_desc: None,
            receipt_number: None,
            transaction_date: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PosInvoice {
    pub name: String,
    pub customer: String,
    pub company: String,
    pub grand_total: BigDecimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SalesInvoice {
    pub name: String,
    pub customer: String,
    pub company: String,
    pub due_date: Option<NaiveDate>,
    pub grand_total: BigDecimal,
    pub outstanding_amount: BigDecimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub name: String,
    pub account_name: String,
    pub account_type: Option<String>,
    pub is_group: bool,
    pub disabled: bool,
    pub company: String,
}

impl Account {
    pub fn is_postable(&self) -> bool {
        !self.is_group && !self.disabled
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Company {
    pub name: String,
    pub default_cash_account: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentReference {
    pub reference_doctype: String,
    pub reference_name: String,
    pub due_date: Option<NaiveDate>,
    pub total_amount: BigDecimal,
    pub outstanding_amount: BigDecimal,
    pub allocated_amount: BigDecimal,
}

/// A submitted receipt of funds against an invoice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentEntry {
    pub name: String,
    pub payment_type: String,
    pub party_type: String,
    pub party: String,
    pub company: String,
    pub posting_date: NaiveDate,
    pub paid_to: String,
    pub paid_amount: BigDecimal,
    pub received_amount: BigDecimal,
    pub target_exchange_rate: BigDecimal,
    pub reference_no: String,
    pub reference_date: NaiveDate,
    pub mode_of_payment: String,
    pub submitted: bool,
    pub references: Vec<PaymentReference>,
}
