use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use common_money::whole_units;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::MpesaError;
use crate::gateway::{StkPushRequest, StkPushResponse};
use crate::models::{InvoiceRef, MpesaPayment, MpesaSettings, PaymentStatus};
use crate::phone::normalize_phone;
use crate::service::{east_africa_time, MpesaService};

pub const TRANSACTION_TYPE: &str = "CustomerPayBillOnline";

pub fn stk_timestamp(now: DateTime<Utc>) -> String {
    east_africa_time(now).format("%Y%m%d%H%M%S").to_string()
}

pub fn stk_password(shortcode: &str, passkey: &str, timestamp: &str) -> String {
    BASE64.encode(format!("{shortcode}{passkey}{timestamp}"))
}

#[derive(Debug, Clone, Deserialize)]
pub struct StkPushCommand {
    pub phone_number: String,
    pub amount: BigDecimal,
    #[serde(default)]
    pub pos_invoice_name: Option<String>,
    #[serde(default)]
    pub sales_invoice_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentStatusView {
    pub payment: String,
    pub status: PaymentStatus,
    pub checkout_request_id: Option<String>,
    pub receipt_number: Option<String>,
    pub result_desc: Option<String>,
    pub amount: BigDecimal,
    pub phone_number: String,
    pub invoice: InvoiceRef,
}

impl From<&MpesaPayment> for PaymentStatusView {
    fn from(payment: &MpesaPayment) -> Self {
        Self {
            payment: payment.name.clone(),
            status: payment.status,
            checkout_request_id: payment.checkout_request_id.clone(),
            receipt_number: payment.receipt_number.clone(),
            result_desc: payment.result_desc.clone(),
            amount: payment.amount.clone(),
            phone_number: payment.phone_number.clone(),
            invoice: payment.invoice.clone(),
        }
    }
}

struct PushSettings {
    shortcode: u64,
    shortcode_text: String,
    passkey: String,
    callback_url: String,
}

fn push_settings(settings: &MpesaSettings) -> Result<PushSettings, MpesaError> {
    let passkey = settings
        .passkey
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| MpesaError::Config("M-Pesa Passkey is missing in Mpesa Settings.".into()))?;
    let shortcode_text = settings
        .shortcode
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| MpesaError::Config("M-Pesa Shortcode is missing in Mpesa Settings.".into()))?;
    let shortcode = shortcode_text
        .parse::<u64>()
        .map_err(|_| MpesaError::Config(format!("M-Pesa Shortcode {shortcode_text:?} is not numeric.")))?;
    let callback_url = settings
        .callback_url
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .ok_or_else(|| MpesaError::Config("M-Pesa Callback URL is missing in Mpesa Settings.".into()))?;
    Ok(PushSettings {
        shortcode,
        shortcode_text: shortcode_text.to_string(),
        passkey: passkey.to_string(),
        callback_url: callback_url.to_string(),
    })
}

impl MpesaService {
    /// Validate the request, record an `Initiated` payment and ask the gateway to
    /// prompt the customer's phone.
    pub async fn initiate_stk_push(&self, command: StkPushCommand) -> Result<StkPushResponse, MpesaError> {
        let invoice = InvoiceRef::from_parts(
            command.pos_invoice_name.as_deref(),
            command.sales_invoice_name.as_deref(),
        )?;
        let amount = whole_units(&command.amount)?;
        let phone = normalize_phone(&command.phone_number)?;
        self.start_push(invoice, amount, phone).await
    }

    /// Cancel a payment that never completed and push a fresh prompt for it.
    pub async fn resend_stk_push(&self, checkout_request_id: &str) -> Result<StkPushResponse, MpesaError> {
        let mut previous = self.payment_by_checkout_id(checkout_request_id).await?;
        if previous.status == PaymentStatus::Completed {
            return Err(MpesaError::AlreadyCompleted);
        }
        let amount = whole_units(&previous.amount)?;
        previous.status = PaymentStatus::Cancelled;
        self.store.save_payment(&previous).await?;
        info!(payment = %previous.name, checkout_request_id, "Previous STK push cancelled, resending");
        self.start_push(previous.invoice.clone(), amount, previous.phone_number.clone())
            .await
    }

    pub async fn payment_status(&self, checkout_request_id: &str) -> Result<PaymentStatusView, MpesaError> {
        let payment = self.payment_by_checkout_id(checkout_request_id).await?;
        Ok(PaymentStatusView::from(&payment))
    }

    async fn start_push(&self, invoice: InvoiceRef, amount: i64, phone: String) -> Result<StkPushResponse, MpesaError> {
        self.ensure_invoice_exists(&invoice).await?;

        let settings = self.store.settings().await?;
        let push = push_settings(&settings)?;
        let access_token = self.access_token().await?;

        let timestamp = stk_timestamp(Utc::now());
        let party_a = phone
            .parse::<u64>()
            .map_err(|_| MpesaError::InvalidPhone(phone.clone()))?;
        let request = StkPushRequest {
            business_short_code: push.shortcode,
            password: stk_password(&push.shortcode_text, &push.passkey, &timestamp),
            timestamp,
            transaction_type: TRANSACTION_TYPE.to_string(),
            amount,
            party_a,
            party_b: push.shortcode,
            phone_number: party_a,
            callback_url: push.callback_url,
            account_reference: invoice.name().to_string(),
            transaction_desc: format!("Payment for {} {}", invoice.doctype(), invoice.name()),
        };

        let mut payment = MpesaPayment::initiated(invoice, BigDecimal::from(amount), phone);
        self.store.insert_payment(&payment).await?;
        info!(
            payment = %payment.name,
            invoice = payment.invoice.name(),
            doctype = payment.invoice.doctype(),
            amount,
            "Mpesa Payment created"
        );

        let response = match self
            .gateway
            .stk_push(settings.environment, &access_token, &request)
            .await
        {
            Ok(response) => response,
            Err(err) => {
                let result = if matches!(err, MpesaError::GatewayStatus { .. }) { "rejected" } else { "error" };
                self.metrics.record_stk_push(result);
                error!(payment = %payment.name, error = %err, "STK push failed; payment left as Initiated");
                return Err(err);
            }
        };

        if response.checkout_request_id.is_none() {
            warn!(payment = %payment.name, "STK push response carried no CheckoutRequestID");
        }
        payment.checkout_request_id = response.checkout_request_id.clone();
        payment.merchant_request_id = response.merchant_request_id.clone();
        payment.result_code = response.response_code.clone();
        payment.result_desc = response.response_description.clone();
        self.store.save_payment(&payment).await?;
        self.metrics.record_stk_push("accepted");
        info!(
            payment = %payment.name,
            checkout_request_id = payment.checkout_request_id.as_deref().unwrap_or_default(),
            "STK push accepted"
        );
        Ok(response)
    }

    async fn ensure_invoice_exists(&self, invoice: &InvoiceRef) -> Result<(), MpesaError> {
        let exists = match invoice {
            InvoiceRef::Pos(name) => self.store.pos_invoice(name).await?.is_some(),
            InvoiceRef::Sales(name) => self.store.sales_invoice(name).await?.is_some(),
        };
        if exists {
            Ok(())
        } else {
            Err(MpesaError::InvoiceNotFound { doctype: invoice.doctype(), name: invoice.name().to_string() })
        }
    }
}
