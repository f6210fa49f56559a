#![allow(dead_code)]

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use httpmock::prelude::*;
use httpmock::Mock;
use mpesa_service::{
    gateway::DarajaClient,
    metrics::MpesaMetrics,
    models::{Account, Company, Environment, InvoiceRef, MpesaPayment, MpesaSettings, PosInvoice, SalesInvoice},
    repo::{InMemoryStore, LedgerStore},
    MpesaConfig, MpesaService, ServiceOptions,
};
use serde_json::json;
use std::str::FromStr;
use std::sync::Arc;

pub const CONSUMER_KEY: &str = "consumer-key-0001";
pub const CONSUMER_SECRET: &str = "consumer-secret-0001";
pub const SHORTCODE: &str = "174379";
pub const SALES_INVOICE: &str = "ACC-SINV-2024-00001";
pub const POS_INVOICE: &str = "ACC-PSINV-2024-00001";
pub const COMPANY: &str = "Acme Kenya";

pub struct Fixture {
    pub server: MockServer,
    pub store: Arc<InMemoryStore>,
    pub service: Arc<MpesaService>,
}

pub fn dec(raw: &str) -> BigDecimal {
    BigDecimal::from_str(raw).unwrap()
}

pub fn settings() -> MpesaSettings {
    let mut settings = MpesaSettings::empty(Environment::Test);
    settings.consumer_key = Some(CONSUMER_KEY.into());
    settings.consumer_secret = Some(CONSUMER_SECRET.into());
    settings.passkey = Some("bfb279f9aa9bdbcf158e97dd71a467cd2e0c893059b10f78e6b72ada1ed2c919".into());
    settings.shortcode = Some(SHORTCODE.into());
    settings.callback_url = Some("https://erp.example.co.ke/api/mpesa/callback".into());
    settings
}

pub fn sales_invoice() -> SalesInvoice {
    SalesInvoice {
        name: SALES_INVOICE.into(),
        customer: "Wanjiku Stores".into(),
        company: COMPANY.into(),
        due_date: NaiveDate::from_ymd_opt(2024, 7, 31),
        grand_total: dec("1500.00"),
        outstanding_amount: dec("1500.00"),
    }
}

pub fn pos_invoice() -> PosInvoice {
    PosInvoice {
        name: POS_INVOICE.into(),
        customer: "Walk-in Customer".into(),
        company: COMPANY.into(),
        grand_total: dec("250.00"),
    }
}

pub fn mpesa_account() -> Account {
    Account {
        name: "Mpesa Till - AK".into(),
        account_name: "Mpesa Till".into(),
        account_type: Some("Bank".into()),
        is_group: false,
        disabled: false,
        company: COMPANY.into(),
    }
}

/// Store with both invoices and a receiving account.
pub fn seeded_store() -> InMemoryStore {
    InMemoryStore::new(settings())
        .with_sales_invoice(sales_invoice())
        .with_pos_invoice(pos_invoice())
        .with_account(mpesa_account())
        .with_company(Company { name: COMPANY.into(), default_cash_account: None })
}

pub async fn fixture() -> Fixture {
    fixture_with(seeded_store()).await
}

pub async fn fixture_with(store: InMemoryStore) -> Fixture {
    let server = MockServer::start_async().await;
    let config = MpesaConfig {
        sandbox_base_url: server.base_url(),
        live_base_url: server.base_url(),
        http_timeout_secs: 5,
        ..MpesaConfig::default()
    };
    let store = Arc::new(store);
    let gateway = DarajaClient::from_config(&config).unwrap();
    let service = MpesaService::new(
        store.clone(),
        Arc::new(gateway),
        Arc::new(MpesaMetrics::new().unwrap()),
        ServiceOptions::from(&config),
    );
    Fixture { server, store, service: Arc::new(service) }
}

pub async fn mock_token<'a>(server: &'a MockServer, token: &str, expires_in: serde_json::Value) -> Mock<'a> {
    let body = json!({"access_token": token, "expires_in": expires_in});
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/oauth/v1/generate")
                .query_param("grant_type", "client_credentials")
                .header_exists("authorization");
            then.status(200).json_body(body);
        })
        .await
}

pub async fn mock_stk_accepted<'a>(server: &'a MockServer, checkout_request_id: &str) -> Mock<'a> {
    let body = json!({
        "MerchantRequestID": "29115-34620561-1",
        "CheckoutRequestID": checkout_request_id,
        "ResponseCode": "0",
        "ResponseDescription": "Success. Request accepted for processing",
        "CustomerMessage": "Success. Request accepted for processing"
    });
    server
        .mock_async(|when, then| {
            when.method(POST).path("/mpesa/stkpush/v1/processrequest");
            then.status(200).json_body(body);
        })
        .await
}

/// An `Initiated` payment already correlated with the gateway.
pub async fn seed_payment(store: &InMemoryStore, invoice: InvoiceRef, checkout_request_id: &str) -> MpesaPayment {
    let mut payment = MpesaPayment::initiated(invoice, dec("1000"), "254708374149".into());
    payment.checkout_request_id = Some(checkout_request_id.into());
    payment.merchant_request_id = Some("29115-34620561-1".into());
    store.insert_payment(&payment).await.unwrap();
    payment
}

pub fn success_callback(checkout_request_id: &str, receipt: &str) -> Vec<u8> {
    json!({
        "Body": {"stkCallback": {
            "MerchantRequestID": "29115-34620561-1",
            "CheckoutRequestID": checkout_request_id,
            "ResultCode": 0,
            "ResultDesc": "The service request is processed successfully.",
            "CallbackMetadata": {"Item": [
                {"Name": "Amount", "Value": 1000},
                {"Name": "MpesaReceiptNumber", "Value": receipt},
                {"Name": "Balance"},
                {"Name": "TransactionDate", "Value": 20240719102115u64},
                {"Name": "PhoneNumber", "Value": 254708374149u64}
            ]}
        }}
    })
    .to_string()
    .into_bytes()
}

pub fn failed_callback(checkout_request_id: &str) -> Vec<u8> {
    json!({
        "Body": {"stkCallback": {
            "MerchantRequestID": "29115-34620561-1",
            "CheckoutRequestID": checkout_request_id,
            "ResultCode": 1032,
            "ResultDesc": "Request cancelled by user"
        }}
    })
    .to_string()
    .into_bytes()
}
