use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::config::MpesaConfig;
use crate::error::{truncate, MpesaError};
use crate::models::Environment;

pub const TOKEN_PATH: &str = "/oauth/v1/generate";
pub const STK_PUSH_PATH: &str = "/mpesa/stkpush/v1/processrequest";
const ERROR_DETAIL_CHARS: usize = 200;

/// Token issued by the credential exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub expires_in: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StkPushRequest {
    pub business_short_code: u64,
    pub password: String,
    pub timestamp: String,
    pub transaction_type: String,
    pub amount: i64,
    pub party_a: u64,
    pub party_b: u64,
    pub phone_number: u64,
    #[serde(rename = "CallBackURL")]
    pub callback_url: String,
    pub account_reference: String,
    pub transaction_desc: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StkPushResponse {
    #[serde(rename = "MerchantRequestID", default)]
    pub merchant_request_id: Option<String>,
    #[serde(rename = "CheckoutRequestID", default)]
    pub checkout_request_id: Option<String>,
    #[serde(rename = "ResponseCode", default)]
    pub response_code: Option<String>,
    #[serde(rename = "ResponseDescription", default)]
    pub response_description: Option<String>,
    #[serde(rename = "CustomerMessage", default)]
    pub customer_message: Option<String>,
}

/// Outbound calls to the mobile money provider.
#[async_trait]
pub trait MpesaGateway: Send + Sync {
    async fn generate_token(
        &self,
        environment: Environment,
        consumer_key: &str,
        consumer_secret: &str,
    ) -> Result<TokenGrant, MpesaError>;

    async fn stk_push(
        &self,
        environment: Environment,
        access_token: &str,
        request: &StkPushRequest,
    ) -> Result<StkPushResponse, MpesaError>;
}

pub type DynMpesaGateway = Arc<dyn MpesaGateway>;

pub fn basic_credentials(consumer_key: &str, consumer_secret: &str) -> String {
    BASE64.encode(format!("{consumer_key}:{consumer_secret}"))
}

/// Daraja REST client over `reqwest`.
#[derive(Clone)]
pub struct DarajaClient {
    http: Client,
    sandbox_base_url: String,
    live_base_url: String,
}

impl DarajaClient {
    pub fn from_config(config: &MpesaConfig) -> Result<Self, MpesaError> {
        let http = Client::builder()
            .timeout(config.http_timeout())
            .build()
            .map_err(|e| MpesaError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            sandbox_base_url: config.sandbox_base_url.trim_end_matches('/').to_string(),
            live_base_url: config.live_base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn url(&self, environment: Environment, path: &str) -> String {
        let base = match environment {
            Environment::Test => &self.sandbox_base_url,
            Environment::Live => &self.live_base_url,
        };
        format!("{base}{path}")
    }
}

/// Pull the provider's explanation out of an error body.
fn error_detail(body: &str) -> String {
    let detail = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("errorMessage")
                .or_else(|| v.get("error_description"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string());
    truncate(&detail, ERROR_DETAIL_CHARS)
}

fn parse_expires_in(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

#[async_trait]
impl MpesaGateway for DarajaClient {
    async fn generate_token(
        &self,
        environment: Environment,
        consumer_key: &str,
        consumer_secret: &str,
    ) -> Result<TokenGrant, MpesaError> {
        let url = self.url(environment, TOKEN_PATH);
        let response = self
            .http
            .get(&url)
            .query(&[("grant_type", "client_credentials")])
            .header(AUTHORIZATION, format!("Basic {}", basic_credentials(consumer_key, consumer_secret)))
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, concat!("mpesa-service/", env!("CARGO_PKG_VERSION")))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if status != StatusCode::OK {
            let detail = error_detail(&body);
            error!(status = status.as_u16(), %detail, "M-Pesa auth failed");
            return Err(MpesaError::GatewayStatus { status: status.as_u16(), detail });
        }

        let payload: Value = serde_json::from_str(&body).map_err(|_| {
            MpesaError::MalformedResponse(format!("token response is not JSON: {}", truncate(&body, ERROR_DETAIL_CHARS)))
        })?;
        let access_token = payload
            .get("access_token")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| MpesaError::MalformedResponse(format!("no access token in response: {payload}")))?;
        let expires_in = parse_expires_in(payload.get("expires_in"))
            .ok_or_else(|| MpesaError::MalformedResponse(format!("no usable expires_in in response: {payload}")))?;

        info!(environment = environment.as_str(), expires_in, "M-Pesa access token obtained");
        Ok(TokenGrant { access_token: access_token.to_string(), expires_in })
    }

    async fn stk_push(
        &self,
        environment: Environment,
        access_token: &str,
        request: &StkPushRequest,
    ) -> Result<StkPushResponse, MpesaError> {
        let url = self.url(environment, STK_PUSH_PATH);
        debug!(
            account_reference = %request.account_reference,
            amount = request.amount,
            timestamp = %request.timestamp,
            "Submitting STK push"
        );
        let response = self
            .http
            .post(&url)
            .bearer_auth(access_token)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        info!(status = status.as_u16(), "STK push response received");
        debug!(body = %body, "STK push response body");
        if !status.is_success() {
            return Err(MpesaError::GatewayStatus { status: status.as_u16(), detail: error_detail(&body) });
        }
        serde_json::from_str::<StkPushResponse>(&body).map_err(|_| {
            MpesaError::MalformedResponse(format!("STK push response is not JSON: {}", truncate(&body, ERROR_DETAIL_CHARS)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn basic_credentials_encode_key_and_secret() {
        assert_eq!(basic_credentials("key", "secret"), "a2V5OnNlY3JldA==");
    }

    #[test]
    fn error_detail_prefers_provider_message() {
        assert_eq!(error_detail(r#"{"errorMessage":"Invalid Access Token"}"#), "Invalid Access Token");
        assert_eq!(error_detail(r#"{"error_description":"bad client"}"#), "bad client");
        assert_eq!(error_detail("plain failure"), "plain failure");
        assert_eq!(error_detail(&"x".repeat(500)).len(), 200);
    }

    #[test]
    fn expires_in_accepts_numbers_and_strings() {
        assert_eq!(parse_expires_in(Some(&json!(3599))), Some(3599));
        assert_eq!(parse_expires_in(Some(&json!("3599"))), Some(3599));
        assert_eq!(parse_expires_in(Some(&json!("soon"))), None);
        assert_eq!(parse_expires_in(None), None);
    }

    #[test]
    fn stk_request_uses_provider_field_names() {
        let request = StkPushRequest {
            business_short_code: 174379,
            password: "pw".into(),
            timestamp: "20240101120000".into(),
            transaction_type: "CustomerPayBillOnline".into(),
            amount: 10,
            party_a: 254722123456,
            party_b: 174379,
            phone_number: 254722123456,
            callback_url: "https://example.com/cb".into(),
            account_reference: "SINV-1".into(),
            transaction_desc: "Payment for Sales Invoice SINV-1".into(),
        };
        let v = serde_json::to_value(&request).unwrap();
        assert_eq!(v["BusinessShortCode"], 174379);
        assert_eq!(v["PartyA"], 254722123456u64);
        assert_eq!(v["CallBackURL"], "https://example.com/cb");
        assert_eq!(v["AccountReference"], "SINV-1");
    }
}
