use common_http_errors::ApiError;
use axum::body::to_bytes;
use axum::response::IntoResponse;
use axum::http::StatusCode;

#[test]
fn bad_request_variant() {
    let err = ApiError::bad_request("invalid_phone_number", "bad prefix");
    let resp = err.into_response();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(resp.headers().get("X-Error-Code").unwrap(), "invalid_phone_number");
}

#[test]
fn unauthorized_variant() {
    let resp = ApiError::Unauthorized { code: "invalid_api_key" }.into_response();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(resp.headers().get("X-Error-Code").unwrap(), "invalid_api_key");
}

#[test]
fn not_found_variant() {
    let resp = ApiError::NotFound { code: "payment_not_found", message: Some("ws_CO_1".into()) }.into_response();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(resp.headers().get("X-Error-Code").unwrap(), "payment_not_found");
}

#[test]
fn conflict_variant() {
    let resp = ApiError::Conflict { code: "payment_already_completed", message: None }.into_response();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
}

#[test]
fn bad_gateway_variant() {
    let resp = ApiError::BadGateway { code: "gateway_rejected", message: Some("HTTP 500".into()) }.into_response();
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(resp.headers().get("X-Error-Code").unwrap(), "gateway_rejected");
}

#[tokio::test]
async fn internal_variant_carries_message_in_body() {
    let resp = ApiError::internal("boom").into_response();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(resp.headers().get("X-Error-Code").unwrap(), "internal_error");
    let bytes = to_bytes(resp.into_body(), 1024).await.unwrap();
    let v: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(v["code"], "internal_error");
    assert_eq!(v["message"], "boom");
}

#[tokio::test]
async fn unauthorized_body_omits_message() {
    let resp = ApiError::Unauthorized { code: "invalid_api_key" }.into_response();
    let bytes = to_bytes(resp.into_body(), 1024).await.unwrap();
    let v: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert!(v.get("message").is_none());
}
