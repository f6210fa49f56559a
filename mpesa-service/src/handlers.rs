use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::Response,
    Json,
};
use common_http_errors::{ApiError, ApiResult};
use serde::Serialize;

use crate::callback::{CallbackAck, CallbackReport};
use crate::gateway::StkPushResponse;
use crate::stk::{PaymentStatusView, StkPushCommand};
use crate::token::CredentialReport;
use crate::AppState;

#[derive(Serialize)]
pub struct TokenResponse {
    pub access_token: String,
}

pub async fn health() -> &'static str {
    "ok"
}

pub async fn metrics(State(state): State<AppState>) -> ApiResult<Response> {
    state.service.metrics().render().map_err(ApiError::internal)
}

pub async fn access_token(State(state): State<AppState>) -> ApiResult<Json<TokenResponse>> {
    let access_token = state.service.access_token().await?;
    Ok(Json(TokenResponse { access_token }))
}

pub async fn check_credentials(State(state): State<AppState>) -> ApiResult<Json<CredentialReport>> {
    Ok(Json(state.service.check_credentials().await?))
}

pub async fn initiate_stk_push(
    State(state): State<AppState>,
    payload: Result<Json<StkPushCommand>, JsonRejection>,
) -> ApiResult<Json<StkPushResponse>> {
    let Json(command) = payload.map_err(|rejection| ApiError::bad_request("invalid_request", rejection.body_text()))?;
    Ok(Json(state.service.initiate_stk_push(command).await?))
}

pub async fn payment_status(
    State(state): State<AppState>,
    Path(checkout_request_id): Path<String>,
) -> ApiResult<Json<PaymentStatusView>> {
    Ok(Json(state.service.payment_status(&checkout_request_id).await?))
}

pub async fn resend_stk_push(
    State(state): State<AppState>,
    Path(checkout_request_id): Path<String>,
) -> ApiResult<Json<StkPushResponse>> {
    Ok(Json(state.service.resend_stk_push(&checkout_request_id).await?))
}

pub async fn mpesa_callback(State(state): State<AppState>, body: Bytes) -> (StatusCode, Json<CallbackAck>) {
    acknowledge(
        state.service.handle_callback(&body).await,
        CallbackAck::success(Some("Callback processed")),
    )
}

pub async fn mpesa_simple_callback(State(state): State<AppState>, body: Bytes) -> (StatusCode, Json<CallbackAck>) {
    acknowledge(state.service.handle_simple_callback(&body).await, CallbackAck::success(None))
}

fn acknowledge(
    result: Result<CallbackReport, crate::callback::CallbackError>,
    success: CallbackAck,
) -> (StatusCode, Json<CallbackAck>) {
    match result {
        Ok(_) => (StatusCode::OK, Json(success)),
        Err(err) => (err.status(), Json(err.ack())),
    }
}
