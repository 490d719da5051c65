//! Phone verification endpoints, reachable even while the gate is closed.

use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Deserialize;
use tracing::error;
use utoipa::ToSchema;

use crate::api::AppState;
use crate::idp::Principal;
use crate::phone::{CodeOutcome, SendOutcome};

pub const MSG_INVALID_PHONE: &str = "Número de telefone inválido.";
pub const MSG_INVALID_CODE: &str = "Código inválido.";
pub const MSG_EXPIRED_CODE: &str = "Código expirado. Solicite um novo código.";
pub const MSG_SEND_FAILURE: &str = "Não foi possível enviar o código. Tente novamente.";
pub const MSG_VERIFY_FAILURE: &str = "Não foi possível verificar o código.";

#[derive(Debug, Deserialize, ToSchema)]
pub struct PhoneSendRequest {
    pub phone: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PhoneVerifyRequest {
    pub code: String,
}

/// Dispatch a fresh verification code, replacing any pending one.
#[utoipa::path(
    post,
    path = "/v1/phone/send",
    request_body = PhoneSendRequest,
    responses(
        (status = 204, description = "Code dispatched"),
        (status = 400, description = "Invalid phone number", body = String),
        (status = 401, description = "Unauthenticated"),
        (status = 502, description = "Dispatch failed", body = String)
    ),
    tag = "phone"
)]
pub async fn send(
    Extension(state): Extension<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    payload: Option<Json<PhoneSendRequest>>,
) -> axum::response::Response {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload").into_response();
    };

    match state.phone.send_code(principal.user_id, &request.phone).await {
        Ok(SendOutcome::Sent) => StatusCode::NO_CONTENT.into_response(),
        Ok(SendOutcome::InvalidPhone) => {
            (StatusCode::BAD_REQUEST, MSG_INVALID_PHONE).into_response()
        }
        Err(err) => {
            error!("failed to send phone verification code: {err}");
            (StatusCode::BAD_GATEWAY, MSG_SEND_FAILURE).into_response()
        }
    }
}

/// Check a candidate code; on a match the gate opens.
#[utoipa::path(
    post,
    path = "/v1/phone/verify",
    request_body = PhoneVerifyRequest,
    responses(
        (status = 204, description = "Phone verified"),
        (status = 400, description = "Invalid or expired code", body = String),
        (status = 401, description = "Unauthenticated")
    ),
    tag = "phone"
)]
pub async fn verify(
    Extension(state): Extension<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    payload: Option<Json<PhoneVerifyRequest>>,
) -> axum::response::Response {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload").into_response();
    };

    match state.phone.verify_code(principal.user_id, &request.code).await {
        Ok(CodeOutcome::Verified) => StatusCode::NO_CONTENT.into_response(),
        Ok(CodeOutcome::Invalid) => (StatusCode::BAD_REQUEST, MSG_INVALID_CODE).into_response(),
        Ok(CodeOutcome::Expired) => (StatusCode::BAD_REQUEST, MSG_EXPIRED_CODE).into_response(),
        Err(err) => {
            error!("failed to verify phone code: {err}");
            (StatusCode::INTERNAL_SERVER_ERROR, MSG_VERIFY_FAILURE).into_response()
        }
    }
}
