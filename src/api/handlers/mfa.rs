//! MFA endpoints: status, enrollment, verification, step-up disable.
//!
//! Failure bodies are deliberately uniform: a rejected code, an expired
//! challenge, and a provider hiccup during verification all read "Código
//! inválido." to the caller.

use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Deserialize;
use serde_json::json;
use tracing::error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::api::AppState;
use crate::idp::Principal;
use crate::mfa::{DisableOutcome, MfaStatus, VerifyOutcome};

pub const MSG_INVALID_CODE: &str = "Código inválido.";
pub const MSG_NOT_ENABLED: &str = "MFA não está habilitado.";
pub const MSG_MFA_FAILURE: &str = "Não foi possível concluir a operação de MFA.";

#[derive(Debug, Deserialize, ToSchema)]
pub struct MfaVerifyRequest {
    pub factor_id: Uuid,
    pub code: String,
    pub challenge_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct MfaDisableRequest {
    pub code: String,
}

/// Current MFA state, reconciled against the identity provider.
#[utoipa::path(
    get,
    path = "/v1/mfa/status",
    responses(
        (status = 200, description = "MFA status", body = MfaStatus),
        (status = 401, description = "Unauthenticated")
    ),
    tag = "mfa"
)]
pub async fn status(
    Extension(state): Extension<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
) -> axum::response::Response {
    match state.mfa.check_status(principal.user_id).await {
        Ok(status) => (StatusCode::OK, Json(status)).into_response(),
        Err(err) => {
            error!("failed to check MFA status: {err}");
            (StatusCode::INTERNAL_SERVER_ERROR, MSG_MFA_FAILURE).into_response()
        }
    }
}

/// Begin TOTP enrollment and return the material to display once.
#[utoipa::path(
    post,
    path = "/v1/mfa/enroll",
    responses(
        (status = 200, description = "Enrollment material", body = crate::idp::Enrollment),
        (status = 401, description = "Unauthenticated")
    ),
    tag = "mfa"
)]
pub async fn enroll(
    Extension(state): Extension<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
) -> axum::response::Response {
    match state.mfa.enroll(principal.user_id).await {
        Ok(enrollment) => (StatusCode::OK, Json(enrollment)).into_response(),
        Err(err) => {
            error!("failed to start MFA enrollment: {err}");
            (StatusCode::INTERNAL_SERVER_ERROR, MSG_MFA_FAILURE).into_response()
        }
    }
}

/// Verify a code for a factor, enabling MFA on first success.
#[utoipa::path(
    post,
    path = "/v1/mfa/verify",
    request_body = MfaVerifyRequest,
    responses(
        (status = 204, description = "Factor verified"),
        (status = 400, description = "Invalid code", body = String),
        (status = 401, description = "Unauthenticated")
    ),
    tag = "mfa"
)]
pub async fn verify(
    Extension(state): Extension<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    payload: Option<Json<MfaVerifyRequest>>,
) -> axum::response::Response {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload").into_response();
    };

    match state
        .mfa
        .verify(
            principal.user_id,
            request.factor_id,
            request.code.trim(),
            request.challenge_id,
        )
        .await
    {
        Ok(VerifyOutcome::Verified) => StatusCode::NO_CONTENT.into_response(),
        Ok(VerifyOutcome::Invalid) => (StatusCode::BAD_REQUEST, MSG_INVALID_CODE).into_response(),
        Err(err) => {
            error!("failed to verify MFA factor: {err}");
            (StatusCode::INTERNAL_SERVER_ERROR, MSG_MFA_FAILURE).into_response()
        }
    }
}

/// Disable MFA after a step-up code check; removes every enrolled factor.
#[utoipa::path(
    post,
    path = "/v1/mfa/disable",
    request_body = MfaDisableRequest,
    responses(
        (status = 200, description = "MFA disabled; body carries removed factor count"),
        (status = 400, description = "Invalid step-up code", body = String),
        (status = 401, description = "Unauthenticated"),
        (status = 409, description = "MFA not enabled", body = String)
    ),
    tag = "mfa"
)]
pub async fn disable(
    Extension(state): Extension<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    payload: Option<Json<MfaDisableRequest>>,
) -> axum::response::Response {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload").into_response();
    };

    match state.mfa.disable(principal.user_id, request.code.trim()).await {
        Ok(DisableOutcome::Disabled { removed }) => {
            (StatusCode::OK, Json(json!({ "removed": removed }))).into_response()
        }
        Ok(DisableOutcome::Rejected) => {
            (StatusCode::BAD_REQUEST, MSG_INVALID_CODE).into_response()
        }
        Ok(DisableOutcome::NotEnabled) => (StatusCode::CONFLICT, MSG_NOT_ENABLED).into_response(),
        Err(err) => {
            error!("failed to disable MFA: {err}");
            (StatusCode::INTERNAL_SERVER_ERROR, MSG_MFA_FAILURE).into_response()
        }
    }
}
