//! Phone verification enforcement gate.
//!
//! Applied as middleware in front of every `/v1` route: the caller is
//! resolved from the bearer token, the profile is read, and while
//! `phone_verified` is false only the phone verification endpoints answer.
//! There is no background re-check; the gate opens when a verify request
//! flips the profile and the next request reads it.

use std::sync::Arc;

use axum::{
    extract::{Extension, Request},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{error, warn};

use crate::api::AppState;

pub const MSG_UNAUTHENTICATED: &str = "Não autenticado.";
pub const MSG_PHONE_PENDING: &str = "Verificação de telefone pendente.";
pub const MSG_PROFILE_FAILURE: &str = "Não foi possível carregar o perfil.";

/// Routes that stay reachable while the gate is closed.
fn open_while_gated(path: &str) -> bool {
    path.starts_with("/v1/phone/")
}

fn bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Resolve the principal and enforce the phone verification gate.
pub async fn enforce(
    Extension(state): Extension<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(token) = bearer_token(&request) else {
        return (StatusCode::UNAUTHORIZED, MSG_UNAUTHENTICATED).into_response();
    };

    let principal = match state.provider.authenticate(token).await {
        Ok(principal) => principal,
        Err(err) => {
            warn!("token introspection rejected: {err}");
            return (StatusCode::UNAUTHORIZED, MSG_UNAUTHENTICATED).into_response();
        }
    };

    let profile = match state.profiles.security_profile(principal.user_id).await {
        Ok(profile) => profile,
        Err(err) => {
            error!("failed to load profile for gate: {err}");
            return (StatusCode::INTERNAL_SERVER_ERROR, MSG_PROFILE_FAILURE).into_response();
        }
    };

    if !profile.phone_verified && !open_while_gated(request.uri().path()) {
        return (StatusCode::FORBIDDEN, MSG_PHONE_PENDING).into_response();
    }

    request.extensions_mut().insert(principal);
    next.run(request).await
}
