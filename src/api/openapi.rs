//! OpenAPI document for the gate API.

use axum::{response::IntoResponse, Json};
use utoipa::OpenApi;

use crate::api::handlers;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "guarita",
        description = "MFA enrollment and phone verification gate",
    ),
    paths(
        handlers::health::health,
        handlers::mfa::status,
        handlers::mfa::enroll,
        handlers::mfa::verify,
        handlers::mfa::disable,
        handlers::phone::send,
        handlers::phone::verify,
    ),
    components(schemas(
        crate::idp::AuthFactor,
        crate::idp::FactorStatus,
        crate::idp::Enrollment,
        crate::mfa::MfaStatus,
        handlers::mfa::MfaVerifyRequest,
        handlers::mfa::MfaDisableRequest,
        handlers::phone::PhoneSendRequest,
        handlers::phone::PhoneVerifyRequest,
    ))
)]
pub struct ApiDoc;

/// Serialized OpenAPI document.
#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

/// Serve the document at `/openapi.json`.
pub async fn serve() -> impl IntoResponse {
    Json(openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_all_routes() {
        let doc = openapi();
        let paths = doc.paths.paths;
        for expected in [
            "/health",
            "/v1/mfa/status",
            "/v1/mfa/enroll",
            "/v1/mfa/verify",
            "/v1/mfa/disable",
            "/v1/phone/send",
            "/v1/phone/verify",
        ] {
            assert!(paths.contains_key(expected), "missing path: {expected}");
        }
    }
}
