use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, Context, Result};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderName, HeaderValue, Method, Request,
    },
    middleware,
    routing::{get, post},
    Extension, Router,
};
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;
use url::Url;

use crate::cli::globals::GlobalArgs;
use crate::idp::{HttpIdentityProvider, IdentityProvider};
use crate::mfa::MfaService;
use crate::phone::{
    CodeStore, HttpMessenger, InMemoryCodeStore, LogMessenger, Messenger, PhoneVerificationService,
};
use crate::profile::{PgProfileStore, ProfileStore};

pub mod gate;
pub mod handlers;
mod openapi;

pub use openapi::openapi;

/// Shared state behind every handler and the gate middleware.
pub struct AppState {
    pub provider: Arc<dyn IdentityProvider>,
    pub profiles: Arc<dyn ProfileStore>,
    pub mfa: MfaService,
    pub phone: PhoneVerificationService,
}

impl AppState {
    #[must_use]
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        profiles: Arc<dyn ProfileStore>,
        codes: Arc<dyn CodeStore>,
        messenger: Arc<dyn Messenger>,
    ) -> Self {
        let mfa = MfaService::new(provider.clone(), profiles.clone());
        let phone = PhoneVerificationService::new(codes, messenger, profiles.clone());
        Self {
            provider,
            profiles,
            mfa,
            phone,
        }
    }
}

/// Build the full router for the given state. Everything under `/v1` runs
/// behind the enforcement gate; `/health` and `/openapi.json` stay outside it.
#[must_use]
pub fn router(state: Arc<AppState>) -> Router {
    let gated = Router::new()
        .route("/v1/mfa/status", get(handlers::mfa::status))
        .route("/v1/mfa/enroll", post(handlers::mfa::enroll))
        .route("/v1/mfa/verify", post(handlers::mfa::verify))
        .route("/v1/mfa/disable", post(handlers::mfa::disable))
        .route("/v1/phone/send", post(handlers::phone::send))
        .route("/v1/phone/verify", post(handlers::phone::verify))
        .layer(middleware::from_fn(gate::enforce));

    gated
        .route("/health", get(handlers::health::health))
        .route("/openapi.json", get(openapi::serve))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(Extension(state)),
        )
}

/// Start the server.
/// # Errors
/// Returns an error if the database, provider, or listener setup fails.
pub async fn new(port: u16, dsn: String, globals: &GlobalArgs) -> Result<()> {
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&dsn)
        .await
        .context("Failed to connect to database")?;

    let provider: Arc<dyn IdentityProvider> = Arc::new(HttpIdentityProvider::new(
        &globals.auth_url,
        globals.auth_service_key.clone(),
    )?);
    let profiles: Arc<dyn ProfileStore> = Arc::new(PgProfileStore::new(pool));
    let codes: Arc<dyn CodeStore> = Arc::new(InMemoryCodeStore::new());

    // Without a configured gateway, codes are logged instead of delivered.
    let messenger: Arc<dyn Messenger> = match &globals.sms_gateway_url {
        Some(url) => Arc::new(HttpMessenger::new(url, globals.sms_gateway_token.clone())?),
        None => Arc::new(LogMessenger),
    };

    let state = Arc::new(AppState::new(provider, profiles, codes, messenger));

    let frontend_origin = frontend_origin(&globals.frontend_base_url)?;
    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(AllowOrigin::exact(frontend_origin))
        .allow_credentials(true);

    let app = router(state).layer(cors);

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

fn frontend_origin(frontend_base_url: &str) -> Result<HeaderValue> {
    let parsed = Url::parse(frontend_base_url)
        .with_context(|| format!("Invalid frontend base URL: {frontend_base_url}"))?;
    let host = parsed.host_str().ok_or_else(|| {
        anyhow!("Frontend base URL must include a valid host: {frontend_base_url}")
    })?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build frontend origin header")
}
