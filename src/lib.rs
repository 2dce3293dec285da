//! idgate registers accounts, proves email ownership through signed links
//! and logs verified users in.

#![forbid(unsafe_code)]
pub mod config;
pub mod crypto;
pub mod error;
pub mod mail;
pub mod router;
pub mod signature;
pub mod telemetry;
pub mod token;
pub mod user;

#[cfg(test)]
mod test_support;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{Method, StatusCode, header};
use axum::routing::{get, post};
use axum::{Router, middleware as AxumMiddleware};
use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::postgres::PgPoolOptions;
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::cors::{Any, CorsLayer};
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{
    DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer,
};

pub use error::ServerError;

use crate::mail::{MailManager, Mailer};
use crate::user::{
    AuthService, MemoryUserRepository, PgUserRepository, ServiceConfig,
    UserRepository,
};

const DEFAULT_POOL_SIZE: u32 = 10;

/// MUST NEVER be used in production.
#[cfg(test)]
pub async fn make_request(
    app: Router,
    method: Method,
    path: &str,
    body: String,
) -> axum::http::Response<axum::body::Body> {
    use axum::http::Request;
    use tower::util::ServiceExt;

    app.oneshot(
        Request::builder()
            .method(method)
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json")
            .body(axum::body::Body::from(body))
            .unwrap(),
    )
    .await
    .unwrap()
}

/// State sharing between routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::Configuration>,
    pub auth: Arc<AuthService>,
    pub metrics: Option<PrometheusHandle>,
}

/// Create router.
pub fn app(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .on_body_chunk(|chunk: &Bytes, latency: Duration, _span: &tracing::Span| {
                    tracing::trace!(size_bytes = chunk.len(), latency = ?latency, "sending body chunk")
                })
                .make_span_with(DefaultMakeSpan::new().include_headers(true).level(tracing::Level::INFO))
                .on_request(DefaultOnRequest::new())
                .on_response(DefaultOnResponse::new().include_headers(true).latency_unit(LatencyUnit::Micros)),
        )
        // Set a timeout.
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, Duration::from_secs(10)))
        // Remove sensitive headers from trace.
        .layer(SetSensitiveHeadersLayer::new([header::AUTHORIZATION, header::COOKIE]))
        // Add CORS preflight support.
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers(Any),
        );

    Router::new()
        // `GET /healthcheck` goes to `healthcheck`.
        .route("/healthcheck", get(router::health::healthcheck))
        .route("/metrics", get(router::health::metrics))
        // `POST /register` goes to `register`.
        .route("/register", post(router::register::handler))
        // `GET /verify` consumes verification links.
        .route("/verify", get(router::verify::handler))
        // `POST /login` goes to `login`.
        .route("/login", post(router::login::handler))
        .with_state(state)
        .route_layer(AxumMiddleware::from_fn(telemetry::track))
        .layer(middleware)
}

/// Initialize the application state.
pub async fn initialize_state(
    metrics: Option<PrometheusHandle>,
) -> Result<AppState, Box<dyn std::error::Error>> {
    // read configuration file. let it in memory.
    let config = config::Configuration::default().read()?;

    let repo: Arc<dyn UserRepository> = match &config.postgres {
        Some(pg) => {
            let pool = PgPoolOptions::new()
                .max_connections(pg.pool_size.unwrap_or(DEFAULT_POOL_SIZE))
                .connect(&pg.dsn)
                .await?;
            tracing::info!("postgres connected");

            // execute migrations scripts on start.
            sqlx::migrate!().run(&pool).await?;

            Arc::new(PgUserRepository::new(pool))
        },
        None => {
            tracing::warn!(
                "missing `postgres` entry on configuration, accounts are kept in memory"
            );
            Arc::new(MemoryUserRepository::new())
        },
    };

    // handle mail sender.
    let mailer: Arc<dyn Mailer> = match &config.mail {
        Some(cfg) => Arc::new(MailManager::new(cfg).await?),
        None => {
            tracing::warn!("missing `mail` entry on configuration, links are only logged");
            Arc::new(MailManager::default())
        },
    };

    let auth = AuthService::builder()
        .repository(repo)
        .mailer(mailer)
        .argon2(config.argon2.clone())
        .build(service_config(&config)?)?;

    Ok(AppState {
        config,
        auth: Arc::new(auth),
        metrics,
    })
}

/// [`ServiceConfig`] derived from the loaded configuration.
pub fn service_config(
    config: &config::Configuration,
) -> Result<ServiceConfig, config::ConfigError> {
    let hours = config.verification.link_validity;
    let link_validity = i64::try_from(hours)
        .ok()
        .and_then(chrono::Duration::try_hours)
        .ok_or_else(|| config::ConfigError::Invalid {
            key: "verification.link_validity".to_owned(),
            value: format!("{hours} hours"),
        })?;

    Ok(ServiceConfig {
        signing_key: config.jwt_signing_key.clone(),
        secret_key: config.secret_key.clone(),
        token_expiration: config.jwt_expiration,
        base_url: config.public_url(),
        link_validity,
        enforce_link_expiry: config.verification.enforce_expiry,
    })
}
