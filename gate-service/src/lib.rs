pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use axum::{
    extract::State,
    http::{header, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use service_core::error::AppError;
use service_core::middleware::{
    metrics_middleware, request_id_middleware, security_headers_middleware, REQUEST_ID_HEADER,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::config::GateConfig;
use crate::middleware::access_gate_middleware;
use crate::services::{
    AccessGate, ClientRateLimiter, GatePolicy, InvitationRegistry, InvitationStore, TokenService,
};
use crate::utils::CredentialHasher;

#[derive(Clone)]
pub struct AppState {
    pub config: GateConfig,
    pub store: Arc<dyn InvitationStore>,
    pub gate: AccessGate,
    pub invitations: InvitationRegistry,
    pub hasher: Arc<dyn CredentialHasher>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(
        config: GateConfig,
        store: Arc<dyn InvitationStore>,
        hasher: Arc<dyn CredentialHasher>,
        metrics: Option<PrometheusHandle>,
    ) -> Result<Self, anyhow::Error> {
        let tokens = TokenService::new(&config.token.signing_key, config.token.validity())?;
        let limiter = ClientRateLimiter::from_config(&config.rate_limit)?;
        let invitations = InvitationRegistry::new(store.clone(), config.invitation.validity());

        Ok(Self {
            config,
            store,
            gate: AccessGate::new(tokens, limiter),
            invitations,
            hasher,
            metrics,
        })
    }
}

pub fn build_router(state: AppState) -> Router {
    // Invitation issuance and registration need a token but are not throttled.
    let bearer_routes = Router::new()
        .route("/invite", post(handlers::invitation::create_invitation))
        .route("/register", post(handlers::auth::register))
        .route_layer(from_fn_with_state(
            (state.clone(), GatePolicy::BEARER),
            access_gate_middleware,
        ));

    let login_routes = Router::new()
        .route("/login", post(handlers::auth::login))
        .route_layer(from_fn_with_state(
            (state.clone(), GatePolicy::RATE_LIMITED_BEARER),
            access_gate_middleware,
        ));

    let cors = cors_layer(&state.config.security.allowed_origins);

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(handlers::metrics::metrics))
        .route("/token", post(handlers::token::issue_token))
        .merge(bearer_routes)
        .merge(login_routes)
        .with_state(state)
        .layer(from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(cors)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    // Only reachable outside prod; config validation refuses it there.
    if allowed_origins.iter().any(|o| o == "*") {
        return cors.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!("Invalid CORS origin '{}': {}. Skipping.", origin, e);
                None
            }
        })
        .collect();

    cors.allow_origin(origins)
}

/// GET /health
pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.store.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Store health check failed");
        AppError::DatabaseError(e)
    })?;

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
    })))
}
