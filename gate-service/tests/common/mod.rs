//! Shared setup for gate-service integration tests: the real router over an
//! in-memory store, with a plaintext hasher so tests stay fast.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header, HeaderMap, Request, StatusCode},
    Router,
};
use gate_service::{
    build_router,
    config::{
        DatabaseConfig, Environment, GateConfig, InvitationConfig, RateLimitConfig,
        SecurityConfig, TokenConfig,
    },
    services::MemoryStore,
    utils::{CredentialHasher, Password, PasswordHashString},
    AppState,
};
use http_body_util::BodyExt;
use secrecy::Secret;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceExt;

pub const TEST_SIGNING_KEY: &str = "integration-test-signing-key-0123456789";

pub struct PlainHasher;

#[async_trait]
impl CredentialHasher for PlainHasher {
    async fn hash(&self, password: &Password) -> Result<PasswordHashString, anyhow::Error> {
        Ok(PasswordHashString::new(format!("plain:{}", password.as_str())))
    }

    async fn verify(
        &self,
        password: &Password,
        hash: &PasswordHashString,
    ) -> Result<bool, anyhow::Error> {
        Ok(hash.as_str() == format!("plain:{}", password.as_str()))
    }
}

pub fn test_config() -> GateConfig {
    GateConfig {
        common: service_core::config::Config::default(),
        environment: Environment::Dev,
        service_name: "gate-service".to_string(),
        service_version: "test".to_string(),
        log_level: "error".to_string(),
        otlp_endpoint: None,
        database: DatabaseConfig {
            url: Secret::new("postgres://unused".to_string()),
            max_connections: 1,
        },
        token: TokenConfig {
            signing_key: Secret::new(TEST_SIGNING_KEY.to_string()),
            validity_minutes: 120,
        },
        invitation: InvitationConfig {
            validity_seconds: 120,
            resend_grace_seconds: 120,
            sweep_interval_seconds: 7200,
        },
        rate_limit: RateLimitConfig {
            capacity: 1,
            refill_per_second: 1.0,
            eviction_interval_seconds: 600,
            trust_forwarded_for: false,
        },
        smtp: None,
        security: SecurityConfig {
            allowed_origins: vec!["http://localhost:3000".to_string()],
        },
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<MemoryStore>,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: serde_json::Value,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: GateConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let state = AppState::new(config, store.clone(), Arc::new(PlainHasher), None)
            .expect("Failed to build test state");
        Self {
            router: build_router(state.clone()),
            state,
            store,
        }
    }

    /// Bearer header value for a freshly issued token.
    pub fn bearer(&self, subject: &str) -> String {
        let issued = self
            .state
            .gate
            .tokens()
            .issue(subject)
            .expect("Failed to issue test token");
        format!("Bearer {}", issued.token)
    }

    pub async fn send(&self, req: Request<Body>) -> TestResponse {
        let res = self.router.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let headers = res.headers().clone();
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        TestResponse {
            status,
            headers,
            body,
        }
    }

    pub async fn post_form(&self, uri: &str, form: &str, auth: Option<&str>) -> TestResponse {
        let req = request(uri, "application/x-www-form-urlencoded", form.to_string(), auth);
        self.send(req).await
    }

    pub async fn post_json(
        &self,
        uri: &str,
        json: serde_json::Value,
        auth: Option<&str>,
    ) -> TestResponse {
        let req = request(uri, "application/json", json.to_string(), auth);
        self.send(req).await
    }

    pub async fn post_json_from(
        &self,
        client: SocketAddr,
        uri: &str,
        json: serde_json::Value,
        auth: Option<&str>,
    ) -> TestResponse {
        let mut req = request(uri, "application/json", json.to_string(), auth);
        req.extensions_mut().insert(ConnectInfo(client));
        self.send(req).await
    }

    /// Issue an invitation through the API and return its code.
    pub async fn invite(&self, email: &str) -> String {
        let auth = self.bearer("inviter@example.com");
        let res = self
            .post_form("/invite", &format!("email={}", email), Some(&auth))
            .await;
        assert_eq!(res.status, StatusCode::CREATED, "invite failed: {}", res.body);
        res.body["code"].as_str().unwrap().to_string()
    }
}

pub fn peer() -> SocketAddr {
    SocketAddr::from(([192, 0, 2, 10], 54321))
}

/// A POST as it would arrive through `into_make_service_with_connect_info`.
pub fn request(uri: &str, content_type: &str, body: String, auth: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, content_type);
    if let Some(auth) = auth {
        builder = builder.header(header::AUTHORIZATION, auth);
    }
    let mut req = builder.body(Body::from(body)).unwrap();
    req.extensions_mut().insert(ConnectInfo(peer()));
    req
}
