use axum::{
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use metrics::counter;
use service_core::error::AppError;
use std::net::{IpAddr, SocketAddr};

use crate::services::{GatePolicy, ServiceError};
use crate::AppState;

/// Identity of a request admitted by [`access_gate_middleware`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedSubject {
    pub subject: String,
    /// The bearer token as presented, for binding sessions to it.
    pub token: String,
}

/// Runs the access gate for `policy` in front of a route group.
pub async fn access_gate_middleware(
    State((state, policy)): State<(AppState, GatePolicy)>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let client = client_ip(&req, state.config.rate_limit.trust_forwarded_for);
    let authorization = req
        .headers()
        .get(header::AUTHORIZATION)
        .map(|value| value.as_bytes());

    let admission = state
        .gate
        .admit(policy, client, authorization, Utc::now())
        .map_err(|rejection| {
            tracing::warn!(
                reason = rejection.reason(),
                client = ?client,
                path = %req.uri().path(),
                "Request rejected by access gate"
            );
            counter!("gate_rejections_total", "reason" => rejection.reason()).increment(1);
            AppError::from(ServiceError::from(rejection))
        })?;

    if let (Some(subject), Some(token)) = (admission.subject, admission.token) {
        req.extensions_mut()
            .insert(AuthenticatedSubject { subject, token });
    }

    Ok(next.run(req).await)
}

/// Peer address from `ConnectInfo`, or the first `X-Forwarded-For` hop when
/// the deployment says a proxy sets it.
pub fn client_ip(req: &Request, trust_forwarded_for: bool) -> Option<IpAddr> {
    if trust_forwarded_for {
        let forwarded = req
            .headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.split(',').next())
            .and_then(|s| s.trim().parse::<IpAddr>().ok());
        if forwarded.is_some() {
            return forwarded;
        }
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthenticatedSubject
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedSubject>()
            .cloned()
            .ok_or_else(|| {
                AppError::InternalError(anyhow::anyhow!(
                    "Authenticated subject missing from request extensions"
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request(forwarded: Option<&str>) -> Request {
        let mut builder = axum::http::Request::builder().uri("/login");
        if let Some(value) = forwarded {
            builder = builder.header("x-forwarded-for", value);
        }
        let mut req = builder.body(Body::empty()).unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 1], 4000))));
        req
    }

    #[test]
    fn uses_peer_address_by_default() {
        let req = request(Some("203.0.113.9"));
        assert_eq!(client_ip(&req, false), Some("10.0.0.1".parse().unwrap()));
    }

    #[test]
    fn uses_first_forwarded_hop_when_trusted() {
        let req = request(Some("203.0.113.9, 10.0.0.2"));
        assert_eq!(client_ip(&req, true), Some("203.0.113.9".parse().unwrap()));
    }

    #[test]
    fn falls_back_to_peer_on_garbage_forwarded_header() {
        let req = request(Some("not-an-ip"));
        assert_eq!(client_ip(&req, true), Some("10.0.0.1".parse().unwrap()));
    }

    #[test]
    fn unknown_without_connect_info() {
        let req = axum::http::Request::builder().body(Body::empty()).unwrap();
        assert_eq!(client_ip(&req, false), None);
    }
}
