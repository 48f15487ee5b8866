//! Security middleware
//!
//! Adds hardening headers to every response and logs requests that look
//! like scanner traffic or injection attempts. Suspicious requests are only
//! logged, never blocked.

use axum::{
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};

use crate::api::middleware::AppState;
use crate::config::SecurityConfig;

const X_POWERED_BY: HeaderName = HeaderName::from_static("x-powered-by");
const X_XSS_PROTECTION: HeaderName = HeaderName::from_static("x-xss-protection");
const PERMISSIONS_POLICY: HeaderName = HeaderName::from_static("permissions-policy");

/// Precomputed response headers and suspicious-request patterns
#[derive(Debug, Clone)]
pub struct SecurityHeaders {
    headers: Vec<(HeaderName, HeaderValue)>,
    suspicious_agents: Vec<String>,
    suspicious_patterns: Vec<String>,
}

impl SecurityHeaders {
    pub fn from_config(config: &SecurityConfig) -> Self {
        let mut headers = vec![
            (header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff")),
            (header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY")),
            (X_XSS_PROTECTION, HeaderValue::from_static("1; mode=block")),
            (
                PERMISSIONS_POLICY,
                HeaderValue::from_static("geolocation=(), microphone=(), camera=()"),
            ),
        ];

        let mut push = |name: HeaderName, value: String| match HeaderValue::from_str(&value) {
            Ok(value) => headers.push((name, value)),
            Err(_) => tracing::warn!("Ignoring invalid {} header value: {}", name, value),
        };
        push(header::REFERRER_POLICY, config.referrer_policy.clone());
        if let Some(csp) = config.csp.header_value() {
            push(header::CONTENT_SECURITY_POLICY, csp);
        }
        if let Some(seconds) = config.hsts_seconds {
            push(
                header::STRICT_TRANSPORT_SECURITY,
                format!("max-age={}; includeSubDomains", seconds),
            );
        }

        Self {
            headers,
            suspicious_agents: lowercase(&config.suspicious_agents),
            suspicious_patterns: lowercase(&config.suspicious_patterns),
        }
    }

    pub fn apply(&self, headers: &mut HeaderMap) {
        for (name, value) in &self.headers {
            headers.insert(name.clone(), value.clone());
        }
        headers.remove(header::SERVER);
        headers.remove(X_POWERED_BY);
    }

    /// Why a request looks malicious, if it does
    pub fn suspicion(&self, user_agent: &str, path_and_query: &str) -> Option<String> {
        let agent = user_agent.to_lowercase();
        if let Some(tool) = self.suspicious_agents.iter().find(|a| agent.contains(a.as_str())) {
            return Some(format!("scanner user agent '{}'", tool));
        }

        let raw = path_and_query.to_lowercase();
        let decoded = urlencoding::decode(path_and_query)
            .map(|s| s.to_lowercase())
            .unwrap_or_else(|_| raw.clone());
        self.suspicious_patterns
            .iter()
            .find(|p| raw.contains(p.as_str()) || decoded.contains(p.as_str()))
            .map(|p| format!("request matches '{}'", p))
    }
}

fn lowercase(values: &[String]) -> Vec<String> {
    values.iter().map(|v| v.to_lowercase()).collect()
}

/// Client address: first `X-Forwarded-For` hop, then `X-Real-IP`, then the
/// peer address of the connection
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<IpAddr> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse().ok());
    let real_ip = || {
        headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
    };
    forwarded.or_else(real_ip).or(peer.map(|addr| addr.ip()))
}

/// Extractor for the client address as resolved by [`client_ip`]
#[derive(Debug, Clone, Copy)]
pub struct ClientIp(pub Option<IpAddr>);

impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(ClientIp(client_ip(&parts.headers, peer)))
    }
}

/// Security middleware, outermost on the router
pub async fn security_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let user_agent = request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    if let Some(reason) = state.security.suspicion(user_agent, path_and_query) {
        let peer = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        let ip = client_ip(request.headers(), peer)
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        tracing::warn!(
            target: "security",
            %ip,
            method = %request.method(),
            path = %path_and_query,
            user_agent = %user_agent,
            "Suspicious request: {}",
            reason
        );
    }

    let mut response = next.run(request).await;
    state.security.apply(response.headers_mut());
    response
}
