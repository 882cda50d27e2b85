//! Admission middleware for axum routers.
//!
//! Every non-exempt request is evaluated before its handler runs. Denied
//! requests get a 429 with retry hints; admitted ones get quota headers on
//! the handler's response. Either way the final status is recorded so the
//! quarantine tracker sees repeat offenders.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::warn;

use crate::ratelimit::{
    AdmissionEngine, ClientIdentity, Decision, Evaluation, LimitingDimension, RateLimitRule,
    RequestMetadata, TOO_MANY_REQUESTS,
};

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");
const LIMIT_MINUTE: HeaderName = HeaderName::from_static("x-ratelimit-limit-minute");
const LIMIT_HOUR: HeaderName = HeaderName::from_static("x-ratelimit-limit-hour");
const REMAINING_MINUTE: HeaderName = HeaderName::from_static("x-ratelimit-remaining-minute");
const REMAINING_HOUR: HeaderName = HeaderName::from_static("x-ratelimit-remaining-hour");

/// Path prefixes exempt from admission control unless configured otherwise.
pub const DEFAULT_EXEMPT_PATHS: &[&str] = &["/health", "/metrics", "/docs", "/openapi.json"];

/// Shared state for [`admission_middleware`].
#[derive(Clone)]
pub struct AdmissionState {
    engine: Arc<AdmissionEngine>,
    exempt_paths: Arc<[String]>,
}

impl AdmissionState {
    pub fn new(engine: Arc<AdmissionEngine>, exempt_paths: Vec<String>) -> Self {
        Self {
            engine,
            exempt_paths: exempt_paths.into(),
        }
    }

    /// State exempting [`DEFAULT_EXEMPT_PATHS`].
    pub fn with_default_exemptions(engine: Arc<AdmissionEngine>) -> Self {
        let exempt_paths = DEFAULT_EXEMPT_PATHS.iter().map(|p| p.to_string()).collect();
        Self::new(engine, exempt_paths)
    }

    pub fn engine(&self) -> &Arc<AdmissionEngine> {
        &self.engine
    }

    /// Exempt paths match by prefix.
    pub fn is_exempt(&self, path: &str) -> bool {
        self.exempt_paths.iter().any(|prefix| path.starts_with(prefix.as_str()))
    }
}

/// Wrap every route of `router` in admission control.
pub fn with_admission<S>(router: Router<S>, state: AdmissionState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.layer(axum::middleware::from_fn_with_state(state, admission_middleware))
}

#[derive(Serialize)]
struct Rejection {
    error: &'static str,
    retry_after: u64,
    timestamp: f64,
}

/// Evaluate the request, reject or forward it, and record the outcome.
pub async fn admission_middleware(
    State(state): State<AdmissionState>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if state.is_exempt(&path) {
        return next.run(request).await;
    }

    let Evaluation {
        client_key,
        rule,
        decision,
    } = state.engine.evaluate(&request_metadata(&request));

    if !decision.allowed {
        let mut response = rejection(&decision);
        attach_limit_headers(response.headers_mut(), &rule, &decision);
        // Overload denials reflect server capacity, not client behavior
        if decision.limiting_dimension != LimitingDimension::Overload {
            state
                .engine
                .record(&client_key, &rule, &path, TOO_MANY_REQUESTS);
        }
        return response;
    }

    let mut response = next.run(request).await;
    attach_limit_headers(response.headers_mut(), &rule, &decision);
    state
        .engine
        .record(&client_key, &rule, &path, response.status().as_u16());
    response
}

/// Collect what the engine needs from the request.
fn request_metadata(request: &Request) -> RequestMetadata {
    let headers = request.headers();
    RequestMetadata {
        path: request.uri().path().to_string(),
        identity: request.extensions().get::<ClientIdentity>().cloned(),
        remote_addr: client_address(request),
        user_agent: header_str(headers, &header::USER_AGENT).map(str::to_string),
    }
}

/// The caller's address: first forwarded hop, then X-Real-IP, then the peer.
fn client_address(request: &Request) -> Option<String> {
    let headers = request.headers();

    let forwarded = header_str(headers, &X_FORWARDED_FOR)
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|hop| !hop.is_empty());
    if let Some(hop) = forwarded {
        return Some(hop.to_string());
    }

    let real_ip = header_str(headers, &X_REAL_IP)
        .map(str::trim)
        .filter(|ip| !ip.is_empty());
    if let Some(ip) = real_ip {
        return Some(ip.to_string());
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn rejection(decision: &Decision) -> Response {
    let body = Rejection {
        error: decision.error_code(),
        retry_after: decision.retry_after_seconds,
        timestamp: unix_timestamp(),
    };

    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    response.headers_mut().insert(
        header::RETRY_AFTER,
        HeaderValue::from(decision.retry_after_seconds),
    );
    response
}

fn attach_limit_headers(headers: &mut HeaderMap, rule: &RateLimitRule, decision: &Decision) {
    headers.insert(LIMIT_MINUTE, HeaderValue::from(rule.requests_per_minute));
    headers.insert(LIMIT_HOUR, HeaderValue::from(rule.requests_per_hour));
    headers.insert(REMAINING_MINUTE, HeaderValue::from(decision.remaining_minute));
    headers.insert(REMAINING_HOUR, HeaderValue::from(decision.remaining_hour));
}

fn unix_timestamp() -> f64 {
    let now = chrono::Utc::now();
    match now.timestamp_nanos_opt() {
        Some(nanos) => nanos as f64 / 1e9,
        None => {
            warn!("System time out of range for response timestamp");
            now.timestamp() as f64
        }
    }
}
