//! Per-client rate limiting for every route, with a tighter budget on mutations.

use std::net::{IpAddr, SocketAddr};

use axum::{
    Json,
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, SecondsFormat, Utc};
use services::services::rate_limit::RateLimitDecision;
use sha2::{Digest, Sha256};
use utils::response::ApiResponse;

use crate::AppState;

pub const LIMIT_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const REMAINING_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const RESET_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Best-effort client key: forwarded address, then peer address, then a
/// User-Agent fingerprint. Spoofable, so only good for throttling.
pub fn client_identifier(headers: &HeaderMap, peer: Option<IpAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if let Some(ip) = real_ip {
        return ip.to_string();
    }

    if let Some(ip) = peer {
        return ip.to_string();
    }

    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");
    format!("ua-{:x}", Sha256::digest(user_agent.as_bytes()))
}

fn is_mutating(method: &Method) -> bool {
    !matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

fn apply_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    headers.insert(LIMIT_HEADER, HeaderValue::from(decision.limit));
    headers.insert(REMAINING_HEADER, HeaderValue::from(decision.remaining));
    let reset = decision.reset_at.to_rfc3339_opts(SecondsFormat::Secs, true);
    if let Ok(value) = HeaderValue::from_str(&reset) {
        headers.insert(RESET_HEADER, value);
    }
}

fn too_many_requests(decision: &RateLimitDecision, now: DateTime<Utc>) -> Response {
    let message = decision.error.as_deref().unwrap_or("Rate limit exceeded");
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(ApiResponse::<()>::error(message)),
    )
        .into_response();
    let headers = response.headers_mut();
    apply_headers(headers, decision);
    headers.insert(
        header::RETRY_AFTER,
        HeaderValue::from(decision.retry_after_secs(now)),
    );
    response
}

/// Check the general limiter on every request and the API limiter on
/// mutating ones. Mutations report the API limiter in their headers.
pub async fn enforce(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let identifier = client_identifier(request.headers(), peer);
    let now = Utc::now();

    let mut decision = state.general_limiter.check_at(&identifier, now);
    if decision.allowed && is_mutating(request.method()) {
        decision = state.api_limiter.check_at(&identifier, now);
    }
    if !decision.allowed {
        tracing::info!(
            identifier = %identifier,
            path = %request.uri().path(),
            "Rate limit exceeded"
        );
        return too_many_requests(&decision, now);
    }

    let mut response = next.run(request).await;
    apply_headers(response.headers_mut(), &decision);
    response
}
