use super::limiter::RateLimiter;
use crate::metrics::Timer;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Header carrying the original client address behind a proxy
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Admission middleware state
#[derive(Clone)]
pub struct AdmissionState {
    limiter: Arc<RateLimiter>,
    /// Use the first `X-Forwarded-For` entry as the identifier when present
    trust_forwarded_for: bool,
}

impl AdmissionState {
    pub fn new(limiter: Arc<RateLimiter>, trust_forwarded_for: bool) -> Self {
        Self {
            limiter,
            trust_forwarded_for,
        }
    }
}

/// Pick the identifier a request is limited by
fn client_identifier(headers: &HeaderMap, peer: &SocketAddr, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for {
        let forwarded = headers
            .get(FORWARDED_FOR_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());

        if let Some(client) = forwarded {
            return client.to_string();
        }
    }

    peer.ip().to_string()
}

/// Whole seconds to advertise in `Retry-After`, rounded up and never zero
fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
    secs.max(1)
}

/// Create a 429 Too Many Requests response
fn too_many_requests_response(threshold: u64, retry_after: Duration) -> Response {
    let mut headers = HeaderMap::new();
    let retry_after = retry_after_secs(retry_after);

    headers.insert("X-RateLimit-Limit", HeaderValue::from(threshold));
    headers.insert("Retry-After", HeaderValue::from(retry_after));

    let body = serde_json::json!({
        "error": "Request rate too high",
        "status": 429,
        "limit": threshold,
        "retry_after": retry_after,
    });

    (StatusCode::TOO_MANY_REQUESTS, headers, body.to_string()).into_response()
}

/// Axum middleware classifying every request by client address
///
/// Install with `axum::middleware::from_fn_with_state`; the router must be
/// served with `into_make_service_with_connect_info::<SocketAddr>()`.
pub async fn admission_middleware(
    State(state): State<AdmissionState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    let identifier = client_identifier(request.headers(), &addr, state.trust_forwarded_for);

    let timer = Timer::new();
    let result = state.limiter.admit(&identifier).await;
    timer.record();

    match result {
        Ok(admission) if admission.is_admitted() => {
            debug!(identifier = %identifier, "Request admitted");
            next.run(request).await
        }
        Ok(admission) => {
            warn!(
                identifier = %identifier,
                path = %request.uri().path(),
                retry_after_secs = admission.retry_after.as_secs(),
                "Request throttled"
            );
            too_many_requests_response(state.limiter.threshold(), admission.retry_after)
        }
        Err(e) => {
            warn!(identifier = %identifier, error = %e, "Request classification failed");
            e.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_identifier_peer() {
        let peer: SocketAddr = "192.168.1.1:52000".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(FORWARDED_FOR_HEADER, HeaderValue::from_static("10.0.0.1"));

        assert_eq!(client_identifier(&headers, &peer, false), "192.168.1.1");
    }

    #[test]
    fn test_client_identifier_forwarded() {
        let peer: SocketAddr = "192.168.1.1:52000".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(
            FORWARDED_FOR_HEADER,
            HeaderValue::from_static(" 10.0.0.1, 172.16.0.1"),
        );

        assert_eq!(client_identifier(&headers, &peer, true), "10.0.0.1");
        assert_eq!(
            client_identifier(&HeaderMap::new(), &peer, true),
            "192.168.1.1"
        );
    }

    #[test]
    fn test_too_many_requests_response() {
        let response = too_many_requests_response(100, Duration::from_secs(60));

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let headers = response.headers();
        assert_eq!(headers.get("X-RateLimit-Limit").unwrap(), "100");
        assert_eq!(headers.get("Retry-After").unwrap(), "60");

        let response = too_many_requests_response(100, Duration::from_secs(17));
        assert_eq!(response.headers().get("Retry-After").unwrap(), "17");
    }

    #[test]
    fn test_retry_after_secs_rounds_up() {
        assert_eq!(retry_after_secs(Duration::from_secs(15)), 15);
        assert_eq!(retry_after_secs(Duration::from_millis(14_200)), 15);
        assert_eq!(retry_after_secs(Duration::from_millis(300)), 1);
        assert_eq!(retry_after_secs(Duration::ZERO), 1);
    }
}
