//! Rate limiting middleware using token bucket algorithm
//!
//! Buckets are kept per client address so one caller cannot drain the
//! budget of everyone else.

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use governor::{clock::DefaultClock, state::keyed::DefaultKeyedStateStore, Quota, RateLimiter};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;
use yamdb_common::errors::AppError;

/// Per-client rate limiter using governor crate
pub type ClientRateLimiter = RateLimiter<IpAddr, DefaultKeyedStateStore<IpAddr>, DefaultClock>;

/// Tracked clients before idle buckets are evicted
const MAX_TRACKED_CLIENTS: usize = 10_000;

/// Limiter plus the configured rate, reported in rejections
#[derive(Clone)]
pub struct RateLimitState {
    limiter: Arc<ClientRateLimiter>,
    requests_per_second: u32,
}

/// Create a new rate limiter; zero values are raised to one
pub fn create_rate_limiter(requests_per_second: u32, burst: u32) -> RateLimitState {
    let rate = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
    let burst = NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN);
    let quota = Quota::per_second(rate).allow_burst(burst);

    RateLimitState {
        limiter: Arc::new(RateLimiter::keyed(quota)),
        requests_per_second: rate.get(),
    }
}

/// Client address: the first `X-Forwarded-For` hop, then the peer address.
/// Requests with neither share one bucket.
pub fn client_key(request: &Request) -> IpAddr {
    let forwarded = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .and_then(|first| first.trim().parse().ok());

    forwarded
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip())
        })
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

/// Rate limiting middleware
pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let client = client_key(&request);

    if state.limiter.len() > MAX_TRACKED_CLIENTS {
        state.limiter.retain_recent();
    }

    match state.limiter.check_key(&client) {
        Ok(_) => Ok(next.run(request).await),
        Err(_) => {
            tracing::warn!(%client, path = %request.uri().path(), "Rate limit exceeded");
            Err(AppError::RateLimited {
                limit: state.requests_per_second,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn addr(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    #[test]
    fn test_rate_limiter_creation() {
        let state = create_rate_limiter(100, 200);
        assert!(state.limiter.check_key(&addr(1)).is_ok());
    }

    #[test]
    fn test_burst_is_enforced_per_client() {
        let state = create_rate_limiter(1, 2);
        assert!(state.limiter.check_key(&addr(1)).is_ok());
        assert!(state.limiter.check_key(&addr(1)).is_ok());
        assert!(state.limiter.check_key(&addr(1)).is_err());

        // A different client still has its full budget
        assert!(state.limiter.check_key(&addr(2)).is_ok());
        assert!(state.limiter.check_key(&addr(2)).is_ok());
    }

    #[test]
    fn test_zero_config_is_clamped() {
        let state = create_rate_limiter(0, 0);
        assert_eq!(state.requests_per_second, 1);
        assert!(state.limiter.check_key(&addr(1)).is_ok());
    }

    #[test]
    fn test_client_key_sources() {
        let forwarded = Request::builder()
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_key(&forwarded), "203.0.113.7".parse::<IpAddr>().unwrap());

        let mut peer = Request::builder().body(Body::empty()).unwrap();
        peer.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 0, 2, 1], 4000))));
        assert_eq!(client_key(&peer), "192.0.2.1".parse::<IpAddr>().unwrap());

        let bare = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(client_key(&bare), IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    }
}
