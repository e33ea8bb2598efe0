//! Per-IP rate limiting.

use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::num::{NonZeroU32, NonZeroUsize};
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use governor::{Quota, RateLimiter};
use lru::LruCache;
use tokio::sync::Mutex;

use super::types::{PredictResponse, ServerConfig};
use super::ServerState;

pub type IpRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Maximum number of per-IP rate limiter entries to keep in the LRU cache.
const MAX_RATE_LIMITER_ENTRIES: NonZeroUsize = match NonZeroUsize::new(10_000) {
    Some(n) => n,
    None => unreachable!(),
};

/// IPv6 addresses share a limiter per /64 prefix.
pub fn rate_limit_key(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V4(_) => ip,
        IpAddr::V6(v6) => {
            let seg = v6.segments();
            IpAddr::V6(Ipv6Addr::new(seg[0], seg[1], seg[2], seg[3], 0, 0, 0, 0))
        }
    }
}

/// Get or create a rate limiter for the given IP. `None` when limiting is off.
pub async fn get_rate_limiter(
    config: &ServerConfig,
    rate_limiters: &Mutex<LruCache<IpAddr, Arc<IpRateLimiter>>>,
    ip: IpAddr,
) -> Option<Arc<IpRateLimiter>> {
    let rpm = NonZeroU32::new(config.rate_limit_rpm)?;
    let key = rate_limit_key(ip);

    let mut limiters = rate_limiters.lock().await;

    if let Some(limiter) = limiters.get(&key) {
        return Some(Arc::clone(limiter));
    }

    let limiter = Arc::new(RateLimiter::direct(Quota::per_minute(rpm)));
    limiters.push(key, Arc::clone(&limiter));

    Some(limiter)
}

pub fn new_rate_limiter_cache() -> Mutex<LruCache<IpAddr, Arc<IpRateLimiter>>> {
    Mutex::new(LruCache::new(MAX_RATE_LIMITER_ENTRIES))
}

/// Rejects `/api/v1/*` requests over the per-IP quota with 429.
pub async fn rate_limit_middleware(
    axum::extract::State(state): axum::extract::State<Arc<ServerState>>,
    axum::extract::ConnectInfo(addr): axum::extract::ConnectInfo<SocketAddr>,
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    if let Some(limiter) = get_rate_limiter(&state.config, &state.rate_limiters, addr.ip()).await {
        if limiter.check().is_err() {
            state.usage.record_error();
            tracing::warn!(client = %addr.ip(), "rate limit exceeded");
            return (
                StatusCode::TOO_MANY_REQUESTS,
                axum::Json(PredictResponse::failure(
                    format!(
                        "Rate limit exceeded. Maximum {} requests per minute.",
                        state.config.rate_limit_rpm
                    ),
                    0,
                )),
            )
                .into_response();
        }
    }
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ipv6_aggregated_to_prefix() {
        let a: IpAddr = "2001:db8:1:2:aaaa::1".parse().unwrap();
        let b: IpAddr = "2001:db8:1:2:bbbb::9".parse().unwrap();
        let c: IpAddr = "2001:db8:1:3::1".parse().unwrap();
        assert_eq!(rate_limit_key(a), rate_limit_key(b));
        assert_ne!(rate_limit_key(a), rate_limit_key(c));

        let v4: IpAddr = "10.0.0.7".parse().unwrap();
        assert_eq!(rate_limit_key(v4), v4);
    }

    #[tokio::test]
    async fn test_limiter_disabled_and_shared() {
        let cache = new_rate_limiter_cache();
        let ip: IpAddr = "127.0.0.1".parse().unwrap();

        let off = ServerConfig {
            rate_limit_rpm: 0,
            ..Default::default()
        };
        assert!(get_rate_limiter(&off, &cache, ip).await.is_none());

        let on = ServerConfig {
            rate_limit_rpm: 1,
            ..Default::default()
        };
        let first = get_rate_limiter(&on, &cache, ip).await.unwrap();
        assert!(first.check().is_ok());
        let again = get_rate_limiter(&on, &cache, ip).await.unwrap();
        assert!(again.check().is_err());
    }
}
