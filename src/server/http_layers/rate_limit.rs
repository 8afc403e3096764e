//! Sliding-window rate limiting middleware.
//!
//! Counters are kept per (route bucket, client IP). The first value of
//! `X-Forwarded-For` preempts the socket peer address. A janitor pass runs at
//! most every 5 minutes and drops timestamps older than an hour.

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::warn;

const CLEANUP_INTERVAL: Duration = Duration::from_secs(300);
const RETENTION: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy)]
pub struct RateLimitRule {
    pub max_requests: usize,
    pub window: Duration,
}

/// Per-bucket rules. Unknown buckets are not limited.
pub fn rule_for(bucket: &str) -> Option<RateLimitRule> {
    let rule = match bucket {
        "authorize" => RateLimitRule {
            max_requests: 10,
            window: Duration::from_secs(60),
        },
        "token" => RateLimitRule {
            max_requests: 20,
            window: Duration::from_secs(60),
        },
        "bind" => RateLimitRule {
            max_requests: 5,
            window: Duration::from_secs(60),
        },
        "auth_code" => RateLimitRule {
            max_requests: 10,
            window: Duration::from_secs(60),
        },
        _ => return None,
    };
    Some(rule)
}

struct LimiterInner {
    storage: HashMap<String, Vec<Instant>>,
    last_cleanup: Instant,
}

/// In-memory sliding-window limiter shared by every HTTP handler.
pub struct RateLimiter {
    inner: Mutex<LimiterInner>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LimiterInner {
                storage: HashMap::new(),
                last_cleanup: Instant::now(),
            }),
        }
    }

    fn cleanup(inner: &mut LimiterInner, now: Instant) {
        if now.duration_since(inner.last_cleanup) < CLEANUP_INTERVAL {
            return;
        }
        inner.storage.retain(|_, requests| {
            requests.retain(|t| now.duration_since(*t) < RETENTION);
            !requests.is_empty()
        });
        inner.last_cleanup = now;
    }

    /// Records the request when allowed; otherwise returns the seconds the
    /// caller should wait before retrying.
    pub fn check(&self, key: &str, rule: &RateLimitRule) -> Result<(), u64> {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();
        Self::cleanup(&mut inner, now);

        let requests = inner.storage.entry(key.to_string()).or_default();
        requests.retain(|t| now.duration_since(*t) < rule.window);

        if requests.len() >= rule.max_requests {
            let oldest = requests.iter().min().copied().unwrap_or(now);
            let elapsed = now.duration_since(oldest);
            let retry_after = rule.window.saturating_sub(elapsed).as_secs() + 1;
            return Err(retry_after);
        }

        requests.push(now);
        Ok(())
    }
}

/// Client address for rate limiting: first `X-Forwarded-For` value, else the
/// socket peer.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    if let Some(forwarded) = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// State for the rate-limit middleware: the shared limiter plus the bucket
/// name of the wrapped route group.
#[derive(Clone)]
pub struct RateLimitContext {
    pub limiter: Arc<RateLimiter>,
    pub bucket: &'static str,
}

pub async fn rate_limit(
    State(ctx): State<RateLimitContext>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(rule) = rule_for(ctx.bucket) else {
        return next.run(request).await;
    };

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let ip = client_ip(request.headers(), peer);
    let key = format!("{}:{}", ctx.bucket, ip);

    match ctx.limiter.check(&key, &rule) {
        Ok(()) => next.run(request).await,
        Err(retry_after) => {
            warn!(
                "Rate limit exceeded: bucket={} ip={} retry_after={}s",
                ctx.bucket, ip, retry_after
            );
            crate::server::metrics::RATE_LIMITED.inc();
            (
                StatusCode::TOO_MANY_REQUESTS,
                [("Retry-After", retry_after.to_string())],
                "Too many requests",
            )
                .into_response()
        }
    }
}
