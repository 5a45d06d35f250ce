//! Token bucket rate limiting for the HTTP API.
//!
//! Requests carrying a valid bearer token are limited per user, so clients
//! sharing an address (NAT, a proxy) do not starve each other. Anything else
//! falls back to the client IP.

use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use palaver_shared::UserId;
use tokio::sync::Mutex;
use tracing::warn;

use crate::api::AppState;
use crate::auth::{authenticate, bearer_token};

/// Whose bucket a request is charged to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientKey {
    User(UserId),
    Ip(IpAddr),
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientKey::User(id) => write!(f, "user:{id}"),
            ClientKey::Ip(ip) => write!(f, "ip:{ip}"),
        }
    }
}

#[derive(Debug, Clone)]
struct Bucket {
    tokens: f64,
    last_seen: Instant,
}

impl Bucket {
    fn full(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_seen: Instant::now(),
        }
    }

    fn take(&mut self, rate: f64, capacity: f64) -> bool {
        let now = Instant::now();
        let refill = now.duration_since(self.last_seen).as_secs_f64() * rate;
        self.last_seen = now;
        self.tokens = (self.tokens + refill).min(capacity);

        if self.tokens < 1.0 {
            return false;
        }
        self.tokens -= 1.0;
        true
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<ClientKey, Bucket>>>,
    /// Tokens added per second.
    rate: f64,
    /// Burst size.
    capacity: f64,
}

impl RateLimiter {
    pub fn new(rate: f64, capacity: f64) -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            rate,
            capacity,
        }
    }

    pub async fn check(&self, key: ClientKey) -> bool {
        let mut buckets = self.buckets.lock().await;
        buckets
            .entry(key)
            .or_insert_with(|| Bucket::full(self.capacity))
            .take(self.rate, self.capacity)
    }

    /// Drop buckets idle for longer than `max_idle_secs`. Returns how many
    /// were removed.
    pub async fn purge_stale(&self, max_idle_secs: f64) -> usize {
        let mut buckets = self.buckets.lock().await;
        let before = buckets.len();
        let now = Instant::now();
        buckets.retain(|_, b| now.duration_since(b.last_seen).as_secs_f64() < max_idle_secs);
        before - buckets.len()
    }
}

impl Default for RateLimiter {
    /// 10 req/s sustained, burst of 30.
    fn default() -> Self {
        Self::new(10.0, 30.0)
    }
}

pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = bearer_token(req.headers()).map(str::to_owned);
    let ip = client_ip(&req);

    if let Some(key) = client_key(&state, token.as_deref(), ip).await {
        if !state.rate_limiter.check(key).await {
            warn!(client = %key, path = %req.uri().path(), "Rate limit exceeded");
            return Err(StatusCode::TOO_MANY_REQUESTS);
        }
    }

    Ok(next.run(req).await)
}

/// The user behind a valid token, else the client IP.
async fn client_key(state: &AppState, token: Option<&str>, ip: Option<IpAddr>) -> Option<ClientKey> {
    if let Some(token) = token {
        let user = {
            let db = state.db.lock().await;
            authenticate(&db, token)
        };
        if let Ok(user) = user {
            return Some(ClientKey::User(user.id));
        }
    }
    ip.map(ClientKey::Ip)
}

/// Peer address first, then `X-Forwarded-For`, then `X-Real-IP`.
fn client_ip<B>(req: &Request<B>) -> Option<IpAddr> {
    if let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
        return Some(addr.ip());
    }

    let header = |name: &str| req.headers().get(name).and_then(|v| v.to_str().ok());

    header("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .and_then(|first| first.trim().parse().ok())
        .or_else(|| header("x-real-ip").and_then(|v| v.trim().parse().ok()))
}
