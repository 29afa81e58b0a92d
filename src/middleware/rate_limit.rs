//! Request rate limiting using governor.
//!
//! Authenticated traffic is limited per `{workspace, bucket}` with
//! per-bucket quotas from configuration; unauthenticated auth endpoints are
//! limited per client IP with a strict quota.

use axum::{
    body::Body,
    extract::{ConnectInfo, Request},
    http::{HeaderValue, Response, StatusCode},
    middleware::Next,
    response::IntoResponse,
};
use governor::{
    clock::{Clock, DefaultClock},
    middleware::NoOpMiddleware,
    state::keyed::DashMapStateStore,
    Quota, RateLimiter,
};
use serde::Serialize;
use std::{
    collections::HashMap, net::IpAddr, net::SocketAddr, num::NonZeroU32, sync::Arc, time::Duration,
};
use tracing::warn;
use uuid::Uuid;

use crate::auth::Subject;
use crate::config::RateLimitsConfig;

/// Limiter key: tenant for authenticated routes, address for anonymous ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RateKey {
    Workspace(Uuid),
    Ip(IpAddr),
}

pub type KeyedRateLimiter = RateLimiter<RateKey, DashMapStateStore<RateKey>, DefaultClock, NoOpMiddleware>;

const WINDOW_SECS: u64 = 60;
const DEFAULT_BUCKET: &str = "default";

fn build_limiter(per_minute: u32) -> Option<Arc<KeyedRateLimiter>> {
    let per_minute = per_minute.max(1);

    let replenish_interval_ns = (WINDOW_SECS as u128 * 1_000_000_000) / per_minute as u128;
    let replenish_interval = Duration::from_nanos(replenish_interval_ns as u64);

    let quota = Quota::with_period(replenish_interval)?
        .allow_burst(NonZeroU32::new(per_minute.div_ceil(2).max(1))?);

    Some(Arc::new(RateLimiter::dashmap(quota)))
}

#[derive(Clone, Default)]
pub struct RateLimitState {
    buckets: HashMap<String, Arc<KeyedRateLimiter>>,
    limits: HashMap<String, u32>,
    enabled: bool,
}

impl RateLimitState {
    pub fn from_config(config: &RateLimitsConfig) -> Self {
        if !config.enabled {
            return Self::disabled();
        }

        let mut buckets = HashMap::new();
        let mut limits = HashMap::new();
        for (bucket, per_minute) in &config.per_minute {
            if let Some(limiter) = build_limiter(*per_minute) {
                buckets.insert(bucket.clone(), limiter);
                limits.insert(bucket.clone(), *per_minute);
            }
        }

        Self {
            buckets,
            limits,
            enabled: true,
        }
    }

    pub fn disabled() -> Self {
        Self {
            buckets: HashMap::new(),
            limits: HashMap::new(),
            enabled: false,
        }
    }

    fn limiter_for(&self, bucket: &str) -> Option<&Arc<KeyedRateLimiter>> {
        self.buckets
            .get(bucket)
            .or_else(|| self.buckets.get(DEFAULT_BUCKET))
    }

    fn limit_for(&self, bucket: &str) -> Option<u32> {
        self.limits
            .get(bucket)
            .or_else(|| self.limits.get(DEFAULT_BUCKET))
            .copied()
    }

    /// Fixed-quota check for `{key, bucket}`. `Ok` is the admitted path;
    /// `Err` carries the suggested retry delay.
    pub fn check(&self, bucket: &str, key: RateKey) -> Result<(), u64> {
        if !self.enabled {
            return Ok(());
        }

        let Some(limiter) = self.limiter_for(bucket) else {
            return Ok(());
        };

        match limiter.check_key(&key) {
            Ok(_) => Ok(()),
            Err(not_until) => {
                let wait = not_until.wait_time_from(DefaultClock::default().now());
                Err(wait.as_secs().max(1))
            }
        }
    }
}

/// Routes map to buckets by their first path segment under `/api`.
fn bucket_for_path(path: &str) -> &str {
    let trimmed = path.strip_prefix("/api").unwrap_or(path);
    let segment = trimmed.trim_start_matches('/').split('/').next().unwrap_or("");

    match segment {
        "auth" => "auth",
        "transformations" => "transformations",
        "documents" => "documents",
        "transformation-presets" => "presets",
        _ => DEFAULT_BUCKET,
    }
}

fn client_ip(req: &Request) -> IpAddr {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip())
        .unwrap_or(IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED))
}

#[derive(Debug, Serialize)]
pub struct RateLimitExceeded {
    pub error: String,
    pub retry_after_secs: u64,
}

impl IntoResponse for RateLimitExceeded {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::to_string(&self)
            .unwrap_or_else(|_| r#"{"error":"Rate limit exceeded"}"#.to_string());

        Response::builder()
            .status(StatusCode::TOO_MANY_REQUESTS)
            .header("Content-Type", "application/json")
            .header("Retry-After", self.retry_after_secs.to_string())
            .body(Body::from(body))
            .unwrap_or_else(|_| StatusCode::TOO_MANY_REQUESTS.into_response())
    }
}

/// Applies after authentication: the subject's workspace is the limiter key,
/// the route's bucket selects the quota.
pub async fn workspace_rate_limit_middleware(
    rate_limit_state: Option<axum::extract::Extension<RateLimitState>>,
    request: Request,
    next: Next,
) -> Result<axum::response::Response, RateLimitExceeded> {
    let state = match rate_limit_state {
        Some(axum::extract::Extension(state)) => state,
        None => return Ok(next.run(request).await),
    };

    let key = match request.extensions().get::<Subject>() {
        Some(subject) => RateKey::Workspace(subject.workspace_id),
        None => RateKey::Ip(client_ip(&request)),
    };

    let bucket = bucket_for_path(request.uri().path()).to_string();

    match state.check(&bucket, key.clone()) {
        Ok(()) => {
            let mut response = next.run(request).await;
            if let Some(limit) = state.limit_for(&bucket) {
                if let Ok(value) = HeaderValue::from_str(&limit.to_string()) {
                    response.headers_mut().insert("X-RateLimit-Limit", value);
                }
            }
            Ok(response)
        }
        Err(retry_after_secs) => {
            warn!(?key, bucket = %bucket, retry_after_secs, "Rate limit exceeded");
            Err(RateLimitExceeded {
                error: "Too many requests".to_string(),
                retry_after_secs,
            })
        }
    }
}

/// Per-IP limiter for the unauthenticated auth endpoints.
pub async fn auth_rate_limit_middleware(
    rate_limit_state: Option<axum::extract::Extension<RateLimitState>>,
    request: Request,
    next: Next,
) -> Result<axum::response::Response, RateLimitExceeded> {
    let state = match rate_limit_state {
        Some(axum::extract::Extension(state)) => state,
        None => return Ok(next.run(request).await),
    };

    let ip = client_ip(&request);

    match state.check("auth", RateKey::Ip(ip)) {
        Ok(()) => Ok(next.run(request).await),
        Err(retry_after_secs) => {
            warn!(ip = %ip, retry_after_secs, "Auth rate limit exceeded");
            Err(RateLimitExceeded {
                error: "Too many authentication attempts".to_string(),
                retry_after_secs,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitsConfig;

    fn config(pairs: &[(&str, u32)]) -> RateLimitsConfig {
        RateLimitsConfig {
            enabled: true,
            per_minute: pairs
                .iter()
                .map(|(b, l)| (b.to_string(), *l))
                .collect(),
        }
    }

    #[test]
    fn test_bucket_routing() {
        assert_eq!(bucket_for_path("/api/auth/login"), "auth");
        assert_eq!(bucket_for_path("/api/transformations"), "transformations");
        assert_eq!(bucket_for_path("/api/transformations/abc/cancel"), "transformations");
        assert_eq!(bucket_for_path("/api/documents/xyz"), "documents");
        assert_eq!(bucket_for_path("/api/transformation-presets"), "presets");
        assert_eq!(bucket_for_path("/api/unknown"), "default");
    }

    #[test]
    fn test_disabled_state_admits_everything() {
        let state = RateLimitState::disabled();
        for _ in 0..1000 {
            assert!(state.check("auth", RateKey::Ip("1.2.3.4".parse().unwrap())).is_ok());
        }
    }

    #[test]
    fn test_workspaces_have_independent_budgets() {
        let state = RateLimitState::from_config(&config(&[("default", 2)]));

        let ws1 = RateKey::Workspace(Uuid::new_v4());
        let ws2 = RateKey::Workspace(Uuid::new_v4());

        assert!(state.check("default", ws1.clone()).is_ok());
        assert!(state.check("default", ws1.clone()).is_ok());
        assert!(state.check("default", ws1).is_err());

        assert!(state.check("default", ws2).is_ok());
    }

    #[test]
    fn test_unknown_bucket_falls_back_to_default() {
        let state = RateLimitState::from_config(&config(&[("default", 1)]));

        let key = RateKey::Workspace(Uuid::new_v4());
        assert!(state.check("nonexistent", key.clone()).is_ok());
        assert!(state.check("nonexistent", key).is_err());
    }

    #[test]
    fn test_bucket_overrides_default_quota() {
        let state = RateLimitState::from_config(&config(&[("default", 100), ("auth", 1)]));

        let ip = RateKey::Ip("5.6.7.8".parse().unwrap());
        assert!(state.check("auth", ip.clone()).is_ok());
        assert!(state.check("auth", ip).is_err());
    }
}
