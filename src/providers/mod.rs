//! AI provider adapters and the ordered registry with failover state.

pub mod anthropic;
pub mod mock;
pub mod openai;

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use deadpool_redis::Pool;
use redis::AsyncCommands;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::ProviderConfig;
use crate::transform::TransformationKind;

pub use anthropic::AnthropicProvider;
pub use mock::MockProvider;
pub use openai::OpenAiProvider;

#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub system: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone)]
pub struct ProviderReply {
    pub content: String,
    pub model: String,
    pub tokens_in: i64,
    pub tokens_out: i64,
}

impl ProviderReply {
    pub fn tokens_total(&self) -> i64 {
        self.tokens_in + self.tokens_out
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider rate limited")]
    RateLimited,
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("provider call timed out")]
    Timeout,
    #[error("provider rejected the request: {0}")]
    InvalidRequest(String),
    #[error("provider authentication failed")]
    Auth,
}

impl ProviderError {
    /// Transient errors step the breaker and move on to the next provider;
    /// deterministic errors stop the failover loop for this attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited | ProviderError::Unavailable(_) | ProviderError::Timeout
        )
    }
}

/// An external AI service adapter.
#[async_trait]
pub trait Provider: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn supports(&self, kind: TransformationKind) -> bool;

    async fn invoke(&self, request: &ProviderRequest) -> Result<ProviderReply, ProviderError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug)]
struct Breaker {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

impl Breaker {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            opened_at: None,
        }
    }

    /// Whether a call may proceed. An open breaker whose cool-down has
    /// elapsed transitions to half-open and lets one probe through.
    fn allow(&mut self, cooldown: Duration) -> bool {
        match self.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let elapsed = self
                    .opened_at
                    .map(|t| t.elapsed() >= cooldown)
                    .unwrap_or(true);
                if elapsed {
                    self.state = BreakerState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.state = BreakerState::Closed;
        self.opened_at = None;
    }

    fn record_failure(&mut self, threshold: u32) {
        self.consecutive_failures += 1;
        if self.state == BreakerState::HalfOpen || self.consecutive_failures >= threshold {
            self.state = BreakerState::Open;
            self.opened_at = Some(Instant::now());
        }
    }
}

#[derive(Debug, Default)]
pub struct UsageCounters {
    pub tokens_in: AtomicI64,
    pub tokens_out: AtomicI64,
    pub cost_micro_usd: AtomicU64,
    pub requests: AtomicU64,
}

struct ProviderSlot {
    provider: Arc<dyn Provider>,
    breaker: Mutex<Breaker>,
    usage: UsageCounters,
    cost_micro_usd_per_1k_tokens: u64,
}

/// Ordered provider set. Selection walks the configured order and yields
/// providers that support the kind and whose breaker admits a call.
/// Counters live in process and replicate to the shared store best-effort;
/// reads elsewhere are eventually consistent.
pub struct ProviderRegistry {
    slots: Vec<ProviderSlot>,
    failure_threshold: u32,
    cooldown: Duration,
    invoke_timeout: Duration,
    redis: Option<Pool>,
}

impl ProviderRegistry {
    pub fn from_config(config: &ProviderConfig, redis: Option<Pool>) -> Self {
        let mut slots = Vec::new();

        for name in &config.provider_order {
            match name.as_str() {
                "anthropic" => {
                    if let Some(key) = &config.anthropic_api_key {
                        slots.push(Self::slot(Arc::new(AnthropicProvider::new(key.clone())), 9_000));
                    } else {
                        warn!("Provider 'anthropic' configured without ANTHROPIC_API_KEY; skipping");
                    }
                }
                "openai" => {
                    if let Some(key) = &config.openai_api_key {
                        slots.push(Self::slot(Arc::new(OpenAiProvider::new(key.clone())), 6_000));
                    } else {
                        warn!("Provider 'openai' configured without OPENAI_API_KEY; skipping");
                    }
                }
                "mock" => slots.push(Self::slot(Arc::new(MockProvider::new()), 0)),
                other => warn!(provider = %other, "Unknown provider in PROVIDER_ORDER; skipping"),
            }
        }

        if slots.is_empty() {
            warn!("No usable providers configured; falling back to mock");
            slots.push(Self::slot(Arc::new(MockProvider::new()), 0));
        }

        info!(
            providers = ?slots.iter().map(|s| s.provider.name()).collect::<Vec<_>>(),
            "Provider registry initialized"
        );

        Self {
            slots,
            failure_threshold: config.breaker_failure_threshold,
            cooldown: Duration::from_secs(config.breaker_cooldown_secs),
            invoke_timeout: Duration::from_secs(config.request_timeout_secs),
            redis,
        }
    }

    /// Registry with explicit adapters, used by executor tests to inject
    /// failing providers.
    pub fn with_providers(
        providers: Vec<Arc<dyn Provider>>,
        failure_threshold: u32,
        cooldown: Duration,
        invoke_timeout: Duration,
    ) -> Self {
        Self {
            slots: providers.into_iter().map(|p| Self::slot(p, 0)).collect(),
            failure_threshold,
            cooldown,
            invoke_timeout,
            redis: None,
        }
    }

    fn slot(provider: Arc<dyn Provider>, cost_micro_usd_per_1k_tokens: u64) -> ProviderSlot {
        ProviderSlot {
            provider,
            breaker: Mutex::new(Breaker::new()),
            usage: UsageCounters::default(),
            cost_micro_usd_per_1k_tokens,
        }
    }

    /// Indexes of providers eligible for this kind, in configured order.
    pub fn candidates(&self, kind: TransformationKind) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.provider.supports(kind))
            .filter(|(_, slot)| {
                slot.breaker
                    .lock()
                    .map(|mut b| b.allow(self.cooldown))
                    .unwrap_or(false)
            })
            .map(|(idx, _)| idx)
            .collect()
    }

    pub fn provider_name(&self, idx: usize) -> &'static str {
        self.slots[idx].provider.name()
    }

    pub fn breaker_state(&self, name: &str) -> Option<BreakerState> {
        self.slots
            .iter()
            .find(|slot| slot.provider.name() == name)
            .and_then(|slot| slot.breaker.lock().ok().map(|b| b.state))
    }

    /// Invokes a provider under the hard timeout, stepping the breaker and
    /// counters according to the outcome.
    pub async fn invoke(
        &self,
        idx: usize,
        request: &ProviderRequest,
    ) -> Result<ProviderReply, ProviderError> {
        let slot = &self.slots[idx];

        let outcome = match tokio::time::timeout(self.invoke_timeout, slot.provider.invoke(request))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout),
        };

        match &outcome {
            Ok(reply) => {
                if let Ok(mut breaker) = slot.breaker.lock() {
                    breaker.record_success();
                }

                slot.usage.requests.fetch_add(1, Ordering::Relaxed);
                slot.usage
                    .tokens_in
                    .fetch_add(reply.tokens_in, Ordering::Relaxed);
                slot.usage
                    .tokens_out
                    .fetch_add(reply.tokens_out, Ordering::Relaxed);

                let cost = (reply.tokens_total().max(0) as u64)
                    .saturating_mul(slot.cost_micro_usd_per_1k_tokens)
                    / 1000;
                slot.usage.cost_micro_usd.fetch_add(cost, Ordering::Relaxed);

                self.replicate_usage(slot.provider.name(), reply, cost).await;
            }
            Err(e) if e.is_transient() => {
                if let Ok(mut breaker) = slot.breaker.lock() {
                    breaker.record_failure(self.failure_threshold);
                    debug!(
                        provider = slot.provider.name(),
                        failures = breaker.consecutive_failures,
                        state = breaker.state.as_str(),
                        "Provider failure recorded"
                    );
                }
            }
            Err(_) => {}
        }

        outcome
    }

    /// Best-effort mirror of usage counters into the shared store so other
    /// instances see an eventually-consistent view. Mild under-counting
    /// under failure is acceptable.
    async fn replicate_usage(&self, provider: &str, reply: &ProviderReply, cost_micro_usd: u64) {
        let Some(pool) = &self.redis else { return };
        let Ok(mut conn) = pool.get().await else {
            return;
        };

        let key = format!("recast:usage:{}", provider);
        let _: Result<(), _> = conn.hincr(&key, "tokens_in", reply.tokens_in).await;
        let _: Result<(), _> = conn.hincr(&key, "tokens_out", reply.tokens_out).await;
        let _: Result<(), _> = conn
            .hincr(&key, "cost_micro_usd", cost_micro_usd as i64)
            .await;
        let _: Result<(), _> = conn.hincr(&key, "requests", 1).await;
    }
}
