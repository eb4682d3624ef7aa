use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use tracing::{info, warn};

use pointer_core::context::LlmContext;
use pointer_core::errors::GatewayError;
use pointer_core::provider::{EventStream, LlmProvider, StreamOptions};

#[derive(Clone, Debug)]
pub struct ReliableConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of the delay added or removed at random.
    pub jitter_factor: f64,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_cooldown: Duration,
}

impl Default for ReliableConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.2,
            circuit_breaker_threshold: 5,
            circuit_breaker_cooldown: Duration::from_secs(60),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Closed,
    Open(Instant),
    /// Cooldown elapsed; the next outcome decides.
    Probing,
}

/// Consecutive-failure breaker shared by every turn using the provider.
#[derive(Debug)]
struct Circuit {
    threshold: u32,
    cooldown: Duration,
    inner: Mutex<(Phase, u32)>,
}

impl Circuit {
    fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold,
            cooldown,
            inner: Mutex::new((Phase::Closed, 0)),
        }
    }

    /// Whether a request may go out now.
    fn admit(&self) -> bool {
        let mut guard = self.inner.lock();
        match guard.0 {
            Phase::Closed | Phase::Probing => true,
            Phase::Open(since) if since.elapsed() >= self.cooldown => {
                guard.0 = Phase::Probing;
                true
            }
            Phase::Open(_) => false,
        }
    }

    fn succeeded(&self) {
        let mut guard = self.inner.lock();
        if guard.0 != Phase::Closed {
            info!("provider circuit closed");
        }
        *guard = (Phase::Closed, 0);
    }

    fn failed(&self) {
        let mut guard = self.inner.lock();
        guard.1 += 1;
        let trip = guard.0 == Phase::Probing || guard.1 >= self.threshold;
        if trip && !matches!(guard.0, Phase::Open(_)) {
            warn!(
                failures = guard.1,
                cooldown_secs = self.cooldown.as_secs(),
                "provider circuit opened"
            );
            guard.0 = Phase::Open(Instant::now());
        }
    }

    fn phase_name(&self) -> &'static str {
        match self.inner.lock().0 {
            Phase::Closed => "closed",
            Phase::Open(_) => "open",
            Phase::Probing => "probing",
        }
    }
}

/// Retries opening a reply stream and stops calling a provider that keeps
/// failing.
///
/// Only the opening of the stream is retried; once events flow the stream is
/// committed. An open circuit answers `ProviderOverloaded`, which the step
/// engine treats as transient. Configuration, auth and request errors do not
/// count against the circuit.
pub struct ReliableProvider<P: LlmProvider> {
    inner: P,
    config: ReliableConfig,
    circuit: Circuit,
    retries: AtomicU64,
}

impl<P: LlmProvider> ReliableProvider<P> {
    pub fn new(inner: P, config: ReliableConfig) -> Self {
        let circuit = Circuit::new(config.circuit_breaker_threshold, config.circuit_breaker_cooldown);
        Self {
            inner,
            config,
            circuit,
            retries: AtomicU64::new(0),
        }
    }

    /// Delay before retry number `retry` (0-based). A server hint wins.
    fn backoff(&self, retry: u32, hint: Option<Duration>) -> Duration {
        if let Some(hint) = hint {
            return hint;
        }
        let base = self.config.base_delay.as_millis() as f64;
        let capped = (base * 2.0_f64.powi(retry as i32)).min(self.config.max_delay.as_millis() as f64);
        let spread = capped * self.config.jitter_factor;
        let jitter = if spread > 0.0 {
            rand::thread_rng().gen_range(-spread..=spread)
        } else {
            0.0
        };
        Duration::from_millis((capped + jitter).max(1.0) as u64)
    }

    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    pub fn circuit_phase(&self) -> &'static str {
        self.circuit.phase_name()
    }
}

#[async_trait]
impl<P: LlmProvider> LlmProvider for ReliableProvider<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    async fn stream(
        &self,
        context: &LlmContext,
        options: &StreamOptions,
    ) -> Result<EventStream, GatewayError> {
        let mut retry = 0;
        loop {
            if !self.circuit.admit() {
                return Err(GatewayError::ProviderOverloaded);
            }
            let err = match self.inner.stream(context, options).await {
                Ok(stream) => {
                    self.circuit.succeeded();
                    return Ok(stream);
                }
                Err(err) => err,
            };

            if !err.is_retryable() {
                return Err(err);
            }
            self.circuit.failed();
            if retry >= self.config.max_retries {
                warn!(provider = self.inner.name(), retries = retry, error = %err, "provider retries exhausted");
                return Err(err);
            }

            let delay = self.backoff(retry, err.suggested_delay());
            self.retries.fetch_add(1, Ordering::Relaxed);
            retry += 1;
            warn!(
                provider = self.inner.name(),
                retry,
                max_retries = self.config.max_retries,
                delay_ms = delay.as_millis() as u64,
                kind = err.error_kind(),
                "retrying provider request"
            );
            tokio::time::sleep(delay).await;
        }
    }
}
