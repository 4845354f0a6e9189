use crate::bus::{Event, EventBus};
use crate::errors::CrucibleError;
use crate::metrics::MetricsRegistry;
use crate::providers::base::{ProviderAdapter, Request, Response, ResponseTimeClass};
use crate::routing::router::RoutingDecision;
use crate::utils::cancel::CancelSignal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const BACKOFF_MULTIPLIER: f64 = 2.0;
const MAX_BACKOFF_MS: u64 = 10_000;

/// How the executor walks the fallback chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Selected provider first, then the fallback chain, within the retry
    /// budget.
    Direct,
    /// Only the explicitly requested provider; the chain is used only when
    /// `allow_fallback` is set.
    Forced { allow_fallback: bool },
    /// Fast provider first; escalate to the next provider in the chain
    /// when confidence falls below the threshold.
    Hybrid,
}

/// Terminal result of one request's provider execution.
#[derive(Debug)]
pub struct ExecutionReport {
    pub response: Response,
    pub escalated: bool,
    /// Providers that produced a response, in call order.
    pub providers: Vec<String>,
    pub attempts: u32,
    /// Wall clock from executor entry to terminal state.
    pub total_time: Duration,
}

#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    pub max_retries: usize,
    pub escalation_threshold: f32,
    pub attempt_timeout: Duration,
    pub backoff_base_ms: u64,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            max_retries: 2,
            escalation_threshold: 0.7,
            attempt_timeout: Duration::from_secs(30),
            backoff_base_ms: 500,
        }
    }
}

/// Walks the routing decision's fallback chain, owning load accounting and
/// per-attempt failure bookkeeping for every provider it touches.
pub struct HybridExecutor {
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
    metrics: Arc<MetricsRegistry>,
    options: ExecutorOptions,
    bus: EventBus,
}

impl HybridExecutor {
    pub fn new(
        adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
        metrics: Arc<MetricsRegistry>,
        options: ExecutorOptions,
        bus: EventBus,
    ) -> Self {
        Self {
            adapters,
            metrics,
            options,
            bus,
        }
    }

    pub async fn execute(
        &self,
        req: &Request,
        decision: &RoutingDecision,
        mode: ExecutionMode,
        cancel: CancelSignal,
    ) -> Result<ExecutionReport, CrucibleError> {
        let started = Instant::now();
        if decision.fallback_chain.is_empty() {
            return Err(CrucibleError::Configuration(
                "routing decision has an empty fallback chain".to_string(),
            ));
        }

        match mode {
            ExecutionMode::Hybrid => self.execute_hybrid(req, decision, cancel, started).await,
            ExecutionMode::Direct => {
                self.execute_chain(req, &decision.fallback_chain, cancel, started)
                    .await
            }
            ExecutionMode::Forced { allow_fallback } => {
                let chain: Vec<String> = if allow_fallback {
                    decision.fallback_chain.clone()
                } else {
                    vec![decision.selected_provider.clone()]
                };
                self.execute_chain(req, &chain, cancel, started).await
            }
        }
    }

    /// Walk the chain, wrapping around while the retry budget lasts. Total
    /// provider attempts never exceed `max_retries + 1`.
    async fn execute_chain(
        &self,
        req: &Request,
        chain: &[String],
        mut cancel: CancelSignal,
        started: Instant,
    ) -> Result<ExecutionReport, CrucibleError> {
        let mut last_error: Option<CrucibleError> = None;
        let budget = self.options.max_retries + 1;

        for attempt in 0..budget {
            if cancel.is_cancelled() {
                return Err(CrucibleError::Cancelled);
            }
            if attempt > 0 {
                self.backoff(attempt, &mut cancel).await?;
            }
            let provider = &chain[attempt % chain.len()];
            match self.attempt(req, provider, &mut cancel).await {
                Ok(response) => {
                    return Ok(ExecutionReport {
                        response,
                        escalated: false,
                        providers: vec![provider.clone()],
                        attempts: attempt as u32 + 1,
                        total_time: started.elapsed(),
                    });
                }
                Err(e) if e.is_recoverable() => {
                    warn!(provider = %provider, attempt, "attempt failed: {e}");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or(CrucibleError::ProviderUnavailable {
            provider: chain[0].clone(),
            message: "all fallback attempts exhausted".to_string(),
        }))
    }

    /// Fast provider first; on low confidence re-issue to the next provider
    /// in the chain and prefer its answer. A failed escalation retains the
    /// fast response.
    async fn execute_hybrid(
        &self,
        req: &Request,
        decision: &RoutingDecision,
        mut cancel: CancelSignal,
        started: Instant,
    ) -> Result<ExecutionReport, CrucibleError> {
        let fast = &decision.fallback_chain[0];
        let first = match self.attempt(req, fast, &mut cancel).await {
            Ok(response) => response,
            Err(e) if e.is_recoverable() && decision.fallback_chain.len() > 1 => {
                // The fast tier is down; fall through the rest of the chain.
                return self
                    .execute_chain(req, &decision.fallback_chain[1..], cancel, started)
                    .await;
            }
            Err(e) => return Err(e),
        };

        let threshold = decision
            .escalation_threshold
            .unwrap_or(self.options.escalation_threshold);
        let confidence = self.confidence_of(fast, &first);
        if confidence >= threshold {
            return Ok(ExecutionReport {
                response: first,
                escalated: false,
                providers: vec![fast.clone()],
                attempts: 1,
                total_time: started.elapsed(),
            });
        }

        let Some(capable) = decision.fallback_chain.get(1) else {
            debug!("confidence {confidence:.2} below threshold but no escalation target");
            return Ok(ExecutionReport {
                response: first,
                escalated: false,
                providers: vec![fast.clone()],
                attempts: 1,
                total_time: started.elapsed(),
            });
        };

        info!(
            from = %fast,
            to = %capable,
            confidence,
            threshold,
            "escalating request"
        );
        match self.attempt(req, capable, &mut cancel).await {
            Ok(response) => Ok(ExecutionReport {
                response,
                escalated: true,
                providers: vec![fast.clone(), capable.clone()],
                attempts: 2,
                total_time: started.elapsed(),
            }),
            Err(CrucibleError::Cancelled) => Err(CrucibleError::Cancelled),
            Err(e) => {
                warn!("escalation to '{capable}' failed, keeping fast response: {e}");
                Ok(ExecutionReport {
                    response: first,
                    escalated: false,
                    providers: vec![fast.clone()],
                    attempts: 2,
                    total_time: started.elapsed(),
                })
            }
        }
    }

    /// One provider attempt with load accounting. The load guard is held
    /// for the attempt's duration and released on drop, so the counter
    /// comes back down on success, error, timeout, and cancellation alike.
    async fn attempt(
        &self,
        req: &Request,
        provider: &str,
        cancel: &mut CancelSignal,
    ) -> Result<Response, CrucibleError> {
        let adapter = self.adapters.get(provider).ok_or_else(|| {
            CrucibleError::Configuration(format!("provider '{provider}' is not configured"))
        })?;
        let state = self.metrics.get(provider).ok_or_else(|| {
            CrucibleError::Configuration(format!("provider '{provider}' has no metrics entry"))
        })?;

        let _load = state.begin_attempt();
        let deadline = req.timeout.min(self.options.attempt_timeout);
        let started = Instant::now();

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(CrucibleError::Cancelled),
            outcome = tokio::time::timeout(deadline, adapter.request(req)) => match outcome {
                Ok(inner) => inner,
                Err(_) => Err(CrucibleError::ProviderTimeout {
                    provider: provider.to_string(),
                    elapsed_ms: deadline.as_millis() as u64,
                }),
            },
        };

        let elapsed = started.elapsed();
        match &result {
            Ok(_) => state.record_success(elapsed),
            Err(CrucibleError::Cancelled) => {}
            Err(e) => state.record_failure(&e.to_string()),
        }
        self.bus.publish(Event::ProviderPerformance {
            provider: provider.to_string(),
            success: result.is_ok(),
            latency_ms: elapsed.as_millis() as u64,
        });
        result
    }

    async fn backoff(
        &self,
        attempt: usize,
        cancel: &mut CancelSignal,
    ) -> Result<(), CrucibleError> {
        let base = (self.options.backoff_base_ms as f64
            * BACKOFF_MULTIPLIER.powi(attempt as i32 - 1))
        .min(MAX_BACKOFF_MS as f64) as u64;
        let jitter = (base as f64 * 0.25 * fastrand::f64()) as u64;
        let delay = Duration::from_millis(base + jitter);
        debug!("waiting {}ms before retry", delay.as_millis());
        tokio::select! {
            _ = cancel.cancelled() => Err(CrucibleError::Cancelled),
            () = tokio::time::sleep(delay) => Ok(()),
        }
    }

    /// Confidence for a response whose adapter did not supply one.
    fn confidence_of(&self, provider: &str, response: &Response) -> f32 {
        if let Some(native) = response.confidence {
            return native;
        }
        let class = self
            .adapters
            .get(provider)
            .map(|a| a.capabilities().response_time_class)
            .unwrap_or(ResponseTimeClass::Medium);
        derive_confidence(response, class)
    }
}

/// Latency above which a response counts as excessively slow for its class.
fn class_latency_budget(class: ResponseTimeClass) -> Duration {
    match class {
        ResponseTimeClass::Fast => Duration::from_secs(2),
        ResponseTimeClass::Medium => Duration::from_secs(10),
        ResponseTimeClass::Slow => Duration::from_secs(30),
    }
}

/// Shape-based confidence: base 0.8, penalties for very short output,
/// error-ish wording, and excessive latency; bonuses for code fences and
/// sub-second fast-tier replies. Clamped to [0.1, 1.0].
pub fn derive_confidence(response: &Response, class: ResponseTimeClass) -> f32 {
    let mut confidence: f32 = 0.8;
    if response.content.len() < 10 && response.tool_calls.is_empty() {
        confidence -= 0.3;
    }
    if response.content.contains("error") || response.content.contains("Error") {
        confidence -= 0.2;
    }
    if response.response_time > class_latency_budget(class) {
        confidence -= 0.2;
    }
    if response.content.contains("```") {
        confidence += 0.1;
    }
    if class == ResponseTimeClass::Fast && response.response_time < Duration::from_secs(1) {
        confidence += 0.1;
    }
    confidence.clamp(0.1, 1.0)
}

#[cfg(test)]
mod tests;
