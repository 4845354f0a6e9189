use crate::bus::{Event, EventBus};
use crate::config::{RouterConfig, RoutingStrategy};
use crate::errors::CrucibleError;
use crate::metrics::MetricsRegistry;
use crate::providers::base::{ProviderAdapter, Request, ResponseTimeClass};
use crate::providers::capability::CapabilityRegistry;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Latency assumed for a provider with no recorded samples.
fn class_default_latency_ms(class: ResponseTimeClass) -> f64 {
    match class {
        ResponseTimeClass::Fast => 500.0,
        ResponseTimeClass::Medium => 2_000.0,
        ResponseTimeClass::Slow => 5_000.0,
    }
}

/// Latency normalization ceiling for the balanced score.
const BALANCED_LATENCY_CEILING_MS: f64 = 30_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Complexity {
    Simple,
    Medium,
    Complex,
}

/// Per-request routing context, derived by the caller from the request and
/// its own knowledge of the task.
#[derive(Debug, Clone)]
pub struct RouteContext {
    pub requires_tools: bool,
    pub complexity: Complexity,
    pub prioritize_speed: bool,
}

impl Default for RouteContext {
    fn default() -> Self {
        Self {
            requires_tools: false,
            complexity: Complexity::Medium,
            prioritize_speed: false,
        }
    }
}

/// Produced once per request, logged, never mutated.
#[derive(Debug, Clone, Serialize)]
pub struct RoutingDecision {
    pub selected_provider: String,
    pub confidence: f64,
    pub reasoning: String,
    pub fallback_chain: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escalation_threshold: Option<f32>,
    pub estimated_response_time_ms: u64,
}

/// Scores providers per request and builds the fallback chain.
///
/// Reads health from the metrics registry and capabilities from the
/// capability registry; writes neither.
pub struct Router {
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
    capabilities: Arc<CapabilityRegistry>,
    metrics: Arc<MetricsRegistry>,
    config: RouterConfig,
    priorities: HashMap<String, u32>,
    escalation_threshold: f32,
    bus: EventBus,
}

impl Router {
    pub fn new(
        adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
        capabilities: Arc<CapabilityRegistry>,
        metrics: Arc<MetricsRegistry>,
        config: RouterConfig,
        priorities: HashMap<String, u32>,
        escalation_threshold: f32,
        bus: EventBus,
    ) -> Self {
        Self {
            adapters,
            capabilities,
            metrics,
            config,
            priorities,
            escalation_threshold,
            bus,
        }
    }

    pub fn route(
        &self,
        req: &Request,
        ctx: &RouteContext,
    ) -> Result<RoutingDecision, CrucibleError> {
        if self.adapters.is_empty() {
            return Err(CrucibleError::Configuration(
                "no providers configured".to_string(),
            ));
        }

        if let Some(forced) = req.provider.as_deref() {
            return self.route_forced(req, ctx, forced);
        }

        let candidates = self.candidates(req, ctx)?;
        let selectable: Vec<&str> = candidates
            .iter()
            .copied()
            .filter(|name| self.selectable(name))
            .collect();
        if selectable.is_empty() {
            return Err(CrucibleError::ProviderUnavailable {
                provider: "any".to_string(),
                message: "all candidate providers are unavailable or at capacity".to_string(),
            });
        }

        let strategy = self.effective_strategy(ctx);
        let selected = self.pick(&selectable, strategy);
        let fallback_chain = self.build_chain(&selected, &candidates);
        let decision = self.decision(req, &selected, fallback_chain, strategy, ctx);
        Ok(decision)
    }

    fn route_forced(
        &self,
        req: &Request,
        ctx: &RouteContext,
        forced: &str,
    ) -> Result<RoutingDecision, CrucibleError> {
        if !self.adapters.contains_key(forced) {
            return Err(CrucibleError::Configuration(format!(
                "forced provider '{forced}' is not configured"
            )));
        }
        // Forced requests skip scoring but still validate tool capability.
        if ctx.requires_tools
            && !self
                .capabilities
                .supports_tools(forced, req.model.as_deref())
        {
            return Err(CrucibleError::NoToolCapableProvider);
        }
        let candidates = self.candidates(req, ctx).unwrap_or_default();
        let fallback_chain = self.build_chain(forced, &candidates);
        debug!(provider = forced, "forced routing");
        let decision = RoutingDecision {
            selected_provider: forced.to_string(),
            confidence: 1.0,
            reasoning: format!("provider '{forced}' forced by request"),
            fallback_chain,
            escalation_threshold: None,
            estimated_response_time_ms: self.estimated_latency_ms(forced) as u64,
        };
        self.publish(req, &decision);
        Ok(decision)
    }

    /// All providers valid for this request's context, in configured
    /// fallback-chain order. Unavailable providers stay in the list (they
    /// may recover before the tail of the chain is reached) but are never
    /// selected at index 0.
    fn candidates(&self, req: &Request, ctx: &RouteContext) -> Result<Vec<&str>, CrucibleError> {
        let mut names: Vec<&str> = self
            .config
            .fallback_chain
            .iter()
            .map(String::as_str)
            .filter(|name| self.adapters.contains_key(*name))
            .collect();
        // Configured chain first, then any registered adapter it omits.
        let mut rest: Vec<&str> = self
            .adapters
            .keys()
            .map(String::as_str)
            .filter(|name| !names.contains(name))
            .collect();
        rest.sort_unstable();
        names.extend(rest);

        if ctx.requires_tools {
            names.retain(|name| {
                self.capabilities
                    .supports_tools(name, req.model.as_deref())
            });
            if names.is_empty() {
                return Err(CrucibleError::NoToolCapableProvider);
            }
        }
        Ok(names)
    }

    fn selectable(&self, name: &str) -> bool {
        self.metrics
            .get(name)
            .is_some_and(|state| state.is_available() && !state.at_capacity())
    }

    fn effective_strategy(&self, ctx: &RouteContext) -> RoutingStrategy {
        match self.config.strategy {
            RoutingStrategy::Adaptive => {
                if ctx.complexity == Complexity::Complex {
                    RoutingStrategy::MostCapable
                } else if ctx.prioritize_speed || ctx.complexity == Complexity::Simple {
                    RoutingStrategy::Fastest
                } else {
                    RoutingStrategy::Balanced
                }
            }
            other => other,
        }
    }

    /// Pick the best provider under a strategy. Ties break by configured
    /// priority, then adapter name ascending, so identical health snapshots
    /// always produce identical decisions.
    fn pick(&self, selectable: &[&str], strategy: RoutingStrategy) -> String {
        let mut ranked: Vec<(&str, f64)> = selectable
            .iter()
            .map(|name| (*name, self.score(name, strategy)))
            .collect();
        ranked.sort_by(|(a_name, a_score), (b_name, b_score)| {
            b_score
                .partial_cmp(a_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    let a_priority = self.priorities.get(*a_name).copied().unwrap_or(u32::MAX);
                    let b_priority = self.priorities.get(*b_name).copied().unwrap_or(u32::MAX);
                    a_priority.cmp(&b_priority)
                })
                .then_with(|| a_name.cmp(b_name))
        });
        ranked[0].0.to_string()
    }

    /// Higher is better for every strategy.
    fn score(&self, name: &str, strategy: RoutingStrategy) -> f64 {
        let Some(state) = self.metrics.get(name) else {
            return 0.0;
        };
        match strategy {
            RoutingStrategy::Fastest => -self.estimated_latency_ms(name),
            RoutingStrategy::MostCapable => state.success_rate(),
            RoutingStrategy::Balanced | RoutingStrategy::Adaptive => {
                let latency = self.estimated_latency_ms(name);
                0.6 * state.success_rate()
                    + 0.4 * (1.0 - (latency / BALANCED_LATENCY_CEILING_MS).min(1.0))
            }
        }
    }

    fn estimated_latency_ms(&self, name: &str) -> f64 {
        let recorded = self
            .metrics
            .get(name)
            .map(|s| s.avg_latency_ms())
            .unwrap_or(0.0);
        if recorded > 0.0 {
            return recorded;
        }
        self.adapters
            .get(name)
            .map(|a| class_default_latency_ms(a.capabilities().response_time_class))
            .unwrap_or(BALANCED_LATENCY_CEILING_MS)
    }

    /// `[selected, …configured_chain \ {selected}]`, preserving configured
    /// order, restricted to context-valid candidates.
    fn build_chain(&self, selected: &str, candidates: &[&str]) -> Vec<String> {
        let mut chain = vec![selected.to_string()];
        chain.extend(
            candidates
                .iter()
                .filter(|name| **name != selected)
                .map(|name| (*name).to_string()),
        );
        chain
    }

    fn decision(
        &self,
        req: &Request,
        selected: &str,
        fallback_chain: Vec<String>,
        strategy: RoutingStrategy,
        ctx: &RouteContext,
    ) -> RoutingDecision {
        let state = self.metrics.get(selected);
        let confidence = state.map(|s| s.success_rate()).unwrap_or(0.5);
        let decision = RoutingDecision {
            selected_provider: selected.to_string(),
            confidence,
            reasoning: format!(
                "strategy {strategy:?} selected '{selected}' (complexity {:?}, tools {})",
                ctx.complexity, ctx.requires_tools
            ),
            fallback_chain,
            escalation_threshold: matches!(self.config.strategy, RoutingStrategy::Adaptive)
                .then_some(self.escalation_threshold),
            estimated_response_time_ms: self.estimated_latency_ms(selected) as u64,
        };
        info!(
            request_id = %req.id,
            provider = %decision.selected_provider,
            confidence = decision.confidence,
            "routing decision"
        );
        self.publish(req, &decision);
        decision
    }

    fn publish(&self, req: &Request, decision: &RoutingDecision) {
        self.bus.publish(Event::RoutingDecision {
            request_id: req.id.clone(),
            provider: decision.selected_provider.clone(),
            confidence: decision.confidence,
            fallback_chain: decision.fallback_chain.clone(),
        });
    }
}
