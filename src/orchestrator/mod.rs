use crate::agent::react::{ReactLoop, ReactOutcome};
use crate::agent::tools::base::ToolContext;
use crate::agent::tools::filesystem::{ListFilesTool, ReadFileTool, WriteFileTool};
use crate::agent::tools::search::SearchCodeTool;
use crate::agent::tools::{AsyncToolExecutor, ToolRegistry};
use crate::bus::EventBus;
use crate::config::{Config, RoutingStrategy};
use crate::errors::CrucibleError;
use crate::isolation::IsolationManager;
use crate::metrics::{MetricsRegistry, ProviderState};
use crate::providers::base::{ProviderAdapter, ProviderHealth, Request};
use crate::providers::capability::CapabilityRegistry;
use crate::providers::lm_studio::LmStudioAdapter;
use crate::providers::ollama::OllamaAdapter;
use crate::request::{RequestDraft, RequestProcessor};
use crate::routing::{
    Complexity, ExecutionMode, ExecutionReport, ExecutorOptions, HybridExecutor, RouteContext,
    Router,
};
use crate::search::SearchEngine;
use crate::session::SessionManager;
use crate::streaming::{StreamOutcome, StreamPipeline, StreamSession};
use crate::utils::cancel::CancelSignal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Snapshot served by `GET /health` and `crucible status`.
#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub providers: HashMap<String, ProviderHealth>,
}

/// Top-level wiring: every component is constructed once at startup and
/// injected explicitly; per-request state lives on the stack of the
/// handling task.
pub struct Orchestrator {
    config: Config,
    processor: RequestProcessor,
    router: Router,
    executor: HybridExecutor,
    pipeline: StreamPipeline,
    react: ReactLoop,
    tools: Arc<AsyncToolExecutor>,
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
    metrics: Arc<MetricsRegistry>,
    isolation: Arc<IsolationManager>,
    pub sessions: SessionManager,
    bus: EventBus,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("adapters", &self.adapters.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn new(config: Config) -> Result<Self, CrucibleError> {
        config.validate().map_err(CrucibleError::Configuration)?;
        let bus = EventBus::default();
        let workspace = config.workspace_path();
        let probe_timeout = Duration::from_secs(config.providers.probe_timeout_secs);

        let mut adapters: HashMap<String, Arc<dyn ProviderAdapter>> = HashMap::new();
        let mut metrics = MetricsRegistry::new();
        let mut priorities = HashMap::new();
        if config.providers.lm_studio.enabled {
            let endpoint = &config.providers.lm_studio;
            adapters.insert(
                "lm-studio".to_string(),
                Arc::new(LmStudioAdapter::new(
                    endpoint.base_url.clone(),
                    endpoint.default_model.clone(),
                    probe_timeout,
                )),
            );
            metrics.register(ProviderState::new("lm-studio", endpoint.max_load));
            priorities.insert("lm-studio".to_string(), endpoint.priority);
        }
        if config.providers.ollama.enabled {
            let endpoint = &config.providers.ollama;
            adapters.insert(
                "ollama".to_string(),
                Arc::new(OllamaAdapter::new(
                    endpoint.base_url.clone(),
                    endpoint.default_model.clone(),
                    probe_timeout,
                )),
            );
            metrics.register(ProviderState::new("ollama", endpoint.max_load));
            priorities.insert("ollama".to_string(), endpoint.priority);
        }
        if adapters.is_empty() {
            return Err(CrucibleError::Configuration(
                "no providers enabled".to_string(),
            ));
        }
        let metrics = Arc::new(metrics);
        let capabilities = Arc::new(CapabilityRegistry::new());

        let isolation = Arc::new(IsolationManager::new(
            config.isolation.default_level,
            bus.clone(),
        ));
        let search = Arc::new(SearchEngine::new(workspace, &config.search));
        let mut registry = ToolRegistry::new(Arc::clone(&isolation));
        registry.register(Arc::new(ListFilesTool));
        registry.register(Arc::new(ReadFileTool));
        registry.register(Arc::new(WriteFileTool));
        registry.register(Arc::new(SearchCodeTool::new(Arc::clone(&search))));
        let tools = Arc::new(AsyncToolExecutor::new(
            Arc::new(registry),
            Duration::from_secs(config.executor.tool.cache_ttl_seconds),
            Duration::from_secs(config.executor.tool.default_timeout_secs),
            config.executor.tool.max_concurrent_batch,
            bus.clone(),
        ));

        let router = Router::new(
            adapters.clone(),
            Arc::clone(&capabilities),
            Arc::clone(&metrics),
            config.router.clone(),
            priorities,
            config.executor.hybrid.escalation_threshold,
            bus.clone(),
        );
        let executor = HybridExecutor::new(
            adapters.clone(),
            Arc::clone(&metrics),
            ExecutorOptions {
                max_retries: config.router.max_retries,
                escalation_threshold: config.executor.hybrid.escalation_threshold,
                attempt_timeout: Duration::from_secs(config.providers.attempt_timeout_secs),
                ..Default::default()
            },
            bus.clone(),
        );
        let pipeline = StreamPipeline::new(config.streaming.channel_capacity, bus.clone());
        let react = ReactLoop::new(Arc::clone(&tools), config.agent.max_reasoning_steps);

        Ok(Self {
            processor: RequestProcessor::new(&config),
            router,
            executor,
            pipeline,
            react,
            tools,
            adapters,
            metrics,
            isolation,
            sessions: SessionManager::new(),
            bus,
            config,
        })
    }

    /// Probe every adapter once, feeding results into the health map.
    pub async fn probe_providers(&self) {
        for (name, adapter) in &self.adapters {
            let available = adapter.is_available().await;
            if let Some(state) = self.metrics.get(name) {
                state.record_probe(available);
            }
            info!(provider = %name, available, "provider probe");
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn accept(&self, draft: RequestDraft) -> Result<Request, CrucibleError> {
        self.processor.accept(draft)
    }

    fn route_context(&self, req: &Request, requires_tools: bool) -> RouteContext {
        let complexity = match req.prompt.len() {
            0..=80 => Complexity::Simple,
            81..=400 => Complexity::Medium,
            _ => Complexity::Complex,
        };
        RouteContext {
            requires_tools,
            complexity,
            prioritize_speed: req.priority == crate::providers::base::Priority::Low,
        }
    }

    fn execution_mode(&self, req: &Request) -> ExecutionMode {
        if req.provider.is_some() {
            ExecutionMode::Forced {
                allow_fallback: false,
            }
        } else if self.config.router.strategy == RoutingStrategy::Adaptive {
            ExecutionMode::Hybrid
        } else {
            ExecutionMode::Direct
        }
    }

    fn session_id(req: &Request) -> String {
        req.context
            .session_id
            .clone()
            .unwrap_or_else(|| req.id.clone())
    }

    /// Non-streaming completion through router and hybrid executor.
    pub async fn complete(
        &self,
        req: &Request,
        cancel: CancelSignal,
    ) -> Result<ExecutionReport, CrucibleError> {
        let session_id = Self::session_id(req);
        self.isolation.create(&session_id, None).await;
        let requires_tools = !req.tools.is_empty();
        let result = async {
            let ctx = self.route_context(req, requires_tools);
            let decision = self.router.route(req, &ctx)?;
            self.executor
                .execute(req, &decision, self.execution_mode(req), cancel)
                .await
        }
        .await;
        self.isolation.terminate(&session_id).await;
        result
    }

    /// Streaming completion: route, open the adapter stream (falling back
    /// through the chain on open failure), and run the pipeline. The
    /// provider's load is held until the stream reaches terminal state.
    pub async fn stream(
        &self,
        req: &Request,
        cancel: CancelSignal,
    ) -> Result<StreamSession, CrucibleError> {
        let ctx = self.route_context(req, !req.tools.is_empty());
        let decision = self.router.route(req, &ctx)?;

        let mut last_error: Option<CrucibleError> = None;
        for provider in &decision.fallback_chain {
            let Some(adapter) = self.adapters.get(provider) else {
                continue;
            };
            let Some(state) = self.metrics.get(provider) else {
                continue;
            };
            let load = state.begin_attempt();
            match adapter.stream(req).await {
                Ok(chunks) => {
                    let StreamSession { tokens, outcome } =
                        self.pipeline
                            .run(req.id.clone(), provider.clone(), chunks, cancel.clone());
                    let started = std::time::Instant::now();
                    // Hold the load guard until the stream terminates, then
                    // settle metrics from the outcome.
                    let outcome = tokio::spawn(async move {
                        let result = outcome.await;
                        let outcome = result.unwrap_or_else(|e| {
                            warn!("stream task failed: {e}");
                            StreamOutcome {
                                content: String::new(),
                                tool_calls: vec![],
                                usage: Default::default(),
                                finish_reason: crate::providers::base::FinishReason::Error,
                                token_count: 0,
                                cancelled: false,
                            }
                        });
                        if outcome.finish_reason == crate::providers::base::FinishReason::Error {
                            state.record_failure("stream error");
                        } else if !outcome.cancelled {
                            state.record_success(started.elapsed());
                        }
                        drop(load);
                        outcome
                    });
                    return Ok(StreamSession { tokens, outcome });
                }
                Err(e) if e.is_recoverable() => {
                    drop(load);
                    state.record_failure(&e.to_string());
                    warn!(provider = %provider, "stream open failed: {e}");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error.unwrap_or(CrucibleError::ProviderUnavailable {
            provider: decision.selected_provider,
            message: "no provider could open a stream".to_string(),
        }))
    }

    /// Multi-step tool-using agent over the ReAct loop.
    pub async fn run_agent(
        &self,
        req: &Request,
        cancel: CancelSignal,
    ) -> Result<ReactOutcome, CrucibleError> {
        let session_id = Self::session_id(req);
        self.isolation.create(&session_id, None).await;
        let tool_ctx = ToolContext {
            request_id: req.id.clone(),
            session_id: session_id.clone(),
            workspace: req
                .context
                .working_directory
                .clone()
                .unwrap_or_else(|| self.config.workspace_path()),
            security_level: req.context.security_level,
        };
        let result = async {
            let ctx = self.route_context(req, true);
            let decision = self.router.route(req, &ctx)?;
            self.react
                .run(req, &self.executor, &decision, &tool_ctx, cancel)
                .await
        }
        .await;
        if let Some(report) = self.isolation.terminate(&session_id).await
            && !report.violations.is_empty()
        {
            warn!(
                session = %session_id,
                violations = report.violations.len(),
                "session ended with isolation violations"
            );
        }
        result
    }

    pub async fn health(&self) -> HealthReport {
        let providers = self.metrics.health_snapshot();
        let healthy = providers.values().any(|p| p.available);
        HealthReport { healthy, providers }
    }

    /// Per-provider health plus served models, for `crucible status`.
    pub async fn status(&self) -> Vec<ProviderStatus> {
        let mut out = Vec::new();
        for (name, adapter) in &self.adapters {
            let models = adapter.list_models().await.unwrap_or_default();
            let health = self
                .metrics
                .get(name)
                .map(|s| s.health())
                .unwrap_or(ProviderHealth {
                    available: false,
                    current_load: 0,
                    max_load: 0,
                    avg_response_time_ms: 0.0,
                    error_rate: 0.0,
                    last_error: None,
                });
            out.push(ProviderStatus {
                name: name.clone(),
                health,
                models,
            });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub async fn clear_tool_history(&self) {
        self.tools.clear_history().await;
    }
}

#[derive(Debug, Serialize)]
pub struct ProviderStatus {
    pub name: String,
    pub health: ProviderHealth,
    pub models: Vec<String>,
}
