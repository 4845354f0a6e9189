use serde::{Deserialize, Serialize};
use std::path::PathBuf;

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Provider-selection strategy applied when a request does not force a
/// provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoutingStrategy {
    Fastest,
    MostCapable,
    Balanced,
    Adaptive,
}

fn default_strategy() -> RoutingStrategy {
    RoutingStrategy::Balanced
}

fn default_fallback_chain() -> Vec<String> {
    vec!["lm-studio".to_string(), "ollama".to_string()]
}

fn default_max_retries() -> usize {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouterConfig {
    #[serde(default = "default_strategy")]
    pub strategy: RoutingStrategy,
    /// Ordered list of provider names tried after the selected provider fails.
    #[serde(default = "default_fallback_chain")]
    pub fallback_chain: Vec<String>,
    /// Per-request retry budget: total provider attempts are capped at
    /// `max_retries + 1`.
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            fallback_chain: default_fallback_chain(),
            max_retries: default_max_retries(),
        }
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

fn default_escalation_threshold() -> f32 {
    0.7
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HybridConfig {
    /// Confidence below which the executor re-issues the request to a more
    /// capable provider.
    #[serde(default = "default_escalation_threshold")]
    pub escalation_threshold: f32,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            escalation_threshold: default_escalation_threshold(),
        }
    }
}

fn default_max_concurrent_batch() -> usize {
    8
}

fn default_cache_ttl_seconds() -> u64 {
    60
}

fn default_tool_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolExecConfig {
    /// Upper cap on parallel executions within the fast/network categories.
    #[serde(default = "default_max_concurrent_batch")]
    pub max_concurrent_batch: usize,
    #[serde(default = "default_cache_ttl_seconds")]
    pub cache_ttl_seconds: u64,
    #[serde(default = "default_tool_timeout_secs")]
    pub default_timeout_secs: u64,
}

impl Default for ToolExecConfig {
    fn default() -> Self {
        Self {
            max_concurrent_batch: default_max_concurrent_batch(),
            cache_ttl_seconds: default_cache_ttl_seconds(),
            default_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutorConfig {
    #[serde(default)]
    pub hybrid: HybridConfig,
    #[serde(default)]
    pub tool: ToolExecConfig,
}

// ---------------------------------------------------------------------------
// Security
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SecurityLevel {
    Low,
    #[default]
    Medium,
    High,
    Maximum,
}

fn default_max_input_length() -> usize {
    50_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecurityConfig {
    #[serde(default)]
    pub level: SecurityLevel,
    /// Byte ceiling on the prompt. A prompt of exactly this length is
    /// accepted; one byte more is rejected.
    #[serde(default = "default_max_input_length")]
    pub max_input_length: usize,
    #[serde(default)]
    pub allowed_paths: Vec<PathBuf>,
    #[serde(default)]
    pub restricted_paths: Vec<PathBuf>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            level: SecurityLevel::default(),
            max_input_length: default_max_input_length(),
            allowed_paths: vec![],
            restricted_paths: vec![],
        }
    }
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

fn default_search_timeout_ms() -> u64 {
    30_000
}

fn default_max_output_bytes() -> u64 {
    50 * 1024 * 1024
}

fn default_memory_cap_bytes() -> u64 {
    512 * 1024 * 1024
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchConfig {
    #[serde(default = "default_search_timeout_ms")]
    pub default_timeout_ms: u64,
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: u64,
    /// Address-space ceiling applied to each search subprocess.
    #[serde(default = "default_memory_cap_bytes")]
    pub memory_cap_bytes: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_search_timeout_ms(),
            max_output_bytes: default_max_output_bytes(),
            memory_cap_bytes: default_memory_cap_bytes(),
        }
    }
}

// ---------------------------------------------------------------------------
// Streaming
// ---------------------------------------------------------------------------

fn default_channel_capacity() -> usize {
    64
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StreamingConfig {
    /// Back-pressure bound on the token channel between the producer task
    /// and the consumer.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

// ---------------------------------------------------------------------------
// Isolation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IsolationLevel {
    Minimal,
    #[default]
    Standard,
    Strict,
    Maximum,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IsolationConfig {
    #[serde(default)]
    pub default_level: IsolationLevel,
}

// ---------------------------------------------------------------------------
// Providers
// ---------------------------------------------------------------------------

fn default_lm_studio_url() -> String {
    "http://localhost:1234".to_string()
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_probe_timeout_secs() -> u64 {
    5
}

fn default_attempt_timeout_secs() -> u64 {
    30
}

fn default_max_load() -> u32 {
    4
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderEndpoint {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub base_url: String,
    #[serde(default)]
    pub default_model: Option<String>,
    /// Tie-break priority for routing; lower wins.
    #[serde(default)]
    pub priority: u32,
    #[serde(default = "default_max_load")]
    pub max_load: u32,
}

impl ProviderEndpoint {
    fn with_url(base_url: String, priority: u32) -> Self {
        Self {
            enabled: true,
            base_url,
            default_model: None,
            priority,
            max_load: default_max_load(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProvidersConfig {
    #[serde(default = "default_lm_studio_endpoint")]
    pub lm_studio: ProviderEndpoint,
    #[serde(default = "default_ollama_endpoint")]
    pub ollama: ProviderEndpoint,
    /// Bound on the availability probe each adapter runs.
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
    /// Per-provider attempt timeout; the minimum of this and the request
    /// timeout wins.
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
}

fn default_lm_studio_endpoint() -> ProviderEndpoint {
    ProviderEndpoint::with_url(default_lm_studio_url(), 0)
}

fn default_ollama_endpoint() -> ProviderEndpoint {
    ProviderEndpoint::with_url(default_ollama_url(), 1)
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            lm_studio: default_lm_studio_endpoint(),
            ollama: default_ollama_endpoint(),
            probe_timeout_secs: default_probe_timeout_secs(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
        }
    }
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    7878
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Must resolve to a loopback address; anything else fails validation.
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_host(),
            port: default_port(),
        }
    }
}

// ---------------------------------------------------------------------------
// Top level
// ---------------------------------------------------------------------------

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_reasoning_steps() -> usize {
    20
}

fn default_context_ceiling_tokens() -> usize {
    32_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    /// Bounded reasoning-step budget for the plan/act/observe loop.
    #[serde(default = "default_max_reasoning_steps")]
    pub max_reasoning_steps: usize,
    /// Approximate token ceiling for accumulated conversation context.
    #[serde(default = "default_context_ceiling_tokens")]
    pub context_ceiling_tokens: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_reasoning_steps: default_max_reasoning_steps(),
            context_ceiling_tokens: default_context_ceiling_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub streaming: StreamingConfig,
    #[serde(default)]
    pub isolation: IsolationConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    /// Workspace root for tool execution and search. Defaults to the
    /// current directory at startup.
    #[serde(default)]
    pub workspace: Option<PathBuf>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            router: RouterConfig::default(),
            executor: ExecutorConfig::default(),
            security: SecurityConfig::default(),
            search: SearchConfig::default(),
            streaming: StreamingConfig::default(),
            isolation: IsolationConfig::default(),
            providers: ProvidersConfig::default(),
            gateway: GatewayConfig::default(),
            agent: AgentConfig::default(),
            workspace: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), String> {
        if self.router.fallback_chain.is_empty() {
            return Err("router.fallback_chain must name at least one provider".to_string());
        }
        for name in &self.router.fallback_chain {
            if !matches!(name.as_str(), "lm-studio" | "ollama") {
                return Err(format!("router.fallback_chain: unknown provider '{name}'"));
            }
        }
        let threshold = self.executor.hybrid.escalation_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(format!(
                "executor.hybrid.escalation_threshold must be in [0, 1], got {threshold}"
            ));
        }
        if self.executor.tool.max_concurrent_batch == 0 {
            return Err("executor.tool.max_concurrent_batch must be > 0".to_string());
        }
        if self.streaming.channel_capacity == 0 {
            return Err("streaming.channel_capacity must be > 0".to_string());
        }
        if self.agent.max_reasoning_steps == 0 {
            return Err("agent.max_reasoning_steps must be > 0".to_string());
        }
        let host: Result<std::net::IpAddr, _> = self.gateway.host.parse();
        match host {
            Ok(addr) if addr.is_loopback() => {}
            Ok(_) => {
                return Err(format!(
                    "gateway.host must be a loopback address, got {}",
                    self.gateway.host
                ));
            }
            Err(_) => {
                return Err(format!("gateway.host is not an IP address: {}", self.gateway.host));
            }
        }
        if !self.providers.lm_studio.enabled && !self.providers.ollama.enabled {
            return Err("at least one provider must be enabled".to_string());
        }
        Ok(())
    }

    pub fn workspace_path(&self) -> PathBuf {
        self.workspace
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs)
    }
}
