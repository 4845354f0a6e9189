use std::collections::HashMap;
use std::sync::RwLock;

/// Declared abilities of a `(provider, model)` pair.
#[derive(Debug, Clone, Copy)]
pub struct ModelCapability {
    pub streaming: bool,
    pub tool_calling: bool,
    pub context_window: u32,
    pub max_concurrent: u32,
}

impl ModelCapability {
    const fn full(context_window: u32) -> Self {
        Self {
            streaming: true,
            tool_calling: true,
            context_window,
            max_concurrent: 4,
        }
    }

    const fn text_only(context_window: u32) -> Self {
        Self {
            streaming: true,
            tool_calling: false,
            context_window,
            max_concurrent: 4,
        }
    }
}

/// Models known to handle structured tool calls reliably on each backend.
/// Everything absent from this table is treated as text-only.
const STATIC_TABLE: &[(&str, &str, ModelCapability)] = &[
    ("lm-studio", "qwen2.5-coder", ModelCapability::full(32_768)),
    ("lm-studio", "qwen2.5-coder-7b-instruct", ModelCapability::full(32_768)),
    ("lm-studio", "llama-3.1-8b-instruct", ModelCapability::full(131_072)),
    ("lm-studio", "mistral-nemo-instruct", ModelCapability::full(128_000)),
    ("ollama", "llama3.1", ModelCapability::full(131_072)),
    ("ollama", "llama3.2", ModelCapability::full(131_072)),
    ("ollama", "qwen2.5-coder", ModelCapability::full(32_768)),
    ("ollama", "mistral-nemo", ModelCapability::full(128_000)),
    ("ollama", "gemma2", ModelCapability::text_only(8_192)),
];

/// Adapters that pick a tool-capable model themselves when the request
/// leaves `model` unspecified.
const AUTO_SELECTS_TOOL_MODEL: &[&str] = &["lm-studio"];

/// Static capability table with a dynamic overlay.
///
/// The static table is immutable after startup; observed capabilities
/// (e.g. a probe discovering a loaded model) land in the overlay, replaced
/// wholesale via [`CapabilityRegistry::reload`]. The router reads, the
/// orchestrator writes; adapters never touch this.
pub struct CapabilityRegistry {
    table: HashMap<(String, String), ModelCapability>,
    overlay: RwLock<HashMap<(String, String), ModelCapability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        let table = STATIC_TABLE
            .iter()
            .map(|(provider, model, cap)| (((*provider).to_string(), (*model).to_string()), *cap))
            .collect();
        Self {
            table,
            overlay: RwLock::new(HashMap::new()),
        }
    }

    pub fn lookup(&self, provider: &str, model: &str) -> Option<ModelCapability> {
        let key = (provider.to_string(), model.to_string());
        let overlay = self.overlay.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        overlay.get(&key).copied().or_else(|| self.table.get(&key).copied())
    }

    /// Tool-calling support is the conjunction of adapter capability and
    /// model capability. With no explicit model, only adapters that
    /// auto-select a tool-capable model qualify; every other combination
    /// needs an allow-list match.
    pub fn supports_tools(&self, provider: &str, model: Option<&str>) -> bool {
        match model {
            Some(model) => self.lookup(provider, model).is_some_and(|c| c.tool_calling),
            None => AUTO_SELECTS_TOOL_MODEL.contains(&provider),
        }
    }

    pub fn supports_streaming(&self, provider: &str, model: Option<&str>) -> bool {
        match model.and_then(|m| self.lookup(provider, m)) {
            Some(cap) => cap.streaming,
            // Both local backends stream; unknown models inherit that.
            None => true,
        }
    }

    /// Replace the dynamic overlay with observed capabilities.
    pub fn reload(&self, observed: HashMap<(String, String), ModelCapability>) {
        let mut overlay = self.overlay.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        *overlay = observed;
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}
