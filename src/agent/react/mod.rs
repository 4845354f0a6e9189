mod parser;

pub use parser::{FINAL_ANSWER, ParsedAction, fix_tool_name, normalize_tool_input, parse_action};

use crate::agent::tools::base::ToolContext;
use crate::agent::tools::{AsyncToolExecutor, ToolInvocation};
use crate::errors::CrucibleError;
use crate::providers::base::{Message, Request};
use crate::routing::{ExecutionMode, HybridExecutor, RoutingDecision};
use crate::utils::cancel::CancelSignal;
use crate::utils::truncate_with_ellipsis;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, info, warn};

const DEFAULT_STEP_BUDGET: usize = 20;
/// Observation characters forwarded into the rolling context; the full
/// value stays in the tool-result cache.
const OBSERVATION_CONTEXT_LIMIT: usize = 1000;
const MAX_CONSECUTIVE_PARSE_FAILURES: usize = 3;
const DEFAULT_ANSWER: &str = "Analysis completed.";

/// One plan/act/observe cycle.
#[derive(Debug, Clone, Serialize)]
pub struct ReasoningStep {
    pub thought: String,
    pub tool: String,
    pub tool_input: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observation: Option<String>,
    pub confidence: f32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug)]
pub struct ReactOutcome {
    pub answer: String,
    pub steps: Vec<ReasoningStep>,
}

/// Bounded plan/act/observe loop. Each iteration asks the routed provider
/// for the next action, parses it with typo-tolerant recovery, dispatches
/// the tool through the categorized executor, and folds the observation
/// back into the rolling context. Terminal on `final_answer`, the step
/// budget, or an unrecoverable parse failure.
pub struct ReactLoop {
    tools: Arc<AsyncToolExecutor>,
    step_budget: usize,
}

impl ReactLoop {
    pub fn new(tools: Arc<AsyncToolExecutor>, step_budget: usize) -> Self {
        Self {
            tools,
            step_budget: if step_budget == 0 {
                DEFAULT_STEP_BUDGET
            } else {
                step_budget
            },
        }
    }

    pub async fn run(
        &self,
        req: &Request,
        executor: &HybridExecutor,
        decision: &RoutingDecision,
        tool_ctx: &ToolContext,
        cancel: CancelSignal,
    ) -> Result<ReactOutcome, CrucibleError> {
        let mut steps: Vec<ReasoningStep> = Vec::new();
        let mut messages = vec![Message::system(self.system_prompt())];
        messages.extend(req.conversation());

        let mut consecutive_parse_failures = 0;
        let mut last_invocation: Option<(String, String)> = None;

        for iteration in 0..self.step_budget {
            if cancel.is_cancelled() {
                return Err(CrucibleError::Cancelled);
            }

            let step_req = Request {
                messages: messages.clone(),
                prompt: String::new(),
                tools: vec![],
                stream: false,
                ..req.clone()
            };
            let report = executor
                .execute(&step_req, decision, ExecutionMode::Direct, cancel.clone())
                .await?;
            let content = report.response.content;

            let Some(action) = parse_action(&content) else {
                consecutive_parse_failures += 1;
                warn!(
                    iteration,
                    failures = consecutive_parse_failures,
                    "could not parse reasoning output"
                );
                if consecutive_parse_failures >= MAX_CONSECUTIVE_PARSE_FAILURES {
                    return Err(CrucibleError::ReasoningParse(format!(
                        "{consecutive_parse_failures} consecutive unparsable responses"
                    )));
                }
                messages.push(Message::assistant(content, None));
                messages.push(Message::user(
                    "Respond with a single JSON object: \
                     {\"thought\": \"...\", \"tool\": \"...\", \"toolInput\": {...}}",
                ));
                continue;
            };
            consecutive_parse_failures = 0;

            if action.tool == FINAL_ANSWER {
                let answer = action.tool_input["answer"]
                    .as_str()
                    .filter(|a| !a.trim().is_empty())
                    .unwrap_or(DEFAULT_ANSWER)
                    .to_string();
                steps.push(step_record(&action, None));
                info!(steps = steps.len(), "reasoning chain complete");
                return Ok(ReactOutcome { answer, steps });
            }

            if !self.tools.registry().contains(&action.tool) {
                debug!(tool = %action.tool, "model requested unknown tool");
                let err = CrucibleError::ToolValidation {
                    tool: action.tool.clone(),
                    message: format!(
                        "unknown tool; available: {}",
                        self.tools.registry().tool_names().join(", ")
                    ),
                };
                steps.push(step_record(&action, Some(err.to_string())));
                messages.push(Message::assistant(content, None));
                messages.push(Message::user(format!("Observation: {err}")));
                continue;
            }

            // The same invocation twice in a row means the model is stuck.
            let fingerprint = (
                action.tool.clone(),
                canonical_input(&action.tool_input),
            );
            if last_invocation.as_ref() == Some(&fingerprint) {
                return Err(CrucibleError::Internal(anyhow::anyhow!(
                    "duplicate tool invocation: '{}' called twice in a row with identical input",
                    action.tool
                )));
            }
            last_invocation = Some(fingerprint);

            let result = self
                .tools
                .execute_one(
                    ToolInvocation {
                        name: action.tool.clone(),
                        args: action.tool_input.clone(),
                    },
                    tool_ctx,
                )
                .await;
            let observation = match (&result.result, &result.error) {
                (Some(output), _) => output.clone(),
                (None, Some(error)) => format!("error: {error}"),
                (None, None) => String::new(),
            };
            let context_observation =
                truncate_with_ellipsis(&observation, OBSERVATION_CONTEXT_LIMIT);

            steps.push(step_record(&action, Some(context_observation.clone())));
            messages.push(Message::assistant(content, None));
            messages.push(Message::user(format!(
                "Observation: {context_observation}"
            )));
        }

        Err(CrucibleError::ReasoningBudgetExceeded {
            budget: self.step_budget,
        })
    }

    fn system_prompt(&self) -> String {
        let mut prompt = String::from(
            "You are a coding assistant working inside the user's workspace. \
             Decide one step at a time. Respond ONLY with a JSON object of the \
             form {\"thought\": \"...\", \"tool\": \"...\", \"toolInput\": {...}}. \
             When you have the answer, use the tool \"final_answer\" with \
             {\"answer\": \"...\"}.\n\nAvailable tools:\n",
        );
        for spec in self.tools.registry().specs() {
            let _ = writeln!(prompt, "- {}: {}", spec.name, spec.description);
        }
        prompt
    }
}

fn step_record(action: &ParsedAction, observation: Option<String>) -> ReasoningStep {
    ReasoningStep {
        thought: action.thought.clone(),
        tool: action.tool.clone(),
        tool_input: action.tool_input.clone(),
        observation,
        confidence: action.confidence,
        timestamp: Utc::now(),
    }
}

fn canonical_input(input: &Value) -> String {
    fn canonical(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let sorted: std::collections::BTreeMap<&String, Value> =
                    map.iter().map(|(k, v)| (k, canonical(v))).collect();
                Value::Object(sorted.into_iter().map(|(k, v)| (k.clone(), v)).collect())
            }
            Value::Array(arr) => Value::Array(arr.iter().map(canonical).collect()),
            other => other.clone(),
        }
    }
    serde_json::to_string(&canonical(input)).unwrap_or_default()
}
