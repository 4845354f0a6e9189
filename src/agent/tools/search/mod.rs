use crate::agent::tools::base::{ParamDescriptor, ParamKind, Tool, ToolContext};
use crate::isolation::Operation;
use crate::search::{QueryType, SearchEngine, SearchQuery};
use async_trait::async_trait;
use serde_json::Value;
use std::fmt::Write as _;
use std::sync::{Arc, LazyLock};

static SEARCH_PARAMS: LazyLock<Vec<ParamDescriptor>> = LazyLock::new(|| {
    vec![
        ParamDescriptor::required("query", ParamKind::String, "text or pattern to search for"),
        ParamDescriptor::optional(
            "query_type",
            ParamKind::String,
            Some(Value::String("general".into())),
            "one of: function, class, import, pattern, general, semantic, todo, error",
        ),
        ParamDescriptor::optional(
            "max_results",
            ParamKind::Integer,
            Some(Value::from(50)),
            "maximum matches returned",
        ),
        ParamDescriptor::optional(
            "regex",
            ParamKind::Boolean,
            Some(Value::Bool(false)),
            "treat the query as a regular expression",
        ),
    ]
});

/// Workspace search over the hybrid search core.
pub struct SearchCodeTool {
    engine: Arc<SearchEngine>,
}

impl SearchCodeTool {
    pub fn new(engine: Arc<SearchEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Tool for SearchCodeTool {
    fn name(&self) -> &'static str {
        "search_code"
    }

    fn description(&self) -> &'static str {
        "Search the workspace for code, patterns, or text"
    }

    fn parameters(&self) -> &'static [ParamDescriptor] {
        &SEARCH_PARAMS
    }

    fn required_operations(&self) -> &'static [Operation] {
        &[Operation::Read, Operation::Analyze]
    }

    fn cacheable(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> anyhow::Result<String> {
        let text = args["query"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("query must be a string"))?;
        let query_type: QueryType =
            serde_json::from_value(args["query_type"].clone()).unwrap_or_default();
        let mut query = SearchQuery::text(text);
        query.query_type = query_type;
        query.max_results = args["max_results"].as_u64().unwrap_or(50) as usize;
        query.regex = args["regex"].as_bool().unwrap_or(false);

        let response = self.engine.search(&query).await?;
        if response.documents.is_empty() {
            return Ok(format!("no matches for '{text}'"));
        }
        let mut out = String::new();
        for doc in &response.documents {
            let _ = writeln!(out, "{}:{}:{}", doc.path, doc.line, doc.content);
        }
        let _ = write!(
            out,
            "({} matches, strategy {:?}{})",
            response.documents.len(),
            response.metadata.strategy,
            if response.metadata.fallback_used {
                ", via fallback"
            } else {
                ""
            }
        );
        Ok(out)
    }
}
