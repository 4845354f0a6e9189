use crate::errors::CrucibleError;
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_RESULTS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    Function,
    Class,
    Import,
    Pattern,
    #[default]
    General,
    Semantic,
    Todo,
    Error,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryContext {
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub file_types: Vec<String>,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    pub text: String,
    #[serde(default)]
    pub query_type: QueryType,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default)]
    pub regex: bool,
    #[serde(default)]
    pub case_sensitive: bool,
    #[serde(default)]
    pub whole_word: bool,
    #[serde(default)]
    pub context: QueryContext,
}

fn default_max_results() -> usize {
    DEFAULT_MAX_RESULTS
}

impl SearchQuery {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            query_type: QueryType::General,
            max_results: DEFAULT_MAX_RESULTS,
            regex: false,
            case_sensitive: false,
            whole_word: false,
            context: QueryContext::default(),
        }
    }
}

/// A query that passed sanitization, with any adjustments noted.
#[derive(Debug, Clone)]
pub struct SanitizedQuery {
    pub query: SearchQuery,
    pub warnings: Vec<String>,
}

/// Reject queries the backend cannot safely run and normalize the rest.
///
/// Sanitization is idempotent: running it on its own output changes
/// nothing and produces no new warnings.
pub fn sanitize(query: &SearchQuery) -> Result<SanitizedQuery, CrucibleError> {
    if query.text.contains('\0') {
        return Err(CrucibleError::Validation(
            "search query contains a NUL byte".to_string(),
        ));
    }
    if query.text.chars().any(|c| c.is_control() && c != '\t') {
        return Err(CrucibleError::Validation(
            "search query contains control characters".to_string(),
        ));
    }
    if query.regex && regex::Regex::new(&query.text).is_err() {
        return Err(CrucibleError::Validation(format!(
            "invalid regex pattern: {}",
            query.text
        )));
    }

    let mut warnings = Vec::new();
    let mut sanitized = query.clone();

    let trimmed = sanitized.text.trim();
    if trimmed.len() != sanitized.text.len() {
        sanitized.text = trimmed.to_string();
        warnings.push("trimmed surrounding whitespace".to_string());
    }
    if sanitized.text.is_empty() {
        return Err(CrucibleError::Validation("search query is empty".to_string()));
    }
    if sanitized.max_results == 0 || sanitized.max_results > 1000 {
        sanitized.max_results = DEFAULT_MAX_RESULTS;
        warnings.push("max_results out of range, reset to default".to_string());
    }

    Ok(SanitizedQuery {
        query: sanitized,
        warnings,
    })
}
