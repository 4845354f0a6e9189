use crate::search::query::{QueryType, SearchQuery};
use serde::Serialize;

/// Execution strategy for one search attempt. Each strategy declares its
/// fallbacks and an expected accuracy used by the fallback policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Literal,
    Regex,
    Structural,
    Semantic,
}

impl Strategy {
    /// Strategies tried, in order, when this one fails or comes back empty
    /// with low confidence. At most two are consumed per search.
    pub fn fallbacks(self) -> &'static [Strategy] {
        match self {
            Self::Literal => &[Self::Regex, Self::Semantic],
            Self::Regex => &[Self::Literal, Self::Semantic],
            Self::Structural => &[Self::Regex, Self::Literal],
            Self::Semantic => &[Self::Literal, Self::Regex],
        }
    }

    pub fn expected_accuracy(self) -> f64 {
        match self {
            Self::Literal => 0.95,
            Self::Regex => 0.85,
            Self::Structural => 0.8,
            Self::Semantic => 0.6,
        }
    }
}

/// Map query type and content heuristics onto a strategy.
pub fn select_strategy(query: &SearchQuery) -> Strategy {
    if query.regex {
        return Strategy::Regex;
    }
    match query.query_type {
        QueryType::Function | QueryType::Class | QueryType::Import => Strategy::Structural,
        QueryType::Semantic => Strategy::Semantic,
        QueryType::Pattern => Strategy::Regex,
        QueryType::Todo | QueryType::Error => Strategy::Regex,
        QueryType::General => {
            if looks_like_regex(&query.text) {
                Strategy::Regex
            } else if query.text.split_whitespace().count() > 3 {
                // Long natural-language queries match better loosely.
                Strategy::Semantic
            } else {
                Strategy::Literal
            }
        }
    }
}

fn looks_like_regex(text: &str) -> bool {
    const META: &[char] = &['*', '+', '[', ']', '^', '$', '|', '\\'];
    text.contains(META)
}

/// Render the pattern a strategy feeds the backend for a query.
pub fn build_pattern(strategy: Strategy, query: &SearchQuery) -> String {
    let escaped = regex::escape(&query.text);
    match strategy {
        Strategy::Literal => query.text.clone(),
        Strategy::Regex => {
            if query.regex || looks_like_regex(&query.text) {
                query.text.clone()
            } else {
                escaped
            }
        }
        Strategy::Structural => match query.query_type {
            QueryType::Function => {
                format!(r"(fn|function|def|func)\s+{escaped}\s*[(<]")
            }
            QueryType::Class => {
                format!(r"(class|struct|interface|trait|enum)\s+{escaped}\b")
            }
            QueryType::Import => {
                format!(r"(use|import|require|include|from)\b.*\b{escaped}\b")
            }
            _ => escaped,
        },
        // Loose multi-term match: every word, any order on the line.
        Strategy::Semantic => {
            let words: Vec<String> = query
                .text
                .split_whitespace()
                .map(regex::escape)
                .collect();
            match words.len() {
                0 => escaped,
                1 => words.into_iter().next().unwrap_or_default(),
                _ => words.join("|"),
            }
        }
    }
}

/// Whether the strategy's pattern is a regex (vs a fixed string).
pub fn is_regex_pattern(strategy: Strategy, query: &SearchQuery) -> bool {
    !matches!(strategy, Strategy::Literal) || query.regex
}
