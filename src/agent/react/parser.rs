use serde_json::{Map, Value, json};

/// Result of parsing one model turn into an action.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedAction {
    pub thought: String,
    pub tool: String,
    pub tool_input: Value,
    /// Parse-level confidence: strict JSON parses score highest, intent
    /// heuristics lowest.
    pub confidence: f32,
}

pub const FINAL_ANSWER: &str = "final_answer";

/// Fixed table of known tool-name typos. Unknown names that survive this
/// table surface as errors; nothing is guessed beyond it.
const TYPO_FIXES: &[(&str, &str)] = &[
    ("final-answer", "final_answer"),
    ("finalanswer", "final_answer"),
    ("final_answer.", "final_answer"),
    ("listfiles", "list_files"),
    ("list-files", "list_files"),
    ("listfile", "list_files"),
    ("readfile", "read_file"),
    ("read-file", "read_file"),
    ("readfiles", "read_file"),
    ("writefile", "write_file"),
    ("write-file", "write_file"),
    ("searchcode", "search_code"),
    ("search-code", "search_code"),
    ("searchfiles", "search_code"),
    ("searchhfiles", "search_code"),
    ("search_files", "search_code"),
];

pub fn fix_tool_name(raw: &str) -> String {
    let normalized = raw.trim().to_lowercase();
    for (typo, fixed) in TYPO_FIXES {
        if normalized == *typo {
            return (*fixed).to_string();
        }
    }
    normalized
}

/// Per-tool argument defaults for fields models habitually omit, plus
/// camelCase aliases lowered to the canonical snake_case names.
pub fn normalize_tool_input(tool: &str, input: Value) -> Value {
    let mut map = match input {
        Value::Object(map) => map,
        Value::String(s) if tool == FINAL_ANSWER => {
            let mut map = Map::new();
            map.insert("answer".into(), Value::String(s));
            map
        }
        Value::String(s) => {
            // A bare string is almost always the primary argument.
            let key = match tool {
                "read_file" | "write_file" | "list_files" => "path",
                "search_code" => "query",
                _ => "input",
            };
            let mut map = Map::new();
            map.insert(key.into(), Value::String(s));
            map
        }
        _ => Map::new(),
    };

    const ALIASES: &[(&str, &str)] = &[
        ("maxFiles", "max_files"),
        ("maxResults", "max_results"),
        ("queryType", "query_type"),
        ("filePath", "path"),
        ("caseSensitive", "case_sensitive"),
    ];
    for (alias, canonical) in ALIASES {
        if let Some(value) = map.remove(*alias)
            && !map.contains_key(*canonical)
        {
            map.insert((*canonical).to_string(), value);
        }
    }

    match tool {
        "list_files" => {
            map.entry("path").or_insert_with(|| json!("."));
            map.entry("max_files").or_insert_with(|| json!(50));
        }
        "search_code" => {
            map.entry("max_results").or_insert_with(|| json!(50));
        }
        _ => {}
    }
    Value::Object(map)
}

/// Parse a model turn into `{thought, tool, toolInput}`, in order of
/// decreasing strictness:
///
/// 1. the whole message as a JSON document,
/// 2. the first balanced JSON object inside the message,
/// 3. regex extraction of the individual fields,
/// 4. intent heuristics on the raw text.
pub fn parse_action(content: &str) -> Option<ParsedAction> {
    let trimmed = content.trim();

    if let Ok(value) = serde_json::from_str::<Value>(trimmed)
        && let Some(action) = action_from_json(&value, 0.95)
    {
        return Some(action);
    }

    if let Some(candidate) = first_balanced_object(trimmed)
        && let Ok(value) = serde_json::from_str::<Value>(&candidate)
        && let Some(action) = action_from_json(&value, 0.85)
    {
        return Some(action);
    }

    if let Some(action) = regex_extract(trimmed) {
        return Some(action);
    }

    intent_heuristics(trimmed)
}

fn action_from_json(value: &Value, confidence: f32) -> Option<ParsedAction> {
    let object = value.as_object()?;
    let tool = object
        .get("tool")
        .or_else(|| object.get("action"))?
        .as_str()?;
    let thought = object
        .get("thought")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let tool_input = object
        .get("toolInput")
        .or_else(|| object.get("tool_input"))
        .or_else(|| object.get("input"))
        .cloned()
        .unwrap_or_else(|| json!({}));
    let tool = fix_tool_name(tool);
    Some(ParsedAction {
        thought,
        tool: tool.clone(),
        tool_input: normalize_tool_input(&tool, tool_input),
        confidence,
    })
}

/// Find the first balanced `{…}` region, respecting strings and escapes.
fn first_balanced_object(content: &str) -> Option<String> {
    let start = content.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, c) in content[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(content[start..=start + offset].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

fn regex_extract(content: &str) -> Option<ParsedAction> {
    use regex::Regex;
    use std::sync::LazyLock;

    static TOOL_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r#""?tool"?\s*[:=]\s*"([A-Za-z0-9_.-]+)""#).expect("tool regex")
    });
    static THOUGHT_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r#""?thought"?\s*[:=]\s*"((?:[^"\\]|\\.)*)""#).expect("thought regex")
    });
    static INPUT_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r#""?toolInput"?\s*[:=]\s*(\{[^}]*\})"#).expect("input regex")
    });

    let tool = fix_tool_name(&TOOL_RE.captures(content)?[1]);
    let thought = THOUGHT_RE
        .captures(content)
        .map(|c| c[1].to_string())
        .unwrap_or_default();
    let tool_input = INPUT_RE
        .captures(content)
        .and_then(|c| serde_json::from_str::<Value>(&c[1]).ok())
        .unwrap_or_else(|| json!({}));
    Some(ParsedAction {
        thought,
        tool: tool.clone(),
        tool_input: normalize_tool_input(&tool, tool_input),
        confidence: 0.6,
    })
}

/// Last resort: map recognizable phrasing to default tool invocations.
fn intent_heuristics(content: &str) -> Option<ParsedAction> {
    let lower = content.to_lowercase();
    let action = |tool: &str, input: Value| {
        Some(ParsedAction {
            thought: String::new(),
            tool: tool.to_string(),
            tool_input: normalize_tool_input(tool, input),
            confidence: 0.4,
        })
    };

    if lower.contains("final answer") {
        return action(FINAL_ANSWER, json!({ "answer": content.trim() }));
    }
    if lower.contains("list files") || lower.contains("list the files") {
        return action("list_files", json!({}));
    }
    if let Some(rest) = lower
        .find("read file")
        .map(|i| content[i + "read file".len()..].trim())
        && !rest.is_empty()
    {
        let path = rest.split_whitespace().next().unwrap_or(".");
        let path = path.trim_matches(|c: char| "\"'`.,".contains(c));
        return action("read_file", json!({ "path": path }));
    }
    if let Some(rest) = lower
        .find("search for")
        .map(|i| content[i + "search for".len()..].trim())
        && !rest.is_empty()
    {
        return action(
            "search_code",
            json!({ "query": rest.trim_matches(|c: char| "\"'`.".contains(c)) }),
        );
    }
    None
}
