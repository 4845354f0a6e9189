use super::*;
use crate::search::query::QueryType;
use tempfile::TempDir;

fn engine(workspace: PathBuf) -> SearchEngine {
    SearchEngine::new(workspace, &SearchConfig::default())
}

fn have_rg() -> bool {
    which::which("rg").is_ok()
}

fn seed_workspace() -> TempDir {
    let tmp = TempDir::new().unwrap();
    std::fs::create_dir(tmp.path().join("src")).unwrap();
    std::fs::write(
        tmp.path().join("src/lib.rs"),
        "pub fn parse_config() {}\n// TODO: handle errors\n",
    )
    .unwrap();
    std::fs::write(
        tmp.path().join("src/main.rs"),
        "fn main() { parse_config(); }\n",
    )
    .unwrap();
    tmp
}

#[test]
fn json_match_lines_are_parsed() {
    let output = concat!(
        "{\"type\":\"begin\",\"data\":{\"path\":{\"text\":\"src/x.rs\"}}}\n",
        "{\"type\":\"match\",\"data\":{\"path\":{\"text\":\"./src/x.rs\"},\"lines\":{\"text\":\"fn foo() {}\\n\"},\"line_number\":10}}\n",
        "{\"type\":\"end\",\"data\":{}}\n",
    );
    let (docs, duplicates) = parse_output(output, 50);
    assert_eq!(duplicates, 0);
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].path, "src/x.rs");
    assert_eq!(docs[0].line, 10);
    assert_eq!(docs[0].content, "fn foo() {}");
}

#[test]
fn plain_lines_are_parsed_as_fallback() {
    let (docs, _) = parse_output("src/y.ts:42:const x = 1;\n", 50);
    assert_eq!(docs[0].path, "src/y.ts");
    assert_eq!(docs[0].line, 42);
    assert_eq!(docs[0].content, "const x = 1;");
}

#[test]
fn duplicates_are_dropped_and_counted() {
    let output = concat!(
        "src/a.rs:1:let x = 1;\n",
        "src/a.rs:9:let x = 1;\n",
        "src/b.rs:1:let x = 1;\n",
    );
    let (docs, duplicates) = parse_output(output, 50);
    assert_eq!(docs.len(), 2);
    assert_eq!(duplicates, 1);
}

#[test]
fn max_results_caps_output() {
    let output: String = (0..20)
        .map(|i| format!("src/f{i}.rs:1:match line {i}\n"))
        .collect();
    let (docs, _) = parse_output(&output, 5);
    assert_eq!(docs.len(), 5);
}

#[test]
fn long_fields_are_capped() {
    let long_content = "y".repeat(2000);
    let line = format!("src/a.rs:1:{long_content}\n");
    let (docs, _) = parse_output(&line, 50);
    assert_eq!(docs[0].content.chars().count(), 500);
}

#[test]
fn query_hash_is_stable_and_distinguishes_queries() {
    let a = SearchQuery::text("foo");
    let b = SearchQuery::text("foo");
    let c = SearchQuery::text("bar");
    assert_eq!(query_hash(&a), query_hash(&b));
    assert_ne!(query_hash(&a), query_hash(&c));
}

#[tokio::test]
async fn literal_search_finds_matches() {
    if !have_rg() {
        eprintln!("skipping: rg not installed");
        return;
    }
    let tmp = seed_workspace();
    let engine = engine(tmp.path().to_path_buf());
    let response = engine.search(&SearchQuery::text("parse_config")).await.unwrap();
    assert_eq!(response.metadata.strategy, Strategy::Literal);
    assert!(!response.metadata.fallback_used);
    assert_eq!(response.documents.len(), 2);
    assert_eq!(engine.active_processes().await, 0);
}

#[tokio::test]
async fn structural_function_search() {
    if !have_rg() {
        eprintln!("skipping: rg not installed");
        return;
    }
    let tmp = seed_workspace();
    let engine = engine(tmp.path().to_path_buf());
    let mut query = SearchQuery::text("parse_config");
    query.query_type = QueryType::Function;
    let response = engine.search(&query).await.unwrap();
    assert_eq!(response.metadata.strategy, Strategy::Structural);
    // Only the definition matches the structural pattern, not the call.
    assert_eq!(response.documents.len(), 1);
    assert_eq!(response.documents[0].path, "src/lib.rs");
}

#[tokio::test]
async fn second_search_hits_the_cache() {
    if !have_rg() {
        eprintln!("skipping: rg not installed");
        return;
    }
    let tmp = seed_workspace();
    let engine = engine(tmp.path().to_path_buf());
    let query = SearchQuery::text("parse_config");
    let first = engine.search(&query).await.unwrap();
    assert!(!first.metadata.cache_hit);
    let second = engine.search(&query).await.unwrap();
    assert!(second.metadata.cache_hit);
    assert_eq!(first.documents, second.documents);
}

#[tokio::test]
async fn empty_literal_falls_back_to_regex() {
    if !have_rg() {
        eprintln!("skipping: rg not installed");
        return;
    }
    let tmp = TempDir::new().unwrap();
    std::fs::create_dir(tmp.path().join("src")).unwrap();
    std::fs::write(tmp.path().join("src/x.ts"), "function  foo(a) {}\n").unwrap();
    std::fs::write(tmp.path().join("src/y.ts"), "function   foo(b) {}\n").unwrap();
    let engine = engine(tmp.path().to_path_buf());

    // Literal "function foo" misses (double spaces); the semantic fallback
    // pattern matches both definitions.
    let response = engine.search(&SearchQuery::text("function foo")).await.unwrap();
    assert!(response.metadata.fallback_used);
    assert_ne!(response.metadata.strategy, Strategy::Literal);
    assert_eq!(response.documents.len(), 2);
}

#[tokio::test]
async fn all_strategies_empty_reports_primary_strategy() {
    if !have_rg() {
        eprintln!("skipping: rg not installed");
        return;
    }
    let tmp = seed_workspace();
    let engine = engine(tmp.path().to_path_buf());
    let response = engine
        .search(&SearchQuery::text("no_such_symbol_anywhere"))
        .await
        .unwrap();
    assert_eq!(response.metadata.strategy, Strategy::Literal);
    assert!(response.metadata.fallback_used);
    assert!(response.documents.is_empty());
    assert!(response.metadata.confidence < 0.5);
}

#[cfg(unix)]
#[tokio::test]
async fn starved_memory_cap_still_terminates_cleanly() {
    if !have_rg() {
        eprintln!("skipping: rg not installed");
        return;
    }
    let tmp = seed_workspace();
    let mut config = SearchConfig::default();
    // Far below what rg needs to start: the child dies on allocation
    // rather than the host paying for it.
    config.memory_cap_bytes = 1024 * 1024;
    let engine = SearchEngine::new(tmp.path().to_path_buf(), &config);
    let result = engine.search(&SearchQuery::text("parse_config")).await;
    // Either an empty result (child produced nothing) or an error is
    // acceptable; what matters is no hang and no leaked process.
    if let Ok(response) = result {
        assert!(response.documents.is_empty());
    }
    assert_eq!(engine.active_processes().await, 0);
}

#[tokio::test]
async fn nul_query_is_rejected_before_spawning() {
    let tmp = TempDir::new().unwrap();
    let engine = engine(tmp.path().to_path_buf());
    let err = engine.search(&SearchQuery::text("a\0b")).await.unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");
    assert_eq!(engine.active_processes().await, 0);
}
