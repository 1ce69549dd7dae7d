//! Phase 2 - context gathering
//!
//! Pulls relevant material from prior turns (grep over their context
//! documents) and the memory store, then writes §2 and the source
//! reference list.

use std::path::Path;

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use contextdoc::{search_turns, ContextDocument};
use turnstore::TurnDirectory;

use crate::loops::LoopServices;

const PHASE: &str = "phase2_context";
const MAX_PRIOR_MATCHES: usize = 12;

/// Gather prior-turn and memory context into §2
pub async fn gather_context(
    services: &LoopServices,
    doc: &mut ContextDocument,
    turn_dir: &TurnDirectory,
    turns_dir: &Path,
) {
    services.metrics.start_phase(PHASE);
    let mut body = String::new();
    let mut references: Vec<String> = Vec::new();

    // Prior turns: grep their context documents for the query's terms
    let pattern = query_pattern(&doc.query);
    if !pattern.is_empty() {
        match search_turns(turns_dir, &pattern, MAX_PRIOR_MATCHES) {
            Ok(matches) => {
                let prior: Vec<_> = matches.into_iter().filter(|m| m.turn_id != turn_dir.turn_id).collect();
                if !prior.is_empty() {
                    body.push_str("**Prior turns:**\n");
                    for m in &prior {
                        body.push_str(&format!("- [{}] {}\n", m.turn_id, m.line));
                        references.push(format!("{}/context.md:{}", m.turn_id, m.line_number));
                    }
                }
            }
            Err(e) => {
                debug!("[ContextGatherer] Prior-turn search failed: {}", e);
            }
        }
    }

    // Memory store, when a handler is registered
    if services.catalog.has_tool("memory.search").await {
        let result = services
            .catalog
            .execute("memory.search", json!({"query": doc.query}), Some(doc.mode))
            .await;
        if result.get("status").and_then(Value::as_str) == Some("success") {
            if let Some(hits) = memory_hits(&result) {
                if !hits.is_empty() {
                    body.push_str("\n**Memory:**\n");
                    for hit in &hits {
                        body.push_str(&format!("- {}\n", hit));
                        references.push(format!("memory:{}", hit));
                    }
                }
            }
        } else {
            warn!("[ContextGatherer] memory.search failed: {}", result);
        }
    }

    if body.is_empty() {
        body.push_str("No relevant prior context found.\n");
    }

    doc.append_section(2, "Context", &body).ok();
    doc.source_references.extend(references);
    info!("[ContextGatherer] §2 written ({} refs)", doc.source_references.len());
    services.metrics.end_phase(PHASE);
}

/// Alternation pattern over the query's significant words
fn query_pattern(query: &str) -> String {
    let words: Vec<String> = query
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| w.len() > 3)
        .map(|w| regex::escape(&w))
        .collect();
    words.join("|")
}

fn memory_hits(result: &Value) -> Option<Vec<String>> {
    let hits = result
        .get("results")
        .or_else(|| result.get("result"))
        .or_else(|| result.get("hits"))?;
    match hits {
        Value::Array(items) => Some(
            items
                .iter()
                .map(|item| match item {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect(),
        ),
        Value::String(s) => Some(vec![s.clone()]),
        _ => None,
    }
}
