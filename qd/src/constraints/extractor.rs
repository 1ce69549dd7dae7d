//! Constraint extraction from natural-language queries
//!
//! Fixed regex tables with unit normalization. Re-running on identical
//! input yields identical constraints.

use regex::Regex;
use tracing::{debug, info};

use super::types::{Constraint, ConstraintKind, ConstraintSet, ConstraintSource};

/// Extracts constraints from queries and gathered context
pub struct ConstraintExtractor {
    size_patterns: Vec<Regex>,
    budget_patterns: Vec<Regex>,
    time_patterns: Vec<Regex>,
}

const SIZE_UNITS: &str = r"(KB|MB|GB|bytes?|kilobytes?|megabytes?|gigabytes?)";

impl Default for ConstraintExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstraintExtractor {
    pub fn new() -> Self {
        let size = |prefix: &str| {
            Regex::new(&format!(r"(?i){}\s+(\d+(?:\.\d+)?)\s*{}", prefix, SIZE_UNITS)).expect("static regex")
        };
        let money = |pattern: &str| Regex::new(&format!(r"(?i){}", pattern)).expect("static regex");

        Self {
            size_patterns: vec![
                size(r"(?:under|less\s+than)"),
                size(r"max(?:imum)?"),
                size(r"at\s+most"),
                size(r"no\s+more\s+than"),
                size(r"(?:file\s+)?size\s+limit(?:\s+of)?"),
                size(r"must\s+be\s+under"),
            ],
            budget_patterns: vec![
                money(r"(?:under|less\s+than)\s+\$(\d+(?:,\d{3})*(?:\.\d{2})?)"),
                money(r"budget(?:\s+of)?\s+\$(\d+(?:,\d{3})*(?:\.\d{2})?)"),
                money(r"max(?:imum)?\s+(?:budget\s+)?\$(\d+(?:,\d{3})*(?:\.\d{2})?)"),
                money(r"spend\s+(?:less\s+than|under)\s+\$(\d+(?:,\d{3})*(?:\.\d{2})?)"),
                money(r"no\s+more\s+than\s+\$(\d+(?:,\d{3})*(?:\.\d{2})?)"),
                money(r"\$(\d+(?:,\d{3})*(?:\.\d{2})?)\s+(?:budget|max(?:imum)?)"),
                money(r"within\s+\$(\d+(?:,\d{3})*(?:\.\d{2})?)"),
            ],
            time_patterns: vec![
                money(r"within\s+(\d+)\s*(minutes?|mins?|hours?|hrs?)"),
                money(r"(?:under|less\s+than)\s+(\d+)\s*(minutes?|mins?|hours?|hrs?)"),
                money(r"in\s+at\s+most\s+(\d+)\s*(minutes?|mins?|hours?|hrs?)"),
            ],
        }
    }

    /// Extract constraints from a query and optional gathered context
    ///
    /// Context-sourced constraints are marked and deduped against
    /// query-sourced ones by (type, value).
    pub fn extract(&self, query: &str, context: &str) -> ConstraintSet {
        debug!(query_len = query.len(), context_len = context.len(), "ConstraintExtractor::extract: called");
        let mut constraints = Vec::new();

        self.extract_into(query, ConstraintSource::Extracted, &mut constraints);
        if !context.is_empty() {
            self.extract_into(context, ConstraintSource::Context, &mut constraints);
        }

        ConstraintSet { constraints }
    }

    fn extract_into(&self, text: &str, source: ConstraintSource, constraints: &mut Vec<Constraint>) {
        for re in &self.size_patterns {
            for cap in re.captures_iter(text) {
                let value: f64 = cap[1].parse().unwrap_or(0.0);
                let max_bytes = to_bytes(value, &cap[2]);
                let kind = ConstraintKind::FileSize { max_bytes };
                if is_duplicate(constraints, &kind) {
                    continue;
                }
                let id = format!("file_size_{}", count_of(constraints, "file_size") + 1);
                info!("[ConstraintExtractor] file size constraint: {} bytes", max_bytes);
                constraints.push(Constraint {
                    id,
                    kind,
                    source,
                    original_text: cap[0].to_string(),
                });
            }
        }

        for re in &self.budget_patterns {
            for cap in re.captures_iter(text) {
                let max_amount: f64 = cap[1].replace(',', "").parse().unwrap_or(0.0);
                let kind = ConstraintKind::Budget { max_amount };
                if is_duplicate(constraints, &kind) {
                    continue;
                }
                let id = format!("budget_{}", count_of(constraints, "budget") + 1);
                info!("[ConstraintExtractor] budget constraint: ${}", max_amount);
                constraints.push(Constraint {
                    id,
                    kind,
                    source,
                    original_text: cap[0].to_string(),
                });
            }
        }

        for re in &self.time_patterns {
            for cap in re.captures_iter(text) {
                let value: u64 = cap[1].parse().unwrap_or(0);
                let max_minutes = if cap[2].to_lowercase().starts_with('h') {
                    value * 60
                } else {
                    value
                };
                let kind = ConstraintKind::Time { max_minutes };
                if is_duplicate(constraints, &kind) {
                    continue;
                }
                let id = format!("time_{}", count_of(constraints, "time") + 1);
                constraints.push(Constraint {
                    id,
                    kind,
                    source,
                    original_text: cap[0].to_string(),
                });
            }
        }
    }
}

fn to_bytes(value: f64, unit: &str) -> u64 {
    let multiplier: u64 = match unit.to_lowercase().as_str() {
        "b" | "byte" | "bytes" => 1,
        "kb" | "kilobyte" | "kilobytes" => 1024,
        "mb" | "megabyte" | "megabytes" => 1024 * 1024,
        "gb" | "gigabyte" | "gigabytes" => 1024 * 1024 * 1024,
        _ => 1,
    };
    (value * multiplier as f64) as u64
}

fn is_duplicate(existing: &[Constraint], kind: &ConstraintKind) -> bool {
    existing.iter().any(|c| &c.kind == kind)
}

fn count_of(existing: &[Constraint], type_name: &str) -> usize {
    existing.iter().filter(|c| c.kind.type_name() == type_name).count()
}
