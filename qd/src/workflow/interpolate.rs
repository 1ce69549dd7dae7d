//! `{{var}}` interpolation and criteria evaluation
//!
//! A bare `{{var}}` value keeps the referenced JSON type; `{{a.b}}` inside
//! other text string-substitutes; `| default: 'x'` supplies a value when
//! the path does not resolve.

use regex::Regex;
use serde_json::{Map, Value};

/// Interpolate every `{{...}}` template in a step's args
pub fn interpolate_args(args: &Value, context: &Map<String, Value>) -> Value {
    match args {
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, value) in map {
                out.insert(key.clone(), interpolate_args(value, context));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| interpolate_args(v, context)).collect()),
        Value::String(s) => interpolate_value(s, context),
        other => other.clone(),
    }
}

/// Interpolate one string value, preserving type for pure references
fn interpolate_value(template: &str, context: &Map<String, Value>) -> Value {
    let pure_re = Regex::new(r"^\s*\{\{([^}|]+)\}\}\s*$").expect("static regex");
    if let Some(cap) = pure_re.captures(template) {
        return get_nested(context, cap[1].trim()).unwrap_or(Value::Null);
    }
    Value::String(interpolate_string(template, context))
}

/// String-substitute every `{{...}}` occurrence
pub fn interpolate_string(template: &str, context: &Map<String, Value>) -> String {
    if !template.contains("{{") {
        return template.to_string();
    }

    let re = Regex::new(r"\{\{([^}]+)\}\}").expect("static regex");
    re.replace_all(template, |caps: &regex::Captures| {
        let expr = caps[1].trim();
        if let Some((path, default)) = expr.split_once("| default:") {
            match get_nested(context, path.trim()) {
                Some(value) => render(&value),
                None => default.trim().trim_matches(|c| c == '\'' || c == '"').to_string(),
            }
        } else {
            get_nested(context, expr).map(|v| render(&v)).unwrap_or_default()
        }
    })
    .to_string()
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Traverse `a.b.c` through nested objects
fn get_nested(context: &Map<String, Value>, path: &str) -> Option<Value> {
    let mut parts = path.split('.');
    let mut current = context.get(parts.next()?)?.clone();
    for part in parts {
        current = current.get(part)?.clone();
    }
    if current.is_null() {
        None
    } else {
        Some(current)
    }
}

/// Evaluate a step condition against the rolling context
///
/// A pure `{{var}}` checks truthiness; anything else goes through the
/// criteria evaluator.
pub fn evaluate_condition(condition: &str, context: &Map<String, Value>) -> bool {
    let trimmed = condition.trim();
    if trimmed.starts_with("{{") && trimmed.ends_with("}}") {
        let path = trimmed.trim_start_matches("{{").trim_end_matches("}}").trim();
        return get_nested(context, path).map(|v| truthy(&v)).unwrap_or(false);
    }
    evaluate_criterion(trimmed, context)
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Evaluate one success criterion against workflow outputs
///
/// Supported forms:
/// - `name`: output exists and is truthy
/// - `count(name) OP number`: array length or numeric comparison
/// - `name OP number` and `name OP 'string'`
pub fn evaluate_criterion(criterion: &str, outputs: &Map<String, Value>) -> bool {
    let criterion = criterion.trim();

    let count_re = Regex::new(r"^count\(([^)]+)\)\s*(>=|<=|==|!=|>|<)\s*(\d+)$").expect("static regex");
    if let Some(cap) = count_re.captures(criterion) {
        let count = get_nested(outputs, cap[1].trim())
            .map(|v| match v {
                Value::Array(a) => a.len() as f64,
                Value::Number(n) => n.as_f64().unwrap_or(0.0),
                Value::String(s) => s.len() as f64,
                _ => 0.0,
            })
            .unwrap_or(0.0);
        let target: f64 = cap[3].parse().unwrap_or(0.0);
        return compare(count, &cap[2], target);
    }

    let cmp_re = Regex::new(r"^([\w.]+)\s*(>=|<=|==|!=|>|<)\s*(.+)$").expect("static regex");
    if let Some(cap) = cmp_re.captures(criterion) {
        let left = get_nested(outputs, cap[1].trim());
        let raw_right = cap[3].trim();

        if let Ok(target) = raw_right.parse::<f64>() {
            let left_num = left.as_ref().and_then(Value::as_f64).unwrap_or(f64::NAN);
            return compare(left_num, &cap[2], target);
        }

        let right = raw_right.trim_matches(|c| c == '\'' || c == '"');
        let left_str = left.as_ref().map(render).unwrap_or_default();
        return match &cap[2] {
            "==" => left_str == right,
            "!=" => left_str != right,
            _ => false,
        };
    }

    get_nested(outputs, criterion).map(|v| truthy(&v)).unwrap_or(false)
}

fn compare(left: f64, op: &str, right: f64) -> bool {
    match op {
        ">=" => left >= right,
        "<=" => left <= right,
        ">" => left > right,
        "<" => left < right,
        "==" => left == right,
        "!=" => left != right,
        _ => false,
    }
}
