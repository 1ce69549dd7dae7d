//! Tool spec validation

use regex::Regex;
use serde_yaml::Value as Yaml;
use tracing::debug;

use crate::tools::parse_frontmatter;

const REQUIRED_FIELDS: [&str; 4] = ["name", "entrypoint", "inputs", "outputs"];
const VALID_MODES: [&str; 3] = ["code", "chat", "any"];
const VALID_PARAM_TYPES: [&str; 7] = ["string", "int", "float", "bool", "list", "dict", "any"];

/// Outcome of validating a tool spec
#[derive(Debug, Clone, Default)]
pub struct SpecValidation {
    pub errors: Vec<(String, String)>,
    pub warnings: Vec<(String, String)>,
}

impl SpecValidation {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, field: &str, message: impl Into<String>) {
        self.errors.push((field.to_string(), message.into()));
    }

    fn warn(&mut self, field: &str, message: impl Into<String>) {
        self.warnings.push((field.to_string(), message.into()));
    }
}

/// Validate a tool spec's YAML frontmatter
///
/// Required: `name`, `entrypoint`, `inputs`, `outputs`. The entrypoint
/// must be identifier-shaped, `mode_required` one of code/chat/any (or
/// absent), `version` semver-ish, and every input/output a typed entry.
/// Unknown param types warn rather than fail.
pub fn validate_tool_spec(spec_content: &str) -> SpecValidation {
    debug!(len = spec_content.len(), "validate_tool_spec: called");
    let mut result = SpecValidation::default();

    let Some((yaml, _body)) = parse_frontmatter(spec_content) else {
        result.error("frontmatter", "missing YAML frontmatter");
        return result;
    };
    let Yaml::Mapping(map) = &yaml else {
        result.error("frontmatter", "frontmatter is not a mapping");
        return result;
    };

    for field in REQUIRED_FIELDS {
        if map.get(field).is_none() {
            result.error(field, "required field missing");
        }
    }

    if let Some(Yaml::String(name)) = map.get("name") {
        let name_re = Regex::new(r"^[a-z][a-z0-9_]*(\.[a-z][a-z0-9_]*)*$").expect("static regex");
        if !name_re.is_match(name) {
            result.error("name", format!("invalid tool name: {}", name));
        }
    }

    if let Some(Yaml::String(entrypoint)) = map.get("entrypoint") {
        let ident_re = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex");
        if !ident_re.is_match(entrypoint) {
            result.error("entrypoint", format!("not a valid identifier: {}", entrypoint));
        }
    }

    match map.get("mode_required") {
        None | Some(Yaml::Null) => {}
        Some(Yaml::String(mode)) if mode.is_empty() || mode == "null" => {}
        Some(Yaml::String(mode)) if VALID_MODES.contains(&mode.as_str()) => {}
        Some(other) => {
            result.error("mode_required", format!("invalid mode: {:?}", other));
        }
    }

    if let Some(Yaml::String(version)) = map.get("version") {
        let version_re = Regex::new(r"^\d+\.\d+(\.\d+)?$").expect("static regex");
        if !version_re.is_match(version) {
            result.error("version", format!("not a version: {}", version));
        }
    }

    for key in ["inputs", "outputs"] {
        match map.get(key) {
            Some(Yaml::Sequence(items)) => {
                for (idx, item) in items.iter().enumerate() {
                    validate_param(item, &format!("{}[{}]", key, idx), &mut result);
                }
            }
            Some(_) => result.error(key, "must be a list of typed parameters"),
            None => {}
        }
    }

    result
}

fn validate_param(item: &Yaml, path: &str, result: &mut SpecValidation) {
    let Yaml::Mapping(map) = item else {
        result.error(path, "parameter must be a mapping");
        return;
    };
    if !matches!(map.get("name"), Some(Yaml::String(_))) {
        result.error(path, "parameter missing name");
    }
    match map.get("type") {
        Some(Yaml::String(type_name)) => {
            if !VALID_PARAM_TYPES.contains(&type_name.as_str()) {
                result.warn(path, format!("unknown type: {}", type_name));
            }
        }
        Some(_) => result.error(path, "type must be a string"),
        None => result.error(path, "parameter missing type"),
    }
}
