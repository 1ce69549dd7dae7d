//! Embedded prompts
//!
//! These are compiled into the binary from .pmt files at build time.

/// Phase 1.5 reflection gate (PROCEED / CLARIFY)
pub const REFLECTION: &str = include_str!("../../prompts/reflection.pmt");

/// Phase 2 context gatherer
pub const CONTEXT: &str = include_str!("../../prompts/context.pmt");

/// Strategic planner
pub const PLANNER: &str = include_str!("../../prompts/planner.pmt");

/// Coordinator one-step decisions
pub const COORDINATOR: &str = include_str!("../../prompts/coordinator.pmt");

/// Executor command loop
pub const EXECUTOR: &str = include_str!("../../prompts/executor.pmt");

/// Synthesizer
pub const SYNTHESIZER: &str = include_str!("../../prompts/synthesizer.pmt");

/// Response validator
pub const VALIDATOR: &str = include_str!("../../prompts/validator.pmt");

/// Validator-driven revision
pub const REVISION: &str = include_str!("../../prompts/revision.pmt");

/// Document compressor (summarize / bullet_points)
pub const COMPRESSOR: &str = include_str!("../../prompts/compressor.pmt");

/// Self-extension tool generator
pub const TOOL_GENERATOR: &str = include_str!("../../prompts/tool_generator.pmt");

/// Get the embedded prompt by name
pub fn get_embedded(name: &str) -> Option<&'static str> {
    match name {
        "reflection" => Some(REFLECTION),
        "context" => Some(CONTEXT),
        "planner" => Some(PLANNER),
        "coordinator" => Some(COORDINATOR),
        "executor" => Some(EXECUTOR),
        "synthesizer" => Some(SYNTHESIZER),
        "validator" => Some(VALIDATOR),
        "revision" => Some(REVISION),
        "compressor" => Some(COMPRESSOR),
        "tool_generator" => Some(TOOL_GENERATOR),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_embedded_planner() {
        let planner = get_embedded("planner").unwrap();
        assert!(planner.contains("STRATEGIC_PLAN"));
        assert!(planner.contains("route_to"));
        assert!(planner.contains("self_extension"));
    }

    #[test]
    fn test_get_embedded_validator_names_decisions() {
        let validator = get_embedded("validator").unwrap();
        for decision in ["APPROVE", "APPROVE_PARTIAL", "REVISE", "RETRY", "FAIL"] {
            assert!(validator.contains(decision), "missing {}", decision);
        }
    }

    #[test]
    fn test_get_embedded_unknown() {
        assert!(get_embedded("unknown-fragment").is_none());
    }
}
