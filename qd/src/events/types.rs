//! Thinking-event record

use serde::{Deserialize, Serialize};

/// One progress record for UI display
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThinkingEvent {
    pub trace_id: String,

    /// Pipeline stage (e.g. `phase3_planning`, `coordinator_step`)
    pub stage: String,

    /// `active` | `complete` | `error`
    pub status: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ThinkingEvent {
    pub fn new(trace_id: &str, stage: &str, status: &str) -> Self {
        Self {
            trace_id: trace_id.to_string(),
            stage: stage.to_string(),
            status: status.to_string(),
            confidence: None,
            duration_ms: None,
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optional_fields_omitted_from_json() {
        let event = ThinkingEvent::new("trace-1", "phase3_planning", "active");
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("confidence"));
        assert!(!json.contains("duration_ms"));
    }

    #[test]
    fn test_builder_fields_serialize() {
        let event = ThinkingEvent::new("trace-1", "phase6_validation", "complete")
            .with_confidence(0.9)
            .with_duration(120);
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("0.9"));
        assert!(json.contains("120"));
    }
}
