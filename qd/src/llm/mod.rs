//! LLM client module
//!
//! A thin abstraction over the completion endpoint. Every call is
//! stateless: the whole conversation state lives in the turn's documents,
//! and each request carries a freshly assembled pack.

mod client;
mod error;
mod http;
mod role;

pub use client::LlmClient;
#[cfg(test)]
pub use client::mock::MockLlmClient;
pub use error::LlmError;
pub use http::HttpLlmClient;
pub use role::Role;

/// A single completion request
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// The assembled prompt (pack output)
    pub prompt: String,

    /// Role selects the temperature band and timeout class
    pub role: Role,

    pub max_tokens: u32,

    /// Overrides the role temperature when a recipe pins one
    pub temperature_override: Option<f64>,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>, role: Role, max_tokens: u32) -> Self {
        Self {
            prompt: prompt.into(),
            role,
            max_tokens,
            temperature_override: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature_override = Some(temperature);
        self
    }

    /// Effective temperature for this request
    pub fn temperature(&self) -> f64 {
        self.temperature_override.unwrap_or_else(|| self.role.temperature())
    }
}

/// A completion response with token accounting
#[derive(Debug, Clone, Default)]
pub struct CompletionResponse {
    pub content: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl CompletionResponse {
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temperature_defaults_to_role() {
        let req = CompletionRequest::new("p", Role::Reflex, 100);
        assert_eq!(req.temperature(), Role::Reflex.temperature());
    }

    #[test]
    fn test_temperature_override_wins() {
        let req = CompletionRequest::new("p", Role::Voice, 100).with_temperature(0.2);
        assert_eq!(req.temperature(), 0.2);
    }
}
