//! HTTP client for the tool server
//!
//! Tools live behind `POST http://<host>/<tool.name>` taking a JSON body
//! of tool-specific args plus the executor's enrichment fields.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use crate::config::ToolServerConfig;

use super::catalog::ToolHandler;
use super::error::ToolError;

/// Client for the external tool server
pub struct ToolServerClient {
    base_url: String,
    http: Client,
    timeout: Duration,
    research_timeout: Duration,
}

impl ToolServerClient {
    pub fn from_config(config: &ToolServerConfig) -> Result<Self, ToolError> {
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http: Client::builder().build()?,
            timeout: Duration::from_millis(config.timeout_ms),
            research_timeout: Duration::from_millis(config.research_timeout_ms),
        })
    }

    /// Research tools get the long timeout class
    fn timeout_for(&self, tool_name: &str) -> Duration {
        if tool_name.starts_with("internet.") {
            self.research_timeout
        } else {
            self.timeout
        }
    }

    /// Invoke a tool by name
    pub async fn invoke(&self, tool_name: &str, body: &Value) -> Result<Value, ToolError> {
        let url = format!("{}/{}", self.base_url, tool_name);
        let timeout = self.timeout_for(tool_name);
        debug!(%tool_name, %url, ?timeout, "ToolServerClient::invoke: called");

        let response = self
            .http
            .post(&url)
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ToolError::Timeout {
                        name: tool_name.to_string(),
                        timeout,
                    }
                } else {
                    ToolError::Network(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ToolError::ServerError {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json().await?)
    }
}

/// Catalog handler that forwards to the tool server
pub struct RemoteTool {
    pub name: String,
    pub server: Arc<ToolServerClient>,
}

#[async_trait]
impl ToolHandler for RemoteTool {
    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        self.server.invoke(&self.name, &args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_class_by_namespace() {
        let client = ToolServerClient::from_config(&ToolServerConfig {
            base_url: "http://localhost:1".to_string(),
            timeout_ms: 1_000,
            research_timeout_ms: 5_000,
        })
        .unwrap();

        assert_eq!(client.timeout_for("internet.research"), Duration::from_millis(5_000));
        assert_eq!(client.timeout_for("file.read"), Duration::from_millis(1_000));
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = ToolServerClient::from_config(&ToolServerConfig {
            base_url: "http://localhost:9/".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(client.base_url, "http://localhost:9");
    }
}
