//! Standard tool registration
//!
//! The canonical dotted-namespace tools live on the tool server; startup
//! registers a remote handler for each with its mode gate.

use std::sync::Arc;

use tracing::info;

use super::catalog::{ToolCatalog, ToolMode};
use super::server::{RemoteTool, ToolServerClient};

/// The standard catalog: (name, mode gate, description)
const STANDARD_TOOLS: [(&str, ToolMode, &str); 12] = [
    ("internet.research", ToolMode::Any, "Research a query across the web"),
    ("internet.research_full", ToolMode::Any, "Deep research with full page fetches"),
    ("memory.search", ToolMode::Any, "Search the session memory store"),
    ("memory.save", ToolMode::Any, "Save a fact to the memory store"),
    ("memory.delete", ToolMode::Any, "Delete a fact from the memory store"),
    ("file.read", ToolMode::Any, "Read a file"),
    ("file.write", ToolMode::Any, "Write a file"),
    ("browser.navigate", ToolMode::Any, "Drive a browser to a page"),
    ("git.commit", ToolMode::Code, "Commit staged changes"),
    ("git.status", ToolMode::Code, "Show repository status"),
    ("repo.scope", ToolMode::Code, "Discover the relevant repo scope for a goal"),
    ("llm.call", ToolMode::Any, "Direct LLM call as a tool"),
];

/// Register every standard tool as a remote handler
///
/// Existing registrations (e.g. a local memory fast path installed by the
/// host) are left in place.
pub async fn register_standard_tools(catalog: &ToolCatalog, server: Arc<ToolServerClient>) -> usize {
    let mut registered = 0;
    for (name, mode, description) in STANDARD_TOOLS {
        let handler = Arc::new(RemoteTool {
            name: name.to_string(),
            server: server.clone(),
        });
        if catalog.register(name, handler, mode, description, false).await {
            registered += 1;
        }
    }
    info!("[Tools] Registered {} standard tools", registered);
    registered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToolServerConfig;
    use contextdoc::Mode;

    #[tokio::test]
    async fn test_registers_standard_set() {
        let catalog = ToolCatalog::new();
        let server = Arc::new(ToolServerClient::from_config(&ToolServerConfig::default()).unwrap());

        let registered = register_standard_tools(&catalog, server).await;
        assert_eq!(registered, STANDARD_TOOLS.len());
        assert!(catalog.has_tool("internet.research").await);
        assert!(catalog.has_tool("memory.search").await);

        // Code tools are hidden in chat mode
        let chat_tools = catalog.list_tools(Some(Mode::Chat)).await;
        assert!(!chat_tools.contains(&"git.commit".to_string()));
        assert!(chat_tools.contains(&"file.write".to_string()));
    }

    #[tokio::test]
    async fn test_existing_registration_kept() {
        use crate::tools::testing::EchoTool;

        let catalog = ToolCatalog::new();
        catalog
            .register("memory.search", Arc::new(EchoTool), ToolMode::Any, "local fast path", false)
            .await;
        let server = Arc::new(ToolServerClient::from_config(&ToolServerConfig::default()).unwrap());

        let registered = register_standard_tools(&catalog, server).await;
        assert_eq!(registered, STANDARD_TOOLS.len() - 1);
    }
}
