use std::sync::Arc;

use clap::Parser;
use eyre::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use querydaemon::cli::{Cli, Command};
use querydaemon::config::Config;
use querydaemon::events::{EventSink, JsonlSink, NullSink};
use querydaemon::llm::HttpLlmClient;
use querydaemon::phases::{PhaseRunner, TurnRequest};
use querydaemon::planning::NoopRefresher;
use querydaemon::tools::{register_standard_tools, ApprovalBroker, ToolCatalog, ToolServerClient};
use querydaemon::workflow::WorkflowRegistry;

fn setup_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_tracing();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    let catalog = Arc::new(ToolCatalog::new());
    let workflows = Arc::new(WorkflowRegistry::new());
    let server = Arc::new(ToolServerClient::from_config(&config.tool_server)?);

    register_standard_tools(&catalog, server.clone()).await;
    workflows.load_all(&config.storage.workflows_dir).await;
    workflows.load_bundles(&config.storage.bundles_dir, &catalog, server).await;

    match cli.command {
        Command::Run {
            query,
            mode,
            session,
            repo,
        } => {
            let llm = Arc::new(HttpLlmClient::from_config(&config.llm)?);
            let events: Arc<dyn EventSink> = match &config.storage.events_file {
                Some(path) => Arc::new(JsonlSink::new(path.clone())),
                None => Arc::new(NullSink),
            };
            let runner = PhaseRunner::new(
                config.clone(),
                llm,
                catalog,
                workflows,
                Arc::new(ApprovalBroker::new()),
                events,
                Arc::new(NoopRefresher),
            );

            let session_id = session.unwrap_or_else(|| uuid::Uuid::now_v7().to_string());
            let mut request = TurnRequest::new(query, session_id, mode.parse()?);
            request.repo = repo;

            info!("qd run starting");
            let response = runner.handle(request).await?;

            println!("{}", response.response);
            if response.needs_clarification {
                std::process::exit(2);
            }
        }
        Command::Workflows => {
            for name in workflows.list().await {
                println!("{}", name);
            }
        }
        Command::Tools { mode } => {
            let mode = mode.map(|m| m.parse()).transpose()?;
            for (name, description) in catalog.list_tools_with_descriptions(mode).await {
                if description.is_empty() {
                    println!("{}", name);
                } else {
                    println!("{}  {}", name, description);
                }
            }
        }
    }

    Ok(())
}
