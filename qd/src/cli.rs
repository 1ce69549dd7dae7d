//! CLI argument parsing for querydaemon

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "qd")]
#[command(author, version, about = "LLM-driven orchestration engine", long_about = None)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one query through the full pipeline
    Run {
        /// The user query
        #[arg(required = true)]
        query: String,

        /// Operating mode: chat or code
        #[arg(short, long, default_value = "chat")]
        mode: String,

        /// Session ID (a fresh one is minted when omitted)
        #[arg(short, long)]
        session: Option<String>,

        /// Repo scope for code mode
        #[arg(long)]
        repo: Option<String>,
    },

    /// List registered workflows
    Workflows,

    /// List registered tools
    Tools {
        /// Filter by mode: chat or code
        #[arg(short, long)]
        mode: Option<String>,
    },
}
