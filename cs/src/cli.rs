//! CLI argument parsing for contextdoc

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "cs")]
#[command(author, version, about = "Inspect and search context documents", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show a context document's sections and claims
    Show {
        /// Path to a context.md file
        #[arg(required = true)]
        path: PathBuf,
    },

    /// Search prior turns' context documents for a pattern
    Grep {
        /// Regex pattern
        #[arg(required = true)]
        pattern: String,

        /// Base turns directory
        #[arg(short, long, default_value = "turns")]
        turns_dir: PathBuf,

        /// Maximum results to print
        #[arg(short, long, default_value_t = 20)]
        max_results: usize,
    },
}
