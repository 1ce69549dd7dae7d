//! CLI argument parsing for turnstore

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "turnstore")]
#[command(author, version, about = "Inspect per-turn document directories", long_about = None)]
pub struct Cli {
    /// Base turns directory
    #[arg(short, long, default_value = "turns")]
    pub base_dir: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List turns in the base directory
    List,

    /// Show a turn's manifest
    Show {
        /// Turn ID (e.g. turn_000042)
        #[arg(required = true)]
        turn_id: String,
    },

    /// List documents inside a turn
    Docs {
        /// Turn ID (e.g. turn_000042)
        #[arg(required = true)]
        turn_id: String,
    },
}
