use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;

use turnstore::cli::{Cli, Command};
use turnstore::TurnDirectory;

fn setup_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Warn)
        .init();
}

fn main() -> Result<()> {
    setup_logging();

    let cli = Cli::parse();
    info!("turnstore starting");

    match cli.command {
        Command::List => {
            let mut turns: Vec<String> = std::fs::read_dir(&cli.base_dir)
                .context("Failed to read base directory")?
                .filter_map(|e| e.ok())
                .filter(|e| e.path().is_dir())
                .map(|e| e.file_name().to_string_lossy().to_string())
                .filter(|n| n.starts_with("turn_"))
                .collect();
            turns.sort();
            for turn in turns {
                println!("{}", turn.cyan());
            }
        }
        Command::Show { turn_id } => {
            let turn = TurnDirectory::new(&cli.base_dir, &turn_id, "", "", "");
            let manifest = turn.load_manifest().context("Failed to load manifest")?;
            println!("{}", serde_json::to_string_pretty(&manifest)?);
        }
        Command::Docs { turn_id } => {
            let turn = TurnDirectory::new(&cli.base_dir, &turn_id, "", "", "");
            if !turn.exists() {
                eyre::bail!("Turn not found: {}", turn_id);
            }
            for doc in turn.list_docs() {
                println!("{}", doc.green());
            }
        }
    }

    Ok(())
}
