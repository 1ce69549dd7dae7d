use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;

use contextdoc::cli::{Cli, Command};
use contextdoc::{search_turns, ContextDocument};

fn setup_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Warn)
        .init();
}

fn main() -> Result<()> {
    setup_logging();

    let cli = Cli::parse();
    info!("contextdoc starting");

    match cli.command {
        Command::Show { path } => {
            let content = std::fs::read_to_string(&path)
                .context(format!("Failed to read {}", path.display()))?;
            let doc = ContextDocument::parse(&content).context("Failed to parse context document")?;

            println!("{} {}", "Query:".bold(), doc.query);
            println!("{} {}", "Session:".bold(), doc.session_id);
            println!("{} {}", "Mode:".bold(), doc.mode);
            for number in doc.section_numbers() {
                let body = doc.get_section(number).unwrap_or("");
                println!(
                    "{} {} chars",
                    format!("§{}", number).cyan(),
                    body.len()
                );
            }
            println!("{} {}", "Claims:".bold(), doc.claims.len());
        }
        Command::Grep {
            pattern,
            turns_dir,
            max_results,
        } => {
            let matches = search_turns(&turns_dir, &pattern, max_results)?;
            for m in &matches {
                println!("{}:{}: {}", m.turn_id.cyan(), m.line_number, m.line);
            }
            if matches.is_empty() {
                println!("{}", "no matches".yellow());
            }
        }
    }

    Ok(())
}
