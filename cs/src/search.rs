//! Search across prior turns' context documents
//!
//! Used by context gathering to find prior-turn material relevant to the
//! current query, and by the `cs grep` subcommand.

use std::path::Path;

use eyre::{Context, Result};
use grep_regex::RegexMatcher;
use grep_searcher::sinks::UTF8;
use grep_searcher::Searcher;
use log::debug;
use walkdir::WalkDir;

/// A matching line from some turn's context.md
#[derive(Debug, Clone)]
pub struct TurnMatch {
    /// Turn directory name (e.g. `turn_000042`)
    pub turn_id: String,

    /// 1-based line number within context.md
    pub line_number: u64,

    /// The matching line, trimmed
    pub line: String,
}

/// Scan `<turns_dir>/turn_*/context.md` for a regex pattern
///
/// Results come back in turn order (ascending), capped at `max_results`.
pub fn search_turns(turns_dir: impl AsRef<Path>, pattern: &str, max_results: usize) -> Result<Vec<TurnMatch>> {
    let turns_dir = turns_dir.as_ref();
    debug!("[ContextDoc] search_turns pattern={} dir={}", pattern, turns_dir.display());

    let matcher = RegexMatcher::new_line_matcher(pattern).context("Invalid search pattern")?;
    let mut matches: Vec<TurnMatch> = Vec::new();

    let mut turn_dirs: Vec<_> = WalkDir::new(turns_dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
        .filter(|e| e.file_name().to_string_lossy().starts_with("turn_"))
        .map(|e| e.into_path())
        .collect();
    turn_dirs.sort();

    for turn_path in turn_dirs {
        if matches.len() >= max_results {
            break;
        }
        let context_path = turn_path.join("context.md");
        if !context_path.exists() {
            continue;
        }
        let turn_id = turn_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let mut searcher = Searcher::new();
        searcher.search_path(
            &matcher,
            &context_path,
            UTF8(|line_number, line| {
                matches.push(TurnMatch {
                    turn_id: turn_id.clone(),
                    line_number,
                    line: line.trim_end().to_string(),
                });
                Ok(matches.len() < max_results)
            }),
        )?;
    }

    Ok(matches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write_turn(base: &Path, turn_id: &str, content: &str) {
        let dir = base.join(turn_id);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("context.md"), content).unwrap();
    }

    #[test]
    fn test_search_finds_matches_across_turns() {
        let temp = tempdir().unwrap();
        write_turn(temp.path(), "turn_000001", "# Context Document\nbudget is $500\n");
        write_turn(temp.path(), "turn_000002", "# Context Document\nno money talk\n");
        write_turn(temp.path(), "turn_000003", "# Context Document\nbudget raised to $900\n");

        let matches = search_turns(temp.path(), r"budget", 10).unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].turn_id, "turn_000001");
        assert_eq!(matches[1].turn_id, "turn_000003");
    }

    #[test]
    fn test_search_respects_max_results() {
        let temp = tempdir().unwrap();
        for i in 1..=5 {
            write_turn(temp.path(), &format!("turn_{:06}", i), "match here\n");
        }

        let matches = search_turns(temp.path(), "match", 2).unwrap();
        assert_eq!(matches.len(), 2);
    }

    #[test]
    fn test_search_skips_turns_without_context() {
        let temp = tempdir().unwrap();
        fs::create_dir_all(temp.path().join("turn_000001")).unwrap();
        write_turn(temp.path(), "turn_000002", "needle\n");

        let matches = search_turns(temp.path(), "needle", 10).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].turn_id, "turn_000002");
    }

    #[test]
    fn test_invalid_pattern_errors() {
        let temp = tempdir().unwrap();
        assert!(search_turns(temp.path(), "(unclosed", 10).is_err());
    }
}
