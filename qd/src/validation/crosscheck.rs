//! Deterministic URL and price verification
//!
//! Every URL in the draft must appear in, priority order: toolresults.md,
//! the §4 claims table, or §2 gathered context. Prices must match a
//! source within tolerance.

use regex::Regex;
use tracing::debug;

use contextdoc::ContextDocument;
use turnstore::{PathType, TurnDirectory};

/// What the cross-check found
#[derive(Debug, Clone, Default)]
pub struct CrosscheckReport {
    pub failed_urls: Vec<String>,
    pub price_mismatches: Vec<String>,
    pub urls_verified: u32,
    pub prices_checked: u32,
}

impl CrosscheckReport {
    pub fn is_clean(&self) -> bool {
        self.failed_urls.is_empty() && self.price_mismatches.is_empty()
    }
}

fn url_pattern() -> Regex {
    Regex::new(r#"https?://[^\s)\]>"',]+"#).expect("static regex")
}

fn price_pattern() -> Regex {
    Regex::new(r"\$(\d+(?:,\d{3})*(?:\.\d{1,2})?)").expect("static regex")
}

/// Cross-check a draft response against the turn's evidence
pub fn crosscheck_response(
    response: &str,
    doc: &ContextDocument,
    turn_dir: &TurnDirectory,
    price_tolerance: f64,
) -> CrosscheckReport {
    let mut report = CrosscheckReport::default();

    // Evidence sources in priority order: toolresults.md, the §4 claims
    // table (rendered from the ledger), gathered §2 context
    let toolresults = std::fs::read_to_string(turn_dir.doc_path("toolresults.md", PathType::Turn)).unwrap_or_default();
    let execution = doc.get_section(4).unwrap_or("").to_string();
    let claims_table: String = doc
        .claims
        .iter()
        .map(|c| {
            format!(
                "{} {} {}",
                c.content,
                c.url.as_deref().unwrap_or(""),
                c.source_ref.as_deref().unwrap_or("")
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    let gathered = doc.get_section(2).unwrap_or("").to_string();
    let evidence = format!("{}\n{}\n{}\n{}", toolresults, execution, claims_table, gathered);

    for url in url_pattern().find_iter(response) {
        let url = url.as_str().trim_end_matches(['.', ',', ';']);
        if evidence.contains(url) {
            report.urls_verified += 1;
        } else {
            debug!(%url, "crosscheck_response: URL not found in any evidence source");
            report.failed_urls.push(url.to_string());
        }
    }

    let evidence_prices: Vec<f64> = price_pattern()
        .captures_iter(&evidence)
        .filter_map(|cap| cap[1].replace(',', "").parse::<f64>().ok())
        .collect();

    for cap in price_pattern().captures_iter(response) {
        let Ok(price) = cap[1].replace(',', "").parse::<f64>() else {
            continue;
        };
        report.prices_checked += 1;
        let matched = evidence_prices
            .iter()
            .any(|source| (source - price).abs() <= source.abs() * price_tolerance + f64::EPSILON);
        if !matched {
            report.price_mismatches.push(format!("${} not backed by any source", &cap[1]));
        }
    }

    report
}
