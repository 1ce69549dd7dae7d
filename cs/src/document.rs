//! ContextDocument - ordered numbered sections plus turn metadata

use std::collections::BTreeMap;

use log::debug;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::claim::{Claim, ClaimLedger};
use crate::error::DocError;
use crate::{MAX_SECTION, SECTION_TITLES};

/// Operating mode for a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Chat,
    Code,
}

impl std::str::FromStr for Mode {
    type Err = DocError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "chat" => Ok(Self::Chat),
            "code" => Ok(Self::Code),
            other => Err(DocError::UnknownMode(other.to_string())),
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Chat => write!(f, "chat"),
            Self::Code => write!(f, "code"),
        }
    }
}

/// One numbered section of the document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    pub number: u8,
    pub title: String,
    pub body: String,
}

/// Where the turn currently is in the phase pipeline
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionState {
    pub phase: u8,
    pub phase_name: String,
    pub iteration: u32,
    pub max_iterations: u32,
    pub consecutive_errors: u32,
}

/// Typed view over the §0 query-analysis fields
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryAnalysis {
    pub action_needed: String,
    #[serde(default)]
    pub data_requirements: Vec<String>,
    pub user_purpose: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_reference: Option<serde_json::Value>,
    #[serde(default)]
    pub prior_context: String,
}

/// A recorded routing or validation decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub phase: u8,
    pub decision: String,
    pub rationale: String,
}

/// The per-turn context document
///
/// Serialized deterministically to `context.md` before every LLM call:
/// metadata header, sections in ascending order, then the claims table.
#[derive(Debug, Clone, Default)]
pub struct ContextDocument {
    pub query: String,
    pub session_id: String,
    pub turn_number: u64,
    pub mode: Mode,
    pub trace_id: String,

    /// Optional workflow hint carried between planning attempts
    pub workflow_hint: Option<String>,

    /// Repo scope for code mode
    pub repo: Option<String>,

    sections: BTreeMap<u8, Section>,
    pub claims: ClaimLedger,
    pub source_references: Vec<String>,
    pub execution_state: ExecutionState,
    query_analysis: Option<QueryAnalysis>,
    decisions: Vec<Decision>,
}

impl ContextDocument {
    pub fn new(
        query: impl Into<String>,
        session_id: impl Into<String>,
        turn_number: u64,
        mode: Mode,
        trace_id: impl Into<String>,
    ) -> Self {
        Self {
            query: query.into(),
            session_id: session_id.into(),
            turn_number,
            mode,
            trace_id: trace_id.into(),
            ..Default::default()
        }
    }

    /// Install the §0 query analysis, rendering its section body
    pub fn set_query_analysis(&mut self, analysis: QueryAnalysis) {
        let body = render_query_analysis(&analysis);
        self.sections.insert(
            0,
            Section {
                number: 0,
                title: SECTION_TITLES[0].to_string(),
                body,
            },
        );
        self.query_analysis = Some(analysis);
    }

    /// Write a section, creating or replacing it wholesale
    pub fn append_section(&mut self, number: u8, title: &str, body: &str) -> Result<(), DocError> {
        if number > MAX_SECTION {
            return Err(DocError::SectionOutOfRange(number));
        }
        debug!("[ContextDoc] append_section {} ({})", number, title);
        self.sections.insert(
            number,
            Section {
                number,
                title: title.to_string(),
                body: body.to_string(),
            },
        );
        Ok(())
    }

    /// Replace an existing section's body, keeping its title
    pub fn update_section(&mut self, number: u8, body: &str) -> Result<(), DocError> {
        let section = self
            .sections
            .get_mut(&number)
            .ok_or(DocError::MissingSection(number))?;
        section.body = body.to_string();
        Ok(())
    }

    /// Append text to a section, creating it with the default title if absent
    pub fn append_to_section(&mut self, number: u8, text: &str, separator: &str) -> Result<(), DocError> {
        if number > MAX_SECTION {
            return Err(DocError::SectionOutOfRange(number));
        }
        match self.sections.get_mut(&number) {
            Some(section) => {
                if !section.body.is_empty() {
                    section.body.push_str(separator);
                }
                section.body.push_str(text);
            }
            None => {
                self.sections.insert(
                    number,
                    Section {
                        number,
                        title: SECTION_TITLES[number as usize].to_string(),
                        body: text.to_string(),
                    },
                );
            }
        }
        Ok(())
    }

    pub fn get_section(&self, number: u8) -> Option<&str> {
        self.sections.get(&number).map(|s| s.body.as_str())
    }

    pub fn has_section(&self, number: u8) -> bool {
        self.sections.contains_key(&number)
    }

    /// Numbers of all written sections, ascending
    pub fn section_numbers(&self) -> Vec<u8> {
        self.sections.keys().copied().collect()
    }

    /// Add a claim to the ledger; unsourced claims are rejected
    #[allow(clippy::too_many_arguments)]
    pub fn add_claim(
        &mut self,
        content: &str,
        confidence: f64,
        source: &str,
        ttl_hours: u32,
        url: Option<String>,
        source_ref: Option<String>,
    ) -> Result<(), DocError> {
        self.claims.add(Claim {
            content: content.to_string(),
            confidence,
            source: source.to_string(),
            ttl_hours,
            url,
            source_ref,
        })
    }

    /// Record a routing or validation decision
    pub fn record_decision(&mut self, phase: u8, decision: &str, rationale: &str) {
        self.decisions.push(Decision {
            phase,
            decision: decision.to_string(),
            rationale: rationale.to_string(),
        });
    }

    pub fn decisions(&self) -> &[Decision] {
        &self.decisions
    }

    /// Update the execution-state record; `None` fields are left unchanged
    pub fn update_execution_state(
        &mut self,
        phase: u8,
        phase_name: &str,
        iteration: Option<u32>,
        max_iterations: Option<u32>,
        consecutive_errors: Option<u32>,
    ) {
        self.execution_state.phase = phase;
        self.execution_state.phase_name = phase_name.to_string();
        if let Some(iteration) = iteration {
            self.execution_state.iteration = iteration;
        }
        if let Some(max) = max_iterations {
            self.execution_state.max_iterations = max;
        }
        if let Some(errors) = consecutive_errors {
            self.execution_state.consecutive_errors = errors;
        }
    }

    // Typed §0 accessors

    pub fn action_needed(&self) -> &str {
        self.query_analysis.as_ref().map(|a| a.action_needed.as_str()).unwrap_or("")
    }

    pub fn data_requirements(&self) -> &[String] {
        self.query_analysis
            .as_ref()
            .map(|a| a.data_requirements.as_slice())
            .unwrap_or(&[])
    }

    pub fn user_purpose(&self) -> &str {
        self.query_analysis.as_ref().map(|a| a.user_purpose.as_str()).unwrap_or("")
    }

    pub fn content_reference(&self) -> Option<&serde_json::Value> {
        self.query_analysis.as_ref().and_then(|a| a.content_reference.as_ref())
    }

    /// Look up one field of the content reference as a string
    pub fn content_reference_field(&self, field: &str) -> Option<String> {
        self.content_reference()
            .and_then(|cr| cr.get(field))
            .map(|v| match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
    }

    pub fn prior_context(&self) -> &str {
        self.query_analysis.as_ref().map(|a| a.prior_context.as_str()).unwrap_or("")
    }

    /// Serialize to the canonical `context.md` form
    ///
    /// Fixed order: metadata header, sections ascending, claims table
    /// (confidence-descending), decision log. Two calls on an unchanged
    /// document produce identical bytes.
    pub fn get_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str("# Context Document\n\n");
        out.push_str(&format!("**Query:** {}\n", single_line(&self.query)));
        out.push_str(&format!("**Session:** {}\n", self.session_id));
        out.push_str(&format!("**Turn:** {}\n", self.turn_number));
        out.push_str(&format!("**Mode:** {}\n", self.mode));
        out.push_str(&format!("**Trace:** {}\n", self.trace_id));
        if let Some(repo) = &self.repo {
            out.push_str(&format!("**Repo:** {}\n", repo));
        }

        for section in self.sections.values() {
            out.push_str(&format!("\n## §{} {}\n\n", section.number, section.title));
            out.push_str(section.body.trim_end());
            out.push('\n');
        }

        if !self.claims.is_empty() {
            out.push_str("\n## Claims\n\n");
            out.push_str("| # | Claim | Confidence | Source | TTL (h) |\n");
            out.push_str("|---|-------|------------|--------|--------|\n");
            for (idx, claim) in self.claims.by_confidence().iter().enumerate() {
                let source = claim
                    .url
                    .as_deref()
                    .or(claim.source_ref.as_deref())
                    .unwrap_or(claim.source.as_str());
                out.push_str(&format!(
                    "| {} | {} | {:.2} | {} | {} |\n",
                    idx + 1,
                    single_line(&claim.content),
                    claim.confidence,
                    source,
                    claim.ttl_hours
                ));
            }
        }

        if !self.decisions.is_empty() {
            out.push_str("\n## Decisions\n\n");
            for decision in &self.decisions {
                out.push_str(&format!(
                    "- [phase {}] {}: {}\n",
                    decision.phase, decision.decision, decision.rationale
                ));
            }
        }

        out
    }

    /// Reparse a serialized context document
    ///
    /// Recovers metadata, sections, the §0 typed fields, and claims. The
    /// §0 accessors of a reparsed document return the same values the
    /// original produced.
    pub fn parse(markdown: &str) -> Result<Self, DocError> {
        if !markdown.starts_with("# Context Document") {
            return Err(DocError::NotAContextDocument);
        }

        let mut doc = ContextDocument::default();
        let meta_re = Regex::new(r"(?m)^\*\*(Query|Session|Turn|Mode|Trace|Repo):\*\* (.*)$").expect("static regex");
        let header_end = markdown.find("\n## ").unwrap_or(markdown.len());
        for cap in meta_re.captures_iter(&markdown[..header_end]) {
            let value = cap[2].trim().to_string();
            match &cap[1] {
                "Query" => doc.query = value,
                "Session" => doc.session_id = value,
                "Turn" => doc.turn_number = value.parse().unwrap_or(0),
                "Mode" => doc.mode = value.parse().unwrap_or_default(),
                "Trace" => doc.trace_id = value,
                "Repo" => doc.repo = Some(value),
                _ => {}
            }
        }

        let section_re = Regex::new(r"(?m)^## §(\d+) (.+)$").expect("static regex");
        let mut boundaries: Vec<(usize, usize, u8, String)> = Vec::new();
        for cap in section_re.captures_iter(markdown) {
            let whole = cap.get(0).expect("match");
            let number: u8 = cap[1].parse().unwrap_or(0);
            boundaries.push((whole.start(), whole.end(), number, cap[2].to_string()));
        }
        for (idx, (_, body_start, number, title)) in boundaries.iter().enumerate() {
            let body_end = boundaries
                .get(idx + 1)
                .map(|(start, ..)| *start)
                .unwrap_or_else(|| {
                    markdown[*body_start..]
                        .find("\n## ")
                        .map(|p| body_start + p)
                        .unwrap_or(markdown.len())
                });
            let body = markdown[*body_start..body_end].trim().to_string();
            doc.sections.insert(
                *number,
                Section {
                    number: *number,
                    title: title.clone(),
                    body,
                },
            );
        }

        if let Some(body) = doc.get_section(0) {
            doc.query_analysis = Some(parse_query_analysis(body));
        }

        // Claims table (lenient: recover content/confidence/source)
        if let Some(pos) = markdown.find("\n## Claims\n") {
            let mut rows = markdown[pos..].lines().filter(|l| l.starts_with('|'));
            rows.next(); // header
            rows.next(); // separator
            for line in rows {
                let cells: Vec<&str> = line.trim_matches('|').split('|').map(str::trim).collect();
                if cells.len() < 5 {
                    continue;
                }
                let confidence: f64 = cells[2].parse().unwrap_or(0.0);
                let ttl: u32 = cells[4].parse().unwrap_or(0);
                let source = cells[3].to_string();
                let (url, source_ref) = if source.starts_with("http") {
                    (Some(source.clone()), None)
                } else {
                    (None, Some(source.clone()))
                };
                let _ = doc.claims.add(Claim {
                    content: cells[1].to_string(),
                    confidence,
                    source,
                    ttl_hours: ttl,
                    url,
                    source_ref,
                });
            }
        }

        Ok(doc)
    }
}

fn single_line(text: &str) -> String {
    text.replace('\n', " ")
}

fn render_query_analysis(analysis: &QueryAnalysis) -> String {
    let mut body = String::new();
    body.push_str(&format!("**Action Needed:** {}\n", single_line(&analysis.action_needed)));
    body.push_str(&format!(
        "**Data Requirements:** {}\n",
        analysis.data_requirements.join(", ")
    ));
    body.push_str(&format!("**User Purpose:** {}\n", single_line(&analysis.user_purpose)));
    if let Some(content_ref) = &analysis.content_reference {
        body.push_str(&format!("**Content Reference:** {}\n", content_ref));
    }
    body.push_str(&format!("**Prior Context:** {}\n", single_line(&analysis.prior_context)));
    body
}

fn parse_query_analysis(body: &str) -> QueryAnalysis {
    let field_re = Regex::new(
        r"(?m)^\*\*(Action Needed|Data Requirements|User Purpose|Content Reference|Prior Context):\*\* (.*)$",
    )
    .expect("static regex");

    let mut analysis = QueryAnalysis::default();
    for cap in field_re.captures_iter(body) {
        let value = cap[2].trim().to_string();
        match &cap[1] {
            "Action Needed" => analysis.action_needed = value,
            "Data Requirements" => {
                analysis.data_requirements = value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect();
            }
            "User Purpose" => analysis.user_purpose = value,
            "Content Reference" => {
                analysis.content_reference = serde_json::from_str(&value).ok();
            }
            "Prior Context" => analysis.prior_context = value,
            _ => {}
        }
    }
    analysis
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_doc() -> ContextDocument {
        let mut doc = ContextDocument::new("cheapest Arduino Nano under $10", "sess-1", 3, Mode::Chat, "trace-abc");
        doc.set_query_analysis(QueryAnalysis {
            action_needed: "find product".to_string(),
            data_requirements: vec!["price".to_string(), "url".to_string()],
            user_purpose: "purchase decision".to_string(),
            content_reference: Some(serde_json::json!({"source_url": "https://ref.example"})),
            prior_context: "none".to_string(),
        });
        doc
    }

    #[test]
    fn test_sections_render_in_ascending_order() {
        let mut doc = sample_doc();
        doc.append_section(4, "Execution", "ran tools").unwrap();
        doc.append_section(2, "Context", "prior turns").unwrap();

        let md = doc.get_markdown();
        let pos0 = md.find("## §0").unwrap();
        let pos2 = md.find("## §2").unwrap();
        let pos4 = md.find("## §4").unwrap();
        assert!(pos0 < pos2 && pos2 < pos4);
    }

    #[test]
    fn test_append_section_out_of_range() {
        let mut doc = sample_doc();
        assert!(matches!(
            doc.append_section(9, "Nope", "x"),
            Err(DocError::SectionOutOfRange(9))
        ));
    }

    #[test]
    fn test_update_section_requires_existing() {
        let mut doc = sample_doc();
        assert!(matches!(doc.update_section(6, "draft"), Err(DocError::MissingSection(6))));

        doc.append_section(6, "Synthesis", "v1").unwrap();
        doc.update_section(6, "v2").unwrap();
        assert_eq!(doc.get_section(6), Some("v2"));
    }

    #[test]
    fn test_append_to_section_uses_separator() {
        let mut doc = sample_doc();
        doc.append_to_section(4, "first", "\n\n").unwrap();
        doc.append_to_section(4, "second", "\n\n").unwrap();
        assert_eq!(doc.get_section(4), Some("first\n\nsecond"));
    }

    #[test]
    fn test_append_to_section_creates_with_default_title() {
        let mut doc = sample_doc();
        doc.append_to_section(3, "the plan", "\n").unwrap();
        assert!(doc.get_markdown().contains("## §3 Plan"));
    }

    #[test]
    fn test_markdown_deterministic() {
        let mut doc = sample_doc();
        doc.append_section(2, "Context", "stuff").unwrap();
        doc.add_claim("price is $8.99", 0.9, "internet.research", 24, Some("https://x".into()), None)
            .unwrap();

        assert_eq!(doc.get_markdown(), doc.get_markdown());
    }

    #[test]
    fn test_claims_table_sorted_by_confidence() {
        let mut doc = sample_doc();
        doc.add_claim("low", 0.3, "t", 24, Some("https://low".into()), None).unwrap();
        doc.add_claim("high", 0.95, "t", 24, Some("https://high".into()), None)
            .unwrap();

        let md = doc.get_markdown();
        let high_pos = md.find("https://high").unwrap();
        let low_pos = md.find("https://low").unwrap();
        assert!(high_pos < low_pos);
    }

    #[test]
    fn test_round_trip_section_zero_accessors() {
        let doc = sample_doc();
        let parsed = ContextDocument::parse(&doc.get_markdown()).unwrap();

        assert_eq!(parsed.action_needed(), doc.action_needed());
        assert_eq!(parsed.data_requirements(), doc.data_requirements());
        assert_eq!(parsed.user_purpose(), doc.user_purpose());
        assert_eq!(parsed.prior_context(), doc.prior_context());
        assert_eq!(
            parsed.content_reference_field("source_url"),
            Some("https://ref.example".to_string())
        );
    }

    #[test]
    fn test_round_trip_metadata() {
        let doc = sample_doc();
        let parsed = ContextDocument::parse(&doc.get_markdown()).unwrap();

        assert_eq!(parsed.query, doc.query);
        assert_eq!(parsed.session_id, doc.session_id);
        assert_eq!(parsed.turn_number, doc.turn_number);
        assert_eq!(parsed.mode, doc.mode);
        assert_eq!(parsed.trace_id, doc.trace_id);
    }

    #[test]
    fn test_parse_rejects_non_context_document() {
        assert!(matches!(
            ContextDocument::parse("# Some Other File"),
            Err(DocError::NotAContextDocument)
        ));
    }

    #[test]
    fn test_parse_recovers_claims() {
        let mut doc = sample_doc();
        doc.add_claim("price is $8.99", 0.9, "internet.research", 24, Some("https://x".into()), None)
            .unwrap();

        let parsed = ContextDocument::parse(&doc.get_markdown()).unwrap();
        assert_eq!(parsed.claims.len(), 1);
        let claim = parsed.claims.iter().next().unwrap();
        assert_eq!(claim.url.as_deref(), Some("https://x"));
    }

    #[test]
    fn test_execution_state_partial_update() {
        let mut doc = sample_doc();
        doc.update_execution_state(3, "Planning", Some(1), Some(5), None);
        doc.update_execution_state(3, "Planning", Some(2), None, None);

        assert_eq!(doc.execution_state.iteration, 2);
        assert_eq!(doc.execution_state.max_iterations, 5);
    }

    #[test]
    fn test_record_decision_renders() {
        let mut doc = sample_doc();
        doc.record_decision(7, "RETRY", "url not in research");
        assert!(doc.get_markdown().contains("[phase 7] RETRY: url not in research"));
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn round_trip_preserves_action_needed(action in "[a-z ]{1,40}", purpose in "[a-z ]{1,40}") {
                let mut doc = ContextDocument::new("q", "s", 1, Mode::Chat, "t");
                doc.set_query_analysis(QueryAnalysis {
                    action_needed: action.trim().to_string(),
                    data_requirements: vec!["price".to_string()],
                    user_purpose: purpose.trim().to_string(),
                    content_reference: None,
                    prior_context: String::new(),
                });

                let parsed = ContextDocument::parse(&doc.get_markdown()).unwrap();
                prop_assert_eq!(parsed.action_needed(), doc.action_needed());
                prop_assert_eq!(parsed.user_purpose(), doc.user_purpose());
            }
        }
    }
}
