//! Claim ledger - evidence-bearing assertions extracted from tool results

use serde::{Deserialize, Serialize};

use crate::error::DocError;

/// An evidence-bearing assertion with a confidence and a source
///
/// Claims must carry at least one of `url` or `source_ref`; unsourced
/// claims are rejected at the ledger boundary and never reach synthesis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claim {
    pub content: String,

    /// Clamped to 0.0..=1.0 on insertion
    pub confidence: f64,

    /// URL or tool identifier the claim came from
    pub source: String,

    pub ttl_hours: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_ref: Option<String>,
}

impl Claim {
    /// Check the claim carries a verifiable source
    pub fn is_sourced(&self) -> bool {
        self.url.as_deref().is_some_and(|u| !u.is_empty())
            || self.source_ref.as_deref().is_some_and(|s| !s.is_empty())
    }
}

/// Append-only ledger of claims for one turn
///
/// Append-only within a turn, but the validator may invalidate claims by
/// URL during a retry cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClaimLedger {
    claims: Vec<Claim>,

    /// Count of claims removed by validator invalidation
    #[serde(default)]
    pub invalidated_count: usize,
}

impl ClaimLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a claim, rejecting unsourced ones
    pub fn add(&mut self, mut claim: Claim) -> Result<(), DocError> {
        if !claim.is_sourced() {
            return Err(DocError::UnsourcedClaim {
                content: claim.content.clone(),
            });
        }
        claim.confidence = claim.confidence.clamp(0.0, 1.0);
        self.claims.push(claim);
        Ok(())
    }

    /// Claims in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Claim> {
        self.claims.iter()
    }

    pub fn len(&self) -> usize {
        self.claims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }

    /// Claims sorted by confidence descending, insertion order on ties
    ///
    /// This is the order the final claims table renders in.
    pub fn by_confidence(&self) -> Vec<&Claim> {
        let mut indexed: Vec<(usize, &Claim)> = self.claims.iter().enumerate().collect();
        indexed.sort_by(|(ia, a), (ib, b)| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(ia.cmp(ib))
        });
        indexed.into_iter().map(|(_, c)| c).collect()
    }

    /// Remove claims whose `url` appears in the failed list
    ///
    /// Returns how many claims were removed. Used when the validator
    /// reports failed URLs in a retry cycle.
    pub fn invalidate_by_urls(&mut self, failed_urls: &[String]) -> usize {
        let before = self.claims.len();
        self.claims
            .retain(|c| !c.url.as_deref().is_some_and(|u| failed_urls.iter().any(|f| f == u)));
        let removed = before - self.claims.len();
        self.invalidated_count += removed;
        removed
    }

    /// All distinct URLs carried by claims, insertion order
    pub fn urls(&self) -> Vec<String> {
        let mut urls = Vec::new();
        for claim in &self.claims {
            if let Some(url) = claim.url.as_deref() {
                if !url.is_empty() && !urls.iter().any(|u| u == url) {
                    urls.push(url.to_string());
                }
            }
        }
        urls
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claim(content: &str, confidence: f64, url: Option<&str>, source_ref: Option<&str>) -> Claim {
        Claim {
            content: content.to_string(),
            confidence,
            source: "internet.research".to_string(),
            ttl_hours: 24,
            url: url.map(String::from),
            source_ref: source_ref.map(String::from),
        }
    }

    #[test]
    fn test_add_rejects_unsourced_claim() {
        let mut ledger = ClaimLedger::new();
        let result = ledger.add(claim("no source at all", 0.9, None, None));
        assert!(matches!(result, Err(DocError::UnsourcedClaim { .. })));
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_add_rejects_empty_string_sources() {
        let mut ledger = ClaimLedger::new();
        let result = ledger.add(claim("empty strings", 0.9, Some(""), Some("")));
        assert!(result.is_err());
    }

    #[test]
    fn test_add_accepts_source_ref_only() {
        let mut ledger = ClaimLedger::new();
        ledger
            .add(claim("from memory", 0.8, None, Some("memory:budget")))
            .unwrap();
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_confidence_clamped() {
        let mut ledger = ClaimLedger::new();
        ledger.add(claim("too confident", 3.5, Some("https://a"), None)).unwrap();
        assert_eq!(ledger.iter().next().unwrap().confidence, 1.0);
    }

    #[test]
    fn test_by_confidence_stable_on_ties() {
        let mut ledger = ClaimLedger::new();
        ledger.add(claim("first", 0.5, Some("https://a"), None)).unwrap();
        ledger.add(claim("second", 0.9, Some("https://b"), None)).unwrap();
        ledger.add(claim("third", 0.5, Some("https://c"), None)).unwrap();

        let ordered: Vec<&str> = ledger.by_confidence().iter().map(|c| c.content.as_str()).collect();
        assert_eq!(ordered, vec!["second", "first", "third"]);
    }

    #[test]
    fn test_invalidate_by_urls() {
        let mut ledger = ClaimLedger::new();
        ledger.add(claim("keep", 0.9, Some("https://good"), None)).unwrap();
        ledger.add(claim("drop", 0.9, Some("https://bad"), None)).unwrap();
        ledger
            .add(claim("no url", 0.9, None, Some("memory:x")))
            .unwrap();

        let removed = ledger.invalidate_by_urls(&["https://bad".to_string()]);
        assert_eq!(removed, 1);
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.invalidated_count, 1);
    }

    #[test]
    fn test_urls_dedupes() {
        let mut ledger = ClaimLedger::new();
        ledger.add(claim("a", 0.9, Some("https://x"), None)).unwrap();
        ledger.add(claim("b", 0.8, Some("https://x"), None)).unwrap();
        assert_eq!(ledger.urls(), vec!["https://x".to_string()]);
    }
}
