//! Phase metrics - timing and token accounting across a turn

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Instant;

use serde::Serialize;
use tracing::debug;

/// Snapshot of one phase's accounting
#[derive(Debug, Clone, Default, Serialize)]
pub struct PhaseStats {
    pub duration_ms: u64,
    pub tokens: u64,
    pub llm_calls: u32,
    pub tool_calls: u32,
}

/// Thread-safe accumulator shared by the phase runner and the loops
///
/// Everything in here is drained into the manifest at Save.
#[derive(Default)]
pub struct PhaseMetrics {
    inner: Mutex<MetricsInner>,
}

#[derive(Default)]
struct MetricsInner {
    phases: BTreeMap<String, PhaseStats>,
    open: BTreeMap<String, Instant>,
    decisions: Vec<String>,
    retries: u32,
}

impl PhaseMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_phase(&self, phase: &str) {
        debug!(%phase, "PhaseMetrics::start_phase: called");
        self.inner.lock().unwrap().open.insert(phase.to_string(), Instant::now());
    }

    pub fn end_phase(&self, phase: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(started) = inner.open.remove(phase) {
            let elapsed = started.elapsed().as_millis() as u64;
            inner.phases.entry(phase.to_string()).or_default().duration_ms += elapsed;
        }
    }

    pub fn record_tokens(&self, phase: &str, tokens: u64) {
        let mut inner = self.inner.lock().unwrap();
        let stats = inner.phases.entry(phase.to_string()).or_default();
        stats.tokens += tokens;
        stats.llm_calls += 1;
    }

    pub fn record_tool_call(&self, phase: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.phases.entry(phase.to_string()).or_default().tool_calls += 1;
    }

    pub fn record_decision(&self, decision: &str) {
        self.inner.lock().unwrap().decisions.push(decision.to_string());
    }

    pub fn record_retry(&self) {
        self.inner.lock().unwrap().retries += 1;
    }

    pub fn retries(&self) -> u32 {
        self.inner.lock().unwrap().retries
    }

    /// Token totals per phase (for the manifest)
    pub fn tokens_by_phase(&self) -> BTreeMap<String, u64> {
        self.inner
            .lock()
            .unwrap()
            .phases
            .iter()
            .map(|(name, stats)| (name.clone(), stats.tokens))
            .collect()
    }

    /// Full snapshot for `execution_state.json`
    pub fn snapshot(&self) -> serde_json::Value {
        let inner = self.inner.lock().unwrap();
        serde_json::json!({
            "phases": inner.phases,
            "decisions": inner.decisions,
            "retries": inner.retries,
        })
    }
}
