//! Search outcome records.

use std::fmt;

use serde::Serialize;

use crate::property::Value;
use crate::stats::{FisherResult, OutcomeFrequency};

/// Terminal status of a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStatus {
    Explained,
    Exhausted,
    Cancelled,
    IterationLimit,
}

impl fmt::Display for SearchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Explained => "explained",
            Self::Exhausted => "exhausted",
            Self::Cancelled => "cancelled",
            Self::IterationLimit => "iteration limit",
        })
    }
}

/// Why a variable was taken out of the active set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetireReason {
    LikelyConstant,
    /// A composite could not reach the drawn target.
    Unsatisfiable,
    /// No marginal to draw from, or a composite input that is not numeric.
    Unsampleable,
    Malformed,
    Conditional,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetiredVariable {
    pub variable: String,
    pub lookback: usize,
    pub reason: RetireReason,
}

/// A confirmed intervention.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Explanation {
    pub variable: String,
    pub before: Value,
    pub value: Value,
    pub lookback: usize,
    pub baseline: OutcomeFrequency,
    pub intervened: OutcomeFrequency,
    pub fisher: FisherResult,
}

/// Everything a search observed, for reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExperimentResult {
    pub agent: String,
    pub outcome: String,
    pub counterfactual: String,
    pub status: SearchStatus,
    pub explanation: Option<Explanation>,
    /// Interventions generated across all windows.
    pub interventions: usize,
    /// Lookbacks searched, in order.
    pub windows: Vec<usize>,
    pub mutation_points: usize,
    pub spurious: usize,
    pub random_policy_suspected: bool,
    pub degenerate_replays: usize,
    pub inadequate_windows: usize,
    pub stagnant_windows: usize,
    pub retired: Vec<RetiredVariable>,
}

impl ExperimentResult {
    #[must_use]
    pub fn new(agent: &str, outcome: &str, counterfactual: &str) -> Self {
        Self {
            agent: agent.to_string(),
            outcome: outcome.to_string(),
            counterfactual: counterfactual.to_string(),
            status: SearchStatus::Exhausted,
            explanation: None,
            interventions: 0,
            windows: Vec::new(),
            mutation_points: 0,
            spurious: 0,
            random_policy_suspected: false,
            degenerate_replays: 0,
            inadequate_windows: 0,
            stagnant_windows: 0,
            retired: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_explained(&self) -> bool {
        self.status == SearchStatus::Explained
    }

    #[must_use]
    pub fn retired_count(&self, reason: RetireReason) -> usize {
        self.retired.iter().filter(|r| r.reason == reason).count()
    }
}

/// What `run` hands back: the explaining state and outcome value, if any,
/// plus the full record.
#[derive(Debug, Clone)]
pub struct SearchReport<S> {
    pub explained_state: Option<S>,
    pub outcome_value: Option<bool>,
    pub result: ExperimentResult,
}
