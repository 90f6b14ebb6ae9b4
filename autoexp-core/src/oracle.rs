//! Plausible-value oracles: marginal distributions keyed by property path or composite name.

use std::collections::BTreeMap;

use rand::Rng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::property::{PropertyPath, Value};
use crate::state::GameState;
use crate::vars::VariableGraph;

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("no marginal recorded for '{key}'")]
    UnknownMarginal { key: String },
    #[error("marginal '{key}' has an empty range [{low}, {high}]")]
    InvalidRange { key: String, low: f64, high: f64 },
    #[error("marginal '{key}' has no values")]
    EmptyMarginal { key: String },
    #[error("failed to read model: {0}")]
    Parse(#[from] serde_json::Error),
}

/// External source of plausible values. Repeated draws are not guaranteed distinct.
pub trait MarginalOracle: Send + Sync {
    /// Draw one value for `key`, a property path or a composite name.
    ///
    /// # Errors
    ///
    /// Returns an error when no marginal is known for `key`.
    fn sample_marginal(&self, key: &str, rng: &mut ChaCha20Rng) -> Result<Value, OracleError>;
}

/// Index-erased fallback key (`balls[].position.x`) for a concrete path, if it differs.
#[must_use]
pub fn fallback_key(key: &str) -> Option<String> {
    let normalized = key.parse::<PropertyPath>().ok()?.normalized();
    (normalized != key).then_some(normalized)
}

fn lookup<'m, T>(map: &'m BTreeMap<String, T>, key: &str) -> Result<&'m T, OracleError> {
    if let Some(found) = map.get(key) {
        return Ok(found);
    }
    fallback_key(key)
        .and_then(|normalized| map.get(&normalized))
        .ok_or_else(|| OracleError::UnknownMarginal {
            key: key.to_string(),
        })
}

/// Closed-form marginal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Marginal {
    Float { low: f64, high: f64 },
    Int { low: i64, high: i64 },
    Choice { values: Vec<Value> },
}

/// Uniform marginals declared up front.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UniformOracle {
    marginals: BTreeMap<String, Marginal>,
}

impl UniformOracle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_float(mut self, key: &str, low: f64, high: f64) -> Self {
        self.marginals
            .insert(key.to_string(), Marginal::Float { low, high });
        self
    }

    #[must_use]
    pub fn with_int(mut self, key: &str, low: i64, high: i64) -> Self {
        self.marginals
            .insert(key.to_string(), Marginal::Int { low, high });
        self
    }

    #[must_use]
    pub fn with_choice(mut self, key: &str, values: Vec<Value>) -> Self {
        self.marginals
            .insert(key.to_string(), Marginal::Choice { values });
        self
    }
}

impl MarginalOracle for UniformOracle {
    fn sample_marginal(&self, key: &str, rng: &mut ChaCha20Rng) -> Result<Value, OracleError> {
        match lookup(&self.marginals, key)? {
            Marginal::Float { low, high } => {
                if !low.is_finite() || !high.is_finite() || low > high {
                    return Err(OracleError::InvalidRange {
                        key: key.to_string(),
                        low: *low,
                        high: *high,
                    });
                }
                Ok(Value::Float(rng.gen_range(*low..=*high)))
            }
            Marginal::Int { low, high } => {
                if low > high {
                    return Err(OracleError::InvalidRange {
                        key: key.to_string(),
                        low: crate::numbers::i64_to_f64(*low),
                        high: crate::numbers::i64_to_f64(*high),
                    });
                }
                Ok(Value::Int(rng.gen_range(*low..=*high)))
            }
            Marginal::Choice { values } => {
                values
                    .choose(rng)
                    .cloned()
                    .ok_or_else(|| OracleError::EmptyMarginal {
                        key: key.to_string(),
                    })
            }
        }
    }
}

/// Marginals learned by recording every observed value of each mutation point.
///
/// Each value is stored under its exact path and its index-erased form, so a
/// ball that only appears in the explained trace can still borrow the values
/// of earlier balls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmpiricalOracle {
    marginals: BTreeMap<String, Vec<Value>>,
}

impl EmpiricalOracle {
    /// Record all mutable leaves and every resolvable composite of each state.
    ///
    /// # Errors
    ///
    /// Returns an error if a state cannot be serialized.
    pub fn from_states<S: GameState>(
        states: &[S],
        graph: &VariableGraph,
    ) -> Result<Self, crate::property::PropertyError> {
        let mut oracle = Self::default();
        for state in states {
            let document = state.document()?;
            for path in document.mutable_leaves() {
                let value = document.get(&path)?;
                oracle.record(&path.to_string(), value.clone());
                let normalized = path.normalized();
                if normalized != path.to_string() {
                    oracle.record(&normalized, value);
                }
            }
            for name in graph.names() {
                if let Ok(value) = graph.resolve(name).and_then(|var| var.get(state)) {
                    oracle.record(name, value);
                }
            }
        }
        log::debug!(
            "learned {} marginals from {} states",
            oracle.marginals.len(),
            states.len()
        );
        Ok(oracle)
    }

    pub fn record(&mut self, key: &str, value: Value) {
        self.marginals
            .entry(key.to_string())
            .or_default()
            .push(value);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.marginals.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.marginals.is_empty()
    }

    #[must_use]
    pub fn values(&self, key: &str) -> Option<&[Value]> {
        lookup(&self.marginals, key).ok().map(Vec::as_slice)
    }

    /// # Errors
    ///
    /// Returns an error for malformed model JSON.
    pub fn from_json(json: &str) -> Result<Self, OracleError> {
        Ok(serde_json::from_str(json)?)
    }

    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, OracleError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl MarginalOracle for EmpiricalOracle {
    fn sample_marginal(&self, key: &str, rng: &mut ChaCha20Rng) -> Result<Value, OracleError> {
        lookup(&self.marginals, key)?
            .choose(rng)
            .cloned()
            .ok_or_else(|| OracleError::EmptyMarginal {
                key: key.to_string(),
            })
    }
}
