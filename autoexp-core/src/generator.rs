//! Adaptive intervention generation.
//!
//! Previously tried variables are extended first, accepting only values that
//! add information: unseen categories, tail values, or (once enough values
//! have been tried) values landing in an empty Freedman-Diaconis bin. Only
//! when no tried variable can be extended is a fresh variable drawn.

use std::collections::BTreeMap;

use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha20Rng;
use thiserror::Error;

use crate::numbers::{approx_eq, floor_f64_to_i64, sample_variance, usize_to_f64};
use crate::oracle::MarginalOracle;
use crate::property::Value;
use crate::registry::MutationPointSet;
use crate::state::GameState;
use crate::vars::{Variable, VariableError, VariableGraph};

/// Freedman-Diaconis constant as applied to the sample variance.
pub const FD_SCALE: f64 = 3.49;

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("'{variable}' looks constant after {trials} draws")]
    LikelyConstant { variable: String, trials: usize },
    #[error("no mutation points remaining")]
    NoMutationPointsRemaining,
    /// Drawing a value for `variable` failed; the variable itself is at fault.
    #[error("cannot sample '{variable}': {source}")]
    Unsampleable {
        variable: String,
        source: VariableError,
    },
    #[error(transparent)]
    Variable(#[from] VariableError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneratorConfig {
    /// Tried-value count above which continuous variables switch to bin checks.
    pub discretization_cutoff: usize,
    /// Draws allowed for a fresh variable before it is declared constant.
    pub constant_trials: usize,
    /// Draws allowed when extending an already tried variable.
    pub extension_trials: usize,
    /// A variable stops being extended once it has this many tried values.
    pub max_values_per_variable: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            discretization_cutoff: 5,
            constant_trials: 10,
            extension_trials: 8,
            max_values_per_variable: 32,
        }
    }
}

/// Values already tried per variable within the current window.
#[derive(Debug, Clone, Default)]
pub struct InterventionHistory {
    tried: BTreeMap<String, Vec<Value>>,
}

impl InterventionHistory {
    pub fn record(&mut self, name: &str, value: Value) {
        self.tried.entry(name.to_string()).or_default().push(value);
    }

    #[must_use]
    pub fn tried(&self, name: &str) -> &[Value] {
        self.tried.get(name).map_or(&[], Vec::as_slice)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tried.contains_key(name)
    }

    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.tried.keys().map(String::as_str)
    }

    /// Total interventions recorded.
    #[must_use]
    pub fn total(&self) -> usize {
        self.tried.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tried.is_empty()
    }

    pub fn clear(&mut self) {
        self.tried.clear();
    }
}

/// A mutated copy of a state together with what was changed.
#[derive(Debug, Clone)]
pub struct Intervention<S> {
    pub state: S,
    pub variable: Variable,
    pub before: Value,
    pub value: Value,
}

/// Whether `candidate` adds information given the values already `tried`.
#[must_use]
pub fn accepts(tried: &[Value], current: &Value, candidate: &Value, cutoff: usize) -> bool {
    if candidate.approx_eq(current) {
        return false;
    }
    if !candidate.is_continuous() {
        return !tried.iter().any(|seen| seen.approx_eq(candidate));
    }
    let Some(x) = candidate.as_f64() else {
        return false;
    };
    let samples: Vec<f64> = tried.iter().filter_map(Value::as_f64).collect();
    let Some((min, max)) = samples.iter().fold(None, |acc: Option<(f64, f64)>, v| {
        Some(acc.map_or((*v, *v), |(lo, hi)| (lo.min(*v), hi.max(*v))))
    }) else {
        return true;
    };
    if x < min || x > max {
        return true;
    }
    if samples.len() <= cutoff {
        return !samples.iter().any(|seen| approx_eq(*seen, x));
    }

    let Some(variance) = sample_variance(&samples) else {
        return false;
    };
    let width = FD_SCALE * variance / usize_to_f64(samples.len()).cbrt();
    if !width.is_finite() || width <= 0.0 {
        return false;
    }
    let bin = |v: f64| floor_f64_to_i64((v - min) / width);
    let target = bin(x);
    !samples.iter().any(|seen| bin(*seen) == target)
}

/// Draws interventions for one driver; owns its own random stream.
#[derive(Debug, Clone)]
pub struct InterventionGenerator {
    config: GeneratorConfig,
    rng: ChaCha20Rng,
}

impl InterventionGenerator {
    #[must_use]
    pub fn new(config: GeneratorConfig, seed: u64) -> Self {
        Self {
            config,
            rng: ChaCha20Rng::seed_from_u64(seed),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Produce the next intervention on `state` and record its value in `history`.
    ///
    /// # Errors
    ///
    /// [`GenerateError::LikelyConstant`] when a fresh variable never moves off its
    /// current value, [`GenerateError::NoMutationPointsRemaining`] when every
    /// point is tried out, and variable errors for unreadable properties.
    pub fn generate<S: GameState>(
        &mut self,
        state: &S,
        history: &mut InterventionHistory,
        points: &MutationPointSet,
        graph: &VariableGraph,
        oracle: &dyn MarginalOracle,
    ) -> Result<Intervention<S>, GenerateError> {
        let extendable: Vec<String> = history
            .variables()
            .filter(|name| points.contains(name))
            .filter(|name| history.tried(name).len() < self.config.max_values_per_variable)
            .map(ToString::to_string)
            .collect();

        for name in extendable {
            let variable = graph.resolve(&name)?;
            for _ in 0..self.config.extension_trials {
                let sampled = variable
                    .sample(state, oracle, &mut self.rng)
                    .map_err(|source| unsampleable(&name, source))?;
                if accepts(
                    history.tried(&name),
                    &sampled.before,
                    &sampled.after,
                    self.config.discretization_cutoff,
                ) {
                    history.record(&name, sampled.after.clone());
                    log::debug!("extending {name}: {} -> {}", sampled.before, sampled.after);
                    return Ok(Intervention {
                        state: sampled.state,
                        variable,
                        before: sampled.before,
                        value: sampled.after,
                    });
                }
            }
        }

        let fresh: Vec<&str> = points
            .iter()
            .filter(|name| !history.contains(name))
            .collect();
        let Some(name) = fresh.choose(&mut self.rng).map(ToString::to_string) else {
            return Err(GenerateError::NoMutationPointsRemaining);
        };
        let variable = graph.resolve(&name)?;
        for _ in 0..self.config.constant_trials {
            let sampled = variable
                .sample(state, oracle, &mut self.rng)
                .map_err(|source| unsampleable(&name, source))?;
            if !sampled.after.approx_eq(&sampled.before) {
                history.record(&name, sampled.after.clone());
                log::debug!("fresh {name}: {} -> {}", sampled.before, sampled.after);
                return Ok(Intervention {
                    state: sampled.state,
                    variable,
                    before: sampled.before,
                    value: sampled.after,
                });
            }
        }
        Err(GenerateError::LikelyConstant {
            variable: name,
            trials: self.config.constant_trials,
        })
    }
}

fn unsampleable(variable: &str, source: VariableError) -> GenerateError {
    GenerateError::Unsampleable {
        variable: variable.to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::UniformOracle;
    use crate::registry::{Exclusions, enumerate};
    use crate::sandbox::PaddleState;

    fn floats(values: &[f64]) -> Vec<Value> {
        values.iter().copied().map(Value::Float).collect()
    }

    #[test]
    fn discrete_values_never_repeat() {
        let tried = vec![Value::Int(1), Value::Int(2)];
        assert!(!accepts(&tried, &Value::Int(0), &Value::Int(2), 5));
        assert!(!accepts(&tried, &Value::Int(3), &Value::Int(3), 5));
        assert!(accepts(&tried, &Value::Int(0), &Value::Int(3), 5));
        assert!(!accepts(&[], &Value::Bool(true), &Value::Bool(true), 5));
    }

    #[test]
    fn continuous_tails_are_always_accepted() {
        let tried = floats(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        assert!(accepts(&tried, &Value::Float(0.0), &Value::Float(0.5), 5));
        assert!(accepts(&tried, &Value::Float(0.0), &Value::Float(8.5), 5));
    }

    #[test]
    fn continuous_below_cutoff_rejects_only_repeats() {
        let tried = floats(&[1.0, 2.0, 3.0]);
        assert!(!accepts(&tried, &Value::Float(0.0), &Value::Float(2.0), 5));
        assert!(accepts(&tried, &Value::Float(0.0), &Value::Float(2.5), 5));
    }

    #[test]
    fn fd_binning_rejects_occupied_bins() {
        // n = 8, variance = 6, width = 3.49 * 6 / 2 = 10.47: one bin holds all samples.
        let tried = floats(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        assert!(!accepts(&tried, &Value::Float(0.0), &Value::Float(4.5), 5));

        // Two clusters, width ~0.386: the middle bin stays empty.
        let tried = floats(&[0.0, 0.01, 0.02, 0.03, 0.04, 0.05, 0.95, 0.96, 0.97, 1.0]);
        assert!(accepts(&tried, &Value::Float(-1.0), &Value::Float(0.5), 5));
        assert!(!accepts(&tried, &Value::Float(-1.0), &Value::Float(0.025), 5));
    }

    #[test]
    fn generated_values_land_in_empty_bins_or_tails() {
        let state = PaddleState::default();
        let exclusions = Exclusions::new([
            "balls\\[0\\]\\.position\\.y",
            "balls\\[0\\]\\.velocity",
            "paddle",
            "score",
            "lives",
        ]);
        let graph = VariableGraph::new();
        let points = enumerate(&state, &exclusions, &graph).unwrap();
        assert_eq!(points.len(), 1);
        let oracle = UniformOracle::new().with_float("balls[].position.x", 0.0, 160.0);
        let mut generator = InterventionGenerator::new(GeneratorConfig::default(), 42);
        let mut history = InterventionHistory::default();

        for _ in 0..12 {
            let before: Vec<Value> = history.tried("balls[0].position.x").to_vec();
            let Ok(intervention) =
                generator.generate(&state, &mut history, &points, &graph, &oracle)
            else {
                break;
            };
            assert!(accepts(
                &before,
                &intervention.before,
                &intervention.value,
                GeneratorConfig::default().discretization_cutoff
            ));
            assert_eq!(
                intervention.variable.get(&intervention.state).unwrap(),
                intervention.value
            );
        }
        assert!(history.total() >= 1);
    }

    #[test]
    fn constant_variable_is_reported() {
        let graph = VariableGraph::new();
        let state = PaddleState::default();
        let points: MutationPointSet = ["lives".to_string()].into_iter().collect();
        let oracle = UniformOracle::new().with_int("lives", 5, 5);
        let mut generator = InterventionGenerator::new(GeneratorConfig::default(), 1);
        let mut history = InterventionHistory::default();
        let err = generator
            .generate(&state, &mut history, &points, &graph, &oracle)
            .unwrap_err();
        assert!(matches!(
            err,
            GenerateError::LikelyConstant { ref variable, trials: 10 } if variable == "lives"
        ));
    }

    #[test]
    fn missing_marginals_name_the_variable() {
        let graph = VariableGraph::new();
        let state = PaddleState::default();
        let points: MutationPointSet = ["paddle_width".to_string()].into_iter().collect();
        let oracle = UniformOracle::new().with_int("lives", 1, 5);
        let mut generator = InterventionGenerator::new(GeneratorConfig::default(), 3);
        let mut history = InterventionHistory::default();
        let err = generator
            .generate(&state, &mut history, &points, &graph, &oracle)
            .unwrap_err();
        assert!(matches!(
            err,
            GenerateError::Unsampleable {
                ref variable,
                source: VariableError::Oracle(_),
            } if variable == "paddle_width"
        ));
    }

    #[test]
    fn exhausted_points_are_reported() {
        let graph = VariableGraph::new();
        let state = PaddleState::default();
        let points: MutationPointSet = ["lives".to_string()].into_iter().collect();
        let oracle = UniformOracle::new().with_choice("lives", vec![Value::Int(1)]);
        let mut generator = InterventionGenerator::new(GeneratorConfig::default(), 1);
        let mut history = InterventionHistory::default();
        let first = generator
            .generate(&state, &mut history, &points, &graph, &oracle)
            .unwrap();
        assert_eq!(first.value, Value::Int(1));
        assert!(matches!(
            generator.generate(&state, &mut history, &points, &graph, &oracle),
            Err(GenerateError::NoMutationPointsRemaining)
        ));
    }
}
