use std::fmt;
use std::sync::Arc;

use rand::Rng;
use rand_chacha::ChaCha20Rng;

use super::{Sampled, Variable, VariableError};
use crate::numbers::{approx_eq, usize_to_f64};
use crate::oracle::MarginalOracle;
use crate::property::Value;
use crate::state::GameState;

/// Numeric function of a composite's inputs, together with its inverse.
pub trait Derivation: fmt::Debug + Send + Sync {
    fn label(&self) -> &'static str;

    fn min_inputs(&self) -> usize {
        2
    }

    fn max_inputs(&self) -> Option<usize> {
        None
    }

    fn compute(&self, inputs: &[f64]) -> f64;

    /// Rewrite every input except `held` so that `compute(inputs) == target`.
    ///
    /// # Errors
    ///
    /// Returns a reason when no assignment reaches `target`.
    fn solve(
        &self,
        target: f64,
        inputs: &mut [f64],
        held: usize,
        rng: &mut ChaCha20Rng,
    ) -> Result<(), &'static str>;
}

/// `|a - b|`. The free input lands on either side of the held one at random.
#[derive(Debug, Clone, Copy, Default)]
pub struct AbsDifference;

impl Derivation for AbsDifference {
    fn label(&self) -> &'static str {
        "abs_difference"
    }

    fn max_inputs(&self) -> Option<usize> {
        Some(2)
    }

    fn compute(&self, inputs: &[f64]) -> f64 {
        (inputs[0] - inputs[1]).abs()
    }

    fn solve(
        &self,
        target: f64,
        inputs: &mut [f64],
        held: usize,
        rng: &mut ChaCha20Rng,
    ) -> Result<(), &'static str> {
        if target < 0.0 {
            return Err("absolute difference cannot be negative");
        }
        let anchor = inputs[held];
        let offset = if rng.gen_bool(0.5) { target } else { -target };
        inputs[1 - held] = anchor + offset;
        Ok(())
    }
}

/// `a - b`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Difference;

impl Derivation for Difference {
    fn label(&self) -> &'static str {
        "difference"
    }

    fn max_inputs(&self) -> Option<usize> {
        Some(2)
    }

    fn compute(&self, inputs: &[f64]) -> f64 {
        inputs[0] - inputs[1]
    }

    fn solve(
        &self,
        target: f64,
        inputs: &mut [f64],
        held: usize,
        _rng: &mut ChaCha20Rng,
    ) -> Result<(), &'static str> {
        if held == 0 {
            inputs[1] = inputs[0] - target;
        } else {
            inputs[0] = inputs[1] + target;
        }
        Ok(())
    }
}

/// Arithmetic mean. Free inputs all take the same value.
#[derive(Debug, Clone, Copy, Default)]
pub struct Mean;

impl Derivation for Mean {
    fn label(&self) -> &'static str {
        "mean"
    }

    fn compute(&self, inputs: &[f64]) -> f64 {
        inputs.iter().sum::<f64>() / usize_to_f64(inputs.len())
    }

    fn solve(
        &self,
        target: f64,
        inputs: &mut [f64],
        held: usize,
        _rng: &mut ChaCha20Rng,
    ) -> Result<(), &'static str> {
        let n = usize_to_f64(inputs.len());
        let anchor = inputs[held];
        let free = (n * target - anchor) / (n - 1.0);
        for (idx, slot) in inputs.iter_mut().enumerate() {
            if idx != held {
                *slot = free;
            }
        }
        Ok(())
    }
}

/// A value derived from two or more other variables.
///
/// Joint update policy: pick one input uniformly at random and keep it (at its
/// current value for `set`, at a fresh oracle draw for `sample`), then solve the
/// derivation for the remaining inputs.
#[derive(Debug, Clone)]
pub struct Composite {
    name: String,
    inputs: Vec<Variable>,
    derivation: Arc<dyn Derivation>,
}

impl Composite {
    pub(crate) fn new(name: &str, inputs: Vec<Variable>, derivation: Arc<dyn Derivation>) -> Self {
        Self {
            name: name.to_string(),
            inputs,
            derivation,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn inputs(&self) -> &[Variable] {
        &self.inputs
    }

    #[must_use]
    pub fn derivation(&self) -> &dyn Derivation {
        self.derivation.as_ref()
    }

    fn numeric(&self, input: &str, value: &Value) -> Result<f64, VariableError> {
        value.as_f64().ok_or_else(|| VariableError::NonNumeric {
            name: self.name.clone(),
            input: input.to_string(),
            found: value.kind_name(),
        })
    }

    fn input_values<S: GameState>(&self, state: &S) -> Result<Vec<f64>, VariableError> {
        self.inputs
            .iter()
            .map(|input| {
                let value = input.get(state)?;
                self.numeric(input.name(), &value)
            })
            .collect()
    }

    /// # Errors
    ///
    /// Fails when an input cannot be read or is not numeric.
    pub fn get<S: GameState>(&self, state: &S) -> Result<Value, VariableError> {
        let values = self.input_values(state)?;
        Ok(Value::Float(self.derivation.compute(&values)))
    }

    fn solve_into<S: GameState>(
        &self,
        state: &mut S,
        target: f64,
        held: usize,
        rng: &mut ChaCha20Rng,
    ) -> Result<(), VariableError> {
        let mut values = self.input_values(state)?;
        self.derivation
            .solve(target, &mut values, held, rng)
            .map_err(|reason| VariableError::Unsatisfiable {
                name: self.name.clone(),
                target,
                reason,
            })?;
        for (idx, (input, value)) in self.inputs.iter().zip(values).enumerate() {
            if idx != held {
                input.set(state, &Value::Float(value), rng)?;
            }
        }
        let reached = self.input_values(state)?;
        let got = self.derivation.compute(&reached);
        if !approx_eq(got, target) {
            return Err(VariableError::Unsatisfiable {
                name: self.name.clone(),
                target,
                reason: "inputs could not represent the solved values",
            });
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Fails when `value` is not numeric or the inputs cannot be solved for it.
    pub fn set<S: GameState>(
        &self,
        state: &mut S,
        value: &Value,
        rng: &mut ChaCha20Rng,
    ) -> Result<(), VariableError> {
        let target = self.numeric(&self.name, value)?;
        let held = rng.gen_range(0..self.inputs.len());
        self.solve_into(state, target, held, rng)
    }

    /// # Errors
    ///
    /// Fails when the oracle lacks a marginal for this composite or its held input,
    /// or the draw cannot be solved for.
    pub fn sample<S: GameState>(
        &self,
        state: &S,
        oracle: &dyn MarginalOracle,
        rng: &mut ChaCha20Rng,
    ) -> Result<Sampled<S>, VariableError> {
        let before = self.get(state)?;
        let drawn = oracle.sample_marginal(&self.name, rng)?;
        let target = self.numeric(&self.name, &drawn)?;

        let held = rng.gen_range(0..self.inputs.len());
        let mut next = self.inputs[held].sample(state, oracle, rng)?.state;
        self.solve_into(&mut next, target, held, rng)?;
        let after = self.get(&next)?;
        Ok(Sampled {
            before,
            after,
            state: next,
        })
    }
}
