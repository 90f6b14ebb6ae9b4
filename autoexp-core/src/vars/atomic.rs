use rand_chacha::ChaCha20Rng;

use super::{Sampled, VariableError};
use crate::oracle::MarginalOracle;
use crate::property::{PropertyPath, Value};
use crate::state::GameState;

/// A single leaf property addressed by path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Atomic {
    path: PropertyPath,
    name: String,
}

impl Atomic {
    #[must_use]
    pub fn new(path: PropertyPath) -> Self {
        let name = path.to_string();
        Self { path, name }
    }

    #[must_use]
    pub fn path(&self) -> &PropertyPath {
        &self.path
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// # Errors
    ///
    /// Fails when the path does not resolve on `state`.
    pub fn get<S: GameState>(&self, state: &S) -> Result<Value, VariableError> {
        Ok(state.get_property(&self.path)?)
    }

    /// # Errors
    ///
    /// Fails when the path does not resolve or `value` does not fit the leaf type.
    pub fn set<S: GameState>(&self, state: &mut S, value: &Value) -> Result<(), VariableError> {
        Ok(state.set_property(&self.path, value)?)
    }

    /// Draw a plausible value from the oracle and write it into a copy of `state`.
    ///
    /// `after` is read back from the copy, so it carries the leaf's own type.
    ///
    /// # Errors
    ///
    /// Fails when the oracle has no marginal or the write is rejected.
    pub fn sample<S: GameState>(
        &self,
        state: &S,
        oracle: &dyn MarginalOracle,
        rng: &mut ChaCha20Rng,
    ) -> Result<Sampled<S>, VariableError> {
        let before = self.get(state)?;
        let drawn = oracle.sample_marginal(&self.name, rng)?;
        let mut next = state.clone();
        self.set(&mut next, &drawn)?;
        let after = self.get(&next)?;
        Ok(Sampled {
            before,
            after,
            state: next,
        })
    }
}
