//! Intervention variables: single leaf properties and composites derived from them.

mod atomic;
mod composite;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use rand_chacha::ChaCha20Rng;
use thiserror::Error;

pub use atomic::Atomic;
pub use composite::{AbsDifference, Composite, Derivation, Difference, Mean};

use crate::oracle::{MarginalOracle, OracleError};
use crate::property::{PropertyError, PropertyPath, Value};
use crate::state::GameState;

#[derive(Debug, Error)]
pub enum VariableError {
    #[error(transparent)]
    Property(#[from] PropertyError),
    #[error(transparent)]
    Oracle(#[from] OracleError),
    #[error("composite '{name}' is cyclic: {}", .cycle.join(" -> "))]
    Cycle { name: String, cycle: Vec<String> },
    #[error("composite '{name}' takes {expected} inputs (got {got})")]
    InputCount {
        name: String,
        got: usize,
        expected: String,
    },
    #[error("input '{input}' of '{name}' is not numeric (found {found})")]
    NonNumeric {
        name: String,
        input: String,
        found: &'static str,
    },
    #[error("cannot set '{name}' to {target}: {reason}")]
    Unsatisfiable {
        name: String,
        target: f64,
        reason: &'static str,
    },
}

/// Outcome of sampling a variable: the old value, the new one, and the mutated copy.
#[derive(Debug, Clone)]
pub struct Sampled<S> {
    pub before: Value,
    pub after: Value,
    pub state: S,
}

/// Anything an intervention can target.
#[derive(Debug, Clone)]
pub enum Variable {
    Atomic(Atomic),
    Composite(Arc<Composite>),
}

impl Variable {
    #[must_use]
    pub fn atomic(path: PropertyPath) -> Self {
        Self::Atomic(Atomic::new(path))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Atomic(var) => var.name(),
            Self::Composite(var) => var.name(),
        }
    }

    /// # Errors
    ///
    /// Fails when the variable cannot be read from `state`.
    pub fn get<S: GameState>(&self, state: &S) -> Result<Value, VariableError> {
        match self {
            Self::Atomic(var) => var.get(state),
            Self::Composite(var) => var.get(state),
        }
    }

    /// # Errors
    ///
    /// Fails when `value` cannot be written.
    pub fn set<S: GameState>(
        &self,
        state: &mut S,
        value: &Value,
        rng: &mut ChaCha20Rng,
    ) -> Result<(), VariableError> {
        match self {
            Self::Atomic(var) => var.set(state, value),
            Self::Composite(var) => var.set(state, value, rng),
        }
    }

    /// # Errors
    ///
    /// Fails when the oracle cannot serve a value or the write is rejected.
    pub fn sample<S: GameState>(
        &self,
        state: &S,
        oracle: &dyn MarginalOracle,
        rng: &mut ChaCha20Rng,
    ) -> Result<Sampled<S>, VariableError> {
        match self {
            Self::Atomic(var) => var.sample(state, oracle, rng),
            Self::Composite(var) => var.sample(state, oracle, rng),
        }
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone)]
struct Declaration {
    inputs: Vec<String>,
    derivation: Arc<dyn Derivation>,
}

/// Registered composite variables. Inputs name either another composite or a property path.
#[derive(Debug, Clone, Default)]
pub struct VariableGraph {
    composites: BTreeMap<String, Declaration>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

impl VariableGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a composite. Rejected if it would close a cycle or has the wrong arity.
    ///
    /// # Errors
    ///
    /// Returns [`VariableError::Cycle`], [`VariableError::InputCount`], or a
    /// property error for inputs that are neither composites nor valid paths.
    pub fn register<D>(
        &mut self,
        name: &str,
        inputs: &[&str],
        derivation: D,
    ) -> Result<(), VariableError>
    where
        D: Derivation + 'static,
    {
        let got = inputs.len();
        let min = derivation.min_inputs();
        let max = derivation.max_inputs();
        if got < min || max.is_some_and(|max| got > max) {
            let expected = match max {
                Some(max) if max == min => format!("exactly {min}"),
                Some(max) => format!("{min} to {max}"),
                None => format!("at least {min}"),
            };
            return Err(VariableError::InputCount {
                name: name.to_string(),
                got,
                expected,
            });
        }
        for input in inputs {
            if !self.composites.contains_key(*input) && *input != name {
                input.parse::<PropertyPath>()?;
            }
        }

        let previous = self.composites.insert(
            name.to_string(),
            Declaration {
                inputs: inputs.iter().map(ToString::to_string).collect(),
                derivation: Arc::new(derivation),
            },
        );
        if let Some(cycle) = self.find_cycle(name) {
            match previous {
                Some(decl) => {
                    self.composites.insert(name.to_string(), decl);
                }
                None => {
                    self.composites.remove(name);
                }
            }
            return Err(VariableError::Cycle {
                name: name.to_string(),
                cycle,
            });
        }
        log::debug!("registered composite {name} over {}", inputs.join(", "));
        Ok(())
    }

    fn find_cycle(&self, start: &str) -> Option<Vec<String>> {
        fn visit<'g>(
            graph: &'g VariableGraph,
            node: &'g str,
            marks: &mut BTreeMap<&'g str, Mark>,
            stack: &mut Vec<&'g str>,
        ) -> Option<Vec<String>> {
            let decl = graph.composites.get(node)?;
            match marks.get(node) {
                Some(Mark::Done) => return None,
                Some(Mark::Visiting) => {
                    let from = stack.iter().position(|n| *n == node).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        stack[from..].iter().map(ToString::to_string).collect();
                    cycle.push(node.to_string());
                    return Some(cycle);
                }
                None => {}
            }
            marks.insert(node, Mark::Visiting);
            stack.push(node);
            for input in &decl.inputs {
                if let Some(cycle) = visit(graph, input, marks, stack) {
                    return Some(cycle);
                }
            }
            stack.pop();
            marks.insert(node, Mark::Done);
            None
        }

        let mut marks = BTreeMap::new();
        let mut stack = Vec::new();
        visit(self, start, &mut marks, &mut stack)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.composites.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.composites.keys().map(String::as_str)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.composites.is_empty()
    }

    /// Build the variable for `name`: a registered composite, else a property path.
    ///
    /// # Errors
    ///
    /// Returns a property error when `name` is neither.
    pub fn resolve(&self, name: &str) -> Result<Variable, VariableError> {
        let Some(decl) = self.composites.get(name) else {
            return Ok(Variable::atomic(name.parse()?));
        };
        let inputs = decl
            .inputs
            .iter()
            .map(|input| self.resolve(input))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Variable::Composite(Arc::new(Composite::new(
            name,
            inputs,
            Arc::clone(&decl.derivation),
        ))))
    }
}
