//! Automated counterfactual explanations for game-playing agents.
//!
//! Platform-agnostic search engine: given a recorded trace ending in an observed
//! behavior, find a minimal intervention on an earlier game state under which
//! the agent behaves differently, and confirm the effect statistically.
//! Game engines and agents plug in through [`Simulation`] and [`Agent`].

pub mod artifacts;
pub mod driver;
pub mod generator;
pub mod numbers;
pub mod oracle;
pub mod outcomes;
pub mod property;
pub mod registry;
pub mod replay;
pub mod sandbox;
pub mod seed;
pub mod sim;
pub mod state;
pub mod stats;
pub mod trace;
pub mod vars;

// Re-export commonly used types
pub use artifacts::{ArtifactError, ArtifactStore, ReplayKind};
pub use driver::{
    ConfigError, Experiment, ExperimentConfig, ExperimentError, ExperimentResult, Explanation,
    RetireReason, RetiredVariable, SearchReport, SearchStatus, Validity, classify,
};
pub use generator::{
    GenerateError, GeneratorConfig, Intervention, InterventionGenerator, InterventionHistory,
};
pub use oracle::{EmpiricalOracle, Marginal, MarginalOracle, OracleError, UniformOracle};
pub use outcomes::{
    AimSide, BallCourt, BallOutcome, Outcome, OutcomeError, check_window, find_outcome_window,
};
pub use property::{Document, FieldSchema, PropertyError, PropertyPath, Schema, Value};
pub use registry::{Exclusions, MutationPointSet, RegistryError, enumerate};
pub use replay::{CancelToken, ReplayError, play_forward, record_episode, replay_actions};
pub use seed::{SeedDomain, derive_seed};
pub use sim::{Agent, Simulation, SimulationContext, SimulationError};
pub use state::{Action, Comparison, EqualityMode, GameState, Input, StateAction, StateError};
pub use stats::{FisherResult, OutcomeFrequency, fisher_exact};
pub use trace::{Trace, TraceError, TraceWindow};
pub use vars::{
    AbsDifference, Atomic, Composite, Derivation, Difference, Mean, Sampled, Variable,
    VariableError, VariableGraph,
};
