//! Narrow interface to the game engine and the agents that play it.

use thiserror::Error;

use crate::state::{Action, GameState, StateError};

/// Errors surfaced by a simulation context.
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("unknown game '{0}'")]
    UnknownGame(String),
    #[error("action {action} rejected: {reason}")]
    IllegalAction { action: String, reason: String },
    #[error("snapshot rejected: {0}")]
    Snapshot(#[from] StateError),
    #[error("engine failure: {0}")]
    Engine(String),
}

/// Factory for independent simulation contexts.
///
/// Every replay acquires its own context, so no two replays ever interleave
/// steps on one engine instance. Contexts release their resources on drop.
pub trait Simulation: Send + Sync {
    type State: GameState;
    type Context: SimulationContext<State = Self::State>;

    fn game_name(&self) -> &str;

    /// Acquire a fresh context, optionally seeded and loaded with a starting state.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot be constructed or the state rejected.
    fn new_context(
        &self,
        seed: Option<u64>,
        initial_state: Option<&Self::State>,
    ) -> Result<Self::Context, SimulationError>;
}

/// A live, exclusively-owned engine instance.
pub trait SimulationContext {
    type State: GameState;

    /// Advance the game by one action.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine rejects the action.
    fn apply_action(&mut self, action: &Action) -> Result<(), SimulationError>;

    /// Canonical encoding of the current tick.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be encoded.
    fn state_snapshot(&self) -> Result<Vec<u8>, SimulationError>;

    /// Replace the current tick with a previously captured snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error for snapshots the engine cannot decode.
    fn load_snapshot(&mut self, bytes: &[u8]) -> Result<(), SimulationError>;

    fn episode_over(&self) -> bool;

    fn legal_actions(&self) -> Vec<i64>;

    /// Decode the current tick into a fresh state object.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be encoded or decoded.
    fn state(&self) -> Result<Self::State, SimulationError> {
        let bytes = self.state_snapshot()?;
        Ok(Self::State::decode(&bytes)?)
    }
}

/// Policy interface for agents whose behavior is being explained.
pub trait Agent<S: GameState>: Send {
    /// Name used for logging and artifact file names.
    fn name(&self) -> &str;

    /// Reset internal state and reseed any randomness.
    fn reset(&mut self, seed: u64);

    /// Choose the next action, or `None` to stop playing.
    fn act(&mut self, state: &S, legal_actions: &[i64]) -> Option<Action>;

    /// Number of simulation steps each decision is held for.
    fn action_repeat(&self) -> usize {
        1
    }
}
