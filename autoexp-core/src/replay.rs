//! Deterministic replays, each on its own simulation context.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

use crate::sim::{Agent, Simulation, SimulationContext, SimulationError};
use crate::state::{Action, StateAction};

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("replay cancelled")]
    Cancelled,
    #[error(transparent)]
    Simulation(#[from] SimulationError),
}

/// Cooperative cancellation flag shared between a caller and a running search.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// # Errors
    ///
    /// Returns [`ReplayError::Cancelled`] once [`CancelToken::cancel`] was called.
    pub fn check(&self) -> Result<(), ReplayError> {
        if self.is_cancelled() {
            Err(ReplayError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Let `agent` play from `start` for at most `steps` steps.
///
/// Each recorded pair is the state after a step and the action that produced it.
/// Stops early when the episode ends or the agent declines to act.
///
/// # Errors
///
/// Returns [`ReplayError::Cancelled`] when `cancel` fires, or an engine error.
pub fn play_forward<G, A>(
    sim: &G,
    agent: &mut A,
    start: &G::State,
    steps: usize,
    seed: u64,
    cancel: &CancelToken,
) -> Result<Vec<StateAction<G::State>>, ReplayError>
where
    G: Simulation,
    A: Agent<G::State> + ?Sized,
{
    agent.reset(seed);
    let mut context = sim.new_context(Some(seed), Some(start))?;
    let repeat = agent.action_repeat().max(1);
    let mut observed = start.clone();
    let mut held: Option<Action> = None;
    let mut pairs = Vec::with_capacity(steps);

    for step in 0..steps {
        cancel.check()?;
        if context.episode_over() {
            break;
        }
        let action = match held.take() {
            Some(action) if step % repeat != 0 => action,
            _ => match agent.act(&observed, &context.legal_actions()) {
                Some(action) => action,
                None => break,
            },
        };
        context.apply_action(&action)?;
        observed = context.state()?;
        pairs.push((observed.clone(), action.clone()));
        held = Some(action);
    }
    Ok(pairs)
}

/// Apply a fixed action sequence from `start`, ignoring any policy.
///
/// # Errors
///
/// Returns [`ReplayError::Cancelled`] when `cancel` fires, or an engine error.
pub fn replay_actions<G>(
    sim: &G,
    start: &G::State,
    actions: &[Action],
    seed: u64,
    cancel: &CancelToken,
) -> Result<Vec<StateAction<G::State>>, ReplayError>
where
    G: Simulation,
{
    let mut context = sim.new_context(Some(seed), Some(start))?;
    let mut pairs = Vec::with_capacity(actions.len());
    for action in actions {
        cancel.check()?;
        if context.episode_over() {
            break;
        }
        context.apply_action(action)?;
        pairs.push((context.state()?, action.clone()));
    }
    Ok(pairs)
}

/// Record a live episode from the engine's own starting state.
///
/// The first pair is the starting state with a `NOOP`.
///
/// # Errors
///
/// Returns an engine error or [`ReplayError::Cancelled`].
pub fn record_episode<G, A>(
    sim: &G,
    agent: &mut A,
    seed: u64,
    max_steps: usize,
    cancel: &CancelToken,
) -> Result<Vec<StateAction<G::State>>, ReplayError>
where
    G: Simulation,
    A: Agent<G::State> + ?Sized,
{
    let start = sim.new_context(Some(seed), None)?.state()?;
    let mut pairs = vec![(start.clone(), Action::Code(Action::NOOP))];
    pairs.extend(play_forward(sim, agent, &start, max_steps, seed, cancel)?);
    Ok(pairs)
}
