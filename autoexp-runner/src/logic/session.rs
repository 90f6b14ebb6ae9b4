use anyhow::{Context, Result};
use autoexp_core::outcomes::{BallOutcome, Outcome, find_outcome_window};
use autoexp_core::replay::{CancelToken, record_episode};
use autoexp_core::sandbox::{PaddleGame, PaddleState, ScriptedAgent};
use autoexp_core::state::StateAction;
use autoexp_core::{EmpiricalOracle, Trace, VariableGraph};

/// Limits for one live recording.
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub max_steps: usize,
    /// Longest trace kept before the outcome.
    pub window: usize,
}

/// A live run in which the agent was seen producing the outcome.
#[derive(Debug)]
pub struct LiveSession {
    pub trace: Trace<PaddleState>,
    /// Index of the pair on which the outcome was decided.
    pub outcome_step: usize,
    /// Where the counterfactual was first seen in the same run, if ever.
    pub counterfactual_step: Option<usize>,
    pub steps_played: usize,
    /// Marginals learned from every state the run visited.
    pub oracle: EmpiricalOracle,
}

/// First window of the outcome whose trace is at least `2 * min_window`
/// long. Returns the exclusive end index and the trace slice.
fn first_usable_window<'p>(
    outcome: &BallOutcome,
    pairs: &'p [StateAction<PaddleState>],
    window: usize,
) -> Result<Option<(usize, &'p [StateAction<PaddleState>])>> {
    let min_window = Outcome::<PaddleState>::min_window(outcome);
    let span = min_window + 1;
    let mut from = 0;
    while from < pairs.len() {
        let Some(matched) = find_outcome_window(outcome, &pairs[from..], usize::MAX)? else {
            return Ok(None);
        };
        let end = from + matched.len();
        let start = end.saturating_sub(window);
        if end - start >= 2 * min_window {
            return Ok(Some((end, &pairs[start..end])));
        }
        log::debug!(
            "{outcome} at step {end} leaves only {} pairs of history; looking further",
            end - start
        );
        from = end + 1 - span;
    }
    Ok(None)
}

/// Play `agent` live and cut the trace that ends in `outcome`.
///
/// Returns `Ok(None)` when the agent never produced a usable outcome window
/// within `settings.max_steps`.
///
/// # Errors
///
/// Propagates engine, predicate, and trace construction failures.
#[allow(clippy::too_many_arguments)]
pub fn discover(
    game: &PaddleGame,
    agent: &mut ScriptedAgent,
    seed: u64,
    outcome: &BallOutcome,
    counterfactual: &BallOutcome,
    settings: SessionSettings,
    graph: &VariableGraph,
    cancel: &CancelToken,
) -> Result<Option<LiveSession>> {
    let pairs = record_episode(game, agent, seed, settings.max_steps, cancel)
        .with_context(|| format!("recording live run for seed {seed}"))?;
    let steps_played = pairs.len().saturating_sub(1);

    let Some((end, window)) = first_usable_window(outcome, &pairs, settings.window)? else {
        log::info!("{outcome} not observed within {steps_played} steps (seed {seed})");
        return Ok(None);
    };
    let counterfactual_step = first_usable_window(counterfactual, &pairs, settings.window)?
        .map(|(cf_end, _)| cf_end - 1);
    match counterfactual_step {
        Some(step) => log::info!("{counterfactual} first seen at step {step} (seed {seed})"),
        None => log::info!("{counterfactual} never seen live (seed {seed})"),
    }

    let states: Vec<PaddleState> = pairs.iter().map(|(state, _)| state.clone()).collect();
    let oracle = EmpiricalOracle::from_states(&states, graph)
        .context("learning marginals from the live run")?;
    let trace = Trace::from_pairs(window).context("building trace from outcome window")?;
    log::info!(
        "{outcome} at step {} (seed {seed}); trace of {} pairs",
        end - 1,
        trace.len()
    );

    Ok(Some(LiveSession {
        trace,
        outcome_step: end - 1,
        counterfactual_step,
        steps_played,
        oracle,
    }))
}
