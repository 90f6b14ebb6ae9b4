//! Experiment driver: searches for an intervention that flips an observed outcome.
//!
//! Each window runs generate, replay intervened, replay control, validate and
//! evaluate in turn. Windows widen by doubling until the whole trace has been
//! searched.

mod config;
mod result;

use std::collections::BTreeSet;

use rayon::prelude::*;
use thiserror::Error;

pub use config::{ConfigError, ExperimentConfig};
pub use result::{
    Explanation, ExperimentResult, RetireReason, RetiredVariable, SearchReport, SearchStatus,
};

use crate::artifacts::{ArtifactError, ArtifactStore, ReplayKind};
use crate::generator::{GenerateError, Intervention, InterventionGenerator, InterventionHistory};
use crate::numbers::{usize_to_f64, usize_to_u64};
use crate::oracle::MarginalOracle;
use crate::outcomes::{Outcome, OutcomeError};
use crate::property::{PropertyError, PropertyPath};
use crate::registry::{Exclusions, MutationPointSet, RegistryError, enumerate};
use crate::replay::{CancelToken, ReplayError, play_forward, replay_actions};
use crate::seed::{SeedDomain, derive_seed};
use crate::sim::{Agent, Simulation};
use crate::state::{Action, EqualityMode, GameState, StateAction};
use crate::stats::{OutcomeFrequency, fisher_exact};
use crate::trace::{Trace, TraceError};
use crate::vars::{VariableError, VariableGraph};

#[derive(Debug, Error)]
pub enum ExperimentError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Trace(#[from] TraceError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Generate(#[from] GenerateError),
    #[error(transparent)]
    Variable(#[from] VariableError),
    #[error(transparent)]
    Replay(#[from] ReplayError),
    #[error(transparent)]
    Outcome(#[from] OutcomeError),
    #[error(transparent)]
    Property(#[from] PropertyError),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

impl ExperimentError {
    const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Replay(ReplayError::Cancelled))
    }
}

/// Why an intervention failed the control comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validity {
    Valid,
    /// The engine overwrote part of the intervention.
    Malformed(BTreeSet<PropertyPath>),
    /// The intervention changed more than was written.
    Conditional(BTreeSet<PropertyPath>),
}

/// Compare what the intervention changed (`written`) with what still
/// differs between control and intervened runs one step later (`observed`).
#[must_use]
pub fn classify(written: &BTreeSet<PropertyPath>, observed: &BTreeSet<PropertyPath>) -> Validity {
    if written == observed {
        Validity::Valid
    } else if observed.is_subset(written) {
        Validity::Malformed(written.difference(observed).cloned().collect())
    } else {
        Validity::Conditional(observed.difference(written).cloned().collect())
    }
}

enum Verdict {
    Flipped,
    Unchanged,
    Inadequate,
}

enum WindowEnd<S> {
    Explained(Box<S>, Explanation),
    Exhausted,
    Stopped(SearchStatus),
}

/// One explanation search over a recorded trace.
pub struct Experiment<'a, G: Simulation, A> {
    sim: &'a G,
    agent: A,
    trace: &'a Trace<G::State>,
    oracle: &'a dyn MarginalOracle,
    graph: Option<&'a VariableGraph>,
    config: ExperimentConfig,
    cancel: CancelToken,
}

impl<'a, G, A> Experiment<'a, G, A>
where
    G: Simulation,
    A: Agent<G::State> + Clone + Sync,
{
    #[must_use]
    pub fn new(
        sim: &'a G,
        agent: A,
        trace: &'a Trace<G::State>,
        oracle: &'a dyn MarginalOracle,
    ) -> Self {
        Self {
            sim,
            agent,
            trace,
            oracle,
            graph: None,
            config: ExperimentConfig::default(),
            cancel: CancelToken::new(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: ExperimentConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub const fn with_graph(mut self, graph: &'a VariableGraph) -> Self {
        self.graph = Some(graph);
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub const fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    /// First lookback searched: the requested lag, but never shorter than
    /// what the outcomes need to be decided, and never past the history.
    #[must_use]
    pub fn initial_lookback(&self, min_window: usize) -> usize {
        let repeat = self.agent.action_repeat().max(1);
        self.config
            .timelag
            .max((min_window + 1) * repeat)
            .min(self.trace.history_len())
            .max(1)
    }

    /// Search for an intervention under which `counterfactual` is observed
    /// instead of `outcome`.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid configuration, states without mutable
    /// fields, unreadable properties and engine failures. Exhaustion,
    /// cancellation and the iteration ceiling are reported through
    /// [`SearchStatus`], not as errors.
    pub fn run(
        &self,
        outcome: &dyn Outcome<G::State>,
        counterfactual: &dyn Outcome<G::State>,
    ) -> Result<SearchReport<G::State>, ExperimentError> {
        self.config.validate()?;
        let mut result =
            ExperimentResult::new(self.agent.name(), &outcome.name(), &counterfactual.name());
        let empty = VariableGraph::new();
        let graph = self.graph.unwrap_or(&empty);
        let exclusions = Exclusions::new(&self.config.exclusions);
        let mut generator = InterventionGenerator::new(
            self.config.generator(),
            derive_seed(self.config.seed, SeedDomain::Generator, 0),
        );
        let mut artifacts = self
            .config
            .outdir
            .as_ref()
            .map(|dir| ArtifactStore::new(dir.clone()));

        let history_len = self.trace.history_len();
        let min_window = outcome.min_window().max(counterfactual.min_window());
        let mut lookback = self.initial_lookback(min_window);
        log::info!(
            "explaining {} -> {} for {} over {} frames",
            result.outcome,
            result.counterfactual,
            result.agent,
            self.trace.len()
        );

        loop {
            if self.cancel.is_cancelled() {
                return Ok(Self::stopped(result, SearchStatus::Cancelled));
            }
            result.windows.push(lookback);
            let window = SearchWindow {
                lookback,
                outcome,
                counterfactual,
                graph,
                exclusions: &exclusions,
            };
            let attempt = self.search_window(&window, &mut generator, &mut artifacts, &mut result);
            let end = match attempt {
                Ok(end) => end,
                Err(err) if err.is_cancelled() => WindowEnd::Stopped(SearchStatus::Cancelled),
                Err(err) => return Err(err),
            };
            match end {
                WindowEnd::Explained(state, explanation) => {
                    log::info!(
                        "explained: {} = {} at lookback {} (OR {:.3}, p {:.3e})",
                        explanation.variable,
                        explanation.value,
                        explanation.lookback,
                        explanation.fisher.odds_ratio,
                        explanation.fisher.p_value
                    );
                    result.status = SearchStatus::Explained;
                    result.explanation = Some(explanation);
                    return Ok(SearchReport {
                        explained_state: Some(*state),
                        outcome_value: Some(true),
                        result,
                    });
                }
                WindowEnd::Stopped(status) => return Ok(Self::stopped(result, status)),
                WindowEnd::Exhausted => {}
            }
            if lookback >= history_len {
                log::info!(
                    "no explanation within {history_len} frames after {} interventions",
                    result.interventions
                );
                return Ok(Self::stopped(result, SearchStatus::Exhausted));
            }
            lookback = (lookback * 2).min(history_len);
        }
    }

    fn stopped(mut result: ExperimentResult, status: SearchStatus) -> SearchReport<G::State> {
        result.status = status;
        SearchReport {
            explained_state: None,
            outcome_value: None,
            result,
        }
    }

    fn search_window(
        &self,
        window: &SearchWindow<'_, G::State>,
        generator: &mut InterventionGenerator,
        artifacts: &mut Option<ArtifactStore>,
        result: &mut ExperimentResult,
    ) -> Result<WindowEnd<G::State>, ExperimentError> {
        let lookback = window.lookback;
        let original = self.trace.state_at(lookback)?;
        let lead_action = self.trace.action_at(lookback)?;
        let prefix = self.trace.prefix_before(lookback)?;
        let mut points = enumerate(&original, window.exclusions, window.graph)?;
        let mut history = InterventionHistory::default();
        let mut spurious = 0usize;
        let point_count = points.len();
        result.mutation_points = result.mutation_points.max(point_count);
        log::info!(
            "lookback {lookback}/{}: {point_count} mutation points",
            self.trace.history_len()
        );

        loop {
            self.cancel.check()?;
            if result.interventions >= self.config.max_iterations {
                let ceiling = self.config.max_iterations;
                log::warn!("iteration ceiling of {ceiling} reached");
                return Ok(WindowEnd::Stopped(SearchStatus::IterationLimit));
            }

            let intervention = match generator.generate(
                &original,
                &mut history,
                &points,
                window.graph,
                self.oracle,
            ) {
                Ok(intervention) => intervention,
                Err(GenerateError::NoMutationPointsRemaining) => {
                    log::debug!("lookback {lookback}: mutation points exhausted");
                    return Ok(WindowEnd::Exhausted);
                }
                Err(GenerateError::LikelyConstant { variable, trials }) => {
                    log::debug!("retiring {variable}: constant over {trials} draws");
                    let reason = RetireReason::LikelyConstant;
                    Self::retire(&mut points, result, variable, lookback, reason);
                    continue;
                }
                Err(GenerateError::Unsampleable { variable, source }) => {
                    let reason = match source {
                        VariableError::Unsatisfiable { .. } => RetireReason::Unsatisfiable,
                        VariableError::Oracle(_) | VariableError::NonNumeric { .. } => {
                            RetireReason::Unsampleable
                        }
                        source => {
                            return Err(GenerateError::Unsampleable { variable, source }.into());
                        }
                    };
                    log::warn!("retiring {variable} at lookback {lookback}: {source}");
                    Self::retire(&mut points, result, variable, lookback, reason);
                    continue;
                }
                Err(err) => return Err(err.into()),
            };
            result.interventions += 1;
            let name = intervention.variable.name().to_string();
            log::debug!(
                "lookback {lookback}: {name} {} -> {}",
                intervention.before,
                intervention.value
            );

            let seed = self.config.seed;
            let mut agent = self.agent.clone();
            let intervened = play_forward(
                self.sim,
                &mut agent,
                &intervention.state,
                lookback,
                seed,
                &self.cancel,
            )?;
            if intervened.is_empty() {
                log::debug!("{name}: intervened replay produced nothing; skipping");
                result.degenerate_replays += 1;
                continue;
            }
            let actions: Vec<Action> = intervened.iter().map(|(_, a)| a.clone()).collect();
            let control = replay_actions(self.sim, &original, &actions, seed, &self.cancel)?;
            if control.is_empty() {
                result.degenerate_replays += 1;
                continue;
            }
            if self.config.record_json
                && let Some(store) = artifacts.as_ref()
            {
                let agent_name = self.agent.name();
                for (kind, pairs) in [
                    (ReplayKind::Intervened, &intervened),
                    (ReplayKind::Control, &control),
                ] {
                    store.write_replay(kind, &name, &intervention.value, agent_name, pairs)?;
                }
            }

            let written = original
                .compare(&intervention.state, EqualityMode::Set)?
                .into_diff();
            let observed = control[0]
                .0
                .compare(&intervened[0].0, EqualityMode::Set)?
                .into_diff();
            match classify(&written, &observed) {
                Validity::Valid => {}
                Validity::Malformed(lost) => {
                    log::warn!("{name} washed out at lookback {lookback}: {}", join(&lost));
                    let reason = RetireReason::Malformed;
                    Self::retire(&mut points, result, name, lookback, reason);
                    continue;
                }
                Validity::Conditional(extra) => {
                    let extra = join(&extra);
                    log::warn!("{name} had side effects at lookback {lookback}: {extra}");
                    let reason = RetireReason::Conditional;
                    Self::retire(&mut points, result, name, lookback, reason);
                    continue;
                }
            }

            let composed = compose(
                &prefix,
                (intervention.state.clone(), lead_action.clone()),
                intervened,
                self.trace.len(),
            );
            match self.verdict(window, &composed, artifacts, result)? {
                Verdict::Flipped => {}
                Verdict::Unchanged => continue,
                Verdict::Inadequate => {
                    result.inadequate_windows += 1;
                    continue;
                }
            }

            let explanation =
                self.significance(window, &original, &intervention, &prefix, &lead_action)?;
            if self.confirmed(&explanation) {
                return Ok(WindowEnd::Explained(Box::new(intervention.state), explanation));
            }
            spurious += 1;
            result.spurious += 1;
            log::debug!(
                "{name}: spurious (OR {:.3}, p {:.3})",
                explanation.fisher.odds_ratio,
                explanation.fisher.p_value
            );
            if self.looks_random(spurious, point_count) && !result.random_policy_suspected {
                log::warn!(
                    "{spurious} spurious explanations at lookback {lookback}; \
                     policy may be random here"
                );
                result.random_policy_suspected = true;
            }
        }
    }

    fn retire(
        points: &mut MutationPointSet,
        result: &mut ExperimentResult,
        variable: String,
        lookback: usize,
        reason: RetireReason,
    ) {
        points.retire(&variable);
        result.retired.push(RetiredVariable {
            variable,
            lookback,
            reason,
        });
    }

    fn verdict(
        &self,
        window: &SearchWindow<'_, G::State>,
        composed: &[StateAction<G::State>],
        artifacts: &mut Option<ArtifactStore>,
        result: &mut ExperimentResult,
    ) -> Result<Verdict, ExperimentError> {
        let mut observe = |outcome: &dyn Outcome<G::State>| -> Result<_, ExperimentError> {
            match outcome.evaluate(composed) {
                Ok(seen) => Ok(Some(seen)),
                Err(OutcomeError::InadequateWindow {
                    outcome,
                    got,
                    expecting,
                }) => {
                    log::debug!("{outcome}: window of {got} frames, need {expecting}");
                    Ok(None)
                }
                Err(OutcomeError::StagnantBall { outcome, frames }) => {
                    log::warn!("{outcome}: stagnant ball across {} frames", frames.len());
                    result.stagnant_windows += 1;
                    if let Some(store) = artifacts.as_mut() {
                        store.write_debug(&outcome, &frames)?;
                    }
                    Ok(Some(false))
                }
                Err(err) => Err(err.into()),
            }
        };
        let (Some(factual), Some(counterfactual)) =
            (observe(window.outcome)?, observe(window.counterfactual)?)
        else {
            return Ok(Verdict::Inadequate);
        };
        Ok(if counterfactual && !factual {
            Verdict::Flipped
        } else {
            Verdict::Unchanged
        })
    }

    fn significance(
        &self,
        window: &SearchWindow<'_, G::State>,
        original: &G::State,
        intervention: &Intervention<G::State>,
        prefix: &[StateAction<G::State>],
        lead_action: &Action,
    ) -> Result<Explanation, ExperimentError> {
        let baseline =
            self.frequency(window, original, prefix, lead_action, SeedDomain::Baseline)?;
        let intervened = self.frequency(
            window,
            &intervention.state,
            prefix,
            lead_action,
            SeedDomain::Intervened,
        )?;
        let fisher = fisher_exact([
            [
                intervened.counterfactual,
                intervened.trials - intervened.counterfactual,
            ],
            [
                baseline.counterfactual,
                baseline.trials - baseline.counterfactual,
            ],
        ]);
        Ok(Explanation {
            variable: intervention.variable.name().to_string(),
            before: intervention.before.clone(),
            value: intervention.value.clone(),
            lookback: window.lookback,
            baseline,
            intervened,
            fisher,
        })
    }

    /// Replay the live policy from `start` repeatedly and count both outcomes.
    fn frequency(
        &self,
        window: &SearchWindow<'_, G::State>,
        start: &G::State,
        prefix: &[StateAction<G::State>],
        lead_action: &Action,
        domain: SeedDomain,
    ) -> Result<OutcomeFrequency, ExperimentError> {
        let trial = |rep: usize| -> Result<(bool, bool), ExperimentError> {
            let mut agent = self.agent.clone();
            let seed = derive_seed(self.config.seed, domain, usize_to_u64(rep));
            let replay = play_forward(
                self.sim,
                &mut agent,
                start,
                window.lookback,
                seed,
                &self.cancel,
            )?;
            let composed = compose(
                prefix,
                (start.clone(), lead_action.clone()),
                replay,
                self.trace.len(),
            );
            Ok((
                occurred(window.outcome, &composed)?,
                occurred(window.counterfactual, &composed)?,
            ))
        };
        let reps = self.config.repetitions;
        let observations: Vec<(bool, bool)> = if self.config.parallel {
            (0..reps)
                .into_par_iter()
                .map(trial)
                .collect::<Result<_, _>>()?
        } else {
            (0..reps).map(trial).collect::<Result<_, _>>()?
        };
        Ok(OutcomeFrequency {
            trials: reps,
            factual: observations.iter().filter(|(f, _)| *f).count(),
            counterfactual: observations.iter().filter(|(_, c)| *c).count(),
        })
    }

    fn confirmed(&self, explanation: &Explanation) -> bool {
        let fisher = &explanation.fisher;
        (fisher.odds_ratio - 1.0).abs() > self.config.odds_ratio_threshold
            && fisher.p_value < self.config.alpha
    }

    fn looks_random(&self, spurious: usize, points: usize) -> bool {
        spurious > self.config.spurious_floor
            && usize_to_f64(spurious) > self.config.spurious_fraction * usize_to_f64(points)
    }
}

struct SearchWindow<'w, S> {
    lookback: usize,
    outcome: &'w dyn Outcome<S>,
    counterfactual: &'w dyn Outcome<S>,
    graph: &'w VariableGraph,
    exclusions: &'w Exclusions,
}

/// `prefix ++ [lead] ++ replay`, keeping at most the last `len` pairs.
fn compose<S: Clone>(
    prefix: &[StateAction<S>],
    lead: StateAction<S>,
    replay: Vec<StateAction<S>>,
    len: usize,
) -> Vec<StateAction<S>> {
    let mut window = Vec::with_capacity(prefix.len() + 1 + replay.len());
    window.extend_from_slice(prefix);
    window.push(lead);
    window.extend(replay);
    let excess = window.len().saturating_sub(len);
    window.drain(..excess);
    window
}

/// Ambiguous or undecidable windows count as "not observed" when estimating frequencies.
fn occurred<S>(
    outcome: &dyn Outcome<S>,
    window: &[StateAction<S>],
) -> Result<bool, ExperimentError> {
    match outcome.evaluate(window) {
        Ok(seen) => Ok(seen),
        Err(OutcomeError::InadequateWindow { .. } | OutcomeError::StagnantBall { .. }) => {
            Ok(false)
        }
        Err(err) => Err(err.into()),
    }
}

fn join(paths: &BTreeSet<PropertyPath>) -> String {
    paths
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcomes::BallOutcome;
    use crate::oracle::UniformOracle;
    use crate::replay::record_episode;
    use crate::sandbox::{PaddleGame, PaddleState, StayAlive};

    fn paths(names: &[&str]) -> BTreeSet<PropertyPath> {
        names.iter().map(|n| n.parse().unwrap()).collect()
    }

    #[test]
    fn classification_is_content_based() {
        let written = paths(&["balls[0].position.x"]);
        assert_eq!(classify(&written, &written), Validity::Valid);
        assert!(matches!(classify(&written, &paths(&[])), Validity::Malformed(_)));
        assert!(matches!(
            classify(&written, &paths(&["balls[0].position.x", "score"])),
            Validity::Conditional(extra) if extra == paths(&["score"])
        ));
        assert!(matches!(
            classify(&written, &paths(&["score"])),
            Validity::Conditional(_)
        ));
    }

    #[test]
    fn compose_keeps_trace_length() {
        let prefix = vec![(1, Action::Code(0)), (2, Action::Code(0))];
        let replay = vec![(4, Action::Code(2)), (5, Action::Code(3))];
        let window = compose(&prefix, (3, Action::Code(1)), replay, 4);
        let states: Vec<i32> = window.iter().map(|(s, _)| *s).collect();
        assert_eq!(states, vec![2, 3, 4, 5]);
    }

    fn short_trace() -> Trace<PaddleState> {
        let game = PaddleGame::default();
        let pairs = record_episode(&game, &mut StayAlive, 1, 12, &CancelToken::new()).unwrap();
        Trace::from_pairs(&pairs).unwrap()
    }

    #[test]
    fn initial_lookback_respects_outcome_window_and_history() {
        let game = PaddleGame::default();
        let trace = short_trace();
        let oracle = UniformOracle::new();
        let experiment = Experiment::new(&game, StayAlive, &trace, &oracle);
        assert_eq!(experiment.initial_lookback(3), 4);
        assert_eq!(experiment.initial_lookback(50), trace.history_len());
    }

    #[test]
    fn cancelled_search_reports_status() {
        let game = PaddleGame::default();
        let trace = short_trace();
        let oracle = UniformOracle::new().with_float("balls[].position.x", 0.0, 160.0);
        let cancel = CancelToken::new();
        cancel.cancel();
        let report = Experiment::new(&game, StayAlive, &trace, &oracle)
            .with_cancel(cancel)
            .run(&BallOutcome::HitBall, &BallOutcome::MissedBall)
            .unwrap();
        assert_eq!(report.result.status, SearchStatus::Cancelled);
        assert!(report.explained_state.is_none());
        assert!(report.outcome_value.is_none());
    }

    #[test]
    fn invalid_config_is_rejected_before_searching() {
        let game = PaddleGame::default();
        let trace = short_trace();
        let oracle = UniformOracle::new();
        let config = ExperimentConfig {
            repetitions: 0,
            ..ExperimentConfig::default()
        };
        let err = Experiment::new(&game, StayAlive, &trace, &oracle)
            .with_config(config)
            .run(&BallOutcome::HitBall, &BallOutcome::MissedBall);
        assert!(matches!(err, Err(ExperimentError::Config(_))));
    }

    #[test]
    fn iteration_ceiling_stops_search() {
        let game = PaddleGame::default();
        let trace = short_trace();
        let oracle = UniformOracle::new()
            .with_float("balls[].position.x", 0.0, 160.0)
            .with_float("balls[].position.y", 0.0, 210.0)
            .with_float("balls[].velocity.x", -3.0, 3.0)
            .with_float("balls[].velocity.y", -3.0, 3.0)
            .with_float("paddle.position.x", 0.0, 160.0)
            .with_float("paddle.position.y", 180.0, 200.0)
            .with_float("paddle_width", 8.0, 40.0)
            .with_int("score", 0, 20)
            .with_int("lives", 1, 5);
        let config = ExperimentConfig {
            max_iterations: 1,
            repetitions: 4,
            parallel: false,
            ..ExperimentConfig::default()
        };
        let report = Experiment::new(&game, StayAlive, &trace, &oracle)
            .with_config(config)
            .run(&BallOutcome::HitBall, &BallOutcome::MissedBall)
            .unwrap();
        assert!(matches!(
            report.result.status,
            SearchStatus::IterationLimit | SearchStatus::Explained
        ));
        assert!(report.result.interventions <= 1);
    }
}
