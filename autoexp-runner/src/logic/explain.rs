use std::time::Instant;

use anyhow::{Context, Result};
use autoexp_core::outcomes::BallOutcome;
use autoexp_core::replay::CancelToken;
use autoexp_core::sandbox::PaddleGame;
use autoexp_core::{
    AbsDifference, EmpiricalOracle, Experiment, ExperimentConfig, ExperimentResult,
    MarginalOracle, VariableGraph,
};
use colored::Colorize;
use serde::Serialize;

use super::policy::AgentKind;
use super::session::{SessionSettings, discover};
use crate::util::artifacts_dir;

/// Name of the ball/paddle horizontal distance composite.
pub const XDIST_BALL_PADDLE: &str = "xdist_ball_paddle";

/// Everything needed to run one batch of searches.
#[derive(Debug, Clone)]
pub struct ExplainPlan {
    pub agents: Vec<AgentKind>,
    pub seeds: Vec<u64>,
    pub outcome: BallOutcome,
    pub counterfactual: BallOutcome,
    pub session: SessionSettings,
    /// Base configuration; the seed is replaced per run and artifacts land
    /// in a per-run directory under `outdir`.
    pub config: ExperimentConfig,
    /// Marginals loaded from disk instead of learned live.
    pub model: Option<EmpiricalOracle>,
    pub composites: bool,
    pub verbose: bool,
}

/// One agent × seed row of the batch table.
#[derive(Debug, Clone, Serialize)]
pub struct ExplainRecord {
    pub agent: String,
    pub seed: u64,
    pub outcome: String,
    pub counterfactual: String,
    /// Step of the live run on which the outcome was decided.
    pub outcome_step: Option<usize>,
    pub counterfactual_step: Option<usize>,
    /// Steps the live run lasted.
    pub live_steps: usize,
    pub trace_len: usize,
    pub result: Option<ExperimentResult>,
    pub elapsed_secs: f64,
}

impl ExplainRecord {
    #[must_use]
    pub fn is_explained(&self) -> bool {
        self.result
            .as_ref()
            .is_some_and(ExperimentResult::is_explained)
    }

    #[must_use]
    pub fn interventions(&self) -> usize {
        self.result.as_ref().map_or(0, |r| r.interventions)
    }

    #[must_use]
    pub fn status_label(&self) -> String {
        self.result
            .as_ref()
            .map_or_else(
                || "outcome not observed".to_string(),
                |r| r.status.to_string(),
            )
    }

    /// `variable = value @ lookback`, or an empty string.
    #[must_use]
    pub fn explanation_label(&self) -> String {
        self.result
            .as_ref()
            .and_then(|r| r.explanation.as_ref())
            .map(|e| format!("{} = {} @ -{}", e.variable, e.value, e.lookback))
            .unwrap_or_default()
    }
}

/// Results of a batch plus the marginals learned along the way.
#[derive(Debug, Default)]
pub struct ExplainBatch {
    pub records: Vec<ExplainRecord>,
    /// Marginals learned from the first live session, for `--save-model`.
    pub learned: Option<EmpiricalOracle>,
}

/// Composites registered for the paddle court.
///
/// # Errors
///
/// Returns an error if registration is rejected.
pub fn paddle_graph(composites: bool) -> Result<VariableGraph> {
    let mut graph = VariableGraph::new();
    if composites {
        graph
            .register(
                XDIST_BALL_PADDLE,
                &["balls[0].position.x", "paddle.position.x"],
                AbsDifference,
            )
            .context("registering ball/paddle distance")?;
    }
    Ok(graph)
}

/// Run every agent × seed combination of `plan` in order.
///
/// # Errors
///
/// Propagates live recording and search failures. An outcome the agent never
/// produces is reported as a row without a result, not as an error.
pub fn run_plan(plan: &ExplainPlan, cancel: &CancelToken) -> Result<ExplainBatch> {
    let game = PaddleGame::default();
    let graph = paddle_graph(plan.composites)?;
    let mut batch = ExplainBatch::default();

    for &kind in &plan.agents {
        for &seed in &plan.seeds {
            if cancel.is_cancelled() {
                log::warn!("batch cancelled before {kind} seed {seed}");
                return Ok(batch);
            }
            let record = explain_one(plan, &game, &graph, kind, seed, cancel, &mut batch.learned)?;
            if plan.verbose {
                announce_record(&record);
            }
            batch.records.push(record);
        }
    }
    Ok(batch)
}

fn explain_one(
    plan: &ExplainPlan,
    game: &PaddleGame,
    graph: &VariableGraph,
    kind: AgentKind,
    seed: u64,
    cancel: &CancelToken,
    learned: &mut Option<EmpiricalOracle>,
) -> Result<ExplainRecord> {
    let started = Instant::now();
    let mut record = ExplainRecord {
        agent: kind.label().to_string(),
        seed,
        outcome: plan.outcome.to_string(),
        counterfactual: plan.counterfactual.to_string(),
        outcome_step: None,
        counterfactual_step: None,
        live_steps: 0,
        trace_len: 0,
        result: None,
        elapsed_secs: 0.0,
    };

    let mut live_agent = kind.create_agent(seed)?;
    let Some(session) = discover(
        game,
        &mut live_agent,
        seed,
        &plan.outcome,
        &plan.counterfactual,
        plan.session,
        graph,
        cancel,
    )?
    else {
        record.elapsed_secs = started.elapsed().as_secs_f64();
        return Ok(record);
    };
    record.outcome_step = Some(session.outcome_step);
    record.counterfactual_step = session.counterfactual_step;
    record.live_steps = session.steps_played;
    record.trace_len = session.trace.len();

    let oracle: &dyn MarginalOracle = match &plan.model {
        Some(model) => model,
        None => &session.oracle,
    };
    let config = ExperimentConfig {
        seed,
        outdir: plan
            .config
            .outdir
            .as_deref()
            .map(|base| artifacts_dir(base, &format!("{kind}-seed{seed}"))),
        ..plan.config.clone()
    };
    let report = Experiment::new(game, kind.create_agent(seed)?, &session.trace, oracle)
        .with_config(config)
        .with_graph(graph)
        .with_cancel(cancel.clone())
        .run(&plan.outcome, &plan.counterfactual)
        .with_context(|| format!("explaining {} for {kind} (seed {seed})", plan.outcome))?;

    record.result = Some(report.result);
    record.elapsed_secs = started.elapsed().as_secs_f64();
    if learned.is_none() {
        *learned = Some(session.oracle);
    }
    Ok(record)
}

fn announce_record(record: &ExplainRecord) {
    let status = if record.is_explained() {
        record.status_label().green()
    } else {
        record.status_label().yellow()
    };
    println!(
        "  [{} seed {}] {} after {} interventions ({:.2}s) {}",
        record.agent.bold(),
        record.seed,
        status,
        record.interventions(),
        record.elapsed_secs,
        record.explanation_label()
    );
}
