//! Scripted engines that misbehave in controlled ways around interventions.

use std::sync::OnceLock;

use autoexp_core::UniformOracle;
use autoexp_core::driver::{Experiment, ExperimentConfig, RetireReason, SearchStatus};
use autoexp_core::outcomes::{Outcome, OutcomeError, check_window};
use autoexp_core::property::{FieldSchema, Schema};
use autoexp_core::replay::{CancelToken, record_episode};
use autoexp_core::sim::{Agent, Simulation, SimulationContext, SimulationError};
use autoexp_core::state::{Action, GameState, StateAction};
use autoexp_core::trace::Trace;
use serde::{Deserialize, Serialize};

const RESTING_LEVEL: f64 = 10.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Dial {
    level: f64,
    echo: f64,
    tick: i64,
}

impl Default for Dial {
    fn default() -> Self {
        Self {
            level: RESTING_LEVEL,
            echo: 2.0 * RESTING_LEVEL,
            tick: 0,
        }
    }
}

impl GameState for Dial {
    fn schema() -> &'static Schema {
        static SCHEMA: OnceLock<Schema> = OnceLock::new();
        SCHEMA.get_or_init(|| {
            Schema::record([
                FieldSchema::comparable("level", Schema::Float),
                FieldSchema::comparable("echo", Schema::Float),
                FieldSchema::internal("tick", Schema::Int),
            ])
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dynamics {
    /// Writes persist.
    Faithful,
    /// Every tick forces the level back to rest.
    WashOut,
    /// Every tick recomputes the echo from the level.
    SideEffect,
}

struct DialGame {
    dynamics: Dynamics,
}

struct DialContext {
    state: Dial,
    dynamics: Dynamics,
}

impl Simulation for DialGame {
    type State = Dial;
    type Context = DialContext;

    fn game_name(&self) -> &str {
        "dial"
    }

    fn new_context(
        &self,
        _seed: Option<u64>,
        initial_state: Option<&Dial>,
    ) -> Result<DialContext, SimulationError> {
        Ok(DialContext {
            state: initial_state.cloned().unwrap_or_default(),
            dynamics: self.dynamics,
        })
    }
}

impl SimulationContext for DialContext {
    type State = Dial;

    fn apply_action(&mut self, _action: &Action) -> Result<(), SimulationError> {
        self.state.tick += 1;
        match self.dynamics {
            Dynamics::Faithful => {}
            Dynamics::WashOut => self.state.level = RESTING_LEVEL,
            Dynamics::SideEffect => self.state.echo = 2.0 * self.state.level,
        }
        Ok(())
    }

    fn state_snapshot(&self) -> Result<Vec<u8>, SimulationError> {
        Ok(self.state.encode()?)
    }

    fn load_snapshot(&mut self, bytes: &[u8]) -> Result<(), SimulationError> {
        self.state = Dial::decode(bytes)?;
        Ok(())
    }

    fn episode_over(&self) -> bool {
        false
    }

    fn legal_actions(&self) -> Vec<i64> {
        vec![Action::NOOP]
    }
}

#[derive(Debug, Clone, Copy)]
struct Idle;

impl Agent<Dial> for Idle {
    fn name(&self) -> &str {
        "Idle"
    }

    fn reset(&mut self, _seed: u64) {}

    fn act(&mut self, _state: &Dial, _legal_actions: &[i64]) -> Option<Action> {
        Some(Action::Code(Action::NOOP))
    }
}

/// Final level above (or, inverted, at most) a threshold.
struct LevelAbove {
    threshold: f64,
    inverted: bool,
}

impl Outcome<Dial> for LevelAbove {
    fn name(&self) -> String {
        if self.inverted {
            "LevelLow".to_string()
        } else {
            "LevelHigh".to_string()
        }
    }

    fn min_window(&self) -> usize {
        1
    }

    fn evaluate(&self, window: &[StateAction<Dial>]) -> Result<bool, OutcomeError> {
        check_window(self, window)?;
        let above = window
            .last()
            .is_some_and(|(state, _)| state.level > self.threshold);
        Ok(above != self.inverted)
    }
}

const HIGH: LevelAbove = LevelAbove {
    threshold: 50.0,
    inverted: false,
};
const LOW: LevelAbove = LevelAbove {
    threshold: 50.0,
    inverted: true,
};

fn idle_trace(game: &DialGame) -> Trace<Dial> {
    let pairs = record_episode(game, &mut Idle, 1, 8, &CancelToken::new()).expect("records");
    Trace::from_pairs(&pairs).expect("trace builds")
}

fn level_only() -> ExperimentConfig {
    ExperimentConfig {
        exclusions: vec!["echo".to_string()],
        repetitions: 10,
        parallel: false,
        ..ExperimentConfig::default()
    }
}

fn search(dynamics: Dynamics) -> autoexp_core::SearchReport<Dial> {
    let game = DialGame { dynamics };
    let trace = idle_trace(&game);
    let oracle = UniformOracle::new().with_float("level", 0.0, 100.0);
    Experiment::new(&game, Idle, &trace, &oracle)
        .with_config(level_only())
        .run(&LOW, &HIGH)
        .expect("search completes")
}

#[test]
fn washed_out_writes_are_malformed() {
    let report = search(Dynamics::WashOut);
    let result = &report.result;
    assert_eq!(result.status, SearchStatus::Exhausted);
    assert!(!result.retired.is_empty());
    assert!(
        result
            .retired
            .iter()
            .all(|r| r.reason == RetireReason::Malformed && r.variable == "level")
    );
    assert_eq!(result.retired.len(), result.windows.len());
}

#[test]
fn side_effects_are_conditional() {
    let report = search(Dynamics::SideEffect);
    let result = &report.result;
    assert_eq!(result.status, SearchStatus::Exhausted);
    assert!(result.retired_count(RetireReason::Conditional) > 0);
    assert_eq!(result.retired_count(RetireReason::Malformed), 0);
}

#[test]
fn faithful_engine_yields_an_explanation() {
    let report = search(Dynamics::Faithful);
    let result = &report.result;
    assert_eq!(result.status, SearchStatus::Explained);
    assert!(result.retired.is_empty());
    let explanation = result.explanation.as_ref().expect("explained");
    assert_eq!(explanation.variable, "level");
    assert!(explanation.value.as_f64().is_some_and(|v| v > 50.0));
    assert_eq!(explanation.baseline.counterfactual, 0);
    assert_eq!(explanation.intervened.counterfactual, 10);
    let state = report.explained_state.expect("state returned");
    assert!(state.level > 50.0);
}
