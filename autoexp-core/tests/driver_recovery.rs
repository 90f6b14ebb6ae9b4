//! Searches that keep going through random policies, dead replays and frozen balls.

use std::fs;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use autoexp_core::UniformOracle;
use autoexp_core::driver::{Experiment, ExperimentConfig, ExperimentResult};
use autoexp_core::outcomes::{BallOutcome, Outcome, OutcomeError, check_window};
use autoexp_core::property::{FieldSchema, Schema};
use autoexp_core::replay::{CancelToken, record_episode};
use autoexp_core::sandbox::{PaddleGame, PaddleState, StayAlive, Vec2};
use autoexp_core::sim::{Agent, Simulation, SimulationContext, SimulationError};
use autoexp_core::state::{Action, GameState, StateAction};
use autoexp_core::trace::Trace;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};

const HEADS: i64 = Action::FIRE;
const TAILS: i64 = Action::NOOP;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A tank whose last coin toss is the only thing outcomes look at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Tank {
    level: f64,
    coin: i64,
}

impl Default for Tank {
    fn default() -> Self {
        Self {
            level: 10.0,
            coin: HEADS,
        }
    }
}

impl GameState for Tank {
    fn schema() -> &'static Schema {
        static SCHEMA: OnceLock<Schema> = OnceLock::new();
        SCHEMA.get_or_init(|| {
            Schema::record([
                FieldSchema::comparable("level", Schema::Float),
                FieldSchema::comparable("coin", Schema::Int),
            ])
        })
    }
}

/// An empty tank ends the episode before the first step.
struct TankGame;

struct TankContext {
    state: Tank,
}

impl Simulation for TankGame {
    type State = Tank;
    type Context = TankContext;

    fn game_name(&self) -> &str {
        "tank"
    }

    fn new_context(
        &self,
        _seed: Option<u64>,
        initial_state: Option<&Tank>,
    ) -> Result<TankContext, SimulationError> {
        Ok(TankContext {
            state: initial_state.cloned().unwrap_or_default(),
        })
    }
}

impl SimulationContext for TankContext {
    type State = Tank;

    fn apply_action(&mut self, action: &Action) -> Result<(), SimulationError> {
        self.state.coin = match action {
            Action::Code(code) => *code,
            Action::Input(_) => TAILS,
        };
        Ok(())
    }

    fn state_snapshot(&self) -> Result<Vec<u8>, SimulationError> {
        Ok(self.state.encode()?)
    }

    fn load_snapshot(&mut self, bytes: &[u8]) -> Result<(), SimulationError> {
        self.state = Tank::decode(bytes)?;
        Ok(())
    }

    fn episode_over(&self) -> bool {
        self.state.level <= 0.0
    }

    fn legal_actions(&self) -> Vec<i64> {
        vec![TAILS, HEADS]
    }
}

/// Tosses a seeded coin every step and ignores the state entirely.
#[derive(Debug, Clone)]
struct CoinFlip {
    rng: ChaCha20Rng,
}

impl Default for CoinFlip {
    fn default() -> Self {
        Self {
            rng: ChaCha20Rng::seed_from_u64(0),
        }
    }
}

impl Agent<Tank> for CoinFlip {
    fn name(&self) -> &str {
        "CoinFlip"
    }

    fn reset(&mut self, seed: u64) {
        self.rng = ChaCha20Rng::seed_from_u64(seed);
    }

    fn act(&mut self, _state: &Tank, _legal_actions: &[i64]) -> Option<Action> {
        let heads = self.rng.gen_bool(0.5);
        Some(Action::Code(if heads { HEADS } else { TAILS }))
    }
}

/// Latest toss came up heads (or, inverted, tails).
struct Toss {
    heads: bool,
}

impl Outcome<Tank> for Toss {
    fn name(&self) -> String {
        if self.heads {
            "Heads".to_string()
        } else {
            "Tails".to_string()
        }
    }

    fn min_window(&self) -> usize {
        1
    }

    fn evaluate(&self, window: &[StateAction<Tank>]) -> Result<bool, OutcomeError> {
        check_window(self, window)?;
        let heads = window.last().is_some_and(|(state, _)| state.coin == HEADS);
        Ok(heads == self.heads)
    }
}

const HEADS_UP: Toss = Toss { heads: true };
const TAILS_UP: Toss = Toss { heads: false };

fn heads_trace() -> Trace<Tank> {
    let pairs: Vec<StateAction<Tank>> = (0..8)
        .map(|_| (Tank::default(), Action::Code(HEADS)))
        .collect();
    Trace::from_pairs(&pairs).expect("trace builds")
}

fn level_only() -> ExperimentConfig {
    ExperimentConfig {
        exclusions: vec!["coin".to_string()],
        repetitions: 30,
        parallel: false,
        ..ExperimentConfig::default()
    }
}

fn search_tank(config: ExperimentConfig, oracle: &UniformOracle) -> ExperimentResult {
    let trace = heads_trace();
    Experiment::new(&TankGame, CoinFlip::default(), &trace, oracle)
        .with_config(config)
        .run(&HEADS_UP, &TAILS_UP)
        .expect("search completes")
        .result
}

fn scratch(tag: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    std::env::temp_dir().join(format!("autoexp-{tag}-{}-{nanos}", std::process::id()))
}

#[test]
fn coin_flipping_policy_is_flagged_as_random() {
    init_logging();
    let oracle = UniformOracle::new().with_float("level", 20.0, 100.0);
    let flagged: Vec<ExperimentResult> = (0..16)
        .map(|seed| {
            let config = ExperimentConfig {
                seed,
                spurious_floor: 0,
                spurious_fraction: 0.0,
                max_iterations: 6,
                ..level_only()
            };
            search_tank(config, &oracle)
        })
        .filter(|result| result.random_policy_suspected)
        .collect();
    assert!(!flagged.is_empty());
    assert!(flagged.iter().all(|result| result.spurious > 0));
}

#[test]
fn default_thresholds_tolerate_a_single_spurious_flip() {
    init_logging();
    let oracle = UniformOracle::new().with_float("level", 20.0, 100.0);
    let config = ExperimentConfig {
        max_iterations: 1,
        ..level_only()
    };
    let result = search_tank(config, &oracle);
    assert!(result.spurious <= 1);
    assert!(!result.random_policy_suspected);
}

#[test]
fn drained_starts_are_skipped_as_degenerate() {
    init_logging();
    let oracle = UniformOracle::new().with_float("level", -50.0, 0.0);
    let config = ExperimentConfig {
        max_iterations: 5,
        ..level_only()
    };
    let result = search_tank(config, &oracle);
    assert!(result.degenerate_replays > 0);
    assert_eq!(result.degenerate_replays, result.interventions);
    assert_eq!(result.spurious, 0);
    assert!(result.explanation.is_none());
}

#[test]
fn frozen_ball_windows_are_dumped_for_inspection() {
    init_logging();
    let start = PaddleState::default().with_ball(Vec2::new(40.0, 100.0), Vec2::new(0.0, 0.0));
    let game = PaddleGame::default().with_initial_state(start);
    let pairs = record_episode(&game, &mut StayAlive, 3, 12, &CancelToken::new())
        .expect("episode records");
    let trace = Trace::from_pairs(&pairs).expect("trace builds");
    let oracle = UniformOracle::new().with_float("balls[].position.x", 0.0, 160.0);
    let outdir = scratch("stagnant");
    let config = ExperimentConfig {
        exclusions: vec![
            r"balls\[\d+\]\.(position\.y|velocity)".to_string(),
            "paddle".to_string(),
            "score".to_string(),
            "lives".to_string(),
        ],
        repetitions: 4,
        max_iterations: 4,
        parallel: false,
        outdir: Some(outdir.clone()),
        ..ExperimentConfig::default()
    };

    let report = Experiment::new(&game, StayAlive, &trace, &oracle)
        .with_config(config)
        .run(&BallOutcome::HitBall, &BallOutcome::MissedBall)
        .expect("stagnant windows do not abort the search");

    let result = &report.result;
    assert!(result.stagnant_windows > 0);
    assert!(!result.is_explained());
    let dumped = fs::read_dir(outdir.join("debug").join("HitBall"))
        .expect("debug frames written")
        .count();
    assert_eq!(dumped, result.stagnant_windows);
    fs::remove_dir_all(outdir).expect("scratch removed");
}
