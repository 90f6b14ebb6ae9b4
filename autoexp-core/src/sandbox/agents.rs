use std::fmt;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

use super::paddle::PaddleState;
use crate::sim::Agent;
use crate::state::{Action, Input};

fn chase(input: &mut Input, ball_x: f64, paddle_x: f64) {
    if ball_x < paddle_x {
        input.left = true;
    } else if ball_x > paddle_x {
        input.right = true;
    }
}

fn serve_input() -> Input {
    Input {
        button1: true,
        ..Input::default()
    }
}

/// Follows the first ball's x position every tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct StayAlive;

impl Agent<PaddleState> for StayAlive {
    fn name(&self) -> &str {
        "StayAlive"
    }

    fn reset(&mut self, _seed: u64) {}

    fn act(&mut self, state: &PaddleState, _legal_actions: &[i64]) -> Option<Action> {
        let mut input = serve_input();
        if let Some(ball) = state.balls.first() {
            chase(&mut input, ball.position.x, state.paddle.position.x);
        }
        Some(Action::Input(input))
    }
}

/// Chases the ball only while it drifts further away, and sometimes not at all.
#[derive(Debug, Clone)]
pub struct StayAliveJitter {
    jitter: f64,
    prev_ball_x: Option<f64>,
    rng: ChaCha20Rng,
}

impl StayAliveJitter {
    pub const DEFAULT_JITTER: f64 = 0.3;

    #[must_use]
    pub fn new(jitter: f64, seed: u64) -> Self {
        Self {
            jitter: jitter.clamp(0.0, 1.0),
            prev_ball_x: None,
            rng: ChaCha20Rng::seed_from_u64(seed),
        }
    }
}

impl Default for StayAliveJitter {
    fn default() -> Self {
        Self::new(Self::DEFAULT_JITTER, 0)
    }
}

impl Agent<PaddleState> for StayAliveJitter {
    fn name(&self) -> &str {
        "StayAliveJitter"
    }

    fn reset(&mut self, seed: u64) {
        self.prev_ball_x = None;
        self.rng = ChaCha20Rng::seed_from_u64(seed);
    }

    fn act(&mut self, state: &PaddleState, _legal_actions: &[i64]) -> Option<Action> {
        let mut input = serve_input();
        let Some(ball) = state.balls.first() else {
            return Some(Action::Input(input));
        };
        let ball_x = ball.position.x;
        let paddle_x = state.paddle.position.x;
        let prev = *self.prev_ball_x.get_or_insert(ball_x);
        let follow = 1.0 - self.jitter;

        if ball_x < paddle_x && ball_x < prev && self.rng.gen_bool(follow) {
            input.left = true;
        } else if ball_x > paddle_x && ball_x > prev && self.rng.gen_bool(follow) {
            input.right = true;
        }
        self.prev_ball_x = Some(ball_x);
        Some(Action::Input(input))
    }
}

/// Chases the ball only while it is falling toward the paddle.
#[derive(Debug, Clone, Copy, Default)]
pub struct MoveOnlyFalling {
    prev_ball_y: Option<f64>,
    moving_down: bool,
}

impl Agent<PaddleState> for MoveOnlyFalling {
    fn name(&self) -> &str {
        "MoveOnlyFalling"
    }

    fn reset(&mut self, _seed: u64) {
        self.prev_ball_y = None;
        self.moving_down = false;
    }

    fn act(&mut self, state: &PaddleState, _legal_actions: &[i64]) -> Option<Action> {
        let mut input = serve_input();
        let Some(ball) = state.balls.first() else {
            return Some(Action::Input(input));
        };
        let ball_y = ball.position.y;
        if let Some(prev) = self.prev_ball_y {
            self.moving_down = ball_y > prev;
        }
        self.prev_ball_y = Some(ball_y);

        if self.moving_down {
            chase(&mut input, ball.position.x, state.paddle.position.x);
        }
        Some(Action::Input(input))
    }
}

/// Any of the built-in scripted paddle agents.
#[derive(Debug, Clone)]
pub enum ScriptedAgent {
    StayAlive(StayAlive),
    StayAliveJitter(StayAliveJitter),
    MoveOnlyFalling(MoveOnlyFalling),
}

impl ScriptedAgent {
    pub const NAMES: [&'static str; 3] = ["StayAlive", "StayAliveJitter", "MoveOnlyFalling"];

    /// Build an agent by (case-insensitive) name.
    #[must_use]
    pub fn from_name(name: &str, seed: u64) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "stayalive" => Some(Self::StayAlive(StayAlive)),
            "stayalivejitter" => Some(Self::StayAliveJitter(StayAliveJitter::new(
                StayAliveJitter::DEFAULT_JITTER,
                seed,
            ))),
            "moveonlyfalling" => Some(Self::MoveOnlyFalling(MoveOnlyFalling::default())),
            _ => None,
        }
    }

    fn inner(&mut self) -> &mut dyn Agent<PaddleState> {
        match self {
            Self::StayAlive(agent) => agent,
            Self::StayAliveJitter(agent) => agent,
            Self::MoveOnlyFalling(agent) => agent,
        }
    }
}

impl Agent<PaddleState> for ScriptedAgent {
    fn name(&self) -> &str {
        match self {
            Self::StayAlive(agent) => agent.name(),
            Self::StayAliveJitter(agent) => agent.name(),
            Self::MoveOnlyFalling(agent) => agent.name(),
        }
    }

    fn reset(&mut self, seed: u64) {
        self.inner().reset(seed);
    }

    fn act(&mut self, state: &PaddleState, legal_actions: &[i64]) -> Option<Action> {
        self.inner().act(state, legal_actions)
    }
}

impl fmt::Display for ScriptedAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
