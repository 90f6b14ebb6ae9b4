use std::sync::OnceLock;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};

use crate::outcomes::BallCourt;
use crate::property::{FieldSchema, Schema};
use crate::sim::{Simulation, SimulationContext, SimulationError};
use crate::state::{Action, GameState};

pub const COURT_WIDTH: f64 = 160.0;
pub const COURT_HEIGHT: f64 = 210.0;
pub const PADDLE_Y: f64 = 190.0;
pub const PADDLE_WIDTH: f64 = 24.0;
pub const PADDLE_SPEED: f64 = 4.0;
pub const SERVE_X: f64 = 80.0;
pub const SERVE_Y: f64 = 100.0;
pub const BALL_SPEED_X: f64 = 2.0;
pub const BALL_SPEED_Y: f64 = 3.0;
pub const STARTING_LIVES: i64 = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f64,
    pub y: f64,
}

impl Vec2 {
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ball {
    pub position: Vec2,
    pub velocity: Vec2,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Paddle {
    pub position: Vec2,
    pub speed: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Court {
    pub width: f64,
    pub height: f64,
}

/// One tick of the paddle court. `y` grows downward; the paddle sits near the bottom.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaddleState {
    pub balls: Vec<Ball>,
    pub paddle: Paddle,
    pub paddle_width: f64,
    pub score: i64,
    pub lives: i64,
    pub frame: i64,
    pub court: Court,
}

impl Default for PaddleState {
    fn default() -> Self {
        Self {
            balls: vec![Ball {
                position: Vec2::new(SERVE_X, SERVE_Y),
                velocity: Vec2::new(BALL_SPEED_X, BALL_SPEED_Y),
            }],
            paddle: Paddle {
                position: Vec2::new(COURT_WIDTH / 2.0, PADDLE_Y),
                speed: PADDLE_SPEED,
            },
            paddle_width: PADDLE_WIDTH,
            score: 0,
            lives: STARTING_LIVES,
            frame: 0,
            court: Court {
                width: COURT_WIDTH,
                height: COURT_HEIGHT,
            },
        }
    }
}

impl PaddleState {
    /// Place a single ball at `position` moving with `velocity`.
    #[must_use]
    pub fn with_ball(mut self, position: Vec2, velocity: Vec2) -> Self {
        self.balls = vec![Ball { position, velocity }];
        self
    }

    #[must_use]
    pub fn without_balls(mut self) -> Self {
        self.balls.clear();
        self
    }

    #[must_use]
    pub fn with_paddle_x(mut self, x: f64) -> Self {
        self.paddle.position.x = x;
        self
    }

    #[must_use]
    pub fn episode_over(&self) -> bool {
        self.lives <= 0 && self.balls.is_empty()
    }

    /// Advance one tick under `action`, using `rng` for serve direction.
    pub fn step(&mut self, action: &Action, rng: &mut ChaCha20Rng) {
        let input = action.to_input();
        self.frame += 1;

        let half = self.paddle_width / 2.0;
        if input.left {
            self.paddle.position.x -= self.paddle.speed;
        }
        if input.right {
            self.paddle.position.x += self.paddle.speed;
        }
        self.paddle.position.x = self
            .paddle
            .position
            .x
            .clamp(half, (self.court.width - half).max(half));

        if self.balls.is_empty() {
            if input.button1 && self.lives > 0 {
                let direction = if rng.gen_bool(0.5) { 1.0 } else { -1.0 };
                self.balls.push(Ball {
                    position: Vec2::new(SERVE_X, SERVE_Y),
                    velocity: Vec2::new(direction * BALL_SPEED_X, BALL_SPEED_Y),
                });
            }
            return;
        }

        let paddle = self.paddle.position;
        let mut hits = 0;
        for ball in &mut self.balls {
            let prev_y = ball.position.y;
            ball.position.x += ball.velocity.x;
            ball.position.y += ball.velocity.y;

            if ball.position.x < 0.0 {
                ball.position.x = -ball.position.x;
                ball.velocity.x = -ball.velocity.x;
            } else if ball.position.x > self.court.width {
                ball.position.x = 2.0 * self.court.width - ball.position.x;
                ball.velocity.x = -ball.velocity.x;
            }
            if ball.position.y < 0.0 {
                ball.position.y = -ball.position.y;
                ball.velocity.y = -ball.velocity.y;
            }

            let crossing =
                ball.velocity.y > 0.0 && prev_y <= paddle.y && ball.position.y >= paddle.y;
            if crossing && (ball.position.x - paddle.x).abs() <= half {
                ball.position.y = 2.0 * paddle.y - ball.position.y;
                ball.velocity.y = -ball.velocity.y;
                hits += 1;
            }
        }
        self.score += hits;

        let before = self.balls.len();
        let floor = self.court.height;
        self.balls.retain(|ball| ball.position.y <= floor);
        let lost = before - self.balls.len();
        self.lives -= i64::try_from(lost).unwrap_or(i64::MAX);
    }
}

impl BallCourt for PaddleState {
    fn ball_count(&self) -> usize {
        self.balls.len()
    }

    fn ball_position(&self) -> Option<(f64, f64)> {
        self.balls
            .first()
            .map(|ball| (ball.position.x, ball.position.y))
    }

    fn paddle_position(&self) -> (f64, f64) {
        (self.paddle.position.x, self.paddle.position.y)
    }

    fn paddle_width(&self) -> f64 {
        self.paddle_width
    }
}

fn vec2_schema() -> Schema {
    Schema::record([
        FieldSchema::comparable("x", Schema::Float),
        FieldSchema::comparable("y", Schema::Float),
    ])
}

impl GameState for PaddleState {
    fn schema() -> &'static Schema {
        static SCHEMA: OnceLock<Schema> = OnceLock::new();
        SCHEMA.get_or_init(|| {
            Schema::record([
                FieldSchema::comparable(
                    "balls",
                    Schema::list(Schema::record([
                        FieldSchema::comparable("position", vec2_schema()),
                        FieldSchema::comparable("velocity", vec2_schema()),
                    ])),
                ),
                FieldSchema::comparable(
                    "paddle",
                    Schema::record([
                        FieldSchema::comparable("position", vec2_schema()),
                        FieldSchema::immutable("speed", Schema::Float),
                    ]),
                ),
                FieldSchema::comparable("paddle_width", Schema::Float),
                FieldSchema::comparable("score", Schema::Int),
                FieldSchema::comparable("lives", Schema::Int),
                FieldSchema::internal("frame", Schema::Int),
                FieldSchema::immutable(
                    "court",
                    Schema::record([
                        FieldSchema::comparable("width", Schema::Float),
                        FieldSchema::comparable("height", Schema::Float),
                    ]),
                ),
            ])
        })
    }
}

/// Factory for paddle-court contexts.
#[derive(Debug, Clone, Default)]
pub struct PaddleGame {
    initial: Option<PaddleState>,
}

impl PaddleGame {
    pub const NAME: &'static str = "paddle";

    /// Use `state` instead of the default court when no starting state is given.
    #[must_use]
    pub fn with_initial_state(mut self, state: PaddleState) -> Self {
        self.initial = Some(state);
        self
    }
}

impl Simulation for PaddleGame {
    type State = PaddleState;
    type Context = PaddleContext;

    fn game_name(&self) -> &str {
        Self::NAME
    }

    fn new_context(
        &self,
        seed: Option<u64>,
        initial_state: Option<&PaddleState>,
    ) -> Result<PaddleContext, SimulationError> {
        let state = initial_state
            .or(self.initial.as_ref())
            .cloned()
            .unwrap_or_default();
        Ok(PaddleContext {
            state,
            rng: ChaCha20Rng::seed_from_u64(seed.unwrap_or(0)),
        })
    }
}

/// Live paddle-court instance.
#[derive(Debug, Clone)]
pub struct PaddleContext {
    state: PaddleState,
    rng: ChaCha20Rng,
}

impl SimulationContext for PaddleContext {
    type State = PaddleState;

    fn apply_action(&mut self, action: &Action) -> Result<(), SimulationError> {
        if self.state.episode_over() {
            return Err(SimulationError::IllegalAction {
                action: action.to_string(),
                reason: "episode is over".to_string(),
            });
        }
        self.state.step(action, &mut self.rng);
        Ok(())
    }

    fn state_snapshot(&self) -> Result<Vec<u8>, SimulationError> {
        Ok(self.state.encode()?)
    }

    fn load_snapshot(&mut self, bytes: &[u8]) -> Result<(), SimulationError> {
        self.state = PaddleState::decode(bytes)?;
        Ok(())
    }

    fn episode_over(&self) -> bool {
        self.state.episode_over()
    }

    fn legal_actions(&self) -> Vec<i64> {
        vec![Action::NOOP, Action::FIRE, Action::RIGHT, Action::LEFT]
    }

    fn state(&self) -> Result<PaddleState, SimulationError> {
        Ok(self.state.clone())
    }
}
