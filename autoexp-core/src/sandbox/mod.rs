//! Small deterministic paddle-and-ball court with scripted agents.
//!
//! Used to exercise the search end to end without an external engine.

pub mod agents;
pub mod paddle;

pub use agents::{MoveOnlyFalling, ScriptedAgent, StayAlive, StayAliveJitter};
pub use paddle::{Ball, Court, Paddle, PaddleContext, PaddleGame, PaddleState, Vec2};
