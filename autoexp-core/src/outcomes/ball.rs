use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use super::{Outcome, OutcomeError, check_window};
use crate::numbers::{approx_eq, sign, usize_to_f64};
use crate::property::PropertyError;
use crate::state::StateAction;

/// Read access to a court with balls and a paddle. `y` grows toward the paddle.
pub trait BallCourt {
    fn ball_count(&self) -> usize;

    /// Position of the first ball, if any.
    fn ball_position(&self) -> Option<(f64, f64)>;

    fn paddle_position(&self) -> (f64, f64);

    fn paddle_width(&self) -> f64;
}

/// Reference point on the paddle for [`BallOutcome::Aim`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AimSide {
    Up,
    Left,
    Right,
}

impl AimSide {
    fn reference<S: BallCourt>(self, state: &S) -> f64 {
        let (x, _) = state.paddle_position();
        let half = state.paddle_width() / 2.0;
        match self {
            Self::Up => x,
            Self::Left => x - half,
            Self::Right => x + half,
        }
    }

    const fn label(self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Left => "left",
            Self::Right => "right",
        }
    }
}

/// Ball-and-paddle behaviors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BallOutcome {
    MissedBall,
    HitBall,
    MoveOpposite,
    MoveSame,
    MoveAway,
    MoveToward,
    Aim(AimSide),
    /// Most recent action has this label (`LEFT`, `FIRE`, ...).
    ActionTaken(String),
}

impl BallOutcome {
    /// The behavior usually paired as this one's counterfactual.
    #[must_use]
    pub fn counterfactual(&self) -> Option<Self> {
        match self {
            Self::MissedBall => Some(Self::HitBall),
            Self::HitBall => Some(Self::MissedBall),
            Self::MoveOpposite => Some(Self::MoveSame),
            Self::MoveSame => Some(Self::MoveOpposite),
            Self::MoveAway => Some(Self::MoveToward),
            Self::MoveToward => Some(Self::MoveAway),
            Self::Aim(AimSide::Left) => Some(Self::Aim(AimSide::Right)),
            Self::Aim(AimSide::Right) => Some(Self::Aim(AimSide::Left)),
            Self::Aim(AimSide::Up) | Self::ActionTaken(_) => None,
        }
    }

    fn missed<S: BallCourt>(window: &[StateAction<S>]) -> bool {
        let last = &window[window.len() - 1].0;
        let pen = &window[window.len() - 2].0;
        if last.ball_count() == 0 && pen.ball_count() > 0 {
            return true;
        }
        match (last.ball_position(), pen.ball_position()) {
            (Some((_, last_y)), Some((_, pen_y))) => {
                last_y > last.paddle_position().1 && pen_y > pen.paddle_position().1
            }
            _ => false,
        }
    }

    fn hit<S: BallCourt + Serialize>(
        &self,
        window: &[StateAction<S>],
    ) -> Result<bool, OutcomeError> {
        let ys: Option<Vec<f64>> = window
            .iter()
            .map(|(state, _)| state.ball_position().map(|(_, y)| y))
            .collect();
        if let Some(ys) = &ys
            && ys.windows(2).all(|pair| approx_eq(pair[0], pair[1]))
        {
            let frames = window
                .iter()
                .map(|(state, _)| serde_json::to_value(state))
                .collect::<Result<Vec<_>, _>>()
                .map_err(PropertyError::from)?;
            return Err(OutcomeError::StagnantBall {
                outcome: self.to_string(),
                frames,
            });
        }

        let mut heading_down: Option<bool> = None;
        for pair in window.windows(2) {
            let (Some((_, y1)), Some((_, y2))) =
                (pair[0].0.ball_position(), pair[1].0.ball_position())
            else {
                return Ok(false);
            };
            let diff = y2 - y1;
            match heading_down {
                None => {
                    if diff < 0.0 {
                        return Ok(false);
                    }
                    if diff > 0.0 {
                        heading_down = Some(true);
                    }
                }
                Some(true) => {
                    if diff < 0.0 {
                        heading_down = Some(false);
                    }
                }
                Some(false) => {
                    if diff > 0.0 {
                        return Ok(false);
                    }
                }
            }
        }
        Ok(heading_down == Some(false))
    }

    /// Net horizontal direction of the ball, `None` if it reverses.
    fn ball_direction<S: BallCourt>(window: &[StateAction<S>]) -> Option<i8> {
        let mut direction = 0;
        for pair in window.windows(2) {
            let (Some((x1, _)), Some((x2, _))) =
                (pair[0].0.ball_position(), pair[1].0.ball_position())
            else {
                continue;
            };
            let diff = x2 - x1;
            if direction == 0 {
                direction = sign(diff);
                continue;
            }
            if diff == 0.0 {
                continue;
            }
            if sign(diff) != direction {
                return None;
            }
        }
        Some(direction)
    }

    fn moves_relative<S: BallCourt>(window: &[StateAction<S>], same: bool) -> bool {
        let Some(direction) = Self::ball_direction(window).filter(|d| *d != 0) else {
            return false;
        };
        let (with, against) = if direction > 0 {
            ("RIGHT", "LEFT")
        } else {
            ("LEFT", "RIGHT")
        };
        let wanted = if same { with } else { against };
        let count = window
            .windows(2)
            .filter(|pair| pair[0].0.ball_count() > 0 && pair[1].0.ball_count() > 0)
            .filter(|pair| pair[1].1.label() == wanted)
            .count();
        usize_to_f64(count) > usize_to_f64(window.len()) / 2.0
    }

    fn moves_distance<S: BallCourt>(window: &[StateAction<S>], away: bool) -> bool {
        let count = window
            .windows(2)
            .filter(|pair| {
                let (s1, s2) = (&pair[0].0, &pair[1].0);
                let (Some((b1, _)), Some((b2, _))) = (s1.ball_position(), s2.ball_position()) else {
                    return false;
                };
                let (p1, _) = s1.paddle_position();
                let (p2, _) = s2.paddle_position();
                let diff = (b2 - p2).abs() - (b1 - p1).abs();
                let moving = p1 - p2 != 0.0;
                moving && if away { diff > 0.0 } else { diff < 0.0 }
            })
            .count();
        usize_to_f64(count) > usize_to_f64(window.len()) / 2.0
    }

    fn aims<S: BallCourt>(window: &[StateAction<S>], side: AimSide) -> bool {
        window.iter().all(|(state, _)| {
            let Some((ball_x, _)) = state.ball_position() else {
                return true;
            };
            let eps = state.paddle_width() / 4.0;
            (side.reference(state) - ball_x).abs() <= eps
        })
    }
}

impl<S: BallCourt + Serialize> Outcome<S> for BallOutcome {
    fn name(&self) -> String {
        self.to_string()
    }

    fn min_window(&self) -> usize {
        match self {
            Self::ActionTaken(_) => 1,
            Self::HitBall => 3,
            Self::MissedBall
            | Self::MoveOpposite
            | Self::MoveSame
            | Self::MoveAway
            | Self::MoveToward
            | Self::Aim(_) => 2,
        }
    }

    fn evaluate(&self, window: &[StateAction<S>]) -> Result<bool, OutcomeError> {
        check_window(self, window)?;
        Ok(match self {
            Self::MissedBall => Self::missed(window),
            Self::HitBall => self.hit(window)?,
            Self::MoveOpposite => Self::moves_relative(window, false),
            Self::MoveSame => Self::moves_relative(window, true),
            Self::MoveAway => Self::moves_distance(window, true),
            Self::MoveToward => Self::moves_distance(window, false),
            Self::Aim(side) => Self::aims(window, *side),
            Self::ActionTaken(label) => window
                .last()
                .is_some_and(|(_, action)| action.label() == label.as_str()),
        })
    }
}

impl fmt::Display for BallOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissedBall => f.write_str("MissedBall"),
            Self::HitBall => f.write_str("HitBall"),
            Self::MoveOpposite => f.write_str("MoveOpposite"),
            Self::MoveSame => f.write_str("MoveSame"),
            Self::MoveAway => f.write_str("MoveAway"),
            Self::MoveToward => f.write_str("MoveToward"),
            Self::Aim(side) => write!(f, "Aim_{}", side.label()),
            Self::ActionTaken(label) => write!(f, "ActionTaken_{label}"),
        }
    }
}

impl FromStr for BallOutcome {
    type Err = OutcomeError;

    /// Accepts `HitBall`, `Aim left`, `Aim:right`, `ActionTaken_LEFT`, case-insensitively.
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let unknown = || OutcomeError::Unknown(input.to_string());
        let mut parts = input
            .split([' ', ':', '_'])
            .filter(|part| !part.is_empty());
        let head = parts.next().ok_or_else(unknown)?.to_ascii_lowercase();
        let arg = parts.next();
        if parts.next().is_some() {
            return Err(unknown());
        }
        let outcome = match (head.as_str(), arg) {
            ("missedball", None) => Self::MissedBall,
            ("hitball", None) => Self::HitBall,
            ("moveopposite", None) => Self::MoveOpposite,
            ("movesame", None) => Self::MoveSame,
            ("moveaway", None) => Self::MoveAway,
            ("movetoward", None) => Self::MoveToward,
            ("aim", Some(side)) => match side.to_ascii_lowercase().as_str() {
                "up" => Self::Aim(AimSide::Up),
                "left" => Self::Aim(AimSide::Left),
                "right" => Self::Aim(AimSide::Right),
                _ => return Err(unknown()),
            },
            ("actiontaken", Some(label)) => Self::ActionTaken(label.to_ascii_uppercase()),
            _ => return Err(unknown()),
        };
        Ok(outcome)
    }
}
