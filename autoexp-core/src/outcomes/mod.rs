//! Outcome predicates over windows of (state, action) pairs.

mod ball;

use thiserror::Error;

pub use ball::{AimSide, BallCourt, BallOutcome};

use crate::property::PropertyError;
use crate::state::StateAction;

#[derive(Debug, Error)]
pub enum OutcomeError {
    #[error("need at least {expecting} states to determine {outcome}; got {got}")]
    InadequateWindow {
        outcome: String,
        got: usize,
        expecting: usize,
    },
    #[error("{outcome}: ball never moved vertically across {} frames", .frames.len())]
    StagnantBall {
        outcome: String,
        frames: Vec<serde_json::Value>,
    },
    #[error("unknown outcome '{0}'")]
    Unknown(String),
    #[error(transparent)]
    Property(#[from] PropertyError),
}

/// Boolean behavior observed over a window. Never mutates its input.
pub trait Outcome<S>: Send + Sync {
    /// Stable name, also used for debug directories.
    fn name(&self) -> String;

    /// Smallest window the predicate can decide.
    fn min_window(&self) -> usize;

    /// # Errors
    ///
    /// [`OutcomeError::InadequateWindow`] for windows shorter than
    /// [`Outcome::min_window`], or a predicate-specific ambiguity error.
    fn evaluate(&self, window: &[StateAction<S>]) -> Result<bool, OutcomeError>;
}

/// Reject windows shorter than the outcome's minimum.
///
/// # Errors
///
/// Returns [`OutcomeError::InadequateWindow`] carrying observed vs required length.
pub fn check_window<S, O>(outcome: &O, window: &[StateAction<S>]) -> Result<(), OutcomeError>
where
    O: Outcome<S> + ?Sized,
{
    let expecting = outcome.min_window();
    if window.len() < expecting {
        return Err(OutcomeError::InadequateWindow {
            outcome: outcome.name(),
            got: window.len(),
            expecting,
        });
    }
    Ok(())
}

/// Slide a `min_window + 1` window over `pairs`; at the first match return the
/// (up to `window`-long) suffix that ends there.
///
/// Ambiguous windows count as no match.
///
/// # Errors
///
/// Propagates property errors raised by the predicate.
pub fn find_outcome_window<S, O>(
    outcome: &O,
    pairs: &[StateAction<S>],
    window: usize,
) -> Result<Option<Vec<StateAction<S>>>, OutcomeError>
where
    S: Clone,
    O: Outcome<S> + ?Sized,
{
    let span = outcome.min_window() + 1;
    if pairs.len() < span {
        return Ok(None);
    }
    for end in span..=pairs.len() {
        let matched = match outcome.evaluate(&pairs[end - span..end]) {
            Ok(matched) => matched,
            Err(OutcomeError::StagnantBall { .. }) => false,
            Err(err) => return Err(err),
        };
        if matched {
            let start = end.saturating_sub(window);
            return Ok(Some(pairs[start..end].to_vec()));
        }
    }
    Ok(None)
}
