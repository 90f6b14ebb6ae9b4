//! Recorded (state, action) sequences ending in an observed outcome.
//!
//! Frames are stored in their canonical encoding and decoded on every access,
//! so each caller gets its own state objects and replays never alias.

use std::marker::PhantomData;
use std::ops::Range;

use thiserror::Error;

use crate::sim::{Simulation, SimulationContext, SimulationError};
use crate::state::{Action, GameState, StateAction, StateError};

/// Errors raised while building or reading a trace.
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("trace needs at least {expecting} frames, got {got}")]
    TooShort { got: usize, expecting: usize },
    #[error("lookback {lookback} outside history of {history} frames")]
    LookbackOutOfRange { lookback: usize, history: usize },
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Simulation(#[from] SimulationError),
}

#[derive(Debug, Clone)]
struct Frame {
    snapshot: Vec<u8>,
    action: Action,
}

/// `full = history ++ [outcome_state]`.
#[derive(Debug, Clone)]
pub struct Trace<S> {
    frames: Vec<Frame>,
    _state: PhantomData<fn() -> S>,
}

impl<S: GameState> Trace<S> {
    /// Encode a recorded window. At least one history frame and the outcome frame are required.
    ///
    /// # Errors
    ///
    /// Returns an error if the window is too short or a state fails to encode.
    pub fn from_pairs(pairs: &[StateAction<S>]) -> Result<Self, TraceError> {
        if pairs.len() < 2 {
            return Err(TraceError::TooShort {
                got: pairs.len(),
                expecting: 2,
            });
        }
        let frames = pairs
            .iter()
            .map(|(state, action)| {
                Ok(Frame {
                    snapshot: state.encode()?,
                    action: action.clone(),
                })
            })
            .collect::<Result<Vec<_>, StateError>>()?;
        Ok(Self {
            frames,
            _state: PhantomData,
        })
    }

    /// Length of `full`.
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Length of `history`; also the largest usable lookback.
    #[must_use]
    pub fn history_len(&self) -> usize {
        self.frames.len().saturating_sub(1)
    }

    fn decode(&self, index: usize) -> Result<StateAction<S>, TraceError> {
        let frame = self.frames.get(index).ok_or(TraceError::LookbackOutOfRange {
            lookback: index,
            history: self.history_len(),
        })?;
        Ok((S::decode(&frame.snapshot)?, frame.action.clone()))
    }

    fn lookback_index(&self, lookback: usize) -> Result<usize, TraceError> {
        let history = self.history_len();
        if lookback == 0 || lookback > history {
            return Err(TraceError::LookbackOutOfRange { lookback, history });
        }
        Ok(history - lookback)
    }

    /// Fresh copy of `history[-lookback]`, the state an intervention is applied to.
    ///
    /// # Errors
    ///
    /// Returns an error if `lookback` is zero or exceeds the history.
    pub fn state_at(&self, lookback: usize) -> Result<S, TraceError> {
        let index = self.lookback_index(lookback)?;
        self.decode(index).map(|(state, _)| state)
    }

    /// Action recorded alongside `history[-lookback]`.
    ///
    /// # Errors
    ///
    /// Returns an error if `lookback` is out of range.
    pub fn action_at(&self, lookback: usize) -> Result<Action, TraceError> {
        let index = self.lookback_index(lookback)?;
        Ok(self.frames[index].action.clone())
    }

    /// Pairs strictly before `history[-lookback]`.
    ///
    /// # Errors
    ///
    /// Returns an error if `lookback` is out of range or a frame fails to decode.
    pub fn prefix_before(&self, lookback: usize) -> Result<Vec<StateAction<S>>, TraceError> {
        let index = self.lookback_index(lookback)?;
        self.window(0..index).collect()
    }

    /// Fresh copy of the final frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame fails to decode.
    pub fn outcome_state(&self) -> Result<StateAction<S>, TraceError> {
        self.decode(self.frames.len() - 1)
    }

    #[must_use]
    pub fn history(&self) -> TraceWindow<'_, S> {
        self.window(0..self.history_len())
    }

    #[must_use]
    pub fn full(&self) -> TraceWindow<'_, S> {
        self.window(0..self.frames.len())
    }

    /// Lazily decoded view over a frame range, clamped to the trace.
    #[must_use]
    pub fn window(&self, range: Range<usize>) -> TraceWindow<'_, S> {
        let end = range.end.min(self.frames.len());
        TraceWindow {
            trace: self,
            range: range.start.min(end)..end,
        }
    }

    #[must_use]
    pub fn actions(&self) -> Vec<Action> {
        self.frames.iter().map(|f| f.action.clone()).collect()
    }

    /// Rewind frame `index` through a fresh simulation context rather than decoding directly.
    ///
    /// # Errors
    ///
    /// Returns an error if the context cannot be created or rejects the snapshot.
    pub fn rehydrate<G>(&self, sim: &G, index: usize) -> Result<S, TraceError>
    where
        G: Simulation<State = S>,
    {
        let frame = self.frames.get(index).ok_or(TraceError::LookbackOutOfRange {
            lookback: index,
            history: self.history_len(),
        })?;
        let mut context = sim.new_context(None, None)?;
        context.load_snapshot(&frame.snapshot)?;
        Ok(context.state()?)
    }
}

/// Iterator decoding trace frames on demand.
pub struct TraceWindow<'t, S> {
    trace: &'t Trace<S>,
    range: Range<usize>,
}

impl<S: GameState> Iterator for TraceWindow<'_, S> {
    type Item = Result<StateAction<S>, TraceError>;

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.range.next()?;
        Some(self.trace.decode(index))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.range.size_hint()
    }
}

impl<S: GameState> ExactSizeIterator for TraceWindow<'_, S> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::{PaddleGame, PaddleState};

    fn pairs(n: usize) -> Vec<StateAction<PaddleState>> {
        (0..n)
            .map(|i| {
                let mut state = PaddleState::default();
                state.score = i64::try_from(i).unwrap();
                (state, Action::Code(Action::NOOP))
            })
            .collect()
    }

    #[test]
    fn splits_history_and_outcome() {
        let trace = Trace::from_pairs(&pairs(5)).unwrap();
        assert_eq!(trace.len(), 5);
        assert_eq!(trace.history_len(), 4);
        assert_eq!(trace.outcome_state().unwrap().0.score, 4);
        assert_eq!(trace.state_at(1).unwrap().score, 3);
        assert_eq!(trace.state_at(4).unwrap().score, 0);
        assert_eq!(trace.history().count(), 4);
        assert_eq!(trace.prefix_before(2).unwrap().len(), 2);
    }

    #[test]
    fn rejects_bad_lookbacks_and_short_traces() {
        let trace = Trace::from_pairs(&pairs(3)).unwrap();
        assert!(matches!(
            trace.state_at(0),
            Err(TraceError::LookbackOutOfRange { .. })
        ));
        assert!(matches!(
            trace.state_at(3),
            Err(TraceError::LookbackOutOfRange { .. })
        ));
        assert!(matches!(
            Trace::from_pairs(&pairs(1)),
            Err(TraceError::TooShort { got: 1, .. })
        ));
    }

    #[test]
    fn accesses_never_alias() {
        let trace = Trace::from_pairs(&pairs(3)).unwrap();
        let mut first = trace.state_at(1).unwrap();
        first.score = 99;
        assert_eq!(trace.state_at(1).unwrap().score, 1);
    }

    #[test]
    fn rehydrates_through_fresh_context() {
        let trace = Trace::from_pairs(&pairs(3)).unwrap();
        let game = PaddleGame::default();
        assert_eq!(trace.rehydrate(&game, 2).unwrap().score, 2);
    }
}
