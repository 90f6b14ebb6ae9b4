//! Game-state snapshots and the action vocabulary shared with simulations.

use std::collections::BTreeSet;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::property::{Document, PropertyError, PropertyPath, Schema, Value};

/// Errors raised while encoding or decoding snapshots.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to encode state: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode state: {0}")]
    Decode(#[source] serde_json::Error),
}

/// How two snapshots are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EqualityMode {
    /// Plain structural equality over comparable fields.
    #[default]
    Exact,
    /// Set-based comparison yielding the differing property paths.
    Set,
}

/// Result of comparing two snapshots under an [`EqualityMode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Comparison {
    Equal(bool),
    Diff(BTreeSet<PropertyPath>),
}

impl Comparison {
    #[must_use]
    pub fn is_equal(&self) -> bool {
        match self {
            Self::Equal(eq) => *eq,
            Self::Diff(paths) => paths.is_empty(),
        }
    }

    #[must_use]
    pub fn into_diff(self) -> BTreeSet<PropertyPath> {
        match self {
            Self::Diff(paths) => paths,
            Self::Equal(_) => BTreeSet::new(),
        }
    }
}

/// Structured snapshot of one simulation tick.
///
/// The canonical encoding is the type's serde JSON form; every property
/// read or write goes through a [`Document`] checked against [`GameState::schema`].
pub trait GameState:
    Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Declared shape: which fields are meaningful game variables and which are frozen.
    fn schema() -> &'static Schema;

    /// Serialize to the canonical byte encoding.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    fn encode(&self) -> Result<Vec<u8>, StateError> {
        serde_json::to_vec(self).map_err(StateError::Encode)
    }

    /// Rebuild a state from its canonical byte encoding.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed input.
    fn decode(bytes: &[u8]) -> Result<Self, StateError> {
        serde_json::from_slice(bytes).map_err(StateError::Decode)
    }

    /// Schema-aware view used for path resolution.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be serialized.
    fn document(&self) -> Result<Document<'static>, PropertyError> {
        Ok(Document::new(serde_json::to_value(self)?, Self::schema()))
    }

    /// Read a leaf property.
    ///
    /// # Errors
    ///
    /// Returns [`PropertyError::NotFound`] if the path cannot be resolved.
    fn get_property(&self, path: &PropertyPath) -> Result<Value, PropertyError> {
        self.document()?.get(path)
    }

    /// Write a leaf property in place.
    ///
    /// # Errors
    ///
    /// Returns an error if the path cannot be resolved, the value does not fit
    /// the declared type, or the edited document no longer decodes.
    fn set_property(&mut self, path: &PropertyPath, value: &Value) -> Result<(), PropertyError> {
        let mut document = self.document()?;
        document.set(path, value)?;
        *self = serde_json::from_value(document.into_json())?;
        Ok(())
    }

    /// Number of elements in a collection property.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is not a list.
    fn collection_len(&self, path: &PropertyPath) -> Result<usize, PropertyError> {
        self.document()?.len(path)
    }

    /// Compare with another snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if either state cannot be serialized.
    fn compare(&self, other: &Self, mode: EqualityMode) -> Result<Comparison, PropertyError> {
        let diff = self.document()?.diff(&other.document()?);
        Ok(match mode {
            EqualityMode::Exact => Comparison::Equal(diff.is_empty()),
            EqualityMode::Set => Comparison::Diff(diff),
        })
    }
}

/// Structured controller input.
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Input {
    #[serde(default)]
    pub left: bool,
    #[serde(default)]
    pub right: bool,
    #[serde(default)]
    pub up: bool,
    #[serde(default)]
    pub down: bool,
    #[serde(default)]
    pub button1: bool,
    #[serde(default)]
    pub button2: bool,
}

/// One action applied to a simulation: either a controller input or an
/// integer action code (ALE numbering: 0 NOOP, 1 FIRE, 2 RIGHT, 3 LEFT).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Input(Input),
    Code(i64),
}

impl Action {
    pub const NOOP: i64 = 0;
    pub const FIRE: i64 = 1;
    pub const RIGHT: i64 = 2;
    pub const LEFT: i64 = 3;

    /// Direction name of the action, `FIRE` when only a button is held, else `NOOP`.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Input(input) => {
                if input.left {
                    "LEFT"
                } else if input.right {
                    "RIGHT"
                } else if input.up {
                    "UP"
                } else if input.down {
                    "DOWN"
                } else if input.button1 || input.button2 {
                    "FIRE"
                } else {
                    "NOOP"
                }
            }
            Self::Code(Self::FIRE) => "FIRE",
            Self::Code(Self::RIGHT) => "RIGHT",
            Self::Code(Self::LEFT) => "LEFT",
            Self::Code(_) => "NOOP",
        }
    }

    /// Normalize to a controller input.
    #[must_use]
    pub fn to_input(&self) -> Input {
        match self {
            Self::Input(input) => *input,
            Self::Code(code) => Input {
                left: *code == Self::LEFT,
                right: *code == Self::RIGHT,
                button1: *code == Self::FIRE,
                ..Input::default()
            },
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A snapshot paired with the action that produced it.
pub type StateAction<S> = (S, Action);
