//! Mutation point enumeration.

use std::collections::BTreeSet;

use regex::Regex;
use thiserror::Error;

use crate::property::PropertyError;
use crate::state::GameState;
use crate::vars::VariableGraph;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("state exposes no mutable fields")]
    NoMutableFields,
    #[error(transparent)]
    Property(#[from] PropertyError),
}

/// User-supplied exclusion patterns, anchored at the start of the name.
#[derive(Debug, Clone, Default)]
pub struct Exclusions {
    patterns: Vec<(String, Option<Regex>)>,
}

impl Exclusions {
    /// Compile `patterns`. Invalid ones are logged and never match.
    pub fn new<I, P>(patterns: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|pattern| {
                let source = pattern.as_ref().to_string();
                let compiled = match Regex::new(&format!("^(?:{source})")) {
                    Ok(regex) => Some(regex),
                    Err(err) => {
                        log::warn!("ignoring exclusion '{source}': {err}");
                        None
                    }
                };
                (source, compiled)
            })
            .collect();
        Self { patterns }
    }

    #[must_use]
    pub fn excludes(&self, name: &str) -> bool {
        self.patterns
            .iter()
            .any(|(_, regex)| regex.as_ref().is_some_and(|r| r.is_match(name)))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(|(source, _)| source.as_str())
    }
}

/// Variable names eligible for intervention at one trace offset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationPointSet {
    points: BTreeSet<String>,
}

impl MutationPointSet {
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.points.contains(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.points.iter().map(String::as_str)
    }

    /// Permanently drop `name` from this set; returns whether it was present.
    pub fn retire(&mut self, name: &str) -> bool {
        self.points.remove(name)
    }
}

impl FromIterator<String> for MutationPointSet {
    fn from_iter<T: IntoIterator<Item = String>>(iter: T) -> Self {
        Self {
            points: iter.into_iter().collect(),
        }
    }
}

/// Every comparable, non-immutable leaf of `state` plus every registered
/// composite readable on it, minus anything `exclusions` matches.
///
/// # Errors
///
/// Returns [`RegistryError::NoMutableFields`] when the state declares no mutable
/// leaf at all; callers must treat that as fatal.
pub fn enumerate<S: GameState>(
    state: &S,
    exclusions: &Exclusions,
    graph: &VariableGraph,
) -> Result<MutationPointSet, RegistryError> {
    let document = state.document()?;
    let leaves = document.mutable_leaves();
    if leaves.is_empty() {
        return Err(RegistryError::NoMutableFields);
    }

    let mut points = BTreeSet::new();
    for path in leaves {
        let name = path.to_string();
        if !exclusions.excludes(&name) {
            points.insert(name);
        }
    }
    for name in graph.names() {
        if exclusions.excludes(name) {
            continue;
        }
        match graph.resolve(name).and_then(|var| var.get(state)) {
            Ok(_) => {
                points.insert(name.to_string());
            }
            Err(err) => log::debug!("composite {name} not available here: {err}"),
        }
    }
    log::debug!("enumerated {} mutation points", points.len());
    Ok(MutationPointSet { points })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::{FieldSchema, Schema};
    use crate::sandbox::PaddleState;
    use crate::vars::AbsDifference;
    use serde::{Deserialize, Serialize};
    use std::sync::OnceLock;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Frozen {
        width: f64,
    }

    impl GameState for Frozen {
        fn schema() -> &'static Schema {
            static SCHEMA: OnceLock<Schema> = OnceLock::new();
            SCHEMA.get_or_init(|| Schema::record([FieldSchema::immutable("width", Schema::Float)]))
        }
    }

    #[test]
    fn enumeration_is_deterministic_and_skips_frozen_fields() {
        let state = PaddleState::default();
        let graph = VariableGraph::new();
        let a = enumerate(&state, &Exclusions::default(), &graph).unwrap();
        let b = enumerate(&state, &Exclusions::default(), &graph).unwrap();
        assert_eq!(a, b);
        assert!(a.contains("balls[0].position.x"));
        assert!(a.contains("paddle.position.x"));
        assert!(a.contains("lives"));
        assert!(!a.contains("paddle.speed"));
        assert!(!a.contains("frame"));
        assert!(!a.iter().any(|name| name.starts_with("court")));
    }

    #[test]
    fn exclusions_match_from_the_start() {
        let state = PaddleState::default();
        let exclusions = Exclusions::new(["balls", "position"]);
        let points = enumerate(&state, &exclusions, &VariableGraph::new()).unwrap();
        assert!(!points.iter().any(|name| name.starts_with("balls")));
        // "position" only matches at the start, so nested positions survive.
        assert!(points.contains("paddle.position.x"));
    }

    #[test]
    fn malformed_pattern_is_ignored() {
        let exclusions = Exclusions::new(["balls[", "lives"]);
        assert!(!exclusions.excludes("balls[0].position.x"));
        assert!(exclusions.excludes("lives"));
    }

    #[test]
    fn composites_join_when_readable() {
        let mut graph = VariableGraph::new();
        graph
            .register(
                "xdist_ball_paddle",
                &["balls[0].position.x", "paddle.position.x"],
                AbsDifference,
            )
            .unwrap();
        let with_ball = enumerate(&PaddleState::default(), &Exclusions::default(), &graph).unwrap();
        assert!(with_ball.contains("xdist_ball_paddle"));
        let empty = PaddleState::default().without_balls();
        let without = enumerate(&empty, &Exclusions::default(), &graph).unwrap();
        assert!(!without.contains("xdist_ball_paddle"));
    }

    #[test]
    fn state_without_mutable_fields_is_fatal() {
        let graph = VariableGraph::new();
        let err = enumerate(&Frozen { width: 1.0 }, &Exclusions::default(), &graph);
        assert!(matches!(err, Err(RegistryError::NoMutableFields)));
    }

    #[test]
    fn retire_removes_points() {
        let mut points: MutationPointSet = ["a".to_string(), "b".to_string()].into_iter().collect();
        assert!(points.retire("a"));
        assert!(!points.retire("a"));
        assert_eq!(points.len(), 1);
    }
}
