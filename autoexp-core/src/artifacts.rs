//! On-disk replay artifacts.
//!
//! Layout: `{root}/{control|intervened}/{variable}/{value}/{agent}{frame:05}.json`
//! with 1-indexed frames, plus `{root}/debug/{outcome}/{n:05}.json` for
//! ambiguous outcome windows.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::property::Value;
use crate::state::StateAction;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode artifact: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayKind {
    Control,
    Intervened,
}

impl fmt::Display for ReplayKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Control => "control",
            Self::Intervened => "intervened",
        })
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    next_debug: usize,
}

impl ArtifactStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            next_debug: 0,
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn replay_dir(&self, kind: ReplayKind, variable: &str, value: &Value) -> PathBuf {
        self.root
            .join(kind.to_string())
            .join(variable)
            .join(value.to_string())
    }

    fn write_json<T: Serialize + ?Sized>(path: &Path, payload: &T) -> Result<(), ArtifactError> {
        let io = |source| ArtifactError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io)?;
        }
        let bytes = serde_json::to_vec_pretty(payload)?;
        fs::write(path, bytes).map_err(io)
    }

    /// Write every state of a replay, one file per frame.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory or file cannot be written.
    pub fn write_replay<S: Serialize>(
        &self,
        kind: ReplayKind,
        variable: &str,
        value: &Value,
        agent: &str,
        pairs: &[StateAction<S>],
    ) -> Result<Vec<PathBuf>, ArtifactError> {
        let dir = self.replay_dir(kind, variable, value);
        let mut written = Vec::with_capacity(pairs.len());
        for (idx, (state, _)) in pairs.iter().enumerate() {
            let path = dir.join(format!("{agent}{:05}.json", idx + 1));
            Self::write_json(&path, state)?;
            written.push(path);
        }
        Ok(written)
    }

    /// Persist an ambiguous outcome window for later inspection.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write_debug(
        &mut self,
        outcome: &str,
        frames: &[serde_json::Value],
    ) -> Result<PathBuf, ArtifactError> {
        let path = self
            .root
            .join("debug")
            .join(outcome)
            .join(format!("{:05}.json", self.next_debug));
        Self::write_json(&path, frames)?;
        self.next_debug += 1;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Action;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn scratch(tag: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        std::env::temp_dir().join(format!("autoexp-{tag}-{}-{nanos}", std::process::id()))
    }

    #[test]
    fn replay_frames_are_one_indexed_and_padded() {
        let root = scratch("replay");
        let store = ArtifactStore::new(&root);
        let pairs = vec![
            (serde_json::json!({"x": 1}), Action::Code(Action::NOOP)),
            (serde_json::json!({"x": 2}), Action::Code(Action::LEFT)),
        ];
        let written = store
            .write_replay(
                ReplayKind::Intervened,
                "balls[0].position.x",
                &Value::Float(12.5),
                "StayAlive",
                &pairs,
            )
            .unwrap();
        assert_eq!(
            written[0],
            root.join("intervened/balls[0].position.x/12.5/StayAlive00001.json")
        );
        assert!(written[1].ends_with("StayAlive00002.json"));
        let text = fs::read_to_string(&written[1]).unwrap();
        assert!(text.contains('2'));
        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn debug_dumps_are_numbered() {
        let root = scratch("debug");
        let mut store = ArtifactStore::new(&root);
        let frame = serde_json::json!({});
        let first = store.write_debug("HitBall", &[frame]).unwrap();
        let second = store.write_debug("HitBall", &[]).unwrap();
        assert!(first.ends_with("debug/HitBall/00000.json"));
        assert!(second.ends_with("debug/HitBall/00001.json"));
        fs::remove_dir_all(root).unwrap();
    }
}
