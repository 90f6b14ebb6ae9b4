//! Experiment configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::generator::GeneratorConfig;

/// Tunables for one explanation search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Requested lookback before the outcome.
    #[serde(default = "ExperimentConfig::default_timelag")]
    pub timelag: usize,
    #[serde(default = "ExperimentConfig::default_seed")]
    pub seed: u64,
    /// Replays per arm when estimating outcome frequencies.
    #[serde(default = "ExperimentConfig::default_repetitions")]
    pub repetitions: usize,
    /// Minimum `|odds_ratio - 1|` for a confirmed explanation.
    #[serde(default = "ExperimentConfig::default_odds_ratio_threshold")]
    pub odds_ratio_threshold: f64,
    #[serde(default = "ExperimentConfig::default_alpha")]
    pub alpha: f64,
    /// Spurious confirmations tolerated before flagging a random policy.
    #[serde(default = "ExperimentConfig::default_spurious_floor")]
    pub spurious_floor: usize,
    /// Share of mutation points that may turn out spurious before flagging.
    #[serde(default = "ExperimentConfig::default_spurious_fraction")]
    pub spurious_fraction: f64,
    #[serde(default = "ExperimentConfig::default_discretization_cutoff")]
    pub discretization_cutoff: usize,
    #[serde(default = "ExperimentConfig::default_constant_trials")]
    pub constant_trials: usize,
    #[serde(default = "ExperimentConfig::default_extension_trials")]
    pub extension_trials: usize,
    #[serde(default = "ExperimentConfig::default_max_values_per_variable")]
    pub max_values_per_variable: usize,
    /// Hard ceiling on interventions attempted across all windows.
    #[serde(default = "ExperimentConfig::default_max_iterations")]
    pub max_iterations: usize,
    /// Regexes matched from the start of a mutation point name.
    #[serde(default)]
    pub exclusions: Vec<String>,
    #[serde(default)]
    pub record_json: bool,
    #[serde(default)]
    pub outdir: Option<PathBuf>,
    /// Run the frequency replays on the rayon pool.
    #[serde(default = "ExperimentConfig::default_parallel")]
    pub parallel: bool,
}

impl ExperimentConfig {
    #[must_use]
    pub const fn default_timelag() -> usize {
        1
    }

    #[must_use]
    pub const fn default_seed() -> u64 {
        6_232_020
    }

    #[must_use]
    pub const fn default_repetitions() -> usize {
        100
    }

    #[must_use]
    pub const fn default_odds_ratio_threshold() -> f64 {
        0.1
    }

    #[must_use]
    pub const fn default_alpha() -> f64 {
        0.05
    }

    #[must_use]
    pub const fn default_spurious_floor() -> usize {
        2
    }

    #[must_use]
    pub const fn default_spurious_fraction() -> f64 {
        0.1
    }

    #[must_use]
    pub const fn default_discretization_cutoff() -> usize {
        5
    }

    #[must_use]
    pub const fn default_constant_trials() -> usize {
        10
    }

    #[must_use]
    pub const fn default_extension_trials() -> usize {
        8
    }

    #[must_use]
    pub const fn default_max_values_per_variable() -> usize {
        32
    }

    #[must_use]
    pub const fn default_max_iterations() -> usize {
        10_000
    }

    #[must_use]
    pub const fn default_parallel() -> bool {
        true
    }

    /// Parse a config file; missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed JSON or values failing [`ExperimentConfig::validate`].
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    #[must_use]
    pub const fn generator(&self) -> GeneratorConfig {
        GeneratorConfig {
            discretization_cutoff: self.discretization_cutoff,
            constant_trials: self.constant_trials,
            extension_trials: self.extension_trials,
            max_values_per_variable: self.max_values_per_variable,
        }
    }

    /// Check every field against its documented bounds.
    ///
    /// # Errors
    ///
    /// Returns the first violated bound.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let minimums = [
            ("timelag", self.timelag, 1),
            ("repetitions", self.repetitions, 1),
            ("constant_trials", self.constant_trials, 1),
            ("extension_trials", self.extension_trials, 1),
            ("max_values_per_variable", self.max_values_per_variable, 1),
            ("max_iterations", self.max_iterations, 1),
        ];
        for (field, value, min) in minimums {
            if value < min {
                return Err(ConfigError::MinViolation { field, min, value });
            }
        }
        let ranges = [
            ("alpha", self.alpha, 0.0, 1.0),
            ("spurious_fraction", self.spurious_fraction, 0.0, 1.0),
            ("odds_ratio_threshold", self.odds_ratio_threshold, 0.0, f64::MAX),
        ];
        for (field, value, min, max) in ranges {
            if !(min..=max).contains(&value) {
                return Err(ConfigError::RangeViolation {
                    field,
                    min,
                    max,
                    value,
                });
            }
        }
        if self.record_json && self.outdir.is_none() {
            return Err(ConfigError::MissingOutdir);
        }
        Ok(())
    }
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            timelag: Self::default_timelag(),
            seed: Self::default_seed(),
            repetitions: Self::default_repetitions(),
            odds_ratio_threshold: Self::default_odds_ratio_threshold(),
            alpha: Self::default_alpha(),
            spurious_floor: Self::default_spurious_floor(),
            spurious_fraction: Self::default_spurious_fraction(),
            discretization_cutoff: Self::default_discretization_cutoff(),
            constant_trials: Self::default_constant_trials(),
            extension_trials: Self::default_extension_trials(),
            max_values_per_variable: Self::default_max_values_per_variable(),
            max_iterations: Self::default_max_iterations(),
            exclusions: Vec::new(),
            record_json: false,
            outdir: None,
            parallel: Self::default_parallel(),
        }
    }
}

/// Errors raised when experiment configuration invariants are violated.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field} must be at least {min} (got {value})")]
    MinViolation {
        field: &'static str,
        min: usize,
        value: usize,
    },
    #[error("{field} must be between {min:.2} and {max:.2} (got {value:.2})")]
    RangeViolation {
        field: &'static str,
        min: f64,
        max: f64,
        value: f64,
    },
    #[error("record_json requires an outdir")]
    MissingOutdir,
    #[error("invalid config file: {0}")]
    Parse(#[from] serde_json::Error),
}
