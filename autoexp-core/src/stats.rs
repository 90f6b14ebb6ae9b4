//! Significance testing for confirmed interventions.

use serde::{Deserialize, Serialize};

use crate::numbers::usize_to_f64;

/// z for a two-sided 95% interval.
const Z_95: f64 = 1.959_963_984_540_054;
/// Relative slack when comparing table probabilities, matching common implementations.
const P_SLACK: f64 = 1.0 + 1e-7;

/// How often each behavior was observed over repeated replays.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeFrequency {
    pub trials: usize,
    pub factual: usize,
    pub counterfactual: usize,
}

impl OutcomeFrequency {
    #[must_use]
    pub fn factual_rate(&self) -> f64 {
        rate(self.factual, self.trials)
    }

    #[must_use]
    pub fn counterfactual_rate(&self) -> f64 {
        rate(self.counterfactual, self.trials)
    }
}

fn rate(count: usize, trials: usize) -> f64 {
    if trials == 0 {
        0.0
    } else {
        usize_to_f64(count) / usize_to_f64(trials)
    }
}

/// Fisher exact test output on a 2x2 table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FisherResult {
    pub odds_ratio: f64,
    pub p_value: f64,
    /// Woolf 95% interval on the odds ratio, Haldane-corrected.
    pub ci_low: f64,
    pub ci_high: f64,
}

impl FisherResult {
    #[must_use]
    pub fn ci_excludes_one(&self) -> bool {
        self.ci_low > 1.0 || self.ci_high < 1.0
    }
}

fn ln_factorials(n: usize) -> Vec<f64> {
    let mut table = Vec::with_capacity(n + 1);
    let mut acc = 0.0;
    table.push(acc);
    for k in 1..=n {
        acc += usize_to_f64(k).ln();
        table.push(acc);
    }
    table
}

/// Two-sided Fisher exact test on `[[a, b], [c, d]]`.
///
/// Tables with an empty row or column yield an undefined odds ratio and `p = 1`.
#[must_use]
pub fn fisher_exact(table: [[usize; 2]; 2]) -> FisherResult {
    let [[a, b], [c, d]] = table;
    let row1 = a + b;
    let col1 = a + c;
    let n = a + b + c + d;

    let (ci_low, ci_high) = woolf_interval(table);
    if row1 == 0 || col1 == 0 || row1 == n || col1 == n {
        return FisherResult {
            odds_ratio: f64::NAN,
            p_value: 1.0,
            ci_low,
            ci_high,
        };
    }

    let odds_ratio = if b > 0 && c > 0 {
        usize_to_f64(a) * usize_to_f64(d) / (usize_to_f64(b) * usize_to_f64(c))
    } else {
        f64::INFINITY
    };

    let lf = ln_factorials(n);
    let ln_choose = |m: usize, k: usize| lf[m] - lf[k] - lf[m - k];
    let denom = ln_choose(n, row1);
    let prob = |x: usize| (ln_choose(col1, x) + ln_choose(n - col1, row1 - x) - denom).exp();

    let lo = (row1 + col1).saturating_sub(n);
    let hi = row1.min(col1);
    let observed = prob(a);
    let p_value = (lo..=hi)
        .map(prob)
        .filter(|p| *p <= observed * P_SLACK)
        .sum::<f64>()
        .min(1.0);

    FisherResult {
        odds_ratio,
        p_value,
        ci_low,
        ci_high,
    }
}

fn woolf_interval(table: [[usize; 2]; 2]) -> (f64, f64) {
    let [[a, b], [c, d]] = table.map(|row| row.map(|v| usize_to_f64(v) + 0.5));
    let ln_or = (a * d / (b * c)).ln();
    let se = (1.0 / a + 1.0 / b + 1.0 / c + 1.0 / d).sqrt();
    ((ln_or - Z_95 * se).exp(), (ln_or + Z_95 * se).exp())
}
