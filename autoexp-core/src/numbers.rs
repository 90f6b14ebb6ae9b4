//! Numeric conversion and comparison helpers centralizing float handling.

use num_traits::cast::cast;

/// Relative tolerance used for approximate float equality.
pub const REL_TOLERANCE: f64 = 1e-9;
/// Absolute tolerance used for approximate float equality near zero.
pub const ABS_TOLERANCE: f64 = 1e-9;

/// Approximate equality under both a relative and an absolute tolerance.
#[must_use]
pub fn approx_eq(a: f64, b: f64) -> bool {
    if a == b {
        return true;
    }
    if !a.is_finite() || !b.is_finite() {
        return false;
    }
    let diff = (a - b).abs();
    diff <= (REL_TOLERANCE * a.abs().max(b.abs())).max(ABS_TOLERANCE)
}

/// Convert a count to f64 while allowing precision loss in a single location.
#[must_use]
pub fn usize_to_f64(value: usize) -> f64 {
    cast::<usize, f64>(value).unwrap_or(f64::MAX)
}

/// Widen a count for seed derivation.
#[must_use]
pub fn usize_to_u64(value: usize) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}

/// Convert i64 to f64 while allowing precision loss in a single location.
#[must_use]
pub fn i64_to_f64(value: i64) -> f64 {
    cast::<i64, f64>(value).unwrap_or(0.0)
}

/// Floor a f64 and clamp it to the i64 range, returning 0 for non-finite values.
#[must_use]
pub fn floor_f64_to_i64(value: f64) -> i64 {
    if !value.is_finite() {
        return 0;
    }
    let min = cast::<i64, f64>(i64::MIN).unwrap_or(f64::MIN);
    let max = cast::<i64, f64>(i64::MAX).unwrap_or(f64::MAX);
    let clamped = value.clamp(min, max).floor();
    cast::<f64, i64>(clamped).unwrap_or(0)
}

/// Convert an integral f64 to i64, returning `None` when it has a fractional part.
#[must_use]
pub fn integral_f64_to_i64(value: f64) -> Option<i64> {
    if !value.is_finite() || value.fract() != 0.0 {
        return None;
    }
    cast::<f64, i64>(value)
}

/// Sign of a number as -1, 0 or 1.
#[must_use]
pub fn sign(value: f64) -> i8 {
    if value < 0.0 {
        -1
    } else if value > 0.0 {
        1
    } else {
        0
    }
}

/// Unbiased sample variance; `None` for fewer than two values.
#[must_use]
pub fn sample_variance(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let n = usize_to_f64(values.len());
    let mean = values.iter().sum::<f64>() / n;
    let squares = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>();
    Some(squares / (n - 1.0))
}
