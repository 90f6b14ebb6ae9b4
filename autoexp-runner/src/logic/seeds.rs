use anyhow::{Context, Result, bail};
use autoexp_core::ExperimentConfig;

/// Upper bound on how many seeds a single `a..b` range may expand to.
const MAX_RANGE: u64 = 10_000;

/// Resolve CLI seed tokens into distinct seeds.
///
/// Accepts literal integers (negative values use their magnitude) and
/// half-open ranges such as `10..14`. Falls back to the default experiment
/// seed when nothing is given.
///
/// # Errors
///
/// Returns an error for tokens that are neither integers nor ranges, and for
/// empty or oversized ranges.
pub fn resolve_seed_inputs(tokens: &[String]) -> Result<Vec<u64>> {
    let mut seeds: Vec<u64> = Vec::new();
    let mut push = |seed: u64| {
        if !seeds.contains(&seed) {
            seeds.push(seed);
        }
    };

    for token in tokens {
        if token.is_empty() {
            continue;
        }

        if let Some((start, end)) = token.split_once("..") {
            let start: u64 = start
                .trim()
                .parse()
                .with_context(|| format!("invalid range start in seed token: {token}"))?;
            let end: u64 = end
                .trim()
                .parse()
                .with_context(|| format!("invalid range end in seed token: {token}"))?;
            if end <= start {
                bail!("Empty seed range: {token}");
            }
            if end - start > MAX_RANGE {
                bail!("Seed range {token} expands past {MAX_RANGE} seeds");
            }
            (start..end).for_each(&mut push);
            continue;
        }

        if let Ok(value) = token.parse::<i64>() {
            push(value.unsigned_abs());
            continue;
        }

        if let Ok(value) = token.parse::<u64>() {
            push(value);
            continue;
        }

        bail!("Unrecognized seed token: {token}");
    }

    if seeds.is_empty() {
        seeds.push(ExperimentConfig::default_seed());
    }

    Ok(seeds)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(raw: &[&str]) -> Vec<String> {
        raw.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn resolves_numeric_and_negative_seeds() {
        let seeds = resolve_seed_inputs(&tokens(&["42", "-7", "18446744073709551615"])).unwrap();
        assert_eq!(seeds, vec![42, 7, u64::MAX]);
    }

    #[test]
    fn expands_ranges_and_dedups() {
        let seeds = resolve_seed_inputs(&tokens(&["3", "1..5"])).unwrap();
        assert_eq!(seeds, vec![3, 1, 2, 4]);
    }

    #[test]
    fn empty_input_uses_default_seed() {
        let seeds = resolve_seed_inputs(&tokens(&[""])).unwrap();
        assert_eq!(seeds, vec![ExperimentConfig::default_seed()]);
    }

    #[test]
    fn rejects_garbage_and_backwards_ranges() {
        assert!(resolve_seed_inputs(&tokens(&["CL-ORANGE42"])).is_err());
        assert!(resolve_seed_inputs(&tokens(&["9..3"])).is_err());
        assert!(resolve_seed_inputs(&tokens(&["0..20000"])).is_err());
    }
}
