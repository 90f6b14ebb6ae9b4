use chrono::Utc;
use std::path::{Path, PathBuf};

/// Timestamped run directory under `base`, one per agent.
pub fn artifacts_dir(base: &Path, agent: &str) -> PathBuf {
    let ts = Utc::now().format("%Y%m%dT%H%M%S");
    base.join(agent).join(ts.to_string())
}

pub fn split_csv(s: &str) -> Vec<String> {
    s.split(',')
        .map(|x| x.trim().to_string())
        .filter(|x| !x.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_csv_trims_and_drops_blanks() {
        assert_eq!(split_csv(" a, b ,,c"), vec!["a", "b", "c"]);
        assert!(split_csv("").is_empty());
    }

    #[test]
    fn artifacts_dir_nests_agent_under_base() {
        let dir = artifacts_dir(Path::new("target/runs"), "StayAlive");
        assert!(dir.starts_with("target/runs/StayAlive"));
        assert_eq!(dir.components().count(), 4);
    }
}
