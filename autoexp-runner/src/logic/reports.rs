use std::collections::BTreeMap;
use std::io::Write;
use std::time::Duration;

use anyhow::Result;
use colored::Colorize;

use super::explain::ExplainRecord;

/// Per-agent roll-up of a batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentSummary {
    pub runs: usize,
    pub observed: usize,
    pub explained: usize,
    pub interventions: usize,
    pub elapsed_secs: f64,
}

#[must_use]
pub fn summarize(records: &[ExplainRecord]) -> BTreeMap<(String, String), AgentSummary> {
    let mut table: BTreeMap<(String, String), AgentSummary> = BTreeMap::new();
    for record in records {
        let entry = table
            .entry((record.agent.clone(), record.outcome.clone()))
            .or_default();
        entry.runs += 1;
        entry.observed += usize::from(record.result.is_some());
        entry.explained += usize::from(record.is_explained());
        entry.interventions += record.interventions();
        entry.elapsed_secs += record.elapsed_secs;
    }
    table
}

pub fn generate_console_report(
    out: &mut dyn Write,
    records: &[ExplainRecord],
    total_duration: Duration,
) -> Result<()> {
    writeln!(out)?;
    writeln!(out, "{}", "📊 Explanation Summary".bright_cyan().bold())?;
    writeln!(out, "{}", "======================".cyan())?;

    let explained = records.iter().filter(|r| r.is_explained()).count();
    writeln!(out, "Total runs: {}", records.len())?;
    writeln!(out, "Explained: {}", explained.to_string().green())?;
    writeln!(
        out,
        "Unexplained: {}",
        (records.len() - explained).to_string().yellow()
    )?;
    writeln!(out, "Total time: {total_duration:?}")?;
    writeln!(out)?;

    writeln!(
        out,
        "{:<18} {:<14} {:>5} {:>9} {:>10} {:>14} {:>10}",
        "Agent", "Outcome", "Runs", "Observed", "Explained", "Interventions", "Time (s)"
    )?;
    for ((agent, outcome), summary) in summarize(records) {
        writeln!(
            out,
            "{:<18} {:<14} {:>5} {:>9} {:>10} {:>14} {:>10.2}",
            agent,
            outcome,
            summary.runs,
            summary.observed,
            summary.explained,
            summary.interventions,
            summary.elapsed_secs
        )?;
    }
    writeln!(out)?;

    for record in records {
        let status = if record.is_explained() {
            "✅ EXPLAINED".green()
        } else if record.result.is_some() {
            "➖ UNEXPLAINED".yellow()
        } else {
            "⚠️  NOT OBSERVED".red()
        };
        writeln!(
            out,
            "{} {} (seed {})",
            status,
            record.agent.bold(),
            record.seed
        )?;
        writeln!(
            out,
            "   {} → {}: {}",
            record.outcome,
            record.counterfactual,
            record.status_label()
        )?;
        let Some(result) = &record.result else {
            continue;
        };
        writeln!(
            out,
            "   Trace: {} pairs, windows {:?}, {} interventions",
            record.trace_len, result.windows, result.interventions
        )?;
        if let Some(explanation) = &result.explanation {
            writeln!(
                out,
                "   {} {} → {} at lookback {}",
                "Explanation:".bold(),
                explanation.variable,
                explanation.value,
                explanation.lookback
            )?;
            writeln!(
                out,
                "   OR {:.3} (95% CI {:.3}–{:.3}), p = {:.4}",
                explanation.fisher.odds_ratio,
                explanation.fisher.ci_low,
                explanation.fisher.ci_high,
                explanation.fisher.p_value
            )?;
        }
        if result.random_policy_suspected {
            let spurious = result.spurious;
            let warning = format!("{spurious} spurious confirmations; policy may be random");
            writeln!(out, "   {}", warning.red())?;
        }
        if !result.retired.is_empty() {
            writeln!(out, "   Retired variables: {}", result.retired.len())?;
        }
    }
    Ok(())
}

pub fn generate_json_report(out: &mut dyn Write, records: &[ExplainRecord]) -> Result<()> {
    let json_output = serde_json::to_string_pretty(records)?;
    writeln!(out, "{json_output}")?;
    Ok(())
}

pub fn generate_markdown_report(out: &mut dyn Write, records: &[ExplainRecord]) -> Result<()> {
    writeln!(out, "# Counterfactual Explanation Results\n")?;

    let explained = records.iter().filter(|r| r.is_explained()).count();
    writeln!(out, "## Summary\n")?;
    writeln!(out, "- **Total runs**: {}", records.len())?;
    writeln!(out, "- **Explained**: {explained}")?;
    writeln!(out, "- **Unexplained**: {}\n", records.len() - explained)?;

    writeln!(
        out,
        "| Agent | Outcome | Runs | Observed | Explained | Interventions | Time (s) |"
    )?;
    writeln!(out, "|---|---|---:|---:|---:|---:|---:|")?;
    for ((agent, outcome), summary) in summarize(records) {
        writeln!(
            out,
            "| {agent} | {outcome} | {} | {} | {} | {} | {:.2} |",
            summary.runs,
            summary.observed,
            summary.explained,
            summary.interventions,
            summary.elapsed_secs
        )?;
    }
    writeln!(out)?;

    writeln!(out, "## Detailed Results\n")?;
    for record in records {
        let marker = if record.is_explained() { "✅" } else { "❌" };
        let (agent, seed) = (&record.agent, record.seed);
        writeln!(out, "### {marker} {agent} (seed {seed})\n")?;
        writeln!(
            out,
            "- **Outcome**: {} → {}",
            record.outcome, record.counterfactual
        )?;
        writeln!(out, "- **Status**: {}", record.status_label())?;
        writeln!(out, "- **Interventions**: {}", record.interventions())?;
        let label = record.explanation_label();
        if !label.is_empty() {
            writeln!(out, "- **Explanation**: `{label}`")?;
        }
        writeln!(out)?;
    }
    Ok(())
}

pub fn generate_csv_report(out: &mut dyn Write, records: &[ExplainRecord]) -> Result<()> {
    writeln!(
        out,
        "agent,seed,outcome,counterfactual,status,trace_len,interventions,variable,value,lookback,p_value,odds_ratio,elapsed_secs"
    )?;
    for record in records {
        let explanation = record.result.as_ref().and_then(|r| r.explanation.as_ref());
        let (variable, value, lookback, p_value, odds_ratio) = match explanation {
            Some(e) => (
                e.variable.clone(),
                e.value.to_string(),
                e.lookback.to_string(),
                format!("{:.6}", e.fisher.p_value),
                format!("{:.6}", e.fisher.odds_ratio),
            ),
            None => Default::default(),
        };
        writeln!(
            out,
            "{},{},{},{},{},{},{},{},{},{},{},{},{:.3}",
            record.agent,
            record.seed,
            record.outcome,
            record.counterfactual,
            record.status_label(),
            record.trace_len,
            record.interventions(),
            variable,
            csv_field(&value),
            lookback,
            p_value,
            odds_ratio,
            record.elapsed_secs
        )?;
    }
    Ok(())
}

/// Quote a value that would otherwise break the row.
fn csv_field(raw: &str) -> String {
    if raw.contains([',', '"', '\n']) {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoexp_core::{ExperimentResult, SearchStatus};

    fn record(agent: &str, seed: u64, status: Option<SearchStatus>) -> ExplainRecord {
        let result = status.map(|status| {
            let mut result = ExperimentResult::new(agent, "HitBall", "MissedBall");
            result.status = status;
            result.interventions = 5;
            result.windows = vec![4, 8];
            result
        });
        ExplainRecord {
            agent: agent.to_string(),
            seed,
            outcome: "HitBall".to_string(),
            counterfactual: "MissedBall".to_string(),
            outcome_step: result.as_ref().map(|_| 31),
            counterfactual_step: None,
            live_steps: 100,
            trace_len: 20,
            result,
            elapsed_secs: 0.5,
        }
    }

    fn sample() -> Vec<ExplainRecord> {
        vec![
            record("StayAlive", 1, Some(SearchStatus::Exhausted)),
            record("StayAlive", 2, None),
            record("MoveOnlyFalling", 1, Some(SearchStatus::IterationLimit)),
        ]
    }

    #[test]
    fn summary_groups_by_agent_and_outcome() {
        let table = summarize(&sample());
        let stay = &table[&("StayAlive".to_string(), "HitBall".to_string())];
        assert_eq!(stay.runs, 2);
        assert_eq!(stay.observed, 1);
        assert_eq!(stay.explained, 0);
        assert_eq!(stay.interventions, 5);
        assert!((stay.elapsed_secs - 1.0).abs() < 1e-9);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn json_report_lists_every_record() {
        let mut buffer = Vec::new();
        generate_json_report(&mut buffer, &sample()).unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&buffer).unwrap();
        assert_eq!(parsed.as_array().map(Vec::len), Some(3));
        assert_eq!(parsed[0]["result"]["status"], "exhausted");
        assert!(parsed[1]["result"].is_null());
    }

    #[test]
    fn csv_report_has_header_and_rows() {
        let mut buffer = Vec::new();
        generate_csv_report(&mut buffer, &sample()).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("agent,seed,outcome"));
        assert!(lines[2].contains("outcome not observed"));
    }

    #[test]
    fn markdown_and_console_reports_render() {
        let mut markdown = Vec::new();
        generate_markdown_report(&mut markdown, &sample()).unwrap();
        let markdown = String::from_utf8(markdown).unwrap();
        assert!(markdown.contains("# Counterfactual Explanation Results"));
        assert!(markdown.contains("| StayAlive | HitBall | 2 | 1 | 0 | 5 |"));

        let mut console = Vec::new();
        generate_console_report(&mut console, &sample(), Duration::from_millis(5)).unwrap();
        let console = String::from_utf8(console).unwrap();
        assert!(console.contains("Total runs: 3"));
    }

    #[test]
    fn csv_fields_with_commas_are_quoted() {
        assert_eq!(csv_field("[1, 2]"), "\"[1, 2]\"");
        assert_eq!(csv_field("3.5"), "3.5");
    }
}
