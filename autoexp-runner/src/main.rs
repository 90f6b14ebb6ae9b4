mod logic;
mod util;

use anyhow::{Context, Result, bail};
use autoexp_core::outcomes::BallOutcome;
use autoexp_core::replay::CancelToken;
use autoexp_core::{EmpiricalOracle, ExperimentConfig};
use clap::Parser;
use colored::Colorize;
use std::fs::File;
use std::io::{BufWriter, Write, stdout};
use std::path::{Path, PathBuf};
use std::time::Instant;

use logic::{
    AgentKind, ExplainBatch, ExplainPlan, ExplainRecord, SessionSettings, resolve_agents,
    resolve_seed_inputs, run_plan,
};
use util::split_csv;

#[derive(Debug, Parser)]
#[command(name = "autoexp-runner", version = "0.1.0")]
#[command(
    about = "Record scripted paddle agents and search for counterfactual explanations of their behavior"
)]
struct Args {
    /// Agents to explain (comma-separated, or `all`)
    #[arg(long, default_value = "StayAlive")]
    agents: String,

    /// List all available agents and exit
    #[arg(long)]
    list_agents: bool,

    /// Seeds to run (comma-separated integers or `a..b` ranges)
    #[arg(long, default_value = "6232020")]
    seeds: String,

    /// Observed behavior to explain (e.g. HitBall, MissedBall, "Aim left")
    #[arg(long, default_value = "HitBall")]
    outcome: String,

    /// Behavior to search for instead; defaults to the outcome's usual counterpart
    #[arg(long)]
    counterfactual: Option<String>,

    /// Experiment configuration JSON; the flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Requested lookback before the outcome
    #[arg(long)]
    timelag: Option<usize>,

    /// Replays per arm when estimating outcome frequencies
    #[arg(long)]
    repetitions: Option<usize>,

    /// Ceiling on interventions attempted per search
    #[arg(long)]
    max_iterations: Option<usize>,

    /// Mutation points to leave alone (comma-separated regexes)
    #[arg(long)]
    exclude: Option<String>,

    /// Steps to play live while looking for the outcome
    #[arg(long, default_value_t = 1000)]
    maxsteps: usize,

    /// Longest trace kept before the outcome
    #[arg(long, default_value_t = 20)]
    window: usize,

    /// Also intervene on the ball/paddle horizontal distance
    #[arg(long)]
    composites: bool,

    /// Load marginals from this model file instead of learning them live
    #[arg(long)]
    model: Option<PathBuf>,

    /// Save the marginals learned from the first live run
    #[arg(long)]
    save_model: Option<PathBuf>,

    /// Write control/intervened replays as JSON under this directory
    #[arg(long)]
    outdir: Option<PathBuf>,

    /// Run frequency replays on the current thread only
    #[arg(long)]
    sequential: bool,

    /// Output report format
    #[arg(long, default_value = "console")]
    #[arg(value_parser = ["json", "markdown", "console", "csv"])]
    report: String,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Optional path to write the report output instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let default_level = if args.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    if maybe_list_agents(&args)? {
        return Ok(());
    }

    announce_banner();

    let start_time = Instant::now();
    let plan = build_plan(&args)?;
    println!(
        "🔎 Explaining {} (vs {}) for {} agent(s) × {} seed(s)",
        plan.outcome.to_string().bold(),
        plan.counterfactual,
        plan.agents.len(),
        plan.seeds.len()
    );

    let batch = run_plan(&plan, &CancelToken::new())?;
    if let Some(path) = &args.save_model {
        save_model(path, &batch)?;
    }
    write_reports(&args, &batch.records, start_time)?;
    Ok(())
}

fn maybe_list_agents(args: &Args) -> Result<bool> {
    if !args.list_agents {
        return Ok(false);
    }
    let mut output_target = OutputTarget::new(args.output.clone())?;
    writeln!(output_target.writer(), "Available agents:")?;
    for kind in AgentKind::ALL {
        writeln!(
            output_target.writer(),
            "  {:25} - {}",
            kind.label(),
            kind.description()
        )?;
    }
    output_target.flush_inner()?;
    Ok(true)
}

fn announce_banner() {
    let title = "🧪 Counterfactual Explanation Runner";
    println!("{}", title.bright_cyan().bold());
    println!("{}", "====================================".cyan());
}

fn parse_outcomes(args: &Args) -> Result<(BallOutcome, BallOutcome)> {
    let outcome: BallOutcome = args
        .outcome
        .parse()
        .with_context(|| format!("parsing --outcome {}", args.outcome))?;
    let counterfactual = match &args.counterfactual {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("parsing --counterfactual {raw}"))?,
        None => match outcome.counterfactual() {
            Some(counterfactual) => counterfactual,
            None => bail!("{outcome} has no default counterfactual; pass --counterfactual"),
        },
    };
    if counterfactual == outcome {
        bail!("outcome and counterfactual are both {outcome}");
    }
    Ok((outcome, counterfactual))
}

fn build_config(args: &Args) -> Result<ExperimentConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            ExperimentConfig::from_json(&raw)
                .with_context(|| format!("failed to parse {}", path.display()))?
        }
        None => ExperimentConfig::default(),
    };
    if let Some(timelag) = args.timelag {
        config.timelag = timelag;
    }
    if let Some(repetitions) = args.repetitions {
        config.repetitions = repetitions;
    }
    if let Some(max_iterations) = args.max_iterations {
        config.max_iterations = max_iterations;
    }
    if let Some(exclude) = &args.exclude {
        config.exclusions.extend(split_csv(exclude));
    }
    if let Some(outdir) = &args.outdir {
        config.outdir = Some(outdir.clone());
        config.record_json = true;
    }
    if args.sequential {
        config.parallel = false;
    }
    config.validate()?;
    Ok(config)
}

fn load_model(path: Option<&Path>) -> Result<Option<EmpiricalOracle>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read model {}", path.display()))?;
    let model = EmpiricalOracle::from_json(&raw)
        .with_context(|| format!("failed to parse model {}", path.display()))?;
    log::info!("loaded {} marginals from {}", model.len(), path.display());
    Ok(Some(model))
}

fn save_model(path: &Path, batch: &ExplainBatch) -> Result<()> {
    let Some(model) = &batch.learned else {
        eprintln!(
            "⚠️  No live run reached the outcome; {} not written",
            path.display().to_string().yellow()
        );
        return Ok(());
    };
    std::fs::write(path, model.to_json()?)
        .with_context(|| format!("failed to write model {}", path.display()))?;
    println!("💾 Saved {} marginals to {}", model.len(), path.display());
    Ok(())
}

fn build_plan(args: &Args) -> Result<ExplainPlan> {
    if args.window < 2 {
        bail!("--window must be at least 2 (got {})", args.window);
    }
    let (outcome, counterfactual) = parse_outcomes(args)?;
    Ok(ExplainPlan {
        agents: resolve_agents(&split_csv(&args.agents))?,
        seeds: resolve_seed_inputs(&split_csv(&args.seeds))?,
        outcome,
        counterfactual,
        session: SessionSettings {
            max_steps: args.maxsteps,
            window: args.window,
        },
        config: build_config(args)?,
        model: load_model(args.model.as_deref())?,
        composites: args.composites,
        verbose: args.verbose,
    })
}

fn write_reports(args: &Args, records: &[ExplainRecord], start_time: Instant) -> Result<()> {
    let mut output_target = OutputTarget::new(args.output.clone())?;
    match args.report.as_str() {
        "json" => logic::reports::generate_json_report(&mut output_target, records)?,
        "markdown" => {
            if records.is_empty() {
                writeln!(
                    &mut output_target,
                    "# Counterfactual Explanation Results\n\n_No runs executed._"
                )?;
            } else {
                logic::reports::generate_markdown_report(&mut output_target, records)?;
            }
        }
        "csv" => logic::reports::generate_csv_report(&mut output_target, records)?,
        _ => {
            let duration = start_time.elapsed();
            if records.is_empty() {
                writeln!(&mut output_target, "No runs executed.")?;
            } else {
                logic::reports::generate_console_report(&mut output_target, records, duration)?;
            }
            writeln!(&mut output_target)?;
            writeln!(&mut output_target, "🏁 Total time: {duration:?}")?;
        }
    }
    output_target.flush_inner()?;
    Ok(())
}

enum OutputTarget {
    Stdout(BufWriter<std::io::Stdout>),
    File(BufWriter<File>),
}

impl OutputTarget {
    fn new(path: Option<PathBuf>) -> Result<Self> {
        if let Some(path) = path {
            let file = File::create(&path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            Ok(Self::File(BufWriter::new(file)))
        } else {
            Ok(Self::Stdout(BufWriter::new(stdout())))
        }
    }

    fn writer(&mut self) -> &mut dyn Write {
        match self {
            Self::Stdout(w) => w,
            Self::File(w) => w,
        }
    }

    fn flush_inner(&mut self) -> std::io::Result<()> {
        match self {
            Self::Stdout(w) => w.flush(),
            Self::File(w) => w.flush(),
        }
    }
}

impl Write for OutputTarget {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.writer().write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.flush_inner()
    }
}
