use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use clap::{Parser, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use stochastic_allocation::comparison::{Evaluator, PolicyResult};
use stochastic_allocation::config::RunConfig;
use stochastic_allocation::experiment::run_grid;
use stochastic_allocation::loader::load_problem;
use stochastic_allocation::reporting::{display_comparison, display_grid, display_problem, display_saa, display_single};
use stochastic_allocation::solver::{MicroLpBackend, TracingObserver};
use stochastic_allocation::Result;

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Solve the stochastic model once and replay its plan
    Rp,
    /// RP, EV, EEV and VSS
    Compare,
    /// Sample Average Approximation
    Saa,
    /// Scenario count × seed grid
    Grid,
    /// Production-only point-estimate model
    Point,
}

#[derive(Parser, Debug)]
#[command(name = "stochastic-allocation")]
#[command(about = "Two-stage stochastic production allocation")]
#[command(version)]
struct Args {
    /// Directory holding the input CSV tables
    #[arg(short, long)]
    data: PathBuf,

    /// TOML run configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(short, long, value_enum, default_value_t = Mode::Compare)]
    mode: Mode,

    /// Training seed (also the first SAA group seed)
    #[arg(long)]
    seed: Option<u64>,

    /// Scenarios per stochastic solve
    #[arg(long)]
    scenarios: Option<usize>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, suspect = ?err.suspect(), "Run failed");
            eprintln!("error: {}", err);
            ExitCode::FAILURE
        }
    }
}

fn load_config(args: &Args) -> Result<RunConfig> {
    let mut config = match &args.config {
        Some(path) => RunConfig::load(path)?,
        None => RunConfig::default(),
    };
    if let Some(seed) = args.seed {
        config.comparison.train_seed = seed;
        config.saa.group_seed = seed;
    }
    if let Some(count) = args.scenarios {
        config.model.scenario_count = count;
    }
    config.validate()?;
    Ok(config)
}

fn run(args: &Args) -> Result<()> {
    let config = load_config(args)?;
    let data = load_problem(&args.data)?;
    display_problem(&data);

    let mut backend = MicroLpBackend::new().with_observer(Arc::new(TracingObserver));
    if let Some(limit) = config.solver.time_limit() {
        backend = backend.with_time_limit(limit);
    }
    let evaluator = Evaluator::new(&data, &config.model, &backend);
    info!(mode = ?args.mode, scenarios = config.model.scenario_count, "Starting run");

    match args.mode {
        Mode::Rp => {
            let train = evaluator.scenarios(config.model.scenario_count, config.comparison.train_seed)?;
            let test = evaluator.scenarios(config.comparison.test_scenarios, config.comparison.test_seed)?;
            let result = match evaluator.solve_rp(&train) {
                Ok(solved) => PolicyResult::from_solved(&solved),
                Err(err) => PolicyResult::failed(&err),
            };
            let evaluation = match &result.plan {
                Some(plan) => Some(evaluator.evaluate(plan, &test)?),
                None => None,
            };
            display_single("RECOURSE PROBLEM", &data, &result, evaluation.as_ref());
        }
        Mode::Compare => {
            let report = evaluator.compare(&config.comparison)?;
            display_comparison(&data, &report);
        }
        Mode::Saa => {
            let report = evaluator.saa(&config.saa)?;
            display_saa(&data, &report);
        }
        Mode::Grid => {
            let rows = run_grid(&data, &config.model, &config.experiment, &backend)?;
            display_grid(&rows);
        }
        Mode::Point => {
            let test = evaluator.scenarios(config.comparison.test_scenarios, config.comparison.test_seed)?;
            let result = match evaluator.solve_point_estimate(None) {
                Ok(solved) => PolicyResult::from_solved(&solved),
                Err(err) => PolicyResult::failed(&err),
            };
            let evaluation = match &result.plan {
                Some(plan) => Some(evaluator.evaluate(plan, &test)?),
                None => None,
            };
            display_single("POINT-ESTIMATE MODEL", &data, &result, evaluation.as_ref());
        }
    }
    Ok(())
}
