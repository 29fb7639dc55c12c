/// Scenario-count × seed experiment grid
/// Solves the recourse model once per grid cell and records profit and solve time

use std::time::{Duration, Instant};
use tracing::info;
use crate::comparison::{Evaluator, PolicyResult, PolicyStatus};
use crate::config::{ExperimentConfig, ModelConfig};
use crate::error::Result;
use crate::models::ProblemData;
use crate::solver::SolverBackend;

/// One grid cell
#[derive(Debug, Clone)]
pub struct GridRow {
    pub scenario_count: usize,
    pub seed: u64,
    pub result: PolicyResult,
    /// Wall clock of build and solve
    pub solve_time: Duration,
}

impl GridRow {
    pub fn status(&self) -> &PolicyStatus {
        &self.result.status
    }

    pub fn expected_profit(&self) -> f64 {
        self.result.value
    }
}

/// Run every (scenario count, seed) pair; a failed cell is recorded, not fatal
pub fn run_grid(
    data: &ProblemData,
    config: &ModelConfig,
    grid: &ExperimentConfig,
    backend: &dyn SolverBackend,
) -> Result<Vec<GridRow>> {
    let mut rows = Vec::with_capacity(grid.scenario_counts.len() * grid.seeds.len());

    for &scenario_count in &grid.scenario_counts {
        let cell_config = config.clone().scenario_count(scenario_count);
        cell_config.validate()?;
        let evaluator = Evaluator::new(data, &cell_config, backend);

        for &seed in &grid.seeds {
            let scenarios = evaluator.scenarios(scenario_count, seed)?;
            let start = Instant::now();
            let result = match evaluator.solve_rp(&scenarios) {
                Ok(solved) => PolicyResult::from_solved(&solved),
                Err(err) => PolicyResult::failed(&err),
            };
            let solve_time = start.elapsed();

            info!(
                scenarios = scenario_count,
                seed,
                status = ?result.status,
                profit = result.value,
                elapsed_ms = solve_time.as_millis() as u64,
                "Grid cell"
            );
            rows.push(GridRow {
                scenario_count,
                seed,
                result,
                solve_time,
            });
        }
    }
    Ok(rows)
}
