pub mod capacity;
pub mod comparison;
pub mod config;
pub mod demand;
pub mod error;
pub mod experiment;
pub mod loader;
pub mod models;
pub mod monte_carlo;
pub mod optimizer;
pub mod reporting;
pub mod solver;

pub use comparison::{ComparisonReport, Evaluator, PolicyResult, PolicyStatus, SaaReport};
pub use config::{ModelConfig, RunConfig, SalesDomain};
pub use demand::{generate_scenarios, DemandPolicy, ScenarioGenerator, ScenarioSet};
pub use error::{AllocationError, Result};
pub use models::{AllocationPlan, ProblemData, Producer, Product, SalesRealization};
pub use optimizer::{AllocationModel, DemandInput, SolvedModel};
pub use solver::{MicroLpBackend, SolveStatus, SolverBackend};
