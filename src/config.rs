/// Run configuration
///
/// - **ModelConfig**: which variant of the allocation model to build
/// - **RunConfig**: full TOML-backed configuration of a batch run

use crate::demand::DemandPolicy;
use crate::error::{AllocationError, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Domain of the second-stage sales variables
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SalesDomain {
    Integer,
    #[default]
    Continuous,
}

/// Model variant switches
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Binary "produced at all" flag per product gating its bounds
    pub use_product_flags: bool,
    /// Binary "used at all" flag per producer gating its capacity
    pub use_producer_flags: bool,
    /// Enforce the data's total-cost budget
    pub use_budget: bool,
    pub demand_policy: DemandPolicy,
    /// Scenarios per recourse solve
    pub scenario_count: usize,
    pub sales_domain: SalesDomain,
    /// Added to every production coefficient; a deliberate tie-break among
    /// equal-profit vertices, zero disables it
    pub tie_break_epsilon: f64,
    /// Weight point-estimate revenue by the empirical sale probability
    pub use_sale_probability: bool,
    /// Reject products with a lower bound and no producer before solving
    pub validate_coverage: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            use_product_flags: false,
            use_producer_flags: false,
            use_budget: false,
            demand_policy: DemandPolicy::Normal,
            scenario_count: 100,
            sales_domain: SalesDomain::Continuous,
            tie_break_epsilon: 0.0,
            use_sale_probability: false,
            validate_coverage: true,
        }
    }
}

impl ModelConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scenario_count(mut self, count: usize) -> Self {
        self.scenario_count = count;
        self
    }

    pub fn demand_policy(mut self, policy: DemandPolicy) -> Self {
        self.demand_policy = policy;
        self
    }

    pub fn sales_domain(mut self, domain: SalesDomain) -> Self {
        self.sales_domain = domain;
        self
    }

    pub fn with_product_flags(mut self) -> Self {
        self.use_product_flags = true;
        self
    }

    pub fn with_producer_flags(mut self) -> Self {
        self.use_producer_flags = true;
        self
    }

    pub fn with_budget(mut self) -> Self {
        self.use_budget = true;
        self
    }

    pub fn tie_break_epsilon(mut self, epsilon: f64) -> Self {
        self.tie_break_epsilon = epsilon;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.scenario_count == 0 {
            return Err(AllocationError::config("scenario_count must be at least 1"));
        }
        if !self.tie_break_epsilon.is_finite() || self.tie_break_epsilon < 0.0 {
            return Err(AllocationError::config("tie_break_epsilon must be a non-negative number"));
        }
        Ok(())
    }
}

/// RP / EV / EEV comparison settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ComparisonConfig {
    pub train_seed: u64,
    /// Must differ from `train_seed` so EEV is measured out of sample
    pub test_seed: u64,
    pub test_scenarios: usize,
    /// Also solve one point-estimate model per training scenario
    pub wait_and_see: bool,
}

impl Default for ComparisonConfig {
    fn default() -> Self {
        Self {
            train_seed: 12,
            test_seed: 500,
            test_scenarios: 1000,
            wait_and_see: false,
        }
    }
}

/// Sample Average Approximation settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SaaConfig {
    pub groups: usize,
    /// Group `g` draws with seed `group_seed + g`
    pub group_seed: u64,
    pub evaluation_scenarios: usize,
    pub evaluation_seed: u64,
}

impl Default for SaaConfig {
    fn default() -> Self {
        Self {
            groups: 5,
            group_seed: 0,
            evaluation_scenarios: 1000,
            evaluation_seed: 100,
        }
    }
}

/// Scenario-count × seed grid
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub scenario_counts: Vec<usize>,
    pub seeds: Vec<u64>,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            scenario_counts: vec![10, 50, 100],
            seeds: vec![1300, 1400, 1500],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub time_limit_secs: Option<f64>,
}

impl SolverConfig {
    pub fn time_limit(&self) -> Option<Duration> {
        self.time_limit_secs.map(Duration::from_secs_f64)
    }
}

/// Whole-run configuration, every section optional
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub model: ModelConfig,
    pub comparison: ComparisonConfig,
    pub saa: SaaConfig,
    pub experiment: ExperimentConfig,
    pub solver: SolverConfig,
}

impl RunConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: RunConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        self.model.validate()?;
        if self.comparison.train_seed == self.comparison.test_seed {
            return Err(AllocationError::config(
                "comparison.test_seed must differ from comparison.train_seed",
            ));
        }
        if self.comparison.test_scenarios == 0 {
            return Err(AllocationError::config("comparison.test_scenarios must be at least 1"));
        }
        if self.saa.groups == 0 || self.saa.evaluation_scenarios == 0 {
            return Err(AllocationError::config("saa.groups and saa.evaluation_scenarios must be at least 1"));
        }
        let group_seeds = self.saa.group_seed..self.saa.group_seed.saturating_add(self.saa.groups as u64);
        if group_seeds.contains(&self.saa.evaluation_seed) {
            return Err(AllocationError::config(
                "saa.evaluation_seed must not coincide with a group seed",
            ));
        }
        if let Some(limit) = self.solver.time_limit_secs {
            if !limit.is_finite() || limit <= 0.0 {
                return Err(AllocationError::config("solver.time_limit_secs must be positive"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = RunConfig::default();
        assert_eq!(config.model.scenario_count, 100);
        assert_eq!(config.model.demand_policy, DemandPolicy::Normal);
        assert!(config.model.validate_coverage);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = RunConfig::from_toml_str(
            r#"
            [model]
            use_budget = true
            demand_policy = "lognormal"
            sales_domain = "integer"
            scenario_count = 25

            [solver]
            time_limit_secs = 2.5
            "#,
        )
        .unwrap();

        assert!(config.model.use_budget);
        assert_eq!(config.model.demand_policy, DemandPolicy::Lognormal);
        assert_eq!(config.model.sales_domain, SalesDomain::Integer);
        assert_eq!(config.model.scenario_count, 25);
        assert!(!config.model.use_product_flags);
        assert_eq!(config.saa, SaaConfig::default());
        assert_eq!(config.solver.time_limit(), Some(Duration::from_millis(2500)));
    }

    #[test]
    fn test_shared_train_and_test_seed_is_rejected() {
        let result = RunConfig::from_toml_str(
            r#"
            [comparison]
            train_seed = 7
            test_seed = 7
            "#,
        );
        assert!(matches!(result, Err(AllocationError::Config(_))));
    }

    #[test]
    fn test_evaluation_seed_inside_group_range_is_rejected() {
        let result = RunConfig::from_toml_str("[saa]\ngroups = 5\ngroup_seed = 100\nevaluation_seed = 103\n");
        assert!(matches!(result, Err(AllocationError::Config(_))));
    }

    #[test]
    fn test_unknown_policy_is_a_parse_error() {
        let result = RunConfig::from_toml_str("[model]\ndemand_policy = \"poisson\"\n");
        assert!(matches!(result, Err(AllocationError::Toml(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[saa]\ngroups = 3").unwrap();
        let config = RunConfig::load(file.path()).unwrap();
        assert_eq!(config.saa.groups, 3);
    }

    #[test]
    fn test_zero_scenarios_rejected() {
        let config = ModelConfig::new().scenario_count(0);
        assert!(config.validate().is_err());
    }
}
