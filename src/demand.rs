/// Demand scenario generation
/// Turns per-product demand parameters into reproducible sets of demand realizations

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, LogNormal, Normal};
use serde::Deserialize;
use tracing::debug;
use crate::error::{AllocationError, Result};
use crate::models::{DemandParams, ProblemData, Product};

/// How a product's demand is drawn
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DemandPolicy {
    /// Normal(mean, std) clipped at zero; leaves a point mass at zero for
    /// high-variance, low-mean products
    #[default]
    Normal,
    /// Lognormal with the same mean and variance; never negative, never clipped
    Lognormal,
    /// Uniform resampling of the product's observed demand values
    Empirical,
}

/// Demand realizations indexed by product row and scenario
#[derive(Clone, Debug, PartialEq)]
pub struct ScenarioSet {
    /// Product id of each row, in `ProblemData::products` order
    pub product_ids: Vec<usize>,
    demand: Vec<Vec<f64>>,
}

impl ScenarioSet {
    /// Build from explicit rows; every row must have the same length
    pub fn from_rows(product_ids: Vec<usize>, demand: Vec<Vec<f64>>) -> Result<Self> {
        if product_ids.len() != demand.len() {
            return Err(AllocationError::data(format!(
                "{} product ids but {} demand rows",
                product_ids.len(),
                demand.len()
            )));
        }
        let count = demand.first().map(|row| row.len()).unwrap_or(0);
        if demand.iter().any(|row| row.len() != count) {
            return Err(AllocationError::data("demand rows have different scenario counts"));
        }
        if demand.iter().flatten().any(|d| !d.is_finite() || *d < 0.0) {
            return Err(AllocationError::data("demand values must be finite and non-negative"));
        }
        Ok(ScenarioSet { product_ids, demand })
    }

    /// Single scenario holding each product's mean demand under `policy`;
    /// the empirical policy uses the mean of the observed values
    pub fn mean_demand(data: &ProblemData, policy: DemandPolicy) -> Self {
        ScenarioSet {
            product_ids: data.products.iter().map(|p| p.id).collect(),
            demand: data
                .products
                .iter()
                .map(|p| vec![policy_mean(&p.demand, policy).max(0.0)])
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.demand.first().map(|row| row.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn num_products(&self) -> usize {
        self.product_ids.len()
    }

    /// Demand of the product at `row` in scenario `scenario`
    pub fn demand(&self, row: usize, scenario: usize) -> f64 {
        self.demand[row][scenario]
    }

    /// All realizations for the product at `row`
    pub fn row(&self, row: usize) -> &[f64] {
        &self.demand[row]
    }

    pub fn row_of(&self, product_id: usize) -> Option<usize> {
        self.product_ids.iter().position(|&id| id == product_id)
    }

    /// Sample mean for the product at `row`
    pub fn row_mean(&self, row: usize) -> f64 {
        let values = &self.demand[row];
        if values.is_empty() {
            0.0
        } else {
            values.iter().sum::<f64>() / values.len() as f64
        }
    }

    /// Demand vector of one scenario, in row order
    pub fn scenario(&self, scenario: usize) -> Vec<f64> {
        self.demand.iter().map(|row| row[scenario]).collect()
    }
}

/// Mean of the distribution `policy` samples from
fn policy_mean(params: &DemandParams, policy: DemandPolicy) -> f64 {
    match policy {
        DemandPolicy::Empirical if !params.sample.is_empty() => {
            params.sample.iter().sum::<f64>() / params.sample.len() as f64
        }
        _ => params.mean,
    }
}

/// Lognormal parameters whose mean and variance match `mean` and `std_dev`
pub fn lognormal_params(mean: f64, std_dev: f64) -> (f64, f64) {
    let variance = std_dev * std_dev;
    let mu = (mean * mean / (mean * mean + variance).sqrt()).ln();
    let sigma = (1.0 + variance / (mean * mean)).ln().sqrt();
    (mu, sigma)
}

/// Per-product sampler built once per set
enum Sampler<'a> {
    Normal(Normal<f64>),
    Lognormal(LogNormal<f64>),
    Empirical(&'a [f64]),
    Zero,
}

impl<'a> Sampler<'a> {
    fn new(product: &'a Product, policy: DemandPolicy) -> Result<Self> {
        let DemandParams { mean, std_dev, sample } = &product.demand;
        let invalid = |reason: String| AllocationError::InvalidDemand {
            product: product.name.clone(),
            reason,
        };

        match policy {
            DemandPolicy::Normal => Normal::new(*mean, *std_dev)
                .map(Sampler::Normal)
                .map_err(|e| invalid(e.to_string())),
            DemandPolicy::Lognormal => {
                if *mean == 0.0 && *std_dev == 0.0 {
                    return Ok(Sampler::Zero);
                }
                if *mean <= 0.0 {
                    return Err(invalid(format!("lognormal demand needs a positive mean, got {}", mean)));
                }
                let (mu, sigma) = lognormal_params(*mean, *std_dev);
                LogNormal::new(mu, sigma)
                    .map(Sampler::Lognormal)
                    .map_err(|e| invalid(e.to_string()))
            }
            DemandPolicy::Empirical => {
                if sample.is_empty() {
                    return Err(invalid("no observed demand values to resample".to_string()));
                }
                if sample.iter().any(|d| !d.is_finite() || *d < 0.0) {
                    return Err(invalid("observed demand values must be finite and non-negative".to_string()));
                }
                Ok(Sampler::Empirical(sample))
            }
        }
    }

    fn draw(&self, rng: &mut StdRng) -> f64 {
        match self {
            Sampler::Normal(normal) => normal.sample(rng).max(0.0),
            Sampler::Lognormal(lognormal) => lognormal.sample(rng),
            Sampler::Empirical(values) => values[rng.gen_range(0..values.len())],
            Sampler::Zero => 0.0,
        }
    }
}

/// Seeded source of demand scenarios; one generator per unit of work
pub struct ScenarioGenerator {
    rng: StdRng,
    seed: u64,
}

impl ScenarioGenerator {
    pub fn new(seed: u64) -> Self {
        ScenarioGenerator {
            rng: StdRng::seed_from_u64(seed),
            seed,
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Draw `count` scenarios; scenario-major, products in data order
    pub fn generate(&mut self, data: &ProblemData, policy: DemandPolicy, count: usize) -> Result<ScenarioSet> {
        let samplers = data
            .products
            .iter()
            .map(|p| Sampler::new(p, policy))
            .collect::<Result<Vec<_>>>()?;

        let mut demand: Vec<Vec<f64>> = vec![Vec::with_capacity(count); samplers.len()];
        for _ in 0..count {
            for (row, sampler) in samplers.iter().enumerate() {
                demand[row].push(sampler.draw(&mut self.rng));
            }
        }

        debug!(seed = self.seed, products = samplers.len(), scenarios = count, policy = ?policy, "Generated demand scenarios");
        Ok(ScenarioSet {
            product_ids: data.products.iter().map(|p| p.id).collect(),
            demand,
        })
    }
}

/// Convenience: fresh generator, one set
pub fn generate_scenarios(data: &ProblemData, policy: DemandPolicy, count: usize, seed: u64) -> Result<ScenarioSet> {
    ScenarioGenerator::new(seed).generate(data, policy, count)
}
