/// Fixed-plan evaluation and profit statistics
/// Replays a first-stage plan against demand scenarios: sales = min(production, demand)

use crate::config::SalesDomain;
use crate::demand::ScenarioSet;
use crate::error::{AllocationError, Result};
use crate::models::{AllocationPlan, ProblemData};

/// Summary of a profit sample
#[derive(Clone, Debug, PartialEq)]
pub struct ProfitStats {
    pub samples: usize,
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub percentile_10: f64,
    pub percentile_25: f64,
    pub percentile_50: f64,
    pub percentile_75: f64,
    pub percentile_90: f64,
}

impl ProfitStats {
    pub fn from_samples(values: &[f64]) -> Self {
        if values.is_empty() {
            return ProfitStats {
                samples: 0,
                mean: 0.0,
                std_dev: 0.0,
                min: 0.0,
                max: 0.0,
                percentile_10: 0.0,
                percentile_25: 0.0,
                percentile_50: 0.0,
                percentile_75: 0.0,
                percentile_90: 0.0,
            };
        }

        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let n = sorted.len() as f64;
        let mean = sorted.iter().sum::<f64>() / n;
        let variance = sorted.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / n;

        // Nearest-rank on the sorted sample
        let percentile = |p: f64| {
            let index = ((p / 100.0) * (n - 1.0)).round() as usize;
            sorted[index.min(sorted.len() - 1)]
        };

        ProfitStats {
            samples: sorted.len(),
            mean,
            std_dev: variance.sqrt(),
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            percentile_10: percentile(10.0),
            percentile_25: percentile(25.0),
            percentile_50: percentile(50.0),
            percentile_75: percentile(75.0),
            percentile_90: percentile(90.0),
        }
    }
}

/// Outcome of replaying one plan against a scenario set
#[derive(Clone, Debug)]
pub struct PlanEvaluation {
    /// Revenue minus production cost, one entry per scenario
    pub scenario_profits: Vec<f64>,
    pub stats: ProfitStats,
    pub production_cost: f64,
    pub mean_revenue: f64,
    /// Per product row: average units produced but not sold
    pub mean_leftover: Vec<f64>,
    /// Per product row: average demand left unserved
    pub mean_shortage: Vec<f64>,
}

impl PlanEvaluation {
    /// Expected profit estimate of the plan
    pub fn expected_profit(&self) -> f64 {
        self.stats.mean
    }

    pub fn total_leftover(&self) -> f64 {
        self.mean_leftover.iter().sum()
    }

    pub fn total_shortage(&self) -> f64 {
        self.mean_shortage.iter().sum()
    }
}

/// Evaluate a fixed plan: production cost is paid once, each scenario sells
/// `min(production, demand)` of every product
pub fn evaluate_plan(
    data: &ProblemData,
    plan: &AllocationPlan,
    scenarios: &ScenarioSet,
    domain: SalesDomain,
) -> Result<PlanEvaluation> {
    if scenarios.is_empty() {
        return Err(AllocationError::data("cannot evaluate a plan on an empty scenario set"));
    }
    if scenarios.num_products() != data.products.len() {
        return Err(AllocationError::data("scenario rows do not match the product list"));
    }

    let production_cost = plan.total_cost(data);
    let count = scenarios.len();
    let mut revenue = vec![0.0; count];
    let mut mean_leftover = Vec::with_capacity(data.products.len());
    let mut mean_shortage = Vec::with_capacity(data.products.len());

    for (row, product) in data.products.iter().enumerate() {
        let produced = plan.total_for_product(product.id) as f64;
        let mut leftover = 0.0;
        let mut shortage = 0.0;
        for (s, scenario_revenue) in revenue.iter_mut().enumerate() {
            let demand = match domain {
                SalesDomain::Integer => scenarios.demand(row, s).floor(),
                SalesDomain::Continuous => scenarios.demand(row, s),
            };
            let sold = produced.min(demand);
            *scenario_revenue += product.selling_price * sold;
            leftover += produced - sold;
            shortage += demand - sold;
        }
        mean_leftover.push(leftover / count as f64);
        mean_shortage.push(shortage / count as f64);
    }

    let scenario_profits: Vec<f64> = revenue.iter().map(|r| r - production_cost).collect();
    let mean_revenue = revenue.iter().sum::<f64>() / count as f64;
    Ok(PlanEvaluation {
        stats: ProfitStats::from_samples(&scenario_profits),
        scenario_profits,
        production_cost,
        mean_revenue,
        mean_leftover,
        mean_shortage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::*;
    use crate::demand::DemandPolicy;
    use float_eq::assert_float_eq;

    fn plan(entries: &[((usize, usize), u64)]) -> AllocationPlan {
        AllocationPlan {
            quantities: entries.iter().copied().collect(),
        }
    }

    #[test]
    fn test_sales_capped_by_production_and_demand() {
        let data = two_by_two();
        // A: 100 units at cost 4; B: 40 units at cost 7
        let plan = plan(&[((0, 0), 100), ((1, 1), 40)]);
        let set = ScenarioSet::from_rows(vec![0, 1], vec![vec![80.0, 130.0], vec![60.0, 20.0]]).unwrap();
        let eval = evaluate_plan(&data, &plan, &set, SalesDomain::Continuous).unwrap();

        let cost = 400.0 + 280.0;
        assert_float_eq!(eval.production_cost, cost, abs <= 1e-9);
        assert_float_eq!(eval.scenario_profits[0], 10.0 * 80.0 + 15.0 * 40.0 - cost, abs <= 1e-9);
        assert_float_eq!(eval.scenario_profits[1], 10.0 * 100.0 + 15.0 * 20.0 - cost, abs <= 1e-9);
        assert_float_eq!(eval.mean_leftover[0], (20.0 + 0.0) / 2.0, abs <= 1e-9);
        assert_float_eq!(eval.mean_shortage[0], (0.0 + 30.0) / 2.0, abs <= 1e-9);
        assert_float_eq!(eval.mean_leftover[1], (0.0 + 20.0) / 2.0, abs <= 1e-9);
        assert_float_eq!(eval.mean_shortage[1], (20.0 + 0.0) / 2.0, abs <= 1e-9);
    }

    #[test]
    fn test_integer_domain_floors_demand() {
        let data = two_by_two();
        let plan = plan(&[((0, 0), 10)]);
        let set = ScenarioSet::from_rows(vec![0, 1], vec![vec![7.9], vec![0.0]]).unwrap();

        let integer = evaluate_plan(&data, &plan, &set, SalesDomain::Integer).unwrap();
        let continuous = evaluate_plan(&data, &plan, &set, SalesDomain::Continuous).unwrap();
        assert_float_eq!(integer.mean_revenue, 70.0, abs <= 1e-9);
        assert_float_eq!(continuous.mean_revenue, 79.0, abs <= 1e-9);
    }

    #[test]
    fn test_empty_plan_has_zero_profit() {
        let data = two_by_two();
        let set = ScenarioSet::mean_demand(&data, DemandPolicy::Normal);
        let eval = evaluate_plan(&data, &AllocationPlan::default(), &set, SalesDomain::Continuous).unwrap();
        assert_eq!(eval.expected_profit(), 0.0);
        assert_float_eq!(eval.total_shortage(), 150.0, abs <= 1e-9);
    }

    #[test]
    fn test_empty_scenario_set_is_rejected() {
        let data = two_by_two();
        let set = ScenarioSet::from_rows(vec![0, 1], vec![vec![], vec![]]).unwrap();
        assert!(evaluate_plan(&data, &AllocationPlan::default(), &set, SalesDomain::Continuous).is_err());
    }

    #[test]
    fn test_profit_stats() {
        let values: Vec<f64> = (1..=11).map(|v| v as f64 * 10.0).collect();
        let stats = ProfitStats::from_samples(&values);

        assert_eq!(stats.samples, 11);
        assert_float_eq!(stats.mean, 60.0, abs <= 1e-9);
        assert_eq!(stats.min, 10.0);
        assert_eq!(stats.max, 110.0);
        assert_eq!(stats.percentile_50, 60.0);
        assert_eq!(stats.percentile_10, 20.0);
        assert_eq!(stats.percentile_90, 100.0);
    }

    #[test]
    fn test_profit_stats_of_nothing() {
        let stats = ProfitStats::from_samples(&[]);
        assert_eq!(stats.samples, 0);
        assert_eq!(stats.mean, 0.0);
    }
}
