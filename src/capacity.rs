/// Plan feasibility checks
/// Checks a fixed plan against product bounds, producer capacities and the budget

use std::fmt;
use crate::config::ModelConfig;
use crate::models::{AllocationPlan, ProblemData};
use crate::solver::ConstraintFamily;

/// One bound a plan breaks
#[derive(Debug, Clone, PartialEq)]
pub struct PlanViolation {
    pub family: ConstraintFamily,
    /// Product or producer name, `"total cost"` for the budget
    pub subject: String,
    pub limit: f64,
    pub actual: f64,
}

impl fmt::Display for PlanViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of {}: limit {:.2}, planned {:.2}", self.family, self.subject, self.limit, self.actual)
    }
}

/// All bounds the plan violates under the given model variant; with activation
/// flags, zero production means "not produced" and skips the lower bound
pub fn check_plan(data: &ProblemData, plan: &AllocationPlan, config: &ModelConfig) -> Vec<PlanViolation> {
    let mut violations = Vec::new();

    for product in &data.products {
        let total = plan.total_for_product(product.id) as f64;
        if let Some(upper) = product.upper_bound {
            if total > upper {
                violations.push(PlanViolation {
                    family: ConstraintFamily::ProductUpper,
                    subject: product.name.clone(),
                    limit: upper,
                    actual: total,
                });
            }
        }
        let idle = config.use_product_flags && total == 0.0;
        if !idle && total < product.lower_bound {
            violations.push(PlanViolation {
                family: ConstraintFamily::ProductLower,
                subject: product.name.clone(),
                limit: product.lower_bound,
                actual: total,
            });
        }
    }

    for producer in &data.producers {
        let total = plan.total_for_producer(producer.id) as f64;
        if let Some(upper) = producer.upper_capacity {
            if total > upper {
                violations.push(PlanViolation {
                    family: ConstraintFamily::ProducerUpper,
                    subject: producer.name.clone(),
                    limit: upper,
                    actual: total,
                });
            }
        }
        let idle = config.use_producer_flags && total == 0.0;
        if !idle && total < producer.lower_capacity {
            violations.push(PlanViolation {
                family: ConstraintFamily::ProducerLower,
                subject: producer.name.clone(),
                limit: producer.lower_capacity,
                actual: total,
            });
        }
    }

    if config.use_budget {
        if let Some(budget) = data.budget {
            let cost = plan.total_cost(data);
            if cost > budget + 1e-6 {
                violations.push(PlanViolation {
                    family: ConstraintFamily::Budget,
                    subject: "total cost".to_string(),
                    limit: budget,
                    actual: cost,
                });
            }
        }
    }
    violations
}

/// Unused capacity per producer, `None` for uncapped producers
pub fn remaining_capacity(data: &ProblemData, plan: &AllocationPlan) -> Vec<(String, Option<f64>)> {
    data.producers
        .iter()
        .map(|producer| {
            let used = plan.total_for_producer(producer.id) as f64;
            (producer.name.clone(), producer.upper_capacity.map(|upper| (upper - used).max(0.0)))
        })
        .collect()
}
