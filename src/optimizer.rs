/// Allocation model builder
/// Translates products, producers, costs, capacities and demand into a mixed-integer
/// program and reads plans back out of a solve.
///
/// A built [`AllocationModel`] is the unsolved state. [`AllocationModel::solve`]
/// either yields a [`SolvedModel`] (optimal, or feasible and flagged non-optimal)
/// or an error for every other terminal status.

use std::collections::BTreeMap;
use tracing::{debug, info, warn};
use crate::config::{ModelConfig, SalesDomain};
use crate::demand::ScenarioSet;
use crate::error::{AllocationError, Result};
use crate::models::{AllocationPlan, ProblemData, SalesRealization};
use crate::solver::{
    Comparison, ConstraintFamily, LinearExpr, LinearProgram, Sense, SolveStatus, SolverBackend, SolverOutcome,
    VarId, VarKind, VariableSpec,
};

/// What the model knows about demand
#[derive(Clone, Copy, Debug)]
pub enum DemandInput<'a> {
    /// Two-stage model: production now, sales per scenario after demand is seen
    Scenarios(&'a ScenarioSet),
    /// Production only, margin-weighted objective; `demand_cap` (one value per
    /// product, data order) limits each product to `min(demand, upper bound)`
    PointEstimate { demand_cap: Option<&'a [f64]> },
}

/// Built, not yet solved
#[derive(Debug, Clone)]
pub struct AllocationModel {
    program: LinearProgram,
    production: BTreeMap<(usize, usize), VarId>,
    /// Row per product (data order), column per scenario
    sales: Vec<Vec<VarId>>,
    product_flags: BTreeMap<usize, VarId>,
    producer_flags: BTreeMap<usize, VarId>,
    product_ids: Vec<usize>,
    scenario_count: usize,
    tie_break_epsilon: f64,
}

impl AllocationModel {
    /// Assemble variables, objective and constraints for one model variant
    pub fn build(data: &ProblemData, config: &ModelConfig, input: DemandInput<'_>) -> Result<Self> {
        config.validate()?;
        if config.use_budget && data.budget.is_none() {
            return Err(AllocationError::MissingBudget);
        }
        check_coverage(data, config)?;

        let demand_cap = match input {
            DemandInput::Scenarios(scenarios) => {
                if scenarios.product_ids != data.products.iter().map(|p| p.id).collect::<Vec<_>>() {
                    return Err(AllocationError::data("scenario rows do not match the product list"));
                }
                if scenarios.is_empty() {
                    return Err(AllocationError::data("scenario set is empty"));
                }
                None
            }
            DemandInput::PointEstimate { demand_cap } => {
                if let Some(cap) = demand_cap {
                    if cap.len() != data.products.len() {
                        return Err(AllocationError::data("demand cap must have one value per product"));
                    }
                }
                demand_cap
            }
        };

        let mut model = AllocationModel {
            program: LinearProgram::new(Sense::Maximise),
            production: BTreeMap::new(),
            sales: Vec::new(),
            product_flags: BTreeMap::new(),
            producer_flags: BTreeMap::new(),
            product_ids: data.products.iter().map(|p| p.id).collect(),
            scenario_count: 0,
            tie_break_epsilon: config.tie_break_epsilon,
        };

        // Product caps, tightened by the demand draw in the point-estimate variant
        let caps: Vec<Option<f64>> = data
            .products
            .iter()
            .enumerate()
            .map(|(row, p)| match (p.upper_bound, demand_cap.map(|c| c[row].max(0.0))) {
                (Some(upper), Some(demand)) => Some(upper.min(demand)),
                (upper, demand) => upper.or(demand),
            })
            .collect();

        model.add_production_variables(data, &caps);
        if let DemandInput::Scenarios(scenarios) = input {
            model.add_sales_variables(data, scenarios, config.sales_domain);
        }
        if config.use_product_flags {
            for product in &data.products {
                let flag = model.program.add_variable(binary(format!("b_{}", product.name)));
                model.product_flags.insert(product.id, flag);
            }
        }
        if config.use_producer_flags {
            for producer in &data.producers {
                let flag = model.program.add_variable(binary(format!("z_{}", producer.name)));
                model.producer_flags.insert(producer.id, flag);
            }
        }

        model.set_objective(data, config, input)?;
        model.add_product_constraints(data, &caps)?;
        model.add_producer_constraints(data)?;
        if let DemandInput::Scenarios(scenarios) = input {
            model.add_sales_constraints(scenarios);
        }
        if config.use_budget {
            model.add_budget_constraint(data);
        }

        info!(
            variables = model.program.num_variables(),
            integer_variables = model.program.integer_variable_count(),
            constraints = model.program.num_constraints(),
            scenarios = model.scenario_count,
            "Built allocation model"
        );
        Ok(model)
    }

    fn add_production_variables(&mut self, data: &ProblemData, caps: &[Option<f64>]) {
        for entry in data.cost_entries() {
            let (Some(row), Some(product), Some(producer)) = (
                data.product_index(entry.product_id),
                data.get_product(entry.product_id),
                data.get_producer(entry.producer_id),
            ) else {
                continue;
            };
            let var = self.program.add_variable(VariableSpec {
                name: format!("x_{}_{}", product.name, producer.name),
                kind: VarKind::Integer,
                lower: 0.0,
                upper: caps[row],
            });
            self.production.insert((entry.product_id, entry.producer_id), var);
        }
    }

    fn add_sales_variables(&mut self, data: &ProblemData, scenarios: &ScenarioSet, domain: SalesDomain) {
        let kind = match domain {
            SalesDomain::Integer => VarKind::Integer,
            SalesDomain::Continuous => VarKind::Continuous,
        };
        self.scenario_count = scenarios.len();
        for product in &data.products {
            let row = (0..scenarios.len())
                .map(|s| {
                    self.program.add_variable(VariableSpec {
                        name: format!("y_{}_{}", product.name, s),
                        kind,
                        lower: 0.0,
                        upper: None,
                    })
                })
                .collect();
            self.sales.push(row);
        }
    }

    fn set_objective(&mut self, data: &ProblemData, config: &ModelConfig, input: DemandInput<'_>) -> Result<()> {
        let mut objective = LinearExpr::new();
        match input {
            DemandInput::Scenarios(_) => {
                // First stage: cost paid once per unit
                for (&(product_id, producer_id), &var) in &self.production {
                    let cost = data.unit_cost(product_id, producer_id).unwrap_or(0.0);
                    objective.add_term(var, -cost + self.tie_break_epsilon);
                }
                // Second stage: revenue averaged over equally likely scenarios
                let n = self.scenario_count as f64;
                for (product, row) in data.products.iter().zip(&self.sales) {
                    for &var in row {
                        objective.add_term(var, product.selling_price / n);
                    }
                }
            }
            DemandInput::PointEstimate { .. } => {
                for (&(product_id, producer_id), &var) in &self.production {
                    let Some(product) = data.get_product(product_id) else {
                        continue;
                    };
                    let likelihood = if config.use_sale_probability {
                        product.sale_probability().ok_or_else(|| {
                            AllocationError::data(format!("product '{}' has no sales history", product.name))
                        })?
                    } else {
                        1.0
                    };
                    let cost = data.unit_cost(product_id, producer_id).unwrap_or(0.0);
                    objective.add_term(var, product.selling_price * likelihood - cost + self.tie_break_epsilon);
                }
            }
        }
        self.program.objective = objective;
        Ok(())
    }

    fn product_aggregate(&self, product_id: usize) -> LinearExpr {
        let mut expr = LinearExpr::new();
        for (_, &var) in self.production.range((product_id, usize::MIN)..=(product_id, usize::MAX)) {
            expr.add_term(var, 1.0);
        }
        expr
    }

    fn producer_aggregate(&self, producer_id: usize) -> LinearExpr {
        let mut expr = LinearExpr::new();
        for (_, &var) in self.production.iter().filter(|((_, j), _)| *j == producer_id) {
            expr.add_term(var, 1.0);
        }
        expr
    }

    fn add_product_constraints(&mut self, data: &ProblemData, caps: &[Option<f64>]) -> Result<()> {
        for (row, product) in data.products.iter().enumerate() {
            let aggregate = self.product_aggregate(product.id);
            match self.product_flags.get(&product.id).copied() {
                Some(flag) => {
                    // Upper always present: binding at zero when the flag is off
                    let gate = match caps[row] {
                        Some(cap) => cap,
                        None => producer_capacity_sum(data, product.id).ok_or_else(|| {
                            AllocationError::data(format!(
                                "product '{}' needs an upper bound or capped producers to use an activation flag",
                                product.name
                            ))
                        })?,
                    };
                    self.program.add_constraint(
                        aggregate.clone().with_term(flag, -gate),
                        Comparison::LessEq,
                        0.0,
                        ConstraintFamily::ProductUpper,
                    );
                    if product.lower_bound > 0.0 {
                        self.program.add_constraint(
                            aggregate.with_term(flag, -product.lower_bound),
                            Comparison::GreaterEq,
                            0.0,
                            ConstraintFamily::ProductLower,
                        );
                    }
                }
                None => {
                    if let Some(cap) = caps[row] {
                        self.program.add_constraint(aggregate.clone(), Comparison::LessEq, cap, ConstraintFamily::ProductUpper);
                    }
                    if product.lower_bound > 0.0 {
                        self.program.add_constraint(
                            aggregate,
                            Comparison::GreaterEq,
                            product.lower_bound,
                            ConstraintFamily::ProductLower,
                        );
                    }
                }
            }
        }
        Ok(())
    }

    fn add_producer_constraints(&mut self, data: &ProblemData) -> Result<()> {
        for producer in &data.producers {
            let aggregate = self.producer_aggregate(producer.id);
            match self.producer_flags.get(&producer.id).copied() {
                Some(flag) => {
                    let gate = match producer.upper_capacity {
                        Some(upper) => upper,
                        None => product_bound_sum(data, producer.id).ok_or_else(|| {
                            AllocationError::data(format!(
                                "producer '{}' needs an upper capacity or capped products to use an activation flag",
                                producer.name
                            ))
                        })?,
                    };
                    self.program.add_constraint(
                        aggregate.clone().with_term(flag, -gate),
                        Comparison::LessEq,
                        0.0,
                        ConstraintFamily::ProducerUpper,
                    );
                    if producer.lower_capacity > 0.0 {
                        self.program.add_constraint(
                            aggregate.with_term(flag, -producer.lower_capacity),
                            Comparison::GreaterEq,
                            0.0,
                            ConstraintFamily::ProducerLower,
                        );
                    }
                }
                None => {
                    if let Some(upper) = producer.upper_capacity {
                        self.program.add_constraint(aggregate.clone(), Comparison::LessEq, upper, ConstraintFamily::ProducerUpper);
                    }
                    if producer.lower_capacity > 0.0 {
                        self.program.add_constraint(
                            aggregate,
                            Comparison::GreaterEq,
                            producer.lower_capacity,
                            ConstraintFamily::ProducerLower,
                        );
                    }
                }
            }
        }
        Ok(())
    }

    /// Sales bounded by production and by demand, as two separate rows
    fn add_sales_constraints(&mut self, scenarios: &ScenarioSet) {
        for (row, product_id) in self.product_ids.clone().into_iter().enumerate() {
            let aggregate = self.product_aggregate(product_id);
            for s in 0..self.scenario_count {
                let sales = self.sales[row][s];

                let mut within_production = LinearExpr::new().with_term(sales, 1.0);
                for &(var, coefficient) in &aggregate.terms {
                    within_production.add_term(var, -coefficient);
                }
                self.program.add_constraint(within_production, Comparison::LessEq, 0.0, ConstraintFamily::SalesProduction);

                self.program.add_constraint(
                    LinearExpr::new().with_term(sales, 1.0),
                    Comparison::LessEq,
                    scenarios.demand(row, s),
                    ConstraintFamily::SalesDemand,
                );
            }
        }
    }

    fn add_budget_constraint(&mut self, data: &ProblemData) {
        let Some(budget) = data.budget else {
            return;
        };
        let mut total_cost = LinearExpr::new();
        for (&(product_id, producer_id), &var) in &self.production {
            total_cost.add_term(var, data.unit_cost(product_id, producer_id).unwrap_or(0.0));
        }
        self.program.add_constraint(total_cost, Comparison::LessEq, budget, ConstraintFamily::Budget);
    }

    pub fn program(&self) -> &LinearProgram {
        &self.program
    }

    pub fn production_var(&self, product_id: usize, producer_id: usize) -> Option<VarId> {
        self.production.get(&(product_id, producer_id)).copied()
    }

    pub fn production_var_count(&self) -> usize {
        self.production.len()
    }

    pub fn sales_var_count(&self) -> usize {
        self.sales.iter().map(|row| row.len()).sum()
    }

    pub fn scenario_count(&self) -> usize {
        self.scenario_count
    }

    pub fn product_flag(&self, product_id: usize) -> Option<VarId> {
        self.product_flags.get(&product_id).copied()
    }

    pub fn producer_flag(&self, producer_id: usize) -> Option<VarId> {
        self.producer_flags.get(&producer_id).copied()
    }

    /// Solve and move to the solved state, or fail with the terminal status
    pub fn solve(self, backend: &dyn SolverBackend) -> Result<SolvedModel> {
        let outcome = backend.solve(&self.program);
        match outcome.status {
            SolveStatus::Optimal => Ok(SolvedModel { model: self, outcome }),
            SolveStatus::Feasible => {
                warn!("Accepted a feasible but non-optimal solution");
                Ok(SolvedModel { model: self, outcome })
            }
            SolveStatus::Infeasible => {
                let suspect = self.diagnose_infeasibility(backend);
                warn!(suspect = ?suspect, "Allocation model is infeasible");
                Err(AllocationError::Infeasible { suspect })
            }
            SolveStatus::Unbounded => Err(AllocationError::Unbounded),
            status => Err(AllocationError::NotOptimal { status }),
        }
    }

    /// First relaxable family whose removal makes the model solvable.
    /// Skipped under a time limit: a timed-out relaxed solve leaves its worker running.
    fn diagnose_infeasibility(&self, backend: &dyn SolverBackend) -> Option<ConstraintFamily> {
        if let Some(limit) = backend.time_limit() {
            debug!(limit_ms = limit.as_millis() as u64, "Infeasibility diagnosis skipped under a time limit");
            return None;
        }
        for family in ConstraintFamily::RELAXABLE {
            if self.program.count_family(family) == 0 {
                continue;
            }
            let relaxed = self.program.without_family(family);
            let status = backend.solve(&relaxed).status;
            debug!(family = %family, status = ?status, "Relaxed solve");
            if matches!(status, SolveStatus::Optimal | SolveStatus::Feasible | SolveStatus::Unbounded) {
                return Some(family);
            }
        }
        None
    }
}

/// Accepted solve of an [`AllocationModel`]
#[derive(Debug, Clone)]
pub struct SolvedModel {
    model: AllocationModel,
    outcome: SolverOutcome,
}

impl SolvedModel {
    pub fn status(&self) -> &SolveStatus {
        &self.outcome.status
    }

    /// False when the solution was accepted without an optimality proof
    pub fn is_optimal(&self) -> bool {
        self.outcome.status == SolveStatus::Optimal
    }

    pub fn model(&self) -> &AllocationModel {
        &self.model
    }

    pub fn values(&self) -> &[f64] {
        &self.outcome.values
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.outcome.elapsed
    }

    /// Objective as the solver saw it, tie-break terms included
    pub fn objective_value(&self) -> f64 {
        self.outcome
            .objective
            .unwrap_or_else(|| self.model.program.objective_value(&self.outcome.values))
    }

    /// Objective without the tie-break terms
    pub fn expected_profit(&self) -> f64 {
        let units: f64 = self.model.production.values().map(|v| self.value(*v)).sum();
        self.objective_value() - self.model.tie_break_epsilon * units
    }

    fn value(&self, var: VarId) -> f64 {
        self.outcome.values.get(var.0).copied().unwrap_or(0.0)
    }

    pub fn plan(&self) -> AllocationPlan {
        AllocationPlan {
            quantities: self
                .model
                .production
                .iter()
                .map(|(&key, &var)| (key, self.value(var).round().max(0.0) as u64))
                .collect(),
        }
    }

    /// Per-scenario sales, `None` for the point-estimate variant
    pub fn sales(&self) -> Option<SalesRealization> {
        if self.model.sales.is_empty() {
            return None;
        }
        Some(SalesRealization {
            product_ids: self.model.product_ids.clone(),
            sold: self
                .model
                .sales
                .iter()
                .map(|row| row.iter().map(|&var| self.value(var).max(0.0)).collect())
                .collect(),
        })
    }

    pub fn product_active(&self, product_id: usize) -> Option<bool> {
        self.model.product_flag(product_id).map(|v| self.value(v) > 0.5)
    }

    pub fn producer_active(&self, producer_id: usize) -> Option<bool> {
        self.model.producer_flag(producer_id).map(|v| self.value(v) > 0.5)
    }
}

/// Build-time check for lower bounds no producer can serve
fn check_coverage(data: &ProblemData, config: &ModelConfig) -> Result<()> {
    if !config.validate_coverage {
        return Ok(());
    }
    if !config.use_product_flags {
        for product in &data.products {
            if product.lower_bound > 0.0 && data.producers_for(product.id).is_empty() {
                return Err(AllocationError::UncoveredProduct {
                    product: product.name.clone(),
                    lower_bound: product.lower_bound,
                });
            }
        }
    }
    if !config.use_producer_flags {
        for producer in &data.producers {
            let serves_any = data.cost_entries().any(|c| c.producer_id == producer.id);
            if producer.lower_capacity > 0.0 && !serves_any {
                return Err(AllocationError::data(format!(
                    "producer '{}' has minimum capacity {} but makes no product",
                    producer.name, producer.lower_capacity
                )));
            }
        }
    }
    Ok(())
}

/// Sum of the capacities of producers able to make the product, if all are capped
fn producer_capacity_sum(data: &ProblemData, product_id: usize) -> Option<f64> {
    data.producers_for(product_id)
        .into_iter()
        .map(|j| data.get_producer(j).and_then(|p| p.upper_capacity))
        .sum()
}

/// Sum of the upper bounds of products the producer makes, if all are capped
fn product_bound_sum(data: &ProblemData, producer_id: usize) -> Option<f64> {
    data.cost_entries()
        .filter(|c| c.producer_id == producer_id)
        .map(|c| data.get_product(c.product_id).and_then(|p| p.upper_bound))
        .sum()
}

fn binary(name: String) -> VariableSpec {
    VariableSpec {
        name,
        kind: VarKind::Binary,
        lower: 0.0,
        upper: Some(1.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demand::{generate_scenarios, DemandPolicy};
    use crate::models::fixtures::*;
    use crate::solver::MicroLpBackend;
    use float_eq::assert_float_eq;
    use std::cell::Cell;
    use std::time::Duration;

    /// Backend that always answers with a fixed status
    struct FixedStatus(SolveStatus);

    impl SolverBackend for FixedStatus {
        fn solve(&self, program: &LinearProgram) -> SolverOutcome {
            if self.0.is_accepted() {
                let values = vec![0.0; program.num_variables()];
                SolverOutcome {
                    status: self.0.clone(),
                    objective: Some(program.objective_value(&values)),
                    values,
                    elapsed: Duration::ZERO,
                }
            } else {
                SolverOutcome::failed(self.0.clone(), Duration::ZERO)
            }
        }
    }

    fn scenarios(rows: Vec<Vec<f64>>) -> ScenarioSet {
        ScenarioSet::from_rows((0..rows.len()).collect(), rows).unwrap()
    }

    #[test]
    fn test_absent_pairs_get_no_variable() {
        let data = ProblemData::new(
            vec![
                product(0, "A", 10.0, 5.0, 1.0, (0.0, Some(50.0))),
                product(1, "B", 10.0, 5.0, 1.0, (0.0, Some(50.0))),
            ],
            vec![producer(0, "P1", 0.0, None), producer(1, "P2", 0.0, None)],
            vec![cost(0, 0, 1.0), cost(1, 1, 2.0)],
            None,
        )
        .unwrap();
        let set = scenarios(vec![vec![5.0, 6.0], vec![4.0, 3.0]]);
        let model = AllocationModel::build(&data, &ModelConfig::new(), DemandInput::Scenarios(&set)).unwrap();

        assert_eq!(model.production_var_count(), 2);
        assert!(model.production_var(0, 1).is_none());
        assert!(model.production_var(1, 0).is_none());
        assert_eq!(model.sales_var_count(), 4);
        // One sales variable and two rows per product per scenario
        assert_eq!(model.program().count_family(ConstraintFamily::SalesProduction), 4);
        assert_eq!(model.program().count_family(ConstraintFamily::SalesDemand), 4);
    }

    #[test]
    fn test_uncovered_lower_bound_fails_at_build_time() {
        let data = ProblemData::new(
            vec![
                product(0, "A", 10.0, 5.0, 1.0, (0.0, Some(50.0))),
                product(1, "C", 10.0, 5.0, 1.0, (10.0, Some(50.0))),
            ],
            vec![producer(0, "P1", 0.0, None)],
            vec![cost(0, 0, 1.0)],
            None,
        )
        .unwrap();
        let result = AllocationModel::build(&data, &ModelConfig::new(), DemandInput::PointEstimate { demand_cap: None });

        match result {
            Err(AllocationError::UncoveredProduct { product, lower_bound }) => {
                assert_eq!(product, "C");
                assert_eq!(lower_bound, 10.0);
            }
            other => panic!("expected UncoveredProduct, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_uncovered_lower_bound_left_to_solver_reports_product_bounds() {
        let data = ProblemData::new(
            vec![
                product(0, "A", 10.0, 5.0, 1.0, (0.0, Some(50.0))),
                product(1, "C", 10.0, 5.0, 1.0, (10.0, Some(50.0))),
            ],
            vec![producer(0, "P1", 0.0, Some(100.0))],
            vec![cost(0, 0, 1.0)],
            None,
        )
        .unwrap();
        let mut config = ModelConfig::new();
        config.validate_coverage = false;
        let model = AllocationModel::build(&data, &config, DemandInput::PointEstimate { demand_cap: None }).unwrap();
        let err = model.solve(&MicroLpBackend::new()).unwrap_err();

        assert!(err.is_infeasible());
        assert_eq!(err.suspect(), Some(ConstraintFamily::ProductLower));
    }

    #[test]
    fn test_activation_flag_forced_off_for_uncovered_product() {
        let data = ProblemData::new(
            vec![
                product(0, "A", 10.0, 5.0, 1.0, (0.0, Some(50.0))),
                product(1, "C", 10.0, 5.0, 1.0, (10.0, Some(50.0))),
            ],
            vec![producer(0, "P1", 0.0, Some(100.0))],
            vec![cost(0, 0, 1.0)],
            None,
        )
        .unwrap();
        let config = ModelConfig::new().with_product_flags();
        let solved = AllocationModel::build(&data, &config, DemandInput::PointEstimate { demand_cap: None })
            .unwrap()
            .solve(&MicroLpBackend::new())
            .unwrap();

        assert_eq!(solved.product_active(1), Some(false));
        assert_eq!(solved.plan().total_for_product(1), 0);
        assert_eq!(solved.product_active(0), Some(true));
        assert_eq!(solved.plan().total_for_product(0), 50);
    }

    #[test]
    fn test_sales_bound_switches_between_production_and_demand() {
        // One product, one producer, production fixed at 10 through both bounds
        let data = ProblemData::new(
            vec![product(0, "A", 10.0, 10.0, 1.0, (10.0, Some(10.0)))],
            vec![producer(0, "P1", 0.0, None)],
            vec![cost(0, 0, 1.0)],
            None,
        )
        .unwrap();
        let set = scenarios(vec![vec![4.0, 25.0]]);
        let solved = AllocationModel::build(&data, &ModelConfig::new(), DemandInput::Scenarios(&set))
            .unwrap()
            .solve(&MicroLpBackend::new())
            .unwrap();
        let sales = solved.sales().unwrap();

        // Demand binds in scenario 0, production in scenario 1
        assert_float_eq!(sales.sold[0][0], 4.0, abs <= 1e-6);
        assert_float_eq!(sales.sold[0][1], 10.0, abs <= 1e-6);
        assert_float_eq!(solved.expected_profit(), 10.0 * (4.0 + 10.0) / 2.0 - 10.0, abs <= 1e-6);
    }

    #[test]
    fn test_objective_decomposes_into_cost_and_average_revenue() {
        let data = two_by_two();
        let set = generate_scenarios(&data, DemandPolicy::Normal, 5, 42).unwrap();
        let solved = AllocationModel::build(&data, &ModelConfig::new().scenario_count(5), DemandInput::Scenarios(&set))
            .unwrap()
            .solve(&MicroLpBackend::new())
            .unwrap();

        let plan = solved.plan();
        let sales = solved.sales().unwrap();
        let cost = plan.total_cost(&data);
        let revenue: f64 = data
            .products
            .iter()
            .enumerate()
            .map(|(row, p)| p.selling_price * sales.mean_sold(row))
            .sum();

        assert_float_eq!(solved.objective_value(), revenue - cost, rmax <= 1e-6);

        for (row, product) in data.products.iter().enumerate() {
            let produced = plan.total_for_product(product.id) as f64;
            for s in 0..set.len() {
                assert!(sales.sold[row][s] <= produced + 1e-6);
                assert!(sales.sold[row][s] <= set.demand(row, s) + 1e-6);
            }
        }
    }

    #[test]
    fn test_point_estimate_saturates_capacity() {
        let data = two_by_two();
        let solved = AllocationModel::build(&data, &ModelConfig::new(), DemandInput::PointEstimate { demand_cap: None })
            .unwrap()
            .solve(&MicroLpBackend::new())
            .unwrap();
        let plan = solved.plan();

        // 270 units of capacity; B has the higher margin and takes its full bound
        assert_eq!(plan.total_for_product(1), 100);
        assert_eq!(plan.total_for_product(0), 170);
        assert_eq!(plan.total_for_producer(0), 120);
        assert_eq!(plan.total_for_producer(1), 150);
        assert_float_eq!(solved.expected_profit(), 1770.0, abs <= 1e-6);
    }

    #[test]
    fn test_point_estimate_demand_cap() {
        let data = two_by_two();
        let cap = [30.0, 1000.0];
        let solved = AllocationModel::build(
            &data,
            &ModelConfig::new(),
            DemandInput::PointEstimate { demand_cap: Some(&cap) },
        )
        .unwrap()
        .solve(&MicroLpBackend::new())
        .unwrap();

        assert_eq!(solved.plan().total_for_product(0), 30);
        assert_eq!(solved.plan().total_for_product(1), 100);
    }

    #[test]
    fn test_sale_probability_weights_point_estimate() {
        let mut data = two_by_two();
        // Expected revenue 10 * 0.3 = 3 is below every unit cost of A
        data.products[0].sales_history = vec![0.3, 0.3];
        data.products[1].sales_history = vec![1.0];
        let mut config = ModelConfig::new();
        config.use_sale_probability = true;
        let solved = AllocationModel::build(&data, &config, DemandInput::PointEstimate { demand_cap: None })
            .unwrap()
            .solve(&MicroLpBackend::new())
            .unwrap();

        assert_eq!(solved.plan().total_for_product(0), 0);
        assert_eq!(solved.plan().total_for_product(1), 100);
    }

    #[test]
    fn test_budget_requested_but_missing() {
        let data = two_by_two();
        let result = AllocationModel::build(
            &data,
            &ModelConfig::new().with_budget(),
            DemandInput::PointEstimate { demand_cap: None },
        );
        assert!(matches!(result, Err(AllocationError::MissingBudget)));
    }

    #[test]
    fn test_budget_binds_and_is_monotone() {
        let mut data = two_by_two();
        let config = ModelConfig::new().with_budget();
        let solve_with = |data: &ProblemData| {
            AllocationModel::build(data, &config, DemandInput::PointEstimate { demand_cap: None })
                .unwrap()
                .solve(&MicroLpBackend::new())
                .unwrap()
        };

        data.budget = Some(1000.0);
        let loose = solve_with(&data);
        assert!(loose.plan().total_cost(&data) <= 1000.0 + 1e-6);
        assert_eq!(loose.model().program().count_family(ConstraintFamily::Budget), 1);

        data.budget = Some(600.0);
        let tight = solve_with(&data);
        assert!(tight.plan().total_cost(&data) <= 600.0 + 1e-6);
        assert!(tight.expected_profit() <= loose.expected_profit() + 1e-6);
    }

    #[test]
    fn test_budget_survives_any_scenario_count() {
        let mut data = two_by_two();
        data.budget = Some(500.0);
        let config = ModelConfig::new().with_budget();
        for count in [1, 3, 8] {
            let set = generate_scenarios(&data, DemandPolicy::Normal, count, 9).unwrap();
            let model = AllocationModel::build(&data, &config, DemandInput::Scenarios(&set)).unwrap();
            assert_eq!(model.program().count_family(ConstraintFamily::Budget), 1);
        }
    }

    #[test]
    fn test_infeasible_budget_is_diagnosed() {
        let mut data = two_by_two();
        data.products[0].lower_bound = 100.0;
        data.budget = Some(50.0);
        let err = AllocationModel::build(
            &data,
            &ModelConfig::new().with_budget(),
            DemandInput::PointEstimate { demand_cap: None },
        )
        .unwrap()
        .solve(&MicroLpBackend::new())
        .unwrap_err();

        assert!(matches!(err, AllocationError::Infeasible { suspect: Some(ConstraintFamily::Budget) }));
    }

    #[test]
    fn test_infeasible_capacity_is_diagnosed() {
        let mut data = two_by_two();
        data.products[0].lower_bound = 200.0;
        data.products[1].lower_bound = 100.0;
        let err = AllocationModel::build(&data, &ModelConfig::new(), DemandInput::PointEstimate { demand_cap: None })
            .unwrap()
            .solve(&MicroLpBackend::new())
            .unwrap_err();

        assert!(matches!(err, AllocationError::Infeasible { suspect: Some(ConstraintFamily::ProductLower) }));
    }

    #[test]
    fn test_time_limited_backend_skips_diagnosis() {
        struct LimitedInfeasible {
            calls: Cell<usize>,
        }

        impl SolverBackend for LimitedInfeasible {
            fn solve(&self, _program: &LinearProgram) -> SolverOutcome {
                self.calls.set(self.calls.get() + 1);
                SolverOutcome::failed(SolveStatus::Infeasible, Duration::ZERO)
            }

            fn time_limit(&self) -> Option<Duration> {
                Some(Duration::from_secs(1))
            }
        }

        let mut data = two_by_two();
        data.products[0].lower_bound = 200.0;
        data.products[1].lower_bound = 100.0;
        let backend = LimitedInfeasible { calls: Cell::new(0) };
        let err = AllocationModel::build(&data, &ModelConfig::new(), DemandInput::PointEstimate { demand_cap: None })
            .unwrap()
            .solve(&backend)
            .unwrap_err();

        assert!(matches!(err, AllocationError::Infeasible { suspect: None }));
        assert_eq!(backend.calls.get(), 1);
    }

    #[test]
    fn test_producer_minimum_with_flags_allows_idle_producer() {
        let data = ProblemData::new(
            vec![product(0, "A", 10.0, 5.0, 1.0, (0.0, Some(30.0)))],
            vec![producer(0, "P1", 0.0, Some(100.0)), producer(1, "P2", 50.0, Some(100.0))],
            vec![cost(0, 0, 1.0), cost(0, 1, 2.0)],
            None,
        )
        .unwrap();

        // Without flags P2 must run at 50 though only 30 units are allowed
        let err = AllocationModel::build(&data, &ModelConfig::new(), DemandInput::PointEstimate { demand_cap: None })
            .unwrap()
            .solve(&MicroLpBackend::new())
            .unwrap_err();
        assert!(err.is_infeasible());

        let solved = AllocationModel::build(
            &data,
            &ModelConfig::new().with_producer_flags(),
            DemandInput::PointEstimate { demand_cap: None },
        )
        .unwrap()
        .solve(&MicroLpBackend::new())
        .unwrap();
        assert_eq!(solved.producer_active(1), Some(false));
        assert_eq!(solved.plan().quantity(0, 0), 30);
    }

    #[test]
    fn test_integer_sales_take_whole_units() {
        let data = ProblemData::new(
            vec![product(0, "A", 10.0, 10.0, 1.0, (0.0, Some(20.0)))],
            vec![producer(0, "P1", 0.0, None)],
            vec![cost(0, 0, 1.0)],
            None,
        )
        .unwrap();
        let set = scenarios(vec![vec![7.6, 7.6]]);
        let solved = AllocationModel::build(
            &data,
            &ModelConfig::new().sales_domain(SalesDomain::Integer),
            DemandInput::Scenarios(&set),
        )
        .unwrap()
        .solve(&MicroLpBackend::new())
        .unwrap();

        assert_eq!(solved.plan().total_for_product(0), 7);
        assert_float_eq!(solved.sales().unwrap().sold[0][0], 7.0, abs <= 1e-6);
    }

    #[test]
    fn test_tie_break_epsilon_is_excluded_from_profit() {
        // Zero margin: without a tie-break any quantity is optimal
        let data = ProblemData::new(
            vec![product(0, "A", 5.0, 10.0, 1.0, (0.0, Some(20.0)))],
            vec![producer(0, "P1", 0.0, None)],
            vec![cost(0, 0, 5.0)],
            None,
        )
        .unwrap();
        let solved = AllocationModel::build(
            &data,
            &ModelConfig::new().tie_break_epsilon(1e-4),
            DemandInput::PointEstimate { demand_cap: None },
        )
        .unwrap()
        .solve(&MicroLpBackend::new())
        .unwrap();

        assert_eq!(solved.plan().total_for_product(0), 20);
        assert_float_eq!(solved.expected_profit(), 0.0, abs <= 1e-6);
        assert_float_eq!(solved.objective_value(), 20.0 * 1e-4, abs <= 1e-6);
    }

    #[test]
    fn test_feasible_is_accepted_but_flagged() {
        let data = two_by_two();
        let solved = AllocationModel::build(&data, &ModelConfig::new(), DemandInput::PointEstimate { demand_cap: None })
            .unwrap()
            .solve(&FixedStatus(SolveStatus::Feasible))
            .unwrap();
        assert!(!solved.is_optimal());
        assert_eq!(solved.status(), &SolveStatus::Feasible);
    }

    #[test]
    fn test_timeout_and_unbounded_propagate() {
        let data = two_by_two();
        let build = || {
            AllocationModel::build(&data, &ModelConfig::new(), DemandInput::PointEstimate { demand_cap: None }).unwrap()
        };

        let err = build().solve(&FixedStatus(SolveStatus::TimedOut)).unwrap_err();
        assert!(matches!(err, AllocationError::NotOptimal { status: SolveStatus::TimedOut }));

        let err = build().solve(&FixedStatus(SolveStatus::Unbounded)).unwrap_err();
        assert!(matches!(err, AllocationError::Unbounded));
    }

    #[test]
    fn test_identical_models_give_identical_optimum() {
        let data = two_by_two();
        let set = generate_scenarios(&data, DemandPolicy::Normal, 5, 77).unwrap();
        let solve = || {
            AllocationModel::build(&data, &ModelConfig::new(), DemandInput::Scenarios(&set))
                .unwrap()
                .solve(&MicroLpBackend::new())
                .unwrap()
                .objective_value()
        };
        assert_float_eq!(solve(), solve(), rmax <= 1e-9);
    }
}
