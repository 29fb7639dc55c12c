/// Policy comparison
///
/// - **RP**: stochastic model over the training scenarios
/// - **EV / EEV**: mean-demand plan, replayed on an independent test set
/// - **VSS**: `RP - EEV`
/// - **WS / EVPI**: perfect-information bound (optional)
/// - **SAA**: best of several independently sampled plans on a common evaluation set
///
/// A failed solve never aborts a comparison; it is recorded on the policy it belongs to.

use tracing::{info, warn};
use crate::capacity::check_plan;
use crate::config::{ComparisonConfig, ModelConfig, SaaConfig};
use crate::demand::{generate_scenarios, ScenarioSet};
use crate::error::{AllocationError, Result};
use crate::models::{AllocationPlan, ProblemData};
use crate::monte_carlo::{evaluate_plan, PlanEvaluation};
use crate::optimizer::{AllocationModel, DemandInput, SolvedModel};
use crate::solver::{ConstraintFamily, SolverBackend};

/// Tolerance for the RP >= in-sample EEV check
const DOMINANCE_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq)]
pub enum PolicyStatus {
    Optimal,
    /// Accepted without an optimality proof; comparisons built on it are unreliable
    NonOptimal,
    Failed {
        reason: String,
        suspect: Option<ConstraintFamily>,
    },
}

/// Value of one policy; failed policies carry the zero sentinel
#[derive(Debug, Clone)]
pub struct PolicyResult {
    pub value: f64,
    pub status: PolicyStatus,
    pub plan: Option<AllocationPlan>,
}

impl PolicyResult {
    pub fn failed(err: &AllocationError) -> Self {
        PolicyResult {
            value: 0.0,
            status: PolicyStatus::Failed {
                reason: err.to_string(),
                suspect: err.suspect(),
            },
            plan: None,
        }
    }

    pub fn from_solved(solved: &SolvedModel) -> Self {
        PolicyResult {
            value: solved.expected_profit(),
            status: if solved.is_optimal() {
                PolicyStatus::Optimal
            } else {
                PolicyStatus::NonOptimal
            },
            plan: Some(solved.plan()),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, PolicyStatus::Failed { .. })
    }

    pub fn is_optimal(&self) -> bool {
        self.status == PolicyStatus::Optimal
    }
}

/// Perfect-information bound over the training scenarios
#[derive(Debug, Clone)]
pub struct WaitAndSee {
    pub value: f64,
    pub solved: usize,
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct ComparisonReport {
    pub train_scenarios: usize,
    pub test_scenarios: usize,
    pub rp: PolicyResult,
    pub ev: PolicyResult,
    /// EV plan on the test set
    pub eev: PolicyResult,
    /// EV plan on the training set, comparable to RP
    pub eev_in_sample: Option<f64>,
    /// RP plan on the test set
    pub rp_out_of_sample: Option<PlanEvaluation>,
    pub eev_evaluation: Option<PlanEvaluation>,
    pub vss: Option<f64>,
    /// `VSS / |EEV| * 100`
    pub vss_ratio: Option<f64>,
    pub wait_and_see: Option<WaitAndSee>,
    /// `WS - RP`
    pub evpi: Option<f64>,
}

impl ComparisonReport {
    /// True when a value in the report rests on a non-optimal solve
    pub fn has_non_optimal(&self) -> bool {
        [&self.rp, &self.ev, &self.eev]
            .iter()
            .any(|p| p.status == PolicyStatus::NonOptimal)
    }
}

#[derive(Debug, Clone)]
pub struct SaaGroup {
    pub index: usize,
    pub seed: u64,
    /// In-sample objective of the group's own model
    pub in_sample: PolicyResult,
    /// Mean profit on the common evaluation set
    pub out_of_sample: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct SaaReport {
    pub groups: Vec<SaaGroup>,
    pub best_group: Option<usize>,
    pub best_plan: Option<AllocationPlan>,
    pub best_evaluation: Option<PlanEvaluation>,
    /// Average in-sample objective of the solved groups
    pub mean_in_sample: Option<f64>,
    /// `mean_in_sample - best out-of-sample profit`
    pub gap: Option<f64>,
}

impl SaaReport {
    pub fn best_profit(&self) -> Option<f64> {
        self.best_evaluation.as_ref().map(|e| e.expected_profit())
    }

    pub fn failed_groups(&self) -> usize {
        self.groups.iter().filter(|g| g.in_sample.is_failed()).count()
    }
}

/// Solves and evaluates model variants over one dataset
pub struct Evaluator<'a> {
    data: &'a ProblemData,
    config: &'a ModelConfig,
    backend: &'a dyn SolverBackend,
}

impl<'a> Evaluator<'a> {
    pub fn new(data: &'a ProblemData, config: &'a ModelConfig, backend: &'a dyn SolverBackend) -> Self {
        Evaluator { data, config, backend }
    }

    /// Draw `count` scenarios under the configured demand policy
    pub fn scenarios(&self, count: usize, seed: u64) -> Result<ScenarioSet> {
        generate_scenarios(self.data, self.config.demand_policy, count, seed)
    }

    /// Recourse problem over the given scenarios
    pub fn solve_rp(&self, scenarios: &ScenarioSet) -> Result<SolvedModel> {
        AllocationModel::build(self.data, self.config, DemandInput::Scenarios(scenarios))?.solve(self.backend)
    }

    /// Same model with the mean demand as the only scenario
    pub fn solve_ev(&self) -> Result<SolvedModel> {
        let mean = ScenarioSet::mean_demand(self.data, self.config.demand_policy);
        AllocationModel::build(self.data, self.config, DemandInput::Scenarios(&mean))?.solve(self.backend)
    }

    /// Production-only model, optionally capped at one demand vector
    pub fn solve_point_estimate(&self, demand_cap: Option<&[f64]>) -> Result<SolvedModel> {
        AllocationModel::build(self.data, self.config, DemandInput::PointEstimate { demand_cap })?.solve(self.backend)
    }

    /// Replay a fixed plan on a scenario set
    pub fn evaluate(&self, plan: &AllocationPlan, scenarios: &ScenarioSet) -> Result<PlanEvaluation> {
        let violations = check_plan(self.data, plan, self.config);
        for violation in &violations {
            warn!(%violation, "Evaluating a plan outside the model bounds");
        }
        evaluate_plan(self.data, plan, scenarios, self.config.sales_domain)
    }

    /// Expected profit of the EV plan on the test set
    pub fn eev(&self, ev_plan: &AllocationPlan, test: &ScenarioSet) -> Result<PlanEvaluation> {
        self.evaluate(ev_plan, test)
    }

    /// One recourse solve per scenario, each seeing only its own demand
    pub fn wait_and_see(&self, scenarios: &ScenarioSet) -> WaitAndSee {
        let mut total = 0.0;
        let mut solved = 0;
        let mut failed = 0;
        for s in 0..scenarios.len() {
            let column = scenarios.scenario(s).into_iter().map(|d| vec![d]).collect();
            let result = ScenarioSet::from_rows(scenarios.product_ids.clone(), column).and_then(|single| self.solve_rp(&single));
            match result {
                Ok(model) => {
                    total += model.expected_profit();
                    solved += 1;
                }
                Err(err) => {
                    warn!(scenario = s, error = %err, "Wait-and-see solve failed");
                    failed += 1;
                }
            }
        }
        let value = if scenarios.is_empty() { 0.0 } else { total / scenarios.len() as f64 };
        info!(value, solved, failed, "Wait-and-see bound");
        WaitAndSee { value, solved, failed }
    }

    /// RP, EV, EEV, VSS and optionally WS/EVPI
    pub fn compare(&self, settings: &ComparisonConfig) -> Result<ComparisonReport> {
        let train = self.scenarios(self.config.scenario_count, settings.train_seed)?;
        let test = self.scenarios(settings.test_scenarios, settings.test_seed)?;

        let rp = policy("RP", self.solve_rp(&train));
        let ev = policy("EV", self.solve_ev());

        let rp_out_of_sample = match &rp.plan {
            Some(plan) => Some(self.evaluate(plan, &test)?),
            None => None,
        };

        let (eev, eev_evaluation, eev_in_sample) = match &ev.plan {
            Some(plan) => {
                let evaluation = self.eev(plan, &test)?;
                let in_sample = self.evaluate(plan, &train)?.expected_profit();
                let eev = PolicyResult {
                    value: evaluation.expected_profit(),
                    status: ev.status.clone(),
                    plan: Some(plan.clone()),
                };
                (eev, Some(evaluation), Some(in_sample))
            }
            None => (
                PolicyResult {
                    value: 0.0,
                    status: PolicyStatus::Failed {
                        reason: "no EV plan to evaluate".to_string(),
                        suspect: None,
                    },
                    plan: None,
                },
                None,
                None,
            ),
        };

        if let Some(in_sample) = eev_in_sample.filter(|_| rp.is_optimal()) {
            if rp.value + DOMINANCE_TOLERANCE < in_sample {
                warn!(rp = rp.value, eev_in_sample = in_sample, "RP below the EV plan on its own scenarios");
            }
        }

        let vss = if rp.is_failed() || eev.is_failed() { None } else { Some(rp.value - eev.value) };
        let vss_ratio = vss.and_then(|v| (eev.value != 0.0).then(|| v / eev.value.abs() * 100.0));

        let wait_and_see = settings.wait_and_see.then(|| self.wait_and_see(&train));
        let evpi = match (&wait_and_see, rp.is_failed()) {
            (Some(ws), false) => Some(ws.value - rp.value),
            _ => None,
        };

        info!(
            rp = rp.value,
            ev = ev.value,
            eev = eev.value,
            vss = ?vss,
            evpi = ?evpi,
            "Policy comparison finished"
        );

        Ok(ComparisonReport {
            train_scenarios: train.len(),
            test_scenarios: test.len(),
            rp,
            ev,
            eev,
            eev_in_sample,
            rp_out_of_sample,
            eev_evaluation,
            vss,
            vss_ratio,
            wait_and_see,
            evpi,
        })
    }

    /// Sample Average Approximation plan selection
    pub fn saa(&self, settings: &SaaConfig) -> Result<SaaReport> {
        let evaluation_set = self.scenarios(settings.evaluation_scenarios, settings.evaluation_seed)?;

        let mut groups = Vec::with_capacity(settings.groups);
        let mut evaluations: Vec<Option<PlanEvaluation>> = Vec::with_capacity(settings.groups);
        for index in 0..settings.groups {
            let seed = settings.group_seed + index as u64;
            let in_sample = match self.scenarios(self.config.scenario_count, seed) {
                Ok(scenarios) => policy("SAA group", self.solve_rp(&scenarios)),
                Err(err) => PolicyResult::failed(&err),
            };
            let evaluation = match &in_sample.plan {
                Some(plan) => Some(self.evaluate(plan, &evaluation_set)?),
                None => None,
            };
            let out_of_sample = evaluation.as_ref().map(|e| e.expected_profit());
            info!(group = index, seed, in_sample = in_sample.value, out_of_sample = ?out_of_sample, "SAA group");

            groups.push(SaaGroup {
                index,
                seed,
                in_sample,
                out_of_sample,
            });
            evaluations.push(evaluation);
        }

        // Strictly greater keeps the first of equal groups
        let mut best_group: Option<usize> = None;
        for group in &groups {
            let Some(profit) = group.out_of_sample else {
                continue;
            };
            let better = match best_group.and_then(|b| groups[b].out_of_sample) {
                Some(best) => profit > best,
                None => true,
            };
            if better {
                best_group = Some(group.index);
            }
        }

        let solved: Vec<f64> = groups
            .iter()
            .filter(|g| !g.in_sample.is_failed())
            .map(|g| g.in_sample.value)
            .collect();
        let mean_in_sample = (!solved.is_empty()).then(|| solved.iter().sum::<f64>() / solved.len() as f64);

        let best_plan = best_group.and_then(|b| groups[b].in_sample.plan.clone());
        let best_evaluation = best_group.and_then(|b| evaluations[b].take());
        let gap = match (mean_in_sample, &best_evaluation) {
            (Some(mean), Some(evaluation)) => Some(mean - evaluation.expected_profit()),
            _ => None,
        };

        if best_group.is_none() {
            warn!(groups = groups.len(), "No SAA group produced a plan");
        }
        Ok(SaaReport {
            groups,
            best_group,
            best_plan,
            best_evaluation,
            mean_in_sample,
            gap,
        })
    }
}

fn policy(name: &str, result: Result<SolvedModel>) -> PolicyResult {
    match result {
        Ok(solved) => {
            if !solved.is_optimal() {
                warn!(policy = name, status = ?solved.status(), "Policy rests on a non-optimal solve");
            }
            PolicyResult::from_solved(&solved)
        }
        Err(err) => {
            warn!(policy = name, error = %err, suspect = ?err.suspect(), "Policy failed");
            PolicyResult::failed(&err)
        }
    }
}
