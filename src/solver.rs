/// Solver adapter
///
/// - **LinearProgram**: solver-neutral variables, constraints and objective
/// - **SolverBackend**: black-box solve returning a [`SolverOutcome`]
/// - **MicroLpBackend**: `good_lp` + `microlp` implementation with an optional time limit
/// - **SolveObserver**: coarse progress checkpoints

use good_lp::variable::{ProblemVariables, VariableDefinition};
use good_lp::{constraint, default_solver, variable, Constraint, Expression, ResolutionError, Solution, SolverModel, Variable};
use std::fmt;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Index of a variable inside a [`LinearProgram`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(pub usize);

/// Variable domain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
    Continuous,
    Integer,
    Binary,
}

#[derive(Debug, Clone)]
pub struct VariableSpec {
    pub name: String,
    pub kind: VarKind,
    pub lower: f64,
    /// `None` is solver infinity
    pub upper: Option<f64>,
}

impl VariableSpec {
    fn definition(&self) -> VariableDefinition {
        let def = variable().name(self.name.clone());
        match self.kind {
            VarKind::Binary => def.binary(),
            VarKind::Integer => bounded(def.integer().min(self.lower), self.upper),
            VarKind::Continuous => bounded(def.min(self.lower), self.upper),
        }
    }
}

fn bounded(def: VariableDefinition, upper: Option<f64>) -> VariableDefinition {
    match upper {
        Some(upper) => def.max(upper),
        None => def,
    }
}

/// Sparse linear expression over program variables
#[derive(Debug, Clone, Default)]
pub struct LinearExpr {
    pub terms: Vec<(VarId, f64)>,
    pub constant: f64,
}

impl LinearExpr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_term(&mut self, var: VarId, coefficient: f64) {
        self.terms.push((var, coefficient));
    }

    pub fn with_term(mut self, var: VarId, coefficient: f64) -> Self {
        self.add_term(var, coefficient);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Value under an assignment indexed by [`VarId`]
    pub fn evaluate(&self, values: &[f64]) -> f64 {
        self.terms
            .iter()
            .map(|(var, coefficient)| coefficient * values.get(var.0).copied().unwrap_or(0.0))
            .sum::<f64>()
            + self.constant
    }

    fn to_expression(&self, columns: &[Variable]) -> Expression {
        let mut expression = Expression::from(self.constant);
        for (var, coefficient) in &self.terms {
            expression += columns[var.0] * *coefficient;
        }
        expression
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    LessEq,
    GreaterEq,
    Equal,
}

/// Constraint classes of the allocation model, used for infeasibility reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstraintFamily {
    ProductLower,
    ProductUpper,
    ProducerLower,
    ProducerUpper,
    SalesProduction,
    SalesDemand,
    Budget,
}

impl ConstraintFamily {
    /// Families that may be dropped while diagnosing infeasibility, in test order
    pub const RELAXABLE: [ConstraintFamily; 5] = [
        ConstraintFamily::Budget,
        ConstraintFamily::ProducerLower,
        ConstraintFamily::ProductLower,
        ConstraintFamily::ProducerUpper,
        ConstraintFamily::ProductUpper,
    ];

    pub fn label(self) -> &'static str {
        match self {
            ConstraintFamily::ProductLower => "product lower bound",
            ConstraintFamily::ProductUpper => "product upper bound",
            ConstraintFamily::ProducerLower => "producer minimum capacity",
            ConstraintFamily::ProducerUpper => "producer capacity",
            ConstraintFamily::SalesProduction => "sales within production",
            ConstraintFamily::SalesDemand => "sales within demand",
            ConstraintFamily::Budget => "budget",
        }
    }
}

impl fmt::Display for ConstraintFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone)]
pub struct LinearConstraint {
    pub expr: LinearExpr,
    pub comparison: Comparison,
    pub rhs: f64,
    pub family: ConstraintFamily,
}

impl LinearConstraint {
    fn to_constraint(&self, columns: &[Variable]) -> Constraint {
        let lhs = self.expr.to_expression(columns);
        let rhs = self.rhs;
        match self.comparison {
            Comparison::LessEq => constraint!(lhs <= rhs),
            Comparison::GreaterEq => constraint!(lhs >= rhs),
            Comparison::Equal => constraint!(lhs == rhs),
        }
    }

    /// Whether an assignment satisfies the constraint within `tolerance`
    pub fn is_satisfied(&self, values: &[f64], tolerance: f64) -> bool {
        let lhs = self.expr.evaluate(values);
        match self.comparison {
            Comparison::LessEq => lhs <= self.rhs + tolerance,
            Comparison::GreaterEq => lhs >= self.rhs - tolerance,
            Comparison::Equal => (lhs - self.rhs).abs() <= tolerance,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sense {
    Maximise,
    Minimise,
}

/// Solver-neutral mixed-integer program
#[derive(Debug, Clone)]
pub struct LinearProgram {
    pub variables: Vec<VariableSpec>,
    pub constraints: Vec<LinearConstraint>,
    pub objective: LinearExpr,
    pub sense: Sense,
}

impl LinearProgram {
    pub fn new(sense: Sense) -> Self {
        LinearProgram {
            variables: Vec::new(),
            constraints: Vec::new(),
            objective: LinearExpr::new(),
            sense,
        }
    }

    pub fn add_variable(&mut self, spec: VariableSpec) -> VarId {
        self.variables.push(spec);
        VarId(self.variables.len() - 1)
    }

    pub fn add_constraint(&mut self, expr: LinearExpr, comparison: Comparison, rhs: f64, family: ConstraintFamily) {
        self.constraints.push(LinearConstraint {
            expr,
            comparison,
            rhs,
            family,
        });
    }

    pub fn num_variables(&self) -> usize {
        self.variables.len()
    }

    pub fn num_constraints(&self) -> usize {
        self.constraints.len()
    }

    pub fn count_family(&self, family: ConstraintFamily) -> usize {
        self.constraints.iter().filter(|c| c.family == family).count()
    }

    pub fn integer_variable_count(&self) -> usize {
        self.variables.iter().filter(|v| v.kind != VarKind::Continuous).count()
    }

    /// Copy of the program with one constraint family removed
    pub fn without_family(&self, family: ConstraintFamily) -> LinearProgram {
        LinearProgram {
            variables: self.variables.clone(),
            constraints: self.constraints.iter().filter(|c| c.family != family).cloned().collect(),
            objective: self.objective.clone(),
            sense: self.sense,
        }
    }

    pub fn objective_value(&self, values: &[f64]) -> f64 {
        self.objective.evaluate(values)
    }
}

/// Terminal status of a solve
#[derive(Debug, Clone, PartialEq)]
pub enum SolveStatus {
    Optimal,
    /// A solution was found but not proven optimal
    Feasible,
    Infeasible,
    Unbounded,
    TimedOut,
    Abnormal(String),
}

impl SolveStatus {
    /// Whether the outcome carries an assignment that may be used
    pub fn is_accepted(&self) -> bool {
        matches!(self, SolveStatus::Optimal | SolveStatus::Feasible)
    }
}

#[derive(Debug, Clone)]
pub struct SolverOutcome {
    pub status: SolveStatus,
    /// One value per program variable; empty unless the status is accepted
    pub values: Vec<f64>,
    pub objective: Option<f64>,
    pub elapsed: Duration,
}

impl SolverOutcome {
    pub fn failed(status: SolveStatus, elapsed: Duration) -> Self {
        SolverOutcome {
            status,
            values: Vec::new(),
            objective: None,
            elapsed,
        }
    }
}

/// Black-box mixed-integer solve
pub trait SolverBackend {
    fn solve(&self, program: &LinearProgram) -> SolverOutcome;

    /// Wall-clock bound per solve, if any
    fn time_limit(&self) -> Option<Duration> {
        None
    }
}

/// Coarse progress callbacks around a solve
pub trait SolveObserver: Send + Sync {
    fn on_start(&self, variables: usize, integer_variables: usize, constraints: usize);
    fn on_finish(&self, status: &SolveStatus, elapsed: Duration);
}

/// Observer that reports checkpoints through `tracing`
#[derive(Debug, Default)]
pub struct TracingObserver;

impl SolveObserver for TracingObserver {
    fn on_start(&self, variables: usize, integer_variables: usize, constraints: usize) {
        info!(variables, integer_variables, constraints, "Solving model");
    }

    fn on_finish(&self, status: &SolveStatus, elapsed: Duration) {
        info!(status = ?status, elapsed_ms = elapsed.as_millis() as u64, "Solve finished");
    }
}

/// `good_lp` backend using the pure-Rust `microlp` solver
#[derive(Default, Clone)]
pub struct MicroLpBackend {
    time_limit: Option<Duration>,
    observer: Option<Arc<dyn SolveObserver>>,
}

impl fmt::Debug for MicroLpBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MicroLpBackend")
            .field("time_limit", &self.time_limit)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

impl MicroLpBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Give up waiting after `limit`; the outcome is then [`SolveStatus::TimedOut`]
    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.time_limit = Some(limit);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn SolveObserver>) -> Self {
        self.observer = Some(observer);
        self
    }
}

impl SolverBackend for MicroLpBackend {
    fn solve(&self, program: &LinearProgram) -> SolverOutcome {
        if let Some(observer) = &self.observer {
            observer.on_start(
                program.num_variables(),
                program.integer_variable_count(),
                program.num_constraints(),
            );
        }
        let start = Instant::now();

        let result = match self.time_limit {
            None => Ok(solve_with_good_lp(program)),
            Some(limit) => {
                // The worker is detached on timeout and runs to completion; microlp has no cancellation hook.
                let (tx, rx) = mpsc::channel();
                let owned = program.clone();
                thread::spawn(move || {
                    let _ = tx.send(solve_with_good_lp(&owned));
                });
                rx.recv_timeout(limit)
            }
        };
        let elapsed = start.elapsed();

        let outcome = match result {
            Ok(Ok(values)) => {
                let objective = program.objective_value(&values);
                SolverOutcome {
                    status: SolveStatus::Optimal,
                    values,
                    objective: Some(objective),
                    elapsed,
                }
            }
            Ok(Err(ResolutionError::Infeasible)) => SolverOutcome::failed(SolveStatus::Infeasible, elapsed),
            Ok(Err(ResolutionError::Unbounded)) => SolverOutcome::failed(SolveStatus::Unbounded, elapsed),
            Ok(Err(other)) => {
                warn!(error = %other, "Solver stopped abnormally");
                SolverOutcome::failed(SolveStatus::Abnormal(other.to_string()), elapsed)
            }
            Err(RecvTimeoutError::Timeout) => SolverOutcome::failed(SolveStatus::TimedOut, elapsed),
            Err(RecvTimeoutError::Disconnected) => SolverOutcome::failed(
                SolveStatus::Abnormal("solver worker exited without a result".to_string()),
                elapsed,
            ),
        };

        debug!(status = ?outcome.status, elapsed_ms = elapsed.as_millis() as u64, "MicroLP solve");
        if let Some(observer) = &self.observer {
            observer.on_finish(&outcome.status, elapsed);
        }
        outcome
    }

    fn time_limit(&self) -> Option<Duration> {
        self.time_limit
    }
}

fn solve_with_good_lp(program: &LinearProgram) -> Result<Vec<f64>, ResolutionError> {
    // An aggregate over no variables is a constant; decide it here.
    for c in program.constraints.iter().filter(|c| c.expr.is_empty()) {
        if !c.is_satisfied(&[], 1e-9) {
            return Err(ResolutionError::Infeasible);
        }
    }
    if program.variables.is_empty() {
        return Ok(Vec::new());
    }

    let mut vars = ProblemVariables::new();
    let columns: Vec<Variable> = program
        .variables
        .iter()
        .map(|spec| vars.add(spec.definition()))
        .collect();

    let objective = program.objective.to_expression(&columns);
    let unsolved = match program.sense {
        Sense::Maximise => vars.maximise(objective),
        Sense::Minimise => vars.minimise(objective),
    };

    let mut model = unsolved.using(default_solver);
    for c in program.constraints.iter().filter(|c| !c.expr.is_empty()) {
        model = model.with(c.to_constraint(&columns));
    }

    let solution = model.solve()?;
    Ok(columns.iter().map(|&v| solution.value(v)).collect())
}
