/// Reporting and output formatting module
/// Handles all console output and result presentation

use crate::capacity::remaining_capacity;
use crate::comparison::{ComparisonReport, PolicyResult, PolicyStatus, SaaReport};
use crate::experiment::GridRow;
use crate::models::{AllocationPlan, ProblemData};
use crate::monte_carlo::PlanEvaluation;

fn banner(title: &str) {
    println!("\n╔══════════════════════════════════════════════════════════════════════════════╗");
    println!("║ {:^76} ║", title);
    println!("╚══════════════════════════════════════════════════════════════════════════════╝\n");
}

fn status_label(status: &PolicyStatus) -> String {
    match status {
        PolicyStatus::Optimal => "optimal".to_string(),
        PolicyStatus::NonOptimal => "NON-OPTIMAL".to_string(),
        PolicyStatus::Failed { suspect: Some(family), .. } => format!("FAILED (check {})", family),
        PolicyStatus::Failed { suspect: None, .. } => "FAILED".to_string(),
    }
}

fn optional(value: Option<f64>) -> String {
    value.map(|v| format!("${:.2}", v)).unwrap_or_else(|| "n/a".to_string())
}

/// Display the loaded instance
pub fn display_problem(data: &ProblemData) {
    banner("STOCHASTIC PRODUCTION ALLOCATION");

    println!("Products:");
    for product in &data.products {
        let upper = product
            .upper_bound
            .map(|u| format!("{:.0}", u))
            .unwrap_or_else(|| "∞".to_string());
        println!(
            "  {}: Price=${:.2}, Bounds=[{:.0}, {}], Demand {:.1} ± {:.1}",
            product.name, product.selling_price, product.lower_bound, upper, product.demand.mean, product.demand.std_dev
        );
    }
    println!("Producers:");
    for producer in &data.producers {
        let upper = producer
            .upper_capacity
            .map(|u| format!("{:.0}", u))
            .unwrap_or_else(|| "∞".to_string());
        println!("  {}: Capacity=[{:.0}, {}]", producer.name, producer.lower_capacity, upper);
    }
    println!("Feasible pairs: {}", data.cost_entries().count());
    if let Some(budget) = data.budget {
        println!("Budget: ${:.2}", budget);
    }
}

/// Display a production plan with per-producer utilization
pub fn display_plan(data: &ProblemData, plan: &AllocationPlan) {
    println!("Production plan:");
    for product in &data.products {
        let parts: Vec<String> = data
            .producers_for(product.id)
            .into_iter()
            .filter_map(|j| {
                let quantity = plan.quantity(product.id, j);
                let producer = data.get_producer(j)?;
                (quantity > 0).then(|| format!("{}: {}", producer.name, quantity))
            })
            .collect();
        println!(
            "  {}: {} total ({})",
            product.name,
            plan.total_for_product(product.id),
            if parts.is_empty() { "none".to_string() } else { parts.join(", ") }
        );
    }
    for (name, remaining) in remaining_capacity(data, plan) {
        match remaining {
            Some(left) => println!("  {} spare capacity: {:.0}", name, left),
            None => println!("  {} spare capacity: uncapped", name),
        }
    }
    println!("  Total units: {} | Production cost: ${:.2}", plan.total_units(), plan.total_cost(data));
}

/// Display the profit distribution of one plan
pub fn display_evaluation(title: &str, data: &ProblemData, evaluation: &PlanEvaluation) {
    let stats = &evaluation.stats;
    println!("\n{} ({} scenarios)", title, stats.samples);
    println!(
        "  Expected Profit: ${:.2} ± ${:.2} (std dev) | Revenue: ${:.2} | Cost: ${:.2}",
        stats.mean, stats.std_dev, evaluation.mean_revenue, evaluation.production_cost
    );
    println!("  Profit Distribution:");
    println!("    Minimum:          ${:.2}", stats.min);
    println!("    10th Percentile:  ${:.2}", stats.percentile_10);
    println!("    25th Percentile:  ${:.2}", stats.percentile_25);
    println!("    Median (50th):    ${:.2}", stats.percentile_50);
    println!("    75th Percentile:  ${:.2}", stats.percentile_75);
    println!("    90th Percentile:  ${:.2}", stats.percentile_90);
    println!("    Maximum:          ${:.2}", stats.max);
    for (row, product) in data.products.iter().enumerate() {
        println!(
            "  {}: mean leftover {:.1}, mean shortage {:.1}",
            product.name, evaluation.mean_leftover[row], evaluation.mean_shortage[row]
        );
    }
}

fn display_policy(name: &str, result: &PolicyResult) {
    println!("  {:<5} ${:>14.2}   [{}]", name, result.value, status_label(&result.status));
    if let PolicyStatus::Failed { reason, .. } = &result.status {
        println!("        {}", reason);
    }
}

/// Display RP / EV / EEV / VSS and the optional perfect-information bound
pub fn display_comparison(data: &ProblemData, report: &ComparisonReport) {
    banner("VALUE OF THE STOCHASTIC SOLUTION");

    println!(
        "Training scenarios: {} | Test scenarios: {}\n",
        report.train_scenarios, report.test_scenarios
    );
    display_policy("RP", &report.rp);
    display_policy("EV", &report.ev);
    display_policy("EEV", &report.eev);
    println!("  EEV in-sample:  {}", optional(report.eev_in_sample));
    println!("  VSS = RP - EEV: {}", optional(report.vss));
    match report.vss_ratio {
        Some(ratio) => println!("  VSS ratio:      {:.2}%", ratio),
        None => println!("  VSS ratio:      n/a"),
    }
    if let Some(ws) = &report.wait_and_see {
        println!(
            "  WS:             ${:.2} ({} solved, {} failed)",
            ws.value, ws.solved, ws.failed
        );
        println!("  EVPI = WS - RP: {}", optional(report.evpi));
    }
    if report.has_non_optimal() {
        println!("\n  WARNING: at least one value rests on a non-optimal solve; VSS sign is not guaranteed");
    }

    if let Some(plan) = &report.rp.plan {
        println!("\nStochastic (RP) plan");
        display_plan(data, plan);
    }
    if let Some(evaluation) = &report.rp_out_of_sample {
        display_evaluation("RP plan out of sample", data, evaluation);
    }
    if let Some(plan) = &report.ev.plan {
        println!("\nMean-demand (EV) plan");
        display_plan(data, plan);
    }
    if let Some(evaluation) = &report.eev_evaluation {
        display_evaluation("EV plan out of sample", data, evaluation);
    }
}

/// Display every SAA group and the selected plan
pub fn display_saa(data: &ProblemData, report: &SaaReport) {
    banner("SAMPLE AVERAGE APPROXIMATION");

    for group in &report.groups {
        let marker = if Some(group.index) == report.best_group { "*" } else { " " };
        println!(
            "{} Group {:>2} (seed {:>6}): in-sample ${:>12.2} | out-of-sample {} [{}]",
            marker,
            group.index,
            group.seed,
            group.in_sample.value,
            optional(group.out_of_sample),
            status_label(&group.in_sample.status)
        );
    }
    println!();
    println!("  Mean in-sample objective: {}", optional(report.mean_in_sample));
    println!("  Best out-of-sample profit: {}", optional(report.best_profit()));
    println!("  Gap: {}", optional(report.gap));
    if report.failed_groups() > 0 {
        println!("  Failed groups: {}", report.failed_groups());
    }

    match (&report.best_plan, &report.best_evaluation) {
        (Some(plan), Some(evaluation)) => {
            println!("\nSelected plan");
            display_plan(data, plan);
            display_evaluation("Selected plan on the evaluation set", data, evaluation);
        }
        _ => println!("\nNo group produced a plan."),
    }
}

/// Display the scenario-count × seed grid
pub fn display_grid(rows: &[GridRow]) {
    banner("SCENARIO COUNT EXPERIMENT");

    println!("{:>10} {:>8} {:>16} {:>12}  status", "scenarios", "seed", "profit", "time (s)");
    for row in rows {
        println!(
            "{:>10} {:>8} {:>16.2} {:>12.3}  {}",
            row.scenario_count,
            row.seed,
            row.expected_profit(),
            row.solve_time.as_secs_f64(),
            status_label(row.status())
        );
    }
}

/// Display a single solve and its replay
pub fn display_single(title: &str, data: &ProblemData, result: &PolicyResult, evaluation: Option<&PlanEvaluation>) {
    banner(title);
    display_policy("Value", result);
    if let Some(plan) = &result.plan {
        println!();
        display_plan(data, plan);
    }
    if let Some(evaluation) = evaluation {
        display_evaluation("Plan on the test scenarios", data, evaluation);
    }
}
