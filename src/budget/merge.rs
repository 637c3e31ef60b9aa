use std::collections::BTreeMap;

use tracing::debug;

use crate::budget::{BudgetTotals, BudgetYear, CostLine, InterventionBudget, YearTotal};

/// Collapses budget entries into one per year, ascending.
///
/// Within a year, interventions sharing `(code, kind)` are summed; within an
/// intervention, cost lines sharing a category are summed. Both keep
/// first-seen order.
pub fn merge_budgets_by_year(budgets: &[BudgetYear]) -> Vec<BudgetYear> {
    let mut by_year: BTreeMap<i32, Vec<InterventionBudget>> = BTreeMap::new();
    for budget in budgets {
        let merged = by_year.entry(budget.year).or_default();
        for intervention in &budget.interventions {
            merge_intervention(merged, intervention);
        }
    }

    debug!(
        "merged {} budget entries into {} years",
        budgets.len(),
        by_year.len()
    );
    by_year
        .into_iter()
        .map(|(year, interventions)| BudgetYear {
            year,
            interventions,
        })
        .collect()
}

fn merge_intervention(merged: &mut Vec<InterventionBudget>, incoming: &InterventionBudget) {
    match merged
        .iter_mut()
        .find(|i| i.code == incoming.code && i.kind == incoming.kind)
    {
        Some(existing) => {
            existing.total_cost += incoming.total_cost;
            merge_cost_lines(&mut existing.cost_breakdown, &incoming.cost_breakdown);
        }
        None => {
            // Repeated categories inside a single entry collapse too.
            let mut fresh = InterventionBudget {
                cost_breakdown: Vec::new(),
                ..incoming.clone()
            };
            merge_cost_lines(&mut fresh.cost_breakdown, &incoming.cost_breakdown);
            merged.push(fresh);
        }
    }
}

fn merge_cost_lines(merged: &mut Vec<CostLine>, incoming: &[CostLine]) {
    for line in incoming {
        match merged.iter_mut().find(|l| l.category == line.category) {
            Some(existing) => existing.cost += line.cost,
            None => merged.push(line.clone()),
        }
    }
}

pub fn budget_totals(budgets: &[BudgetYear]) -> BudgetTotals {
    let by_year: Vec<YearTotal> = merge_budgets_by_year(budgets)
        .iter()
        .map(|b| YearTotal {
            year: b.year,
            total_cost: b.total_cost(),
        })
        .collect();
    BudgetTotals {
        total_cost: by_year.iter().map(|y| y.total_cost).sum(),
        by_year,
    }
}
