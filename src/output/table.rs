use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color, ContentArrangement, Row, Table};

use crate::assignment::labels::LabeledConflict;
use crate::assignment::AssignmentSubmission;
use crate::budget::{BudgetTotals, BudgetYear};
use crate::catalog::{Catalog, InterventionPlan};

fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

pub fn render_catalog_table(catalog: &Catalog) -> String {
    let mut table = new_table();
    table.set_header(vec!["Category", "Intervention", "Id", "Code"]);
    for category in &catalog.categories {
        if category.interventions.is_empty() {
            table.add_row(vec![
                category.name.clone(),
                "-".to_string(),
                "-".to_string(),
                "-".to_string(),
            ]);
            continue;
        }
        for intervention in &category.interventions {
            table.add_row(vec![
                category.name.clone(),
                intervention.name.clone(),
                intervention.id.to_string(),
                intervention.code.clone().unwrap_or_else(|| "-".to_string()),
            ]);
        }
    }
    table.to_string()
}

pub fn render_plans_table(plans: &[InterventionPlan], catalog: &Catalog) -> String {
    let mut table = new_table();
    table.set_header(vec!["Intervention", "Category", "Org Units", "Count"]);
    for plan in plans {
        let category = plan
            .intervention
            .category_id
            .and_then(|id| catalog.category(id))
            .map(|c| c.name.clone())
            .unwrap_or_else(|| "-".to_string());
        let names = plan
            .org_units
            .iter()
            .map(|ou| ou.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        table.add_row(vec![
            plan.intervention.name.clone(),
            category,
            names,
            plan.org_units.len().to_string(),
        ]);
    }
    table.to_string()
}

pub fn render_conflicts_table(conflicts: &[LabeledConflict]) -> String {
    let mut table = new_table();
    table.set_header(vec![
        "Org Unit",
        "Category",
        "Selected",
        "Already Assigned",
        "Key",
    ]);
    for conflict in conflicts {
        table.add_row(Row::from(vec![
            Cell::new(&conflict.org_unit.name),
            Cell::new(&conflict.category_name),
            Cell::new(conflict.selected_label()).fg(Color::Green),
            Cell::new(conflict.assigned_label()).fg(Color::Red),
            Cell::new(format!(
                "{}:{}",
                conflict.org_unit.id, conflict.category_id
            )),
        ]));
    }
    table.to_string()
}

pub fn render_submission_table(submission: &AssignmentSubmission) -> String {
    let mut table = new_table();
    table.set_header(vec!["Scenario", "Org Units", "Interventions"]);
    let join = |ids: Vec<String>| ids.join(", ");
    table.add_row(vec![
        submission.scenario_id.to_string(),
        join(submission.org_unit_ids.iter().map(|id| id.to_string()).collect()),
        join(
            submission
                .intervention_ids
                .iter()
                .map(|id| id.to_string())
                .collect(),
        ),
    ]);
    table.to_string()
}

pub fn render_budget_table(budgets: &[BudgetYear], totals: &BudgetTotals) -> String {
    let mut table = new_table();
    table.set_header(vec!["Year", "Intervention", "Type", "Cost Category", "Cost"]);
    for budget in budgets {
        for intervention in &budget.interventions {
            table.add_row(vec![
                budget.year.to_string(),
                intervention.code.clone(),
                intervention.kind.clone(),
                "total".to_string(),
                format!("{:.2}", intervention.total_cost),
            ]);
            for line in &intervention.cost_breakdown {
                table.add_row(vec![
                    String::new(),
                    String::new(),
                    String::new(),
                    line.category.clone(),
                    format!("{:.2}", line.cost),
                ]);
            }
        }
    }
    for year in &totals.by_year {
        table.add_row(Row::from(vec![
            Cell::new(year.year.to_string()),
            Cell::new("all"),
            Cell::new(""),
            Cell::new("year total"),
            Cell::new(format!("{:.2}", year.total_cost)).fg(Color::Cyan),
        ]));
    }
    table.add_row(Row::from(vec![
        Cell::new("all"),
        Cell::new("all"),
        Cell::new(""),
        Cell::new("grand total"),
        Cell::new(format!("{:.2}", totals.total_cost)).fg(Color::Cyan),
    ]));
    table.to_string()
}
