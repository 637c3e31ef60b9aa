use anyhow::Result;

use crate::assignment::labels::LabeledConflict;
use crate::budget::BudgetYear;

pub fn conflicts_to_csv(conflicts: &[LabeledConflict]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(vec![]);
    writer.write_record([
        "org_unit_id",
        "org_unit",
        "category_id",
        "category",
        "selected",
        "assigned_ids",
        "assigned",
    ])?;
    for conflict in conflicts {
        let assigned_ids = conflict
            .assigned_interventions
            .iter()
            .map(|i| i.id.to_string())
            .collect::<Vec<_>>()
            .join(";");
        writer.write_record([
            conflict.org_unit.id.to_string(),
            conflict.org_unit.name.clone(),
            conflict.category_id.to_string(),
            conflict.category_name.clone(),
            conflict.selected_label(),
            assigned_ids,
            conflict.assigned_label(),
        ])?;
    }
    let data = writer.into_inner()?;
    Ok(String::from_utf8_lossy(&data).to_string())
}

/// One row per `(year, intervention, cost category)`.
pub fn budgets_to_csv(budgets: &[BudgetYear]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(vec![]);
    writer.write_record(["year", "code", "type", "category", "cost"])?;
    for budget in budgets {
        for intervention in &budget.interventions {
            for line in &intervention.cost_breakdown {
                writer.write_record([
                    budget.year.to_string(),
                    intervention.code.clone(),
                    intervention.kind.clone(),
                    line.category.clone(),
                    format!("{:.2}", line.cost),
                ])?;
            }
        }
    }
    let data = writer.into_inner()?;
    Ok(String::from_utf8_lossy(&data).to_string())
}

#[cfg(test)]
mod tests {
    use super::{budgets_to_csv, conflicts_to_csv};
    use crate::assignment::labels::LabeledConflict;
    use crate::budget::{BudgetYear, CostLine, InterventionBudget};
    use crate::catalog::{CategoryId, Intervention, OrgUnit};

    #[test]
    fn writes_conflict_rows() {
        let rows = vec![LabeledConflict {
            org_unit: OrgUnit::new(1, "District, North"),
            category_id: CategoryId(10),
            category_name: "Vector control".to_string(),
            selected_intervention: None,
            assigned_interventions: vec![
                Intervention::new(101, "ITN routine", 10),
                Intervention::new(102, "IRS", 10),
            ],
        }];
        let out = conflicts_to_csv(&rows).expect("csv");
        let mut lines = out.lines();
        assert!(lines.next().expect("header").starts_with("org_unit_id,"));
        assert_eq!(
            lines.next().expect("row"),
            "1,\"District, North\",10,Vector control,-,101;102,\"ITN routine, IRS\""
        );
    }

    #[test]
    fn flattens_budget_hierarchy() {
        let budgets = vec![BudgetYear {
            year: 2025,
            interventions: vec![InterventionBudget {
                code: "itn".to_string(),
                kind: "campaign".to_string(),
                total_cost: 30.0,
                cost_breakdown: vec![
                    CostLine {
                        category: "Procurement".to_string(),
                        cost: 20.0,
                    },
                    CostLine {
                        category: "Distribution".to_string(),
                        cost: 10.0,
                    },
                ],
            }],
        }];
        let out = budgets_to_csv(&budgets).expect("csv");
        assert_eq!(out.lines().count(), 3);
        assert!(out.contains("2025,itn,campaign,Distribution,10.00"));
    }
}
