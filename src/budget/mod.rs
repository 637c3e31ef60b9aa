pub mod merge;

use serde::{Deserialize, Serialize};

pub use merge::{budget_totals, merge_budgets_by_year};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CostLine {
    pub category: String,
    pub cost: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InterventionBudget {
    pub code: String,
    #[serde(default, rename = "type", alias = "kind")]
    pub kind: String,
    pub total_cost: f64,
    #[serde(default)]
    pub cost_breakdown: Vec<CostLine>,
}

/// Budget results for one year. Several entries may share a year before they
/// are merged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BudgetYear {
    pub year: i32,
    #[serde(default)]
    pub interventions: Vec<InterventionBudget>,
}

impl BudgetYear {
    pub fn total_cost(&self) -> f64 {
        self.interventions.iter().map(|i| i.total_cost).sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct YearTotal {
    pub year: i32,
    pub total_cost: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BudgetTotals {
    pub total_cost: f64,
    pub by_year: Vec<YearTotal>,
}
