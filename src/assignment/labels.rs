use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::assignment::Conflict;
use crate::catalog::{Catalog, CategoryId, Intervention, InterventionId, OrgUnit};

/// A conflict joined with catalog names for display.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LabeledConflict {
    pub org_unit: OrgUnit,
    pub category_id: CategoryId,
    pub category_name: String,
    pub selected_intervention: Option<Intervention>,
    pub assigned_interventions: Vec<Intervention>,
}

impl LabeledConflict {
    pub fn selected_label(&self) -> String {
        self.selected_intervention
            .as_ref()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "-".to_string())
    }

    pub fn assigned_label(&self) -> String {
        self.assigned_interventions
            .iter()
            .map(|i| i.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

pub fn label_conflicts(
    conflicts: &[Conflict],
    selected_interventions_by_category: &BTreeMap<CategoryId, InterventionId>,
    catalog: &Catalog,
) -> Vec<LabeledConflict> {
    conflicts
        .iter()
        .map(|conflict| LabeledConflict {
            org_unit: conflict.org_unit.clone(),
            category_id: conflict.category_id,
            category_name: catalog
                .category(conflict.category_id)
                .map(|c| c.name.clone())
                .unwrap_or_else(|| format!("category #{}", conflict.category_id)),
            selected_intervention: selected_interventions_by_category
                .get(&conflict.category_id)
                .and_then(|id| catalog.intervention(*id))
                .cloned(),
            assigned_interventions: conflict.assigned_interventions.clone(),
        })
        .collect()
}
