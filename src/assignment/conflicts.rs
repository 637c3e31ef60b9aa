use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::assignment::Conflict;
use crate::catalog::{
    CategoryId, Intervention, InterventionId, InterventionPlan, OrgUnit, OrgUnitId,
};

/// Finds every district that already holds an intervention in a category the
/// selection is about to assign.
///
/// One conflict is emitted per `(org unit, category)` pair, listing all the
/// existing interventions of that category covering the district. Plans whose
/// intervention carries no category never match. Output follows org unit
/// order, then the order categories are first met among the existing plans.
/// A district listed more than once is checked at its first occurrence only.
pub fn detect_conflicts(
    org_units: &[OrgUnit],
    selected_interventions_by_category: &BTreeMap<CategoryId, InterventionId>,
    existing_plans: &[InterventionPlan],
) -> Vec<Conflict> {
    if org_units.is_empty() || selected_interventions_by_category.is_empty() {
        return Vec::new();
    }

    let relevant_plans: Vec<(CategoryId, &InterventionPlan)> = existing_plans
        .iter()
        .filter_map(|plan| {
            let category = plan.intervention.category_id?;
            selected_interventions_by_category
                .contains_key(&category)
                .then_some((category, plan))
        })
        .collect();

    let mut seen: BTreeSet<OrgUnitId> = BTreeSet::new();
    let mut conflicts = Vec::new();
    for org_unit in org_units {
        if !seen.insert(org_unit.id) {
            continue;
        }
        let mut groups: Vec<(CategoryId, Vec<Intervention>)> = Vec::new();
        for (category, plan) in &relevant_plans {
            if !plan.covers(org_unit.id) {
                continue;
            }
            match groups.iter_mut().find(|(c, _)| c == category) {
                Some((_, interventions)) => interventions.push(plan.intervention.clone()),
                None => groups.push((*category, vec![plan.intervention.clone()])),
            }
        }

        conflicts.extend(groups.into_iter().map(|(category_id, assigned_interventions)| {
            Conflict {
                org_unit: org_unit.clone(),
                category_id,
                assigned_interventions,
            }
        }));
    }

    debug!(
        "conflict check: {} org units, {} categories, {} relevant plans -> {} conflicts",
        org_units.len(),
        selected_interventions_by_category.len(),
        relevant_plans.len(),
        conflicts.len()
    );
    conflicts
}
