//! Upstream payload shapes.
//!
//! The platform is not consistent about field naming (`interventionCategory`
//! vs `intervention_category`, `orgUnits` vs `org_units`) nor about whether a
//! category reference is an id or a nested object. Everything is normalized
//! here so the rest of the crate only deals with the canonical schema.
//!
//! Spellings are separate fields rather than serde aliases: a payload may
//! carry more than one of them, and aliases reject that as a duplicate field.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::catalog::schema::{
    Catalog, CategoryId, Intervention, InterventionCategory, InterventionId, InterventionPlan,
    OrgUnit, OrgUnitId,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum WireCategoryRef {
    Id(i64),
    Object { id: i64 },
}

impl WireCategoryRef {
    pub fn id(&self) -> CategoryId {
        match self {
            Self::Id(id) | Self::Object { id } => CategoryId(*id),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireOrgUnit {
    pub id: i64,
    #[serde(default)]
    pub name: String,
}

impl From<WireOrgUnit> for OrgUnit {
    fn from(value: WireOrgUnit) -> Self {
        Self {
            id: OrgUnitId(value.id),
            name: value.name,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireIntervention {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intervention_category: Option<WireCategoryRef>,
    #[serde(
        default,
        rename = "interventionCategory",
        skip_serializing_if = "Option::is_none"
    )]
    pub intervention_category_camel: Option<WireCategoryRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<WireCategoryRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<WireCategoryRef>,
    #[serde(
        default,
        rename = "categoryId",
        skip_serializing_if = "Option::is_none"
    )]
    pub category_id_camel: Option<WireCategoryRef>,
}

impl WireIntervention {
    /// First category reference present, in field declaration order.
    pub fn category_ref(&self) -> Option<&WireCategoryRef> {
        self.intervention_category
            .as_ref()
            .or(self.intervention_category_camel.as_ref())
            .or(self.category.as_ref())
            .or(self.category_id.as_ref())
            .or(self.category_id_camel.as_ref())
    }

    fn into_intervention(self, fallback_category: Option<CategoryId>) -> Intervention {
        Intervention {
            id: InterventionId(self.id),
            category_id: self
                .category_ref()
                .map(WireCategoryRef::id)
                .or(fallback_category),
            name: self.name,
            code: self.code,
        }
    }
}

impl From<WireIntervention> for Intervention {
    fn from(value: WireIntervention) -> Self {
        value.into_intervention(None)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireCategory {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub interventions: Vec<WireIntervention>,
}

impl From<WireCategory> for InterventionCategory {
    /// Nested interventions without their own category reference inherit the
    /// parent's id.
    fn from(value: WireCategory) -> Self {
        let id = CategoryId(value.id);
        Self {
            id,
            name: value.name,
            interventions: value
                .interventions
                .into_iter()
                .map(|i| i.into_intervention(Some(id)))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WirePlan {
    pub intervention: WireIntervention,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_units: Option<Vec<WireOrgUnit>>,
    #[serde(default, rename = "orgUnits", skip_serializing_if = "Option::is_none")]
    pub org_units_camel: Option<Vec<WireOrgUnit>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_unit_list: Option<Vec<WireOrgUnit>>,
}

impl From<WirePlan> for InterventionPlan {
    fn from(value: WirePlan) -> Self {
        let org_units = value
            .org_units
            .or(value.org_units_camel)
            .or(value.org_unit_list)
            .unwrap_or_default();
        Self {
            intervention: value.intervention.into(),
            org_units: org_units.into_iter().map(OrgUnit::from).collect(),
        }
    }
}

/// On-disk snapshot of everything a planning source serves.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WireSnapshot {
    #[serde(default, alias = "intervention_categories", alias = "interventionCategories")]
    pub catalog: Vec<WireCategory>,
    /// Plans keyed by scenario id (JSON object keys are strings).
    #[serde(default)]
    pub plans: BTreeMap<String, Vec<WirePlan>>,
}

pub fn catalog_from_wire(categories: Vec<WireCategory>) -> Catalog {
    Catalog::new(categories.into_iter().map(InterventionCategory::from).collect())
}

pub fn plans_from_wire(plans: Vec<WirePlan>) -> Vec<InterventionPlan> {
    plans.into_iter().map(InterventionPlan::from).collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{catalog_from_wire, plans_from_wire, WireCategory, WirePlan, WireSnapshot};
    use crate::catalog::schema::{CategoryId, InterventionId, OrgUnitId};

    #[test]
    fn accepts_both_naming_conventions_for_plans() {
        let payload = json!([
            {
                "intervention": {"id": 101, "name": "Old ITN", "interventionCategory": 10},
                "orgUnits": [{"id": 1, "name": "District A"}]
            },
            {
                "intervention": {"id": 102, "name": "IRS", "intervention_category": {"id": 11, "name": "Spraying"}},
                "org_units": [{"id": 2, "name": "District B"}]
            }
        ]);
        let wire: Vec<WirePlan> = serde_json::from_value(payload).expect("valid plans");
        let plans = plans_from_wire(wire);

        assert_eq!(plans[0].intervention.category_id, Some(CategoryId(10)));
        assert_eq!(plans[0].org_units[0].id, OrgUnitId(1));
        assert_eq!(plans[1].intervention.category_id, Some(CategoryId(11)));
        assert_eq!(plans[1].org_units[0].name, "District B");
    }

    #[test]
    fn plan_without_category_stays_uncategorized() {
        let payload = json!({"intervention": {"id": 5, "name": "Mystery"}, "org_units": []});
        let wire: WirePlan = serde_json::from_value(payload).expect("valid plan");
        let plan = plans_from_wire(vec![wire]).remove(0);
        assert_eq!(plan.intervention.category_id, None);
    }

    #[test]
    fn nested_interventions_inherit_category() {
        let payload = json!([{
            "id": 10,
            "name": "Vector control",
            "interventions": [
                {"id": 100, "name": "ITN campaign", "code": "itn_campaign"},
                {"id": 101, "name": "ITN routine", "category_id": 10}
            ]
        }]);
        let wire: Vec<WireCategory> = serde_json::from_value(payload).expect("valid catalog");
        let catalog = catalog_from_wire(wire);
        let itn = catalog
            .intervention(InterventionId(100))
            .expect("intervention present");
        assert_eq!(itn.category_id, Some(CategoryId(10)));
        assert_eq!(itn.code.as_deref(), Some("itn_campaign"));
    }

    #[test]
    fn snapshot_keys_plans_by_scenario() {
        let payload = json!({
            "intervention_categories": [{"id": 1, "name": "Case management"}],
            "plans": {"7": []}
        });
        let snapshot: WireSnapshot = serde_json::from_value(payload).expect("valid snapshot");
        assert_eq!(snapshot.catalog.len(), 1);
        assert!(snapshot.plans.contains_key("7"));
    }

    #[test]
    fn tolerates_several_category_spellings_in_one_payload() {
        let payload = json!({
            "intervention": {
                "id": 101,
                "name": "Old ITN",
                "intervention_category": {"id": 10, "name": "Vector control"},
                "category_id": 10,
                "interventionCategory": 99
            },
            "org_units": [{"id": 1}],
            "orgUnits": [{"id": 2}]
        });
        let wire: WirePlan = serde_json::from_value(payload).expect("valid plan");
        let plan = plans_from_wire(vec![wire]).remove(0);

        assert_eq!(plan.intervention.category_id, Some(CategoryId(10)));
        assert_eq!(plan.org_units.len(), 1);
        assert_eq!(plan.org_units[0].id, OrgUnitId(1));
    }
}
