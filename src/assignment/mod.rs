pub mod conflicts;
pub mod gate;
pub mod labels;
pub mod sink;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::{
    CategoryId, IdParseError, Intervention, InterventionId, InterventionPlan, OrgUnit, OrgUnitId,
    ScenarioId,
};

/// The user's pending selection: a set of districts and, per category, at
/// most one intervention to apply to all of them.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SelectionRequest {
    pub org_units: Vec<OrgUnit>,
    #[serde(default)]
    pub selected_interventions_by_category: BTreeMap<CategoryId, InterventionId>,
}

impl SelectionRequest {
    pub fn new(
        org_units: Vec<OrgUnit>,
        selected_interventions_by_category: BTreeMap<CategoryId, InterventionId>,
    ) -> Self {
        Self {
            org_units,
            selected_interventions_by_category,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.org_units.is_empty() || self.selected_interventions_by_category.is_empty()
    }

    pub fn intervention_ids(&self) -> Vec<InterventionId> {
        let unique: BTreeSet<InterventionId> = self
            .selected_interventions_by_category
            .values()
            .copied()
            .collect();
        unique.into_iter().collect()
    }

    pub fn org_unit_ids(&self) -> Vec<OrgUnitId> {
        let mut seen = BTreeSet::new();
        self.org_units
            .iter()
            .filter(|ou| seen.insert(ou.id))
            .map(|ou| ou.id)
            .collect()
    }
}

/// A district that would end up with more than one intervention of the same
/// category.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Conflict {
    pub org_unit: OrgUnit,
    pub category_id: CategoryId,
    pub assigned_interventions: Vec<Intervention>,
}

impl Conflict {
    pub fn key(&self) -> ConflictKey {
        ConflictKey {
            org_unit: self.org_unit.id,
            category: self.category_id,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConflictKey {
    pub org_unit: OrgUnitId,
    pub category: CategoryId,
}

impl Display for ConflictKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.org_unit, self.category)
    }
}

impl FromStr for ConflictKey {
    type Err = SelectionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (org_unit, category) = s
            .split_once(':')
            .ok_or_else(|| SelectionParseError::Malformed(s.to_string()))?;
        Ok(Self {
            org_unit: org_unit.parse()?,
            category: category.parse()?,
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConflictDecision {
    /// The newly selected intervention wins; the sink supersedes the
    /// existing assignment in that category.
    ReplaceExisting,
    /// The existing assignment stays; the district is left out of the write.
    KeepExisting,
}

/// What the external sink receives for one commit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssignmentSubmission {
    pub scenario_id: ScenarioId,
    pub org_unit_ids: Vec<OrgUnitId>,
    pub intervention_ids: Vec<InterventionId>,
}

impl AssignmentSubmission {
    pub fn from_selection(scenario_id: ScenarioId, selection: &SelectionRequest) -> Self {
        Self {
            scenario_id,
            org_unit_ids: selection.org_unit_ids(),
            intervention_ids: selection.intervention_ids(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.org_unit_ids.is_empty() || self.intervention_ids.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum SelectionParseError {
    #[error("malformed pair: {0}")]
    Malformed(String),
    #[error(transparent)]
    Id(#[from] IdParseError),
    #[error("category {0} selected more than once")]
    DuplicateCategory(CategoryId),
}

/// Parses `category=intervention` pairs separated by commas, e.g. `10=100,11=110`.
pub fn parse_selection_map(
    raw: &str,
) -> Result<BTreeMap<CategoryId, InterventionId>, SelectionParseError> {
    let mut out = BTreeMap::new();
    for piece in raw.split(',') {
        let trimmed = piece.trim();
        if trimmed.is_empty() {
            continue;
        }
        let (category, intervention) = trimmed
            .split_once('=')
            .ok_or_else(|| SelectionParseError::Malformed(trimmed.to_string()))?;
        let category: CategoryId = category.parse()?;
        if out.insert(category, intervention.parse()?).is_some() {
            return Err(SelectionParseError::DuplicateCategory(category));
        }
    }
    Ok(out)
}

/// Parses a comma separated org unit list. Each piece is an id, optionally
/// followed by `=name`: `1,2=District B`.
pub fn parse_org_unit_list(raw: &str) -> Result<Vec<OrgUnit>, SelectionParseError> {
    let mut out: Vec<OrgUnit> = Vec::new();
    for piece in raw.split(',') {
        let trimmed = piece.trim();
        if trimmed.is_empty() {
            continue;
        }
        let (id, name) = match trimmed.split_once('=') {
            Some((id, name)) => (id, name.trim()),
            None => (trimmed, ""),
        };
        let id: OrgUnitId = id.parse()?;
        if out.iter().any(|ou| ou.id == id) {
            continue;
        }
        out.push(OrgUnit {
            id,
            name: name.to_string(),
        });
    }
    Ok(out)
}

/// Fills blank org unit names from the districts already present in `plans`.
pub fn name_org_units(org_units: &mut [OrgUnit], plans: &[InterventionPlan]) {
    for org_unit in org_units.iter_mut().filter(|ou| ou.name.trim().is_empty()) {
        org_unit.name = plans
            .iter()
            .flat_map(|plan| plan.org_units.iter())
            .find(|known| known.id == org_unit.id && !known.name.is_empty())
            .map(|known| known.name.clone())
            .unwrap_or_else(|| format!("org unit {}", org_unit.id));
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{
        name_org_units, parse_org_unit_list, parse_selection_map, AssignmentSubmission,
        ConflictKey, SelectionParseError, SelectionRequest,
    };
    use crate::catalog::{
        CategoryId, Intervention, InterventionId, InterventionPlan, OrgUnit, OrgUnitId,
        ScenarioId,
    };

    #[test]
    fn parses_selection_pairs() {
        let parsed = parse_selection_map("10=100, 11=110,").expect("valid selection");
        assert_eq!(parsed.get(&CategoryId(10)), Some(&InterventionId(100)));
        assert_eq!(parsed.len(), 2);
    }

    #[test]
    fn rejects_two_interventions_for_one_category() {
        let err = parse_selection_map("10=100,10=101").expect_err("duplicate category");
        assert!(matches!(err, SelectionParseError::DuplicateCategory(CategoryId(10))));
    }

    #[test]
    fn conflict_key_round_trips_through_text() {
        let key: ConflictKey = "4:10".parse().expect("valid key");
        assert_eq!(key.org_unit, OrgUnitId(4));
        assert_eq!(key.to_string(), "4:10");
        assert!("4-10".parse::<ConflictKey>().is_err());
    }

    #[test]
    fn submission_dedupes_ids() {
        let selection = SelectionRequest::new(
            vec![
                OrgUnit::new(2, "B"),
                OrgUnit::new(1, "A"),
                OrgUnit::new(2, "B"),
            ],
            BTreeMap::from([
                (CategoryId(10), InterventionId(100)),
                (CategoryId(11), InterventionId(110)),
            ]),
        );
        let submission = AssignmentSubmission::from_selection(ScenarioId(9), &selection);
        assert_eq!(submission.org_unit_ids, vec![OrgUnitId(2), OrgUnitId(1)]);
        assert_eq!(
            submission.intervention_ids,
            vec![InterventionId(100), InterventionId(110)]
        );
    }

    #[test]
    fn selection_map_uses_string_keys_in_json() {
        let selection = SelectionRequest::new(
            vec![OrgUnit::new(1, "A")],
            BTreeMap::from([(CategoryId(10), InterventionId(100))]),
        );
        let json = serde_json::to_value(&selection).expect("serialize");
        assert_eq!(json["selected_interventions_by_category"]["10"], 100);
        let back: SelectionRequest = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, selection);
    }

    #[test]
    fn parses_org_unit_lists_with_optional_names() {
        let parsed = parse_org_unit_list("1, 2=District B,1,").expect("valid list");
        assert_eq!(parsed, vec![OrgUnit::new(1, ""), OrgUnit::new(2, "District B")]);
        assert!(matches!(
            parse_org_unit_list("1,x"),
            Err(SelectionParseError::Id(_))
        ));
    }

    #[test]
    fn names_org_units_from_existing_plans() {
        let plans = vec![InterventionPlan {
            intervention: Intervention::new(101, "ITN routine", 10),
            org_units: vec![OrgUnit::new(1, "District A")],
        }];
        let mut org_units = vec![
            OrgUnit::new(1, ""),
            OrgUnit::new(2, ""),
            OrgUnit::new(3, "Given"),
        ];
        name_org_units(&mut org_units, &plans);
        assert_eq!(org_units[0].name, "District A");
        assert_eq!(org_units[1].name, "org unit 2");
        assert_eq!(org_units[2].name, "Given");
    }
}
