use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("invalid {kind} id: {raw}")]
pub struct IdParseError {
    pub kind: &'static str,
    pub raw: String,
}

macro_rules! id_type {
    ($name:ident, $kind:literal) => {
        #[derive(
            Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = IdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse::<i64>().map(Self).map_err(|_| IdParseError {
                    kind: $kind,
                    raw: s.to_string(),
                })
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }
    };
}

id_type!(OrgUnitId, "org unit");
id_type!(CategoryId, "intervention category");
id_type!(InterventionId, "intervention");
id_type!(ScenarioId, "scenario");

/// An administrative district that can receive intervention assignments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct OrgUnit {
    pub id: OrgUnitId,
    #[serde(default)]
    pub name: String,
}

impl OrgUnit {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id: OrgUnitId(id),
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Intervention {
    pub id: InterventionId,
    pub name: String,
    /// Absent only when upstream data is malformed; such interventions never
    /// take part in conflict detection.
    pub category_id: Option<CategoryId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl Intervention {
    pub fn new(id: i64, name: impl Into<String>, category_id: i64) -> Self {
        Self {
            id: InterventionId(id),
            name: name.into(),
            category_id: Some(CategoryId(category_id)),
            code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InterventionCategory {
    pub id: CategoryId,
    pub name: String,
    #[serde(default)]
    pub interventions: Vec<Intervention>,
}

impl InterventionCategory {
    pub fn find_intervention(&self, id: InterventionId) -> Option<&Intervention> {
        self.interventions.iter().find(|i| i.id == id)
    }
}

/// All districts currently assigned to one intervention within a scenario.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InterventionPlan {
    pub intervention: Intervention,
    pub org_units: Vec<OrgUnit>,
}

impl InterventionPlan {
    pub fn covers(&self, org_unit: OrgUnitId) -> bool {
        self.org_units.iter().any(|ou| ou.id == org_unit)
    }
}

/// Category/intervention catalog as returned by the planning source.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Catalog {
    pub categories: Vec<InterventionCategory>,
}

impl Catalog {
    pub fn new(categories: Vec<InterventionCategory>) -> Self {
        Self { categories }
    }

    pub fn category(&self, id: CategoryId) -> Option<&InterventionCategory> {
        self.categories.iter().find(|c| c.id == id)
    }

    pub fn intervention(&self, id: InterventionId) -> Option<&Intervention> {
        self.categories
            .iter()
            .find_map(|c| c.find_intervention(id))
    }

    pub fn interventions(&self) -> impl Iterator<Item = &Intervention> {
        self.categories.iter().flat_map(|c| c.interventions.iter())
    }
}
