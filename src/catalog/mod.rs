pub mod http;
pub mod schema;
pub mod source;
pub mod wire;

pub use schema::{
    Catalog, CategoryId, IdParseError, Intervention, InterventionCategory, InterventionId,
    InterventionPlan, OrgUnit, OrgUnitId, ScenarioId,
};
pub use source::{ApiPaths, HttpSource, JsonFileSource, PlanningSource};
