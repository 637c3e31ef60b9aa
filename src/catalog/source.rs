use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

use crate::catalog::http::Endpoint;
use crate::catalog::schema::{Catalog, InterventionPlan, ScenarioId};
use crate::catalog::wire::{
    catalog_from_wire, plans_from_wire, WireCategory, WirePlan, WireSnapshot,
};

/// Read side of the planning platform: the intervention catalog and the
/// existing assignments of a scenario.
#[async_trait]
pub trait PlanningSource: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch_catalog(&self) -> Result<Catalog>;

    async fn fetch_plans(&self, scenario: ScenarioId) -> Result<Vec<InterventionPlan>>;
}

/// Serves a JSON snapshot exported from the platform.
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<WireSnapshot> {
        let data = fs::read_to_string(&self.path)
            .with_context(|| format!("failed reading snapshot: {}", self.path.display()))?;
        serde_json::from_str(&data)
            .with_context(|| format!("failed parsing snapshot: {}", self.path.display()))
    }
}

#[async_trait]
impl PlanningSource for JsonFileSource {
    fn name(&self) -> &str {
        "snapshot"
    }

    async fn fetch_catalog(&self) -> Result<Catalog> {
        Ok(catalog_from_wire(self.load()?.catalog))
    }

    async fn fetch_plans(&self, scenario: ScenarioId) -> Result<Vec<InterventionPlan>> {
        let mut snapshot = self.load()?;
        let plans = snapshot
            .plans
            .remove(&scenario.to_string())
            .unwrap_or_default();
        debug!(
            "snapshot {} has {} plans for scenario {scenario}",
            self.path.display(),
            plans.len()
        );
        Ok(plans_from_wire(plans))
    }
}

#[derive(Debug, Clone)]
pub struct ApiPaths {
    pub categories: String,
    /// May contain a `{scenario}` placeholder.
    pub plans: String,
}

impl ApiPaths {
    pub fn plans_for(&self, scenario: ScenarioId) -> String {
        self.plans.replace("{scenario}", &scenario.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct HttpSource {
    endpoint: Endpoint,
    paths: ApiPaths,
}

impl HttpSource {
    pub fn new(endpoint: Endpoint, paths: ApiPaths) -> Self {
        Self { endpoint, paths }
    }
}

#[async_trait]
impl PlanningSource for HttpSource {
    fn name(&self) -> &str {
        "http"
    }

    async fn fetch_catalog(&self) -> Result<Catalog> {
        let categories: Vec<WireCategory> = self.endpoint.get_json(&self.paths.categories).await?;
        Ok(catalog_from_wire(categories))
    }

    async fn fetch_plans(&self, scenario: ScenarioId) -> Result<Vec<InterventionPlan>> {
        let plans: Vec<WirePlan> = self
            .endpoint
            .get_json(&self.paths.plans_for(scenario))
            .await?;
        Ok(plans_from_wire(plans))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use serde_json::json;

    use super::{ApiPaths, JsonFileSource, PlanningSource};
    use crate::catalog::schema::{InterventionId, ScenarioId};

    fn write_snapshot(name: &str, value: &serde_json::Value) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!(
            "snt-planner-{name}-{}.json",
            std::process::id()
        ));
        let mut file = std::fs::File::create(&path).expect("create snapshot");
        file.write_all(value.to_string().as_bytes())
            .expect("write snapshot");
        path
    }

    #[test]
    fn substitutes_scenario_in_plan_path() {
        let paths = ApiPaths {
            categories: "/api/snt_malaria/intervention_categories/".to_string(),
            plans: "/api/snt_malaria/intervention_assignments/?scenario_id={scenario}".to_string(),
        };
        assert_eq!(
            paths.plans_for(ScenarioId(3)),
            "/api/snt_malaria/intervention_assignments/?scenario_id=3"
        );
    }

    #[tokio::test]
    async fn file_source_serves_catalog_and_scenario_plans() {
        let path = write_snapshot(
            "source",
            &json!({
                "catalog": [{"id": 10, "name": "Vector control", "interventions": [{"id": 100, "name": "ITN"}]}],
                "plans": {
                    "1": [{"intervention": {"id": 100, "name": "ITN", "intervention_category": 10},
                           "org_units": [{"id": 5, "name": "District E"}]}]
                }
            }),
        );
        let source = JsonFileSource::new(path.clone());

        let catalog = source.fetch_catalog().await.expect("catalog");
        assert!(catalog.intervention(InterventionId(100)).is_some());

        let plans = source.fetch_plans(ScenarioId(1)).await.expect("plans");
        assert_eq!(plans.len(), 1);
        let none = source.fetch_plans(ScenarioId(2)).await.expect("plans");
        assert!(none.is_empty());

        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn bundled_demo_snapshot_loads() {
        let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("demos/snapshot.json");
        let source = JsonFileSource::new(path);

        let catalog = source.fetch_catalog().await.expect("catalog");
        assert_eq!(catalog.categories.len(), 3);
        let plans = source.fetch_plans(ScenarioId(1)).await.expect("plans");
        assert_eq!(plans.len(), 2);
        assert!(plans.iter().all(|p| p.intervention.category_id.is_some()));
    }

    #[tokio::test]
    async fn missing_snapshot_reports_path() {
        let source = JsonFileSource::new("/nonexistent/snt-snapshot.json");
        let err = source.fetch_catalog().await.expect_err("should fail");
        assert!(err.to_string().contains("/nonexistent/snt-snapshot.json"));
    }
}
