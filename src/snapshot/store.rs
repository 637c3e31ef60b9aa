use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::assignment::sink::AssignmentSink;
use crate::assignment::AssignmentSubmission;
use crate::catalog::{
    Catalog, CategoryId, Intervention, InterventionCategory, InterventionId, InterventionPlan,
    OrgUnit, OrgUnitId, PlanningSource, ScenarioId,
};
use crate::snapshot::migrations::BASE_MIGRATION;

/// Local SQLite mirror of the catalog and a scenario's assignments. Serves as
/// both a planning source and an assignment sink.
///
/// Clones share one connection. The async trait methods run their queries
/// on the blocking thread pool.
#[derive(Clone)]
pub struct AssignmentStore {
    conn: Arc<Mutex<Connection>>,
}

impl AssignmentStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.migrate()?;
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("assignment store lock poisoned"))
    }

    pub fn migrate(&self) -> Result<()> {
        self.lock()?.execute_batch(BASE_MIGRATION)?;
        Ok(())
    }

    pub fn sync_catalog(&self, catalog: &Catalog) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        for category in &catalog.categories {
            tx.execute(
                r#"
INSERT INTO intervention_categories(id, name) VALUES (?1, ?2)
ON CONFLICT(id) DO UPDATE SET name = excluded.name
"#,
                params![category.id.0, category.name],
            )?;
            for intervention in &category.interventions {
                tx.execute(
                    r#"
INSERT INTO interventions(id, name, category_id, code) VALUES (?1, ?2, ?3, ?4)
ON CONFLICT(id) DO UPDATE SET
    name = excluded.name,
    category_id = excluded.category_id,
    code = excluded.code
"#,
                    params![
                        intervention.id.0,
                        intervention.name,
                        intervention.category_id.map(|c| c.0),
                        intervention.code
                    ],
                )?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn upsert_org_units(&self, org_units: &[OrgUnit]) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        for org_unit in org_units {
            tx.execute(
                r#"
INSERT INTO org_units(id, name) VALUES (?1, ?2)
ON CONFLICT(id) DO UPDATE SET name = excluded.name
"#,
                params![org_unit.id.0, org_unit.name],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Writes the submission, superseding any earlier assignment of the same
    /// scenario and org unit whose intervention shares a category with a
    /// submitted one.
    pub fn insert_submission(&self, submission: &AssignmentSubmission) -> Result<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let created_at = Utc::now().to_rfc3339();
        let scenario = submission.scenario_id.0;
        let mut superseded = 0usize;
        let mut inserted = 0usize;

        for intervention_id in &submission.intervention_ids {
            let category: Option<i64> = tx
                .query_row(
                    "SELECT category_id FROM interventions WHERE id = ?1",
                    params![intervention_id.0],
                    |row| row.get::<_, Option<i64>>(0),
                )
                .optional()?
                .flatten();

            for org_unit_id in &submission.org_unit_ids {
                if let Some(category) = category {
                    superseded += tx.execute(
                        r#"
DELETE FROM intervention_assignments
WHERE scenario_id = ?1
  AND org_unit_id = ?2
  AND intervention_id != ?3
  AND intervention_id IN (SELECT id FROM interventions WHERE category_id = ?4)
"#,
                        params![scenario, org_unit_id.0, intervention_id.0, category],
                    )?;
                }
                inserted += tx.execute(
                    r#"
INSERT OR IGNORE INTO intervention_assignments(
    scenario_id, org_unit_id, intervention_id, created_at
) VALUES (?1, ?2, ?3, ?4)
"#,
                    params![scenario, org_unit_id.0, intervention_id.0, created_at],
                )?;
            }
        }
        tx.commit()?;

        debug!("scenario {scenario}: inserted {inserted} rows, superseded {superseded}");
        Ok(inserted)
    }

    pub fn load_catalog(&self) -> Result<Catalog> {
        let conn = self.lock()?;
        let mut categories = {
            let mut stmt =
                conn.prepare("SELECT id, name FROM intervention_categories ORDER BY id")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(InterventionCategory {
                        id: CategoryId(row.get(0)?),
                        name: row.get(1)?,
                        interventions: Vec::new(),
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };

        let mut stmt =
            conn.prepare("SELECT id, name, category_id, code FROM interventions ORDER BY id")?;
        let interventions = stmt
            .query_map([], row_to_intervention)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        for intervention in interventions {
            let Some(category) = intervention
                .category_id
                .and_then(|id| categories.iter_mut().find(|c| c.id == id))
            else {
                continue;
            };
            category.interventions.push(intervention);
        }
        Ok(Catalog::new(categories))
    }

    pub fn load_plans(&self, scenario: ScenarioId) -> Result<Vec<InterventionPlan>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
SELECT a.intervention_id,
       COALESCE(i.name, ''),
       i.category_id,
       i.code,
       a.org_unit_id,
       COALESCE(o.name, '')
FROM intervention_assignments a
LEFT JOIN interventions i ON i.id = a.intervention_id
LEFT JOIN org_units o ON o.id = a.org_unit_id
WHERE a.scenario_id = ?1
ORDER BY a.intervention_id, a.org_unit_id
"#,
        )?;
        let rows = stmt
            .query_map(params![scenario.0], |row| {
                let intervention = row_to_intervention(row)?;
                let org_unit = OrgUnit {
                    id: OrgUnitId(row.get(4)?),
                    name: row.get(5)?,
                };
                Ok((intervention, org_unit))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut plans: Vec<InterventionPlan> = Vec::new();
        for (intervention, org_unit) in rows {
            if let Some(plan) = plans
                .last_mut()
                .filter(|p| p.intervention.id == intervention.id)
            {
                plan.org_units.push(org_unit);
                continue;
            }
            plans.push(InterventionPlan {
                intervention,
                org_units: vec![org_unit],
            });
        }
        Ok(plans)
    }

    pub fn count_assignments(&self, scenario: ScenarioId) -> Result<usize> {
        let count: i64 = self.lock()?.query_row(
            "SELECT COUNT(*) FROM intervention_assignments WHERE scenario_id = ?1",
            params![scenario.0],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

fn row_to_intervention(row: &rusqlite::Row<'_>) -> rusqlite::Result<Intervention> {
    Ok(Intervention {
        id: InterventionId(row.get(0)?),
        name: row.get(1)?,
        category_id: row.get::<_, Option<i64>>(2)?.map(CategoryId),
        code: row.get(3)?,
    })
}

#[async_trait]
impl PlanningSource for AssignmentStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn fetch_catalog(&self) -> Result<Catalog> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.load_catalog()).await?
    }

    async fn fetch_plans(&self, scenario: ScenarioId) -> Result<Vec<InterventionPlan>> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.load_plans(scenario)).await?
    }
}

#[async_trait]
impl AssignmentSink for AssignmentStore {
    async fn submit(&self, submission: &AssignmentSubmission) -> Result<()> {
        let store = self.clone();
        let owned = submission.clone();
        let inserted =
            tokio::task::spawn_blocking(move || store.insert_submission(&owned)).await??;
        info!(
            "stored {inserted} assignment rows for scenario {}",
            submission.scenario_id
        );
        Ok(())
    }
}
