pub const BASE_MIGRATION: &str = r#"
CREATE TABLE IF NOT EXISTS intervention_categories (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS interventions (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    category_id INTEGER,
    code TEXT
);
CREATE INDEX IF NOT EXISTS idx_interventions_category
    ON interventions(category_id);

CREATE TABLE IF NOT EXISTS org_units (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS intervention_assignments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    scenario_id INTEGER NOT NULL,
    org_unit_id INTEGER NOT NULL,
    intervention_id INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE(scenario_id, org_unit_id, intervention_id)
);
CREATE INDEX IF NOT EXISTS idx_assignments_scenario
    ON intervention_assignments(scenario_id, intervention_id);
"#;
