use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub platform: PlatformConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub sink: SinkConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub planning: PlanningConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Snapshot,
    Http,
    Sqlite,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    Sqlite,
    Http,
    Stdout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_source_kind")]
    pub kind: SourceKind,
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_categories_path")]
    pub categories_path: String,
    #[serde(default = "default_plans_path")]
    pub plans_path: String,
    #[serde(default = "default_assignments_path")]
    pub assignments_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    #[serde(default = "default_sink_kind")]
    pub kind: SinkKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanningConfig {
    #[serde(default = "default_scenario")]
    pub default_scenario: i64,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub snapshot_path: Option<String>,
    pub source_kind: Option<SourceKind>,
    pub sink_kind: Option<SinkKind>,
    pub base_url: Option<String>,
}

impl Config {
    pub fn default_path() -> PathBuf {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        home.join(".config/snt-planner/config.toml")
    }

    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(|p| p.to_path_buf())
            .unwrap_or_else(Self::default_path);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read_to_string(&path)
            .with_context(|| format!("failed reading config: {}", path.display()))?;
        let parsed: Self = toml::from_str(&data)
            .with_context(|| format!("failed parsing TOML config: {}", path.display()))?;
        Ok(parsed)
    }

    /// A snapshot path given on the command line implies the snapshot source
    /// unless a source kind is given as well.
    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(path) = overrides.snapshot_path {
            self.source.snapshot_path = path;
            self.source.kind = SourceKind::Snapshot;
        }
        if let Some(kind) = overrides.source_kind {
            self.source.kind = kind;
        }
        if let Some(kind) = overrides.sink_kind {
            self.sink.kind = kind;
        }
        if let Some(base_url) = overrides.base_url {
            self.platform.base_url = base_url;
        }
    }

    pub fn write_template(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed creating config directory: {}", parent.display())
            })?;
        }
        fs::write(path, Self::default_template())
            .with_context(|| format!("failed writing config template: {}", path.display()))
    }

    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }

    pub fn resolved_snapshot_path(&self) -> PathBuf {
        expand_tilde(&self.source.snapshot_path)
    }

    pub fn token(&self) -> Option<String> {
        let token = self.platform.token.trim();
        (!token.is_empty()).then(|| token.to_string())
    }

    pub fn default_template() -> String {
        let template = r#"[source]
# snapshot | http | sqlite
kind = "snapshot"
snapshot_path = "~/.local/share/snt-planner/snapshot.json"

[platform]
base_url = "http://localhost:8081"
token = ""
categories_path = "/api/snt_malaria/intervention_categories/"
plans_path = "/api/snt_malaria/intervention_assignments/grouped_by_intervention/?scenario_id={scenario}"
assignments_path = "/api/snt_malaria/intervention_assignments/"

[storage]
db_path = "~/.local/share/snt-planner/planner.db"

[sink]
# sqlite | http | stdout
kind = "sqlite"

[server]
host = "127.0.0.1"
port = 3001

[planning]
default_scenario = 1
"#;
        template.to_string()
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: default_source_kind(),
            snapshot_path: default_snapshot_path(),
        }
    }
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token: String::new(),
            categories_path: default_categories_path(),
            plans_path: default_plans_path(),
            assignments_path: default_assignments_path(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            kind: default_sink_kind(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for PlanningConfig {
    fn default() -> Self {
        Self {
            default_scenario: default_scenario(),
        }
    }
}

fn default_source_kind() -> SourceKind {
    SourceKind::Snapshot
}

fn default_snapshot_path() -> String {
    "~/.local/share/snt-planner/snapshot.json".to_string()
}

fn default_base_url() -> String {
    "http://localhost:8081".to_string()
}

fn default_categories_path() -> String {
    "/api/snt_malaria/intervention_categories/".to_string()
}

fn default_plans_path() -> String {
    "/api/snt_malaria/intervention_assignments/grouped_by_intervention/?scenario_id={scenario}"
        .to_string()
}

fn default_assignments_path() -> String {
    "/api/snt_malaria/intervention_assignments/".to_string()
}

fn default_db_path() -> String {
    "~/.local/share/snt-planner/planner.db".to_string()
}

fn default_sink_kind() -> SinkKind {
    SinkKind::Sqlite
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3001
}

fn default_scenario() -> i64 {
    1
}

#[cfg(test)]
mod tests {
    use super::{Config, ConfigOverrides, SinkKind, SourceKind};

    #[test]
    fn template_parses_to_defaults() {
        let parsed: Config = toml::from_str(&Config::default_template()).expect("valid template");
        let defaults = Config::default();
        assert_eq!(parsed.source.kind, defaults.source.kind);
        assert_eq!(parsed.platform.plans_path, defaults.platform.plans_path);
        assert_eq!(parsed.sink.kind, SinkKind::Sqlite);
        assert_eq!(parsed.server.port, 3001);
        assert!(parsed.token().is_none());
    }

    #[test]
    fn partial_file_fills_missing_sections() {
        let parsed: Config = toml::from_str(
            r#"
[source]
kind = "http"

[platform]
token = "secret"
"#,
        )
        .expect("valid config");
        assert_eq!(parsed.source.kind, SourceKind::Http);
        assert_eq!(parsed.token().as_deref(), Some("secret"));
        assert_eq!(parsed.planning.default_scenario, 1);
    }

    #[test]
    fn snapshot_override_switches_source() {
        let mut config = Config::default();
        config.source.kind = SourceKind::Http;
        config.apply_overrides(ConfigOverrides {
            snapshot_path: Some("/tmp/snapshot.json".to_string()),
            ..ConfigOverrides::default()
        });
        assert_eq!(config.source.kind, SourceKind::Snapshot);
        assert_eq!(
            config.resolved_snapshot_path(),
            std::path::PathBuf::from("/tmp/snapshot.json")
        );
    }
}
