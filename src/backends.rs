use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use crate::assignment::sink::{AssignmentSink, HttpSink, StdoutSink};
use crate::catalog::http::Endpoint;
use crate::catalog::{ApiPaths, Catalog, HttpSource, JsonFileSource, OrgUnit, PlanningSource};
use crate::config::{Config, SinkKind, SourceKind};
use crate::snapshot::AssignmentStore;

/// The planning source and assignment sink selected by configuration.
#[derive(Clone)]
pub struct Backends {
    source: Arc<dyn PlanningSource>,
    sink: Arc<dyn AssignmentSink>,
    store: Option<Arc<AssignmentStore>>,
}

impl Backends {
    pub fn new(source: Arc<dyn PlanningSource>, sink: Arc<dyn AssignmentSink>) -> Self {
        Self {
            source,
            sink,
            store: None,
        }
    }

    /// Opens the SQLite store at most once, even when it serves as both source
    /// and sink.
    pub fn from_config(config: &Config) -> Result<Self> {
        let needs_store =
            config.source.kind == SourceKind::Sqlite || config.sink.kind == SinkKind::Sqlite;
        let store = if needs_store {
            Some(Arc::new(AssignmentStore::open(&config.resolved_db_path())?))
        } else {
            None
        };
        let endpoint = Endpoint::new(config.platform.base_url.clone(), config.token());

        let source: Arc<dyn PlanningSource> = match (config.source.kind, &store) {
            (SourceKind::Sqlite, Some(store)) => store.clone(),
            (SourceKind::Http, _) => Arc::new(HttpSource::new(
                endpoint.clone(),
                ApiPaths {
                    categories: config.platform.categories_path.clone(),
                    plans: config.platform.plans_path.clone(),
                },
            )),
            _ => Arc::new(JsonFileSource::new(config.resolved_snapshot_path())),
        };
        let sink: Arc<dyn AssignmentSink> = match (config.sink.kind, &store) {
            (SinkKind::Sqlite, Some(store)) => store.clone(),
            (SinkKind::Http, _) => Arc::new(HttpSink::new(
                endpoint,
                config.platform.assignments_path.clone(),
            )),
            _ => Arc::new(StdoutSink),
        };
        debug!(
            "planning source: {}, assignment sink: {:?}",
            source.name(),
            config.sink.kind
        );

        Ok(Self {
            source,
            sink,
            store,
        })
    }

    pub fn source(&self) -> &dyn PlanningSource {
        self.source.as_ref()
    }

    pub fn sink(&self) -> &dyn AssignmentSink {
        self.sink.as_ref()
    }

    /// Copies catalog and district names into the local store, if one is
    /// open, so that it can resolve categories when superseding assignments.
    pub async fn mirror(&self, catalog: &Catalog, org_units: &[OrgUnit]) -> Result<()> {
        let Some(store) = self.store.clone() else {
            return Ok(());
        };
        let catalog = catalog.clone();
        let org_units = org_units.to_vec();
        tokio::task::spawn_blocking(move || {
            store.sync_catalog(&catalog)?;
            store.upsert_org_units(&org_units)
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::Backends;
    use crate::config::{Config, SinkKind, SourceKind};

    #[test]
    fn snapshot_source_with_stdout_sink_opens_no_store() {
        let mut config = Config::default();
        config.source.kind = SourceKind::Snapshot;
        config.sink.kind = SinkKind::Stdout;
        let backends = Backends::from_config(&config).expect("backends");
        assert_eq!(backends.source().name(), "snapshot");
        assert!(backends.store.is_none());
    }

    #[test]
    fn http_source_uses_platform_endpoint() {
        let mut config = Config::default();
        config.source.kind = SourceKind::Http;
        config.sink.kind = SinkKind::Http;
        let backends = Backends::from_config(&config).expect("backends");
        assert_eq!(backends.source().name(), "http");
    }
}
