// CLI command implementations and the shared composition root

pub mod index;
pub mod query;
pub mod stats;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::Config;
use crate::enrich::EnrichmentGate;
use crate::index::db::SqliteGraphStore;
use crate::index::graph::GraphStore;
use crate::index::jobs::InMemoryJobStore;
use crate::indexer::fs::LocalFileSystem;
use crate::indexer::parser::ParserRegistry;
use crate::indexer::Indexer;
use crate::query::QueryEngine;

/// Everything a command needs, wired once per invocation
pub struct App {
    pub project: PathBuf,
    pub config: Config,
    pub database: PathBuf,
    pub store: Arc<SqliteGraphStore>,
    pub jobs: Arc<InMemoryJobStore>,
    pub indexer: Arc<Indexer>,
    gate: Option<Arc<EnrichmentGate>>,
}

impl App {
    pub async fn open(project: &Path, config: Config) -> Result<Self> {
        let database = config.database_path(project);
        let store = Arc::new(SqliteGraphStore::new(&database)?);
        store
            .ensure_schema()
            .await
            .context("Failed to prepare graph schema")?;
        debug!("Opened graph store at {}", database.display());

        let jobs = Arc::new(InMemoryJobStore::new(config.jobs.max_history));
        let fs = LocalFileSystem::new(config.indexing.max_file_size).with_include(config.indexing.include.clone());
        let gate = EnrichmentGate::from_config(store.clone(), &config)?.map(Arc::new);
        match &gate {
            Some(_) => info!("Enrichment enabled with {} provider(s)", config.scheduler.providers.len()),
            None => info!("Enrichment disabled"),
        }

        let indexer = Arc::new(Indexer::new(
            store.clone(),
            jobs.clone(),
            Arc::new(fs),
            Arc::new(ParserRegistry::with_defaults()),
            gate.clone(),
            config.indexing.clone(),
        ));

        Ok(Self {
            project: project.to_path_buf(),
            config,
            database,
            store,
            jobs,
            indexer,
            gate,
        })
    }

    pub fn query_engine(&self) -> QueryEngine {
        let engine = QueryEngine::new(self.store.clone());
        match self.gate.as_ref().and_then(|gate| gate.embedder()) {
            Some(embedder) => engine.with_embedder(embedder.clone()),
            None => engine,
        }
    }
}

/// Absolute form of a user supplied path. Paths that no longer exist (a
/// deleted file being removed from the graph) are joined onto the working
/// directory instead of canonicalized.
pub fn absolute_path(path: &Path) -> Result<PathBuf> {
    if let Ok(canonical) = path.canonicalize() {
        return Ok(canonical);
    }
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("Failed to read working directory")?;
    Ok(cwd.join(path))
}
