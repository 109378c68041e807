// Indexing pipeline: collect, pre-scan, write, link and enrich

pub mod fs;
pub mod link;
pub mod parser;
pub mod resolver;
pub mod watcher;

use anyhow::{Context, Result};
use futures::future;
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::IndexingConfig;
use crate::enrich::{EnrichmentGate, EnrichmentReport};
use crate::index::graph::{GraphStore, NodeKey, NodeLabel, Props, RelType, WriteBatch};
use crate::index::jobs::{IndexJob, JobPhase, JobStore, JobUpdate};
use crate::index::{ImportsMap, ParsedFile, SourceFile};
use fs::{FileSystem, GlobOptions};
use parser::ParserRegistry;

/// Property bag from name/value pairs; nulls are left out
fn props<const N: usize>(pairs: [(&str, Value); N]) -> Props {
    pairs
        .into_iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

/// Everything one file contributes to the graph, as a single batch that first
/// drops the file's previous version
pub fn file_batch(parsed: &ParsedFile, is_dependency: bool) -> WriteBatch {
    let path = parsed.path_str();
    let repo = parsed.repo_path.to_string_lossy().to_string();
    let indexed_at = chrono::Utc::now().to_rfc3339();
    let mut batch = WriteBatch::new();

    batch.delete_file_subtree(path.clone());

    // Repository -> Directory* -> File
    let repo_key = NodeKey::repository(&repo);
    batch.merge_node(
        repo_key.clone(),
        props([
            ("name", json!(file_name(&parsed.repo_path))),
            ("is_dependency", json!(is_dependency)),
            ("indexed_at", json!(indexed_at)),
        ]),
    );

    let mut parent = repo_key;
    if let Ok(relative) = parsed.path.strip_prefix(&parsed.repo_path) {
        let mut current = parsed.repo_path.clone();
        if let Some(dirs) = relative.parent() {
            for component in dirs.components() {
                current.push(component);
                let dir_key = NodeKey::directory(&current.to_string_lossy());
                batch.merge_node(
                    dir_key.clone(),
                    props([("name", json!(file_name(&current))), ("repo", json!(repo))]),
                );
                batch.merge_relationship(parent, dir_key.clone(), RelType::Contains, Props::new());
                parent = dir_key;
            }
        }
    }

    let file_key = NodeKey::file(&path);
    batch.merge_node(
        file_key.clone(),
        props([
            ("name", json!(file_name(&parsed.path))),
            ("language", json!(parsed.language)),
            ("repo", json!(repo)),
            ("is_dependency", json!(is_dependency)),
            ("indexed_at", json!(indexed_at)),
        ]),
    );
    batch.merge_relationship(parent, file_key.clone(), RelType::Contains, Props::new());

    for (class, id) in parsed.classes.iter().zip(parsed.class_ids()) {
        let key = NodeKey::symbol(NodeLabel::Class, &class.name, &path, class.start_line);
        batch.merge_node(
            key.clone(),
            props([
                ("qualified_name", json!(id)),
                ("end_line", json!(class.end_line)),
                ("bases", json!(class.bases)),
                ("interfaces", json!(class.interfaces)),
                ("is_abstract", json!(class.is_abstract)),
                ("is_interface", json!(class.is_interface)),
                ("source", json!(class.source)),
                ("doc", json!(class.doc)),
                ("repo", json!(repo)),
            ]),
        );
        batch.merge_relationship(file_key.clone(), key, RelType::Contains, Props::new());
    }

    for (function, id) in parsed.functions.iter().zip(parsed.function_ids()) {
        let key = NodeKey::symbol(NodeLabel::Function, &function.name, &path, function.start_line);
        batch.merge_node(
            key.clone(),
            props([
                ("qualified_name", json!(id)),
                ("end_line", json!(function.end_line)),
                ("params", json!(function.params)),
                ("source", json!(function.source)),
                ("doc", json!(function.doc)),
                ("complexity", json!(function.complexity)),
                ("kind", json!(function.kind.map(|k| k.as_str()))),
                ("is_async", json!(function.is_async)),
                ("decorators", json!(function.decorators)),
                ("context_function", json!(function.context.function)),
                ("context_class", json!(function.context.class)),
                ("repo", json!(repo)),
            ]),
        );
        batch.merge_relationship(file_key.clone(), key.clone(), RelType::Contains, Props::new());

        // Methods also hang off their class
        let owner = function.context.class.as_deref().and_then(|class_name| {
            parsed.classes.iter().find(|c| {
                c.name == class_name && c.start_line <= function.start_line && function.end_line <= c.end_line
            })
        });
        if let Some(class) = owner {
            let class_key = NodeKey::symbol(NodeLabel::Class, &class.name, &path, class.start_line);
            batch.merge_relationship(class_key, key.clone(), RelType::Contains, Props::new());
        }

        for (position, param) in function.params.iter().enumerate() {
            let param_key = NodeKey::parameter(param, &path, &function.name, function.start_line);
            batch.merge_node(
                param_key.clone(),
                props([("position", json!(position)), ("repo", json!(repo))]),
            );
            batch.merge_relationship(key.clone(), param_key, RelType::HasParameter, Props::new());
        }
    }

    for variable in &parsed.variables {
        let key = NodeKey::symbol(NodeLabel::Variable, &variable.name, &path, variable.line);
        batch.merge_node(
            key.clone(),
            props([
                ("value", json!(variable.value)),
                ("kind", json!(variable.kind)),
                ("context_function", json!(variable.context.function)),
                ("context_class", json!(variable.context.class)),
                ("repo", json!(repo)),
            ]),
        );
        batch.merge_relationship(file_key.clone(), key, RelType::Contains, Props::new());
    }

    // One IMPORTS edge per module, carrying every name imported from it
    let mut modules: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for import in &parsed.imports {
        modules.entry(import.source.as_str()).or_default().push(import.name.as_str());
    }
    for (module, names) in modules {
        let first_line = parsed
            .imports
            .iter()
            .filter(|i| i.source == module)
            .map(|i| i.line)
            .min();
        let module_key = NodeKey::module(module);
        batch.merge_node(module_key.clone(), Props::new());
        batch.merge_relationship(
            file_key.clone(),
            module_key,
            RelType::Imports,
            props([("names", json!(names)), ("line", json!(first_line))]),
        );
    }

    batch
}

/// Outcome of one indexing run
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub files_total: usize,
    pub files_written: usize,
    pub edges_linked: usize,
    pub enrichment: EnrichmentReport,
}

/// Drives directories and single files into the graph store
pub struct Indexer {
    store: Arc<dyn GraphStore>,
    jobs: Arc<dyn JobStore>,
    fs: Arc<dyn FileSystem>,
    registry: Arc<ParserRegistry>,
    gate: Option<Arc<EnrichmentGate>>,
    config: IndexingConfig,
}

impl Indexer {
    pub fn new(
        store: Arc<dyn GraphStore>,
        jobs: Arc<dyn JobStore>,
        fs: Arc<dyn FileSystem>,
        registry: Arc<ParserRegistry>,
        gate: Option<Arc<EnrichmentGate>>,
        config: IndexingConfig,
    ) -> Self {
        Self {
            store,
            jobs,
            fs,
            registry,
            gate,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    pub fn fs(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    pub fn registry(&self) -> &Arc<ParserRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &IndexingConfig {
        &self.config
    }

    /// Start indexing a directory in the background. Returns the job id at
    /// once; progress is visible through the job store.
    pub fn index_directory(self: &Arc<Self>, path: &Path, is_dependency: bool) -> Result<String> {
        let job = IndexJob::new(path, is_dependency);
        let job_id = job.id.clone();
        self.jobs.create(job).context("Failed to register indexing job")?;

        let indexer = Arc::clone(self);
        let root = path.to_path_buf();
        let id = job_id.clone();
        tokio::spawn(async move {
            indexer.run_job(&id, &root, is_dependency).await;
        });

        Ok(job_id)
    }

    /// Run a registered job to completion and record the terminal status
    pub async fn run_job(&self, job_id: &str, root: &Path, is_dependency: bool) {
        info!("Indexing {} (job {})", root.display(), job_id);
        match self.run_phases(job_id, root, is_dependency).await {
            Ok(summary) => {
                info!(
                    "Indexed {}: {}/{} files written, {} edges linked, {} descriptions generated ({} unchanged, {} failed)",
                    root.display(),
                    summary.files_written,
                    summary.files_total,
                    summary.edges_linked,
                    summary.enrichment.generated,
                    summary.enrichment.skipped,
                    summary.enrichment.failed
                );
                self.update_job(job_id, JobUpdate::completed());
            }
            Err(e) => {
                error!("Indexing {} failed: {:#}", root.display(), e);
                self.update_job(job_id, JobUpdate::failed(format!("{:#}", e)));
            }
        }
    }

    fn update_job(&self, job_id: &str, update: JobUpdate) {
        if let Err(e) = self.jobs.update(job_id, update) {
            warn!("Failed to update job {}: {}", job_id, e);
        }
    }

    /// Phases run strictly one after another. Only schema setup and file
    /// enumeration errors escape; everything per file is logged and skipped.
    async fn run_phases(&self, job_id: &str, root: &Path, is_dependency: bool) -> Result<RunSummary> {
        self.store
            .ensure_schema()
            .await
            .context("Failed to prepare graph schema")?;

        self.update_job(job_id, JobUpdate::phase(JobPhase::Collecting));
        let files = self.collect_files(root).await?;
        self.update_job(job_id, JobUpdate::total(files.len()));
        info!("Collected {} files under {}", files.len(), root.display());

        self.update_job(job_id, JobUpdate::phase(JobPhase::PreScanning));
        let imports = Arc::new(self.pre_scan(&files).await);
        debug!("Pre-scan found {} distinct names", imports.len());

        self.update_job(job_id, JobUpdate::phase(JobPhase::Writing));
        let written: Vec<ParsedFile> = stream::iter(files.iter().cloned())
            .map(|path: PathBuf| async move {
                let parsed = self.write_file(&path, root, is_dependency).await;
                self.update_job(job_id, JobUpdate::file_done());
                parsed
            })
            .buffer_unordered(self.config.write_concurrency.max(1))
            .filter_map(future::ready)
            .collect()
            .await;

        self.update_job(job_id, JobUpdate::phase(JobPhase::Linking));
        let mut edges_linked = 0;
        for parsed in &written {
            edges_linked += self.link_batch(parsed, link::inheritance_batch(parsed, &imports), "inheritance").await;
        }
        for parsed in &written {
            edges_linked += self.link_batch(parsed, link::calls_batch(parsed, &imports), "calls").await;
        }

        self.update_job(job_id, JobUpdate::phase(JobPhase::Enriching));
        let enrichment = self.enrich_run(&written).await;

        Ok(RunSummary {
            files_total: files.len(),
            files_written: written.len(),
            edges_linked,
            enrichment,
        })
    }

    /// Candidate files under `root`: registered extensions only, ignore rules
    /// applied, sorted and free of duplicates
    pub async fn collect_files(&self, root: &Path) -> Result<Vec<PathBuf>> {
        let patterns: Vec<String> = self
            .registry
            .extensions()
            .iter()
            .map(|ext| format!("**/*.{}", ext))
            .collect();

        let mut files = self
            .fs
            .glob(
                &patterns,
                GlobOptions {
                    cwd: root.to_path_buf(),
                    ignore: self.config.exclude.clone(),
                },
            )
            .await
            .with_context(|| format!("Failed to collect files under {}", root.display()))?;
        files.sort();
        files.dedup();
        Ok(files)
    }

    /// Project-wide definition index. Each parser scans its own files; the
    /// partial maps merge by name.
    pub async fn pre_scan(&self, files: &[PathBuf]) -> ImportsMap {
        let sources: Vec<(PathBuf, Result<String>)> = stream::iter(files.iter().cloned())
            .map(|path: PathBuf| async move {
                let text = self.fs.read_file(&path).await;
                (path, text)
            })
            .buffer_unordered(self.config.write_concurrency.max(1))
            .collect()
            .await;

        let mut groups: HashMap<&'static str, (Arc<dyn crate::index::Parser>, Vec<SourceFile>)> = HashMap::new();
        for (path, text) in sources {
            let Some(parser) = self.registry.parser_for(&path) else {
                continue;
            };
            match text {
                Ok(text) => groups
                    .entry(parser.language())
                    .or_insert_with(|| (parser.clone(), Vec::new()))
                    .1
                    .push(SourceFile { path, text }),
                Err(e) => debug!("Pre-scan could not read {}: {:#}", path.display(), e),
            }
        }

        let mut imports = ImportsMap::new();
        for (language, (parser, sources)) in groups {
            let count = sources.len();
            match tokio::task::spawn_blocking(move || parser.pre_scan(&sources)).await {
                Ok(partial) => {
                    debug!("Pre-scanned {} {} files", count, language);
                    imports.merge(partial);
                }
                Err(e) => warn!("Pre-scan of {} files failed: {}", language, e),
            }
        }
        imports
    }

    async fn parse_file(&self, path: &Path, repo_path: &Path, is_dependency: bool) -> Result<ParsedFile> {
        let parser = self
            .registry
            .parser_for(path)
            .with_context(|| format!("No parser for {}", path.display()))?;
        let source = self.fs.read_file(path).await?;

        let path = path.to_path_buf();
        let repo_path = repo_path.to_path_buf();
        tokio::task::spawn_blocking(move || parser.parse(&source, &path, &repo_path, is_dependency))
            .await
            .context("Parser task failed")?
    }

    /// Read, parse and write one file as a single batch. Failures are logged
    /// and yield `None`.
    async fn write_file(&self, path: &Path, repo_path: &Path, is_dependency: bool) -> Option<ParsedFile> {
        let parsed = match self.parse_file(path, repo_path, is_dependency).await {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Skipping {}: {:#}", path.display(), e);
                return None;
            }
        };

        match self.store.execute_batch(file_batch(&parsed, is_dependency)).await {
            Ok(summary) => {
                debug!(
                    "Wrote {}: {} nodes, {} edges, {} old nodes replaced",
                    path.display(),
                    summary.nodes_merged,
                    summary.edges_merged,
                    summary.nodes_deleted
                );
                Some(parsed)
            }
            Err(e) => {
                warn!("Failed to write {}: {}", path.display(), e);
                None
            }
        }
    }

    async fn link_batch(&self, parsed: &ParsedFile, batch: WriteBatch, pass: &str) -> usize {
        if batch.is_empty() {
            return 0;
        }
        match self.store.execute_batch(batch).await {
            Ok(summary) => summary.edges_merged,
            Err(e) => {
                warn!("Linking {} failed for {}: {}", pass, parsed.path.display(), e);
                0
            }
        }
    }

    /// Link one already written file's outgoing edges
    async fn link_file(&self, parsed: &ParsedFile, imports: &ImportsMap) -> usize {
        self.link_batch(parsed, link::inheritance_batch(parsed, imports), "inheritance").await
            + self.link_batch(parsed, link::calls_batch(parsed, imports), "calls").await
    }

    async fn enrich_run(&self, written: &[ParsedFile]) -> EnrichmentReport {
        let mut report = EnrichmentReport::default();
        let Some(gate) = &self.gate else {
            return report;
        };

        let mut directories: BTreeMap<PathBuf, Vec<String>> = BTreeMap::new();
        for parsed in written {
            report.absorb(gate.enrich_file(parsed).await);
            if let Some(dir) = parsed.path.parent() {
                directories
                    .entry(dir.to_path_buf())
                    .or_default()
                    .push(file_name(&parsed.path));
            }
        }
        for (dir, names) in directories {
            report.absorb(gate.enrich_directory(&dir, &names).await);
        }
        report
    }

    /// Write one file and link its outgoing edges against `imports`
    pub async fn index_file(
        &self,
        path: &Path,
        repo_path: &Path,
        imports: &ImportsMap,
        is_dependency: bool,
    ) -> Option<ParsedFile> {
        let parsed = self.write_file(path, repo_path, is_dependency).await?;
        let linked = self.link_file(&parsed, imports).await;
        debug!("Linked {} edges from {}", linked, path.display());
        Some(parsed)
    }

    /// Re-index a changed file: replace it, relink its outgoing edges and
    /// refresh its enrichment. With `relink_dependents` set, files whose edges
    /// pointed into it are re-indexed too so their links come back.
    /// Dependency flag the file was last indexed with, falling back to its
    /// repository's for files the graph has not seen yet
    async fn stored_dependency_flag(&self, path: &str, repo_path: &Path) -> bool {
        let lookups = [
            (NodeLabel::File, path.to_string()),
            (NodeLabel::Repository, repo_path.to_string_lossy().to_string()),
        ];
        for (label, key) in lookups {
            let filter = props([("path", json!(key))]);
            match self.store.find_nodes(label, filter).await {
                Ok(nodes) => {
                    let flag = nodes
                        .first()
                        .and_then(|n| n.props.get("is_dependency"))
                        .and_then(Value::as_bool);
                    if let Some(flag) = flag {
                        return flag;
                    }
                }
                Err(e) => warn!("Could not read dependency flag for {}: {}", key, e),
            }
        }
        false
    }

    pub async fn reindex_file(&self, path: &Path, repo_path: &Path, imports: &ImportsMap) -> Option<ParsedFile> {
        let path_str = path.to_string_lossy().to_string();
        let is_dependency = self.stored_dependency_flag(&path_str, repo_path).await;
        let dependents = if self.config.relink_dependents {
            self.store
                .incoming_edge_files(&path_str)
                .await
                .unwrap_or_else(|e| {
                    warn!("Could not find dependents of {}: {}", path.display(), e);
                    Vec::new()
                })
        } else {
            Vec::new()
        };

        let parsed = self.index_file(path, repo_path, imports, is_dependency).await?;
        info!("Re-indexed {}", path.display());

        for dependent in dependents {
            let dependent = PathBuf::from(dependent);
            if self.fs.exists(&dependent).await {
                debug!("Relinking dependent {}", dependent.display());
                let flag = self.stored_dependency_flag(&dependent.to_string_lossy(), repo_path).await;
                self.index_file(&dependent, repo_path, imports, flag).await;
            }
        }

        if let Some(gate) = &self.gate {
            let report = gate.enrich_file(&parsed).await;
            debug!(
                "Enrichment for {}: {} generated, {} unchanged, {} failed",
                path.display(),
                report.generated,
                report.skipped,
                report.failed
            );
        }

        Some(parsed)
    }

    /// Remove a file's nodes, edges and enrichment records
    pub async fn remove_file(&self, path: &Path) -> Result<usize> {
        let path_str = path.to_string_lossy().to_string();
        let removed = self
            .store
            .delete_file_subtree(&path_str)
            .await
            .with_context(|| format!("Failed to remove {}", path.display()))?;
        self.store.delete_enrichment(&path_str).await?;
        info!("Removed {} ({} nodes)", path.display(), removed);
        Ok(removed)
    }

    /// Remove a repository and everything indexed under it
    pub async fn remove_repository(&self, path: &Path) -> Result<usize> {
        let removed = self
            .store
            .delete_repository_subtree(&path.to_string_lossy())
            .await
            .with_context(|| format!("Failed to remove repository {}", path.display()))?;
        Ok(removed)
    }
}
