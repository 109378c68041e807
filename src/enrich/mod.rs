// Content-hash gated description and embedding generation

pub mod provider;
pub mod scheduler;

use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::{Config, EnrichmentConfig};
use crate::index::graph::{EnrichmentKey, GraphStore, NodeLabel};
use crate::index::ParsedFile;
use crate::indexer::parser::truncate_chars;
use provider::{EmbeddingProvider, OpenAiCompatibleProvider};
use scheduler::TaskScheduler;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Digest used to detect unchanged source
pub fn content_hash(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

/// What one enrichment produced; mirrors the record written to the store
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SymbolSummary {
    pub name: String,
    pub kind: NodeLabel,
    pub path: String,
    pub line: u32,
    pub description: String,
    pub content_hash: String,
}

#[derive(Debug, Clone, Default)]
pub struct EnrichmentReport {
    pub generated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub summaries: Vec<SymbolSummary>,
}

impl EnrichmentReport {
    pub fn absorb(&mut self, other: EnrichmentReport) {
        self.generated += other.generated;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.summaries.extend(other.summaries);
    }

    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Generated(summary) => {
                self.generated += 1;
                self.summaries.push(summary);
            }
            Outcome::Skipped => self.skipped += 1,
            Outcome::Failed => self.failed += 1,
        }
    }
}

enum Outcome {
    Generated(SymbolSummary),
    Skipped,
    Failed,
}

/// One thing to describe
struct Target<'a> {
    key: EnrichmentKey,
    name: String,
    line: u32,
    language: &'a str,
    text: String,
}

pub struct EnrichmentGate {
    store: Arc<dyn GraphStore>,
    scheduler: TaskScheduler,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    config: EnrichmentConfig,
}

impl EnrichmentGate {
    pub fn new(
        store: Arc<dyn GraphStore>,
        scheduler: TaskScheduler,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        config: EnrichmentConfig,
    ) -> Self {
        Self {
            store,
            scheduler,
            embedder,
            config,
        }
    }

    /// Gate for a configuration, or `None` when enrichment is disabled or no
    /// provider is configured
    pub fn from_config(store: Arc<dyn GraphStore>, config: &Config) -> anyhow::Result<Option<Self>> {
        if !config.enrichment.enabled || config.scheduler.providers.is_empty() {
            return Ok(None);
        }

        let scheduler = TaskScheduler::from_config(&config.scheduler)?;
        let embedding_config = match &config.enrichment.embedding_provider {
            Some(name) => config.scheduler.providers.iter().find(|p| &p.name == name),
            None => config.scheduler.providers.first(),
        };
        let embedder = match embedding_config {
            Some(provider) => {
                Some(Arc::new(OpenAiCompatibleProvider::from_config(provider)?) as Arc<dyn EmbeddingProvider>)
            }
            None => {
                warn!("Embedding provider not found; descriptions are stored without embeddings");
                None
            }
        };

        Ok(Some(Self::new(store, scheduler, embedder, config.enrichment.clone())))
    }

    pub fn embedder(&self) -> Option<&Arc<dyn EmbeddingProvider>> {
        self.embedder.as_ref()
    }

    /// Describe every function and class with captured source, and the file
    /// as a whole
    pub async fn enrich_file(&self, parsed: &ParsedFile) -> EnrichmentReport {
        let path = parsed.path_str();
        let language = parsed.language.as_str();
        let mut targets = Vec::new();

        for (function, id) in parsed.functions.iter().zip(parsed.function_ids()) {
            if let Some(source) = &function.source {
                targets.push(Target {
                    key: EnrichmentKey::symbol(NodeLabel::Function, &id, &path),
                    name: function.name.clone(),
                    line: function.start_line,
                    language,
                    text: source.clone(),
                });
            }
        }
        for (class, id) in parsed.classes.iter().zip(parsed.class_ids()) {
            if let Some(source) = &class.source {
                targets.push(Target {
                    key: EnrichmentKey::symbol(NodeLabel::Class, &id, &path),
                    name: class.name.clone(),
                    line: class.start_line,
                    language,
                    text: source.clone(),
                });
            }
        }
        if let Some(source) = &parsed.source {
            targets.push(Target {
                key: EnrichmentKey::path(NodeLabel::File, &path),
                name: file_name(&parsed.path),
                line: 1,
                language,
                text: source.clone(),
            });
        }

        self.enrich_all(targets).await
    }

    /// Describe a directory from the names of the files it contains
    pub async fn enrich_directory(&self, dir: &Path, file_names: &[String]) -> EnrichmentReport {
        let mut names = file_names.to_vec();
        names.sort();
        names.dedup();

        let path = dir.to_string_lossy().to_string();
        let target = Target {
            key: EnrichmentKey::path(NodeLabel::Directory, &path),
            name: file_name(dir),
            line: 0,
            language: "",
            text: names.join("\n"),
        };
        self.enrich_all(vec![target]).await
    }

    async fn enrich_all(&self, targets: Vec<Target<'_>>) -> EnrichmentReport {
        let outcomes = futures::future::join_all(targets.iter().map(|t| self.enrich_one(t))).await;
        let mut report = EnrichmentReport::default();
        for outcome in outcomes {
            report.record(outcome);
        }
        report
    }

    async fn enrich_one(&self, target: &Target<'_>) -> Outcome {
        let label = target.key.label;
        let hash = content_hash(&target.text);

        match self.store.get_content_hash(&target.key).await {
            Ok(Some(stored)) if stored == hash => {
                debug!("Unchanged, skipping {} {} in {}", label, target.name, target.key.path);
                return Outcome::Skipped;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Failed to read content hash for {} {}: {}", label, target.name, e);
                return Outcome::Failed;
            }
        }

        let prompt = self.prompt_for(target);
        let Some(raw) = self.scheduler.submit(prompt, self.config.max_tokens).await else {
            warn!("No description generated for {} {} in {}", label, target.name, target.key.path);
            return Outcome::Failed;
        };
        let description = WHITESPACE.replace_all(raw.trim(), " ").to_string();

        let embedding = match &self.embedder {
            Some(embedder) => match embedder.generate_embedding(&description).await {
                Ok(embedding) => embedding,
                Err(e) => {
                    warn!("Embedding failed for {} {}: {}", label, target.name, e);
                    return Outcome::Failed;
                }
            },
            None => Vec::new(),
        };

        if let Err(e) = self
            .store
            .set_enrichment(&target.key, &embedding, &description, &hash)
            .await
        {
            warn!("Failed to store enrichment for {} {}: {}", label, target.name, e);
            return Outcome::Failed;
        }

        debug!("Enriched {} {} in {}", label, target.name, target.key.path);
        Outcome::Generated(SymbolSummary {
            name: target.name.clone(),
            kind: label,
            path: target.key.path.clone(),
            line: target.line,
            description,
            content_hash: hash,
        })
    }

    fn prompt_for(&self, target: &Target<'_>) -> String {
        let body = truncate_chars(&target.text, self.config.max_source_chars);
        match target.key.label {
            NodeLabel::Directory => format!(
                "Describe the purpose of the directory `{}` from the files it contains:\n{}",
                target.key.path, body
            ),
            NodeLabel::File => format!(
                "Describe the purpose of the {} file `{}`.\n\n```{}\n{}\n```",
                target.language, target.key.path, target.language, body
            ),
            label => format!(
                "Describe the {} `{}` defined at {}:{}.\n\n```{}\n{}\n```",
                label.as_str().to_lowercase(),
                target.name,
                target.key.path,
                target.line,
                target.language,
                body
            ),
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}
