// Configuration management for codegraph-sync

use anyhow::{anyhow, Context};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Directories never indexed, wherever they appear
pub const BUILTIN_IGNORED_DIRS: &[&str] = &[
    "node_modules",
    ".git",
    "target",
    "dist",
    "build",
    "__pycache__",
    ".venv",
    "venv",
    "vendor",
    ".codegraph",
];

/// Generated files never indexed
pub const BUILTIN_IGNORED_FILES: &[&str] = &["*.min.js", "*.bundle.js", "*.map"];

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub indexing: IndexingConfig,
    pub watcher: WatcherConfig,
    pub enrichment: EnrichmentConfig,
    pub scheduler: SchedulerConfig,
    pub jobs: JobsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Graph database file, relative to the project root unless absolute
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingConfig {
    pub exclude: Vec<String>,
    pub include: Vec<String>,
    /// Files parsed and written concurrently during a run
    pub write_concurrency: usize,
    /// Re-index files whose edges pointed into a file the watcher re-indexed
    pub relink_dependents: bool,
    /// Files larger than this many bytes are skipped
    pub max_file_size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    pub debounce_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    pub enabled: bool,
    pub max_source_chars: usize,
    pub max_tokens: u32,
    /// Provider used for embeddings; the first provider when unset
    pub embedding_provider: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    /// Providers in dispatch priority order
    pub providers: Vec<ProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub base_url: String,
    pub model: String,
    #[serde(default)]
    pub embedding_model: Option<String>,
    /// Environment variable holding the API key
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_provider_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
}

fn default_provider_concurrency() -> usize {
    2
}

fn default_provider_timeout() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// Finished jobs kept in memory
    pub max_history: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".codegraph/graph.db"),
        }
    }
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            exclude: vec!["coverage/".to_string(), "**/__snapshots__/**".to_string()],
            include: vec![],
            write_concurrency: 4,
            relink_dependents: false,
            max_file_size: 1024 * 1024,
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self { debounce_ms: 500 }
    }
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_source_chars: 2000,
            max_tokens: 256,
            embedding_provider: None,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_ms: 1000,
            providers: vec![],
        }
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self { max_history: 100 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from project directory
    /// Looks for .codegraph.toml in the project root
    pub fn from_project_dir<P: AsRef<Path>>(project_dir: P) -> Self {
        let config_path = project_dir.as_ref().join(".codegraph.toml");

        if !config_path.exists() {
            tracing::debug!("No config at {}, using defaults", config_path.display());
            return Self::default();
        }

        match Self::from_file(&config_path) {
            Ok(config) => {
                tracing::info!("Loaded configuration from {}", config_path.display());
                config
            }
            Err(e) => {
                tracing::warn!("Could not load config from {}: {:#}", config_path.display(), e);
                tracing::info!("Using default configuration");
                Self::default()
            }
        }
    }

    /// Database location for a project rooted at `project_dir`
    pub fn database_path(&self, project_dir: &Path) -> PathBuf {
        if self.database.path.is_absolute() {
            self.database.path.clone()
        } else {
            project_dir.join(&self.database.path)
        }
    }

    /// Compiled include/exclude rules, built-ins included
    pub fn path_filter(&self) -> anyhow::Result<PathFilter> {
        PathFilter::new(&self.indexing.exclude, &self.indexing.include)
    }

    /// Validate configuration values
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.indexing.write_concurrency == 0 {
            return Err(anyhow!("Write concurrency must be greater than 0"));
        }
        if self.indexing.max_file_size == 0 {
            return Err(anyhow!("Max file size must be greater than 0"));
        }
        self.path_filter().context("Invalid include/exclude pattern")?;

        if self.watcher.debounce_ms == 0 {
            return Err(anyhow!("Watcher debounce must be greater than 0"));
        }

        if self.enrichment.max_source_chars == 0 {
            return Err(anyhow!("Enrichment max_source_chars must be greater than 0"));
        }
        if self.enrichment.max_tokens == 0 {
            return Err(anyhow!("Enrichment max_tokens must be greater than 0"));
        }

        let mut names = HashSet::new();
        for provider in &self.scheduler.providers {
            if provider.name.is_empty() {
                return Err(anyhow!("Provider name cannot be empty"));
            }
            if !names.insert(provider.name.as_str()) {
                return Err(anyhow!("Duplicate provider: {}", provider.name));
            }
            if provider.base_url.is_empty() {
                return Err(anyhow!("Provider {} has no base_url", provider.name));
            }
            if provider.concurrency == 0 {
                return Err(anyhow!("Provider {} concurrency must be greater than 0", provider.name));
            }
        }
        if let Some(embedding) = &self.enrichment.embedding_provider {
            if !names.contains(embedding.as_str()) {
                return Err(anyhow!("Unknown embedding provider: {}", embedding));
            }
        }

        if self.jobs.max_history == 0 {
            return Err(anyhow!("Job history must keep at least one job"));
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(anyhow!("Invalid log level: {}", self.logging.level));
        }
        let valid_formats = ["compact", "pretty", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(anyhow!("Invalid log format: {}", self.logging.format));
        }

        Ok(())
    }
}

/// Include/exclude matching over paths relative to the indexed root
#[derive(Debug, Clone)]
pub struct PathFilter {
    exclude: GlobSet,
    include: Option<GlobSet>,
}

impl PathFilter {
    pub fn new(exclude: &[String], include: &[String]) -> anyhow::Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for dir in BUILTIN_IGNORED_DIRS {
            add_pattern(&mut builder, &format!("{}/", dir))?;
        }
        for file in BUILTIN_IGNORED_FILES {
            add_pattern(&mut builder, file)?;
        }
        for pattern in exclude {
            add_pattern(&mut builder, pattern)?;
        }

        let include = if include.is_empty() {
            None
        } else {
            let mut builder = GlobSetBuilder::new();
            for pattern in include {
                add_pattern(&mut builder, pattern)?;
            }
            Some(builder.build()?)
        };

        Ok(Self {
            exclude: builder.build()?,
            include,
        })
    }

    /// Excluded paths; directories are matched by their own path
    pub fn is_excluded(&self, relative_path: &Path) -> bool {
        self.exclude.is_match(relative_path)
    }

    pub fn should_index(&self, relative_path: &Path) -> bool {
        if self.is_excluded(relative_path) {
            return false;
        }
        match &self.include {
            Some(include) => include.is_match(relative_path),
            None => true,
        }
    }
}

/// Gitignore-flavoured patterns: `dir/` matches the directory and all below
/// it, bare patterns match at any depth.
fn add_pattern(builder: &mut GlobSetBuilder, pattern: &str) -> anyhow::Result<()> {
    let anchored = |p: &str| {
        if p.contains('/') || p.starts_with("**") {
            p.to_string()
        } else {
            format!("**/{}", p)
        }
    };

    if let Some(dir) = pattern.strip_suffix('/') {
        let dir = anchored(dir);
        builder.add(Glob::new(&dir)?);
        builder.add(Glob::new(&format!("{}/**", dir))?);
    } else {
        builder.add(Glob::new(&anchored(pattern))?);
    }
    Ok(())
}

/// Load configuration for a project
pub fn load_config(project_dir: &Path) -> Config {
    Config::from_project_dir(project_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.indexing.write_concurrency, 4);
        assert!(!config.indexing.relink_dependents);
        assert_eq!(config.watcher.debounce_ms, 500);
        assert_eq!(config.scheduler.max_retries, 3);
        assert_eq!(config.jobs.max_history, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_path_filter() {
        let filter = Config::default().path_filter().unwrap();

        assert!(filter.should_index(Path::new("src/main.rs")));
        assert!(filter.should_index(Path::new("lib/utils.py")));

        assert!(!filter.should_index(Path::new("target/debug/build.rs")));
        assert!(!filter.should_index(Path::new("web/node_modules/react/index.js")));
        assert!(!filter.should_index(Path::new("node_modules")));
        assert!(!filter.should_index(Path::new("public/app.min.js")));
        assert!(!filter.should_index(Path::new("coverage/report.js")));
    }

    #[test]
    fn test_include_patterns() {
        let filter = PathFilter::new(&[], &["src/**".to_string()]).unwrap();
        assert!(filter.should_index(Path::new("src/a/b.js")));
        assert!(!filter.should_index(Path::new("scripts/b.js")));
        assert!(!filter.should_index(Path::new("src/node_modules/x.js")));
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(".codegraph.toml"),
            r#"
[indexing]
write_concurrency = 8
relink_dependents = true

[[scheduler.providers]]
name = "local"
base_url = "http://localhost:11434/v1"
model = "llama3"
concurrency = 3
"#,
        )
        .unwrap();

        let config = Config::from_project_dir(dir.path());
        assert_eq!(config.indexing.write_concurrency, 8);
        assert!(config.indexing.relink_dependents);
        assert_eq!(config.watcher.debounce_ms, 500);
        assert_eq!(config.scheduler.providers[0].concurrency, 3);
        assert_eq!(config.scheduler.providers[0].timeout_secs, 60);
        assert_eq!(
            config.database_path(dir.path()),
            dir.path().join(".codegraph/graph.db")
        );
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.indexing.write_concurrency = 0;
        assert!(config.validate().is_err());
        config.indexing.write_concurrency = 4;

        config.indexing.exclude.push("[unclosed".to_string());
        assert!(config.validate().is_err());
        config.indexing.exclude.pop();

        config.scheduler.providers = vec![
            ProviderConfig {
                name: "a".to_string(),
                base_url: "http://a".to_string(),
                model: "m".to_string(),
                embedding_model: None,
                api_key_env: None,
                concurrency: 1,
                timeout_secs: 10,
            };
            2
        ];
        assert!(config.validate().is_err());
        config.scheduler.providers.pop();
        assert!(config.validate().is_ok());

        config.enrichment.embedding_provider = Some("missing".to_string());
        assert!(config.validate().is_err());
        config.enrichment.embedding_provider = None;

        config.logging.level = "invalid".to_string();
        assert!(config.validate().is_err());
    }
}
