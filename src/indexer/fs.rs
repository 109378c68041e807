// File system port and local adapter

use anyhow::{Context, Result};
use async_trait::async_trait;
use globset::{Glob, GlobSetBuilder};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::PathFilter;

#[derive(Debug, Clone, Default)]
pub struct GlobOptions {
    /// Directory patterns are matched relative to
    pub cwd: PathBuf,
    /// Extra exclude patterns on top of the built-in ignore set
    pub ignore: Vec<String>,
}

#[async_trait]
pub trait FileSystem: Send + Sync {
    async fn read_file(&self, path: &Path) -> Result<String>;

    async fn exists(&self, path: &Path) -> bool;

    /// Files under `options.cwd` matching any of `patterns`
    async fn glob(&self, patterns: &[String], options: GlobOptions) -> Result<Vec<PathBuf>>;
}

/// Ignore rules for one root: built-in set, configured patterns and the
/// root's `.gitignore`
#[derive(Debug, Clone)]
pub struct IgnoreRules {
    root: PathBuf,
    filter: PathFilter,
    gitignore: Gitignore,
}

impl IgnoreRules {
    pub fn new(root: &Path, exclude: &[String], include: &[String]) -> Result<Self> {
        let filter = PathFilter::new(exclude, include)?;

        let mut builder = GitignoreBuilder::new(root);
        let gitignore_path = root.join(".gitignore");
        if gitignore_path.exists() {
            if let Some(e) = builder.add(&gitignore_path) {
                warn!("Problem reading {}: {}", gitignore_path.display(), e);
            }
        }
        let gitignore = builder.build().unwrap_or_else(|e| {
            warn!("Ignoring invalid .gitignore in {}: {}", root.display(), e);
            Gitignore::empty()
        });

        Ok(Self {
            root: root.to_path_buf(),
            filter,
            gitignore,
        })
    }

    /// Whether a path under the root is skipped entirely
    pub fn is_ignored(&self, path: &Path, is_dir: bool) -> bool {
        let Ok(relative) = path.strip_prefix(&self.root) else {
            return true;
        };
        if relative.as_os_str().is_empty() {
            return false;
        }
        if self.filter.is_excluded(relative) {
            return true;
        }
        self.gitignore
            .matched_path_or_any_parents(path, is_dir)
            .is_ignore()
    }

    /// Whether a file passes every rule, include patterns included
    pub fn accepts_file(&self, path: &Path) -> bool {
        if self.is_ignored(path, false) {
            return false;
        }
        match path.strip_prefix(&self.root) {
            Ok(relative) => self.filter.should_index(relative),
            Err(_) => false,
        }
    }
}

/// Local disk implementation
#[derive(Debug, Clone)]
pub struct LocalFileSystem {
    include: Vec<String>,
    max_file_size: u64,
}

impl LocalFileSystem {
    pub fn new(max_file_size: u64) -> Self {
        Self {
            include: Vec::new(),
            max_file_size,
        }
    }

    pub fn with_include(mut self, include: Vec<String>) -> Self {
        self.include = include;
        self
    }
}

impl Default for LocalFileSystem {
    fn default() -> Self {
        Self::new(1024 * 1024)
    }
}

fn glob_blocking(
    patterns: &[String],
    options: &GlobOptions,
    include: &[String],
    max_file_size: u64,
) -> Result<Vec<PathBuf>> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid pattern: {}", pattern))?);
    }
    let wanted = builder.build()?;

    let root = &options.cwd;
    let rules = IgnoreRules::new(root, &options.ignore, include)?;

    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| !rules.is_ignored(entry.path(), entry.file_type().is_dir()));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                // The root itself must be readable; anything below is skipped
                if e.depth() == 0 {
                    return Err(e).with_context(|| format!("Failed to read {}", root.display()));
                }
                debug!("Skipping unreadable entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };
        if !wanted.is_match(relative) || !rules.accepts_file(path) {
            continue;
        }
        match entry.metadata() {
            Ok(meta) if meta.len() > max_file_size => {
                debug!("Skipping large file: {} ({} bytes)", path.display(), meta.len());
                continue;
            }
            Ok(_) => {}
            Err(e) => {
                debug!("Skipping {}: {}", path.display(), e);
                continue;
            }
        }
        files.push(path.to_path_buf());
    }

    files.sort();
    Ok(files)
}

#[async_trait]
impl FileSystem for LocalFileSystem {
    async fn read_file(&self, path: &Path) -> Result<String> {
        tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))
    }

    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    async fn glob(&self, patterns: &[String], options: GlobOptions) -> Result<Vec<PathBuf>> {
        let patterns = patterns.to_vec();
        let include = self.include.clone();
        let max_file_size = self.max_file_size;
        tokio::task::spawn_blocking(move || glob_blocking(&patterns, &options, &include, max_file_size))
            .await
            .context("File enumeration task failed")?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn touch(root: &Path, relative: &str) {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "x").unwrap();
    }

    #[tokio::test]
    async fn test_glob_honours_ignore_rules() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        touch(root, "src/app.js");
        touch(root, "src/lib/util.py");
        touch(root, "src/readme.md");
        touch(root, "node_modules/react/index.js");
        touch(root, "dist/bundle.js");
        touch(root, "generated/out.js");
        touch(root, "src/app.min.js");
        touch(root, "scratch/tmp.js");
        std::fs::write(root.join(".gitignore"), "generated/\n").unwrap();

        let fs = LocalFileSystem::default();
        let files = fs
            .glob(
                &["**/*.js".to_string(), "**/*.py".to_string()],
                GlobOptions {
                    cwd: root.to_path_buf(),
                    ignore: vec!["scratch/".to_string()],
                },
            )
            .await
            .unwrap();

        let relative: Vec<String> = files
            .iter()
            .map(|p| p.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/"))
            .collect();
        assert_eq!(relative, vec!["src/app.js", "src/lib/util.py"]);
    }

    #[tokio::test]
    async fn test_glob_skips_large_files() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("big.js"), "x".repeat(64)).unwrap();
        std::fs::write(dir.path().join("small.js"), "x").unwrap();

        let files = LocalFileSystem::new(16)
            .glob(
                &["**/*.js".to_string()],
                GlobOptions {
                    cwd: dir.path().to_path_buf(),
                    ignore: vec![],
                },
            )
            .await
            .unwrap();
        assert_eq!(files, vec![dir.path().join("small.js")]);
    }

    #[tokio::test]
    async fn test_missing_root_is_an_error() {
        let dir = tempdir().unwrap();
        let result = LocalFileSystem::default()
            .glob(
                &["**/*.js".to_string()],
                GlobOptions {
                    cwd: dir.path().join("missing"),
                    ignore: vec![],
                },
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_read_and_exists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.js");
        std::fs::write(&path, "let a = 1;").unwrap();

        let fs = LocalFileSystem::default();
        assert!(fs.exists(&path).await);
        assert_eq!(fs.read_file(&path).await.unwrap(), "let a = 1;");
        assert!(!fs.exists(&dir.path().join("b.js")).await);
        assert!(fs.read_file(&dir.path().join("b.js")).await.is_err());
    }
}
