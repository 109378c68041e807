use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use codegraph_sync::cli::{self, query::OutputFormat, query::QueryKind, App};
use codegraph_sync::config::{load_config, LoggingConfig};

#[derive(Parser)]
#[command(name = "codegraph")]
#[command(author = "Intent Project Team")]
#[command(version)]
#[command(about = "Incremental code property-graph indexer", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Project directory holding .codegraph.toml and the graph database
    #[arg(short, long, global = true, default_value = ".")]
    project: PathBuf,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Index a repository into the graph
    Index {
        /// Repository root
        path: PathBuf,

        /// Mark every node as belonging to a dependency
        #[arg(long)]
        dependency: bool,

        /// Keep watching for changes after indexing
        #[arg(short, long)]
        watch: bool,
    },

    /// Watch an already indexed repository for changes
    Watch {
        /// Repository roots
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Remove one file and everything it owns from the graph
    Remove {
        file: PathBuf,
    },

    /// Remove a repository and everything under it from the graph
    RemoveRepo {
        path: PathBuf,
    },

    /// Search symbols by description, or by name without an embedding provider
    Search {
        query: String,

        #[arg(short, long, default_value_t = 10)]
        limit: usize,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Query the graph
    Query {
        #[arg(value_enum)]
        kind: QueryKind,

        /// Target symbol (callers, callees, hierarchy)
        target: Option<String>,

        /// Result limit (complex)
        #[arg(short, long, default_value_t = 20)]
        limit: usize,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Show graph statistics
    Stats {
        /// Break counts down by label, language and edge type
        #[arg(long)]
        detailed: bool,
    },

    /// Delete all graph data
    Clear,
}

fn init_logging(logging: &LoggingConfig, debug: bool, verbose: bool) {
    let level = if debug {
        "debug"
    } else if verbose {
        "info"
    } else {
        logging.level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match logging.format.as_str() {
        "json" => builder.json().init(),
        "compact" => builder.compact().init(),
        _ => builder.pretty().init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let project = cli::absolute_path(&cli.project)?;
    let config = load_config(&project);
    init_logging(&config.logging, cli.debug, cli.verbose);

    info!("codegraph-sync v{} starting...", env!("CARGO_PKG_VERSION"));
    let app = App::open(&project, config).await?;

    match cli.command {
        Commands::Index {
            path,
            dependency,
            watch,
        } => {
            let path = cli::absolute_path(&path)?;
            cli::index::index_repository(&app, &path, dependency, watch).await?;
        }

        Commands::Watch { paths } => {
            let roots = paths
                .iter()
                .map(|p| cli::absolute_path(p))
                .collect::<Result<Vec<_>>>()?;
            cli::index::watch_until_interrupted(&app, &roots).await?;
        }

        Commands::Remove { file } => {
            cli::stats::remove_file(&app, &cli::absolute_path(&file)?).await?;
        }

        Commands::RemoveRepo { path } => {
            cli::stats::remove_repository(&app, &cli::absolute_path(&path)?).await?;
        }

        Commands::Search {
            query,
            limit,
            format,
        } => {
            cli::query::search(&app, &query, limit, format).await?;
        }

        Commands::Query {
            kind,
            target,
            limit,
            format,
        } => {
            cli::query::query_graph(&app, kind, target, limit, format).await?;
        }

        Commands::Stats { detailed } => {
            cli::stats::show_stats(&app, detailed || cli.verbose).await?;
        }

        Commands::Clear => {
            cli::stats::clear(&app).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::path::Path;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_query_command() {
        let cli = Cli::parse_from(["codegraph", "query", "dead-code", "-p", "/tmp/x"]);
        assert_eq!(cli.project, Path::new("/tmp/x"));
        match cli.command {
            Commands::Query { kind, target, .. } => {
                assert_eq!(kind, QueryKind::DeadCode);
                assert!(target.is_none());
            }
            _ => panic!("expected query command"),
        }
    }
}
