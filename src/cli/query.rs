use anyhow::{bail, Context, Result};
use clap::ValueEnum;

use super::App;
use crate::query::{QueryEngine, QueryResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum QueryKind {
    Callers,
    Callees,
    DeadCode,
    Hierarchy,
    Complex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

pub async fn query_graph(
    app: &App,
    kind: QueryKind,
    target: Option<String>,
    limit: usize,
    format: OutputFormat,
) -> Result<()> {
    let engine = app.query_engine();
    let target_required = || target.clone().context("This query needs a target symbol");

    let results = match kind {
        QueryKind::Callers => engine.find_callers(&target_required()?).await?,
        QueryKind::Callees => engine.find_callees(&target_required()?).await?,
        QueryKind::DeadCode => engine.dead_code().await?,
        QueryKind::Complex => engine.most_complex(limit).await?,
        QueryKind::Hierarchy => {
            let hierarchy = engine.class_hierarchy(&target_required()?).await?;
            if format == OutputFormat::Json {
                println!("{}", serde_json::to_string_pretty(&hierarchy)?);
                return Ok(());
            }
            println!("Ancestors of {}:", hierarchy.class);
            print_results(&hierarchy.ancestors);
            println!("Descendants of {}:", hierarchy.class);
            print_results(&hierarchy.descendants);
            return Ok(());
        }
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&results)?),
        OutputFormat::Text => {
            if results.is_empty() {
                println!("No results found");
            } else {
                println!("Found {} results:", results.len());
                print_results(&results);
            }
        }
    }
    Ok(())
}

pub async fn search(app: &App, query: &str, limit: usize, format: OutputFormat) -> Result<()> {
    if query.trim().is_empty() {
        bail!("Search query cannot be empty");
    }
    let engine: QueryEngine = app.query_engine();
    let results = engine.semantic_search(query, limit).await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&results)?),
        OutputFormat::Text if results.is_empty() => println!("No matches for '{}'", query),
        OutputFormat::Text => print_results(&results),
    }
    Ok(())
}

fn print_results(results: &[QueryResult]) {
    for result in results {
        let location = match result.line {
            Some(line) => format!("{}:{}", result.path, line),
            None => result.path.clone(),
        };
        match &result.detail {
            Some(detail) => println!("  {} {} ({}) [{}]", location, result.name, result.kind, detail),
            None => println!("  {} {} ({})", location, result.name, result.kind),
        }
    }
}
