//! mingo CLI
//!
//! Usage:
//!   mingo check <context>                          Load a context and list its queries
//!   mingo render <context> <query> -p key=value    Print the resolved statement
//!   mingo run <context> <query> -p key=value       Execute against MongoDB
//!   mingo run <context> <query> --first            Print only the first record
//!   mingo run <context> <query> --summary          Print timing statistics on exit

use anyhow::{anyhow, Context as _, Result};
use bson::{Bson, Document as BsonDocument};
use clap::{Parser, Subcommand};
use mingo_benchmark::SummaryBenchmarkService;
use mingo_core::{
    create_engine, parser::load_context, Context, ContextOptions, QueryManager, QueryParameters,
    StatementBuilder,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(name = "mingo")]
#[command(about = "Validate, render and run mingo query sets", long_about = None)]
#[command(version)]
struct Cli {
    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a context file and its query sets, then list the registered queries
    Check {
        /// Path to the context file
        context: PathBuf,
    },
    /// Print the statement a query resolves to, without connecting
    Render {
        context: PathBuf,
        /// Query name
        query: String,
        /// Parameter as key=value; values are parsed as JSON, else taken as text
        #[arg(short = 'p', long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,
    },
    /// Execute a query and print the records as JSON
    Run {
        context: PathBuf,
        query: String,
        #[arg(short = 'p', long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,
        /// Print only the first record
        #[arg(long)]
        first: bool,
        /// Print execution-time statistics on exit (needs benchmark enabled in the context)
        #[arg(long)]
        summary: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    match cli.command {
        Commands::Check { context } => run_check(&context),
        Commands::Render {
            context,
            query,
            params,
        } => run_render(&context, &query, &params),
        Commands::Run {
            context,
            query,
            params,
            first,
            summary,
        } => {
            let rt = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
            rt.block_on(run_query(&context, &query, &params, first, summary))
        }
    }
}

/// Load every query set named by the context without touching MongoDB
fn load_queries(context: &Path) -> Result<(mingo_core::ContextConfig, QueryManager)> {
    let config = load_context(context)
        .with_context(|| format!("Failed to load context {}", context.display()))?;
    let manager = QueryManager::new();
    for path in &config.query_sets {
        debug!(path = %path.display(), "registering query set");
        manager
            .register_file(path)
            .with_context(|| format!("Failed to register {}", path.display()))?;
    }
    Ok((config, manager))
}

fn run_check(context: &Path) -> Result<()> {
    let (config, manager) = load_queries(context)?;

    println!("context: {}", config.source.display());
    println!("database: {}", config.mongo.connection_string());
    println!("engine: {}", config.engine);
    for set in manager.query_sets() {
        println!("\n{} ({} queries)", set.path.display(), set.len());
        for name in set.names() {
            let query = manager.lookup(name)?;
            let dynamic = if query.body.is_dynamic() { ", dynamic" } else { "" };
            println!("  {} -> {} [{}{}]", query.name, query.collection, query.kind, dynamic);
        }
    }
    println!("\n{} queries OK", manager.len());
    Ok(())
}

fn run_render(context: &Path, query: &str, params: &[String]) -> Result<()> {
    let (config, manager) = load_queries(context)?;
    let parameters = parse_params(params)?;

    let builder = StatementBuilder::new(create_engine(config.engine));
    let statement = builder.build(&*manager.lookup(query)?, &parameters)?;
    println!("{}", serde_json::to_string_pretty(&statement.to_json())?);
    Ok(())
}

async fn run_query(context: &Path, query: &str, params: &[String], first: bool, summary: bool) -> Result<()> {
    let parameters = parse_params(params)?;
    let stats = Arc::new(SummaryBenchmarkService::new());
    let mut options = ContextOptions::new();
    if summary {
        options = options.with_benchmark_service(stats.clone());
    }
    let ctx = Context::create(context, options).await?;

    let result = async {
        let records: Vec<BsonDocument> = if first {
            ctx.template()
                .query_for_object::<BsonDocument>(query, &parameters)
                .await?
                .into_iter()
                .collect()
        } else {
            ctx.template().query_for_list::<BsonDocument>(query, &parameters).await?
        };
        info!(query, records = records.len(), "query returned");
        for record in records {
            let json = Bson::Document(record).into_relaxed_extjson();
            println!("{}", serde_json::to_string(&json)?);
        }
        Ok::<_, anyhow::Error>(())
    }
    .await;

    if let Err(e) = &result {
        warn!(query, error = %e, "query failed, shutting down");
    }
    ctx.shutdown().await?;
    if summary {
        for (name, stats) in stats.snapshot() {
            eprintln!(
                "{}: {} run(s), mean {:.3} ms, min {:.3} ms, max {:.3} ms",
                name,
                stats.count,
                stats.mean / 1e6,
                stats.min as f64 / 1e6,
                stats.max as f64 / 1e6
            );
        }
    }
    result
}

/// `key=value` pairs; values parse as JSON, falling back to plain text
fn parse_params(params: &[String]) -> Result<QueryParameters> {
    params
        .iter()
        .map(|param| -> Result<(String, Bson)> {
            let (key, value) = param
                .split_once('=')
                .map(|(key, value)| (key.trim(), value))
                .filter(|(key, _)| !key.is_empty())
                .ok_or_else(|| anyhow!("Invalid parameter '{}', expected key=value", param))?;
            Ok((key.to_string(), parse_value(value)))
        })
        .collect()
}

fn parse_value(text: &str) -> Bson {
    serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .and_then(|json| Bson::try_from(json).ok())
        .unwrap_or_else(|| Bson::String(text.to_string()))
}

fn init_logging(level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init()
        .ok();
}
