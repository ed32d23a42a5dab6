use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};
use pg_query_analyzer::{Analyzer, PgDatabase};

mod config;
mod report;

use config::FileConfig;
use report::ReportSink;

/// Profile a corpus of SQL statements against PostgreSQL and suggest keys and indexes
#[derive(Debug, Parser)]
#[command(name = "query-analyzer", version)]
struct Args {
    /// Configuration file holding connection settings and the `[query]` corpus
    #[arg(short, long, default_value = "queryanalyzer.toml")]
    config: PathBuf,

    /// Directory receiving the report files
    #[arg(short, long, default_value = "report")]
    output: PathBuf,

    /// Connection URL, overriding the configuration file
    #[arg(long, env = "DATABASE_URL")]
    url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = FileConfig::load(&args.config)?;

    let level = if config.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let queries = config.queries()?;
    if queries.is_empty() {
        println!("No queries found in {}", args.config.display());
        return Ok(());
    }

    let db = match args.url.as_deref().or(config.url.as_deref()) {
        Some(url) => PgDatabase::connect(url).await,
        None => PgDatabase::connect_with(config.connect_options()?).await,
    }
    .context("cannot connect to the database")?;

    let mut analyzer = Analyzer::new(db, config.analyzer_config());
    let outcome = analyzer.run(&queries).await;

    // Results of the statements processed before a failure are still written
    let sink = ReportSink::create(&args.output)?;
    sink.write_results(analyzer.results())?;
    sink.write_timings(&analyzer.timings())?;
    let scripts = sink.write_replay_scripts(&analyzer.replay_scripts())?;
    info!("Wrote {} replay scripts to {}", scripts, args.output.display());

    if let Err(err) = outcome {
        error!("Run aborted after {} of {} statements", analyzer.results().len(), queries.len());
        return Err(err.into());
    }

    let reports = analyzer.table_reports().await?;
    sink.write_tables(&reports)?;
    let (create_file, drop_file) = sink.write_index_scripts(&reports)?;

    report::print_recommendations(&reports);
    println!("   💾 Saved: {}", create_file.display());
    println!("   💾 Saved: {}", drop_file.display());
    println!();

    Ok(())
}
