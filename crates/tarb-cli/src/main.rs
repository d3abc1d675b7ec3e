use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tarb_core::{Source, SystemClock, TrendRecord};
use tarb_storage::{PgTrendStore, TrendStore};
use tarb_sync::{maybe_build_scheduler, RunOutcome, SyncConfig, TrendPipeline};
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_SOURCE_LIMIT: usize = 20;

#[derive(Debug, Parser)]
#[command(name = "tarb")]
#[command(about = "Trend Arbitrage: surface rising topics across Reddit, Hacker News, GitHub and feeds")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one fetch, score and cluster pass.
    Sync,
    /// Run a pass now, then on the configured cron schedule until Ctrl-C.
    Watch,
    /// Apply database migrations (requires DATABASE_URL).
    Migrate,
    /// Print the highest rising trends.
    Top {
        #[arg(long)]
        source: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
        /// Sync before listing; needed when running without DATABASE_URL.
        #[arg(long)]
        refresh: bool,
    },
    /// Print record counts per source and the current top trend.
    Stats {
        #[arg(long)]
        refresh: bool,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

fn print_outcome(outcome: &RunOutcome) {
    match outcome {
        RunOutcome::Completed(summary) => {
            println!(
                "sync complete: run_id={} processed={} duplicates={} persist_failures={} clusters={}",
                summary.run_id,
                summary.processed,
                summary.duplicate_candidates,
                summary.persist_failures,
                summary.clusters
            );
            for (source, errors) in &summary.per_source_errors {
                println!("  {source}: {} errors", errors.len());
            }
            if let Some(dir) = &summary.reports_dir {
                println!("  reports: {dir}");
            }
        }
        RunOutcome::AlreadyRunning => println!("sync already in progress"),
    }
}

fn print_trend(rank: usize, trend: &TrendRecord) {
    println!(
        "{rank:>3}. [{:>6.2}] {:<10} {} ({})",
        trend.rising_score,
        trend.source.as_str(),
        trend.title,
        trend.cluster.as_deref().unwrap_or("-")
    );
    println!("       {}", trend.url);
}

async fn pipeline_for(config: &SyncConfig, refresh: bool) -> Result<TrendPipeline> {
    let pipeline = TrendPipeline::from_config(config).await?;
    if refresh {
        print_outcome(&pipeline.run_once().await?);
    } else if config.database_url.is_none() {
        info!("no DATABASE_URL and no --refresh; the in-memory store starts empty");
    }
    Ok(pipeline)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let outcome = tarb_sync::run_sync_once(&config).await?;
            print_outcome(&outcome);
        }
        Commands::Watch => {
            let config = SyncConfig {
                scheduler_enabled: true,
                ..config
            };
            let pipeline = Arc::new(TrendPipeline::from_config(&config).await?);
            print_outcome(&pipeline.run_once().await?);

            let Some(mut sched) = maybe_build_scheduler(pipeline, &config).await? else {
                return Ok(());
            };
            sched.start().await.context("starting scheduler")?;
            info!(cron = %config.sync_cron, "watching for trends; Ctrl-C to stop");
            tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
            sched.shutdown().await.context("stopping scheduler")?;
        }
        Commands::Migrate => {
            let Some(url) = &config.database_url else {
                bail!("DATABASE_URL is required for migrate");
            };
            let store = PgTrendStore::connect(url, Arc::new(SystemClock))
                .await
                .context("connecting to trend store")?;
            store.migrate().await?;
            println!("migrations applied");
        }
        Commands::Top {
            source,
            limit,
            refresh,
        } => {
            let pipeline = pipeline_for(&config, refresh).await?;
            let trends = match source.as_deref().map(Source::from) {
                Some(source) => {
                    pipeline
                        .store()
                        .list_top_by_source(&source, limit.unwrap_or(DEFAULT_SOURCE_LIMIT))
                        .await?
                }
                None => {
                    pipeline
                        .store()
                        .list_top_by_score(limit.unwrap_or(config.top_limit))
                        .await?
                }
            };
            for (i, trend) in trends.iter().enumerate() {
                print_trend(i + 1, trend);
            }
        }
        Commands::Stats { refresh } => {
            let pipeline = pipeline_for(&config, refresh).await?;
            let stats = pipeline.store().stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }

    Ok(())
}
