use std::sync::Arc;

use anyhow::{Context, Result};
use aspi_core::Granularity;
use aspi_storage::PgStore;
use aspi_sync::{BatchOptions, JobRequest, ProviderRegistry, SyncConfig, SyncService};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "aspi-cli")]
#[command(about = "Affiliate revenue ingestion command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Ingest one provider/property pair.
    Ingest {
        #[arg(long)]
        provider: String,
        #[arg(long)]
        property: String,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        from: Option<NaiveDate>,
        #[arg(long)]
        to: Option<NaiveDate>,
        #[arg(long, default_value = "daily")]
        granularity: Granularity,
    },
    /// Ingest every active stored credential.
    RunAll {
        #[arg(long)]
        daily: bool,
        #[arg(long)]
        monthly: bool,
        /// Only providers whose key or name contains this text.
        #[arg(long)]
        provider: Option<String>,
        #[arg(long)]
        dry_run: bool,
    },
    /// List registered provider adapters.
    Providers,
    Migrate,
    /// Run the cron scheduler until interrupted.
    Schedule,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let today = Local::now().date_naive();

    match cli.command.unwrap_or(Commands::RunAll {
        daily: false,
        monthly: false,
        provider: None,
        dry_run: false,
    }) {
        Commands::Ingest {
            provider,
            property,
            category,
            from,
            to,
            granularity,
        } => {
            let request = JobRequest {
                provider,
                property,
                category,
                from,
                to,
                granularity,
            };
            let summary = aspi_sync::ingest_from_env(&request).await?;
            println!(
                "ingest {}: job_id={} provider={} range={} chunks={}/{} succeeded={} skipped={} failed={}",
                summary.status.as_str(),
                summary.job_id,
                summary.provider_key,
                summary.range,
                summary.chunks_completed,
                summary.chunks_total,
                summary.succeeded,
                summary.skipped,
                summary.failed
            );
            if let Some(error) = &summary.error {
                eprintln!("error: {error}");
            }
            if let Some(diagnostic) = &summary.diagnostic {
                eprintln!("diagnostic: {diagnostic}");
            }
        }
        Commands::RunAll {
            daily,
            monthly,
            provider,
            dry_run,
        } => {
            let granularities = match (daily, monthly) {
                (true, false) => vec![Granularity::Daily],
                (false, true) => vec![Granularity::Monthly],
                _ => vec![Granularity::Daily, Granularity::Monthly],
            };
            let mut options = BatchOptions::new(granularities, today);
            options.provider_filter = provider;
            options.dry_run = dry_run;

            let summary = aspi_sync::run_all_from_env(&options).await?;
            if summary.dry_run {
                for planned in &summary.planned {
                    println!(
                        "{} / {}: {} {}",
                        planned.provider_name, planned.property_name, planned.job.granularity, planned.job.range
                    );
                }
                println!("dry run: {} jobs planned", summary.planned.len());
            } else {
                let totals = summary.totals();
                println!(
                    "run-all complete: run_id={} jobs={} completed={} partial={} failed_jobs={} succeeded={} skipped={} failed={}",
                    summary.run_id,
                    totals.jobs,
                    totals.completed,
                    totals.partial,
                    totals.failed_jobs,
                    totals.succeeded,
                    totals.skipped,
                    totals.failed
                );
            }
        }
        Commands::Providers => {
            let config = SyncConfig::from_env();
            let registry = ProviderRegistry::load(&config.workspace_root).await?;
            for descriptor in registry.descriptors() {
                let reports: Vec<String> = descriptor
                    .reports
                    .iter()
                    .map(|r| format!("{}:{:?}", r.granularity, r.kind))
                    .collect();
                println!(
                    "{:<12} {:<24} {}",
                    descriptor.key,
                    descriptor.display_name,
                    reports.join(",")
                );
            }
        }
        Commands::Migrate => {
            let config = SyncConfig::from_env();
            let store = PgStore::connect(&config.database_url, 1)
                .await
                .context("connecting to postgres")?;
            store.migrate().await.context("running migrations")?;
            println!("migrations applied");
        }
        Commands::Schedule => {
            let service = Arc::new(SyncService::connect(SyncConfig::from_env()).await?);
            let Some(mut scheduler) = service.maybe_build_scheduler().await? else {
                eprintln!("scheduler disabled; set ASPI_SCHEDULER_ENABLED=true");
                return Ok(());
            };
            scheduler.start().await.context("starting scheduler")?;
            info!(
                daily = %service.config().daily_cron,
                monthly = %service.config().monthly_cron,
                "scheduler running"
            );
            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            scheduler.shutdown().await.context("stopping scheduler")?;
        }
    }

    Ok(())
}
