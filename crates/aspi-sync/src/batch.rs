//! `run-all`: every active credential, daily and/or monthly, a few jobs at a time.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use aspi_core::{Granularity, IngestionJob, JobStatus, JobSummary};
use aspi_storage::{Directory, RunStatus};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::jobs::{default_range, PlannedJob, AFFILIATE_CATEGORY};
use crate::pipeline::IngestionPipeline;
use crate::registry::ProviderRegistry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOptions {
    pub granularities: Vec<Granularity>,
    /// Case-insensitive substring of the provider key or name.
    pub provider_filter: Option<String>,
    pub dry_run: bool,
    pub today: NaiveDate,
}

impl BatchOptions {
    pub fn new(granularities: Vec<Granularity>, today: NaiveDate) -> Self {
        Self {
            granularities,
            provider_filter: None,
            dry_run: false,
            today,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchTotals {
    pub jobs: usize,
    pub completed: usize,
    pub partial: usize,
    pub failed_jobs: usize,
    pub requested: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    pub planned: Vec<PlannedJob>,
    pub jobs: Vec<JobSummary>,
}

impl BatchSummary {
    pub fn totals(&self) -> BatchTotals {
        let mut totals = BatchTotals {
            jobs: self.jobs.len(),
            ..BatchTotals::default()
        };
        for job in &self.jobs {
            match job.status {
                JobStatus::Completed => totals.completed += 1,
                JobStatus::Partial => totals.partial += 1,
                JobStatus::Failed => totals.failed_jobs += 1,
            }
            totals.requested += job.requested;
            totals.succeeded += job.succeeded;
            totals.skipped += job.skipped;
            totals.failed += job.failed;
        }
        totals
    }

    /// Provider keys with at least one job that did not complete.
    pub fn failing_providers(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .jobs
            .iter()
            .filter(|j| j.status != JobStatus::Completed)
            .map(|j| j.provider_key.clone())
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }
}

/// Worst status across a provider's jobs, with their errors as run notes.
pub fn provider_run_status(at: DateTime<Utc>, jobs: &[&JobSummary]) -> RunStatus {
    let status = if jobs.iter().all(|j| j.status == JobStatus::Completed) {
        JobStatus::Completed
    } else if jobs.iter().all(|j| j.status == JobStatus::Failed) {
        JobStatus::Failed
    } else {
        JobStatus::Partial
    };
    let notes: Vec<String> = jobs
        .iter()
        .filter_map(|j| j.error.as_ref().map(|e| format!("{}: {e}", j.granularity)))
        .collect();
    let notes = (!notes.is_empty()).then(|| notes.join("; "));
    RunStatus::new(at, status, notes.as_deref())
}

/// Best-effort update of each provider's last-run columns.
pub async fn record_run_statuses(directory: &dyn Directory, results: &[(Uuid, JobSummary)]) {
    let mut by_provider: BTreeMap<Uuid, Vec<&JobSummary>> = BTreeMap::new();
    for (provider_id, summary) in results {
        by_provider.entry(*provider_id).or_default().push(summary);
    }
    let now = Utc::now();
    for (provider_id, jobs) in by_provider {
        let status = provider_run_status(now, &jobs);
        if let Err(err) = directory.record_run_status(provider_id, &status).await {
            warn!(%provider_id, error = %err, "recording provider run status failed");
        }
    }
}

pub struct BatchRunner {
    pipeline: Arc<IngestionPipeline>,
    directory: Arc<dyn Directory>,
    registry: Arc<ProviderRegistry>,
    max_concurrent: usize,
}

impl BatchRunner {
    pub fn new(
        pipeline: Arc<IngestionPipeline>,
        directory: Arc<dyn Directory>,
        registry: Arc<ProviderRegistry>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            pipeline,
            directory,
            registry,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Jobs for every stored credential whose provider is active and has an adapter.
    pub async fn plan(&self, options: &BatchOptions) -> Result<Vec<PlannedJob>> {
        let bindings = self
            .directory
            .credential_bindings()
            .await
            .context("listing stored credentials")?;
        let filter = options.provider_filter.as_deref().map(str::to_lowercase);

        let mut planned = Vec::new();
        for binding in bindings {
            if !binding.provider_active {
                continue;
            }
            if let Some(filter) = &filter {
                let hit = binding.provider_key.to_lowercase().contains(filter.as_str())
                    || binding.provider_name.to_lowercase().contains(filter.as_str());
                if !hit {
                    continue;
                }
            }
            let Some(adapter) = self.registry.get(&binding.provider_key) else {
                warn!(provider = %binding.provider_key, "no adapter registered; skipping");
                continue;
            };
            let category = self
                .directory
                .account_category(binding.property_id, AFFILIATE_CATEGORY)
                .await
                .with_context(|| format!("looking up account category for {}", binding.property_name))?;
            let Some(category) = category else {
                warn!(property = %binding.property_name, category = AFFILIATE_CATEGORY, "account category missing; skipping");
                continue;
            };
            for &granularity in &options.granularities {
                if !adapter.supports_granularity(granularity) {
                    continue;
                }
                planned.push(PlannedJob {
                    job: IngestionJob::new(
                        binding.provider_id,
                        binding.provider_key.clone(),
                        binding.property_id,
                        category.id,
                        default_range(granularity, options.today),
                        granularity,
                    ),
                    provider_name: binding.provider_name.clone(),
                    property_name: binding.property_name.clone(),
                });
            }
        }
        Ok(planned)
    }

    pub async fn run(&self, options: &BatchOptions) -> Result<BatchSummary> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let planned = self.plan(options).await?;
        info!(%run_id, jobs = planned.len(), dry_run = options.dry_run, "batch planned");

        let mut summary = BatchSummary {
            run_id,
            started_at,
            finished_at: started_at,
            dry_run: options.dry_run,
            planned,
            jobs: Vec::new(),
        };
        if options.dry_run {
            return Ok(summary);
        }

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks = JoinSet::new();
        for (order, planned) in summary.planned.iter().enumerate() {
            let Some(adapter) = self.registry.get(&planned.job.provider_key) else {
                continue;
            };
            let pipeline = Arc::clone(&self.pipeline);
            let semaphore = Arc::clone(&semaphore);
            let job = planned.job.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let summary = pipeline.run_job(adapter, &job).await;
                (order, job.provider_id, summary)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(err) => error!(%run_id, error = %err, "ingestion task panicked"),
            }
        }
        results.sort_by_key(|(order, _, _)| *order);
        let results: Vec<(Uuid, JobSummary)> = results.into_iter().map(|(_, p, s)| (p, s)).collect();
        record_run_statuses(self.directory.as_ref(), &results).await;

        summary.jobs = results.into_iter().map(|(_, s)| s).collect();
        summary.finished_at = Utc::now();
        let totals = summary.totals();
        info!(
            %run_id,
            jobs = totals.jobs,
            completed = totals.completed,
            partial = totals.partial,
            failed_jobs = totals.failed_jobs,
            succeeded = totals.succeeded,
            "batch finished"
        );
        Ok(summary)
    }
}
