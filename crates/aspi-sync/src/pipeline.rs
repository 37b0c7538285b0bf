//! Runs one ingestion job: chunk, log in, and for each chunk set the period,
//! then normalize and upsert every report page as it is read, folding the
//! outcome into a [`JobSummary`].

use std::sync::Arc;
use std::time::Duration;

use aspi_adapters::{
    BrowserDriver, ContextProfile, DiagnosticsSink, ProviderAdapter, SessionController, SessionError,
};
use aspi_core::{
    chunk, normalize_record, DateContext, DateRange, Granularity, IngestionJob, JobStatus, JobSummary,
    PeriodChunk, PersistedRow, RawRecord,
};
use aspi_storage::{BackoffPolicy, CredentialStore, RevenueStore};
use chrono::{Datelike, NaiveDate, Utc};
use tracing::{debug, error, info, info_span, warn, Instrument};

pub struct IngestionPipeline {
    driver: Arc<dyn BrowserDriver>,
    store: Arc<dyn RevenueStore>,
    credentials: Arc<dyn CredentialStore>,
    diagnostics: Option<Arc<dyn DiagnosticsSink>>,
    profile: ContextProfile,
    backoff: BackoffPolicy,
    cooldown: Duration,
}

impl IngestionPipeline {
    pub fn new(
        driver: Arc<dyn BrowserDriver>,
        store: Arc<dyn RevenueStore>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            driver,
            store,
            credentials,
            diagnostics: None,
            profile: ContextProfile::default(),
            backoff: BackoffPolicy::default(),
            cooldown: Duration::from_secs(5),
        }
    }

    pub fn with_profile(mut self, profile: ContextProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Pause between consecutive chunks of one job.
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_diagnostics(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.diagnostics = Some(sink);
        self
    }

    /// Runs `job` to completion. Row and chunk problems are counted in the
    /// summary; a fatal session error ends the job with `Partial` or `Failed`.
    pub async fn run_job(&self, adapter: Arc<dyn ProviderAdapter>, job: &IngestionJob) -> JobSummary {
        let span = info_span!(
            "ingest_job",
            job_id = %job.job_id,
            provider = %job.provider_key,
            granularity = %job.granularity,
        );
        self.run_job_inner(adapter, job).instrument(span).await
    }

    async fn run_job_inner(&self, adapter: Arc<dyn ProviderAdapter>, job: &IngestionJob) -> JobSummary {
        let mut summary = JobSummary::started(job, Utc::now());
        info!(range = %job.range, "job started");

        let credential = match self.credentials.credential(job.provider_id, job.property_id).await {
            Ok(Some(credential)) => credential,
            Ok(None) => return finish_failed(summary, "no credential stored for provider and property".to_string()),
            Err(err) => return finish_failed(summary, format!("credential lookup failed: {err}")),
        };

        let kind = adapter.report_kind();
        if adapter.route(kind, job.granularity).is_none() {
            let reason = SessionError::Unsupported(format!(
                "{} has no {} report",
                adapter.display_name(),
                job.granularity
            ));
            return finish_failed(summary, reason.to_string());
        }
        let chunks: Vec<PeriodChunk> = if adapter.supports_period(kind, job.granularity) {
            chunk(job.range, adapter.max_lookback(kind, job.granularity)).collect()
        } else {
            debug!("report shows a fixed window; rows are filtered to the job range");
            vec![PeriodChunk {
                start: job.range.start,
                end: job.range.end,
            }]
        };
        summary.chunks_total = chunks.len();

        let mut session = SessionController::new(
            Arc::clone(&adapter),
            Arc::clone(&self.driver),
            &self.profile,
            self.backoff,
            job.job_id,
        );
        if let Some(sink) = &self.diagnostics {
            session = session.with_diagnostics(Arc::clone(sink));
        }

        let outcome = self.drive(&mut session, job, credential, &chunks, &mut summary).await;
        session.teardown().await;

        if let Err(err) = outcome {
            summary.status = if summary.chunks_completed > 0 || summary.succeeded > 0 {
                JobStatus::Partial
            } else {
                JobStatus::Failed
            };
            summary.error = Some(err.to_string());
            summary.diagnostic = session.diagnostic().map(str::to_string);
            error!(
                status = summary.status.as_str(),
                chunks_completed = summary.chunks_completed,
                chunks_total = summary.chunks_total,
                error = %err,
                "job aborted"
            );
        }
        summary.finished_at = Utc::now();
        info!(
            status = summary.status.as_str(),
            requested = summary.requested,
            succeeded = summary.succeeded,
            skipped = summary.skipped,
            failed = summary.failed,
            zero_row_chunks = summary.zero_row_chunks,
            "job finished"
        );
        summary
    }

    async fn drive(
        &self,
        session: &mut SessionController,
        job: &IngestionJob,
        credential: aspi_core::Credential,
        chunks: &[PeriodChunk],
        summary: &mut JobSummary,
    ) -> Result<(), SessionError> {
        session.initialize().await?;
        session.login(credential).await?;
        let kind = session.adapter().report_kind();
        session.navigate_to_report(kind, job.granularity).await?;

        for (index, period) in chunks.iter().enumerate() {
            if index > 0 && !self.cooldown.is_zero() {
                tokio::time::sleep(self.cooldown).await;
            }
            let applied = session.set_period(*period).await?;
            let mut rows = 0;
            let mut cursor = session.extract()?;
            while let Some(batch) = cursor.next_batch().await? {
                rows += batch.len();
                self.persist_page(job, period.range(), &batch, summary).await;
            }
            debug!(chunk = %period, applied, pages = cursor.pages_read(), rows, "chunk extracted");
            drop(cursor);
            if rows == 0 {
                summary.zero_row_chunks += 1;
                info!(chunk = %period, "no revenue table for chunk");
            }
            summary.chunks_completed += 1;
        }
        Ok(())
    }

    async fn persist_page(
        &self,
        job: &IngestionJob,
        window: DateRange,
        records: &[RawRecord],
        summary: &mut JobSummary,
    ) {
        let ctx = DateContext::for_window(job.granularity, window);
        for raw in records {
            summary.requested += 1;
            let record = match normalize_record(raw, &ctx) {
                Ok(record) => record,
                Err(err) => {
                    summary.skipped += 1;
                    warn!(date = %raw.date_text, amount = %raw.amount_text, error = %err, "skipping row");
                    continue;
                }
            };
            if !in_window(record.date, window, job.granularity) {
                summary.skipped += 1;
                debug!(date = %record.iso_date(), window = %window, "row outside requested period");
                continue;
            }
            match self.store.upsert(&PersistedRow::for_job(job, &record)).await {
                Ok(()) => summary.succeeded += 1,
                Err(err) => {
                    summary.failed += 1;
                    warn!(date = %record.iso_date(), error = %err, "upsert failed");
                }
            }
        }
    }
}

/// Monthly rows carry the month's last day, so they match by calendar month.
fn in_window(date: NaiveDate, window: DateRange, granularity: Granularity) -> bool {
    match granularity {
        Granularity::Daily => window.contains(date),
        Granularity::Monthly => {
            let month = (date.year(), date.month());
            (window.start.year(), window.start.month()) <= month && month <= (window.end.year(), window.end.month())
        }
    }
}

fn finish_failed(mut summary: JobSummary, reason: String) -> JobSummary {
    error!(error = %reason, "job could not start");
    summary.status = JobStatus::Failed;
    summary.error = Some(reason);
    summary.finished_at = Utc::now();
    summary
}
