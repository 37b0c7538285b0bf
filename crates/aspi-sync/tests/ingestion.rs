use std::sync::Arc;
use std::time::Duration;

use aspi_adapters::testing::{fixture_descriptor, ScriptedDriver};
use aspi_adapters::{DriverError, LoginOutcome, ProviderAdapter, ProviderDescriptor, TableSnapshot};
use aspi_core::{Credential, DateRange, Granularity, IngestionJob, JobStatus, RowKey};
use aspi_storage::{ArtifactStore, BackoffPolicy, Directory, MemoryStore};
use aspi_sync::{
    BatchOptions, BatchRunner, IngestionPipeline, JobRequest, ProviderRegistry, SyncConfig, SyncService,
    AFFILIATE_CATEGORY,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use tempfile::tempdir;
use uuid::Uuid;

fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn filter_widget() -> TableSnapshot {
    TableSnapshot::new(
        &[],
        &[
            &["期間", "2025/10/01 〜 2025/10/31"],
            &["デバイス", "すべて"],
        ],
    )
}

fn five_day_table() -> TableSnapshot {
    TableSnapshot::new(
        &["日付", "成果報酬額"],
        &[
            &["2025/10/01", "¥1,200"],
            &["2025/10/02", "¥0"],
            &["2025/10/03", "¥3,400"],
            &["2025/10/04", "¥560"],
            &["2025/10/05", "¥7,800"],
        ],
    )
}

struct Seeded {
    store: Arc<MemoryStore>,
    provider_id: Uuid,
    property_id: Uuid,
    category_id: Uuid,
}

impl Seeded {
    async fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let provider = store.add_provider("fixture", "Fixture Portal").await;
        let property = store.add_property("example-media").await;
        let category = store.add_category(property.id, AFFILIATE_CATEGORY).await;
        store
            .add_credential(provider.id, property.id, Credential::new("publisher", "secret"))
            .await;
        Self {
            store,
            provider_id: provider.id,
            property_id: property.id,
            category_id: category.id,
        }
    }

    fn job(&self, start: NaiveDate, end: NaiveDate, granularity: Granularity) -> IngestionJob {
        IngestionJob::new(
            self.provider_id,
            "fixture",
            self.property_id,
            self.category_id,
            DateRange::new(start, end).unwrap(),
            granularity,
        )
    }

    fn key(&self, date: NaiveDate) -> RowKey {
        RowKey {
            date,
            property_id: self.property_id,
            account_category_id: self.category_id,
            provider_id: self.provider_id,
        }
    }

    fn pipeline(&self, driver: &ScriptedDriver) -> IngestionPipeline {
        IngestionPipeline::new(Arc::new(driver.clone()), self.store.clone(), self.store.clone())
            .with_backoff(BackoffPolicy::immediate(5))
            .with_cooldown(Duration::ZERO)
    }
}

fn fixture() -> Arc<dyn ProviderAdapter> {
    aspi_adapters::testing::fixture_adapter()
}

#[tokio::test]
async fn congestion_three_times_then_success_completes_without_failures() {
    let seeded = Seeded::new().await;
    let driver = ScriptedDriver::new()
        .with_login_outcomes([LoginOutcome::Congested; 3])
        .with_pages(vec![vec![filter_widget(), five_day_table()]]);
    let job = seeded.job(ymd(2025, 10, 1), ymd(2025, 10, 5), Granularity::Daily);

    let summary = seeded.pipeline(&driver).run_job(fixture(), &job).await;

    assert_eq!(summary.status, JobStatus::Completed, "{:?}", summary.error);
    assert_eq!(driver.login_submits(), 4);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.requested, 5);
    assert_eq!(summary.succeeded, 5);
    assert_eq!(summary.skipped, 0);
    assert_eq!(seeded.store.rows(Granularity::Daily).await.len(), 5);
    assert_eq!(
        seeded.store.amount(Granularity::Daily, &seeded.key(ymd(2025, 10, 3))).await,
        Some(Decimal::from(3400))
    );
    assert!(driver.closed());
}

#[tokio::test]
async fn total_rows_are_not_counted() {
    let seeded = Seeded::new().await;
    let table = TableSnapshot::new(
        &["日付", "成果報酬額"],
        &[
            &["2025/10/01", "¥100"],
            &["2025/10/02", "¥200"],
            &["合計", "¥1,000"],
            &["2025/10/03", "¥300"],
            &["2025/10/04", "¥400"],
        ],
    );
    let driver = ScriptedDriver::new().with_pages(vec![vec![table]]);
    let job = seeded.job(ymd(2025, 10, 1), ymd(2025, 10, 31), Granularity::Daily);

    let summary = seeded.pipeline(&driver).run_job(fixture(), &job).await;

    assert_eq!(summary.succeeded, 4);
    assert_eq!(summary.requested, 4);
    let total: Decimal = seeded
        .store
        .rows(Granularity::Daily)
        .await
        .into_iter()
        .map(|(_, amount)| amount)
        .sum();
    assert_eq!(total, Decimal::from(1000));
}

#[tokio::test]
async fn long_ranges_are_walked_chunk_by_chunk() {
    let seeded = Seeded::new().await;
    let driver = ScriptedDriver::new()
        .with_period_pages(
            "2025/01/01",
            vec![vec![TableSnapshot::new(&["日付", "報酬"], &[&["2025/01/15", "¥1,000"]])]],
        )
        .with_period_pages(
            "2025/02/01",
            vec![vec![TableSnapshot::new(
                &["日付", "報酬"],
                &[&["2025/01/31", "¥9,999"], &["2025/02/14", "¥2,000"]],
            )]],
        )
        .with_period_pages(
            "2025/03/04",
            vec![vec![TableSnapshot::new(&["日付", "報酬"], &[&["2025/03/10", "¥3,000"]])]],
        );
    let job = seeded.job(ymd(2025, 1, 1), ymd(2025, 3, 15), Granularity::Daily);

    let summary = seeded.pipeline(&driver).run_job(fixture(), &job).await;

    assert_eq!(summary.status, JobStatus::Completed);
    assert_eq!(summary.chunks_total, 3);
    assert_eq!(summary.chunks_completed, 3);
    assert_eq!(summary.succeeded, 3);
    // the January row repeated on the February view is outside that chunk
    assert_eq!(summary.skipped, 1);
    assert_eq!(
        seeded.store.amount(Granularity::Daily, &seeded.key(ymd(2025, 1, 31))).await,
        None
    );

    let log = driver.log();
    assert!(log.contains(&"fill css=#from=2025/02/01".to_string()));
    assert!(log.contains(&"fill css=#to=2025/03/03".to_string()));
    assert!(log.contains(&"fill css=#from=2025/03/04".to_string()));
    assert_eq!(driver.login_submits(), 1);
}

#[tokio::test]
async fn empty_chunks_are_counted_not_failed() {
    let seeded = Seeded::new().await;
    let driver = ScriptedDriver::new().with_pages(vec![vec![filter_widget()]]);
    let job = seeded.job(ymd(2025, 10, 1), ymd(2025, 10, 5), Granularity::Daily);

    let summary = seeded.pipeline(&driver).run_job(fixture(), &job).await;

    assert_eq!(summary.status, JobStatus::Completed);
    assert_eq!(summary.zero_row_chunks, 1);
    assert_eq!(summary.requested, 0);
}

#[tokio::test]
async fn unparseable_and_negative_rows_are_skipped() {
    let seeded = Seeded::new().await;
    let table = TableSnapshot::new(
        &["日付", "成果報酬額"],
        &[
            &["2025/10/01", "¥1,000"],
            &["2025/10/32", "¥500"],
            &["2025/10/03", "▲500"],
        ],
    );
    let driver = ScriptedDriver::new().with_pages(vec![vec![table]]);
    let job = seeded.job(ymd(2025, 10, 1), ymd(2025, 10, 31), Granularity::Daily);

    let summary = seeded.pipeline(&driver).run_job(fixture(), &job).await;

    assert_eq!(summary.status, JobStatus::Completed);
    assert_eq!(summary.requested, 3);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.skipped, 2);
    assert_eq!(summary.failed, 0);
}

#[tokio::test]
async fn rejected_upserts_are_counted_and_do_not_block_later_rows() {
    let seeded = Seeded::new().await;
    seeded.store.reject_date(ymd(2025, 10, 2)).await;
    let driver = ScriptedDriver::new().with_pages(vec![vec![five_day_table()]]);
    let job = seeded.job(ymd(2025, 10, 1), ymd(2025, 10, 5), Granularity::Daily);

    let summary = seeded.pipeline(&driver).run_job(fixture(), &job).await;

    assert_eq!(summary.status, JobStatus::Completed);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.succeeded, 4);
}

#[tokio::test]
async fn fatal_failure_mid_job_keeps_earlier_chunks() {
    let seeded = Seeded::new().await;
    let artifacts = tempdir().unwrap();
    let driver = ScriptedDriver::new()
        .with_period_pages(
            "2025/01/01",
            vec![vec![TableSnapshot::new(&["日付", "報酬"], &[&["2025/01/15", "¥1,000"]])]],
        )
        .fail_tables_at(1, DriverError::Unsupported("canvas-rendered report".to_string()), false);
    let job = seeded.job(ymd(2025, 1, 1), ymd(2025, 3, 15), Granularity::Daily);

    let summary = seeded
        .pipeline(&driver)
        .with_diagnostics(Arc::new(ArtifactStore::new(artifacts.path())))
        .run_job(fixture(), &job)
        .await;

    assert_eq!(summary.status, JobStatus::Partial);
    assert_eq!(summary.chunks_total, 3);
    assert_eq!(summary.chunks_completed, 1);
    assert_eq!(summary.succeeded, 1);
    assert!(summary.error.as_deref().unwrap().contains("canvas-rendered report"));
    let diagnostic = summary.diagnostic.expect("diagnostic reference");
    assert!(std::path::Path::new(&diagnostic).exists());
    assert_eq!(
        seeded.store.amount(Granularity::Daily, &seeded.key(ymd(2025, 1, 15))).await,
        Some(Decimal::from(1000))
    );
    assert!(driver.closed());
}

#[tokio::test]
async fn pages_read_before_a_failure_are_kept() {
    let seeded = Seeded::new().await;
    let driver = ScriptedDriver::new()
        .with_pages(vec![
            vec![TableSnapshot::new(
                &["日付", "報酬"],
                &[&["2025/10/01", "¥1,000"], &["2025/10/02", "¥2,000"]],
            )],
            vec![TableSnapshot::new(
                &["日付", "報酬"],
                &[&["2025/10/03", "¥3,000"], &["2025/10/04", "¥4,000"]],
            )],
        ])
        .fail_tables_at(1, DriverError::Unsupported("page 2 rendered as image".to_string()), false);
    let job = seeded.job(ymd(2025, 10, 1), ymd(2025, 10, 5), Granularity::Daily);

    let summary = seeded.pipeline(&driver).run_job(fixture(), &job).await;

    assert_eq!(summary.status, JobStatus::Partial);
    assert_eq!(summary.chunks_completed, 0);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(
        seeded.store.amount(Granularity::Daily, &seeded.key(ymd(2025, 10, 2))).await,
        Some(Decimal::from(2000))
    );
    assert_eq!(seeded.store.amount(Granularity::Daily, &seeded.key(ymd(2025, 10, 3))).await, None);
}

#[tokio::test]
async fn invalid_credentials_fail_without_retry() {
    let seeded = Seeded::new().await;
    let driver = ScriptedDriver::new().with_login_outcomes([LoginOutcome::InvalidCredentials]);
    let job = seeded.job(ymd(2025, 10, 1), ymd(2025, 10, 5), Granularity::Daily);

    let summary = seeded.pipeline(&driver).run_job(fixture(), &job).await;

    assert_eq!(summary.status, JobStatus::Failed);
    assert_eq!(driver.login_submits(), 1);
    assert_eq!(summary.chunks_completed, 0);
    assert!(summary.error.is_some());
}

#[tokio::test]
async fn missing_credential_fails_before_launch() {
    let seeded = Seeded::new().await;
    let driver = ScriptedDriver::new();
    let mut job = seeded.job(ymd(2025, 10, 1), ymd(2025, 10, 5), Granularity::Daily);
    job.property_id = Uuid::new_v4();

    let summary = seeded.pipeline(&driver).run_job(fixture(), &job).await;

    assert_eq!(summary.status, JobStatus::Failed);
    assert!(summary.error.as_deref().unwrap().contains("no credential"));
    assert_eq!(driver.launches(), 0);
}

#[tokio::test]
async fn fixed_window_monthly_report_is_filtered_to_the_job_range() {
    let seeded = Seeded::new().await;
    let table = TableSnapshot::new(
        &["年月", "確定報酬"],
        &[
            &["2025年1月", "¥1,000"],
            &["2025年2月", "¥2,000"],
            &["2025年3月", "¥3,000"],
        ],
    );
    let driver = ScriptedDriver::new().with_pages(vec![vec![table]]);
    let job = seeded.job(ymd(2025, 2, 1), ymd(2025, 3, 31), Granularity::Monthly);

    let summary = seeded.pipeline(&driver).run_job(fixture(), &job).await;

    assert_eq!(summary.status, JobStatus::Completed);
    assert_eq!(summary.chunks_total, 1);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.skipped, 1);
    let dates: Vec<_> = seeded
        .store
        .rows(Granularity::Monthly)
        .await
        .into_iter()
        .map(|(key, _)| key.date)
        .collect();
    assert_eq!(dates, vec![ymd(2025, 2, 28), ymd(2025, 3, 31)]);
    assert!(!driver.log().iter().any(|line| line.starts_with("fill css=#from")));
}

fn second_portal() -> ProviderDescriptor {
    ProviderDescriptor {
        key: "fixture2".to_string(),
        display_name: "Second Portal".to_string(),
        name_patterns: Vec::new(),
        ..fixture_descriptor()
    }
}

#[tokio::test]
async fn batch_runs_active_credentials_and_records_status() {
    let seeded = Seeded::new().await;
    let store = seeded.store.clone();
    let second = store.add_provider("fixture2", "Second Portal").await;
    store
        .add_credential(second.id, seeded.property_id, Credential::new("p2", "s2"))
        .await;
    let dormant = store.add_provider("afb", "afb").await;
    store.set_provider_active(dormant.id, false).await;
    store
        .add_credential(dormant.id, seeded.property_id, Credential::new("p3", "s3"))
        .await;

    let driver = ScriptedDriver::new().with_pages(vec![vec![five_day_table()]]);
    let registry = ProviderRegistry::with_descriptors([fixture_descriptor(), second_portal()]).unwrap();
    let runner = BatchRunner::new(
        Arc::new(seeded.pipeline(&driver)),
        store.clone() as Arc<dyn Directory>,
        Arc::new(registry),
        1,
    );

    let mut options = BatchOptions::new(vec![Granularity::Daily], ymd(2025, 10, 5));
    options.dry_run = true;
    let planned = runner.run(&options).await.unwrap();
    assert_eq!(planned.planned.len(), 2);
    assert!(planned.jobs.is_empty());
    assert_eq!(driver.launches(), 0);

    options.provider_filter = Some("SECOND".to_string());
    let filtered = runner.plan(&options).await.unwrap();
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].job.provider_key, "fixture2");
    assert_eq!(filtered[0].job.range, DateRange::new(ymd(2025, 10, 1), ymd(2025, 10, 5)).unwrap());

    options.provider_filter = None;
    options.dry_run = false;
    let batch = runner.run(&options).await.unwrap();
    assert_eq!(batch.jobs.len(), 2);
    assert_eq!(batch.totals().succeeded, 10);
    assert!(batch.failing_providers().is_empty());
    assert_eq!(store.rows(Granularity::Daily).await.len(), 10);

    let status = store.run_status(seeded.provider_id).await.unwrap();
    assert_eq!(status.status, JobStatus::Completed);
    assert!(store.run_status(second.id).await.is_some());
    assert!(store.run_status(dormant.id).await.is_none());
}

#[tokio::test]
async fn service_ingests_by_name_and_writes_batch_reports() {
    let seeded = Seeded::new().await;
    let workspace = tempdir().unwrap();
    let root = workspace.path().display().to_string();
    let config = SyncConfig::from_lookup(|key| match key {
        "ASPI_WORKSPACE_ROOT" => Some(root.clone()),
        "ARTIFACTS_DIR" => Some(format!("{root}/artifacts")),
        "ASPI_COOLDOWN_SECS" | "ASPI_RETRY_BASE_SECS" | "ASPI_RETRY_STEP_SECS" => Some("0".to_string()),
        _ => None,
    });
    let driver = ScriptedDriver::new().with_pages(vec![vec![five_day_table()]]);
    let registry = ProviderRegistry::with_descriptors([fixture_descriptor()]).unwrap();
    let service = SyncService::new(
        config,
        registry,
        Arc::new(driver.clone()),
        seeded.store.clone(),
        seeded.store.clone(),
        seeded.store.clone(),
    )
    .unwrap();

    let request = JobRequest {
        provider: "Fixture Portal".to_string(),
        property: "example-media".to_string(),
        category: None,
        from: Some(ymd(2025, 10, 1)),
        to: Some(ymd(2025, 10, 5)),
        granularity: Granularity::Daily,
    };
    let summary = service.ingest(&request, ymd(2025, 10, 5)).await.unwrap();
    assert_eq!(summary.succeeded, 5);
    assert_eq!(
        seeded.store.run_status(seeded.provider_id).await.map(|s| s.status),
        Some(JobStatus::Completed)
    );

    let batch = service
        .run_all(&BatchOptions::new(vec![Granularity::Daily], ymd(2025, 10, 5)))
        .await
        .unwrap();
    let reports = workspace.path().join("reports").join(batch.run_id.to_string());
    assert!(reports.join("summary.json").exists());
    assert!(reports.join("summary.md").exists());
}
