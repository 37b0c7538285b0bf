//! Per-batch report files under `<workspace>/reports/<run-id>/`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs;

use crate::batch::BatchSummary;

pub async fn write_reports(workspace_root: &Path, batch: &BatchSummary) -> Result<PathBuf> {
    let reports_dir = workspace_root.join("reports").join(batch.run_id.to_string());
    fs::create_dir_all(&reports_dir)
        .await
        .with_context(|| format!("creating {}", reports_dir.display()))?;

    let json = serde_json::to_vec_pretty(&serde_json::json!({
        "batch": batch,
        "totals": batch.totals(),
        "failing_providers": batch.failing_providers(),
    }))
    .context("serializing batch summary")?;
    fs::write(reports_dir.join("summary.json"), json)
        .await
        .context("writing summary.json")?;

    fs::write(reports_dir.join("summary.md"), render_markdown(batch))
        .await
        .context("writing summary.md")?;

    Ok(reports_dir)
}

pub fn render_markdown(batch: &BatchSummary) -> String {
    let totals = batch.totals();
    let rows = batch
        .jobs
        .iter()
        .map(|j| {
            format!(
                "| {} | {} | {} | {} | {}/{} | {} | {} | {} | {} |",
                j.provider_key,
                j.granularity,
                j.range,
                j.status.as_str(),
                j.chunks_completed,
                j.chunks_total,
                j.succeeded,
                j.skipped,
                j.failed,
                j.error.as_deref().unwrap_or("").replace('|', "/"),
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "# Revenue Ingestion Run\n\n- Run ID: `{}`\n- Started: {}\n- Finished: {}\n- Jobs: {} ({} completed, {} partial, {} failed)\n- Rows: {} requested, {} saved, {} skipped, {} failed\n\n## Jobs\n| Provider | Granularity | Range | Status | Chunks | Saved | Skipped | Failed | Error |\n|---|---|---|---|---|---|---|---|---|\n{}\n",
        batch.run_id,
        batch.started_at,
        batch.finished_at,
        totals.jobs,
        totals.completed,
        totals.partial,
        totals.failed_jobs,
        totals.requested,
        totals.succeeded,
        totals.skipped,
        totals.failed,
        rows,
    )
}
