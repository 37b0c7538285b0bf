//! Slack-compatible webhook posting of batch results.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use tracing::{info, warn};

use crate::batch::BatchSummary;

#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("building webhook client")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub async fn send(&self, text: &str) -> Result<()> {
        self.client
            .post(&self.url)
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await
            .context("posting webhook")?
            .error_for_status()
            .context("webhook rejected the message")?;
        Ok(())
    }

    /// Posts the batch summary. Failures are logged, never returned.
    pub async fn notify(&self, batch: &BatchSummary) {
        match self.send(&render_text(batch)).await {
            Ok(()) => info!(run_id = %batch.run_id, "batch notification sent"),
            Err(err) => {
                let reason = format!("{err:#}");
                warn!(run_id = %batch.run_id, error = %reason, "batch notification failed");
            }
        }
    }
}

pub fn render_text(batch: &BatchSummary) -> String {
    let totals = batch.totals();
    let mut text = format!(
        "Revenue ingestion {}: {} jobs ({} completed, {} partial, {} failed). Rows: {} saved, {} skipped, {} failed.",
        batch.run_id,
        totals.jobs,
        totals.completed,
        totals.partial,
        totals.failed_jobs,
        totals.succeeded,
        totals.skipped,
        totals.failed,
    );
    let failing = batch.failing_providers();
    if !failing.is_empty() {
        text.push_str(&format!("\nNeeds attention: {}", failing.join(", ")));
        for job in batch.jobs.iter().filter(|j| j.error.is_some()) {
            if let Some(error) = &job.error {
                text.push_str(&format!("\n- {} {}: {error}", job.provider_key, job.granularity));
            }
        }
    }
    text
}
