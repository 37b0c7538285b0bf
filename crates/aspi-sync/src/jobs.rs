//! Turning operator input (names, dates) into runnable jobs.

use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use aspi_adapters::ProviderAdapter;
use aspi_core::{DateRange, Granularity, IngestionJob};
use aspi_storage::{Directory, ProviderRecord};
use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use crate::registry::ProviderRegistry;

/// Ledger bucket revenue rows are posted under unless the caller names another.
pub const AFFILIATE_CATEGORY: &str = "アフィリエイト収入";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    pub provider: String,
    pub property: String,
    pub category: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub granularity: Granularity,
}

/// A job plus the names it was resolved from, for listings and reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedJob {
    pub job: IngestionJob,
    pub provider_name: String,
    pub property_name: String,
}

/// Daily jobs cover the current month to date; monthly jobs the current year to date.
pub fn default_range(granularity: Granularity, today: NaiveDate) -> DateRange {
    let start = match granularity {
        Granularity::Daily => today.with_day(1),
        Granularity::Monthly => NaiveDate::from_ymd_opt(today.year(), 1, 1),
    }
    .unwrap_or(today);
    DateRange { start, end: today }
}

async fn resolve_provider(
    directory: &dyn Directory,
    registry: &ProviderRegistry,
    name: &str,
) -> Result<ProviderRecord> {
    if let Some(record) = directory
        .provider_by_name(name)
        .await
        .with_context(|| format!("looking up provider {name:?}"))?
    {
        return Ok(record);
    }
    let adapter = registry
        .resolve(name)
        .ok_or_else(|| anyhow!("unknown provider {name:?}"))?;
    directory
        .providers()
        .await
        .context("listing providers")?
        .into_iter()
        .find(|p| p.key == adapter.key())
        .ok_or_else(|| anyhow!("provider {:?} is not registered in the database", adapter.key()))
}

/// Resolves provider, property and account category names to ids and picks the adapter.
pub async fn resolve_job(
    directory: &dyn Directory,
    registry: &ProviderRegistry,
    request: &JobRequest,
    today: NaiveDate,
) -> Result<(PlannedJob, Arc<dyn ProviderAdapter>)> {
    let provider = resolve_provider(directory, registry, &request.provider).await?;
    let adapter = registry
        .get(&provider.key)
        .ok_or_else(|| anyhow!("no adapter registered for provider key {:?}", provider.key))?;
    if !adapter.supports_granularity(request.granularity) {
        bail!("{} has no {} report", adapter.display_name(), request.granularity);
    }

    let property = directory
        .property_by_name(&request.property)
        .await
        .with_context(|| format!("looking up property {:?}", request.property))?
        .ok_or_else(|| anyhow!("unknown property {:?}", request.property))?;
    let category_name = request.category.as_deref().unwrap_or(AFFILIATE_CATEGORY);
    let category = directory
        .account_category(property.id, category_name)
        .await
        .with_context(|| format!("looking up account category {category_name:?}"))?
        .ok_or_else(|| anyhow!("property {:?} has no account category {category_name:?}", property.name))?;

    let fallback = default_range(request.granularity, today);
    let range = DateRange::new(
        request.from.unwrap_or(fallback.start),
        request.to.unwrap_or(fallback.end),
    )
    .context("invalid date range")?;

    let job = IngestionJob::new(
        provider.id,
        provider.key.clone(),
        property.id,
        category.id,
        range,
        request.granularity,
    );
    Ok((
        PlannedJob {
            job,
            provider_name: provider.name,
            property_name: property.name,
        },
        adapter,
    ))
}
