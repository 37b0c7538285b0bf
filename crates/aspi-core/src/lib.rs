//! Core domain model for affiliate revenue ingestion.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub mod normalize;
pub mod period;

pub use normalize::{normalize_amount, normalize_date, normalize_record, DateContext, NormalizeError};
pub use period::{chunk, Lookback, PeriodChunks};

pub const CRATE_NAME: &str = "aspi-core";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Daily,
    Monthly,
}

impl Granularity {
    pub fn as_str(self) -> &'static str {
        match self {
            Granularity::Daily => "daily",
            Granularity::Monthly => "monthly",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" | "day" | "d" => Ok(Granularity::Daily),
            "monthly" | "month" | "m" => Ok(Granularity::Monthly),
            other => Err(format!("unknown granularity: {other}")),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("range start {start} is after end {end}")]
pub struct RangeError {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Inclusive calendar date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, RangeError> {
        if start > end {
            return Err(RangeError { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Number of calendar days covered, both ends included.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

/// Sub-range of a job's range handed to the session controller one at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeriodChunk {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl PeriodChunk {
    pub fn range(&self) -> DateRange {
        DateRange {
            start: self.start,
            end: self.end,
        }
    }
}

impl fmt::Display for PeriodChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

/// Login pair scoped to one (provider, property). The password never reaches logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl Credential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// One unit of work for the orchestrator. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionJob {
    pub job_id: Uuid,
    pub provider_id: Uuid,
    /// Registry key of the adapter that drives this provider's portal.
    pub provider_key: String,
    pub property_id: Uuid,
    pub account_category_id: Uuid,
    pub range: DateRange,
    pub granularity: Granularity,
}

impl IngestionJob {
    pub fn new(
        provider_id: Uuid,
        provider_key: impl Into<String>,
        property_id: Uuid,
        account_category_id: Uuid,
        range: DateRange,
        granularity: Granularity,
    ) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            provider_id,
            provider_key: provider_key.into(),
            property_id,
            account_category_id,
            range,
            granularity,
        }
    }
}

/// Cell text exactly as scraped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    pub date_text: String,
    pub amount_text: String,
}

impl RawRecord {
    pub fn new(date_text: impl Into<String>, amount_text: impl Into<String>) -> Self {
        Self {
            date_text: date_text.into(),
            amount_text: amount_text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub date: NaiveDate,
    pub amount: Decimal,
}

impl NormalizedRecord {
    pub fn iso_date(&self) -> String {
        self.date.format("%Y-%m-%d").to_string()
    }
}

/// Composite conflict key shared by the daily and monthly revenue tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowKey {
    pub date: NaiveDate,
    pub property_id: Uuid,
    pub account_category_id: Uuid,
    pub provider_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedRow {
    pub key: RowKey,
    pub granularity: Granularity,
    pub amount: Decimal,
}

impl PersistedRow {
    pub fn for_job(job: &IngestionJob, record: &NormalizedRecord) -> Self {
        Self {
            key: RowKey {
                date: record.date,
                property_id: job.property_id,
                account_category_id: job.account_category_id,
                provider_id: job.provider_id,
            },
            granularity: job.granularity,
            amount: record.amount,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Completed,
    /// Some chunks were written before a fatal session failure.
    Partial,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Completed => "completed",
            JobStatus::Partial => "partial",
            JobStatus::Failed => "failed",
        }
    }
}

/// Per-job outcome reported back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: Uuid,
    pub provider_key: String,
    pub granularity: Granularity,
    pub range: DateRange,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: JobStatus,
    pub chunks_total: usize,
    pub chunks_completed: usize,
    pub zero_row_chunks: usize,
    /// Raw rows handed to the normalizer.
    pub requested: usize,
    /// Rows upserted.
    pub succeeded: usize,
    /// Rows dropped by normalization or range checks.
    pub skipped: usize,
    /// Rows the store rejected.
    pub failed: usize,
    pub error: Option<String>,
    /// Reference to the page capture taken on a fatal failure.
    pub diagnostic: Option<String>,
}

impl JobSummary {
    pub fn started(job: &IngestionJob, started_at: DateTime<Utc>) -> Self {
        Self {
            job_id: job.job_id,
            provider_key: job.provider_key.clone(),
            granularity: job.granularity,
            range: job.range,
            started_at,
            finished_at: started_at,
            status: JobStatus::Completed,
            chunks_total: 0,
            chunks_completed: 0,
            zero_row_chunks: 0,
            requested: 0,
            succeeded: 0,
            skipped: 0,
            failed: 0,
            error: None,
            diagnostic: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn credential_debug_redacts_password() {
        let cred = Credential::new("partner-01", "hunter2");
        let printed = format!("{cred:?}");
        assert!(printed.contains("partner-01"));
        assert!(!printed.contains("hunter2"));
    }

    #[test]
    fn date_range_rejects_inverted_bounds() {
        assert!(DateRange::new(d(2025, 2, 1), d(2025, 1, 1)).is_err());
        let range = DateRange::new(d(2025, 1, 1), d(2025, 1, 31)).unwrap();
        assert_eq!(range.days(), 31);
        assert!(range.contains(d(2025, 1, 31)));
        assert!(!range.contains(d(2025, 2, 1)));
    }

    #[test]
    fn granularity_parses_cli_spellings() {
        assert_eq!("Daily".parse::<Granularity>().unwrap(), Granularity::Daily);
        assert_eq!("month".parse::<Granularity>().unwrap(), Granularity::Monthly);
        assert!("weekly".parse::<Granularity>().is_err());
    }
}
