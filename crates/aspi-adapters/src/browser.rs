//! Seam between the session controller and whatever drives the portal pages.

use std::fmt;
use std::time::Duration;

use aspi_storage::{classify_status, RetryDisposition};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::extract::TableSnapshot;

/// One way of finding an element on a page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Locator {
    /// CSS selector.
    Css(String),
    /// Clickable element (link, button, tab) whose visible text or value contains the string.
    Text(String),
    /// Form control matched by name, id, placeholder, aria-label or its `<label>` text.
    Field(String),
    /// The nth visible button on the page, zero-based. Last-resort fallback.
    Button(usize),
}

impl Locator {
    pub fn css(selector: impl Into<String>) -> Self {
        Locator::Css(selector.into())
    }

    pub fn text(text: impl Into<String>) -> Self {
        Locator::Text(text.into())
    }

    pub fn field(name: impl Into<String>) -> Self {
        Locator::Field(name.into())
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Css(s) => write!(f, "css={s}"),
            Locator::Text(s) => write!(f, "text={s}"),
            Locator::Field(s) => write!(f, "field={s}"),
            Locator::Button(n) => write!(f, "button[{n}]"),
        }
    }
}

/// Ranked discovery strategies; the first locator with a visible match wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Discovery(pub Vec<Locator>);

impl Discovery {
    pub fn new(locators: impl IntoIterator<Item = Locator>) -> Self {
        Self(locators.into_iter().collect())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn locators(&self) -> &[Locator] {
        &self.0
    }

    /// Returns the highest-ranked locator that currently matches something visible.
    pub async fn resolve(&self, page: &mut dyn PageSession) -> Result<Option<Locator>, DriverError> {
        for locator in &self.0 {
            match page.count(locator).await {
                Ok(n) if n > 0 => return Ok(Some(locator.clone())),
                Ok(_) => {}
                Err(DriverError::InvalidLocator(reason)) => {
                    tracing::debug!(%locator, reason, "skipping unusable locator");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(None)
    }

    /// Like [`Discovery::resolve`] but also requires the element to be enabled.
    pub async fn resolve_enabled(
        &self,
        page: &mut dyn PageSession,
    ) -> Result<Option<Locator>, DriverError> {
        for locator in &self.0 {
            if page.count(locator).await.unwrap_or(0) > 0 && page.is_enabled(locator).await? {
                return Ok(Some(locator.clone()));
            }
        }
        Ok(None)
    }

    pub async fn require(&self, page: &mut dyn PageSession, what: &str) -> Result<Locator, DriverError> {
        self.resolve(page)
            .await?
            .ok_or_else(|| DriverError::ElementNotFound(format!("{what} ({})", self.describe())))
    }

    pub fn describe(&self) -> String {
        self.0
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" | ")
    }
}

impl From<Locator> for Discovery {
    fn from(locator: Locator) -> Self {
        Discovery(vec![locator])
    }
}

/// Fixed browsing identity for one context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextProfile {
    pub user_agent: String,
    pub locale: String,
    pub timezone: String,
    #[serde(with = "secs")]
    pub timeout: Duration,
}

impl Default for ContextProfile {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            locale: "ja-JP".to_string(),
            timezone: "Asia/Tokyo".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl ContextProfile {
    /// `Accept-Language` value derived from the locale, e.g. `ja-JP,ja;q=0.9,en;q=0.5`.
    pub fn accept_language(&self) -> String {
        let primary = self.locale.split(['-', '_']).next().unwrap_or("en");
        if primary.eq_ignore_ascii_case(&self.locale) {
            primary.to_string()
        } else {
            format!("{},{primary};q=0.9,en;q=0.5", self.locale)
        }
    }
}

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DriverError {
    #[error("automation engine failed to start: {0}")]
    Launch(String),
    #[error("timed out after {after:?} waiting for {what}")]
    Timeout { what: String, after: Duration },
    #[error("http status {status} for {url}")]
    Http { status: u16, url: String },
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("element not found: {0}")]
    ElementNotFound(String),
    #[error("invalid locator: {0}")]
    InvalidLocator(String),
    #[error("unsupported by this driver: {0}")]
    Unsupported(String),
    #[error("page is closed")]
    Closed,
}

impl DriverError {
    /// Transient errors feed the retry budget; everything else ends the session.
    pub fn is_transient(&self) -> bool {
        match self {
            DriverError::Timeout { .. }
            | DriverError::Navigation(_)
            | DriverError::ElementNotFound(_) => true,
            DriverError::Http { status, .. } => {
                classify_status(*status) == RetryDisposition::Retryable
            }
            DriverError::Launch(_)
            | DriverError::InvalidLocator(_)
            | DriverError::Unsupported(_)
            | DriverError::Closed => false,
        }
    }
}

/// Full-page capture used as a diagnostic artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCapture {
    pub url: String,
    pub extension: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait BrowserDriver: Send + Sync {
    fn name(&self) -> &'static str;

    /// Opens a fresh context with the given identity. Errors here are fatal.
    async fn launch(&self, profile: &ContextProfile) -> Result<Box<dyn PageSession>, DriverError>;
}

/// A single live page. Every wait is bounded by the timeout passed in or the context default.
#[async_trait]
pub trait PageSession: Send {
    async fn goto(&mut self, url: &str) -> Result<(), DriverError>;

    fn current_url(&self) -> String;

    /// Number of visible elements matching `locator`.
    async fn count(&mut self, locator: &Locator) -> Result<usize, DriverError>;

    async fn is_enabled(&mut self, locator: &Locator) -> Result<bool, DriverError>;

    async fn fill(&mut self, locator: &Locator, value: &str) -> Result<(), DriverError>;

    async fn select_option(&mut self, locator: &Locator, value: &str) -> Result<(), DriverError>;

    async fn click(&mut self, locator: &Locator) -> Result<(), DriverError>;

    /// Submits the form owning the element, as pressing Enter in it would.
    async fn press_enter(&mut self, locator: &Locator) -> Result<(), DriverError>;

    async fn body_text(&mut self) -> Result<String, DriverError>;

    /// Table-like elements of the page and its same-origin frames.
    async fn tables(&mut self) -> Result<Vec<TableSnapshot>, DriverError>;

    async fn download(&mut self, locator: &Locator) -> Result<Download, DriverError>;

    async fn capture(&mut self) -> Result<PageCapture, DriverError>;

    async fn close(&mut self) -> Result<(), DriverError>;
}
