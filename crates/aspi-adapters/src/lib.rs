//! Provider-facing side of the pipeline: the browser seam, provider
//! descriptors, the Session Controller and the Extraction Engine.

use thiserror::Error;

pub mod browser;
pub mod dom;
pub mod extract;
pub mod http_browser;
pub mod provider;
pub mod session;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use browser::{
    BrowserDriver, ContextProfile, Discovery, Download, DriverError, Locator, PageCapture, PageSession,
};
pub use extract::{extract_records, table_from_csv, ExtractionHints, ReportCursor, TableSnapshot};
pub use http_browser::HttpBrowser;
pub use provider::{
    adapter_for_provider, builtin_descriptors, DescriptorAdapter, LoginForm, LoginSignals, NavStep,
    PeriodControl, ProviderAdapter, ProviderDescriptor, ReportKind, ReportRoute,
};
pub use session::{DiagnosticsSink, LoginOutcome, RetryBudget, SessionController, SessionError, SessionState};

pub const CRATE_NAME: &str = "aspi-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
