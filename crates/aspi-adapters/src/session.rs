//! Session Controller: one authenticated browsing context per provider run.
//!
//! Lifecycle:
//! `Uninitialized → Initializing → LoggingIn → Authenticated → Navigating →
//! ReportReady → {Extracting → ReportReady}* → Closed`. A transient failure in
//! any state moves to `Retrying` and back through `LoggingIn`, restoring the
//! report and period that were active; exhausting the retry budget ends in
//! `Failed`.

use std::fmt;
use std::fmt::Write as _;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use aspi_core::{Credential, Granularity, PeriodChunk};
use aspi_storage::{ArtifactStore, BackoffPolicy};
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::browser::{BrowserDriver, ContextProfile, Discovery, DriverError, PageCapture, PageSession};
use crate::extract::ReportCursor;
use crate::provider::{LoginSignals, NavStep, PeriodControl, ProviderAdapter, ReportKind};

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const DIAGNOSTIC_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Uninitialized,
    Initializing,
    LoggingIn,
    Authenticated,
    Navigating,
    ReportReady,
    Extracting,
    Retrying,
    Closed,
    Failed,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Initializing => "initializing",
            SessionState::LoggingIn => "logging_in",
            SessionState::Authenticated => "authenticated",
            SessionState::Navigating => "navigating",
            SessionState::ReportReady => "report_ready",
            SessionState::Extracting => "extracting",
            SessionState::Retrying => "retrying",
            SessionState::Closed => "closed",
            SessionState::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the page looked after a login submit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    Success,
    Congested,
    InvalidCredentials,
    NoSignal,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("browser context could not be started: {0}")]
    Launch(String),
    #[error("provider rejected the credentials")]
    InvalidCredentials,
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("{operation} is not valid in state {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },
    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// Failure of one controller step, before the retry policy has looked at it.
#[derive(Debug)]
pub(crate) enum Fault {
    Transient(String),
    Fatal(SessionError),
}

impl From<DriverError> for Fault {
    fn from(err: DriverError) -> Self {
        if err.is_transient() {
            Fault::Transient(err.to_string())
        } else {
            Fault::Fatal(SessionError::Driver(err))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { attempt: u32, delay: Duration },
    Exhausted { attempts: u32 },
}

/// Counts failed attempts against a [`BackoffPolicy`].
#[derive(Debug, Clone)]
pub struct RetryBudget {
    policy: BackoffPolicy,
    failures: u32,
}

impl RetryBudget {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self { policy, failures: 0 }
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn record_failure(&mut self) -> RetryDecision {
        self.failures += 1;
        if self.failures >= self.policy.max_attempts.max(1) {
            RetryDecision::Exhausted {
                attempts: self.failures,
            }
        } else {
            RetryDecision::Retry {
                attempt: self.failures,
                delay: self.policy.delay_for_attempt(self.failures - 1),
            }
        }
    }
}

/// Destination for failure captures. Returns a reference a human can follow.
#[async_trait]
pub trait DiagnosticsSink: Send + Sync {
    async fn record(&self, job_id: Uuid, provider: &str, capture: &PageCapture) -> anyhow::Result<String>;
}

#[async_trait]
impl DiagnosticsSink for ArtifactStore {
    async fn record(&self, job_id: Uuid, provider: &str, capture: &PageCapture) -> anyhow::Result<String> {
        let stored = self
            .store_diagnostic(Utc::now(), job_id, provider, &capture.extension, &capture.bytes)
            .await?;
        Ok(stored.absolute_path.display().to_string())
    }
}

pub struct SessionController {
    adapter: Arc<dyn ProviderAdapter>,
    driver: Arc<dyn BrowserDriver>,
    profile: ContextProfile,
    budget: RetryBudget,
    state: SessionState,
    page: Option<Box<dyn PageSession>>,
    credential: Option<Credential>,
    report: Option<(ReportKind, Granularity)>,
    period: Option<PeriodChunk>,
    diagnostics: Option<Arc<dyn DiagnosticsSink>>,
    job_id: Uuid,
    last_diagnostic: Option<String>,
}

impl SessionController {
    pub fn new(
        adapter: Arc<dyn ProviderAdapter>,
        driver: Arc<dyn BrowserDriver>,
        profile: &ContextProfile,
        policy: BackoffPolicy,
        job_id: Uuid,
    ) -> Self {
        let profile = adapter.context_profile(profile);
        Self {
            adapter,
            driver,
            profile,
            budget: RetryBudget::new(policy),
            state: SessionState::Uninitialized,
            page: None,
            credential: None,
            report: None,
            period: None,
            diagnostics: None,
            job_id,
            last_diagnostic: None,
        }
    }

    pub fn with_diagnostics(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.diagnostics = Some(sink);
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: SessionState) {
        self.state = state;
    }

    pub fn adapter(&self) -> &dyn ProviderAdapter {
        self.adapter.as_ref()
    }

    /// Reference to the capture taken at the most recent failure, if any.
    pub fn diagnostic(&self) -> Option<&str> {
        self.last_diagnostic.as_deref()
    }

    /// Launches the browsing context. A launch failure is fatal.
    pub async fn initialize(&mut self) -> Result<(), SessionError> {
        if self.page.is_some() {
            return Ok(());
        }
        if self.state != SessionState::Uninitialized {
            return Err(self.invalid("initialize"));
        }
        self.state = SessionState::Initializing;
        match self.driver.launch(&self.profile).await {
            Ok(page) => {
                debug!(
                    provider = self.adapter.key(),
                    driver = self.driver.name(),
                    locale = %self.profile.locale,
                    timezone = %self.profile.timezone,
                    "browser context ready"
                );
                self.page = Some(page);
                Ok(())
            }
            Err(err) => Err(self.fail(SessionError::Launch(err.to_string())).await),
        }
    }

    /// Signs in, retrying congestion and silent pages within the budget.
    pub async fn login(&mut self, credential: Credential) -> Result<(), SessionError> {
        if self.state.is_terminal() {
            return Err(self.invalid("login"));
        }
        self.initialize().await?;
        self.credential = Some(credential);
        self.budget.reset();
        match self.attempt_login().await {
            Ok(()) => {}
            Err(Fault::Fatal(err)) => return Err(self.fail(err).await),
            Err(Fault::Transient(reason)) => self.recover(reason).await?,
        }
        info!(provider = self.adapter.key(), "signed in");
        Ok(())
    }

    /// Reaches the report surface. Calling it again for the same report is a no-op.
    pub async fn navigate_to_report(
        &mut self,
        kind: ReportKind,
        granularity: Granularity,
    ) -> Result<(), SessionError> {
        if self.report == Some((kind, granularity)) && self.state == SessionState::ReportReady {
            return Ok(());
        }
        if !matches!(
            self.state,
            SessionState::Authenticated | SessionState::ReportReady
        ) {
            return Err(self.invalid("navigate_to_report"));
        }
        if self.adapter.route(kind, granularity).is_none() {
            let err = SessionError::Unsupported(format!(
                "{} has no {kind:?} report at {granularity} granularity",
                self.adapter.key()
            ));
            return Err(self.fail(err).await);
        }
        self.report = Some((kind, granularity));
        self.period = None;
        match self.try_navigate(kind, granularity).await {
            Ok(()) => Ok(()),
            Err(Fault::Fatal(err)) => Err(self.fail(err).await),
            Err(Fault::Transient(reason)) => self.recover(reason).await,
        }
    }

    /// Constrains the report to `chunk`. `Ok(false)` when the report has no
    /// period controls and shows a fixed window instead.
    pub async fn set_period(&mut self, chunk: PeriodChunk) -> Result<bool, SessionError> {
        let Some((kind, granularity)) = self.report else {
            return Err(self.invalid("set_period"));
        };
        if self.state != SessionState::ReportReady {
            return Err(self.invalid("set_period"));
        }
        self.budget.reset();
        if !self.adapter.supports_period(kind, granularity) {
            return Ok(false);
        }
        self.period = Some(chunk);
        match self.try_set_period(chunk).await {
            Ok(()) => {}
            Err(Fault::Fatal(err)) => return Err(self.fail(err).await),
            Err(Fault::Transient(reason)) => self.recover(reason).await?,
        }
        debug!(provider = self.adapter.key(), %chunk, "period applied");
        Ok(true)
    }

    /// Hands the ready report to the extraction engine.
    pub fn extract(&mut self) -> Result<ReportCursor<'_>, SessionError> {
        if self.state != SessionState::ReportReady {
            return Err(self.invalid("extract"));
        }
        self.state = SessionState::Extracting;
        let hints = self.adapter.extraction_hints();
        Ok(ReportCursor::new(self, hints))
    }

    /// Releases the browsing context. Never fails; problems are logged.
    pub async fn teardown(&mut self) {
        if let Some(mut page) = self.page.take() {
            match timeout(self.profile.timeout, page.close()).await {
                Ok(Ok(())) => debug!(provider = self.adapter.key(), "browser context closed"),
                Ok(Err(err)) => warn!(provider = self.adapter.key(), error = %err, "closing browser context failed"),
                Err(_) => warn!(provider = self.adapter.key(), "closing browser context timed out"),
            }
        }
        self.credential = None;
        if self.state != SessionState::Failed {
            self.state = SessionState::Closed;
        }
    }

    pub(crate) fn page_mut(&mut self) -> Result<&mut dyn PageSession, Fault> {
        let state = self.state;
        match self.page.as_deref_mut() {
            Some(page) => Ok(page),
            None => Err(Fault::Fatal(SessionError::InvalidState {
                operation: "page access",
                state,
            })),
        }
    }

    /// Backs off, signs in again and restores the report and period that were active.
    pub(crate) async fn recover(&mut self, reason: String) -> Result<(), SessionError> {
        let mut reason = reason;
        loop {
            self.back_off(reason).await?;
            match self.restore().await {
                Ok(()) => return Ok(()),
                Err(Fault::Fatal(err)) => return Err(self.fail(err).await),
                Err(Fault::Transient(next)) => reason = next,
            }
        }
    }

    /// Marks the session failed and takes a best-effort diagnostic capture.
    pub(crate) async fn fail(&mut self, err: SessionError) -> SessionError {
        error!(
            provider = self.adapter.key(),
            job_id = %self.job_id,
            state = %self.state,
            error = %err,
            "session failed"
        );
        self.capture_diagnostic().await;
        self.state = SessionState::Failed;
        err
    }

    fn invalid(&self, operation: &'static str) -> SessionError {
        SessionError::InvalidState {
            operation,
            state: self.state,
        }
    }

    async fn back_off(&mut self, reason: String) -> Result<(), SessionError> {
        self.state = SessionState::Retrying;
        match self.budget.record_failure() {
            RetryDecision::Retry { attempt, delay } => {
                warn!(
                    provider = self.adapter.key(),
                    attempt,
                    delay_secs = delay.as_secs(),
                    reason,
                    "transient session failure; retrying"
                );
                sleep(delay).await;
                Ok(())
            }
            RetryDecision::Exhausted { attempts } => {
                Err(self.fail(SessionError::Exhausted { attempts, last: reason }).await)
            }
        }
    }

    async fn restore(&mut self) -> Result<(), Fault> {
        self.attempt_login().await?;
        if let Some((kind, granularity)) = self.report {
            self.try_navigate(kind, granularity).await?;
        }
        if let Some(chunk) = self.period {
            self.try_set_period(chunk).await?;
        }
        Ok(())
    }

    async fn attempt_login(&mut self) -> Result<(), Fault> {
        self.state = SessionState::LoggingIn;
        let Some(credential) = self.credential.clone() else {
            return Err(Fault::Fatal(self.invalid("login without credential")));
        };
        let adapter = Arc::clone(&self.adapter);
        let form = adapter.login_form();
        let signals = adapter.signals();
        let wait = self.profile.timeout;
        let page = self.page_mut()?;

        bounded(wait, "login page", page.goto(adapter.login_url())).await?;
        run_steps(page, &form.pre_steps, wait).await?;

        if form.identifier.resolve(page).await?.is_none()
            && classify_page(page, signals).await? == LoginOutcome::Success
        {
            debug!(provider = adapter.key(), "session still signed in");
            self.state = SessionState::Authenticated;
            return Ok(());
        }

        let identifier = form.identifier.require(page, "identifier field").await?;
        page.fill(&identifier, &credential.username).await?;
        let password = form.password.require(page, "password field").await?;
        page.fill(&password, &credential.password).await?;
        let submit = match &form.submit {
            Some(submit) => submit.resolve(page).await?,
            None => None,
        };
        match submit {
            Some(submit) => bounded(wait, "login submit", page.click(&submit)).await?,
            None => bounded(wait, "login submit", page.press_enter(&password)).await?,
        }

        match classify_login(page, signals, wait).await? {
            LoginOutcome::Success => {
                self.state = SessionState::Authenticated;
                Ok(())
            }
            LoginOutcome::Congested => Err(Fault::Transient("provider reports congestion".to_string())),
            LoginOutcome::InvalidCredentials => Err(Fault::Fatal(SessionError::InvalidCredentials)),
            LoginOutcome::NoSignal => Err(Fault::Transient(
                "no recognizable post-login signal".to_string(),
            )),
        }
    }

    async fn try_navigate(&mut self, kind: ReportKind, granularity: Granularity) -> Result<(), Fault> {
        self.state = SessionState::Navigating;
        let adapter = Arc::clone(&self.adapter);
        let Some(route) = adapter.route(kind, granularity) else {
            return Err(Fault::Fatal(SessionError::Unsupported(format!(
                "{} has no {kind:?} report at {granularity} granularity",
                adapter.key()
            ))));
        };
        let wait = self.profile.timeout;
        let page = self.page_mut()?;
        run_steps(page, &route.steps, wait).await?;
        debug!(provider = adapter.key(), url = %page.current_url(), "report surface reached");
        self.state = SessionState::ReportReady;
        Ok(())
    }

    async fn try_set_period(&mut self, chunk: PeriodChunk) -> Result<(), Fault> {
        let Some((kind, granularity)) = self.report else {
            return Err(Fault::Fatal(self.invalid("set_period")));
        };
        self.state = SessionState::Navigating;
        let adapter = Arc::clone(&self.adapter);
        let Some(route) = adapter.route(kind, granularity) else {
            return Err(Fault::Fatal(SessionError::Unsupported(adapter.key().to_string())));
        };
        let wait = self.profile.timeout;
        let page = self.page_mut()?;
        apply_period(page, &route.period, chunk, wait).await?;
        self.state = SessionState::ReportReady;
        Ok(())
    }

    async fn capture_diagnostic(&mut self) {
        let Some(sink) = self.diagnostics.clone() else {
            return;
        };
        let Some(page) = self.page.as_deref_mut() else {
            return;
        };
        let capture = match timeout(DIAGNOSTIC_TIMEOUT, page.capture()).await {
            Ok(Ok(capture)) => capture,
            Ok(Err(err)) => {
                warn!(error = %err, "diagnostic capture failed");
                return;
            }
            Err(_) => {
                warn!("diagnostic capture timed out");
                return;
            }
        };
        match timeout(DIAGNOSTIC_TIMEOUT, sink.record(self.job_id, self.adapter.key(), &capture)).await {
            Ok(Ok(reference)) => {
                info!(reference, url = %capture.url, "diagnostic capture stored");
                self.last_diagnostic = Some(reference);
            }
            Ok(Err(err)) => warn!(error = %err, "storing diagnostic capture failed"),
            Err(_) => warn!("storing diagnostic capture timed out"),
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if self.page.is_some() {
            warn!(provider = self.adapter.key(), "session dropped without teardown");
        }
    }
}

async fn bounded<T>(
    wait: Duration,
    what: &str,
    fut: impl Future<Output = Result<T, DriverError>>,
) -> Result<T, DriverError> {
    match timeout(wait, fut).await {
        Ok(result) => result,
        Err(_) => Err(DriverError::Timeout {
            what: what.to_string(),
            after: wait,
        }),
    }
}

fn contains_any(haystack: &str, needles: &[String]) -> bool {
    let haystack = haystack.to_lowercase();
    needles
        .iter()
        .filter(|n| !n.is_empty())
        .any(|n| haystack.contains(&n.to_lowercase()))
}

async fn classify_page(page: &mut dyn PageSession, signals: &LoginSignals) -> Result<LoginOutcome, DriverError> {
    let text = page.body_text().await?;
    if contains_any(&text, &signals.invalid_credential_texts) {
        return Ok(LoginOutcome::InvalidCredentials);
    }
    if contains_any(&text, &signals.congestion_texts) {
        return Ok(LoginOutcome::Congested);
    }
    if !signals.success.is_empty() && signals.success.resolve(page).await?.is_some() {
        return Ok(LoginOutcome::Success);
    }
    if contains_any(&text, &signals.success_texts)
        || contains_any(&page.current_url(), &signals.success_url_contains)
    {
        return Ok(LoginOutcome::Success);
    }
    Ok(LoginOutcome::NoSignal)
}

/// Polls the page until a login signal shows up or `wait` elapses.
pub async fn classify_login(
    page: &mut dyn PageSession,
    signals: &LoginSignals,
    wait: Duration,
) -> Result<LoginOutcome, DriverError> {
    let deadline = Instant::now() + wait;
    loop {
        let outcome = classify_page(page, signals).await?;
        let now = Instant::now();
        if outcome != LoginOutcome::NoSignal || now >= deadline {
            return Ok(outcome);
        }
        sleep(POLL_INTERVAL.min(deadline - now)).await;
    }
}

async fn wait_for_discovery(
    page: &mut dyn PageSession,
    target: &Discovery,
    wait: Duration,
) -> Result<(), DriverError> {
    let deadline = Instant::now() + wait;
    loop {
        if target.resolve(page).await?.is_some() {
            return Ok(());
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(DriverError::Timeout {
                what: target.describe(),
                after: wait,
            });
        }
        sleep(POLL_INTERVAL.min(deadline - now)).await;
    }
}

async fn run_steps(page: &mut dyn PageSession, steps: &[NavStep], wait: Duration) -> Result<(), DriverError> {
    for step in steps {
        match step {
            NavStep::Goto { url } => bounded(wait, url, page.goto(url)).await?,
            NavStep::Click { target, optional } => match target.resolve(page).await? {
                Some(locator) => bounded(wait, &target.describe(), page.click(&locator)).await?,
                None if *optional => debug!(target = %target.describe(), "optional step skipped"),
                None => return Err(DriverError::ElementNotFound(target.describe())),
            },
            NavStep::Link { target, fallback_url } => {
                let followed = match target.resolve(page).await? {
                    Some(locator) => match bounded(wait, &target.describe(), page.click(&locator)).await {
                        Ok(()) => true,
                        Err(DriverError::Unsupported(reason)) if fallback_url.is_some() => {
                            debug!(reason, "link not followable; using fallback url");
                            false
                        }
                        Err(err) => return Err(err),
                    },
                    None => false,
                };
                if !followed {
                    match fallback_url {
                        Some(url) => bounded(wait, url, page.goto(url)).await?,
                        None => return Err(DriverError::ElementNotFound(target.describe())),
                    }
                }
            }
            NavStep::WaitFor { target } => wait_for_discovery(page, target, wait).await?,
        }
    }
    Ok(())
}

fn format_date(date: NaiveDate, format: &str) -> Result<String, DriverError> {
    let mut out = String::new();
    write!(out, "{}", date.format(format))
        .map_err(|_| DriverError::Unsupported(format!("date format {format:?}")))?;
    Ok(out)
}

async fn select_value(page: &mut dyn PageSession, target: &Discovery, value: &str) -> Result<(), DriverError> {
    let locator = target.require(page, "period select").await?;
    page.select_option(&locator, value).await
}

async fn fill_value(
    page: &mut dyn PageSession,
    target: &Discovery,
    value: &str,
) -> Result<crate::browser::Locator, DriverError> {
    let locator = target.require(page, "period field").await?;
    page.fill(&locator, value).await?;
    Ok(locator)
}

async fn click_required(
    page: &mut dyn PageSession,
    target: &Discovery,
    what: &str,
    wait: Duration,
) -> Result<(), DriverError> {
    let locator = target.require(page, what).await?;
    bounded(wait, what, page.click(&locator)).await
}

/// Drives one of the period widgets so the report covers `chunk`.
async fn apply_period(
    page: &mut dyn PageSession,
    control: &PeriodControl,
    chunk: PeriodChunk,
    wait: Duration,
) -> Result<(), DriverError> {
    match control {
        PeriodControl::Fixed => Ok(()),
        PeriodControl::SelectPairs {
            start_year,
            start_month,
            start_day,
            end_year,
            end_month,
            end_day,
            zero_pad,
            submit,
        } => {
            let number = |n: u32| if *zero_pad { format!("{n:02}") } else { n.to_string() };
            for (date, year, month, day) in [
                (chunk.start, start_year, start_month, start_day),
                (chunk.end, end_year, end_month, end_day),
            ] {
                select_value(page, year, &date.year().to_string()).await?;
                select_value(page, month, &number(date.month())).await?;
                if let Some(day) = day {
                    select_value(page, day, &number(date.day())).await?;
                }
            }
            if let Some(submit) = submit {
                click_required(page, submit, "period submit", wait).await?;
            }
            Ok(())
        }
        PeriodControl::DateFields {
            start,
            end,
            format,
            submit,
        } => {
            fill_value(page, start, &format_date(chunk.start, format)?).await?;
            let end_field = fill_value(page, end, &format_date(chunk.end, format)?).await?;
            match submit {
                Some(submit) => click_required(page, submit, "period submit", wait).await,
                None => bounded(wait, "period submit", page.press_enter(&end_field)).await,
            }
        }
        PeriodControl::Calendar {
            open,
            start,
            end,
            format,
            apply,
        } => {
            click_required(page, open, "calendar", wait).await?;
            wait_for_discovery(page, start, wait).await?;
            fill_value(page, start, &format_date(chunk.start, format)?).await?;
            fill_value(page, end, &format_date(chunk.end, format)?).await?;
            click_required(page, apply, "calendar apply", wait).await
        }
    }
}
