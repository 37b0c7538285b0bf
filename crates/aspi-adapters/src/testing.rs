//! Scripted in-process browser for exercising sessions without a network.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::browser::{
    BrowserDriver, ContextProfile, Discovery, Download, DriverError, Locator, PageCapture, PageSession,
};
use crate::extract::{ExtractionHints, TableSnapshot};
use crate::provider::{
    DescriptorAdapter, LoginForm, LoginSignals, NavStep, PeriodControl, ProviderAdapter, ProviderDescriptor,
    ReportKind, ReportRoute,
};
use crate::session::LoginOutcome;
use aspi_core::{Granularity, Lookback};

pub const FIXTURE_LOGIN_URL: &str = "https://portal.test/login";
/// Body of a signed-out login page, including the usual forgot-password link.
pub const LOGIN_PAGE_TEXT: &str = "ログインID パスワード ログイン ログインIDまたはパスワードをお忘れの方はこちら";

/// A small portal: DateFields daily report limited to 31 days, fixed-window monthly report.
pub fn fixture_descriptor() -> ProviderDescriptor {
    let text = |s: &str| Discovery::from(Locator::text(s));
    ProviderDescriptor {
        key: "fixture".to_string(),
        display_name: "Fixture Portal".to_string(),
        name_patterns: vec!["fixture".to_string()],
        login_url: FIXTURE_LOGIN_URL.to_string(),
        login: LoginForm {
            identifier: Discovery::from(Locator::css("#login")),
            password: Discovery::from(Locator::css("#password")),
            submit: Some(text("ログイン")),
            pre_steps: Vec::new(),
        },
        signals: LoginSignals::default(),
        report_kind: ReportKind::Revenue,
        reports: vec![
            ReportRoute {
                kind: ReportKind::Revenue,
                granularity: Granularity::Daily,
                steps: vec![
                    NavStep::link(text("レポート"), Some("https://portal.test/report")),
                    NavStep::click(text("日別")),
                ],
                period: PeriodControl::DateFields {
                    start: Discovery::from(Locator::css("#from")),
                    end: Discovery::from(Locator::css("#to")),
                    format: "%Y/%m/%d".to_string(),
                    submit: Some(text("検索")),
                },
                max_lookback: Some(Lookback::Days(31)),
            },
            ReportRoute {
                kind: ReportKind::Revenue,
                granularity: Granularity::Monthly,
                steps: vec![NavStep::link(text("月別"), None)],
                period: PeriodControl::Fixed,
                max_lookback: None,
            },
        ],
        extraction: ExtractionHints::default(),
        locale: None,
        timezone: None,
    }
}

pub fn fixture_adapter() -> Arc<dyn ProviderAdapter> {
    Arc::new(DescriptorAdapter::new(fixture_descriptor()))
}

#[derive(Debug, Default)]
struct Portal {
    launch_error: Option<DriverError>,
    login_outcomes: VecDeque<LoginOutcome>,
    pages: Vec<Vec<TableSnapshot>>,
    period_pages: HashMap<String, Vec<Vec<TableSnapshot>>>,
    export: Option<Vec<u8>>,
    /// `(call index, error, sign out)` faults for `tables()`.
    table_faults: Vec<(usize, DriverError, bool)>,
    table_calls: usize,
    logged_in: bool,
    body: String,
    url: String,
    page_index: usize,
    period_key: Option<String>,
    pending_fills: Vec<String>,
    launches: usize,
    login_submits: usize,
    closed: bool,
    log: Vec<String>,
}

impl Portal {
    fn current_pages(&self) -> &[Vec<TableSnapshot>] {
        self.period_key
            .as_ref()
            .and_then(|key| self.period_pages.get(key))
            .unwrap_or(&self.pages)
    }

    fn is_next_page(locator: &Locator) -> bool {
        ExtractionHints::default().next_page.locators().contains(locator)
    }

    fn is_export(locator: &Locator) -> bool {
        matches!(locator, Locator::Text(t) if t.contains("CSV"))
    }

    fn visible(&self, locator: &Locator) -> usize {
        if Self::is_next_page(locator) {
            return usize::from(self.logged_in && self.page_index + 1 < self.current_pages().len());
        }
        if Self::is_export(locator) {
            return usize::from(self.logged_in && self.export.is_some());
        }
        1
    }

    fn submit_login(&mut self) {
        self.login_submits += 1;
        let outcome = self.login_outcomes.pop_front().unwrap_or(LoginOutcome::Success);
        self.body = match outcome {
            LoginOutcome::Success => {
                self.logged_in = true;
                self.url = "https://portal.test/home".to_string();
                "マイページ ログアウト".to_string()
            }
            LoginOutcome::Congested => "ただいまアクセスが集中しております".to_string(),
            LoginOutcome::InvalidCredentials => "IDまたはパスワードが正しくありません".to_string(),
            LoginOutcome::NoSignal => LOGIN_PAGE_TEXT.to_string(),
        };
    }
}

/// Driver whose pages follow a script. Clones share the same portal state.
#[derive(Debug, Clone, Default)]
pub struct ScriptedDriver {
    portal: Arc<Mutex<Portal>>,
}

impl ScriptedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn portal(&self) -> MutexGuard<'_, Portal> {
        self.portal.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn edit(self, f: impl FnOnce(&mut Portal)) -> Self {
        f(&mut self.portal());
        self
    }

    /// Outcomes of successive login submits; once drained every submit succeeds.
    pub fn with_login_outcomes(self, outcomes: impl IntoIterator<Item = LoginOutcome>) -> Self {
        self.edit(|p| p.login_outcomes.extend(outcomes))
    }

    /// Report pages shown when no period-specific pages match.
    pub fn with_pages(self, pages: Vec<Vec<TableSnapshot>>) -> Self {
        self.edit(|p| p.pages = pages)
    }

    /// Report pages shown after a period whose first filled value is `start` is submitted.
    pub fn with_period_pages(self, start: &str, pages: Vec<Vec<TableSnapshot>>) -> Self {
        let start = start.to_string();
        self.edit(|p| {
            p.period_pages.insert(start, pages);
        })
    }

    pub fn with_export(self, csv: &[u8]) -> Self {
        let csv = csv.to_vec();
        self.edit(|p| p.export = Some(csv))
    }

    pub fn with_launch_error(self, err: DriverError) -> Self {
        self.edit(|p| p.launch_error = Some(err))
    }

    /// The next table read fails with `err`; `expire` also signs the session out.
    pub fn fail_tables_once(self, err: DriverError, expire: bool) -> Self {
        self.edit(|p| {
            let at = p.table_calls;
            p.table_faults.push((at, err, expire));
        })
    }

    /// The `call`-th table read (zero-based, counted across the whole run) fails.
    pub fn fail_tables_at(self, call: usize, err: DriverError, expire: bool) -> Self {
        self.edit(|p| p.table_faults.push((call, err, expire)))
    }

    pub fn log(&self) -> Vec<String> {
        self.portal().log.clone()
    }

    pub fn launches(&self) -> usize {
        self.portal().launches
    }

    pub fn login_submits(&self) -> usize {
        self.portal().login_submits
    }

    pub fn closed(&self) -> bool {
        self.portal().closed
    }
}

#[async_trait]
impl BrowserDriver for ScriptedDriver {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn launch(&self, profile: &ContextProfile) -> Result<Box<dyn PageSession>, DriverError> {
        let mut portal = self.portal();
        if let Some(err) = portal.launch_error.clone() {
            return Err(err);
        }
        portal.launches += 1;
        portal.closed = false;
        portal.log.push(format!("launch locale={}", profile.locale));
        Ok(Box::new(ScriptedPage {
            portal: Arc::clone(&self.portal),
        }))
    }
}

pub struct ScriptedPage {
    portal: Arc<Mutex<Portal>>,
}

impl ScriptedPage {
    fn portal(&self) -> MutexGuard<'_, Portal> {
        self.portal.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open(&self) -> Result<MutexGuard<'_, Portal>, DriverError> {
        let portal = self.portal();
        if portal.closed {
            return Err(DriverError::Closed);
        }
        Ok(portal)
    }
}

#[async_trait]
impl PageSession for ScriptedPage {
    async fn goto(&mut self, url: &str) -> Result<(), DriverError> {
        let mut portal = self.open()?;
        portal.log.push(format!("goto {url}"));
        portal.url = url.to_string();
        portal.page_index = 0;
        portal.body = if portal.logged_in {
            "マイページ ログアウト".to_string()
        } else {
            LOGIN_PAGE_TEXT.to_string()
        };
        Ok(())
    }

    fn current_url(&self) -> String {
        self.portal().url.clone()
    }

    async fn count(&mut self, locator: &Locator) -> Result<usize, DriverError> {
        Ok(self.open()?.visible(locator))
    }

    async fn is_enabled(&mut self, locator: &Locator) -> Result<bool, DriverError> {
        Ok(self.open()?.visible(locator) > 0)
    }

    async fn fill(&mut self, locator: &Locator, value: &str) -> Result<(), DriverError> {
        let mut portal = self.open()?;
        portal.log.push(format!("fill {locator}={value}"));
        if portal.logged_in {
            portal.pending_fills.push(value.to_string());
        }
        Ok(())
    }

    async fn select_option(&mut self, locator: &Locator, value: &str) -> Result<(), DriverError> {
        let mut portal = self.open()?;
        portal.log.push(format!("select {locator}={value}"));
        if portal.logged_in {
            portal.pending_fills.push(value.to_string());
        }
        Ok(())
    }

    async fn click(&mut self, locator: &Locator) -> Result<(), DriverError> {
        let mut portal = self.open()?;
        portal.log.push(format!("click {locator}"));
        if !portal.logged_in {
            portal.submit_login();
            return Ok(());
        }
        if Portal::is_next_page(locator) {
            portal.page_index += 1;
            return Ok(());
        }
        portal.page_index = 0;
        if !portal.pending_fills.is_empty() {
            let fills = std::mem::take(&mut portal.pending_fills);
            portal.period_key = fills.into_iter().next();
        }
        Ok(())
    }

    async fn press_enter(&mut self, locator: &Locator) -> Result<(), DriverError> {
        self.click(locator).await
    }

    async fn body_text(&mut self) -> Result<String, DriverError> {
        Ok(self.open()?.body.clone())
    }

    async fn tables(&mut self) -> Result<Vec<TableSnapshot>, DriverError> {
        let mut portal = self.open()?;
        let call = portal.table_calls;
        portal.table_calls += 1;
        if let Some(pos) = portal.table_faults.iter().position(|(at, _, _)| *at == call) {
            let (_, err, expire) = portal.table_faults.remove(pos);
            if expire {
                portal.logged_in = false;
                portal.body = "セッションの有効期限が切れました".to_string();
            }
            return Err(err);
        }
        if !portal.logged_in {
            return Ok(Vec::new());
        }
        let index = portal.page_index;
        portal.log.push(format!("tables page={index}"));
        Ok(portal.current_pages().get(index).cloned().unwrap_or_default())
    }

    async fn download(&mut self, locator: &Locator) -> Result<Download, DriverError> {
        let mut portal = self.open()?;
        portal.log.push(format!("download {locator}"));
        match portal.export.clone() {
            Some(bytes) => Ok(Download {
                file_name: Some("report.csv".to_string()),
                content_type: Some("text/csv".to_string()),
                bytes,
            }),
            None => Err(DriverError::ElementNotFound(locator.to_string())),
        }
    }

    async fn capture(&mut self) -> Result<PageCapture, DriverError> {
        let portal = self.portal();
        Ok(PageCapture {
            url: portal.url.clone(),
            extension: "html".to_string(),
            bytes: format!("<html><body>{}</body></html>", portal.body).into_bytes(),
        })
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        let mut portal = self.portal();
        portal.log.push("close".to_string());
        portal.closed = true;
        portal.logged_in = false;
        Ok(())
    }
}
