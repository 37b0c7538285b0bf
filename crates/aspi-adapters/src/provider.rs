//! Data-driven provider capability descriptors.
//!
//! A provider is described, not subclassed: login discovery, report routes,
//! period controls, lookback limits and extraction hints are all plain data
//! consumed by the generic session controller and extraction engine.

use aspi_core::{Granularity, Lookback};
use serde::{Deserialize, Serialize};

use crate::browser::{ContextProfile, Discovery, Locator};
use crate::extract::ExtractionHints;
use crate::AdapterError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    /// Generated (occurred) rewards.
    #[default]
    Revenue,
    /// Approved rewards only.
    Confirmed,
}

/// One navigation action on the way to a report surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum NavStep {
    Goto {
        url: String,
    },
    Click {
        target: Discovery,
        #[serde(default)]
        optional: bool,
    },
    /// Menu/link discovery first; the URL is used only when no link is found.
    Link {
        target: Discovery,
        #[serde(default)]
        fallback_url: Option<String>,
    },
    WaitFor {
        target: Discovery,
    },
}

impl NavStep {
    pub fn goto(url: &str) -> Self {
        NavStep::Goto { url: url.to_string() }
    }

    pub fn click(target: impl Into<Discovery>) -> Self {
        NavStep::Click {
            target: target.into(),
            optional: false,
        }
    }

    pub fn optional_click(target: impl Into<Discovery>) -> Self {
        NavStep::Click {
            target: target.into(),
            optional: true,
        }
    }

    pub fn link(target: impl Into<Discovery>, fallback_url: Option<&str>) -> Self {
        NavStep::Link {
            target: target.into(),
            fallback_url: fallback_url.map(str::to_string),
        }
    }
}

/// How a report is constrained to a date window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PeriodControl {
    /// No period controls; the report shows a fixed recent window.
    #[default]
    Fixed,
    /// Year/month(/day) select boxes for each end of the range.
    SelectPairs {
        start_year: Discovery,
        start_month: Discovery,
        #[serde(default)]
        start_day: Option<Discovery>,
        end_year: Discovery,
        end_month: Discovery,
        #[serde(default)]
        end_day: Option<Discovery>,
        #[serde(default)]
        zero_pad: bool,
        #[serde(default)]
        submit: Option<Discovery>,
    },
    /// Free-text date inputs filled with `format` (chrono strftime).
    DateFields {
        start: Discovery,
        end: Discovery,
        format: String,
        #[serde(default)]
        submit: Option<Discovery>,
    },
    /// A calendar widget opened by a control, with text inputs inside.
    Calendar {
        open: Discovery,
        start: Discovery,
        end: Discovery,
        format: String,
        apply: Discovery,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRoute {
    pub kind: ReportKind,
    pub granularity: Granularity,
    pub steps: Vec<NavStep>,
    #[serde(default)]
    pub period: PeriodControl,
    #[serde(default)]
    pub max_lookback: Option<Lookback>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginForm {
    pub identifier: Discovery,
    pub password: Discovery,
    /// `None` submits by pressing Enter in the password field.
    #[serde(default)]
    pub submit: Option<Discovery>,
    /// Steps run after loading the login page, e.g. opening a login modal.
    #[serde(default)]
    pub pre_steps: Vec<NavStep>,
}

/// Texts and elements used to classify the page after a login submit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginSignals {
    pub success: Discovery,
    pub success_texts: Vec<String>,
    pub success_url_contains: Vec<String>,
    pub congestion_texts: Vec<String>,
    pub invalid_credential_texts: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for LoginSignals {
    fn default() -> Self {
        Self {
            success: Discovery::default(),
            success_texts: strings(&["ログアウト", "Logout", "Log out"]),
            success_url_contains: Vec::new(),
            congestion_texts: strings(&[
                "混雑",
                "アクセスが集中",
                "しばらく時間をおいて",
                "しばらくしてから",
                "ただいまメンテナンス",
                "Service Unavailable",
                "Too Many Requests",
                "server is busy",
            ]),
            invalid_credential_texts: strings(&[
                "パスワードが違",
                "パスワードが正しくありません",
                "IDまたはパスワードが正しく",
                "IDまたはパスワードが違",
                "IDまたはパスワードが間違",
                "ID又はパスワードが正しく",
                "ID又はパスワードが違",
                "ログインに失敗",
                "認証に失敗",
                "Invalid username or password",
                "incorrect password",
            ]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    /// Registry key, matched against the provider's stored `key`.
    pub key: String,
    pub display_name: String,
    /// Lower-case substrings that identify this provider by name.
    #[serde(default)]
    pub name_patterns: Vec<String>,
    pub login_url: String,
    pub login: LoginForm,
    #[serde(default)]
    pub signals: LoginSignals,
    #[serde(default)]
    pub report_kind: ReportKind,
    pub reports: Vec<ReportRoute>,
    #[serde(default)]
    pub extraction: ExtractionHints,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
}

impl ProviderDescriptor {
    /// Rejects descriptors the session controller could never drive.
    pub fn validate(&self) -> Result<(), AdapterError> {
        let fail = |what: String| -> Result<(), AdapterError> {
            Err(AdapterError::Message(format!("provider {:?}: {what}", self.key)))
        };
        if self.key.is_empty()
            || !self
                .key
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
        {
            return fail("key must be lower-case ascii".to_string());
        }
        if reqwest::Url::parse(&self.login_url).is_err() {
            return fail(format!("login_url {:?} is not absolute", self.login_url));
        }
        if self.login.identifier.is_empty() || self.login.password.is_empty() {
            return fail("login form needs identifier and password locators".to_string());
        }
        if self.reports.is_empty() {
            return fail("no report routes".to_string());
        }
        for locator in self.locators() {
            if let Locator::Css(raw) = locator {
                if let Err(e) = scraper::Selector::parse(raw) {
                    return fail(format!("selector {raw:?}: {e}"));
                }
            }
        }
        Ok(())
    }

    fn locators(&self) -> impl Iterator<Item = &Locator> {
        let login = [
            Some(&self.login.identifier),
            Some(&self.login.password),
            self.login.submit.as_ref(),
            Some(&self.signals.success),
            self.extraction.export.as_ref(),
        ];
        let steps = self
            .login
            .pre_steps
            .iter()
            .chain(self.reports.iter().flat_map(|r| r.steps.iter()))
            .filter_map(|step| match step {
                NavStep::Click { target, .. } | NavStep::Link { target, .. } | NavStep::WaitFor { target } => {
                    Some(target)
                }
                NavStep::Goto { .. } => None,
            });
        let periods = self.reports.iter().flat_map(|r| r.period.targets());
        login
            .into_iter()
            .flatten()
            .chain(steps)
            .chain(periods)
            .flat_map(|d| d.locators().iter())
    }
}

impl PeriodControl {
    fn targets(&self) -> Vec<&Discovery> {
        match self {
            PeriodControl::Fixed => Vec::new(),
            PeriodControl::SelectPairs {
                start_year,
                start_month,
                start_day,
                end_year,
                end_month,
                end_day,
                submit,
                ..
            } => [
                Some(start_year),
                Some(start_month),
                start_day.as_ref(),
                Some(end_year),
                Some(end_month),
                end_day.as_ref(),
                submit.as_ref(),
            ]
            .into_iter()
            .flatten()
            .collect(),
            PeriodControl::DateFields { start, end, submit, .. } => {
                [Some(start), Some(end), submit.as_ref()].into_iter().flatten().collect()
            }
            PeriodControl::Calendar {
                open,
                start,
                end,
                apply,
                ..
            } => vec![open, start, end, apply],
        }
    }
}

/// Fixed capability interface the session controller and orchestrator program against.
pub trait ProviderAdapter: Send + Sync {
    fn descriptor(&self) -> &ProviderDescriptor;

    fn key(&self) -> &str {
        &self.descriptor().key
    }

    fn display_name(&self) -> &str {
        &self.descriptor().display_name
    }

    fn login_url(&self) -> &str {
        &self.descriptor().login_url
    }

    fn login_form(&self) -> &LoginForm {
        &self.descriptor().login
    }

    fn signals(&self) -> &LoginSignals {
        &self.descriptor().signals
    }

    fn report_kind(&self) -> ReportKind {
        self.descriptor().report_kind
    }

    fn route(&self, kind: ReportKind, granularity: Granularity) -> Option<&ReportRoute> {
        self.descriptor()
            .reports
            .iter()
            .find(|r| r.kind == kind && r.granularity == granularity)
    }

    fn supports_granularity(&self, granularity: Granularity) -> bool {
        self.route(self.report_kind(), granularity).is_some()
    }

    /// Whether the report can be constrained to an arbitrary window.
    fn supports_period(&self, kind: ReportKind, granularity: Granularity) -> bool {
        self.route(kind, granularity)
            .is_some_and(|r| r.period != PeriodControl::Fixed)
    }

    fn max_lookback(&self, kind: ReportKind, granularity: Granularity) -> Option<Lookback> {
        self.route(kind, granularity).and_then(|r| r.max_lookback)
    }

    fn extraction_hints(&self) -> ExtractionHints {
        self.descriptor().extraction.clone()
    }

    /// The base identity with this provider's locale and timezone applied.
    fn context_profile(&self, base: &ContextProfile) -> ContextProfile {
        let descriptor = self.descriptor();
        ContextProfile {
            locale: descriptor.locale.clone().unwrap_or_else(|| base.locale.clone()),
            timezone: descriptor
                .timezone
                .clone()
                .unwrap_or_else(|| base.timezone.clone()),
            ..base.clone()
        }
    }

    fn matches_name(&self, name: &str) -> bool {
        let needle = name.trim().to_lowercase();
        let descriptor = self.descriptor();
        needle == descriptor.key
            || needle == descriptor.display_name.to_lowercase()
            || descriptor.name_patterns.iter().any(|p| needle.contains(p.as_str()))
    }
}

#[derive(Debug, Clone)]
pub struct DescriptorAdapter {
    descriptor: ProviderDescriptor,
}

impl DescriptorAdapter {
    pub fn new(descriptor: ProviderDescriptor) -> Self {
        Self { descriptor }
    }
}

impl ProviderAdapter for DescriptorAdapter {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }
}

fn css(selector: &str) -> Locator {
    Locator::css(selector)
}

fn text(label: &str) -> Locator {
    Locator::text(label)
}

fn discover(locators: impl IntoIterator<Item = Locator>) -> Discovery {
    Discovery::new(locators)
}

fn route(kind: ReportKind, granularity: Granularity, steps: Vec<NavStep>) -> ReportRoute {
    ReportRoute {
        kind,
        granularity,
        steps,
        period: PeriodControl::Fixed,
        max_lookback: None,
    }
}

fn signals_with(success: Discovery, success_texts: &[&str], url_contains: &[&str]) -> LoginSignals {
    let mut signals = LoginSignals {
        success,
        success_url_contains: strings(url_contains),
        ..LoginSignals::default()
    };
    signals.success_texts.extend(strings(success_texts));
    signals
}

pub fn a8net_descriptor() -> ProviderDescriptor {
    let report_menu = || {
        vec![
            NavStep::link(discover([text("レポート")]), Some("https://www.a8.net/as/report/")),
            NavStep::click(discover([text("成果報酬")])),
        ]
    };
    let mut daily = report_menu();
    daily.push(NavStep::click(discover([text("日別")])));
    let mut monthly = report_menu();
    monthly.push(NavStep::click(discover([text("月別")])));

    ProviderDescriptor {
        key: "a8net".to_string(),
        display_name: "A8.net".to_string(),
        name_patterns: strings(&["a8.net", "a8net"]),
        login_url: "https://www.a8.net/".to_string(),
        login: LoginForm {
            identifier: discover([css("input[name='login']"), css("input[type='text']")]),
            password: discover([css("input[name='passwd']"), css("input[type='password']")]),
            submit: Some(discover([
                css("input[type='submit'][value*='ログイン']"),
                text("ログイン"),
                Locator::Button(0),
            ])),
            pre_steps: Vec::new(),
        },
        signals: signals_with(Discovery::default(), &["マイページ", "レポート"], &["/as/"]),
        report_kind: ReportKind::Revenue,
        reports: vec![
            route(ReportKind::Revenue, Granularity::Daily, daily),
            route(ReportKind::Revenue, Granularity::Monthly, monthly),
        ],
        extraction: ExtractionHints::default(),
        locale: None,
        timezone: None,
    }
}

pub fn moshimo_descriptor() -> ProviderDescriptor {
    let export = Some(discover([text("CSVダウンロード")]));
    ProviderDescriptor {
        key: "moshimo".to_string(),
        display_name: "もしもアフィリエイト".to_string(),
        name_patterns: strings(&["もしも", "moshimo"]),
        login_url: "https://af.moshimo.com/af/shop/index".to_string(),
        login: LoginForm {
            identifier: discover([css("input[name='account']"), Locator::field("アカウント")]),
            password: discover([css("input[name='password']"), css("input[type='password']")]),
            submit: Some(discover([css("input[name='login']"), text("ログイン"), Locator::Button(0)])),
            pre_steps: Vec::new(),
        },
        signals: signals_with(Discovery::default(), &["売上レポート"], &[]),
        report_kind: ReportKind::Revenue,
        reports: vec![
            route(
                ReportKind::Revenue,
                Granularity::Daily,
                vec![NavStep::link(discover([text("売上レポート")]), None), NavStep::click(discover([text("日次")]))],
            ),
            route(
                ReportKind::Revenue,
                Granularity::Monthly,
                vec![NavStep::link(discover([text("売上レポート")]), None), NavStep::click(discover([text("月次")]))],
            ),
        ],
        extraction: ExtractionHints {
            export,
            ..ExtractionHints::default()
        },
        locale: None,
        timezone: None,
    }
}

pub fn afb_descriptor() -> ProviderDescriptor {
    let daily_url = "https://www.afi-b.com/pa/report/?r=daily";
    let daily = ReportRoute {
        period: PeriodControl::DateFields {
            start: discover([css("input[name='from']"), Locator::field("開始日")]),
            end: discover([css("input[name='to']"), Locator::field("終了日")]),
            format: "%Y/%m/%d".to_string(),
            submit: Some(discover([
                css("input[data-testid='daily-display-report']"),
                css("input.send_report"),
                text("レポート表示"),
            ])),
        },
        max_lookback: Some(Lookback::Months(3)),
        ..route(
            ReportKind::Revenue,
            Granularity::Daily,
            vec![
                NavStep::link(discover([text("レポート")]), Some(daily_url)),
                NavStep::optional_click(discover([
                    css("a[href*='#tab_btn_top'][title='日別レポート']"),
                    text("日別"),
                ])),
            ],
        )
    };
    ProviderDescriptor {
        key: "afb".to_string(),
        display_name: "afb".to_string(),
        name_patterns: strings(&["afb", "afi-b", "アフィb"]),
        login_url: "https://www.afi-b.com/".to_string(),
        login: LoginForm {
            identifier: discover([css("#formPartnerId"), css("input[type='text']")]),
            password: discover([css("#formPartnerPassword"), css("input[type='password']")]),
            submit: Some(discover([
                css("form button[type='submit']"),
                css("input[type='submit']"),
                Locator::Button(0),
            ])),
            pre_steps: Vec::new(),
        },
        signals: signals_with(Discovery::default(), &["マイページ"], &["/pa/"]),
        report_kind: ReportKind::Revenue,
        reports: vec![daily],
        extraction: ExtractionHints {
            skip_breakdown_rows: true,
            ..ExtractionHints::default()
        },
        locale: None,
        timezone: None,
    }
}

pub fn felmat_descriptor() -> ProviderDescriptor {
    let daily = ReportRoute {
        period: PeriodControl::DateFields {
            start: discover([css("input[name='start_date']"), Locator::field("開始")]),
            end: discover([css("input[name='end_date']"), Locator::field("終了")]),
            format: "%Y-%m-%d".to_string(),
            submit: Some(discover([text("上記条件で一覧を抽出"), text("抽出")])),
        },
        max_lookback: Some(Lookback::Days(31)),
        ..route(
            ReportKind::Revenue,
            Granularity::Daily,
            vec![
                NavStep::link(discover([text("レポート")]), None),
                NavStep::click(discover([text("日別")])),
            ],
        )
    };
    ProviderDescriptor {
        key: "felmat".to_string(),
        display_name: "felmat".to_string(),
        name_patterns: strings(&["felmat", "フェルマ"]),
        login_url: "https://www.felmat.net/publisher/login".to_string(),
        login: LoginForm {
            identifier: discover([
                css("input[name='p_username']"),
                css("input[name='login_id']"),
                css("input[type='text']"),
            ]),
            password: discover([
                css("input[name='p_password']"),
                css("input[name='password']"),
                css("input[type='password']"),
            ]),
            submit: Some(discover([css("button[type='submit']"), css("input[type='submit']")])),
            pre_steps: Vec::new(),
        },
        signals: signals_with(Discovery::default(), &["レポート"], &[]),
        report_kind: ReportKind::Revenue,
        reports: vec![daily],
        extraction: ExtractionHints {
            export: Some(discover([text("上記条件でCSVダウンロード")])),
            ..ExtractionHints::default()
        },
        locale: None,
        timezone: None,
    }
}

pub fn accesstrade_descriptor() -> ProviderDescriptor {
    let daily_url = "https://member.accesstrade.net/atv3/report/daily.html";
    let monthly_url = "https://member.accesstrade.net/atv3/report/monthly.html";
    ProviderDescriptor {
        key: "accesstrade".to_string(),
        display_name: "アクセストレード".to_string(),
        name_patterns: strings(&["accesstrade", "アクセストレード"]),
        login_url: "https://www.accesstrade.ne.jp/".to_string(),
        login: LoginForm {
            identifier: discover([css("input[name='userId']"), Locator::field("ユーザーID")]),
            password: discover([css("input[name='userPass']"), css("input[type='password']")]),
            submit: None,
            pre_steps: Vec::new(),
        },
        signals: signals_with(Discovery::default(), &[], &["member.accesstrade.net"]),
        report_kind: ReportKind::Revenue,
        reports: vec![
            route(
                ReportKind::Revenue,
                Granularity::Daily,
                vec![NavStep::link(discover([text("日別レポート")]), Some(daily_url))],
            ),
            route(
                ReportKind::Revenue,
                Granularity::Monthly,
                vec![NavStep::link(discover([text("月別レポート")]), Some(monthly_url))],
            ),
        ],
        extraction: ExtractionHints::default(),
        locale: None,
        timezone: None,
    }
}

pub fn linkag_descriptor() -> ProviderDescriptor {
    ProviderDescriptor {
        key: "linkag".to_string(),
        display_name: "Link-AG".to_string(),
        name_patterns: strings(&["link-ag", "linkag", "リンクエージ"]),
        login_url: "https://link-ag.net/".to_string(),
        login: LoginForm {
            identifier: discover([css("input[name='partner_user[login_id]']")]),
            password: discover([css("input[name='partner_user[password]']")]),
            submit: Some(discover([css("input[name='commit']"), Locator::Button(0)])),
            pre_steps: Vec::new(),
        },
        signals: signals_with(Discovery::default(), &["レポート"], &["partner"]),
        report_kind: ReportKind::Revenue,
        reports: vec![route(
            ReportKind::Revenue,
            Granularity::Daily,
            vec![
                NavStep::link(discover([text("レポート")]), None),
                NavStep::click(discover([text("日別")])),
            ],
        )],
        extraction: ExtractionHints::default(),
        locale: None,
        timezone: None,
    }
}

pub fn webridge_descriptor() -> ProviderDescriptor {
    let select_pairs = || PeriodControl::SelectPairs {
        start_year: discover([css("select[name='search_start_year']")]),
        start_month: discover([css("select[name='search_start_month']")]),
        start_day: Some(discover([css("select[name='search_start_day']")])),
        end_year: discover([css("select[name='search_end_year']")]),
        end_month: discover([css("select[name='search_end_month']")]),
        end_day: Some(discover([css("select[name='search_end_day']")])),
        zero_pad: false,
        submit: Some(discover([text("検索実行"), text("検索")])),
    };
    let steps = |label: &str, url: &str| {
        vec![
            NavStep::optional_click(discover([text("詳細レポート")])),
            NavStep::link(discover([text(label)]), Some(url)),
            NavStep::optional_click(discover([text("条件を追加して検索")])),
        ]
    };
    ProviderDescriptor {
        key: "webridge".to_string(),
        display_name: "Webridge".to_string(),
        name_patterns: strings(&["webridge"]),
        login_url: "https://mobile.webridge.co.jp/login".to_string(),
        login: LoginForm {
            identifier: discover([css("input[name='loginUser']")]),
            password: discover([css("input[name='loginPassword']")]),
            submit: Some(discover([text("ログイン"), Locator::Button(0)])),
            pre_steps: Vec::new(),
        },
        signals: signals_with(discover([text("ホーム")]), &[], &[]),
        report_kind: ReportKind::Revenue,
        reports: vec![
            ReportRoute {
                period: select_pairs(),
                max_lookback: Some(Lookback::Months(12)),
                ..route(
                    ReportKind::Revenue,
                    Granularity::Daily,
                    steps("日別", "https://mobile.webridge.co.jp/report/daily"),
                )
            },
            ReportRoute {
                period: select_pairs(),
                max_lookback: Some(Lookback::Months(12)),
                ..route(
                    ReportKind::Revenue,
                    Granularity::Monthly,
                    steps("月別", "https://mobile.webridge.co.jp/report/monthly"),
                )
            },
        ],
        extraction: ExtractionHints {
            export: Some(discover([text("CSVダウンロード")])),
            ..ExtractionHints::default()
        },
        locale: None,
        timezone: None,
    }
}

pub fn builtin_descriptors() -> Vec<ProviderDescriptor> {
    vec![
        a8net_descriptor(),
        moshimo_descriptor(),
        afb_descriptor(),
        felmat_descriptor(),
        accesstrade_descriptor(),
        linkag_descriptor(),
        webridge_descriptor(),
    ]
}

pub fn adapter_for_provider(key: &str) -> Option<Box<dyn ProviderAdapter>> {
    let descriptor = match key {
        "a8net" => a8net_descriptor(),
        "moshimo" => moshimo_descriptor(),
        "afb" => afb_descriptor(),
        "felmat" => felmat_descriptor(),
        "accesstrade" => accesstrade_descriptor(),
        "linkag" => linkag_descriptor(),
        "webridge" => webridge_descriptor(),
        _ => return None,
    };
    Some(Box::new(DescriptorAdapter::new(descriptor)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_builtin_is_registered_under_its_key() {
        for descriptor in builtin_descriptors() {
            descriptor.validate().unwrap();
            let adapter = adapter_for_provider(&descriptor.key).expect("registered");
            assert_eq!(adapter.descriptor(), &descriptor);
            assert!(adapter.supports_granularity(Granularity::Daily), "{}", descriptor.key);
            assert!(!descriptor.login.identifier.is_empty());
        }
        assert!(adapter_for_provider("unknown").is_none());
    }

    #[test]
    fn period_capability_follows_the_route() {
        let a8 = adapter_for_provider("a8net").unwrap();
        assert!(!a8.supports_period(ReportKind::Revenue, Granularity::Daily));
        let webridge = adapter_for_provider("webridge").unwrap();
        assert!(webridge.supports_period(ReportKind::Revenue, Granularity::Monthly));
        assert_eq!(
            webridge.max_lookback(ReportKind::Revenue, Granularity::Monthly),
            Some(Lookback::Months(12))
        );
    }

    #[test]
    fn broken_selectors_are_rejected() {
        let mut descriptor = a8net_descriptor();
        descriptor.login.identifier = Discovery::from(Locator::css("input[name="));
        let err = descriptor.validate().unwrap_err().to_string();
        assert!(err.contains("a8net"), "{err}");

        let mut descriptor = a8net_descriptor();
        descriptor.reports.clear();
        assert!(descriptor.validate().is_err());
    }

    #[test]
    fn names_match_keys_display_names_and_patterns() {
        let moshimo = adapter_for_provider("moshimo").unwrap();
        assert!(moshimo.matches_name("もしもアフィリエイト"));
        assert!(moshimo.matches_name("Moshimo"));
        assert!(!moshimo.matches_name("A8.net"));
    }

    #[test]
    fn provider_locale_overrides_the_base_profile() {
        let mut descriptor = linkag_descriptor();
        descriptor.locale = Some("en-US".to_string());
        let adapter = DescriptorAdapter::new(descriptor);
        let profile = adapter.context_profile(&ContextProfile::default());
        assert_eq!(profile.locale, "en-US");
        assert_eq!(profile.timezone, "Asia/Tokyo");
    }

    #[test]
    fn descriptors_round_trip_through_yaml_shaped_json() {
        let json = serde_json::to_string(&webridge_descriptor()).unwrap();
        let back: ProviderDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(back, webridge_descriptor());
    }
}
