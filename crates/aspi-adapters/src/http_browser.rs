//! Cookie-carrying HTTP driver that reads pages with `scraper`.
//!
//! There is no script engine: links are followed, forms are serialized and
//! submitted the way a browser would, and same-origin frames are fetched for
//! their tables. Portals that need JavaScript to render get a clear
//! `Unsupported` error instead of a silent empty page.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_LANGUAGE, CONTENT_DISPOSITION, CONTENT_TYPE};
use reqwest::{Client, Method, RequestBuilder, Response, Url};
use std::time::Duration;
use tracing::debug;

use crate::browser::{BrowserDriver, ContextProfile, Download, DriverError, Locator, PageCapture, PageSession};
use crate::dom::{self, ElementInfo, FormInfo};
use crate::extract::TableSnapshot;

#[derive(Debug, Clone, Default)]
pub struct HttpBrowser;

impl HttpBrowser {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BrowserDriver for HttpBrowser {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn launch(&self, profile: &ContextProfile) -> Result<Box<dyn PageSession>, DriverError> {
        let mut headers = HeaderMap::new();
        let language = HeaderValue::from_str(&profile.accept_language())
            .map_err(|e| DriverError::Launch(format!("accept-language: {e}")))?;
        headers.insert(ACCEPT_LANGUAGE, language);
        let client = Client::builder()
            .user_agent(profile.user_agent.clone())
            .default_headers(headers)
            .cookie_store(true)
            .gzip(true)
            .brotli(true)
            .timeout(profile.timeout)
            .build()
            .map_err(|e| DriverError::Launch(e.to_string()))?;
        debug!(timezone = %profile.timezone, "http context has no clock; timezone recorded only");
        Ok(Box::new(HttpPage::new(client, profile.timeout)))
    }
}

/// One live document plus the form edits made on it.
pub struct HttpPage {
    client: Client,
    timeout: Duration,
    url: Option<Url>,
    html: String,
    /// Field values set by `fill`/`select_option` since the document loaded.
    overrides: Vec<(String, String)>,
    closed: bool,
}

fn map_request_error(err: reqwest::Error, url: &str, after: Duration) -> DriverError {
    if err.is_timeout() {
        DriverError::Timeout {
            what: url.to_string(),
            after,
        }
    } else {
        DriverError::Navigation(format!("{url}: {err}"))
    }
}

fn file_name(response: &Response) -> Option<String> {
    let from_header = response
        .headers()
        .get(CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(disposition_file_name);
    from_header.or_else(|| {
        response
            .url()
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}

fn disposition_file_name(header: &str) -> Option<String> {
    header
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("filename="))
        .map(|name| name.trim_matches('"').to_string())
        .filter(|name| !name.is_empty())
}

/// Form fields with edits applied and the submitter appended.
fn form_payload(
    form: &FormInfo,
    overrides: &[(String, String)],
    submitter: Option<(String, String)>,
) -> Vec<(String, String)> {
    let mut fields: Vec<(String, String)> = form
        .fields
        .iter()
        .map(|(name, value)| {
            let edited = overrides
                .iter()
                .rev()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.clone());
            (name.clone(), edited.unwrap_or_else(|| value.clone()))
        })
        .collect();
    fields.extend(submitter);
    fields
}

fn same_origin(a: &Url, b: &Url) -> bool {
    a.origin() == b.origin()
}

impl HttpPage {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self {
            client,
            timeout,
            url: None,
            html: String::new(),
            overrides: Vec::new(),
            closed: false,
        }
    }

    fn ensure_open(&self) -> Result<(), DriverError> {
        if self.closed {
            Err(DriverError::Closed)
        } else {
            Ok(())
        }
    }

    fn resolve(&self, target: &str) -> Result<Url, DriverError> {
        let parsed = match &self.url {
            Some(base) => base.join(target),
            None => Url::parse(target),
        };
        parsed.map_err(|e| DriverError::Navigation(format!("{target}: {e}")))
    }

    fn first(&self, locator: &Locator) -> Result<ElementInfo, DriverError> {
        dom::locate(&self.html, locator)?
            .into_iter()
            .next()
            .ok_or_else(|| DriverError::ElementNotFound(locator.to_string()))
    }

    fn set_override(&mut self, name: String, value: String) {
        self.overrides.retain(|(n, _)| n != &name);
        self.overrides.push((name, value));
    }

    /// The request activating `element` would send.
    fn activation(&self, element: &ElementInfo, locator: &Locator) -> Result<RequestBuilder, DriverError> {
        if !element.enabled {
            return Err(DriverError::ElementNotFound(format!("{locator} is disabled")));
        }
        if element.submits_form() {
            if let Some(form) = &element.form {
                return self.submission(form, element.submitter());
            }
        }
        match element.href.as_deref() {
            Some(href) if !href.starts_with("javascript:") && !href.starts_with('#') => {
                let url = self.resolve(href)?;
                Ok(self.client.get(url))
            }
            _ => Err(DriverError::Unsupported(format!(
                "{locator} needs script to activate"
            ))),
        }
    }

    fn submission(&self, form: &FormInfo, submitter: Option<(String, String)>) -> Result<RequestBuilder, DriverError> {
        let mut action = match form.action.as_deref().filter(|a| !a.trim().is_empty()) {
            Some(action) => self.resolve(action)?,
            None => self
                .url
                .clone()
                .ok_or_else(|| DriverError::Navigation("form on a page without url".to_string()))?,
        };
        let payload = form_payload(form, &self.overrides, submitter);
        if form.method == Method::POST.as_str() {
            Ok(self.client.post(action).form(&payload))
        } else {
            action.query_pairs_mut().clear().extend_pairs(&payload);
            Ok(self.client.get(action))
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, DriverError> {
        let request = request
            .build()
            .map_err(|e| DriverError::Navigation(e.to_string()))?;
        let url = request.url().to_string();
        let response = self
            .client
            .execute(request)
            .await
            .map_err(|e| map_request_error(e, &url, self.timeout))?;
        let status = response.status();
        if !status.is_success() {
            return Err(DriverError::Http {
                status: status.as_u16(),
                url: response.url().to_string(),
            });
        }
        Ok(response)
    }

    async fn load(&mut self, request: RequestBuilder) -> Result<(), DriverError> {
        let response = self.send(request).await?;
        let url = response.url().clone();
        let html = response
            .text()
            .await
            .map_err(|e| map_request_error(e, url.as_str(), self.timeout))?;
        debug!(url = %url, bytes = html.len(), "page loaded");
        self.url = Some(url);
        self.html = html;
        self.overrides.clear();
        Ok(())
    }

    async fn frame_tables(&self) -> Vec<TableSnapshot> {
        let Some(base) = &self.url else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for src in dom::frame_sources(&self.html) {
            let Ok(frame_url) = base.join(&src) else {
                continue;
            };
            if !same_origin(base, &frame_url) {
                debug!(frame = %frame_url, "skipping cross-origin frame");
                continue;
            }
            let html = match self.send(self.client.get(frame_url.clone())).await {
                Ok(response) => response.text().await.unwrap_or_default(),
                Err(err) => {
                    debug!(frame = %frame_url, error = %err, "frame could not be loaded");
                    continue;
                }
            };
            out.extend(dom::tables(&html, frame_url.as_str()));
        }
        out
    }
}

#[async_trait]
impl PageSession for HttpPage {
    async fn goto(&mut self, url: &str) -> Result<(), DriverError> {
        self.ensure_open()?;
        let url = self.resolve(url)?;
        let request = self.client.get(url);
        self.load(request).await
    }

    fn current_url(&self) -> String {
        self.url.as_ref().map(Url::to_string).unwrap_or_default()
    }

    async fn count(&mut self, locator: &Locator) -> Result<usize, DriverError> {
        self.ensure_open()?;
        dom::count(&self.html, locator)
    }

    async fn is_enabled(&mut self, locator: &Locator) -> Result<bool, DriverError> {
        self.ensure_open()?;
        Ok(self.first(locator)?.enabled)
    }

    async fn fill(&mut self, locator: &Locator, value: &str) -> Result<(), DriverError> {
        self.ensure_open()?;
        let element = self.first(locator)?;
        if !element.is_text_control() {
            return Err(DriverError::ElementNotFound(format!("{locator} is not a text field")));
        }
        let name = element
            .name
            .ok_or_else(|| DriverError::Unsupported(format!("{locator} has no name to submit")))?;
        self.set_override(name, value.to_string());
        Ok(())
    }

    async fn select_option(&mut self, locator: &Locator, value: &str) -> Result<(), DriverError> {
        self.ensure_open()?;
        let element = self.first(locator)?;
        if element.tag != "select" {
            return Err(DriverError::ElementNotFound(format!("{locator} is not a select box")));
        }
        let option = element
            .option_value(value)
            .ok_or_else(|| DriverError::ElementNotFound(format!("option {value} in {locator}")))?;
        let name = element
            .name
            .ok_or_else(|| DriverError::Unsupported(format!("{locator} has no name to submit")))?;
        self.set_override(name, option);
        Ok(())
    }

    async fn click(&mut self, locator: &Locator) -> Result<(), DriverError> {
        self.ensure_open()?;
        let element = self.first(locator)?;
        let request = self.activation(&element, locator)?;
        self.load(request).await
    }

    async fn press_enter(&mut self, locator: &Locator) -> Result<(), DriverError> {
        self.ensure_open()?;
        let element = self.first(locator)?;
        let form = element
            .form
            .ok_or_else(|| DriverError::Unsupported(format!("{locator} is not inside a form")))?;
        let request = self.submission(&form, form.default_submitter.clone())?;
        self.load(request).await
    }

    async fn body_text(&mut self) -> Result<String, DriverError> {
        self.ensure_open()?;
        Ok(dom::body_text(&self.html))
    }

    async fn tables(&mut self) -> Result<Vec<TableSnapshot>, DriverError> {
        self.ensure_open()?;
        let mut tables = dom::tables(&self.html, &self.current_url());
        tables.extend(self.frame_tables().await);
        Ok(tables)
    }

    async fn download(&mut self, locator: &Locator) -> Result<Download, DriverError> {
        self.ensure_open()?;
        let element = self.first(locator)?;
        let request = self.activation(&element, locator)?;
        let response = self.send(request).await?;
        let file_name = file_name(&response);
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let url = response.url().to_string();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| map_request_error(e, &url, self.timeout))?
            .to_vec();
        Ok(Download {
            file_name,
            content_type,
            bytes,
        })
    }

    async fn capture(&mut self) -> Result<PageCapture, DriverError> {
        Ok(PageCapture {
            url: self.current_url(),
            extension: "html".to_string(),
            bytes: self.html.clone().into_bytes(),
        })
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        self.closed = true;
        self.html.clear();
        self.overrides.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn disposition_names_are_unquoted() {
        assert_eq!(
            disposition_file_name(r#"attachment; filename="report_202510.csv""#),
            Some("report_202510.csv".to_string())
        );
        assert_eq!(disposition_file_name("inline"), None);
    }

    #[test]
    fn payload_applies_edits_and_submitter() {
        let form = FormInfo {
            action: Some("/session".to_string()),
            method: "POST".to_string(),
            fields: vec![
                ("login".to_string(), String::new()),
                ("passwd".to_string(), String::new()),
                ("token".to_string(), "abc".to_string()),
            ],
            default_submitter: Some(("go".to_string(), "ログイン".to_string())),
        };
        let overrides = vec![
            ("login".to_string(), "alice".to_string()),
            ("passwd".to_string(), "s3cret".to_string()),
            ("unrelated".to_string(), "x".to_string()),
        ];
        let payload = form_payload(&form, &overrides, form.default_submitter.clone());
        assert_eq!(
            payload,
            vec![
                ("login".to_string(), "alice".to_string()),
                ("passwd".to_string(), "s3cret".to_string()),
                ("token".to_string(), "abc".to_string()),
                ("go".to_string(), "ログイン".to_string()),
            ]
        );
    }

    const LOGIN: &str = r#"<html><body>
        <form action="/session" method="post">
          <input type="hidden" name="token" value="t1">
          <input name="login" type="text"><input name="passwd" type="password">
          <input type="submit" name="go" value="ログイン">
        </form></body></html>"#;

    const HOME: &str = r#"<html><body><a href="/logout">ログアウト</a>
        <a href="/report?r=daily">日別レポート</a></body></html>"#;

    const REPORT: &str = r#"<html><body>
        <form action="/report" method="get">
          <select name="y"><option value="2024">2024年</option><option value="2025" selected>2025年</option></select>
          <select name="m"><option value="1">1月</option><option value="10" selected>10月</option></select>
          <input type="submit" value="表示">
        </form>
        <iframe src="/frame"></iframe>
        <iframe src="https://elsewhere.test/frame"></iframe>
        </body></html>"#;

    const FRAME: &str = r#"<html><body><table>
        <tr><th>日付</th><th>報酬</th></tr>
        <tr><td>2025/10/01</td><td>¥1,000</td></tr>
        </table></body></html>"#;

    /// Serves canned pages over plain HTTP/1.1 and records request lines.
    async fn serve() -> (String, tokio::sync::mpsc::UnboundedReceiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let tx = tx.clone();
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 16 * 1024];
                    let mut read = 0;
                    let request = loop {
                        let n = socket.read(&mut buf[read..]).await.unwrap_or(0);
                        if n == 0 {
                            return;
                        }
                        read += n;
                        let text = String::from_utf8_lossy(&buf[..read]).to_string();
                        if let Some(end) = text.find("\r\n\r\n") {
                            let length = text[..end]
                                .lines()
                                .find_map(|l| l.to_ascii_lowercase().strip_prefix("content-length:").map(|v| v.trim().to_string()))
                                .and_then(|v| v.parse::<usize>().ok())
                                .unwrap_or(0);
                            if read >= end + 4 + length {
                                break text;
                            }
                        }
                    };
                    let first = request.lines().next().unwrap_or_default().to_string();
                    let body = request.split("\r\n\r\n").nth(1).unwrap_or_default().to_string();
                    let _ = tx.send(format!("{first} {body}").trim().to_string());
                    let path = first.split_whitespace().nth(1).unwrap_or("/");
                    let (status, page, extra) = match path {
                        "/login" => ("200 OK", LOGIN, ""),
                        "/session" => ("200 OK", HOME, "Set-Cookie: sid=42; Path=/\r\n"),
                        p if p.starts_with("/report") => {
                            if request.contains("sid=42") {
                                ("200 OK", REPORT, "")
                            } else {
                                ("403 Forbidden", "", "")
                            }
                        }
                        "/frame" => ("200 OK", FRAME, ""),
                        _ => ("404 Not Found", "", ""),
                    };
                    let response = format!(
                        "HTTP/1.1 {status}\r\nContent-Type: text/html; charset=utf-8\r\n{extra}Content-Length: {}\r\nConnection: close\r\n\r\n{page}",
                        page.len()
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                });
            }
        });
        (base, rx)
    }

    #[tokio::test]
    async fn login_form_round_trip_keeps_cookies_and_reads_frames() {
        let (base, mut requests) = serve().await;
        let mut page = HttpBrowser::new()
            .launch(&ContextProfile::default())
            .await
            .unwrap();

        page.goto(&format!("{base}/login")).await.unwrap();
        page.fill(&Locator::css("input[name=login]"), "alice").await.unwrap();
        page.fill(&Locator::field("passwd"), "s3cret").await.unwrap();
        page.click(&Locator::text("ログイン")).await.unwrap();
        assert!(page.body_text().await.unwrap().contains("ログアウト"));

        page.click(&Locator::text("日別レポート")).await.unwrap();
        page.select_option(&Locator::css("select[name=m]"), "9").await.unwrap_err();
        page.select_option(&Locator::css("select[name=m]"), "1").await.unwrap();
        page.select_option(&Locator::css("select[name=y]"), "2024").await.unwrap();
        page.click(&Locator::Button(0)).await.unwrap();
        assert!(page.current_url().contains("y=2024&m=1"), "{}", page.current_url());

        let tables = page.tables().await.unwrap();
        assert_eq!(tables.len(), 1);
        assert!(tables[0].source.ends_with("/frame"));
        assert_eq!(tables[0].rows, vec![vec!["2025/10/01".to_string(), "¥1,000".to_string()]]);

        page.close().await.unwrap();
        assert_eq!(page.goto(&format!("{base}/login")).await, Err(DriverError::Closed));

        let mut seen = Vec::new();
        while let Ok(line) = requests.try_recv() {
            seen.push(line);
        }
        assert!(seen
            .iter()
            .any(|l| l.starts_with("POST /session") && l.contains("login=alice") && l.contains("token=t1")));
    }

    #[tokio::test]
    async fn error_statuses_surface_as_http_errors() {
        let (base, _requests) = serve().await;
        let mut page = HttpBrowser::new()
            .launch(&ContextProfile::default())
            .await
            .unwrap();
        let err = page.goto(&format!("{base}/report")).await.unwrap_err();
        assert!(matches!(err, DriverError::Http { status: 403, .. }));
        assert!(!err.is_transient());
    }
}
