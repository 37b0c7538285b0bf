//! Heuristic revenue-table extraction.
//!
//! [`extract_records`] works on plain [`TableSnapshot`]s so the column and row
//! heuristics can be exercised without a live page. [`ReportCursor`] wires it
//! to a session: it pages through the report, guards against pagination loops
//! and resumes after transient failures.

use std::collections::HashSet;
use std::sync::OnceLock;

use aspi_core::RawRecord;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::browser::{Discovery, DriverError, Locator};
use crate::session::{Fault, SessionController, SessionError, SessionState};

/// Rows of cell text lifted from one table-like element.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSnapshot {
    /// URL of the page or frame the table came from.
    pub source: String,
    pub index: usize,
    pub visible: bool,
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl TableSnapshot {
    pub fn new(header: &[&str], rows: &[&[&str]]) -> Self {
        Self {
            source: String::new(),
            index: 0,
            visible: true,
            header: header.iter().map(|s| s.to_string()).collect(),
            rows: rows
                .iter()
                .map(|r| r.iter().map(|s| s.to_string()).collect())
                .collect(),
        }
    }
}

pub const DEFAULT_REVENUE_KEYWORDS: [&str; 10] = [
    "成果報酬", "報酬", "確定", "売上", "reward", "commission", "revenue", "earnings", "金額", "amount",
];

/// The two capability hints a provider may give the engine, plus pagination/export controls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionHints {
    /// Header keywords identifying the revenue column, highest priority first.
    pub revenue_keywords: Vec<String>,
    /// Drop device/channel sub-rows (PC, SP, iOS, ...) to avoid double counting.
    pub skip_breakdown_rows: bool,
    pub next_page: Discovery,
    /// Control that downloads the report as CSV. Preferred over the HTML table when present.
    pub export: Option<Discovery>,
    pub max_pages: usize,
}

impl Default for ExtractionHints {
    fn default() -> Self {
        Self {
            revenue_keywords: DEFAULT_REVENUE_KEYWORDS.iter().map(|s| s.to_string()).collect(),
            skip_breakdown_rows: false,
            next_page: Discovery::new([
                Locator::css("a[rel=next]"),
                Locator::text("次へ"),
                Locator::text("次のページ"),
                Locator::text("Next"),
            ]),
            export: None,
            max_pages: 50,
        }
    }
}

fn date_cell_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?x)^\s*(?:
                [0-9０-９]{4}\s*[/\-.年]\s*[0-9０-９]{1,2}(?:\s*[/\-.月]\s*[0-9０-９]{1,2}\s*日?|\s*月)?
              | (?:19|20)[0-9]{2}(?:0[1-9]|1[0-2])(?:0[1-9]|[12][0-9]|3[01])?
              | [0-9０-９]{1,2}\s*[/月]\s*[0-9０-９]{1,2}\s*日?
            )\s*(?:[(（][^)）]{1,3}[)）])?\s*$",
        )
        .expect("static regex")
    })
}

fn currency_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\s*\(?\s*[¥￥$]?\s*[-−▲△]?\s*[¥￥$]?\s*[0-9０-９][0-9０-９,，]*(?:[.．][0-9０-９]+)?\s*\)?\s*(?:円|JPY|USD|yen)?\s*\)?\s*$",
        )
        .expect("static regex")
    })
}

const DATE_HEADER_LABELS: [&str; 11] = [
    "日付", "年月日", "年月", "対象日", "対象月", "期間", "日別", "月別", "date", "day", "month",
];
const COUNT_HEADER_MARKERS: [&str; 9] = ["件数", "件", "数", "率", "count", "click", "rate", "cvr", "ctr"];
const TOTAL_MARKERS: [&str; 6] = ["合計", "小計", "総計", "grand total", "subtotal", "total"];
const BREAKDOWN_MARKERS: [&str; 17] = [
    "pc", "sp", "スマホ", "スマートフォン", "smartphone", "mobile", "モバイル", "ios", "android",
    "タブレット", "tablet", "desktop", "デスクトップ", "アプリ", "app", "web", "その他",
];

pub fn is_date_cell(text: &str) -> bool {
    date_cell_re().is_match(text)
}

fn is_currency_like(text: &str) -> bool {
    currency_re().is_match(text)
}

fn is_zero_amount(text: &str) -> bool {
    text.chars()
        .filter(|c| c.is_ascii_digit() || ('０'..='９').contains(c))
        .all(|c| c == '0' || c == '０')
}

fn is_total_marker(cell: &str, label: bool) -> bool {
    let cell = cell.trim().trim_end_matches([':', '：']).trim_end().to_lowercase();
    if cell == "計" || TOTAL_MARKERS.iter().any(|m| cell == *m) {
        return true;
    }
    label && TOTAL_MARKERS.iter().any(|m| cell.starts_with(m))
}

/// A whole-cell total marker anywhere, or a leading label such as "合計(税込)".
fn is_total_row(row: &[String]) -> bool {
    let label = row.iter().position(|c| !c.trim().is_empty());
    row.iter()
        .enumerate()
        .any(|(idx, cell)| is_total_marker(cell, Some(idx) == label))
}

fn is_breakdown_marker(cell: &str) -> bool {
    let cell = cell
        .trim()
        .trim_start_matches(['└', '┗', '・', '-', ' '])
        .trim()
        .to_lowercase();
    BREAKDOWN_MARKERS.iter().any(|m| cell == *m)
}

fn is_date_header(label: &str) -> bool {
    let label = label.trim().to_lowercase();
    label == "日" || label == "月" || DATE_HEADER_LABELS.iter().any(|l| label.contains(l))
}

fn is_count_header(label: &str) -> bool {
    let label = label.to_lowercase();
    COUNT_HEADER_MARKERS.iter().any(|m| label.contains(m))
}

/// Header row, promoting the first body row when the table has no `<th>` row.
fn split_header<'a>(table: &'a TableSnapshot, hints: &ExtractionHints) -> (&'a [String], &'a [Vec<String>]) {
    if !table.header.is_empty() {
        return (table.header.as_slice(), table.rows.as_slice());
    }
    let Some((first, rest)) = table.rows.split_first() else {
        return (&[], &[]);
    };
    let has_date = first.iter().any(|c| is_date_cell(c));
    let labelled = first.iter().any(|c| {
        is_date_header(c)
            || hints
                .revenue_keywords
                .iter()
                .any(|k| c.to_lowercase().contains(&k.to_lowercase()))
    });
    if !has_date && labelled {
        (first.as_slice(), rest)
    } else {
        (&[], table.rows.as_slice())
    }
}

fn date_column(header: &[String], body: &[Vec<String>]) -> Option<usize> {
    for row in body.iter().take(3) {
        if let Some(idx) = row.iter().position(|c| is_date_cell(c)) {
            return Some(idx);
        }
    }
    header.iter().position(|h| is_date_header(h))
}

fn revenue_column(header: &[String], date_col: usize, keywords: &[String]) -> Option<usize> {
    keywords.iter().find_map(|keyword| {
        let keyword = keyword.to_lowercase();
        header.iter().enumerate().find_map(|(idx, label)| {
            (idx != date_col && label.to_lowercase().contains(&keyword) && !is_count_header(label))
                .then_some(idx)
        })
    })
}

/// Right-most non-zero currency-like cell; a zero amount only if nothing else qualifies.
fn fallback_amount(row: &[String], date_col: usize) -> Option<&str> {
    let mut zero = None;
    for (idx, cell) in row.iter().enumerate().rev() {
        if idx == date_col || !is_currency_like(cell) {
            continue;
        }
        if !is_zero_amount(cell) {
            return Some(cell.trim());
        }
        zero.get_or_insert(cell.trim());
    }
    zero
}

fn extract_from_table(table: &TableSnapshot, hints: &ExtractionHints) -> Vec<RawRecord> {
    let (header, body) = split_header(table, hints);
    if body.is_empty() {
        return Vec::new();
    }
    let Some(date_col) = date_column(header, body) else {
        return Vec::new();
    };
    let revenue_col = revenue_column(header, date_col, &hints.revenue_keywords);

    body.iter()
        .filter_map(|row| {
            let date_text = row.get(date_col)?.trim();
            if !is_date_cell(date_text) {
                return None;
            }
            if is_total_row(row) {
                return None;
            }
            if hints.skip_breakdown_rows && row.iter().any(|c| is_breakdown_marker(c)) {
                return None;
            }
            let aligned = row.len() >= header.len();
            let keyed = revenue_col
                .filter(|_| aligned)
                .and_then(|idx| row.get(idx))
                .map(|c| c.trim())
                .filter(|c| !c.is_empty());
            let amount = keyed.or_else(|| fallback_amount(row, date_col)).unwrap_or_default();
            Some(RawRecord::new(date_text, amount))
        })
        .collect()
}

/// Runs the heuristics over every candidate; the first visible table yielding rows wins.
pub fn extract_records(tables: &[TableSnapshot], hints: &ExtractionHints) -> Vec<RawRecord> {
    for table in tables.iter().filter(|t| t.visible) {
        let records = extract_from_table(table, hints);
        if !records.is_empty() {
            debug!(source = %table.source, index = table.index, rows = records.len(), "matched report table");
            return records;
        }
    }
    Vec::new()
}

/// Parses an exported CSV into a snapshot; the first record becomes the header.
pub fn table_from_csv(bytes: &[u8], source: &str) -> Result<TableSnapshot, csv::Error> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    let text = String::from_utf8_lossy(bytes);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(|c| c.trim().to_string()).collect::<Vec<_>>());
    }
    let header = if rows.is_empty() { Vec::new() } else { rows.remove(0) };
    Ok(TableSnapshot {
        source: source.to_string(),
        index: 0,
        visible: true,
        header,
        rows,
    })
}

fn fingerprint(tables: &[TableSnapshot]) -> String {
    let mut hasher = Sha256::new();
    for table in tables {
        for row in std::iter::once(&table.header).chain(table.rows.iter()) {
            for cell in row {
                hasher.update(cell.as_bytes());
                hasher.update([0x1f]);
            }
            hasher.update([0x1e]);
        }
        hasher.update([0x1d]);
    }
    hex::encode(hasher.finalize())
}

/// Lazy, single-use walk over the pages of the current report view.
///
/// Holds the session exclusively; dropping the cursor hands the report back
/// in the `ReportReady` state.
pub struct ReportCursor<'s> {
    session: &'s mut SessionController,
    hints: ExtractionHints,
    /// Pages already yielded.
    pages_read: usize,
    /// Page index of the current view since the report was (re)loaded.
    position: usize,
    seen: HashSet<String>,
    done: bool,
}

impl<'s> ReportCursor<'s> {
    pub(crate) fn new(session: &'s mut SessionController, hints: ExtractionHints) -> Self {
        Self {
            session,
            hints,
            pages_read: 0,
            position: 0,
            seen: HashSet::new(),
            done: false,
        }
    }

    pub fn pages_read(&self) -> usize {
        self.pages_read
    }

    /// Records of the next report page, or `None` once pagination is exhausted.
    pub async fn next_batch(&mut self) -> Result<Option<Vec<RawRecord>>, SessionError> {
        loop {
            match self.try_next().await {
                Ok(batch) => return Ok(batch),
                Err(Fault::Fatal(err)) => {
                    self.done = true;
                    return Err(self.session.fail(err).await);
                }
                Err(Fault::Transient(reason)) => {
                    warn!(reason, pages_read = self.pages_read, "extraction interrupted; resuming report");
                    if let Err(err) = self.session.recover(reason).await {
                        self.done = true;
                        return Err(err);
                    }
                    self.session.set_state(SessionState::Extracting);
                    self.position = 0;
                }
            }
        }
    }

    /// Drains every remaining page.
    pub async fn collect_all(mut self) -> Result<Vec<RawRecord>, SessionError> {
        let mut out = Vec::new();
        while let Some(batch) = self.next_batch().await? {
            out.extend(batch);
        }
        Ok(out)
    }

    async fn try_next(&mut self) -> Result<Option<Vec<RawRecord>>, Fault> {
        if self.done {
            return Ok(None);
        }
        if self.pages_read >= self.hints.max_pages.max(1) {
            debug!(max_pages = self.hints.max_pages, "page limit reached");
            self.done = true;
            return Ok(None);
        }

        if self.pages_read == 0 {
            if let Some(records) = self.try_export().await? {
                self.pages_read = 1;
                self.done = true;
                return Ok(Some(records));
            }
        }

        while self.position < self.pages_read {
            if !self.advance().await? {
                self.done = true;
                return Ok(None);
            }
        }

        let page = self.session.page_mut()?;
        let tables = page.tables().await?;
        let fingerprint = fingerprint(&tables);
        if !self.seen.insert(fingerprint) {
            debug!(page = self.position, "page repeats an earlier one; stopping pagination");
            self.done = true;
            return Ok(None);
        }
        let records = extract_records(&tables, &self.hints);
        self.pages_read += 1;
        Ok(Some(records))
    }

    async fn try_export(&mut self) -> Result<Option<Vec<RawRecord>>, Fault> {
        let Some(export) = &self.hints.export else {
            return Ok(None);
        };
        let page = self.session.page_mut()?;
        let Some(locator) = export.resolve(page).await? else {
            return Ok(None);
        };
        let download = page.download(&locator).await?;
        let source = download.file_name.clone().unwrap_or_else(|| page.current_url());
        let table = table_from_csv(&download.bytes, &source)
            .map_err(|e| Fault::Transient(format!("unreadable export {source}: {e}")))?;
        debug!(source, rows = table.rows.len(), "using exported report");
        Ok(Some(extract_records(std::slice::from_ref(&table), &self.hints)))
    }

    /// Activates the enabled "next page" control. `false` when there is none.
    async fn advance(&mut self) -> Result<bool, Fault> {
        let page = self.session.page_mut()?;
        let Some(next) = self.hints.next_page.resolve_enabled(page).await? else {
            return Ok(false);
        };
        match page.click(&next).await {
            Ok(()) => {
                self.position += 1;
                Ok(true)
            }
            Err(DriverError::Unsupported(reason)) => {
                warn!(reason, "pagination control cannot be followed; stopping");
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }
}

impl Drop for ReportCursor<'_> {
    fn drop(&mut self) {
        if self.session.state() == SessionState::Extracting {
            self.session.set_state(SessionState::ReportReady);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use aspi_core::{Credential, Granularity};
    use aspi_storage::BackoffPolicy;
    use uuid::Uuid;

    use crate::browser::ContextProfile;
    use crate::provider::{DescriptorAdapter, ReportKind};
    use crate::testing::{fixture_descriptor, ScriptedDriver};

    fn hints() -> ExtractionHints {
        ExtractionHints::default()
    }

    /// Logged in and parked on the fixture's fixed-window monthly report.
    async fn ready_session(driver: &ScriptedDriver, hints: ExtractionHints) -> SessionController {
        let mut descriptor = fixture_descriptor();
        descriptor.extraction = hints;
        let mut session = SessionController::new(
            Arc::new(DescriptorAdapter::new(descriptor)),
            Arc::new(driver.clone()),
            &ContextProfile::default(),
            BackoffPolicy::immediate(5),
            Uuid::new_v4(),
        );
        session.login(Credential::new("user", "secret")).await.unwrap();
        session
            .navigate_to_report(ReportKind::Revenue, Granularity::Monthly)
            .await
            .unwrap();
        session
    }

    fn month_page(rows: &[&[&str]]) -> Vec<TableSnapshot> {
        vec![TableSnapshot::new(&["年月", "報酬額"], rows)]
    }

    fn filter_widget() -> TableSnapshot {
        TableSnapshot::new(
            &[],
            &[
                &["期間", "2025/10/01 〜 2025/10/31"],
                &["デバイス", "すべて"],
                &["表示", "日別"],
            ],
        )
    }

    fn revenue_table() -> TableSnapshot {
        TableSnapshot::new(
            &["日付", "成果報酬額"],
            &[
                &["2025/10/01", "¥1,200"],
                &["2025/10/02", "¥0"],
                &["2025/10/03", "¥3,400"],
                &["2025/10/04", "¥560"],
                &["2025/10/05", "¥7,800"],
            ],
        )
    }

    #[test]
    fn filter_widget_is_ignored_and_revenue_table_wins() {
        let records = extract_records(&[filter_widget(), revenue_table()], &hints());
        assert_eq!(records.len(), 5);
        assert_eq!(records[0], RawRecord::new("2025/10/01", "¥1,200"));
        assert_eq!(records[1].amount_text, "¥0");
    }

    #[test]
    fn total_rows_are_skipped() {
        let table = TableSnapshot::new(
            &["日付", "クリック数", "成果報酬"],
            &[
                &["2025/10/01", "10", "100"],
                &["2025/10/02", "12", "200"],
                &["2025/10/03", "9", "300"],
                &["2025/10/04", "4", "400"],
                &["合計", "35", "1,000"],
            ],
        );
        let records = extract_records(&[table], &hints());
        assert_eq!(records.len(), 4);
        assert!(records.iter().all(|r| r.date_text != "合計"));
        assert_eq!(records[3].amount_text, "400");
    }

    #[test]
    fn keyword_priority_skips_count_columns() {
        let table = TableSnapshot::new(
            &["年月", "成果報酬件数", "成果報酬額", "確定報酬額"],
            &[&["2025年09月", "3", "¥9,000", "¥4,000"]],
        );
        let records = extract_records(&[table], &hints());
        assert_eq!(records, vec![RawRecord::new("2025年09月", "¥9,000")]);
    }

    #[test]
    fn sparse_rows_fall_back_to_rightmost_nonzero_currency() {
        let table = TableSnapshot::new(
            &["日付", "サイト", "報酬", "未確定"],
            &[
                &["10/01(水)", "blog", "¥500", "¥0"],
                &["10/02(木)", "¥700", "0"],
            ],
        );
        let records = extract_records(&[table], &hints());
        assert_eq!(records[0].amount_text, "¥500");
        assert_eq!(records[1].amount_text, "¥700");
    }

    #[test]
    fn headerless_tables_use_first_date_cell() {
        let table = TableSnapshot::new(
            &[],
            &[&["1", "2025-10-01", "120円"], &["2", "2025-10-02", "80円"]],
        );
        let records = extract_records(&[table], &hints());
        assert_eq!(records.len(), 2);
        assert_eq!(records[1], RawRecord::new("2025-10-02", "80円"));
    }

    #[test]
    fn breakdown_rows_only_dropped_when_flagged() {
        let table = TableSnapshot::new(
            &["日付", "デバイス", "報酬"],
            &[
                &["2025/10/01", "", "1,000"],
                &["2025/10/01", "PC", "600"],
                &["2025/10/01", "SP", "400"],
            ],
        );
        assert_eq!(extract_records(&[table.clone()], &hints()).len(), 3);
        let flagged = ExtractionHints {
            skip_breakdown_rows: true,
            ..hints()
        };
        assert_eq!(extract_records(&[table], &flagged).len(), 1);
    }

    #[test]
    fn invisible_and_dateless_tables_yield_nothing() {
        let mut hidden = revenue_table();
        hidden.visible = false;
        let nav = TableSnapshot::new(&["メニュー"], &[&["ホーム"], &["レポート"]]);
        assert!(extract_records(&[hidden, nav], &hints()).is_empty());
    }

    #[test]
    fn csv_exports_feed_the_same_heuristics() {
        let csv = "\u{feff}日付,成果報酬額\n2025/10/01,1200\n2025/10/02,\"3,400\"\n合計,4600\n";
        let table = table_from_csv(csv.as_bytes(), "report.csv").unwrap();
        assert_eq!(table.header, vec!["日付", "成果報酬額"]);
        let records = extract_records(&[table], &hints());
        assert_eq!(
            records,
            vec![RawRecord::new("2025/10/01", "1200"), RawRecord::new("2025/10/02", "3,400")]
        );
    }

    #[test]
    fn date_cells_cover_report_formats() {
        for text in ["2025/10/01", "2025-10-01", "2025年10月1日", "2025年10月", "2025/10", "20251001", "10/01", "10月1日(水)"] {
            assert!(is_date_cell(text), "{text}");
        }
        for text in ["合計", "1,200", "123456", "2025/10/01 〜 2025/10/31", ""] {
            assert!(!is_date_cell(text), "{text}");
        }
    }

    #[test]
    fn total_markers_only_match_whole_cells_or_the_row_label() {
        let table = TableSnapshot::new(
            &["日付", "広告主", "報酬額"],
            &[
                &["2025/10/01", "Total Wine & More", "¥500"],
                &["2025/10/02", "合計ポイント還元", "¥700"],
                &["2025/10/02", "小計", "¥1,200"],
                &["2025/10/03", "Total:", "¥1,200"],
                &["2025/10/04", "トータルケア", "¥300"],
            ],
        );
        let records = extract_records(&[table], &hints());
        let amounts: Vec<_> = records.iter().map(|r| r.amount_text.as_str()).collect();
        assert_eq!(amounts, vec!["¥500", "¥700", "¥300"]);
        assert!(is_total_row(&["合計(税込)".to_string(), "¥1,500".to_string()]));
        assert!(!is_total_row(&["2025/10/01".to_string(), "totalizer".to_string()]));
    }

    #[test]
    fn parenthesized_reversals_count_as_amounts() {
        let table = TableSnapshot::new(
            &[],
            &[&["2025/02", "(1,000)円"], &["2025/03", "¥8,000"]],
        );
        let records = extract_records(&[table], &hints());
        assert_eq!(records[0].amount_text, "(1,000)円");
        assert_eq!(records.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cursor_follows_next_page_controls() {
        let driver = ScriptedDriver::new().with_pages(vec![
            month_page(&[&["2025/01", "¥1,000"], &["2025/02", "¥2,000"]]),
            month_page(&[&["2025/03", "¥3,000"]]),
        ]);
        let mut session = ready_session(&driver, hints()).await;
        let mut cursor = session.extract().unwrap();
        assert_eq!(cursor.next_batch().await.unwrap().map(|b| b.len()), Some(2));
        let second = cursor.next_batch().await.unwrap().expect("second page");
        assert_eq!(second, vec![RawRecord::new("2025/03", "¥3,000")]);
        assert_eq!(cursor.next_batch().await.unwrap(), None);
        assert_eq!(cursor.pages_read(), 2);
        assert_eq!(cursor.next_batch().await.unwrap(), None);
        drop(cursor);

        assert_eq!(session.state(), SessionState::ReportReady);
        let log = driver.log();
        assert!(log.contains(&"tables page=1".to_string()), "{log:?}");
        session.teardown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn cursor_stops_when_a_page_repeats() {
        let first = month_page(&[&["2025/01", "¥1,000"]]);
        let driver = ScriptedDriver::new().with_pages(vec![
            first.clone(),
            month_page(&[&["2025/02", "¥2,000"]]),
            first,
        ]);
        let mut session = ready_session(&driver, hints()).await;
        let records = session.extract().unwrap().collect_all().await.unwrap();
        assert_eq!(
            records,
            vec![RawRecord::new("2025/01", "¥1,000"), RawRecord::new("2025/02", "¥2,000")]
        );
        assert!(driver.log().contains(&"tables page=2".to_string()));
        session.teardown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn cursor_prefers_the_csv_export() {
        let csv = "年月,報酬額\n2025/01,1000\n2025/02,\"2,500\"\n合計,3500\n";
        let driver = ScriptedDriver::new()
            .with_pages(vec![month_page(&[&["2025/09", "¥9,999"]])])
            .with_export(csv.as_bytes());
        let export_hints = ExtractionHints {
            export: Some(Discovery::from(Locator::text("CSVダウンロード"))),
            ..hints()
        };
        let mut session = ready_session(&driver, export_hints).await;
        let mut cursor = session.extract().unwrap();
        let batch = cursor.next_batch().await.unwrap().expect("export rows");
        assert_eq!(
            batch,
            vec![RawRecord::new("2025/01", "1000"), RawRecord::new("2025/02", "2,500")]
        );
        assert_eq!(cursor.next_batch().await.unwrap(), None);
        drop(cursor);

        let log = driver.log();
        assert!(log.iter().any(|l| l.starts_with("download")), "{log:?}");
        assert!(!log.iter().any(|l| l.starts_with("tables")), "{log:?}");
        session.teardown().await;
    }

    #[test]
    fn fingerprints_distinguish_pages() {
        let a = fingerprint(&[revenue_table()]);
        let b = fingerprint(&[filter_widget()]);
        assert_ne!(a, b);
        assert_eq!(a, fingerprint(&[revenue_table()]));
    }
}
