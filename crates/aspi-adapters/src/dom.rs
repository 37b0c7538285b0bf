//! Synchronous HTML inspection on top of `scraper`.
//!
//! Parsed documents are not `Send`, so everything here takes the page source,
//! parses it, and hands back owned data that can cross an `.await`.

use scraper::node::Element;
use scraper::{ElementRef, Html, Selector};

use crate::browser::{DriverError, Locator};
use crate::extract::TableSnapshot;

const CLICKABLE: &str = "a, button, input[type=submit], input[type=button], input[type=image], \
     [role=button], [role=tab], [role=link], [role=menuitem], [onclick], summary";
const BUTTONS: &str = "button, input[type=submit], input[type=button], input[type=image]";
const CONTROLS: &str = "input, select, textarea";
const HIDDEN_TAGS: [&str; 6] = ["script", "style", "template", "noscript", "head", "title"];

/// Owned view of an element, enough to act on it without the parsed document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElementInfo {
    pub tag: String,
    pub name: Option<String>,
    pub input_type: Option<String>,
    pub value: Option<String>,
    pub text: String,
    pub enabled: bool,
    /// `href` of the element or its nearest enclosing link.
    pub href: Option<String>,
    /// Enclosing (or `form=`-referenced) form, if any.
    pub form: Option<FormInfo>,
    /// `(value, label)` pairs for `<select>` elements.
    pub options: Vec<(String, String)>,
}

impl ElementInfo {
    /// Whether activating this element submits its form.
    pub fn submits_form(&self) -> bool {
        match self.tag.as_str() {
            "button" => !matches!(self.input_type.as_deref(), Some("button") | Some("reset")),
            "input" => matches!(self.input_type.as_deref(), Some("submit") | Some("image")),
            _ => false,
        }
    }

    pub fn is_text_control(&self) -> bool {
        match self.tag.as_str() {
            "textarea" => true,
            "input" => !matches!(
                self.input_type.as_deref(),
                Some("submit" | "button" | "image" | "reset" | "checkbox" | "radio" | "file" | "hidden")
            ),
            _ => false,
        }
    }

    /// Submitter pair a browser would add when this button submits the form.
    pub fn submitter(&self) -> Option<(String, String)> {
        let name = self.name.clone()?;
        Some((name, self.value.clone().unwrap_or_default()))
    }

    /// Option value matching `wanted` by value first, then by label.
    pub fn option_value(&self, wanted: &str) -> Option<String> {
        let wanted = wanted.trim();
        self.options
            .iter()
            .find(|(value, _)| value == wanted)
            .or_else(|| self.options.iter().find(|(_, label)| label == wanted))
            .or_else(|| {
                let numeric = wanted.trim_start_matches('0');
                self.options.iter().find(|(value, label)| {
                    !numeric.is_empty()
                        && (value.trim_start_matches('0') == numeric
                            || label.trim_end_matches(['年', '月', '日']).trim_start_matches('0') == numeric)
                })
            })
            .map(|(value, _)| value.clone())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormInfo {
    pub action: Option<String>,
    pub method: String,
    pub fields: Vec<(String, String)>,
    /// First submit button, used for implicit submission.
    pub default_submitter: Option<(String, String)>,
}

fn selector(raw: &str) -> Result<Selector, DriverError> {
    Selector::parse(raw).map_err(|e| DriverError::InvalidLocator(format!("{raw}: {e}")))
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn element_text(el: ElementRef<'_>) -> String {
    collapse_whitespace(&el.text().collect::<String>())
}

fn element_hidden(e: &Element) -> bool {
    if HIDDEN_TAGS.contains(&e.name()) || e.attr("hidden").is_some() {
        return true;
    }
    if e.attr("aria-hidden").is_some_and(|v| v.eq_ignore_ascii_case("true")) {
        return true;
    }
    if e.name() == "input" && e.attr("type").is_some_and(|t| t.eq_ignore_ascii_case("hidden")) {
        return true;
    }
    e.attr("style").is_some_and(|style| {
        let style: String = style
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_ascii_lowercase();
        style.contains("display:none") || style.contains("visibility:hidden")
    })
}

fn element_disabled(e: &Element) -> bool {
    e.attr("disabled").is_some()
        || e.attr("aria-disabled").is_some_and(|v| v.eq_ignore_ascii_case("true"))
        || e.classes().any(|c| c.eq_ignore_ascii_case("disabled"))
}

fn self_and_ancestors(el: ElementRef<'_>) -> impl Iterator<Item = ElementRef<'_>> {
    std::iter::once(el).chain(el.ancestors().filter_map(ElementRef::wrap))
}

pub fn is_visible(el: ElementRef<'_>) -> bool {
    !self_and_ancestors(el).any(|e| element_hidden(e.value()))
}

fn is_enabled(el: ElementRef<'_>) -> bool {
    !self_and_ancestors(el).any(|e| element_disabled(e.value()))
}

fn enclosing_form<'a>(document: &'a Html, el: ElementRef<'a>) -> Option<ElementRef<'a>> {
    if let Some(form_id) = el.value().attr("form") {
        let sel = Selector::parse("form[id]").ok()?;
        if let Some(form) = document
            .select(&sel)
            .find(|f| f.value().attr("id") == Some(form_id))
        {
            return Some(form);
        }
    }
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|e| e.value().name() == "form")
}

fn lower_attr(e: &Element, name: &str) -> Option<String> {
    e.attr(name).map(|v| v.trim().to_ascii_lowercase())
}

fn collect_form(form: ElementRef<'_>) -> FormInfo {
    let mut fields = Vec::new();
    let mut default_submitter = None;
    let Ok(controls) = Selector::parse("input, select, textarea, button") else {
        return FormInfo::default();
    };
    for control in form.select(&controls) {
        let e = control.value();
        if element_disabled(e) {
            continue;
        }
        let Some(name) = e.attr("name").map(str::to_string) else {
            continue;
        };
        match e.name() {
            "input" => {
                let kind = lower_attr(e, "type").unwrap_or_else(|| "text".to_string());
                let value = e.attr("value").unwrap_or_default().to_string();
                match kind.as_str() {
                    "submit" | "image" => {
                        if default_submitter.is_none() {
                            default_submitter = Some((name, value));
                        }
                    }
                    "button" | "reset" | "file" => {}
                    "checkbox" | "radio" => {
                        if e.attr("checked").is_some() {
                            let value = if value.is_empty() { "on".to_string() } else { value };
                            fields.push((name, value));
                        }
                    }
                    _ => fields.push((name, value)),
                }
            }
            "button" => {
                let kind = lower_attr(e, "type").unwrap_or_else(|| "submit".to_string());
                if kind == "submit" && default_submitter.is_none() {
                    default_submitter = Some((name, e.attr("value").unwrap_or_default().to_string()));
                }
            }
            "select" => {
                let options = select_options(control);
                let selected = Selector::parse("option[selected]")
                    .ok()
                    .and_then(|sel| control.select(&sel).next())
                    .map(option_value);
                if let Some(value) = selected.or_else(|| options.first().map(|(v, _)| v.clone())) {
                    fields.push((name, value));
                }
            }
            "textarea" => fields.push((name, control.text().collect::<String>())),
            _ => {}
        }
    }
    FormInfo {
        action: form.value().attr("action").map(str::to_string),
        method: form
            .value()
            .attr("method")
            .map(|m| m.trim().to_ascii_uppercase())
            .unwrap_or_else(|| "GET".to_string()),
        fields,
        default_submitter,
    }
}

fn option_value(option: ElementRef<'_>) -> String {
    option
        .value()
        .attr("value")
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| element_text(option))
}

fn select_options(select: ElementRef<'_>) -> Vec<(String, String)> {
    let Ok(sel) = Selector::parse("option") else {
        return Vec::new();
    };
    select
        .select(&sel)
        .map(|option| (option_value(option), element_text(option)))
        .collect()
}

fn describe(document: &Html, el: ElementRef<'_>) -> ElementInfo {
    let e = el.value();
    let href = self_and_ancestors(el)
        .find(|a| a.value().name() == "a" && a.value().attr("href").is_some())
        .and_then(|a| a.value().attr("href"))
        .map(|h| h.trim().to_string());
    let text = match e.name() {
        "input" => e
            .attr("value")
            .or_else(|| e.attr("alt"))
            .map(collapse_whitespace)
            .unwrap_or_default(),
        _ => element_text(el),
    };
    ElementInfo {
        tag: e.name().to_string(),
        name: e.attr("name").map(str::to_string),
        input_type: lower_attr(e, "type"),
        value: e.attr("value").map(str::to_string),
        text,
        enabled: is_enabled(el),
        href,
        form: enclosing_form(document, el).map(collect_form),
        options: if e.name() == "select" { select_options(el) } else { Vec::new() },
    }
}

fn label_texts(document: &Html, el: ElementRef<'_>) -> Vec<String> {
    let mut out = Vec::new();
    if let Some(id) = el.value().attr("id") {
        if let Ok(sel) = Selector::parse("label[for]") {
            out.extend(
                document
                    .select(&sel)
                    .filter(|l| l.value().attr("for") == Some(id))
                    .map(element_text),
            );
        }
    }
    out.extend(
        el.ancestors()
            .filter_map(ElementRef::wrap)
            .filter(|a| a.value().name() == "label")
            .map(element_text),
    );
    out
}

fn field_matches(document: &Html, el: ElementRef<'_>, needle: &str) -> bool {
    let e = el.value();
    if e.attr("name") == Some(needle) || e.attr("id") == Some(needle) {
        return true;
    }
    let contains = |attr: &str| e.attr(attr).is_some_and(|v| v.contains(needle));
    contains("placeholder")
        || contains("aria-label")
        || label_texts(document, el).iter().any(|l| l.contains(needle))
}

fn text_of_clickable(el: ElementRef<'_>) -> String {
    match el.value().name() {
        "input" => el
            .value()
            .attr("value")
            .or_else(|| el.value().attr("alt"))
            .map(collapse_whitespace)
            .unwrap_or_default(),
        _ => {
            let text = element_text(el);
            if text.is_empty() {
                el.value()
                    .attr("title")
                    .or_else(|| el.value().attr("aria-label"))
                    .map(collapse_whitespace)
                    .unwrap_or_default()
            } else {
                text
            }
        }
    }
}

fn matching_elements<'a>(
    document: &'a Html,
    locator: &Locator,
) -> Result<Vec<ElementRef<'a>>, DriverError> {
    let visible = |el: &ElementRef<'_>| is_visible(*el);
    match locator {
        Locator::Css(raw) => {
            let sel = selector(raw)?;
            Ok(document.select(&sel).filter(visible).collect())
        }
        Locator::Text(needle) => {
            let needle = collapse_whitespace(needle);
            if needle.is_empty() {
                return Err(DriverError::InvalidLocator("empty text locator".to_string()));
            }
            let sel = selector(CLICKABLE)?;
            let clickable: Vec<_> = document.select(&sel).filter(visible).collect();
            let exact: Vec<_> = clickable
                .iter()
                .copied()
                .filter(|el| text_of_clickable(*el) == needle)
                .collect();
            if !exact.is_empty() {
                return Ok(exact);
            }
            let partial: Vec<_> = clickable
                .into_iter()
                .filter(|el| text_of_clickable(*el).contains(&needle))
                .collect();
            if !partial.is_empty() {
                return Ok(partial);
            }
            // Fall back to the innermost visible elements carrying the text.
            let any = selector("body *")?;
            Ok(document
                .select(&any)
                .filter(visible)
                .filter(|el| element_text(*el).contains(&needle))
                .filter(|el| {
                    !el.children()
                        .filter_map(ElementRef::wrap)
                        .any(|child| element_text(child).contains(&needle))
                })
                .collect())
        }
        Locator::Field(needle) => {
            let sel = selector(CONTROLS)?;
            Ok(document
                .select(&sel)
                .filter(visible)
                .filter(|el| field_matches(document, *el, needle))
                .collect())
        }
        Locator::Button(n) => {
            let sel = selector(BUTTONS)?;
            Ok(document.select(&sel).filter(visible).skip(*n).take(1).collect())
        }
    }
}

/// Visible elements matching `locator`, in document order.
pub fn locate(html: &str, locator: &Locator) -> Result<Vec<ElementInfo>, DriverError> {
    let document = Html::parse_document(html);
    let found = matching_elements(&document, locator)?;
    Ok(found.into_iter().map(|el| describe(&document, el)).collect())
}

pub fn count(html: &str, locator: &Locator) -> Result<usize, DriverError> {
    let document = Html::parse_document(html);
    Ok(matching_elements(&document, locator)?.len())
}

/// Rendered text of the document without script or style content.
pub fn body_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut parts = Vec::new();
    for node in document.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node
            .ancestors()
            .filter_map(ElementRef::wrap)
            .any(|e| element_hidden(e.value()));
        if !hidden {
            parts.push(text.to_string());
        }
    }
    collapse_whitespace(&parts.join(" "))
}

/// `src` values of `<iframe>`/`<frame>` elements.
pub fn frame_sources(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let Ok(sel) = Selector::parse("iframe[src], frame[src]") else {
        return Vec::new();
    };
    document
        .select(&sel)
        .filter_map(|f| f.value().attr("src"))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && !s.starts_with("javascript:") && s != "about:blank")
        .collect()
}

fn owned_by_table(el: ElementRef<'_>, table: ElementRef<'_>) -> bool {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|a| a.value().name() == "table")
        .is_some_and(|t| t.id() == table.id())
}

fn html_table(table: ElementRef<'_>) -> (Vec<String>, Vec<Vec<String>>) {
    let (Ok(row_sel), Ok(cell_sel)) = (Selector::parse("tr"), Selector::parse("th, td")) else {
        return (Vec::new(), Vec::new());
    };
    let mut header = Vec::new();
    let mut rows = Vec::new();
    for tr in table
        .select(&row_sel)
        .filter(|tr| owned_by_table(*tr, table))
    {
        let cells: Vec<ElementRef<'_>> = tr
            .select(&cell_sel)
            .filter(|c| c.parent().is_some_and(|p| p.id() == tr.id()))
            .collect();
        if cells.is_empty() {
            continue;
        }
        let texts: Vec<String> = cells.iter().map(|c| element_text(*c)).collect();
        let in_thead = tr
            .ancestors()
            .filter_map(ElementRef::wrap)
            .take_while(|a| a.value().name() != "table")
            .any(|a| a.value().name() == "thead");
        let all_th = cells.iter().all(|c| c.value().name() == "th");
        if in_thead || (all_th && header.is_empty() && rows.is_empty()) {
            header = texts;
        } else if all_th {
            // repeated header row inside the body
            continue;
        } else {
            rows.push(texts);
        }
    }
    (header, rows)
}

fn aria_table(table: ElementRef<'_>) -> (Vec<String>, Vec<Vec<String>>) {
    let (Ok(row_sel), Ok(cell_sel)) = (
        Selector::parse("[role=row]"),
        Selector::parse("[role=cell], [role=gridcell], [role=columnheader], [role=rowheader]"),
    ) else {
        return (Vec::new(), Vec::new());
    };
    let mut header = Vec::new();
    let mut rows = Vec::new();
    for row in table.select(&row_sel) {
        let cells: Vec<ElementRef<'_>> = row.select(&cell_sel).collect();
        if cells.is_empty() {
            continue;
        }
        let texts: Vec<String> = cells.iter().map(|c| element_text(*c)).collect();
        let all_header = cells
            .iter()
            .all(|c| c.value().attr("role") == Some("columnheader"));
        if all_header {
            if header.is_empty() {
                header = texts;
            }
        } else {
            rows.push(texts);
        }
    }
    (header, rows)
}

/// Snapshots every table-like element in the document, visible or not.
pub fn tables(html: &str, source: &str) -> Vec<TableSnapshot> {
    let document = Html::parse_document(html);
    let Ok(sel) = Selector::parse("table, [role=table], [role=grid]") else {
        return Vec::new();
    };
    document
        .select(&sel)
        .enumerate()
        .map(|(index, el)| {
            let (header, rows) = if el.value().name() == "table" {
                html_table(el)
            } else {
                aria_table(el)
            };
            TableSnapshot {
                source: source.to_string(),
                index,
                visible: is_visible(el),
                header,
                rows,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOGIN: &str = r##"
        <html><body>
          <form action="/login" method="post">
            <input type="hidden" name="csrf" value="tok">
            <label for="uid">ログインID</label><input id="uid" name="login" type="text">
            <input name="passwd" type="password" placeholder="パスワード">
            <input type="checkbox" name="remember">
            <input type="submit" name="go" value="ログイン">
          </form>
          <div style="display: none"><a href="/secret">レポート</a></div>
          <ul class="pager"><li class="disabled"><a href="#">次へ</a></li></ul>
        </body></html>"##;

    #[test]
    fn fields_resolve_by_label_name_and_placeholder() {
        assert_eq!(count(LOGIN, &Locator::field("ログインID")).unwrap(), 1);
        assert_eq!(count(LOGIN, &Locator::field("passwd")).unwrap(), 1);
        assert_eq!(count(LOGIN, &Locator::field("パスワード")).unwrap(), 1);
        assert_eq!(count(LOGIN, &Locator::field("csrf")).unwrap(), 0);
    }

    #[test]
    fn hidden_elements_are_not_located() {
        assert_eq!(count(LOGIN, &Locator::text("レポート")).unwrap(), 0);
        assert!(body_text(LOGIN).contains("ログインID"));
    }

    #[test]
    fn submit_button_carries_its_form() {
        let found = locate(LOGIN, &Locator::text("ログイン")).unwrap();
        let button = &found[0];
        assert!(button.submits_form());
        let form = button.form.as_ref().unwrap();
        assert_eq!(form.method, "POST");
        assert_eq!(form.action.as_deref(), Some("/login"));
        assert!(form.fields.contains(&("csrf".to_string(), "tok".to_string())));
        assert!(!form.fields.iter().any(|(n, _)| n == "remember"));
        assert_eq!(button.submitter(), Some(("go".to_string(), "ログイン".to_string())));
    }

    #[test]
    fn disabled_ancestors_disable_links() {
        let found = locate(LOGIN, &Locator::text("次へ")).unwrap();
        assert_eq!(found.len(), 1);
        assert!(!found[0].enabled);
    }

    #[test]
    fn nth_button_fallback() {
        assert_eq!(locate(LOGIN, &Locator::Button(0)).unwrap().len(), 1);
        assert!(locate(LOGIN, &Locator::Button(1)).unwrap().is_empty());
    }

    #[test]
    fn invalid_css_is_reported() {
        assert!(matches!(
            count(LOGIN, &Locator::css("input[[")),
            Err(DriverError::InvalidLocator(_))
        ));
    }

    #[test]
    fn nested_tables_keep_their_own_rows() {
        let html = r#"
          <table id="outer">
            <tr><th>日付</th><th>成果報酬額</th></tr>
            <tr><td>2025/10/01</td><td>¥1,000</td></tr>
            <tr><td colspan="2"><table><tr><td>PC</td><td>600</td></tr></table></td></tr>
          </table>"#;
        let snaps = tables(html, "https://example.test/");
        assert_eq!(snaps.len(), 2);
        assert_eq!(snaps[0].header, vec!["日付", "成果報酬額"]);
        assert_eq!(snaps[0].rows.len(), 2);
        assert_eq!(snaps[0].rows[0], vec!["2025/10/01", "¥1,000"]);
        assert_eq!(snaps[1].rows, vec![vec!["PC".to_string(), "600".to_string()]]);
    }

    #[test]
    fn select_options_match_by_value_or_label() {
        let html = r#"<select name="search_start_month"><option value="1">1月</option><option value="10">10月</option></select>"#;
        let select = &locate(html, &Locator::field("search_start_month")).unwrap()[0];
        assert_eq!(select.option_value("10"), Some("10".to_string()));
        assert_eq!(select.option_value("01"), Some("1".to_string()));
        assert_eq!(select.option_value("10月"), Some("10".to_string()));
        assert_eq!(select.option_value("13"), None);
    }
}
