//! Locale-aware conversion of scraped amount/date text into canonical values.

use std::str::FromStr;
use std::sync::OnceLock;

use chrono::{Datelike, NaiveDate};
use regex::Regex;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::{DateRange, Granularity, NormalizedRecord, RawRecord};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("unparseable amount: {0:?}")]
    Amount(String),
    #[error("unparseable date: {0:?}")]
    Date(String),
    #[error("negative daily amount {amount} on {date}")]
    NegativeDaily { date: NaiveDate, amount: Decimal },
}

/// What the date normalizer knows about the job a cell came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateContext {
    pub granularity: Granularity,
    /// Year applied to bare month/day text when `window` does not decide it.
    pub target_year: i32,
    pub window: Option<DateRange>,
}

impl DateContext {
    pub fn new(granularity: Granularity, target_year: i32) -> Self {
        Self {
            granularity,
            target_year,
            window: None,
        }
    }

    pub fn for_window(granularity: Granularity, window: DateRange) -> Self {
        Self {
            granularity,
            target_year: window.start.year(),
            window: Some(window),
        }
    }
}

/// Folds full-width digits and punctuation to ASCII.
fn fold_width(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '０'..='９' => char::from_u32(c as u32 - '０' as u32 + '0' as u32).unwrap_or(c),
            '，' => ',',
            '．' => '.',
            '－' | '−' | '‐' => '-',
            '／' => '/',
            '\u{3000}' => ' ',
            other => other,
        })
        .collect()
}

/// Strips currency glyphs, thousands separators and trailing unit words.
pub fn normalize_amount(text: &str) -> Result<Decimal, NormalizeError> {
    let folded = fold_width(text);
    let Some(first_digit) = folded.find(|c: char| c.is_ascii_digit()) else {
        return Err(NormalizeError::Amount(text.to_string()));
    };

    let mut number = String::new();
    let mut seen_dot = false;
    let mut span_end = folded.len();
    for (offset, ch) in folded[first_digit..].char_indices() {
        match ch {
            '0'..='9' => number.push(ch),
            ',' | '\'' | '_' => {}
            '.' if !seen_dot => {
                seen_dot = true;
                number.push('.');
            }
            '.' => return Err(NormalizeError::Amount(text.to_string())),
            _ => {
                span_end = first_digit + offset;
                break;
            }
        }
    }
    let number = number.trim_end_matches('.');

    let prefix = &folded[..first_digit];
    // "(1,000)", "(¥1,000)" and "(1,000)円" are all accounting negatives.
    let closes_paren = folded[span_end..]
        .trim_start_matches(|c: char| c.is_whitespace() || matches!(c, '円' | '¥' | '￥' | '$'))
        .starts_with(')');
    let negative = prefix.contains('-')
        || prefix.contains('▲')
        || prefix.contains('△')
        || (prefix.contains('(') && closes_paren);

    let value =
        Decimal::from_str(number).map_err(|_| NormalizeError::Amount(text.to_string()))?;
    Ok(if negative { -value } else { value })
}

fn full_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([0-9]{4})\s*[/\-.年]\s*([0-9]{1,2})\s*[/\-.月]\s*([0-9]{1,2})\s*日?")
            .expect("static regex")
    })
}

fn compact_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([0-9]{4})([0-9]{2})([0-9]{2})$").expect("static regex"))
}

fn month_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([0-9]{4})\s*[/\-.年]\s*([0-9]{1,2})\s*月?(?:[^0-9/\-.]|$)")
            .expect("static regex")
    })
}

fn compact_month_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([0-9]{4})([0-9]{2})$").expect("static regex"))
}

fn bare_day_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([0-9]{1,2})\s*[/月]\s*([0-9]{1,2})\s*日?(?:[^0-9/]|$)").expect("static regex")
    })
}

fn capture_u32(caps: &regex::Captures<'_>, idx: usize) -> Option<u32> {
    caps.get(idx)?.as_str().parse().ok()
}

fn capture_i32(caps: &regex::Captures<'_>, idx: usize) -> Option<i32> {
    caps.get(idx)?.as_str().parse().ok()
}

pub fn last_day_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)?.pred_opt()
}

fn month_end(date: NaiveDate) -> NaiveDate {
    last_day_of_month(date.year(), date.month()).unwrap_or(date)
}

fn resolve_bare_year(month: u32, day: u32, ctx: &DateContext) -> Option<NaiveDate> {
    if let Some(window) = ctx.window {
        for year in [window.start.year(), window.end.year()] {
            if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
                if window.contains(date) {
                    return Some(date);
                }
            }
        }
    }
    NaiveDate::from_ymd_opt(ctx.target_year, month, day)
}

/// Parses date text in the shapes provider reports use.
///
/// Month-only text always resolves to the last day of that month; so does any
/// date under monthly granularity, so monthly rows share the daily row shape.
pub fn normalize_date(text: &str, ctx: &DateContext) -> Result<NaiveDate, NormalizeError> {
    let folded = fold_width(text);
    let trimmed = folded.trim();
    let err = || NormalizeError::Date(text.to_string());

    let parsed = if let Some(caps) = full_date_re()
        .captures(trimmed)
        .or_else(|| compact_date_re().captures(trimmed))
    {
        let year = capture_i32(&caps, 1).ok_or_else(err)?;
        let month = capture_u32(&caps, 2).ok_or_else(err)?;
        let day = capture_u32(&caps, 3).ok_or_else(err)?;
        NaiveDate::from_ymd_opt(year, month, day).ok_or_else(err)?
    } else if let Some(caps) = month_re()
        .captures(trimmed)
        .or_else(|| compact_month_re().captures(trimmed))
    {
        let year = capture_i32(&caps, 1).ok_or_else(err)?;
        let month = capture_u32(&caps, 2).ok_or_else(err)?;
        return last_day_of_month(year, month).ok_or_else(err);
    } else if let Some(caps) = bare_day_re().captures(trimmed) {
        let month = capture_u32(&caps, 1).ok_or_else(err)?;
        let day = capture_u32(&caps, 2).ok_or_else(err)?;
        resolve_bare_year(month, day, ctx).ok_or_else(err)?
    } else {
        return Err(err());
    };

    Ok(match ctx.granularity {
        Granularity::Daily => parsed,
        Granularity::Monthly => month_end(parsed),
    })
}

/// Converts one scraped row, enforcing the non-negative invariant for daily actuals.
pub fn normalize_record(raw: &RawRecord, ctx: &DateContext) -> Result<NormalizedRecord, NormalizeError> {
    let date = normalize_date(&raw.date_text, ctx)?;
    let amount = normalize_amount(&raw.amount_text)?;
    if ctx.granularity == Granularity::Daily && amount.is_sign_negative() && !amount.is_zero() {
        return Err(NormalizeError::NegativeDaily { date, amount });
    }
    Ok(NormalizedRecord { date, amount })
}
