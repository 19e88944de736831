use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rusqlite::types::{ToSql, ToSqlOutput};
use serde::Serialize;

/// A number read from Turkish-formatted text (`1.234,56`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum LocaleNumber {
    Int(i64),
    Float(f64),
}

impl ToSql for LocaleNumber {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            LocaleNumber::Int(i) => i.to_sql(),
            LocaleNumber::Float(f) => f.to_sql(),
        }
    }
}

/// Collapse whitespace runs to a single space and trim.
pub fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Uppercase with Turkish dotted/dotless i handled before the general fold.
pub fn tr_upper(s: &str) -> String {
    s.replace('i', "İ").replace('ı', "I").to_uppercase()
}

/// `"1.234,56"` → `1234.56`, `"1.234"` → `1234`. Never fails, returns `None` instead.
pub fn parse_locale_number(s: &str) -> Option<LocaleNumber> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let cleaned: String = s
        .replace('.', "")
        .replace('\u{a0}', " ")
        .replace(',', ".")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return None;
    }

    if !cleaned.contains('.') {
        if let Ok(i) = cleaned.parse::<i64>() {
            return Some(LocaleNumber::Int(i));
        }
    }
    cleaned
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .map(LocaleNumber::Float)
}

const FALLBACK_DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d.%m.%Y", "%d-%m-%Y", "%Y/%m/%d", "%d %m %Y"];

/// `DD/MM/YYYY` first, then a handful of common layouts.
pub fn parse_date_dmy(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let parts: Vec<&str> = s.split('/').collect();
    if let [d, m, y] = parts.as_slice() {
        let parsed = (
            d.trim().parse::<u32>(),
            m.trim().parse::<u32>(),
            y.trim().parse::<i32>(),
        );
        if let (Ok(d), Ok(m), Ok(y)) = parsed {
            if let Some(date) = NaiveDate::from_ymd_opt(y, m, d) {
                return Some(date);
            }
        }
    }

    FALLBACK_DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.date_naive()))
        .or_else(|| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
                .ok()
                .map(|dt| dt.date())
        })
}

/// `"2025/6"` → `"2025-06-30"`. Any month is accepted; 6 and 9 end on the 30th,
/// everything else on the 31st.
pub fn period_to_date(key: &str) -> Option<String> {
    let (year, month) = key.trim().split_once('/')?;
    let y: i32 = year.trim().parse().ok()?;
    let m: u32 = month.trim().parse().ok()?;
    let day = match m {
        6 | 9 => 30,
        _ => 31,
    };
    Some(format!("{:04}-{:02}-{:02}", y, m, day))
}

/// `"2025/6"` → `(2025, 6)`, for ordering period keys.
pub fn period_parts(key: &str) -> Option<(i32, u32)> {
    let (year, month) = key.trim().split_once('/')?;
    Some((year.trim().parse().ok()?, month.trim().parse().ok()?))
}

/// Turkish yes/no cell.
pub fn is_evet(s: &str) -> bool {
    s.trim().to_lowercase() == "evet"
}
