use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

use chrono::{Datelike, NaiveDate, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::model::{FinancialStatement, StatementItem, StatementMeta};
use crate::text::period_parts;

const MALI_TABLO_URL: &str =
    "https://www.isyatirim.com.tr/_layouts/15/IsYatirim.Website/Common/Data.aspx/MaliTablo";
const PERIODS_PER_CALL: usize = 4;
const RETRIES: u32 = 3;
const PACING_MS: u64 = 600;
const FORCE_REFRESH_TAIL: usize = 4;

pub const CONSOLIDATED: &str = "CONSOL";
pub const SOLO: &str = "XI_29";
pub const AUTO: &str = "AUTO";

#[derive(Debug, Error)]
pub enum StatementError {
    #[error("HTTP {status} from statement API for {ticker}")]
    Status { status: u16, ticker: String },
    #[error("statement request failed")]
    Request(#[from] reqwest::Error),
    #[error("unknown financial group {0:?} (expected CONSOL, XI_29 or AUTO)")]
    UnknownGroup(String),
    #[error("start period {0} is not a quarter month (3, 6, 9, 12)")]
    BadStartPeriod(u32),
}

/// A reporting quarter, `y/p` with `p` in 3/6/9/12.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Period {
    pub year: i32,
    pub month: u32,
}

impl Period {
    pub fn key(&self) -> String {
        format!("{}/{}", self.year, self.month)
    }
}

fn quarter_end_month(month: u32) -> u32 {
    month.div_ceil(3) * 3
}

/// Quarters from the start quarter through the one containing `today`.
pub fn periods_asc(start_year: i32, start_month: u32, today: NaiveDate) -> Vec<Period> {
    let end = Period {
        year: today.year(),
        month: quarter_end_month(today.month()),
    };
    (start_year..=end.year)
        .flat_map(|year| [3, 6, 9, 12].map(|month| Period { year, month }))
        .filter(|p| !(p.year == start_year && p.month < start_month))
        .take_while(|p| *p <= end)
        .collect()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiRow {
    #[serde(rename = "itemCode")]
    pub code: Option<String>,
    #[serde(rename = "itemDescTr")]
    pub tr: Option<String>,
    #[serde(rename = "itemDescEng")]
    pub en: Option<String>,
    /// `value1..value4`, one per requested period.
    #[serde(flatten)]
    pub rest: HashMap<String, Value>,
}

impl ApiRow {
    /// Item code, else the TR label, else the EN label.
    fn key(&self) -> String {
        [&self.code, &self.tr, &self.en]
            .into_iter()
            .flatten()
            .find(|s| !s.is_empty())
            .cloned()
            .unwrap_or_default()
    }

    fn value(&self, slot: usize) -> Value {
        match self.rest.get(&format!("value{}", slot)) {
            Some(Value::Number(n)) => Value::Number(n.clone()),
            Some(Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    value: Vec<ApiRow>,
}

#[derive(Clone, Copy, PartialEq)]
enum Absorb {
    /// Every returned value is written, nulls included.
    Replace,
    /// Non-null values overwrite; nulls only fill gaps.
    Refresh,
}

fn absorb(items: &mut BTreeMap<String, StatementItem>, rows: &[ApiRow], quad: &[Period], mode: Absorb) {
    for row in rows {
        let item = items.entry(row.key()).or_insert_with(|| StatementItem {
            code: row.code.clone(),
            tr: row.tr.clone(),
            en: row.en.clone(),
            values: BTreeMap::new(),
        });
        for (i, period) in quad.iter().enumerate() {
            let v = row.value(i + 1);
            if mode == Absorb::Replace || !v.is_null() {
                item.values.insert(period.key(), v);
            } else {
                item.values.entry(period.key()).or_insert(Value::Null);
            }
        }
    }
}

fn sort_period_keys(keys: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut keys: Vec<String> = keys.into_iter().collect::<BTreeSet<_>>().into_iter().collect();
    keys.sort_by_key(|k| period_parts(k).unwrap_or((i32::MAX, u32::MAX)));
    keys
}

/// Union of both statements; `a`'s values win where both have one.
pub fn merge_statements(a: &FinancialStatement, b: &FinancialStatement) -> FinancialStatement {
    let period_keys = sort_period_keys(
        a.meta.period_keys.iter().chain(&b.meta.period_keys).cloned(),
    );

    let codes: BTreeSet<&String> = a.items.keys().chain(b.items.keys()).collect();
    let items = codes
        .into_iter()
        .map(|code| {
            let ia = a.items.get(code);
            let ib = b.items.get(code);
            let pick = |f: fn(&StatementItem) -> &Option<String>| {
                ia.and_then(|i| f(i).clone()).or_else(|| ib.and_then(|i| f(i).clone()))
            };
            let values = period_keys
                .iter()
                .map(|p| {
                    let va = ia.and_then(|i| i.values.get(p)).filter(|v| !v.is_null());
                    let vb = ib.and_then(|i| i.values.get(p)).filter(|v| !v.is_null());
                    (p.clone(), va.or(vb).cloned().unwrap_or(Value::Null))
                })
                .collect();
            let item = StatementItem {
                code: pick(|i| &i.code),
                tr: pick(|i| &i.tr),
                en: pick(|i| &i.en),
                values,
            };
            (code.clone(), item)
        })
        .collect();

    let group = match (&a.meta.group, &b.meta.group) {
        (Some(x), Some(y)) => format!("{}+{}", x, y),
        (Some(x), None) | (None, Some(x)) => x.clone(),
        (None, None) => AUTO.to_string(),
    };

    FinancialStatement {
        meta: StatementMeta {
            ticker: a.meta.ticker.clone().or_else(|| b.meta.ticker.clone()),
            group: Some(group),
            currency: a.meta.currency.clone().or_else(|| b.meta.currency.clone()),
            fetched_at: Some(now_iso()),
            period_keys,
        },
        items,
    }
}

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub struct StatementOptions {
    pub group: String,
    pub currency: String,
    pub start_year: i32,
    pub start_period: u32,
}

impl Default for StatementOptions {
    fn default() -> Self {
        StatementOptions {
            group: AUTO.to_string(),
            currency: "TRY".to_string(),
            start_year: 2008,
            start_period: 3,
        }
    }
}

pub struct StatementClient {
    http: reqwest::Client,
    opts: StatementOptions,
}

impl StatementClient {
    pub fn new(opts: StatementOptions) -> Result<Self, StatementError> {
        let group = opts.group.to_uppercase();
        if ![AUTO, CONSOLIDATED, SOLO].contains(&group.as_str()) {
            return Err(StatementError::UnknownGroup(opts.group));
        }
        if ![3, 6, 9, 12].contains(&opts.start_period) {
            return Err(StatementError::BadStartPeriod(opts.start_period));
        }
        let http = reqwest::Client::builder()
            .user_agent("Mozilla/5.0")
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(StatementClient {
            http,
            opts: StatementOptions { group, ..opts },
        })
    }

    /// Full history for one ticker. Chunk failures are logged and skipped.
    pub async fn fetch(&self, ticker: &str) -> Result<FinancialStatement, StatementError> {
        let periods = periods_asc(
            self.opts.start_year,
            self.opts.start_period,
            Utc::now().date_naive(),
        );
        let tail = &periods[periods.len().saturating_sub(FORCE_REFRESH_TAIL)..];

        if self.opts.group == AUTO {
            let consol = self.fetch_group(ticker, CONSOLIDATED, &periods).await;
            let solo = self.fetch_group(ticker, SOLO, &periods).await;
            let mut merged = merge_statements(&consol, &solo);
            // Consolidated goes last so its fresh values win.
            self.overlay(ticker, SOLO, tail, &mut merged).await;
            self.overlay(ticker, CONSOLIDATED, tail, &mut merged).await;
            Ok(merged)
        } else {
            let group = self.opts.group.clone();
            let mut out = self.fetch_group(ticker, &group, &periods).await;
            self.overlay(ticker, &group, tail, &mut out).await;
            Ok(out)
        }
    }

    async fn fetch_group(&self, ticker: &str, group: &str, periods: &[Period]) -> FinancialStatement {
        let chunks: Vec<&[Period]> = periods.chunks(PERIODS_PER_CALL).collect();
        info!(ticker, group, calls = chunks.len(), "fetching statement");

        let mut items = BTreeMap::new();
        for (i, quad) in chunks.iter().enumerate() {
            match self.fetch_quad_retry(ticker, group, quad).await {
                Ok(rows) => {
                    debug!(ticker, group, chunk = i + 1, rows = rows.len(), "ok");
                    absorb(&mut items, &rows, quad, Absorb::Replace);
                }
                Err(e) => warn!(ticker, group, chunk = i + 1, "chunk failed: {:#}", anyhow::Error::from(e)),
            }
            tokio::time::sleep(Duration::from_millis(PACING_MS)).await;
        }

        FinancialStatement {
            meta: StatementMeta {
                ticker: Some(ticker.to_string()),
                group: Some(group.to_string()),
                currency: Some(self.opts.currency.clone()),
                fetched_at: Some(now_iso()),
                period_keys: periods.iter().map(Period::key).collect(),
            },
            items,
        }
    }

    /// Re-fetch `targets` and fold them into `base`.
    async fn overlay(&self, ticker: &str, group: &str, targets: &[Period], base: &mut FinancialStatement) {
        for quad in targets.chunks(PERIODS_PER_CALL) {
            match self.fetch_quad_retry(ticker, group, quad).await {
                Ok(rows) => absorb(&mut base.items, &rows, quad, Absorb::Refresh),
                Err(e) => warn!(ticker, group, "refresh failed: {:#}", anyhow::Error::from(e)),
            }
            tokio::time::sleep(Duration::from_millis(PACING_MS)).await;
        }
    }

    async fn fetch_quad_retry(
        &self,
        ticker: &str,
        group: &str,
        quad: &[Period],
    ) -> Result<Vec<ApiRow>, StatementError> {
        let mut attempt = 1;
        loop {
            match self.fetch_quad(ticker, group, quad).await {
                Ok(rows) => return Ok(rows),
                Err(e) if attempt < RETRIES => {
                    debug!(ticker, group, attempt, "retrying: {}", e);
                    tokio::time::sleep(Duration::from_millis(PACING_MS * attempt as u64)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch_quad(&self, ticker: &str, group: &str, quad: &[Period]) -> Result<Vec<ApiRow>, StatementError> {
        let mut query: Vec<(String, String)> = vec![
            ("companyCode".into(), ticker.to_string()),
            ("exchange".into(), self.opts.currency.clone()),
            ("financialGroup".into(), group.to_string()),
        ];
        for (i, p) in quad.iter().enumerate() {
            query.push((format!("year{}", i + 1), p.year.to_string()));
            query.push((format!("period{}", i + 1), p.month.to_string()));
        }

        let resp = self.http.get(MALI_TABLO_URL).query(&query).send().await?;
        if !resp.status().is_success() {
            return Err(StatementError::Status {
                status: resp.status().as_u16(),
                ticker: ticker.to_string(),
            });
        }
        let body: ApiResponse = resp.json().await?;
        Ok(body.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn keys(ps: &[Period]) -> Vec<String> {
        ps.iter().map(Period::key).collect()
    }

    #[test]
    fn periods_from_start_to_current_quarter() {
        let ps = periods_asc(2023, 9, d(2024, 5, 2));
        assert_eq!(keys(&ps), vec!["2023/9", "2023/12", "2024/3", "2024/6"]);
        assert_eq!(periods_asc(2008, 3, d(2025, 10, 1)).len(), 4 * 17 + 4);
        assert!(periods_asc(2030, 3, d(2025, 1, 1)).is_empty());
    }

    fn rows(v: Value) -> Vec<ApiRow> {
        serde_json::from_value(v).unwrap()
    }

    fn quad() -> Vec<Period> {
        vec![Period { year: 2024, month: 12 }, Period { year: 2025, month: 3 }]
    }

    #[test]
    fn api_rows_keyed_and_parsed() {
        let mut items = BTreeMap::new();
        let r = rows(json!([
            {"itemCode": "1A", "itemDescTr": "Dönen Varlıklar", "itemDescEng": "Current Assets", "value1": "1500.5", "value2": ""},
            {"itemCode": null, "itemDescTr": "Ara Başlık", "value1": 10, "value2": null},
            {"itemCode": "", "itemDescTr": "", "itemDescEng": "Only English", "value1": "x"}
        ]));
        absorb(&mut items, &r, &quad(), Absorb::Replace);

        assert_eq!(items["1A"].values["2024/12"], json!(1500.5));
        assert!(items["1A"].values["2025/3"].is_null());
        assert_eq!(items["Ara Başlık"].values["2024/12"], json!(10));
        assert!(items["Only English"].values["2024/12"].is_null());
    }

    #[test]
    fn refresh_keeps_values_on_null() {
        let mut items = BTreeMap::new();
        absorb(&mut items, &rows(json!([{"itemCode": "1A", "value1": 1, "value2": 2}])), &quad(), Absorb::Replace);
        absorb(&mut items, &rows(json!([{"itemCode": "1A", "value1": null, "value2": 5}])), &quad(), Absorb::Refresh);
        assert_eq!(items["1A"].values["2024/12"], json!(1));
        assert_eq!(items["1A"].values["2025/3"], json!(5));
    }

    fn statement(group: &str, periods: &[&str], items: Value) -> FinancialStatement {
        FinancialStatement {
            meta: StatementMeta {
                ticker: Some("ARCLK".into()),
                group: Some(group.into()),
                currency: Some("TRY".into()),
                fetched_at: None,
                period_keys: periods.iter().map(|s| s.to_string()).collect(),
            },
            items: serde_json::from_value(items).unwrap(),
        }
    }

    #[test]
    fn merge_prefers_first_and_sorts_periods() {
        let consol = statement(
            "CONSOL",
            &["2024/12", "2025/3"],
            json!({"1A": {"code": "1A", "tr": "Dönen", "values": {"2024/12": 1, "2025/3": null}}}),
        );
        let solo = statement(
            "XI_29",
            &["2024/9", "2025/3"],
            json!({
                "1A": {"code": "1A", "en": "Current", "values": {"2024/12": 9, "2025/3": 8}},
                "2B": {"code": "2B", "values": {"2024/9": 3}}
            }),
        );
        let m = merge_statements(&consol, &solo);
        assert_eq!(m.meta.period_keys, vec!["2024/9", "2024/12", "2025/3"]);
        assert_eq!(m.meta.group.as_deref(), Some("CONSOL+XI_29"));
        assert_eq!(m.items["1A"].values["2024/12"], json!(1));
        assert_eq!(m.items["1A"].values["2025/3"], json!(8));
        assert!(m.items["1A"].values["2024/9"].is_null());
        assert_eq!(m.items["1A"].tr.as_deref(), Some("Dönen"));
        assert_eq!(m.items["1A"].en.as_deref(), Some("Current"));
        assert_eq!(m.items["2B"].values["2024/9"], json!(3));
        assert!(m.meta.fetched_at.is_some());
    }

    #[test]
    fn options_validated() {
        let bad_group = StatementOptions { group: "KONSOL".into(), ..Default::default() };
        assert!(matches!(StatementClient::new(bad_group), Err(StatementError::UnknownGroup(_))));
        let bad_period = StatementOptions { start_period: 4, ..Default::default() };
        assert!(matches!(StatementClient::new(bad_period), Err(StatementError::BadStartPeriod(4))));
        let lower = StatementOptions { group: "consol".into(), ..Default::default() };
        assert!(StatementClient::new(lower).is_ok());
    }
}
