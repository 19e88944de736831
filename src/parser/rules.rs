use std::fmt;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::classify::{classify_market, classify_sector, Market, Sector};
use super::locate;
use super::table::{body_rows, Table};
use crate::model::{Record, VotePair, PARTICIPATION_SLOTS};

static SECTOR_CHIP: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a, [class*='chip']").unwrap());
static MARKET_PIECE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a, [class*='chip'], span, p").unwrap());
static SLOT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*(\d+)\)\s*").unwrap());

/// The four tabs of a company page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Page {
    Summary,
    General,
    Corporate,
    Participation,
}

impl Page {
    pub const ALL: [Page; 4] = [Page::Summary, Page::General, Page::Corporate, Page::Participation];

    /// Snapshot file stem, after the site's own tab slugs.
    pub fn slug(self) -> &'static str {
        match self {
            Page::Summary => "ozet",
            Page::General => "genel",
            Page::Corporate => "kurumsal",
            Page::Participation => "katilim",
        }
    }
}

/// Profile fields a rule can fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Website,
    AuditFirm,
    Sector,
    Market,
    Indices,
    Address,
    ProductionSites,
    ListingDate,
    PaidInCapital,
    AuthorizedCapital,
    MajorHolders,
    FreeFloatAmount,
    FreeFloatRatio,
    Subsidiaries,
    BoardMembers,
    VoteRights,
    Participation,
}

impl Field {
    pub fn kind(self) -> ValueKind {
        match self {
            Field::Website
            | Field::AuditFirm
            | Field::Address
            | Field::ListingDate
            | Field::PaidInCapital
            | Field::AuthorizedCapital
            | Field::FreeFloatAmount
            | Field::FreeFloatRatio => ValueKind::Text,
            Field::Indices | Field::ProductionSites => ValueKind::List,
            Field::Sector => ValueKind::Sector,
            Field::Market => ValueKind::Market,
            Field::MajorHolders | Field::Subsidiaries | Field::BoardMembers => ValueKind::Records,
            Field::VoteRights => ValueKind::Pairs,
            Field::Participation => ValueKind::Slots,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Text,
    List,
    Sector,
    Market,
    Records,
    Pairs,
    Slots,
}

/// Which table row a `table_cell` rule reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum RowSelector {
    First,
    /// First row whose first cell names the ticker being processed, else the first row.
    TickerInFirstColumn,
    /// First row whose `column` cell contains `needle` (case-insensitive), else the first row.
    ColumnContains { column: String, needle: String },
}

/// How a field is located in a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Strategy {
    FollowingText { labels: Vec<String> },
    ChipTexts { label: String },
    Sector { label: String },
    Market { labels: Vec<String> },
    SectionTable {
        title: String,
        #[serde(default)]
        drop_columns: Vec<String>,
    },
    SectionCell { title: String, columns: Vec<String> },
    SectionParagraphs { title: String },
    AccordionValue { title: String },
    TableCell {
        header: String,
        row: RowSelector,
        column: String,
    },
    KeyValuePairs { header: String },
    NumberedSlots { header: String, slots: usize },
}

impl Strategy {
    pub fn output(&self) -> ValueKind {
        match self {
            Strategy::FollowingText { .. }
            | Strategy::SectionCell { .. }
            | Strategy::AccordionValue { .. }
            | Strategy::TableCell { .. } => ValueKind::Text,
            Strategy::ChipTexts { .. } | Strategy::SectionParagraphs { .. } => ValueKind::List,
            Strategy::Sector { .. } => ValueKind::Sector,
            Strategy::Market { .. } => ValueKind::Market,
            Strategy::SectionTable { .. } => ValueKind::Records,
            Strategy::KeyValuePairs { .. } => ValueKind::Pairs,
            Strategy::NumberedSlots { .. } => ValueKind::Slots,
        }
    }

    /// Every label/title/header string the rule keys on.
    fn anchors(&self) -> Vec<&str> {
        match self {
            Strategy::FollowingText { labels } | Strategy::Market { labels } => {
                labels.iter().map(String::as_str).collect()
            }
            Strategy::ChipTexts { label } | Strategy::Sector { label } => vec![label.as_str()],
            Strategy::SectionTable { title, .. }
            | Strategy::SectionParagraphs { title }
            | Strategy::AccordionValue { title } => vec![title.as_str()],
            Strategy::SectionCell { title, columns } => {
                let mut v = vec![title.as_str()];
                v.extend(columns.iter().map(String::as_str));
                v
            }
            Strategy::TableCell { header, row, column } => {
                let mut v = vec![header.as_str(), column.as_str()];
                if let RowSelector::ColumnContains { column, needle } = row {
                    v.push(column.as_str());
                    v.push(needle.as_str());
                }
                v
            }
            Strategy::KeyValuePairs { header } | Strategy::NumberedSlots { header, .. } => {
                vec![header.as_str()]
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRule {
    pub field: Field,
    pub page: Page,
    #[serde(flatten)]
    pub strategy: Strategy,
}

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("cannot read rule file {path}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse rule file {path}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("rule table is empty")]
    Empty,
    #[error("invalid extraction rules: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// Ordered extraction rules. Several rules may fill the same field; the
/// first one that finds something wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleTable {
    rules: Vec<FieldRule>,
}

impl RuleTable {
    pub fn new(rules: Vec<FieldRule>) -> Self {
        RuleTable { rules }
    }

    /// Built-in rules, or the JSON file at `path`. Validated either way.
    pub fn load(path: Option<&Path>) -> Result<Self, RuleError> {
        let table = match path {
            None => Self::builtin(),
            Some(p) => {
                let display = p.display().to_string();
                let raw = std::fs::read_to_string(p).map_err(|source| RuleError::Read {
                    path: display.clone(),
                    source,
                })?;
                serde_json::from_str(&raw).map_err(|source| RuleError::Parse {
                    path: display,
                    source,
                })?
            }
        };
        table.validate()?;
        Ok(table)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldRule> {
        self.rules.iter()
    }

    /// Collects every problem instead of stopping at the first.
    pub fn validate(&self) -> Result<(), RuleError> {
        if self.rules.is_empty() {
            return Err(RuleError::Empty);
        }

        let mut problems = Vec::new();
        for (i, rule) in self.rules.iter().enumerate() {
            if rule.strategy.output() != rule.field.kind() {
                problems.push(format!(
                    "rule {} ({}): {:?} strategy cannot fill a {:?} field",
                    i,
                    rule.field,
                    rule.strategy.output(),
                    rule.field.kind()
                ));
            }
            let anchors = rule.strategy.anchors();
            if anchors.is_empty() || anchors.iter().any(|a| a.trim().is_empty()) {
                problems.push(format!("rule {} ({}): empty label", i, rule.field));
            }
            if let Strategy::NumberedSlots { slots, .. } = rule.strategy {
                if !(1..=PARTICIPATION_SLOTS).contains(&slots) {
                    problems.push(format!(
                        "rule {} ({}): slot count {} outside 1..={}",
                        i, rule.field, slots, PARTICIPATION_SLOTS
                    ));
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(RuleError::Invalid(problems))
        }
    }

    /// The layout of the public disclosure platform's company pages.
    pub fn builtin() -> Self {
        use Field as F;
        use Page as P;
        use Strategy as S;

        fn rule(field: Field, page: Page, strategy: Strategy) -> FieldRule {
            FieldRule {
                field,
                page,
                strategy,
            }
        }
        fn strs(v: &[&str]) -> Vec<String> {
            v.iter().map(|s| s.to_string()).collect()
        }

        RuleTable::new(vec![
            // Summary
            rule(F::Website, P::Summary, S::FollowingText { labels: strs(&["İnternet Adresi"]) }),
            rule(
                F::AuditFirm,
                P::Summary,
                S::FollowingText {
                    labels: strs(&["Bağımsız Denetim Kuruluşu", "Denetim Kuruluşu"]),
                },
            ),
            rule(F::Sector, P::Summary, S::Sector { label: "Şirketin Sektörü".into() }),
            rule(
                F::Market,
                P::Summary,
                S::Market {
                    labels: strs(&[
                        "Sermaye Piyasası Aracının İşlem Gördüğü Pazar",
                        "İşlem Gördüğü Pazar",
                    ]),
                },
            ),
            rule(
                F::Indices,
                P::Summary,
                S::ChipTexts { label: "Şirketin Dahil Olduğu Endeksler".into() },
            ),
            // General
            rule(
                F::Address,
                P::General,
                S::SectionCell {
                    title: "İletişim".into(),
                    columns: strs(&["Adres", "Adres__2"]),
                },
            ),
            rule(F::Address, P::General, S::FollowingText { labels: strs(&["Merkez Adresi"]) }),
            rule(
                F::ProductionSites,
                P::General,
                S::SectionParagraphs { title: "Üretim Tesislerinin Bulunduğu Adresler".into() },
            ),
            rule(
                F::ListingDate,
                P::General,
                S::TableCell {
                    header: "Kotasyon/İşlem Görmeye Başlama Tarihi".into(),
                    row: RowSelector::ColumnContains {
                        column: "Tür".into(),
                        needle: "Hisse".into(),
                    },
                    column: "Kotasyon/İşlem Görmeye Başlama".into(),
                },
            ),
            // Ownership
            rule(
                F::PaidInCapital,
                P::General,
                S::AccordionValue { title: "Ödenmiş/Çıkarılmış Sermaye".into() },
            ),
            rule(
                F::AuthorizedCapital,
                P::General,
                S::AccordionValue { title: "Kayıtlı Sermaye Tavanı".into() },
            ),
            rule(
                F::MajorHolders,
                P::General,
                S::SectionTable {
                    title: "Sermayede Doğrudan %5".into(),
                    drop_columns: Vec::new(),
                },
            ),
            rule(
                F::FreeFloatAmount,
                P::General,
                S::TableCell {
                    header: "Fiili Dolaşımdaki Pay Tutarı".into(),
                    row: RowSelector::TickerInFirstColumn,
                    column: "Tutarı".into(),
                },
            ),
            rule(
                F::FreeFloatRatio,
                P::General,
                S::TableCell {
                    header: "Fiili Dolaşımdaki Pay Tutarı".into(),
                    row: RowSelector::TickerInFirstColumn,
                    column: "Oranı".into(),
                },
            ),
            rule(
                F::Subsidiaries,
                P::General,
                S::SectionTable {
                    title: "Bağlı Ortaklıklar".into(),
                    drop_columns: Vec::new(),
                },
            ),
            // Board
            rule(
                F::BoardMembers,
                P::General,
                S::SectionTable {
                    title: "Yönetim Kurulu Üyeleri".into(),
                    drop_columns: strs(&[
                        "Bağımsız Yönetim Kurulu Üyesi",
                        "Bağımsızlık Beyanı",
                        "Aday Gösterme Komitesi",
                        "Bağımsızlığını Kaybeden",
                        "Yer Aldığı Komiteler",
                    ]),
                },
            ),
            // Corporate
            rule(F::VoteRights, P::Corporate, S::KeyValuePairs { header: "Oy Hakları".into() }),
            // Participation
            rule(
                F::Participation,
                P::Participation,
                S::NumberedSlots {
                    header: "ÖZET BİLGİLER".into(),
                    slots: PARTICIPATION_SLOTS,
                },
            ),
        ])
    }
}

/// What a rule found.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    List(Vec<String>),
    Sector(Sector),
    Market(Market),
    Records(Vec<Record>),
    Pairs(Vec<VotePair>),
    /// `(slot number, value)`, 1-based.
    Slots(Vec<(usize, String)>),
}

/// Run one strategy against a parsed page. `None` means "not found here".
pub fn evaluate(strategy: &Strategy, doc: &Html, ticker: &str) -> Option<FieldValue> {
    match strategy {
        Strategy::FollowingText { labels } => labels
            .iter()
            .find_map(|l| locate::following_text(doc, l))
            .map(FieldValue::Text),

        Strategy::ChipTexts { label } => {
            locate::following_container(doc, label).map(|c| FieldValue::List(locate::link_texts(c)))
        }

        Strategy::Sector { label } => {
            let container = locate::following_container(doc, label)?;
            let chips = locate::texts_matching(container, &SECTOR_CHIP);
            Some(FieldValue::Sector(classify_sector(
                &chips,
                &locate::text_of(container),
            )))
        }

        Strategy::Market { labels } => labels.iter().find_map(|label| {
            let container = locate::following_container(doc, label)?;
            let pieces = locate::texts_matching(container, &MARKET_PIECE);
            let raw = locate::lines_of(container).join("\n");
            classify_market(&pieces, &raw).map(FieldValue::Market)
        }),

        Strategy::SectionTable {
            title,
            drop_columns,
        } => {
            let mut table = Table::parse(locate::section_table(doc, title)?);
            table.drop_columns(drop_columns);
            Some(FieldValue::Records(table.records()))
        }

        Strategy::SectionCell { title, columns } => {
            let table = Table::parse(locate::section_table(doc, title)?);
            columns
                .iter()
                .filter_map(|c| table.column_exact(c))
                .filter_map(|i| table.cell(0, i))
                .find(|v| !v.is_empty())
                .map(|v| FieldValue::Text(v.to_string()))
        }

        Strategy::SectionParagraphs { title } => {
            locate::section_paragraphs(doc, title).map(FieldValue::List)
        }

        Strategy::AccordionValue { title } => {
            locate::accordion_value(doc, title).map(FieldValue::Text)
        }

        Strategy::TableCell {
            header,
            row,
            column,
        } => {
            let table = Table::parse(locate::table_with_header(doc, header)?);
            let col = table.column(column)?;
            let row = select_row(&table, row, ticker)?;
            table
                .cell(row, col)
                .filter(|v| !v.is_empty())
                .map(|v| FieldValue::Text(v.to_string()))
        }

        Strategy::KeyValuePairs { header } => {
            let table = locate::table_with_header(doc, header)?;
            let pairs = body_rows(table)
                .into_iter()
                .filter(|cells| cells.len() >= 2)
                .filter(|cells| !cells[0].is_empty() || !cells[1].is_empty())
                .map(|mut cells| {
                    cells.truncate(2);
                    let value = cells.pop().unwrap_or_default();
                    let field = cells.pop().unwrap_or_default();
                    VotePair { field, value }
                })
                .collect();
            Some(FieldValue::Pairs(pairs))
        }

        Strategy::NumberedSlots { header, slots } => {
            let table = locate::table_with_header(doc, header)?;
            let found = body_rows(table)
                .into_iter()
                .filter(|cells| cells.len() >= 2)
                .filter_map(|cells| {
                    let n: usize = SLOT_RE.captures(&cells[0])?[1].parse().ok()?;
                    (1..=*slots).contains(&n).then(|| (n, cells[1].clone()))
                })
                .collect();
            Some(FieldValue::Slots(found))
        }
    }
}

fn select_row(table: &Table, selector: &RowSelector, ticker: &str) -> Option<usize> {
    if table.rows.is_empty() {
        return None;
    }
    let found = match selector {
        RowSelector::First => None,
        RowSelector::TickerInFirstColumn => {
            let ticker = ticker.to_uppercase();
            table
                .rows
                .iter()
                .position(|r| r.first().is_some_and(|c| c.to_uppercase().contains(&ticker)))
        }
        RowSelector::ColumnContains { column, needle } => {
            let col = table.column(column)?;
            let needle = needle.to_lowercase();
            table
                .rows
                .iter()
                .position(|r| r[col].to_lowercase().contains(&needle))
        }
    };
    Some(found.unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_rules_are_valid() {
        let rules = RuleTable::builtin();
        rules.validate().unwrap();
        assert!(rules.iter().any(|r| r.field == Field::Participation));
    }

    #[test]
    fn rules_round_trip_through_json() {
        let rules = RuleTable::builtin();
        let json = serde_json::to_string(&rules).unwrap();
        assert!(json.contains(r#""kind":"following_text""#));
        assert!(json.contains(r#""by":"ticker_in_first_column""#));
        let back: RuleTable = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rules);
    }

    #[test]
    fn validation_collects_problems() {
        let rules = RuleTable::new(vec![
            FieldRule {
                field: Field::Website,
                page: Page::Summary,
                strategy: Strategy::ChipTexts { label: "x".into() },
            },
            FieldRule {
                field: Field::Address,
                page: Page::General,
                strategy: Strategy::FollowingText { labels: vec![" ".into()] },
            },
            FieldRule {
                field: Field::Participation,
                page: Page::Participation,
                strategy: Strategy::NumberedSlots { header: "ÖZET".into(), slots: 9 },
            },
        ]);
        match rules.validate() {
            Err(RuleError::Invalid(problems)) => assert_eq!(problems.len(), 3, "{:?}", problems),
            other => panic!("expected Invalid, got {:?}", other),
        }
        assert!(matches!(RuleTable::new(vec![]).validate(), Err(RuleError::Empty)));
    }

    #[test]
    fn unknown_field_rejected_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        std::fs::write(
            &path,
            r#"[{"field":"ceo","page":"summary","kind":"following_text","labels":["CEO"]}]"#,
        )
        .unwrap();
        assert!(matches!(RuleTable::load(Some(&path)), Err(RuleError::Parse { .. })));
        assert!(matches!(
            RuleTable::load(Some(&dir.path().join("missing.json"))),
            Err(RuleError::Read { .. })
        ));
    }

    #[test]
    fn free_float_row_follows_ticker() {
        let html = r#"<table>
            <thead><tr><th>Pay Kodu</th><th>Fiili Dolaşımdaki Pay Tutarı(TL)</th><th>Fiili Dolaşımdaki Pay Oranı(%)</th></tr></thead>
            <tbody>
              <tr><td>ARCLK.E</td><td>1.000</td><td>10</td></tr>
              <tr><td>XYZ.E</td><td>2.000</td><td>20</td></tr>
            </tbody></table>"#;
        let doc = Html::parse_document(html);
        let rule = Strategy::TableCell {
            header: "Fiili Dolaşımdaki Pay Tutarı".into(),
            row: RowSelector::TickerInFirstColumn,
            column: "Oranı".into(),
        };
        assert_eq!(evaluate(&rule, &doc, "XYZ"), Some(FieldValue::Text("20".into())));
        assert_eq!(evaluate(&rule, &doc, "arclk"), Some(FieldValue::Text("10".into())));
        // Unknown ticker: first row
        assert_eq!(evaluate(&rule, &doc, "THYAO"), Some(FieldValue::Text("10".into())));
    }

    #[test]
    fn numbered_slots() {
        let html = r#"<table>
            <thead><tr><th>ÖZET BİLGİLER</th><th></th></tr></thead>
            <tbody>
              <tr><td>1) Katılım endeksi</td><td>Evet</td></tr>
              <tr><td>Başlık</td><td>yok</td></tr>
              <tr><td> 7) Faiz geliri oranı</td><td>%0,5</td></tr>
              <tr><td>8) Fazla</td><td>x</td></tr>
              <tr><td>3)</td></tr>
            </tbody></table>"#;
        let doc = Html::parse_document(html);
        let rule = Strategy::NumberedSlots {
            header: "ÖZET BİLGİLER".into(),
            slots: 7,
        };
        assert_eq!(
            evaluate(&rule, &doc, "ARCLK"),
            Some(FieldValue::Slots(vec![(1, "Evet".into()), (7, "%0,5".into())]))
        );
    }

    #[test]
    fn key_value_pairs_ignore_header_width() {
        let html = r#"<table>
            <thead><tr><th>Oy Hakları</th></tr></thead>
            <tbody>
              <tr><td>İmtiyazlı Pay</td><td>Yok</td></tr>
              <tr><td></td><td></td></tr>
              <tr><td>Tek hücre</td></tr>
              <tr><td>Oy Sınırı</td><td>Var</td><td>extra</td></tr>
            </tbody></table>"#;
        let doc = Html::parse_document(html);
        let rule = Strategy::KeyValuePairs { header: "Oy Hakları".into() };
        let Some(FieldValue::Pairs(pairs)) = evaluate(&rule, &doc, "ARCLK") else {
            panic!("pairs expected");
        };
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[1].field, "Oy Sınırı");
        assert_eq!(pairs[1].value, "Var");
    }

    #[test]
    fn missing_table_is_none() {
        let doc = Html::parse_document("<p>boş sayfa</p>");
        let rule = Strategy::KeyValuePairs { header: "Oy Hakları".into() };
        assert_eq!(evaluate(&rule, &doc, "ARCLK"), None);
    }
}
