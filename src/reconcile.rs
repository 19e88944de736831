use std::collections::BTreeMap;
use std::fmt;

use anyhow::Result;
use rusqlite::Connection;
use serde_json::Value;
use tracing::debug;

use crate::db::{
    self, BoardMemberRow, CompanyRow, FinancialRow, LabelRow, OwnershipRow, ParticipationRow,
    RawRow, SubsidiaryRow, VoteRightRow,
};
use crate::merge::MergedRecord;
use crate::model::{CorporateProfile, FinancialStatement, Participation, Record};
use crate::text::{is_evet, parse_date_dmy, parse_locale_number, period_to_date, LocaleNumber};

const STATEMENT: &str = "bilanco";
const QUARTERLY: &str = "Q";
const TOTAL_ROW: &str = "TOPLAM";

// Board
const COL_NAME: &str = "Adı-Soyadı";
const COL_GENDER: &str = "Cinsiyeti";
const COL_ROLE: &str = "Görevi";
const COL_PROFESSION: &str = "Mesleği";
const COL_FIRST_ELECTED: &str = "Yönetim Kuruluna İlk Seçilme Tarihi";
const COL_EXECUTIVE: &str = "İcrada Görevli Olup Olmadığı";
const COL_DUTIES: &str = "Son 5 Yılda Ortaklıkta Üstlendiği Görevler";
const COL_OUTSIDE: &str = "Son Durum itibariyle Ortaklık Dışında Aldığı Görevler";
const COL_FIN_EXP: &str =
    "Denetim, Muhasebe ve/veya Finans Alanında En Az 5 Yıllık Deneyime Sahip Olup Olmadığı";
const COL_EQUITY: &str = "Sermayedeki Payı (%)";
const COL_SHARE_GROUP: &str = "Temsil Ettiği Pay Grubu";

// Shareholders
const COL_HOLDER: &str = "Ortağın Adı-Soyadı/Ticaret Ünvanı";
const COL_PAID_IN: &str = "Sermayedeki Payı(TL)";
const COL_PCT: &str = "Sermayedeki Payı(%)";
const COL_VOTING: &str = "Oy Hakkı Oranı(%)";

// Subsidiaries
const COL_COMPANY: &str = "Ticaret Ünvanı";
const COL_ACTIVITY: &str = "Şirketin Faaliyet Konusu";
const COL_SUB_CAPITAL: &str = "Ödenmiş/Çıkarılmış Sermayesi";
const COL_SHARE_AMOUNT: &str = "Şirketin Sermayedeki Payı";
const COL_CURRENCY: &str = "Para Birimi";
const COL_SHARE_PCT: &str = "Şirketin Sermayedeki Payı(%)";
const COL_RELATION: &str = "Şirket ile Olan İlişkinin Niteliği";

/// Everything one merged record writes, per table.
#[derive(Debug)]
pub struct WriteSet {
    pub ticker: String,
    pub raw: RawRow,
    pub company: Option<CompanyRow>,
    pub board_members: Vec<BoardMemberRow>,
    pub ownership: Vec<OwnershipRow>,
    pub subsidiaries: Vec<SubsidiaryRow>,
    pub vote_rights: Vec<VoteRightRow>,
    pub participation: Option<ParticipationRow>,
    pub labels: Vec<LabelRow>,
    pub financials: Vec<FinancialRow>,
}

#[derive(Debug, Default)]
pub struct WriteCounts {
    pub board_members: usize,
    pub ownership: usize,
    pub subsidiaries: usize,
    pub vote_rights: usize,
    pub labels: usize,
    pub financials: usize,
}

impl fmt::Display for WriteCounts {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} board, {} holders, {} subs, {} votes, {} labels, {} periods",
            self.board_members,
            self.ownership,
            self.subsidiaries,
            self.vote_rights,
            self.labels,
            self.financials
        )
    }
}

pub fn build(record: &MergedRecord) -> Result<WriteSet> {
    let ticker = record.ticker.clone();
    let profile = record.profile();
    let statement = record.statement();

    let raw = RawRow {
        ticker: ticker.clone(),
        payload: serde_json::to_string(record)?,
        fetched_at: statement.as_ref().and_then(|s| s.meta.fetched_at.clone()),
        json_hash: record.fingerprint()?,
    };

    let mut ws = WriteSet {
        ticker: ticker.clone(),
        raw,
        company: None,
        board_members: Vec::new(),
        ownership: Vec::new(),
        subsidiaries: Vec::new(),
        vote_rights: Vec::new(),
        participation: None,
        labels: Vec::new(),
        financials: Vec::new(),
    };

    if let Some(p) = &profile {
        ws.company = Some(company_row(&ticker, p)?);
        ws.board_members = p
            .board_members
            .as_deref()
            .unwrap_or_default()
            .iter()
            .filter_map(board_member_row)
            .collect();
        ws.ownership = p.ownership.major_holders.iter().filter_map(ownership_row).collect();
        ws.subsidiaries = p.ownership.subsidiaries.iter().filter_map(subsidiary_row).collect();
        ws.vote_rights = p
            .vote_rights
            .pairs
            .iter()
            .filter(|v| !v.field.trim().is_empty())
            .map(|v| VoteRightRow {
                field: v.field.clone(),
                value: v.value.clone(),
            })
            .collect();
        ws.participation = participation_row(&p.participation);
    }

    if let Some(s) = &statement {
        ws.labels = label_rows(s);
        ws.financials = financial_rows(s)?;
    }

    Ok(ws)
}

/// Paid-in amount of the first `TOPLAM` shareholder row.
pub fn shares_outstanding(holders: &[Record]) -> Option<LocaleNumber> {
    holders
        .iter()
        .find(|r| cell(r, COL_HOLDER).is_some_and(|h| h.to_uppercase() == TOTAL_ROW))
        .and_then(|r| number(r, COL_PAID_IN))
}

fn company_row(ticker: &str, p: &CorporateProfile) -> Result<CompanyRow> {
    let s = &p.summary;
    Ok(CompanyRow {
        ticker: ticker.to_string(),
        website: s.website.clone(),
        sector_main: s.sector_main.clone(),
        sector_sub: s.sector_sub.clone(),
        market: s.market.clone(),
        indices: serde_json::to_string(&s.indices)?,
        address: p.general.address.clone(),
        listing_date: p
            .general
            .listing_date
            .as_deref()
            .and_then(parse_date_dmy)
            .map(|d| d.to_string()),
        free_float_ratio: p.ownership.free_float_ratio.as_deref().and_then(parse_locale_number),
        free_float_mcap: p.ownership.free_float_amount.as_deref().and_then(parse_locale_number),
        shares_outstanding: shares_outstanding(&p.ownership.major_holders),
    })
}

/// Trimmed cell text; `None` when the column is absent.
fn cell<'a>(r: &'a Record, col: &str) -> Option<&'a str> {
    r.get(col).map(|v| v.trim())
}

fn text(r: &Record, col: &str) -> Option<String> {
    cell(r, col).filter(|v| !v.is_empty()).map(str::to_string)
}

fn number(r: &Record, col: &str) -> Option<LocaleNumber> {
    cell(r, col).and_then(parse_locale_number)
}

fn board_member_row(m: &Record) -> Option<BoardMemberRow> {
    Some(BoardMemberRow {
        name: text(m, COL_NAME)?,
        gender: text(m, COL_GENDER),
        role: text(m, COL_ROLE),
        profession: text(m, COL_PROFESSION),
        first_elected: cell(m, COL_FIRST_ELECTED)
            .and_then(parse_date_dmy)
            .map(|d| d.to_string()),
        // Absent column is unknown, present-but-empty is "no".
        is_executive: cell(m, COL_EXECUTIVE).map(is_evet),
        duties_last5y: text(m, COL_DUTIES),
        outside_roles: text(m, COL_OUTSIDE),
        has_fin_exp: text(m, COL_FIN_EXP).map(|v| is_evet(&v)),
        equity_pct: number(m, COL_EQUITY),
        represented_share_group: text(m, COL_SHARE_GROUP),
    })
}

fn ownership_row(o: &Record) -> Option<OwnershipRow> {
    Some(OwnershipRow {
        holder: text(o, COL_HOLDER)?,
        paid_in_tl: number(o, COL_PAID_IN),
        pct: number(o, COL_PCT),
        voting_pct: number(o, COL_VOTING),
    })
}

fn subsidiary_row(s: &Record) -> Option<SubsidiaryRow> {
    Some(SubsidiaryRow {
        company: text(s, COL_COMPANY)?,
        activity: text(s, COL_ACTIVITY),
        paid_in_capital: number(s, COL_SUB_CAPITAL),
        share_amount: number(s, COL_SHARE_AMOUNT),
        currency: text(s, COL_CURRENCY),
        share_pct: number(s, COL_SHARE_PCT),
        relation: text(s, COL_RELATION),
    })
}

fn participation_row(p: &Participation) -> Option<ParticipationRow> {
    if p.is_empty() {
        return None;
    }
    Some(ParticipationRow {
        slots: p.slots().map(|s| s.as_deref().and_then(parse_locale_number)),
    })
}

fn label_rows(s: &FinancialStatement) -> Vec<LabelRow> {
    s.items
        .iter()
        .map(|(code, item)| LabelRow {
            code: code.clone(),
            tr: item.tr.clone(),
            en: item.en.clone(),
            statement: STATEMENT,
        })
        .collect()
}

/// One row per period key, in source order, holding only the codes with a value.
fn financial_rows(s: &FinancialStatement) -> Result<Vec<FinancialRow>> {
    let mut rows = Vec::new();
    for key in &s.meta.period_keys {
        let data: BTreeMap<&str, &Value> = s
            .items
            .iter()
            .filter_map(|(code, item)| {
                item.values
                    .get(key)
                    .filter(|v| !v.is_null())
                    .map(|v| (code.as_str(), v))
            })
            .collect();
        if data.is_empty() {
            continue;
        }
        let Some(period) = period_to_date(key) else {
            debug!(key, "unreadable period key");
            continue;
        };
        rows.push(FinancialRow {
            period,
            freq: QUARTERLY,
            statement: STATEMENT,
            currency: s.meta.currency.clone(),
            data: serde_json::to_string(&data)?,
        });
    }
    Ok(rows)
}

/// Write one record through both modes. Each table commits on its own.
pub fn apply(conn: &Connection, ws: &WriteSet) -> Result<WriteCounts> {
    let t = ws.ticker.as_str();
    db::upsert_raw(conn, &ws.raw)?;
    if let Some(c) = &ws.company {
        db::upsert_company(conn, c)?;
    }
    let mut counts = WriteCounts {
        board_members: db::replace_board_members(conn, t, &ws.board_members)?,
        ownership: db::replace_ownership(conn, t, &ws.ownership)?,
        subsidiaries: db::replace_subsidiaries(conn, t, &ws.subsidiaries)?,
        vote_rights: db::replace_vote_rights(conn, t, &ws.vote_rights)?,
        ..Default::default()
    };
    if let Some(p) = &ws.participation {
        db::upsert_participation(conn, t, p)?;
    }
    counts.labels = db::upsert_labels(conn, &ws.labels)?;
    counts.financials = db::upsert_financials(conn, t, &ws.financials)?;
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rec(pairs: &[(&str, &str)]) -> Record {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn merged() -> MergedRecord {
        let kap = json!({
            "ticker": "ARCLK",
            "summary": {
                "internet_adresi": "https://www.arcelikglobal.com",
                "sektor_ana": "İMALAT",
                "sektor_alt": "METAL EŞYA",
                "islem_gordugu_pazar": "YILDIZ PAZAR",
                "dahil_oldugu_endeksler": ["BIST 100", "BIST 30"]
            },
            "general": {"merkez_adresi": "Sütlüce", "kotasyon_tarihi": "29/01/1990"},
            "ownership": {
                "fiili_dolasim_oran": "25,07",
                "fiili_dolasim_tutar_tl": "169.391.263,45",
                "sermaye_5ustu": [
                    {"Ortağın Adı-Soyadı/Ticaret Ünvanı": "KOÇ HOLDİNG A.Ş.", "Sermayedeki Payı(TL)": "275.241.290,13", "Sermayedeki Payı(%)": "40,73", "Oy Hakkı Oranı(%)": "40,73"},
                    {"Ortağın Adı-Soyadı/Ticaret Ünvanı": " toplam ", "Sermayedeki Payı(TL)": "675.728.205", "Sermayedeki Payı(%)": "100", "Oy Hakkı Oranı(%)": "100"}
                ],
                "bagli_ortakliklar": [
                    {"Ticaret Ünvanı": "Beko Plc.", "Para Birimi": "GBP", "Şirketin Sermayedeki Payı(%)": "100,00"},
                    {"Ticaret Ünvanı": "", "Para Birimi": "TRY"}
                ]
            },
            "board_members": [
                {"Adı-Soyadı": "HAKAN BULGURLU", "İcrada Görevli Olup Olmadığı": "Evet", "Yönetim Kuruluna İlk Seçilme Tarihi": "15/03/2021", "Sermayedeki Payı (%)": "0,00"},
                {"Adı-Soyadı": "AYŞE TOKAT", "Denetim, Muhasebe ve/veya Finans Alanında En Az 5 Yıllık Deneyime Sahip Olup Olmadığı": "Evet"}
            ],
            "oy_haklari": {"pairs": [{"alan": "Oyda İmtiyaz", "deger": "Hayır"}]},
            "katilim_4_7": {"m1": "2,14", "m2": null, "m7": "Hayır"}
        });
        let bilanco = json!({
            "meta": {"currency": "TRY", "fetchedAt": "2025-08-01T10:00:00Z", "periodKeys": ["2024/12", "2025/3", "2025/6"]},
            "items": {
                "1A": {"tr": "Dönen Varlıklar", "en": "Current Assets", "values": {"2024/12": 100, "2025/3": 120.5, "2025/6": null}},
                "1AA": {"tr": "Nakit", "en": "Cash", "values": {"2024/12": null, "2025/3": 7}}
            }
        });
        MergedRecord::compose("ARCLK", Some(kap), Some(bilanco)).unwrap()
    }

    #[test]
    fn shares_outstanding_from_total_row() {
        let holders = vec![
            rec(&[(COL_HOLDER, "A"), (COL_PAID_IN, "10")]),
            rec(&[(COL_HOLDER, "TOPLAM"), (COL_PAID_IN, "1.000")]),
            rec(&[(COL_HOLDER, "TOPLAM"), (COL_PAID_IN, "2.000")]),
        ];
        assert_eq!(shares_outstanding(&holders), Some(LocaleNumber::Int(1000)));
        assert_eq!(shares_outstanding(&holders[..1]), None);
        assert_eq!(shares_outstanding(&[]), None);
    }

    #[test]
    fn company_summary_row() {
        let ws = build(&merged()).unwrap();
        let c = ws.company.unwrap();
        assert_eq!(c.market.as_deref(), Some("YILDIZ PAZAR"));
        assert_eq!(c.indices, r#"["BIST 100","BIST 30"]"#);
        assert_eq!(c.listing_date.as_deref(), Some("1990-01-29"));
        assert_eq!(c.free_float_ratio, Some(LocaleNumber::Float(25.07)));
        assert_eq!(c.free_float_mcap, Some(LocaleNumber::Float(169391263.45)));
        assert_eq!(c.shares_outstanding, Some(LocaleNumber::Int(675_728_205)));
        assert_eq!(ws.raw.fetched_at.as_deref(), Some("2025-08-01T10:00:00Z"));
        assert_eq!(ws.raw.json_hash.len(), 64);
    }

    #[test]
    fn collections_mapped_and_keyless_rows_dropped() {
        let ws = build(&merged()).unwrap();
        assert_eq!(ws.board_members.len(), 2);
        let hakan = &ws.board_members[0];
        assert_eq!(hakan.is_executive, Some(true));
        assert_eq!(hakan.first_elected.as_deref(), Some("2021-03-15"));
        assert_eq!(hakan.equity_pct, Some(LocaleNumber::Float(0.0)));
        assert_eq!(hakan.has_fin_exp, None);
        let ayse = &ws.board_members[1];
        assert_eq!(ayse.is_executive, None);
        assert_eq!(ayse.has_fin_exp, Some(true));

        assert_eq!(ws.ownership.len(), 2);
        assert_eq!(ws.subsidiaries.len(), 1);
        assert_eq!(ws.subsidiaries[0].share_pct, Some(LocaleNumber::Float(100.0)));
        assert_eq!(ws.vote_rights[0].field, "Oyda İmtiyaz");

        let slots = ws.participation.unwrap().slots;
        assert_eq!(slots[0], Some(LocaleNumber::Float(2.14)));
        assert_eq!(slots[1], None);
        // Text that is not a number
        assert_eq!(slots[6], None);
    }

    #[test]
    fn numeric_profile_values_still_reconcile() {
        let mut m = merged();
        let kap = m.kap.as_mut().unwrap();
        kap["katilim_4_7"]["m1"] = json!(2.14);
        kap["ownership"]["fiili_dolasim_oran"] = json!(25.07);
        kap["ownership"]["bagli_ortakliklar"][0]["Şirketin Sermayedeki Payı(%)"] = json!(100);
        let ws = build(&m).unwrap();
        let c = ws.company.unwrap();
        assert_eq!(c.free_float_ratio, Some(LocaleNumber::Float(25.07)));
        assert_eq!(ws.participation.unwrap().slots[0], Some(LocaleNumber::Float(2.14)));
        assert_eq!(ws.subsidiaries[0].share_pct, Some(LocaleNumber::Int(100)));
        assert_eq!(ws.board_members.len(), 2);
    }

    #[test]
    fn time_series_skips_empty_periods() {
        let ws = build(&merged()).unwrap();
        assert_eq!(ws.labels.len(), 2);
        assert!(ws.labels.iter().all(|l| l.statement == "bilanco"));

        let periods: Vec<&str> = ws.financials.iter().map(|r| r.period.as_str()).collect();
        assert_eq!(periods, vec!["2024-12-31", "2025-03-31"]);
        assert_eq!(ws.financials[0].data, r#"{"1A":100}"#);
        assert_eq!(ws.financials[1].data, r#"{"1A":120.5,"1AA":7}"#);
        assert!(ws.financials.iter().all(|r| r.freq == "Q" && r.currency.as_deref() == Some("TRY")));
    }

    #[test]
    fn statement_only_record() {
        let mut m = merged();
        m.kap = None;
        let ws = build(&m).unwrap();
        assert!(ws.company.is_none());
        assert!(ws.board_members.is_empty());
        assert!(ws.participation.is_none());
        assert_eq!(ws.financials.len(), 2);
    }

    #[test]
    fn apply_twice_is_stable() {
        let conn = Connection::open_in_memory().unwrap();
        db::init_schema(&conn).unwrap();
        let ws = build(&merged()).unwrap();
        apply(&conn, &ws).unwrap();
        let counts = apply(&conn, &ws).unwrap();
        assert_eq!(counts.board_members, 2);

        let s = db::get_stats(&conn).unwrap();
        assert_eq!(s.raw, 1);
        assert_eq!(s.companies, 1);
        assert_eq!(s.board_members, 2);
        assert_eq!(s.ownership, 2);
        assert_eq!(s.subsidiaries, 1);
        assert_eq!(s.vote_rights, 1);
        assert_eq!(s.participation, 1);
        assert_eq!(s.labels, 2);
        assert_eq!(s.financials, 2);
    }

    #[test]
    fn counts_line_reports_every_table() {
        let conn = Connection::open_in_memory().unwrap();
        db::init_schema(&conn).unwrap();
        let counts = apply(&conn, &build(&merged()).unwrap()).unwrap();
        assert_eq!(counts.labels, 2);
        assert_eq!(
            counts.to_string(),
            "2 board, 2 holders, 1 subs, 1 votes, 2 labels, 2 periods"
        );
    }

    #[test]
    fn profile_with_empty_board_keeps_stored_board() {
        let conn = Connection::open_in_memory().unwrap();
        db::init_schema(&conn).unwrap();
        apply(&conn, &build(&merged()).unwrap()).unwrap();

        let mut m = merged();
        m.kap.as_mut().unwrap()["board_members"] = json!(null);
        apply(&conn, &build(&m).unwrap()).unwrap();
        assert_eq!(db::get_stats(&conn).unwrap().board_members, 2);
    }
}
