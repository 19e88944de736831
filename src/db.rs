use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{Connection, Statement};

use crate::text::LocaleNumber;

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database {}", path.display()))?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS raw_company_json (
            ticker      TEXT PRIMARY KEY,
            source      TEXT NOT NULL DEFAULT 'kap',
            payload     TEXT NOT NULL,
            fetched_at  TEXT,
            json_hash   TEXT NOT NULL,
            updated_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS companies (
            ticker             TEXT PRIMARY KEY,
            website            TEXT,
            sector_main        TEXT,
            sector_sub         TEXT,
            market             TEXT,
            indices            TEXT,
            address            TEXT,
            listing_date       TEXT,
            free_float_ratio   NUMERIC,
            free_float_mcap    NUMERIC,
            shares_outstanding NUMERIC,
            updated_at         TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS kap_board_members (
            id                      INTEGER PRIMARY KEY,
            ticker                  TEXT NOT NULL,
            name                    TEXT NOT NULL,
            gender                  TEXT,
            role                    TEXT,
            profession              TEXT,
            first_elected           TEXT,
            is_executive            BOOLEAN,
            duties_last5y           TEXT,
            outside_roles           TEXT,
            has_fin_exp             BOOLEAN,
            equity_pct              NUMERIC,
            represented_share_group TEXT,
            UNIQUE(ticker, name)
        );
        CREATE INDEX IF NOT EXISTS idx_board_ticker ON kap_board_members(ticker);

        CREATE TABLE IF NOT EXISTS kap_ownership (
            id          INTEGER PRIMARY KEY,
            ticker      TEXT NOT NULL,
            holder      TEXT NOT NULL,
            paid_in_tl  NUMERIC,
            pct         NUMERIC,
            voting_pct  NUMERIC,
            UNIQUE(ticker, holder)
        );
        CREATE INDEX IF NOT EXISTS idx_ownership_ticker ON kap_ownership(ticker);

        CREATE TABLE IF NOT EXISTS kap_subsidiaries (
            id              INTEGER PRIMARY KEY,
            ticker          TEXT NOT NULL,
            company         TEXT NOT NULL,
            activity        TEXT,
            paid_in_capital NUMERIC,
            share_amount    NUMERIC,
            currency        TEXT,
            share_pct       NUMERIC,
            relation        TEXT,
            UNIQUE(ticker, company)
        );
        CREATE INDEX IF NOT EXISTS idx_subsidiaries_ticker ON kap_subsidiaries(ticker);

        CREATE TABLE IF NOT EXISTS kap_vote_rights (
            id      INTEGER PRIMARY KEY,
            ticker  TEXT NOT NULL,
            field   TEXT NOT NULL,
            value   TEXT,
            UNIQUE(ticker, field)
        );
        CREATE INDEX IF NOT EXISTS idx_vote_rights_ticker ON kap_vote_rights(ticker);

        CREATE TABLE IF NOT EXISTS kap_katilim_4_7 (
            ticker  TEXT PRIMARY KEY,
            m1 NUMERIC, m2 NUMERIC, m3 NUMERIC, m4 NUMERIC,
            m5 NUMERIC, m6 NUMERIC, m7 NUMERIC
        );

        CREATE TABLE IF NOT EXISTS financial_labels (
            code       TEXT PRIMARY KEY,
            tr         TEXT,
            en         TEXT,
            statement  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS financials (
            ticker     TEXT NOT NULL,
            period     TEXT NOT NULL,
            freq       TEXT NOT NULL,
            statement  TEXT NOT NULL,
            currency   TEXT,
            data       TEXT NOT NULL,
            PRIMARY KEY (ticker, period, freq, statement)
        );
        ",
    )?;
    Ok(())
}

// ── Rows ──

#[derive(Debug)]
pub struct RawRow {
    pub ticker: String,
    pub payload: String,
    pub fetched_at: Option<String>,
    pub json_hash: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompanyRow {
    pub ticker: String,
    pub website: Option<String>,
    pub sector_main: Option<String>,
    pub sector_sub: Option<String>,
    pub market: Option<String>,
    /// JSON array text.
    pub indices: String,
    pub address: Option<String>,
    pub listing_date: Option<String>,
    pub free_float_ratio: Option<LocaleNumber>,
    pub free_float_mcap: Option<LocaleNumber>,
    pub shares_outstanding: Option<LocaleNumber>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoardMemberRow {
    pub name: String,
    pub gender: Option<String>,
    pub role: Option<String>,
    pub profession: Option<String>,
    pub first_elected: Option<String>,
    pub is_executive: Option<bool>,
    pub duties_last5y: Option<String>,
    pub outside_roles: Option<String>,
    pub has_fin_exp: Option<bool>,
    pub equity_pct: Option<LocaleNumber>,
    pub represented_share_group: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OwnershipRow {
    pub holder: String,
    pub paid_in_tl: Option<LocaleNumber>,
    pub pct: Option<LocaleNumber>,
    pub voting_pct: Option<LocaleNumber>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubsidiaryRow {
    pub company: String,
    pub activity: Option<String>,
    pub paid_in_capital: Option<LocaleNumber>,
    pub share_amount: Option<LocaleNumber>,
    pub currency: Option<String>,
    pub share_pct: Option<LocaleNumber>,
    pub relation: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VoteRightRow {
    pub field: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParticipationRow {
    pub slots: [Option<LocaleNumber>; 7],
}

#[derive(Debug, Clone, PartialEq)]
pub struct LabelRow {
    pub code: String,
    pub tr: Option<String>,
    pub en: Option<String>,
    pub statement: &'static str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FinancialRow {
    /// ISO quarter-end date.
    pub period: String,
    pub freq: &'static str,
    pub statement: &'static str,
    pub currency: Option<String>,
    /// JSON object text, code → value.
    pub data: String,
}

// ── Singleton upserts ──

pub fn upsert_raw(conn: &Connection, row: &RawRow) -> Result<()> {
    conn.execute(
        "INSERT INTO raw_company_json (ticker, source, payload, fetched_at, json_hash)
         VALUES (?1, 'kap', ?2, ?3, ?4)
         ON CONFLICT(ticker) DO UPDATE SET
            payload = excluded.payload,
            fetched_at = excluded.fetched_at,
            json_hash = excluded.json_hash,
            updated_at = datetime('now')",
        rusqlite::params![row.ticker, row.payload, row.fetched_at, row.json_hash],
    )?;
    Ok(())
}

pub fn upsert_company(conn: &Connection, c: &CompanyRow) -> Result<()> {
    conn.execute(
        "INSERT INTO companies
         (ticker, website, sector_main, sector_sub, market, indices, address,
          listing_date, free_float_ratio, free_float_mcap, shares_outstanding)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)
         ON CONFLICT(ticker) DO UPDATE SET
            website = excluded.website,
            sector_main = excluded.sector_main,
            sector_sub = excluded.sector_sub,
            market = excluded.market,
            indices = excluded.indices,
            address = excluded.address,
            listing_date = excluded.listing_date,
            free_float_ratio = excluded.free_float_ratio,
            free_float_mcap = excluded.free_float_mcap,
            shares_outstanding = excluded.shares_outstanding,
            updated_at = datetime('now')",
        rusqlite::params![
            c.ticker, c.website, c.sector_main, c.sector_sub, c.market, c.indices,
            c.address, c.listing_date, c.free_float_ratio, c.free_float_mcap,
            c.shares_outstanding,
        ],
    )?;
    Ok(())
}

pub fn upsert_participation(conn: &Connection, ticker: &str, row: &ParticipationRow) -> Result<()> {
    let [m1, m2, m3, m4, m5, m6, m7] = &row.slots;
    conn.execute(
        "INSERT INTO kap_katilim_4_7 (ticker, m1, m2, m3, m4, m5, m6, m7)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8)
         ON CONFLICT(ticker) DO UPDATE SET
            m1 = excluded.m1, m2 = excluded.m2, m3 = excluded.m3, m4 = excluded.m4,
            m5 = excluded.m5, m6 = excluded.m6, m7 = excluded.m7",
        rusqlite::params![ticker, m1, m2, m3, m4, m5, m6, m7],
    )?;
    Ok(())
}

pub fn upsert_labels(conn: &Connection, rows: &[LabelRow]) -> Result<usize> {
    if rows.is_empty() {
        return Ok(0);
    }
    let tx = conn.unchecked_transaction()?;
    let mut count = 0;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO financial_labels (code, tr, en, statement) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(code) DO UPDATE SET
                tr = excluded.tr, en = excluded.en, statement = excluded.statement",
        )?;
        for r in rows {
            count += stmt.execute(rusqlite::params![r.code, r.tr, r.en, r.statement])?;
        }
    }
    tx.commit()?;
    Ok(count)
}

pub fn upsert_financials(conn: &Connection, ticker: &str, rows: &[FinancialRow]) -> Result<usize> {
    if rows.is_empty() {
        return Ok(0);
    }
    let tx = conn.unchecked_transaction()?;
    let mut count = 0;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO financials (ticker, period, freq, statement, currency, data)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(ticker, period, freq, statement) DO UPDATE SET
                currency = excluded.currency, data = excluded.data",
        )?;
        for r in rows {
            count += stmt.execute(rusqlite::params![
                ticker, r.period, r.freq, r.statement, r.currency, r.data
            ])?;
        }
    }
    tx.commit()?;
    Ok(count)
}

// ── Collection replace ──

/// Delete every row of `table` for the ticker and insert `rows`, in one
/// transaction. Empty `rows` means "unknown": nothing is deleted.
fn replace_collection<R>(
    conn: &Connection,
    table: &str,
    ticker: &str,
    rows: &[R],
    insert_sql: &str,
    mut bind: impl FnMut(&mut Statement, &R) -> rusqlite::Result<usize>,
) -> Result<usize> {
    if rows.is_empty() {
        return Ok(0);
    }
    let tx = conn.unchecked_transaction()?;
    let mut count = 0;
    {
        tx.execute(&format!("DELETE FROM {} WHERE ticker = ?1", table), [ticker])?;
        let mut stmt = tx.prepare(insert_sql)?;
        for r in rows {
            count += bind(&mut stmt, r)?;
        }
    }
    tx.commit()
        .with_context(|| format!("Failed to replace {} rows for {}", table, ticker))?;
    Ok(count)
}

pub fn replace_board_members(conn: &Connection, ticker: &str, rows: &[BoardMemberRow]) -> Result<usize> {
    replace_collection(
        conn,
        "kap_board_members",
        ticker,
        rows,
        "INSERT OR REPLACE INTO kap_board_members
         (ticker, name, gender, role, profession, first_elected, is_executive,
          duties_last5y, outside_roles, has_fin_exp, equity_pct, represented_share_group)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)",
        |stmt, m| {
            stmt.execute(rusqlite::params![
                ticker, m.name, m.gender, m.role, m.profession, m.first_elected,
                m.is_executive, m.duties_last5y, m.outside_roles, m.has_fin_exp,
                m.equity_pct, m.represented_share_group,
            ])
        },
    )
}

pub fn replace_ownership(conn: &Connection, ticker: &str, rows: &[OwnershipRow]) -> Result<usize> {
    replace_collection(
        conn,
        "kap_ownership",
        ticker,
        rows,
        "INSERT OR REPLACE INTO kap_ownership (ticker, holder, paid_in_tl, pct, voting_pct)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        |stmt, o| stmt.execute(rusqlite::params![ticker, o.holder, o.paid_in_tl, o.pct, o.voting_pct]),
    )
}

pub fn replace_subsidiaries(conn: &Connection, ticker: &str, rows: &[SubsidiaryRow]) -> Result<usize> {
    replace_collection(
        conn,
        "kap_subsidiaries",
        ticker,
        rows,
        "INSERT OR REPLACE INTO kap_subsidiaries
         (ticker, company, activity, paid_in_capital, share_amount, currency, share_pct, relation)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
        |stmt, s| {
            stmt.execute(rusqlite::params![
                ticker, s.company, s.activity, s.paid_in_capital, s.share_amount,
                s.currency, s.share_pct, s.relation,
            ])
        },
    )
}

pub fn replace_vote_rights(conn: &Connection, ticker: &str, rows: &[VoteRightRow]) -> Result<usize> {
    replace_collection(
        conn,
        "kap_vote_rights",
        ticker,
        rows,
        "INSERT OR REPLACE INTO kap_vote_rights (ticker, field, value) VALUES (?1, ?2, ?3)",
        |stmt, v| stmt.execute(rusqlite::params![ticker, v.field, v.value]),
    )
}

// ── Stats ──

pub struct Stats {
    pub raw: usize,
    pub companies: usize,
    pub board_members: usize,
    pub ownership: usize,
    pub subsidiaries: usize,
    pub vote_rights: usize,
    pub participation: usize,
    pub labels: usize,
    pub financials: usize,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let count = |table: &str| -> Result<usize> {
        Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))?)
    };
    Ok(Stats {
        raw: count("raw_company_json")?,
        companies: count("companies")?,
        board_members: count("kap_board_members")?,
        ownership: count("kap_ownership")?,
        subsidiaries: count("kap_subsidiaries")?,
        vote_rights: count("kap_vote_rights")?,
        participation: count("kap_katilim_4_7")?,
        labels: count("financial_labels")?,
        financials: count("financials")?,
    })
}
