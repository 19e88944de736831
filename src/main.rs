mod config;
mod db;
mod files;
mod index;
mod merge;
mod model;
mod pages;
mod parser;
mod reconcile;
mod statements;
mod text;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use rusqlite::Connection;
use tracing::{info, warn};

use crate::config::Settings;
use files::{ticker_path, write_json};
use pages::{PageSource, SnapshotSource, SpiderSource};
use parser::rules::RuleTable;
use statements::{StatementClient, StatementOptions};

const PROFILE_PACING_MS: u64 = 200;
const STATEMENT_PACING_MS: u64 = 800;

#[derive(Parser)]
#[command(name = "kap_scraper", about = "KAP company profiles and financial statements")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct TickerArgs {
    /// Comma-separated tickers (e.g. ARCLK,THYAO)
    #[arg(short = 't', long)]
    tickers: Option<String>,
    /// File with one ticker per line
    #[arg(short = 'f', long)]
    file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract corporate profiles into kap_json/
    Profile {
        #[command(flatten)]
        tickers: TickerArgs,
        /// Read saved pages from DIR/<TICKER>/*.html instead of spider.cloud
        #[arg(long)]
        snapshots: Option<PathBuf>,
    },
    /// Fetch quarterly statements into bilanco_json/
    Statements {
        #[command(flatten)]
        tickers: TickerArgs,
        /// CONSOL, XI_29 or AUTO (both, consolidated preferred)
        #[arg(long, default_value = "AUTO")]
        group: String,
        #[arg(long, default_value = "TRY")]
        currency: String,
        #[arg(long, default_value_t = 2008)]
        start_year: i32,
        /// First quarter month: 3, 6, 9 or 12
        #[arg(long, default_value_t = 3)]
        start_period: u32,
    },
    /// Merge both documents into final/ and reconcile into the database
    Merge {
        #[command(flatten)]
        tickers: TickerArgs,
        /// SQLite database (overrides KAP_DB_PATH)
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// statements, profile, merge in order
    Run {
        #[command(flatten)]
        tickers: TickerArgs,
        #[arg(long)]
        snapshots: Option<PathBuf>,
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Publish final/ under docs/ with an index.json
    Index,
    /// Row counts per database table
    Stats {
        #[arg(long)]
        db: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::from_env()?;

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, stopping after the current ticker");
                stop.store(true, Ordering::SeqCst);
            }
        });
    }

    let result = match cli.command {
        Commands::Profile { tickers, snapshots } => {
            let Some(tickers) = load_tickers(&tickers)? else {
                return Ok(());
            };
            let rules = RuleTable::load(settings.rules_path.as_deref())?;
            profile(&tickers, snapshots.as_deref(), &rules, &settings, &stop)
                .await
                .map(|b| b.print("profile"))
        }
        Commands::Statements {
            tickers,
            group,
            currency,
            start_year,
            start_period,
        } => {
            let Some(tickers) = load_tickers(&tickers)? else {
                return Ok(());
            };
            let client = StatementClient::new(StatementOptions {
                group,
                currency,
                start_year,
                start_period,
            })?;
            fetch_statements(&client, &tickers, &settings, &stop)
                .await
                .map(|b| b.print("statements"))
        }
        Commands::Merge { tickers, db } => {
            let Some(tickers) = load_tickers(&tickers)? else {
                return Ok(());
            };
            let sink = open_sink(db.as_deref().or(settings.db_path.as_deref()));
            merge_all(&tickers, &settings, sink.as_ref(), &stop).map(|b| b.print("merge"))
        }
        Commands::Run {
            tickers,
            snapshots,
            db,
        } => {
            let Some(tickers) = load_tickers(&tickers)? else {
                return Ok(());
            };
            // Validate everything up front so a bad rule file fails before any fetch.
            let rules = RuleTable::load(settings.rules_path.as_deref())?;
            let client = StatementClient::new(StatementOptions::default())?;
            let sink = open_sink(db.as_deref().or(settings.db_path.as_deref()));

            let t_stage = Instant::now();
            fetch_statements(&client, &tickers, &settings, &stop)
                .await?
                .print("statements");
            info!(elapsed = ?t_stage.elapsed(), "statements stage done");

            let t_stage = Instant::now();
            profile(&tickers, snapshots.as_deref(), &rules, &settings, &stop)
                .await?
                .print("profile");
            info!(elapsed = ?t_stage.elapsed(), "profile stage done");

            merge_all(&tickers, &settings, sink.as_ref(), &stop).map(|b| b.print("merge"))
        }
        Commands::Index => index::build(&settings.final_dir, &settings.docs_dir).map(|idx| {
            println!(
                "Wrote {} with {} tickers.",
                settings.docs_dir.join("index.json").display(),
                idx.count
            );
        }),
        Commands::Stats { db: db_path } => {
            let path = db_path
                .or(settings.db_path.clone())
                .ok_or_else(|| anyhow!("no database configured (use --db or KAP_DB_PATH)"))?;
            let conn = db::connect(&path)?;
            db::init_schema(&conn)?;
            let s = db::get_stats(&conn)?;
            println!("Raw documents:  {}", s.raw);
            println!("Companies:      {}", s.companies);
            println!("Board members:  {}", s.board_members);
            println!("Shareholders:   {}", s.ownership);
            println!("Subsidiaries:   {}", s.subsidiaries);
            println!("Vote rights:    {}", s.vote_rights);
            println!("Participation:  {}", s.participation);
            println!("Labels:         {}", s.labels);
            println!("Financial rows: {}", s.financials);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn load_tickers(args: &TickerArgs) -> Result<Option<Vec<String>>> {
    let tickers = crate::config::read_tickers(args.tickers.as_deref(), args.file.as_deref())?;
    if tickers.is_empty() {
        println!("No tickers. Pass -t ARCLK,THYAO or -f tickers.txt.");
        return Ok(None);
    }
    Ok(Some(tickers))
}

/// No path or an unopenable database both mean flat-file output only.
fn open_sink(path: Option<&Path>) -> Option<Connection> {
    let Some(path) = path else {
        info!("no database configured, writing flat files only");
        return None;
    };
    let conn = db::connect(path).and_then(|c| {
        db::init_schema(&c)?;
        Ok(c)
    });
    match conn {
        Ok(c) => Some(c),
        Err(e) => {
            warn!("database unavailable, writing flat files only: {:#}", e);
            None
        }
    }
}

fn progress_bar(len: usize) -> Result<ProgressBar> {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

#[derive(Default)]
struct Batch {
    ok: usize,
    skipped: usize,
    failed: usize,
    interrupted: bool,
}

impl Batch {
    fn print(&self, stage: &str) {
        println!(
            "{}: {} ok, {} skipped, {} failed{}",
            stage,
            self.ok,
            self.skipped,
            self.failed,
            if self.interrupted { " (interrupted)" } else { "" }
        );
    }
}

async fn profile(
    tickers: &[String],
    snapshots: Option<&Path>,
    rules: &RuleTable,
    settings: &Settings,
    stop: &AtomicBool,
) -> Result<Batch> {
    match snapshots {
        Some(dir) => profile_from(&SnapshotSource::new(dir), tickers, rules, settings, stop, 0).await,
        None => {
            let key = settings
                .spider_api_key
                .clone()
                .or_else(|| std::env::var("SPIDER_API_KEY").ok())
                .ok_or_else(|| anyhow!("KAP_SPIDER_API_KEY or SPIDER_API_KEY must be set (or pass --snapshots)"))?;
            let source = SpiderSource::new(key)?;
            profile_from(&source, tickers, rules, settings, stop, PROFILE_PACING_MS).await
        }
    }
}

async fn profile_from<S: PageSource>(
    source: &S,
    tickers: &[String],
    rules: &RuleTable,
    settings: &Settings,
    stop: &AtomicBool,
    pacing_ms: u64,
) -> Result<Batch> {
    let pb = progress_bar(tickers.len())?;
    let mut batch = Batch::default();

    for (i, ticker) in tickers.iter().enumerate() {
        if stop.load(Ordering::SeqCst) {
            batch.interrupted = true;
            break;
        }
        let out = ticker_path(&settings.profile_dir, ticker);
        let result = async {
            let pages = source.fetch(ticker).await?;
            let profile = parser::extract::assemble(ticker, &pages, rules);
            write_json(&out, &profile)
        }
        .await;

        match result {
            Ok(()) => {
                batch.ok += 1;
                pb.println(format!("✓ ({}/{}) {} → {}", i + 1, tickers.len(), ticker, out.display()));
            }
            Err(e) => {
                batch.failed += 1;
                warn!(ticker = %ticker, "profile failed: {:#}", e);
            }
        }
        pb.inc(1);
        if pacing_ms > 0 && i + 1 < tickers.len() {
            tokio::time::sleep(Duration::from_millis(pacing_ms)).await;
        }
    }

    pb.finish_and_clear();
    Ok(batch)
}

async fn fetch_statements(
    client: &StatementClient,
    tickers: &[String],
    settings: &Settings,
    stop: &AtomicBool,
) -> Result<Batch> {
    let pb = progress_bar(tickers.len())?;
    let mut batch = Batch::default();

    for (i, ticker) in tickers.iter().enumerate() {
        if stop.load(Ordering::SeqCst) {
            batch.interrupted = true;
            break;
        }
        let out = ticker_path(&settings.statement_dir, ticker);
        let result = async {
            let statement = client.fetch(ticker).await?;
            if statement.items.is_empty() {
                return Ok(false);
            }
            write_json(&out, &statement)?;
            anyhow::Ok(true)
        }
        .await;

        match result {
            Ok(true) => {
                batch.ok += 1;
                pb.println(format!("✓ ({}/{}) {} → {}", i + 1, tickers.len(), ticker, out.display()));
            }
            Ok(false) => {
                batch.skipped += 1;
                pb.println(format!("– ({}/{}) {}: no statement items", i + 1, tickers.len(), ticker));
            }
            Err(e) => {
                batch.failed += 1;
                warn!(ticker = %ticker, "statements failed: {:#}", e);
            }
        }
        pb.inc(1);
        if i + 1 < tickers.len() {
            tokio::time::sleep(Duration::from_millis(STATEMENT_PACING_MS)).await;
        }
    }

    pb.finish_and_clear();
    Ok(batch)
}

fn merge_all(
    tickers: &[String],
    settings: &Settings,
    sink: Option<&Connection>,
    stop: &AtomicBool,
) -> Result<Batch> {
    let pb = progress_bar(tickers.len())?;
    let mut batch = Batch::default();

    for (i, ticker) in tickers.iter().enumerate() {
        if stop.load(Ordering::SeqCst) {
            batch.interrupted = true;
            break;
        }
        pb.inc(1);
        let Some(record) = merge::load_sources(ticker, &settings.profile_dir, &settings.statement_dir) else {
            batch.skipped += 1;
            pb.println(format!("– ({}/{}) {}: no kap or bilanco document, skipped", i + 1, tickers.len(), ticker));
            continue;
        };

        let out = ticker_path(&settings.final_dir, ticker);
        let result = (|| -> Result<Option<reconcile::WriteCounts>> {
            write_json(&out, &record)?;
            match sink {
                Some(conn) => Ok(Some(reconcile::apply(conn, &reconcile::build(&record)?)?)),
                None => Ok(None),
            }
        })();

        match result {
            Ok(counts) => {
                batch.ok += 1;
                let db_note = counts.map(|c| format!(" (db: {})", c)).unwrap_or_default();
                pb.println(format!("✓ ({}/{}) {} → {}{}", i + 1, tickers.len(), ticker, out.display(), db_note));
            }
            Err(e) => {
                batch.failed += 1;
                warn!(ticker = %ticker, "merge failed: {:#}", e);
            }
        }
    }

    pb.finish_and_clear();
    Ok(batch)
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
