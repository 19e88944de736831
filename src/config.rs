use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use config::Config;
use serde::Deserialize;

const TICKER_FILE_CANDIDATES: [&str; 4] = [
    "public/tickers.txt",
    "public/ticker.txt",
    "tickers.txt",
    "ticker.txt",
];

/// Environment settings, `KAP_*`.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// No path, no relational sink.
    #[serde(default)]
    pub db_path: Option<PathBuf>,
    #[serde(default = "default_profile_dir")]
    pub profile_dir: PathBuf,
    #[serde(default = "default_statement_dir")]
    pub statement_dir: PathBuf,
    #[serde(default = "default_final_dir")]
    pub final_dir: PathBuf,
    #[serde(default = "default_docs_dir")]
    pub docs_dir: PathBuf,
    #[serde(default)]
    pub rules_path: Option<PathBuf>,
    #[serde(default)]
    pub spider_api_key: Option<String>,
}

fn default_profile_dir() -> PathBuf {
    PathBuf::from("kap_json")
}
fn default_statement_dir() -> PathBuf {
    PathBuf::from("bilanco_json")
}
fn default_final_dir() -> PathBuf {
    PathBuf::from("final")
}
fn default_docs_dir() -> PathBuf {
    PathBuf::from("docs")
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_source(config::Environment::with_prefix("KAP"))
    }

    fn from_source<S>(source: S) -> Result<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        Config::builder()
            .add_source(source)
            .build()
            .and_then(|c| c.try_deserialize())
            .context("Invalid KAP_* settings")
    }
}

fn parse_ticker_list<'a>(items: impl Iterator<Item = &'a str>) -> Vec<String> {
    items
        .map(str::trim)
        .filter(|s| !s.is_empty() && !s.starts_with('#'))
        .map(str::to_uppercase)
        .collect()
}

/// `-t A,B` wins over `-f path`; with neither, the first ticker file found.
pub fn read_tickers(list: Option<&str>, file: Option<&Path>) -> Result<Vec<String>> {
    if let Some(list) = list {
        return Ok(parse_ticker_list(list.split(',')));
    }
    let path = match file {
        Some(p) => p.to_path_buf(),
        None => match TICKER_FILE_CANDIDATES.iter().map(Path::new).find(|p| p.exists()) {
            Some(p) => p.to_path_buf(),
            None => return Ok(Vec::new()),
        },
    };
    let raw = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read ticker file {}", path.display()))?;
    Ok(parse_ticker_list(raw.lines()))
}
