use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::files::{read_json, ticker_path};
use crate::model::{CorporateProfile, FinancialStatement};

/// `final/<TICKER>.json`. The source documents are kept as read so the
/// merged file is a superset of both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedRecord {
    pub ticker: String,
    pub kap: Option<Value>,
    pub bilanco: Option<Value>,
}

impl MergedRecord {
    /// `None` when neither source exists.
    pub fn compose(ticker: &str, kap: Option<Value>, bilanco: Option<Value>) -> Option<Self> {
        if kap.is_none() && bilanco.is_none() {
            return None;
        }
        Some(MergedRecord {
            ticker: ticker.to_string(),
            kap,
            bilanco,
        })
    }

    pub fn profile(&self) -> Option<CorporateProfile> {
        typed(&self.ticker, "kap", self.kap.as_ref())
    }

    pub fn statement(&self) -> Option<FinancialStatement> {
        typed(&self.ticker, "bilanco", self.bilanco.as_ref())
    }

    /// SHA-256 over the compact, key-sorted serialization.
    pub fn fingerprint(&self) -> Result<String> {
        // Value maps are ordered, so this is stable regardless of source key order.
        let canonical = serde_json::to_vec(&serde_json::to_value(self)?)?;
        Ok(format!("{:x}", Sha256::digest(&canonical)))
    }
}

fn typed<T: serde::de::DeserializeOwned>(ticker: &str, part: &str, v: Option<&Value>) -> Option<T> {
    let v = v?;
    match T::deserialize(v) {
        Ok(t) => Some(t),
        Err(e) => {
            warn!(ticker, part, "unexpected document shape: {}", e);
            None
        }
    }
}

/// Read both per-ticker documents. An unreadable document counts as missing.
pub fn load_sources(ticker: &str, profile_dir: &Path, statement_dir: &Path) -> Option<MergedRecord> {
    let kap = load_doc(&ticker_path(profile_dir, ticker));
    let bilanco = load_doc(&ticker_path(statement_dir, ticker));
    MergedRecord::compose(ticker, kap, bilanco)
}

fn load_doc(path: &Path) -> Option<Value> {
    match read_json(path) {
        Ok(v) => v,
        Err(e) => {
            warn!("{:#}", e);
            None
        }
    }
}
