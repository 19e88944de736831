use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One table row keyed by (disambiguated) header text.
pub type Record = BTreeMap<String, String>;

pub const PARTICIPATION_SLOTS: usize = 7;

// ── Corporate profile ──

/// Profile documents are written by this tool with text everywhere, but a
/// hand-edited or older document may carry numbers, booleans or nulls. Those
/// read as text so one odd field never rejects the whole profile.
mod lenient {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    use super::Record;

    /// Numbers keep a decimal comma so the locale parser reads them back.
    fn scalar_text(v: Value) -> Option<String> {
        match v {
            Value::Null => None,
            Value::String(s) => Some(s),
            Value::Bool(b) => Some(b.to_string()),
            Value::Number(n) => Some(match (n.as_i64(), n.as_u64()) {
                (Some(i), _) => i.to_string(),
                (_, Some(u)) => u.to_string(),
                _ => n.as_f64().map(|f| f.to_string()).unwrap_or_default().replace('.', ","),
            }),
            other => Some(other.to_string()),
        }
    }

    pub fn opt_text<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        Ok(scalar_text(Value::deserialize(d)?))
    }

    pub fn text<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        Ok(scalar_text(Value::deserialize(d)?).unwrap_or_default())
    }

    /// A list of scalars; anything else reads as empty.
    pub fn texts<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::Array(items) => items.into_iter().filter_map(scalar_text).collect(),
            _ => Vec::new(),
        })
    }

    fn to_record(row: serde_json::Map<String, Value>) -> Record {
        row.into_iter()
            .map(|(k, v)| (k, scalar_text(v).unwrap_or_default()))
            .collect()
    }

    fn rows(v: Value) -> Vec<Record> {
        match v {
            Value::Array(items) => items
                .into_iter()
                .filter_map(|item| match item {
                    Value::Object(row) => Some(to_record(row)),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn records<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Record>, D::Error> {
        Ok(rows(Value::deserialize(d)?))
    }

    pub fn opt_records<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<Record>>, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::Null => None,
            v => Some(rows(v)),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorporateProfile {
    #[serde(default, deserialize_with = "lenient::text")]
    pub ticker: String,
    #[serde(default)]
    pub summary: Summary,
    #[serde(default)]
    pub general: General,
    #[serde(default)]
    pub ownership: Ownership,
    #[serde(default, deserialize_with = "lenient::opt_records")]
    pub board_members: Option<Vec<Record>>,
    #[serde(rename = "oy_haklari", default)]
    pub vote_rights: VoteRights,
    #[serde(rename = "katilim_4_7", default)]
    pub participation: Participation,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    #[serde(rename = "internet_adresi", default, deserialize_with = "lenient::opt_text")]
    pub website: Option<String>,
    #[serde(rename = "denetim_kurulusu", default, deserialize_with = "lenient::opt_text")]
    pub audit_firm: Option<String>,
    #[serde(rename = "sektoru_raw", default, deserialize_with = "lenient::text")]
    pub sector_raw: String,
    #[serde(rename = "sektor_ana", default, deserialize_with = "lenient::opt_text")]
    pub sector_main: Option<String>,
    #[serde(rename = "sektor_alt", default, deserialize_with = "lenient::opt_text")]
    pub sector_sub: Option<String>,
    #[serde(rename = "sektor_alt_list", default, deserialize_with = "lenient::texts")]
    pub sector_sub_list: Vec<String>,
    /// Canonical market label or null.
    #[serde(rename = "islem_gordugu_pazar", default, deserialize_with = "lenient::opt_text")]
    pub market: Option<String>,
    /// Unrecognized market text, kept when no canonical label matched.
    #[serde(
        rename = "islem_gordugu_pazar_raw",
        default,
        deserialize_with = "lenient::opt_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub market_raw: Option<String>,
    #[serde(rename = "dahil_oldugu_endeksler", default, deserialize_with = "lenient::texts")]
    pub indices: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct General {
    #[serde(rename = "merkez_adresi", default, deserialize_with = "lenient::opt_text")]
    pub address: Option<String>,
    #[serde(rename = "uretim_tesis_adresleri", default, deserialize_with = "lenient::texts")]
    pub production_sites: Vec<String>,
    /// Free text, parsed when reconciled.
    #[serde(rename = "kotasyon_tarihi", default, deserialize_with = "lenient::opt_text")]
    pub listing_date: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ownership {
    #[serde(rename = "odenmis_cikarilmis_sermaye", default, deserialize_with = "lenient::opt_text")]
    pub paid_in_capital: Option<String>,
    #[serde(rename = "kayitli_sermaye_tavani", default, deserialize_with = "lenient::opt_text")]
    pub authorized_capital: Option<String>,
    #[serde(rename = "sermaye_5ustu", default, deserialize_with = "lenient::records")]
    pub major_holders: Vec<Record>,
    #[serde(rename = "fiili_dolasim_tutar_tl", default, deserialize_with = "lenient::opt_text")]
    pub free_float_amount: Option<String>,
    #[serde(rename = "fiili_dolasim_oran", default, deserialize_with = "lenient::opt_text")]
    pub free_float_ratio: Option<String>,
    #[serde(rename = "bagli_ortakliklar", default, deserialize_with = "lenient::records")]
    pub subsidiaries: Vec<Record>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VoteRights {
    #[serde(default)]
    pub pairs: Vec<VotePair>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VotePair {
    #[serde(rename = "alan", deserialize_with = "lenient::text")]
    pub field: String,
    #[serde(rename = "deger", deserialize_with = "lenient::text")]
    pub value: String,
}

/// The "summary information" slots `m1..m7`, numbered by the `N)` marker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Participation {
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub m1: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub m2: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub m3: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub m4: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub m5: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub m6: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub m7: Option<String>,
}

impl Participation {
    fn slots_mut(&mut self) -> [&mut Option<String>; PARTICIPATION_SLOTS] {
        [
            &mut self.m1,
            &mut self.m2,
            &mut self.m3,
            &mut self.m4,
            &mut self.m5,
            &mut self.m6,
            &mut self.m7,
        ]
    }

    pub fn slots(&self) -> [&Option<String>; PARTICIPATION_SLOTS] {
        [&self.m1, &self.m2, &self.m3, &self.m4, &self.m5, &self.m6, &self.m7]
    }

    /// Set slot `n` (1-based). Out-of-range slots are ignored.
    pub fn set(&mut self, n: usize, value: String) {
        if (1..=PARTICIPATION_SLOTS).contains(&n) {
            *self.slots_mut()[n - 1] = Some(value);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.slots().iter().all(|s| s.is_none())
    }
}

// ── Financial statement ──

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinancialStatement {
    #[serde(default)]
    pub meta: StatementMeta,
    #[serde(default)]
    pub items: BTreeMap<String, StatementItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatementMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticker: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(rename = "fetchedAt", default)]
    pub fetched_at: Option<String>,
    /// Source order; drives output row order.
    #[serde(rename = "periodKeys", default)]
    pub period_keys: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatementItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default)]
    pub tr: Option<String>,
    #[serde(default)]
    pub en: Option<String>,
    /// Period key → number, text, or null.
    #[serde(default)]
    pub values: BTreeMap<String, Value>,
}
