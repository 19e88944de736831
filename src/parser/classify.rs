use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::text::{normalize_whitespace, tr_upper};

static MANUFACTURING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)[İIıi]MALAT\s*[-–—/,]?\s*").unwrap());
static SECTOR_SPLIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*[-–—/,]\s+|\s{2,}").unwrap());
static MARKET_SPLIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[,\-/]+|\s{2,}|\n").unwrap());

const MANUFACTURING: &str = "İMALAT";

/// Market labels in priority order; the first one found wins.
pub const MARKET_CANDIDATES: &[&str] = &[
    "YILDIZ PAZAR",
    "ANA PAZAR",
    "ALT PAZAR",
    "YAKIN İZLEME PAZARI",
    "PİYASA ÖNCESİ İŞLEM PLATFORMU",
    "PIYASA ONCESI ISLEM PLATFORMU",
    "KOLEKTİF ÜRÜNLER PAZARI",
    "KOLEKTIF URUNLER PAZARI",
];

/// Qualified-investor and free-trading disclaimers.
pub const MARKET_EXCLUSIONS: &[&str] = &[
    "NİTELİKLİ YATIRIMCILAR ARASINDA",
    "NITELIKLI YATIRIMCILAR ARASINDA",
    "SERBEST İŞLEM",
    "SERBEST ISLEM",
    "NİTELİKLİ",
    "NITELIKLI",
];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sector {
    pub main: Option<String>,
    pub sub: Option<String>,
    pub sub_list: Vec<String>,
    pub raw: String,
}

/// Chips win; free text is the fallback. All tokens Turkish-uppercased.
pub fn classify_sector(chips: &[String], raw: &str) -> Sector {
    let raw = normalize_whitespace(raw);
    let tokens: Vec<String> = chips
        .iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .map(tr_upper)
        .collect();

    if let Some((main, rest)) = tokens.split_first() {
        let sub_list = dedup(rest.iter().cloned());
        return Sector {
            main: Some(main.clone()),
            sub: Some(sub_list.join(" - ")),
            sub_list,
            raw,
        };
    }

    let (main, sub, sub_list) = sector_from_text(&raw);
    Sector {
        main,
        sub,
        sub_list,
        raw,
    }
}

fn sector_from_text(raw: &str) -> (Option<String>, Option<String>, Vec<String>) {
    let s = normalize_whitespace(raw);
    if s.is_empty() {
        return (None, None, Vec::new());
    }

    let upper = tr_upper(&s);
    if upper.contains(MANUFACTURING) || upper.contains("IMALAT") {
        let alt = tr_upper(MANUFACTURING_RE.replace_all(&s, "").trim());
        let alt_list = if alt.contains('-') {
            dedup(alt.split('-').map(str::trim).filter(|x| !x.is_empty()).map(String::from))
        } else if alt.is_empty() {
            Vec::new()
        } else {
            vec![alt.clone()]
        };
        return (Some(MANUFACTURING.to_string()), Some(alt), alt_list);
    }

    let parts: Vec<&str> = SECTOR_SPLIT_RE.split(&s).collect();
    if parts.len() >= 2 {
        let main = tr_upper(parts[0].trim());
        let rest = dedup(
            parts[1..]
                .iter()
                .map(|p| p.trim())
                .filter(|p| !p.is_empty())
                .map(tr_upper),
        );
        return (Some(main), Some(rest.join(" - ")), rest);
    }

    let toks: Vec<&str> = s.split_whitespace().collect();
    if toks.len() > 1 {
        let alt = tr_upper(&toks[1..].join(" "));
        return (Some(tr_upper(toks[0])), Some(alt.clone()), vec![alt]);
    }

    (Some(upper), Some(String::new()), Vec::new())
}

fn dedup(tokens: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    tokens.filter(|t| seen.insert(t.clone())).collect()
}

/// Outcome of market resolution for one section.
#[derive(Debug, Clone, PartialEq)]
pub enum Market {
    /// One of [`MARKET_CANDIDATES`].
    Canonical(&'static str),
    /// First non-excluded fragment, verbatim.
    Unrecognized(String),
}

fn is_excluded(fragment: &str) -> bool {
    let upper = tr_upper(fragment);
    MARKET_EXCLUSIONS.iter().any(|ex| upper.contains(ex))
}

/// Resolve the listing market from chip/span texts, or the container's raw text
/// when there are none. Candidate priority beats fragment order.
pub fn classify_market(pieces: &[String], container_text: &str) -> Option<Market> {
    let sources: Vec<&str> = if pieces.is_empty() {
        vec![container_text]
    } else {
        pieces.iter().map(String::as_str).collect()
    };
    let raw = tr_upper(&normalize_whitespace(&sources.join(" ")));

    let fragments: Vec<String> = sources
        .iter()
        .flat_map(|p| MARKET_SPLIT_RE.split(p))
        .map(|t| tr_upper(&normalize_whitespace(t)))
        .filter(|t| !t.is_empty() && !is_excluded(t))
        .collect();

    let by_fragment = MARKET_CANDIDATES
        .iter()
        .copied()
        .find(|cand| fragments.iter().any(|f| f.contains(cand)));
    if let Some(cand) = by_fragment {
        return Some(Market::Canonical(cand));
    }

    if let Some(cand) = MARKET_CANDIDATES.iter().copied().find(|cand| raw.contains(cand)) {
        return Some(Market::Canonical(cand));
    }

    fragments.into_iter().next().map(Market::Unrecognized)
}
