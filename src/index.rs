use std::fs::{self, File};
use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::files::{read_json, write_atomic, write_json};

#[derive(Debug, Serialize)]
pub struct IndexEntry {
    pub ticker: String,
    pub title: Option<String>,
    pub sector: Option<String>,
    pub last_statement_period: Option<String>,
    pub updated_at: String,
}

#[derive(Debug, Serialize)]
pub struct Index {
    pub generated_at: String,
    pub count: usize,
    pub items: Vec<IndexEntry>,
}

fn str_at<'a>(v: &'a Value, pointer: &str) -> Option<&'a str> {
    v.pointer(pointer).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn entry(ticker: String, doc: &Value, now: &str) -> IndexEntry {
    let title = ["/title", "/unvan", "/kap/title", "/kap/unvan"]
        .iter()
        .find_map(|p| str_at(doc, p))
        .map(String::from);
    IndexEntry {
        ticker,
        title,
        sector: str_at(doc, "/kap/summary/sektor_ana").map(String::from),
        last_statement_period: doc
            .pointer("/bilanco/meta/periodKeys")
            .and_then(Value::as_array)
            .and_then(|keys| keys.last())
            .and_then(Value::as_str)
            .map(String::from),
        updated_at: str_at(doc, "/updated_at").unwrap_or(now).to_string(),
    }
}

fn publish_copy(src: &Path, dest: &Path) -> Result<()> {
    let mut input = File::open(src).with_context(|| format!("Failed to open {}", src.display()))?;
    write_atomic(dest, |out| {
        io::copy(&mut input, out).with_context(|| format!("Failed to copy {}", src.display()))?;
        Ok(())
    })
}

/// Publish `final/*.json` under `docs/` with an `index.json` listing.
pub fn build(final_dir: &Path, docs_dir: &Path) -> Result<Index> {
    let out_final = docs_dir.join("final");
    fs::create_dir_all(&out_final)
        .with_context(|| format!("Failed to create {}", out_final.display()))?;
    write_atomic(&docs_dir.join(".nojekyll"), |_| Ok(()))?;

    let mut paths: Vec<_> = match fs::read_dir(final_dir) {
        Ok(rd) => rd
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|x| x == "json"))
            .collect(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(e) => return Err(e).with_context(|| format!("Failed to list {}", final_dir.display())),
    };
    paths.sort();

    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    let mut items = Vec::with_capacity(paths.len());
    for path in &paths {
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let doc: Value = match read_json(path) {
            Ok(v) => v.unwrap_or(Value::Null),
            Err(e) => {
                warn!("{:#}", e);
                Value::Null
            }
        };
        items.push(entry(stem.to_uppercase(), &doc, &now));

        if let Some(name) = path.file_name() {
            publish_copy(path, &out_final.join(name))?;
        }
    }

    let index = Index {
        generated_at: now,
        count: items.len(),
        items,
    };
    write_json(&docs_dir.join("index.json"), &index)?;
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn index_lists_and_copies_final_files() {
        let dir = tempfile::tempdir().unwrap();
        let final_dir = dir.path().join("final");
        let docs = dir.path().join("docs");
        write_json(
            &final_dir.join("ARCLK.json"),
            &json!({
                "ticker": "ARCLK",
                "kap": {"summary": {"sektor_ana": "İMALAT"}},
                "bilanco": {"meta": {"periodKeys": ["2024/12", "2025/3"]}}
            }),
        )
        .unwrap();
        fs::write(final_dir.join("thyao.json"), "{broken").unwrap();
        fs::write(final_dir.join("notes.txt"), "ignored").unwrap();

        let index = build(&final_dir, &docs).unwrap();
        assert_eq!(index.count, 2);
        let arclk = &index.items[0];
        assert_eq!(arclk.ticker, "ARCLK");
        assert_eq!(arclk.sector.as_deref(), Some("İMALAT"));
        assert_eq!(arclk.last_statement_period.as_deref(), Some("2025/3"));
        assert!(arclk.title.is_none());
        assert_eq!(arclk.updated_at, index.generated_at);

        let thyao = &index.items[1];
        assert_eq!(thyao.ticker, "THYAO");
        assert!(thyao.sector.is_none());

        assert!(docs.join("final/ARCLK.json").exists());
        assert!(docs.join("final/thyao.json").exists());
        assert!(!docs.join("final/notes.txt").exists());
        assert!(docs.join(".nojekyll").exists());
        let written: Value = read_json(&docs.join("index.json")).unwrap().unwrap();
        assert_eq!(written["count"], json!(2));
    }

    #[test]
    fn republish_replaces_copies_whole() {
        let dir = tempfile::tempdir().unwrap();
        let final_dir = dir.path().join("final");
        let docs = dir.path().join("docs");
        fs::create_dir_all(&final_dir).unwrap();
        fs::write(final_dir.join("ARCLK.json"), r#"{"ticker":"ARCLK","kap":{"summary":{"sektor_ana":"İMALAT"}}}"#).unwrap();
        build(&final_dir, &docs).unwrap();

        let newer = r#"{"ticker":"ARCLK"}"#;
        fs::write(final_dir.join("ARCLK.json"), newer).unwrap();
        build(&final_dir, &docs).unwrap();

        assert_eq!(fs::read_to_string(docs.join("final/ARCLK.json")).unwrap(), newer);
        let leftovers: Vec<_> = fs::read_dir(docs.join("final"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|x| x == "tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn missing_final_dir_gives_empty_index() {
        let dir = tempfile::tempdir().unwrap();
        let index = build(&dir.path().join("final"), &dir.path().join("docs")).unwrap();
        assert_eq!(index.count, 0);
    }
}
