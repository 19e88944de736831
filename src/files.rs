use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write through `<path>.tmp` and rename over `path`. Readers see either the
/// old file or the complete new one. If `write` fails the target is untouched.
pub fn write_atomic<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    let tmp = tmp_path(path);
    let result = (|| -> Result<()> {
        let file = File::create(&tmp).with_context(|| format!("Failed to create {}", tmp.display()))?;
        let mut out = BufWriter::new(file);
        write(&mut out)?;
        out.flush()?;
        out.get_ref().sync_all()?;
        Ok(())
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    fs::rename(&tmp, path)
        .with_context(|| format!("Failed to move {} into place", tmp.display()))?;
    Ok(())
}

/// Pretty UTF-8 JSON, non-ASCII left as is.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    write_atomic(path, |out| {
        serde_json::to_writer_pretty(&mut *out, value)?;
        out.write_all(b"\n")?;
        Ok(())
    })
}

/// `Ok(None)` when the file does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
    };
    let value = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid JSON in {}", path.display()))?;
    Ok(Some(value))
}

/// `<dir>/<TICKER>.json`
pub fn ticker_path(dir: &Path, ticker: &str) -> PathBuf {
    dir.join(format!("{}.json", ticker))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn json_is_pretty_and_unescaped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/ARCLK.json");
        write_json(&path, &json!({"sektor_ana": "İMALAT"})).unwrap();
        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"İMALAT\""));
        assert!(raw.contains("\n  \"sektor_ana\""));
        assert!(!tmp_path(&path).exists());
    }

    #[test]
    fn interrupted_write_keeps_previous_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ARCLK.json");
        write_json(&path, &json!({"v": 1})).unwrap();
        let before = fs::read_to_string(&path).unwrap();

        let err = write_atomic(&path, |out| {
            out.write_all(b"{\"v\": 2, \"trunc")?;
            anyhow::bail!("disk gone")
        });
        assert!(err.is_err());
        assert_eq!(fs::read_to_string(&path).unwrap(), before);
        assert!(!tmp_path(&path).exists());
    }

    #[test]
    fn interrupted_first_write_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("NEW.json");
        let _ = write_atomic(&path, |out| {
            out.write_all(b"{")?;
            anyhow::bail!("killed")
        });
        assert!(!path.exists());
    }

    #[test]
    fn read_missing_and_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let missing: Option<Value> = read_json(&dir.path().join("none.json")).unwrap();
        assert!(missing.is_none());

        let bad = dir.path().join("bad.json");
        fs::write(&bad, "{not json").unwrap();
        assert!(read_json::<Value>(&bad).is_err());
    }
}
