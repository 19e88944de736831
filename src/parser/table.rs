use std::collections::HashMap;
use std::sync::LazyLock;

use scraper::{ElementRef, Selector};

use super::locate::text_of;
use crate::model::Record;

static HEAD_CELL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("thead th").unwrap());
static BODY_ROW: LazyLock<Selector> = LazyLock::new(|| Selector::parse("tbody tr").unwrap());
static CELL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("td").unwrap());

/// A header-keyed table: every row has exactly one cell per header.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Body rows as raw cell texts, unshaped by the header. Rows without cells are skipped.
pub fn body_rows(table: ElementRef) -> Vec<Vec<String>> {
    table
        .select(&BODY_ROW)
        .map(|tr| tr.select(&CELL).map(text_of).collect::<Vec<_>>())
        .filter(|cells| !cells.is_empty())
        .collect()
}

impl Table {
    pub fn parse(table: ElementRef) -> Table {
        let headers: Vec<String> = table.select(&HEAD_CELL).map(text_of).collect();
        Table::from_cells(headers, body_rows(table))
    }

    /// Synthesize `col_N` headers when there are none, disambiguate duplicate
    /// headers, and pad/cut rows to the header count.
    pub fn from_cells(headers: Vec<String>, rows: Vec<Vec<String>>) -> Table {
        let headers = if headers.is_empty() {
            let width = rows.first().map(Vec::len).unwrap_or(0);
            (1..=width).map(|i| format!("col_{}", i)).collect()
        } else {
            headers
        };
        let headers = unique_headers(&headers);
        let width = headers.len();

        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, String::new());
                row
            })
            .collect();

        Table { headers, rows }
    }

    /// Index of the first header containing `part`, case-insensitively.
    pub fn column(&self, part: &str) -> Option<usize> {
        let part = part.to_lowercase();
        self.headers
            .iter()
            .position(|h| h.to_lowercase().contains(&part))
    }

    /// Index of the header equal to `name`.
    pub fn column_exact(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn cell(&self, row: usize, col: usize) -> Option<&str> {
        self.rows.get(row)?.get(col).map(String::as_str)
    }

    /// Drop every column whose header contains any of `needles`.
    pub fn drop_columns(&mut self, needles: &[String]) {
        let keep: Vec<bool> = self
            .headers
            .iter()
            .map(|h| !needles.iter().any(|n| h.contains(n.as_str())))
            .collect();
        let retain = |cells: &mut Vec<String>| {
            let mut i = 0;
            cells.retain(|_| {
                let k = keep[i];
                i += 1;
                k
            });
        };
        retain(&mut self.headers);
        for row in &mut self.rows {
            retain(row);
        }
    }

    pub fn records(&self) -> Vec<Record> {
        self.rows
            .iter()
            .map(|row| {
                self.headers
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect()
            })
            .collect()
    }
}

/// `["A", "B", "A"]` → `["A", "B", "A__2"]`.
fn unique_headers(headers: &[String]) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    headers
        .iter()
        .map(|h| {
            let h = h.trim().to_string();
            let n = seen.entry(h.clone()).or_insert(0);
            *n += 1;
            if *n == 1 {
                h
            } else {
                format!("{}__{}", h, n)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Html;

    fn s(v: &[&str]) -> Vec<String> {
        v.iter().map(|x| x.to_string()).collect()
    }

    #[test]
    fn header_keyed_records() {
        let html = r#"<table>
            <thead><tr><th>Adres</th><th>Telefon</th><th>Adres</th></tr></thead>
            <tbody>
              <tr><td> Karaağaç Cad. No:2 </td><td>0212</td></tr>
              <tr><td>Tuzla</td><td>0216</td><td>Yedek</td><td>fazla</td></tr>
            </tbody></table>"#;
        let doc = Html::parse_document(html);
        let el = doc.select(&Selector::parse("table").unwrap()).next().unwrap();
        let t = Table::parse(el);
        assert_eq!(t.headers, s(&["Adres", "Telefon", "Adres__2"]));
        assert_eq!(t.rows[0], s(&["Karaağaç Cad. No:2", "0212", ""]));
        assert_eq!(t.rows[1], s(&["Tuzla", "0216", "Yedek"]));
        let recs = t.records();
        assert_eq!(recs[0]["Adres"], "Karaağaç Cad. No:2");
        assert_eq!(recs[0]["Adres__2"], "");
    }

    #[test]
    fn synthesized_headers() {
        let t = Table::from_cells(vec![], vec![s(&["a", "b"]), s(&["c"])]);
        assert_eq!(t.headers, s(&["col_1", "col_2"]));
        assert_eq!(t.rows[1], s(&["c", ""]));
    }

    #[test]
    fn triple_duplicates() {
        assert_eq!(
            unique_headers(&s(&["X", "X", " X ", "Y"])),
            s(&["X", "X__2", "X__3", "Y"])
        );
    }

    #[test]
    fn drop_by_substring() {
        let mut t = Table::from_cells(
            s(&["Adı-Soyadı", "Bağımsızlık Beyanı", "Görevi", "Yer Aldığı Komiteler"]),
            vec![s(&["Ali Veli", "Var", "Başkan", "Denetim"])],
        );
        t.drop_columns(&s(&["Bağımsızlık Beyanı", "Yer Aldığı Komiteler"]));
        assert_eq!(t.headers, s(&["Adı-Soyadı", "Görevi"]));
        assert_eq!(t.rows[0], s(&["Ali Veli", "Başkan"]));
    }

    #[test]
    fn column_lookup() {
        let t = Table::from_cells(s(&["Fiili Dolaşımdaki Pay Tutarı(TL)", "Fiili Dolaşımdaki Pay Oranı(%)"]), vec![]);
        assert_eq!(t.column("tutarı"), Some(0));
        assert_eq!(t.column("Oranı"), Some(1));
        assert_eq!(t.column("Yok"), None);
        assert_eq!(t.cell(0, 0), None);
    }
}
