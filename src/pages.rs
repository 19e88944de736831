use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use scraper::{Html, Selector};
use spider_client::shapes::request::{ReturnFormat, ReturnFormatHandling};
use spider_client::{RequestParams, Spider};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::parser::locate::{href_by_id, href_containing, lines_of};
use crate::parser::rules::Page;

const SITE_ROOT: &str = "https://www.kap.org.tr";
const LISTING_URL: &str = "https://www.kap.org.tr/tr/bist-sirketler";
const MAX_RETRIES: u32 = 3;
const BASE_BACKOFF_MS: u64 = 2000;

/// Raw HTML of the company tabs that could be fetched.
#[derive(Debug, Clone, Default)]
pub struct PageSet {
    pages: HashMap<Page, String>,
}

impl PageSet {
    pub fn insert(&mut self, page: Page, html: String) {
        self.pages.insert(page, html);
    }

    pub fn get(&self, page: Page) -> Option<&str> {
        self.pages.get(&page).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

/// Where company pages come from.
pub trait PageSource {
    async fn fetch(&self, ticker: &str) -> Result<PageSet>;
}

// ── Snapshots on disk ──

/// Reads `<dir>/<TICKER>/{ozet,genel,kurumsal,katilim}.html`.
pub struct SnapshotSource {
    dir: PathBuf,
}

impl SnapshotSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        SnapshotSource { dir: dir.into() }
    }

    pub fn read(&self, ticker: &str) -> Result<PageSet> {
        let base = self.dir.join(ticker);
        let mut set = PageSet::default();
        for page in Page::ALL {
            let path = base.join(format!("{}.html", page.slug()));
            if !path.is_file() {
                debug!(ticker, page = ?page, "no snapshot");
                continue;
            }
            let html = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            set.insert(page, html);
        }
        if set.is_empty() {
            bail!("no snapshot pages under {}", base.display());
        }
        Ok(set)
    }
}

impl PageSource for SnapshotSource {
    async fn fetch(&self, ticker: &str) -> Result<PageSet> {
        self.read(ticker)
    }
}

// ── Rendered through spider.cloud ──

pub struct SpiderSource {
    spider: Spider,
    listing: OnceCell<String>,
}

impl SpiderSource {
    pub fn new(api_key: String) -> Result<Self> {
        let spider = Spider::new(Some(api_key))
            .map_err(|e| anyhow!("Failed to create Spider client: {}", e))?;
        Ok(SpiderSource {
            spider,
            listing: OnceCell::new(),
        })
    }

    /// The listing page is the same for every ticker; render it once.
    async fn listing(&self) -> Result<&str> {
        let html = self
            .listing
            .get_or_try_init(|| render_with_retry(&self.spider, LISTING_URL))
            .await?;
        Ok(html.as_str())
    }
}

impl PageSource for SpiderSource {
    async fn fetch(&self, ticker: &str) -> Result<PageSet> {
        let listing = self.listing().await?;
        let company = company_href(listing, ticker)
            .ok_or_else(|| anyhow!("{}: company page not found in listing", ticker))?;
        debug!(ticker, url = %company, "company page");

        let summary = render_with_retry(&self.spider, &company).await?;
        let tabs: Vec<(Page, Option<String>)> = [Page::General, Page::Corporate, Page::Participation]
            .into_iter()
            .map(|p| (p, tab_href(&summary, p)))
            .collect();

        let mut set = PageSet::default();
        set.insert(Page::Summary, summary);
        for (page, href) in tabs {
            let Some(url) = href else {
                warn!(ticker, page = ?page, "tab link not found");
                continue;
            };
            match render_with_retry(&self.spider, &url).await {
                Ok(html) => set.insert(page, html),
                Err(e) => warn!(ticker, page = ?page, "tab render failed: {:#}", e),
            }
        }
        Ok(set)
    }
}

/// Company page link from the listing table. A row whose first cell has a
/// line equal to the ticker wins; any row mentioning the ticker is the fallback.
pub fn company_href(listing_html: &str, ticker: &str) -> Option<String> {
    let row_sel = Selector::parse("#financialTable tbody tr").ok()?;
    let first_cell = Selector::parse("td").ok()?;
    let link = Selector::parse("a").ok()?;

    let doc = Html::parse_document(listing_html);
    let ticker = ticker.trim().to_uppercase();

    let rows: Vec<_> = doc
        .select(&row_sel)
        .filter_map(|tr| {
            let td = tr.select(&first_cell).next()?;
            let href = td.select(&link).next()?.value().attr("href")?.to_string();
            let lines: Vec<String> = lines_of(td).iter().map(|l| l.to_uppercase()).collect();
            let row_text = lines_of(tr).join(" ").to_uppercase();
            Some((lines, row_text, href))
        })
        .collect();

    let exact = rows.iter().find(|(lines, _, _)| {
        lines
            .iter()
            .any(|l| l == &ticker || l.split(',').any(|code| code.trim() == ticker))
    });
    let loose = || rows.iter().find(|(_, text, _)| text.contains(&ticker));

    exact.or_else(loose).map(|(_, _, href)| absolute_url(href))
}

/// Link to a company tab from the summary page: the tab's id first, then any
/// link whose target looks like that tab.
pub fn tab_href(summary_html: &str, page: Page) -> Option<String> {
    let (id, hint) = match page {
        Page::Summary => return None,
        Page::General => ("general-tab", "/sirket-bilgileri/genel/"),
        Page::Corporate => ("corporate-tab", "/kurumsal"),
        Page::Participation => ("participation-tab", "/katilim"),
    };
    let doc = Html::parse_document(summary_html);
    href_by_id(&doc, id)
        .filter(|h| !h.trim().is_empty())
        .or_else(|| href_containing(&doc, hint))
        .map(|h| absolute_url(&h))
}

fn absolute_url(href: &str) -> String {
    let href = href.trim();
    if href.starts_with("http://") || href.starts_with("https://") {
        href.to_string()
    } else if href.starts_with('/') {
        format!("{}{}", SITE_ROOT, href)
    } else {
        format!("{}/{}", SITE_ROOT, href)
    }
}

async fn render_with_retry(spider: &Spider, url: &str) -> Result<String> {
    let mut last_err = None;
    for attempt in 0..=MAX_RETRIES {
        match render(spider, url).await {
            Ok(html) => return Ok(html),
            Err(e) => {
                let msg = e.to_string();
                let retryable = msg.contains("429")
                    || msg.contains("rate")
                    || msg.contains("500")
                    || msg.contains("502")
                    || msg.contains("503");
                if !retryable || attempt == MAX_RETRIES {
                    return Err(e);
                }
                let backoff = Duration::from_millis(BASE_BACKOFF_MS * 2u64.pow(attempt));
                warn!(
                    "Render failed for {} (attempt {}/{}), backing off {:.1}s",
                    url,
                    attempt + 1,
                    MAX_RETRIES,
                    backoff.as_secs_f64()
                );
                last_err = Some(e);
                tokio::time::sleep(backoff).await;
            }
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow!("render failed: {}", url)))
}

async fn render(spider: &Spider, url: &str) -> Result<String> {
    let params = RequestParams {
        return_format: Some(ReturnFormatHandling::Single(ReturnFormat::Raw)),
        ..Default::default()
    };

    let start = Instant::now();
    let response = spider
        .scrape_url(url, Some(params), "application/json")
        .await
        .map_err(|e| anyhow!("Spider scrape failed for {}: {}", url, e))?;
    debug!(url, ms = start.elapsed().as_millis() as u64, "rendered");

    let parsed: serde_json::Value = match response.as_str() {
        Some(s) => serde_json::from_str(s).unwrap_or(response.clone()),
        None => response,
    };
    let first = parsed.as_array().and_then(|arr| arr.first());

    if let Some(status) = first.and_then(|obj| obj.get("status")).and_then(|s| s.as_i64()) {
        if status >= 400 {
            bail!("{} returned status {}", url, status);
        }
    }

    first
        .and_then(|obj| obj.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("No content in spider response for {}", url))
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"
        <table id="financialTable"><tbody>
          <tr><td><a href="/tr/sirket-ozeti/ozet/1">ARCLKX</a></td><td>ARÇELİK X</td></tr>
          <tr><td><a href="/tr/sirket-ozeti/ozet/2">ARCLK</a></td><td>ARÇELİK A.Ş.</td></tr>
          <tr><td><a href="https://www.kap.org.tr/tr/sirket-ozeti/ozet/3">ISCTR, ISATR, ISBTR</a></td><td>TÜRKİYE İŞ BANKASI</td></tr>
          <tr><td>başlık</td></tr>
        </tbody></table>"#;

    #[test]
    fn exact_listing_match_beats_prefix() {
        assert_eq!(
            company_href(LISTING, "arclk").as_deref(),
            Some("https://www.kap.org.tr/tr/sirket-ozeti/ozet/2")
        );
    }

    #[test]
    fn multi_code_cell_and_loose_fallback() {
        assert_eq!(
            company_href(LISTING, "ISATR").as_deref(),
            Some("https://www.kap.org.tr/tr/sirket-ozeti/ozet/3")
        );
        // Only the company name mentions it
        assert_eq!(
            company_href(LISTING, "BANKASI").as_deref(),
            Some("https://www.kap.org.tr/tr/sirket-ozeti/ozet/3")
        );
        assert_eq!(company_href(LISTING, "THYAO"), None);
    }

    #[test]
    fn tab_links_from_fixture() {
        let html = std::fs::read_to_string("tests/fixtures/ARCLK/ozet.html").unwrap();
        assert_eq!(
            tab_href(&html, Page::Corporate).as_deref(),
            Some("https://www.kap.org.tr/tr/sirket-bilgileri/kurumsal/4028e4a140ee35c70140ee4ed0f00009")
        );
        assert_eq!(tab_href(&html, Page::Summary), None);
    }

    #[test]
    fn tab_link_by_href_hint() {
        let html = r#"<a href="/tr/sirket-bilgileri/katilim/42">Katılım</a>"#;
        assert_eq!(
            tab_href(html, Page::Participation).as_deref(),
            Some("https://www.kap.org.tr/tr/sirket-bilgileri/katilim/42")
        );
        assert_eq!(tab_href(html, Page::General), None);
    }

    #[test]
    fn snapshot_reads_present_pages() {
        let set = SnapshotSource::new("tests/fixtures").read("ARCLK").unwrap();
        assert!(Page::ALL.iter().all(|&p| set.get(p).is_some()));
        assert!(set.get(Page::Participation).unwrap().contains("ÖZET BİLGİLER"));
        assert!(SnapshotSource::new("tests/fixtures").read("NOPE").is_err());
    }
}
