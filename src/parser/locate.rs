use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};

use crate::text::normalize_whitespace;

static H3: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h3").unwrap());
static LINK: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a").unwrap());
static TABLE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("table").unwrap());
static TH: LazyLock<Selector> = LazyLock::new(|| Selector::parse("th").unwrap());
static PARAGRAPH: LazyLock<Selector> = LazyLock::new(|| Selector::parse("p").unwrap());
static SPAN: LazyLock<Selector> = LazyLock::new(|| Selector::parse("span").unwrap());
static SECTION_TITLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("[class*='company__sgbf-h6-title']").unwrap());

const TITLE_CLASS: &str = "company__sgbf-h6-title";
const ACCORDION_CLASS: &str = "sgbf__accordion-container";
const HTML_BODY_CLASS: &str = "html__parser-container";
const VALUE_CLASS: &str = "font-normal";

/// Whitespace-normalized text of an element, text nodes joined by spaces.
pub fn text_of(el: ElementRef) -> String {
    normalize_whitespace(&el.text().collect::<Vec<_>>().join(" "))
}

/// Non-empty trimmed text nodes, one per line as a browser would show them.
pub fn lines_of(el: ElementRef) -> Vec<String> {
    el.text()
        .map(normalize_whitespace)
        .filter(|l| !l.is_empty())
        .collect()
}

pub fn has_class(el: ElementRef, part: &str) -> bool {
    el.value().attr("class").is_some_and(|c| c.contains(part))
}

pub fn next_element_sibling(el: ElementRef) -> Option<ElementRef> {
    el.next_siblings().find_map(ElementRef::wrap)
}

pub fn ancestor_with_class<'a>(el: ElementRef<'a>, part: &str) -> Option<ElementRef<'a>> {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|a| a.value().name() == "div" && has_class(*a, part))
}

fn inside_table(el: ElementRef) -> bool {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .any(|a| a.value().name() == "table")
}

// ── Heading lookups ──

/// `<h3>` whose normalized text equals `label` exactly.
pub fn heading<'a>(doc: &'a Html, label: &str) -> Option<ElementRef<'a>> {
    let label = normalize_whitespace(label);
    doc.select(&H3).find(|h| text_of(*h) == label)
}

/// The element right after the labeled heading.
pub fn following_container<'a>(doc: &'a Html, label: &str) -> Option<ElementRef<'a>> {
    heading(doc, label).and_then(next_element_sibling)
}

/// Text of the element after the heading, or its link target when it is a link.
pub fn following_text(doc: &Html, label: &str) -> Option<String> {
    let el = following_container(doc, label)?;
    let value = if el.value().name() == "a" {
        el.value()
            .attr("href")
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| text_of(el))
    } else {
        text_of(el)
    };
    Some(value).filter(|v| !v.is_empty())
}

/// Texts of every link under `container`, in document order.
pub fn link_texts(container: ElementRef) -> Vec<String> {
    container
        .select(&LINK)
        .map(text_of)
        .filter(|t| !t.is_empty())
        .collect()
}

/// Texts of every element under `container` matching `selector`, in document order.
pub fn texts_matching(container: ElementRef, selector: &Selector) -> Vec<String> {
    container
        .select(selector)
        .map(text_of)
        .filter(|t| !t.is_empty())
        .collect()
}

// ── Section-title lookups ──

/// The section title block whose text contains `label`.
pub fn section_title<'a>(doc: &'a Html, label: &str) -> Option<ElementRef<'a>> {
    let label = normalize_whitespace(label);
    doc.select(&SECTION_TITLE)
        .filter(|t| t.value().name() == "div")
        .find(|t| text_of(*t).contains(&label))
        .or_else(|| {
            // Title text wrapped in a non-div marker: anchor on its div ancestor.
            doc.select(&SECTION_TITLE)
                .find(|t| text_of(*t).contains(&label))
                .and_then(|t| ancestor_with_class(t, TITLE_CLASS))
        })
}

/// Element siblings after the section title: the section's body.
fn section_body<'a>(title: ElementRef<'a>) -> impl Iterator<Item = ElementRef<'a>> {
    title
        .next_siblings()
        .filter_map(ElementRef::wrap)
        .filter(|e| e.value().name() == "div")
}

/// First table in the body of the section titled `label`.
pub fn section_table<'a>(doc: &'a Html, label: &str) -> Option<ElementRef<'a>> {
    let title = section_title(doc, label)?;
    section_body(title).find_map(|div| div.select(&TABLE).next())
}

/// Paragraph texts of the rich-text block right under the section title.
pub fn section_paragraphs(doc: &Html, label: &str) -> Option<Vec<String>> {
    let title = section_title(doc, label)?;
    let body = section_body(title).next()?;
    let paragraphs = body
        .select(&PARAGRAPH)
        .filter(|p| ancestor_with_class(*p, HTML_BODY_CLASS).is_some())
        .map(text_of)
        .filter(|t| !t.is_empty())
        .collect();
    Some(paragraphs)
}

/// The accordion container holding the section titled `label`.
pub fn accordion<'a>(doc: &'a Html, label: &str) -> Option<ElementRef<'a>> {
    section_title(doc, label).and_then(|t| ancestor_with_class(t, ACCORDION_CLASS))
}

/// First plain value span of the accordion titled `label`, ignoring table cells.
pub fn accordion_value(doc: &Html, label: &str) -> Option<String> {
    accordion(doc, label)?
        .select(&SPAN)
        .filter(|s| has_class(*s, VALUE_CLASS) && !inside_table(*s))
        .map(text_of)
        .next()
        .filter(|v| !v.is_empty())
}

// ── Table lookups ──

/// First table with a header cell containing `needle`.
pub fn table_with_header<'a>(doc: &'a Html, needle: &str) -> Option<ElementRef<'a>> {
    let needle = normalize_whitespace(needle);
    doc.select(&TABLE)
        .find(|t| t.select(&TH).any(|th| text_of(th).contains(&needle)))
}

// ── Links ──

/// `href` of the element with the given id.
pub fn href_by_id(doc: &Html, id: &str) -> Option<String> {
    let sel = Selector::parse(&format!("#{}", id)).ok()?;
    doc.select(&sel)
        .next()
        .and_then(|a| a.value().attr("href"))
        .map(str::to_string)
}

/// First link whose `href` contains `part`.
pub fn href_containing(doc: &Html, part: &str) -> Option<String> {
    doc.select(&LINK)
        .filter_map(|a| a.value().attr("href"))
        .find(|h| h.contains(part))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUMMARY: &str = r#"
        <html><body>
          <h3>İnternet   Adresi</h3><a href="https://www.arcelik.com.tr">arcelik.com.tr</a>
          <h3>Bağımsız Denetim Kuruluşu</h3><div> PwC  Bağımsız Denetim </div>
          <h3>Boş</h3><div>   </div>
          <h3>Şirketin Dahil Olduğu Endeksler</h3>
          <div><a>BIST 100</a><a> BIST 30 </a><a></a></div>
        </body></html>"#;

    #[test]
    fn following_link_target() {
        let doc = Html::parse_document(SUMMARY);
        assert_eq!(
            following_text(&doc, "İnternet Adresi").as_deref(),
            Some("https://www.arcelik.com.tr")
        );
    }

    #[test]
    fn following_plain_text() {
        let doc = Html::parse_document(SUMMARY);
        assert_eq!(
            following_text(&doc, "Bağımsız Denetim Kuruluşu").as_deref(),
            Some("PwC Bağımsız Denetim")
        );
    }

    #[test]
    fn missing_or_empty_label_is_none() {
        let doc = Html::parse_document(SUMMARY);
        assert_eq!(following_text(&doc, "Yok Böyle Bir Başlık"), None);
        assert_eq!(following_text(&doc, "Boş"), None);
        // Exact match only
        assert_eq!(following_text(&doc, "İnternet"), None);
    }

    #[test]
    fn chip_links_in_order() {
        let doc = Html::parse_document(SUMMARY);
        let cont = following_container(&doc, "Şirketin Dahil Olduğu Endeksler").unwrap();
        assert_eq!(link_texts(cont), vec!["BIST 100", "BIST 30"]);
    }

    #[test]
    fn section_lookups() {
        let html = r#"
            <div class="sgbf__accordion-container">
              <div class="company__sgbf-h6-title"><h6>Ödenmiş/Çıkarılmış Sermaye</h6></div>
              <div><span class="text-sm font-normal">675.728.205,00</span>
                <table><tr><td><span class="font-normal">x</span></td></tr></table></div>
            </div>
            <div class="sgbf__accordion-container">
              <div class="company__sgbf-h6-title"><h6>Üretim Tesislerinin Bulunduğu Adresler</h6></div>
              <div><div class="html__parser-container"><p>Tuzla / İstanbul</p><p></p><p>Eskişehir</p></div></div>
              <div><div class="html__parser-container"><p>ignored</p></div></div>
            </div>"#;
        let doc = Html::parse_document(html);
        assert_eq!(
            accordion_value(&doc, "Ödenmiş/Çıkarılmış Sermaye").as_deref(),
            Some("675.728.205,00")
        );
        assert_eq!(
            section_paragraphs(&doc, "Üretim Tesislerinin Bulunduğu Adresler"),
            Some(vec!["Tuzla / İstanbul".to_string(), "Eskişehir".to_string()])
        );
        assert_eq!(accordion_value(&doc, "Kayıtlı Sermaye Tavanı"), None);
        assert_eq!(section_paragraphs(&doc, "Yok"), None);
    }

    #[test]
    fn table_by_header_substring() {
        let html = r#"<table id="a"><thead><tr><th>Başka</th></tr></thead></table>
                      <table id="b"><thead><tr><th>Oy Hakları Bilgisi</th></tr></thead></table>"#;
        let doc = Html::parse_document(html);
        let t = table_with_header(&doc, "Oy Hakları").unwrap();
        assert_eq!(t.value().attr("id"), Some("b"));
        assert!(table_with_header(&doc, "ÖZET BİLGİLER").is_none());
    }

    #[test]
    fn tab_links() {
        let html = r#"<a id="general-tab" href="/tr/sirket-bilgileri/genel/123">Genel</a>
                      <a href="/tr/sirket-bilgileri/kurumsal/123">Kurumsal</a>"#;
        let doc = Html::parse_document(html);
        assert_eq!(href_by_id(&doc, "general-tab").as_deref(), Some("/tr/sirket-bilgileri/genel/123"));
        assert_eq!(href_by_id(&doc, "corporate-tab"), None);
        assert_eq!(href_containing(&doc, "/kurumsal").as_deref(), Some("/tr/sirket-bilgileri/kurumsal/123"));
    }
}
