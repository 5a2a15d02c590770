//! Product detail page parsing
//!
//! Pulls the marketing description out of the page's meta tags and the
//! labelled spec rows (`dt`/`dd`, `th`/`td`) out of its body.

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use std::sync::Arc;
use tracing::debug;

use crate::crawling::enrichment::{DetailFetcher, EnrichmentError, ProductDetail};
use crate::domain::{Product, ProductSpecs};
use crate::infrastructure::http_client::HttpClient;
use crate::infrastructure::specs_parser::parse_title_specs;

const DESCRIPTION_SELECTORS: &[&str] = &[
    r#"meta[name="description"]"#,
    r#"meta[property="og:description"]"#,
    r#"meta[name="twitter:description"]"#,
];
const MIN_DESCRIPTION_CHARS: usize = 16;
const MAX_DESCRIPTION_CHARS: usize = 499;

fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

fn usable_description(raw: &str) -> Option<String> {
    let text = raw.replace(['\u{a0}', '\u{200b}'], " ");
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let chars = text.chars().count();
    let plausible = (MIN_DESCRIPTION_CHARS..=MAX_DESCRIPTION_CHARS).contains(&chars)
        && !text.starts_with("http")
        && !text.contains('<')
        && !text.contains("href=");
    plausible.then_some(text)
}

fn extract_description(document: &Html) -> Option<String> {
    DESCRIPTION_SELECTORS.iter().find_map(|css| {
        let selector = Selector::parse(css).ok()?;
        document
            .select(&selector)
            .filter_map(|meta| meta.value().attr("content"))
            .find_map(usable_description)
    })
}

fn extract_spec_rows(document: &Html, specs: &mut ProductSpecs) {
    for (label_css, value_css) in [("dt", "dd"), ("th", "td")] {
        let (Ok(labels), Ok(values)) = (Selector::parse(label_css), Selector::parse(value_css)) else {
            continue;
        };
        for (label, value) in document.select(&labels).zip(document.select(&values)) {
            let (label, value) = (element_text(label), element_text(value));
            if !label.is_empty() && label.chars().count() <= 40 {
                specs.insert_detail(&label, &value);
            }
        }
    }
}

/// Parse a detail page. Typed fields the rows leave empty are filled from
/// the description.
pub fn parse_detail_page(html: &str) -> ProductDetail {
    let document = Html::parse_document(html);
    let description = extract_description(&document).unwrap_or_default();

    let mut specs = ProductSpecs::default();
    extract_spec_rows(&document, &mut specs);
    if !description.is_empty() {
        specs.merge_missing(&parse_title_specs(&description));
    }

    ProductDetail { description, specs }
}

/// Fetches detail pages over HTTP. Retries are left to the caller.
pub struct HtmlDetailFetcher {
    client: Arc<HttpClient>,
}

impl HtmlDetailFetcher {
    pub const fn new(client: Arc<HttpClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DetailFetcher for HtmlDetailFetcher {
    async fn fetch_detail(&self, product: &Product) -> Result<ProductDetail, EnrichmentError> {
        let html = self
            .client
            .get_text_once(&product.product_url)
            .await
            .map_err(|e| EnrichmentError::Fetch(e.to_string()))?;
        let detail = parse_detail_page(&html);
        debug!(
            "Detail page for {}: {} description chars, {} spec rows",
            product.id,
            detail.description.chars().count(),
            detail.specs.extras.len()
        );
        Ok(detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_description_and_rows() {
        let html = r#"<html><head>
            <meta name="description" content="http://tracking.example/">
            <meta property="og:description" content="配备 Apple M2 芯片的 MacBook Air, 16GB 统一内存, 轻薄便携。">
            </head><body>
            <dl><dt>芯片</dt><dd>Apple M2 芯片</dd><dt>Battery</dt><dd>Up to 18 hours</dd></dl>
            </body></html>"#;

        let detail = parse_detail_page(html);

        assert!(detail.description.starts_with("配备 Apple M2"));
        assert_eq!(detail.specs.chip.as_deref(), Some("Apple M2 芯片"));
        assert_eq!(detail.specs.extras.get("Battery").map(String::as_str), Some("Up to 18 hours"));
        assert_eq!(detail.specs.memory.as_deref(), Some("16GB"));
        assert!(!detail.is_empty());
    }

    #[test]
    fn short_or_markup_descriptions_are_ignored() {
        assert!(usable_description("too short").is_none());
        assert!(usable_description("<p>an html fragment that is long enough</p>").is_none());
        assert!(usable_description("A perfectly reasonable product description").is_some());
    }

    #[test]
    fn empty_page_yields_empty_detail() {
        assert!(parse_detail_page("<html><body><p>nothing</p></body></html>").is_empty());
    }
}
