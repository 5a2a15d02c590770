//! Refurbished catalog page parser
//!
//! Listing pages embed their grid as `window.REFURB_GRID_BOOTSTRAP = {...};`.
//! The object is cut out with a brace-matching scan and each entry of its
//! `tiles` array becomes one candidate record.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, error};
use url::Url;

use crate::crawling::extractor::{CandidateParser, ExtractionError, ParseContext};
use crate::domain::{Product, signature};
use crate::infrastructure::specs_parser::parse_title_specs;

const BOOTSTRAP_MARKER: &str = "window.REFURB_GRID_BOOTSTRAP";
const TITLE_PREFIX: &str = "翻新 ";
/// Refurbished units list at roughly 85% of the new price
const ESTIMATED_PRICE_RATIO: f64 = 0.85;

static PRICE_NUMBER: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"[0-9,]+(?:\.[0-9]+)?")
        .inspect_err(|e| error!("Invalid price pattern: {}", e))
        .ok()
});

/// Last number in a price label, commas stripped ("RMB 3,799.00" → 3799.0).
pub fn clean_price(raw: &str) -> f64 {
    PRICE_NUMBER
        .as_ref()
        .and_then(|re| re.find_iter(raw).last())
        .and_then(|m| m.as_str().replace(',', "").parse().ok())
        .unwrap_or(0.0)
}

/// Accepts `"¥3,799"`, `3799`, or `{"raw_amount": "3799.00", "amount": "RMB 3,799"}`.
fn price_value(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::String(s)) => clean_price(s),
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::Object(map)) => map
            .get("raw_amount")
            .or_else(|| map.get("amount"))
            .and_then(Value::as_str)
            .map_or(0.0, clean_price),
        _ => 0.0,
    }
}

/// Pages that list accessories under their own name share one category.
pub fn normalize_category(category: &str) -> &str {
    match category {
        "HomePod" | "AirPods" | "Apple TV" | "Accessories" => "Accessory",
        other => other,
    }
}

/// Cut the bootstrap object out of a page and parse it.
pub fn extract_bootstrap_json(html: &str) -> Result<Value, ExtractionError> {
    let marker = html
        .find(BOOTSTRAP_MARKER)
        .ok_or_else(|| ExtractionError::Parse("REFURB_GRID_BOOTSTRAP not found".into()))?;
    let after_marker = &html[marker + BOOTSTRAP_MARKER.len()..];
    let equals = after_marker
        .find('=')
        .ok_or_else(|| ExtractionError::Parse("invalid REFURB_GRID_BOOTSTRAP format".into()))?;
    let body = after_marker[equals + 1..].trim_start();
    if !body.starts_with('{') {
        return Err(ExtractionError::Parse("expected '{' after REFURB_GRID_BOOTSTRAP".into()));
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    let mut end = None;
    for (i, c) in body.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    end = Some(i);
                    break;
                }
            }
            _ => {}
        }
    }

    let end = end.ok_or_else(|| ExtractionError::Parse(format!("unbalanced braces (depth {depth})")))?;
    serde_json::from_str(&body[..=end])
        .map_err(|e| ExtractionError::Parse(format!("bootstrap JSON: {e} (length {})", end + 1)))
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BootstrapCatalogParser;

impl BootstrapCatalogParser {
    pub const fn new() -> Self {
        Self
    }

    fn parse_tile(tile: &Value, ctx: &ParseContext, category: &str) -> Option<Product> {
        let title = tile.get("title").and_then(Value::as_str).filter(|t| !t.is_empty())?;
        let price_obj = tile.get("price");

        let price = price_value(price_obj.and_then(|p| p.get("currentPrice")));
        let mut original_price = price_value(price_obj.and_then(|p| p.get("originalPrice")));
        if original_price <= 0.0 && price > 0.0 {
            original_price = price / ESTIMATED_PRICE_RATIO;
        }

        let product_url = tile
            .get("productDetailsUrl")
            .and_then(Value::as_str)
            .map(|href| resolve_url(&ctx.page_url, href))
            .unwrap_or_default();

        let image_url = tile
            .pointer("/image/sources/0/srcSet")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let part_number = price_obj
            .and_then(|p| p.get("partNumber"))
            .and_then(Value::as_str)
            .filter(|p| !p.is_empty())
            .or_else(|| tile.pointer("/omnitureModel/partNumber").and_then(Value::as_str))
            .unwrap_or_default();

        let name = title.strip_prefix(TITLE_PREFIX).unwrap_or(title).trim();
        let mut product = Product::candidate(category, &ctx.region, name, &signature(part_number, title), price)
            .with_original_price(original_price)
            .with_url(product_url);
        product.image_url = image_url;
        product.specs = name.split_whitespace().collect::<Vec<_>>().join(" ");
        product.specs_detail = parse_title_specs(name);
        Some(product)
    }
}

fn resolve_url(page_url: &str, href: &str) -> String {
    Url::parse(page_url)
        .and_then(|base| base.join(href))
        .map_or_else(|_| href.to_string(), String::from)
}

impl CandidateParser for BootstrapCatalogParser {
    fn parse_candidates(&self, payload: &str, ctx: &ParseContext) -> Result<Vec<Product>, ExtractionError> {
        let bootstrap = extract_bootstrap_json(payload)?;
        let category = normalize_category(&ctx.category);

        let Some(tiles) = bootstrap.get("tiles").and_then(Value::as_array) else {
            debug!("No tiles on {}", ctx.page_url);
            return Ok(Vec::new());
        };

        let products: Vec<Product> = tiles
            .iter()
            .filter_map(|tile| Self::parse_tile(tile, ctx, category))
            .collect();
        debug!("Parsed {}/{} tiles from {}", products.len(), tiles.len(), ctx.page_url);
        Ok(products)
    }
}
