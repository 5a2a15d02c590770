//! Product identity derivation
//!
//! A product id is `<category-slug>:<16 hex chars>` where the hex part is the
//! leading half of a blake3 digest over the category slug and the normalized
//! signature. The function is pure: the same inputs give the same id on every
//! machine and across restarts.

/// Markers that appear in listing titles but do not distinguish products.
const NOISE_TOKENS: &[&str] = &["refurbished", "翻新", "(refurbished)"];

/// Lowercase, trim, collapse whitespace and drop refurbished markers.
pub fn normalize_signature(raw: &str) -> String {
    raw.split_whitespace()
        .map(str::to_lowercase)
        .filter(|token| !NOISE_TOKENS.contains(&token.as_str()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Build the identity signature for a catalog listing.
///
/// The part number is the strongest discriminator the catalog offers, so it
/// leads; the title disambiguates listings that share a part number prefix.
pub fn signature(part_number: &str, title: &str) -> String {
    let part = part_number.trim();
    if part.is_empty() {
        normalize_signature(title)
    } else {
        normalize_signature(&format!("{part} {title}"))
    }
}

fn category_slug(category: &str) -> String {
    let slug: String = category
        .trim()
        .chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    let slug = slug.trim_matches('-').to_string();
    if slug.is_empty() { "uncategorized".to_string() } else { slug }
}

/// Stable identity over `(category, signature)`.
pub fn product_id(category: &str, signature: &str) -> String {
    let slug = category_slug(category);
    let normalized = normalize_signature(signature);

    let mut hasher = blake3::Hasher::new();
    hasher.update(slug.as_bytes());
    hasher.update(&[0x1f]);
    hasher.update(normalized.as_bytes());
    let digest = hasher.finalize();

    format!("{slug}:{}", &digest.to_hex().as_str()[..16])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn identity_is_deterministic() {
        let a = product_id("Mac", "FN3L3CH/A MacBook Air 13 英寸 M2 芯片");
        let b = product_id("Mac", "FN3L3CH/A MacBook Air 13 英寸 M2 芯片");
        assert_eq!(a, b);
        assert!(a.starts_with("mac:"));
        assert_eq!(a.len(), "mac:".len() + 16);
    }

    #[test]
    fn normalization_absorbs_cosmetic_differences() {
        let a = product_id("iPad", "翻新 iPad Air  Wi-Fi 64GB");
        let b = product_id("ipad", "ipad air wi-fi 64gb");
        assert_eq!(a, b);
    }

    #[test]
    fn category_participates_in_identity() {
        assert_ne!(product_id("Mac", "same title"), product_id("iPad", "same title"));
    }

    #[test]
    fn distinct_signatures_do_not_collide() {
        let ids: HashSet<String> = (0..2_000)
            .map(|n| product_id("Mac", &format!("MacBook Pro 14 M3 {n}GB")))
            .collect();
        assert_eq!(ids.len(), 2_000);
    }

    #[test]
    fn signature_prefers_part_number() {
        assert_eq!(signature("MX2E3CH/A", "Mac mini"), "mx2e3ch/a mac mini");
        assert_eq!(signature("  ", "Mac mini"), "mac mini");
    }
}
