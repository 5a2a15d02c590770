//! Budget and use-case driven recommendations
//!
//! Candidates are filtered strictly on budget, category family, chip and
//! storage. When nothing survives, only the budget and the base category are
//! kept. Survivors are scored from a base of 50 and carry up to three short
//! reasons.

use serde::{Deserialize, Serialize};

use crate::application::dto::{Recommendation, RecommendationDto};
use crate::domain::{Product, StockStatus};

pub const MAX_RECOMMENDATIONS: usize = 20;
const MAX_REASONS: usize = 3;
const BASE_SCORE: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UseCase {
    #[serde(alias = "office")]
    OfficePortable,
    OfficeDesktop,
    Creative,
    Coding,
    Study,
    Entertainment,
    Fitness,
    Daily,
}

/// Requested family name to base category plus name keywords.
fn family(requested: &str) -> Option<(&'static str, &'static [&'static str])> {
    match requested {
        "MacBook Air" => Some(("mac", &["air"])),
        "MacBook Pro" => Some(("mac", &["pro"])),
        "Mac mini" => Some(("mac", &["mini"])),
        "iPad Pro" => Some(("ipad", &["pro"])),
        "iPad Air" => Some(("ipad", &["air"])),
        "iPad" => Some(("ipad", &[])),
        "Watch" => Some(("watch", &[])),
        "Accessory" => Some(("accessory", &[])),
        _ => None,
    }
}

/// "512GB" -> 512, "2TB" -> 2048
pub fn capacity_gb(value: &str) -> Option<u32> {
    let value = value.trim().to_ascii_lowercase();
    let digits: String = value.chars().take_while(char::is_ascii_digit).collect();
    let size: u32 = digits.parse().ok()?;
    if value.ends_with("tb") {
        size.checked_mul(1024)
    } else {
        Some(size)
    }
}

fn storage_of(product: &Product) -> Option<u32> {
    product.specs_detail.storage.as_deref().and_then(capacity_gb)
}

fn chip_of(product: &Product) -> Option<&str> {
    product.specs_detail.chip.as_deref()
}

fn within_budget(product: &Product, request: &RecommendationDto) -> bool {
    request.budget_min.is_none_or(|min| product.price >= min)
        && request.budget_max.is_none_or(|max| product.price <= max)
}

fn in_category(product: &Product, requested: &str) -> bool {
    let name = product.name.to_lowercase();
    let category = product.category.to_lowercase();
    match family(requested) {
        Some((base, keywords)) => {
            category.contains(base)
                && (keywords.is_empty() || keywords.iter().any(|k| name.contains(k)))
        }
        None => {
            let requested = requested.to_lowercase();
            category.contains(&requested) || name.contains(&requested)
        }
    }
}

fn in_base_category(product: &Product, requested: &str) -> bool {
    family(requested).is_none_or(|(base, _)| product.category.to_lowercase().contains(base))
}

fn strict_match(product: &Product, request: &RecommendationDto) -> bool {
    if !within_budget(product, request) {
        return false;
    }
    if let Some(category) = request.category.as_deref().filter(|c| !c.is_empty()) {
        if !in_category(product, category) {
            return false;
        }
    }
    if let Some(chip) = request.chip.as_deref().filter(|c| !c.is_empty()) {
        if !chip_of(product).is_some_and(|c| c.eq_ignore_ascii_case(chip)) {
            return false;
        }
    }
    let storage = storage_of(product).unwrap_or(0);
    request.storage_min_gb.is_none_or(|min| storage >= min)
        && request.storage_max_gb.is_none_or(|max| storage <= max)
}

fn relaxed_match(product: &Product, request: &RecommendationDto) -> bool {
    within_budget(product, request)
        && request
            .category
            .as_deref()
            .filter(|c| !c.is_empty())
            .is_none_or(|category| in_base_category(product, category))
}

struct Scored {
    score: f64,
    reasons: Vec<String>,
}

impl Scored {
    fn add(&mut self, points: f64, reason: Option<String>) {
        self.score += points;
        if let Some(reason) = reason {
            self.reasons.push(reason);
        }
    }

    /// Generic reasons only fill free slots.
    fn add_if_room(&mut self, points: f64, reason: String) {
        self.score += points;
        if self.reasons.len() < MAX_REASONS {
            self.reasons.push(reason);
        }
    }
}

fn use_case_points(product: &Product, use_case: UseCase, scored: &mut Scored) {
    let name = product.name.to_lowercase();
    let category = product.category.to_lowercase();
    let chip = chip_of(product).unwrap_or_default();
    let storage = storage_of(product).unwrap_or(0);
    let is_mini = name.contains("mac mini") || category.contains("mini");
    let mid_size_screen = product
        .specs_detail
        .screen_size
        .as_deref()
        .is_some_and(|s| s.starts_with("13") || s.starts_with("14"));

    match use_case {
        UseCase::OfficePortable => {
            if name.contains("air") {
                scored.add(20.0, Some("💼 Light enough to carry all day".into()));
            } else if mid_size_screen {
                scored.add(15.0, Some("💼 Mid-size screen for work on the go".into()));
            }
            if chip == "M2" || chip == "M3" {
                scored.add(10.0, None);
            }
        }
        UseCase::OfficeDesktop => {
            if name.contains("pro") {
                scored.add(20.0, Some("🖥️ Pro-class performance".into()));
            } else if is_mini {
                scored.add(25.0, Some("🖥️ Mac mini is the best-value desk setup".into()));
            }
            if storage >= 512 {
                scored.add(5.0, None);
            }
        }
        UseCase::Creative => {
            if chip == "M3 Max" {
                scored.add(30.0, Some("🎨 Top-tier chip for creative work".into()));
            } else if matches!(chip, "M3 Pro" | "M2 Max" | "M2 Ultra") {
                scored.add(25.0, Some("🎨 Professional chip for creative work".into()));
            } else if name.contains("pro") {
                scored.add(15.0, None);
            }
            if storage >= 512 {
                scored.add(5.0, Some("💾 Room for large project files".into()));
            }
        }
        UseCase::Coding => {
            if matches!(chip, "M3 Max" | "M2 Max") {
                scored.add(30.0, Some("👨‍💻 Max chip compiles fastest".into()));
            } else if matches!(chip, "M3 Pro" | "M2 Pro") {
                scored.add(25.0, Some("👨‍💻 Pro chip suits development".into()));
            }
            if storage >= 512 {
                scored.add(5.0, None);
            }
            if is_mini {
                scored.add(10.0, Some("💻 Mac mini is a cheap build box".into()));
            }
        }
        UseCase::Study => {
            if category.contains("ipad") {
                scored.add(20.0, Some("📚 Great for notes and reading".into()));
            }
            if name.contains("air") {
                scored.add(10.0, None);
            }
        }
        UseCase::Entertainment => {
            if category.contains("ipad") {
                scored.add(20.0, Some("🎬 Great screen for watching".into()));
            } else if product.price < 8_000.0 {
                scored.add(15.0, Some("🎬 Affordable for everyday fun".into()));
            }
        }
        UseCase::Fitness => {
            if category.contains("watch") {
                scored.add(30.0, Some("🏃 Tracks workouts and health".into()));
            }
        }
        UseCase::Daily => {
            if category.contains("watch") {
                scored.add(30.0, Some("🚶 Notifications and calls on the wrist".into()));
            }
        }
    }
}

fn score(product: &Product, request: &RecommendationDto) -> Scored {
    let mut scored = Scored { score: BASE_SCORE, reasons: Vec::new() };
    let savings = (product.original_price - product.price).max(0.0);

    if let Some(max) = request.budget_max {
        if product.price <= max {
            scored.add(20.0, Some(format!("Fits your ¥{max:.0} budget, ¥{savings:.0} below new")));
        }
    } else if request.budget_min.is_some() {
        scored.add(15.0, Some(format!("¥{savings:.0} below the new price")));
    }

    if scored.reasons.len() < MAX_REASONS {
        scored.reasons.push("Certified refurbished with a one-year warranty".into());
    }

    if product.stock_status == StockStatus::Available {
        scored.add_if_room(15.0, "In stock and ready to ship".into());
    }

    if product.highest_price > product.lowest_price {
        let position = (product.price - product.lowest_price) / (product.highest_price - product.lowest_price);
        if position <= 0.2 {
            scored.add_if_room(15.0, "Price is near its historical low".into());
        }
    }

    if product.value_score >= 80.0 {
        scored.add_if_room(15.0, format!("Value score {:.0}", product.value_score));
    }

    if let Some(use_case) = request.use_case {
        use_case_points(product, use_case, &mut scored);
    }

    if let Some(max) = request.budget_max.filter(|max| *max > 0.0) {
        let utilization = product.price / max;
        if (request.prefer_high && utilization >= 0.8) || (!request.prefer_high && utilization <= 0.5) {
            scored.score += 10.0;
        }
    }

    scored.reasons.truncate(MAX_REASONS);
    scored
}

/// Score and rank `products` for the request. At most
/// [`MAX_RECOMMENDATIONS`] results, best first.
pub fn recommend(products: &[Product], request: &RecommendationDto) -> Vec<Recommendation> {
    let mut candidates: Vec<&Product> = products.iter().filter(|p| strict_match(p, request)).collect();
    if candidates.is_empty() {
        candidates = products.iter().filter(|p| relaxed_match(p, request)).collect();
    }

    let mut results: Vec<Recommendation> = candidates
        .into_iter()
        .map(|product| {
            let scored = score(product, request);
            Recommendation { product: product.clone(), score: scored.score, reasons: scored.reasons }
        })
        .collect();

    if request.prefer_high {
        // Scores within the same 5-point band rank pricier first.
        results.sort_by(|a, b| {
            let band = |r: &Recommendation| (r.score / 5.0).floor();
            band(b)
                .total_cmp(&band(a))
                .then_with(|| b.product.price.total_cmp(&a.product.price))
                .then_with(|| a.product.id.cmp(&b.product.id))
        });
    } else {
        results.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.product.id.cmp(&b.product.id)));
    }
    results.truncate(MAX_RECOMMENDATIONS);
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn product(category: &str, name: &str, price: f64, chip: &str, storage: &str) -> Product {
        let mut p = Product::candidate(category, "cn", name, &name.to_lowercase(), price).with_original_price(price * 1.2);
        p.specs_detail.chip = Some(chip.to_string()).filter(|c| !c.is_empty());
        p.specs_detail.storage = Some(storage.to_string()).filter(|s| !s.is_empty());
        p
    }

    fn catalog() -> Vec<Product> {
        vec![
            product("Mac", "MacBook Air 13 M2", 6_499.0, "M2", "256GB"),
            product("Mac", "MacBook Pro 14 M3 Max", 22_999.0, "M3 Max", "1TB"),
            product("Mac", "Mac mini M2 Pro", 7_999.0, "M2 Pro", "512GB"),
            product("iPad", "iPad Air 11 M2", 4_099.0, "M2", "128GB"),
            product("Watch", "Apple Watch Ultra 2", 4_999.0, "", ""),
        ]
    }

    #[rstest]
    #[case("512GB", Some(512))]
    #[case("1TB", Some(1024))]
    #[case(" 2tb ", Some(2048))]
    #[case("lots", None)]
    fn capacity_parses_units(#[case] input: &str, #[case] expected: Option<u32>) {
        assert_eq!(capacity_gb(input), expected);
    }

    #[test]
    fn budget_is_never_relaxed() {
        let request = RecommendationDto { budget_max: Some(5_000.0), ..RecommendationDto::default() };
        let results = recommend(&catalog(), &request);
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.product.price <= 5_000.0));
    }

    #[test]
    fn family_and_chip_filter_strictly() {
        let request = RecommendationDto {
            category: Some("MacBook Pro".into()),
            chip: Some("M3 Max".into()),
            storage_min_gb: Some(512),
            ..RecommendationDto::default()
        };
        let results = recommend(&catalog(), &request);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].product.name, "MacBook Pro 14 M3 Max");
    }

    #[test]
    fn empty_strict_result_falls_back_to_base_category() {
        let request = RecommendationDto {
            category: Some("MacBook Air".into()),
            chip: Some("M4".into()),
            ..RecommendationDto::default()
        };
        let results = recommend(&catalog(), &request);
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.product.category == "Mac"));
    }

    #[test]
    fn use_case_moves_the_ranking() {
        let request = RecommendationDto { use_case: Some(UseCase::Fitness), ..RecommendationDto::default() };
        let results = recommend(&catalog(), &request);
        assert_eq!(results[0].product.category, "Watch");
        assert!(results[0].reasons.len() <= MAX_REASONS);

        let request = RecommendationDto { use_case: Some(UseCase::Coding), ..RecommendationDto::default() };
        let results = recommend(&catalog(), &request);
        assert_eq!(results[0].product.name, "Mac mini M2 Pro");
        assert_eq!(results[1].product.name, "MacBook Pro 14 M3 Max");
    }

    #[test]
    fn prefer_high_ranks_pricier_within_a_band() {
        let request = RecommendationDto {
            budget_max: Some(30_000.0),
            category: Some("Mac".into()),
            prefer_high: true,
            ..RecommendationDto::default()
        };
        let results = recommend(&catalog(), &request);
        assert_eq!(results[0].product.name, "MacBook Pro 14 M3 Max");
        assert!(results[0].reasons[0].starts_with("Fits your ¥30000 budget"));
    }

    #[test]
    fn office_alias_deserializes() {
        let use_case: UseCase = serde_json::from_str("\"office\"").unwrap();
        assert_eq!(use_case, UseCase::OfficePortable);
    }
}
