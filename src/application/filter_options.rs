//! Distinct spec values present in the catalog, for building filter chips

use std::cmp::Reverse;
use std::collections::BTreeSet;

use crate::application::dto::FilterOptionsDto;
use crate::application::recommendation::capacity_gb;
use crate::domain::Product;

/// Catalog color names in display order; unknown colors follow alphabetically.
const COLOR_ORDER: &[&str] = &[
    "深空黑", "深空灰", "银色", "金色", "星光色", "午夜色", "蓝色", "紫色", "绿色", "粉色", "红色", "黑色",
    "白色", "玫瑰金",
];

/// Product family from the name, for listings without a parsed model.
fn family_from_name(name: &str, category: &str) -> Option<&'static str> {
    let name = name.to_lowercase();
    let families: &[(&str, &'static str)] = match category {
        "Mac" => &[
            ("macbook air", "MacBook Air"),
            ("macbook pro", "MacBook Pro"),
            ("mac mini", "Mac mini"),
            ("mac studio", "Mac Studio"),
            ("imac", "iMac"),
            ("mac pro", "Mac Pro"),
        ],
        "iPad" => &[
            ("ipad pro", "iPad Pro"),
            ("ipad air", "iPad Air"),
            ("ipad mini", "iPad mini"),
            ("ipad", "iPad"),
        ],
        "Watch" => &[
            ("ultra", "Apple Watch Ultra"),
            ("series", "Apple Watch Series"),
            ("se", "Apple Watch SE"),
        ],
        _ => &[],
    };
    families.iter().find(|(needle, _)| name.contains(needle)).map(|(_, family)| *family)
}

/// (generation, tier): M4 > M3 > M2 > M1, Ultra > Max > Pro > base
fn chip_rank(chip: &str) -> (u8, u8) {
    let chip = chip.to_lowercase();
    let generation = ["m1", "m2", "m3", "m4"]
        .iter()
        .rposition(|g| chip.contains(g))
        .map_or(0, |i| u8::try_from(i + 1).unwrap_or(0));
    let tier = if chip.contains("ultra") {
        4
    } else if chip.contains("max") {
        3
    } else if chip.contains("pro") {
        2
    } else {
        1
    };
    (generation, tier)
}

fn leading_number(value: &str) -> f64 {
    let number: String = value
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    number.parse().unwrap_or(0.0)
}

pub fn filter_options(products: &[Product]) -> FilterOptionsDto {
    let mut chips = BTreeSet::new();
    let mut storages = BTreeSet::new();
    let mut memories = BTreeSet::new();
    let mut screen_sizes = BTreeSet::new();
    let mut colors = BTreeSet::new();
    let mut models = BTreeSet::new();

    for product in products {
        let specs = &product.specs_detail;
        chips.extend(specs.chip.clone());
        storages.extend(specs.storage.clone());
        memories.extend(specs.memory.clone());
        screen_sizes.extend(specs.screen_size.clone());
        colors.extend(specs.color.clone());
        let model = specs
            .model
            .clone()
            .or_else(|| family_from_name(&product.name, &product.category).map(str::to_string));
        models.extend(model);
    }

    let mut chips: Vec<String> = chips.into_iter().collect();
    chips.sort_by_key(|c| Reverse(chip_rank(c)));

    let by_capacity = |set: BTreeSet<String>| {
        let mut values: Vec<String> = set.into_iter().collect();
        values.sort_by_key(|v| capacity_gb(v).unwrap_or(0));
        values
    };

    let mut screen_sizes: Vec<String> = screen_sizes.into_iter().collect();
    screen_sizes.sort_by(|a, b| leading_number(a).total_cmp(&leading_number(b)));

    let mut colors: Vec<String> = colors.into_iter().collect();
    colors.sort_by_key(|c| COLOR_ORDER.iter().position(|known| *known == c.as_str()).unwrap_or(COLOR_ORDER.len()));

    FilterOptionsDto {
        chips,
        storages: by_capacity(storages),
        memories: by_capacity(memories),
        screen_sizes,
        colors,
        models: models.into_iter().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(category: &str, name: &str, chip: &str, storage: &str, color: &str) -> Product {
        let mut p = Product::candidate(category, "cn", name, &name.to_lowercase(), 5_000.0);
        p.specs_detail.chip = Some(chip.to_string());
        p.specs_detail.storage = Some(storage.to_string());
        p.specs_detail.color = Some(color.to_string());
        p
    }

    #[test]
    fn options_are_distinct_and_ordered() {
        let products = vec![
            product("Mac", "MacBook Air 13 M2", "M2", "512GB", "午夜色"),
            product("Mac", "MacBook Pro 14 M3 Pro", "M3 Pro", "1TB", "深空黑"),
            product("Mac", "MacBook Pro 14 M3", "M3", "256GB", "Titanium"),
            product("Mac", "Mac mini M2", "M2", "512GB", "银色"),
        ];

        let options = filter_options(&products);

        assert_eq!(options.chips, vec!["M3 Pro", "M3", "M2"]);
        assert_eq!(options.storages, vec!["256GB", "512GB", "1TB"]);
        assert_eq!(options.colors, vec!["深空黑", "银色", "午夜色", "Titanium"]);
        assert_eq!(options.models, vec!["Mac mini", "MacBook Air", "MacBook Pro"]);
        assert!(options.memories.is_empty());
    }

    #[test]
    fn parsed_model_wins_over_name() {
        let mut p = product("iPad", "iPad Air 11 M2", "M2", "128GB", "蓝色");
        p.specs_detail.model = Some("iPad Air 11-inch".into());
        assert_eq!(filter_options(&[p]).models, vec!["iPad Air 11-inch"]);
    }

    #[test]
    fn chip_rank_orders_generation_then_tier() {
        assert!(chip_rank("M4") > chip_rank("M3 Max"));
        assert!(chip_rank("M3 Max") > chip_rank("M3 Pro"));
        assert!(chip_rank("M2 Ultra") > chip_rank("M2 Max"));
    }
}
