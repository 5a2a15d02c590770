//! New-arrival predicate evaluation
//!
//! Every non-empty dimension must match (AND); within a dimension any entry
//! may match (OR). Text dimensions are case-insensitive substring checks over
//! the product's name and spec text.

use crate::domain::{Product, SubscriptionFilter};

fn any_contained(haystack: &str, needles: &[String]) -> bool {
    needles.is_empty()
        || needles
            .iter()
            .map(|n| n.trim().to_lowercase())
            .any(|n| !n.is_empty() && haystack.contains(&n))
}

pub fn matches(product: &Product, filter: &SubscriptionFilter) -> bool {
    if !filter.categories.is_empty()
        && !filter
            .categories
            .iter()
            .any(|c| c.trim().eq_ignore_ascii_case(&product.category))
    {
        return false;
    }

    if filter.min_price > 0.0 && product.price < filter.min_price {
        return false;
    }
    if filter.max_price > 0.0 && product.price > filter.max_price {
        return false;
    }

    if !filter.stock_statuses.is_empty() && !filter.stock_statuses.contains(&product.stock_status) {
        return false;
    }

    let text = product.search_text();
    [
        &filter.models,
        &filter.chips,
        &filter.storages,
        &filter.memories,
        &filter.keywords,
    ]
    .into_iter()
    .all(|needles| any_contained(&text, needles))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::StockStatus;
    use proptest::prelude::*;
    use rstest::rstest;

    fn macbook() -> Product {
        let mut p = Product::candidate("Mac", "cn", "MacBook Pro 14 M3 Pro", "macbook pro 14 m3 pro", 12_999.0);
        p.specs = "18GB unified memory, 512GB SSD".into();
        p
    }

    fn filter() -> SubscriptionFilter {
        SubscriptionFilter::default()
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert!(matches(&macbook(), &filter()));
    }

    #[rstest]
    #[case(SubscriptionFilter { categories: vec!["mac".into()], ..filter() }, true)]
    #[case(SubscriptionFilter { categories: vec!["iPad".into()], ..filter() }, false)]
    #[case(SubscriptionFilter { models: vec!["macbook pro".into()], ..filter() }, true)]
    #[case(SubscriptionFilter { chips: vec!["M3".into(), "M4".into()], ..filter() }, true)]
    #[case(SubscriptionFilter { chips: vec!["M1".into()], ..filter() }, false)]
    #[case(SubscriptionFilter { storages: vec!["512gb".into()], ..filter() }, true)]
    #[case(SubscriptionFilter { memories: vec!["36GB".into()], ..filter() }, false)]
    #[case(SubscriptionFilter { keywords: vec!["unified".into()], ..filter() }, true)]
    #[case(SubscriptionFilter { min_price: 13_000.0, ..filter() }, false)]
    #[case(SubscriptionFilter { max_price: 13_000.0, ..filter() }, true)]
    #[case(SubscriptionFilter { min_price: 10_000.0, max_price: 12_000.0, ..filter() }, false)]
    #[case(SubscriptionFilter { stock_statuses: vec![StockStatus::SoldOut], ..filter() }, false)]
    #[case(SubscriptionFilter { stock_statuses: vec![StockStatus::Available], ..filter() }, true)]
    fn single_dimension(#[case] filter: SubscriptionFilter, #[case] expected: bool) {
        assert_eq!(matches(&macbook(), &filter), expected);
    }

    #[test]
    fn dimensions_are_anded() {
        let f = SubscriptionFilter {
            categories: vec!["Mac".into()],
            chips: vec!["M3".into()],
            memories: vec!["64GB".into()],
            ..filter()
        };
        assert!(!matches(&macbook(), &f));
    }

    proptest! {
        #[test]
        fn price_bounds_are_respected(price in 1.0f64..50_000.0, min in 0.0f64..25_000.0, span in 0.0f64..25_000.0) {
            let product = Product::candidate("Mac", "cn", "Mac mini", "mac mini", price);
            let f = SubscriptionFilter { min_price: min, max_price: min + span, ..filter() };
            let inside = (min <= 0.0 || price >= min) && (min + span <= 0.0 || price <= min + span);
            prop_assert_eq!(matches(&product, &f), inside);
        }
    }
}
