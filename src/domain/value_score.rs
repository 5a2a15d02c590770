//! Value score: a 0-100 ranking derived from trend, stock, price position and age
//!
//! Each component is banded, weighted and summed on top of a base of 50. The
//! weighted maxima add up past 100, so the result is clamped.

use chrono::{DateTime, Utc};

use super::price_history::PriceHistory;
use super::product::StockStatus;

const BASE_SCORE: f64 = 50.0;
const TREND_WEIGHT: f64 = 1.4;
const STOCK_WEIGHT: f64 = 1.33;
const POSITION_WEIGHT: f64 = 1.5;
const AGE_WEIGHT: f64 = 1.5;

/// Banded trend points over the trailing three history points.
pub fn trend_points(history: &PriceHistory) -> f64 {
    let Some(change) = history.recent_change() else {
        return 0.0;
    };
    if change < -0.02 {
        25.0
    } else if change < -0.01 {
        20.0
    } else if change < 0.0 {
        15.0
    } else if change > 0.02 {
        0.0
    } else {
        10.0
    }
}

pub const fn stock_points(status: StockStatus) -> f64 {
    match status {
        StockStatus::Available => 15.0,
        StockStatus::Limited => 10.0,
        StockStatus::SoldOut => 0.0,
    }
}

/// Closer to the observed minimum scores higher; a flat or empty history is neutral.
pub fn position_points(price: f64, history: &PriceHistory) -> f64 {
    let Some((lowest, highest)) = history.min_max() else {
        return 10.0;
    };
    if (highest - lowest).abs() < f64::EPSILON {
        return 10.0;
    }
    let position = (price - lowest) / (highest - lowest);
    if position <= 0.1 {
        20.0
    } else if position <= 0.3 {
        15.0
    } else if position <= 0.5 {
        10.0
    } else if position <= 0.7 {
        5.0
    } else {
        0.0
    }
}

pub fn age_points(created_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let days = (now - created_at).num_hours() as f64 / 24.0;
    if days <= 7.0 {
        10.0
    } else if days <= 30.0 {
        7.0
    } else if days <= 90.0 {
        3.0
    } else {
        0.0
    }
}

pub fn value_score(
    price: f64,
    stock: StockStatus,
    history: &PriceHistory,
    created_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> f64 {
    let score = BASE_SCORE
        + trend_points(history) * TREND_WEIGHT
        + stock_points(stock) * STOCK_WEIGHT
        + position_points(price, history) * POSITION_WEIGHT
        + age_points(created_at, now) * AGE_WEIGHT;
    if score.is_nan() {
        return 0.0;
    }
    score.clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::price_history::{MAX_HISTORY_PER_PRODUCT, PriceHistoryEntry};
    use chrono::Duration;
    use proptest::prelude::*;
    use rstest::rstest;

    fn history_of(prices: &[f64]) -> PriceHistory {
        let mut history = PriceHistory::new();
        for p in prices {
            history.push_bounded(
                PriceHistoryEntry {
                    product_id: "p".into(),
                    price: *p,
                    discount: 0.0,
                    recorded_at: Utc::now(),
                },
                MAX_HISTORY_PER_PRODUCT,
            );
        }
        history
    }

    #[rstest]
    #[case(&[100.0, 99.0, 97.0], 25.0)]
    #[case(&[100.0, 99.5, 98.5], 20.0)]
    #[case(&[100.0, 100.0, 99.5], 15.0)]
    #[case(&[100.0, 100.0, 100.0], 10.0)]
    #[case(&[100.0, 101.0, 101.5], 10.0)]
    #[case(&[100.0, 101.0, 103.0], 0.0)]
    #[case(&[100.0, 90.0], 0.0)]
    fn trend_bands(#[case] prices: &[f64], #[case] expected: f64) {
        assert!((trend_points(&history_of(prices)) - expected).abs() < f64::EPSILON);
    }

    #[rstest]
    #[case(7_500.0, 20.0)]
    #[case(7_600.0, 15.0)]
    #[case(7_750.0, 10.0)]
    #[case(7_850.0, 5.0)]
    #[case(8_000.0, 0.0)]
    fn position_bands(#[case] price: f64, #[case] expected: f64) {
        let history = history_of(&[8_000.0, 7_500.0]);
        assert!((position_points(price, &history) - expected).abs() < f64::EPSILON);
    }

    #[rstest]
    #[case(1, 10.0)]
    #[case(20, 7.0)]
    #[case(60, 3.0)]
    #[case(200, 0.0)]
    fn age_bands(#[case] days: i64, #[case] expected: f64) {
        let now = Utc::now();
        assert!((age_points(now - Duration::days(days), now) - expected).abs() < f64::EPSILON);
    }

    #[test]
    fn fresh_product_score() {
        let now = Utc::now();
        let score = value_score(8_000.0, StockStatus::Available, &history_of(&[8_000.0]), now, now);
        // 50 + 0 + 15*1.33 + 10*1.5 + 10*1.5
        assert!((score - 99.95).abs() < 1e-9);
    }

    proptest! {
        #[test]
        fn score_stays_in_bounds(
            prices in prop::collection::vec(-1_000.0f64..50_000.0, 0..12),
            price in -1_000.0f64..60_000.0,
            stock in 0u8..3,
            age_days in 0i64..2_000,
        ) {
            let now = Utc::now();
            let stock = match stock {
                0 => StockStatus::Available,
                1 => StockStatus::Limited,
                _ => StockStatus::SoldOut,
            };
            let score = value_score(price, stock, &history_of(&prices), now - Duration::days(age_days), now);
            prop_assert!((0.0..=100.0).contains(&score));
        }
    }
}
