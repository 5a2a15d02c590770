//! Notifier boundary and message text

use async_trait::async_trait;

use crate::domain::Product;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotifyError {
    #[error("empty delivery target")]
    EmptyTarget,
    #[error("notifier misconfigured: {0}")]
    Config(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("notifier rejected message with status {0}")]
    Rejected(u16),
}

/// Push transport. Retrying transport failures is the implementation's call;
/// callers treat every error as final for that message.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, target: &str, title: &str, body: &str) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationMessage {
    pub title: String,
    pub body: String,
}

fn with_link(mut body: String, url: &str) -> String {
    if !url.is_empty() {
        body.push('\n');
        body.push_str(url);
    }
    body
}

pub fn new_arrival_message(product: &Product) -> NotificationMessage {
    let body = format!(
        "[{}] {} is available! Price: ¥{:.0}",
        product.category, product.name, product.price
    );
    NotificationMessage {
        title: "🆕 New refurbished arrival".to_string(),
        body: with_link(body, &product.product_url),
    }
}

pub fn price_change_message(product: &Product, old_price: f64, new_price: f64) -> NotificationMessage {
    let body = format!("{}: ¥{:.2} → ¥{:.2}", product.name, old_price, new_price);
    NotificationMessage {
        title: "🍎 Refurbished price change".to_string(),
        body: with_link(body, &product.product_url),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_arrival_text() {
        let product = Product::candidate("Mac", "cn", "Mac mini M2", "mac mini m2", 3_799.0)
            .with_url("https://example.test/p/1");
        let message = new_arrival_message(&product);
        assert_eq!(message.body, "[Mac] Mac mini M2 is available! Price: ¥3799\nhttps://example.test/p/1");
    }

    #[test]
    fn price_change_text_without_link() {
        let product = Product::candidate("Mac", "cn", "Mac mini M2", "mac mini m2", 3_499.0);
        let message = price_change_message(&product, 3_799.0, 3_499.0);
        assert_eq!(message.body, "Mac mini M2: ¥3799.00 → ¥3499.00");
        assert!(message.title.contains("price change"));
    }
}
