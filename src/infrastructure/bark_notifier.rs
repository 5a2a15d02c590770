//! Bark push notifier
//!
//! Messages are delivered with `GET {server}/{key}/{title}/{body}`; every
//! segment is percent-encoded and only a 200 response counts as delivered.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use crate::infrastructure::config::NotifierConfig;
use crate::notify::{Notifier, NotifyError};

pub struct BarkNotifier {
    client: Client,
    server_url: String,
    enabled: bool,
}

impl BarkNotifier {
    pub fn new(config: &NotifierConfig) -> Result<Self> {
        Url::parse(&config.server_url)
            .with_context(|| format!("Invalid notifier server URL: {}", config.server_url))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create notifier HTTP client")?;
        if !config.enabled {
            info!("🔕 Bark notifier disabled");
        }
        Ok(Self {
            client,
            server_url: config.server_url.clone(),
            enabled: config.enabled,
        })
    }

    /// A notifier that accepts every message without sending it.
    pub fn disabled() -> Self {
        Self {
            client: Client::new(),
            server_url: String::new(),
            enabled: false,
        }
    }

    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// `{server}/{key}/{title}/{body}` with each segment encoded.
    pub fn message_url(&self, key: &str, title: &str, body: &str) -> Result<Url, NotifyError> {
        let mut url = Url::parse(&self.server_url).map_err(|e| NotifyError::Config(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|()| NotifyError::Config(format!("{} cannot be a base URL", self.server_url)))?
            .pop_if_empty()
            .extend([key, title, body]);
        Ok(url)
    }
}

#[async_trait]
impl Notifier for BarkNotifier {
    async fn send(&self, target: &str, title: &str, body: &str) -> Result<(), NotifyError> {
        if !self.enabled {
            return Ok(());
        }
        if target.trim().is_empty() {
            return Err(NotifyError::EmptyTarget);
        }

        let url = self.message_url(target, title, body)?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.without_url().to_string()))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(NotifyError::Rejected(status.as_u16()));
        }
        debug!("Bark message delivered: {}", title);
        Ok(())
    }
}
