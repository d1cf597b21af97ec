use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::error::{NewsError, Result};
use crate::registry::{Category, SourceRegistry};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Refresh interval in minutes, 0 disables scheduled refreshes
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: u64,
    /// Path or http(s) URL of a category document; overrides `categories`
    #[serde(default)]
    pub sources_document: Option<String>,
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub images: ImageConfig,
}

fn default_refresh_interval() -> u64 {
    15
}

/// One week, in minutes.
pub const MAX_REFRESH_INTERVAL: u64 = 7 * 24 * 60;

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Let `/proxy/*` reach loopback, private and link-local addresses.
    #[serde(default)]
    pub relay_private_targets: bool,
}

fn default_bind() -> String {
    "0.0.0.0:3000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            relay_private_targets: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    "Newsdesk/1.0 (Feed Aggregator)".to_string()
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

/// Relay selection for cross-origin fetches.
#[derive(Debug, Deserialize, Clone)]
pub struct ProxyConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Relay used when the deployment host is a loopback host
    #[serde(default = "default_local_relay")]
    pub local_relay: String,
    #[serde(default = "default_scheme")]
    pub scheme: String,
    /// Port assumed for the same-origin relay when the deployment has none
    #[serde(default = "default_proxy_port")]
    pub default_port: u16,
    #[serde(default = "default_proxy_path")]
    pub path: String,
    #[serde(default)]
    pub public_host: Option<String>,
    #[serde(default)]
    pub public_port: Option<u16>,
}

fn default_true() -> bool {
    true
}

fn default_local_relay() -> String {
    "https://cors-anywhere.herokuapp.com".to_string()
}

fn default_scheme() -> String {
    "https".to_string()
}

fn default_proxy_port() -> u16 {
    3000
}

fn default_proxy_path() -> String {
    "/proxy".to_string()
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            local_relay: default_local_relay(),
            scheme: default_scheme(),
            default_port: default_proxy_port(),
            path: default_proxy_path(),
            public_host: None,
            public_port: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ImageConfig {
    /// Fetch the article page when the feed carries no image
    #[serde(default = "default_true")]
    pub scrape_article_pages: bool,
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,
    /// Source display name to fallback image URL
    #[serde(default)]
    pub fallbacks: HashMap<String, String>,
}

fn default_max_concurrent_fetches() -> usize {
    16
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            scrape_article_pages: true,
            max_concurrent_fetches: default_max_concurrent_fetches(),
            fallbacks: HashMap::new(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse config from a TOML string (useful for testing)
    pub fn from_str(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| NewsError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.refresh_interval > MAX_REFRESH_INTERVAL {
            return Err(NewsError::Config(format!(
                "refresh_interval must be at most {} minutes",
                MAX_REFRESH_INTERVAL
            )));
        }

        if self.images.max_concurrent_fetches == 0 {
            return Err(NewsError::Config(
                "images.max_concurrent_fetches must be at least 1".to_string(),
            ));
        }

        for category in &self.categories {
            for feed in &category.feeds {
                if feed.title.trim().is_empty() || feed.link.trim().is_empty() {
                    return Err(NewsError::Config(format!(
                        "feed in category '{}' needs both a title and a link",
                        category.category
                    )));
                }
            }
        }

        Ok(())
    }

    /// Where the feed sources come from on each refresh.
    pub fn registry(&self) -> SourceRegistry {
        match &self.sources_document {
            Some(location)
                if location.starts_with("http://") || location.starts_with("https://") =>
            {
                SourceRegistry::Remote(location.clone())
            }
            Some(location) => SourceRegistry::Document(location.into()),
            None => SourceRegistry::Inline(self.categories.clone()),
        }
    }
}
