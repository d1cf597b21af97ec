//! Feed source registry.
//!
//! Sources are grouped by category in a small document:
//!
//! ```json
//! [{ "category": "News - Canada", "feeds": [{ "title": "CBC", "link": "https://..." }] }]
//! ```
//!
//! The document can live inline in the TOML config, in a JSON file next to
//! it, or behind an HTTP URL. It is re-read on every refresh.

use std::path::PathBuf;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{NewsError, Result};

/// One feed to fetch, tagged with its category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedSource {
    pub display_name: String,
    pub feed_url: String,
    pub category: String,
}

impl FeedSource {
    pub fn new(display_name: &str, feed_url: &str, category: &str) -> Self {
        Self {
            display_name: display_name.to_string(),
            feed_url: feed_url.to_string(),
            category: category.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub category: String,
    #[serde(default)]
    pub feeds: Vec<FeedLink>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedLink {
    pub title: String,
    pub link: String,
}

#[derive(Debug, Clone)]
pub enum SourceRegistry {
    Inline(Vec<Category>),
    Document(PathBuf),
    Remote(String),
}

impl SourceRegistry {
    /// Load the category document. Any failure here is a whole-pipeline
    /// failure.
    pub async fn categories(&self, client: &Client) -> Result<Vec<Category>> {
        match self {
            SourceRegistry::Inline(categories) => Ok(categories.clone()),
            SourceRegistry::Document(path) => {
                let content = tokio::fs::read(path).await.map_err(|e| {
                    NewsError::Registry(format!("cannot read {}: {}", path.display(), e))
                })?;
                parse_document(&content)
            }
            SourceRegistry::Remote(url) => {
                debug!(url = %url, "Loading feed registry");
                let response = client
                    .get(url)
                    .send()
                    .await
                    .map_err(|e| NewsError::Registry(format!("cannot fetch {}: {}", url, e)))?;

                if !response.status().is_success() {
                    return Err(NewsError::Registry(format!(
                        "{} answered with status {}",
                        url,
                        response.status()
                    )));
                }

                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| NewsError::Registry(format!("cannot read {}: {}", url, e)))?;
                parse_document(&bytes)
            }
        }
    }

    pub async fn load(&self, client: &Client) -> Result<Vec<FeedSource>> {
        let categories = self.categories(client).await?;
        Ok(flatten(&categories))
    }
}

fn parse_document(bytes: &[u8]) -> Result<Vec<Category>> {
    serde_json::from_slice(bytes)
        .map_err(|e| NewsError::Registry(format!("malformed category document: {}", e)))
}

/// Flatten categories into sources, keeping document order.
pub fn flatten(categories: &[Category]) -> Vec<FeedSource> {
    categories
        .iter()
        .flat_map(|category| {
            category
                .feeds
                .iter()
                .map(move |feed| FeedSource::new(&feed.title, &feed.link, &category.category))
        })
        .collect()
}
