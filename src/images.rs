//! Representative image discovery for articles.
//!
//! Two paths. The fast path looks only at what the feed already delivered
//! and runs inline while entries are normalized. The slow path fetches the
//! article page through the relay and scrapes it; it runs in the background
//! and never holds up the article list.

use std::collections::HashMap;
use std::sync::Arc;

use reqwest::Client;
use scraper::{Html, Selector};
use tokio::sync::Semaphore;
use tracing::{debug, warn};
use url::Url;

use crate::config::ImageConfig;
use crate::error::{NewsError, Result};
use crate::fetcher::RawFeedEntry;
use crate::proxy::ProxyResolver;
use crate::registry::FeedSource;

/// Images narrower and shorter than this are ignored by the page scan.
const LARGE_IMAGE_MIN: u32 = 300;

/// Feed-side image hints, in priority order.
#[derive(Debug, Clone, Copy)]
enum FeedStrategy {
    /// Attribute of the first descendant named any of `elements`
    Attribute {
        elements: &'static [&'static str],
        attr: &'static str,
    },
    /// `media:content` that is (or may be) an image
    MediaContent,
    /// `<enclosure>` with an `image/*` type
    ImageEnclosure,
    /// First `<img src>` in the description markup
    DescriptionImage,
    /// Text of `<url>` nested in `<image>`
    NestedImageUrl,
    /// `og:image` meta tag inside the full-content field
    ContentOpenGraph,
}

const FEED_STRATEGIES: &[FeedStrategy] = &[
    FeedStrategy::Attribute {
        elements: &["media:thumbnail", "thumbnail"],
        attr: "url",
    },
    FeedStrategy::MediaContent,
    FeedStrategy::ImageEnclosure,
    FeedStrategy::DescriptionImage,
    FeedStrategy::NestedImageUrl,
    FeedStrategy::Attribute {
        elements: &["itunes:image", "image"],
        attr: "href",
    },
    FeedStrategy::ContentOpenGraph,
];

impl FeedStrategy {
    fn apply(self, entry: &RawFeedEntry) -> Option<String> {
        let item = &entry.element;
        match self {
            FeedStrategy::Attribute { elements, attr } => item
                .descendants()
                .into_iter()
                .filter(|el| elements.contains(&el.name.as_str()))
                .find_map(|el| el.attr(attr))
                .map(str::to_string),
            FeedStrategy::MediaContent => item
                .descendants()
                .into_iter()
                .filter(|el| el.name == "media:content")
                .filter(|el| {
                    let typed_image = el.attr("type").map_or(true, |t| t.starts_with("image/"));
                    let medium_image = el.attr("medium").map_or(true, |m| m == "image");
                    typed_image && medium_image
                })
                .find_map(|el| el.attr("url"))
                .map(str::to_string),
            FeedStrategy::ImageEnclosure => item
                .children_named("enclosure")
                .filter(|el| el.attr("type").is_some_and(|t| t.starts_with("image/")))
                .find_map(|el| el.attr("url"))
                .map(str::to_string),
            FeedStrategy::DescriptionImage => {
                first_image_in_markup(&entry.description).map(|src| absolutize(&src, &entry.link))
            }
            FeedStrategy::NestedImageUrl => item
                .descendants()
                .into_iter()
                .filter(|el| el.name == "image")
                .find_map(|el| el.child("url").and_then(|url| url.text()))
                .map(str::to_string),
            FeedStrategy::ContentOpenGraph => item
                .child("content:encoded")
                .and_then(|content| content.text())
                .and_then(open_graph_in_markup),
        }
    }
}

fn first_image_in_markup(markup: &str) -> Option<String> {
    let fragment = Html::parse_fragment(markup);
    let selector = Selector::parse("img").ok()?;
    fragment
        .select(&selector)
        .find_map(|img| img.value().attr("src"))
        .map(str::trim)
        .filter(|src| !src.is_empty())
        .map(str::to_string)
}

fn open_graph_in_markup(markup: &str) -> Option<String> {
    let fragment = Html::parse_fragment(markup);
    let selector = Selector::parse(r#"meta[property="og:image"]"#).ok()?;
    fragment
        .select(&selector)
        .find_map(|meta| meta.value().attr("content"))
        .map(str::trim)
        .filter(|content| !content.is_empty())
        .map(str::to_string)
}

/// Article-page image locations, in priority order.
#[derive(Debug, Clone, Copy)]
enum PageStrategy {
    Meta {
        attr: &'static str,
        value: &'static str,
    },
    ContainerImage(&'static str),
    LargeImage,
}

const PAGE_STRATEGIES: &[PageStrategy] = &[
    PageStrategy::Meta {
        attr: "property",
        value: "og:image",
    },
    PageStrategy::Meta {
        attr: "name",
        value: "twitter:image",
    },
    PageStrategy::ContainerImage("article img, .article-content img, .entry-content img"),
    PageStrategy::LargeImage,
];

impl PageStrategy {
    fn apply(self, document: &Html) -> Option<String> {
        let found = match self {
            PageStrategy::Meta { attr, value } => {
                let selector = Selector::parse(&format!(r#"meta[{}="{}"]"#, attr, value)).ok()?;
                document
                    .select(&selector)
                    .find_map(|meta| meta.value().attr("content"))
            }
            PageStrategy::ContainerImage(css) => {
                let selector = Selector::parse(css).ok()?;
                document
                    .select(&selector)
                    .find_map(|img| img.value().attr("src"))
            }
            PageStrategy::LargeImage => {
                let selector = Selector::parse("img").ok()?;
                document
                    .select(&selector)
                    .filter(|img| {
                        let width = img.value().attr("width").map_or(0, leading_int);
                        let height = img.value().attr("height").map_or(0, leading_int);
                        width > LARGE_IMAGE_MIN || height > LARGE_IMAGE_MIN
                    })
                    .find_map(|img| img.value().attr("src"))
            }
        };

        found
            .map(str::trim)
            .filter(|src| !src.is_empty())
            .map(str::to_string)
    }
}

/// Best image on an article page, resolved against the page URL.
pub fn extract_page_image(html: &str, page_url: &str) -> Option<String> {
    let document = Html::parse_document(html);
    PAGE_STRATEGIES
        .iter()
        .find_map(|strategy| strategy.apply(&document))
        .map(|src| absolutize(&src, page_url))
}

/// Digits at the start of an attribute value, like `400px` -> 400.
fn leading_int(value: &str) -> u32 {
    let digits: String = value
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().unwrap_or(0)
}

fn absolutize(src: &str, base: &str) -> String {
    if Url::parse(src).is_ok() {
        return src.to_string();
    }
    Url::parse(base)
        .and_then(|base| base.join(src))
        .map(|url| url.to_string())
        .unwrap_or_else(|_| src.to_string())
}

#[derive(Debug, Clone)]
pub struct ImageResolver {
    client: Client,
    proxy: ProxyResolver,
    fallbacks: Arc<HashMap<String, String>>,
    scrape_article_pages: bool,
    limiter: Arc<Semaphore>,
}

impl ImageResolver {
    pub fn new(client: Client, proxy: ProxyResolver, config: &ImageConfig) -> Self {
        Self {
            client,
            proxy,
            fallbacks: Arc::new(config.fallbacks.clone()),
            scrape_article_pages: config.scrape_article_pages,
            limiter: Arc::new(Semaphore::new(config.max_concurrent_fetches.max(1))),
        }
    }

    /// Whether a miss on the fast path should be followed by a page scrape.
    pub fn scrapes_article_pages(&self) -> bool {
        self.scrape_article_pages
    }

    /// Fast path: feed hints only. When page scraping is disabled the
    /// per-source fallback is applied here instead of after the scrape.
    pub fn resolve_image(&self, entry: &RawFeedEntry, source: &FeedSource) -> Option<String> {
        let found = FEED_STRATEGIES
            .iter()
            .find_map(|strategy| strategy.apply(entry));

        match found {
            Some(url) => Some(url),
            None if !self.scrape_article_pages => self.fallback_image(source),
            None => None,
        }
    }

    pub fn fallback_image(&self, source: &FeedSource) -> Option<String> {
        self.fallbacks.get(&source.display_name).cloned()
    }

    /// Slow path: scrape the article page, then fall back to the per-source
    /// image. Never fails; misses are `None`.
    pub async fn resolve_image_async(&self, link: &str, source: &FeedSource) -> Option<String> {
        self.image_from_article_page(link)
            .await
            .or_else(|| self.fallback_image(source))
    }

    pub async fn image_from_article_page(&self, link: &str) -> Option<String> {
        let _permit = self.limiter.acquire().await.ok()?;

        match self.fetch_article_page(link).await {
            Ok(html) => {
                let image = extract_page_image(&html, link);
                debug!(link = %link, found = image.is_some(), "Scanned article page");
                image
            }
            Err(e) => {
                warn!(link = %link, error = %e, "Failed to fetch article page");
                None
            }
        }
    }

    async fn fetch_article_page(&self, link: &str) -> Result<String> {
        let url = self.proxy.wrap(link);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(NewsError::Status {
                status: response.status().as_u16(),
                url,
            });
        }
        Ok(response.text().await?)
    }
}
