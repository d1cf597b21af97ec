use std::time::Duration;

use reqwest::Client;
use tracing::{debug, info, warn};

use crate::config::HttpConfig;
use crate::error::{NewsError, Result};
use crate::proxy::ProxyResolver;
use crate::registry::FeedSource;
use crate::xml::{self, Element};

/// One item of one feed document, before normalization.
///
/// The four required fields are pulled out up front; the element itself is
/// kept because image hints live in dialect-specific places.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFeedEntry {
    pub title: String,
    pub link: String,
    pub description: String,
    pub published: String,
    pub element: Element,
}

/// Where a field may live inside an item, tried in order.
#[derive(Debug, Clone, Copy)]
enum FieldPath {
    /// Text of a direct child element
    Text(&'static str),
    /// `href` of an Atom `<link>` with no `rel` or `rel="alternate"`
    AlternateLink,
}

const TITLE_PATHS: &[FieldPath] = &[FieldPath::Text("title")];

const LINK_PATHS: &[FieldPath] = &[FieldPath::Text("link"), FieldPath::AlternateLink];

const DESCRIPTION_PATHS: &[FieldPath] = &[
    FieldPath::Text("description"),
    FieldPath::Text("summary"),
    FieldPath::Text("content"),
];

const PUBLISHED_PATHS: &[FieldPath] = &[
    FieldPath::Text("pubDate"),
    FieldPath::Text("published"),
    FieldPath::Text("updated"),
    FieldPath::Text("dc:date"),
];

impl FieldPath {
    fn read(self, item: &Element) -> Option<String> {
        match self {
            FieldPath::Text(name) => item.child(name).and_then(Element::text).map(str::to_string),
            FieldPath::AlternateLink => item
                .children_named("link")
                .filter(|link| matches!(link.attr("rel"), None | Some("alternate")))
                .find_map(|link| link.attr("href"))
                .map(str::to_string),
        }
    }
}

fn extract(item: &Element, paths: &[FieldPath]) -> Option<String> {
    paths.iter().find_map(|path| path.read(item))
}

impl RawFeedEntry {
    /// `None` when any of title, link, description or date is missing.
    pub fn from_element(element: Element) -> Option<Self> {
        let title = extract(&element, TITLE_PATHS);
        let link = extract(&element, LINK_PATHS);
        let description = extract(&element, DESCRIPTION_PATHS);
        let published = extract(&element, PUBLISHED_PATHS);

        match (title, link, description, published) {
            (Some(title), Some(link), Some(description), Some(published)) => Some(Self {
                title,
                link,
                description,
                published,
                element,
            }),
            (title, link, ..) => {
                debug!(
                    title = title.as_deref().unwrap_or("<none>"),
                    link = link.as_deref().unwrap_or("<none>"),
                    "Dropping entry missing a required field"
                );
                None
            }
        }
    }
}

/// Parse a feed document into entries. Errors only when the document itself
/// is not well-formed XML.
pub fn parse_feed(xml: &str) -> Result<Vec<RawFeedEntry>> {
    let items = xml::parse_items(xml)?;
    Ok(items
        .into_iter()
        .filter_map(RawFeedEntry::from_element)
        .collect())
}

pub fn http_client(config: &HttpConfig) -> Result<Client> {
    let client = Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .user_agent(config.user_agent.as_str())
        .build()?;
    Ok(client)
}

#[derive(Debug, Clone)]
pub struct FeedFetcher {
    client: Client,
    proxy: ProxyResolver,
}

impl FeedFetcher {
    pub fn new(client: Client, proxy: ProxyResolver) -> Self {
        Self { client, proxy }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Fetch and parse one feed. A feed that cannot be fetched or parsed
    /// yields no entries; the failure is logged and never propagated.
    pub async fn fetch_feed(&self, source: &FeedSource) -> Vec<RawFeedEntry> {
        match self.try_fetch_feed(source).await {
            Ok(entries) => {
                info!(
                    source = %source.display_name,
                    count = entries.len(),
                    "Fetched feed"
                );
                entries
            }
            Err(e) => {
                warn!(
                    source = %source.display_name,
                    url = %source.feed_url,
                    error = %e,
                    "Failed to fetch feed"
                );
                Vec::new()
            }
        }
    }

    async fn try_fetch_feed(&self, source: &FeedSource) -> Result<Vec<RawFeedEntry>> {
        let url = self.proxy.wrap(&source.feed_url);
        debug!(source = %source.display_name, url = %url, "Fetching feed");

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(NewsError::Status {
                status: response.status().as_u16(),
                url,
            });
        }

        let body = response.text().await?;
        parse_feed(&body)
    }
}
