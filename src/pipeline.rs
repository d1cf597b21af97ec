//! Fan-out over every configured feed, fan-in into one sorted batch.
//!
//! A run resolves once every feed has been fetched and normalized. Images
//! that the feed itself does not carry are looked up afterwards by detached
//! tasks which report back through an [`ImageUpdate`] channel, tagged with
//! the run's generation so consumers can drop results from superseded runs.

use std::cmp::Reverse;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use reqwest::Client;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};

use crate::article::Article;
use crate::config::Config;
use crate::error::Result;
use crate::fetcher::{http_client, FeedFetcher};
use crate::images::ImageResolver;
use crate::normalize::{normalize, parse_published};
use crate::proxy::ProxyResolver;
use crate::registry::{FeedSource, SourceRegistry};

/// Late image for one article of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageUpdate {
    pub generation: u64,
    pub link: String,
    pub image_url: String,
}

/// The articles of one run, newest first.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub generation: u64,
    pub articles: Vec<Article>,
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    fetcher: FeedFetcher,
    images: ImageResolver,
    generations: Arc<AtomicU64>,
}

impl Pipeline {
    pub fn new(fetcher: FeedFetcher, images: ImageResolver) -> Self {
        Self {
            fetcher,
            images,
            generations: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Build the HTTP client, relay resolver, fetcher and image resolver
    /// from configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = http_client(&config.http)?;
        let proxy = ProxyResolver::new(config.proxy.clone());
        let fetcher = FeedFetcher::new(client.clone(), proxy.clone());
        let images = ImageResolver::new(client, proxy, &config.images);
        Ok(Self::new(fetcher, images))
    }

    pub fn client(&self) -> &Client {
        self.fetcher.client()
    }

    /// Generation of the most recently started run, 0 before the first.
    pub fn current_generation(&self) -> u64 {
        self.generations.load(Ordering::SeqCst)
    }

    fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Load the registry, then every feed in it. Only a registry failure is
    /// an error; individual feeds fail quietly.
    pub async fn load_all(
        &self,
        registry: &SourceRegistry,
        updates: Option<UnboundedSender<ImageUpdate>>,
    ) -> Result<Batch> {
        let sources = registry.load(self.client()).await?;
        Ok(self.load_sources(&sources, updates).await)
    }

    /// One independent run over `sources`. Without an `updates` channel no
    /// background image lookups are scheduled.
    pub async fn load_sources(
        &self,
        sources: &[FeedSource],
        updates: Option<UnboundedSender<ImageUpdate>>,
    ) -> Batch {
        let generation = self.next_generation();
        info!(generation, sources = sources.len(), "Loading feeds");

        let per_source = join_all(
            sources
                .iter()
                .map(|source| self.load_source(source, generation, updates.as_ref())),
        )
        .await;

        let mut articles: Vec<Article> = per_source.into_iter().flatten().collect();
        sort_newest_first(&mut articles);

        info!(generation, articles = articles.len(), "Feeds loaded");
        Batch {
            generation,
            articles,
        }
    }

    async fn load_source(
        &self,
        source: &FeedSource,
        generation: u64,
        updates: Option<&UnboundedSender<ImageUpdate>>,
    ) -> Vec<Article> {
        let entries = self.fetcher.fetch_feed(source).await;

        entries
            .iter()
            .map(|raw| {
                let mut article = normalize(raw, source, &source.category);
                article.image_url = self.images.resolve_image(raw, source);

                if article.image_url.is_none() && self.images.scrapes_article_pages() {
                    if let Some(tx) = updates {
                        self.spawn_image_lookup(generation, &article.link, source, tx.clone());
                    }
                }

                article
            })
            .collect()
    }

    fn spawn_image_lookup(
        &self,
        generation: u64,
        link: &str,
        source: &FeedSource,
        tx: UnboundedSender<ImageUpdate>,
    ) {
        let images = self.images.clone();
        let link = link.to_string();
        let source = source.clone();

        tokio::spawn(async move {
            let Some(image_url) = images.resolve_image_async(&link, &source).await else {
                return;
            };

            debug!(generation, link = %link, "Resolved image in background");
            let update = ImageUpdate {
                generation,
                link,
                image_url,
            };
            if tx.send(update).is_err() {
                debug!(generation, "Image update receiver closed");
            }
        });
    }
}

/// Newest first. Dates that cannot be parsed go last; ties keep fetch order.
pub fn sort_newest_first(articles: &mut [Article]) {
    articles.sort_by_cached_key(|article| Reverse(parse_published(&article.published_at)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ImageConfig, ProxyConfig};
    use std::collections::HashSet;
    use std::path::PathBuf;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn create_pipeline(scrape_article_pages: bool) -> Pipeline {
        let mut config = Config::from_str("").unwrap();
        config.proxy = ProxyConfig {
            enabled: false,
            ..ProxyConfig::default()
        };
        config.images = ImageConfig {
            scrape_article_pages,
            ..ImageConfig::default()
        };
        Pipeline::from_config(&config).unwrap()
    }

    fn item(title: &str, link: &str, published: &str, extra: &str) -> String {
        format!(
            "<item><title>{}</title><link>{}</link><description>About {}</description><pubDate>{}</pubDate>{}</item>",
            title, link, title, published, extra
        )
    }

    fn rss(items: &[String]) -> String {
        format!("<rss><channel><title>Feed</title>{}</channel></rss>", items.concat())
    }

    async fn mount_feed(server: &MockServer, route: &str, body: String) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;
    }

    fn links(batch: &Batch) -> Vec<&str> {
        batch.articles.iter().map(|a| a.link.as_str()).collect()
    }

    mod sort_tests {
        use super::*;

        fn article(link: &str, published_at: &str) -> Article {
            Article {
                title: link.to_string(),
                link: link.to_string(),
                description: String::new(),
                source: "S".to_string(),
                category: "C".to_string(),
                published_at: published_at.to_string(),
                image_url: None,
            }
        }

        #[test]
        fn test_sort_across_date_dialects() {
            let mut articles = vec![
                article("a", "Mon, 09 Dec 2024 10:00:00 GMT"),
                article("b", "2024-12-09T13:00:00Z"),
                article("c", "2024-12-09T12:30:00+02:00"),
                article("d", "Mon, 09 Dec 2024 06:00:00 EST"),
            ];
            sort_newest_first(&mut articles);

            let order: Vec<_> = articles.iter().map(|a| a.link.as_str()).collect();
            assert_eq!(order, vec!["b", "d", "c", "a"]);
        }

        #[test]
        fn test_unparseable_dates_go_last_in_fetch_order() {
            let mut articles = vec![
                article("x", "sometime"),
                article("a", "2024-12-01T00:00:00Z"),
                article("y", ""),
                article("b", "2024-12-02T00:00:00Z"),
            ];
            sort_newest_first(&mut articles);

            let order: Vec<_> = articles.iter().map(|a| a.link.as_str()).collect();
            assert_eq!(order, vec!["b", "a", "x", "y"]);
        }

        #[test]
        fn test_equal_dates_keep_fetch_order() {
            let mut articles = vec![
                article("first", "2024-12-01T00:00:00Z"),
                article("second", "Sun, 01 Dec 2024 00:00:00 GMT"),
            ];
            sort_newest_first(&mut articles);
            assert_eq!(articles[0].link, "first");
        }
    }

    mod load_tests {
        use super::*;

        #[tokio::test]
        async fn test_merges_and_sorts_feeds() {
            let server = MockServer::start().await;
            mount_feed(
                &server,
                "/one.xml",
                rss(&[
                    item("Old", "https://one.example.com/old", "Mon, 02 Dec 2024 09:00:00 GMT", ""),
                    item("New", "https://one.example.com/new", "Mon, 09 Dec 2024 09:00:00 GMT", ""),
                ]),
            )
            .await;
            mount_feed(
                &server,
                "/two.xml",
                rss(&[item("Mid", "https://two.example.com/mid", "2024-12-05T09:00:00Z", "")]),
            )
            .await;

            let sources = vec![
                FeedSource::new("One", &format!("{}/one.xml", server.uri()), "World"),
                FeedSource::new("Two", &format!("{}/two.xml", server.uri()), "Tech"),
            ];
            let batch = create_pipeline(false).load_sources(&sources, None).await;

            assert_eq!(
                links(&batch),
                vec![
                    "https://one.example.com/new",
                    "https://two.example.com/mid",
                    "https://one.example.com/old",
                ]
            );
            assert_eq!(batch.articles[1].source, "Two");
            assert_eq!(batch.articles[1].category, "Tech");
            assert_eq!(batch.articles[1].published_at, "2024-12-05T09:00:00Z");
        }

        #[tokio::test]
        async fn test_one_failing_feed_does_not_sink_the_batch() {
            let server = MockServer::start().await;
            mount_feed(
                &server,
                "/one.xml",
                rss(&[item("A", "https://one.example.com/a", "2024-12-09T09:00:00Z", "")]),
            )
            .await;
            Mock::given(method("GET"))
                .and(path("/two.xml"))
                .respond_with(ResponseTemplate::new(500))
                .mount(&server)
                .await;
            mount_feed(
                &server,
                "/three.xml",
                rss(&[item("C", "https://three.example.com/c", "2024-12-08T09:00:00Z", "")]),
            )
            .await;

            let sources = vec![
                FeedSource::new("One", &format!("{}/one.xml", server.uri()), "World"),
                FeedSource::new("Two", &format!("{}/two.xml", server.uri()), "World"),
                FeedSource::new("Three", &format!("{}/three.xml", server.uri()), "World"),
            ];
            let batch = create_pipeline(false).load_sources(&sources, None).await;

            assert_eq!(
                links(&batch),
                vec!["https://one.example.com/a", "https://three.example.com/c"]
            );
        }

        #[tokio::test]
        async fn test_duplicates_across_feeds_are_kept() {
            let server = MockServer::start().await;
            let body = rss(&[item("Wire", "https://wire.example.com/1", "2024-12-09T09:00:00Z", "")]);
            mount_feed(&server, "/one.xml", body.clone()).await;
            mount_feed(&server, "/two.xml", body).await;

            let sources = vec![
                FeedSource::new("One", &format!("{}/one.xml", server.uri()), "World"),
                FeedSource::new("Two", &format!("{}/two.xml", server.uri()), "World"),
            ];
            let batch = create_pipeline(false).load_sources(&sources, None).await;

            assert_eq!(batch.articles.len(), 2);
        }

        #[tokio::test]
        async fn test_feed_image_is_set_inline() {
            let server = MockServer::start().await;
            mount_feed(
                &server,
                "/one.xml",
                rss(&[item(
                    "Pic",
                    "https://one.example.com/pic",
                    "2024-12-09T09:00:00Z",
                    r#"<media:thumbnail url="https://img.example.com/pic.jpg"/>"#,
                )]),
            )
            .await;

            let sources = vec![FeedSource::new("One", &format!("{}/one.xml", server.uri()), "World")];
            let batch = create_pipeline(true).load_sources(&sources, None).await;

            assert_eq!(
                batch.articles[0].image_url.as_deref(),
                Some("https://img.example.com/pic.jpg")
            );
        }

        #[tokio::test]
        async fn test_refresh_yields_same_links_and_new_generation() {
            let server = MockServer::start().await;
            mount_feed(
                &server,
                "/one.xml",
                rss(&[
                    item("A", "https://one.example.com/a", "2024-12-09T09:00:00Z", ""),
                    item("B", "https://one.example.com/b", "2024-12-08T09:00:00Z", ""),
                ]),
            )
            .await;

            let pipeline = create_pipeline(false);
            let sources = vec![FeedSource::new("One", &format!("{}/one.xml", server.uri()), "World")];

            let first = pipeline.load_sources(&sources, None).await;
            let second = pipeline.load_sources(&sources, None).await;

            let first_links: HashSet<_> = links(&first).into_iter().collect();
            let second_links: HashSet<_> = links(&second).into_iter().collect();
            assert_eq!(first_links, second_links);
            assert!(second.generation > first.generation);
            assert_eq!(pipeline.current_generation(), second.generation);
        }

        #[tokio::test]
        async fn test_missing_registry_fails_the_run() {
            let registry = SourceRegistry::Document(PathBuf::from("/nonexistent/feeds.json"));
            let result = create_pipeline(false).load_all(&registry, None).await;
            assert!(result.is_err());
        }

        #[tokio::test]
        async fn test_empty_registry_is_an_empty_batch() {
            let registry = SourceRegistry::Inline(Vec::new());
            let batch = create_pipeline(false).load_all(&registry, None).await.unwrap();
            assert!(batch.articles.is_empty());
        }
    }

    mod image_update_tests {
        use super::*;

        #[tokio::test]
        async fn test_background_image_reaches_its_own_article_once() {
            let server = MockServer::start().await;
            let with_image = format!("{}/story/with-image", server.uri());
            let without_image = format!("{}/story/plain", server.uri());

            mount_feed(
                &server,
                "/one.xml",
                rss(&[
                    item(
                        "Has thumbnail",
                        &with_image,
                        "2024-12-09T09:00:00Z",
                        r#"<media:thumbnail url="https://img.example.com/t.jpg"/>"#,
                    ),
                    item("No thumbnail", &without_image, "2024-12-08T09:00:00Z", ""),
                ]),
            )
            .await;
            Mock::given(method("GET"))
                .and(path("/story/plain"))
                .respond_with(ResponseTemplate::new(200).set_body_string(
                    r#"<html><head><meta property="og:image" content="https://img.example.com/og.jpg"></head></html>"#,
                ))
                .expect(1)
                .mount(&server)
                .await;

            let (tx, mut rx) = mpsc::unbounded_channel();
            let sources = vec![FeedSource::new("One", &format!("{}/one.xml", server.uri()), "World")];
            let batch = create_pipeline(true).load_sources(&sources, Some(tx)).await;

            assert_eq!(batch.articles[1].link, without_image);
            assert_eq!(batch.articles[1].image_url, None);

            let update = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(
                update,
                ImageUpdate {
                    generation: batch.generation,
                    link: without_image,
                    image_url: "https://img.example.com/og.jpg".to_string(),
                }
            );

            let rest = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap();
            assert_eq!(rest, None);
        }

        #[tokio::test]
        async fn test_failed_lookup_sends_nothing() {
            let server = MockServer::start().await;
            mount_feed(
                &server,
                "/one.xml",
                rss(&[item(
                    "Plain",
                    &format!("{}/story/missing", server.uri()),
                    "2024-12-09T09:00:00Z",
                    "",
                )]),
            )
            .await;

            let (tx, mut rx) = mpsc::unbounded_channel();
            let sources = vec![FeedSource::new("One", &format!("{}/one.xml", server.uri()), "World")];
            create_pipeline(true).load_sources(&sources, Some(tx)).await;

            let received = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap();
            assert_eq!(received, None);
        }
    }
}
