use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use crate::article::Article;
use crate::error::Result;
use crate::pipeline::{Batch, ImageUpdate, Pipeline};
use crate::registry::{Category, SourceRegistry};

#[derive(Debug, Default)]
struct Board {
    generation: u64,
    articles: Vec<Arc<Article>>,
    /// Updates for a run whose batch has not been installed yet
    pending: Vec<ImageUpdate>,
}

impl Board {
    /// Replace only the entries whose link matches.
    fn set_image(&mut self, link: &str, image_url: &str) -> bool {
        let mut changed = false;
        for slot in self.articles.iter_mut().filter(|a| a.link == link) {
            *slot = Arc::new(slot.with_image(image_url));
            changed = true;
        }
        changed
    }
}

/// A window onto the current collection.
#[derive(Debug, Clone)]
pub struct Page {
    pub generation: u64,
    pub total: usize,
    pub offset: usize,
    pub articles: Vec<Arc<Article>>,
}

impl Page {
    pub fn has_more(&self) -> bool {
        self.offset + self.articles.len() < self.total
    }
}

/// Owner of the current article collection.
///
/// Each refresh replaces the collection wholesale. Background image results
/// are matched by link against the collection of the run that produced them;
/// results from older runs are dropped.
#[derive(Debug)]
pub struct NewsDesk {
    pipeline: Pipeline,
    registry: SourceRegistry,
    board: RwLock<Board>,
    refreshing: RwLock<bool>,
    updates: UnboundedSender<ImageUpdate>,
}

impl NewsDesk {
    /// The receiver must be handed to [`NewsDesk::run_image_updates`] for
    /// background images to land.
    pub fn new(pipeline: Pipeline, registry: SourceRegistry) -> (Self, UnboundedReceiver<ImageUpdate>) {
        let (updates, rx) = mpsc::unbounded_channel();
        let desk = Self {
            pipeline,
            registry,
            board: RwLock::new(Board::default()),
            refreshing: RwLock::new(false),
            updates,
        };
        (desk, rx)
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub async fn is_refreshing(&self) -> bool {
        *self.refreshing.read().await
    }

    pub async fn generation(&self) -> u64 {
        self.board.read().await.generation
    }

    pub async fn articles(&self) -> Vec<Arc<Article>> {
        self.board.read().await.articles.clone()
    }

    pub async fn page(&self, offset: usize, limit: usize) -> Page {
        let board = self.board.read().await;
        let articles = board
            .articles
            .iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect();

        Page {
            generation: board.generation,
            total: board.articles.len(),
            offset,
            articles,
        }
    }

    /// First article whose title slugifies to `slug`. Same-titled articles
    /// share a slug; later ones are unreachable this way.
    pub async fn find_by_slug(&self, slug: &str) -> Option<Arc<Article>> {
        let board = self.board.read().await;
        let mut matches = board.articles.iter().filter(|a| a.slug() == slug);
        let found = matches.next().cloned();

        let shadowed = matches.count();
        if shadowed > 0 {
            debug!(slug = %slug, shadowed, "Slug shared by several articles");
        }

        found
    }

    pub async fn sources(&self) -> Result<Vec<Category>> {
        self.registry.categories(self.pipeline.client()).await
    }

    /// Run the pipeline and install its batch. A refresh already in progress
    /// makes this a no-op; a failed run keeps the previous collection.
    pub async fn refresh(&self) -> Result<()> {
        {
            let mut refreshing = self.refreshing.write().await;
            if *refreshing {
                info!("Refresh already in progress, skipping");
                return Ok(());
            }
            *refreshing = true;
        }

        let result = match self
            .pipeline
            .load_all(&self.registry, Some(self.updates.clone()))
            .await
        {
            Ok(batch) => {
                self.install(batch).await;
                Ok(())
            }
            Err(e) => Err(e),
        };

        {
            let mut refreshing = self.refreshing.write().await;
            *refreshing = false;
        }

        result
    }

    /// Replace the collection with `batch`, applying any updates that
    /// arrived for it early.
    pub async fn install(&self, batch: Batch) {
        let mut board = self.board.write().await;
        if batch.generation < board.generation {
            debug!(
                generation = batch.generation,
                current = board.generation,
                "Ignoring batch from a superseded run"
            );
            return;
        }

        board.generation = batch.generation;
        board.articles = batch.articles.into_iter().map(Arc::new).collect();

        let pending = std::mem::take(&mut board.pending);
        let (ready, later): (Vec<_>, Vec<_>) = pending
            .into_iter()
            .filter(|update| update.generation >= batch.generation)
            .partition(|update| update.generation == batch.generation);
        board.pending = later;
        for update in ready {
            board.set_image(&update.link, &update.image_url);
        }

        info!(
            generation = board.generation,
            articles = board.articles.len(),
            "Installed new collection"
        );
    }

    /// Apply one background image. Returns whether an article changed.
    pub async fn apply_image(&self, update: ImageUpdate) -> bool {
        let mut board = self.board.write().await;
        match update.generation.cmp(&board.generation) {
            Ordering::Less => {
                debug!(
                    generation = update.generation,
                    current = board.generation,
                    link = %update.link,
                    "Dropping stale image update"
                );
                false
            }
            Ordering::Greater => {
                board.pending.push(update);
                false
            }
            Ordering::Equal => {
                let changed = board.set_image(&update.link, &update.image_url);
                if !changed {
                    debug!(link = %update.link, "Image update matched no article");
                }
                changed
            }
        }
    }

    /// Drain the update channel until every sender is gone.
    pub async fn run_image_updates(self: Arc<Self>, mut rx: UnboundedReceiver<ImageUpdate>) {
        while let Some(update) = rx.recv().await {
            self.apply_image(update).await;
        }
    }
}

/// Refresh once now, then every `interval_minutes`. An interval of 0 stops
/// after the first refresh.
pub async fn start_background_refresh(desk: Arc<NewsDesk>, interval_minutes: u64) {
    info!("Starting initial feed fetch");
    if let Err(e) = desk.refresh().await {
        error!("Initial feed fetch failed: {}", e);
    }

    if interval_minutes == 0 {
        info!("Scheduled refresh disabled");
        return;
    }

    let interval = refresh_period(interval_minutes);
    loop {
        tokio::time::sleep(interval).await;
        info!("Starting scheduled feed refresh");
        if let Err(e) = desk.refresh().await {
            error!("Scheduled feed refresh failed: {}", e);
        }
    }
}

fn refresh_period(minutes: u64) -> Duration {
    Duration::from_secs(minutes.saturating_mul(60))
}
