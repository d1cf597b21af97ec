use std::collections::HashSet;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::{Host, Url};

use crate::article::{clean_description, Article};
use crate::desk::NewsDesk;
use crate::normalize::time_ago;
use crate::store::ReaderState;

const ARTICLES_PER_PAGE: usize = 20;
const MAX_ARTICLES_PER_PAGE: usize = 100;
const RELAY_PREFIX: &str = "/proxy/";

pub struct AppState {
    pub desk: Arc<NewsDesk>,
    pub reader: ReaderState,
    pub client: Client,
    /// Whether the relay may reach loopback, private and link-local hosts.
    pub relay_private_targets: bool,
}

// Custom error type
pub struct AppError(anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Error: {}", self.0),
        )
            .into_response()
    }
}

impl<E: Into<anyhow::Error>> From<E> for AppError {
    fn from(err: E) -> Self {
        AppError(err.into())
    }
}

/// An article as the list and detail views consume it.
#[derive(Debug, Serialize)]
pub struct ArticleView {
    #[serde(flatten)]
    pub article: Article,
    pub slug: String,
    pub summary: String,
    pub time_ago: String,
    pub visited: bool,
}

impl ArticleView {
    pub fn new(article: &Article, visited: bool) -> Self {
        Self {
            slug: article.slug(),
            summary: clean_description(&article.description),
            time_ago: time_ago(&article.published_at),
            visited,
            article: article.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ArticlePage {
    pub generation: u64,
    pub total: usize,
    pub offset: usize,
    pub has_more: bool,
    pub articles: Vec<ArticleView>,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    pub offset: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    ARTICLES_PER_PAGE
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScrollPosition {
    pub position: f64,
}

#[derive(Debug, Serialize)]
pub struct RefreshStatus {
    pub refreshing: bool,
    pub generation: u64,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/articles", get(list_articles))
        .route("/api/articles/:slug", get(get_article))
        .route("/api/articles/:slug/visit", post(visit_article))
        .route("/api/scroll/:key", get(get_scroll).put(put_scroll))
        .route("/api/sources", get(list_sources))
        .route("/refresh", post(refresh))
        .route("/refresh/status", get(refresh_status))
        .route("/proxy/*target", get(relay))
        .route("/health", get(health))
        .with_state(state)
}

fn not_found(what: &str) -> Response {
    (StatusCode::NOT_FOUND, format!("{} not found", what)).into_response()
}

// Route handlers
pub async fn list_articles(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PageQuery>,
) -> Result<Json<ArticlePage>, AppError> {
    let limit = query.limit.clamp(1, MAX_ARTICLES_PER_PAGE);
    let page = state.desk.page(query.offset, limit).await;
    let visited: HashSet<String> = state.reader.visited_links().await?;

    Ok(Json(ArticlePage {
        generation: page.generation,
        total: page.total,
        offset: page.offset,
        has_more: page.has_more(),
        articles: page
            .articles
            .iter()
            .map(|article| ArticleView::new(article, visited.contains(&article.link)))
            .collect(),
    }))
}

pub async fn get_article(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Result<Response, AppError> {
    let Some(article) = state.desk.find_by_slug(&slug).await else {
        return Ok(not_found("Article"));
    };

    let visited = state.reader.is_visited(&article.link).await?;
    Ok(Json(ArticleView::new(&article, visited)).into_response())
}

pub async fn visit_article(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Result<Response, AppError> {
    let Some(article) = state.desk.find_by_slug(&slug).await else {
        return Ok(not_found("Article"));
    };

    state.reader.mark_visited(&article.link).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub async fn get_scroll(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Json<ScrollPosition>, AppError> {
    let position = state.reader.scroll_position(&key).await?.unwrap_or(0.0);
    Ok(Json(ScrollPosition { position }))
}

pub async fn put_scroll(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Json(body): Json<ScrollPosition>,
) -> Result<StatusCode, AppError> {
    state.reader.set_scroll_position(&key, body.position).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_sources(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let categories = state.desk.sources().await?;
    Ok(Json(categories).into_response())
}

pub async fn refresh(State(state): State<Arc<AppState>>) -> Json<RefreshStatus> {
    // Spawn the refresh task
    let desk = state.desk.clone();
    tokio::spawn(async move {
        if let Err(e) = desk.refresh().await {
            warn!("Manual refresh failed: {}", e);
        }
    });

    // Return refreshing state immediately
    Json(RefreshStatus {
        refreshing: true,
        generation: state.desk.generation().await,
    })
}

pub async fn refresh_status(State(state): State<Arc<AppState>>) -> Json<RefreshStatus> {
    Json(RefreshStatus {
        refreshing: state.desk.is_refreshing().await,
        generation: state.desk.generation().await,
    })
}

/// Same-origin relay: `GET /proxy/<absolute url>` fetches the URL and hands
/// the body back with a permissive CORS header.
///
/// Anyone who can reach the service can make it fetch arbitrary public URLs.
/// Targets naming a loopback, private, link-local or unspecified address (or
/// `localhost`) are refused with 403 unless `relay_private_targets` is set.
/// The check looks at the URL host only: a public name that resolves to an
/// internal address, or an upstream redirect to one, is still followed.
pub async fn relay(State(state): State<Arc<AppState>>, uri: Uri) -> Result<Response, AppError> {
    let Some(target) = relay_target(&uri) else {
        return Ok((StatusCode::BAD_REQUEST, "Relay target must be an http(s) URL").into_response());
    };
    if !state.relay_private_targets && is_private_target(&target) {
        warn!(target = %target, "Refusing relay to a non-public host");
        return Ok((StatusCode::FORBIDDEN, "Relay target must be a public host").into_response());
    }

    debug!(target = %target, "Relaying request");
    let upstream = match state.client.get(target.as_str()).send().await {
        Ok(response) => response,
        Err(e) => {
            warn!(target = %target, error = %e, "Relay fetch failed");
            return Ok((StatusCode::BAD_GATEWAY, format!("Upstream fetch failed: {}", e))
                .into_response());
        }
    };

    let status = StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let content_type = upstream
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let body = upstream.bytes().await?;

    let mut builder = axum::http::Response::builder()
        .status(status)
        .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*");
    if let Some(content_type) = content_type {
        builder = builder.header(header::CONTENT_TYPE, content_type);
    }

    Ok(builder.body(Body::from(body))?)
}

/// The absolute URL carried after `/proxy/`, query string included.
fn relay_target(uri: &Uri) -> Option<Url> {
    let raw = uri.path().strip_prefix(RELAY_PREFIX)?;
    let raw = match uri.query() {
        Some(query) => format!("{}?{}", raw, query),
        None => raw.to_string(),
    };

    let url = Url::parse(&raw).ok()?;
    matches!(url.scheme(), "http" | "https").then_some(url)
}

fn is_private_target(url: &Url) -> bool {
    match url.host() {
        Some(Host::Ipv4(ip)) => is_private_ipv4(ip),
        Some(Host::Ipv6(ip)) => match ip.to_ipv4_mapped() {
            Some(mapped) => is_private_ipv4(mapped),
            None => is_private_ipv6(ip),
        },
        Some(Host::Domain(domain)) => {
            let domain = domain.trim_end_matches('.').to_ascii_lowercase();
            domain == "localhost" || domain.ends_with(".localhost")
        }
        None => true,
    }
}

fn is_private_ipv4(ip: Ipv4Addr) -> bool {
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        // 100.64.0.0/10, carrier-grade NAT
        || (ip.octets()[0] == 100 && (ip.octets()[1] & 0xc0) == 64)
}

fn is_private_ipv6(ip: Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        // fc00::/7 unique local, fe80::/10 link-local
        || (first & 0xfe00) == 0xfc00
        || (first & 0xffc0) == 0xfe80
}

pub async fn health() -> &'static str {
    "OK"
}
