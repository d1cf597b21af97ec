//! Newsdesk - a feed aggregation pipeline.
//!
//! Fetches a configured set of RSS/Atom feeds concurrently, normalizes their
//! items into one newest-first collection and enriches articles with images,
//! either from the feed itself or, in the background, from the article page.

pub mod article;
pub mod config;
pub mod desk;
pub mod error;
pub mod fetcher;
pub mod images;
pub mod normalize;
pub mod pipeline;
pub mod proxy;
pub mod registry;
pub mod routes;
pub mod store;
pub mod xml;
