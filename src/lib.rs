//! Feed Digest - An RSS Feed Aggregator
//!
//! This crate fetches RSS feeds from multiple sources, caches the parsed
//! articles per source with a time-to-live, and serves the merged,
//! newest-first list with search and category filtering.

pub mod aggregator;
pub mod article;
pub mod cache;
pub mod config;
pub mod fetcher;
pub mod parser;
pub mod routes;
