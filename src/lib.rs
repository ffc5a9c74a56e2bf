//! Hondana - manga source aggregator.
//!
//! This library provides functionality for:
//! - Resolving series, chapters and series pages from MangaDex, WeebCentral and ImageChest
//! - Merging per-group chapter releases into one normalized model
//! - Shielding upstreams behind a timeout circuit breaker and a shared TTL cache

pub mod cache;
pub mod config;
pub mod encoding;
pub mod error;
pub mod gateway;
pub mod models;
pub mod orchestrator;
pub mod sources;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use cache::CacheLayer;
pub use config::Config;
pub use error::{ConfigError, EncodingError, SourceError};
pub use gateway::{HttpTransport, RequestGateway, Transport};
pub use models::{ChapterEntry, ChapterPages, ChapterReference, SeriesMetadata, SeriesPage, Shortcut};
pub use orchestrator::Orchestrator;
pub use sources::{SourceAdapter, SourceKind, SourceRegistry};
