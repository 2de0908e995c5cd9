//! Catalog Ingest Core Library
//!
//! This library crawls listing pages of a media site, resolves every item
//! into a deduplicated relational catalog (movies, series, seasons,
//! episodes) and attaches normalized stream links to each item. Progress is
//! checkpointed per crawl scope so interrupted runs resume where they stopped.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`db`] - Database connection and schema management
//! - [`catalog`] - Entity lookup, dedup and batched link persistence
//! - [`cache`] - Injected get-or-create cache for natural-key lookups
//! - [`checkpoint`] - Crash-resumable crawl progress per scope
//! - [`fetch`] - Fetch session boundary and the HTTP implementation
//! - [`extract`] - Field extraction boundary and the regex implementation
//! - [`resolve`] - Raw field parsing and entity resolution
//! - [`links`] - Language, server and quality normalization
//! - [`discovery`] - Listing plans and URL discovery
//! - [`retry`] - Retry policy with session-restart escalation
//! - [`pipeline`] - Staged worker pools and the end-of-run report

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod catalog;
pub mod checkpoint;
pub mod db;
pub mod discovery;
pub mod extract;
pub mod fetch;
pub mod links;
pub mod pipeline;
pub mod resolve;
pub mod retry;

// Re-export commonly used types
pub use cache::LookupCache;
pub use catalog::{Catalog, CatalogError, CatalogOptions, CatalogRepository, EpisodeMatch, SeriesRefresh};
pub use checkpoint::{CheckpointState, CheckpointStore};
pub use db::{Database, DatabaseOptions, DbError};
pub use discovery::ListingPlan;
pub use extract::{ExtractionRules, FieldExtractor, PatternExtractor};
pub use fetch::{FetchError, FetchSession, HttpSessionConfig, HttpSessionFactory, LoginConfig, SessionFactory};
pub use links::{LinkRecord, QualityTier};
pub use pipeline::{Pipeline, PipelineConfig, PipelineError, RunReport, ScopeJob};
pub use retry::{FailureType, RetryPolicy};
