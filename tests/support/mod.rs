//! In-process fakes for the fetch and extraction collaborators.
//!
//! Pages are plain text, one directive per line:
//!
//! ```text
//! item https://site.test/movie/a        (listing pages)
//! title Example                          (item pages)
//! year 2020
//! rating 7.5
//! genre Drama
//! episode 2x05 Night Falls               (marks an episode page)
//! variant Latino|streamtape|https://streamtape.com/e/abc
//! links https://site.test/links/a        (variants live on another page)
//! ```

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use ingest_core::cache::LookupCache;
use ingest_core::catalog::{
    Catalog, CatalogError, CatalogOptions, CatalogRepository, DbErrorKind, MediaFields, Owner,
    Resolution,
};
use ingest_core::checkpoint::CheckpointStore;
use ingest_core::db::Database;
use ingest_core::discovery::ListingPlan;
use ingest_core::extract::{
    ExtractError, FieldExtractor, RawFields, RawItem, RawItemPage, RawLinkContext, RawVariant,
};
use ingest_core::fetch::{FetchError, FetchSession, RawDocument, SessionFactory};
use ingest_core::links::LinkRecord;
use ingest_core::pipeline::{Pipeline, PipelineConfig, RunReport, ScopeJob};
use ingest_core::retry::RetryPolicy;
use tokio_util::sync::CancellationToken;

/// Base URL of the fake site.
pub const SITE: &str = "https://site.test";

/// Scripted site shared by every session.
#[derive(Default)]
pub struct FakeSite {
    pages: Mutex<HashMap<String, String>>,
    failures: Mutex<HashMap<String, VecDeque<FetchError>>>,
    broken: Mutex<HashMap<String, FetchError>>,
    cancel_on: Mutex<Option<(String, CancellationToken)>>,
    fetches: Mutex<HashMap<String, usize>>,
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub restarts: AtomicUsize,
}

impl FakeSite {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Serves `body` at `url`.
    pub fn page(&self, url: &str, body: impl Into<String>) {
        self.pages.lock().unwrap().insert(url.to_string(), body.into());
    }

    /// Fails the next fetches of `url` with `errors`, in order.
    pub fn fail_next(&self, url: &str, errors: Vec<FetchError>) {
        self.failures
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .extend(errors);
    }

    /// Fails every fetch of `url`.
    pub fn break_page(&self, url: &str, error: FetchError) {
        self.broken.lock().unwrap().insert(url.to_string(), error);
    }

    /// Cancels `token` when `url` is fetched.
    pub fn cancel_when_fetched(&self, url: &str, token: CancellationToken) {
        *self.cancel_on.lock().unwrap() = Some((url.to_string(), token));
    }

    /// Number of fetches of `url` so far.
    pub fn fetch_count(&self, url: &str) -> usize {
        self.fetches.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub fn reset_counts(&self) {
        self.fetches.lock().unwrap().clear();
    }

    fn fetch(&self, url: &str) -> Result<RawDocument, FetchError> {
        *self.fetches.lock().unwrap().entry(url.to_string()).or_default() += 1;

        if let Some((target, token)) = self.cancel_on.lock().unwrap().as_ref()
            && target == url
        {
            token.cancel();
        }
        if let Some(error) = self.broken.lock().unwrap().get(url) {
            return Err(error.clone());
        }
        if let Some(error) = self
            .failures
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }
        match self.pages.lock().unwrap().get(url) {
            Some(body) => Ok(RawDocument::new(url, body.clone())),
            None => Err(FetchError::http_status(url, 404)),
        }
    }
}

/// Session over a [`FakeSite`].
pub struct FakeSession {
    site: Arc<FakeSite>,
}

#[async_trait]
impl FetchSession for FakeSession {
    async fn fetch_rendered_page(&mut self, url: &str) -> Result<RawDocument, FetchError> {
        tokio::task::yield_now().await;
        self.site.fetch(url)
    }

    async fn fetch_listing_page(&mut self, url: &str) -> Result<RawDocument, FetchError> {
        self.site.fetch(url)
    }

    async fn restart(&mut self) -> Result<(), FetchError> {
        self.site.restarts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&mut self) {
        self.site.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Factory handing out [`FakeSession`]s.
pub struct FakeSessions {
    pub site: Arc<FakeSite>,
}

#[async_trait]
impl SessionFactory for FakeSessions {
    async fn open(&self) -> Result<Box<dyn FetchSession>, FetchError> {
        self.site.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            site: Arc::clone(&self.site),
        }))
    }
}

/// Factory that can never open a session.
pub struct DeadSessions;

#[async_trait]
impl SessionFactory for DeadSessions {
    async fn open(&self) -> Result<Box<dyn FetchSession>, FetchError> {
        Err(FetchError::session_setup("login refused"))
    }
}

/// Line-directive extractor for the fake page format.
pub struct LineExtractor;

fn directives<'a>(doc: &'a RawDocument, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
    doc.body.lines().filter_map(move |line| {
        let (k, v) = line.trim().split_once(' ')?;
        (k == key).then(|| v.trim())
    })
}

fn first(doc: &RawDocument, key: &str) -> Option<String> {
    directives(doc, key).next().map(str::to_string)
}

fn parse_variants(doc: &RawDocument) -> Vec<RawVariant> {
    directives(doc, "variant")
        .filter_map(|value| {
            let mut parts = value.splitn(3, '|');
            Some(RawVariant {
                language_label: parts.next()?.to_string(),
                server_label: parts.next()?.to_string(),
                embedded_url: parts.next()?.to_string(),
            })
        })
        .collect()
}

impl FieldExtractor for LineExtractor {
    fn listing_links(&self, doc: &RawDocument) -> Result<Vec<String>, ExtractError> {
        Ok(directives(doc, "item").map(str::to_string).collect())
    }

    fn item_page(&self, doc: &RawDocument) -> Result<RawItemPage, ExtractError> {
        let fields = RawFields {
            title: first(doc, "title").ok_or_else(|| ExtractError::missing("title", &doc.url))?,
            year: first(doc, "year"),
            rating: first(doc, "rating"),
            genre: first(doc, "genre"),
        };
        let item = match first(doc, "episode") {
            Some(label) => RawItem::Episode { series: fields, label },
            None => RawItem::Movie(fields),
        };
        let links = match first(doc, "links") {
            Some(url) => RawLinkContext::Page(url),
            None => RawLinkContext::Inline(parse_variants(doc)),
        };
        Ok(RawItemPage { item, links })
    }

    fn variants(&self, doc: &RawDocument) -> Result<Vec<RawVariant>, ExtractError> {
        Ok(parse_variants(doc))
    }
}

/// Body of a movie page.
pub fn movie_page(title: &str, year: u32, variants: &[(&str, &str, &str)]) -> String {
    let mut body = format!("title {title}\nyear {year}\nrating 7.5\ngenre Drama\n");
    for (language, server, url) in variants {
        body.push_str(&format!("variant {language}|{server}|{url}\n"));
    }
    body
}

/// Body of an episode page.
pub fn episode_page(series: &str, label: &str, variants: &[(&str, &str, &str)]) -> String {
    let mut body = format!("title {series}\nepisode {label}\n");
    for (language, server, url) in variants {
        body.push_str(&format!("variant {language}|{server}|{url}\n"));
    }
    body
}

/// Body of a listing page.
pub fn listing_page(items: &[&str]) -> String {
    items.iter().map(|url| format!("item {url}\n")).collect()
}

/// URL of page `n` of the movie listing.
pub fn listing_url(n: u32) -> String {
    format!("{SITE}/movies/page/{n}")
}

/// Movie listing plan over [`listing_url`].
pub fn movie_plan() -> ListingPlan {
    ListingPlan::paged(format!("{SITE}/movies/page/{{page}}"))
}

/// Catalog whose movie lookups for one title always hit a write conflict.
pub struct ConflictingCatalog {
    pub inner: Arc<Catalog>,
    pub title: String,
    pub movie_calls: AtomicUsize,
}

impl ConflictingCatalog {
    pub fn new(inner: Arc<Catalog>, title: &str) -> Self {
        Self {
            inner,
            title: title.to_string(),
            movie_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl CatalogRepository for ConflictingCatalog {
    async fn resolve_movie(&self, fields: &MediaFields) -> Result<Resolution, CatalogError> {
        if fields.title != self.title {
            return self.inner.resolve_movie(fields).await;
        }
        self.movie_calls.fetch_add(1, Ordering::SeqCst);
        Err(CatalogError::Database {
            kind: DbErrorKind::Conflict,
            message: "UNIQUE constraint failed: media_items.title".to_string(),
        })
    }

    async fn resolve_series(&self, fields: &MediaFields) -> Result<Resolution, CatalogError> {
        self.inner.resolve_series(fields).await
    }

    async fn resolve_season(&self, series_id: i64, season_number: i64) -> Result<Resolution, CatalogError> {
        self.inner.resolve_season(series_id, season_number).await
    }

    async fn resolve_episode(
        &self,
        season_id: i64,
        episode_number: i64,
        title: Option<&str>,
    ) -> Result<Resolution, CatalogError> {
        self.inner.resolve_episode(season_id, episode_number, title).await
    }

    async fn insert_links_batch(&self, owner: Owner, links: &[LinkRecord]) -> Result<u64, CatalogError> {
        self.inner.insert_links_batch(owner, links).await
    }
}

/// Everything a pipeline run needs, on disk under one temp dir.
pub struct Harness {
    pub catalog: Arc<Catalog>,
    pub checkpoint: Arc<CheckpointStore>,
    pub site: Arc<FakeSite>,
    pub db: Database,
}

impl Harness {
    pub async fn new(dir: &Path, site: Arc<FakeSite>) -> Self {
        Self::with_cache(dir, site, true).await
    }

    pub async fn with_cache(dir: &Path, site: Arc<FakeSite>, cache: bool) -> Self {
        let db = Database::new(&dir.join("catalog.db"))
            .await
            .expect("Failed to create database");
        let catalog = Arc::new(Catalog::new(
            db.clone(),
            Arc::new(LookupCache::new(cache)),
            CatalogOptions::default(),
        ));
        let checkpoint = Arc::new(CheckpointStore::new(dir.join("checkpoints")));
        Self {
            catalog,
            checkpoint,
            site,
            db,
        }
    }

    pub fn pipeline(&self, config: PipelineConfig, cancel: CancellationToken) -> Pipeline {
        Pipeline::new(
            self.catalog.clone(),
            Arc::clone(&self.checkpoint),
            Arc::new(FakeSessions {
                site: Arc::clone(&self.site),
            }),
            config,
            cancel,
        )
        .expect("valid pipeline config")
    }

    pub async fn run(&self, scope: &str, plan: ListingPlan) -> RunReport {
        self.run_with(scope, plan, fast_config(2), CancellationToken::new())
            .await
    }

    pub async fn run_with(
        &self,
        scope: &str,
        plan: ListingPlan,
        config: PipelineConfig,
        cancel: CancellationToken,
    ) -> RunReport {
        let job = ScopeJob::new(scope, plan, Arc::new(LineExtractor));
        self.pipeline(config, cancel)
            .run_scope(&job)
            .await
            .expect("pipeline start-up")
    }
}

/// Zero-delay config with the given pool size.
pub fn fast_config(workers: usize) -> PipelineConfig {
    PipelineConfig::new(workers, 8, RetryPolicy::new(3, 3, Duration::ZERO)).without_jitter()
}

/// Zero-delay config with explicit retry ceilings.
pub fn config_with_ceilings(workers: usize, retries: u32, restarts: u32) -> PipelineConfig {
    PipelineConfig::new(workers, 8, RetryPolicy::new(retries, restarts, Duration::ZERO))
        .without_jitter()
}
