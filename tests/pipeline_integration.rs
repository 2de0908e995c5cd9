//! Integration tests for the staged pipeline.
//!
//! These tests run the full pipeline against a real SQLite database and an
//! in-process fake site (see `support`).

mod support;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use ingest_core::catalog::{MediaKind, Owner};
use ingest_core::checkpoint::CheckpointStore;
use ingest_core::discovery::ListingPlan;
use ingest_core::fetch::FetchError;
use ingest_core::pipeline::{Pipeline, PipelineError, ScopeJob, Stage};
use support::*;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn movie_url(slug: &str) -> String {
    format!("{SITE}/movie/{slug}")
}

/// Three movies over two listing pages; page 3 is empty.
fn three_movie_site() -> Arc<FakeSite> {
    let site = FakeSite::new();
    let (a, b, c) = (movie_url("a"), movie_url("b"), movie_url("c"));
    site.page(&listing_url(1), listing_page(&[&a, &b]));
    site.page(&listing_url(2), listing_page(&[&c]));
    site.page(&listing_url(3), listing_page(&[]));
    site.page(
        &a,
        movie_page(
            "Alpha",
            2020,
            &[
                ("Latino", "streamtape", "https://streamtape.com/e/alpha"),
                ("Castellano", "powvideo", "https://powvideo.net/embed-alpha-1920x1080.html"),
            ],
        ),
    );
    site.page(
        &b,
        movie_page("Bravo", 2019, &[("VOSE", "mixdrop", "https://mixdrop.co/e/bravo")]),
    );
    site.page(
        &c,
        movie_page("Charlie", 2018, &[("Latino", "vidmoly", "https://vidmoly.to/e/charlie")]),
    );
    site
}

// ==================== Happy Path ====================

#[tokio::test]
async fn test_run_ingests_all_items_and_links() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let harness = Harness::new(dir.path(), three_movie_site()).await;

    let report = harness.run("movies", movie_plan()).await;

    assert!(report.is_clean(), "unexpected skips: {:?}", report.skipped);
    assert_eq!(report.completed, 3);
    assert_eq!(report.new_items, 3);
    assert_eq!(report.new_links, 4);
    assert_eq!(report.discovered, 3);
    assert_eq!(report.pages, 3);
    assert!(report.listing_finished);

    let counts = harness.catalog.counts().await.expect("counts");
    assert_eq!(counts.media_items, 3);
    assert_eq!(counts.links, 4);

    let alpha = harness
        .catalog
        .media_by_title("Alpha", MediaKind::Movie)
        .await
        .expect("lookup");
    let links = harness
        .catalog
        .links_for(Owner::MediaItem(alpha[0].id))
        .await
        .expect("links");
    let urls: Vec<&str> = links.iter().map(|link| link.url.as_str()).collect();
    assert!(urls.contains(&"https://powvideo.net/alpha"));
    let streamtape = links.iter().find(|link| link.server == "streamtape").expect("streamtape link");
    assert_eq!(streamtape.quality, "HD");
    assert_eq!(streamtape.language, "latino");
}

#[tokio::test]
async fn test_sessions_are_opened_once_per_worker_and_closed() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let site = three_movie_site();
    let harness = Harness::new(dir.path(), Arc::clone(&site)).await;

    harness
        .run_with("movies", movie_plan(), fast_config(3), CancellationToken::new())
        .await;

    // one discovery session plus one per resolution and link worker
    assert_eq!(site.opened.load(Ordering::SeqCst), 7);
    assert_eq!(site.closed.load(Ordering::SeqCst), 7);
}

// ==================== Idempotence ====================

#[tokio::test]
async fn test_second_run_over_same_pages_adds_nothing() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let harness = Harness::new(dir.path(), three_movie_site()).await;

    harness.run("movies", movie_plan()).await;
    // Forget progress so every item is processed again.
    harness.checkpoint.clear("movies").await.expect("clear");
    let second = harness.run("movies", movie_plan()).await;

    assert_eq!(second.completed, 3);
    assert_eq!(second.new_items, 0);
    assert_eq!(second.reused_items, 3);
    assert_eq!(second.new_links, 0);

    let counts = harness.catalog.counts().await.expect("counts");
    assert_eq!(counts.media_items, 3);
    assert_eq!(counts.links, 4);
}

#[tokio::test]
async fn test_completed_urls_are_not_fetched_again() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let site = three_movie_site();
    let harness = Harness::new(dir.path(), Arc::clone(&site)).await;

    harness.run("movies", movie_plan()).await;
    site.reset_counts();
    let second = harness.run("movies", movie_plan()).await;

    assert_eq!(second.completed, 0);
    assert_eq!(second.discovered, 0);
    assert_eq!(site.fetch_count(&movie_url("a")), 0);
    // the listing itself is read again to pick up new items
    assert_eq!(site.fetch_count(&listing_url(1)), 1);
}

#[tokio::test]
async fn test_new_items_are_picked_up_on_later_runs() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let site = three_movie_site();
    let harness = Harness::new(dir.path(), Arc::clone(&site)).await;
    harness.run("movies", movie_plan()).await;

    let delta = movie_url("d");
    site.page(&listing_url(3), listing_page(&[&delta]));
    site.page(&listing_url(4), listing_page(&[]));
    site.page(&delta, movie_page("Delta", 2021, &[("Latino", "voe", "https://voe.sx/e/delta")]));

    let second = harness.run("movies", movie_plan()).await;

    assert_eq!(second.completed, 1);
    assert_eq!(second.new_items, 1);
    assert_eq!(second.new_links, 1);
}

// ==================== Checkpoint Resume ====================

#[tokio::test]
async fn test_resume_skips_completed_and_retries_pending() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let site = three_movie_site();
    let harness = Harness::new(dir.path(), Arc::clone(&site)).await;

    harness.checkpoint.mark_completed("movies", &movie_url("a")).await;
    harness.checkpoint.mark_pending("movies", &movie_url("b")).await;

    let report = harness.run("movies", movie_plan()).await;

    assert_eq!(site.fetch_count(&movie_url("a")), 0);
    assert_eq!(site.fetch_count(&movie_url("b")), 1);
    assert_eq!(report.requeued, 1);
    assert_eq!(report.completed, 2);

    let reopened = CheckpointStore::new(harness.checkpoint.dir());
    let state = reopened.load("movies").await;
    assert!(state.pending_urls.is_empty());
    assert_eq!(state.completed_urls.len(), 3);
    assert_eq!(state.counters.new_items, 2);
}

#[tokio::test]
async fn test_cancellation_keeps_remaining_urls_pending() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let site = three_movie_site();
    let harness = Harness::new(dir.path(), Arc::clone(&site)).await;

    let cancel = CancellationToken::new();
    site.cancel_when_fetched(&listing_url(2), cancel.clone());
    let first = harness
        .run_with("movies", movie_plan(), fast_config(1), cancel)
        .await;

    assert!(first.cancelled);
    assert!(!first.listing_finished);

    let state = CheckpointStore::new(harness.checkpoint.dir()).load("movies").await;
    let accounted = state.pending_urls.len() + state.completed_urls.len();
    assert_eq!(accounted, 3, "every discovered URL is pending or completed");
    assert!(state.pending_urls.is_disjoint(&state.completed_urls));

    let second = harness.run("movies", movie_plan()).await;
    assert!(!second.cancelled);
    assert_eq!(first.completed + second.completed, 3);
    assert_eq!(harness.catalog.counts().await.expect("counts").media_items, 3);
}

// ==================== Retry Escalation ====================

#[tokio::test]
async fn test_transient_failures_are_retried_in_place() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let site = three_movie_site();
    site.fail_next(
        &movie_url("b"),
        vec![FetchError::timeout(movie_url("b")), FetchError::timeout(movie_url("b"))],
    );
    let harness = Harness::new(dir.path(), Arc::clone(&site)).await;

    let report = harness.run("movies", movie_plan()).await;

    assert!(report.is_clean());
    assert_eq!(report.completed, 3);
    assert_eq!(report.retries, 2);
    assert_eq!(report.restarts, 0);
    assert_eq!(site.fetch_count(&movie_url("b")), 3);
}

#[tokio::test]
async fn test_session_invalid_triggers_restart() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let site = three_movie_site();
    site.fail_next(
        &movie_url("c"),
        vec![FetchError::session_invalid(movie_url("c"), "redirected to login")],
    );
    let harness = Harness::new(dir.path(), Arc::clone(&site)).await;

    let report = harness.run("movies", movie_plan()).await;

    assert_eq!(report.completed, 3);
    assert_eq!(report.restarts, 1);
    assert_eq!(site.restarts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_exhausted_retries_skip_item_and_run_continues() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let site = three_movie_site();
    site.break_page(&movie_url("b"), FetchError::timeout(movie_url("b")));
    let harness = Harness::new(dir.path(), Arc::clone(&site)).await;

    let report = harness
        .run_with(
            "movies",
            movie_plan(),
            config_with_ceilings(2, 2, 1),
            CancellationToken::new(),
        )
        .await;

    assert_eq!(report.completed, 2);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].url, movie_url("b"));
    assert_eq!(report.skipped[0].stage, Stage::Resolution);
    assert!(report.skipped[0].reason.contains("exhausted"));
    // 2 attempts on the first session, 2 more after one restart
    assert_eq!(site.fetch_count(&movie_url("b")), 4);
    assert_eq!(site.restarts.load(Ordering::SeqCst), 1);

    let state = CheckpointStore::new(harness.checkpoint.dir()).load("movies").await;
    assert!(state.pending_urls.contains(&movie_url("b")));
    assert!(state.failed.contains_key(&movie_url("b")));
    assert_eq!(state.counters.skipped, 1);
}

#[tokio::test]
async fn test_missing_field_is_skipped_without_retry() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let site = three_movie_site();
    site.page(&movie_url("a"), "year 2020\n");
    let harness = Harness::new(dir.path(), Arc::clone(&site)).await;

    let report = harness.run("movies", movie_plan()).await;

    assert_eq!(report.completed, 2);
    assert_eq!(report.skipped.len(), 1);
    assert!(report.skipped[0].reason.contains("title"));
    assert_eq!(site.fetch_count(&movie_url("a")), 1);
}

#[tokio::test]
async fn test_catalog_conflict_retries_once_without_restart() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let site = three_movie_site();
    let harness = Harness::new(dir.path(), Arc::clone(&site)).await;
    let catalog = Arc::new(ConflictingCatalog::new(harness.catalog.clone(), "Bravo"));

    let pipeline = Pipeline::new(
        catalog.clone(),
        Arc::clone(&harness.checkpoint),
        Arc::new(FakeSessions {
            site: Arc::clone(&site),
        }),
        fast_config(1),
        CancellationToken::new(),
    )
    .expect("valid config");
    let job = ScopeJob::new("movies", movie_plan(), Arc::new(LineExtractor));
    let report = pipeline.run_scope(&job).await.expect("pipeline start-up");

    assert_eq!(report.completed, 2);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].url, movie_url("b"));
    assert_eq!(report.skipped[0].stage, Stage::Resolution);
    assert_eq!(catalog.movie_calls.load(Ordering::SeqCst), 2);
    assert_eq!(site.fetch_count(&movie_url("b")), 1);
    assert_eq!(site.restarts.load(Ordering::SeqCst), 0);

    let state = CheckpointStore::new(harness.checkpoint.dir()).load("movies").await;
    assert!(state.pending_urls.contains(&movie_url("b")));
    assert!(state.failed.contains_key(&movie_url("b")));
}

#[tokio::test]
async fn test_missing_page_is_permanent() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let site = three_movie_site();
    let ghost = movie_url("ghost");
    site.page(&listing_url(3), listing_page(&[&ghost]));
    site.page(&listing_url(4), listing_page(&[]));
    let harness = Harness::new(dir.path(), Arc::clone(&site)).await;

    let report = harness.run("movies", movie_plan()).await;

    assert_eq!(report.skipped.len(), 1);
    assert_eq!(site.fetch_count(&ghost), 1);
}

#[tokio::test]
async fn test_listing_failure_stops_discovery_but_not_items() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let site = three_movie_site();
    site.break_page(&listing_url(2), FetchError::http_status(listing_url(2), 404));
    let harness = Harness::new(dir.path(), Arc::clone(&site)).await;

    let report = harness.run("movies", movie_plan()).await;

    assert_eq!(report.completed, 2);
    assert!(!report.listing_finished);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].stage, Stage::Discovery);
    assert_eq!(report.skipped[0].url, listing_url(2));
}

// ==================== Links ====================

#[tokio::test]
async fn test_item_without_links_completes_with_warning_count() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let site = three_movie_site();
    site.page(&movie_url("c"), movie_page("Charlie", 2018, &[]));
    let harness = Harness::new(dir.path(), Arc::clone(&site)).await;

    let report = harness.run("movies", movie_plan()).await;

    assert_eq!(report.completed, 3);
    assert_eq!(report.owners_without_links, 1);
    assert_eq!(report.new_links, 3);
}

#[tokio::test]
async fn test_links_page_is_fetched_for_variants() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let site = three_movie_site();
    let links_url = format!("{SITE}/links/a");
    site.page(&movie_url("a"), format!("title Alpha\nyear 2020\nlinks {links_url}\n"));
    site.page(
        &links_url,
        "variant Latino|streamtape|https://streamtape.com/e/alpha\nvariant Latino|streamtape|https://streamtape.com/e/alpha\n",
    );
    site.fail_next(&links_url, vec![FetchError::timeout(links_url.clone())]);
    let harness = Harness::new(dir.path(), Arc::clone(&site)).await;

    let report = harness.run("movies", movie_plan()).await;

    assert!(report.is_clean());
    assert_eq!(site.fetch_count(&links_url), 2);
    // the duplicate variant collapses into one link
    assert_eq!(report.new_links, 3);
}

// ==================== Episodes ====================

#[tokio::test]
async fn test_episode_pages_build_season_and_episode_chain() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let site = FakeSite::new();
    let e1 = format!("{SITE}/episode/show-2x05");
    let e2 = format!("{SITE}/episode/show-2x06");
    let e3 = format!("{SITE}/episode/show-3x01");
    let plan = ListingPlan {
        url_template: format!("{SITE}/series/{{letter}}/{{page}}"),
        alphabet: vec!["a".to_string(), "b".to_string()],
        start_page: 1,
        max_pages: Some(1),
    };
    site.page(&format!("{SITE}/series/a/1"), listing_page(&[&e1, &e2]));
    site.page(&format!("{SITE}/series/b/1"), listing_page(&[&e3]));
    site.page(&e1, episode_page("The Show", "2x05 Night Falls", &[("Latino", "voe", "https://voe.sx/e/1")]));
    site.page(&e2, episode_page("The Show", "S02E06 - Dawn", &[("Latino", "voe", "https://voe.sx/e/2")]));
    site.page(&e3, episode_page("The Show", "3x01", &[("Latino", "voe", "https://voe.sx/e/3")]));
    let harness = Harness::new(dir.path(), Arc::clone(&site)).await;

    let report = harness.run("series", plan).await;

    assert!(report.is_clean(), "unexpected skips: {:?}", report.skipped);
    assert_eq!(report.completed, 3);
    assert_eq!(report.new_seasons, 2);
    assert_eq!(report.new_episodes, 3);
    let counts = harness.catalog.counts().await.expect("counts");
    assert_eq!(counts.media_items, 1);
    assert_eq!(counts.seasons, 2);
    assert_eq!(counts.episodes, 3);
    assert_eq!(counts.links, 3);
}

// ==================== Cache ====================

#[tokio::test]
async fn test_cache_does_not_change_resolved_ids() {
    let on_dir = TempDir::new().expect("Failed to create temp dir");
    let off_dir = TempDir::new().expect("Failed to create temp dir");
    let cached = Harness::with_cache(on_dir.path(), three_movie_site(), true).await;
    let uncached = Harness::with_cache(off_dir.path(), three_movie_site(), false).await;

    let config = || fast_config(1);
    cached
        .run_with("movies", movie_plan(), config(), CancellationToken::new())
        .await;
    uncached
        .run_with("movies", movie_plan(), config(), CancellationToken::new())
        .await;

    for title in ["Alpha", "Bravo", "Charlie"] {
        let a = cached.catalog.media_by_title(title, MediaKind::Movie).await.expect("lookup");
        let b = uncached.catalog.media_by_title(title, MediaKind::Movie).await.expect("lookup");
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].id, b[0].id, "id mismatch for {title}");
    }
    assert_eq!(
        cached.catalog.counts().await.expect("counts"),
        uncached.catalog.counts().await.expect("counts")
    );
}

#[tokio::test]
async fn test_uncached_workers_agree_on_one_row_per_title() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let site = FakeSite::new();
    let urls: Vec<String> = (0..8).map(|n| movie_url(&format!("example-{n}"))).collect();
    let refs: Vec<&str> = urls.iter().map(String::as_str).collect();
    site.page(&listing_url(1), listing_page(&refs));
    site.page(&listing_url(2), listing_page(&[]));
    for (n, url) in urls.iter().enumerate() {
        site.page(
            url,
            format!(
                "title Example\nyear 2020\nrating {}.0\ngenre Drama\nvariant Latino|streamtape|https://streamtape.com/e/{n}\n",
                n + 2
            ),
        );
    }
    let harness = Harness::with_cache(dir.path(), site, false).await;

    let report = harness
        .run_with("movies", movie_plan(), fast_config(4), CancellationToken::new())
        .await;

    assert!(report.is_clean(), "unexpected skips: {:?}", report.skipped);
    assert_eq!(report.completed, 8);
    let rows = harness.catalog.media_by_title("Example", MediaKind::Movie).await.expect("lookup");
    assert_eq!(rows.len(), 1);
    let links = harness.catalog.links_for(Owner::MediaItem(rows[0].id)).await.expect("links");
    assert_eq!(links.len(), 8);
}

// ==================== Start-up Failures ====================

#[tokio::test]
async fn test_session_factory_failure_is_fatal() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let harness = Harness::new(dir.path(), FakeSite::new()).await;

    let pipeline = Pipeline::new(
        harness.catalog.clone(),
        Arc::clone(&harness.checkpoint),
        Arc::new(DeadSessions),
        fast_config(1),
        CancellationToken::new(),
    )
    .expect("valid config");
    let job = ScopeJob::new("movies", movie_plan(), Arc::new(LineExtractor));

    let err = pipeline.run_scope(&job).await.unwrap_err();
    assert!(matches!(err, PipelineError::Session(_)));
}

#[tokio::test]
async fn test_invalid_worker_count_is_rejected() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let harness = Harness::new(dir.path(), FakeSite::new()).await;

    let result = Pipeline::new(
        harness.catalog.clone(),
        Arc::clone(&harness.checkpoint),
        Arc::new(DeadSessions),
        fast_config(0),
        CancellationToken::new(),
    );
    assert!(matches!(result, Err(PipelineError::InvalidWorkers { value: 0 })));
}
