//! Integration tests for the crawler
//!
//! These tests use wiremock to create mock HTTP servers and test
//! fetching and the full crawl cycle end-to-end.

use ripple_harvest::config::{
    Config, CrawlerConfig, ExtractConfig, OutputConfig, RetryConfig, SinkBackend, UserAgentConfig,
};
use ripple_harvest::crawler::{FetchSettings, FetchStatus, Fetcher, ReqwestFetcher};
use ripple_harvest::output::load_statistics;
use ripple_harvest::state::CrawlState;
use ripple_harvest::storage::{JsonlSink, ResultSink, RunStatus};
use ripple_harvest::{Crawl, UrlTask};
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const USER_AGENT: &str = "TestBot/1.0.0 (+https://example.com/contact; test@example.com)";

/// Creates a test configuration writing into `dir`
fn create_test_config(seeds: Vec<String>, dir: &TempDir, backend: SinkBackend) -> Config {
    Config {
        crawler: CrawlerConfig {
            seeds,
            worker_count: 4,
            max_depth: 2,
            per_host_interval: 10, // Very short for testing
            request_timeout: 5_000,
            checkpoint_interval: 100,
            ..CrawlerConfig::default()
        },
        retry: RetryConfig {
            max_attempts: 3,
            base_delay: 10,
            max_delay: 100,
        },
        user_agent: UserAgentConfig {
            crawler_name: "TestBot".to_string(),
            crawler_version: "1.0.0".to_string(),
            contact_url: "https://example.com/contact".to_string(),
            contact_email: "test@example.com".to_string(),
        },
        extract: ExtractConfig::default(),
        output: OutputConfig {
            backend,
            database_path: dir.path().join("harvest.db"),
            records_path: dir.path().join("records.jsonl"),
            failures_path: dir.path().join("failures.jsonl"),
            checkpoint_path: dir.path().join("checkpoint.jsonl"),
        },
    }
}

fn html(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(
        format!("<html><head><title>t</title></head><body>{}</body></html>", body),
        "text/html; charset=utf-8",
    )
}

fn jsonl_sink(config: &Config) -> JsonlSink {
    JsonlSink::new(
        &config.output.records_path,
        &config.output.failures_path,
        &config.output.checkpoint_path,
    )
    .expect("Failed to open sink")
}

async fn requested_paths(server: &MockServer) -> Vec<String> {
    server
        .received_requests()
        .await
        .expect("Request recording disabled")
        .iter()
        .map(|r| r.url.path().to_string())
        .collect()
}

fn test_fetcher(max_body_bytes: u64) -> ReqwestFetcher {
    ReqwestFetcher::new(FetchSettings {
        user_agent: USER_AGENT.to_string(),
        connect_timeout: Duration::from_secs(2),
        redirect_limit: 5,
        max_body_bytes,
    })
    .expect("Failed to build fetcher")
}

#[tokio::test]
async fn test_fetch_classifies_responses() {
    let server = MockServer::start().await;
    let base = server.uri();

    Mock::given(method("GET"))
        .and(path("/ok"))
        .and(header("user-agent", USER_AGENT))
        .respond_with(html("<p>fine</p>"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/busy"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "2"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/down"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/big"))
        .respond_with(html(&"x".repeat(4096)))
        .mount(&server)
        .await;

    let fetcher = test_fetcher(1024);
    let timeout = Duration::from_secs(5);
    let task = |p: &str| UrlTask::seed(&format!("{}{}", base, p)).unwrap();

    let ok = fetcher.fetch(task("/ok"), timeout).await;
    assert_eq!(ok.status, FetchStatus::Success);
    let payload = ok.payload.expect("Success carries a payload");
    assert!(payload.is_html());
    assert!(payload.text().contains("fine"));

    let missing = fetcher.fetch(task("/missing"), timeout).await;
    assert_eq!(missing.status, FetchStatus::PermanentFailure);
    assert_eq!(missing.status_code, Some(404));

    let busy = fetcher.fetch(task("/busy"), timeout).await;
    assert_eq!(busy.status, FetchStatus::TransientFailure);
    assert!(busy.is_rate_limited());
    assert_eq!(busy.retry_after, Some(Duration::from_secs(2)));

    let down = fetcher.fetch(task("/down"), timeout).await;
    assert_eq!(down.status, FetchStatus::TransientFailure);
    assert_eq!(down.retry_after, None);

    let big = fetcher.fetch(task("/big"), timeout).await;
    assert_eq!(big.status, FetchStatus::PermanentFailure);
    assert!(big.reason().contains("too large"));
}

#[tokio::test]
async fn test_fetch_timeout_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(html("<p>late</p>").set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let fetcher = test_fetcher(1024 * 1024);
    let task = UrlTask::seed(&format!("{}/slow", server.uri())).unwrap();
    let result = fetcher.fetch(task, Duration::from_millis(200)).await;

    assert_eq!(result.status, FetchStatus::TransientFailure);
}

#[tokio::test]
async fn test_full_crawl_two_hosts() {
    let first = MockServer::start().await;
    let second = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(&format!(
            r#"<h1>Home</h1><a href="/about">About</a><a href="{}/">Elsewhere</a><a href="mailto:a@b.test">mail</a>"#,
            second.uri()
        )))
        .mount(&first)
        .await;
    Mock::given(method("GET"))
        .and(path("/about"))
        .respond_with(html(r#"<p>Contact us at team@example.com</p><a href="/">home</a>"#))
        .mount(&first)
        .await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(r#"<a href="/gone">gone</a>"#))
        .mount(&second)
        .await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(vec![format!("{}/", first.uri())], &dir, SinkBackend::Jsonl);

    let summary = Crawl::new(config.clone()).run().await.expect("Crawl failed");

    assert!(summary.completed);
    assert_eq!(summary.succeeded, 3);
    assert_eq!(summary.permanently_failed, 1);
    assert_eq!(summary.records, 3);
    assert_eq!(summary.pending_at_shutdown, 0);

    // Each page is fetched once even though it is linked twice
    let mut paths = requested_paths(&first).await;
    paths.sort();
    assert_eq!(paths, vec!["/", "/about"]);

    let sink = jsonl_sink(&config);
    let records = sink.load_records().unwrap();
    assert_eq!(records.len(), 3);
    let about = records
        .iter()
        .find(|r| r.source_url().ends_with("/about"))
        .expect("About page record");
    assert_eq!(
        about.field("emails"),
        Some(&serde_json::json!(["team@example.com"]))
    );

    let failures = sink.load_failures().unwrap();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].url.ends_with("/gone"));
    assert_eq!(failures[0].reason, "HTTP 404");

    assert!(!config.output.checkpoint_path.exists());
    assert!(sink.archive_path().exists());
}

#[tokio::test]
async fn test_rate_limited_page_is_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html("<p>Back in business</p>"))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(vec![format!("{}/", server.uri())], &dir, SinkBackend::Jsonl);

    let summary = Crawl::new(config).run().await.expect("Crawl failed");

    assert!(summary.completed);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.retries, 1);
    assert_eq!(summary.fetched, 2);
    assert_eq!(requested_paths(&server).await.len(), 2);
}

#[tokio::test]
async fn test_persistent_server_error_gives_up() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(vec![format!("{}/", server.uri())], &dir, SinkBackend::Jsonl);

    let summary = Crawl::new(config.clone()).run().await.expect("Crawl failed");

    assert!(summary.completed);
    assert_eq!(summary.permanently_failed, 1);
    assert_eq!(requested_paths(&server).await.len(), 3);

    let failures = jsonl_sink(&config).load_failures().unwrap();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].reason.contains("3 attempts"));
}

#[tokio::test]
async fn test_resume_skips_visited_pages() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(r#"<a href="/next">next</a>"#))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/next"))
        .respond_with(html("<p>The rest of the story</p>"))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let seed = format!("{}/", server.uri());
    let config = create_test_config(vec![seed.clone()], &dir, SinkBackend::Jsonl);

    // Simulate a crawl that stopped after the seed was processed
    {
        let mut next = UrlTask::seed(&format!("{}/next", server.uri())).unwrap();
        next.depth = 1;
        next.discovered_from = Some(seed.clone());
        jsonl_sink(&config)
            .checkpoint(&CrawlState {
                visited: vec![UrlTask::seed(&seed).unwrap().key().to_string()],
                pending: vec![next],
                permanent_failures: vec![],
            })
            .unwrap();
    }

    let summary = Crawl::new(config).run().await.expect("Crawl failed");

    assert!(summary.completed);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(requested_paths(&server).await, vec!["/next"]);
}

#[tokio::test]
async fn test_sqlite_backend_tracks_run() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(r#"<p>A single page site</p>"#))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(vec![format!("{}/", server.uri())], &dir, SinkBackend::Sqlite);

    let summary = Crawl::new(config.clone())
        .with_config_hash("abc123")
        .run()
        .await
        .expect("Crawl failed");
    assert!(summary.completed);

    let stats = load_statistics(&config.output).unwrap();
    assert_eq!(stats.records, 1);
    assert_eq!(stats.failures, 0);
    assert_eq!(stats.checkpoint_pending, 0);

    let run = stats.latest_run.expect("Run was recorded");
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.config_hash, "abc123");
    assert!(run.finished_at.is_some());
}
