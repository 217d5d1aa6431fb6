//! Integration tests for the crawler
//!
//! These tests use wiremock to stand in for the provider and drive the full
//! crawl cycle end-to-end against a temporary output directory.

use roster_harvest::config::{ApiConfig, Config, CrawlerConfig, OutputConfig};
use roster_harvest::crawler::{Coordinator, CrawlService};
use roster_harvest::state::{read_checkpoint, CheckpointStore};
use roster_harvest::storage::{RunStatus, StorageError, StorageResult};
use roster_harvest::{Checkpoint, CrawlState, EnrichedRecord, FailureRecord, HarvestError};
use serde_json::json;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a test configuration pointing at the mock server
fn create_test_config(base_url: &str, dir: &Path, per_page: u32, batch_threshold: usize) -> Config {
    Config {
        api: ApiConfig {
            base_url: base_url.to_string(),
            credential: "test-token".to_string(),
            user_agent: "roster-harvest/test".to_string(),
            request_timeout: 5,
        },
        crawler: CrawlerConfig {
            per_page,
            pacing_delay: 1, // Very short for testing
            max_page_retries: 5,
        },
        output: OutputConfig {
            checkpoint_path: dir.join("progress.json").to_string_lossy().into_owned(),
            data_dir: dir.join("userdata").to_string_lossy().into_owned(),
            ledger_path: dir.join("runs.db").to_string_lossy().into_owned(),
            batch_threshold,
            error_batch_threshold: 100,
        },
    }
}

fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

fn rate_limit_body(remaining: u64, reset: i64) -> serde_json::Value {
    json!({
        "resources": { "core": { "limit": 5000, "remaining": remaining, "reset": reset, "used": 5000 - remaining } },
        "rate": { "limit": 5000, "remaining": remaining, "reset": reset }
    })
}

async fn mount_quota(server: &MockServer, remaining: u64) {
    Mock::given(method("GET"))
        .and(path("/rate_limit"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(rate_limit_body(remaining, now_secs() + 3600)),
        )
        .mount(server)
        .await;
}

/// Mounts the listing so that `ids` are served `per_page` at a time,
/// followed by an empty page
async fn mount_listing(server: &MockServer, since: u64, ids: &[u64], per_page: usize) {
    let mut cursor = since;
    for page in ids.chunks(per_page) {
        let stubs: Vec<_> = page
            .iter()
            .map(|id| json!({ "login": format!("user{}", id), "id": id, "type": "User" }))
            .collect();
        Mock::given(method("GET"))
            .and(path("/users"))
            .and(query_param("since", cursor.to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_json(stubs))
            .mount(server)
            .await;
        cursor = page.iter().copied().max().unwrap_or(cursor);
    }

    Mock::given(method("GET"))
        .and(path("/users"))
        .and(query_param("since", cursor.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(server)
        .await;
}

async fn mount_details(server: &MockServer, ids: &[u64]) {
    mount_slow_details(server, ids, Duration::ZERO).await;
}

/// Like `mount_details`, but every detail response takes `delay`
async fn mount_slow_details(server: &MockServer, ids: &[u64], delay: Duration) {
    for &id in ids {
        Mock::given(method("GET"))
            .and(path(format!("/users/user{}", id)))
            .respond_with(ResponseTemplate::new(200).set_delay(delay).set_body_json(json!({
                "login": format!("user{}", id),
                "id": id,
                "name": format!("User {}", id),
                "company": null,
                "blog": "",
                "location": "Earth",
                "email": null,
                "bio": null,
                "public_repos": id * 2,
                "followers": id,
                "following": 0,
                "created_at": "2008-01-14T04:33:35Z"
            })))
            .mount(server)
            .await;
    }
}

fn write_checkpoint(dir: &Path, since: u64, total: u64) -> PathBuf {
    let path = dir.join("progress.json");
    std::fs::write(
        &path,
        format!(r#"{{"since": {}, "totalFetched": {}}}"#, since, total),
    )
    .unwrap();
    path
}

fn read_records(path: &Path) -> Vec<EnrichedRecord> {
    serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
}

fn read_failures(path: &Path) -> Vec<FailureRecord> {
    serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
}

fn json_files(dir: &Path) -> Vec<PathBuf> {
    if !dir.exists() {
        return Vec::new();
    }
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().map_or(false, |ext| ext == "json"))
        .collect();
    files.sort();
    files
}

#[tokio::test]
async fn test_partial_failure_isolated() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_quota(&server, 5000).await;
    mount_listing(&server, 0, &[1, 2, 3, 4, 5], 5).await;
    // user3 is not mounted, so its detail request gets a 404
    mount_details(&server, &[1, 2, 4, 5]).await;

    let config = create_test_config(&server.uri(), dir.path(), 5, 10);
    let mut coordinator = Coordinator::new(config).unwrap();
    let report = coordinator.run().await.unwrap();

    assert_eq!(report.state, CrawlState::Done);
    assert_eq!(report.pages, 1);
    assert_eq!(report.records, 4);
    assert_eq!(report.failures, 1);
    assert_eq!(report.checkpoint.position(), (5, 4));
    assert_eq!(read_checkpoint(&dir.path().join("progress.json")).position(), (5, 4));

    let records = read_records(&dir.path().join("userdata/records_4.json"));
    assert_eq!(
        records.iter().map(|r| r.id).collect::<Vec<_>>(),
        vec![1, 2, 4, 5]
    );
    assert_eq!(
        records.iter().map(|r| r.sl).collect::<Vec<_>>(),
        vec![0, 1, 2, 3]
    );
    assert!(records.iter().all(|r| r.since == 0));

    let failure_files = json_files(&dir.path().join("userdata/failures"));
    assert_eq!(failure_files.len(), 1);
    let failures = read_failures(&failure_files[0]);
    assert_eq!(
        failures,
        vec![FailureRecord {
            handle: "user3".to_string(),
            id: 3,
            reason: "not found".to_string(),
        }]
    );
}

#[tokio::test]
async fn test_flush_threshold() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let ids: Vec<u64> = (1..=7).collect();

    mount_quota(&server, 5000).await;
    mount_listing(&server, 0, &ids, 3).await;
    mount_details(&server, &ids).await;

    let config = create_test_config(&server.uri(), dir.path(), 3, 3);
    let report = Coordinator::new(config).unwrap().run().await.unwrap();

    assert_eq!(report.pages, 3);
    let sizes: Vec<(String, usize)> = report
        .success_units()
        .map(|u| (u.name.clone(), u.count))
        .collect();
    assert_eq!(
        sizes,
        vec![
            ("records_3.json".to_string(), 3),
            ("records_6.json".to_string(), 3),
            ("records_7.json".to_string(), 1),
        ]
    );
    assert_eq!(json_files(&dir.path().join("userdata")).len(), 3);
    assert_eq!(report.failure_units().count(), 0);
}

#[tokio::test]
async fn test_empty_page_leaves_checkpoint_unchanged() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let checkpoint_path = write_checkpoint(dir.path(), 7, 7);
    let before = std::fs::read(&checkpoint_path).unwrap();

    mount_quota(&server, 5000).await;
    mount_listing(&server, 7, &[], 5).await;

    let config = create_test_config(&server.uri(), dir.path(), 5, 10);
    let mut coordinator = Coordinator::new(config).unwrap();
    let report = coordinator.run().await.unwrap();

    assert_eq!(coordinator.state(), CrawlState::Done);
    assert_eq!(report.pages, 0);
    assert!(report.units.is_empty());
    assert_eq!(report.checkpoint, Checkpoint::new(7, 7));
    assert_eq!(std::fs::read(&checkpoint_path).unwrap(), before);
}

#[tokio::test]
async fn test_resume_continues_numbering() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    write_checkpoint(dir.path(), 100, 40);

    mount_quota(&server, 5000).await;
    mount_listing(&server, 100, &[101, 102], 5).await;
    mount_details(&server, &[101, 102]).await;

    let config = create_test_config(&server.uri(), dir.path(), 5, 10);
    let report = Coordinator::new(config).unwrap().run().await.unwrap();

    assert_eq!(report.start.position(), (100, 40));
    assert_eq!(report.checkpoint.position(), (102, 42));

    let records = read_records(&dir.path().join("userdata/records_42.json"));
    assert_eq!(
        records.iter().map(|r| (r.sl, r.since)).collect::<Vec<_>>(),
        vec![(40, 100), (41, 100)]
    );
}

#[tokio::test]
async fn test_no_fetch_while_throttled() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    // First quota query reports an exhausted budget, later ones a fresh window
    Mock::given(method("GET"))
        .and(path("/rate_limit"))
        .respond_with(ResponseTemplate::new(200).set_body_json(rate_limit_body(0, now_secs() + 2)))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_quota(&server, 5000).await;
    mount_listing(&server, 0, &[1, 2], 5).await;
    mount_details(&server, &[1, 2]).await;

    let config = create_test_config(&server.uri(), dir.path(), 5, 10);
    let started = Instant::now();
    let report = Coordinator::new(config).unwrap().run().await.unwrap();

    assert!(started.elapsed() >= Duration::from_secs(1));
    assert_eq!(report.throttle_waits.len(), 1);
    assert!(report.throttle_waits[0] >= Duration::from_secs(1));
    assert_eq!(report.records, 2);

    let requests = server.received_requests().await.unwrap();
    let paths: Vec<&str> = requests.iter().map(|r| r.url.path()).collect();
    let second_quota = paths
        .iter()
        .enumerate()
        .filter(|(_, p)| **p == "/rate_limit")
        .nth(1)
        .map(|(i, _)| i)
        .unwrap();
    let first_fetch = paths.iter().position(|p| *p != "/rate_limit").unwrap();
    assert!(first_fetch > second_quota);
}

#[tokio::test]
async fn test_budget_exhausted_mid_page() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    // 3 remaining: the page fetch and one detail fetch leave the budget at the floor
    Mock::given(method("GET"))
        .and(path("/rate_limit"))
        .respond_with(ResponseTemplate::new(200).set_body_json(rate_limit_body(3, now_secs())))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_quota(&server, 5000).await;
    mount_listing(&server, 0, &[1, 2, 3], 3).await;
    mount_details(&server, &[1, 2, 3]).await;

    let config = create_test_config(&server.uri(), dir.path(), 3, 10);
    let report = Coordinator::new(config).unwrap().run().await.unwrap();

    assert_eq!(report.throttle_waits.len(), 1);
    assert_eq!(report.records, 3);
    assert_eq!(report.checkpoint.position(), (3, 3));

    let requests = server.received_requests().await.unwrap();
    let paths: Vec<&str> = requests.iter().map(|r| r.url.path()).collect();
    let user2 = paths.iter().position(|p| *p == "/users/user2").unwrap();
    assert_eq!(paths[user2 - 1], "/rate_limit");
}

#[tokio::test]
async fn test_backwards_cursor_fails() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let checkpoint_path = write_checkpoint(dir.path(), 10, 3);

    mount_quota(&server, 5000).await;
    Mock::given(method("GET"))
        .and(path("/users"))
        .and(query_param("since", "10"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "login": "user5", "id": 5 },
            { "login": "user6", "id": 6 }
        ])))
        .mount(&server)
        .await;

    let config = create_test_config(&server.uri(), dir.path(), 5, 10);
    let mut coordinator = Coordinator::new(config).unwrap();
    let result = coordinator.run().await;

    assert!(matches!(
        result,
        Err(HarvestError::ConsistencyFault {
            cursor: 10,
            max_id: 6
        })
    ));
    assert_eq!(coordinator.state(), CrawlState::Failed);
    assert_eq!(read_checkpoint(&checkpoint_path).position(), (10, 3));

    let requests = server.received_requests().await.unwrap();
    assert!(requests.iter().all(|r| !r.url.path().starts_with("/users/")));
}

#[tokio::test]
async fn test_stop_before_first_page() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let checkpoint_path = write_checkpoint(dir.path(), 50, 20);
    let before = std::fs::read(&checkpoint_path).unwrap();

    mount_quota(&server, 5000).await;
    mount_listing(&server, 50, &[51, 52], 5).await;
    mount_details(&server, &[51, 52]).await;

    let config = create_test_config(&server.uri(), dir.path(), 5, 10);
    let mut coordinator = Coordinator::new(config).unwrap();
    coordinator.stop_signal().stop();
    let report = coordinator.run().await.unwrap();

    assert!(report.stopped);
    assert_eq!(report.state, CrawlState::Done);
    assert_eq!(report.pages, 0);
    assert_eq!(std::fs::read(&checkpoint_path).unwrap(), before);
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_rerun_after_stop_crawls_normally() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_quota(&server, 5000).await;
    mount_listing(&server, 0, &[1, 2], 5).await;
    mount_details(&server, &[1, 2]).await;

    let config = create_test_config(&server.uri(), dir.path(), 5, 10);
    let mut coordinator = Coordinator::new(config).unwrap();
    coordinator.stop_signal().stop();

    let first = coordinator.run().await.unwrap();
    assert!(first.stopped);
    assert_eq!(first.pages, 0);

    let second = coordinator.run().await.unwrap();
    assert!(!second.stopped);
    assert_eq!(second.state, CrawlState::Done);
    assert_eq!(second.pages, 1);
    assert_eq!(second.records, 2);
    assert_eq!(second.checkpoint.position(), (2, 2));
    assert_eq!(read_records(&dir.path().join("userdata/records_2.json")).len(), 2);
}

#[tokio::test]
async fn test_stop_waits_for_page_in_flight() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_quota(&server, 5000).await;
    mount_listing(&server, 0, &[1, 2, 3, 4, 5, 6], 3).await;
    mount_slow_details(&server, &[1, 2, 3, 4, 5, 6], Duration::from_millis(300)).await;

    let config = create_test_config(&server.uri(), dir.path(), 3, 10);
    let service = CrawlService::new(config).unwrap();

    service.start().unwrap();
    // Detail fetches of the first page take about 900ms in total
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(service.stop());

    let report = service.wait().await.unwrap().unwrap();
    assert!(report.stopped);
    assert_eq!(report.pages, 1);
    assert_eq!(report.records, 3);
    assert_eq!(report.checkpoint.position(), (3, 3));
    assert_eq!(
        read_checkpoint(&dir.path().join("progress.json")).position(),
        (3, 3)
    );

    let records = read_records(&dir.path().join("userdata/records_3.json"));
    assert_eq!(records.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1, 2, 3]);

    let requests = server.received_requests().await.unwrap();
    assert!(!requests.iter().any(|r| r.url.path() == "/users"
        && r.url.query_pairs().any(|(k, v)| k == "since" && v == "3")));
    assert!(!requests.iter().any(|r| r.url.path() == "/users/user4"));
}

#[tokio::test]
async fn test_stop_while_throttled_drains() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let checkpoint_path = write_checkpoint(dir.path(), 5, 2);
    let before = std::fs::read(&checkpoint_path).unwrap();

    Mock::given(method("GET"))
        .and(path("/rate_limit"))
        .respond_with(ResponseTemplate::new(200).set_body_json(rate_limit_body(0, now_secs() + 60)))
        .mount(&server)
        .await;
    mount_listing(&server, 5, &[6, 7], 5).await;
    mount_details(&server, &[6, 7]).await;

    let config = create_test_config(&server.uri(), dir.path(), 5, 10);
    let mut coordinator = Coordinator::new(config).unwrap();
    let signal = coordinator.stop_signal();
    let crawl = tokio::spawn(async move { coordinator.run().await });

    // The crawl is now waiting for the quota window to reset
    tokio::time::sleep(Duration::from_millis(300)).await;
    signal.stop();

    let started = Instant::now();
    let report = crawl.await.unwrap().unwrap();
    assert!(started.elapsed() < Duration::from_secs(10));

    assert!(report.stopped);
    assert_eq!(report.state, CrawlState::Done);
    assert_eq!(report.pages, 0);
    assert_eq!(report.throttle_waits.len(), 1);
    assert!(report.throttle_waits[0] < Duration::from_secs(30));
    assert_eq!(report.checkpoint.position(), (5, 2));
    assert_eq!(std::fs::read(&checkpoint_path).unwrap(), before);

    let requests = server.received_requests().await.unwrap();
    assert!(requests.iter().all(|r| r.url.path() == "/rate_limit"));
}

#[tokio::test]
async fn test_requests_carry_credential_headers() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/rate_limit"))
        .and(header("authorization", "token test-token"))
        .and(header("accept", "application/vnd.github+json"))
        .and(header("user-agent", "roster-harvest/test"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(rate_limit_body(5000, now_secs() + 3600)),
        )
        .expect(1)
        .mount(&server)
        .await;
    mount_listing(&server, 0, &[], 5).await;

    let config = create_test_config(&server.uri(), dir.path(), 5, 10);
    let report = Coordinator::new(config).unwrap().run().await.unwrap();
    assert_eq!(report.state, CrawlState::Done);
}

#[tokio::test]
async fn test_service_rejects_concurrent_start() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_quota(&server, 5000).await;
    mount_listing(&server, 0, &[], 5).await;

    let config = create_test_config(&server.uri(), dir.path(), 5, 10);
    let service = CrawlService::new(config).unwrap();

    service.start().unwrap();
    assert!(matches!(service.start(), Err(HarvestError::AlreadyRunning)));

    let report = service.wait().await.unwrap().unwrap();
    assert_eq!(report.state, CrawlState::Done);
    assert!(!service.is_running());
}

#[tokio::test]
async fn test_service_status_reflects_flushed_units() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let ids: Vec<u64> = (1..=4).collect();

    mount_quota(&server, 5000).await;
    mount_listing(&server, 0, &ids, 4).await;
    mount_details(&server, &ids).await;

    let config = create_test_config(&server.uri(), dir.path(), 4, 2);
    let service = CrawlService::new(config).unwrap();

    let before = service.status().unwrap();
    assert_eq!(before.cursor, 0);
    assert!(before.success_units.is_empty());
    assert!(before.last_run.is_none());

    service.start().unwrap();
    service.wait().await.unwrap().unwrap();

    let status = service.status().unwrap();
    assert_eq!(status.cursor, 4);
    assert_eq!(status.total_fetched, 4);
    assert_eq!(
        status.success_units,
        vec!["records_2.json".to_string(), "records_4.json".to_string()]
    );
    assert!(status.failure_units.is_empty());

    let run = status.last_run.unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.end_cursor, Some(4));
    assert_eq!(run.records_written, 4);
}

#[tokio::test]
async fn test_service_stop_drains_batches() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let ids: Vec<u64> = (1..=6).collect();

    mount_quota(&server, 5000).await;
    mount_listing(&server, 0, &ids, 2).await;
    mount_details(&server, &ids).await;

    let mut config = create_test_config(&server.uri(), dir.path(), 2, 100);
    config.crawler.pacing_delay = 60_000;
    let service = CrawlService::new(config).unwrap();

    service.start().unwrap();
    // The crawl is now in its first pacing delay
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(service.stop());

    let report = service.wait().await.unwrap().unwrap();
    assert!(report.stopped);
    assert_eq!(report.pages, 1);
    assert_eq!(report.checkpoint.position(), (2, 2));

    let status = service.status().unwrap();
    assert_eq!(status.success_units, vec!["records_2.json".to_string()]);
    assert_eq!(status.last_run.unwrap().status, RunStatus::Stopped);
}

#[tokio::test]
async fn test_batch_completeness() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let ids: Vec<u64> = (1..=10).collect();

    mount_quota(&server, 5000).await;
    mount_listing(&server, 0, &ids, 4).await;
    mount_details(&server, &[1, 2, 3, 5, 6, 7, 8, 10]).await;

    let mut config = create_test_config(&server.uri(), dir.path(), 4, 3);
    config.output.error_batch_threshold = 1;
    Coordinator::new(config).unwrap().run().await.unwrap();

    let mut seen = Vec::new();
    for file in json_files(&dir.path().join("userdata")) {
        seen.extend(read_records(&file).into_iter().map(|r| r.id));
    }
    for file in json_files(&dir.path().join("userdata/failures")) {
        seen.extend(read_failures(&file).into_iter().map(|f| f.id));
    }

    let unique: HashSet<u64> = seen.iter().copied().collect();
    assert_eq!(unique.len(), seen.len(), "duplicate ids across units");
    assert_eq!(unique, ids.iter().copied().collect::<HashSet<_>>());
}

#[tokio::test]
async fn test_unauthorized_listing_fails() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_quota(&server, 5000).await;
    Mock::given(method("GET"))
        .and(path("/users"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let config = create_test_config(&server.uri(), dir.path(), 5, 10);
    let mut coordinator = Coordinator::new(config).unwrap();
    let result = coordinator.run().await;

    assert!(matches!(result, Err(HarvestError::Provider(_))));
    assert_eq!(coordinator.state(), CrawlState::Failed);
    assert!(!dir.path().join("progress.json").exists());
}

#[tokio::test]
async fn test_server_error_retried() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_quota(&server, 5000).await;
    Mock::given(method("GET"))
        .and(path("/users"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_listing(&server, 0, &[1, 2], 5).await;
    mount_details(&server, &[1, 2]).await;

    let config = create_test_config(&server.uri(), dir.path(), 5, 10);
    let report = Coordinator::new(config).unwrap().run().await.unwrap();

    assert_eq!(report.state, CrawlState::Done);
    assert_eq!(report.records, 2);
    // failed page, page, 2 details, empty page
    assert_eq!(report.requests_made, 5);
}

#[tokio::test]
async fn test_persistent_server_error_exhausts_retries() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_quota(&server, 5000).await;
    Mock::given(method("GET"))
        .and(path("/users"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let mut config = create_test_config(&server.uri(), dir.path(), 5, 10);
    config.crawler.max_page_retries = 2;
    let result = Coordinator::new(config).unwrap().run().await;

    assert!(matches!(
        result,
        Err(HarvestError::RetriesExhausted { attempts: 3, .. })
    ));
}

#[tokio::test]
async fn test_restart_after_failure_resumes_from_checkpoint() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_quota(&server, 5000).await;
    mount_details(&server, &[1, 2]).await;
    Mock::given(method("GET"))
        .and(path("/users"))
        .and(query_param("since", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "login": "user1", "id": 1 },
            { "login": "user2", "id": 2 }
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users"))
        .and(query_param("since", "2"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let config = create_test_config(&server.uri(), dir.path(), 5, 10);
    let mut coordinator = Coordinator::new(config).unwrap();
    assert!(coordinator.run().await.is_err());
    assert_eq!(coordinator.state(), CrawlState::Failed);
    // Records of the checkpointed page are not lost
    assert_eq!(
        read_records(&dir.path().join("userdata/records_2.json")).len(),
        2
    );

    server.reset().await;
    mount_quota(&server, 5000).await;
    mount_listing(&server, 2, &[3], 5).await;
    mount_details(&server, &[3]).await;

    let report = coordinator.run().await.unwrap();
    assert_eq!(coordinator.state(), CrawlState::Done);
    assert_eq!(report.start.position(), (2, 2));
    assert_eq!(report.checkpoint.position(), (3, 3));
    assert_eq!(read_records(&dir.path().join("userdata/records_3.json"))[0].sl, 2);
}

/// Checkpoint store that keeps every saved checkpoint in memory
#[derive(Clone, Default)]
struct RecordingStore {
    saved: Arc<Mutex<Vec<Checkpoint>>>,
}

impl CheckpointStore for RecordingStore {
    fn load(&self) -> Checkpoint {
        self.saved.lock().unwrap().last().copied().unwrap_or_default()
    }

    fn save(&mut self, checkpoint: &Checkpoint) -> StorageResult<()> {
        self.saved.lock().unwrap().push(*checkpoint);
        Ok(())
    }
}

/// Checkpoint store whose writes always fail
struct BrokenStore;

impl CheckpointStore for BrokenStore {
    fn load(&self) -> Checkpoint {
        Checkpoint::default()
    }

    fn save(&mut self, _checkpoint: &Checkpoint) -> StorageResult<()> {
        Err(StorageError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "read-only volume",
        )))
    }
}

#[tokio::test]
async fn test_checkpoints_are_monotonic() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let ids = [3, 8, 9, 15, 40, 41, 42];

    mount_quota(&server, 5000).await;
    mount_listing(&server, 0, &ids, 3).await;
    mount_details(&server, &ids).await;

    let store = RecordingStore::default();
    let config = create_test_config(&server.uri(), dir.path(), 3, 10);
    let mut coordinator = Coordinator::with_store(config, Box::new(store.clone())).unwrap();
    coordinator.run().await.unwrap();

    let saved = store.saved.lock().unwrap().clone();
    assert_eq!(
        saved.iter().map(|c| c.position()).collect::<Vec<_>>(),
        vec![(9, 3), (41, 6), (42, 7)]
    );
    for pair in saved.windows(2) {
        assert!(pair[1].cursor >= pair[0].cursor);
        assert!(pair[1].total_fetched >= pair[0].total_fetched);
    }
}

#[tokio::test]
async fn test_checkpoint_write_failure_is_fatal() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_quota(&server, 5000).await;
    mount_listing(&server, 0, &[1, 2], 5).await;
    mount_details(&server, &[1, 2]).await;

    let config = create_test_config(&server.uri(), dir.path(), 5, 1);
    let mut coordinator = Coordinator::with_store(config, Box::new(BrokenStore)).unwrap();
    let result = coordinator.run().await;

    assert!(matches!(result, Err(HarvestError::Storage(_))));
    assert_eq!(coordinator.state(), CrawlState::Failed);
    // Nothing from the uncheckpointed page was published
    assert!(json_files(&dir.path().join("userdata")).is_empty());
}
