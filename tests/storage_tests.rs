//! Durable token storage and the token-arrival poller

mod support;

use std::sync::Arc;
use std::time::{Duration, Instant};

use obo_broker::broker::TokenBroker;
use obo_broker::oauth::{
    BlobTokenBackend, FileTokenBackend, SaveOutcome, TokenArrivalPoller, TokenBackend, persist,
};
use obo_broker::{Error, config::Config};
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use support::{blueprint_config, valid_token};

const BLOB_PATH: &str = "/tokens/delegated-token.json";

fn blob(server: &MockServer) -> BlobTokenBackend {
    BlobTokenBackend::new(
        format!("{}{BLOB_PATH}?sv=2024-01-01&sig=secret", server.uri()),
        Duration::from_secs(5),
    )
    .unwrap()
}

#[tokio::test]
async fn blob_put_uses_block_blob_header() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path(BLOB_PATH))
        .and(header("x-ms-blob-type", "BlockBlob"))
        .and(header("content-type", "application/json"))
        .and(body_string_contains("\"access_token\": \"A\""))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = persist(&blob(&server), &valid_token("A", "R")).await.unwrap();
    assert_eq!(outcome, SaveOutcome::Persisted);
}

#[tokio::test]
async fn blob_get_parses_record() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(BLOB_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "A",
            "refresh_token": "R",
            "expires_at": 1_900_000_000.5
        })))
        .mount(&server)
        .await;

    let token = blob(&server).load().await.unwrap().unwrap();
    assert_eq!(token.access_token, "A");
    assert_eq!(token.refresh_token, "R");
    assert!((token.expires_at - 1_900_000_000.5).abs() < 1e-6);
}

#[tokio::test]
async fn blob_missing_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(BLOB_PATH))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    assert!(blob(&server).load().await.unwrap().is_none());
}

#[tokio::test]
async fn failed_blob_write_is_best_effort() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path(BLOB_PATH))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let outcome = persist(&blob(&server), &valid_token("A", "R")).await.unwrap();
    assert!(!outcome.is_persisted());
}

#[tokio::test]
async fn failed_file_write_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    // Parent is a regular file, so the directory cannot be created
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"").unwrap();
    let backend = FileTokenBackend::new(blocker.join("token.json"));

    let result = persist(&backend, &valid_token("A", "R")).await;
    assert!(matches!(result, Err(Error::Storage(_) | Error::Io(_))));
}

#[tokio::test]
async fn blob_errors_do_not_leak_signature() {
    let backend = BlobTokenBackend::new(
        "http://127.0.0.1:9/tokens/t.json?sig=topsecret",
        Duration::from_secs(2),
    )
    .unwrap();

    let err = backend.load().await.unwrap_err();
    assert!(!err.to_string().contains("topsecret"));
    assert!(!backend.display_url().contains("topsecret"));
}

#[tokio::test]
async fn storage_url_selects_blob_backend() {
    let mut config = Config::default();
    config.storage.url = Some("https://acct.blob.core.windows.net/c/t.json?sig=x".to_string());
    config.storage.path = Some("/tmp/ignored.json".into());
    let backend = obo_broker::oauth::backend_from_config(&config).unwrap();
    assert_eq!(backend.name(), "blob");

    config.storage.url = Some("   ".to_string());
    let backend = obo_broker::oauth::backend_from_config(&config).unwrap();
    assert_eq!(backend.name(), "file");
}

#[tokio::test]
async fn poller_sees_blob_appear() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path(BLOB_PATH))
        .respond_with(ResponseTemplate::new(404))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path(BLOB_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("last-modified", "Sat, 17 Oct 2026 10:00:00 GMT"),
        )
        .with_priority(2)
        .mount(&server)
        .await;

    let poller = TokenArrivalPoller::new(Arc::new(blob(&server)))
        .with_interval(Duration::from_millis(50));
    assert!(poller.wait_for_fresh_token(Duration::from_secs(5)).await);
}

#[tokio::test]
async fn poller_ignores_unchanged_blob() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path(BLOB_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("last-modified", "Sat, 17 Oct 2026 10:00:00 GMT"),
        )
        .mount(&server)
        .await;

    let poller = TokenArrivalPoller::new(Arc::new(blob(&server)))
        .with_interval(Duration::from_millis(50));
    assert!(!poller.wait_for_fresh_token(Duration::from_millis(300)).await);
}

#[tokio::test]
async fn unreadable_baseline_is_not_a_write() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path(BLOB_PATH))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path(BLOB_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("last-modified", "Sat, 17 Oct 2026 10:00:00 GMT"),
        )
        .with_priority(2)
        .mount(&server)
        .await;

    let poller = TokenArrivalPoller::new(Arc::new(blob(&server)))
        .with_interval(Duration::from_millis(50));
    assert!(!poller.wait_for_fresh_token(Duration::from_millis(500)).await);
}

#[tokio::test]
async fn change_after_late_baseline_is_detected() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path(BLOB_PATH))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path(BLOB_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("last-modified", "Sat, 17 Oct 2026 10:00:00 GMT"),
        )
        .up_to_n_times(2)
        .with_priority(2)
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path(BLOB_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("last-modified", "Sat, 17 Oct 2026 10:05:00 GMT"),
        )
        .with_priority(3)
        .mount(&server)
        .await;

    let poller = TokenArrivalPoller::new(Arc::new(blob(&server)))
        .with_interval(Duration::from_millis(50));
    assert!(poller.wait_for_fresh_token(Duration::from_secs(5)).await);
}

#[tokio::test]
async fn poller_reports_write_within_one_interval() {
    let dir = tempfile::tempdir().unwrap();
    let mut config: Config = blueprint_config("http://127.0.0.1:9");
    config.storage.path = Some(dir.path().join("token.json"));
    let broker = TokenBroker::from_config(&config).unwrap();

    let backend = broker.backend();
    let writer = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        backend.save(&valid_token("FRESH", "R")).await.unwrap();
    });

    let started = Instant::now();
    assert!(broker.poller().wait_for_fresh_token(Duration::from_secs(10)).await);
    // Default 3s interval: detected on the first or second check
    assert!(started.elapsed() < Duration::from_secs(7));
    writer.await.unwrap();

    // The delegated path then serves the new record
    broker.clear_delegated_cache();
    assert_eq!(broker.delegated_token().await.unwrap(), "FRESH");
}
