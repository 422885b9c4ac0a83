use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use cached_downloader::{
    CacheConfig, CacheId, CachedDownloader, DownloadError, DownloadOutcome, Downloader,
    HttpDownloader, Validators, create_client,
};
use tokio::io::AsyncReadExt;
use url::Url;

const ETAG: &str = "\"v1\"";
const LAST_MODIFIED: &str = "Wed, 21 Oct 2015 07:28:00 GMT";

#[derive(Clone, Default)]
struct Hits(Arc<AtomicUsize>);

async fn etag_resource(State(hits): State<Hits>, headers: HeaderMap) -> Response {
    hits.0.fetch_add(1, Ordering::SeqCst);
    let matches = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        == Some(ETAG);
    if matches {
        return StatusCode::NOT_MODIFIED.into_response();
    }
    ([(header::ETAG, ETAG)], "etag body").into_response()
}

async fn last_modified_resource(headers: HeaderMap) -> Response {
    let matches = headers
        .get(header::IF_MODIFIED_SINCE)
        .and_then(|v| v.to_str().ok())
        == Some(LAST_MODIFIED);
    if matches {
        return StatusCode::NOT_MODIFIED.into_response();
    }
    ([(header::LAST_MODIFIED, LAST_MODIFIED)], "dated body").into_response()
}

async fn volatile_resource() -> &'static str {
    "volatile body"
}

async fn slow_resource() -> &'static str {
    tokio::time::sleep(Duration::from_secs(5)).await;
    "too late"
}

async fn spawn_origin() -> (SocketAddr, Hits) {
    let hits = Hits::default();
    let app = Router::new()
        .route("/etag", get(etag_resource))
        .route("/last-modified", get(last_modified_resource))
        .route("/volatile", get(volatile_resource))
        .route("/slow", get(slow_resource))
        .with_state(hits.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, hits)
}

fn url(addr: SocketAddr, path: &str) -> Url {
    format!("http://{addr}{path}").parse().unwrap()
}

fn downloader(timeout: Duration) -> HttpDownloader {
    let config = CacheConfig::builder().with_download_timeout(timeout).build();
    HttpDownloader::new(&config).unwrap()
}

#[tokio::test]
async fn test_etag_revalidation() {
    let (addr, _) = spawn_origin().await;
    let downloader = downloader(Duration::from_secs(5));
    let url = url(addr, "/etag");

    let mut body = Vec::new();
    let outcome = downloader
        .download(&url, &mut body, &Validators::default())
        .await
        .unwrap();
    assert_eq!(
        outcome,
        DownloadOutcome::Fetched {
            size: 9,
            validators: Validators::default().with_etag(ETAG),
        }
    );
    assert_eq!(body, b"etag body");

    let mut body = Vec::new();
    let outcome = downloader
        .download(&url, &mut body, &Validators::default().with_etag(ETAG))
        .await
        .unwrap();
    assert_eq!(outcome, DownloadOutcome::NotModified);
    assert!(body.is_empty());
}

#[tokio::test]
async fn test_last_modified_revalidation() {
    let (addr, _) = spawn_origin().await;
    let downloader = downloader(Duration::from_secs(5));
    let url = url(addr, "/last-modified");

    let mut body = Vec::new();
    let outcome = downloader
        .download(&url, &mut body, &Validators::default())
        .await
        .unwrap();
    let DownloadOutcome::Fetched { validators, .. } = outcome else {
        panic!("expected a full transfer");
    };
    assert_eq!(validators.last_modified.as_deref(), Some(LAST_MODIFIED));
    assert!(validators.etag.is_none());

    let mut body = Vec::new();
    let outcome = downloader
        .download(&url, &mut body, &validators)
        .await
        .unwrap();
    assert_eq!(outcome, DownloadOutcome::NotModified);
}

#[tokio::test]
async fn test_missing_resource_is_status_error() {
    let (addr, _) = spawn_origin().await;
    let downloader = downloader(Duration::from_secs(5));

    let mut body = Vec::new();
    let err = downloader
        .download(&url(addr, "/missing"), &mut body, &Validators::default())
        .await
        .unwrap_err();
    assert!(matches!(err, DownloadError::StatusCode(s) if s == reqwest::StatusCode::NOT_FOUND));
}

#[tokio::test]
async fn test_deadline_surfaces_as_timeout() {
    let (addr, _) = spawn_origin().await;
    let downloader = downloader(Duration::from_millis(200));

    let mut body = Vec::new();
    let err = downloader
        .download(&url(addr, "/slow"), &mut body, &Validators::default())
        .await
        .unwrap_err();
    assert!(matches!(err, DownloadError::Timeout(_)), "got {err:?}");
}

#[tokio::test]
async fn test_downloader_with_shared_client() {
    let (addr, hits) = spawn_origin().await;
    let config = CacheConfig::builder()
        .with_user_agent("shared-client/1.0")
        .build();
    let client = create_client(&config).unwrap();
    let first = HttpDownloader::with_client(client.clone());
    let second = HttpDownloader::with_client(client);
    let url = url(addr, "/etag");

    let mut body = Vec::new();
    let outcome = first
        .download(&url, &mut body, &Validators::default())
        .await
        .unwrap();
    let DownloadOutcome::Fetched { validators, .. } = outcome else {
        panic!("expected a full transfer");
    };

    let mut body = Vec::new();
    let outcome = second.download(&url, &mut body, &validators).await.unwrap();
    assert_eq!(outcome, DownloadOutcome::NotModified);
    assert_eq!(hits.0.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_cached_downloader_over_http() {
    let (addr, hits) = spawn_origin().await;
    let root = tempfile::tempdir().unwrap();
    let config = CacheConfig::builder()
        .with_cache_dir(root.path().join("cache"))
        .with_scratch_dir(root.path().join("scratch"))
        .with_max_size(1024)
        .build();
    let cache = CachedDownloader::new(config).await.unwrap();
    assert_eq!(cache.config().max_size_bytes, 1024);
    let etag_url = url(addr, "/etag").to_string();

    for _ in 0..2 {
        let mut file = cache.fetch(&etag_url, "etag").await.unwrap();
        let mut body = String::new();
        file.read_to_string(&mut body).await.unwrap();
        assert_eq!(body, "etag body");
    }

    assert_eq!(hits.0.load(Ordering::SeqCst), 2);
    assert!(cache.store().contains(&CacheId::resolve("etag")));
    assert_eq!(cache.stats().used_bytes, 9);

    let mut file = cache
        .fetch(&url(addr, "/volatile").to_string(), "volatile")
        .await
        .unwrap();
    let mut body = String::new();
    file.read_to_string(&mut body).await.unwrap();
    assert_eq!(body, "volatile body");
    assert!(!cache.store().contains(&CacheId::resolve("volatile")));
    assert_eq!(cache.stats().entries, 1);
}

#[tokio::test]
async fn test_stats_serialize() {
    let root = tempfile::tempdir().unwrap();
    let config = CacheConfig::builder()
        .with_cache_dir(root.path().join("cache"))
        .with_scratch_dir(root.path().join("scratch"))
        .with_max_size(2048)
        .build();
    let cache = CachedDownloader::new(config).await.unwrap();

    let json = serde_json::to_value(cache.stats()).unwrap();
    assert_eq!(
        json,
        serde_json::json!({ "entries": 0, "used_bytes": 0, "capacity_bytes": 2048 })
    );
}
