//! The tag index HTTP surface.
//!
//! Compatibility-critical subset only; authentication, TLS, and the public
//! REST shell live in the outer services.

pub mod errors;

use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::client::{DuplicatePutRequest, DuplicateReplicateRequest};
use crate::error::TagIndexError;
use crate::server::TagServer;
use errors::HandlerError;

/// Page size applied when the caller does not pass `limit`.
const DEFAULT_PAGE_LIMIT: usize = 100;

/// Build the router over a shared server.
pub fn router(server: Arc<TagServer>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/tags/{tag}/digest/{digest}", put(put_tag))
        .route("/tags/{tag}", get(get_tag).head(head_tag))
        .route("/list/", get(list_all))
        .route("/list/{*prefix}", get(list_prefix))
        .route("/repositories/{repo}/tags", get(list_repository))
        .route("/remotes/tags/{tag}", post(replicate_tag))
        .route("/origin", get(origin))
        .route("/internal/duplicate/tags/{tag}/digest/{digest}", put(duplicate_put))
        .route(
            "/internal/duplicate/remotes/tags/{tag}/digest/{digest}",
            post(duplicate_replicate),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(server)
}

#[derive(Deserialize)]
struct PutParams {
    #[serde(default)]
    replicate: bool,
}

#[derive(Deserialize)]
struct PageParams {
    limit: Option<usize>,
    offset: Option<String>,
}

/// Paginated listing envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct ListResponse {
    /// Number of names in this page.
    pub size: usize,
    /// Page of names.
    pub result: Vec<String>,
    /// Pagination links.
    pub links: ListLinks,
}

/// Self/next links of a listing page.
#[derive(Debug, Serialize, Deserialize)]
pub struct ListLinks {
    /// Link that reproduces this page.
    #[serde(rename = "self")]
    pub this: String,
    /// Link to the next page, absent on the last one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
}

async fn health() -> &'static str {
    "OK"
}

async fn put_tag(
    State(server): State<Arc<TagServer>>,
    Path((tag, digest)): Path<(String, String)>,
    Query(params): Query<PutParams>,
) -> Result<StatusCode, HandlerError> {
    let digest = parse_digest(&digest)?;
    server.put_tag(&tag, digest, params.replicate).await?;
    Ok(StatusCode::OK)
}

async fn get_tag(
    State(server): State<Arc<TagServer>>,
    Path(tag): Path<String>,
) -> Result<String, HandlerError> {
    let digest = server.get_tag(&tag).await?;
    Ok(digest.to_string())
}

async fn head_tag(
    State(server): State<Arc<TagServer>>,
    Path(tag): Path<String>,
) -> Result<StatusCode, HandlerError> {
    if server.has_tag(&tag).await? {
        Ok(StatusCode::OK)
    } else {
        Err(HandlerError::not_found("tag not found"))
    }
}

async fn list_all(
    State(server): State<Arc<TagServer>>,
    Query(page): Query<PageParams>,
) -> Result<impl IntoResponse, HandlerError> {
    let names = server.list_tags("")?;
    paginate(names, &page, "/list/").map(axum::Json)
}

async fn list_prefix(
    State(server): State<Arc<TagServer>>,
    Path(prefix): Path<String>,
    Query(page): Query<PageParams>,
) -> Result<impl IntoResponse, HandlerError> {
    let names = server.list_tags(&prefix)?;
    let base = format!("/list/{prefix}");
    paginate(names, &page, &base).map(axum::Json)
}

async fn list_repository(
    State(server): State<Arc<TagServer>>,
    Path(repo): Path<String>,
    Query(page): Query<PageParams>,
) -> Result<impl IntoResponse, HandlerError> {
    let prefix = format!("{repo}:");
    let names = server
        .list_tags(&prefix)?
        .into_iter()
        .filter_map(|name| name.strip_prefix(&prefix).map(ToString::to_string))
        .collect();
    let base = format!("/repositories/{repo}/tags");
    paginate(names, &page, &base).map(axum::Json)
}

async fn replicate_tag(
    State(server): State<Arc<TagServer>>,
    Path(tag): Path<String>,
) -> Result<StatusCode, HandlerError> {
    server.replicate_tag(&tag).await?;
    Ok(StatusCode::OK)
}

async fn origin(State(server): State<Arc<TagServer>>) -> String {
    server.origin_name().to_string()
}

async fn duplicate_put(
    State(server): State<Arc<TagServer>>,
    Path((tag, digest)): Path<(String, String)>,
    axum::Json(body): axum::Json<DuplicatePutRequest>,
) -> Result<StatusCode, HandlerError> {
    let digest = parse_digest(&digest)?;
    server.receive_duplicate_put(&tag, digest, body.delay).await?;
    Ok(StatusCode::OK)
}

async fn duplicate_replicate(
    State(server): State<Arc<TagServer>>,
    Path((tag, digest)): Path<(String, String)>,
    axum::Json(body): axum::Json<DuplicateReplicateRequest>,
) -> Result<StatusCode, HandlerError> {
    let digest = parse_digest(&digest)?;
    server
        .receive_duplicate_replicate(&tag, digest, body.dependencies, body.delay)
        .await?;
    Ok(StatusCode::OK)
}

fn parse_digest(raw: &str) -> Result<strata_core::Digest, HandlerError> {
    raw.parse()
        .map_err(|source| HandlerError::from(TagIndexError::InvalidDigest { source }))
}

fn paginate(
    names: Vec<String>,
    page: &PageParams,
    base: &str,
) -> Result<ListResponse, HandlerError> {
    let limit = page.limit.unwrap_or(DEFAULT_PAGE_LIMIT).max(1);
    let offset = match &page.offset {
        None => 0,
        Some(token) => decode_offset(token)?,
    };

    let window: Vec<String> = names.iter().skip(offset).take(limit).cloned().collect();
    let next = (offset + limit < names.len())
        .then(|| format!("{base}?limit={limit}&offset={}", encode_offset(offset + limit)));

    Ok(ListResponse {
        size: window.len(),
        links: ListLinks {
            this: format!("{base}?limit={limit}&offset={}", encode_offset(offset)),
            next,
        },
        result: window,
    })
}

fn encode_offset(offset: usize) -> String {
    BASE64.encode(offset.to_string())
}

fn decode_offset(token: &str) -> Result<usize, HandlerError> {
    let bytes = BASE64
        .decode(token)
        .map_err(|_| HandlerError::bad_request("malformed offset token"))?;
    String::from_utf8(bytes)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| HandlerError::bad_request("malformed offset token"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendManager;
    use crate::cache::TagCache;
    use crate::remotes::Remotes;
    use crate::resolver::DependencyResolver;
    use crate::store::TagStore;
    use crate::tagpath;
    use crate::testutil::{FakeClientProvider, FakeOrigin, MemoryBackend};
    use axum::body::Body;
    use axum::http::Request;
    use std::collections::HashMap;
    use std::time::Duration;
    use strata_config::{RetryEngineConfig, TagIndexConfig};
    use strata_core::Digest;
    use strata_data::{ReplicationTask, WriteBackTask};
    use strata_retry::Engine;
    use strata_telemetry::Metrics;
    use strata_test_support::fixtures::scratch_dir;
    use strata_test_support::retry::MemoryTaskStore;
    use tower::ServiceExt;

    struct DropExecutor;

    #[async_trait::async_trait]
    impl<T: strata_retry::Task> strata_retry::Executor<T> for DropExecutor {
        async fn exec(&self, _task: T) -> anyhow::Result<()> {
            Ok(())
        }

        fn name(&self) -> &'static str {
            "drop"
        }
    }

    struct Harness {
        router: Router,
        origin: Arc<FakeOrigin>,
        backend: Arc<MemoryBackend>,
        _dir: tempfile::TempDir,
    }

    async fn harness() -> Harness {
        let dir = scratch_dir();
        let cache = TagCache::new(dir.path()).unwrap();
        let backend = Arc::new(MemoryBackend::new());
        let backends = Arc::new(BackendManager::new().bind(".*", backend.clone()).unwrap());
        let metrics = Metrics::new().unwrap();
        let config = RetryEngineConfig {
            incoming_workers: 1,
            retry_workers: 1,
            incoming_buffer: 16,
            retry_buffer: 16,
            max_task_throughput: Duration::from_millis(1),
            retry_interval: Duration::from_secs(3600),
            poll_retries_interval: Duration::from_secs(3600),
        };

        // Status-code translation is under test here, not executor
        // behavior, so both engines run no-op executors; the real ones are
        // covered by their own suites.
        let write_back = Engine::start(
            config.clone(),
            Arc::new(MemoryTaskStore::<WriteBackTask>::new()),
            Arc::new(DropExecutor),
            metrics.clone(),
        )
        .await
        .unwrap();

        let replication = Engine::start(
            config,
            Arc::new(MemoryTaskStore::<ReplicationTask>::new()),
            Arc::new(DropExecutor),
            metrics.clone(),
        )
        .await
        .unwrap();

        let origin = Arc::new(FakeOrigin::new());
        let mut remote_config = HashMap::new();
        remote_config.insert("idx-a:80".to_string(), vec!["^prime/.*".to_string()]);

        let server = Arc::new(TagServer::new(
            TagIndexConfig {
                cache_dir: dir.path().to_path_buf(),
                origin_dns: "origin.dc1.example".to_string(),
                ..TagIndexConfig::default()
            },
            TagStore::new(cache, backends, write_back, false),
            DependencyResolver::new(&[], origin.clone()).unwrap(),
            origin.clone(),
            Remotes::from_config(&remote_config).unwrap(),
            Arc::new(FakeClientProvider::new()),
            replication,
            metrics,
        ));

        Harness {
            router: router(server),
            origin,
            backend,
            _dir: dir,
        }
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    fn put_request(tag: &str, digest: &Digest, replicate: bool) -> Request<Body> {
        Request::builder()
            .method("PUT")
            .uri(format!(
                "/tags/{}/digest/{digest}?replicate={replicate}",
                tagpath::encode(tag)
            ))
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let harness = harness().await;
        let digest = Digest::compute(b"manifest");

        let (status, _) = send(&harness.router, put_request("repo/app:1.0", &digest, false)).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(
            &harness.router,
            Request::builder()
                .uri(format!("/tags/{}", tagpath::encode("repo/app:1.0")))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(String::from_utf8(body).unwrap(), digest.to_string());
    }

    #[tokio::test]
    async fn unknown_tag_is_404() {
        let harness = harness().await;
        let (status, body) = send(
            &harness.router,
            Request::builder()
                .uri("/tags/missing")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(String::from_utf8(body).unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn malformed_digest_is_400() {
        let harness = harness().await;
        let (status, _) = send(
            &harness.router,
            Request::builder()
                .method("PUT")
                .uri("/tags/app/digest/not-a-digest")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn missing_dependency_is_400() {
        let harness = harness().await;
        let digest = Digest::compute(b"unpushed");
        harness.origin.mark_missing(digest);

        let (status, _) = send(&harness.router, put_request("repo/app:1.0", &digest, false)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn head_reports_backend_presence_only() {
        let harness = harness().await;
        let digest = Digest::compute(b"manifest");
        let (status, _) = send(&harness.router, put_request("repo/app:1.0", &digest, false)).await;
        assert_eq!(status, StatusCode::OK);

        // On disk but not yet written back: HEAD must say 404.
        let encoded = tagpath::encode("repo/app:1.0");
        let head = |uri: String| {
            Request::builder()
                .method("HEAD")
                .uri(uri)
                .body(Body::empty())
                .unwrap()
        };
        let (status, _) = send(&harness.router, head(format!("/tags/{encoded}"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        harness.backend.put("repo/app:1.0", digest.to_string().into_bytes());
        let (status, _) = send(&harness.router, head(format!("/tags/{encoded}"))).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn list_paginates_with_continuation_tokens() {
        let harness = harness().await;
        for tag in ["repo:1.0", "repo:2.0", "repo:3.0"] {
            let digest = Digest::compute(tag.as_bytes());
            let (status, _) = send(&harness.router, put_request(tag, &digest, false)).await;
            assert_eq!(status, StatusCode::OK);
        }

        let (status, body) = send(
            &harness.router,
            Request::builder()
                .uri("/list/repo?limit=2")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let page: ListResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(page.size, 2);
        assert_eq!(page.result, vec!["repo:1.0", "repo:2.0"]);
        let next = page.links.next.expect("next link");

        let (status, body) = send(
            &harness.router,
            Request::builder().uri(next).body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let page: ListResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(page.result, vec!["repo:3.0"]);
        assert!(page.links.next.is_none());
    }

    #[tokio::test]
    async fn repository_listing_strips_the_repo_prefix() {
        let harness = harness().await;
        for tag in ["repo:1.0", "repo:2.0", "other:9"] {
            let digest = Digest::compute(tag.as_bytes());
            let (status, _) = send(&harness.router, put_request(tag, &digest, false)).await;
            assert_eq!(status, StatusCode::OK);
        }

        let (status, body) = send(
            &harness.router,
            Request::builder()
                .uri("/repositories/repo/tags")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let page: ListResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(page.result, vec!["1.0", "2.0"]);
    }

    #[tokio::test]
    async fn origin_endpoint_reports_the_local_cluster() {
        let harness = harness().await;
        let (status, body) = send(
            &harness.router,
            Request::builder().uri("/origin").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(String::from_utf8(body).unwrap(), "origin.dc1.example");
    }

    #[tokio::test]
    async fn replicate_endpoint_requires_an_existing_tag() {
        let harness = harness().await;
        let (status, _) = send(
            &harness.router,
            Request::builder()
                .method("POST")
                .uri("/remotes/tags/missing")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let digest = Digest::compute(b"prime");
        let (status, _) = send(&harness.router, put_request("prime/x", &digest, false)).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(
            &harness.router,
            Request::builder()
                .method("POST")
                .uri(format!("/remotes/tags/{}", tagpath::encode("prime/x")))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn duplicate_put_applies_the_write() {
        let harness = harness().await;
        let digest = Digest::compute(b"dup");
        let body = serde_json::to_vec(&DuplicatePutRequest {
            delay: Duration::from_secs(30),
        })
        .unwrap();

        let (status, _) = send(
            &harness.router,
            Request::builder()
                .method("PUT")
                .uri(format!(
                    "/internal/duplicate/tags/{}/digest/{digest}",
                    tagpath::encode("repo/app:2.0")
                ))
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(
            &harness.router,
            Request::builder()
                .uri(format!("/tags/{}", tagpath::encode("repo/app:2.0")))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(String::from_utf8(body).unwrap(), digest.to_string());
    }

    #[tokio::test]
    async fn duplicate_replicate_accepts_dependencies() {
        let harness = harness().await;
        let digest = Digest::compute(b"dup-rep");
        let body = serde_json::to_vec(&DuplicateReplicateRequest {
            dependencies: vec![digest],
            delay: Duration::from_secs(5),
        })
        .unwrap();

        let (status, _) = send(
            &harness.router,
            Request::builder()
                .method("POST")
                .uri(format!(
                    "/internal/duplicate/remotes/tags/{}/digest/{digest}",
                    tagpath::encode("prime/x")
                ))
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }
}
