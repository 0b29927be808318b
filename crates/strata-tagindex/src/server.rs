//! The replication dispatcher: the tag server core.

use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use strata_config::TagIndexConfig;
use strata_core::Digest;
use strata_data::{ReplicationTask, SqliteReplicationStore};
use strata_retry::Engine;
use strata_telemetry::Metrics;
use tracing::{info, warn};

use crate::client::ClientProvider;
use crate::error::{TagIndexError, TagIndexResult};
use crate::origin::{OriginCluster, OriginError};
use crate::remotes::Remotes;
use crate::resolver::DependencyResolver;
use crate::store::TagStore;

/// Coordinates tag writes: dependency checks, the local store, neighbor
/// duplication fan-out, and per-remote replication tasks.
pub struct TagServer {
    config: TagIndexConfig,
    store: TagStore,
    resolver: DependencyResolver,
    origin: Arc<dyn OriginCluster>,
    remotes: Remotes,
    clients: Arc<dyn ClientProvider>,
    replication: Engine<ReplicationTask>,
    metrics: Metrics,
}

impl TagServer {
    /// Assemble the server over its collaborators.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: TagIndexConfig,
        store: TagStore,
        resolver: DependencyResolver,
        origin: Arc<dyn OriginCluster>,
        remotes: Remotes,
        clients: Arc<dyn ClientProvider>,
        replication: Engine<ReplicationTask>,
        metrics: Metrics,
    ) -> Self {
        Self {
            config,
            store,
            resolver,
            origin,
            remotes,
            clients,
            replication,
            metrics,
        }
    }

    /// Handle a client tag write.
    ///
    /// Dependencies are verified against the origin before anything is
    /// stored: a put whose blobs never arrived must fail loudly rather than
    /// advertise a tag nobody can pull.
    ///
    /// # Errors
    ///
    /// `MissingDependency` if any resolved dependency is absent from the
    /// origin; store and engine failures otherwise. Neighbor duplication is
    /// best-effort and never fails the put.
    pub async fn put_tag(&self, tag: &str, digest: Digest, replicate: bool) -> TagIndexResult<()> {
        let dependencies = self.resolver.resolve(tag, digest).await?;
        for dependency in &dependencies {
            self.origin
                .stat(tag, dependency)
                .await
                .map_err(|err| match err {
                    OriginError::BlobNotFound { digest } => {
                        TagIndexError::MissingDependency { digest }
                    }
                    OriginError::Unavailable { source } => TagIndexError::Origin { source },
                })?;
        }

        self.store.put(tag, digest, Duration::ZERO).await?;
        self.fan_out_put(tag, digest).await;

        if replicate {
            self.replicate_resolved(tag, digest, &dependencies).await?;
        }
        Ok(())
    }

    /// Resolve a tag.
    ///
    /// # Errors
    ///
    /// `TagNotFound` when neither store level has it.
    pub async fn get_tag(&self, tag: &str) -> TagIndexResult<Digest> {
        self.store.get(tag).await
    }

    /// Whether the backend has the tag.
    ///
    /// # Errors
    ///
    /// Returns backend transport failures.
    pub async fn has_tag(&self, tag: &str) -> TagIndexResult<bool> {
        self.store.has(tag).await
    }

    /// Locally cached tags under a prefix.
    ///
    /// # Errors
    ///
    /// Returns cache scan failures.
    pub fn list_tags(&self, prefix: &str) -> TagIndexResult<Vec<String>> {
        self.store.list(prefix)
    }

    /// DNS name of the local origin cluster.
    #[must_use]
    pub fn origin_name(&self) -> &str {
        &self.config.origin_dns
    }

    /// Kick off replication for an already-written tag.
    ///
    /// # Errors
    ///
    /// `TagNotFound` if the tag is absent; engine failures otherwise.
    pub async fn replicate_tag(&self, tag: &str) -> TagIndexResult<()> {
        let digest = self.store.get(tag).await?;
        let dependencies = self.resolver.resolve(tag, digest).await?;
        self.replicate_resolved(tag, digest, &dependencies).await
    }

    /// Neighbor endpoint: a peer duplicated its local put to us.
    ///
    /// The delay defers our backend write-back so the authoritative node
    /// uploads first.
    ///
    /// # Errors
    ///
    /// Returns store failures.
    pub async fn receive_duplicate_put(
        &self,
        tag: &str,
        digest: Digest,
        delay: Duration,
    ) -> TagIndexResult<()> {
        self.store.put(tag, digest, delay).await
    }

    /// Neighbor endpoint: a peer duplicated its replication fan-out to us.
    ///
    /// # Errors
    ///
    /// Returns engine submission failures.
    pub async fn receive_duplicate_replicate(
        &self,
        tag: &str,
        digest: Digest,
        dependencies: Vec<Digest>,
        delay: Duration,
    ) -> TagIndexResult<()> {
        for destination in self.remotes.matches(tag) {
            self.replication
                .add(ReplicationTask::new(
                    tag,
                    digest,
                    dependencies.clone(),
                    destination,
                    delay,
                ))
                .await?;
        }
        Ok(())
    }

    /// Enqueue one replication task per matched remote, then duplicate the
    /// fan-out to neighbors. A replicate on an unmatched tag is a silent
    /// no-op.
    async fn replicate_resolved(
        &self,
        tag: &str,
        digest: Digest,
        dependencies: &[Digest],
    ) -> TagIndexResult<()> {
        let destinations = self.remotes.matches(tag);
        if destinations.is_empty() {
            return Ok(());
        }

        for destination in destinations {
            self.replication
                .add(ReplicationTask::new(
                    tag,
                    digest,
                    dependencies.to_vec(),
                    destination,
                    Duration::ZERO,
                ))
                .await?;
        }

        self.fan_out_replicate(tag, digest, dependencies).await;
        Ok(())
    }

    async fn fan_out_put(&self, tag: &str, digest: Digest) {
        let neighbors = self.shuffled_neighbors();
        if neighbors.is_empty() {
            return;
        }

        let mut delay = Duration::ZERO;
        let mut reached_any = false;
        for addr in &neighbors {
            delay += self.config.duplicate_put_stagger;
            match self
                .clients
                .provide(addr)
                .duplicate_put(tag, digest, delay)
                .await
            {
                Ok(()) => reached_any = true,
                Err(err) => warn!(neighbor = %addr, error = %err, "duplicate put failed"),
            }
        }
        if !reached_any {
            self.metrics.record_duplicate_put_failure();
            info!(tag = %tag, "put reached no neighbor, relying on write-back alone");
        }
    }

    async fn fan_out_replicate(&self, tag: &str, digest: Digest, dependencies: &[Digest]) {
        let mut delay = Duration::ZERO;
        for addr in &self.shuffled_neighbors() {
            delay += self.config.duplicate_replicate_stagger;
            if let Err(err) = self
                .clients
                .provide(addr)
                .duplicate_replicate(tag, digest, dependencies, delay)
                .await
            {
                warn!(neighbor = %addr, error = %err, "duplicate replicate failed");
            }
        }
    }

    fn shuffled_neighbors(&self) -> Vec<String> {
        let mut neighbors = self.config.neighbors.clone();
        neighbors.shuffle(&mut rand::rng());
        neighbors
    }
}

/// Drop persisted replication tasks whose destination is no longer bound to
/// their tag. Runs once at startup, before the engine begins executing.
///
/// # Errors
///
/// Returns store failures.
pub async fn purge_stale_tasks(
    store: &SqliteReplicationStore,
    remotes: &Remotes,
) -> Result<usize, strata_retry::StoreError> {
    store
        .delete_where(|task| !remotes.valid(&task.tag, &task.destination))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendManager;
    use crate::cache::TagCache;
    use crate::testutil::{FakeClientProvider, FakeOrigin, MemoryBackend};
    use crate::writeback::WriteBackExecutor;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::collections::HashSet;
    use strata_config::{ResolverKind, ResolverRule, RetryEngineConfig};
    use strata_data::WriteBackTask;
    use strata_retry::{Executor, Task, TaskStore};
    use strata_test_support::fixtures::scratch_dir;
    use strata_test_support::retry::MemoryTaskStore;

    /// Executor that always fails, pinning tasks in the store for
    /// inspection.
    struct ParkedExecutor;

    #[async_trait]
    impl Executor<ReplicationTask> for ParkedExecutor {
        async fn exec(&self, _task: ReplicationTask) -> anyhow::Result<()> {
            anyhow::bail!("parked for inspection")
        }

        fn name(&self) -> &'static str {
            "parked"
        }
    }

    fn engine_config() -> RetryEngineConfig {
        RetryEngineConfig {
            incoming_workers: 1,
            retry_workers: 1,
            incoming_buffer: 16,
            retry_buffer: 16,
            max_task_throughput: Duration::from_millis(1),
            retry_interval: Duration::from_secs(3600),
            poll_retries_interval: Duration::from_secs(3600),
        }
    }

    struct Harness {
        server: TagServer,
        replication_store: Arc<MemoryTaskStore<ReplicationTask>>,
        origin: Arc<FakeOrigin>,
        clients: Arc<FakeClientProvider>,
        metrics: Metrics,
        _dir: tempfile::TempDir,
    }

    async fn harness(neighbors: Vec<String>) -> Harness {
        let dir = scratch_dir();
        let cache = TagCache::new(dir.path()).unwrap();
        let backend = Arc::new(MemoryBackend::new());
        let backends = Arc::new(BackendManager::new().bind(".*", backend).unwrap());
        let metrics = Metrics::new().unwrap();

        let write_back_store = Arc::new(MemoryTaskStore::<WriteBackTask>::new());
        let write_back = Engine::start(
            engine_config(),
            write_back_store,
            Arc::new(WriteBackExecutor::new(cache.clone(), backends.clone())),
            metrics.clone(),
        )
        .await
        .unwrap();

        let replication_store = Arc::new(MemoryTaskStore::<ReplicationTask>::new());
        let replication = Engine::start(
            engine_config(),
            replication_store.clone(),
            Arc::new(ParkedExecutor),
            metrics.clone(),
        )
        .await
        .unwrap();

        let origin = Arc::new(FakeOrigin::new());
        let clients = Arc::new(FakeClientProvider::new());

        let mut remote_config = HashMap::new();
        remote_config.insert(
            "idx-a:80".to_string(),
            vec!["^prime/.*".to_string(), "^all/.*".to_string()],
        );
        remote_config.insert(
            "idx-b:80".to_string(),
            vec!["^prime/.*".to_string(), "^all/.*".to_string()],
        );
        remote_config.insert("idx-c:80".to_string(), vec!["^all/.*".to_string()]);

        let config = TagIndexConfig {
            cache_dir: dir.path().to_path_buf(),
            neighbors,
            duplicate_put_stagger: Duration::from_millis(100),
            duplicate_replicate_stagger: Duration::from_millis(100),
            ..TagIndexConfig::default()
        };

        let resolver = DependencyResolver::new(
            &[ResolverRule {
                namespace: ".*".to_string(),
                kind: ResolverKind::Default,
            }],
            origin.clone(),
        )
        .unwrap();

        let store = TagStore::new(cache, backends, write_back, false);
        let server = TagServer::new(
            config,
            store,
            resolver,
            origin.clone(),
            Remotes::from_config(&remote_config).unwrap(),
            clients.clone(),
            replication,
            metrics.clone(),
        );

        Harness {
            server,
            replication_store,
            origin,
            clients,
            metrics,
            _dir: dir,
        }
    }

    async fn task_destinations(store: &MemoryTaskStore<ReplicationTask>) -> Vec<String> {
        let mut tasks = store.get_pending().await.unwrap();
        tasks.extend(store.get_failed().await.unwrap());
        let mut destinations: Vec<String> =
            tasks.into_iter().map(|task| task.destination).collect();
        destinations.sort();
        destinations
    }

    #[tokio::test]
    async fn replicate_fans_out_to_matched_remotes_only() {
        let harness = harness(Vec::new()).await;
        let digest = Digest::compute(b"prime/x");
        harness.server.put_tag("prime/x", digest, true).await.unwrap();

        // Two destinations bind prime/.*; idx-c receives nothing.
        assert_eq!(
            task_destinations(&harness.replication_store).await,
            vec!["idx-a:80".to_string(), "idx-b:80".to_string()]
        );
    }

    #[tokio::test]
    async fn replicate_on_unmatched_tag_is_a_noop() {
        let harness = harness(Vec::new()).await;
        let digest = Digest::compute(b"other/y");
        harness.server.put_tag("other/y", digest, true).await.unwrap();
        assert!(task_destinations(&harness.replication_store).await.is_empty());
    }

    #[tokio::test]
    async fn replicate_is_idempotent_per_destination() {
        let harness = harness(Vec::new()).await;
        let digest = Digest::compute(b"all/z");
        harness.server.put_tag("all/z", digest, false).await.unwrap();
        harness.server.replicate_tag("all/z").await.unwrap();
        harness.server.replicate_tag("all/z").await.unwrap();

        assert_eq!(
            task_destinations(&harness.replication_store).await,
            vec![
                "idx-a:80".to_string(),
                "idx-b:80".to_string(),
                "idx-c:80".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn missing_dependency_fails_the_put_before_storing() {
        let harness = harness(Vec::new()).await;
        let digest = Digest::compute(b"prime/broken");
        harness.origin.mark_missing(digest);

        let err = harness
            .server
            .put_tag("prime/broken", digest, false)
            .await
            .unwrap_err();
        assert!(matches!(err, TagIndexError::MissingDependency { .. }));
        assert!(matches!(
            harness.server.get_tag("prime/broken").await.unwrap_err(),
            TagIndexError::TagNotFound
        ));
    }

    #[tokio::test]
    async fn neighbors_receive_staggered_duplicate_puts() {
        let harness = harness(vec!["n1:80".to_string(), "n2:80".to_string()]).await;
        let digest = Digest::compute(b"other/tag");
        harness.server.put_tag("other/tag", digest, false).await.unwrap();

        let calls = harness.clients.duplicate_put_calls();
        assert_eq!(calls.len(), 2);
        let addrs: HashSet<String> = calls.iter().map(|(addr, _, _)| addr.clone()).collect();
        assert_eq!(addrs.len(), 2);
        let delays: HashSet<Duration> = calls.iter().map(|(_, _, delay)| *delay).collect();
        assert_eq!(
            delays,
            HashSet::from([Duration::from_millis(100), Duration::from_millis(200)])
        );
    }

    #[tokio::test]
    async fn all_neighbors_failing_increments_the_failure_counter() {
        let harness = harness(vec!["n1:80".to_string(), "n2:80".to_string()]).await;
        harness.clients.fail_all();
        let digest = Digest::compute(b"other/tag");

        // The put itself still succeeds; duplication is best-effort.
        harness.server.put_tag("other/tag", digest, false).await.unwrap();
        assert_eq!(harness.server.get_tag("other/tag").await.unwrap(), digest);

        let rendered = harness.metrics.gather().unwrap();
        assert!(rendered.contains("duplicate_put_failures_total 1"));
    }

    #[tokio::test]
    async fn replicate_duplicates_fan_out_to_neighbors() {
        let harness = harness(vec!["n1:80".to_string()]).await;
        let digest = Digest::compute(b"prime/x");
        harness.server.put_tag("prime/x", digest, true).await.unwrap();

        let calls = harness.clients.duplicate_replicate_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "n1:80");
        assert_eq!(calls[0].1, "prime/x");
        assert_eq!(calls[0].2, Duration::from_millis(100));
    }

    #[tokio::test]
    async fn received_duplicate_replicate_carries_the_delay() {
        let harness = harness(Vec::new()).await;
        let digest = Digest::compute(b"prime/dup");
        harness
            .server
            .receive_duplicate_replicate(
                "prime/dup",
                digest,
                vec![digest],
                Duration::from_secs(30),
            )
            .await
            .unwrap();

        // Held tasks land in the failed set until their delay elapses.
        let failed = harness.replication_store.get_failed().await.unwrap();
        assert_eq!(failed.len(), 2);
        assert!(failed.iter().all(|task| task.delay() == Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn purge_drops_tasks_for_unbound_destinations() {
        let pool = strata_data::connect_in_memory().await.unwrap();
        let store = SqliteReplicationStore::new(pool);
        let digest = Digest::compute(b"prime/x");
        store
            .add_failed(&ReplicationTask::new(
                "prime/x",
                digest,
                vec![digest],
                "idx-a:80",
                Duration::ZERO,
            ))
            .await
            .unwrap();
        store
            .add_failed(&ReplicationTask::new(
                "prime/x",
                digest,
                vec![digest],
                "idx-gone:80",
                Duration::ZERO,
            ))
            .await
            .unwrap();

        let mut remote_config = HashMap::new();
        remote_config.insert("idx-a:80".to_string(), vec!["^prime/.*".to_string()]);
        let remotes = Remotes::from_config(&remote_config).unwrap();

        let purged = purge_stale_tasks(&store, &remotes).await.unwrap();
        assert_eq!(purged, 1);
        let remaining = store.get_failed().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].destination, "idx-a:80");
    }
}
