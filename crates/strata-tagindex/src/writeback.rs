//! The write-back executor.

use std::sync::Arc;

use async_trait::async_trait;
use strata_data::WriteBackTask;
use strata_retry::Executor;
use tracing::warn;

use crate::backend::{Backend, BackendError, BackendManager};
use crate::cache::TagCache;

/// Uploads locally-authored tags to their backend.
pub struct WriteBackExecutor {
    cache: TagCache,
    backends: Arc<BackendManager>,
}

impl WriteBackExecutor {
    /// Assemble the executor over the cache and backend routing.
    #[must_use]
    pub const fn new(cache: TagCache, backends: Arc<BackendManager>) -> Self {
        Self { cache, backends }
    }

    async fn already_uploaded(
        &self,
        backend: &Arc<dyn Backend>,
        task: &WriteBackTask,
    ) -> anyhow::Result<bool> {
        match backend.stat(&task.namespace).await {
            Ok(_) => Ok(true),
            Err(BackendError::NotFound) => Ok(false),
            Err(err @ BackendError::Unavailable { .. }) => Err(err.into()),
        }
    }
}

#[async_trait]
impl Executor<WriteBackTask> for WriteBackExecutor {
    /// A `stat` hit means some node already uploaded the entry; clearing the
    /// persist marker is all that is left. Orphan tasks (an unconfigured
    /// namespace, a cache file that vanished) succeed, because retrying
    /// them can never make progress.
    async fn exec(&self, task: WriteBackTask) -> anyhow::Result<()> {
        let Some(backend) = self.backends.get(&task.namespace) else {
            warn!(task = %task, "dropping write-back for unconfigured namespace");
            return Ok(());
        };

        if self.already_uploaded(&backend, &task).await? {
            self.cache.clear_persist(&task.name)?;
            return Ok(());
        }

        let Some(content) = self.cache.read_raw(&task.name)? else {
            warn!(task = %task, "cache entry missing, nothing to write back");
            return Ok(());
        };

        backend.upload(&task.namespace, content).await?;
        self.cache.clear_persist(&task.name)?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "write_back"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MemoryBackend;
    use std::time::Duration;
    use strata_core::Digest;
    use strata_test_support::fixtures::scratch_dir;

    struct Fixture {
        cache: TagCache,
        backend: Arc<MemoryBackend>,
        executor: WriteBackExecutor,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = scratch_dir();
        let cache = TagCache::new(dir.path()).unwrap();
        let backend = Arc::new(MemoryBackend::new());
        let backends = Arc::new(
            BackendManager::new()
                .bind("^docker/.*", backend.clone())
                .unwrap(),
        );
        let executor = WriteBackExecutor::new(cache.clone(), backends);
        Fixture {
            cache,
            backend,
            executor,
            _dir: dir,
        }
    }

    fn seeded_task(fixture: &Fixture, tag: &str) -> (WriteBackTask, Digest) {
        let digest = Digest::compute(tag.as_bytes());
        fixture.cache.write(tag, &digest).unwrap();
        (
            WriteBackTask::new(tag, TagCache::key_for(tag), Duration::ZERO),
            digest,
        )
    }

    #[tokio::test]
    async fn uploads_and_clears_the_persist_marker() {
        let fixture = fixture();
        let (task, digest) = seeded_task(&fixture, "docker/app:1.0");

        fixture.executor.exec(task.clone()).await.unwrap();

        let stored = fixture.backend.content("docker/app:1.0").unwrap();
        assert_eq!(String::from_utf8(stored).unwrap(), digest.to_string());
        assert!(!fixture.cache.has_persist(&task.name));
    }

    #[tokio::test]
    async fn stat_hit_skips_the_upload() {
        let fixture = fixture();
        let (task, _) = seeded_task(&fixture, "docker/app:1.0");
        fixture
            .backend
            .put("docker/app:1.0", b"already there".to_vec());

        fixture.executor.exec(task.clone()).await.unwrap();

        // Entry untouched, marker cleared, no upload call made.
        assert_eq!(
            fixture.backend.content("docker/app:1.0").unwrap(),
            b"already there".to_vec()
        );
        assert_eq!(fixture.backend.uploads(), 0);
        assert!(!fixture.cache.has_persist(&task.name));
    }

    #[tokio::test]
    async fn missing_cache_entry_is_a_success() {
        let fixture = fixture();
        let task = WriteBackTask::new(
            "docker/gone:1.0",
            TagCache::key_for("docker/gone:1.0"),
            Duration::ZERO,
        );
        fixture.executor.exec(task).await.unwrap();
        assert_eq!(fixture.backend.uploads(), 0);
    }

    #[tokio::test]
    async fn unconfigured_namespace_is_a_success() {
        let fixture = fixture();
        let (task, _) = seeded_task(&fixture, "other/app:1.0");
        fixture.executor.exec(task).await.unwrap();
        assert_eq!(fixture.backend.uploads(), 0);
    }

    #[tokio::test]
    async fn unavailable_backend_is_a_retryable_failure() {
        let fixture = fixture();
        let (task, _) = seeded_task(&fixture, "docker/app:1.0");
        fixture.backend.fail_next();

        assert!(fixture.executor.exec(task.clone()).await.is_err());
        assert!(fixture.cache.has_persist(&task.name));
    }
}
