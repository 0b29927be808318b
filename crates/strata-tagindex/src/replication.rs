//! The tag-replication executor.

use std::sync::Arc;

use async_trait::async_trait;
use strata_data::ReplicationTask;
use strata_retry::Executor;
use tracing::info;

use crate::client::ClientProvider;
use crate::origin::OriginCluster;

/// Pushes one tag (and its blob dependencies) to one remote index.
///
/// A task is complete only after the destination acknowledges both that the
/// digest is recorded and that every dependency reached its origin cluster.
/// Every node short-circuits through `has`, which is what keeps the n²
/// region mesh from doing the same work repeatedly.
pub struct ReplicationExecutor {
    origin: Arc<dyn OriginCluster>,
    clients: Arc<dyn ClientProvider>,
}

impl ReplicationExecutor {
    /// Assemble the executor over the local origin and the client provider.
    #[must_use]
    pub fn new(origin: Arc<dyn OriginCluster>, clients: Arc<dyn ClientProvider>) -> Self {
        Self { origin, clients }
    }
}

#[async_trait]
impl Executor<ReplicationTask> for ReplicationExecutor {
    async fn exec(&self, task: ReplicationTask) -> anyhow::Result<()> {
        let destination = self.clients.provide(&task.destination);

        if destination.has(&task.tag).await? {
            info!(task = %task, "destination already has tag");
            return Ok(());
        }

        let remote_origin = destination.origin().await?;
        for dependency in &task.dependencies {
            self.origin
                .replicate_to_remote(&task.tag, dependency, &remote_origin)
                .await?;
        }

        destination.put_and_replicate(&task.tag, task.digest).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "tag_replication"
    }
}
