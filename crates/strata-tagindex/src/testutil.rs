//! In-memory fakes shared by this crate's test suites.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use strata_core::{BlobInfo, Digest};

use crate::backend::{Backend, BackendError};
use crate::client::{ClientError, ClientProvider, TagClient};
use crate::origin::{OriginCluster, OriginError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Hash-map backend with upload counting and one-shot failure injection.
pub(crate) struct MemoryBackend {
    entries: Mutex<HashMap<String, Vec<u8>>>,
    uploads: AtomicUsize,
    fail_next: AtomicBool,
}

impl MemoryBackend {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            uploads: AtomicUsize::new(0),
            fail_next: AtomicBool::new(false),
        }
    }

    pub(crate) fn put(&self, name: &str, content: Vec<u8>) {
        lock(&self.entries).insert(name.to_string(), content);
    }

    pub(crate) fn content(&self, name: &str) -> Option<Vec<u8>> {
        lock(&self.entries).get(name).cloned()
    }

    pub(crate) fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub(crate) fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    fn check_failure(&self) -> Result<(), BackendError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(BackendError::unavailable(anyhow::anyhow!(
                "injected backend outage"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn stat(&self, name: &str) -> Result<BlobInfo, BackendError> {
        self.check_failure()?;
        lock(&self.entries)
            .get(name)
            .map(|content| BlobInfo::sized(content.len() as u64))
            .ok_or(BackendError::NotFound)
    }

    async fn download(&self, name: &str) -> Result<Vec<u8>, BackendError> {
        self.check_failure()?;
        lock(&self.entries)
            .get(name)
            .cloned()
            .ok_or(BackendError::NotFound)
    }

    async fn upload(&self, name: &str, content: Vec<u8>) -> Result<(), BackendError> {
        self.check_failure()?;
        self.uploads.fetch_add(1, Ordering::SeqCst);
        lock(&self.entries).insert(name.to_string(), content);
        Ok(())
    }
}

/// Origin fake: blobs for download, everything else stats as present unless
/// explicitly marked missing.
pub(crate) struct FakeOrigin {
    blobs: Mutex<HashMap<Digest, Vec<u8>>>,
    missing: Mutex<HashSet<Digest>>,
    replicated: Mutex<Vec<(String, Digest, String)>>,
    fail_replication: AtomicBool,
}

impl FakeOrigin {
    pub(crate) fn new() -> Self {
        Self {
            blobs: Mutex::new(HashMap::new()),
            missing: Mutex::new(HashSet::new()),
            replicated: Mutex::new(Vec::new()),
            fail_replication: AtomicBool::new(false),
        }
    }

    pub(crate) fn put_blob(&self, digest: Digest, content: Vec<u8>) {
        lock(&self.blobs).insert(digest, content);
    }

    pub(crate) fn mark_missing(&self, digest: Digest) {
        lock(&self.missing).insert(digest);
    }

    pub(crate) fn replicated(&self) -> Vec<(String, Digest, String)> {
        lock(&self.replicated).clone()
    }

    pub(crate) fn fail_replication(&self) {
        self.fail_replication.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl OriginCluster for FakeOrigin {
    async fn stat(&self, _namespace: &str, digest: &Digest) -> Result<BlobInfo, OriginError> {
        if lock(&self.missing).contains(digest) {
            return Err(OriginError::BlobNotFound { digest: *digest });
        }
        Ok(BlobInfo::sized(1))
    }

    async fn download_blob(
        &self,
        _namespace: &str,
        digest: &Digest,
    ) -> Result<Vec<u8>, OriginError> {
        lock(&self.blobs)
            .get(digest)
            .cloned()
            .ok_or(OriginError::BlobNotFound { digest: *digest })
    }

    async fn replicate_to_remote(
        &self,
        namespace: &str,
        digest: &Digest,
        remote_dns: &str,
    ) -> Result<(), OriginError> {
        if self.fail_replication.load(Ordering::SeqCst) {
            return Err(OriginError::Unavailable {
                source: anyhow::anyhow!("injected replication outage"),
            });
        }
        lock(&self.replicated).push((
            namespace.to_string(),
            *digest,
            remote_dns.to_string(),
        ));
        Ok(())
    }
}

#[derive(Default)]
struct FakeClientState {
    origins: Mutex<HashMap<String, String>>,
    has: Mutex<HashSet<(String, String)>>,
    put_and_replicate: Mutex<Vec<(String, String, Digest)>>,
    duplicate_puts: Mutex<Vec<(String, String, Digest, Duration)>>,
    duplicate_replicates: Mutex<Vec<(String, String, Digest, Vec<Digest>, Duration)>>,
    fail_all: AtomicBool,
}

/// Recording provider whose clients never touch the network.
#[derive(Default)]
pub(crate) struct FakeClientProvider {
    state: Arc<FakeClientState>,
}

impl FakeClientProvider {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_origin(&self, addr: &str, origin: &str) {
        lock(&self.state.origins).insert(addr.to_string(), origin.to_string());
    }

    pub(crate) fn set_has(&self, addr: &str, tag: &str) {
        lock(&self.state.has).insert((addr.to_string(), tag.to_string()));
    }

    pub(crate) fn fail_all(&self) {
        self.state.fail_all.store(true, Ordering::SeqCst);
    }

    pub(crate) fn put_and_replicate_calls(&self, addr: &str) -> Vec<(String, Digest)> {
        lock(&self.state.put_and_replicate)
            .iter()
            .filter(|(called, _, _)| called == addr)
            .map(|(_, tag, digest)| (tag.clone(), *digest))
            .collect()
    }

    pub(crate) fn duplicate_put_calls(&self) -> Vec<(String, String, Duration)> {
        lock(&self.state.duplicate_puts)
            .iter()
            .map(|(addr, tag, _, delay)| (addr.clone(), tag.clone(), *delay))
            .collect()
    }

    pub(crate) fn duplicate_replicate_calls(&self) -> Vec<(String, String, Duration)> {
        lock(&self.state.duplicate_replicates)
            .iter()
            .map(|(addr, tag, _, _, delay)| (addr.clone(), tag.clone(), *delay))
            .collect()
    }
}

impl ClientProvider for FakeClientProvider {
    fn provide(&self, addr: &str) -> Arc<dyn TagClient> {
        Arc::new(FakeTagClient {
            addr: addr.to_string(),
            state: Arc::clone(&self.state),
        })
    }
}

struct FakeTagClient {
    addr: String,
    state: Arc<FakeClientState>,
}

impl FakeTagClient {
    fn check_failure(&self) -> Result<(), ClientError> {
        if self.state.fail_all.load(Ordering::SeqCst) {
            return Err(ClientError::Status {
                status: StatusCode::INTERNAL_SERVER_ERROR,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl TagClient for FakeTagClient {
    async fn has(&self, tag: &str) -> Result<bool, ClientError> {
        self.check_failure()?;
        Ok(lock(&self.state.has).contains(&(self.addr.clone(), tag.to_string())))
    }

    async fn origin(&self) -> Result<String, ClientError> {
        self.check_failure()?;
        lock(&self.state.origins)
            .get(&self.addr)
            .cloned()
            .ok_or(ClientError::Status {
                status: StatusCode::NOT_FOUND,
            })
    }

    async fn put_and_replicate(&self, tag: &str, digest: Digest) -> Result<(), ClientError> {
        self.check_failure()?;
        lock(&self.state.put_and_replicate).push((
            self.addr.clone(),
            tag.to_string(),
            digest,
        ));
        Ok(())
    }

    async fn duplicate_put(
        &self,
        tag: &str,
        digest: Digest,
        delay: Duration,
    ) -> Result<(), ClientError> {
        self.check_failure()?;
        lock(&self.state.duplicate_puts).push((
            self.addr.clone(),
            tag.to_string(),
            digest,
            delay,
        ));
        Ok(())
    }

    async fn duplicate_replicate(
        &self,
        tag: &str,
        digest: Digest,
        dependencies: &[Digest],
        delay: Duration,
    ) -> Result<(), ClientError> {
        self.check_failure()?;
        lock(&self.state.duplicate_replicates).push((
            self.addr.clone(),
            tag.to_string(),
            digest,
            dependencies.to_vec(),
            delay,
        ));
        Ok(())
    }
}
