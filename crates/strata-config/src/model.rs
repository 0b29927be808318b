//! Configuration sections for every subsystem.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::defaults;

/// Root configuration document.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct StrataConfig {
    /// Logging section.
    #[serde(default)]
    pub logging: LoggingSection,
    /// Task database section.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Persisted-retry engine section.
    #[serde(default)]
    pub retry: RetryEngineConfig,
    /// Tag index section.
    #[serde(default)]
    pub tag_index: TagIndexConfig,
    /// Torrent scheduler section.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingSection {
    /// Default log filter when `RUST_LOG` is absent.
    #[serde(default = "defaults::log_level")]
    pub level: String,
    /// Emit structured JSON instead of human-readable lines.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
            json: false,
        }
    }
}

/// Location of the persisted task database.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    /// SQLite database path. `:memory:` is accepted for tests.
    #[serde(default = "defaults::task_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: defaults::task_db_path(),
        }
    }
}

/// Persisted-retry engine knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryEngineConfig {
    /// Worker tasks draining the incoming channel.
    #[serde(default = "defaults::retry_incoming_workers")]
    pub incoming_workers: usize,
    /// Worker tasks draining the retry channel.
    #[serde(default = "defaults::retry_retry_workers")]
    pub retry_workers: usize,
    /// Capacity of the incoming channel.
    #[serde(default = "defaults::retry_incoming_buffer")]
    pub incoming_buffer: usize,
    /// Capacity of the retry channel.
    #[serde(default = "defaults::retry_retry_buffer")]
    pub retry_buffer: usize,
    /// Minimum interval between dispatches on one worker.
    #[serde(default = "defaults::retry_max_task_throughput", with = "humantime_serde")]
    pub max_task_throughput: Duration,
    /// Minimum time between successive retries of one task.
    #[serde(default = "defaults::retry_interval", with = "humantime_serde")]
    pub retry_interval: Duration,
    /// Interval between scans of the failed set.
    #[serde(default = "defaults::retry_poll_interval", with = "humantime_serde")]
    pub poll_retries_interval: Duration,
}

impl Default for RetryEngineConfig {
    fn default() -> Self {
        Self {
            incoming_workers: defaults::retry_incoming_workers(),
            retry_workers: defaults::retry_retry_workers(),
            incoming_buffer: defaults::retry_incoming_buffer(),
            retry_buffer: defaults::retry_retry_buffer(),
            max_task_throughput: defaults::retry_max_task_throughput(),
            retry_interval: defaults::retry_interval(),
            poll_retries_interval: defaults::retry_poll_interval(),
        }
    }
}

/// Dependency resolution strategy for a namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolverKind {
    /// Parse the image manifest at the digest and return its referenced
    /// config and layer digests.
    Docker,
    /// The tag depends only on its own digest.
    Default,
}

/// One `(namespace pattern, resolver)` pair.
///
/// Rules are applied first-match-wins, so the configuration order is
/// significant: put the most specific namespaces first.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResolverRule {
    /// Namespace pattern the rule applies to.
    pub namespace: String,
    /// Resolver to run for matching tags.
    pub kind: ResolverKind,
}

/// Tag index knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TagIndexConfig {
    /// Directory backing the on-disk tag cache.
    #[serde(default = "defaults::tag_cache_dir")]
    pub cache_dir: PathBuf,
    /// Mirror tag writes to the backend synchronously instead of through the
    /// retry engine.
    #[serde(default)]
    pub write_through: bool,
    /// Cumulative delay added per neighbor during put duplication.
    #[serde(default = "defaults::duplicate_put_stagger", with = "humantime_serde")]
    pub duplicate_put_stagger: Duration,
    /// Cumulative delay added per neighbor during replicate duplication.
    #[serde(
        default = "defaults::duplicate_replicate_stagger",
        with = "humantime_serde"
    )]
    pub duplicate_replicate_stagger: Duration,
    /// Remote index addresses keyed to the namespace patterns they replicate.
    #[serde(default)]
    pub remotes: HashMap<String, Vec<String>>,
    /// Ordered dependency-resolver rules; first match wins.
    #[serde(default)]
    pub dependency_resolvers: Vec<ResolverRule>,
    /// Addresses of neighboring tag index instances.
    #[serde(default)]
    pub neighbors: Vec<String>,
    /// DNS name of the local origin cluster, reported to remotes.
    #[serde(default = "defaults::origin_dns")]
    pub origin_dns: String,
}

impl Default for TagIndexConfig {
    fn default() -> Self {
        Self {
            cache_dir: defaults::tag_cache_dir(),
            write_through: false,
            duplicate_put_stagger: defaults::duplicate_put_stagger(),
            duplicate_replicate_stagger: defaults::duplicate_replicate_stagger(),
            remotes: HashMap::new(),
            dependency_resolvers: Vec::new(),
            neighbors: Vec::new(),
            origin_dns: defaults::origin_dns(),
        }
    }
}

/// Blacklist backoff knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BlacklistConfig {
    /// Backoff applied on the first failure; also the backoff floor.
    #[serde(default = "defaults::blacklist_initial", with = "humantime_serde")]
    pub initial_backoff: Duration,
    /// Exponential base applied per additional failure.
    #[serde(default = "defaults::blacklist_multiplier")]
    pub backoff_multiplier: u32,
    /// Upper bound on any single backoff.
    #[serde(default = "defaults::blacklist_max", with = "humantime_serde")]
    pub max_backoff: Duration,
    /// How long an expired entry lingers before garbage collection.
    #[serde(default = "defaults::blacklist_expired_ttl", with = "humantime_serde")]
    pub expired_entry_ttl: Duration,
    /// Interval between garbage collection sweeps.
    #[serde(
        default = "defaults::blacklist_cleanup_interval",
        with = "humantime_serde"
    )]
    pub cleanup_interval: Duration,
}

impl Default for BlacklistConfig {
    fn default() -> Self {
        Self {
            initial_backoff: defaults::blacklist_initial(),
            backoff_multiplier: defaults::blacklist_multiplier(),
            max_backoff: defaults::blacklist_max(),
            expired_entry_ttl: defaults::blacklist_expired_ttl(),
            cleanup_interval: defaults::blacklist_cleanup_interval(),
        }
    }
}

/// Torrent scheduler knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Tracker announce endpoint, e.g. `http://tracker:7602`.
    #[serde(default = "defaults::tracker_addr")]
    pub tracker_addr: String,
    /// Datacenter label reported in announces.
    #[serde(default = "defaults::datacenter")]
    pub datacenter: String,
    /// Externally reachable address peers should dial, e.g. `127.0.0.1`.
    #[serde(default = "defaults::advertise_ip")]
    pub advertise_ip: String,
    /// Cap on active plus pending connections per torrent.
    #[serde(default = "defaults::max_open_conns_per_torrent")]
    pub max_open_conns_per_torrent: usize,
    /// Interval between announce queue ticks.
    #[serde(default = "defaults::announce_interval", with = "humantime_serde")]
    pub announce_interval: Duration,
    /// Per-request timeout for tracker announces.
    #[serde(default = "defaults::announce_timeout", with = "humantime_serde")]
    pub announce_timeout: Duration,
    /// Timeout for dialing a peer.
    #[serde(default = "defaults::dial_timeout", with = "humantime_serde")]
    pub dial_timeout: Duration,
    /// Timeout for a full handshake exchange.
    #[serde(default = "defaults::handshake_timeout", with = "humantime_serde")]
    pub handshake_timeout: Duration,
    /// Capacity of each connection's outbound frame channel.
    #[serde(default = "defaults::conn_sender_buffer")]
    pub sender_buffer: usize,
    /// Capacity of each connection's inbound frame channel.
    #[serde(default = "defaults::conn_receiver_buffer")]
    pub receiver_buffer: usize,
    /// Capacity of the scheduler event channel.
    #[serde(default = "defaults::event_buffer")]
    pub event_buffer: usize,
    /// Interval between idle-resource sweeps.
    #[serde(default = "defaults::preemption_interval", with = "humantime_serde")]
    pub preemption_interval: Duration,
    /// Close a connection idle in both directions for this long.
    #[serde(default = "defaults::idle_conn_ttl", with = "humantime_serde")]
    pub idle_conn_ttl: Duration,
    /// Close any connection older than this, idle or not.
    #[serde(default = "defaults::conn_ttl", with = "humantime_serde")]
    pub conn_ttl: Duration,
    /// Remove a complete torrent after this long without connections.
    #[serde(default = "defaults::idle_seeder_ttl", with = "humantime_serde")]
    pub idle_seeder_ttl: Duration,
    /// Blacklist backoff section.
    #[serde(default)]
    pub blacklist: BlacklistConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tracker_addr: defaults::tracker_addr(),
            datacenter: defaults::datacenter(),
            advertise_ip: defaults::advertise_ip(),
            max_open_conns_per_torrent: defaults::max_open_conns_per_torrent(),
            announce_interval: defaults::announce_interval(),
            announce_timeout: defaults::announce_timeout(),
            dial_timeout: defaults::dial_timeout(),
            handshake_timeout: defaults::handshake_timeout(),
            sender_buffer: defaults::conn_sender_buffer(),
            receiver_buffer: defaults::conn_receiver_buffer(),
            event_buffer: defaults::event_buffer(),
            preemption_interval: defaults::preemption_interval(),
            idle_conn_ttl: defaults::idle_conn_ttl(),
            conn_ttl: defaults::conn_ttl(),
            idle_seeder_ttl: defaults::idle_seeder_ttl(),
            blacklist: BlacklistConfig::default(),
        }
    }
}
