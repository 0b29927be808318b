//! Default values for every configuration section.

use std::path::PathBuf;
use std::time::Duration;

/// Default incoming worker count.
pub const RETRY_INCOMING_WORKERS: usize = 4;

pub(crate) fn log_level() -> String {
    "info".to_string()
}

pub(crate) fn task_db_path() -> PathBuf {
    PathBuf::from("strata-tasks.db")
}

pub(crate) const fn retry_incoming_workers() -> usize {
    RETRY_INCOMING_WORKERS
}

pub(crate) const fn retry_retry_workers() -> usize {
    2
}

pub(crate) const fn retry_incoming_buffer() -> usize {
    256
}

pub(crate) const fn retry_retry_buffer() -> usize {
    256
}

pub(crate) const fn retry_max_task_throughput() -> Duration {
    Duration::from_millis(20)
}

pub(crate) const fn retry_interval() -> Duration {
    Duration::from_secs(60)
}

pub(crate) const fn retry_poll_interval() -> Duration {
    Duration::from_secs(5)
}

pub(crate) fn tag_cache_dir() -> PathBuf {
    PathBuf::from("tag-cache")
}

pub(crate) const fn duplicate_put_stagger() -> Duration {
    Duration::from_secs(3)
}

pub(crate) const fn duplicate_replicate_stagger() -> Duration {
    Duration::from_secs(3)
}

pub(crate) fn origin_dns() -> String {
    "origin.local".to_string()
}

pub(crate) fn tracker_addr() -> String {
    "http://localhost:7602".to_string()
}

pub(crate) fn datacenter() -> String {
    "dc1".to_string()
}

pub(crate) fn advertise_ip() -> String {
    "127.0.0.1".to_string()
}

pub(crate) const fn max_open_conns_per_torrent() -> usize {
    10
}

pub(crate) const fn announce_interval() -> Duration {
    Duration::from_secs(3)
}

pub(crate) const fn announce_timeout() -> Duration {
    Duration::from_secs(10)
}

pub(crate) const fn dial_timeout() -> Duration {
    Duration::from_secs(5)
}

pub(crate) const fn handshake_timeout() -> Duration {
    Duration::from_secs(5)
}

pub(crate) const fn conn_sender_buffer() -> usize {
    256
}

pub(crate) const fn conn_receiver_buffer() -> usize {
    256
}

pub(crate) const fn event_buffer() -> usize {
    1024
}

pub(crate) const fn preemption_interval() -> Duration {
    Duration::from_secs(30)
}

pub(crate) const fn idle_conn_ttl() -> Duration {
    Duration::from_secs(5 * 60)
}

pub(crate) const fn conn_ttl() -> Duration {
    Duration::from_secs(60 * 60)
}

pub(crate) const fn idle_seeder_ttl() -> Duration {
    Duration::from_secs(10 * 60)
}

pub(crate) const fn blacklist_initial() -> Duration {
    Duration::from_secs(1)
}

pub(crate) const fn blacklist_multiplier() -> u32 {
    2
}

pub(crate) const fn blacklist_max() -> Duration {
    Duration::from_secs(5 * 60)
}

pub(crate) const fn blacklist_expired_ttl() -> Duration {
    Duration::from_secs(60 * 60)
}

pub(crate) const fn blacklist_cleanup_interval() -> Duration {
    Duration::from_secs(10 * 60)
}
