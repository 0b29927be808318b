//! Prometheus-backed metrics registry.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Exposes the counters and gauges the coordination core increments; the
//!   scrape endpoint and metric naming conventions belong to the outer
//!   services.

use std::sync::Arc;

use anyhow::{Context, Result};
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Prometheus-backed metrics registry shared across subsystems.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    task_failures_total: IntCounterVec,
    tasks_executed_total: IntCounterVec,
    duplicate_put_failures_total: IntCounter,
    announce_failures_total: IntCounter,
    blacklist_additions_total: IntCounter,
    pieces_received_total: IntCounter,
    pieces_sent_total: IntCounter,
    active_conns: IntGauge,
}

impl Metrics {
    /// Construct a registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any collector cannot be registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let task_failures_total = IntCounterVec::new(
            Opts::new("task_failures_total", "Persisted task execution failures"),
            &["executor", "task"],
        )?;
        let tasks_executed_total = IntCounterVec::new(
            Opts::new("tasks_executed_total", "Persisted task executions by outcome"),
            &["executor", "outcome"],
        )?;
        let duplicate_put_failures_total = IntCounter::with_opts(Opts::new(
            "duplicate_put_failures_total",
            "Tag writes that reached no neighbor",
        ))?;
        let announce_failures_total = IntCounter::with_opts(Opts::new(
            "announce_failures_total",
            "Tracker announce round trips that failed",
        ))?;
        let blacklist_additions_total = IntCounter::with_opts(Opts::new(
            "blacklist_additions_total",
            "Peer connections blacklisted after failures",
        ))?;
        let pieces_received_total = IntCounter::with_opts(Opts::new(
            "pieces_received_total",
            "Verified pieces written to storage",
        ))?;
        let pieces_sent_total = IntCounter::with_opts(Opts::new(
            "pieces_sent_total",
            "Piece payloads sent to peers",
        ))?;
        let active_conns = IntGauge::with_opts(Opts::new(
            "active_conns",
            "Currently active peer connections",
        ))?;

        registry
            .register(Box::new(task_failures_total.clone()))
            .context("failed to register task failure counter")?;
        registry
            .register(Box::new(tasks_executed_total.clone()))
            .context("failed to register task execution counter")?;
        registry
            .register(Box::new(duplicate_put_failures_total.clone()))
            .context("failed to register duplicate put counter")?;
        registry
            .register(Box::new(announce_failures_total.clone()))
            .context("failed to register announce failure counter")?;
        registry
            .register(Box::new(blacklist_additions_total.clone()))
            .context("failed to register blacklist counter")?;
        registry
            .register(Box::new(pieces_received_total.clone()))
            .context("failed to register piece receive counter")?;
        registry
            .register(Box::new(pieces_sent_total.clone()))
            .context("failed to register piece send counter")?;
        registry
            .register(Box::new(active_conns.clone()))
            .context("failed to register active conn gauge")?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                task_failures_total,
                tasks_executed_total,
                duplicate_put_failures_total,
                announce_failures_total,
                blacklist_additions_total,
                pieces_received_total,
                pieces_sent_total,
                active_conns,
            }),
        })
    }

    /// Record a task execution failure, tagged with the executor name and the
    /// task's own tags.
    pub fn record_task_failure(&self, executor: &str, task_tags: &str) {
        self.inner
            .task_failures_total
            .with_label_values(&[executor, task_tags])
            .inc();
    }

    /// Record a task execution outcome.
    pub fn record_task_executed(&self, executor: &str, outcome: &str) {
        self.inner
            .tasks_executed_total
            .with_label_values(&[executor, outcome])
            .inc();
    }

    /// Record a tag write whose neighbor duplication reached nobody.
    pub fn record_duplicate_put_failure(&self) {
        self.inner.duplicate_put_failures_total.inc();
    }

    /// Record a failed tracker announce.
    pub fn record_announce_failure(&self) {
        self.inner.announce_failures_total.inc();
    }

    /// Record a blacklist addition.
    pub fn record_blacklist_addition(&self) {
        self.inner.blacklist_additions_total.inc();
    }

    /// Record a verified piece written to storage.
    pub fn record_piece_received(&self) {
        self.inner.pieces_received_total.inc();
    }

    /// Record a piece payload sent to a peer.
    pub fn record_piece_sent(&self) {
        self.inner.pieces_sent_total.inc();
    }

    /// Adjust the active connection gauge.
    pub fn set_active_conns(&self, count: i64) {
        self.inner.active_conns.set(count);
    }

    /// Render the registry in the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn gather(&self) -> Result<String> {
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .context("failed to encode metrics")?;
        String::from_utf8(buffer).context("metrics encoding produced invalid UTF-8")
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}
