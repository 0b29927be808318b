//! Eager validation for loaded configuration.

use regex::Regex;

use crate::error::{ConfigError, ConfigResult};
use crate::model::StrataConfig;

impl StrataConfig {
    /// Validate every section.
    ///
    /// # Errors
    ///
    /// Returns the first violation encountered. Namespace patterns are
    /// compiled here so a bad regex fails at startup rather than on the
    /// first matching request.
    pub fn validate(&self) -> ConfigResult<()> {
        self.validate_retry()?;
        self.validate_tag_index()?;
        self.validate_scheduler()?;
        Ok(())
    }

    fn validate_retry(&self) -> ConfigResult<()> {
        let retry = &self.retry;
        if retry.incoming_workers == 0 {
            return Err(invalid("retry", "incoming_workers", "must be positive"));
        }
        if retry.retry_workers == 0 {
            return Err(invalid("retry", "retry_workers", "must be positive"));
        }
        if retry.incoming_buffer == 0 {
            return Err(invalid("retry", "incoming_buffer", "must be positive"));
        }
        if retry.retry_buffer == 0 {
            return Err(invalid("retry", "retry_buffer", "must be positive"));
        }
        if retry.poll_retries_interval.is_zero() {
            return Err(invalid("retry", "poll_retries_interval", "must be positive"));
        }
        Ok(())
    }

    fn validate_tag_index(&self) -> ConfigResult<()> {
        let index = &self.tag_index;
        for patterns in index.remotes.values() {
            for pattern in patterns {
                compile(pattern)?;
            }
        }
        for rule in &index.dependency_resolvers {
            compile(&rule.namespace)?;
        }
        if index.origin_dns.is_empty() {
            return Err(invalid("tag_index", "origin_dns", "must not be empty"));
        }
        Ok(())
    }

    fn validate_scheduler(&self) -> ConfigResult<()> {
        let scheduler = &self.scheduler;
        if scheduler.max_open_conns_per_torrent == 0 {
            return Err(invalid(
                "scheduler",
                "max_open_conns_per_torrent",
                "must be positive",
            ));
        }
        if scheduler.sender_buffer == 0 {
            return Err(invalid("scheduler", "sender_buffer", "must be positive"));
        }
        if scheduler.receiver_buffer == 0 {
            return Err(invalid("scheduler", "receiver_buffer", "must be positive"));
        }
        if scheduler.event_buffer == 0 {
            return Err(invalid("scheduler", "event_buffer", "must be positive"));
        }
        if scheduler.announce_interval.is_zero() {
            return Err(invalid("scheduler", "announce_interval", "must be positive"));
        }
        if scheduler.preemption_interval.is_zero() {
            return Err(invalid(
                "scheduler",
                "preemption_interval",
                "must be positive",
            ));
        }
        let blacklist = &self.scheduler.blacklist;
        if blacklist.backoff_multiplier < 2 {
            return Err(invalid(
                "scheduler",
                "blacklist.backoff_multiplier",
                "must be at least 2",
            ));
        }
        if blacklist.initial_backoff.is_zero() {
            return Err(invalid(
                "scheduler",
                "blacklist.initial_backoff",
                "must be positive",
            ));
        }
        if blacklist.max_backoff < blacklist.initial_backoff {
            return Err(invalid(
                "scheduler",
                "blacklist.max_backoff",
                "must be at least the initial backoff",
            ));
        }
        Ok(())
    }
}

const fn invalid(
    section: &'static str,
    field: &'static str,
    reason: &'static str,
) -> ConfigError {
    ConfigError::InvalidField {
        section,
        field,
        reason,
    }
}

fn compile(pattern: &str) -> ConfigResult<Regex> {
    Regex::new(pattern).map_err(|source| ConfigError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}
