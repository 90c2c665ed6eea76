//! Retry, worker, and logging KDL parsing.

use anyhow::Result;
use std::time::Duration;
use tracing::trace;

use certrelay_common::types::{LogFormat, RetryPolicy};

use crate::{default_log_level, default_max_concurrent, LoggingConfig, WorkerConfig};

use super::helpers::{get_float_entry, get_string_entry, get_unsigned_entry};

/// Parse retry configuration block
pub fn parse_retry_policy(node: &kdl::KdlNode) -> Result<RetryPolicy> {
    let defaults = RetryPolicy::default();

    let policy = RetryPolicy {
        max_retries: get_unsigned_entry(node, "max-retries")?.unwrap_or(defaults.max_retries),
        base_delay: get_unsigned_entry(node, "base-delay-secs")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.base_delay),
        max_delay: get_unsigned_entry(node, "max-delay-secs")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.max_delay),
        jitter: get_float_entry(node, "jitter").unwrap_or(defaults.jitter),
    };

    trace!(
        max_retries = policy.max_retries,
        base_delay_secs = policy.base_delay.as_secs(),
        max_delay_secs = policy.max_delay.as_secs(),
        jitter = policy.jitter,
        "Parsed retry policy"
    );

    Ok(policy)
}

/// Parse workers configuration block
pub fn parse_worker_config(node: &kdl::KdlNode) -> Result<WorkerConfig> {
    Ok(WorkerConfig {
        max_concurrent: get_unsigned_entry(node, "max-concurrent")?
            .unwrap_or_else(default_max_concurrent),
    })
}

/// Parse logging configuration block
pub fn parse_logging_config(node: &kdl::KdlNode) -> Result<LoggingConfig> {
    let format = match get_string_entry(node, "format") {
        Some(s) => LogFormat::parse(&s).ok_or_else(|| {
            anyhow::anyhow!("Invalid log format '{}'. Valid formats: pretty, json", s)
        })?,
        None => LogFormat::default(),
    };

    Ok(LoggingConfig {
        level: get_string_entry(node, "level").unwrap_or_else(default_log_level),
        format,
    })
}
