//! Environment-driven pipeline configuration.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::worker::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}'")]
    Invalid { key: &'static str, value: String },
}

/// Tuning knobs for the campaign pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Maximum number of job pipelines running at once per worker pool.
    pub concurrency: usize,
    pub poll_interval: Duration,
    /// When false the process accepts campaigns but never leases jobs.
    pub worker_enabled: bool,
    pub retry: RetryPolicy,
    /// Hard cap on jobs per campaign at creation.
    pub max_batch_size: usize,
    /// Caller-side bound on each transcription / scoring call.
    pub call_timeout: Duration,
    pub reconcile_interval: Duration,
    /// Leases older than this are considered abandoned and returned to the queue.
    pub lease_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            poll_interval: Duration::from_millis(1000),
            worker_enabled: true,
            retry: RetryPolicy::default(),
            max_batch_size: 500,
            call_timeout: Duration::from_millis(120_000),
            reconcile_interval: Duration::from_millis(30_000),
            lease_timeout: Duration::from_millis(600_000),
        }
    }
}

impl PipelineConfig {
    /// Load from the process environment; unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = Self::default();
        let ms = |key: &'static str, default: Duration| -> Result<Duration, ConfigError> {
            Ok(parse(&lookup, key)?.map(Duration::from_millis).unwrap_or(default))
        };

        let concurrency: usize = parse(&lookup, "AUDIT_WORKER_CONCURRENCY")?.unwrap_or(d.concurrency);
        if concurrency == 0 {
            return Err(invalid("AUDIT_WORKER_CONCURRENCY", "0"));
        }

        let multiplier: f64 =
            parse(&lookup, "AUDIT_RETRY_BACKOFF_MULTIPLIER")?.unwrap_or(d.retry.multiplier);
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(invalid("AUDIT_RETRY_BACKOFF_MULTIPLIER", multiplier.to_string()));
        }

        let retry = RetryPolicy {
            max_retries: parse(&lookup, "AUDIT_MAX_RETRIES")?.unwrap_or(d.retry.max_retries),
            base_delay: ms("AUDIT_RETRY_DELAY_MS", d.retry.base_delay)?,
            multiplier,
            max_delay: ms("AUDIT_MAX_RETRY_DELAY_MS", d.retry.max_delay)?,
        };

        Ok(Self {
            concurrency,
            poll_interval: ms("AUDIT_POLL_INTERVAL_MS", d.poll_interval)?,
            worker_enabled: parse_flag(&lookup, "QUEUE_WORKER_ENABLED")?.unwrap_or(d.worker_enabled),
            retry,
            max_batch_size: parse(&lookup, "CAMPAIGN_MAX_JOBS")?.unwrap_or(d.max_batch_size),
            call_timeout: ms("AUDIT_CALL_TIMEOUT_MS", d.call_timeout)?,
            reconcile_interval: ms("AUDIT_RECONCILE_INTERVAL_MS", d.reconcile_interval)?,
            lease_timeout: ms("AUDIT_LEASE_TIMEOUT_MS", d.lease_timeout)?,
        })
    }
}

fn invalid(key: &'static str, value: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.into(),
    }
}

fn parse<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw.trim().parse().map(Some).map_err(|_| invalid(key, raw)),
    }
}

fn parse_flag<F>(lookup: &F, key: &'static str) -> Result<Option<bool>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(None),
        Some(v) if v.is_empty() => Ok(None),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(invalid(key, v)),
        },
    }
}
