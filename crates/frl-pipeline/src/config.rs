//! Pipeline configuration.
//!
//! Loaded from `FRL_*` environment variables with conservative defaults.
//! The lease default is ten minutes: a lease shorter than the slowest proof
//! makes a second worker start the same job while the first is still on it.

use std::time::Duration;

/// Runtime settings for the worker pool, queue and coordinator.
///
/// Custom `Debug` redacts `database_url`, which may embed credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Workers in the pool.
    pub worker_count: usize,
    /// Lease on a claimed job.
    pub lock_duration: Duration,
    /// Claims allowed for a prove job, counting reclaims after a crash.
    pub max_attempts: u32,
    /// Claims allowed for a merge job.
    pub merge_max_attempts: u32,
    /// How often an idle claimer rechecks for expired leases.
    pub claim_poll_interval: Duration,
    /// Postgres URL; `None` runs everything in memory.
    pub database_url: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            lock_duration: Duration::from_secs(600),
            max_attempts: 3,
            merge_max_attempts: 2,
            claim_poll_interval: Duration::from_millis(500),
            database_url: None,
        }
    }
}

impl std::fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("worker_count", &self.worker_count)
            .field("lock_duration", &self.lock_duration)
            .field("max_attempts", &self.max_attempts)
            .field("merge_max_attempts", &self.merge_max_attempts)
            .field("claim_poll_interval", &self.claim_poll_interval)
            .field(
                "database_url",
                &self.database_url.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables.
    ///
    /// Variables:
    /// - `FRL_WORKER_COUNT` (default: available parallelism)
    /// - `FRL_LOCK_DURATION_SECS` (default: 600)
    /// - `FRL_MAX_ATTEMPTS` (default: 3)
    /// - `FRL_MERGE_MAX_ATTEMPTS` (default: 2)
    /// - `FRL_CLAIM_POLL_MS` (default: 500)
    /// - `FRL_DATABASE_URL` (optional)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let worker_count: usize = parse(&lookup, "FRL_WORKER_COUNT")?.unwrap_or(defaults.worker_count);
        if worker_count == 0 {
            return Err(ConfigError::Invalid {
                var: "FRL_WORKER_COUNT".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        let lock_secs: u64 = parse(&lookup, "FRL_LOCK_DURATION_SECS")?
            .unwrap_or(defaults.lock_duration.as_secs());
        if lock_secs == 0 {
            return Err(ConfigError::Invalid {
                var: "FRL_LOCK_DURATION_SECS".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        let max_attempts: u32 = parse(&lookup, "FRL_MAX_ATTEMPTS")?.unwrap_or(defaults.max_attempts);
        let merge_max_attempts: u32 =
            parse(&lookup, "FRL_MERGE_MAX_ATTEMPTS")?.unwrap_or(defaults.merge_max_attempts);
        for (var, value) in [
            ("FRL_MAX_ATTEMPTS", max_attempts),
            ("FRL_MERGE_MAX_ATTEMPTS", merge_max_attempts),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    var: var.to_string(),
                    reason: "must be at least 1".to_string(),
                });
            }
        }
        let poll_ms: u64 = parse(&lookup, "FRL_CLAIM_POLL_MS")?
            .unwrap_or(defaults.claim_poll_interval.as_millis() as u64);

        Ok(Self {
            worker_count,
            lock_duration: Duration::from_secs(lock_secs),
            max_attempts,
            merge_max_attempts,
            claim_poll_interval: Duration::from_millis(poll_ms.max(1)),
            database_url: lookup("FRL_DATABASE_URL").filter(|s| !s.trim().is_empty()),
        })
    }
}

fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn parse<T, F>(lookup: &F, var: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| ConfigError::Invalid {
            var: var.to_string(),
            reason: format!("{raw:?}: {e}"),
        }),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable is set to an unusable value.
    #[error("invalid value for {var}: {reason}")]
    Invalid {
        /// Variable name.
        var: String,
        /// What was wrong.
        reason: String,
    },
}
