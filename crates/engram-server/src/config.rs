//! Server Configuration
//!
//! CLI flags with environment fallbacks for every recognized option.

use std::path::PathBuf;

use clap::Parser;
use engram_core::DEFAULT_QUOTA_BYTES;

/// Bounds for request-level timeout overrides, in milliseconds.
pub const MIN_TIMEOUT_MS: u64 = 1_000;
pub const MAX_TIMEOUT_MS: u64 = 60_000;

/// Engram server options.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "engram-server",
    version,
    about = "Cognitive memory and reasoning server"
)]
pub struct ServerConfig {
    /// Bind address
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Bind port
    #[arg(long, default_value_t = 3900)]
    pub port: u16,

    /// Data directory for the SQLite store (default: ./engram-data)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Per-user storage quota in bytes
    #[arg(long, env = "QUOTA_BYTES", default_value_t = DEFAULT_QUOTA_BYTES)]
    pub quota_bytes: u64,

    /// Default reasoning/LLM deadline in milliseconds
    #[arg(long, env = "LLM_TIMEOUT_MS", default_value_t = 60_000)]
    pub llm_timeout_ms: u64,

    /// Cron expression for scheduled consolidation
    #[arg(long, env = "SCHEDULER_CRON", default_value = "0 3 * * *")]
    pub scheduler_cron: String,

    /// Enable the consolidation scheduler
    #[arg(long, env = "SCHEDULER_ENABLED", action = clap::ArgAction::Set, default_value_t = true)]
    pub scheduler_enabled: bool,

    /// Scheduled runs are suppressed above this system load, in [0,1]
    #[arg(long, env = "SCHEDULER_MAX_LOAD", default_value_t = 0.8)]
    pub scheduler_max_load: f64,

    /// Memories loaded per consolidation run
    #[arg(long, env = "CONSOLIDATION_BATCH_SIZE", default_value_t = 100)]
    pub consolidation_batch_size: usize,

    /// Age threshold in days for archive-old operations
    #[arg(long, env = "ARCHIVE_AGE_DAYS", default_value_t = 90)]
    pub archive_age_days: u32,

    /// Seconds before idle sessions are swept
    #[arg(long, env = "SESSION_TTL_SECS", default_value_t = 3_600)]
    pub session_ttl_secs: u64,
}

impl ServerConfig {
    /// Clamp a request-level timeout override into the allowed window,
    /// falling back to the configured default.
    pub fn effective_timeout_ms(&self, requested: Option<u64>) -> u64 {
        requested
            .unwrap_or(self.llm_timeout_ms)
            .clamp(MIN_TIMEOUT_MS, MAX_TIMEOUT_MS)
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            data_dir: None,
            quota_bytes: DEFAULT_QUOTA_BYTES,
            llm_timeout_ms: 5_000,
            scheduler_cron: "0 3 * * *".to_string(),
            scheduler_enabled: false,
            scheduler_max_load: 0.8,
            consolidation_batch_size: 100,
            archive_age_days: 90,
            session_ttl_secs: 3_600,
        }
    }
}
