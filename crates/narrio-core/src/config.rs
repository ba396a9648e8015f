//! ============================================================================
//! Configuration - API endpoint, storage location and generation tunables
//! ============================================================================
//! Values come from the environment (a `.env` file is loaded by the binary).
//!
//! | Variable                         | Meaning                          |
//! |----------------------------------|----------------------------------|
//! | `NARRIO_API_URL`                 | Backend base URL                 |
//! | `NARRIO_API_KEY`                 | Value of the `X-Api-Key` header  |
//! | `NARRIO_DB_PATH`                 | redb file path                   |
//! | `NARRIO_COMPLETION_TIMEOUT_SECS` | Overall wait-for-completion cap  |
//! | `NARRIO_POLL_INTERVAL_SECS`      | First polling interval           |
//! ============================================================================

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default backend base URL
pub const DEFAULT_API_URL: &str = "https://api.synthia.pro";

/// Top-level configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub generation: GenerationConfig,
    /// Explicit database path; None falls back to ~/.narrio/narrio.redb
    pub db_path: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let mut generation = GenerationConfig::default();

        if let Some(secs) = env_u64("NARRIO_COMPLETION_TIMEOUT_SECS") {
            generation.completion_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("NARRIO_POLL_INTERVAL_SECS") {
            generation.poll.early = Duration::from_secs(secs);
        }

        Self {
            api: ApiConfig {
                base_url: std::env::var("NARRIO_API_URL")
                    .unwrap_or_else(|_| DEFAULT_API_URL.to_string()),
                api_key: std::env::var("NARRIO_API_KEY").ok(),
                ..ApiConfig::default()
            },
            generation,
            db_path: std::env::var("NARRIO_DB_PATH").ok(),
        }
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// HTTP client settings. Per-request timeouts are short and unrelated to the
/// overall completion timeout.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            api_key: None,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// Tunables for a generation instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Cadence of the optimistic progress ticker
    pub progress_tick: Duration,
    /// Fraction of the remaining distance covered per tick
    pub progress_gain: f64,
    /// Minimum step per tick
    pub progress_floor: f64,
    /// Value the ticker approaches but never passes by more than one step
    pub progress_ceiling: f64,
    /// Nominal end-to-end render time used for the ETA
    pub estimated_total_secs: u32,
    pub poll: PollSchedule,
    /// Overall cap on waiting for a terminal status
    pub completion_timeout: Duration,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            progress_tick: Duration::from_millis(400),
            progress_gain: 0.03,
            progress_floor: 0.004,
            progress_ceiling: 0.95,
            estimated_total_secs: 180,
            poll: PollSchedule::default(),
            completion_timeout: Duration::from_secs(600),
        }
    }
}

/// Status polling interval that widens as a job runs longer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollSchedule {
    pub early: Duration,
    pub mid: Duration,
    pub late: Duration,
    /// Elapsed time after which `mid` applies
    pub early_until: Duration,
    /// Elapsed time after which `late` applies
    pub mid_until: Duration,
}

impl PollSchedule {
    /// Same interval regardless of elapsed time
    pub fn fixed(interval: Duration) -> Self {
        Self {
            early: interval,
            mid: interval,
            late: interval,
            early_until: Duration::ZERO,
            mid_until: Duration::ZERO,
        }
    }

    pub fn interval_for(&self, elapsed: Duration) -> Duration {
        if elapsed < self.early_until {
            self.early
        } else if elapsed < self.mid_until {
            self.mid
        } else {
            self.late
        }
    }
}

impl Default for PollSchedule {
    fn default() -> Self {
        Self {
            early: Duration::from_secs(4),
            mid: Duration::from_secs(6),
            late: Duration::from_secs(10),
            early_until: Duration::from_secs(30),
            mid_until: Duration::from_secs(120),
        }
    }
}
