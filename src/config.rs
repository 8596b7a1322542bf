//! Configuration types for bulk-dl

use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

use crate::error::{Error, Result};
use crate::types::Bucket;

/// Lowest accepted worker count for a bucket
pub const MIN_WORKERS: usize = 1;

/// Highest accepted worker count for a bucket
pub const MAX_WORKERS: usize = 20;

/// Retry configuration for transient failures
///
/// The delay before attempt `n + 1` is `initial_delay * backoff_multiplier^n`
/// (n starting at 0), capped at `max_delay`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt (default: 2 seconds)
    #[serde(default = "default_initial_delay", with = "duration_millis")]
    pub initial_delay: Duration,

    /// Maximum delay between attempts (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_millis")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: false,
        }
    }
}

impl RetryConfig {
    /// Retry policy with a different attempt ceiling
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Backoff before attempt `n + 1`, where `n` is the number of attempts already made minus one
    pub fn delay_for(&self, n: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(n.min(i32::MAX as u32) as i32);
        let nanos = self.initial_delay.as_nanos() as f64 * factor;
        if !nanos.is_finite() || nanos >= self.max_delay.as_nanos() as f64 {
            return self.max_delay;
        }
        Duration::from_nanos(nanos.round() as u64)
    }
}

/// Per-bucket worker pool settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BucketConfig {
    /// Maximum number of tasks of this bucket active at once
    pub concurrency: usize,

    /// Retry policy for tasks of this bucket
    #[serde(default)]
    pub retry: RetryConfig,
}

impl BucketConfig {
    /// Pool for network-bound direct downloads (5 workers, 5 attempts)
    pub fn direct_fetch() -> Self {
        Self {
            concurrency: 5,
            retry: RetryConfig::with_max_attempts(5),
        }
    }

    /// Pool sharing one browser/transcoder instance (1 worker, 3 attempts)
    pub fn exclusive_browser() -> Self {
        Self {
            concurrency: 1,
            retry: RetryConfig::with_max_attempts(3),
        }
    }
}

/// Main configuration for a run
///
/// Immutable for the lifetime of a run; the scheduler holds it behind an `Arc`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding one checkpoint file per scope (default: ".checkpoints")
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: PathBuf,

    /// Persist the checkpoint after every N terminal outcomes (default: 1)
    ///
    /// A final flush always happens when the run drains.
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: usize,

    /// Direct downloads and exports
    #[serde(default = "BucketConfig::direct_fetch")]
    pub direct_fetch: BucketConfig,

    /// Browser-driven media extraction
    #[serde(default = "BucketConfig::exclusive_browser")]
    pub browser_media: BucketConfig,

    /// Browser-driven page capture
    #[serde(default = "BucketConfig::exclusive_browser")]
    pub browser_capture: BucketConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            checkpoint_dir: default_checkpoint_dir(),
            checkpoint_interval: default_checkpoint_interval(),
            direct_fetch: BucketConfig::direct_fetch(),
            browser_media: BucketConfig::exclusive_browser(),
            browser_capture: BucketConfig::exclusive_browser(),
        }
    }
}

impl Config {
    /// Pool settings of a dispatchable bucket
    ///
    /// Returns `None` for [`Bucket::Unsupported`], which has no pool.
    pub fn bucket(&self, bucket: Bucket) -> Option<&BucketConfig> {
        match bucket {
            Bucket::DirectFetch => Some(&self.direct_fetch),
            Bucket::BrowserMedia => Some(&self.browser_media),
            Bucket::BrowserCapture => Some(&self.browser_capture),
            Bucket::Unsupported => None,
        }
    }

    /// Mutable pool settings of a dispatchable bucket
    pub fn bucket_mut(&mut self, bucket: Bucket) -> Option<&mut BucketConfig> {
        match bucket {
            Bucket::DirectFetch => Some(&mut self.direct_fetch),
            Bucket::BrowserMedia => Some(&mut self.browser_media),
            Bucket::BrowserCapture => Some(&mut self.browser_capture),
            Bucket::Unsupported => None,
        }
    }

    /// Check the configuration before a run
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the offending key when a bucket has no
    /// workers or too many, a retry policy allows zero attempts, or a backoff
    /// multiplier would shrink delays.
    pub fn validate(&self) -> Result<()> {
        if self.checkpoint_interval == 0 {
            return Err(Error::config(
                "checkpoint interval must be at least 1",
                "checkpoint_interval",
            ));
        }

        for bucket in Bucket::DISPATCHABLE {
            let Some(cfg) = self.bucket(bucket) else {
                continue;
            };
            if cfg.concurrency < MIN_WORKERS || cfg.concurrency > MAX_WORKERS {
                return Err(Error::config(
                    format!(
                        "concurrency must be between {MIN_WORKERS} and {MAX_WORKERS}, got {}",
                        cfg.concurrency
                    ),
                    format!("{bucket}.concurrency"),
                ));
            }
            if cfg.retry.max_attempts == 0 {
                return Err(Error::config(
                    "max attempts must be at least 1",
                    format!("{bucket}.retry.max_attempts"),
                ));
            }
            if !(cfg.retry.backoff_multiplier >= 1.0) {
                return Err(Error::config(
                    format!(
                        "backoff multiplier must be at least 1.0, got {}",
                        cfg.retry.backoff_multiplier
                    ),
                    format!("{bucket}.retry.backoff_multiplier"),
                ));
            }
        }
        Ok(())
    }
}

/// Clamp a requested worker count into `MIN_WORKERS..=MAX_WORKERS`, warning when adjusted
pub fn clamp_workers(requested: usize) -> usize {
    let clamped = requested.clamp(MIN_WORKERS, MAX_WORKERS);
    if clamped != requested {
        tracing::warn!(requested, clamped, "Worker count out of range, adjusting");
    }
    clamped
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from(".checkpoints")
}

fn default_checkpoint_interval() -> usize {
    1
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

// Durations are stored as integer milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis().min(u64::MAX as u128) as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
