use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// 16 KiB.
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// How often the pump reports progress.
///
/// Either way the final byte count is always reported.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum ProgressPolicy {
    #[default]
    EveryChunk,
    /// Report once at least `min_bytes` or `min_percent` points have passed
    /// since the previous report.
    Throttled { min_bytes: u64, min_percent: f64 },
}

#[derive(Debug, Clone)]
pub struct StreamerConfig {
    pub chunk_size: usize,
    pub progress: ProgressPolicy,
    pub connect_timeout: Duration,
    pub user_agent: String,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            progress: ProgressPolicy::EveryChunk,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            user_agent: concat!("streamer/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl StreamerConfig {
    /// Defaults overridden by `STREAMER_*` environment variables:
    ///
    /// - `STREAMER_CHUNK_SIZE` bytes per pump iteration
    /// - `STREAMER_PROGRESS_MIN_BYTES` / `STREAMER_PROGRESS_MIN_PERCENT` enable throttling
    /// - `STREAMER_CONNECT_TIMEOUT_SECS`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(size) = parse_var::<usize, _>(&lookup, "STREAMER_CHUNK_SIZE")? {
            config.chunk_size = size;
        }

        let min_bytes = parse_var::<u64, _>(&lookup, "STREAMER_PROGRESS_MIN_BYTES")?;
        let min_percent = parse_var::<f64, _>(&lookup, "STREAMER_PROGRESS_MIN_PERCENT")?;
        if min_bytes.is_some() || min_percent.is_some() {
            config.progress = ProgressPolicy::Throttled {
                min_bytes: min_bytes.unwrap_or(0),
                min_percent: min_percent.unwrap_or(0.0),
            };
        }

        if let Some(secs) = parse_var::<u64, _>(&lookup, "STREAMER_CONNECT_TIMEOUT_SECS")? {
            config.connect_timeout = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::InvalidSetting {
                name: "chunk_size",
                reason: "must be greater than zero".into(),
            });
        }
        if let ProgressPolicy::Throttled { min_percent, .. } = self.progress {
            if !(0.0..=100.0).contains(&min_percent) {
                return Err(ConfigError::InvalidSetting {
                    name: "progress.min_percent",
                    reason: format!("{} is outside 0..=100", min_percent),
                });
            }
        }
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::InvalidSetting {
                name,
                reason: format!("{:?}: {}", raw, e),
            }),
    }
}
