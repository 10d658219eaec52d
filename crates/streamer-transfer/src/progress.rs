use std::time::{Duration, Instant};

use crate::config::ProgressPolicy;

/// Derives elapsed time, throughput and ETA for one transfer.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    started: Instant,
    total_bytes: u64,
}

/// Point-in-time progress figures.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub bytes: u64,
    pub total_bytes: u64,
    /// 0-100, or 0 when the total is unknown.
    pub percent: f64,
    pub elapsed: Duration,
    pub bytes_per_sec: f64,
    /// `None` until a rate can be measured or when the total is unknown.
    pub eta: Option<Duration>,
}

impl ProgressTracker {
    pub fn start(total_bytes: u64) -> Self {
        Self::with_start(Instant::now(), total_bytes)
    }

    pub fn with_start(started: Instant, total_bytes: u64) -> Self {
        Self { started, total_bytes }
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn snapshot(&self, bytes: u64) -> ProgressSnapshot {
        self.snapshot_at(bytes, Instant::now())
    }

    pub fn snapshot_at(&self, bytes: u64, now: Instant) -> ProgressSnapshot {
        let elapsed = now.saturating_duration_since(self.started);
        let secs = elapsed.as_secs_f64();
        let bytes_per_sec = if secs > 0.0 { bytes as f64 / secs } else { 0.0 };

        let percent = if self.total_bytes > 0 {
            (bytes as f64 * 100.0 / self.total_bytes as f64).min(100.0)
        } else {
            0.0
        };

        let eta = if self.total_bytes == 0 {
            None
        } else if bytes >= self.total_bytes {
            Some(Duration::ZERO)
        } else if bytes_per_sec > 0.0 {
            let remaining = (self.total_bytes - bytes) as f64;
            Some(Duration::from_secs_f64(remaining / bytes_per_sec))
        } else {
            None
        };

        ProgressSnapshot {
            bytes,
            total_bytes: self.total_bytes,
            percent,
            elapsed,
            bytes_per_sec,
            eta,
        }
    }
}

/// Decides which byte counts are worth reporting under a [`ProgressPolicy`].
#[derive(Debug)]
pub(crate) struct ProgressThrottle {
    policy: ProgressPolicy,
    last_bytes: u64,
}

impl ProgressThrottle {
    pub(crate) fn new(policy: ProgressPolicy) -> Self {
        Self { policy, last_bytes: 0 }
    }

    /// Last byte count that was reported.
    pub(crate) fn last_reported(&self) -> u64 {
        self.last_bytes
    }

    /// Returns true and records `bytes` when it should be reported.
    pub(crate) fn offer(&mut self, bytes: u64, total: u64) -> bool {
        if bytes <= self.last_bytes {
            return false;
        }
        let due = match self.policy {
            ProgressPolicy::EveryChunk => true,
            ProgressPolicy::Throttled { min_bytes, min_percent } => {
                let moved = bytes - self.last_bytes;
                let moved_percent = if total > 0 {
                    moved as f64 * 100.0 / total as f64
                } else {
                    0.0
                };
                let by_bytes = min_bytes > 0 && moved >= min_bytes;
                let by_percent = min_percent > 0.0 && moved_percent >= min_percent;
                // No thresholds at all degrades to every chunk.
                by_bytes || by_percent || (min_bytes == 0 && min_percent <= 0.0)
            }
        };
        if due {
            self.last_bytes = bytes;
        }
        due
    }

    /// Record a report made outside [`ProgressThrottle::offer`].
    pub(crate) fn force(&mut self, bytes: u64) {
        self.last_bytes = bytes;
    }
}
