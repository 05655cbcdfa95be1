//! Sync service configuration.
//!
//! Default operational parameters as constants, plus the YAML-backed
//! `SyncConfig` that overrides them.
use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Number of latency samples averaged by the request queue.
pub const DEFAULT_LATENCY_RESOLUTION: usize = 100;

/// Pending requests older than this are discarded on re-enqueue.
pub const DISCARD_REQUESTS_OLDER_THAN_MS: u64 = 10_000;

/// Interval between pending request re-enqueue ticks.
pub const PENDING_REQUEST_REENQUEUE_INTERVAL_MS: u64 = 5_000;

/// Milestones requested per warp sync checkpoint.
pub const WARP_SYNC_ADVANCEMENT_RANGE: u32 = 150;

/// Fraction of the checkpoint window that must be confirmed before advancing.
/// Zero advances as soon as the confirmed milestone enters the window.
pub const WARP_SYNC_ADVANCEMENT_THRESHOLD: f64 = 0.0;

/// Capacity of the broadcast queue.
pub const BROADCAST_QUEUE_SIZE: usize = 1000;

/// Minimum time between two heartbeats sent to the same peer (in seconds).
pub const HEARTBEAT_SENT_INTERVAL_SECS: u64 = 30;

/// Interval between heartbeat checks (in seconds).
pub const CHECK_HEARTBEATS_INTERVAL_SECS: u64 = 5;

/// A peer whose solid milestone is within this distance of the newest known
/// milestone counts as synced.
pub const SYNC_THRESHOLD: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RequestsConfig {
    /// Zero disables discarding.
    pub discard_older_than_ms: u64,
    pub pending_reenqueue_interval_ms: u64,
    pub latency_resolution: usize,
}

impl Default for RequestsConfig {
    fn default() -> Self {
        Self {
            discard_older_than_ms: DISCARD_REQUESTS_OLDER_THAN_MS,
            pending_reenqueue_interval_ms: PENDING_REQUEST_REENQUEUE_INTERVAL_MS,
            latency_resolution: DEFAULT_LATENCY_RESOLUTION,
        }
    }
}

impl RequestsConfig {
    pub fn discard_older_than(&self) -> Duration {
        Duration::from_millis(self.discard_older_than_ms)
    }

    pub fn pending_reenqueue_interval(&self) -> Duration {
        Duration::from_millis(self.pending_reenqueue_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WarpSyncConfig {
    pub enabled: bool,
    pub advancement_range: u32,
    pub advancement_threshold: f64,
}

impl Default for WarpSyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            advancement_range: WARP_SYNC_ADVANCEMENT_RANGE,
            advancement_threshold: WARP_SYNC_ADVANCEMENT_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BroadcastConfig {
    pub queue_size: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            queue_size: BROADCAST_QUEUE_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HeartbeatConfig {
    pub sent_interval_secs: u64,
    pub check_interval_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            sent_interval_secs: HEARTBEAT_SENT_INTERVAL_SECS,
            check_interval_secs: CHECK_HEARTBEATS_INTERVAL_SECS,
        }
    }
}

impl HeartbeatConfig {
    pub fn sent_interval(&self) -> Duration {
        Duration::from_secs(self.sent_interval_secs)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncConfig {
    pub requests: RequestsConfig,
    pub warp_sync: WarpSyncConfig,
    pub broadcast: BroadcastConfig,
    pub heartbeat: HeartbeatConfig,
}

impl SyncConfig {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, SyncError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, SyncError> {
        let config: SyncConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if self.warp_sync.advancement_range == 0 {
            return Err(SyncError::InvalidConfig(
                "warpSync.advancementRange must be greater than zero".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.warp_sync.advancement_threshold) {
            return Err(SyncError::InvalidConfig(format!(
                "warpSync.advancementThreshold must be within [0, 1], got {}",
                self.warp_sync.advancement_threshold
            )));
        }
        if self.broadcast.queue_size == 0 {
            return Err(SyncError::InvalidConfig(
                "broadcast.queueSize must be greater than zero".into(),
            ));
        }
        if self.requests.pending_reenqueue_interval_ms == 0 {
            return Err(SyncError::InvalidConfig(
                "requests.pendingReenqueueIntervalMs must be greater than zero".into(),
            ));
        }
        if self.requests.latency_resolution == 0 {
            return Err(SyncError::InvalidConfig(
                "requests.latencyResolution must be greater than zero".into(),
            ));
        }
        if self.heartbeat.check_interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "heartbeat.checkIntervalSecs must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
