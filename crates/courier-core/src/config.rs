//! Pipeline configuration.
//!
//! Deserializes from camelCase JSON so host-supplied config matches the wire
//! casing of the rest of the system. Every field has a default; a
//! `TelemetryConfig::default()` is a working shape pointed at relative
//! endpoint paths.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// Feature gate guarding the metrics delivery surface. When the gate is off,
/// metrics-routed events are treated as delivered without a send.
pub const GATE_METRICS_CHANNEL: &str = "metrics_channel";

const DEFAULT_BATCH_PATH: &str = "/telemetry/batch";
const DEFAULT_EVENTS_PATH: &str = "/telemetry/events";
const DEFAULT_METRICS_PATH: &str = "/telemetry/metrics";

const DEFAULT_BASE_WAIT_MS: u64 = 10_000;
const DEFAULT_RESTORE_WAIT_MS: u64 = 1_000;
const DEFAULT_VITAL_WAIT_MS: u64 = 1_000;
const DEFAULT_EXPIRY_MS: i64 = 86_400_000;
const DEFAULT_SESSION_GAP_MS: i64 = 180_000;
const DEFAULT_DEVICE_INFO_INTERVAL_MS: i64 = 43_200_000;
const DEFAULT_REPLAY_CAPACITY: usize = 16;
const DEFAULT_BEACON_QUEUE_DEPTH: usize = 32;

// ─────────────────────────────────────────────────────────────────────────────
// Endpoints
// ─────────────────────────────────────────────────────────────────────────────

/// Endpoint layout for the three delivery surfaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EndpointConfig {
    /// Base URL the surface paths are joined onto. Empty means the host
    /// passes absolute paths straight to its transport.
    pub base_url: String,
    /// Wrapped-batch surface.
    pub batch_path: String,
    /// Session-packaged analytics surface.
    pub events_path: String,
    /// Session-packaged metrics surface.
    pub metrics_path: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            batch_path: DEFAULT_BATCH_PATH.into(),
            events_path: DEFAULT_EVENTS_PATH.into(),
            metrics_path: DEFAULT_METRICS_PATH.into(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Telemetry config
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration for the whole pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryConfig {
    /// Application identifier stamped on batches and envelopes.
    #[serde(default)]
    pub app_id: String,
    /// Application version stamped on envelopes.
    #[serde(default)]
    pub app_version: String,
    /// Delivery surface endpoints.
    #[serde(default)]
    pub endpoints: EndpointConfig,
    /// Default flush delay when a post names none.
    #[serde(default = "default_base_wait_ms")]
    pub base_wait_ms: u64,
    /// Flush delay armed after a restore pulls persisted events in.
    #[serde(default = "default_restore_wait_ms")]
    pub restore_wait_ms: u64,
    /// Short delay preset for latency-sensitive posts.
    #[serde(default = "default_vital_wait_ms")]
    pub vital_wait_ms: u64,
    /// Per-request send timeout. `None` lets the transport default apply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send_timeout_ms: Option<u64>,
    /// Durability window. Events older than this are dropped at sweep and
    /// restore time.
    #[serde(default = "default_expiry_ms")]
    pub expiry_ms: i64,
    /// Idle gap after which the session rotates.
    #[serde(default = "default_session_gap_ms")]
    pub session_gap_ms: i64,
    /// Minimum interval between device-info enrichment events.
    #[serde(default = "default_device_info_interval_ms")]
    pub device_info_interval_ms: i64,
    /// Held-emission capacity of the action bus.
    #[serde(default = "default_replay_capacity")]
    pub replay_capacity: usize,
    /// Bounded depth of the transport beacon queue.
    #[serde(default = "default_beacon_queue_depth")]
    pub beacon_queue_depth: usize,
    /// Kill switch. A disabled client accepts posts and drops them.
    #[serde(default)]
    pub disabled: bool,
    /// Routes dropped at post time.
    #[serde(default)]
    pub blocked_routes: HashSet<String>,
    /// Feature gates, absent means off.
    #[serde(default)]
    pub gates: HashMap<String, bool>,
}

fn default_base_wait_ms() -> u64 {
    DEFAULT_BASE_WAIT_MS
}

fn default_restore_wait_ms() -> u64 {
    DEFAULT_RESTORE_WAIT_MS
}

fn default_vital_wait_ms() -> u64 {
    DEFAULT_VITAL_WAIT_MS
}

fn default_expiry_ms() -> i64 {
    DEFAULT_EXPIRY_MS
}

fn default_session_gap_ms() -> i64 {
    DEFAULT_SESSION_GAP_MS
}

fn default_device_info_interval_ms() -> i64 {
    DEFAULT_DEVICE_INFO_INTERVAL_MS
}

fn default_replay_capacity() -> usize {
    DEFAULT_REPLAY_CAPACITY
}

fn default_beacon_queue_depth() -> usize {
    DEFAULT_BEACON_QUEUE_DEPTH
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            app_id: String::new(),
            app_version: String::new(),
            endpoints: EndpointConfig::default(),
            base_wait_ms: DEFAULT_BASE_WAIT_MS,
            restore_wait_ms: DEFAULT_RESTORE_WAIT_MS,
            vital_wait_ms: DEFAULT_VITAL_WAIT_MS,
            send_timeout_ms: None,
            expiry_ms: DEFAULT_EXPIRY_MS,
            session_gap_ms: DEFAULT_SESSION_GAP_MS,
            device_info_interval_ms: DEFAULT_DEVICE_INFO_INTERVAL_MS,
            replay_capacity: DEFAULT_REPLAY_CAPACITY,
            beacon_queue_depth: DEFAULT_BEACON_QUEUE_DEPTH,
            disabled: false,
            blocked_routes: HashSet::new(),
            gates: HashMap::new(),
        }
    }
}

impl TelemetryConfig {
    /// Whether a feature gate is on. Unknown gates are off.
    #[must_use]
    pub fn gate_enabled(&self, gate: &str) -> bool {
        self.gates.get(gate).copied().unwrap_or(false)
    }

    /// Whether posts on this route are dropped at the door.
    #[must_use]
    pub fn route_blocked(&self, route: &str) -> bool {
        self.blocked_routes.contains(route)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
