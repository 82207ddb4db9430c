//! Typed configuration structs (spec §6 defaults), `serde`-deserializable
//! from YAML/JSON the way the teacher's top-level `Config` is.

use serde::{Deserialize, Serialize};

/// Connection pool defaults and limits (spec §6).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PoolConfig {
    pub min_connections: usize,
    pub max_connections: usize,
    #[serde(rename = "idle-timeout-ms")]
    pub idle_timeout_ms: u64,
    #[serde(rename = "max-lifetime-ms")]
    pub max_lifetime_ms: u64,
    #[serde(rename = "connection-timeout-ms")]
    pub connection_timeout_ms: u64,
    #[serde(rename = "health-check-interval-ms")]
    pub health_check_interval_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            min_connections: 0,
            max_connections: 100,
            idle_timeout_ms: 60_000,
            max_lifetime_ms: 600_000,
            connection_timeout_ms: 30_000,
            health_check_interval_ms: 10_000,
        }
    }
}

/// Circuit breaker defaults (spec §6).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
    #[serde(rename = "reset-timeout-ms")]
    pub reset_timeout_ms: u64,
    #[serde(rename = "window-size-ms")]
    pub window_size_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        CircuitBreakerConfig {
            failure_threshold: 5,
            success_threshold: 2,
            timeout_ms: 60_000,
            reset_timeout_ms: 10_000,
            window_size_ms: 10_000,
        }
    }
}

/// Resource tracker quota limits (spec §6).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ResourceLimits {
    pub connections: u64,
    pub memory_bytes: u64,
    pub bandwidth_bytes_per_sec: u64,
    pub file_descriptors: u64,
    pub buffers: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        ResourceLimits {
            connections: 10_000,
            memory_bytes: 1024 * 1024 * 1024,
            bandwidth_bytes_per_sec: 100 * 1024 * 1024,
            file_descriptors: 65_536,
            buffers: 10_000,
        }
    }
}

/// Backpressure strategy and thresholds (spec §4.7).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackpressureConfig {
    pub strategy: BackpressureStrategyKind,
    pub buffer_size: usize,
    pub pause_threshold: f64,
    pub resume_threshold: f64,
    pub throttle_rate_ms: u64,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        BackpressureConfig {
            strategy: BackpressureStrategyKind::Buffer,
            buffer_size: 1000,
            pause_threshold: 0.8,
            resume_threshold: 0.5,
            throttle_rate_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackpressureStrategyKind {
    Drop,
    Buffer,
    Throttle,
    Reject,
    Pause,
}

/// Exponential-backoff retry policy (spec §5).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: 3,
            initial_delay_ms: 100,
            multiplier: 2.0,
            max_delay_ms: 10_000,
            jitter: 0.1,
        }
    }
}

/// Flow-control window sizes (spec §4.6); not in the spec's defaults table
/// but required to construct a `FlowController` without magic numbers
/// scattered through call sites.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FlowControlConfig {
    pub send_window: usize,
    pub receive_window: usize,
    pub high_watermark: usize,
    pub low_watermark: usize,
}

impl Default for FlowControlConfig {
    fn default() -> Self {
        FlowControlConfig {
            send_window: 65536,
            receive_window: 65536,
            high_watermark: 49152,
            low_watermark: 16384,
        }
    }
}

/// Top-level network-layer configuration bundle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    pub pool: PoolConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub resources: ResourceLimits,
    pub backpressure: BackpressureConfig,
    pub retry: RetryConfig,
    pub flow_control: FlowControlConfig,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            pool: PoolConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            resources: ResourceLimits::default(),
            backpressure: BackpressureConfig::default(),
            retry: RetryConfig::default(),
            flow_control: FlowControlConfig::default(),
        }
    }
}

impl NetworkConfig {
    pub fn from_yaml(s: &str) -> crate::common::error::Result<Self> {
        Ok(serde_yaml::from_str(s)?)
    }

    pub fn from_json(s: &str) -> crate::common::error::Result<Self> {
        Ok(serde_json::from_str(s)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_defaults_match_spec() {
        let cfg = PoolConfig::default();
        assert_eq!(cfg.max_connections, 100);
        assert_eq!(cfg.idle_timeout_ms, 60_000);
        assert_eq!(cfg.max_lifetime_ms, 600_000);
        assert_eq!(cfg.connection_timeout_ms, 30_000);
        assert_eq!(cfg.health_check_interval_ms, 10_000);
    }

    #[test]
    fn test_circuit_breaker_defaults_match_spec() {
        let cfg = CircuitBreakerConfig::default();
        assert_eq!(cfg.failure_threshold, 5);
        assert_eq!(cfg.success_threshold, 2);
        assert_eq!(cfg.timeout_ms, 60_000);
        assert_eq!(cfg.window_size_ms, 10_000);
    }

    #[test]
    fn test_resource_limits_defaults_match_spec() {
        let cfg = ResourceLimits::default();
        assert_eq!(cfg.connections, 10_000);
        assert_eq!(cfg.memory_bytes, 1024 * 1024 * 1024);
        assert_eq!(cfg.bandwidth_bytes_per_sec, 100 * 1024 * 1024);
        assert_eq!(cfg.file_descriptors, 65_536);
    }

    #[test]
    fn test_yaml_roundtrip_overrides_defaults() {
        let yaml = "pool:\n  max_connections: 50\n";
        let cfg = NetworkConfig::from_yaml(yaml).unwrap();
        assert_eq!(cfg.pool.max_connections, 50);
        assert_eq!(cfg.pool.idle_timeout_ms, 60_000);
    }

    #[test]
    fn test_backpressure_default_thresholds() {
        let cfg = BackpressureConfig::default();
        assert_eq!(cfg.pause_threshold, 0.8);
        assert_eq!(cfg.resume_threshold, 0.5);
    }
}
