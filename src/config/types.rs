//! Configuration data types.

use crate::backend::Target;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Contents of the configuration file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub global: GlobalConfig,

    pub balancer: BalancerConfig,

    /// Enables the built-in IP filter when present
    #[serde(default)]
    pub admission: Option<AdmissionConfig>,
}

/// Process-wide settings: logging and the metrics endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// trace, debug, info, warn or error
    pub log_level: String,

    /// json or pretty
    pub log_format: LogFormat,

    pub metrics: MetricsConfig,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// Prometheus endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,

    /// Listen address for the metrics server
    pub address: SocketAddr,

    /// Path serving the Prometheus text format
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            address: SocketAddr::from(([127, 0, 0, 1], 9090)),
            path: "/metrics".to_string(),
        }
    }
}

/// Balancer configuration.
///
/// Every field is optional in the file; omitted fields take the values of
/// [`BalancerConfig::default`].
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BalancerConfig {
    /// Interface to listen on
    pub bind_address: IpAddr,

    /// Port to listen on (0 picks an ephemeral port)
    pub source_port: u16,

    /// Ordered list of backends
    pub targets: Vec<Target>,

    /// Sticky hash selection when true, random selection when false
    pub stickiness: bool,

    /// Cooldown before a refusing target is tried again
    #[serde(with = "humantime_serde")]
    pub target_deactivation_duration: Duration,

    /// Idle time before a session with no connections is dropped
    #[serde(with = "humantime_serde")]
    pub session_expiry: Duration,

    /// How often expired sessions are swept
    #[serde(with = "humantime_serde")]
    pub session_expiry_interval: Duration,

    /// Cap on client bytes buffered while a target connects
    pub max_buffer_size: usize,

    /// What to do once the buffer cap is exceeded
    pub buffer_overflow: BufferOverflowPolicy,

    /// User to switch to after binding
    pub downgrade_to_user: Option<String>,

    /// How long shutdown waits for open connections
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            source_port: 0,
            targets: Vec::new(),
            stickiness: true,
            target_deactivation_duration: Duration::from_secs(60),
            session_expiry: Duration::from_secs(30),
            session_expiry_interval: Duration::from_secs(1),
            max_buffer_size: 8192,
            buffer_overflow: BufferOverflowPolicy::default(),
            downgrade_to_user: None,
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

/// Handling of client bytes beyond `max_buffer_size` before a target
/// has accepted.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BufferOverflowPolicy {
    /// Report an error and close the client connection.
    #[default]
    Close,
    /// Report an error for every chunk past the cap and drop it; bytes
    /// buffered before the cap are still forwarded.
    Drop,
}

/// IP allow/deny lists for the built-in admission filter.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AdmissionConfig {
    /// Addresses or IPv4 CIDRs to admit; empty admits everyone not denied
    #[serde(default)]
    pub allow: Vec<String>,

    /// Addresses or IPv4 CIDRs to reject
    #[serde(default)]
    pub deny: Vec<String>,
}

/// Durations written as humantime strings: "60s", "500ms", "2m".
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer, de};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*duration))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balancer_defaults() {
        let config = BalancerConfig::default();
        assert!(config.stickiness);
        assert_eq!(config.target_deactivation_duration, Duration::from_secs(60));
        assert_eq!(config.session_expiry, Duration::from_secs(30));
        assert_eq!(config.session_expiry_interval, Duration::from_secs(1));
        assert_eq!(config.max_buffer_size, 8192);
        assert_eq!(config.buffer_overflow, BufferOverflowPolicy::Close);
        assert!(config.downgrade_to_user.is_none());
    }

    #[test]
    fn test_partial_balancer_section() {
        let yaml = r#"
source_port: 8000
stickiness: false
session_expiry: 500ms
targets:
  - host: localhost
    port: 8001
"#;
        let config: BalancerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.source_port, 8000);
        assert!(!config.stickiness);
        assert_eq!(config.session_expiry, Duration::from_millis(500));
        assert_eq!(config.target_deactivation_duration, Duration::from_secs(60));
        assert_eq!(config.targets, vec![Target::new("localhost", 8001)]);
    }

    #[test]
    fn test_overflow_policy_serde() {
        let policy: BufferOverflowPolicy = serde_yaml::from_str("drop").unwrap();
        assert_eq!(policy, BufferOverflowPolicy::Drop);

        let policy: BufferOverflowPolicy = serde_yaml::from_str("close").unwrap();
        assert_eq!(policy, BufferOverflowPolicy::Close);

        assert!(serde_yaml::from_str::<BufferOverflowPolicy>("ignore").is_err());
    }

    #[test]
    fn test_duration_round_trip() {
        let config = BalancerConfig {
            target_deactivation_duration: Duration::from_millis(1500),
            ..BalancerConfig::default()
        };
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: BalancerConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.target_deactivation_duration, Duration::from_millis(1500));
    }
}
