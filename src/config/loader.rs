//! Configuration file loading.

use crate::config::{Config, validate_config};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("configuration validation failed: {0}")]
    ValidationError(String),
}

/// Load configuration from a YAML file.
///
/// Reads the file, parses the YAML and validates the result.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    parse_config(&contents)
}

/// Parse and validate configuration from a YAML string.
pub fn parse_config(contents: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_yaml::from_str(contents)?;
    validate_config(&config).map_err(ConfigError::ValidationError)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Target;
    use crate::config::BufferOverflowPolicy;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_minimal_config() {
        let yaml = r#"
balancer:
  source_port: 8000
  targets:
    - host: localhost
      port: 8001
    - host: localhost
      port: 8002
"#;

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.balancer.source_port, 8000);
        assert_eq!(
            config.balancer.targets,
            vec![Target::new("localhost", 8001), Target::new("localhost", 8002)]
        );
        assert!(config.admission.is_none());
        assert_eq!(config.global.log_level, "info");
    }

    #[test]
    fn test_load_full_config() {
        let yaml = r#"
global:
  log_level: debug
  log_format: pretty
  metrics:
    enabled: false
balancer:
  bind_address: "127.0.0.1"
  source_port: 8000
  stickiness: false
  target_deactivation_duration: 2m
  session_expiry: 45s
  session_expiry_interval: 250ms
  max_buffer_size: 1024
  buffer_overflow: drop
  downgrade_to_user: nobody
  shutdown_timeout: 5s
  targets:
    - host: 10.0.0.5
      port: 9000
admission:
  allow: ["10.0.0.0/8"]
  deny: ["10.0.0.13"]
"#;
        let config = parse_config(yaml).unwrap();
        let balancer = &config.balancer;
        assert!(!balancer.stickiness);
        assert_eq!(balancer.target_deactivation_duration, Duration::from_secs(120));
        assert_eq!(balancer.session_expiry_interval, Duration::from_millis(250));
        assert_eq!(balancer.max_buffer_size, 1024);
        assert_eq!(balancer.buffer_overflow, BufferOverflowPolicy::Drop);
        assert_eq!(balancer.downgrade_to_user.as_deref(), Some("nobody"));
        assert!(!config.global.metrics.enabled);

        let admission = config.admission.unwrap();
        assert_eq!(admission.allow, vec!["10.0.0.0/8"]);
        assert_eq!(admission.deny, vec!["10.0.0.13"]);
    }

    #[test]
    fn test_load_missing_file() {
        let result = load_config("/nonexistent/path/config.yaml");
        assert!(result.is_err());
        assert!(matches!(result.unwrap_err(), ConfigError::ReadError(_)));
    }

    #[test]
    fn test_load_invalid_yaml() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"not: valid: yaml: {{{}}}").unwrap();

        let result = load_config(file.path());
        assert!(matches!(result.unwrap_err(), ConfigError::ParseError(_)));
    }

    #[test]
    fn test_load_fails_validation() {
        let result = parse_config("balancer:\n  source_port: 8000\n");
        assert!(matches!(result.unwrap_err(), ConfigError::ValidationError(_)));
    }
}
