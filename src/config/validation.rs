//! Configuration validation.

use crate::config::Config;
use crate::frontend::IpFilter;
use std::collections::HashSet;

/// Validate the configuration.
///
/// Checks for:
/// - At least one target, none duplicated
/// - Non-empty target hosts and non-zero target ports
/// - A non-zero session sweep interval and buffer size
/// - A known log level
/// - Admission entries that parse as IP addresses or IPv4 CIDRs
///
/// # Returns
///
/// `Ok(())` if valid, or every problem found joined with "; ".
pub fn validate_config(config: &Config) -> Result<(), String> {
    let mut errors = Vec::new();
    let balancer = &config.balancer;

    if balancer.targets.is_empty() {
        errors.push("at least one target must be defined".to_string());
    }

    let mut seen = HashSet::new();
    for target in &balancer.targets {
        if target.host.trim().is_empty() {
            errors.push(format!("target {} has an empty host", target));
        }
        if target.port == 0 {
            errors.push(format!("target {} has port 0", target));
        }
        if !seen.insert(target) {
            errors.push(format!("duplicate target: {}", target));
        }
    }

    if balancer.session_expiry_interval.is_zero() {
        errors.push("session_expiry_interval must be greater than zero".to_string());
    }

    if balancer.max_buffer_size == 0 {
        errors.push("max_buffer_size must be greater than zero".to_string());
    }

    if let Some(user) = &balancer.downgrade_to_user {
        if user.trim().is_empty() {
            errors.push("downgrade_to_user cannot be empty".to_string());
        }
    }

    // Validate log level
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.global.log_level.to_lowercase().as_str()) {
        errors.push(format!(
            "invalid log level '{}', must be one of: {}",
            config.global.log_level,
            valid_levels.join(", ")
        ));
    }

    if let Some(admission) = &config.admission {
        if let Err(e) = IpFilter::from_config(admission) {
            errors.push(format!("admission: {}", e));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join("; "))
    }
}
