//! Backend target identity.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A backend endpoint connections may be relayed to.
///
/// Identity is the `(host, port)` pair. Targets never change once
/// configured; only their membership in the active pool does.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct Target {
    /// Hostname or IP literal.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl Target {
    /// Create a new target.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Whether this target has the given host and port.
    pub fn is(&self, host: &str, port: u16) -> bool {
        self.port == port && self.host == host
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            // Bare IPv6 literal
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Target::new("localhost", 8000).to_string(), "localhost:8000");
        assert_eq!(Target::new("::1", 8000).to_string(), "[::1]:8000");
    }

    #[test]
    fn test_identity() {
        let a = Target::new("localhost", 8000);
        assert!(a.is("localhost", 8000));
        assert!(!a.is("localhost", 8100));
        assert_eq!(a, Target::new("localhost", 8000));
    }

    #[test]
    fn test_deserialize() {
        let target: Target = serde_yaml::from_str("{host: example.com, port: 443}").unwrap();
        assert_eq!(target, Target::new("example.com", 443));
    }
}
