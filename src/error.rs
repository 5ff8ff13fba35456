//! Balancer error taxonomy.

use crate::backend::Target;
use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Errors surfaced by the balancer.
///
/// Apart from [`BalancerError::Bind`] and [`BalancerError::AlreadyStarted`],
/// which are returned from [`crate::Balancer::start`], these are reported
/// through the [`crate::events::EventHandler`] and affect only the
/// connection they arose on.
#[derive(Debug, Error)]
pub enum BalancerError {
    #[error("there are no available targets for client {client}")]
    NoAvailableTargets { client: String },

    #[error("target connection to {target} failed: {source}")]
    TargetConnect { target: Target, source: io::Error },

    #[error("target {target} failed while relaying: {source}")]
    TargetIo { target: Target, source: io::Error },

    #[error("client {client} connection error: {source}")]
    ClientIo { client: String, source: io::Error },

    #[error("buffered data for client {client} exceeded max_buffer_size of {limit} bytes")]
    BufferOverflow { client: String, limit: usize },

    #[error(
        "could not downgrade to user \"{user}\": either this user does not exist or the \
         current process does not have the permission to switch to it ({reason})"
    )]
    PrivilegeDowngrade { user: String, reason: String },

    #[error("failed to bind {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },

    #[error("balancer is already started")]
    AlreadyStarted,
}

impl BalancerError {
    /// Abrupt client disconnects are routine and not worth reporting.
    pub fn is_benign(&self) -> bool {
        match self {
            BalancerError::ClientIo { source, .. } => is_benign_io(source),
            _ => false,
        }
    }
}

/// Reset / hang-up style socket errors.
pub fn is_benign_io(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_reset_is_benign() {
        let err = BalancerError::ClientIo {
            client: "10.0.0.1".to_string(),
            source: io::Error::from(io::ErrorKind::ConnectionReset),
        };
        assert!(err.is_benign());
    }

    #[test]
    fn test_target_reset_is_reported() {
        let err = BalancerError::TargetIo {
            target: Target::new("localhost", 8000),
            source: io::Error::from(io::ErrorKind::ConnectionReset),
        };
        assert!(!err.is_benign());
    }

    #[test]
    fn test_other_client_errors_are_reported() {
        let err = BalancerError::ClientIo {
            client: "10.0.0.1".to_string(),
            source: io::Error::from(io::ErrorKind::InvalidData),
        };
        assert!(!err.is_benign());
    }

    #[test]
    fn test_messages() {
        let err = BalancerError::NoAvailableTargets {
            client: "10.0.0.1".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "there are no available targets for client 10.0.0.1"
        );

        let err = BalancerError::BufferOverflow {
            client: "10.0.0.1".to_string(),
            limit: 8192,
        };
        assert!(err.to_string().contains("8192"));
    }
}
