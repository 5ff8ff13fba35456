//! Balancer notifications.
//!
//! Two severities: errors (something failed) and notices (a connection
//! was turned away on purpose). Both go to a caller-supplied
//! [`EventHandler`]; the default one writes them to the log.

use crate::error::BalancerError;
use std::net::SocketAddr;
use tracing::{error, info, warn};

/// An observable balancer event.
#[derive(Debug)]
pub enum BalancerEvent {
    /// A fatal condition for one connection or for startup.
    Error(BalancerError),
    /// Advisory, e.g. an admission rejection.
    Notice(Notice),
}

/// Advisory notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// A middleware declined the connection.
    AdmissionRejected { peer: SocketAddr, reason: String },
}

impl std::fmt::Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Notice::AdmissionRejected { peer, reason } => {
                write!(f, "connection from {} rejected: {}", peer, reason)
            }
        }
    }
}

/// Receives balancer events.
pub trait EventHandler: Send + Sync {
    /// Handle one event. Called from connection tasks; must not block.
    fn on_event(&self, event: &BalancerEvent);
}

impl<F> EventHandler for F
where
    F: Fn(&BalancerEvent) + Send + Sync,
{
    fn on_event(&self, event: &BalancerEvent) {
        self(event)
    }
}

/// Default handler: report events through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEvents;

impl EventHandler for LogEvents {
    fn on_event(&self, event: &BalancerEvent) {
        match event {
            BalancerEvent::Error(err @ BalancerError::BufferOverflow { .. }) => {
                warn!(error = %err, "balancer error");
            }
            BalancerEvent::Error(err) => {
                error!(error = %err, "balancer error");
            }
            BalancerEvent::Notice(notice) => {
                info!(notice = %notice, "balancer notice");
            }
        }
    }
}
