//! Session registry: client key to assigned target and open-connection count.

use crate::backend::{Target, TargetPool};
use crate::session::ExpiryManager;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, trace};

/// Per-client routing record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Target currently assigned, `None` if selection found nothing.
    pub target: Option<Target>,
    /// Connections from this client that are currently open.
    pub client_count: u32,
}

/// What happened to a session when one of its connections closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// Other connections are still open.
    StillOpen(u32),
    /// Last connection gone; the session idles until its expiry.
    Expiring,
    /// Last connection gone and the target is inactive; session dropped.
    Removed,
    /// No session existed for this client.
    Unknown,
}

/// Tracks sessions and their idle expiry.
///
/// A session is present while it has open connections or is waiting to
/// expire. Every method is a single step against the pool passed in; the
/// owner is responsible for serializing calls.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: HashMap<String, Session>,
    expiry: ExpiryManager<String>,
    session_expiry: Duration,
}

impl SessionRegistry {
    /// Create an empty registry whose idle sessions live for `session_expiry`.
    pub fn new(session_expiry: Duration) -> Self {
        Self {
            sessions: HashMap::new(),
            expiry: ExpiryManager::new(),
            session_expiry,
        }
    }

    /// Register a new connection from `client` and return its target.
    ///
    /// An existing session is reused and, when placement is not sticky,
    /// its target is re-rolled. Any pending expiry is cancelled.
    pub fn open(&mut self, client: &str, pool: &TargetPool) -> Option<Target> {
        match self.sessions.get_mut(client) {
            Some(session) => {
                session.client_count += 1;
                if !pool.selection().is_sticky() {
                    session.target = pool.choose(client);
                }
                self.expiry.unexpire(&client.to_string());
                trace!(client, count = session.client_count, "session reused");
                session.target.clone()
            }
            None => {
                let target = pool.choose(client);
                self.sessions.insert(
                    client.to_string(),
                    Session {
                        target: target.clone(),
                        client_count: 1,
                    },
                );
                debug!(client, upstream = ?target, "session created");
                target
            }
        }
    }

    /// Record that a connection from `client` closed.
    pub fn close(&mut self, client: &str, pool: &TargetPool) -> CloseOutcome {
        let Some(session) = self.sessions.get_mut(client) else {
            return CloseOutcome::Unknown;
        };

        session.client_count = session.client_count.saturating_sub(1);
        if session.client_count > 0 {
            return CloseOutcome::StillOpen(session.client_count);
        }

        let target_active = session
            .target
            .as_ref()
            .is_some_and(|target| pool.is_active(target));

        if target_active {
            self.expiry.expire(client.to_string(), self.session_expiry);
            trace!(client, "session idle, expiry scheduled");
            CloseOutcome::Expiring
        } else {
            self.sessions.remove(client);
            debug!(client, "session dropped, target inactive");
            CloseOutcome::Removed
        }
    }

    /// Pick the next target after `failed` refused a connection for `client`.
    ///
    /// If the session still points at `failed`, this caller is first to
    /// notice: choose afresh and write it back. Otherwise another
    /// connection already moved the session on, so adopt its choice. Either
    /// way, every in-flight connection for the client converges on the
    /// session's target.
    pub fn resolve_after_refusal(
        &mut self,
        client: &str,
        failed: &Target,
        pool: &TargetPool,
    ) -> Option<Target> {
        let Some(session) = self.sessions.get_mut(client) else {
            return pool.choose(client);
        };

        if session.target.as_ref() == Some(failed) {
            session.target = pool.choose(client);
            debug!(client, failed = %failed, upstream = ?session.target, "session reassigned");
        } else {
            trace!(client, upstream = ?session.target, "adopting concurrent reassignment");
        }
        session.target.clone()
    }

    /// Delete sessions whose expiry has elapsed. Returns how many went.
    pub fn sweep(&mut self) -> usize {
        let mut removed = 0;
        for client in self.expiry.extract_expired() {
            let idle = self
                .sessions
                .get(&client)
                .is_some_and(|session| session.client_count == 0);
            if idle {
                self.sessions.remove(&client);
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(removed, remaining = self.sessions.len(), "expired sessions swept");
        }
        removed
    }

    /// Look up the session for `client`.
    pub fn get(&self, client: &str) -> Option<&Session> {
        self.sessions.get(client)
    }

    /// Whether `client`'s session is waiting to expire.
    pub fn is_expiring(&self, client: &str) -> bool {
        self.expiry.is_pending(&client.to_string())
    }

    /// Number of sessions, open or idle.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the registry holds no sessions.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
