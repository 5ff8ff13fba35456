//! Connection admission chain.
//!
//! Middleware runs in registration order before a connection is routed.
//! The first rejection wins and the remaining checks are skipped.

use crate::util::ConnectionId;
use arc_swap::ArcSwap;
use futures::future::{BoxFuture, FutureExt};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;

/// What a middleware sees of an inbound connection.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Connection identifier for log correlation.
    pub id: ConnectionId,
    /// Remote address of the client.
    pub peer: SocketAddr,
    /// Local address the connection was accepted on.
    pub local: SocketAddr,
}

impl ConnectionInfo {
    /// Session key for this connection: the client's IP address.
    pub fn client_key(&self) -> String {
        self.peer.ip().to_canonical().to_string()
    }
}

/// Outcome of a middleware check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Let the connection continue down the chain.
    Proceed,
    /// Turn the connection away with a reason.
    Reject(String),
}

impl Admission {
    /// Convenience constructor for a rejection.
    pub fn reject(reason: impl Into<String>) -> Self {
        Admission::Reject(reason.into())
    }
}

/// A check run against each inbound connection.
pub trait Middleware: Send + Sync {
    /// Decide whether `conn` may proceed.
    fn check(&self, conn: &ConnectionInfo) -> BoxFuture<'static, Admission>;
}

/// Middleware backed by a closure; see [`from_fn`].
pub struct FnMiddleware<F> {
    f: F,
}

/// Build middleware from an async closure.
///
/// ```
/// use sessionlb::frontend::{from_fn, Admission, ConnectionInfo};
///
/// let loopback_only = from_fn(|conn: &ConnectionInfo| {
///     let loopback = conn.peer.ip().is_loopback();
///     async move {
///         if loopback { Admission::Proceed } else { Admission::reject("not loopback") }
///     }
/// });
/// # let _ = loopback_only;
/// ```
pub fn from_fn<F, Fut>(f: F) -> FnMiddleware<F>
where
    F: Fn(&ConnectionInfo) -> Fut + Send + Sync,
    Fut: Future<Output = Admission> + Send + 'static,
{
    FnMiddleware { f }
}

impl<F, Fut> Middleware for FnMiddleware<F>
where
    F: Fn(&ConnectionInfo) -> Fut + Send + Sync,
    Fut: Future<Output = Admission> + Send + 'static,
{
    fn check(&self, conn: &ConnectionInfo) -> BoxFuture<'static, Admission> {
        (self.f)(conn).boxed()
    }
}

/// Ordered list of middleware.
///
/// Registration swaps in a new list, so connections already running the
/// chain finish against the list they started with.
pub struct AdmissionChain {
    middleware: ArcSwap<Vec<Arc<dyn Middleware>>>,
}

impl AdmissionChain {
    /// Create an empty chain; every connection proceeds.
    pub fn new() -> Self {
        Self {
            middleware: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Append a check to the end of the chain.
    pub fn push(&self, middleware: Arc<dyn Middleware>) {
        self.middleware.rcu(|current| {
            let mut next = Vec::with_capacity(current.len() + 1);
            next.extend(current.iter().cloned());
            next.push(Arc::clone(&middleware));
            next
        });
    }

    /// Number of registered checks.
    pub fn len(&self) -> usize {
        self.middleware.load().len()
    }

    /// Whether no checks are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run every check in order, stopping at the first rejection.
    pub async fn run(&self, conn: &ConnectionInfo) -> Admission {
        let chain = self.middleware.load_full();
        for (position, middleware) in chain.iter().enumerate() {
            if let Admission::Reject(reason) = middleware.check(conn).await {
                debug!(connection = %conn.id, position, reason = %reason, "admission rejected");
                return Admission::Reject(reason);
            }
        }
        Admission::Proceed
    }
}

impl Default for AdmissionChain {
    fn default() -> Self {
        Self::new()
    }
}
