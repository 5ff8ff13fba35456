//! The balancer aggregate: target pool, sessions, admission and lifecycle.

use crate::backend::{ReactivationTicket, Selection, Target, TargetPool};
use crate::config::BalancerConfig;
use crate::error::BalancerError;
use crate::events::{BalancerEvent, EventHandler, LogEvents};
use crate::frontend::{AdmissionChain, FrontendListener, Middleware};
use crate::metrics::MetricsCollector;
use crate::session::{CloseOutcome, Session, SessionRegistry};
use crate::util::{ShutdownSignal, downgrade_to_user};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Notify, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Hook for code that extends the balancer at startup.
///
/// Extensions typically register admission middleware.
pub trait BalancerExtension {
    /// Called once with the balancer before it starts accepting.
    fn attach(&self, balancer: &Balancer);
}

impl<F> BalancerExtension for F
where
    F: Fn(&Balancer),
{
    fn attach(&self, balancer: &Balancer) {
        self(balancer)
    }
}

/// A session-aware TCP load balancer.
///
/// Cheap to clone; clones share the same pool, sessions and listener.
#[derive(Clone)]
pub struct Balancer {
    shared: Arc<Shared>,
}

/// Target pool and sessions, always mutated together under one lock.
pub(crate) struct RoutingState {
    pub(crate) pool: TargetPool,
    pub(crate) sessions: SessionRegistry,
}

/// State shared between the balancer handle, the listener, connection
/// tasks and timers.
pub(crate) struct Shared {
    pub(crate) config: BalancerConfig,
    routing: Mutex<RoutingState>,
    pub(crate) admission: AdmissionChain,
    events: Arc<dyn EventHandler>,
    pub(crate) metrics: MetricsCollector,
    shutdown: ShutdownSignal,
    lifecycle: Mutex<Lifecycle>,
    active_connections: AtomicUsize,
    idle: Notify,
}

#[derive(Default)]
struct Lifecycle {
    started: bool,
    local_addr: Option<SocketAddr>,
    tasks: Vec<JoinHandle<()>>,
}

impl Balancer {
    /// Create a balancer that reports events to the log.
    pub fn new(config: BalancerConfig) -> Self {
        Self::with_event_handler(config, Arc::new(LogEvents))
    }

    /// Create a balancer with a custom event handler.
    pub fn with_event_handler(config: BalancerConfig, events: Arc<dyn EventHandler>) -> Self {
        Self::with_parts(config, events, MetricsCollector::new())
    }

    /// Create a balancer with a custom event handler and metrics collector.
    pub fn with_parts(
        config: BalancerConfig,
        events: Arc<dyn EventHandler>,
        metrics: MetricsCollector,
    ) -> Self {
        let selection = Selection::from_stickiness(config.stickiness);
        let pool = TargetPool::new(config.targets.clone(), selection);
        for target in pool.targets() {
            metrics.set_target_active(target, true);
        }

        let routing = RoutingState {
            pool,
            sessions: SessionRegistry::new(config.session_expiry),
        };

        Self {
            shared: Arc::new(Shared {
                config,
                routing: Mutex::new(routing),
                admission: AdmissionChain::new(),
                events,
                metrics,
                shutdown: ShutdownSignal::new(),
                lifecycle: Mutex::new(Lifecycle::default()),
                active_connections: AtomicUsize::new(0),
                idle: Notify::new(),
            }),
        }
    }

    /// Let an extension register middleware or otherwise configure the balancer.
    pub fn attach(&self, extension: &dyn BalancerExtension) -> &Self {
        extension.attach(self);
        self
    }

    /// Append a check to the admission chain.
    pub fn add_middleware<M: Middleware + 'static>(&self, middleware: M) {
        self.shared.admission.push(Arc::new(middleware));
        debug!(count = self.shared.admission.len(), "middleware added");
    }

    /// Configuration the balancer was built with.
    pub fn config(&self) -> &BalancerConfig {
        &self.shared.config
    }

    /// Metrics collector fed by this balancer.
    pub fn metrics(&self) -> &MetricsCollector {
        &self.shared.metrics
    }

    /// Replace the target list. Every target starts active.
    pub fn set_targets(&self, targets: Vec<Target>) {
        let mut routing = self.shared.routing.lock();
        for target in routing.pool.targets() {
            self.shared.metrics.remove_target(target);
        }
        routing.pool.set_targets(targets);
        for target in routing.pool.targets() {
            self.shared.metrics.set_target_active(target, true);
        }
    }

    /// All configured targets.
    pub fn targets(&self) -> Vec<Target> {
        self.shared.routing.lock().pool.targets().to_vec()
    }

    /// Targets currently eligible for new connections.
    pub fn active_targets(&self) -> Vec<Target> {
        self.shared.routing.lock().pool.active_targets().to_vec()
    }

    /// Whether `target` is currently active.
    pub fn is_target_active(&self, target: &Target) -> bool {
        self.shared.routing.lock().pool.is_active(target)
    }

    /// Take `target` out of rotation for `target_deactivation_duration`.
    ///
    /// Returns false if the target was not active. The cooldown timer runs
    /// on the current tokio runtime.
    pub fn deactivate_target(&self, target: &Target) -> bool {
        self.shared.deactivate(target)
    }

    /// Put `target` back into rotation now, cancelling its cooldown.
    pub fn reactivate_target(&self, target: &Target) -> bool {
        let reactivated = self.shared.routing.lock().pool.reactivate_target(target);
        if reactivated {
            self.shared.metrics.set_target_active(target, true);
        }
        reactivated
    }

    /// Snapshot of the session for `client`.
    pub fn session(&self, client: &str) -> Option<Session> {
        self.shared.routing.lock().sessions.get(client).cloned()
    }

    /// Number of sessions, open or idle.
    pub fn session_count(&self) -> usize {
        self.shared.routing.lock().sessions.len()
    }

    /// Connections currently being handled.
    pub fn active_connections(&self) -> usize {
        self.shared.active_connections.load(Ordering::Acquire)
    }

    /// Address the listener is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared.lifecycle.lock().local_addr
    }

    /// Bind the listening socket and start accepting connections.
    ///
    /// Also starts the session expiry sweep and, if configured, drops
    /// privileges. A failed privilege drop is reported as an error event
    /// but does not abort startup.
    pub async fn start(&self) -> Result<SocketAddr, BalancerError> {
        {
            let mut lifecycle = self.shared.lifecycle.lock();
            if lifecycle.started {
                return Err(BalancerError::AlreadyStarted);
            }
            lifecycle.started = true;
        }

        let addr = SocketAddr::new(self.shared.config.bind_address, self.shared.config.source_port);
        let listener = match FrontendListener::bind(addr, Arc::clone(&self.shared)) {
            Ok(listener) => listener,
            Err(e) => {
                self.shared.lifecycle.lock().started = false;
                return Err(e);
            }
        };
        let local_addr = listener.local_addr();

        if let Some(user) = &self.shared.config.downgrade_to_user {
            match downgrade_to_user(user) {
                Ok(()) => info!(user = %user, "privileges downgraded"),
                Err(e) => self.shared.emit(BalancerEvent::Error(e)),
            }
        }

        let accept = tokio::spawn(listener.run(self.shared.shutdown.subscribe()));
        let sweep = tokio::spawn(sweep_sessions(
            Arc::downgrade(&self.shared),
            self.shared.config.session_expiry_interval,
            self.shared.shutdown.subscribe(),
        ));

        let mut lifecycle = self.shared.lifecycle.lock();
        lifecycle.local_addr = Some(local_addr);
        lifecycle.tasks.extend([accept, sweep]);

        info!(
            listen = %local_addr,
            targets = self.shared.config.targets.len(),
            stickiness = self.shared.config.stickiness,
            "balancer started"
        );
        Ok(local_addr)
    }

    /// Stop accepting connections and stop the expiry sweep.
    ///
    /// Resolves once the listener has been closed. Connections already
    /// accepted keep running; see [`Balancer::drain`].
    pub async fn close(&self) {
        self.shared.shutdown.shutdown();
        let tasks = std::mem::take(&mut self.shared.lifecycle.lock().tasks);
        for task in tasks {
            let _ = task.await;
        }
        info!("balancer closed");
    }

    /// Wait until no connections remain, at most `timeout`.
    ///
    /// Returns true if the balancer went idle in time.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let wait_idle = async {
            loop {
                let notified = self.shared.idle.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.active_connections() == 0 {
                    return;
                }
                notified.await;
            }
        };
        let drained = tokio::time::timeout(timeout, wait_idle).await.is_ok();
        if !drained {
            warn!(
                remaining = self.active_connections(),
                "shutdown timeout elapsed with connections still open"
            );
        }
        drained
    }
}

impl Shared {
    /// Register a connection for `client` and return its assigned target.
    pub(crate) fn open_session(&self, client: &str) -> Option<Target> {
        let mut routing = self.routing.lock();
        let RoutingState { pool, sessions } = &mut *routing;
        let target = sessions.open(client, pool);
        self.metrics.set_sessions(sessions.len());
        target
    }

    /// Record that a connection for `client` closed.
    pub(crate) fn close_session(&self, client: &str) -> CloseOutcome {
        let mut routing = self.routing.lock();
        let RoutingState { pool, sessions } = &mut *routing;
        let outcome = sessions.close(client, pool);
        self.metrics.set_sessions(sessions.len());
        outcome
    }

    /// Deactivate `failed` after it refused a connection for `client` and
    /// resolve the target to retry with.
    pub(crate) fn handle_refusal(self: &Arc<Self>, client: &str, failed: &Target) -> Option<Target> {
        let (ticket, next) = {
            let mut routing = self.routing.lock();
            let RoutingState { pool, sessions } = &mut *routing;
            let ticket = pool.deactivate(failed);
            let next = sessions.resolve_after_refusal(client, failed, pool);
            (ticket, next)
        };

        self.metrics.record_refusal(failed);
        if let Some(ticket) = ticket {
            self.schedule_reactivation(ticket);
        }
        next
    }

    /// Take `target` out of rotation and schedule its return.
    pub(crate) fn deactivate(self: &Arc<Self>, target: &Target) -> bool {
        let ticket = self.routing.lock().pool.deactivate(target);
        match ticket {
            Some(ticket) => {
                self.schedule_reactivation(ticket);
                true
            }
            None => false,
        }
    }

    fn schedule_reactivation(self: &Arc<Self>, ticket: ReactivationTicket) {
        self.metrics.set_target_active(ticket.target(), false);

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(
                upstream = %ticket.target(),
                "no async runtime, target stays inactive until reactivated explicitly"
            );
            return;
        };

        let shared = Arc::downgrade(self);
        let cooldown = self.config.target_deactivation_duration;
        runtime.spawn(async move {
            tokio::time::sleep(cooldown).await;
            if let Some(shared) = shared.upgrade() {
                let reactivated = shared.routing.lock().pool.reactivate(&ticket);
                if reactivated {
                    shared.metrics.set_target_active(ticket.target(), true);
                } else {
                    trace!(upstream = %ticket.target(), "stale reactivation ignored");
                }
            }
        });
    }

    /// Report an event, dropping benign client disconnects.
    pub(crate) fn emit(&self, event: BalancerEvent) {
        if let BalancerEvent::Error(err) = &event {
            if err.is_benign() {
                trace!(error = %err, "suppressed benign error");
                return;
            }
        }
        self.events.on_event(&event);
    }

    /// Count a connection in; the guard counts it out on drop.
    pub(crate) fn track_connection(self: &Arc<Self>) -> ConnectionTracker {
        self.active_connections.fetch_add(1, Ordering::AcqRel);
        self.metrics.connection_opened();
        ConnectionTracker {
            shared: Arc::clone(self),
        }
    }
}

/// Keeps the active connection count accurate however a connection ends.
pub(crate) struct ConnectionTracker {
    shared: Arc<Shared>,
}

impl Drop for ConnectionTracker {
    fn drop(&mut self) {
        self.shared.metrics.connection_closed();
        if self.shared.active_connections.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.shared.idle.notify_waiters();
        }
    }
}

/// Shortest period the expiry sweep runs at.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);

/// Periodically delete sessions whose idle expiry has elapsed.
async fn sweep_sessions(
    shared: Weak<Shared>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    // `interval` panics on a zero period.
    let mut ticker = tokio::time::interval(interval.max(MIN_SWEEP_INTERVAL));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(shared) = shared.upgrade() else { break };
                let mut routing = shared.routing.lock();
                routing.sessions.sweep();
                shared.metrics.set_sessions(routing.sessions.len());
            }
            _ = shutdown.recv() => {
                debug!("session sweep stopping");
                break;
            }
        }
    }
}
