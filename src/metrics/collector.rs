//! Metrics collector using prometheus-client.
//!
//! Provides metrics for connections, relayed bytes, target state,
//! refusals, admission and sessions.

use crate::backend::Target;
use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use std::sync::Arc;
use std::time::Duration;

/// Labels for per-target metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct TargetLabels {
    pub target: String,
}

impl TargetLabels {
    fn new(target: &Target) -> Self {
        Self {
            target: target.to_string(),
        }
    }
}

/// Labels for bytes transferred metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct BytesLabels {
    pub direction: Direction,
}

/// Direction of bytes transfer.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Direction {
    ToTarget,
    ToClient,
}

/// Collects and stores all metrics.
#[derive(Clone)]
pub struct MetricsCollector {
    inner: Arc<MetricsCollectorInner>,
}

struct MetricsCollectorInner {
    /// Total accepted connections.
    connections_total: Counter,
    /// Connections currently being handled.
    active_connections: Gauge,
    /// Relayed connection duration (in seconds).
    connection_duration_seconds: Histogram,
    /// Bytes relayed, by direction.
    bytes_total: Family<BytesLabels, Counter>,
    /// Target state gauge (1 = active, 0 = cooling down).
    target_active: Family<TargetLabels, Gauge>,
    /// Refused connection attempts per target.
    target_refusals: Family<TargetLabels, Counter>,
    /// Connections turned away by the admission chain.
    admission_rejections: Counter,
    /// Sessions in the registry, open or idle.
    sessions: Gauge,
    /// The prometheus registry.
    registry: Registry,
}

impl MetricsCollector {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let connections_total = Counter::default();
        let active_connections = Gauge::default();
        // Buckets: 1ms .. ~15min
        let connection_duration_seconds = Histogram::new(exponential_buckets(0.001, 4.0, 11));
        let bytes_total = Family::<BytesLabels, Counter>::default();
        let target_active = Family::<TargetLabels, Gauge>::default();
        let target_refusals = Family::<TargetLabels, Counter>::default();
        let admission_rejections = Counter::default();
        let sessions = Gauge::default();

        registry.register(
            "sessionlb_connections",
            "Total number of accepted connections",
            connections_total.clone(),
        );
        registry.register(
            "sessionlb_active_connections",
            "Number of connections currently handled",
            active_connections.clone(),
        );
        registry.register(
            "sessionlb_connection_duration_seconds",
            "Duration of relayed connections in seconds",
            connection_duration_seconds.clone(),
        );
        registry.register(
            "sessionlb_bytes",
            "Total bytes relayed",
            bytes_total.clone(),
        );
        registry.register(
            "sessionlb_target_active",
            "Target state (1=active, 0=deactivated)",
            target_active.clone(),
        );
        registry.register(
            "sessionlb_target_refusals",
            "Connection attempts refused by a target",
            target_refusals.clone(),
        );
        registry.register(
            "sessionlb_admission_rejections",
            "Connections rejected by admission middleware",
            admission_rejections.clone(),
        );
        registry.register(
            "sessionlb_sessions",
            "Number of client sessions",
            sessions.clone(),
        );

        Self {
            inner: Arc::new(MetricsCollectorInner {
                connections_total,
                active_connections,
                connection_duration_seconds,
                bytes_total,
                target_active,
                target_refusals,
                admission_rejections,
                sessions,
                registry,
            }),
        }
    }

    /// Get the prometheus registry for encoding.
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Record a finished relay.
    pub fn record_relay(&self, bytes_to_target: u64, bytes_to_client: u64, duration: Duration) {
        self.inner
            .connection_duration_seconds
            .observe(duration.as_secs_f64());
        self.inner
            .bytes_total
            .get_or_create(&BytesLabels {
                direction: Direction::ToTarget,
            })
            .inc_by(bytes_to_target);
        self.inner
            .bytes_total
            .get_or_create(&BytesLabels {
                direction: Direction::ToClient,
            })
            .inc_by(bytes_to_client);
    }

    /// Increment active connections.
    pub fn connection_opened(&self) {
        self.inner.connections_total.inc();
        self.inner.active_connections.inc();
    }

    /// Decrement active connections.
    pub fn connection_closed(&self) {
        self.inner.active_connections.dec();
    }

    /// Update a target's state.
    pub fn set_target_active(&self, target: &Target, active: bool) {
        self.inner
            .target_active
            .get_or_create(&TargetLabels::new(target))
            .set(i64::from(active));
    }

    /// Forget a target that left the pool.
    pub fn remove_target(&self, target: &Target) {
        let labels = TargetLabels::new(target);
        self.inner.target_active.remove(&labels);
        self.inner.target_refusals.remove(&labels);
    }

    /// Count a refused connection attempt.
    pub fn record_refusal(&self, target: &Target) {
        self.inner
            .target_refusals
            .get_or_create(&TargetLabels::new(target))
            .inc();
    }

    /// Count an admission rejection.
    pub fn admission_rejected(&self) {
        self.inner.admission_rejections.inc();
    }

    /// Update the session count.
    pub fn set_sessions(&self, count: usize) {
        self.inner
            .sessions
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus_client::encoding::text::encode;

    fn render(collector: &MetricsCollector) -> String {
        let mut buffer = String::new();
        encode(&mut buffer, collector.registry()).unwrap();
        buffer
    }

    #[test]
    fn test_connection_tracking() {
        let collector = MetricsCollector::new();

        collector.connection_opened();
        collector.connection_opened();
        collector.connection_closed();

        let text = render(&collector);
        assert!(text.contains("sessionlb_connections_total 2"));
        assert!(text.contains("sessionlb_active_connections 1"));
    }

    #[test]
    fn test_target_state() {
        let collector = MetricsCollector::new();
        let target = Target::new("localhost", 8000);

        collector.set_target_active(&target, true);
        collector.set_target_active(&target, false);
        assert!(render(&collector).contains(r#"sessionlb_target_active{target="localhost:8000"} 0"#));

        collector.remove_target(&target);
        assert!(!render(&collector).contains("localhost:8000"));
    }

    #[test]
    fn test_refusals_and_rejections() {
        let collector = MetricsCollector::new();
        let target = Target::new("localhost", 8100);

        collector.record_refusal(&target);
        collector.record_refusal(&target);
        collector.admission_rejected();

        let text = render(&collector);
        assert!(text.contains(r#"sessionlb_target_refusals_total{target="localhost:8100"} 2"#));
        assert!(text.contains("sessionlb_admission_rejections_total 1"));
    }

    #[test]
    fn test_relay_and_sessions() {
        let collector = MetricsCollector::new();
        collector.record_relay(1024, 2048, Duration::from_millis(100));
        collector.set_sessions(3);

        let text = render(&collector);
        assert!(text.contains("sessionlb_bytes_total"));
        assert!(text.contains("sessionlb_connection_duration_seconds_count 1"));
        assert!(text.contains("sessionlb_sessions 3"));
    }
}
