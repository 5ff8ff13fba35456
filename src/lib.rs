//! sessionlb - a session-aware TCP load balancer
//!
//! Relays each inbound connection byte for byte to one of a pool of
//! targets, with:
//! - Per-client session affinity (sticky hash) or random placement
//! - Automatic deactivation of targets that refuse connections
//! - Idle session expiry
//! - A pluggable admission chain
//! - Hot reload of the target list and Prometheus metrics
//!
//! ```no_run
//! use sessionlb::{Balancer, BalancerConfig, Target};
//!
//! # async fn run() -> Result<(), sessionlb::BalancerError> {
//! let balancer = Balancer::new(BalancerConfig {
//!     source_port: 8000,
//!     targets: vec![Target::new("localhost", 8001), Target::new("localhost", 8002)],
//!     ..BalancerConfig::default()
//! });
//! balancer.start().await?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod balancer;
pub mod config;
pub mod error;
pub mod events;
pub mod frontend;
pub mod metrics;
pub mod proxy;
pub mod session;
pub mod util;

pub use backend::Target;
pub use balancer::{Balancer, BalancerExtension};
pub use config::{BalancerConfig, BufferOverflowPolicy, Config};
pub use error::BalancerError;
pub use events::{BalancerEvent, EventHandler, Notice};
