//! Per-client session tracking.

mod expiry;
mod registry;

pub use expiry::ExpiryManager;
pub use registry::{CloseOutcome, Session, SessionRegistry};
