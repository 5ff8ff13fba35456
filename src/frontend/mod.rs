//! Inbound side: the listening socket and the admission chain.

mod admission;
mod ip_filter;
mod listener;

pub use admission::{Admission, AdmissionChain, ConnectionInfo, FnMiddleware, Middleware, from_fn};
pub use ip_filter::{AdmissionConfigError, IpFilter};
pub use listener::FrontendListener;
