//! Connection handling: the per-connection pipeline and the byte relay.

mod pipeline;
mod relay;

pub(crate) use pipeline::handle_connection;
pub use relay::{RelayEnd, RelayOutcome, Side, relay};
