//! Utility functions and helpers.

mod connection_id;
mod logging;
mod privileges;
mod shutdown;

pub use connection_id::ConnectionId;
pub use logging::init_logging;
pub use privileges::downgrade_to_user;
pub use shutdown::{ShutdownSignal, wait_for_os_signal};
