//! Backend target pool and selection algorithms.

pub mod algorithms;
mod pool;
mod target;

pub use algorithms::{Selection, Selector};
pub use pool::{ReactivationTicket, TargetPool};
pub use target::Target;
