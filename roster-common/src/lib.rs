//! Runtime plumbing shared by every roster crate.

pub mod logging;

pub use tracing;

/// Process-wide lifecycle signal, broadcast to every long-running task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
    Finalised,
}
