//! Process host for the roster notification dispatcher.
//!
//! Loads the RON configuration, wires the HTTP channel clients into a
//! [`roster_dispatch::Dispatcher`] and keeps the queue processor running
//! until the process is asked to stop.

pub mod controller;

pub use controller::{Roster, SHUTDOWN_BROADCAST, SendReport};
