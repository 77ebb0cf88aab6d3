//! Shared tracing setup for the uptime binaries.

mod subscriber;

pub use subscriber::{init_tracing, init_tracing_with_file};
