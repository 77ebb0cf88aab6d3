//! Uptime monitoring service: a scheduler that probes configured endpoints,
//! records results in an embedded time-series store, and notifies on changes.

pub mod admin;
pub mod config;
pub mod database;
pub mod monitoring;
pub mod notify;
pub mod orchestrator;
