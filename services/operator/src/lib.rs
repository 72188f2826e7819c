//! tfo operator library.
//!
//! This crate primarily ships the `tfo-operator` binary, but we expose the
//! library surface so the convergence loops can be driven directly from
//! integration tests.

pub mod api;
pub mod config;
pub mod controller;
pub mod fleet;
pub mod metrics;
pub mod reconcilers;
pub mod remote;
pub mod resources;
pub mod secrets;
pub mod state;
pub mod store;
