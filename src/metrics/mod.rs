//! Prometheus metrics for the Memcached Operator
//!
//! This module exposes metrics for monitoring operator health and reconciliation.

pub mod prometheus;

pub use prometheus::*;
