//! Memcached Kubernetes Operator
//!
//! This operator manages Memcached databases in Kubernetes: provisioning,
//! pausing into DormantDatabase records, resuming and termination.

pub mod adapters;
pub mod config;
pub mod controllers;
pub mod crd;
pub mod error;
pub mod metrics;
pub mod reconcilers;

pub use error::{Error, Result};
