//! Control plane for a virtual feature store.
//!
//! Drives materialized data artifacts - primary tables, transformations,
//! features, labels, training sets - through their lifecycle across
//! heterogeneous execution backends. The coordinator watches job keys in
//! the shared state store, takes a lease-bound lock per job, and runs the
//! matching pipeline to `READY` or `FAILED`.
//!
//! Layering follows the kernel/domains split: `kernel` is infrastructure
//! (state store access, metadata facade, runners, the watch loop),
//! `domains` is the per-resource business logic, and `common` is the
//! shared vocabulary both sides speak.

pub mod common;
pub mod config;
pub mod domains;
pub mod kernel;

pub use common::{Error, Result};
pub use config::Config;
pub use kernel::{Coordinator, CoordinatorDeps};
