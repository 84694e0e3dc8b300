//! Feature materialization pipeline.

mod handler;

pub use handler::run_materialize_job;
