//! Training set build pipeline.

mod handler;

pub use handler::run_training_set_job;
