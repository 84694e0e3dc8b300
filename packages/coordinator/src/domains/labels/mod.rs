//! Label registration and deletion pipeline.

mod handler;

pub use handler::{run_delete_label_job, run_register_label_job};
