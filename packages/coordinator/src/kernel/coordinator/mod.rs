//! The coordinator loop: channel records, job execution, event handling,
//! and the watcher service.

pub mod events;
pub mod execute;
pub mod jobs;
pub mod service;

pub use jobs::{JobRecord, ResourceUpdatedEvent, ScheduleChangeJob};
pub use service::Coordinator;
