//! Records carried on the coordination channels.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::common::resource::ResourceId;

/// A queued lifecycle job, stored at `JOB_<type>/<name>/<variant>`.
/// Deleted on success; deleted after exceeding max attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct JobRecord {
    pub resource: ResourceId,
    pub schedule: String,
    pub attempts: i32,
}

impl JobRecord {
    pub fn new(resource: ResourceId, schedule: impl Into<String>) -> Self {
        Self {
            resource,
            schedule: schedule.into(),
            attempts: 0,
        }
    }
}

/// Emitted by update jobs on completion, stored at
/// `UPDATE_EVENT_<name>__<variant>__<type>__<uuid>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUpdatedEvent {
    #[serde(rename = "ResourceID")]
    pub resource_id: ResourceId,
    #[serde(rename = "Completed")]
    pub completed: DateTime<Utc>,
}

/// A requested schedule change, stored at
/// `SCHEDULEJOB_<name>__<variant>__<type>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleChangeJob {
    #[serde(rename = "ResourceID")]
    pub resource_id: ResourceId,
    #[serde(rename = "Schedule")]
    pub schedule: String,
}
