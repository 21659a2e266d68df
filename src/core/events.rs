//! Live job event feed.
//!
//! Every log append, progress tick and status transition is published on a
//! broadcast channel so transports (WebSocket, CLI) can stream a job without
//! polling the tracker. Subscribers filter by `job_id`.

use serde::Serialize;

use crate::core::models::JobStatus;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobEventPayload {
    Log { line: String },
    Progress { percent: u8 },
    Status { status: JobStatus },
}

#[derive(Debug, Clone, Serialize)]
pub struct JobEvent {
    pub job_id: String,
    #[serde(flatten)]
    pub payload: JobEventPayload,
}

impl JobEvent {
    pub fn log(job_id: &str, line: impl Into<String>) -> Self {
        Self {
            job_id: job_id.to_string(),
            payload: JobEventPayload::Log { line: line.into() },
        }
    }

    pub fn progress(job_id: &str, percent: u8) -> Self {
        Self {
            job_id: job_id.to_string(),
            payload: JobEventPayload::Progress { percent },
        }
    }

    pub fn status(job_id: &str, status: JobStatus) -> Self {
        Self {
            job_id: job_id.to_string(),
            payload: JobEventPayload::Status { status },
        }
    }
}
