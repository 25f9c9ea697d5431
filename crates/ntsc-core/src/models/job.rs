use std::fmt::{Display, Formatter};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::models::{JobId, JobType};

/// Priority a job carries when neither its submitter nor an operator chose one.
pub const DEFAULT_JOB_PRIORITY: i32 = 42;

/// How far the resource manager has taken a job. Ordered so that `max` picks the most
/// advanced state when several allocations of one job disagree.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingState {
    Queued,
    ScheduledBackfilled,
    Scheduled,
}

impl SchedulingState {
    pub fn most_progressed(self, other: Self) -> Self {
        self.max(other)
    }
}

/// Per-job scheduling facts reported by the resource manager.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RmJobInfo {
    pub jobs_ahead: u32,
    pub state: SchedulingState,
    pub requested_slots: u32,
    pub allocated_slots: u32,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub state: SchedulingState,
    pub jobs_ahead: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: JobId,
    pub job_type: JobType,
    pub name: String,
    pub username: String,
    pub user_id: i32,
    pub resource_pool: String,
    pub submission_time: SystemTime,
    pub priority: i32,
    pub weight: f64,
    pub summary: Option<JobSummary>,
    pub requested_slots: u32,
    pub allocated_slots: u32,
}

impl Job {
    /// Overwrites the scheduling view with what the resource manager reported, or clears it
    /// when the manager has nothing on this job.
    pub fn apply_queue_info(&mut self, info: Option<&RmJobInfo>) {
        match info {
            Some(info) => {
                self.summary = Some(JobSummary {
                    state: info.state,
                    jobs_ahead: info.jobs_ahead,
                });
                self.requested_slots = info.requested_slots;
                self.allocated_slots = info.allocated_slots;
            }
            None => {
                self.summary = None;
                self.requested_slots = 0;
                self.allocated_slots = 0;
            }
        }
    }

    pub fn jobs_ahead(&self) -> Option<u32> {
        self.summary.as_ref().map(|summary| summary.jobs_ahead)
    }
}

/// The second anchor of a move: a real job, or the head/tail of the anchor's priority lane.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueAnchor {
    Job(JobId),
    Head,
    Tail,
}

impl Display for QueueAnchor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Job(job_id) => write!(f, "{job_id}"),
            Self::Head => f.write_str("<head>"),
            Self::Tail => f.write_str("<tail>"),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct MoveJob {
    pub job_id: JobId,
    pub anchor1: JobId,
    pub anchor2: QueueAnchor,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SetJobPriority {
    pub job_id: JobId,
    pub priority: i32,
}
