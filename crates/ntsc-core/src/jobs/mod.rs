//! Merges locally known jobs with the resource manager's queue, and turns "put this job next
//! to that one" requests into resource manager instructions.

pub mod reorder;

pub use reorder::{MoveJobMessages, move_job_messages};

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::models::{CoreError, CoreErrorKind, CoreResult, Job, JobId, SetJobPriority};
use crate::resource_manager::ResourceManager;

pub type JobSourceFuture<'a, T> = Pin<Box<dyn Future<Output = CoreResult<T>> + Send + 'a>>;

/// A subsystem that owns jobs: the task registry, an experiment manager, and so on.
pub trait JobSource: Send + Sync {
    /// The source's jobs as it sees them, without scheduling information.
    fn jobs(&self) -> JobSourceFuture<'_, Vec<Job>>;

    /// Updates the priority of a job this source owns and returns its new view, or `None`
    /// when the job belongs to someone else.
    fn set_job_priority(&self, job_id: JobId, priority: i32) -> JobSourceFuture<'_, Option<Job>>;
}

pub struct JobService {
    rm: Arc<dyn ResourceManager>,
    sources: Vec<Arc<dyn JobSource>>,
}

impl JobService {
    pub fn new(rm: Arc<dyn ResourceManager>) -> Self {
        Self {
            rm,
            sources: Vec::new(),
        }
    }

    pub fn with_source(mut self, source: Arc<dyn JobSource>) -> Self {
        self.sources.push(source);
        self
    }

    /// All jobs the resource manager is queueing in `resource_pool`, ahead-most first. Jobs the
    /// manager does not report for this pool are left out.
    pub async fn list_jobs(&self, resource_pool: &str) -> CoreResult<Vec<Job>> {
        let local = self.local_jobs().await?;
        let queue = self.rm.get_job_queue(resource_pool)?;

        let mut jobs: Vec<Job> = local
            .into_iter()
            .filter_map(|mut job| {
                let info = queue.get(&job.job_id)?;
                job.apply_queue_info(Some(info));
                Some(job)
            })
            .collect();
        jobs.sort_by(|left, right| {
            left.jobs_ahead()
                .cmp(&right.jobs_ahead())
                .then(left.submission_time.cmp(&right.submission_time))
        });
        Ok(jobs)
    }

    /// One job with fresh scheduling information; the summary is cleared when the resource
    /// manager does not know the job.
    pub async fn job(&self, job_id: &JobId) -> CoreResult<Job> {
        let mut job = self
            .local_jobs()
            .await?
            .into_iter()
            .find(|job| &job.job_id == job_id)
            .ok_or_else(|| job_not_found(job_id))?;
        let queue = self.rm.get_job_queue(&job.resource_pool)?;
        job.apply_queue_info(queue.get(job_id));
        Ok(job)
    }

    /// Places `target` immediately ahead of (or behind) `anchor` in `resource_pool`, changing
    /// its priority first when the two sit in different lanes. Returns what was applied.
    pub async fn move_job(
        &self,
        resource_pool: &str,
        target: &JobId,
        anchor: &JobId,
        ahead_of: bool,
    ) -> CoreResult<MoveJobMessages> {
        let jobs = self.list_jobs(resource_pool).await?;
        let target_job = jobs
            .iter()
            .find(|job| &job.job_id == target)
            .ok_or_else(|| job_not_found(target))?;
        let anchor_index = jobs
            .iter()
            .position(|job| &job.job_id == anchor)
            .ok_or_else(|| {
                CoreError::new(
                    CoreErrorKind::InvalidInput,
                    format!("anchor job '{anchor}' is not queued in resource pool '{resource_pool}'"),
                )
            })?;

        let messages = move_job_messages(
            &jobs,
            target_job,
            &jobs[anchor_index],
            anchor_index,
            ahead_of,
        )?;

        if let Some(priority) = &messages.priority {
            self.apply_priority(resource_pool, priority).await?;
        }
        if let Some(position) = &messages.position {
            self.rm.move_job(resource_pool, position)?;
        }
        tracing::info!(
            resource_pool,
            job_id = %target,
            anchor = %anchor,
            ahead_of,
            priority_changed = messages.priority.is_some(),
            moved = messages.position.is_some(),
            "applied job queue move"
        );
        Ok(messages)
    }

    async fn local_jobs(&self) -> CoreResult<Vec<Job>> {
        let mut jobs = Vec::new();
        for source in &self.sources {
            jobs.extend(source.jobs().await?);
        }
        Ok(jobs)
    }

    async fn apply_priority(&self, resource_pool: &str, request: &SetJobPriority) -> CoreResult<()> {
        for source in &self.sources {
            if source
                .set_job_priority(request.job_id.clone(), request.priority)
                .await?
                .is_some()
            {
                return Ok(());
            }
        }
        // Nobody here owns the job; tell the resource manager directly.
        self.rm
            .set_group_priority(&request.job_id, resource_pool, request.priority)?;
        Ok(())
    }
}

fn job_not_found(job_id: &JobId) -> CoreError {
    CoreError::new(CoreErrorKind::NotFound, format!("job '{job_id}' not found"))
}
