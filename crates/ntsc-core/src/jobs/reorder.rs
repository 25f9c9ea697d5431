use crate::models::{CoreError, CoreErrorKind, CoreResult, Job, MoveJob, QueueAnchor, SetJobPriority};

/// Instructions realising one queue move. When both are present the priority change must be
/// applied first: positions only mean something inside the job's final lane.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MoveJobMessages {
    pub priority: Option<SetJobPriority>,
    pub position: Option<MoveJob>,
}

impl MoveJobMessages {
    pub fn is_empty(&self) -> bool {
        self.priority.is_none() && self.position.is_none()
    }
}

/// Computes what to send the resource manager so that `target` ends up immediately ahead of
/// (`ahead_of`) or behind `anchor`. `jobs` is the queue in priority-then-position order and
/// `anchor_index` is where `anchor` sits in it.
pub fn move_job_messages(
    jobs: &[Job],
    target: &Job,
    anchor: &Job,
    anchor_index: usize,
    ahead_of: bool,
) -> CoreResult<MoveJobMessages> {
    let Some(indexed) = jobs.get(anchor_index) else {
        return Err(CoreError::new(
            CoreErrorKind::InvalidInput,
            format!(
                "anchor index {anchor_index} is out of bounds for a queue of {} jobs",
                jobs.len()
            ),
        ));
    };
    if indexed.job_id != anchor.job_id {
        return Err(CoreError::new(
            CoreErrorKind::InvalidInput,
            format!(
                "job at index {anchor_index} is '{}', not anchor '{}'",
                indexed.job_id, anchor.job_id
            ),
        ));
    }

    if target.job_id == anchor.job_id {
        return Ok(MoveJobMessages::default());
    }

    let neighbour_index = if ahead_of {
        anchor_index.checked_sub(1)
    } else {
        anchor_index.checked_add(1)
    };
    // A neighbour in another lane cannot bound the move; fall back to the lane's edge.
    let neighbour = neighbour_index
        .and_then(|index| jobs.get(index))
        .filter(|job| job.priority == anchor.priority);

    if neighbour.is_some_and(|job| job.job_id == target.job_id)
        && target.priority == anchor.priority
    {
        return Ok(MoveJobMessages::default());
    }

    let anchor2 = match neighbour {
        Some(job) => QueueAnchor::Job(job.job_id.clone()),
        None if ahead_of => QueueAnchor::Head,
        None => QueueAnchor::Tail,
    };

    let priority = (target.priority != anchor.priority).then(|| SetJobPriority {
        job_id: target.job_id.clone(),
        priority: anchor.priority,
    });

    Ok(MoveJobMessages {
        priority,
        position: Some(MoveJob {
            job_id: target.job_id.clone(),
            anchor1: anchor.job_id.clone(),
            anchor2,
        }),
    })
}
