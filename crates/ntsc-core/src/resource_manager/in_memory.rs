use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use crate::models::{
    DEFAULT_JOB_PRIORITY, ExitStatus, JobId, MoveJob, QueueAnchor, RmJobInfo, SchedulingState,
    TaskId,
};
use crate::resource_manager::{
    AllocateRequest, AllocationEvent, AllocationHandle, ContainerState, EventSink,
    ResourceManager, ResourceManagerError, ResourceManagerResult, StartSpec,
};

/// A single-process resource manager. Every allocation is queued in its pool; placement is
/// driven explicitly through [`InMemoryResourceManager::assign`] and friends, which emit the
/// same events a real cluster manager would.
pub struct InMemoryResourceManager {
    group_controls: bool,
    smaller_is_higher: bool,
    pools: HashSet<String>,
    state: Mutex<ManagerState>,
}

#[derive(Default)]
struct ManagerState {
    // Jobs per pool in submission/move order; lanes are derived from group priorities.
    queues: HashMap<String, Vec<JobId>>,
    groups: HashMap<JobId, Group>,
    allocations: HashMap<TaskId, AllocationEntry>,
    terminate_requests: Vec<(TaskId, bool)>,
    injected_failures: HashMap<&'static str, String>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Group {
    priority: i32,
    weight: f64,
}

impl Default for Group {
    fn default() -> Self {
        Self {
            priority: DEFAULT_JOB_PRIORITY,
            weight: 1.0,
        }
    }
}

struct AllocationEntry {
    handle: AllocationHandle,
    job_id: JobId,
    slots: u32,
    assigned: bool,
    terminated: bool,
    started: Option<StartSpec>,
    events: EventSink,
}

impl InMemoryResourceManager {
    pub fn new(pools: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            group_controls: true,
            smaller_is_higher: true,
            pools: pools.into_iter().map(Into::into).collect(),
            state: Mutex::new(ManagerState::default()),
        }
    }

    /// A manager that, like some cluster backends, has no notion of group priority or weight.
    pub fn without_group_controls(mut self) -> Self {
        self.group_controls = false;
        self
    }

    pub fn larger_value_is_higher_priority(mut self) -> Self {
        self.smaller_is_higher = false;
        self
    }

    /// Makes the next call to `operation` fail with `message`.
    pub fn fail_next(&self, operation: &'static str, message: impl Into<String>) {
        if let Ok(mut state) = self.state.lock() {
            state.injected_failures.insert(operation, message.into());
        }
    }

    pub fn assign(&self, task_id: &TaskId) -> ResourceManagerResult<()> {
        let events = {
            let mut state = self.lock_state()?;
            let entry = allocation_mut(&mut state, task_id)?;
            entry.assigned = true;
            entry.events.clone()
        };
        events.send(AllocationEvent::Assigned);
        Ok(())
    }

    pub fn container_state(
        &self,
        task_id: &TaskId,
        container: ContainerState,
    ) -> ResourceManagerResult<()> {
        let events = {
            let mut state = self.lock_state()?;
            let entry = allocation_mut(&mut state, task_id)?;
            let events = entry.events.clone();
            if matches!(container, ContainerState::Terminated(_)) {
                entry.terminated = true;
                dequeue(&mut state, task_id);
            }
            events
        };
        events.send(AllocationEvent::ContainerStateChanged(container));
        Ok(())
    }

    pub fn container_log(&self, task_id: &TaskId, line: impl Into<String>) -> ResourceManagerResult<()> {
        let events = {
            let state = self.lock_state()?;
            allocation(&state, task_id)?.events.clone()
        };
        events.send(AllocationEvent::ContainerLog(line.into()));
        Ok(())
    }

    pub fn abort(&self, task_id: &TaskId) -> ResourceManagerResult<()> {
        let events = {
            let mut state = self.lock_state()?;
            let entry = allocation_mut(&mut state, task_id)?;
            entry.terminated = true;
            let events = entry.events.clone();
            dequeue(&mut state, task_id);
            events
        };
        events.send(AllocationEvent::Aborted);
        Ok(())
    }

    pub fn started_spec(&self, task_id: &TaskId) -> Option<StartSpec> {
        let state = self.state.lock().ok()?;
        state.allocations.get(task_id)?.started.clone()
    }

    /// Whether the task still holds an allocation, i.e. it was allocated and not yet released.
    pub fn holds_allocation(&self, task_id: &TaskId) -> bool {
        self.state
            .lock()
            .map(|state| state.allocations.contains_key(task_id))
            .unwrap_or(false)
    }

    pub fn terminate_requests(&self) -> Vec<(TaskId, bool)> {
        self.state
            .lock()
            .map(|state| state.terminate_requests.clone())
            .unwrap_or_default()
    }

    pub fn group_priority(&self, job_id: &JobId) -> Option<i32> {
        let state = self.state.lock().ok()?;
        state.groups.get(job_id).map(|group| group.priority)
    }

    pub fn group_weight(&self, job_id: &JobId) -> Option<f64> {
        let state = self.state.lock().ok()?;
        state.groups.get(job_id).map(|group| group.weight)
    }

    /// Queues a job that has no task in this process, e.g. an experiment's trial.
    pub fn enqueue_external(
        &self,
        resource_pool: &str,
        job_id: JobId,
        priority: i32,
    ) -> ResourceManagerResult<()> {
        self.ensure_pool(resource_pool)?;
        let mut state = self.lock_state()?;
        state.groups.entry(job_id.clone()).or_default().priority = priority;
        let queue = state.queues.entry(resource_pool.to_string()).or_default();
        if !queue.contains(&job_id) {
            queue.push(job_id);
        }
        Ok(())
    }

    /// Jobs of `resource_pool` as the scheduler would consider them: highest-priority lane
    /// first, then position within the lane.
    pub fn ordered_jobs(&self, resource_pool: &str) -> ResourceManagerResult<Vec<JobId>> {
        self.ensure_pool(resource_pool)?;
        let state = self.lock_state()?;
        Ok(self.ordered(&state, resource_pool))
    }

    fn ordered(&self, state: &ManagerState, resource_pool: &str) -> Vec<JobId> {
        let mut jobs = state
            .queues
            .get(resource_pool)
            .cloned()
            .unwrap_or_default();
        jobs.sort_by_key(|job_id| self.lane_key(state, job_id));
        jobs
    }

    fn lane_key(&self, state: &ManagerState, job_id: &JobId) -> i64 {
        let priority = i64::from(
            state
                .groups
                .get(job_id)
                .map(|group| group.priority)
                .unwrap_or(DEFAULT_JOB_PRIORITY),
        );
        if self.smaller_is_higher {
            priority
        } else {
            -priority
        }
    }

    fn ensure_pool(&self, resource_pool: &str) -> ResourceManagerResult<()> {
        if self.pools.contains(resource_pool) {
            Ok(())
        } else {
            Err(ResourceManagerError::UnknownResourcePool(
                resource_pool.to_string(),
            ))
        }
    }

    fn ensure_group_controls(&self, operation: &str) -> ResourceManagerResult<()> {
        if self.group_controls {
            Ok(())
        } else {
            Err(ResourceManagerError::Unsupported(operation.to_string()))
        }
    }

    fn lock_state(&self) -> ResourceManagerResult<MutexGuard<'_, ManagerState>> {
        self.state.lock().map_err(|_| {
            ResourceManagerError::Failed("in-memory resource manager state poisoned".to_string())
        })
    }

    fn take_injected_failure(&self, operation: &'static str) -> ResourceManagerResult<()> {
        let mut state = self.lock_state()?;
        match state.injected_failures.remove(operation) {
            Some(message) => Err(ResourceManagerError::Failed(message)),
            None => Ok(()),
        }
    }
}

impl ResourceManager for InMemoryResourceManager {
    fn allocate(&self, request: AllocateRequest) -> ResourceManagerResult<AllocationHandle> {
        self.take_injected_failure("allocate")?;
        self.ensure_pool(&request.resource_pool)?;

        let handle = AllocationHandle {
            allocation_id: request.allocation_id.clone(),
            task_id: request.task_id.clone(),
            resource_pool: request.resource_pool.clone(),
        };

        let mut state = self.lock_state()?;
        state.groups.entry(request.job_id.clone()).or_default();
        let queue = state
            .queues
            .entry(request.resource_pool.clone())
            .or_default();
        if !queue.contains(&request.job_id) {
            queue.push(request.job_id.clone());
        }
        state.allocations.insert(
            request.task_id.clone(),
            AllocationEntry {
                handle: handle.clone(),
                job_id: request.job_id,
                slots: request.slots_needed,
                assigned: false,
                terminated: false,
                started: None,
                events: request.events,
            },
        );

        Ok(handle)
    }

    fn start(&self, allocation: &AllocationHandle, spec: StartSpec) -> ResourceManagerResult<()> {
        self.take_injected_failure("start")?;
        let mut state = self.lock_state()?;
        let entry = allocation_mut(&mut state, &allocation.task_id)?;
        entry.started = Some(spec);
        Ok(())
    }

    fn release(&self, allocation: &AllocationHandle) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        dequeue(&mut state, &allocation.task_id);
        let Some(entry) = state.allocations.remove(&allocation.task_id) else {
            return;
        };
        let job_in_use = state
            .allocations
            .values()
            .any(|other| other.job_id == entry.job_id);
        let job_queued = state
            .queues
            .values()
            .any(|queue| queue.contains(&entry.job_id));
        if !job_in_use && !job_queued {
            state.groups.remove(&entry.job_id);
        }
    }

    fn terminate_task(&self, task_id: &TaskId, forcible: bool) -> ResourceManagerResult<()> {
        self.take_injected_failure("terminate_task")?;
        let (events, event) = {
            let mut state = self.lock_state()?;
            state.terminate_requests.push((task_id.clone(), forcible));
            let entry = allocation_mut(&mut state, task_id)?;
            if entry.terminated {
                return Ok(());
            }
            entry.terminated = true;
            let events = entry.events.clone();
            let event = if entry.assigned {
                AllocationEvent::ContainerStateChanged(ContainerState::Terminated(
                    ExitStatus::failed("task was terminated on request"),
                ))
            } else {
                AllocationEvent::Aborted
            };
            dequeue(&mut state, task_id);
            (events, event)
        };
        events.send(event);
        Ok(())
    }

    fn set_group_priority(
        &self,
        job_id: &JobId,
        resource_pool: &str,
        priority: i32,
    ) -> ResourceManagerResult<()> {
        self.ensure_group_controls("set group priority")?;
        self.take_injected_failure("set_group_priority")?;
        self.ensure_pool(resource_pool)?;
        let mut state = self.lock_state()?;
        state.groups.entry(job_id.clone()).or_default().priority = priority;
        Ok(())
    }

    fn set_group_weight(
        &self,
        job_id: &JobId,
        resource_pool: &str,
        weight: f64,
    ) -> ResourceManagerResult<()> {
        self.ensure_group_controls("set group weight")?;
        self.take_injected_failure("set_group_weight")?;
        self.ensure_pool(resource_pool)?;
        let mut state = self.lock_state()?;
        state.groups.entry(job_id.clone()).or_default().weight = weight;
        Ok(())
    }

    fn smaller_value_is_higher_priority(&self) -> ResourceManagerResult<bool> {
        self.ensure_group_controls("task priority")?;
        Ok(self.smaller_is_higher)
    }

    fn get_job_queue(&self, resource_pool: &str) -> ResourceManagerResult<HashMap<JobId, RmJobInfo>> {
        self.ensure_pool(resource_pool)?;
        let state = self.lock_state()?;
        let ordered = self.ordered(&state, resource_pool);

        let mut queue = HashMap::with_capacity(ordered.len());
        for (position, job_id) in ordered.into_iter().enumerate() {
            let mut info = RmJobInfo {
                jobs_ahead: u32::try_from(position).unwrap_or(u32::MAX),
                state: SchedulingState::Queued,
                requested_slots: 0,
                allocated_slots: 0,
            };
            for entry in state
                .allocations
                .values()
                .filter(|entry| entry.job_id == job_id && !entry.terminated)
            {
                info.requested_slots += entry.slots;
                if entry.assigned {
                    info.allocated_slots += entry.slots;
                    info.state = info.state.most_progressed(SchedulingState::Scheduled);
                }
            }
            queue.insert(job_id, info);
        }
        Ok(queue)
    }

    fn move_job(&self, resource_pool: &str, request: &MoveJob) -> ResourceManagerResult<()> {
        self.ensure_pool(resource_pool)?;
        let mut state = self.lock_state()?;
        let ordered = self.ordered(&state, resource_pool);
        let lane_position = |job_id: &JobId| ordered.iter().position(|queued| queued == job_id);

        lane_position(&request.job_id)
            .ok_or_else(|| ResourceManagerError::UnknownJob(request.job_id.clone()))?;
        let anchor_position = lane_position(&request.anchor1)
            .ok_or_else(|| ResourceManagerError::UnknownJob(request.anchor1.clone()))?;
        let ahead = match &request.anchor2 {
            QueueAnchor::Head => true,
            QueueAnchor::Tail => false,
            QueueAnchor::Job(second) => {
                let second_position = lane_position(second)
                    .ok_or_else(|| ResourceManagerError::UnknownJob(second.clone()))?;
                second_position < anchor_position
            }
        };

        let queue = state
            .queues
            .get_mut(resource_pool)
            .ok_or_else(|| ResourceManagerError::UnknownJob(request.job_id.clone()))?;
        queue.retain(|queued| queued != &request.job_id);
        let anchor_index = queue
            .iter()
            .position(|queued| queued == &request.anchor1)
            .ok_or_else(|| ResourceManagerError::UnknownJob(request.anchor1.clone()))?;
        let insert_at = if ahead { anchor_index } else { anchor_index + 1 };
        queue.insert(insert_at, request.job_id.clone());
        Ok(())
    }
}

fn allocation<'a>(
    state: &'a ManagerState,
    task_id: &TaskId,
) -> ResourceManagerResult<&'a AllocationEntry> {
    state
        .allocations
        .get(task_id)
        .ok_or_else(|| ResourceManagerError::UnknownTask(task_id.clone()))
}

fn allocation_mut<'a>(
    state: &'a mut ManagerState,
    task_id: &TaskId,
) -> ResourceManagerResult<&'a mut AllocationEntry> {
    state
        .allocations
        .get_mut(task_id)
        .ok_or_else(|| ResourceManagerError::UnknownTask(task_id.clone()))
}

// Drops the task's job from its pool queue once no live allocation of the job remains.
fn dequeue(state: &mut ManagerState, task_id: &TaskId) {
    let Some((job_id, pool)) = state
        .allocations
        .get(task_id)
        .map(|entry| (entry.job_id.clone(), entry.handle.resource_pool.clone()))
    else {
        return;
    };
    let still_live = state.allocations.iter().any(|(other, entry)| {
        other != task_id && entry.job_id == job_id && !entry.terminated
    });
    if still_live {
        return;
    }
    if let Some(queue) = state.queues.get_mut(&pool) {
        queue.retain(|queued| queued != &job_id);
    }
}
