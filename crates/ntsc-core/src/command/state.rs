use crate::models::{Address, ExitStatus, LifecycleState};
use crate::readiness::ReadinessChecks;
use crate::resource_manager::{AllocationEvent, ContainerState};

/// The event-driven part of a task: lifecycle, readiness, addresses and exit status.
#[derive(Clone, Debug)]
pub struct CommandState {
    lifecycle: LifecycleState,
    readiness: ReadinessChecks,
    ready: bool,
    addresses: Vec<Address>,
    exit_status: Option<ExitStatus>,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct StateChange {
    pub changed: bool,
    pub became_ready: bool,
    pub terminated: bool,
}

impl CommandState {
    pub fn new(readiness: ReadinessChecks) -> Self {
        Self {
            lifecycle: LifecycleState::Pending,
            readiness,
            ready: false,
            addresses: Vec::new(),
            exit_status: None,
        }
    }

    pub fn lifecycle(&self) -> LifecycleState {
        self.lifecycle
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn addresses(&self) -> &[Address] {
        &self.addresses
    }

    pub fn exit_status(&self) -> Option<&ExitStatus> {
        self.exit_status.as_ref()
    }

    pub fn apply(&mut self, event: &AllocationEvent) -> StateChange {
        if self.lifecycle.is_terminal() {
            return StateChange::default();
        }

        match event {
            AllocationEvent::Assigned => self.advance(LifecycleState::Assigned),
            AllocationEvent::ContainerStateChanged(ContainerState::Pulling) => {
                self.advance(LifecycleState::Pulling)
            }
            AllocationEvent::ContainerStateChanged(ContainerState::Starting) => {
                self.advance(LifecycleState::Starting)
            }
            AllocationEvent::ContainerStateChanged(ContainerState::Running { addresses }) => {
                self.addresses = addresses.clone();
                // Nothing to wait for: the service is up as soon as the container is.
                if self.readiness.is_ready() && !self.ready {
                    self.ready = true;
                    let mut change = self.advance(LifecycleState::Running);
                    change.became_ready = true;
                    change.changed = true;
                    return change;
                }
                let target = if self.ready {
                    LifecycleState::Running
                } else {
                    LifecycleState::Starting
                };
                self.advance(target)
            }
            AllocationEvent::ContainerStateChanged(ContainerState::Terminated(status)) => {
                self.terminate(status.clone())
            }
            AllocationEvent::ContainerLog(line) => self.observe_log(line),
            AllocationEvent::Aborted => self.terminate(ExitStatus::never_scheduled()),
        }
    }

    fn observe_log(&mut self, line: &str) -> StateChange {
        if self.ready {
            return StateChange::default();
        }
        let matched = self.readiness.observe(line);
        if matched.is_empty() || !self.readiness.is_ready() {
            return StateChange::default();
        }
        self.ready = true;
        let mut change = self.advance(LifecycleState::Running);
        change.changed = true;
        change.became_ready = true;
        change
    }

    fn terminate(&mut self, status: ExitStatus) -> StateChange {
        self.exit_status = Some(status);
        self.lifecycle = LifecycleState::Terminated;
        StateChange {
            changed: true,
            became_ready: false,
            terminated: true,
        }
    }

    /// Moves forward to `target`; an event implying an earlier state is ignored.
    fn advance(&mut self, target: LifecycleState) -> StateChange {
        if target <= self.lifecycle {
            tracing::debug!(
                current = ?self.lifecycle,
                reported = ?target,
                "ignoring lifecycle update that does not move the task forward"
            );
            return StateChange::default();
        }
        self.lifecycle = target;
        StateChange {
            changed: true,
            ..StateChange::default()
        }
    }
}
