use std::sync::Arc;
use std::time::Duration;

use ntsc_core::config::OrchestratorConfig;
use ntsc_core::models::{
    Address, CommandSpec, CoreErrorKind, ExitStatus, JobType, LifecycleState, Owner, TaskId,
    TaskState, TaskType,
};
use ntsc_core::registry::TaskRegistry;
use ntsc_core::resource_manager::{ContainerState, InMemoryResourceManager, ResourceManager};

fn owner() -> Owner {
    Owner {
        id: 1,
        username: "ada".to_string(),
        display_name: Some("Ada".to_string()),
    }
}

fn spec(image: &str) -> CommandSpec {
    let mut spec = CommandSpec::new(owner(), image, vec!["/run.sh".to_string()]);
    spec.description = format!("{image} task");
    spec
}

fn setup(
    rm: InMemoryResourceManager,
    config: OrchestratorConfig,
) -> (Arc<InMemoryResourceManager>, TaskRegistry) {
    let rm = Arc::new(rm);
    let registry = TaskRegistry::new(rm.clone(), None, &config);
    (rm, registry)
}

fn default_setup() -> (Arc<InMemoryResourceManager>, TaskRegistry) {
    setup(
        InMemoryResourceManager::new(["default"]),
        OrchestratorConfig::default(),
    )
}

fn running(port: u16) -> ContainerState {
    ContainerState::Running {
        addresses: vec![Address {
            container_ip: "10.1.0.7".to_string(),
            container_port: port,
            host_ip: "172.16.0.3".to_string(),
            host_port: port,
        }],
    }
}

#[tokio::test]
async fn shell_moves_through_lifecycle_and_becomes_ready_on_banner() {
    let (rm, registry) = default_setup();
    let mut shell_spec = spec("shell-image");
    shell_spec.context_directory = vec![0x1f, 0x8b, 0x08];

    let created = registry
        .create(TaskType::Shell, JobType::Shell, shell_spec)
        .await
        .unwrap();
    assert_eq!(created.lifecycle, LifecycleState::Pending);
    assert_eq!(created.state, TaskState::Queued);
    assert_eq!(created.resource_pool(), "default");
    assert_eq!(
        created.service_address,
        format!("/proxy/{}/", created.task_id)
    );
    let task_id = created.task_id.clone();

    rm.assign(&task_id).unwrap();
    let assigned = registry.get(&task_id, TaskType::Shell).await.unwrap();
    assert_eq!(assigned.summary.lifecycle, LifecycleState::Assigned);
    assert_eq!(assigned.summary.state, TaskState::Queued);

    let started = rm.started_spec(&task_id).expect("container should be started");
    assert_eq!(started.image, "shell-image");
    assert_eq!(started.context_directory, vec![0x1f, 0x8b, 0x08]);
    assert!(assigned.spec.context_directory.is_empty());

    rm.container_state(&task_id, ContainerState::Pulling).unwrap();
    rm.container_state(&task_id, running(2222)).unwrap();
    let starting = registry.get(&task_id, TaskType::Shell).await.unwrap().summary;
    assert_eq!(starting.state, TaskState::Starting);
    assert_eq!(starting.addresses.len(), 1);
    assert!(!starting.ready);

    rm.container_log(&task_id, "Server listening on 0.0.0.0 port 2222.")
        .unwrap();
    let ready = registry.get(&task_id, TaskType::Shell).await.unwrap().summary;
    assert_eq!(ready.state, TaskState::Running);
    assert!(ready.ready);
}

#[tokio::test]
async fn repeated_reads_are_stable() {
    let (_, registry) = default_setup();
    let created = registry
        .create(TaskType::Notebook, JobType::Notebook, spec("notebook"))
        .await
        .unwrap();

    let first = registry.get(&created.task_id, TaskType::Notebook).await.unwrap();
    let second = registry.get(&created.task_id, TaskType::Notebook).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn command_runs_once_its_container_is_running() {
    let (rm, registry) = default_setup();
    let created = registry
        .create(TaskType::Command, JobType::Command, spec("command"))
        .await
        .unwrap();

    rm.assign(&created.task_id).unwrap();
    rm.container_state(&created.task_id, running(8080)).unwrap();

    let summary = registry
        .get(&created.task_id, TaskType::Command)
        .await
        .unwrap()
        .summary;
    assert_eq!(summary.state, TaskState::Running);
    assert!(summary.ready);
}

#[tokio::test]
async fn kill_waits_for_acknowledgement_then_terminates_on_report() {
    let (rm, registry) = default_setup();
    let created = registry
        .create(TaskType::Command, JobType::Command, spec("command"))
        .await
        .unwrap();
    rm.assign(&created.task_id).unwrap();
    rm.container_state(&created.task_id, running(8080)).unwrap();

    registry
        .kill(&created.task_id, TaskType::Command)
        .await
        .unwrap();
    assert_eq!(
        rm.terminate_requests(),
        vec![(created.task_id.clone(), true)]
    );

    let summary = registry
        .get(&created.task_id, TaskType::Command)
        .await
        .unwrap()
        .summary;
    assert_eq!(summary.state, TaskState::Terminated);
    assert!(summary.exit_status.is_some());

    // The allocation is gone with the container, so nothing can revive the task.
    assert!(!rm.holds_allocation(&created.task_id));
    assert!(rm.container_state(&created.task_id, running(8080)).is_err());
    let again = registry
        .get(&created.task_id, TaskType::Command)
        .await
        .unwrap()
        .summary;
    assert_eq!(again.state, TaskState::Terminated);
}

#[tokio::test]
async fn killing_before_scheduling_reports_never_scheduled() {
    let (_, registry) = default_setup();
    let created = registry
        .create(TaskType::Tensorboard, JobType::Tensorboard, spec("tb"))
        .await
        .unwrap();

    registry
        .kill(&created.task_id, TaskType::Tensorboard)
        .await
        .unwrap();
    let summary = registry
        .get(&created.task_id, TaskType::Tensorboard)
        .await
        .unwrap()
        .summary;

    assert_eq!(summary.lifecycle, LifecycleState::Terminated);
    assert_eq!(summary.exit_status, Some(ExitStatus::never_scheduled()));
}

#[tokio::test]
async fn terminated_task_is_dropped_after_retention() {
    let config = OrchestratorConfig {
        terminated_retention: Duration::from_millis(50),
        ..OrchestratorConfig::default()
    };
    let (rm, registry) = setup(InMemoryResourceManager::new(["default"]), config);
    let created = registry
        .create(TaskType::Shell, JobType::Shell, spec("shell"))
        .await
        .unwrap();
    assert_eq!(registry.len().unwrap(), 1);

    rm.abort(&created.task_id).unwrap();

    let mut gone = false;
    for _ in 0..100 {
        match registry.get(&created.task_id, TaskType::Shell).await {
            Err(error) if error.kind == CoreErrorKind::NotFound => {
                gone = true;
                break;
            }
            _ => tokio::time::sleep(Duration::from_millis(20)).await,
        }
    }
    assert!(gone, "terminated task should be garbage collected");
    assert!(registry.is_empty().unwrap());
    assert!(!rm.holds_allocation(&created.task_id));
}

#[tokio::test]
async fn lifecycle_changes_are_broadcast() {
    let (rm, registry) = default_setup();
    let mut events = registry.subscribe();
    let created = registry
        .create(TaskType::Shell, JobType::Shell, spec("shell"))
        .await
        .unwrap();

    rm.assign(&created.task_id).unwrap();
    let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(event.task_id, created.task_id);
    assert_eq!(event.state, LifecycleState::Assigned);
    assert!(!event.ready);
}

#[tokio::test]
async fn unsupported_group_settings_are_kept_locally() {
    let (_, registry) = setup(
        InMemoryResourceManager::new(["default"]).without_group_controls(),
        OrchestratorConfig::default(),
    );
    let created = registry
        .create(TaskType::Notebook, JobType::Notebook, spec("notebook"))
        .await
        .unwrap();

    let summary = registry
        .set_priority(&created.task_id, TaskType::Notebook, 7)
        .await
        .unwrap();
    assert_eq!(summary.resources.priority, Some(7));

    let summary = registry
        .set_weight(&created.task_id, TaskType::Notebook, 3.0)
        .await
        .unwrap();
    assert_eq!(summary.resources.weight, 3.0);
}

#[tokio::test]
async fn failed_priority_change_leaves_task_unchanged() {
    let (rm, registry) = default_setup();
    let created = registry
        .create(TaskType::Notebook, JobType::Notebook, spec("notebook"))
        .await
        .unwrap();

    rm.fail_next("set_group_priority", "scheduler unavailable");
    let error = registry
        .set_priority(&created.task_id, TaskType::Notebook, 7)
        .await
        .unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::ResourceManagerFailure);
    assert_eq!(error.task_id, Some(created.task_id.clone()));

    let summary = registry
        .get(&created.task_id, TaskType::Notebook)
        .await
        .unwrap()
        .summary;
    assert_eq!(summary.resources.priority, None);

    registry
        .set_priority(&created.task_id, TaskType::Notebook, 7)
        .await
        .unwrap();
    let job_id = summary.job_id;
    assert_eq!(rm.group_priority(&job_id), Some(7));
}

#[tokio::test]
async fn priority_above_admin_limit_is_rejected() {
    let config = OrchestratorConfig {
        priority_limit: Some(10),
        ..OrchestratorConfig::default()
    };
    let (_, registry) = setup(InMemoryResourceManager::new(["default"]), config);
    let created = registry
        .create(TaskType::Shell, JobType::Shell, spec("shell"))
        .await
        .unwrap();

    let error = registry
        .set_priority(&created.task_id, TaskType::Shell, 5)
        .await
        .unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::PolicyViolation);
    assert_eq!(
        error.message,
        "requested priority [5] exceeds limit set by admin [10]"
    );

    let mut too_high = spec("shell");
    too_high.resources.priority = Some(1);
    let error = registry
        .create(TaskType::Shell, JobType::Shell, too_high)
        .await
        .unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::PolicyViolation);
    assert_eq!(registry.len().unwrap(), 1);
}

#[tokio::test]
async fn launched_task_cannot_change_resource_pool() {
    let (_, registry) = default_setup();
    let created = registry
        .create(TaskType::Command, JobType::Command, spec("command"))
        .await
        .unwrap();

    let error = registry
        .set_resource_pool(&created.task_id, TaskType::Command, "gpu")
        .await
        .unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::Unsupported);
}

#[tokio::test]
async fn refused_allocation_fails_creation_and_unregisters() {
    let (rm, registry) = default_setup();
    rm.fail_next("allocate", "pool is draining");

    let error = registry
        .create(TaskType::Command, JobType::Command, spec("command"))
        .await
        .unwrap_err();

    assert_eq!(error.kind, CoreErrorKind::ResourceManagerFailure);
    assert!(error.message.contains("pool is draining"));
    assert!(registry.is_empty().unwrap());
}

#[tokio::test]
async fn unknown_resource_pool_fails_creation() {
    let (_, registry) = default_setup();
    let mut gpu = spec("command");
    gpu.resources.resource_pool = "gpu".to_string();

    let error = registry
        .create(TaskType::Command, JobType::Command, gpu)
        .await
        .unwrap_err();

    assert_eq!(error.kind, CoreErrorKind::ResourceManagerFailure);
    assert!(error.task_id.is_some());
    assert!(registry.is_empty().unwrap());

    let missing = registry
        .get(&TaskId::from("missing"), TaskType::Command)
        .await
        .unwrap_err();
    assert_eq!(missing.kind, CoreErrorKind::NotFound);
}

#[tokio::test]
async fn failed_kill_is_reported_and_task_keeps_running() {
    let (rm, registry) = default_setup();
    let created = registry
        .create(TaskType::Command, JobType::Command, spec("command"))
        .await
        .unwrap();
    rm.assign(&created.task_id).unwrap();
    rm.container_state(&created.task_id, running(8080)).unwrap();

    rm.fail_next("terminate_task", "agent unreachable");
    let error = registry
        .kill(&created.task_id, TaskType::Command)
        .await
        .unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::ResourceManagerFailure);
    assert!(error.message.contains("agent unreachable"));

    let summary = registry
        .get(&created.task_id, TaskType::Command)
        .await
        .unwrap()
        .summary;
    assert_eq!(summary.state, TaskState::Running);
    assert_eq!(summary.exit_status, None);
    assert!(rm.holds_allocation(&created.task_id));
}

#[tokio::test]
async fn container_that_fails_to_start_terminates_the_task() {
    let (rm, registry) = default_setup();
    let created = registry
        .create(TaskType::Shell, JobType::Shell, spec("shell"))
        .await
        .unwrap();

    rm.fail_next("start", "image pull secret missing");
    rm.assign(&created.task_id).unwrap();

    let summary = registry
        .get(&created.task_id, TaskType::Shell)
        .await
        .unwrap()
        .summary;
    assert_eq!(summary.lifecycle, LifecycleState::Terminated);
    let failure = summary
        .exit_status
        .and_then(|status| status.failure)
        .unwrap();
    assert!(failure.contains("image pull secret missing"));

    assert!(!rm.holds_allocation(&created.task_id));
    assert!(rm.get_job_queue("default").unwrap().is_empty());
}

#[tokio::test]
async fn failed_weight_change_leaves_task_unchanged() {
    let (rm, registry) = default_setup();
    let created = registry
        .create(TaskType::Notebook, JobType::Notebook, spec("notebook"))
        .await
        .unwrap();

    rm.fail_next("set_group_weight", "scheduler unavailable");
    let error = registry
        .set_weight(&created.task_id, TaskType::Notebook, 3.0)
        .await
        .unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::ResourceManagerFailure);

    let summary = registry
        .get(&created.task_id, TaskType::Notebook)
        .await
        .unwrap()
        .summary;
    assert_eq!(summary.resources.weight, 1.0);
    assert_eq!(rm.group_weight(&created.job_id), Some(1.0));
}

#[tokio::test]
async fn admin_limit_follows_the_managers_priority_direction() {
    let config = OrchestratorConfig {
        priority_limit: Some(10),
        ..OrchestratorConfig::default()
    };
    let (_, registry) = setup(
        InMemoryResourceManager::new(["default"]).larger_value_is_higher_priority(),
        config,
    );
    let created = registry
        .create(TaskType::Shell, JobType::Shell, spec("shell"))
        .await
        .unwrap();

    let error = registry
        .set_priority(&created.task_id, TaskType::Shell, 20)
        .await
        .unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::PolicyViolation);

    let summary = registry
        .set_priority(&created.task_id, TaskType::Shell, 5)
        .await
        .unwrap();
    assert_eq!(summary.resources.priority, Some(5));
}
