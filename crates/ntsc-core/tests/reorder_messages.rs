use std::time::SystemTime;

use ntsc_core::jobs::{MoveJobMessages, move_job_messages};
use ntsc_core::models::{Job, JobId, JobType, MoveJob, QueueAnchor, SetJobPriority};

fn queue(priorities: &[i32]) -> Vec<Job> {
    priorities
        .iter()
        .enumerate()
        .map(|(index, priority)| Job {
            job_id: JobId(format!("job{index}")),
            job_type: JobType::Experiment,
            name: format!("job{index}"),
            username: "admin".to_string(),
            user_id: 1,
            resource_pool: "default".to_string(),
            submission_time: SystemTime::UNIX_EPOCH,
            priority: *priority,
            weight: 1.0,
            summary: None,
            requested_slots: 1,
            allocated_slots: 0,
        })
        .collect()
}

fn moved(job_id: &str, anchor1: &str, anchor2: QueueAnchor) -> Option<MoveJob> {
    Some(MoveJob {
        job_id: JobId::from(job_id),
        anchor1: JobId::from(anchor1),
        anchor2,
    })
}

#[test]
fn moving_ahead_uses_previous_job_as_second_anchor() {
    let jobs = queue(&[42, 42, 42, 42]);
    let messages = move_job_messages(&jobs, &jobs[2], &jobs[1], 1, true).unwrap();

    assert_eq!(messages.priority, None);
    assert_eq!(
        messages.position,
        moved("job2", "job1", QueueAnchor::Job(JobId::from("job0")))
    );
}

#[test]
fn moving_behind_uses_next_job_as_second_anchor() {
    let jobs = queue(&[42, 42, 42, 42]);
    let messages = move_job_messages(&jobs, &jobs[1], &jobs[2], 2, false).unwrap();

    assert_eq!(messages.priority, None);
    assert_eq!(
        messages.position,
        moved("job1", "job2", QueueAnchor::Job(JobId::from("job3")))
    );
}

#[test]
fn moving_behind_the_last_job_anchors_on_tail() {
    let jobs = queue(&[42, 42, 42, 42]);
    let messages = move_job_messages(&jobs, &jobs[1], &jobs[3], 3, false).unwrap();

    assert_eq!(messages.position, moved("job1", "job3", QueueAnchor::Tail));
}

#[test]
fn moving_ahead_of_the_first_job_anchors_on_head() {
    let jobs = queue(&[42, 42, 42, 42]);
    let messages = move_job_messages(&jobs, &jobs[3], &jobs[0], 0, true).unwrap();

    assert_eq!(messages.position, moved("job3", "job0", QueueAnchor::Head));
}

#[test]
fn moving_a_job_relative_to_itself_does_nothing() {
    let jobs = queue(&[42, 42, 42, 42]);
    let messages = move_job_messages(&jobs, &jobs[0], &jobs[0], 0, true).unwrap();

    assert_eq!(messages, MoveJobMessages::default());
    assert!(messages.is_empty());
}

#[test]
fn job_already_in_place_does_nothing() {
    let jobs = queue(&[42, 42, 42, 42]);
    let messages = move_job_messages(&jobs, &jobs[0], &jobs[1], 1, true).unwrap();

    assert!(messages.is_empty());
}

#[test]
fn neighbour_in_another_lane_is_replaced_by_tail() {
    let jobs = queue(&[1, 1, 2, 2]);
    let messages = move_job_messages(&jobs, &jobs[0], &jobs[1], 1, false).unwrap();

    assert_eq!(messages.priority, None);
    assert_eq!(messages.position, moved("job0", "job1", QueueAnchor::Tail));
}

#[test]
fn crossing_lanes_changes_priority_before_moving() {
    let jobs = queue(&[1, 1, 2, 2]);
    let messages = move_job_messages(&jobs, &jobs[2], &jobs[1], 1, true).unwrap();

    assert_eq!(
        messages.priority,
        Some(SetJobPriority {
            job_id: JobId::from("job2"),
            priority: 1,
        })
    );
    assert_eq!(
        messages.position,
        moved("job2", "job1", QueueAnchor::Job(JobId::from("job0")))
    );
}

#[test]
fn neighbour_in_another_lane_ahead_is_replaced_by_head() {
    let jobs = queue(&[1, 1, 2, 2]);
    let messages = move_job_messages(&jobs, &jobs[3], &jobs[2], 2, true).unwrap();

    assert_eq!(messages.priority, None);
    assert_eq!(messages.position, moved("job3", "job2", QueueAnchor::Head));
}
