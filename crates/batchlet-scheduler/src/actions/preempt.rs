//! The preempt action
//!
//! For jobs that allocation alone cannot admit, frees capacity by evicting
//! admissible victims and pipelines the preemptor's tasks onto the slots
//! being vacated. Victim admissibility flows through the composed
//! `Preemptable` filter; the eviction order within a node is backfill
//! tasks first, then newest first.

use tracing::{debug, warn};

use batchlet_core::{BatchletError, BatchletResult, JobId, NodeInfo, TaskInfo, TaskStatus};

use crate::framework::{Session, Statement};

use super::{ordered_pending_tasks, ordered_queues, pending_jobs_in_queue, Action};

pub struct PreemptAction;

/// Action builder
pub fn new() -> Box<dyn Action> {
    Box::new(PreemptAction)
}

impl Action for PreemptAction {
    fn name(&self) -> &'static str {
        "preempt"
    }

    fn execute(&self, ssn: &mut Session) -> BatchletResult<()> {
        for queue_name in ordered_queues(ssn) {
            for job_id in pending_jobs_in_queue(ssn, &queue_name) {
                preempt_job(ssn, &queue_name, &job_id);
            }
        }
        Ok(())
    }
}

fn preempt_job(ssn: &mut Session, queue_name: &str, job_id: &JobId) {
    let tasks = ordered_pending_tasks(ssn, job_id);
    let mut stmt = ssn.statement();
    let mut failed = false;

    for task in &tasks {
        match preempt_task(&mut stmt, queue_name, task) {
            Ok(true) => {}
            Ok(false) => {
                debug!(task = %task.key(), "No node can be vacated for task");
            }
            Err(e) => {
                warn!(task = %task.key(), error = %e, "Preemption failed");
                failed = true;
                break;
            }
        }
    }

    if failed || !stmt.session().job_ready_id(job_id) {
        stmt.discard();
        return;
    }
    if !stmt.is_empty() {
        debug!(job = %job_id, "Preemption committed");
    }
    stmt.commit();
}

/// How a task lands on a node during preemption
enum Placement {
    /// The idle pool already fits the task; no one has to go
    Idle,
    /// Evict these victims, then reserve their slots
    Vacated(Vec<TaskInfo>),
}

/// Try to make room for one task. Returns whether it was placed.
fn preempt_task(
    stmt: &mut Statement<'_>,
    queue_name: &str,
    task: &TaskInfo,
) -> BatchletResult<bool> {
    let node_names: Vec<String> = stmt.session().state().nodes.keys().cloned().collect();

    for node_name in node_names {
        let placement = {
            let ssn = stmt.session();
            let Some(node) = ssn.state().nodes.get(&node_name) else {
                continue;
            };
            if !feasible_ignoring_capacity(ssn, task, node) {
                continue;
            }
            if !task.resreq.less_equal(&node.allocatable) {
                continue;
            }
            if task.resreq.less_equal(&node.idle) {
                Placement::Idle
            } else {
                match plan_victims(ssn, task, node, queue_name) {
                    Some(victims) => Placement::Vacated(victims),
                    None => continue,
                }
            }
        };

        match placement {
            Placement::Idle => {
                stmt.allocate(task, &node_name, false)?;
            }
            Placement::Vacated(victims) => {
                for victim in &victims {
                    stmt.evict(victim, "preempted")?;
                }
                stmt.pipeline(task, &node_name)?;
            }
        }
        return Ok(true);
    }
    Ok(false)
}

/// Hard feasibility, with the capacity check waived: preemption is about
/// to change the capacity
fn feasible_ignoring_capacity(ssn: &Session, task: &TaskInfo, node: &NodeInfo) -> bool {
    match ssn.predicate(task, node) {
        Ok(()) => true,
        Err(BatchletError::InsufficientResources { .. }) => true,
        Err(_) => false,
    }
}

/// Choose the victims whose eviction leaves the node's releasing pool
/// large enough for the task's reservation. Returns `None` when no
/// admissible set suffices; returns an empty set when the pool already
/// covers the request.
fn plan_victims(
    ssn: &Session,
    task: &TaskInfo,
    node: &NodeInfo,
    queue_name: &str,
) -> Option<Vec<TaskInfo>> {
    // A pipelined reservation draws on the releasing pool alone, so the
    // plan must cover the whole request from it.
    let mut future = node.releasing.clone();
    if task.resreq.less_equal(&future) {
        return Some(Vec::new());
    }

    let candidates: Vec<TaskInfo> = node
        .tasks
        .values()
        .filter(|t| {
            matches!(
                t.status,
                TaskStatus::Allocated | TaskStatus::Bound | TaskStatus::Running
            ) && t.job != task.job
                && ssn
                    .state()
                    .jobs
                    .get(&t.job)
                    .map(|j| j.queue == queue_name)
                    .unwrap_or(false)
        })
        .cloned()
        .collect();

    let mut admissible = ssn.preemptable(task, candidates);
    // First-to-evict: backfill tasks, then the newest placements.
    admissible.sort_by(|a, b| {
        b.is_backfill
            .cmp(&a.is_backfill)
            .then_with(|| b.creation_time.cmp(&a.creation_time))
            .then_with(|| a.id.cmp(&b.id))
    });

    let mut chosen = Vec::new();
    for victim in admissible {
        if task.resreq.less_equal(&future) {
            break;
        }
        future.add(&victim.resreq);
        chosen.push(victim);
    }

    if task.resreq.less_equal(&future) {
        Some(chosen)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use batchlet_cache::ClusterSnapshot;
    use batchlet_core::{
        JobInfo, Node, NodeInfo, Pod, PodGroup, Queue, QueueInfo, Resource, SchedulerConfig,
        TaskInfo,
    };

    use crate::framework::Session;
    use crate::plugins;

    use super::*;

    /// One 1-CPU node per index; a low-priority job occupying all of them
    /// and a high-priority job of the same shape wanting in.
    fn contended_snapshot(node_count: usize) -> ClusterSnapshot {
        let mut snapshot = ClusterSnapshot::default();
        snapshot.queues.insert(
            "default".to_string(),
            QueueInfo::new(&Queue::new("default", 1)),
        );
        for i in 0..node_count {
            let node = Node::new(&format!("n{}", i), Resource::new(1000.0, 0.0));
            snapshot
                .nodes
                .insert(node.name.clone(), NodeInfo::new(&node));
        }

        let mut low = JobInfo::new("ns1/low".to_string(), "ns1", "low");
        let mut low_group = PodGroup::new("ns1", "low", "default", 1);
        low_group.priority = Some(1);
        low.set_pod_group(&low_group, 1);
        for i in 0..node_count {
            let mut pod = Pod::new("ns1", &format!("low-{}", i), Resource::new(1000.0, 0.0));
            pod.phase = batchlet_core::PodPhase::Running;
            pod.node_name = Some(format!("n{}", i));
            low.add_task(TaskInfo::from_pod(&pod, low.id.clone(), 1));
        }
        for task in low.tasks.values() {
            let node = snapshot.nodes.get_mut(task.node_name.as_ref().unwrap());
            node.unwrap().add_task(task).unwrap();
        }
        snapshot.jobs.insert(low.id.clone(), low);

        let mut high = JobInfo::new("ns1/high".to_string(), "ns1", "high");
        let mut high_group = PodGroup::new("ns1", "high", "default", 1);
        high_group.priority = Some(100);
        high.set_pod_group(&high_group, 100);
        for i in 0..node_count {
            let pod = Pod::new("ns1", &format!("high-{}", i), Resource::new(1000.0, 0.0));
            high.add_task(TaskInfo::from_pod(&pod, high.id.clone(), 100));
        }
        snapshot.jobs.insert(high.id.clone(), high);
        snapshot
    }

    #[test]
    fn test_priority_preemption_splits_cluster() {
        let mut ssn = Session::open(
            contended_snapshot(4),
            &plugins::default_registry(),
            &SchedulerConfig::default(),
        )
        .unwrap();

        PreemptAction.execute(&mut ssn).unwrap();
        let output = ssn.close();

        // DRF stops preemption once shares balance: half the low-priority
        // tasks evicted, half the high-priority tasks pipelined.
        assert_eq!(output.evictions.len(), 2);
        assert_eq!(output.pipelines.len(), 2);
        for eviction in &output.evictions {
            assert_eq!(eviction.task.job, "ns1/low");
        }
        for pipeline in &output.pipelines {
            assert_eq!(pipeline.task.job, "ns1/high");
        }
    }

    #[test]
    fn test_no_preemption_between_equal_priorities() {
        let mut snapshot = contended_snapshot(4);
        // Drop the priority gap.
        if let Some(high) = snapshot.jobs.get_mut("ns1/high") {
            high.priority = 1;
            for task in high.tasks.values_mut() {
                task.priority = 1;
            }
        }
        let mut ssn = Session::open(
            snapshot,
            &plugins::default_registry(),
            &SchedulerConfig::default(),
        )
        .unwrap();

        PreemptAction.execute(&mut ssn).unwrap();
        let output = ssn.close();
        assert!(output.evictions.is_empty());
        assert!(output.pipelines.is_empty());
    }
}
