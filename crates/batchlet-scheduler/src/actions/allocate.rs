//! The allocate action
//!
//! Admits jobs queue by queue in admission order. A job's tasks are placed
//! into a statement; the statement commits only if the job passes gang
//! admission at the end, otherwise every tentative placement rolls back.
//! Once the highest-ranked job of a queue cannot be admitted, the queue
//! stops admitting for the cycle: letting smaller jobs jump the line would
//! starve the waiting gang, and filling leftover capacity is the backfill
//! action's business.

use tracing::{debug, info, warn};

use batchlet_core::{BatchletResult, JobId};

use crate::framework::Session;

use super::{ordered_pending_tasks, ordered_queues, pending_jobs_in_queue, select_node, Action};

pub struct AllocateAction;

/// Action builder
pub fn new() -> Box<dyn Action> {
    Box::new(AllocateAction)
}

impl Action for AllocateAction {
    fn name(&self) -> &'static str {
        "allocate"
    }

    fn execute(&self, ssn: &mut Session) -> BatchletResult<()> {
        for queue_name in ordered_queues(ssn) {
            let Some(queue) = ssn.state().queues.get(&queue_name).cloned() else {
                continue;
            };

            for job_id in pending_jobs_in_queue(ssn, &queue_name) {
                if ssn.overused(&queue) {
                    debug!(queue = %queue_name, "Queue overused, stopping admission");
                    break;
                }
                if !allocate_job(ssn, &job_id) {
                    ssn.mark_unschedulable(&job_id, "insufficient resources for gang");
                    debug!(queue = %queue_name, job = %job_id, "Head of queue cannot be admitted");
                    break;
                }
            }
        }
        Ok(())
    }
}

/// Try to admit one job. Returns whether the statement committed.
fn allocate_job(ssn: &mut Session, job_id: &JobId) -> bool {
    let tasks = ordered_pending_tasks(ssn, job_id);
    let mut stmt = ssn.statement();
    let mut failed = false;

    for task in &tasks {
        let Some(node_name) = select_node(stmt.session(), task) else {
            debug!(task = %task.key(), "No feasible node, gang cannot complete this cycle");
            break;
        };
        if let Err(e) = stmt.allocate(task, &node_name, false) {
            warn!(task = %task.key(), node = %node_name, error = %e, "Allocation failed");
            failed = true;
            break;
        }
    }

    if failed {
        stmt.discard();
        return false;
    }

    if stmt.session().job_ready_id(job_id) {
        let placed = stmt.len();
        stmt.commit();
        if placed > 0 {
            info!(job = %job_id, tasks = placed, "Job admitted");
        }
        true
    } else {
        stmt.discard();
        false
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

    fn snapshot(min_member: u32, task_count: usize) -> ClusterSnapshot {
        let mut snapshot = ClusterSnapshot::default();
        snapshot.nodes.insert(
            "n1".to_string(),
            NodeInfo::new(&Node::new("n1", Resource::new(2000.0, 0.0))),
        );
        snapshot.queues.insert(
            "default".to_string(),
            QueueInfo::new(&Queue::new("default", 1)),
        );

        let mut job = JobInfo::new("ns1/pg1".to_string(), "ns1", "pg1");
        job.set_pod_group(&PodGroup::new("ns1", "pg1", "default", min_member), 0);
        for i in 0..task_count {
            let pod = Pod::new("ns1", &format!("p{}", i), Resource::new(2000.0, 0.0));
            job.add_task(TaskInfo::from_pod(&pod, job.id.clone(), 0));
        }
        snapshot.jobs.insert(job.id.clone(), job);
        snapshot
    }

    fn open(snapshot: ClusterSnapshot) -> Session {
        Session::open(
            snapshot,
            &plugins::default_registry(),
            &SchedulerConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_single_task_job_is_admitted() {
        let mut ssn = open(snapshot(1, 1));
        AllocateAction.execute(&mut ssn).unwrap();

        let output = ssn.close();
        assert_eq!(output.binds.len(), 1);
        assert_eq!(output.binds[0].hostname, "n1");
    }

    #[test]
    fn test_incomplete_gang_rolls_back() {
        // Two 2-CPU tasks, minimum two, on a single 2-CPU node.
        let mut ssn = open(snapshot(2, 2));
        AllocateAction.execute(&mut ssn).unwrap();

        assert!(ssn.unschedulable_jobs().contains_key("ns1/pg1"));
        let node = &ssn.state().nodes["n1"];
        assert_eq!(node.idle.milli_cpu, 2000.0);

        let output = ssn.close();
        assert!(output.binds.is_empty());
    }
}
