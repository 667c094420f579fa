//! The backfill action
//!
//! Fills idle capacity that cannot admit any waiting gang with single-task
//! best-effort jobs, committing each placement immediately with the
//! backfill mark so a later cycle may evict it. A starvation guard
//! suppresses the whole action for a cycle once any unschedulable job has
//! been waiting longer than the configured threshold, so opportunistic
//! tasks cannot monopolize every sliver the cluster frees.

use tracing::{debug, info, warn};

use batchlet_core::{BatchletResult, JobId};

use crate::framework::Session;

use super::{ordered_pending_tasks, select_node, Action};

pub struct BackfillAction;

/// Action builder
pub fn new() -> Box<dyn Action> {
    Box::new(BackfillAction)
}

impl Action for BackfillAction {
    fn name(&self) -> &'static str {
        "backfill"
    }

    fn execute(&self, ssn: &mut Session) -> BatchletResult<()> {
        if !ssn.enable_backfill {
            debug!("Backfill disabled");
            return Ok(());
        }

        if let Some(starving) = starving_job(ssn) {
            info!(job = %starving, "Pending job past starvation threshold, suppressing backfill this cycle");
            return Ok(());
        }

        let mut candidates: Vec<JobId> = ssn
            .state()
            .jobs
            .values()
            .filter(|j| j.min_member == 1 && j.has_pending_tasks())
            .map(|j| j.id.clone())
            .collect();
        candidates.sort_by(|a, b| {
            match (ssn.state().jobs.get(a), ssn.state().jobs.get(b)) {
                (Some(job_a), Some(job_b)) => ssn.job_order(job_a, job_b),
                _ => std::cmp::Ordering::Equal,
            }
        });

        for job_id in candidates {
            backfill_job(ssn, &job_id);
        }
        Ok(())
    }
}

/// First unschedulable job that has been pending past the threshold
fn starving_job(ssn: &Session) -> Option<JobId> {
    for job_id in ssn.unschedulable_jobs().keys() {
        let Some(job) = ssn.job(job_id) else {
            continue;
        };
        let pending_for = (ssn.now - job.creation_time).to_std().unwrap_or_default();
        if pending_for >= ssn.starvation_threshold {
            return Some(job_id.clone());
        }
    }
    None
}

/// Place whatever fits of one backfill-eligible job and commit immediately
fn backfill_job(ssn: &mut Session, job_id: &JobId) {
    let tasks = ordered_pending_tasks(ssn, job_id);
    let mut stmt = ssn.statement();
    let mut placed = 0;
    let mut failed = false;

    for task in &tasks {
        // Fit strictly within idle capacity: one backfill task must not
        // displace another that is already running.
        let Some(node_name) = select_node(stmt.session(), task) else {
            continue;
        };
        if let Err(e) = stmt.allocate(task, &node_name, true) {
            warn!(task = %task.key(), node = %node_name, error = %e, "Backfill allocation failed");
            failed = true;
            break;
        }
        placed += 1;
    }

    if failed || placed == 0 || !stmt.session().job_ready_id(job_id) {
        stmt.discard();
        return;
    }
    stmt.commit();
    info!(job = %job_id, tasks = placed, "Backfilled");
}

#[cfg(test)]
mod tests {
    use batchlet_cache::ClusterSnapshot;
    use batchlet_core::{
        ActionConfig, JobInfo, Node, NodeInfo, Pod, PodGroup, Queue, QueueInfo, Resource,
        SchedulerConfig, TaskInfo,
    };
    use std::collections::BTreeMap;

    use crate::framework::Session;
    use crate::plugins;

    use super::*;

    fn backfill_config(threshold: &str) -> SchedulerConfig {
        let mut config = SchedulerConfig::default();
        let mut options = BTreeMap::new();
        options.insert("enable".to_string(), "true".to_string());
        options.insert("starvationThreshold".to_string(), threshold.to_string());
        config.actions = vec![
            ActionConfig {
                name: "allocate".to_string(),
                options: BTreeMap::new(),
            },
            ActionConfig {
                name: "backfill".to_string(),
                options,
            },
        ];
        config
    }

    fn snapshot_with_single_task_job() -> ClusterSnapshot {
        let mut snapshot = ClusterSnapshot::default();
        snapshot.nodes.insert(
            "n1".to_string(),
            NodeInfo::new(&Node::new("n1", Resource::new(2000.0, 0.0))),
        );
        snapshot.queues.insert(
            "default".to_string(),
            QueueInfo::new(&Queue::new("default", 1)),
        );

        let mut job = JobInfo::new("ns1/bf".to_string(), "ns1", "bf");
        job.set_pod_group(&PodGroup::new("ns1", "bf", "default", 1), 0);
        let pod = Pod::new("ns1", "bf-0", Resource::new(1000.0, 0.0));
        job.add_task(TaskInfo::from_pod(&pod, job.id.clone(), 0));
        snapshot.jobs.insert(job.id.clone(), job);
        snapshot
    }

    #[test]
    fn test_backfill_disabled_commits_nothing() {
        let mut ssn = Session::open(
            snapshot_with_single_task_job(),
            &plugins::default_registry(),
            &SchedulerConfig::default(),
        )
        .unwrap();
        BackfillAction.execute(&mut ssn).unwrap();
        assert!(ssn.close().binds.is_empty());
    }

    #[test]
    fn test_backfill_marks_tasks() {
        let mut ssn = Session::open(
            snapshot_with_single_task_job(),
            &plugins::default_registry(),
            &backfill_config("30s"),
        )
        .unwrap();
        BackfillAction.execute(&mut ssn).unwrap();

        let output = ssn.close();
        assert_eq!(output.binds.len(), 1);
        assert!(output.binds[0].task.is_backfill);
    }

    #[test]
    fn test_starvation_guard_suppresses_backfill() {
        let mut snapshot = snapshot_with_single_task_job();
        // A gang that has been waiting far longer than the threshold.
        let mut big = JobInfo::new("ns1/big".to_string(), "ns1", "big");
        let mut group = PodGroup::new("ns1", "big", "default", 4);
        group.creation_time = chrono::Utc::now() - chrono::Duration::seconds(120);
        big.set_pod_group(&group, 0);
        for i in 0..4 {
            let pod = Pod::new("ns1", &format!("big-{}", i), Resource::new(2000.0, 0.0));
            big.add_task(TaskInfo::from_pod(&pod, big.id.clone(), 0));
        }
        snapshot.jobs.insert(big.id.clone(), big);

        let mut ssn = Session::open(
            snapshot,
            &plugins::default_registry(),
            &backfill_config("30s"),
        )
        .unwrap();
        ssn.mark_unschedulable(&"ns1/big".to_string(), "insufficient resources for gang");

        BackfillAction.execute(&mut ssn).unwrap();
        assert!(ssn.close().binds.is_empty());
    }

    #[test]
    fn test_backfill_idempotent_without_new_events() {
        let mut ssn = Session::open(
            snapshot_with_single_task_job(),
            &plugins::default_registry(),
            &backfill_config("30s"),
        )
        .unwrap();

        BackfillAction.execute(&mut ssn).unwrap();
        BackfillAction.execute(&mut ssn).unwrap();

        // The second run finds no pending tasks and adds nothing.
        assert_eq!(ssn.close().binds.len(), 1);
    }
}
