//! Gang admission

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use batchlet_core::{JobId, JobInfo, TaskId, TaskInfo, TaskStatus};

use crate::framework::{Plugin, SessionState};

/// All-or-nothing admission of a job's minimum membership.
///
/// Readiness counts placed, running, and already-succeeded members; jobs
/// that have not met their minimum yet are ranked ahead of jobs that have,
/// and victims whose eviction would break a satisfied gang are filtered
/// out of preemption.
pub struct GangPlugin;

/// Plugin builder
pub fn new(_arguments: &BTreeMap<String, String>) -> Box<dyn Plugin> {
    Box::new(GangPlugin)
}

fn occupied_count(job: &JobInfo) -> u32 {
    job.tasks
        .values()
        .filter(|t| t.status.counts_toward_ready() || t.status == TaskStatus::Succeeded)
        .count() as u32
}

fn gang_ready(job: &JobInfo) -> bool {
    occupied_count(job) >= job.min_member
}

impl Plugin for GangPlugin {
    fn name(&self) -> &'static str {
        "gang"
    }

    fn job_ready(&self, job: &JobInfo) -> Option<bool> {
        Some(gang_ready(job))
    }

    fn job_order(&self, a: &JobInfo, b: &JobInfo) -> Option<Ordering> {
        match (gang_ready(a), gang_ready(b)) {
            (false, true) => Some(Ordering::Less),
            (true, false) => Some(Ordering::Greater),
            _ => Some(Ordering::Equal),
        }
    }

    fn preemptable(
        &self,
        state: &SessionState,
        _preemptor: &TaskInfo,
        victims: &[&TaskInfo],
    ) -> Option<Vec<TaskId>> {
        // Walk the victims with a running count per job so one call cannot
        // carve a gang below its minimum membership.
        let mut occupied: HashMap<JobId, u32> = HashMap::new();
        let mut allowed = Vec::new();
        for victim in victims {
            let Some(job) = state.jobs.get(&victim.job) else {
                continue;
            };
            let count = occupied
                .entry(victim.job.clone())
                .or_insert_with(|| occupied_count(job));
            if *count > job.min_member {
                *count -= 1;
                allowed.push(victim.id.clone());
            }
        }
        Some(allowed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchlet_core::{Pod, Resource};

    fn job_with_tasks(name: &str, min_member: u32, statuses: &[TaskStatus]) -> JobInfo {
        let mut job = JobInfo::new(format!("ns1/{}", name), "ns1", name);
        job.min_member = min_member;
        for (i, status) in statuses.iter().enumerate() {
            let pod = Pod::new("ns1", &format!("{}-{}", name, i), Resource::new(1000.0, 0.0));
            let mut task = TaskInfo::from_pod(&pod, job.id.clone(), 0);
            task.status = *status;
            job.add_task(task);
        }
        job
    }

    #[test]
    fn test_ready_counts_succeeded() {
        let plugin = GangPlugin;
        let job = job_with_tasks(
            "pg1",
            2,
            &[TaskStatus::Succeeded, TaskStatus::Running, TaskStatus::Pending],
        );
        assert_eq!(plugin.job_ready(&job), Some(true));

        let not_ready = job_with_tasks("pg2", 2, &[TaskStatus::Pending, TaskStatus::Pending]);
        assert_eq!(plugin.job_ready(&not_ready), Some(false));
    }

    #[test]
    fn test_not_ready_jobs_rank_first() {
        let plugin = GangPlugin;
        let ready = job_with_tasks("ready", 1, &[TaskStatus::Running]);
        let waiting = job_with_tasks("waiting", 1, &[TaskStatus::Pending]);
        assert_eq!(plugin.job_order(&waiting, &ready), Some(Ordering::Less));
        assert_eq!(plugin.job_order(&ready, &waiting), Some(Ordering::Greater));
        assert_eq!(plugin.job_order(&ready, &ready), Some(Ordering::Equal));
    }

    #[test]
    fn test_preemptable_protects_min_member() {
        let plugin = GangPlugin;
        let victim_job = job_with_tasks(
            "victims",
            2,
            &[TaskStatus::Running, TaskStatus::Running, TaskStatus::Running],
        );
        let mut state = SessionState::default();
        let victims: Vec<TaskInfo> = victim_job.tasks.values().cloned().collect();
        state.jobs.insert(victim_job.id.clone(), victim_job);

        let preemptor_pod = Pod::new("ns1", "p", Resource::new(1000.0, 0.0));
        let preemptor = TaskInfo::from_pod(&preemptor_pod, "ns1/other".to_string(), 0);

        let refs: Vec<&TaskInfo> = victims.iter().collect();
        let allowed = plugin.preemptable(&state, &preemptor, &refs).unwrap();
        // Three running members, minimum two: exactly one may go.
        assert_eq!(allowed.len(), 1);
    }
}
