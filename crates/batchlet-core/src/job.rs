//! Job-level snapshot state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::cluster::PodGroup;
use crate::resource::Resource;
use crate::task::{JobId, TaskId, TaskInfo, TaskStatus};

/// Snapshot state for one pod group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInfo {
    /// Stable `namespace/group-name` identifier
    pub id: JobId,
    /// Group name
    pub name: String,
    /// Namespace
    pub namespace: String,
    /// Queue the job is submitted to
    pub queue: String,
    /// Minimum member count for gang admission
    pub min_member: u32,
    /// Effective job priority
    pub priority: i32,
    /// Creation timestamp, from the pod group when one exists
    pub creation_time: DateTime<Utc>,
    /// Member tasks keyed by task id
    pub tasks: BTreeMap<TaskId, TaskInfo>,
    /// The raw pod group object, absent for shell jobs created from pods
    /// that arrived before their group
    pub pod_group: Option<PodGroup>,
}

impl JobInfo {
    /// Create an empty job; fields are refined when the pod group arrives
    pub fn new(id: JobId, namespace: &str, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            namespace: namespace.to_string(),
            queue: "default".to_string(),
            min_member: 1,
            priority: 0,
            creation_time: Utc::now(),
            tasks: BTreeMap::new(),
            pod_group: None,
        }
    }

    /// Attach the pod group, taking over queue, membership and timing
    pub fn set_pod_group(&mut self, pod_group: &PodGroup, priority: i32) {
        self.queue = if pod_group.queue.is_empty() {
            "default".to_string()
        } else {
            pod_group.queue.clone()
        };
        self.min_member = pod_group.min_member;
        self.priority = priority;
        self.creation_time = pod_group.creation_time;
        self.pod_group = Some(pod_group.clone());
    }

    /// Insert or replace a member task
    pub fn add_task(&mut self, task: TaskInfo) {
        self.tasks.insert(task.id.clone(), task);
    }

    /// Remove a member task by id
    pub fn remove_task(&mut self, task_id: &TaskId) -> Option<TaskInfo> {
        self.tasks.remove(task_id)
    }

    /// Number of tasks whose status counts toward readiness
    pub fn ready_task_count(&self) -> u32 {
        self.tasks
            .values()
            .filter(|t| t.status.counts_toward_ready())
            .count() as u32
    }

    /// The gang admission predicate: enough members are placed or running
    pub fn is_ready(&self) -> bool {
        self.ready_task_count() >= self.min_member
    }

    /// Whether any member still waits for a placement decision
    pub fn has_pending_tasks(&self) -> bool {
        self.tasks.values().any(|t| t.status == TaskStatus::Pending)
    }

    /// Member tasks waiting for a placement decision
    pub fn pending_tasks(&self) -> Vec<&TaskInfo> {
        self.tasks
            .values()
            .filter(|t| t.status == TaskStatus::Pending)
            .collect()
    }

    /// Total resources currently held by placed members
    pub fn allocated(&self) -> Resource {
        let mut total = Resource::empty();
        for task in self.tasks.values() {
            if task.status.counts_toward_ready() {
                total.add(&task.resreq);
            }
        }
        total
    }

    /// Total resources requested by all members
    pub fn requested(&self) -> Resource {
        let mut total = Resource::empty();
        for task in self.tasks.values() {
            total.add(&task.resreq);
        }
        total
    }
}

impl fmt::Display for JobInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Job {}: queue {}, minMember {}, tasks {} ({} ready)",
            self.id,
            self.queue,
            self.min_member,
            self.tasks.len(),
            self.ready_task_count()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::Pod;

    fn pending_task(name: &str, job: &str) -> TaskInfo {
        let pod = Pod::new("ns1", name, Resource::new(1000.0, 0.0));
        TaskInfo::from_pod(&pod, job.to_string(), 0)
    }

    #[test]
    fn test_readiness() {
        let mut job = JobInfo::new("ns1/pg1".to_string(), "ns1", "pg1");
        job.min_member = 2;

        job.add_task(pending_task("p1", "ns1/pg1"));
        job.add_task(pending_task("p2", "ns1/pg1"));
        assert!(!job.is_ready());

        let ids: Vec<TaskId> = job.tasks.keys().cloned().collect();
        job.tasks.get_mut(&ids[0]).unwrap().status = TaskStatus::Allocated;
        assert_eq!(job.ready_task_count(), 1);
        assert!(!job.is_ready());

        job.tasks.get_mut(&ids[1]).unwrap().status = TaskStatus::Pipelined;
        assert!(job.is_ready());
    }

    #[test]
    fn test_set_pod_group() {
        let mut job = JobInfo::new("ns1/pg1".to_string(), "ns1", "pg1");
        let pg = PodGroup::new("ns1", "pg1", "q1", 3);
        job.set_pod_group(&pg, 7);
        assert_eq!(job.queue, "q1");
        assert_eq!(job.min_member, 3);
        assert_eq!(job.priority, 7);
    }

    #[test]
    fn test_allocated_tracks_placed_tasks_only() {
        let mut job = JobInfo::new("ns1/pg1".to_string(), "ns1", "pg1");
        job.add_task(pending_task("p1", "ns1/pg1"));
        job.add_task(pending_task("p2", "ns1/pg1"));
        assert!(job.allocated().is_empty());

        let ids: Vec<TaskId> = job.tasks.keys().cloned().collect();
        job.tasks.get_mut(&ids[0]).unwrap().status = TaskStatus::Running;
        assert_eq!(job.allocated().milli_cpu, 1000.0);
        assert_eq!(job.requested().milli_cpu, 2000.0);
    }

    #[test]
    fn test_pending_tasks() {
        let mut job = JobInfo::new("ns1/pg1".to_string(), "ns1", "pg1");
        job.add_task(pending_task("p1", "ns1/pg1"));
        assert!(job.has_pending_tasks());
        assert_eq!(job.pending_tasks().len(), 1);
    }
}
