//! Task-level snapshot state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::cluster::{Pod, PodPhase};
use crate::resource::Resource;

/// Unique task identifier (the pod UID)
pub type TaskId = String;

/// Unique job identifier (`namespace/group-name`)
pub type JobId = String;

/// Scheduling status of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting for a placement decision
    Pending,
    /// Tentatively placed by the session, not yet bound
    Allocated,
    /// Reserved onto a slot whose current occupant is releasing
    Pipelined,
    /// Bound to a node by the orchestrator
    Bound,
    /// Running on its node
    Running,
    /// Being evicted or deleted; its resources free up soon
    Releasing,
    /// Finished successfully
    Succeeded,
    /// Finished in failure
    Failed,
    /// Status could not be determined
    Unknown,
}

impl TaskStatus {
    /// Whether a task in this status counts toward its job's readiness
    pub fn counts_toward_ready(self) -> bool {
        matches!(
            self,
            TaskStatus::Allocated | TaskStatus::Pipelined | TaskStatus::Bound | TaskStatus::Running
        )
    }

    /// Whether a task in this status holds node bookkeeping entries
    pub fn occupies_node(self) -> bool {
        matches!(
            self,
            TaskStatus::Allocated
                | TaskStatus::Pipelined
                | TaskStatus::Bound
                | TaskStatus::Running
                | TaskStatus::Releasing
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskStatus::Pending => "Pending",
            TaskStatus::Allocated => "Allocated",
            TaskStatus::Pipelined => "Pipelined",
            TaskStatus::Bound => "Bound",
            TaskStatus::Running => "Running",
            TaskStatus::Releasing => "Releasing",
            TaskStatus::Succeeded => "Succeeded",
            TaskStatus::Failed => "Failed",
            TaskStatus::Unknown => "Unknown",
        };
        write!(f, "{}", name)
    }
}

/// Snapshot state for one pod
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInfo {
    /// Pod UID
    pub id: TaskId,
    /// Pod name
    pub name: String,
    /// Namespace
    pub namespace: String,
    /// Owning job
    pub job: JobId,
    /// Assigned node, if any
    pub node_name: Option<String>,
    /// Current status
    pub status: TaskStatus,
    /// Resource request
    pub resreq: Resource,
    /// Effective priority, resolved from the pod or its priority class
    pub priority: i32,
    /// Whether the task was placed opportunistically into idle capacity
    pub is_backfill: bool,
    /// Node selector constraints carried over from the pod
    pub node_selector: BTreeMap<String, String>,
    /// Taint keys the task tolerates
    pub tolerations: Vec<String>,
    /// Creation timestamp of the pod
    pub creation_time: DateTime<Utc>,
}

impl TaskInfo {
    /// Build a task from a pod, deriving status from phase and assignment
    pub fn from_pod(pod: &Pod, job: JobId, priority: i32) -> Self {
        let status = if pod.deleting {
            TaskStatus::Releasing
        } else {
            match pod.phase {
                PodPhase::Running => TaskStatus::Running,
                PodPhase::Succeeded => TaskStatus::Succeeded,
                PodPhase::Failed => TaskStatus::Failed,
                PodPhase::Unknown => TaskStatus::Unknown,
                PodPhase::Pending => {
                    if pod.node_name.is_some() {
                        TaskStatus::Bound
                    } else {
                        TaskStatus::Pending
                    }
                }
            }
        };

        Self {
            id: pod.uid.clone(),
            name: pod.name.clone(),
            namespace: pod.namespace.clone(),
            job,
            node_name: pod.node_name.clone(),
            status,
            resreq: pod.resreq.clone(),
            priority,
            is_backfill: pod.backfill,
            node_selector: pod.node_selector.clone(),
            tolerations: pod.tolerations.clone(),
            creation_time: pod.creation_time,
        }
    }

    /// Stable `namespace/name` key
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

impl fmt::Display for TaskInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Task {} ({}): job {}, status {}, resreq <{}>",
            self.key(),
            self.id,
            self.job,
            self.status,
            self.resreq
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_pending_pod() {
        let pod = Pod::new("ns1", "p1", Resource::new(1000.0, 0.0));
        let task = TaskInfo::from_pod(&pod, "ns1/pg1".to_string(), 0);
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.key(), "ns1/p1");
    }

    #[test]
    fn test_status_from_assigned_pod() {
        let mut pod = Pod::new("ns1", "p1", Resource::new(1000.0, 0.0));
        pod.node_name = Some("n1".to_string());
        let task = TaskInfo::from_pod(&pod, "ns1/pg1".to_string(), 0);
        assert_eq!(task.status, TaskStatus::Bound);

        pod.phase = PodPhase::Running;
        let task = TaskInfo::from_pod(&pod, "ns1/pg1".to_string(), 0);
        assert_eq!(task.status, TaskStatus::Running);
    }

    #[test]
    fn test_status_from_deleting_pod() {
        let mut pod = Pod::new("ns1", "p1", Resource::new(1000.0, 0.0));
        pod.node_name = Some("n1".to_string());
        pod.phase = PodPhase::Running;
        pod.deleting = true;
        let task = TaskInfo::from_pod(&pod, "ns1/pg1".to_string(), 0);
        assert_eq!(task.status, TaskStatus::Releasing);
    }

    #[test]
    fn test_ready_statuses() {
        assert!(TaskStatus::Allocated.counts_toward_ready());
        assert!(TaskStatus::Pipelined.counts_toward_ready());
        assert!(TaskStatus::Bound.counts_toward_ready());
        assert!(TaskStatus::Running.counts_toward_ready());
        assert!(!TaskStatus::Pending.counts_toward_ready());
        assert!(!TaskStatus::Releasing.counts_toward_ready());
        assert!(!TaskStatus::Succeeded.counts_toward_ready());
    }
}
