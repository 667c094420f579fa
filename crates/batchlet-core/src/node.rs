//! Node-level snapshot state and resource bookkeeping

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

use crate::cluster::Node;
use crate::error::{BatchletError, BatchletResult};
use crate::resource::Resource;
use crate::task::{TaskId, TaskInfo, TaskStatus};

/// Node-level aggregated information.
///
/// Tasks are stored by value so that status changes elsewhere in a session
/// never bypass this node's counters; the counters move only through
/// `add_task` and `remove_task`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Node name
    pub name: String,
    /// The raw node object; absent when a pod referenced a node the cache
    /// has not seen yet, in which case no counters are maintained
    pub node: Option<Node>,
    /// Resources held by tasks that are on their way out
    pub releasing: Resource,
    /// Resources not held by any task
    pub idle: Resource,
    /// Resources held by tasks, running and terminating alike
    pub used: Resource,
    /// The slice of `used` held by backfill tasks
    pub backfilled: Resource,
    /// Capacity available to workloads
    pub allocatable: Resource,
    /// Total node capacity
    pub capability: Resource,
    /// Tasks assigned to this node, keyed by task id
    pub tasks: BTreeMap<TaskId, TaskInfo>,
}

impl NodeInfo {
    /// Create node info from the raw node object
    pub fn new(node: &Node) -> Self {
        Self {
            name: node.name.clone(),
            node: Some(node.clone()),
            releasing: Resource::empty(),
            idle: node.allocatable.clone(),
            used: Resource::empty(),
            backfilled: Resource::empty(),
            allocatable: node.allocatable.clone(),
            capability: node.capacity.clone(),
            tasks: BTreeMap::new(),
        }
    }

    /// Create a placeholder for a node the cache only knows by name
    pub fn unknown(name: &str) -> Self {
        Self {
            name: name.to_string(),
            node: None,
            releasing: Resource::empty(),
            idle: Resource::empty(),
            used: Resource::empty(),
            backfilled: Resource::empty(),
            allocatable: Resource::empty(),
            capability: Resource::empty(),
            tasks: BTreeMap::new(),
        }
    }

    /// Attach or replace the raw node object and recompute every counter
    /// from the assigned task set
    pub fn set_node(&mut self, node: &Node) {
        self.name = node.name.clone();
        self.node = Some(node.clone());
        self.allocatable = node.allocatable.clone();
        self.capability = node.capacity.clone();
        self.idle = node.allocatable.clone();
        self.used = Resource::empty();
        self.releasing = Resource::empty();
        self.backfilled = Resource::empty();

        // Pipelined tasks draw on the releasing pool, so the tasks feeding
        // that pool must be accounted first.
        let mut tasks: Vec<TaskInfo> = self.tasks.values().cloned().collect();
        tasks.sort_by_key(|t| t.status == TaskStatus::Pipelined);
        for task in &tasks {
            if let Err(e) = self.occupy(task) {
                warn!(node = %self.name, task = %task.key(), error = %e, "Inconsistent accounting while refreshing node");
            }
        }
    }

    /// Add a task to this node, updating the counters according to the
    /// task's status. Adding a task that is already present fails.
    pub fn add_task(&mut self, task: &TaskInfo) -> BatchletResult<()> {
        if self.tasks.contains_key(&task.id) {
            return Err(BatchletError::DuplicateTask {
                task: task.key(),
                node: self.name.clone(),
            });
        }

        if self.node.is_some() {
            self.occupy(task)?;
        }
        self.tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    /// Remove a task from this node, reversing `add_task`'s accounting.
    /// Removing a task that is not present fails.
    pub fn remove_task(&mut self, task_id: &TaskId) -> BatchletResult<TaskInfo> {
        let task = match self.tasks.get(task_id) {
            Some(task) => task.clone(),
            None => {
                return Err(BatchletError::TaskNotOnNode {
                    task: task_id.clone(),
                    node: self.name.clone(),
                })
            }
        };

        if self.node.is_some() {
            self.release(&task)?;
        }
        self.tasks.remove(task_id);
        Ok(task)
    }

    /// Replace a task in place, re-bucketing the counters for its new status
    pub fn update_task(&mut self, task: &TaskInfo) -> BatchletResult<()> {
        self.remove_task(&task.id)?;
        self.add_task(task)
    }

    /// The pool a non-backfill action may consider: idle capacity plus the
    /// capacity held by evictable backfill tasks
    pub fn accessible(&self) -> Resource {
        let mut accessible = self.idle.clone();
        accessible.add(&self.backfilled);
        accessible
    }

    /// Idle capacity plus capacity that frees up once releasing tasks exit
    pub fn future_idle(&self) -> Resource {
        let mut future = self.idle.clone();
        future.add(&self.releasing);
        future
    }

    fn occupy(&mut self, task: &TaskInfo) -> BatchletResult<()> {
        if task.is_backfill {
            self.backfilled.add(&task.resreq);
        }

        match task.status {
            TaskStatus::Releasing => {
                self.releasing.add(&task.resreq);
                self.idle.sub(&task.resreq)?;
            }
            // A pipelined task consumes a slot that a releasing task is
            // about to free rather than idle capacity.
            TaskStatus::Pipelined => {
                self.releasing.sub(&task.resreq)?;
            }
            _ => {
                self.idle.sub(&task.resreq)?;
            }
        }
        self.used.add(&task.resreq);
        Ok(())
    }

    fn release(&mut self, task: &TaskInfo) -> BatchletResult<()> {
        if task.is_backfill {
            self.backfilled.sub(&task.resreq)?;
        }

        match task.status {
            TaskStatus::Releasing => {
                self.releasing.sub(&task.resreq)?;
                self.idle.add(&task.resreq);
            }
            TaskStatus::Pipelined => {
                self.releasing.add(&task.resreq);
            }
            _ => {
                self.idle.add(&task.resreq);
            }
        }
        self.used.sub(&task.resreq)?;
        Ok(())
    }
}

impl fmt::Display for NodeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Node {}: idle <{}>, used <{}>, releasing <{}>, backfilled <{}>, tasks {}",
            self.name,
            self.idle,
            self.used,
            self.releasing,
            self.backfilled,
            self.tasks.len()
        )
    }
}
