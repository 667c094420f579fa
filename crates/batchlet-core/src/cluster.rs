//! Cluster objects fed to the scheduler by the external orchestrator
//!
//! These are the wire-level shapes the event source delivers: pods, nodes,
//! pod groups, queues, and priority classes. The scheduler never mutates
//! them; it derives its own snapshot entities (`TaskInfo` and friends) from
//! them at cache-ingest time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::resource::Resource;

/// Lifecycle phase reported by the orchestrator for a pod
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

/// A single schedulable pod
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pod {
    /// Orchestrator-assigned unique identifier
    pub uid: String,
    /// Pod name
    pub name: String,
    /// Namespace
    pub namespace: String,
    /// Node the pod is assigned to, if any
    pub node_name: Option<String>,
    /// Current phase
    pub phase: PodPhase,
    /// Resource request
    pub resreq: Resource,
    /// Pod group this pod belongs to; pods without a group are treated as
    /// single-member groups of their own
    pub group_name: Option<String>,
    /// Explicit priority; wins over `priority_class` when set
    pub priority: Option<i32>,
    /// Priority class name, resolved against the cache's class map
    pub priority_class: Option<String>,
    /// Pod labels
    pub labels: BTreeMap<String, String>,
    /// Node selector constraints
    pub node_selector: BTreeMap<String, String>,
    /// Taint keys this pod tolerates
    pub tolerations: Vec<String>,
    /// Whether the pod was scheduled opportunistically into idle capacity
    pub backfill: bool,
    /// Whether a deletion has been requested for the pod
    pub deleting: bool,
    /// Creation timestamp
    pub creation_time: DateTime<Utc>,
}

impl Pod {
    /// Create a pending pod with defaults for everything but the identity
    /// and the request
    pub fn new(namespace: &str, name: &str, resreq: Resource) -> Self {
        Self {
            uid: format!("{}-{}", namespace, name),
            name: name.to_string(),
            namespace: namespace.to_string(),
            node_name: None,
            phase: PodPhase::Pending,
            resreq,
            group_name: None,
            priority: None,
            priority_class: None,
            labels: BTreeMap::new(),
            node_selector: BTreeMap::new(),
            tolerations: Vec::new(),
            backfill: false,
            deleting: false,
            creation_time: Utc::now(),
        }
    }

    /// Stable `namespace/name` key
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// Effect of a node taint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaintEffect {
    /// New pods must tolerate the taint to be placed
    NoSchedule,
    /// Placement is discouraged but not forbidden
    PreferNoSchedule,
}

/// A node taint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Taint {
    pub key: String,
    pub value: String,
    pub effect: TaintEffect,
}

/// A cluster node as reported by the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Node name
    pub name: String,
    /// Total capacity of the node
    pub capacity: Resource,
    /// Capacity available to workloads
    pub allocatable: Resource,
    /// Node labels
    pub labels: BTreeMap<String, String>,
    /// Node taints
    pub taints: Vec<Taint>,
}

impl Node {
    /// Create a node whose capacity equals its allocatable
    pub fn new(name: &str, allocatable: Resource) -> Self {
        Self {
            name: name.to_string(),
            capacity: allocatable.clone(),
            allocatable,
            labels: BTreeMap::new(),
            taints: Vec::new(),
        }
    }
}

/// The unit of gang admission: a set of pods with a minimum membership
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodGroup {
    /// Group name
    pub name: String,
    /// Namespace
    pub namespace: String,
    /// Queue the group is submitted to; empty means the default queue
    pub queue: String,
    /// Minimum number of members that must be schedulable as a unit
    pub min_member: u32,
    /// Explicit group priority
    pub priority: Option<i32>,
    /// Priority class name
    pub priority_class: Option<String>,
    /// Creation timestamp
    pub creation_time: DateTime<Utc>,
}

impl PodGroup {
    /// Create a pod group in the given queue
    pub fn new(namespace: &str, name: &str, queue: &str, min_member: u32) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            queue: queue.to_string(),
            min_member,
            priority: None,
            priority_class: None,
            creation_time: Utc::now(),
        }
    }

    /// Stable `namespace/name` key
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// A submission queue sharing the cluster resource pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Queue {
    /// Queue name
    pub name: String,
    /// Relative weight used when dividing the cluster between queues
    pub weight: u32,
}

impl Queue {
    pub fn new(name: &str, weight: u32) -> Self {
        Self {
            name: name.to_string(),
            weight,
        }
    }
}

/// A named priority level pods may reference
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorityClass {
    pub name: String,
    pub value: i32,
}
