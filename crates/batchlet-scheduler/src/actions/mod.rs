//! Actions drive the session using composed plugin policy

pub mod allocate;
pub mod backfill;
pub mod preempt;

use std::cmp::Ordering;
use std::collections::BTreeMap;

use batchlet_core::{BatchletError, BatchletResult, JobId, TaskInfo};

use crate::framework::Session;

/// An algorithm executed against the session once per cycle
pub trait Action: Send + Sync {
    /// Registered action name
    fn name(&self) -> &'static str;

    /// Run the action to completion against the session
    fn execute(&self, ssn: &mut Session) -> BatchletResult<()>;
}

/// Constructor for an action
pub type ActionBuilder = fn() -> Box<dyn Action>;

/// Registry of action builders by name.
///
/// Populated at startup and frozen before the first session opens.
#[derive(Default)]
pub struct ActionRegistry {
    builders: BTreeMap<String, ActionBuilder>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a builder under a name; later registrations win
    pub fn register(&mut self, name: &str, builder: ActionBuilder) {
        self.builders.insert(name.to_string(), builder);
    }

    /// Instantiate an action by name
    pub fn build(&self, name: &str) -> BatchletResult<Box<dyn Action>> {
        match self.builders.get(name) {
            Some(builder) => Ok(builder()),
            None => Err(BatchletError::Config(format!("unknown action: {}", name))),
        }
    }
}

/// The registry with every built-in action registered
pub fn default_registry() -> ActionRegistry {
    let mut registry = ActionRegistry::new();
    registry.register("allocate", allocate::new);
    registry.register("preempt", preempt::new);
    registry.register("backfill", backfill::new);
    registry
}

/// Queue names in processing order: descending weight, ties by name
pub(crate) fn ordered_queues(ssn: &Session) -> Vec<String> {
    let mut queues: Vec<(String, u32)> = ssn
        .state()
        .queues
        .values()
        .map(|q| (q.name.clone(), q.weight))
        .collect();
    queues.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    queues.into_iter().map(|(name, _)| name).collect()
}

/// Jobs of a queue that still have pending tasks, in admission order
pub(crate) fn pending_jobs_in_queue(ssn: &Session, queue_name: &str) -> Vec<JobId> {
    let mut job_ids: Vec<JobId> = ssn
        .state()
        .jobs
        .values()
        .filter(|j| j.queue == queue_name && j.has_pending_tasks())
        .map(|j| j.id.clone())
        .collect();
    job_ids.sort_by(|a, b| {
        match (ssn.state().jobs.get(a), ssn.state().jobs.get(b)) {
            (Some(job_a), Some(job_b)) => ssn.job_order(job_a, job_b),
            _ => Ordering::Equal,
        }
    });
    job_ids
}

/// A job's pending tasks in dispatch order
pub(crate) fn ordered_pending_tasks(ssn: &Session, job_id: &JobId) -> Vec<TaskInfo> {
    let mut tasks: Vec<TaskInfo> = match ssn.job(job_id) {
        Some(job) => job.pending_tasks().into_iter().cloned().collect(),
        None => Vec::new(),
    };
    tasks.sort_by(|a, b| ssn.task_order(a, b));
    tasks
}

/// Pick the best feasible node whose idle pool fits the task.
///
/// Predicates gate feasibility; the idle fit keeps plain allocations from
/// displacing running backfill tasks. Ties keep the first candidate, which
/// is the lexicographically smallest node name.
pub(crate) fn select_node(ssn: &Session, task: &TaskInfo) -> Option<String> {
    let mut best: Option<(String, f64)> = None;
    for node in ssn.state().nodes.values() {
        if ssn.predicate(task, node).is_err() {
            continue;
        }
        if !task.resreq.less_equal(&node.idle) {
            continue;
        }
        let score = ssn.node_score(task, node);
        let better = match &best {
            None => true,
            Some((_, best_score)) => score > *best_score,
        };
        if better {
            best = Some((node.name.clone(), score));
        }
    }
    best.map(|(name, _)| name)
}
