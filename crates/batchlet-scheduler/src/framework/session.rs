//! The per-cycle scheduling session
//!
//! A session owns a deep clone of the cache snapshot and the instantiated
//! plugin tiers. Actions drive it through the composed policy entry points
//! and mutate it through statements; on close it hands the committed
//! operations back for the cache to persist.

use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use batchlet_cache::{
    BindRequest, ClusterSnapshot, CycleOutput, EvictRequest, PipelineRecord,
};
use batchlet_core::{
    BatchletError, BatchletResult, JobId, JobInfo, NodeInfo, PluginConfig, QueueInfo,
    SchedulerConfig, TaskId, TaskInfo, TaskStatus,
};

use super::statement::{Operation, Statement};
use super::{Plugin, PluginRegistry};

/// The session's working copy of the cluster
#[derive(Debug, Default)]
pub struct SessionState {
    pub jobs: BTreeMap<JobId, JobInfo>,
    pub nodes: BTreeMap<String, NodeInfo>,
    pub queues: BTreeMap<String, QueueInfo>,
}

struct PluginSlot {
    config: PluginConfig,
    plugin: Box<dyn Plugin>,
}

struct TierSlot {
    weight: f64,
    plugins: Vec<PluginSlot>,
}

/// One scheduling cycle's working context
pub struct Session {
    /// Session identifier, for log correlation
    pub id: Uuid,
    /// Wall-clock instant the session opened; the starvation clock
    pub now: DateTime<Utc>,
    /// Whether the backfill action may place anything
    pub enable_backfill: bool,
    /// Pending time past which backfill is suspended
    pub starvation_threshold: Duration,
    state: SessionState,
    tiers: Vec<TierSlot>,
    committed: Vec<Operation>,
    unschedulable: BTreeMap<JobId, String>,
}

impl Session {
    /// Open a session over a snapshot: instantiate the configured plugin
    /// tiers and let each precompute its per-session state
    pub fn open(
        snapshot: ClusterSnapshot,
        registry: &PluginRegistry,
        config: &SchedulerConfig,
    ) -> BatchletResult<Self> {
        let state = SessionState {
            jobs: snapshot.jobs,
            nodes: snapshot.nodes,
            queues: snapshot.queues,
        };

        let mut tiers = Vec::new();
        for tier_config in &config.tiers {
            let mut plugins = Vec::new();
            for plugin_config in &tier_config.plugins {
                let mut plugin = registry.build(plugin_config)?;
                plugin.on_session_open(&state);
                plugins.push(PluginSlot {
                    config: plugin_config.clone(),
                    plugin,
                });
            }
            tiers.push(TierSlot {
                weight: tier_config.weight,
                plugins,
            });
        }

        let session = Self {
            id: Uuid::new_v4(),
            now: Utc::now(),
            enable_backfill: config.backfill_enabled(),
            starvation_threshold: config.starvation_threshold()?,
            state,
            tiers,
            committed: Vec::new(),
            unschedulable: BTreeMap::new(),
        };
        debug!(
            session = %session.id,
            jobs = session.state.jobs.len(),
            nodes = session.state.nodes.len(),
            queues = session.state.queues.len(),
            "Session opened"
        );
        Ok(session)
    }

    /// The session's working snapshot
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Look up a job in the working snapshot
    pub fn job(&self, job_id: &JobId) -> Option<&JobInfo> {
        self.state.jobs.get(job_id)
    }

    /// Open a transactional statement over this session
    pub fn statement(&mut self) -> Statement<'_> {
        Statement::new(self)
    }

    /// Record why a job could not be scheduled this cycle
    pub fn mark_unschedulable(&mut self, job_id: &JobId, reason: &str) {
        self.unschedulable
            .insert(job_id.clone(), reason.to_string());
    }

    /// Jobs marked unschedulable so far this cycle
    pub fn unschedulable_jobs(&self) -> &BTreeMap<JobId, String> {
        &self.unschedulable
    }

    /// Total order on jobs for admission sequencing; equal answers fall
    /// through to creation time, then id, so the order is always total
    pub fn job_order(&self, a: &JobInfo, b: &JobInfo) -> Ordering {
        for tier in &self.tiers {
            for slot in &tier.plugins {
                if !slot.config.enabled_job_order {
                    continue;
                }
                if let Some(order) = slot.plugin.job_order(a, b) {
                    if order != Ordering::Equal {
                        return order;
                    }
                }
            }
        }
        a.creation_time
            .cmp(&b.creation_time)
            .then_with(|| a.id.cmp(&b.id))
    }

    /// Order of tasks within a job
    pub fn task_order(&self, a: &TaskInfo, b: &TaskInfo) -> Ordering {
        for tier in &self.tiers {
            for slot in &tier.plugins {
                if !slot.config.enabled_task_order {
                    continue;
                }
                if let Some(order) = slot.plugin.task_order(a, b) {
                    if order != Ordering::Equal {
                        return order;
                    }
                }
            }
        }
        a.creation_time
            .cmp(&b.creation_time)
            .then_with(|| a.id.cmp(&b.id))
    }

    /// Ranking of a node for a task: tier-weighted sum of plugin scores
    pub fn node_score(&self, task: &TaskInfo, node: &NodeInfo) -> f64 {
        let mut total = 0.0;
        for tier in &self.tiers {
            let mut tier_score = 0.0;
            for slot in &tier.plugins {
                if !slot.config.enabled_node_order {
                    continue;
                }
                if let Some(score) = slot.plugin.node_score(task, node) {
                    tier_score += score;
                }
            }
            total += tier.weight * tier_score;
        }
        total
    }

    /// Hard feasibility of a task on a node: AND over all predicates, the
    /// first failure short-circuits with its reason
    pub fn predicate(&self, task: &TaskInfo, node: &NodeInfo) -> BatchletResult<()> {
        for tier in &self.tiers {
            for slot in &tier.plugins {
                if !slot.config.enabled_predicate {
                    continue;
                }
                if let Some(result) = slot.plugin.predicate(task, node) {
                    result?;
                }
            }
        }
        Ok(())
    }

    /// Gang admission: every answering plugin must agree the job is ready.
    /// With no answering plugin the job's own membership count decides.
    pub fn job_ready(&self, job: &JobInfo) -> bool {
        let mut answered = false;
        for tier in &self.tiers {
            for slot in &tier.plugins {
                if !slot.config.enabled_job_ready {
                    continue;
                }
                if let Some(ready) = slot.plugin.job_ready(job) {
                    answered = true;
                    if !ready {
                        return false;
                    }
                }
            }
        }
        if answered {
            true
        } else {
            job.is_ready()
        }
    }

    /// Gang admission by job id; missing jobs are never ready
    pub fn job_ready_id(&self, job_id: &JobId) -> bool {
        match self.state.jobs.get(job_id) {
            Some(job) => self.job_ready(job),
            None => false,
        }
    }

    /// Quota check: every answering plugin must agree the queue is overused
    pub fn overused(&self, queue: &QueueInfo) -> bool {
        let mut answered = false;
        for tier in &self.tiers {
            for slot in &tier.plugins {
                if !slot.config.enabled_overused {
                    continue;
                }
                if let Some(overused) = slot.plugin.overused(queue) {
                    answered = true;
                    if !overused {
                        return false;
                    }
                }
            }
        }
        answered
    }

    /// Filter the admissible victims for a preemptor: the set shrinks as it
    /// flows through each plugin
    pub fn preemptable(&self, preemptor: &TaskInfo, victims: Vec<TaskInfo>) -> Vec<TaskInfo> {
        let mut allowed = victims;
        for tier in &self.tiers {
            for slot in &tier.plugins {
                if !slot.config.enabled_preemptable {
                    continue;
                }
                if allowed.is_empty() {
                    return allowed;
                }
                let refs: Vec<&TaskInfo> = allowed.iter().collect();
                if let Some(ids) = slot.plugin.preemptable(&self.state, preemptor, &refs) {
                    allowed.retain(|t| ids.contains(&t.id));
                }
            }
        }
        allowed
    }

    /// Close the session: turn the committed operations into the cache's
    /// cycle output
    pub fn close(self) -> CycleOutput {
        let mut output = CycleOutput::default();
        for op in self.committed {
            match op {
                Operation::Allocate { task, .. } => {
                    let hostname = task.node_name.clone().unwrap_or_default();
                    output.binds.push(BindRequest { task, hostname });
                }
                Operation::Pipeline { task, .. } => {
                    let hostname = task.node_name.clone().unwrap_or_default();
                    output.pipelines.push(PipelineRecord { task, hostname });
                }
                Operation::Evict { task, reason, .. } => {
                    output.evictions.push(EvictRequest { task, reason });
                }
            }
        }
        output.unschedulable = self.unschedulable;
        debug!(
            session = %self.id,
            binds = output.binds.len(),
            evictions = output.evictions.len(),
            pipelines = output.pipelines.len(),
            "Session closed"
        );
        output
    }

    pub(crate) fn push_committed(&mut self, operations: Vec<Operation>) {
        self.committed.extend(operations);
    }

    /// Tentatively place a pending task on a node.
    ///
    /// Returns the task as placed and as it was before, for the inverse.
    pub(crate) fn do_allocate(
        &mut self,
        task_ref: &TaskInfo,
        node_name: &str,
        backfill: bool,
        pipelined: bool,
    ) -> BatchletResult<(TaskInfo, TaskInfo)> {
        if !self.state.nodes.contains_key(node_name) {
            return Err(BatchletError::NodeNotFound(node_name.to_string()));
        }

        let job = self
            .state
            .jobs
            .get_mut(&task_ref.job)
            .ok_or_else(|| BatchletError::JobNotFound(task_ref.job.clone()))?;
        let task = job
            .tasks
            .get_mut(&task_ref.id)
            .ok_or_else(|| BatchletError::TaskNotFound(task_ref.id.clone()))?;
        if task.status != TaskStatus::Pending {
            return Err(BatchletError::InvalidTransition {
                task: task.key(),
                from: task.status.to_string(),
                to: if pipelined {
                    TaskStatus::Pipelined.to_string()
                } else {
                    TaskStatus::Allocated.to_string()
                },
            });
        }

        let original = task.clone();
        task.status = if pipelined {
            TaskStatus::Pipelined
        } else {
            TaskStatus::Allocated
        };
        task.node_name = Some(node_name.to_string());
        if backfill {
            task.is_backfill = true;
        }
        let updated = task.clone();

        let added = match self.state.nodes.get_mut(node_name) {
            Some(node) => node.add_task(&updated),
            None => Err(BatchletError::NodeNotFound(node_name.to_string())),
        };
        if let Err(e) = added {
            self.restore_task(&original);
            return Err(e);
        }

        self.dispatch_allocate(&updated);
        Ok((updated, original))
    }

    /// Exact inverse of `do_allocate`
    pub(crate) fn undo_allocate(&mut self, updated: &TaskInfo, original: &TaskInfo) {
        if let Some(node_name) = &updated.node_name {
            if let Some(node) = self.state.nodes.get_mut(node_name) {
                if let Err(e) = node.remove_task(&updated.id) {
                    warn!(task = %updated.key(), error = %e, "Rollback failed to free node");
                }
            }
        }
        self.restore_task(original);
        self.dispatch_evict(updated);
    }

    /// Tentatively mark a placed task as releasing
    pub(crate) fn do_evict(
        &mut self,
        job_id: &JobId,
        task_id: &TaskId,
    ) -> BatchletResult<(TaskInfo, TaskInfo)> {
        let job = self
            .state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| BatchletError::JobNotFound(job_id.clone()))?;
        let task = job
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| BatchletError::TaskNotFound(task_id.clone()))?;
        if !matches!(
            task.status,
            TaskStatus::Allocated | TaskStatus::Bound | TaskStatus::Running
        ) {
            return Err(BatchletError::InvalidTransition {
                task: task.key(),
                from: task.status.to_string(),
                to: TaskStatus::Releasing.to_string(),
            });
        }

        let original = task.clone();
        task.status = TaskStatus::Releasing;
        let updated = task.clone();

        let node_name = match &updated.node_name {
            Some(name) => name.clone(),
            None => {
                self.restore_task(&original);
                return Err(BatchletError::NodeNotFound(String::new()));
            }
        };
        let rebucketed = match self.state.nodes.get_mut(&node_name) {
            Some(node) => node.update_task(&updated),
            None => Err(BatchletError::NodeNotFound(node_name)),
        };
        if let Err(e) = rebucketed {
            self.restore_task(&original);
            return Err(e);
        }

        self.dispatch_evict(&original);
        Ok((updated, original))
    }

    /// Exact inverse of `do_evict`
    pub(crate) fn undo_evict(&mut self, original: &TaskInfo) {
        if let Some(node_name) = &original.node_name {
            if let Some(node) = self.state.nodes.get_mut(node_name) {
                if let Err(e) = node.update_task(original) {
                    warn!(task = %original.key(), error = %e, "Rollback failed to restore victim");
                }
            }
        }
        self.restore_task(original);
        self.dispatch_allocate(original);
    }

    fn restore_task(&mut self, original: &TaskInfo) {
        if let Some(task) = self
            .state
            .jobs
            .get_mut(&original.job)
            .and_then(|j| j.tasks.get_mut(&original.id))
        {
            *task = original.clone();
        }
    }

    fn dispatch_allocate(&mut self, task: &TaskInfo) {
        for tier in &mut self.tiers {
            for slot in &mut tier.plugins {
                slot.plugin.on_allocate(task);
            }
        }
    }

    fn dispatch_evict(&mut self, task: &TaskInfo) {
        for tier in &mut self.tiers {
            for slot in &mut tier.plugins {
                slot.plugin.on_evict(task);
            }
        }
    }
}
