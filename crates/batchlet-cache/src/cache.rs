//! The scheduler cache
//!
//! Owns the canonical cluster state behind a single read-write lock,
//! produces consistent snapshots for sessions, and drives committed
//! decisions out to the orchestrator through the binder interfaces.

use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, Semaphore};
use tracing::{debug, info, warn};

use batchlet_core::{
    BatchletResult, JobId, JobInfo, Node, NodeInfo, Pod, PodGroup, Queue, QueueInfo, TaskId,
    TaskInfo, TaskStatus,
};

use crate::binder::{Binder, Evictor, PodCondition, StatusUpdater, VolumeBinder};
use crate::events::ClusterEvent;

/// A consistent copy of the cluster for one scheduling session.
///
/// Every task a node claims appears in its owning job, every job referenced
/// by a task exists, and per-node counters equal a recomputation from the
/// node's task set.
#[derive(Debug, Clone, Default)]
pub struct ClusterSnapshot {
    pub jobs: BTreeMap<JobId, JobInfo>,
    pub nodes: BTreeMap<String, NodeInfo>,
    pub queues: BTreeMap<String, QueueInfo>,
}

/// A committed placement awaiting persistence
#[derive(Debug, Clone)]
pub struct BindRequest {
    pub task: TaskInfo,
    pub hostname: String,
}

/// A committed eviction
#[derive(Debug, Clone)]
pub struct EvictRequest {
    pub task: TaskInfo,
    pub reason: String,
}

/// A committed reservation onto a releasing slot
#[derive(Debug, Clone)]
pub struct PipelineRecord {
    pub task: TaskInfo,
    pub hostname: String,
}

/// Everything a closed session hands back to the cache
#[derive(Debug, Clone, Default)]
pub struct CycleOutput {
    pub binds: Vec<BindRequest>,
    pub evictions: Vec<EvictRequest>,
    pub pipelines: Vec<PipelineRecord>,
    /// Jobs that could not be scheduled this cycle, with the reason
    pub unschedulable: BTreeMap<JobId, String>,
}

#[derive(Debug, Default)]
struct CacheState {
    jobs: BTreeMap<JobId, JobInfo>,
    nodes: BTreeMap<String, NodeInfo>,
    queues: BTreeMap<String, QueueInfo>,
    priority_classes: BTreeMap<String, i32>,
    /// Successfully persisted bindings, keyed by pod UID
    bound: BTreeMap<TaskId, String>,
    /// Last reported non-schedulability reasons
    job_conditions: BTreeMap<JobId, String>,
}

impl CacheState {
    fn with_default_queue() -> Self {
        let mut state = Self::default();
        state
            .queues
            .insert("default".to_string(), QueueInfo::new(&Queue::new("default", 1)));
        state
    }

    fn job_id_for(pod: &Pod) -> JobId {
        let group = pod.group_name.as_deref().unwrap_or(&pod.name);
        format!("{}/{}", pod.namespace, group)
    }

    fn resolve_priority(&self, explicit: Option<i32>, class: Option<&str>) -> i32 {
        explicit
            .or_else(|| class.and_then(|c| self.priority_classes.get(c).copied()))
            .unwrap_or(0)
    }

    fn add_pod(&mut self, pod: &Pod) {
        let job_id = Self::job_id_for(pod);
        let priority = self.resolve_priority(pod.priority, pod.priority_class.as_deref());
        let task = TaskInfo::from_pod(pod, job_id.clone(), priority);

        let job = self.jobs.entry(job_id.clone()).or_insert_with(|| {
            let group = pod.group_name.as_deref().unwrap_or(&pod.name);
            let mut job = JobInfo::new(job_id.clone(), &pod.namespace, group);
            job.creation_time = pod.creation_time;
            job
        });
        job.add_task(task.clone());

        if let Some(node_name) = task.node_name.clone() {
            if task.status.occupies_node() {
                let node = self
                    .nodes
                    .entry(node_name.clone())
                    .or_insert_with(|| NodeInfo::unknown(&node_name));
                if let Err(e) = node.add_task(&task) {
                    warn!(task = %task.key(), node = %node_name, error = %e, "Failed to place task on node");
                }
            }
        }
    }

    fn delete_pod(&mut self, pod: &Pod) {
        let job_id = Self::job_id_for(pod);
        self.bound.remove(&pod.uid);

        let Some(job) = self.jobs.get_mut(&job_id) else {
            warn!(pod = %pod.key(), job = %job_id, "Delete for a pod of an unknown job");
            return;
        };
        let Some(old) = job.remove_task(&pod.uid) else {
            warn!(pod = %pod.key(), job = %job_id, "Delete for an unknown pod");
            return;
        };

        if let Some(node_name) = &old.node_name {
            if old.status.occupies_node() {
                if let Some(node) = self.nodes.get_mut(node_name) {
                    if let Err(e) = node.remove_task(&old.id) {
                        warn!(task = %old.key(), node = %node_name, error = %e, "Failed to remove task from node");
                    }
                }
            }
        }

        if job.tasks.is_empty() && job.pod_group.is_none() {
            self.jobs.remove(&job_id);
            self.job_conditions.remove(&job_id);
        }
    }

    fn update_pod(&mut self, pod: &Pod) {
        self.delete_pod(pod);
        self.add_pod(pod);
    }

    fn add_pod_group(&mut self, group: &PodGroup) {
        let job_id = group.key();
        let priority = self.resolve_priority(group.priority, group.priority_class.as_deref());
        let job = self
            .jobs
            .entry(job_id.clone())
            .or_insert_with(|| JobInfo::new(job_id.clone(), &group.namespace, &group.name));
        job.set_pod_group(group, priority);
    }

    fn delete_pod_group(&mut self, group: &PodGroup) {
        let job_id = group.key();
        if let Some(job) = self.jobs.get_mut(&job_id) {
            job.pod_group = None;
            if job.tasks.is_empty() {
                self.jobs.remove(&job_id);
                self.job_conditions.remove(&job_id);
            }
        }
    }

    fn add_node(&mut self, node: &Node) {
        match self.nodes.get_mut(&node.name) {
            Some(existing) => existing.set_node(node),
            None => {
                self.nodes.insert(node.name.clone(), NodeInfo::new(node));
            }
        }
    }

    fn delete_node(&mut self, name: &str) {
        if let Some(node) = self.nodes.remove(name) {
            if !node.tasks.is_empty() {
                warn!(node = name, tasks = node.tasks.len(), "Deleted node still had tasks");
            }
        }
    }

    /// Look up a task mutably through its owning job
    fn task_mut(&mut self, job_id: &JobId, task_id: &TaskId) -> Option<&mut TaskInfo> {
        self.jobs.get_mut(job_id).and_then(|j| j.tasks.get_mut(task_id))
    }

    /// Fold a committed eviction into the canonical state
    fn record_eviction(&mut self, task: &TaskInfo) {
        match self.task_mut(&task.job, &task.id) {
            Some(existing) => *existing = task.clone(),
            None => {
                warn!(task = %task.key(), "Evicted task vanished before commit");
                return;
            }
        }
        if let Some(node_name) = &task.node_name {
            if let Some(node) = self.nodes.get_mut(node_name) {
                if let Err(e) = node.update_task(task) {
                    warn!(task = %task.key(), node = %node_name, error = %e, "Failed to re-bucket evicted task");
                }
            }
        }
    }

    /// Fold a committed pipeline reservation into the canonical state
    fn record_pipeline(&mut self, task: &TaskInfo) {
        match self.task_mut(&task.job, &task.id) {
            Some(existing) => *existing = task.clone(),
            None => {
                warn!(task = %task.key(), "Pipelined task vanished before commit");
                return;
            }
        }
        if let Some(node_name) = &task.node_name {
            if let Some(node) = self.nodes.get_mut(node_name) {
                if let Err(e) = node.add_task(task) {
                    warn!(task = %task.key(), node = %node_name, error = %e, "Failed to pipeline task onto node");
                }
            }
        }
    }

    /// Fold a committed allocation into the canonical state, ahead of the
    /// asynchronous bind
    fn record_allocation(&mut self, task: &TaskInfo) -> bool {
        match self.task_mut(&task.job, &task.id) {
            Some(existing) => *existing = task.clone(),
            None => {
                warn!(task = %task.key(), "Allocated task vanished before commit");
                return false;
            }
        }
        if let Some(node_name) = &task.node_name {
            if let Some(node) = self.nodes.get_mut(node_name) {
                if let Err(e) = node.add_task(task) {
                    warn!(task = %task.key(), node = %node_name, error = %e, "Failed to place allocated task on node");
                }
            }
        }
        true
    }

    fn finish_bind(&mut self, task: &TaskInfo, hostname: &str) {
        self.bound.insert(task.id.clone(), hostname.to_string());
        if let Some(existing) = self.task_mut(&task.job, &task.id) {
            existing.status = TaskStatus::Bound;
            let updated = existing.clone();
            if let Some(node) = self.nodes.get_mut(hostname) {
                if let Err(e) = node.update_task(&updated) {
                    warn!(task = %task.key(), error = %e, "Failed to mark task bound on node");
                }
            }
        }
    }

    fn revert_bind(&mut self, task: &TaskInfo, hostname: &str) {
        if let Some(node) = self.nodes.get_mut(hostname) {
            if let Err(e) = node.remove_task(&task.id) {
                warn!(task = %task.key(), error = %e, "Failed to remove task after bind failure");
            }
        }
        if let Some(existing) = self.task_mut(&task.job, &task.id) {
            existing.status = TaskStatus::Pending;
            existing.node_name = None;
        }
    }
}

/// The scheduler cache
pub struct SchedulerCache {
    state: RwLock<CacheState>,
    binder: Arc<dyn Binder>,
    volume_binder: Arc<dyn VolumeBinder>,
    status_updater: Arc<dyn StatusUpdater>,
    evictor: Arc<dyn Evictor>,
    bind_limit: Semaphore,
    bind_timeout: Duration,
}

impl SchedulerCache {
    /// Create a cache wired to the given orchestrator clients
    pub fn new(
        binder: Arc<dyn Binder>,
        volume_binder: Arc<dyn VolumeBinder>,
        status_updater: Arc<dyn StatusUpdater>,
        evictor: Arc<dyn Evictor>,
        bind_timeout: Duration,
        max_concurrent_binds: usize,
    ) -> Self {
        Self {
            state: RwLock::new(CacheState::with_default_queue()),
            binder,
            volume_binder,
            status_updater,
            evictor,
            bind_limit: Semaphore::new(max_concurrent_binds.max(1)),
            bind_timeout,
        }
    }

    /// Fold one lifecycle event into the canonical state
    pub async fn apply_event(&self, event: ClusterEvent) {
        let mut state = self.state.write().await;
        match event {
            ClusterEvent::PodAdded(pod) => state.add_pod(&pod),
            ClusterEvent::PodUpdated(pod) => state.update_pod(&pod),
            ClusterEvent::PodDeleted(pod) => state.delete_pod(&pod),
            ClusterEvent::NodeAdded(node) | ClusterEvent::NodeUpdated(node) => {
                state.add_node(&node)
            }
            ClusterEvent::NodeDeleted(name) => state.delete_node(&name),
            ClusterEvent::PodGroupAdded(group) | ClusterEvent::PodGroupUpdated(group) => {
                state.add_pod_group(&group)
            }
            ClusterEvent::PodGroupDeleted(group) => state.delete_pod_group(&group),
            ClusterEvent::QueueAdded(queue) => {
                state
                    .queues
                    .insert(queue.name.clone(), QueueInfo::new(&queue));
            }
            ClusterEvent::QueueDeleted(name) => {
                state.queues.remove(&name);
            }
            ClusterEvent::PriorityClassAdded(class) => {
                state.priority_classes.insert(class.name.clone(), class.value);
            }
            ClusterEvent::PriorityClassDeleted(name) => {
                state.priority_classes.remove(&name);
            }
        }
    }

    /// Produce an internally consistent snapshot for a session.
    ///
    /// Node counters are rebuilt from each node's task set rather than
    /// copied, so a snapshot can never inherit drift.
    pub async fn snapshot(&self) -> ClusterSnapshot {
        let state = self.state.read().await;

        let mut nodes = BTreeMap::new();
        for (name, info) in &state.nodes {
            let mut fresh = match &info.node {
                Some(node) => NodeInfo::new(node),
                None => NodeInfo::unknown(name),
            };
            // Pipelined tasks draw on the releasing pool their victims
            // feed, so they are accounted last.
            let mut tasks: Vec<&TaskInfo> = info.tasks.values().collect();
            tasks.sort_by_key(|t| t.status == TaskStatus::Pipelined);
            for task in tasks {
                if let Err(e) = fresh.add_task(task) {
                    warn!(node = %name, task = %task.key(), error = %e, "Dropping inconsistent task from snapshot");
                }
            }
            nodes.insert(name.clone(), fresh);
        }

        ClusterSnapshot {
            jobs: state.jobs.clone(),
            nodes,
            queues: state.queues.clone(),
        }
    }

    /// Apply a closed session's output: fold the decisions into the
    /// canonical state, then drive evictions and bindings to the
    /// orchestrator.
    ///
    /// Bind calls run concurrently under the bind pool, each with its own
    /// deadline; a failed or timed-out bind rolls the task back to pending
    /// and is retried by a later cycle.
    pub async fn apply(&self, output: CycleOutput) {
        {
            let mut state = self.state.write().await;
            for eviction in &output.evictions {
                state.record_eviction(&eviction.task);
            }
            for pipeline in &output.pipelines {
                state.record_pipeline(&pipeline.task);
            }
            for bind in &output.binds {
                state.record_allocation(&bind.task);
            }
            state.job_conditions = output.unschedulable.clone();
        }

        for eviction in &output.evictions {
            if let Err(e) = self.evictor.evict(&eviction.task).await {
                warn!(task = %eviction.task.key(), error = %e, "Eviction request failed");
            }
        }

        let bound = join_all(output.binds.into_iter().map(|b| self.dispatch_bind(b)))
            .await
            .into_iter()
            .filter(|ok| *ok)
            .count();
        if bound > 0 {
            info!(bound, "Bindings persisted");
        }

        for (job_id, reason) in &output.unschedulable {
            self.report_unschedulable(job_id, reason).await;
        }
    }

    async fn dispatch_bind(&self, request: BindRequest) -> bool {
        let _permit = match self.bind_limit.acquire().await {
            Ok(permit) => permit,
            Err(_) => return false,
        };

        // Idempotence: a duplicate bind for the same UID and host is a no-op.
        {
            let state = self.state.read().await;
            if state.bound.get(&request.task.id) == Some(&request.hostname) {
                debug!(task = %request.task.key(), host = %request.hostname, "Already bound");
                return true;
            }
        }

        match tokio::time::timeout(self.bind_timeout, self.bind_flow(&request)).await {
            Ok(Ok(())) => {
                let mut state = self.state.write().await;
                state.finish_bind(&request.task, &request.hostname);
                true
            }
            Ok(Err(e)) => {
                warn!(task = %request.task.key(), host = %request.hostname, error = %e, "Bind failed, reverting to pending");
                let mut state = self.state.write().await;
                state.revert_bind(&request.task, &request.hostname);
                false
            }
            Err(_) => {
                warn!(task = %request.task.key(), host = %request.hostname, "Bind timed out, reverting to pending");
                let mut state = self.state.write().await;
                state.revert_bind(&request.task, &request.hostname);
                false
            }
        }
    }

    async fn bind_flow(&self, request: &BindRequest) -> BatchletResult<()> {
        self.volume_binder
            .allocate_volumes(&request.task, &request.hostname)
            .await?;
        self.binder.bind(&request.task, &request.hostname).await?;
        self.status_updater
            .update_pod_condition(&request.task, &PodCondition::scheduled(&request.hostname))
            .await?;
        Ok(())
    }

    async fn report_unschedulable(&self, job_id: &JobId, reason: &str) {
        let job = {
            let state = self.state.read().await;
            state.jobs.get(job_id).cloned()
        };
        if let Some(job) = job {
            if job.pod_group.is_some() {
                if let Err(e) = self
                    .status_updater
                    .update_pod_group(&job, &PodCondition::unschedulable(reason))
                    .await
                {
                    warn!(job = %job_id, error = %e, "Failed to update pod group condition");
                }
            }
        }
    }

    /// Last recorded non-schedulability reasons, by job
    pub async fn job_conditions(&self) -> BTreeMap<JobId, String> {
        self.state.read().await.job_conditions.clone()
    }

    /// Successfully persisted bindings, by pod UID
    pub async fn bound_tasks(&self) -> BTreeMap<TaskId, String> {
        self.state.read().await.bound.clone()
    }

    /// Status of one task, for inspection
    pub async fn task_status(&self, job_id: &JobId, task_id: &TaskId) -> Option<TaskStatus> {
        let state = self.state.read().await;
        state
            .jobs
            .get(job_id)
            .and_then(|j| j.tasks.get(task_id))
            .map(|t| t.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::LoggingClient;
    use batchlet_core::{PodPhase, PriorityClass, Resource};

    fn test_cache() -> SchedulerCache {
        let client = Arc::new(LoggingClient);
        SchedulerCache::new(
            client.clone(),
            client.clone(),
            client.clone(),
            client,
            Duration::from_secs(5),
            8,
        )
    }

    fn pod(name: &str, group: &str, milli_cpu: f64) -> Pod {
        let mut pod = Pod::new("ns1", name, Resource::new(milli_cpu, 0.0));
        pod.group_name = Some(group.to_string());
        pod
    }

    #[tokio::test]
    async fn test_pod_events_build_jobs() {
        let cache = test_cache();
        cache
            .apply_event(ClusterEvent::PodGroupAdded(PodGroup::new(
                "ns1", "pg1", "default", 2,
            )))
            .await;
        cache
            .apply_event(ClusterEvent::PodAdded(pod("p1", "pg1", 1000.0)))
            .await;
        cache
            .apply_event(ClusterEvent::PodAdded(pod("p2", "pg1", 1000.0)))
            .await;

        let snapshot = cache.snapshot().await;
        let job = snapshot.jobs.get("ns1/pg1").unwrap();
        assert_eq!(job.tasks.len(), 2);
        assert_eq!(job.min_member, 2);
        assert!(job.has_pending_tasks());
    }

    #[tokio::test]
    async fn test_shell_job_from_pod_without_group() {
        let cache = test_cache();
        let mut orphan = Pod::new("ns1", "solo", Resource::new(500.0, 0.0));
        orphan.group_name = None;
        cache.apply_event(ClusterEvent::PodAdded(orphan)).await;

        let snapshot = cache.snapshot().await;
        let job = snapshot.jobs.get("ns1/solo").unwrap();
        assert_eq!(job.min_member, 1);
    }

    #[tokio::test]
    async fn test_running_pod_occupies_node() {
        let cache = test_cache();
        cache
            .apply_event(ClusterEvent::NodeAdded(Node::new(
                "n1",
                Resource::new(2000.0, 0.0),
            )))
            .await;
        let mut running = pod("p1", "pg1", 1000.0);
        running.phase = PodPhase::Running;
        running.node_name = Some("n1".to_string());
        cache.apply_event(ClusterEvent::PodAdded(running.clone())).await;

        let snapshot = cache.snapshot().await;
        let node = snapshot.nodes.get("n1").unwrap();
        assert_eq!(node.used.milli_cpu, 1000.0);
        assert_eq!(node.idle.milli_cpu, 1000.0);

        cache.apply_event(ClusterEvent::PodDeleted(running)).await;
        let snapshot = cache.snapshot().await;
        assert!(snapshot.nodes.get("n1").unwrap().used.is_empty());
    }

    #[tokio::test]
    async fn test_priority_class_resolution() {
        let cache = test_cache();
        cache
            .apply_event(ClusterEvent::PriorityClassAdded(PriorityClass {
                name: "high".to_string(),
                value: 100,
            }))
            .await;
        let mut p = pod("p1", "pg1", 1000.0);
        p.priority_class = Some("high".to_string());
        cache.apply_event(ClusterEvent::PodAdded(p)).await;

        let snapshot = cache.snapshot().await;
        let job = snapshot.jobs.get("ns1/pg1").unwrap();
        assert_eq!(job.tasks.values().next().unwrap().priority, 100);
    }

    #[tokio::test]
    async fn test_snapshot_isolated_from_later_events() {
        let cache = test_cache();
        cache
            .apply_event(ClusterEvent::PodAdded(pod("p1", "pg1", 1000.0)))
            .await;
        let snapshot = cache.snapshot().await;

        cache
            .apply_event(ClusterEvent::PodAdded(pod("p2", "pg1", 1000.0)))
            .await;
        assert_eq!(snapshot.jobs.get("ns1/pg1").unwrap().tasks.len(), 1);
        let fresh = cache.snapshot().await;
        assert_eq!(fresh.jobs.get("ns1/pg1").unwrap().tasks.len(), 2);
    }

    #[tokio::test]
    async fn test_apply_bind_marks_task_bound() {
        let cache = test_cache();
        cache
            .apply_event(ClusterEvent::NodeAdded(Node::new(
                "n1",
                Resource::new(2000.0, 0.0),
            )))
            .await;
        cache
            .apply_event(ClusterEvent::PodAdded(pod("p1", "pg1", 1000.0)))
            .await;

        let snapshot = cache.snapshot().await;
        let mut task = snapshot
            .jobs
            .get("ns1/pg1")
            .unwrap()
            .tasks
            .values()
            .next()
            .unwrap()
            .clone();
        task.status = TaskStatus::Allocated;
        task.node_name = Some("n1".to_string());

        let output = CycleOutput {
            binds: vec![BindRequest {
                task: task.clone(),
                hostname: "n1".to_string(),
            }],
            ..Default::default()
        };
        cache.apply(output).await;

        assert_eq!(
            cache.task_status(&task.job, &task.id).await,
            Some(TaskStatus::Bound)
        );
        assert_eq!(
            cache.bound_tasks().await.get(&task.id),
            Some(&"n1".to_string())
        );
    }
}
