//! Interfaces to the external orchestrator
//!
//! The cache drives scheduling decisions out through these traits. Every
//! call is expected to be idempotent keyed by `(pod UID, hostname)`.

use async_trait::async_trait;
use tracing::info;

use batchlet_core::{BatchletResult, JobInfo, TaskInfo};

/// A condition reported back onto a pod or pod group
#[derive(Debug, Clone)]
pub struct PodCondition {
    pub reason: String,
    pub message: String,
}

impl PodCondition {
    /// Condition for a successful placement
    pub fn scheduled(hostname: &str) -> Self {
        Self {
            reason: "Scheduled".to_string(),
            message: format!("assigned to {}", hostname),
        }
    }

    /// Condition for a placement that could not be made this cycle
    pub fn unschedulable(message: &str) -> Self {
        Self {
            reason: "Unschedulable".to_string(),
            message: message.to_string(),
        }
    }
}

/// Persists a placement decision
#[async_trait]
pub trait Binder: Send + Sync {
    async fn bind(&self, task: &TaskInfo, hostname: &str) -> BatchletResult<()>;
}

/// Prepares and binds the volumes a task needs on its host
#[async_trait]
pub trait VolumeBinder: Send + Sync {
    async fn allocate_volumes(&self, task: &TaskInfo, hostname: &str) -> BatchletResult<()>;

    async fn bind_volumes(&self, task: &TaskInfo) -> BatchletResult<()>;
}

/// Reports scheduling outcomes back to the orchestrator
#[async_trait]
pub trait StatusUpdater: Send + Sync {
    async fn update_pod_condition(
        &self,
        task: &TaskInfo,
        condition: &PodCondition,
    ) -> BatchletResult<()>;

    async fn update_pod_group(&self, job: &JobInfo, condition: &PodCondition)
        -> BatchletResult<()>;
}

/// Requests removal of a task from its node
#[async_trait]
pub trait Evictor: Send + Sync {
    async fn evict(&self, task: &TaskInfo) -> BatchletResult<()>;
}

/// Client that records decisions in the log only.
///
/// Stands in for the orchestrator client when the daemon runs without one
/// wired up; real deployments supply their own implementations.
#[derive(Debug, Default)]
pub struct LoggingClient;

#[async_trait]
impl Binder for LoggingClient {
    async fn bind(&self, task: &TaskInfo, hostname: &str) -> BatchletResult<()> {
        info!(task = %task.key(), host = hostname, "Bind");
        Ok(())
    }
}

#[async_trait]
impl VolumeBinder for LoggingClient {
    async fn allocate_volumes(&self, _task: &TaskInfo, _hostname: &str) -> BatchletResult<()> {
        Ok(())
    }

    async fn bind_volumes(&self, _task: &TaskInfo) -> BatchletResult<()> {
        Ok(())
    }
}

#[async_trait]
impl StatusUpdater for LoggingClient {
    async fn update_pod_condition(
        &self,
        _task: &TaskInfo,
        _condition: &PodCondition,
    ) -> BatchletResult<()> {
        Ok(())
    }

    async fn update_pod_group(
        &self,
        job: &JobInfo,
        condition: &PodCondition,
    ) -> BatchletResult<()> {
        info!(job = %job.id, reason = %condition.reason, message = %condition.message, "Pod group condition");
        Ok(())
    }
}

#[async_trait]
impl Evictor for LoggingClient {
    async fn evict(&self, task: &TaskInfo) -> BatchletResult<()> {
        info!(task = %task.key(), "Evict");
        Ok(())
    }
}
