//! Weight-proportional queue shares

use std::collections::BTreeMap;

use batchlet_core::{JobId, QueueInfo, Resource, TaskInfo};

use crate::framework::{Plugin, SessionState};

/// Divides the cluster between queues by weight and reports a queue as
/// overused once its allocation exceeds its deserved share.
#[derive(Default)]
pub struct ProportionPlugin {
    deserved: BTreeMap<String, Resource>,
    allocated: BTreeMap<String, Resource>,
    requested: BTreeMap<String, Resource>,
    job_queues: BTreeMap<JobId, String>,
}

/// Plugin builder
pub fn new(_arguments: &BTreeMap<String, String>) -> Box<dyn Plugin> {
    Box::<ProportionPlugin>::default()
}

impl Plugin for ProportionPlugin {
    fn name(&self) -> &'static str {
        "proportion"
    }

    fn on_session_open(&mut self, state: &SessionState) {
        let mut total = Resource::empty();
        for node in state.nodes.values() {
            total.add(&node.allocatable);
        }
        let total_weight: u32 = state.queues.values().map(|q| q.weight).sum();

        for queue in state.queues.values() {
            let deserved = if total_weight > 0 {
                total.scale(queue.weight as f64 / total_weight as f64)
            } else {
                Resource::empty()
            };
            self.deserved.insert(queue.name.clone(), deserved);
            self.allocated
                .insert(queue.name.clone(), Resource::empty());
            self.requested
                .insert(queue.name.clone(), Resource::empty());
        }

        for job in state.jobs.values() {
            self.job_queues.insert(job.id.clone(), job.queue.clone());
            self.allocated
                .entry(job.queue.clone())
                .or_default()
                .add(&job.allocated());
            self.requested
                .entry(job.queue.clone())
                .or_default()
                .add(&job.requested());
        }
    }

    fn overused(&self, queue: &QueueInfo) -> Option<bool> {
        let allocated = match self.allocated.get(&queue.name) {
            Some(allocated) => allocated.clone(),
            None => Resource::empty(),
        };
        let deserved = match self.deserved.get(&queue.name) {
            Some(deserved) => deserved.clone(),
            None => Resource::empty(),
        };
        Some(!allocated.less_equal(&deserved))
    }

    fn on_allocate(&mut self, task: &TaskInfo) {
        if let Some(queue) = self.job_queues.get(&task.job) {
            self.allocated
                .entry(queue.clone())
                .or_default()
                .add(&task.resreq);
        }
    }

    fn on_evict(&mut self, task: &TaskInfo) {
        if let Some(queue) = self.job_queues.get(&task.job) {
            if let Some(allocated) = self.allocated.get_mut(queue) {
                let _ = allocated.sub(&task.resreq);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchlet_core::{JobInfo, Node, NodeInfo, Pod, Queue, TaskStatus};

    fn state_with_queues() -> SessionState {
        let mut state = SessionState::default();
        state.nodes.insert(
            "n1".to_string(),
            NodeInfo::new(&Node::new("n1", Resource::new(4000.0, 0.0))),
        );
        state
            .queues
            .insert("q1".to_string(), QueueInfo::new(&Queue::new("q1", 3)));
        state
            .queues
            .insert("q2".to_string(), QueueInfo::new(&Queue::new("q2", 1)));
        state
    }

    fn job_in_queue(name: &str, queue: &str, running_milli_cpu: f64) -> JobInfo {
        let mut job = JobInfo::new(format!("ns1/{}", name), "ns1", name);
        job.queue = queue.to_string();
        if running_milli_cpu > 0.0 {
            let pod = Pod::new("ns1", &format!("{}-0", name), Resource::new(running_milli_cpu, 0.0));
            let mut task = TaskInfo::from_pod(&pod, job.id.clone(), 0);
            task.status = TaskStatus::Running;
            job.add_task(task);
        }
        job
    }

    #[test]
    fn test_deserved_follows_weights() {
        let mut state = state_with_queues();
        state.jobs.insert(
            "ns1/j1".to_string(),
            job_in_queue("j1", "q1", 0.0),
        );
        let mut plugin = ProportionPlugin::default();
        plugin.on_session_open(&state);

        assert_eq!(plugin.deserved["q1"].milli_cpu, 3000.0);
        assert_eq!(plugin.deserved["q2"].milli_cpu, 1000.0);
    }

    #[test]
    fn test_overused_when_allocation_exceeds_deserved() {
        let mut state = state_with_queues();
        let job = job_in_queue("j1", "q2", 2000.0);
        state.jobs.insert(job.id.clone(), job);

        let mut plugin = ProportionPlugin::default();
        plugin.on_session_open(&state);

        let q2 = QueueInfo::new(&Queue::new("q2", 1));
        assert_eq!(plugin.overused(&q2), Some(true));
        let q1 = QueueInfo::new(&Queue::new("q1", 3));
        assert_eq!(plugin.overused(&q1), Some(false));
    }

    #[test]
    fn test_allocation_hooks_update_usage() {
        let mut state = state_with_queues();
        let job = job_in_queue("j1", "q2", 0.0);
        state.jobs.insert(job.id.clone(), job);

        let mut plugin = ProportionPlugin::default();
        plugin.on_session_open(&state);

        let pod = Pod::new("ns1", "p", Resource::new(1500.0, 0.0));
        let task = TaskInfo::from_pod(&pod, "ns1/j1".to_string(), 0);
        plugin.on_allocate(&task);
        let q2 = QueueInfo::new(&Queue::new("q2", 1));
        assert_eq!(plugin.overused(&q2), Some(true));

        plugin.on_evict(&task);
        assert_eq!(plugin.overused(&q2), Some(false));
    }
}
