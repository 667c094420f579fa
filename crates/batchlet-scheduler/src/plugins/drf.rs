//! Dominant Resource Fairness

use std::cmp::Ordering;
use std::collections::BTreeMap;

use batchlet_core::{JobId, JobInfo, Resource, TaskId, TaskInfo};

use crate::framework::{Plugin, SessionState};

const SHARE_DELTA: f64 = 1e-9;

/// Orders jobs by ascending dominant share and stops preemption once it
/// would leave a victim's job with a smaller share than the preemptor's.
#[derive(Default)]
pub struct DrfPlugin {
    total: Resource,
    allocated: BTreeMap<JobId, Resource>,
    shares: BTreeMap<JobId, f64>,
}

/// Plugin builder
pub fn new(_arguments: &BTreeMap<String, String>) -> Box<dyn Plugin> {
    Box::<DrfPlugin>::default()
}

/// A job's dominant share: its largest per-dimension fraction of the
/// cluster total
fn dominant_share(allocated: &Resource, total: &Resource) -> f64 {
    let mut share: f64 = 0.0;
    for (dimension, quantity) in allocated.entries() {
        let cluster = total.quantity(&dimension);
        if cluster > 0.0 {
            share = share.max(quantity / cluster);
        }
    }
    share
}

impl DrfPlugin {
    fn share_of(&self, job_id: &JobId) -> f64 {
        self.shares.get(job_id).copied().unwrap_or(0.0)
    }

    fn refresh_share(&mut self, job_id: &JobId) {
        let allocated = self.allocated.get(job_id).cloned().unwrap_or_default();
        self.shares
            .insert(job_id.clone(), dominant_share(&allocated, &self.total));
    }
}

impl Plugin for DrfPlugin {
    fn name(&self) -> &'static str {
        "drf"
    }

    fn on_session_open(&mut self, state: &SessionState) {
        self.total = Resource::empty();
        for node in state.nodes.values() {
            self.total.add(&node.allocatable);
        }
        for job in state.jobs.values() {
            self.allocated.insert(job.id.clone(), job.allocated());
        }
        let job_ids: Vec<JobId> = state.jobs.keys().cloned().collect();
        for job_id in &job_ids {
            self.refresh_share(job_id);
        }
    }

    fn job_order(&self, a: &JobInfo, b: &JobInfo) -> Option<Ordering> {
        let share_a = self.share_of(&a.id);
        let share_b = self.share_of(&b.id);
        Some(share_a.partial_cmp(&share_b).unwrap_or(Ordering::Equal))
    }

    fn preemptable(
        &self,
        _state: &SessionState,
        preemptor: &TaskInfo,
        victims: &[&TaskInfo],
    ) -> Option<Vec<TaskId>> {
        let mut preemptor_allocated = self
            .allocated
            .get(&preemptor.job)
            .cloned()
            .unwrap_or_default();
        preemptor_allocated.add(&preemptor.resreq);
        let preemptor_share = dominant_share(&preemptor_allocated, &self.total);

        let allowed = victims
            .iter()
            .filter(|victim| {
                let mut victim_allocated = self
                    .allocated
                    .get(&victim.job)
                    .cloned()
                    .unwrap_or_default();
                let _ = victim_allocated.sub(&victim.resreq);
                let victim_share = dominant_share(&victim_allocated, &self.total);
                // The victim's job must stay no poorer than the preemptor
                // becomes, otherwise preemption would just thrash.
                victim_share + SHARE_DELTA >= preemptor_share
            })
            .map(|victim| victim.id.clone())
            .collect();
        Some(allowed)
    }

    fn on_allocate(&mut self, task: &TaskInfo) {
        self.allocated
            .entry(task.job.clone())
            .or_default()
            .add(&task.resreq);
        self.refresh_share(&task.job);
    }

    fn on_evict(&mut self, task: &TaskInfo) {
        if let Some(allocated) = self.allocated.get_mut(&task.job) {
            let _ = allocated.sub(&task.resreq);
        }
        self.refresh_share(&task.job);
    }
}
