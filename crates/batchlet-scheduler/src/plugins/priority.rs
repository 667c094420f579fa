//! Priority-based ordering

use std::cmp::Ordering;
use std::collections::BTreeMap;

use batchlet_core::{JobInfo, TaskId, TaskInfo};

use crate::framework::{Plugin, SessionState};

/// Orders jobs and tasks by declared priority, older first on ties, and
/// admits preemption victims only from lower-priority jobs (backfill tasks
/// are always admissible).
pub struct PriorityPlugin;

/// Plugin builder
pub fn new(_arguments: &BTreeMap<String, String>) -> Box<dyn Plugin> {
    Box::new(PriorityPlugin)
}

fn job_priority(state: &SessionState, task: &TaskInfo) -> i32 {
    state
        .jobs
        .get(&task.job)
        .map(|j| j.priority)
        .unwrap_or(task.priority)
}

impl Plugin for PriorityPlugin {
    fn name(&self) -> &'static str {
        "priority"
    }

    fn job_order(&self, a: &JobInfo, b: &JobInfo) -> Option<Ordering> {
        Some(
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.creation_time.cmp(&b.creation_time)),
        )
    }

    fn task_order(&self, a: &TaskInfo, b: &TaskInfo) -> Option<Ordering> {
        Some(
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.creation_time.cmp(&b.creation_time)),
        )
    }

    fn preemptable(
        &self,
        state: &SessionState,
        preemptor: &TaskInfo,
        victims: &[&TaskInfo],
    ) -> Option<Vec<TaskId>> {
        let preemptor_priority = job_priority(state, preemptor);
        Some(
            victims
                .iter()
                .filter(|v| v.is_backfill || job_priority(state, v) < preemptor_priority)
                .map(|v| v.id.clone())
                .collect(),
        )
    }
}
