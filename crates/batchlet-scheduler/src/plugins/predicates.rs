//! Hard feasibility checks

use std::collections::BTreeMap;

use batchlet_core::{BatchletError, BatchletResult, NodeInfo, TaintEffect, TaskInfo};

use crate::framework::Plugin;

/// Evaluates node selectors, taints and tolerations, and resource fit
/// against the node's accessible pool (idle plus evictable backfill).
pub struct PredicatesPlugin;

/// Plugin builder
pub fn new(_arguments: &BTreeMap<String, String>) -> Box<dyn Plugin> {
    Box::new(PredicatesPlugin)
}

fn check(task: &TaskInfo, node: &NodeInfo) -> BatchletResult<()> {
    let Some(raw) = &node.node else {
        return Err(BatchletError::Unschedulable {
            task: task.key(),
            node: node.name.clone(),
            reason: "node not reported by the orchestrator".to_string(),
        });
    };

    for (key, value) in &task.node_selector {
        if raw.labels.get(key) != Some(value) {
            return Err(BatchletError::Unschedulable {
                task: task.key(),
                node: node.name.clone(),
                reason: format!("node selector mismatch on label {}", key),
            });
        }
    }

    for taint in &raw.taints {
        if taint.effect == TaintEffect::NoSchedule && !task.tolerations.contains(&taint.key) {
            return Err(BatchletError::Unschedulable {
                task: task.key(),
                node: node.name.clone(),
                reason: format!("untolerated taint {}", taint.key),
            });
        }
    }

    if !task.resreq.less_equal(&node.accessible()) {
        return Err(BatchletError::InsufficientResources {
            task: task.key(),
            node: node.name.clone(),
        });
    }

    Ok(())
}

impl Plugin for PredicatesPlugin {
    fn name(&self) -> &'static str {
        "predicates"
    }

    fn predicate(&self, task: &TaskInfo, node: &NodeInfo) -> Option<BatchletResult<()>> {
        Some(check(task, node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchlet_core::{Node, Pod, Resource, Taint};

    fn task(milli_cpu: f64) -> TaskInfo {
        let pod = Pod::new("ns1", "p1", Resource::new(milli_cpu, 0.0));
        TaskInfo::from_pod(&pod, "ns1/pg1".to_string(), 0)
    }

    fn node(milli_cpu: f64) -> NodeInfo {
        NodeInfo::new(&Node::new("n1", Resource::new(milli_cpu, 0.0)))
    }

    #[test]
    fn test_resource_fit() {
        let plugin = PredicatesPlugin;
        assert!(plugin.predicate(&task(1000.0), &node(2000.0)).unwrap().is_ok());
        assert!(matches!(
            plugin.predicate(&task(4000.0), &node(2000.0)).unwrap(),
            Err(BatchletError::InsufficientResources { .. })
        ));
    }

    #[test]
    fn test_node_selector() {
        let plugin = PredicatesPlugin;
        let mut constrained = task(1000.0);
        constrained
            .node_selector
            .insert("zone".to_string(), "a".to_string());

        let plain = node(2000.0);
        assert!(matches!(
            plugin.predicate(&constrained, &plain).unwrap(),
            Err(BatchletError::Unschedulable { .. })
        ));

        let mut labeled = node(2000.0);
        if let Some(raw) = labeled.node.as_mut() {
            raw.labels.insert("zone".to_string(), "a".to_string());
        }
        assert!(plugin.predicate(&constrained, &labeled).unwrap().is_ok());
    }

    #[test]
    fn test_taints_and_tolerations() {
        let plugin = PredicatesPlugin;
        let mut tainted = node(2000.0);
        if let Some(raw) = tainted.node.as_mut() {
            raw.taints.push(Taint {
                key: "dedicated".to_string(),
                value: "batch".to_string(),
                effect: TaintEffect::NoSchedule,
            });
        }

        assert!(matches!(
            plugin.predicate(&task(1000.0), &tainted).unwrap(),
            Err(BatchletError::Unschedulable { .. })
        ));

        let mut tolerant = task(1000.0);
        tolerant.tolerations.push("dedicated".to_string());
        assert!(plugin.predicate(&tolerant, &tainted).unwrap().is_ok());
    }

    #[test]
    fn test_backfill_capacity_stays_accessible() {
        let plugin = PredicatesPlugin;
        let mut occupied = node(2000.0);
        let mut bf = task(1500.0);
        bf.is_backfill = true;
        bf.status = batchlet_core::TaskStatus::Running;
        bf.node_name = Some("n1".to_string());
        occupied.add_task(&bf).unwrap();

        // Idle is only 500m but the backfill slice is evictable.
        assert!(plugin.predicate(&task(1000.0), &occupied).unwrap().is_ok());
    }
}
