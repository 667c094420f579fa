//! The scheduling loop
//!
//! One long-lived task that, on a timer, snapshots the cache, opens a
//! session, runs the configured actions in order, and hands the committed
//! output back to the cache. Every cycle is independent: a failed cycle
//! loses nothing but its own tentative allocations.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use batchlet_cache::SchedulerCache;
use batchlet_core::{BatchletError, BatchletResult, SchedulerConfig};

use crate::actions::{self, Action};
use crate::framework::{PluginRegistry, Session};
use crate::plugins;

/// The batch scheduler
pub struct Scheduler {
    cache: Arc<SchedulerCache>,
    config: SchedulerConfig,
    plugins: PluginRegistry,
    actions: Vec<Box<dyn Action>>,
    period: Duration,
}

impl Scheduler {
    /// Create a scheduler over the cache with the given policy.
    ///
    /// Unknown actions or plugins and malformed options are rejected here,
    /// before the first cycle runs.
    pub fn new(
        cache: Arc<SchedulerCache>,
        config: SchedulerConfig,
        period: Duration,
    ) -> BatchletResult<Self> {
        let plugin_registry = plugins::default_registry();
        for tier in &config.tiers {
            for plugin in &tier.plugins {
                if !plugin_registry.contains(&plugin.name) {
                    return Err(BatchletError::Config(format!(
                        "unknown plugin: {}",
                        plugin.name
                    )));
                }
            }
        }

        let action_registry = actions::default_registry();
        let mut resolved = Vec::new();
        for action in &config.actions {
            resolved.push(action_registry.build(&action.name)?);
        }

        config.starvation_threshold()?;

        Ok(Self {
            cache,
            config,
            plugins: plugin_registry,
            actions: resolved,
            period,
        })
    }

    /// Run scheduling cycles forever
    pub async fn run(&self) {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(e) = self.run_once().await {
                warn!(error = %e, "Scheduling cycle failed");
            }
        }
    }

    /// Run one full cycle: snapshot, open, execute actions, close, commit
    pub async fn run_once(&self) -> BatchletResult<()> {
        let snapshot = self.cache.snapshot().await;
        let mut ssn = Session::open(snapshot, &self.plugins, &self.config)?;

        for action in &self.actions {
            debug!(session = %ssn.id, action = action.name(), "Executing action");
            if let Err(e) = action.execute(&mut ssn) {
                warn!(session = %ssn.id, action = action.name(), error = %e, "Action failed");
            }
        }

        let output = ssn.close();
        self.cache.apply(output).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchlet_cache::LoggingClient;
    use batchlet_core::{ActionConfig, PluginConfig, TierConfig};
    use std::collections::BTreeMap;

    fn cache() -> Arc<SchedulerCache> {
        let client = Arc::new(LoggingClient);
        Arc::new(SchedulerCache::new(
            client.clone(),
            client.clone(),
            client.clone(),
            client,
            Duration::from_secs(5),
            8,
        ))
    }

    #[test]
    fn test_unknown_action_is_fatal() {
        let mut config = SchedulerConfig::default();
        config.actions.push(ActionConfig {
            name: "reclaim".to_string(),
            options: BTreeMap::new(),
        });
        let result = Scheduler::new(cache(), config, Duration::from_secs(1));
        assert!(matches!(result, Err(BatchletError::Config(_))));
    }

    #[test]
    fn test_unknown_plugin_is_fatal() {
        let mut config = SchedulerConfig::default();
        config.tiers.push(TierConfig {
            plugins: vec![PluginConfig::new("topology")],
            weight: 1.0,
        });
        let result = Scheduler::new(cache(), config, Duration::from_secs(1));
        assert!(matches!(result, Err(BatchletError::Config(_))));
    }

    #[tokio::test]
    async fn test_empty_cycle_runs() {
        let scheduler =
            Scheduler::new(cache(), SchedulerConfig::default(), Duration::from_secs(1)).unwrap();
        scheduler.run_once().await.unwrap();
    }
}
