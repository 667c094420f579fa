//! Scheduler policy configuration
//!
//! The policy file is YAML: an ordered list of actions and an ordered list
//! of plugin tiers. Unknown actions or plugins are rejected at startup.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::error::{BatchletError, BatchletResult};

/// Name of the backfill enable option
pub const BACKFILL_ENABLE_OPTION: &str = "enable";
/// Name of the backfill starvation threshold option
pub const STARVATION_THRESHOLD_OPTION: &str = "starvationThreshold";

/// Default starvation threshold when backfill does not configure one
pub const DEFAULT_STARVATION_THRESHOLD: Duration = Duration::from_secs(30);

/// Scheduler policy: which actions run, in what order, driven by which
/// plugin tiers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Actions executed in order each cycle
    pub actions: Vec<ActionConfig>,
    /// Plugin tiers; earlier tiers win ordering decisions
    pub tiers: Vec<TierConfig>,
}

/// One configured action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionConfig {
    /// Registered action name
    pub name: String,
    /// Action-specific options
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

/// One plugin tier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierConfig {
    /// Plugins in this tier, in composition order
    pub plugins: Vec<PluginConfig>,
    /// Weight applied to this tier's node scores
    #[serde(default = "default_tier_weight")]
    pub weight: f64,
}

/// One configured plugin with per-callback enablement
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginConfig {
    /// Registered plugin name
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled_job_order: bool,
    #[serde(default = "default_true")]
    pub enabled_task_order: bool,
    #[serde(default = "default_true")]
    pub enabled_node_order: bool,
    #[serde(default = "default_true")]
    pub enabled_predicate: bool,
    #[serde(default = "default_true")]
    pub enabled_job_ready: bool,
    #[serde(default = "default_true")]
    pub enabled_preemptable: bool,
    #[serde(default = "default_true")]
    pub enabled_overused: bool,
    /// Plugin-specific arguments
    #[serde(default)]
    pub arguments: BTreeMap<String, String>,
}

impl PluginConfig {
    /// A plugin enabled for every callback, with no arguments
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            enabled_job_order: true,
            enabled_task_order: true,
            enabled_node_order: true,
            enabled_predicate: true,
            enabled_job_ready: true,
            enabled_preemptable: true,
            enabled_overused: true,
            arguments: BTreeMap::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_tier_weight() -> f64 {
    1.0
}

impl Default for SchedulerConfig {
    /// The canonical policy: allocate then backfill, gang admission and
    /// priority in the first tier, fairness and placement in the second
    fn default() -> Self {
        Self {
            actions: vec![
                ActionConfig {
                    name: "allocate".to_string(),
                    options: BTreeMap::new(),
                },
                ActionConfig {
                    name: "backfill".to_string(),
                    options: BTreeMap::new(),
                },
            ],
            tiers: vec![
                TierConfig {
                    plugins: vec![PluginConfig::new("priority"), PluginConfig::new("gang")],
                    weight: 1.0,
                },
                TierConfig {
                    plugins: vec![
                        PluginConfig::new("drf"),
                        PluginConfig::new("predicates"),
                        PluginConfig::new("proportion"),
                        PluginConfig::new("nodeorder"),
                    ],
                    weight: 1.0,
                },
            ],
        }
    }
}

impl SchedulerConfig {
    /// Parse a policy from YAML
    pub fn from_yaml(content: &str) -> BatchletResult<Self> {
        let config: SchedulerConfig = serde_yaml::from_str(content)?;
        if config.actions.is_empty() {
            return Err(BatchletError::Config("no actions configured".to_string()));
        }
        Ok(config)
    }

    /// Load a policy from a YAML file
    pub fn from_file(path: &Path) -> BatchletResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BatchletError::Config(format!("Failed to read config file: {}", e))
        })?;
        Self::from_yaml(&content)
    }

    fn backfill_option(&self, option: &str) -> Option<&str> {
        self.actions
            .iter()
            .find(|a| a.name == "backfill")
            .and_then(|a| a.options.get(option))
            .map(String::as_str)
    }

    /// Whether the backfill action may place anything this run
    pub fn backfill_enabled(&self) -> bool {
        self.backfill_option(BACKFILL_ENABLE_OPTION) == Some("true")
    }

    /// Pending time past which backfill is suspended for the cycle
    pub fn starvation_threshold(&self) -> BatchletResult<Duration> {
        match self.backfill_option(STARVATION_THRESHOLD_OPTION) {
            Some(value) => parse_duration(value),
            None => Ok(DEFAULT_STARVATION_THRESHOLD),
        }
    }
}

/// Parse a duration of the form `300ms`, `30s`, `5m`, or bare seconds
pub fn parse_duration(value: &str) -> BatchletResult<Duration> {
    let value = value.trim();
    let (digits, unit) = match value.find(|c: char| !c.is_ascii_digit()) {
        Some(split) => value.split_at(split),
        None => (value, "s"),
    };
    let amount: u64 = digits
        .parse()
        .map_err(|_| BatchletError::Config(format!("invalid duration: {}", value)))?;
    match unit {
        "ms" => Ok(Duration::from_millis(amount)),
        "s" => Ok(Duration::from_secs(amount)),
        "m" => Ok(Duration::from_secs(amount * 60)),
        "h" => Ok(Duration::from_secs(amount * 3600)),
        _ => Err(BatchletError::Config(format!(
            "invalid duration unit: {}",
            value
        ))),
    }
}
